use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Last persisted position of a driver. `updated_at` never moves backwards
/// for a given driver (the store clamps it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLocation {
    pub driver_id: String,
    pub position: GeoPoint,
    pub updated_at: DateTime<Utc>,
    pub available: bool,
}
