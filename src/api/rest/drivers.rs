use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::patch;
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::geo;
use crate::models::GeoPoint;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/drivers/:id/location", patch(update_driver_location))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub latitude: f64,
    pub longitude: f64,
}

/// Write path for the persisted driver record. The device already filtered
/// by movement; the store duplicates the threshold check, so the response
/// reports whether the update was actually applied.
async fn update_driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<Value>, AppError> {
    let position = GeoPoint {
        lat: payload.latitude,
        lng: payload.longitude,
    };

    if let Err(err) = geo::validate(&position) {
        state
            .metrics
            .location_updates_total
            .with_label_values(&["rejected"])
            .inc();
        return Err(err.into());
    }

    let applied = state
        .store
        .update_driver_location(&id, position, Utc::now())
        .await?;

    state
        .metrics
        .location_updates_total
        .with_label_values(&[if applied { "applied" } else { "suppressed" }])
        .inc();

    Ok(Json(json!({ "applied": applied })))
}
