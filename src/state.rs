use std::sync::Arc;

use crate::hub::Hub;
use crate::observability::metrics::Metrics;
use crate::store::{DeliveryStore, InMemoryStore};

pub struct AppState {
    pub hub: Hub,
    pub store: Arc<dyn DeliveryStore>,
    pub metrics: Metrics,
    pub movement_threshold_m: f64,
    pub auth_secret: String,
}

impl AppState {
    pub fn new(movement_threshold_m: f64, auth_secret: impl Into<String>) -> Self {
        let metrics = Metrics::new();

        Self {
            hub: Hub::new(metrics.clone()),
            store: Arc::new(InMemoryStore::new(movement_threshold_m)),
            metrics,
            movement_threshold_m,
            auth_secret: auth_secret.into(),
        }
    }

    /// Same wiring with a caller-provided store (tests seed orders through
    /// the concrete store before handing it in).
    pub fn with_store(
        movement_threshold_m: f64,
        auth_secret: impl Into<String>,
        store: Arc<dyn DeliveryStore>,
    ) -> Self {
        let metrics = Metrics::new();

        Self {
            hub: Hub::new(metrics.clone()),
            store,
            metrics,
            movement_threshold_m,
            auth_secret: auth_secret.into(),
        }
    }
}
