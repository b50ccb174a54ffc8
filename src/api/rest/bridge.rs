use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::AppError;
use crate::hub::Envelope;
use crate::state::AppState;

/// Inbound channel for the (trusted) order-management API: inject an event
/// into one room, or into every connected session when no room is given.
#[derive(Debug, Deserialize)]
pub struct EmitRequest {
    pub event: String,
    #[serde(default)]
    pub room: Option<String>,
    pub data: Value,
}

pub async fn emit(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let request: EmitRequest = serde_json::from_slice(&body).map_err(|_| {
        state
            .metrics
            .bridge_emits_total
            .with_label_values(&["invalid"])
            .inc();
        AppError::BadRequest("Invalid JSON".to_string())
    })?;

    let EmitRequest { event, room, data } = request;
    let delivered = match &room {
        Some(room) => state.hub.relay_to_room(room, Envelope::new(event.clone(), data)),
        None => state.hub.broadcast_all(Envelope::new(event.clone(), data)),
    };

    state
        .metrics
        .bridge_emits_total
        .with_label_values(&["success"])
        .inc();
    debug!(event = %event, room = room.as_deref().unwrap_or("*"), delivered, "bridge emit");

    Ok(Json(json!({ "success": true })))
}
