use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth::Identity;

pub type SessionId = Uuid;

/// One frame on the wire, in either direction: `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub event: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// Control stream from the hub to a session's socket pump. Events are
/// Arc-shared so a room relay serializes the payload once per receiver at
/// most, never clones the tree.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(Arc<Envelope>),
    /// Tells the socket pump to close the connection (driver eviction).
    Close,
}

/// Ephemeral per-connection state. Dies with the connection; the identity is
/// bound at connect time and never revalidated or changed.
pub struct Session {
    pub identity: Identity,
    pub(super) tx: mpsc::UnboundedSender<Outbound>,
    pub(super) rooms: HashSet<String>,
}
