pub mod rooms;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{Identity, Role};
use crate::observability::metrics::Metrics;

pub use session::{Envelope, Outbound, Session, SessionId};

/// A position event as relayed to rooms. `order_id` routes the event but is
/// not part of the wire payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionUpdate {
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing, default)]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Room {
    members: HashMap<SessionId, mpsc::UnboundedSender<Outbound>>,
}

/// Owns every piece of ephemeral realtime state: connected sessions, room
/// memberships, the driverId -> connection map and the orderId -> driverId
/// map. All mutation goes through these methods; nothing here survives a
/// restart (drivers re-announce on reconnect).
pub struct Hub {
    sessions: DashMap<SessionId, Session>,
    rooms: DashMap<String, Room>,
    drivers: DashMap<String, SessionId>,
    deliveries: DashMap<String, String>,
    metrics: Metrics,
}

impl Hub {
    pub fn new(metrics: Metrics) -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
            drivers: DashMap::new(),
            deliveries: DashMap::new(),
            metrics,
        }
    }

    /// Accepts a connection with an already-verified identity. Returns the
    /// session id and the receiver the socket pump drains.
    pub fn register(&self, identity: Identity) -> (SessionId, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session_id = Uuid::new_v4();

        self.sessions.insert(
            session_id,
            Session {
                identity,
                tx,
                rooms: Default::default(),
            },
        );
        self.metrics.sessions_connected.inc();

        (session_id, rx)
    }

    /// Removes the session from every room it joined and, for drivers, drops
    /// its registry entry — unless a newer connection already took it over.
    pub fn disconnect(&self, session_id: SessionId) {
        let Some((_, session)) = self.sessions.remove(&session_id) else {
            return;
        };
        self.metrics.sessions_connected.dec();

        for room in &session.rooms {
            self.leave_room(session_id, room);
        }

        if session.identity.role == Role::Driver {
            self.drivers
                .remove_if(&session.identity.subject, |_, owner| *owner == session_id);
        }

        debug!(session_id = %session_id, role = %session.identity.role, "session disconnected");
    }

    pub fn join(&self, session_id: SessionId, room: &str) -> bool {
        let tx = match self.sessions.get_mut(&session_id) {
            Some(mut session) => {
                session.rooms.insert(room.to_string());
                session.tx.clone()
            }
            None => return false,
        };

        let mut created = false;
        self.rooms
            .entry(room.to_string())
            .or_insert_with(|| {
                created = true;
                Room::default()
            })
            .members
            .insert(session_id, tx);

        if created {
            self.metrics.rooms_active.inc();
        }

        debug!(session_id = %session_id, room, "joined room");
        true
    }

    fn leave_room(&self, session_id: SessionId, room: &str) {
        if let Some(mut entry) = self.rooms.get_mut(room) {
            entry.members.remove(&session_id);
        }
        if self
            .rooms
            .remove_if(room, |_, r| r.members.is_empty())
            .is_some()
        {
            self.metrics.rooms_active.dec();
        }
    }

    /// Delivers to every member joined at this moment, in relay order.
    /// Relays to the same room are serialized by the room entry; sessions
    /// joining afterwards receive nothing (no replay).
    pub fn relay_to_room(&self, room: &str, envelope: Envelope) -> usize {
        self.metrics
            .events_relayed_total
            .with_label_values(&[envelope.event.as_str()])
            .inc();

        let envelope = Arc::new(envelope);
        match self.rooms.get_mut(room) {
            Some(room) => room
                .members
                .values()
                .filter(|tx| tx.send(Outbound::Event(envelope.clone())).is_ok())
                .count(),
            None => 0,
        }
    }

    /// Relays to every connected session regardless of room membership.
    pub fn broadcast_all(&self, envelope: Envelope) -> usize {
        self.metrics
            .events_relayed_total
            .with_label_values(&[envelope.event.as_str()])
            .inc();

        let envelope = Arc::new(envelope);
        self.sessions
            .iter()
            .filter(|entry| entry.tx.send(Outbound::Event(envelope.clone())).is_ok())
            .count()
    }

    /// Direct single-connection send. Returns false (no-op) when the driver
    /// has no live connection.
    pub fn send_to_driver(&self, driver_id: &str, envelope: Envelope) -> bool {
        let Some(session_id) = self.drivers.get(driver_id).map(|entry| *entry) else {
            return false;
        };
        let Some(session) = self.sessions.get(&session_id) else {
            return false;
        };

        self.metrics
            .events_relayed_total
            .with_label_values(&[envelope.event.as_str()])
            .inc();
        session.tx.send(Outbound::Event(Arc::new(envelope))).is_ok()
    }

    /// Registers the driver's connection and joins its own room. A previous
    /// connection for the same driver is explicitly told to close instead of
    /// being left behind as a stale duplicate receiver.
    pub fn driver_online(&self, session_id: SessionId, driver_id: &str) {
        if let Some(previous) = self.drivers.insert(driver_id.to_string(), session_id) {
            if previous != session_id {
                if let Some(old) = self.sessions.get(&previous) {
                    let _ = old.tx.send(Outbound::Close);
                }
                info!(driver_id, "superseded previous driver connection");
            }
        }

        self.join(session_id, &rooms::driver(driver_id));
        info!(driver_id, "driver online");
    }

    /// Records the delivery assignment and puts the driver's session into
    /// the order room.
    pub fn start_delivery(&self, session_id: SessionId, order_id: &str, driver_id: &str) {
        self.deliveries
            .insert(order_id.to_string(), driver_id.to_string());
        self.join(session_id, &rooms::order(order_id));
        info!(order_id, driver_id, "delivery started");
    }

    /// Relays the position to the order room (when a delivery is active) and
    /// unconditionally to admin tracking. Distance filtering happened
    /// upstream on the device; the hub trusts its inputs.
    pub fn publish_position(&self, update: &PositionUpdate) {
        let data = match serde_json::to_value(update) {
            Ok(data) => data,
            Err(err) => {
                warn!(error = %err, "failed to serialize position update");
                return;
            }
        };

        if let Some(order_id) = &update.order_id {
            self.relay_to_room(
                &rooms::order(order_id),
                Envelope::new("posicion_repartidor", data.clone()),
            );
        }
        self.relay_to_room(rooms::ADMIN_TRACKING, Envelope::new("driver_position", data));
    }

    /// Relays the delivered event to the order room and clears the
    /// assignment. Returns the driver that was assigned, if any.
    pub fn delivery_completed(&self, order_id: &str) -> Option<String> {
        self.relay_to_room(
            &rooms::order(order_id),
            Envelope::new("pedido_entregado", json!({ "orderId": order_id })),
        );

        let removed = self.deliveries.remove(order_id).map(|(_, driver)| driver);
        info!(order_id, "delivery completed");
        removed
    }

    /// Sends an envelope to one session only (validation feedback).
    pub fn notify(&self, session_id: SessionId, envelope: Envelope) -> bool {
        match self.sessions.get(&session_id) {
            Some(session) => session.tx.send(Outbound::Event(Arc::new(envelope))).is_ok(),
            None => false,
        }
    }

    pub fn assigned_driver(&self, order_id: &str) -> Option<String> {
        self.deliveries
            .get(order_id)
            .map(|entry| entry.value().clone())
    }

    pub fn driver_session(&self, driver_id: &str) -> Option<SessionId> {
        self.drivers.get(driver_id).map(|entry| *entry)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
