use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use chrono::Utc;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::{self, Identity, Role};
use crate::error::AppError;
use crate::hub::{rooms, Envelope, Outbound, PositionUpdate, SessionId};
use crate::lifecycle::OrderStatus;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: String,
}

/// The token is checked before the upgrade; role and subject are bound to
/// the session here and never taken from later client messages.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, AppError> {
    let identity = auth::verify(&query.token, &state.auth_secret)
        .map_err(|err| AppError::Unauthorized(err.to_string()))?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, identity)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();
    let (session_id, mut rx) = state.hub.register(identity.clone());

    info!(session_id = %session_id, role = %identity.role, "realtime client connected");

    let send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Event(envelope) => {
                    let json = match serde_json::to_string(&*envelope) {
                        Ok(json) => json,
                        Err(err) => {
                            warn!(error = %err, "failed to serialize outbound event");
                            continue;
                        }
                    };

                    if sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let recv_state = state.clone();
    let recv_identity = identity.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            let Message::Text(text) = message else {
                continue;
            };

            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(message) => {
                    handle_event(&recv_state, session_id, &recv_identity, message).await;
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "unparseable frame");
                    reject(&recv_state, session_id, "unparseable frame");
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.hub.disconnect(session_id);
    info!(session_id = %session_id, "realtime client disconnected");
}

/// Client -> server events, exactly the wire names of the realtime taxonomy.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    DriverOnline(String),
    StartDelivery(StartDelivery),
    ActualizarPosicion(PositionReport),
    TrackOrder(String),
    AdminTracking,
    JoinAdminOrders,
    JoinMerchantRoom(String),
    JoinCustomerRoom(String),
    DeliveryCompleted(DeliveryCompleted),
    NewOrderOffer(NewOrderOffer),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartDelivery {
    pub order_id: String,
    pub driver_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionReport {
    pub driver_id: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub heading: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryCompleted {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderOffer {
    pub driver_id: String,
    pub order: Value,
}

pub(crate) async fn handle_event(
    state: &Arc<AppState>,
    session_id: SessionId,
    identity: &Identity,
    message: ClientMessage,
) {
    match message {
        ClientMessage::DriverOnline(driver_id) => {
            if !expect_driver(state, session_id, identity, &driver_id, "driver_online") {
                return;
            }
            state.hub.driver_online(session_id, &driver_id);
        }

        ClientMessage::StartDelivery(request) => {
            if !expect_driver(
                state,
                session_id,
                identity,
                &request.driver_id,
                "start_delivery",
            ) {
                return;
            }

            state
                .hub
                .start_delivery(session_id, &request.order_id, &request.driver_id);

            // advisory lifecycle check against the store
            match state.store.fetch_order(&request.order_id).await {
                Ok(Some(order)) if !order.status.driver_may_be_assigned() => {
                    warn!(
                        order_id = %request.order_id,
                        status = %order.status,
                        "delivery started before driver assignment"
                    );
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    warn!(order_id = %request.order_id, "delivery started for unknown order");
                }
                Err(err) => warn!(error = %err, "order lookup failed"),
            }
        }

        ClientMessage::ActualizarPosicion(report) => {
            if !expect_driver(
                state,
                session_id,
                identity,
                &report.driver_id,
                "actualizar_posicion",
            ) {
                return;
            }

            // distance filtering already happened on the device
            state.hub.publish_position(&PositionUpdate {
                driver_id: report.driver_id,
                lat: report.lat,
                lng: report.lng,
                order_id: report.order_id,
                heading: report.heading,
                speed: report.speed,
                timestamp: Utc::now(),
            });
        }

        ClientMessage::TrackOrder(order_id) => {
            if !matches!(identity.role, Role::Customer | Role::Admin) {
                reject(state, session_id, "track_order requires a customer session");
                return;
            }
            state.hub.join(session_id, &rooms::order(&order_id));
        }

        ClientMessage::AdminTracking => {
            if identity.role != Role::Admin {
                reject(state, session_id, "admin_tracking requires an admin session");
                return;
            }
            state.hub.join(session_id, rooms::ADMIN_TRACKING);
        }

        ClientMessage::JoinAdminOrders => {
            if identity.role != Role::Admin {
                reject(state, session_id, "join_admin_orders requires an admin session");
                return;
            }
            state.hub.join(session_id, rooms::ADMIN_ORDERS);
        }

        ClientMessage::JoinMerchantRoom(merchant_id) => {
            let allowed = identity.role == Role::Admin
                || (identity.role == Role::Merchant && identity.subject == merchant_id);
            if !allowed {
                reject(state, session_id, "join_merchant_room: not your merchant room");
                return;
            }
            state.hub.join(session_id, &rooms::merchant(&merchant_id));
        }

        ClientMessage::JoinCustomerRoom(customer_id) => {
            let allowed = identity.role == Role::Admin
                || (identity.role == Role::Customer && identity.subject == customer_id);
            if !allowed {
                reject(state, session_id, "join_customer_room: not your customer room");
                return;
            }
            state.hub.join(session_id, &rooms::customer(&customer_id));
        }

        ClientMessage::DeliveryCompleted(request) => {
            if identity.role != Role::Driver && identity.role != Role::Admin {
                reject(state, session_id, "delivery_completed requires a driver session");
                return;
            }
            if identity.role == Role::Driver {
                if let Some(assigned) = state.hub.assigned_driver(&request.order_id) {
                    if assigned != identity.subject {
                        reject(state, session_id, "delivery_completed: not your delivery");
                        return;
                    }
                }
            }

            state.hub.delivery_completed(&request.order_id);

            match state.store.fetch_order(&request.order_id).await {
                Ok(Some(order)) if order.status.can_transition_to(OrderStatus::Delivered) => {
                    if let Err(err) = state
                        .store
                        .update_order_status(&request.order_id, OrderStatus::Delivered)
                        .await
                    {
                        warn!(order_id = %request.order_id, error = %err, "status update failed");
                    }
                }
                Ok(Some(order)) => {
                    warn!(
                        order_id = %request.order_id,
                        status = %order.status,
                        "delivered event for order not in delivery"
                    );
                }
                Ok(None) => {}
                Err(err) => warn!(error = %err, "order lookup failed"),
            }
        }

        ClientMessage::NewOrderOffer(offer) => {
            if identity.role != Role::Admin {
                reject(state, session_id, "new_order_offer requires an admin session");
                return;
            }

            let delivered = state
                .hub
                .send_to_driver(&offer.driver_id, Envelope::new("orden_pendiente", offer.order));
            if !delivered {
                info!(driver_id = %offer.driver_id, "order offer dropped: driver not connected");
            }
        }
    }
}

/// Driver ops must come from a driver session whose token subject matches
/// the declared driver id.
fn expect_driver(
    state: &Arc<AppState>,
    session_id: SessionId,
    identity: &Identity,
    driver_id: &str,
    op: &str,
) -> bool {
    if identity.role != Role::Driver {
        reject(state, session_id, &format!("{op} requires a driver session"));
        return false;
    }
    if identity.subject != driver_id {
        reject(
            state,
            session_id,
            &format!("{op}: driver id does not match connection identity"),
        );
        return false;
    }
    true
}

fn reject(state: &Arc<AppState>, session_id: SessionId, reason: &str) {
    warn!(session_id = %session_id, reason, "rejected client event");
    state
        .hub
        .notify(session_id, Envelope::new("error", json!({ "message": reason })));
}
