use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use crate::geo::{self, GeoError};
use crate::lifecycle::OrderStatus;
use crate::models::{DriverLocation, GeoPoint, Order};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("order {0} not found")]
    OrderNotFound(String),

    #[error("illegal transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error(transparent)]
    InvalidCoordinates(#[from] GeoError),

    #[error("storage backend: {0}")]
    Backend(String),
}

/// The narrow read/write contract this core holds against the (external)
/// persistent store. Everything else about orders, products and users lives
/// behind the excluded order-management API.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn fetch_order(&self, order_id: &str) -> Result<Option<Order>, StoreError>;

    /// Applies a status transition. Transitions outside the lifecycle's
    /// legal set (including any write to a terminal order) are rejected.
    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<Order, StoreError>;

    /// Writes a driver position. Returns whether the write was applied;
    /// movement below the configured threshold is suppressed and reported
    /// as `false`.
    async fn update_driver_location(
        &self,
        driver_id: &str,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}

/// Process-local stand-in for the external store, used by the server wiring
/// and the tests.
pub struct InMemoryStore {
    orders: DashMap<String, Order>,
    locations: DashMap<String, DriverLocation>,
    movement_threshold_m: f64,
}

impl InMemoryStore {
    pub fn new(movement_threshold_m: f64) -> Self {
        Self {
            orders: DashMap::new(),
            locations: DashMap::new(),
            movement_threshold_m,
        }
    }

    pub fn seed_order(&self, order: Order) {
        self.orders.insert(order.id.clone(), order);
    }

    pub fn location(&self, driver_id: &str) -> Option<DriverLocation> {
        self.locations
            .get(driver_id)
            .map(|entry| entry.value().clone())
    }
}

#[async_trait]
impl DeliveryStore for InMemoryStore {
    async fn fetch_order(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        Ok(self.orders.get(order_id).map(|entry| entry.value().clone()))
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<Order, StoreError> {
        let mut order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::OrderNotFound(order_id.to_string()))?;

        if !order.status.can_transition_to(status) {
            return Err(StoreError::IllegalTransition {
                from: order.status,
                to: status,
            });
        }

        order.status = status;
        Ok(order.clone())
    }

    async fn update_driver_location(
        &self,
        driver_id: &str,
        position: GeoPoint,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        geo::validate(&position)?;

        match self.locations.entry(driver_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                let moved = geo::haversine_m(&current.position, &position)?;
                if moved < self.movement_threshold_m {
                    return Ok(false);
                }

                // updated_at is monotonically non-decreasing per driver
                let at = at.max(current.updated_at);
                let available = current.available;
                entry.insert(DriverLocation {
                    driver_id: driver_id.to_string(),
                    position,
                    updated_at: at,
                    available,
                });
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(DriverLocation {
                    driver_id: driver_id.to_string(),
                    position,
                    updated_at: at,
                    available: true,
                });
                Ok(true)
            }
        }
    }
}
