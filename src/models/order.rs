use serde::{Deserialize, Serialize};

use crate::lifecycle::OrderStatus;

/// Snapshot of an order as read from the external store. Identifiers are
/// opaque strings owned by that store; this crate never mints them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_number: String,
    pub status: OrderStatus,
    pub merchant_id: String,
    pub customer_id: String,
    pub driver_id: Option<String>,
}

impl Order {
    /// A driver may only be attached once the lifecycle has reached
    /// DRIVER_ASSIGNED.
    pub fn driver_attachment_valid(&self) -> bool {
        self.driver_id.is_none() || self.status.driver_may_be_assigned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(status: OrderStatus, driver_id: Option<&str>) -> Order {
        Order {
            id: "o1".to_string(),
            order_number: "N-o1".to_string(),
            status,
            merchant_id: "m1".to_string(),
            customer_id: "u1".to_string(),
            driver_id: driver_id.map(str::to_string),
        }
    }

    #[test]
    fn driver_attachment_requires_assignment_to_have_happened() {
        assert!(order(OrderStatus::Preparing, None).driver_attachment_valid());
        assert!(!order(OrderStatus::Preparing, Some("d1")).driver_attachment_valid());
        assert!(order(OrderStatus::PickedUp, Some("d1")).driver_attachment_valid());
    }
}
