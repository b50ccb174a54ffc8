use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which side of a delivery the driver should currently be routed toward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteSide {
    Merchant,
    Customer,
}

/// Order lifecycle states. `ON_THE_WAY` is accepted as a legacy alias of
/// `IN_DELIVERY` on the way in; it is always written back as `IN_DELIVERY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Preparing,
    Ready,
    DriverAssigned,
    PickedUp,
    #[serde(alias = "ON_THE_WAY")]
    InDelivery,
    Delivered,
    Completed,
    Cancelled,
}

use OrderStatus::*;

impl OrderStatus {
    /// Legal next statuses. Empty for terminal states.
    pub fn next_statuses(&self) -> &'static [OrderStatus] {
        match self {
            Pending => &[Confirmed, Cancelled],
            Confirmed => &[Preparing, Cancelled],
            Preparing => &[Ready, Cancelled],
            Ready => &[DriverAssigned, Cancelled],
            DriverAssigned => &[PickedUp, Cancelled],
            PickedUp => &[InDelivery],
            InDelivery => &[Delivered],
            Delivered | Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        self.next_statuses().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.next_statuses().is_empty()
    }

    /// Statuses that trigger a customer-facing push. Everything else still
    /// persists and may be relayed to merchant/admin rooms.
    pub fn is_customer_notifiable(&self) -> bool {
        matches!(self, Preparing | DriverAssigned | PickedUp | InDelivery | Delivered)
    }

    pub fn route_destination(&self) -> Option<RouteSide> {
        match self {
            Confirmed | Preparing | Ready | DriverAssigned => Some(RouteSide::Merchant),
            PickedUp | InDelivery | Delivered => Some(RouteSide::Customer),
            Pending | Completed | Cancelled => None,
        }
    }

    /// Whether a non-null driver assignment is consistent with this status.
    pub fn driver_may_be_assigned(&self) -> bool {
        matches!(
            self,
            DriverAssigned | PickedUp | InDelivery | Delivered | Completed | Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Pending => "PENDING",
            Confirmed => "CONFIRMED",
            Preparing => "PREPARING",
            Ready => "READY",
            DriverAssigned => "DRIVER_ASSIGNED",
            PickedUp => "PICKED_UP",
            InDelivery => "IN_DELIVERY",
            Delivered => "DELIVERED",
            Completed => "COMPLETED",
            Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Pending),
            "CONFIRMED" => Ok(Confirmed),
            "PREPARING" => Ok(Preparing),
            "READY" => Ok(Ready),
            "DRIVER_ASSIGNED" => Ok(DriverAssigned),
            "PICKED_UP" => Ok(PickedUp),
            "IN_DELIVERY" | "ON_THE_WAY" => Ok(InDelivery),
            "DELIVERED" => Ok(Delivered),
            "COMPLETED" => Ok(Completed),
            "CANCELLED" => Ok(Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Advisory lookup for callers holding raw status strings: an unknown status
/// has no legal transitions rather than being an error. Callers that need
/// strict validation parse with `OrderStatus::from_str` first.
pub fn transitions_for(status: &str) -> &'static [OrderStatus] {
    status
        .parse::<OrderStatus>()
        .map(|s| s.next_statuses())
        .unwrap_or(&[])
}

/// Advisory: unknown statuses are not notifiable.
pub fn is_notifiable(status: &str) -> bool {
    status
        .parse::<OrderStatus>()
        .map(|s| s.is_customer_notifiable())
        .unwrap_or(false)
}

/// Advisory: unknown statuses route nowhere.
pub fn route_for(status: &str) -> Option<RouteSide> {
    status.parse::<OrderStatus>().ok()?.route_destination()
}
