pub mod driver;
pub mod order;

pub use driver::{DriverLocation, GeoPoint};
pub use order::Order;
