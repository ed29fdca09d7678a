pub mod health;
pub mod stock;

pub use health::{health_router, HealthHandlerState};
pub use stock::{stock_router, StockHandlerState};
