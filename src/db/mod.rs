pub mod fills;
pub mod income;
pub mod liquidations;
pub mod models;
pub mod orders;
pub mod pool;
pub mod positions;
pub mod sessions;
pub mod strategy;
pub mod trade_errors;

pub use models::*;
pub use pool::DbPool;
