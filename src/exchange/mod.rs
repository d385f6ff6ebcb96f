pub mod client;
pub mod rate_limit;
pub mod stream;

pub use client::ExchangeClient;
pub use rate_limit::RateLimitTracker;
