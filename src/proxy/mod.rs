pub mod fetch;
pub mod handlers;
pub mod mappers;
pub mod pool;
pub mod shaper;
pub mod telemetry;

pub use fetch::ThrottledFetcher;
pub use handlers::ProxyEngine;
pub use pool::AccountPool;
pub use shaper::TrafficShaper;
pub use telemetry::{ActivityTracker, TelemetryHandle, TelemetryLoop};

#[cfg(test)]
pub mod tests;
