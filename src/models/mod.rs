pub mod account;
pub mod config;

pub use account::{
    Account, AccountRegistry, AccountSource, AccountStatus, ClientMetadata, Fingerprint,
    FingerprintChange, FingerprintRecord, ModelQuota, Subscription, SubscriptionTier,
};
pub use config::{AppConfig, FetchConfig, ShaperConfig, TelemetryConfig};
