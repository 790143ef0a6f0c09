/// Subscriber Layer
///
/// Worker registrations and the loops that serve them:
/// - Registration types and SQLite persistence
/// - Consecutive-failure health tracking
/// - Lifecycle manager with per-subscriber cancellation and a supervisor

pub mod types;

pub mod storage;

pub mod health;

// Delivery, health and reclaim loops plus the lifecycle supervisor
pub mod manager;

pub use health::{HealthTracker, HealthVerdict};
pub use manager::{LifecycleEvent, SubscriberManager};
pub use storage::SubscriberStorage;
pub use types::{SubscribeRequest, SubscriberRegistration};
