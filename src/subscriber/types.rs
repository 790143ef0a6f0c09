use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker's request to receive jobs for one task of one process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub process_id: String,
    pub task: String,
    pub health_check_url: String,
    pub callback_url: String,
    /// Registration lifetime; the configured default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
}

/// A persisted subscription, keyed by its session key
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriberRegistration {
    pub session_key: String,
    pub process_id: String,
    pub task: String,
    pub health_check_url: String,
    pub callback_url: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SubscriberRegistration {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
