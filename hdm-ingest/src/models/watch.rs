//! Change-notification watch state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Channel registration returned by the change-feed provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchRegistration {
    pub channel_id: String,
    pub resource_id: String,
    pub expiration: DateTime<Utc>,
}

/// Active watch plus the resume token polls continue from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchState {
    pub channel_id: String,
    pub resource_id: String,
    pub expiration: DateTime<Utc>,
    pub resume_token: Option<String>,
}

impl WatchState {
    pub fn registration(&self) -> WatchRegistration {
        WatchRegistration {
            channel_id: self.channel_id.clone(),
            resource_id: self.resource_id.clone(),
            expiration: self.expiration,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration <= now
    }
}

/// Read-only snapshot served by the status endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    /// RFC 3339
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration: Option<String>,
    /// Negative once the channel has expired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in_seconds: Option<i64>,
}

impl WatchStatus {
    pub fn inactive() -> Self {
        Self {
            active: false,
            channel_id: None,
            resource_id: None,
            expiration: None,
            expires_in_seconds: None,
        }
    }

    pub fn from_registration(reg: &WatchRegistration, now: DateTime<Utc>) -> Self {
        Self {
            active: true,
            channel_id: Some(reg.channel_id.clone()),
            resource_id: Some(reg.resource_id.clone()),
            expiration: Some(reg.expiration.to_rfc3339()),
            expires_in_seconds: Some((reg.expiration - now).num_seconds()),
        }
    }
}
