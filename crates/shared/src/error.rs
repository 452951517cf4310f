use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What went wrong, from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeCode {
    ServerConnectionFailed,
    PeerConnectFailed,
    PeerDisconnectFailed,
    ServerDisconnectFailed,
    DeviceEnumerationFailed,
    DeviceSelectionFailed,
}

/// A single user-visible notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub code: NoticeCode,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Notice {
    pub fn new(code: NoticeCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            raised_at: Utc::now(),
        }
    }
}
