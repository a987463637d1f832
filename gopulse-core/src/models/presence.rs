use serde::Serialize;
use serde_json::Value;

use crate::utils::coerce::{clamp_count, count_field};

/// Site-wide concurrent user counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PresenceSnapshot {
    pub online: u64,
    pub max_online: u64,
}

impl PresenceSnapshot {
    /// Builds a valid snapshot from raw counts: absent or negative values
    /// become zero and `max_online` is raised to at least `online`.
    pub fn coerce(online: Option<i64>, max_online: Option<i64>) -> Self {
        let online = clamp_count(online);
        let max_online = clamp_count(max_online).max(online);
        Self { online, max_online }
    }
}

/// Raw result of one `GET /user/heartbeat` call, before coercion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartbeatSnapshot {
    pub online: Option<i64>,
    pub max_online: Option<i64>,
    pub unread_count: Option<i64>,
}

impl HeartbeatSnapshot {
    pub fn from_value(data: &Value) -> Self {
        Self {
            online: count_field(data, "online"),
            max_online: count_field(data, "maxonline"),
            unread_count: count_field(data, "msgnum"),
        }
    }
}
