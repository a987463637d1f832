use serde_json::Value;

use crate::utils::coerce::count_field;

/// Literal payload sent on the channel to keep intermediaries from idling it out.
pub const KEEPALIVE_PAYLOAD: &str = "ping";

const TYPE_NOTIFICATION: i64 = 0;
const TYPE_PRESENCE: i64 = 1;

/// One decoded server push. Counts are carried raw; the counters coerce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundFrame {
    /// `{"type":0,"body":{"msgnum":N}}`
    Notification { unread_count: Option<i64> },
    /// `{"type":1,"body":{"online":N,"maxonline":M}}`
    Presence {
        online: Option<i64>,
        max_online: Option<i64>,
    },
    Unknown,
}

impl InboundFrame {
    /// Never fails: anything that is not a JSON object with a known integer
    /// `type` and an object `body` decodes to [`InboundFrame::Unknown`].
    pub fn decode(text: &str) -> Self {
        let Ok(raw) = serde_json::from_str::<Value>(text) else {
            return Self::Unknown;
        };
        let Some(body) = raw.get("body").filter(|body| body.is_object()) else {
            return Self::Unknown;
        };

        match raw.get("type").and_then(Value::as_i64) {
            Some(TYPE_NOTIFICATION) => Self::Notification {
                unread_count: count_field(body, "msgnum"),
            },
            Some(TYPE_PRESENCE) => Self::Presence {
                online: count_field(body, "online"),
                max_online: count_field(body, "maxonline"),
            },
            _ => Self::Unknown,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }
}
