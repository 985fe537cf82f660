use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Slot id to collected value. Ordered so summaries and JSON payloads are stable.
pub type SlotValues = BTreeMap<String, String>;

pub const DEFAULT_LANGUAGE: &str = "en";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Conversational state of one phone call.
///
/// `version` is owned by the store and bumped on every committed write; it is
/// not part of the serialized payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallSession {
    pub session_id: SessionId,
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub language: String,
    #[serde(default)]
    pub slots_filled: SlotValues,
    #[serde(default)]
    pub interaction_count: u32,
    pub call_start_time: DateTime<Utc>,
    pub last_interaction_time: DateTime<Utc>,
    #[serde(default)]
    pub end_of_conversation: bool,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(skip)]
    pub version: i64,
}

impl PartialEq for CallSession {
    fn eq(&self, other: &Self) -> bool {
        self.session_id == other.session_id
            && self.call_id == other.call_id
            && self.caller_id == other.caller_id
            && self.callee_id == other.callee_id
            && self.language == other.language
            && self.slots_filled == other.slots_filled
            && self.interaction_count == other.interaction_count
            && self.call_start_time == other.call_start_time
            && self.last_interaction_time == other.last_interaction_time
            && self.end_of_conversation == other.end_of_conversation
            && self.retry_count == other.retry_count
    }
}

impl Eq for CallSession {}

impl CallSession {
    pub fn new(
        call_id: impl Into<String>,
        caller_id: impl Into<String>,
        callee_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: SessionId::generate(),
            call_id: call_id.into(),
            caller_id: caller_id.into(),
            callee_id: callee_id.into(),
            language: DEFAULT_LANGUAGE.to_string(),
            slots_filled: SlotValues::new(),
            interaction_count: 0,
            call_start_time: now,
            last_interaction_time: now,
            end_of_conversation: false,
            retry_count: 0,
            version: 0,
        }
    }

    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_interaction_time > timeout
    }

    pub fn exceeds_interactions(&self, max_interactions: u32) -> bool {
        self.interaction_count > max_interactions
    }
}

/// `+` followed by 8 to 15 digits. Empty strings are accepted since vendors
/// omit the numbers on some callbacks.
pub fn is_valid_phone_number(value: &str) -> bool {
    if value.is_empty() {
        return true;
    }
    let Some(digits) = value.strip_prefix('+') else {
        return false;
    };
    (8..=15).contains(&digits.len()) && digits.chars().all(|ch| ch.is_ascii_digit())
}
