use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::session::{CallSession, SlotValues};

pub const INVALID_RECORDING_URL: &str = "Invalid or missing recording URL";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeadLetterId(pub String);

/// A recording event that could not be processed. Appended once, never updated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: DeadLetterId,
    pub call_id: String,
    pub caller_id: String,
    pub callee_id: String,
    pub slots_filled: SlotValues,
    pub recorded_at: DateTime<Utc>,
    pub error: String,
    pub recording_url: Option<String>,
}

impl DeadLetterEntry {
    pub fn new(
        call_id: impl Into<String>,
        caller_id: impl Into<String>,
        callee_id: impl Into<String>,
        slots_filled: SlotValues,
        error: impl Into<String>,
        recording_url: Option<String>,
    ) -> Self {
        Self {
            id: DeadLetterId(Uuid::new_v4().to_string()),
            call_id: call_id.into(),
            caller_id: caller_id.into(),
            callee_id: callee_id.into(),
            slots_filled,
            recorded_at: Utc::now(),
            error: error.into(),
            recording_url,
        }
    }

    pub fn for_session(
        session: &CallSession,
        error: impl Into<String>,
        recording_url: Option<String>,
    ) -> Self {
        Self::new(
            session.call_id.clone(),
            session.caller_id.clone(),
            session.callee_id.clone(),
            session.slots_filled.clone(),
            error,
            recording_url,
        )
    }
}
