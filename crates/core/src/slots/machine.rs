use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::collaborators::SlotExtractor;
use crate::domain::session::{CallSession, SlotValues};
use crate::errors::SessionError;
use crate::slots::schema::{is_filled, SlotSchema};

pub const DEFAULT_MAX_EMPTY_TURNS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionOutcome {
    AllSlotsFilled,
    CouldNotUnderstand,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    AwaitingInput(&'static str),
    Complete(CompletionOutcome),
}

impl SlotState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete(_))
    }
}

#[derive(Clone, Debug)]
pub struct SlotMachine {
    schema: SlotSchema,
    max_empty_turns: u32,
}

impl Default for SlotMachine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EMPTY_TURNS)
    }
}

impl SlotMachine {
    pub fn new(max_empty_turns: u32) -> Self {
        Self { schema: SlotSchema, max_empty_turns: max_empty_turns.max(1) }
    }

    pub fn schema(&self) -> &SlotSchema {
        &self.schema
    }

    pub fn next_missing_slot(&self, slots: &SlotValues) -> Option<&'static str> {
        self.schema.slots().iter().map(|slot| slot.id).find(|id| !is_filled(slots, id))
    }

    pub fn state(&self, session: &CallSession) -> SlotState {
        if session.retry_count >= self.max_empty_turns {
            return SlotState::Complete(CompletionOutcome::CouldNotUnderstand);
        }
        match self.next_missing_slot(&session.slots_filled) {
            Some(slot_id) => SlotState::AwaitingInput(slot_id),
            None => SlotState::Complete(CompletionOutcome::AllSlotsFilled),
        }
    }

    /// Keeps only schema keys with non-blank values.
    pub fn sanitize(&self, raw: SlotValues) -> SlotValues {
        raw.into_iter()
            .filter_map(|(key, value)| {
                let value = value.trim();
                if value.is_empty() {
                    return None;
                }
                if !self.schema.contains(&key) {
                    debug!(event_name = "slots.unknown_key_dropped", slot_id = %key);
                    return None;
                }
                Some((key, value.to_string()))
            })
            .collect()
    }

    /// Never fails: extractor errors collapse to an empty map.
    pub async fn extract(
        &self,
        extractor: &dyn SlotExtractor,
        text: &str,
        slots: &SlotValues,
        language: &str,
    ) -> SlotValues {
        if text.trim().is_empty() {
            return SlotValues::new();
        }
        let missing = self.schema.missing(slots);
        if missing.is_empty() {
            return SlotValues::new();
        }

        match extractor.extract(text, &missing, language).await {
            Ok(raw) => self.sanitize(raw),
            Err(error) => {
                warn!(
                    event_name = "slots.extraction_failed",
                    error = %error,
                    "slot extraction failed, treating turn as empty"
                );
                SlotValues::new()
            }
        }
    }

    /// Merges one turn into `session` and returns the resulting state.
    pub fn apply_turn(
        &self,
        session: &mut CallSession,
        extracted: &SlotValues,
    ) -> Result<SlotState, SessionError> {
        if session.end_of_conversation {
            return Err(SessionError::Ended(session.session_id.clone()));
        }

        let mut merged_any = false;
        for (key, value) in extracted {
            if !self.schema.contains(key) || value.trim().is_empty() {
                continue;
            }
            if session.slots_filled.get(key) != Some(value) {
                session.slots_filled.insert(key.clone(), value.clone());
                merged_any = true;
            }
        }

        if merged_any {
            session.retry_count = 0;
        } else {
            session.retry_count = session.retry_count.saturating_add(1);
        }

        let state = self.state(session);
        if state.is_terminal() {
            session.end_of_conversation = true;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::{CompletionOutcome, SlotMachine, SlotState};
    use crate::collaborators::SlotExtractor;
    use crate::domain::session::{CallSession, SlotValues};
    use crate::errors::{CollaboratorError, Failure, SessionError};

    struct FixedExtractor {
        result: Result<SlotValues, CollaboratorError>,
        requested: Mutex<Vec<String>>,
    }

    impl FixedExtractor {
        fn returning(pairs: &[(&str, &str)]) -> Self {
            Self { result: Ok(values(pairs)), requested: Mutex::new(Vec::new()) }
        }

        fn failing() -> Self {
            Self {
                result: Err(CollaboratorError::Extraction(Failure::status("llm request", 500))),
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SlotExtractor for FixedExtractor {
        async fn extract(
            &self,
            _text: &str,
            missing_slot_ids: &[&str],
            _language: &str,
        ) -> Result<SlotValues, CollaboratorError> {
            if let Ok(mut requested) = self.requested.lock() {
                requested.extend(missing_slot_ids.iter().map(|id| id.to_string()));
            }
            self.result.clone()
        }
    }

    fn values(pairs: &[(&str, &str)]) -> SlotValues {
        pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
    }

    fn session() -> CallSession {
        CallSession::new("CA200", "+919876543210", "+918000000001", Utc::now())
    }

    fn all_but_last() -> SlotValues {
        values(&[
            ("tenant_name", "Asha"),
            ("rent_or_buy", "rent"),
            ("location", "Kondapur"),
            ("bhk_type", "2BHK"),
            ("tenant_type", "family"),
            ("facing", "East facing"),
            ("floor_pref", "5th floor"),
            ("budget", "30000"),
            ("furnishing", "semi-furnished"),
            ("possession_date", "next month"),
        ])
    }

    #[test]
    fn next_missing_slot_is_deterministic() {
        let machine = SlotMachine::default();
        let slots = values(&[("tenant_name", "Asha"), ("location", "Kondapur")]);

        assert_eq!(machine.next_missing_slot(&slots), Some("rent_or_buy"));
        assert_eq!(machine.next_missing_slot(&slots), Some("rent_or_buy"));
        assert_eq!(machine.next_missing_slot(&SlotValues::new()), Some("tenant_name"));
    }

    #[test]
    fn blank_value_counts_as_missing() {
        let machine = SlotMachine::default();
        let slots = values(&[("tenant_name", " ")]);
        assert_eq!(machine.next_missing_slot(&slots), Some("tenant_name"));
    }

    #[tokio::test]
    async fn scenario_turn_advances_to_tenant_type() {
        let machine = SlotMachine::default();
        let extractor = FixedExtractor::returning(&[
            ("tenant_name", "Asha"),
            ("rent_or_buy", "rent"),
            ("bhk_type", "2BHK"),
            ("location", "Kondapur"),
        ]);
        let mut session = session();

        let extracted = machine
            .extract(
                &extractor,
                "I am Asha, looking to rent a 2BHK in Kondapur",
                &session.slots_filled,
                "en",
            )
            .await;
        let state = machine.apply_turn(&mut session, &extracted).expect("turn applies");

        assert_eq!(state, SlotState::AwaitingInput("tenant_type"));
        assert_eq!(session.retry_count, 0);
        assert!(!session.end_of_conversation);
    }

    #[tokio::test]
    async fn extraction_drops_unknown_keys_and_blank_values() {
        let machine = SlotMachine::default();
        let extractor = FixedExtractor::returning(&[
            ("tenant_name", "  Ravi "),
            ("favourite_colour", "blue"),
            ("budget", ""),
        ]);

        let extracted = machine.extract(&extractor, "Ravi", &SlotValues::new(), "en").await;

        assert_eq!(extracted, values(&[("tenant_name", "Ravi")]));
        let requested = extractor.requested.lock().expect("lock").clone();
        assert_eq!(requested.len(), 11);
    }

    #[tokio::test]
    async fn extractor_failure_fails_closed() {
        let machine = SlotMachine::default();
        let extracted =
            machine.extract(&FixedExtractor::failing(), "hello", &SlotValues::new(), "en").await;
        assert!(extracted.is_empty());
    }

    #[tokio::test]
    async fn blank_transcript_skips_extractor() {
        let machine = SlotMachine::default();
        let extractor = FixedExtractor::returning(&[("tenant_name", "Asha")]);

        let extracted = machine.extract(&extractor, "   ", &SlotValues::new(), "en").await;

        assert!(extracted.is_empty());
        assert!(extractor.requested.lock().expect("lock").is_empty());
    }

    #[test]
    fn empty_turns_end_call_after_cap() {
        let machine = SlotMachine::new(3);
        let mut session = session();

        assert_eq!(
            machine.apply_turn(&mut session, &SlotValues::new()),
            Ok(SlotState::AwaitingInput("tenant_name"))
        );
        assert_eq!(
            machine.apply_turn(&mut session, &SlotValues::new()),
            Ok(SlotState::AwaitingInput("tenant_name"))
        );
        assert_eq!(
            machine.apply_turn(&mut session, &SlotValues::new()),
            Ok(SlotState::Complete(CompletionOutcome::CouldNotUnderstand))
        );
        assert!(session.end_of_conversation);
    }

    #[test]
    fn progress_resets_retry_counter() {
        let machine = SlotMachine::new(3);
        let mut session = session();
        session.retry_count = 2;

        let state = machine
            .apply_turn(&mut session, &values(&[("tenant_name", "Asha")]))
            .expect("turn applies");

        assert_eq!(state, SlotState::AwaitingInput("rent_or_buy"));
        assert_eq!(session.retry_count, 0);
    }

    #[test]
    fn repeating_known_value_is_not_progress() {
        let machine = SlotMachine::new(3);
        let mut session = session();
        session.slots_filled = values(&[("tenant_name", "Asha")]);

        machine
            .apply_turn(&mut session, &values(&[("tenant_name", "Asha")]))
            .expect("turn applies");

        assert_eq!(session.retry_count, 1);
    }

    #[test]
    fn later_values_overwrite_earlier_ones() {
        let machine = SlotMachine::default();
        let mut session = session();
        session.slots_filled = values(&[("location", "Kondapur")]);

        machine
            .apply_turn(&mut session, &values(&[("location", "Gachibowli")]))
            .expect("turn applies");

        assert_eq!(session.slots_filled.get("location").map(String::as_str), Some("Gachibowli"));
    }

    #[test]
    fn filling_last_slot_completes_call() {
        let machine = SlotMachine::default();
        let mut session = session();
        session.slots_filled = all_but_last();

        let state = machine
            .apply_turn(&mut session, &values(&[("profession_details", "Software Engineer")]))
            .expect("turn applies");

        assert_eq!(state, SlotState::Complete(CompletionOutcome::AllSlotsFilled));
        assert!(session.end_of_conversation);
        assert_eq!(session.slots_filled.len(), 11);
    }

    #[test]
    fn ended_session_refuses_turns() {
        let machine = SlotMachine::default();
        let mut session = session();
        session.end_of_conversation = true;

        let result = machine.apply_turn(&mut session, &values(&[("tenant_name", "Asha")]));

        assert!(matches!(result, Err(SessionError::Ended(_))));
        assert!(session.slots_filled.is_empty());
    }
}
