//! Narrow seams to the outside services a call depends on.
//!
//! The orchestrator only ever talks to these traits; concrete HTTP clients
//! live in `callflow-agent` and tests plug in fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::session::SlotValues;
use crate::errors::CollaboratorError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub language: String,
    pub confidence: Option<f32>,
}

impl Transcript {
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[async_trait]
pub trait SlotExtractor: Send + Sync {
    /// Pull values for `missing_slot_ids` out of one utterance. Implementations
    /// may return keys outside the requested set; callers filter them.
    async fn extract(
        &self,
        text: &str,
        missing_slot_ids: &[&str],
        language: &str,
    ) -> Result<SlotValues, CollaboratorError>;
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, recording_url: &str) -> Result<Transcript, CollaboratorError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `summary` on behalf of `destination` (the number the caller dialled).
    /// Returns the provider message id.
    async fn notify(&self, summary: &str, destination: &str) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns a playable URL for `text`.
    async fn synthesize(&self, text: &str, language: &str) -> Result<String, CollaboratorError>;
}
