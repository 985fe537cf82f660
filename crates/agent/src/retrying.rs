use async_trait::async_trait;
use tracing::debug;

use callflow_core::errors::CollaboratorError;
use callflow_core::{RetryPolicy, SlotExtractor, SlotValues, Transcriber, Transcript};

/// Wraps a collaborator so every call goes through a [`RetryPolicy`].
pub struct Retrying<T> {
    inner: T,
    policy: RetryPolicy,
}

impl<T> Retrying<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl<T: Transcriber> Transcriber for Retrying<T> {
    async fn transcribe(&self, recording_url: &str) -> Result<Transcript, CollaboratorError> {
        debug!(event_name = "transcription.started", "transcribing recording");
        self.policy.run("transcribe", || self.inner.transcribe(recording_url)).await
    }
}

#[async_trait]
impl<T: SlotExtractor> SlotExtractor for Retrying<T> {
    async fn extract(
        &self,
        text: &str,
        missing_slot_ids: &[&str],
        language: &str,
    ) -> Result<SlotValues, CollaboratorError> {
        self.policy
            .run("extract_slots", || self.inner.extract(text, missing_slot_ids, language))
            .await
    }
}
