use async_trait::async_trait;

use callflow_core::config::TelephonyConfig;
use callflow_core::errors::{CollaboratorError, Failure};
use callflow_core::slots::normalize_language;
use callflow_core::{Prompt, SpeechSynthesizer};

use crate::http::join_url;

/// Serves every prompt from pre-recorded clips under one base URL:
/// `{base}/{slot}_{lang}.wav`, `{base}/confirmation_{lang}.wav` and the
/// configured welcome clip.
#[derive(Clone, Debug)]
pub struct PromptAudioCatalog {
    base_url: String,
    welcome_audio: String,
}

impl PromptAudioCatalog {
    pub fn new(base_url: impl Into<String>, welcome_audio: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), welcome_audio: welcome_audio.into() }
    }

    pub fn from_config(config: &TelephonyConfig) -> Self {
        Self::new(config.audio_base_url.clone(), config.welcome_audio.clone())
    }

    pub fn url_for(&self, prompt: Prompt, language: &str) -> String {
        let language = normalize_language(language);
        let file = match prompt {
            Prompt::Welcome => self.welcome_audio.clone(),
            Prompt::Slot(slot_id) => format!("{slot_id}_{language}.wav"),
            Prompt::Confirmation => format!("confirmation_{language}.wav"),
        };
        join_url(&self.base_url, &file)
    }
}

#[async_trait]
impl SpeechSynthesizer for PromptAudioCatalog {
    async fn synthesize(&self, text: &str, language: &str) -> Result<String, CollaboratorError> {
        Prompt::from_text(text).map(|prompt| self.url_for(prompt, language)).ok_or_else(|| {
            CollaboratorError::Synthesis(Failure::rejected(format!(
                "no pre-recorded clip for prompt `{text}`"
            )))
        })
    }
}
