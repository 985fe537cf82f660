use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{info, warn};

use callflow_core::config::TranscriptionConfig;
use callflow_core::errors::{CollaboratorError, Failure};
use callflow_core::slots::normalize_language;
use callflow_core::{Transcriber, Transcript};

use crate::http::{build_client, status_failure, transport_failure};

/// Telephony providers publish the recording URL slightly before the file is
/// served, so a 404 on the first fetches is expected.
const RECORDING_FETCH_ATTEMPTS: u32 = 3;
const RECORDING_FETCH_DELAY: Duration = Duration::from_millis(1_000);

const KEYWORDS: [&str; 5] =
    ["east facing:3", "facing:4", "software engineer:4", "Kondapur:3", "bachelors:4"];

/// Prerecorded speech-to-text against a Deepgram-compatible `/listen` endpoint.
pub struct DeepgramTranscriber {
    client: Client,
    endpoint: String,
    model: String,
    api_key: SecretString,
    recording_auth: Option<(String, SecretString)>,
}

impl DeepgramTranscriber {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
            recording_auth: None,
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self::new(
            config.base_url.clone(),
            config.model.clone(),
            api_key,
            Duration::from_secs(config.timeout_secs),
        ))
    }

    /// Basic-auth credentials for recording URLs that require them.
    pub fn with_recording_auth(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.recording_auth = Some((username.into(), password));
        self
    }

    async fn fetch_recording(&self, recording_url: &str) -> Result<Vec<u8>, CollaboratorError> {
        let mut attempt = 1;
        loop {
            let mut request = self.client.get(recording_url);
            if let Some((username, password)) = &self.recording_auth {
                request = request.basic_auth(username, Some(password.expose_secret()));
            }

            let response = request.send().await.map_err(|error| {
                CollaboratorError::Transcription(transport_failure("recording download", &error))
            })?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND && attempt < RECORDING_FETCH_ATTEMPTS {
                warn!(
                    event_name = "transcription.recording_not_ready",
                    attempt,
                    "recording not available yet, retrying"
                );
                attempt += 1;
                tokio::time::sleep(RECORDING_FETCH_DELAY).await;
                continue;
            }
            if !status.is_success() {
                return Err(CollaboratorError::Transcription(status_failure(
                    "recording download",
                    status,
                )));
            }

            let bytes = response.bytes().await.map_err(|error| {
                CollaboratorError::Transcription(transport_failure("recording download", &error))
            })?;
            return Ok(bytes.to_vec());
        }
    }
}

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    #[serde(default)]
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    #[serde(default)]
    detected_language: Option<String>,
    #[serde(default)]
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    #[serde(default)]
    transcript: String,
    #[serde(default)]
    confidence: Option<f32>,
}

/// First channel, first alternative. A response without one is an empty
/// transcript rather than an error.
pub(crate) fn transcript_from_body(body: &str) -> Result<Transcript, CollaboratorError> {
    let parsed: ListenResponse = serde_json::from_str(body).map_err(|error| {
        CollaboratorError::Transcription(Failure::malformed(format!(
            "transcription response was malformed: {error}"
        )))
    })?;

    let Some(channel) = parsed.results.channels.into_iter().next() else {
        return Ok(Transcript { text: String::new(), language: "en".to_string(), confidence: None });
    };
    let language = normalize_language(channel.detected_language.as_deref().unwrap_or("en"));
    let alternative = channel.alternatives.into_iter().next();

    Ok(Transcript {
        text: alternative.as_ref().map(|alt| alt.transcript.trim().to_string()).unwrap_or_default(),
        language: language.to_string(),
        confidence: alternative.and_then(|alt| alt.confidence),
    })
}

#[async_trait]
impl Transcriber for DeepgramTranscriber {
    async fn transcribe(&self, recording_url: &str) -> Result<Transcript, CollaboratorError> {
        let audio = self.fetch_recording(recording_url).await?;

        let mut query = vec![
            ("model", self.model.as_str()),
            ("smart_format", "true"),
            ("punctuate", "true"),
            ("detect_language", "true"),
            ("numerals", "true"),
        ];
        query.extend(KEYWORDS.iter().map(|keyword| ("keywords", *keyword)));

        let response = self
            .client
            .post(&self.endpoint)
            .query(&query)
            .header("Authorization", format!("Token {}", self.api_key.expose_secret()))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(|error| {
                CollaboratorError::Transcription(transport_failure("transcription request", &error))
            })?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Transcription(status_failure(
                "transcription request",
                response.status(),
            )));
        }

        let body = response.text().await.map_err(|error| {
            CollaboratorError::Transcription(transport_failure("transcription response", &error))
        })?;
        let transcript = transcript_from_body(&body)?;
        info!(
            event_name = "transcription.completed",
            language = %transcript.language,
            chars = transcript.text.len(),
            "recording transcribed"
        );
        Ok(transcript)
    }
}
