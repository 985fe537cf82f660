//! Fakes and fixtures shared by the orchestrator and route tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use callflow_agent::{PromptAudioCatalog, Retrying};
use callflow_core::config::{RateLimitScope, TelephonyProvider};
use callflow_core::directives::builder_for;
use callflow_core::errors::{CollaboratorError, Failure};
use callflow_core::{
    Notifier, Prompt, RetryPolicy, SlotExtractor, SlotMachine, SlotValues, SpeechSynthesizer,
    Transcriber, Transcript,
};
use callflow_db::{
    connect_with_settings, migrations, DbPool, SqlDeadLetterRepository, SqlRateLimiter,
    SqlSessionStore,
};

use crate::orchestrator::{CallOrchestrator, Collaborators, OrchestratorSettings, Stores};

pub(crate) const CALLER: &str = "+919876543210";
pub(crate) const CALLEE: &str = "+918000000001";

/// Consumes one scripted failure, if any are left.
fn take_failure(failures: &AtomicU32) -> bool {
    failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1)).is_ok()
}

struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Transcript>>,
    delay: Duration,
    failures: AtomicU32,
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _recording_url: &str) -> Result<Transcript, CollaboratorError> {
        tokio::time::sleep(self.delay).await;
        if take_failure(&self.failures) {
            return Err(CollaboratorError::Transcription(Failure::status(
                "transcription request",
                503,
            )));
        }
        let next = self.replies.lock().expect("transcripts").pop_front();
        Ok(next.unwrap_or(Transcript {
            text: String::new(),
            language: "en".to_string(),
            confidence: None,
        }))
    }
}

struct ScriptedExtractor {
    replies: Mutex<VecDeque<SlotValues>>,
    failures: AtomicU32,
}

#[async_trait]
impl SlotExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _text: &str,
        _missing_slot_ids: &[&str],
        _language: &str,
    ) -> Result<SlotValues, CollaboratorError> {
        if take_failure(&self.failures) {
            return Err(CollaboratorError::Extraction(Failure::malformed(
                "llm response was not valid JSON",
            )));
        }
        Ok(self.replies.lock().expect("extractions").pop_front().unwrap_or_default())
    }
}

/// The real clip catalog with one prompt's clip taken away.
struct GappyCatalog {
    catalog: PromptAudioCatalog,
    missing: Option<Prompt>,
}

#[async_trait]
impl SpeechSynthesizer for GappyCatalog {
    async fn synthesize(&self, text: &str, language: &str) -> Result<String, CollaboratorError> {
        if self.missing.is_some() && Prompt::from_text(text) == self.missing {
            return Err(CollaboratorError::Synthesis(Failure::rejected(format!(
                "clip removed for `{text}`"
            ))));
        }
        self.catalog.synthesize(text, language).await
    }
}

/// Reports every attempt on the channel, then waits `delay` and succeeds or fails.
struct ChannelNotifier {
    sent: mpsc::UnboundedSender<(String, String)>,
    delay: Duration,
    fails: bool,
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, summary: &str, destination: &str) -> Result<String, CollaboratorError> {
        self.sent.send((summary.to_string(), destination.to_string())).map_err(|error| {
            CollaboratorError::Notification(Failure::rejected(error.to_string()))
        })?;
        tokio::time::sleep(self.delay).await;
        if self.fails {
            return Err(CollaboratorError::Notification(Failure::status("sms request", 500)));
        }
        Ok("SM-test".to_string())
    }
}

pub(crate) struct Harness {
    pub orchestrator: Arc<CallOrchestrator>,
    pub pool: DbPool,
    pub sessions: Arc<SqlSessionStore>,
    pub dead_letters: Arc<SqlDeadLetterRepository>,
    pub notifications: mpsc::UnboundedReceiver<(String, String)>,
}

impl Harness {
    /// Rows in the rate limiter's hit log, across all callers.
    pub async fn rate_limit_hits(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM rate_limit_hit")
            .fetch_one(&self.pool)
            .await
            .expect("count rate limit hits")
    }
}

/// What the fakes will say, in order, plus the orchestrator settings to run with.
pub(crate) struct Script {
    pub transcripts: Vec<&'static str>,
    pub extractions: Vec<Vec<(&'static str, &'static str)>>,
    pub transcribe_delay: Duration,
    /// Leading transcription calls that fail with a 503.
    pub transcription_failures: u32,
    /// Leading extraction calls that fail with a malformed reply.
    pub extraction_failures: u32,
    /// Wraps the transcriber the way bootstrap does.
    pub transcribe_policy: Option<RetryPolicy>,
    pub notify_delay: Duration,
    pub notify_fails: bool,
    pub missing_clip: Option<Prompt>,
    pub max_interactions: u32,
    pub settings: OrchestratorSettings,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            transcripts: Vec::new(),
            extractions: Vec::new(),
            transcribe_delay: Duration::ZERO,
            transcription_failures: 0,
            extraction_failures: 0,
            transcribe_policy: None,
            notify_delay: Duration::ZERO,
            notify_fails: false,
            missing_clip: None,
            max_interactions: 50,
            settings: settings(),
        }
    }
}

fn settings() -> OrchestratorSettings {
    OrchestratorSettings {
        public_base_url: "https://calls.example.com".to_string(),
        record_max_seconds: 15,
        rate_limit_enabled: true,
        rate_limit: 5,
        rate_limit_window: Duration::from_secs(300),
        rate_limit_scope: RateLimitScope::PerCall,
        request_deadline: Duration::from_secs(5),
        notification_timeout: Duration::from_secs(1),
    }
}

pub(crate) async fn harness(script: Script) -> Harness {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");

    let sessions = Arc::new(SqlSessionStore::new(
        pool.clone(),
        Duration::from_secs(1800),
        script.max_interactions,
    ));
    let dead_letters = Arc::new(SqlDeadLetterRepository::new(pool.clone()));
    let (sent, notifications) = mpsc::unbounded_channel();

    let transcripts = script
        .transcripts
        .into_iter()
        .map(|text| Transcript {
            text: text.to_string(),
            language: "en".to_string(),
            confidence: Some(0.9),
        })
        .collect();
    let extractions = script
        .extractions
        .into_iter()
        .map(|pairs| pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
        .collect();

    let scripted = ScriptedTranscriber {
        replies: Mutex::new(transcripts),
        delay: script.transcribe_delay,
        failures: AtomicU32::new(script.transcription_failures),
    };
    let transcriber: Arc<dyn Transcriber> = match script.transcribe_policy {
        Some(policy) => Arc::new(Retrying::new(scripted, policy)),
        None => Arc::new(scripted),
    };

    let orchestrator = Arc::new(CallOrchestrator::new(
        Stores {
            sessions: sessions.clone(),
            rate_limiter: Arc::new(SqlRateLimiter::new(pool.clone())),
            dead_letters: dead_letters.clone(),
        },
        Collaborators {
            transcriber,
            extractor: Arc::new(ScriptedExtractor {
                replies: Mutex::new(extractions),
                failures: AtomicU32::new(script.extraction_failures),
            }),
            synthesizer: Arc::new(GappyCatalog {
                catalog: PromptAudioCatalog::new("https://audio.example.com", "welcome.wav"),
                missing: script.missing_clip,
            }),
            notifier: Arc::new(ChannelNotifier {
                sent,
                delay: script.notify_delay,
                fails: script.notify_fails,
            }),
        },
        builder_for(TelephonyProvider::Exotel),
        SlotMachine::new(3),
        script.settings,
    ));

    Harness { orchestrator, pool, sessions, dead_letters, notifications }
}
