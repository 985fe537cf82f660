//! Drives one phone interview across telephony webhooks.
//!
//! Each webhook is an independent event: the orchestrator re-reads the session
//! from the store, runs one step, persists it and answers with a vendor
//! directive. Nothing is cached between events.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use callflow_core::config::{AppConfig, RateLimitScope};
use callflow_core::directives::{is_secure_url, render_or_apology};
use callflow_core::domain::dead_letter::INVALID_RECORDING_URL;
use callflow_core::domain::session::is_valid_phone_number;
use callflow_core::errors::{
    ApplicationError, CollaboratorError, DirectiveError, DomainError, SessionError,
};
use callflow_core::prompts::{COULD_NOT_UNDERSTAND_MESSAGE, LIMIT_EXCEEDED_MESSAGE, RATE_LIMITED_MESSAGE};
use callflow_core::slots::normalize_language;
use callflow_core::{
    CallDirective, CallSession, CompletionOutcome, DeadLetterEntry, Notifier, Prompt,
    ResponseBuilder, SessionId, SlotExtractor, SlotMachine, SlotState, SpeechSynthesizer,
    Transcriber,
};
use callflow_db::{DeadLetterRepository, RateLimiter, RepositoryError, SessionStore};

const NOTIFICATION_SLOT: &str = "rent_or_buy";

/// Normalised view of one inbound webhook, whatever the vendor's field names.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallEvent {
    pub call_id: Option<String>,
    pub caller_id: String,
    pub callee_id: String,
    pub session_id: Option<SessionId>,
    pub recording_url: Option<String>,
    pub recording_status: Option<String>,
    pub recording_duration: Option<String>,
}

impl CallEvent {
    fn correlation_id(&self) -> &str {
        self.call_id
            .as_deref()
            .or(self.session_id.as_ref().map(SessionId::as_str))
            .unwrap_or("unknown")
    }
}

/// Rendered vendor response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallReply {
    pub content_type: &'static str,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("caller {caller_id} exceeded the call rate limit")]
    RateLimited { caller_id: String },
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("session store unavailable: {0}")]
    Store(String),
    #[error("invalid call event: {0}")]
    InvalidEvent(String),
    #[error("request deadline of {0}s exceeded")]
    DeadlineExceeded(u64),
}

impl From<RepositoryError> for CallError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Session(error) => Self::Session(error),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<CallError> for ApplicationError {
    fn from(error: CallError) -> Self {
        match error {
            CallError::Session(error) => Self::Domain(DomainError::Session(error)),
            CallError::RateLimited { .. } => Self::RateLimited,
            CallError::Collaborator(error) => Self::Integration(error),
            CallError::Directive(error) => Self::Domain(DomainError::Directive(error)),
            CallError::Store(message) => Self::Persistence(message),
            CallError::InvalidEvent(message) => {
                Self::Domain(DomainError::InvariantViolation(message))
            }
            CallError::DeadlineExceeded(secs) => Self::Integration(CollaboratorError::Timeout {
                operation: "webhook",
                timeout_secs: secs,
            }),
        }
    }
}

impl CallError {
    /// What the caller hears when this error ends the event.
    pub fn directive(&self) -> CallDirective {
        match self {
            Self::Session(SessionError::LimitExceeded { .. }) => {
                CallDirective::say_then_hangup(LIMIT_EXCEEDED_MESSAGE)
            }
            Self::RateLimited { .. } => CallDirective::say_then_hangup(RATE_LIMITED_MESSAGE),
            _ => CallDirective::apology(),
        }
    }
}

enum Step {
    Respond(CallDirective),
    Acknowledge,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    pub public_base_url: String,
    pub record_max_seconds: u32,
    pub rate_limit_enabled: bool,
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
    pub rate_limit_scope: RateLimitScope,
    pub request_deadline: Duration,
    pub notification_timeout: Duration,
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            public_base_url: config.server.public_base_url.trim_end_matches('/').to_string(),
            record_max_seconds: config.session.record_max_seconds,
            rate_limit_enabled: config.rate_limit.enabled,
            rate_limit: config.rate_limit.limit,
            rate_limit_window: Duration::from_secs(config.rate_limit.window_secs),
            rate_limit_scope: config.rate_limit.scope,
            request_deadline: Duration::from_secs(config.server.request_deadline_secs),
            notification_timeout: Duration::from_secs(config.notification.timeout_secs),
        }
    }
}

pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub dead_letters: Arc<dyn DeadLetterRepository>,
}

pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    pub extractor: Arc<dyn SlotExtractor>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct CallOrchestrator {
    stores: Stores,
    collaborators: Collaborators,
    builder: Arc<dyn ResponseBuilder>,
    machine: SlotMachine,
    settings: OrchestratorSettings,
}

impl CallOrchestrator {
    pub fn new(
        stores: Stores,
        collaborators: Collaborators,
        builder: Arc<dyn ResponseBuilder>,
        machine: SlotMachine,
        settings: OrchestratorSettings,
    ) -> Self {
        Self { stores, collaborators, builder, machine, settings }
    }

    pub fn dead_letters(&self) -> &Arc<dyn DeadLetterRepository> {
        &self.stores.dead_letters
    }

    pub async fn answer(&self, event: &CallEvent) -> CallReply {
        self.run("answer", event, self.handle_answer(event)).await
    }

    pub async fn process_recording(&self, event: &CallEvent) -> CallReply {
        self.run("process_recording", event, self.handle_recording(event)).await
    }

    pub async fn recording_status(&self, event: &CallEvent) -> CallReply {
        info!(
            event_name = "call.recording_status",
            correlation_id = event.correlation_id(),
            session_id = event.session_id.as_ref().map(SessionId::as_str).unwrap_or("unknown"),
            recording_status = event.recording_status.as_deref().unwrap_or("unknown"),
            recording_duration = event.recording_duration.as_deref().unwrap_or("unknown"),
            "recording status received"
        );
        self.reply(Step::Acknowledge)
    }

    async fn run<F>(&self, webhook: &'static str, event: &CallEvent, step: F) -> CallReply
    where
        F: Future<Output = Result<Step, CallError>>,
    {
        let started = Instant::now();
        let outcome = match tokio::time::timeout(self.settings.request_deadline, step).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CallError::DeadlineExceeded(self.settings.request_deadline.as_secs())),
        };

        let step = match outcome {
            Ok(step) => step,
            Err(error) => {
                let directive = error.directive();
                let interface = ApplicationError::from(error).into_interface(event.correlation_id());
                warn!(
                    event_name = "call.event_failed",
                    webhook,
                    correlation_id = interface.correlation_id(),
                    error = %interface,
                    "webhook ended with a fallback directive"
                );
                Step::Respond(directive)
            }
        };

        info!(
            event_name = "call.webhook_completed",
            webhook,
            correlation_id = event.correlation_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "webhook handled"
        );
        self.reply(step)
    }

    fn reply(&self, step: Step) -> CallReply {
        let body = match step {
            Step::Respond(directive) => render_or_apology(self.builder.as_ref(), &directive),
            Step::Acknowledge => self.builder.empty(),
        };
        CallReply { content_type: self.builder.content_type(), body }
    }

    async fn handle_answer(&self, event: &CallEvent) -> Result<Step, CallError> {
        let call_id = match (&event.call_id, &event.session_id) {
            (Some(call_id), _) => call_id.clone(),
            (None, Some(session_id)) => session_id.to_string(),
            (None, None) => return Err(CallError::InvalidEvent("missing call id".to_string())),
        };

        let session = match self.stores.sessions.load_by_call(&call_id).await? {
            Some(session) => {
                info!(
                    event_name = "call.answer_redelivered",
                    correlation_id = %call_id,
                    session_id = %session.session_id,
                    "reusing existing session"
                );
                self.enforce_interaction_limit(&session.caller_id).await?;
                session
            }
            None => self.open_session(&call_id, event).await?,
        };

        let audio_url = self.audio_for(Prompt::Welcome, &session.language).await?;
        Ok(Step::Respond(self.record_directive(&session.session_id, audio_url)))
    }

    async fn handle_recording(&self, event: &CallEvent) -> Result<Step, CallError> {
        let Some(session) = self.resolve_session(event).await? else {
            return Ok(Step::Acknowledge);
        };

        let recording_url = match event.recording_url.as_deref().map(str::trim) {
            Some(url) if is_secure_url(url) => url.to_string(),
            _ => {
                self.dead_letter(&session, INVALID_RECORDING_URL, event.recording_url.clone())
                    .await;
                return Ok(Step::Respond(CallDirective::apology()));
            }
        };

        let session = self.stores.sessions.increment_interaction(&session.session_id).await?;
        let session_id = session.session_id.clone();

        let (text, language) = match self.collaborators.transcriber.transcribe(&recording_url).await
        {
            Ok(transcript) if !transcript.is_blank() => {
                (transcript.text, normalize_language(&transcript.language).to_string())
            }
            Ok(_) => {
                info!(
                    event_name = "call.transcript_blank",
                    correlation_id = %session.call_id,
                    session_id = %session_id,
                    "caller said nothing recognisable"
                );
                (String::new(), session.language.clone())
            }
            Err(error) => {
                warn!(
                    event_name = "call.transcription_failed",
                    correlation_id = %session.call_id,
                    session_id = %session_id,
                    error = %error,
                    "transcription failed, treating turn as empty"
                );
                (String::new(), session.language.clone())
            }
        };

        let extracted = self
            .machine
            .extract(
                self.collaborators.extractor.as_ref(),
                &text,
                &session.slots_filled,
                &language,
            )
            .await;

        let machine = &self.machine;
        let turn_language = language.clone();
        let session = self
            .stores
            .sessions
            .update(&session_id, &|session: &mut CallSession| {
                session.language = turn_language.clone();
                machine.apply_turn(session, &extracted).map(|_| ())
            })
            .await?;

        match self.machine.state(&session) {
            SlotState::AwaitingInput(slot_id) => {
                info!(
                    event_name = "call.slot_requested",
                    correlation_id = %session.call_id,
                    session_id = %session_id,
                    slot_id,
                    filled = session.slots_filled.len(),
                    "asking for next slot"
                );
                let audio_url = self.audio_for(Prompt::Slot(slot_id), &language).await?;
                Ok(Step::Respond(self.record_directive(&session_id, audio_url)))
            }
            SlotState::Complete(outcome) => {
                info!(
                    event_name = "call.completed",
                    correlation_id = %session.call_id,
                    session_id = %session_id,
                    outcome = ?outcome,
                    filled = session.slots_filled.len(),
                    "interview finished"
                );
                let farewell = self.farewell(outcome, &session).await;
                self.stores.sessions.delete(&session_id).await?;
                self.dispatch_notification(&session);
                Ok(Step::Respond(farewell))
            }
        }
    }

    /// Closing directive for a finished interview. A missing confirmation clip
    /// falls back to speaking the confirmation text.
    async fn farewell(&self, outcome: CompletionOutcome, session: &CallSession) -> CallDirective {
        match outcome {
            CompletionOutcome::AllSlotsFilled => {
                let language = &session.language;
                match self.audio_for(Prompt::Confirmation, language).await {
                    Ok(audio_url) => CallDirective::PlayThenHangup { audio_url },
                    Err(error) => {
                        warn!(
                            event_name = "call.confirmation_audio_missing",
                            correlation_id = %session.call_id,
                            session_id = %session.session_id,
                            error = %error,
                            "speaking confirmation instead of playing it"
                        );
                        CallDirective::say_then_hangup(Prompt::Confirmation.text(language))
                    }
                }
            }
            CompletionOutcome::CouldNotUnderstand => {
                CallDirective::say_then_hangup(COULD_NOT_UNDERSTAND_MESSAGE)
            }
        }
    }

    /// `Ok(None)` means the event belongs to a finished or unknown session and
    /// only needs acknowledging.
    async fn resolve_session(&self, event: &CallEvent) -> Result<Option<CallSession>, CallError> {
        if let Some(session_id) = &event.session_id {
            let session = self.stores.sessions.load(session_id).await?;
            return match session {
                Some(session) if !session.end_of_conversation => {
                    self.enforce_interaction_limit(&session.caller_id).await?;
                    Ok(Some(session))
                }
                _ => {
                    info!(
                        event_name = "call.session_gone",
                        correlation_id = event.correlation_id(),
                        session_id = %session_id,
                        "session ended or missing, acknowledging"
                    );
                    Ok(None)
                }
            };
        }

        let Some(call_id) = event.call_id.as_deref() else {
            return Err(CallError::InvalidEvent("missing session id and call id".to_string()));
        };
        match self.stores.sessions.load_by_call(call_id).await? {
            Some(session) if session.end_of_conversation => Ok(None),
            Some(session) => {
                self.enforce_interaction_limit(&session.caller_id).await?;
                Ok(Some(session))
            }
            None => self.open_session(call_id, event).await.map(Some),
        }
    }

    async fn open_session(&self, call_id: &str, event: &CallEvent) -> Result<CallSession, CallError> {
        if !is_valid_phone_number(&event.caller_id) {
            warn!(
                event_name = "call.caller_id_unrecognised",
                correlation_id = call_id,
                caller_id = %event.caller_id,
                "caller id is not in E.164 form"
            );
        }

        // Only the delivery that wins the insert is charged against the limit.
        let session = CallSession::new(call_id, &event.caller_id, &event.callee_id, Utc::now());
        let created = match self.stores.sessions.create(&session).await {
            Ok(created) => created,
            Err(RepositoryError::Session(SessionError::AlreadyExists(_))) => {
                info!(
                    event_name = "call.answer_raced",
                    correlation_id = call_id,
                    "concurrent delivery created the session first"
                );
                return self
                    .stores
                    .sessions
                    .load_by_call(call_id)
                    .await?
                    .ok_or_else(|| CallError::Store(format!("session for {call_id} vanished")));
            }
            Err(error) => return Err(error.into()),
        };

        if let Err(error) = self.enforce_rate_limit(&event.caller_id).await {
            if let Err(delete_error) = self.stores.sessions.delete(&created.session_id).await {
                warn!(
                    event_name = "call.refused_session_left",
                    correlation_id = call_id,
                    session_id = %created.session_id,
                    error = %delete_error,
                    "could not remove session of refused call"
                );
            }
            return Err(error);
        }
        Ok(created)
    }

    async fn enforce_rate_limit(&self, caller_id: &str) -> Result<(), CallError> {
        if !self.settings.rate_limit_enabled || caller_id.is_empty() {
            return Ok(());
        }
        let allowed = self
            .stores
            .rate_limiter
            .allow(caller_id, self.settings.rate_limit, self.settings.rate_limit_window)
            .await?;
        if allowed {
            Ok(())
        } else {
            warn!(event_name = "call.rate_limited", caller_id, "caller exceeded call rate limit");
            Err(CallError::RateLimited { caller_id: caller_id.to_string() })
        }
    }

    async fn enforce_interaction_limit(&self, caller_id: &str) -> Result<(), CallError> {
        match self.settings.rate_limit_scope {
            RateLimitScope::PerInteraction => self.enforce_rate_limit(caller_id).await,
            RateLimitScope::PerCall => Ok(()),
        }
    }

    async fn audio_for(&self, prompt: Prompt, language: &str) -> Result<String, CallError> {
        Ok(self.collaborators.synthesizer.synthesize(prompt.text(language), language).await?)
    }

    fn record_directive(&self, session_id: &SessionId, audio_url: String) -> CallDirective {
        let base = &self.settings.public_base_url;
        CallDirective::PlayThenRecord {
            audio_url,
            callback_url: format!("{base}/process-recording?session_id={session_id}"),
            status_url: format!("{base}/recording-status?session_id={session_id}"),
            max_seconds: self.settings.record_max_seconds,
        }
    }

    async fn dead_letter(&self, session: &CallSession, reason: &str, recording_url: Option<String>) {
        let entry = DeadLetterEntry::for_session(session, reason, recording_url);
        if let Err(error) = self.stores.dead_letters.record(&entry).await {
            error!(
                event_name = "dead_letter.record_failed",
                correlation_id = %session.call_id,
                session_id = %session.session_id,
                error = %error,
                "failed to persist dead letter"
            );
        }
    }

    /// Fire-and-forget; a slow or failing notifier never delays the caller.
    fn dispatch_notification(&self, session: &CallSession) {
        let wants_follow_up = session
            .slots_filled
            .get(NOTIFICATION_SLOT)
            .is_some_and(|value| !value.trim().is_empty());
        if !wants_follow_up {
            info!(
                event_name = "notification.skipped",
                correlation_id = %session.call_id,
                "caller never said whether they rent or buy, no summary sent"
            );
            return;
        }

        let summary = format!(
            "Below is the Tenant requirements:\ntenant mobile number: {}\n{}",
            session.caller_id,
            self.machine.schema().lead_summary(&session.slots_filled)
        );
        let destination = session.callee_id.clone();
        let call_id = session.call_id.clone();
        let notifier = Arc::clone(&self.collaborators.notifier);
        let timeout = self.settings.notification_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, notifier.notify(&summary, &destination)).await {
                Ok(Ok(message_id)) => info!(
                    event_name = "notification.dispatched",
                    correlation_id = %call_id,
                    message_id = %message_id,
                    "lead summary dispatched"
                ),
                Ok(Err(error)) => warn!(
                    event_name = "notification.failed",
                    correlation_id = %call_id,
                    error = %error,
                    "lead summary notification failed"
                ),
                Err(_) => warn!(
                    event_name = "notification.timed_out",
                    correlation_id = %call_id,
                    timeout_secs = timeout.as_secs(),
                    "lead summary notification timed out"
                ),
            }
        });
    }
}
