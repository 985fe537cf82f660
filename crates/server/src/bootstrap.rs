use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use callflow_agent::{
    DeepgramTranscriber, LlmSlotExtractor, LogOnlyNotifier, OpenAiCompatibleClient,
    PromptAudioCatalog, Retrying, TwilioSmsNotifier,
};
use callflow_core::config::{AppConfig, ConfigError, LoadOptions, TelephonyProvider};
use callflow_core::directives::builder_for;
use callflow_core::{Notifier, RetryPolicy, SlotMachine};
use callflow_db::{
    connect_with_retry, migrations, DbPool, ReconnectPolicy, SqlDeadLetterRepository,
    SqlRateLimiter, SqlSessionStore, Sweeper,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::health;
use crate::orchestrator::{CallOrchestrator, Collaborators, OrchestratorSettings, Stores};
use crate::webhooks::{self, WebhookState};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<CallOrchestrator>,
    pub sweeper: Sweeper,
}

impl Application {
    pub fn router(&self) -> Router {
        webhooks::router(WebhookState::new(
            self.orchestrator.clone(),
            provider_name(self.config.telephony.provider),
        ))
        .merge(health::router(self.db_pool.clone()))
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("missing collaborator credentials: `{0}` must be set")]
    MissingCredentials(&'static str),
}

pub fn provider_name(provider: TelephonyProvider) -> &'static str {
    match provider {
        TelephonyProvider::Twilio => "twilio",
        TelephonyProvider::Exotel => "exotel",
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        telephony_provider = provider_name(config.telephony.provider),
        "starting application bootstrap"
    );

    let transcriber = DeepgramTranscriber::from_config(&config.transcription)
        .ok_or(BootstrapError::MissingCredentials("transcription.api_key"))?;
    let transcriber = match (
        config.telephony.provider,
        config.notification.account_sid.clone(),
        config.notification.auth_token.clone(),
    ) {
        (TelephonyProvider::Twilio, Some(sid), Some(token)) => {
            transcriber.with_recording_auth(sid, token)
        }
        _ => transcriber,
    };

    let db_pool = connect_with_retry(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
        &ReconnectPolicy::with_max_retries(config.database.connect_retries),
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let sessions = Arc::new(SqlSessionStore::new(
        db_pool.clone(),
        Duration::from_secs(config.session.timeout_secs),
        config.session.max_interactions,
    ));
    let rate_limiter = Arc::new(SqlRateLimiter::new(db_pool.clone()));
    let dead_letters = Arc::new(SqlDeadLetterRepository::new(db_pool.clone()));

    let notifier: Arc<dyn Notifier> = match TwilioSmsNotifier::from_config(&config.notification)
    {
        Some(notifier) => Arc::new(notifier),
        None => {
            if config.notification.enabled {
                warn!(
                    event_name = "system.bootstrap.notifier_unconfigured",
                    correlation_id = "bootstrap",
                    "notifications enabled without account credentials, logging summaries only"
                );
            }
            Arc::new(LogOnlyNotifier)
        }
    };

    let collaborators = Collaborators {
        transcriber: Arc::new(Retrying::new(transcriber, transcription_policy(&config))),
        extractor: Arc::new(Retrying::new(
            LlmSlotExtractor::new(OpenAiCompatibleClient::from_config(&config.llm)),
            extraction_policy(&config),
        )),
        synthesizer: Arc::new(PromptAudioCatalog::from_config(&config.telephony)),
        notifier,
    };

    let orchestrator = Arc::new(CallOrchestrator::new(
        Stores {
            sessions: sessions.clone(),
            rate_limiter: rate_limiter.clone(),
            dead_letters,
        },
        collaborators,
        builder_for(config.telephony.provider),
        SlotMachine::new(config.session.max_empty_turns),
        OrchestratorSettings::from_config(&config),
    ));

    let sweeper = Sweeper::new(
        sessions,
        rate_limiter,
        Duration::from_secs(config.session.sweep_interval_secs),
    );

    Ok(Application { config, db_pool, orchestrator, sweeper })
}

/// Transcription may spend half of the webhook deadline, retries included.
pub(crate) fn transcription_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy::new(
        config.transcription.max_retries,
        Duration::from_secs(config.transcription.timeout_secs),
    )
    .with_budget(Duration::from_secs(config.server.request_deadline_secs) / 2)
}

/// Extraction runs after transcription and gets a third of the deadline.
pub(crate) fn extraction_policy(config: &AppConfig) -> RetryPolicy {
    RetryPolicy::new(config.llm.max_retries, Duration::from_secs(config.llm.timeout_secs))
        .with_budget(Duration::from_secs(config.server.request_deadline_secs) / 3)
}
