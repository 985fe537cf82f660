use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub telephony: TelephonyConfig,
    pub llm: LlmConfig,
    pub transcription: TranscriptionConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
    pub connect_retries: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Externally reachable `https://` origin used to build vendor callback URLs.
    pub public_base_url: String,
    pub graceful_shutdown_secs: u64,
    pub request_deadline_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub timeout_secs: u64,
    pub max_interactions: u32,
    pub max_empty_turns: u32,
    pub record_max_seconds: u32,
    pub sweep_interval_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub limit: u32,
    pub window_secs: u64,
    pub scope: RateLimitScope,
}

#[derive(Clone, Debug)]
pub struct TelephonyConfig {
    pub provider: TelephonyProvider,
    pub audio_base_url: String,
    pub welcome_audio: String,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct TranscriptionConfig {
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub account_sid: Option<String>,
    pub auth_token: Option<SecretString>,
    pub api_base_url: String,
    pub number_map_path: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TelephonyProvider {
    Twilio,
    Exotel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    PerCall,
    PerInteraction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Ollama,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub public_base_url: Option<String>,
    pub telephony_provider: Option<TelephonyProvider>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub notification_enabled: Option<bool>,
    pub transcription_api_key: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://callflow.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
                connect_retries: 5,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                public_base_url: "https://localhost:8080".to_string(),
                graceful_shutdown_secs: 15,
                request_deadline_secs: 30,
            },
            session: SessionConfig {
                timeout_secs: 1800,
                max_interactions: 50,
                max_empty_turns: 3,
                record_max_seconds: 15,
                sweep_interval_secs: 60,
            },
            rate_limit: RateLimitConfig {
                enabled: true,
                limit: 5,
                window_secs: 300,
                scope: RateLimitScope::PerCall,
            },
            telephony: TelephonyConfig {
                provider: TelephonyProvider::Twilio,
                audio_base_url: "https://storage.googleapis.com/callflow-audio".to_string(),
                welcome_audio: "WelcomeRealestateInbound.wav".to_string(),
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434/v1".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 10,
                max_retries: 3,
            },
            transcription: TranscriptionConfig {
                api_key: None,
                base_url: "https://api.deepgram.com/v1/listen".to_string(),
                model: "nova-2-phonecall".to_string(),
                timeout_secs: 13,
                max_retries: 3,
            },
            notification: NotificationConfig {
                enabled: false,
                account_sid: None,
                auth_token: None,
                api_base_url: "https://api.twilio.com/2010-04-01".to_string(),
                number_map_path: PathBuf::from("number_map.json"),
                timeout_secs: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for TelephonyProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "twilio" | "plivo" => Ok(Self::Twilio),
            "exotel" => Ok(Self::Exotel),
            other => Err(ConfigError::Validation(format!(
                "unsupported telephony provider `{other}` (expected twilio|exotel)"
            ))),
        }
    }
}

impl std::str::FromStr for RateLimitScope {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "per_call" => Ok(Self::PerCall),
            "per_interaction" => Ok(Self::PerInteraction),
            other => Err(ConfigError::Validation(format!(
                "unsupported rate limit scope `{other}` (expected per_call|per_interaction)"
            ))),
        }
    }
}

impl LlmProvider {
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Ollama => "http://localhost:11434/v1",
        }
    }
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("callflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.server.bind_address, self.server.port)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
            if let Some(connect_retries) = database.connect_retries {
                self.database.connect_retries = connect_retries;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(public_base_url) = server.public_base_url {
                self.server.public_base_url = public_base_url;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(request_deadline_secs) = server.request_deadline_secs {
                self.server.request_deadline_secs = request_deadline_secs;
            }
        }

        if let Some(session) = patch.session {
            if let Some(timeout_secs) = session.timeout_secs {
                self.session.timeout_secs = timeout_secs;
            }
            if let Some(max_interactions) = session.max_interactions {
                self.session.max_interactions = max_interactions;
            }
            if let Some(max_empty_turns) = session.max_empty_turns {
                self.session.max_empty_turns = max_empty_turns;
            }
            if let Some(record_max_seconds) = session.record_max_seconds {
                self.session.record_max_seconds = record_max_seconds;
            }
            if let Some(sweep_interval_secs) = session.sweep_interval_secs {
                self.session.sweep_interval_secs = sweep_interval_secs;
            }
        }

        if let Some(rate_limit) = patch.rate_limit {
            if let Some(enabled) = rate_limit.enabled {
                self.rate_limit.enabled = enabled;
            }
            if let Some(limit) = rate_limit.limit {
                self.rate_limit.limit = limit;
            }
            if let Some(window_secs) = rate_limit.window_secs {
                self.rate_limit.window_secs = window_secs;
            }
            if let Some(scope) = rate_limit.scope {
                self.rate_limit.scope = scope;
            }
        }

        if let Some(telephony) = patch.telephony {
            if let Some(provider) = telephony.provider {
                self.telephony.provider = provider;
            }
            if let Some(audio_base_url) = telephony.audio_base_url {
                self.telephony.audio_base_url = audio_base_url;
            }
            if let Some(welcome_audio) = telephony.welcome_audio {
                self.telephony.welcome_audio = welcome_audio;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
        }

        if let Some(transcription) = patch.transcription {
            if let Some(api_key_value) = transcription.api_key {
                self.transcription.api_key = Some(secret_value(api_key_value));
            }
            if let Some(base_url) = transcription.base_url {
                self.transcription.base_url = base_url;
            }
            if let Some(model) = transcription.model {
                self.transcription.model = model;
            }
            if let Some(timeout_secs) = transcription.timeout_secs {
                self.transcription.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = transcription.max_retries {
                self.transcription.max_retries = max_retries;
            }
        }

        if let Some(notification) = patch.notification {
            if let Some(enabled) = notification.enabled {
                self.notification.enabled = enabled;
            }
            if let Some(account_sid) = notification.account_sid {
                self.notification.account_sid = Some(account_sid);
            }
            if let Some(auth_token_value) = notification.auth_token {
                self.notification.auth_token = Some(secret_value(auth_token_value));
            }
            if let Some(api_base_url) = notification.api_base_url {
                self.notification.api_base_url = api_base_url;
            }
            if let Some(number_map_path) = notification.number_map_path {
                self.notification.number_map_path = number_map_path;
            }
            if let Some(timeout_secs) = notification.timeout_secs {
                self.notification.timeout_secs = timeout_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("CALLFLOW_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CALLFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("CALLFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CALLFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_DATABASE_CONNECT_RETRIES") {
            self.database.connect_retries =
                parse_u32("CALLFLOW_DATABASE_CONNECT_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CALLFLOW_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CALLFLOW_SERVER_PORT").or_else(|| read_env("PORT")) {
            self.server.port = parse_u16("CALLFLOW_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = value;
        }
        if let Some(value) = read_env("CALLFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CALLFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_SERVER_REQUEST_DEADLINE_SECS") {
            self.server.request_deadline_secs =
                parse_u64("CALLFLOW_SERVER_REQUEST_DEADLINE_SECS", &value)?;
        }

        if let Some(value) = read_env("CALLFLOW_SESSION_TIMEOUT_SECS") {
            self.session.timeout_secs = parse_u64("CALLFLOW_SESSION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_SESSION_MAX_INTERACTIONS") {
            self.session.max_interactions =
                parse_u32("CALLFLOW_SESSION_MAX_INTERACTIONS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_SESSION_MAX_EMPTY_TURNS") {
            self.session.max_empty_turns = parse_u32("CALLFLOW_SESSION_MAX_EMPTY_TURNS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_SESSION_RECORD_MAX_SECONDS") {
            self.session.record_max_seconds =
                parse_u32("CALLFLOW_SESSION_RECORD_MAX_SECONDS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_SESSION_SWEEP_INTERVAL_SECS") {
            self.session.sweep_interval_secs =
                parse_u64("CALLFLOW_SESSION_SWEEP_INTERVAL_SECS", &value)?;
        }

        if let Some(value) = read_env("CALLFLOW_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_bool("CALLFLOW_RATE_LIMIT_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_RATE_LIMIT_LIMIT") {
            self.rate_limit.limit = parse_u32("CALLFLOW_RATE_LIMIT_LIMIT", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_RATE_LIMIT_WINDOW_SECS") {
            self.rate_limit.window_secs = parse_u64("CALLFLOW_RATE_LIMIT_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_RATE_LIMIT_SCOPE") {
            self.rate_limit.scope = value.parse()?;
        }

        if let Some(value) = read_env("CALLFLOW_TELEPHONY_PROVIDER") {
            self.telephony.provider = value.parse()?;
        }
        if let Some(value) = read_env("CALLFLOW_TELEPHONY_AUDIO_BASE_URL") {
            self.telephony.audio_base_url = value;
        }
        if let Some(value) = read_env("CALLFLOW_TELEPHONY_WELCOME_AUDIO") {
            self.telephony.welcome_audio = value;
        }

        if let Some(value) = read_env("CALLFLOW_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("CALLFLOW_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLFLOW_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("CALLFLOW_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("CALLFLOW_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("CALLFLOW_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("CALLFLOW_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CALLFLOW_TRANSCRIPTION_API_KEY") {
            self.transcription.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLFLOW_TRANSCRIPTION_BASE_URL") {
            self.transcription.base_url = value;
        }
        if let Some(value) = read_env("CALLFLOW_TRANSCRIPTION_MODEL") {
            self.transcription.model = value;
        }
        if let Some(value) = read_env("CALLFLOW_TRANSCRIPTION_TIMEOUT_SECS") {
            self.transcription.timeout_secs =
                parse_u64("CALLFLOW_TRANSCRIPTION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_TRANSCRIPTION_MAX_RETRIES") {
            self.transcription.max_retries =
                parse_u32("CALLFLOW_TRANSCRIPTION_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("CALLFLOW_NOTIFICATION_ENABLED") {
            self.notification.enabled = parse_bool("CALLFLOW_NOTIFICATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("CALLFLOW_NOTIFICATION_ACCOUNT_SID") {
            self.notification.account_sid = Some(value);
        }
        if let Some(value) = read_env("CALLFLOW_NOTIFICATION_AUTH_TOKEN") {
            self.notification.auth_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CALLFLOW_NOTIFICATION_API_BASE_URL") {
            self.notification.api_base_url = value;
        }
        if let Some(value) = read_env("CALLFLOW_NOTIFICATION_NUMBER_MAP_PATH") {
            self.notification.number_map_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("CALLFLOW_NOTIFICATION_TIMEOUT_SECS") {
            self.notification.timeout_secs =
                parse_u64("CALLFLOW_NOTIFICATION_TIMEOUT_SECS", &value)?;
        }

        let log_level =
            read_env("CALLFLOW_LOGGING_LEVEL").or_else(|| read_env("CALLFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CALLFLOW_LOGGING_FORMAT").or_else(|| read_env("CALLFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(public_base_url) = overrides.public_base_url {
            self.server.public_base_url = public_base_url;
        }
        if let Some(provider) = overrides.telephony_provider {
            self.telephony.provider = provider;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(enabled) = overrides.notification_enabled {
            self.notification.enabled = enabled;
        }
        if let Some(api_key) = overrides.transcription_api_key {
            self.transcription.api_key = Some(secret_value(api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_session(&self.session)?;
        validate_rate_limit(&self.rate_limit)?;
        validate_telephony(&self.telephony)?;
        validate_llm(&self.llm)?;
        validate_transcription(&self.transcription)?;
        validate_notification(&self.notification)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("callflow.toml"), PathBuf::from("config/callflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if !server.public_base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "server.public_base_url must start with https:// (vendors only call back over TLS)"
                .to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.request_deadline_secs == 0 || server.request_deadline_secs > 120 {
        return Err(ConfigError::Validation(
            "server.request_deadline_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "session.timeout_secs must be greater than zero".to_string(),
        ));
    }
    if session.max_interactions == 0 {
        return Err(ConfigError::Validation(
            "session.max_interactions must be greater than zero".to_string(),
        ));
    }
    if session.max_empty_turns == 0 {
        return Err(ConfigError::Validation(
            "session.max_empty_turns must be greater than zero".to_string(),
        ));
    }
    if session.record_max_seconds == 0 || session.record_max_seconds > 3600 {
        return Err(ConfigError::Validation(
            "session.record_max_seconds must be in range 1..=3600".to_string(),
        ));
    }
    if session.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "session.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_rate_limit(rate_limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if rate_limit.enabled && (rate_limit.limit == 0 || rate_limit.window_secs == 0) {
        return Err(ConfigError::Validation(
            "rate_limit.limit and rate_limit.window_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_telephony(telephony: &TelephonyConfig) -> Result<(), ConfigError> {
    if !telephony.audio_base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "telephony.audio_base_url must start with https://".to_string(),
        ));
    }
    if telephony.welcome_audio.trim().is_empty() {
        return Err(ConfigError::Validation(
            "telephony.welcome_audio must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the openai provider".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_transcription(transcription: &TranscriptionConfig) -> Result<(), ConfigError> {
    if transcription.timeout_secs == 0 || transcription.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "transcription.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    if !transcription.base_url.starts_with("http://")
        && !transcription.base_url.starts_with("https://")
    {
        return Err(ConfigError::Validation(
            "transcription.base_url must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

fn validate_notification(notification: &NotificationConfig) -> Result<(), ConfigError> {
    if !notification.enabled {
        return Ok(());
    }

    let has_sid =
        notification.account_sid.as_ref().map(|sid| !sid.trim().is_empty()).unwrap_or(false);
    let has_token = notification
        .auth_token
        .as_ref()
        .map(|token| !token.expose_secret().trim().is_empty())
        .unwrap_or(false);
    if !has_sid || !has_token {
        return Err(ConfigError::Validation(
            "notification.enabled is true but notification.account_sid or notification.auth_token is missing"
                .to_string(),
        ));
    }

    if notification.timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "notification.timeout_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    session: Option<SessionPatch>,
    rate_limit: Option<RateLimitPatch>,
    telephony: Option<TelephonyPatch>,
    llm: Option<LlmPatch>,
    transcription: Option<TranscriptionPatch>,
    notification: Option<NotificationPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
    connect_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    public_base_url: Option<String>,
    graceful_shutdown_secs: Option<u64>,
    request_deadline_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    timeout_secs: Option<u64>,
    max_interactions: Option<u32>,
    max_empty_turns: Option<u32>,
    record_max_seconds: Option<u32>,
    sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RateLimitPatch {
    enabled: Option<bool>,
    limit: Option<u32>,
    window_secs: Option<u64>,
    scope: Option<RateLimitScope>,
}

#[derive(Debug, Default, Deserialize)]
struct TelephonyPatch {
    provider: Option<TelephonyProvider>,
    audio_base_url: Option<String>,
    welcome_audio: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct TranscriptionPatch {
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    enabled: Option<bool>,
    account_sid: Option<String>,
    auth_token: Option<String>,
    api_base_url: Option<String>,
    number_map_path: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
