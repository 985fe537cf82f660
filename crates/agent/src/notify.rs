use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

use callflow_core::config::NotificationConfig;
use callflow_core::errors::{CollaboratorError, Failure};
use callflow_core::Notifier;

use crate::http::{build_client, join_url, status_failure, transport_failure};

/// Sends the lead summary by SMS from the dialled virtual number to the
/// owner's personal number, looked up in a JSON `{ "virtual": "personal" }` map.
pub struct TwilioSmsNotifier {
    client: Client,
    api_base_url: String,
    account_sid: String,
    auth_token: SecretString,
    number_map_path: PathBuf,
}

#[derive(Deserialize)]
struct MessageCreated {
    sid: String,
}

impl TwilioSmsNotifier {
    pub fn new(
        api_base_url: impl Into<String>,
        account_sid: impl Into<String>,
        auth_token: SecretString,
        number_map_path: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            api_base_url: api_base_url.into(),
            account_sid: account_sid.into(),
            auth_token,
            number_map_path: number_map_path.into(),
        }
    }

    /// `None` when notifications are disabled or credentials are absent.
    pub fn from_config(config: &NotificationConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        Some(Self::new(
            config.api_base_url.clone(),
            config.account_sid.clone()?,
            config.auth_token.clone()?,
            config.number_map_path.clone(),
            Duration::from_secs(config.timeout_secs),
        ))
    }
}

#[async_trait]
impl Notifier for TwilioSmsNotifier {
    async fn notify(&self, summary: &str, destination: &str) -> Result<String, CollaboratorError> {
        let personal_number = resolve_personal_number(&self.number_map_path, destination).await?;
        let endpoint =
            join_url(&self.api_base_url, &format!("Accounts/{}/Messages.json", self.account_sid));

        let response = self
            .client
            .post(endpoint)
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&[("To", personal_number.as_str()), ("From", destination), ("Body", summary)])
            .send()
            .await
            .map_err(|error| {
                CollaboratorError::Notification(transport_failure("sms request", &error))
            })?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Notification(status_failure(
                "sms request",
                response.status(),
            )));
        }

        let created: MessageCreated = response.json().await.map_err(|error| {
            CollaboratorError::Notification(transport_failure("sms response", &error))
        })?;
        info!(
            event_name = "notification.sent",
            message_id = %created.sid,
            from = destination,
            "lead summary delivered"
        );
        Ok(created.sid)
    }
}

pub(crate) async fn resolve_personal_number(
    number_map_path: &Path,
    virtual_number: &str,
) -> Result<String, CollaboratorError> {
    let raw = tokio::fs::read_to_string(number_map_path).await.map_err(|error| {
        CollaboratorError::Notification(Failure::rejected(format!(
            "could not read number map `{}`: {error}",
            number_map_path.display()
        )))
    })?;
    let map: HashMap<String, String> = serde_json::from_str(&raw).map_err(|error| {
        CollaboratorError::Notification(Failure::rejected(format!(
            "number map is not a JSON object of strings: {error}"
        )))
    })?;

    map.get(virtual_number).cloned().ok_or_else(|| {
        CollaboratorError::Notification(Failure::rejected(format!(
            "no personal number mapped for {virtual_number}"
        )))
    })
}

/// Stand-in used when SMS delivery is disabled: the summary only reaches the log.
#[derive(Clone, Debug, Default)]
pub struct LogOnlyNotifier;

#[async_trait]
impl Notifier for LogOnlyNotifier {
    async fn notify(&self, summary: &str, destination: &str) -> Result<String, CollaboratorError> {
        info!(
            event_name = "notification.logged",
            destination,
            summary,
            "notification delivery disabled, summary logged"
        );
        Ok("log-only".to_string())
    }
}
