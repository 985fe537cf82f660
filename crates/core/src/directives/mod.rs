//! Call-control responses returned to the telephony vendor.
//!
//! A [`CallDirective`] says what the caller hears next; a [`ResponseBuilder`]
//! turns it into the vendor's wire format. Every directive is validated before
//! rendering so a malformed URL never reaches the vendor.

mod exoml;
mod twiml;

use std::fmt::Display;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::TelephonyProvider;
use crate::errors::DirectiveError;

pub use exoml::ExomlBuilder;
pub use twiml::TwimlBuilder;

pub const MAX_URL_LENGTH: usize = 500;
pub const MIN_RECORD_SECONDS: u32 = 1;
pub const MAX_RECORD_SECONDS: u32 = 3600;
pub const GENERIC_APOLOGY: &str = "Sorry, we encountered an error. Please try again later.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CallDirective {
    PlayThenRecord { audio_url: String, callback_url: String, status_url: String, max_seconds: u32 },
    PlayThenHangup { audio_url: String },
    SayThenHangup { text: String },
}

impl CallDirective {
    pub fn apology() -> Self {
        Self::SayThenHangup { text: GENERIC_APOLOGY.to_string() }
    }

    pub fn say_then_hangup(text: impl Into<String>) -> Self {
        Self::SayThenHangup { text: text.into() }
    }

    pub fn validate(&self) -> Result<(), DirectiveError> {
        match self {
            Self::PlayThenRecord { audio_url, callback_url, status_url, max_seconds } => {
                validate_url("audio_url", audio_url)?;
                validate_url("callback_url", callback_url)?;
                validate_url("status_url", status_url)?;
                if !(MIN_RECORD_SECONDS..=MAX_RECORD_SECONDS).contains(max_seconds) {
                    return Err(DirectiveError::Validation(format!(
                        "max_seconds must be in range {MIN_RECORD_SECONDS}..={MAX_RECORD_SECONDS}, got {max_seconds}"
                    )));
                }
                Ok(())
            }
            Self::PlayThenHangup { audio_url } => validate_url("audio_url", audio_url),
            Self::SayThenHangup { text } => {
                if text.trim().is_empty() {
                    return Err(DirectiveError::Validation("say text must not be empty".to_string()));
                }
                Ok(())
            }
        }
    }
}

/// True when `url` is acceptable as a directive or recording URL.
pub fn is_secure_url(url: &str) -> bool {
    url.starts_with("https://") && url.len() > "https://".len() && url.len() < MAX_URL_LENGTH
}

fn validate_url(field: &str, url: &str) -> Result<(), DirectiveError> {
    if !url.starts_with("https://") {
        return Err(DirectiveError::Validation(format!("{field} must use https")));
    }
    if !is_secure_url(url) {
        return Err(DirectiveError::Validation(format!(
            "{field} must be a non-empty URL shorter than {MAX_URL_LENGTH} characters"
        )));
    }
    Ok(())
}

pub trait ResponseBuilder: Send + Sync {
    fn content_type(&self) -> &'static str;

    /// Validates, then renders. Never emits a partially valid document.
    fn render(&self, directive: &CallDirective) -> Result<String, DirectiveError>;

    /// Vendor acknowledgement with no call-control instructions.
    fn empty(&self) -> String;
}

/// Renders `directive`, falling back to the rendered generic apology.
pub fn render_or_apology(builder: &dyn ResponseBuilder, directive: &CallDirective) -> String {
    match builder.render(directive) {
        Ok(body) => body,
        Err(error) => {
            tracing::error!(
                event_name = "directive.render_failed",
                error = %error,
                "falling back to apology directive"
            );
            builder.render(&CallDirective::apology()).unwrap_or_else(|_| builder.empty())
        }
    }
}

pub fn builder_for(provider: TelephonyProvider) -> Arc<dyn ResponseBuilder> {
    match provider {
        TelephonyProvider::Twilio => Arc::new(TwimlBuilder),
        TelephonyProvider::Exotel => Arc::new(ExomlBuilder),
    }
}

pub(crate) fn render_error<E: Display>(error: E) -> DirectiveError {
    DirectiveError::Render(error.to_string())
}
