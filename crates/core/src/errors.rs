use thiserror::Error;

use crate::domain::session::SessionId;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("session `{0}` was not found or has expired")]
    NotFound(SessionId),
    #[error("session `{0}` has already ended")]
    Ended(SessionId),
    #[error("a live session already exists for `{0}`")]
    AlreadyExists(String),
    #[error("session `{session_id}` exceeded {max_interactions} interactions")]
    LimitExceeded { session_id: SessionId, max_interactions: u32 },
    #[error("session `{session_id}` kept changing after {attempts} write attempts")]
    Conflict { session_id: SessionId, attempts: u32 },
}

/// How a collaborator call failed, independent of which collaborator it was.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused or reset, or the request timed out in flight.
    Transport,
    /// The upstream answered with a non-success HTTP status.
    Status(u16),
    /// The upstream answered but the body could not be understood.
    Malformed,
    /// Refused locally: missing configuration, unmapped number, unknown prompt.
    Rejected,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transport, message)
    }

    pub fn status(context: &str, status: u16) -> Self {
        Self::new(FailureKind::Status(status), format!("{context} returned status {status}"))
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Malformed, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    /// Transport failures, throttling and server errors are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            FailureKind::Transport => true,
            FailureKind::Status(status) => status == 429 || (500..600).contains(&status),
            FailureKind::Malformed | FailureKind::Rejected => false,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("slot extraction failed: {0}")]
    Extraction(Failure),
    #[error("transcription failed: {0}")]
    Transcription(Failure),
    #[error("notification failed: {0}")]
    Notification(Failure),
    #[error("speech synthesis failed: {0}")]
    Synthesis(Failure),
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout { operation: &'static str, timeout_secs: u64 },
}

impl CollaboratorError {
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Self::Extraction(failure)
            | Self::Transcription(failure)
            | Self::Notification(failure)
            | Self::Synthesis(failure) => Some(failure),
            Self::Timeout { .. } => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.failure().map_or(true, Failure::is_retryable)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DirectiveError {
    #[error("directive validation failed: {0}")]
    Validation(String),
    #[error("directive rendering failed: {0}")]
    Render(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Directive(#[from] DirectiveError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error(transparent)]
    Integration(#[from] CollaboratorError),
    #[error("caller exceeded the call rate limit")]
    RateLimited,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("too many requests: {message}")]
    TooManyRequests { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::TooManyRequests { .. } => {
                "You have made too many calls recently. Please try again later."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::TooManyRequests { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::TooManyRequests { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(DomainError::Session(error)) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::InvariantViolation(_)) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::RateLimited => Self::TooManyRequests {
                message: "rate limit exceeded".to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::Persistence(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Integration(error) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id: unassigned() }
            }
            ApplicationError::Domain(DomainError::Directive(error)) => {
                Self::Internal { message: error.to_string(), correlation_id: unassigned() }
            }
        }
    }
}
