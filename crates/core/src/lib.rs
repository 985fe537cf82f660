//! Domain model and policy for the automated phone interview service.
//!
//! Everything here is storage and transport agnostic: sessions and slots,
//! the slot-filling state machine, vendor response builders, collaborator
//! seams, retry policy, configuration and the error taxonomy.

pub mod collaborators;
pub mod config;
pub mod directives;
pub mod domain;
pub mod errors;
pub mod prompts;
pub mod retry;
pub mod slots;

pub use collaborators::{Notifier, SlotExtractor, SpeechSynthesizer, Transcriber, Transcript};
pub use directives::{render_or_apology, CallDirective, ResponseBuilder};
pub use domain::dead_letter::{DeadLetterEntry, DeadLetterId};
pub use domain::session::{CallSession, SessionId, SlotValues};
pub use errors::{
    ApplicationError, CollaboratorError, DirectiveError, DomainError, Failure, FailureKind,
    InterfaceError, SessionError,
};
pub use prompts::Prompt;
pub use retry::RetryPolicy;
pub use slots::{CompletionOutcome, SlotMachine, SlotSchema, SlotState};
