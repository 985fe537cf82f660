//! HTTP-backed collaborators for a call: slot extraction through a chat
//! model, speech-to-text, SMS lead notification and the pre-recorded prompt
//! catalogue. Each implements a `callflow-core` collaborator trait.

mod http;
pub mod llm;
pub mod notify;
pub mod retrying;
pub mod synthesis;
pub mod transcription;

pub use llm::{LlmClient, LlmSlotExtractor, OpenAiCompatibleClient};
pub use notify::{LogOnlyNotifier, TwilioSmsNotifier};
pub use retrying::Retrying;
pub use synthesis::PromptAudioCatalog;
pub use transcription::DeepgramTranscriber;
