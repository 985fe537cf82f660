pub mod machine;
pub mod schema;

pub use machine::{CompletionOutcome, SlotMachine, SlotState, DEFAULT_MAX_EMPTY_TURNS};
pub use schema::{normalize_language, SlotDefinition, SlotPrompt, SlotSchema, SUPPORTED_LANGUAGES};
