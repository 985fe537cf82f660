use crate::slots::schema::{SlotPrompt, SlotSchema};

pub const RATE_LIMITED_MESSAGE: &str =
    "You have made too many calls recently. Please try again later.";
pub const LIMIT_EXCEEDED_MESSAGE: &str = "Session limit exceeded. Please try again later.";
pub const COULD_NOT_UNDERSTAND_MESSAGE: &str =
    "Sorry, we did not hear you. Please try again later. Goodbye!";

pub const WELCOME_TEXT: &str =
    "Welcome! Please tell us about the home you are looking for after the beep.";

pub const CONFIRMATION: SlotPrompt = SlotPrompt {
    en: "Thank you. We have noted your requirements and will get back to you shortly.",
    hi: "धन्यवाद। हमने आपकी आवश्यकताएँ नोट कर ली हैं और जल्द ही आपसे संपर्क करेंगे।",
    te: "ధన్యవాదాలు. మీ అవసరాలను నమోదు చేసుకున్నాము, త్వరలో మిమ్మల్ని సంప్రదిస్తాము.",
    ta: "நன்றி. உங்கள் தேவைகளை பதிவு செய்துள்ளோம், விரைவில் தொடர்பு கொள்வோம்.",
};

/// Something the caller hears from a pre-recorded or synthesized clip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Prompt {
    Welcome,
    Slot(&'static str),
    Confirmation,
}

impl Prompt {
    pub fn text(&self, language: &str) -> &'static str {
        match self {
            Self::Welcome => WELCOME_TEXT,
            Self::Slot(slot_id) => SlotSchema.prompt(slot_id, language).unwrap_or(WELCOME_TEXT),
            Self::Confirmation => CONFIRMATION.for_language(language),
        }
    }

    /// Reverse lookup used by clip catalogs keyed on prompt identity.
    pub fn from_text(text: &str) -> Option<Self> {
        let text = text.trim();
        if text == WELCOME_TEXT {
            return Some(Self::Welcome);
        }
        if [CONFIRMATION.en, CONFIRMATION.hi, CONFIRMATION.te, CONFIRMATION.ta].contains(&text) {
            return Some(Self::Confirmation);
        }
        SlotSchema.slots().iter().find_map(|slot| {
            let prompt = slot.prompt;
            [prompt.en, prompt.hi, prompt.te, prompt.ta]
                .contains(&text)
                .then_some(Self::Slot(slot.id))
        })
    }
}
