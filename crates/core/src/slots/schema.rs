use crate::domain::session::{SlotValues, DEFAULT_LANGUAGE};

pub const SUPPORTED_LANGUAGES: [&str; 4] = ["en", "hi", "te", "ta"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotPrompt {
    pub en: &'static str,
    pub hi: &'static str,
    pub te: &'static str,
    pub ta: &'static str,
}

impl SlotPrompt {
    pub fn for_language(&self, language: &str) -> &'static str {
        match language {
            "hi" => self.hi,
            "te" => self.te,
            "ta" => self.ta,
            _ => self.en,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotDefinition {
    pub id: &'static str,
    /// Extraction hint handed to the slot extractor.
    pub description: &'static str,
    pub prompt: SlotPrompt,
}

static SLOTS: [SlotDefinition; 11] = [
    SlotDefinition {
        id: "tenant_name",
        description: "Name (e.g. \"Amit\", \"Ms. Smith\")",
        prompt: SlotPrompt {
            en: "May I know your name, please?",
            hi: "कृपया अपना नाम बताएं।",
            te: "మీ పేరు చెప్పగలరా?",
            ta: "உங்கள் பெயரை கூற முடியுமா?",
        },
    },
    SlotDefinition {
        id: "rent_or_buy",
        description: "\"rent\" or \"buy\"",
        prompt: SlotPrompt {
            en: "Are you looking to rent or to buy?",
            hi: "क्या आप किराए पर लेना चाहते हैं या खरीदना चाहते हैं?",
            te: "మీరు అద్దెకు తీసుకోవాలనుకుంటున్నారా లేదా కొనుగోలు చేయాలనుకుంటున్నారా?",
            ta: "நீங்கள் வாடகைக்கு அல்லது வாங்க விரும்புகிறீர்களா?",
        },
    },
    SlotDefinition {
        id: "location",
        description: "Area(s), comma-separated if many",
        prompt: SlotPrompt {
            en: "Which location(s) do you prefer?",
            hi: "आप किन स्थानों को प्राथमिकता देंगे?",
            te: "మీరు ఏ ప్రాంతాలను ఇష్టపడతారు?",
            ta: "நீங்கள் எந்த இடங்களை விரும்புகிறீர்கள்?",
        },
    },
    SlotDefinition {
        id: "bhk_type",
        description: "\"1BHK\", \"2BHK\", \"3BHK\"; normalize \"2 bed\" or \"one bedroom\" to the BHK form",
        prompt: SlotPrompt {
            en: "What type of BHK are you interested in example: 3bhk?",
            hi: "आप किस प्रकार के BHK में रुचि रखते हैं?",
            te: "మీరు ఏ BHK టైప్ ఆసక్తి చూపిస్తున్నారు?",
            ta: "நீங்கள் எந்த வகை BHK விரும்புகிறீர்கள்?",
        },
    },
    SlotDefinition {
        id: "tenant_type",
        description: "e.g. \"bachelors\", \"family\"",
        prompt: SlotPrompt {
            en: "Will the property be for bachelors or family example: bachelors?",
            hi: "क्या संपत्ति बैचलर्स, परिवार या अन्य किसी के लिए है?",
            te: "ఈ ప్రాపర్టీ బ్యాచిలర్స్, ఫ్యామిలీ లేదా ఇంకెవరైనా కోసం కావాలా?",
            ta: "இந்த சொத்து தனிப்பட்டவர்களுக்கு, குடும்பத்திற்கு அல்லது வேறு யாருக்காகவும் வேண்டுமா?",
        },
    },
    SlotDefinition {
        id: "facing",
        description: "Direction as heard, e.g. \"East facing\"",
        prompt: SlotPrompt {
            en: "Do you have a preference for the facing direction example: east facing?",
            hi: "क्या आपके पास फेसिंग दिशा के लिए कोई पसंद है?",
            te: "మీరు ఏ ముఖదిశలో ఇష్టం ఉన్నదా?",
            ta: "முகப்புத் திசையில் உங்களுக்கு விருப்பம் உள்ளதா?",
        },
    },
    SlotDefinition {
        id: "floor_pref",
        description: "Floor, e.g. \"Ground\", \"Upper\", \"5th floor\"",
        prompt: SlotPrompt {
            en: "Which floor do you prefer example: 5th floor?",
            hi: "आप किस मंजिल को पसंद करेंगे?",
            te: "మీరు ఏ ఫ్లోర్ ఇష్టపడతారు?",
            ta: "நீங்கள் எந்த மாடியை விரும்புகிறீர்கள்?",
        },
    },
    SlotDefinition {
        id: "budget",
        description: "Amount or range, e.g. \"25000 to 30000\"",
        prompt: SlotPrompt {
            en: "What is your preferred budget example: fifty thousand?",
            hi: "आपका पसंदीदा बजट क्या है?",
            te: "మీరు ఎటువంటి బడ్జెట్ చూస్తున్నారు?",
            ta: "நீங்கள் விரும்பும் பட்ஜெட் எது?",
        },
    },
    SlotDefinition {
        id: "furnishing",
        description: "\"furnished\", \"semi-furnished\" or \"unfurnished\"",
        prompt: SlotPrompt {
            en: "Do you have a preference for furnished, semi-furnished, or unfurnished?",
            hi: "क्या आप फर्निश्ड, सेमी-फर्निश्ड या अनफर्निश्ड पसंद करेंगे?",
            te: "మీరు ఫర్నిష్డ్, సెమీ-ఫర్నిష్డ్ లేదా అన్ఫర్నిష్డ్ ఇష్టపడతారా?",
            ta: "முழுமையாக, பகுதி, அல்லது இல்லாமல் அமைக்கப்பட்ட வீட்டில் உங்களுக்கு விருப்பமா?",
        },
    },
    SlotDefinition {
        id: "possession_date",
        description: "Date or time frame, e.g. \"immediately\", \"next month\", \"within 15 days\"",
        prompt: SlotPrompt {
            en: "When would you like to take possession date or move in date example: june 1st week?",
            hi: "आप कब कब्जा लेना या शिफ्ट होना चाहेंगे?",
            te: "మీరు ఎప్పుడు ఇంట్లోకి మారాలని అనుకుంటున్నారు?",
            ta: "நீங்கள் எப்போது வீடு பிடிக்க விரும்புகிறீர்கள்?",
        },
    },
    SlotDefinition {
        id: "profession_details",
        description: "Profession or occupation, e.g. \"Software Engineer\", \"Teacher\"",
        prompt: SlotPrompt {
            en: "Could you please share your profession or occupation details example: software engineer?",
            hi: "कृपया अपना पेशा या व्यवसाय बताएं।",
            te: "మీ వృత్తి లేదా ఉద్యోగం చెప్పగలరా?",
            ta: "உங்கள் தொழில் அல்லது வேலை கூற முடியுமா?",
        },
    },
];

/// Ordered list of the questions asked on every call.
#[derive(Clone, Copy, Debug, Default)]
pub struct SlotSchema;

impl SlotSchema {
    pub fn slots(&self) -> &'static [SlotDefinition] {
        &SLOTS
    }

    pub fn get(&self, slot_id: &str) -> Option<&'static SlotDefinition> {
        SLOTS.iter().find(|slot| slot.id == slot_id)
    }

    pub fn contains(&self, slot_id: &str) -> bool {
        self.get(slot_id).is_some()
    }

    pub fn prompt(&self, slot_id: &str, language: &str) -> Option<&'static str> {
        self.get(slot_id).map(|slot| slot.prompt.for_language(language))
    }

    /// Slot ids with no value yet, in declared order.
    pub fn missing(&self, slots: &SlotValues) -> Vec<&'static str> {
        SLOTS.iter().filter(|slot| !is_filled(slots, slot.id)).map(|slot| slot.id).collect()
    }

    /// One `id: value` line per slot, `-` for slots never collected.
    pub fn lead_summary(&self, slots: &SlotValues) -> String {
        SLOTS
            .iter()
            .map(|slot| {
                let value = slots.get(slot.id).map(String::as_str).unwrap_or("-");
                format!("{}: {value}", slot.id)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub(crate) fn is_filled(slots: &SlotValues, slot_id: &str) -> bool {
    slots.get(slot_id).is_some_and(|value| !value.trim().is_empty())
}

pub fn normalize_language(language: &str) -> &'static str {
    let code = language.trim().to_ascii_lowercase();
    let primary = code.split(['-', '_']).next().unwrap_or_default();
    SUPPORTED_LANGUAGES
        .iter()
        .copied()
        .find(|supported| *supported == primary)
        .unwrap_or(DEFAULT_LANGUAGE)
}

#[cfg(test)]
mod tests {
    use super::{normalize_language, SlotSchema};
    use crate::domain::session::SlotValues;

    #[test]
    fn schema_declares_eleven_slots_in_interview_order() {
        let ids: Vec<&str> = SlotSchema.slots().iter().map(|slot| slot.id).collect();
        assert_eq!(
            ids,
            vec![
                "tenant_name",
                "rent_or_buy",
                "location",
                "bhk_type",
                "tenant_type",
                "facing",
                "floor_pref",
                "budget",
                "furnishing",
                "possession_date",
                "profession_details",
            ]
        );
    }

    #[test]
    fn prompt_falls_back_to_english() {
        let schema = SlotSchema;
        assert_eq!(schema.prompt("tenant_name", "fr"), Some("May I know your name, please?"));
        assert_eq!(schema.prompt("tenant_name", "hi"), Some("कृपया अपना नाम बताएं।"));
        assert_eq!(schema.prompt("unknown", "en"), None);
    }

    #[test]
    fn lead_summary_marks_missing_slots() {
        let mut slots = SlotValues::new();
        slots.insert("tenant_name".to_string(), "Asha".to_string());
        slots.insert("rent_or_buy".to_string(), "rent".to_string());

        let summary = SlotSchema.lead_summary(&slots);
        let lines: Vec<&str> = summary.lines().collect();

        assert_eq!(lines.len(), 11);
        assert_eq!(lines[0], "tenant_name: Asha");
        assert_eq!(lines[1], "rent_or_buy: rent");
        assert_eq!(lines[2], "location: -");
    }

    #[test]
    fn missing_treats_blank_values_as_absent() {
        let mut slots = SlotValues::new();
        slots.insert("tenant_name".to_string(), "  ".to_string());
        slots.insert("rent_or_buy".to_string(), "buy".to_string());

        let missing = SlotSchema.missing(&slots);
        assert_eq!(missing.first(), Some(&"tenant_name"));
        assert!(!missing.contains(&"rent_or_buy"));
        assert_eq!(missing.len(), 10);
    }

    #[test]
    fn language_codes_are_normalized() {
        assert_eq!(normalize_language("hi-IN"), "hi");
        assert_eq!(normalize_language("TA"), "ta");
        assert_eq!(normalize_language("fr"), "en");
        assert_eq!(normalize_language(""), "en");
    }
}
