use serde_json::json;

use super::{render_error, CallDirective, ResponseBuilder};
use crate::errors::DirectiveError;

/// Exotel-style JSON call flow.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExomlBuilder;

impl ResponseBuilder for ExomlBuilder {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn render(&self, directive: &CallDirective) -> Result<String, DirectiveError> {
        directive.validate()?;

        let document = match directive {
            CallDirective::PlayThenRecord { audio_url, callback_url, status_url, max_seconds } => {
                json!({
                    "Exoml": [
                        { "Play": { "url": audio_url } },
                        { "Record": {
                            "max_length": max_seconds,
                            "finish_on_key": "#",
                            "play_beep": true,
                            "timeout": 5,
                            "action": callback_url,
                            "status_callback": status_url,
                        } },
                    ]
                })
            }
            CallDirective::PlayThenHangup { audio_url } => json!({
                "Exoml": [
                    { "Play": { "url": audio_url } },
                    { "Hangup": {} },
                ]
            }),
            CallDirective::SayThenHangup { text } => json!({
                "Exoml": [
                    { "Say": { "text": text, "voice": "woman", "language": "en" } },
                    { "Hangup": {} },
                ]
            }),
        };

        serde_json::to_string(&document).map_err(render_error)
    }

    fn empty(&self) -> String {
        "{\"Exoml\":[]}".to_string()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::ExomlBuilder;
    use crate::directives::{CallDirective, ResponseBuilder};

    #[test]
    fn play_then_record_carries_record_options() {
        let body = ExomlBuilder
            .render(&CallDirective::PlayThenRecord {
                audio_url: "https://audio.example.com/budget_hi.wav".into(),
                callback_url: "https://calls.example.com/process-recording?session_id=s".into(),
                status_url: "https://calls.example.com/recording-status?session_id=s".into(),
                max_seconds: 15,
            })
            .expect("valid directive renders");
        let value: Value = serde_json::from_str(&body).expect("rendered JSON parses");

        assert_eq!(value["Exoml"][0]["Play"]["url"], "https://audio.example.com/budget_hi.wav");
        assert_eq!(value["Exoml"][1]["Record"]["max_length"], 15);
        assert_eq!(value["Exoml"][1]["Record"]["finish_on_key"], "#");
        assert_eq!(value["Exoml"][1]["Record"]["play_beep"], true);
    }

    #[test]
    fn play_then_hangup_ends_with_hangup() {
        let body = ExomlBuilder
            .render(&CallDirective::PlayThenHangup {
                audio_url: "https://audio.example.com/confirmation_en.wav".into(),
            })
            .expect("valid directive renders");
        let value: Value = serde_json::from_str(&body).expect("rendered JSON parses");

        assert!(value["Exoml"][1]["Hangup"].is_object());
    }

    #[test]
    fn invalid_directive_is_not_rendered() {
        let result = ExomlBuilder
            .render(&CallDirective::PlayThenHangup { audio_url: "http://insecure".into() });
        assert!(result.is_err());
    }
}
