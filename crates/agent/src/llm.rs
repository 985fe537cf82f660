//! LLM-backed slot extraction.
//!
//! The model only translates speech into slot values. What gets asked next and
//! when a call ends stay with the slot machine.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use callflow_core::config::LlmConfig;
use callflow_core::errors::{CollaboratorError, Failure};
use callflow_core::slots::SlotSchema;
use callflow_core::{SlotExtractor, SlotValues};

use crate::http::{build_client, join_url, status_failure, transport_failure};

const MAX_COMPLETION_TOKENS: u32 = 256;

const INSTRUCTIONS: &str = "You are an expert assistant for a real estate slot-filling bot. \
Extract only the slots the user mentions, from this list: {slot_ids}. \
If a slot has several values, output them as one comma-separated string under the same key \
(e.g. \"location\": \"Bangalore, Hyderabad\"). \
Normalize BHK values to \"1BHK\", \"2BHK\", etc. \
Always keep the full facing value as heard, e.g. \"East facing\", not just \"East\". \
Output only valid slot keys, only for new or updated slots, and omit anything not mentioned. \
Do not invent keys or values. Respond with only a JSON object and no other text.";

const EXAMPLES: &str = r#"Example 1:
User: I am Amit. Looking for a 2BHK rental in Kondapur.
Output: {"tenant_name":"Amit","rent_or_buy":"rent","bhk_type":"2BHK","location":"Kondapur"}
Example 2:
User: buy, semi-furnished, Bangalore, budget 75 lakhs
Output: {"rent_or_buy":"buy","furnishing":"semi-furnished","location":"Bangalore","budget":"75 lakhs"}
Example 3:
User: family, East facing, Whitefield, 3BHK
Output: {"tenant_type":"family","facing":"East facing","location":"Whitefield","bhk_type":"3BHK"}
Example 4:
User: 20,000 to 25,000
Output: {"budget":"20000 to 25000"}
Example 5:
User: unfurnished 1BHK, HSR Layout, west
Output: {"furnishing":"unfurnished","bhk_type":"1BHK","location":"HSR Layout","facing":"west facing"}
Example 6:
User: Middle floor
Output: {"floor_pref":"Middle floor"}"#;

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, CollaboratorError>;
}

/// Chat-completions client for OpenAI and OpenAI-compatible servers (Ollama).
pub struct OpenAiCompatibleClient {
    client: Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<SecretString>,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            endpoint: join_url(base_url, "chat/completions"),
            model: model.into(),
            api_key,
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        let base_url = config.base_url.as_deref().unwrap_or(config.provider.default_base_url());
        Self::new(
            base_url,
            config.model.clone(),
            config.api_key.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, CollaboratorError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage { role: "system", content: system_prompt },
                ChatMessage { role: "user", content: user_prompt },
            ],
            max_tokens: MAX_COMPLETION_TOKENS,
            temperature: 0.0,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.map_err(|error| {
            CollaboratorError::Extraction(transport_failure("llm request", &error))
        })?;
        if !response.status().is_success() {
            return Err(CollaboratorError::Extraction(status_failure(
                "llm request",
                response.status(),
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|error| {
            CollaboratorError::Extraction(transport_failure("llm response", &error))
        })?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                CollaboratorError::Extraction(Failure::malformed("llm response had no content"))
            })
    }
}

/// [`SlotExtractor`] that prompts an [`LlmClient`] with the slot catalogue and
/// a handful of worked examples.
pub struct LlmSlotExtractor<C> {
    client: C,
    schema: SlotSchema,
}

impl<C: LlmClient> LlmSlotExtractor<C> {
    pub fn new(client: C) -> Self {
        Self { client, schema: SlotSchema }
    }

    pub fn system_prompt(&self, missing_slot_ids: &[&str]) -> String {
        let slot_ids = missing_slot_ids
            .iter()
            .map(|slot_id| format!("\"{slot_id}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let descriptions = self
            .schema
            .slots()
            .iter()
            .map(|slot| format!("- {}: {}", slot.id, slot.description))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "{}\n\nSlot keys:\n{}\n\n{}",
            INSTRUCTIONS.replace("{slot_ids}", &format!("[{slot_ids}]")),
            descriptions,
            EXAMPLES
        )
    }
}

#[async_trait]
impl<C: LlmClient> SlotExtractor for LlmSlotExtractor<C> {
    async fn extract(
        &self,
        text: &str,
        missing_slot_ids: &[&str],
        language: &str,
    ) -> Result<SlotValues, CollaboratorError> {
        if missing_slot_ids.is_empty() || text.trim().is_empty() {
            return Ok(SlotValues::new());
        }

        let raw = self
            .client
            .complete(&self.system_prompt(missing_slot_ids), &format!("User: {}", text.trim()))
            .await?;
        debug!(event_name = "llm.completion_received", language, raw = %raw, "llm reply");

        Ok(parse_slot_reply(&raw, &self.schema))
    }
}

/// Lenient parse of a model reply: strips code fences, keeps known slot keys,
/// stringifies scalars. Anything unusable yields an empty map.
pub fn parse_slot_reply(raw: &str, schema: &SlotSchema) -> SlotValues {
    let body = strip_code_fence(raw.trim());
    let object = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(object)) => object,
        Ok(_) | Err(_) => {
            warn!(event_name = "llm.reply_unparseable", raw = %raw, "llm reply was not a JSON object");
            return SlotValues::new();
        }
    };

    object
        .into_iter()
        .filter(|(key, _)| schema.contains(key))
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(text) => text,
                Value::Number(number) => number.to_string(),
                Value::Bool(flag) => flag.to_string(),
                Value::Array(items) => items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(text) => Some(text.clone()),
                        Value::Number(number) => Some(number.to_string()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join(", "),
                Value::Null | Value::Object(_) => return None,
            };
            let value = value.trim().to_string();
            (!value.is_empty()).then_some((key, value))
        })
        .collect()
}

fn strip_code_fence(text: &str) -> &str {
    let Some(inner) = text.strip_prefix("```") else {
        return text;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
