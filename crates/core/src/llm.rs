//! OpenAI-compatible chat completion and embedding client.

use crate::error::LlmError;
use crate::models::Role;
use crate::traits::ChatModel;
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }
}

/// A JSON schema the completion must conform to.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchema {
    pub name: String,
    pub schema: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub temperature: Option<f32>,
    pub messages: Vec<PromptMessage>,
    pub response_schema: Option<JsonSchema>,
}

impl CompletionRequest {
    /// The system instruction, if the first message carries one.
    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|message| message.role == Role::System)
            .map(|message| message.content.as_str())
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Serialize)]
struct EmbeddingBody<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, LlmError> {
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            client: Client::new(),
            base_url: Url::parse(&base)?,
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn post<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, LlmError> {
        let endpoint = self.base_url.join(path)?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| LlmError::MissingApiKey(endpoint.to_string()))?;

        debug!(endpoint = %endpoint, "sending model request");
        let response = self
            .client
            .post(endpoint.clone())
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(LlmError::BackendResponse {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                details,
            });
        }

        Ok(response.json().await?)
    }

    /// Calls the embedding endpoint and returns the first vector.
    pub async fn create_embedding(&self, model: &str, input: &str) -> Result<Vec<f32>, LlmError> {
        let response: EmbeddingResponse = self
            .post("embeddings", &EmbeddingBody { model, input })
            .await?;

        response
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| {
                LlmError::MalformedResponse("embedding response had no data".to_string())
            })
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let response_format = request.response_schema.as_ref().map(|schema| {
            serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": schema.name,
                    "strict": true,
                    "schema": schema.schema,
                },
            })
        });

        let body = ChatCompletionBody {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            response_format,
        };

        let response: ChatCompletionResponse = self.post("chat/completions", &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyCompletion)
    }
}

/// Strictly deserializes a structured completion into `T`.
///
/// Any deviation from the declared shape is a `MalformedResponse`; nothing is
/// salvaged from a partially valid payload.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, LlmError> {
    serde_json::from_str(raw.trim()).map_err(|error| LlmError::MalformedResponse(error.to_string()))
}

/// Schema for an object holding one required array of strings under `key`.
pub fn string_list_schema(name: &str, key: &str) -> JsonSchema {
    JsonSchema {
        name: name.to_string(),
        schema: serde_json::json!({
            "type": "object",
            "properties": {
                key: {
                    "type": "array",
                    "items": { "type": "string" },
                },
            },
            "required": [key],
            "additionalProperties": false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Facts {
        facts: Vec<String>,
    }

    #[test]
    fn structured_payload_parses_into_typed_value() {
        let parsed: Facts =
            parse_structured(r#" {"facts": ["The pump is rated at 200 bar."]} "#).expect("valid");
        assert_eq!(parsed.facts, vec!["The pump is rated at 200 bar."]);
    }

    #[test]
    fn unexpected_shape_is_rejected() {
        for raw in [
            r#"{"facts": "not a list"}"#,
            r#"{"items": []}"#,
            r#"{"facts": [], "extra": 1}"#,
            "```json\n{\"facts\": []}\n```",
            "",
        ] {
            let parsed = parse_structured::<Facts>(raw);
            assert!(
                matches!(parsed, Err(LlmError::MalformedResponse(_))),
                "accepted {raw:?}"
            );
        }
    }

    #[test]
    fn base_url_gets_trailing_slash_so_paths_join() {
        let client = OpenAiClient::new("http://localhost:8080/v1", Some("key".to_string()))
            .expect("url should parse");
        let joined = client.base_url().join("chat/completions").expect("join");
        assert_eq!(joined.as_str(), "http://localhost:8080/v1/chat/completions");
    }

    #[tokio::test]
    async fn missing_api_key_fails_before_any_request() {
        let client = OpenAiClient::new(DEFAULT_BASE_URL, Some("   ".to_string())).expect("url");
        let result = client.create_embedding("text-embedding-3-small", "hello").await;
        assert!(matches!(result, Err(LlmError::MissingApiKey(_))));
    }

    #[test]
    fn schema_lists_key_as_required() {
        let schema = string_list_schema("matching_tags", "tags");
        assert_eq!(schema.schema["required"][0], "tags");
        assert_eq!(schema.schema["properties"]["tags"]["type"], "array");
    }

    #[test]
    fn system_prompt_is_read_from_first_message() {
        let request = CompletionRequest {
            model: "m".to_string(),
            temperature: None,
            messages: vec![PromptMessage::system("rules"), PromptMessage::user("hi")],
            response_schema: None,
        };
        assert_eq!(request.system_prompt(), Some("rules"));
    }
}
