//! OpenAI-compatible chat completions provider.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use tidebot_config::ProviderConfig;
use tidebot_tools::ToolDefinition;

use super::types::{ChatMessage, ChatOptions, LlmResponse, Role, ToolCall};
use super::{LlmError, LlmProvider};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, base_url: Option<String>) -> Self {
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
            .trim_end_matches('/')
            .to_string();
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url,
        }
    }

    /// Build a provider from config, resolving the API key from the
    /// environment when the config has none.
    pub fn from_config(config: &ProviderConfig) -> Result<Self, LlmError> {
        let api_key = config.resolved_api_key().ok_or_else(|| {
            LlmError::NotConfigured(
                "no API key (set provider.api_key or OPENAI_API_KEY)".to_string(),
            )
        })?;
        Ok(Self::new(api_key, config.api_base.clone()))
    }
}

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAiFunction,
}

#[derive(Debug, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: OpenAiFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct OpenAiFunctionCall {
    name: String,
    /// JSON-encoded argument object.
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
}

fn to_wire_messages(messages: &[ChatMessage]) -> Vec<OpenAiMessage> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };
            let tool_calls = (!m.tool_calls.is_empty()).then(|| {
                m.tool_calls
                    .iter()
                    .map(|c| OpenAiToolCall {
                        id: c.id.clone(),
                        call_type: function_type(),
                        function: OpenAiFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.to_string(),
                        },
                    })
                    .collect()
            });
            // Assistant turns that only call tools carry null content.
            let content = if m.content.is_empty() && tool_calls.is_some() {
                None
            } else {
                Some(m.content.clone())
            };
            OpenAiMessage {
                role: role.to_string(),
                content,
                tool_call_id: m.tool_call_id.clone(),
                name: m.name.clone(),
                tool_calls,
            }
        })
        .collect()
}

fn to_wire_tools(tools: &[ToolDefinition]) -> Option<Vec<OpenAiTool>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| OpenAiTool {
                tool_type: "function",
                function: OpenAiFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect(),
    )
}

fn parse_response(response: OpenAiResponse) -> Result<LlmResponse, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("no choices in response".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            let arguments = if c.function.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&c.function.arguments).unwrap_or_else(|e| {
                    warn!(tool = %c.function.name, "Unparseable tool arguments: {e}");
                    serde_json::json!({})
                })
            };
            ToolCall {
                id: c.id,
                name: c.function.name,
                arguments,
            }
        })
        .collect();

    Ok(LlmResponse {
        content: choice.message.content,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        options: &ChatOptions,
    ) -> Result<LlmResponse, LlmError> {
        let tools = to_wire_tools(tools);
        let request = OpenAiRequest {
            model: options.model.clone(),
            messages: to_wire_messages(messages),
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            tool_choice: tools.as_ref().map(|_| "auto"),
            tools,
        };

        debug!(model = %options.model, messages = messages.len(), "Chat completion request");
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenAiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: OpenAiResponse = response.json().await?;
        parse_response(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_messages_carry_tool_calls() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "read_file".into(),
            arguments: json!({"path": "a.txt"}),
        };
        let messages = vec![
            ChatMessage::system("sys"),
            ChatMessage::user("read a.txt"),
            ChatMessage::assistant_with_tools("", vec![call]),
            ChatMessage::tool_result("call_1", "read_file", "hello"),
        ];
        let wire = serde_json::to_value(to_wire_messages(&messages)).unwrap();

        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[2]["role"], "assistant");
        assert!(wire[2]["content"].is_null());
        assert_eq!(wire[2]["tool_calls"][0]["type"], "function");
        assert_eq!(
            wire[2]["tool_calls"][0]["function"]["arguments"],
            r#"{"path":"a.txt"}"#
        );
        assert_eq!(wire[3]["role"], "tool");
        assert_eq!(wire[3]["tool_call_id"], "call_1");
        assert_eq!(wire[3]["content"], "hello");
        assert!(wire[1].get("tool_calls").is_none());
    }

    #[test]
    fn test_no_tools_omits_tool_fields() {
        assert!(to_wire_tools(&[]).is_none());
        let tools = to_wire_tools(&[ToolDefinition {
            name: "exec".into(),
            description: "run".into(),
            parameters: json!({"type": "object"}),
        }])
        .unwrap();
        let wire = serde_json::to_value(&tools).unwrap();
        assert_eq!(wire[0]["type"], "function");
        assert_eq!(wire[0]["function"]["name"], "exec");
    }

    #[test]
    fn test_parse_response_with_tool_calls() {
        let raw = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [
                        {"id": "c1", "type": "function",
                         "function": {"name": "list_dir", "arguments": "{\"path\":\".\"}"}},
                        {"id": "c2", "type": "function",
                         "function": {"name": "exec", "arguments": "not json"}}
                    ]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let parsed = parse_response(serde_json::from_value(raw).unwrap()).unwrap();
        assert!(parsed.content.is_none());
        assert_eq!(parsed.tool_calls.len(), 2);
        assert_eq!(parsed.tool_calls[0].arguments, json!({"path": "."}));
        assert_eq!(parsed.tool_calls[1].arguments, json!({}));
        assert_eq!(parsed.finish_reason.as_deref(), Some("tool_calls"));
    }

    #[test]
    fn test_parse_response_without_choices() {
        let parsed = parse_response(serde_json::from_value(json!({"choices": []})).unwrap());
        assert!(matches!(parsed, Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn test_from_config_trims_base_url() {
        let provider = OpenAiProvider::from_config(&ProviderConfig {
            api_key: Some("sk-test".into()),
            api_base: Some("https://openrouter.ai/api/v1/".into()),
        })
        .unwrap();
        assert_eq!(provider.base_url, "https://openrouter.ai/api/v1");
    }
}
