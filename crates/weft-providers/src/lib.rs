use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use weft_types::{ChatMessage, MessageRole, TokenUsage, ToolCall, ToolSchema};

/// Per-provider endpoint configuration for the HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderEndpoint {
    pub api_key: Option<String>,
    pub url: Option<String>,
}

/// The classified outcome of one Model Client call.
#[derive(Debug, Clone)]
pub enum ModelResponse {
    /// The model produced a final assistant answer.
    Final { text: String, usage: TokenUsage },
    /// The model requested tool invocations.
    ToolCalls {
        calls: Vec<ToolCall>,
        usage: TokenUsage,
    },
}

#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
}

/// The pluggable LLM transport. The client owns provider wire formats and
/// tool-call parsing; the core treats it as a black box.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        opts: &CallOptions,
    ) -> anyhow::Result<ModelResponse>;
}

/// Provider prefix of a `provider:model` string; `"unknown"` when the string
/// carries no prefix.
pub fn provider_of(model: &str) -> &str {
    model.split_once(':').map(|(p, _)| p).unwrap_or("unknown")
}

/// Model id without the provider prefix.
pub fn model_id_of(model: &str) -> &str {
    model.split_once(':').map(|(_, m)| m).unwrap_or(model)
}

/// OpenAI-compatible chat-completions client. One endpoint entry per
/// provider prefix; the bare model id goes on the wire.
pub struct HttpModelClient {
    endpoints: HashMap<String, ProviderEndpoint>,
    client: Client,
}

impl HttpModelClient {
    pub fn new(endpoints: HashMap<String, ProviderEndpoint>) -> Self {
        Self {
            endpoints,
            client: Client::new(),
        }
    }

    fn endpoint_for(&self, provider: &str) -> anyhow::Result<(String, Option<String>)> {
        let Some(entry) = self.endpoints.get(provider) else {
            anyhow::bail!(
                "provider `{}` is not configured. configured providers: {}",
                provider,
                self.endpoints.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        };
        let base = entry
            .url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());
        let api_key = entry
            .api_key
            .clone()
            .filter(|key| !is_placeholder_api_key(key))
            .or_else(|| env_api_key_for_provider(provider));
        Ok((normalize_base(&base), api_key))
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn call(
        &self,
        model: &str,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        opts: &CallOptions,
    ) -> anyhow::Result<ModelResponse> {
        let provider = provider_of(model);
        let (base_url, api_key) = self.endpoint_for(provider)?;
        let url = format!("{}/chat/completions", base_url);

        let mut body = json!({
            "model": model_id_of(model),
            "messages": wire_messages(messages),
            "stream": false,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(wire_tool).collect());
        }
        if let Some(temperature) = opts.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = opts.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let mut req = self.client.post(url).json(&body);
        if let Some(api_key) = &api_key {
            req = req.bearer_auth(api_key);
        }
        let response = req.send().await?;
        let status = response.status();
        let value: Value = response.json().await?;

        if !status.is_success() {
            let detail = extract_error(&value)
                .unwrap_or_else(|| format!("provider request failed with status {}", status));
            anyhow::bail!(detail);
        }
        if let Some(detail) = extract_error(&value) {
            anyhow::bail!(detail);
        }

        parse_completion(&value, model)
    }
}

/// Fallback client used when no provider is configured; echoes the last user
/// message so local smoke runs still produce turns.
pub struct EchoModelClient;

#[async_trait]
impl ModelClient for EchoModelClient {
    async fn call(
        &self,
        _model: &str,
        messages: &[ChatMessage],
        _tools: &[ToolSchema],
        _opts: &CallOptions,
    ) -> anyhow::Result<ModelResponse> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(ModelResponse::Final {
            text: format!("Echo: {last_user}"),
            usage: TokenUsage::default(),
        })
    }
}

fn wire_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut row = json!({
                "role": m.role.as_str(),
                "content": m.content,
            });
            if let Some(id) = &m.tool_call_id {
                row["tool_call_id"] = json!(id);
            }
            if let Some(calls) = &m.tool_calls {
                row["tool_calls"] = Value::Array(
                    calls
                        .iter()
                        .map(|call| {
                            json!({
                                "id": call.id,
                                "type": "function",
                                "function": {
                                    "name": call.name,
                                    "arguments": call.arguments.to_string(),
                                },
                            })
                        })
                        .collect(),
                );
            }
            row
        })
        .collect()
}

fn wire_tool(tool: &ToolSchema) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

fn parse_completion(value: &Value, model: &str) -> anyhow::Result<ModelResponse> {
    let usage = parse_usage(value);
    let Some(message) = value
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
    else {
        anyhow::bail!(
            "provider returned no completion content for model `{}` (response: {})",
            model,
            truncate_for_error(&value.to_string(), 500)
        );
    };

    if let Some(calls) = message.get("tool_calls").and_then(|v| v.as_array()) {
        if !calls.is_empty() {
            let calls = calls
                .iter()
                .filter_map(parse_tool_call)
                .collect::<Vec<_>>();
            if !calls.is_empty() {
                return Ok(ModelResponse::ToolCalls { calls, usage });
            }
        }
    }

    let text = message
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    Ok(ModelResponse::Final { text, usage })
}

fn parse_tool_call(raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = match function.get("arguments") {
        Some(Value::String(raw_args)) => {
            serde_json::from_str(raw_args).unwrap_or(Value::String(raw_args.clone()))
        }
        Some(other) => other.clone(),
        None => Value::Null,
    };
    Some(ToolCall {
        id: raw
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        name,
        arguments,
    })
}

fn parse_usage(value: &Value) -> TokenUsage {
    let usage = value.get("usage");
    TokenUsage {
        input_tokens: usage
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        output_tokens: usage
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        total_cost: usage
            .and_then(|u| u.get("total_cost"))
            .and_then(|v| v.as_f64()),
    }
}

fn extract_error(value: &Value) -> Option<String> {
    value
        .get("error")
        .map(|err| {
            err.get("message")
                .and_then(|m| m.as_str())
                .map(|m| m.to_string())
                .unwrap_or_else(|| err.to_string())
        })
        .filter(|detail| !detail.is_empty())
}

fn truncate_for_error(raw: &str, max: usize) -> String {
    if raw.chars().count() <= max {
        return raw.to_string();
    }
    let truncated: String = raw.chars().take(max).collect();
    format!("{truncated}…")
}

fn default_base_url(provider: &str) -> &'static str {
    match provider {
        "openai" => "https://api.openai.com/v1",
        "anthropic" => "https://api.anthropic.com/v1",
        "google" => "https://generativelanguage.googleapis.com/v1beta/openai",
        "zai" => "https://api.z.ai/api/paas/v4",
        _ => "http://127.0.0.1:11434/v1",
    }
}

fn normalize_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

fn is_placeholder_api_key(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("x")
        || trimmed.eq_ignore_ascii_case("placeholder")
}

fn env_api_key_for_provider(provider: &str) -> Option<String> {
    let env_name = match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "google" => Some("GOOGLE_API_KEY"),
        "zai" => Some("ZAI_API_KEY"),
        _ => None,
    }?;
    std::env::var(env_name)
        .ok()
        .filter(|v| !v.trim().is_empty())
}
