//! OpenAI `LLMProvider` backed by the Responses API.
//!
//! Extends the plain text-completion shape with `text.format.json_schema`
//! for structured output and a `tools`/`function_call` loop for the agent
//! crawler.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::warn;

use crate::errors::LlmError;
use crate::llm::{InvokeOptions, LLMProvider, ResolvedSettings, ToolCall, ToolLoopResponse, ToolMessage, ToolSpec};

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    settings_by_call_site: Box<dyn Fn(&str) -> ResolvedSettings + Send + Sync>,
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        base_url: &str,
        settings_by_call_site: impl Fn(&str) -> ResolvedSettings + Send + Sync + 'static,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: responses_endpoint(base_url),
            api_key,
            settings_by_call_site: Box::new(settings_by_call_site),
        }
    }

    /// Sends `body`, retrying up to `max_retries` additional times on
    /// timeouts, network errors, and retryable HTTP statuses (429, 5xx).
    async fn post(&self, body: Value, timeout: Duration, max_retries: u32, call_site: &str) -> Result<Value, LlmError> {
        let attempts = max_retries.saturating_add(1);

        let mut last_err = None;
        for attempt in 0..attempts {
            match self.send_once(&body, timeout, call_site).await {
                Ok(value) => return Ok(value),
                Err((err, retryable)) => {
                    if !retryable || attempt + 1 >= attempts {
                        return Err(err);
                    }
                    warn!(call_site, attempt = attempt + 1, attempts, error = %err, "retrying OpenAI request");
                    sleep(Duration::from_millis(200) * 2u32.saturating_pow(attempt)).await;
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.expect("loop always runs at least once"))
    }

    /// Single HTTP round trip. The `bool` in the error tuple reports whether
    /// the caller should retry.
    async fn send_once(&self, body: &Value, timeout: Duration, call_site: &str) -> Result<Value, (LlmError, bool)> {
        let sent = tokio::time::timeout(timeout, self.client.post(&self.endpoint).bearer_auth(&self.api_key).json(body).send()).await;

        let response = match sent {
            Err(_) => return Err((LlmError::Timeout { call_site: call_site.to_string() }, true)),
            Ok(Err(e)) => return Err((LlmError::Invocation { call_site: call_site.to_string(), message: e.to_string() }, true)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| (LlmError::Invocation { call_site: call_site.to_string(), message: e.to_string() }, true))?;

        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
            let retryable = status.as_u16() == 429 || status.is_server_error();
            return Err((
                LlmError::Invocation { call_site: call_site.to_string(), message: format!("HTTP {status}: {message}") },
                retryable,
            ));
        }

        serde_json::from_str(&raw)
            .map_err(|e| (LlmError::Invocation { call_site: call_site.to_string(), message: format!("parse response: {e}") }, false))
    }
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(raw_json).ok()?;
    value.get("error")?.get("message")?.as_str().map(str::to_string)
}

#[async_trait]
impl LLMProvider for OpenAiProvider {
    async fn invoke(&self, prompt: &str, opts: &InvokeOptions) -> Result<String, LlmError> {
        let settings = (self.settings_by_call_site)(opts.call_site);
        let mut body = json!({
            "model": settings.model,
            "input": prompt,
            "text": { "format": { "type": "text" } },
            "store": false,
        });
        apply_sampling_params(&mut body, &settings);

        let value = self.post(body, settings.timeout, settings.max_retries, opts.call_site).await?;
        extract_output_text(&value)
            .ok_or_else(|| LlmError::Invocation { call_site: opts.call_site.to_string(), message: "empty output text".to_string() })
    }

    async fn invoke_structured(&self, prompt: &str, schema: &Value, opts: &InvokeOptions) -> Result<Value, LlmError> {
        let settings = (self.settings_by_call_site)(opts.call_site);
        let mut body = json!({
            "model": settings.model,
            "input": prompt,
            "text": {
                "format": {
                    "type": "json_schema",
                    "name": "structured_output",
                    "schema": schema,
                    "strict": true,
                }
            },
            "store": false,
        });
        apply_sampling_params(&mut body, &settings);

        let value = self.post(body, settings.timeout, settings.max_retries, opts.call_site).await?;
        let text = extract_output_text(&value)
            .ok_or_else(|| LlmError::Invocation { call_site: opts.call_site.to_string(), message: "empty output text".to_string() })?;
        serde_json::from_str(&text).map_err(|e| LlmError::Invocation {
            call_site: opts.call_site.to_string(),
            message: format!("structured output is not valid JSON: {e}"),
        })
    }

    async fn invoke_with_tools(
        &self,
        messages: &[ToolMessage],
        tools: &[ToolSpec],
        opts: &InvokeOptions,
    ) -> Result<ToolLoopResponse, LlmError> {
        let settings = (self.settings_by_call_site)(opts.call_site);
        let input = messages.iter().map(tool_message_to_item).collect::<Vec<_>>();
        let tool_defs = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters,
                })
            })
            .collect::<Vec<_>>();

        let mut body = json!({
            "model": settings.model,
            "input": input,
            "tools": tool_defs,
            "store": false,
        });
        apply_sampling_params(&mut body, &settings);

        let value = self.post(body, settings.timeout, settings.max_retries, opts.call_site).await?;
        Ok(extract_tool_loop_response(&value))
    }
}

fn apply_sampling_params(body: &mut Value, settings: &ResolvedSettings) {
    // GPT-5-family models reject sampling params; omit them for that family.
    if settings.model.starts_with("gpt-5") {
        return;
    }
    if let Some(obj) = body.as_object_mut() {
        obj.insert("temperature".to_owned(), json!(settings.temperature));
        if let Some(max_tokens) = settings.max_tokens {
            obj.insert("max_output_tokens".to_owned(), json!(max_tokens));
        }
    }
}

fn tool_message_to_item(message: &ToolMessage) -> Value {
    match message {
        ToolMessage::System(text) => json!({ "role": "system", "content": text }),
        ToolMessage::User(text) => json!({ "role": "user", "content": text }),
        ToolMessage::Assistant(text) => json!({ "role": "assistant", "content": text }),
        ToolMessage::ToolResult { call_id, output, .. } => json!({
            "type": "function_call_output",
            "call_id": call_id,
            "output": output,
        }),
    }
}

fn extract_output_text(value: &Value) -> Option<String> {
    let output = value.get("output")?.as_array()?;
    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(Value::as_array) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(Value::as_str) != Some("output_text") {
                continue;
            }
            if let Some(part_text) = part.get("text").and_then(Value::as_str) {
                text.push_str(part_text);
            }
        }
    }
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn extract_tool_loop_response(value: &Value) -> ToolLoopResponse {
    let mut tool_calls = Vec::new();
    if let Some(output) = value.get("output").and_then(Value::as_array) {
        for item in output {
            if item.get("type").and_then(Value::as_str) == Some("function_call") {
                let name = item.get("name").and_then(Value::as_str).unwrap_or_default().to_string();
                let call_id = item.get("call_id").and_then(Value::as_str).unwrap_or_default().to_string();
                let arguments = item
                    .get("arguments")
                    .and_then(Value::as_str)
                    .and_then(|s| serde_json::from_str(s).ok())
                    .unwrap_or(Value::Null);
                tool_calls.push(ToolCall { call_id, name, arguments });
            }
        }
    }
    let text = extract_output_text(value);
    ToolLoopResponse { tool_calls, text }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> OpenAiProvider {
        OpenAiProvider::new("test-key".to_string(), base_url, |_| ResolvedSettings {
            provider: "openai".to_string(),
            model: "gpt-4.1".to_string(),
            temperature: 0.0,
            max_tokens: None,
            timeout: Duration::from_secs(5),
            max_retries: 2,
        })
    }

    #[tokio::test]
    async fn retries_on_server_error_then_succeeds() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        Mock::given(method("POST"))
            .respond_with(move |_: &wiremock::Request| {
                if calls_clone.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(500).set_body_string("server error")
                } else {
                    ResponseTemplate::new(200).set_body_json(json!({
                        "output": [{ "type": "message", "content": [{ "type": "output_text", "text": "hi" }] }]
                    }))
                }
            })
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        let result = provider.invoke("hello", &InvokeOptions { call_site: "page-summarizer" }).await;
        assert_eq!(result.unwrap(), "hi");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_status() {
        let server = MockServer::start().await;
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);

        Mock::given(method("POST"))
            .respond_with(move |_: &wiremock::Request| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                ResponseTemplate::new(400).set_body_string("bad request")
            })
            .mount(&server)
            .await;

        let provider = provider(&server.uri());
        let result = provider.invoke("hello", &InvokeOptions { call_site: "page-summarizer" }).await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn responses_endpoint_strips_trailing_slash() {
        assert_eq!(responses_endpoint("https://api.openai.com/v1/"), "https://api.openai.com/v1/responses");
    }

    #[test]
    fn extracts_output_text_from_message_items() {
        let value = json!({
            "output": [
                { "type": "message", "content": [{ "type": "output_text", "text": "hello" }] }
            ]
        });
        assert_eq!(extract_output_text(&value), Some("hello".to_string()));
    }

    #[test]
    fn extracts_function_calls_from_output() {
        let value = json!({
            "output": [
                { "type": "function_call", "call_id": "c1", "name": "fetchPage", "arguments": "{\"url\":\"https://x\"}" }
            ]
        });
        let response = extract_tool_loop_response(&value);
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].name, "fetchPage");
        assert_eq!(response.tool_calls[0].arguments["url"], "https://x");
    }

    #[test]
    fn no_tool_calls_and_text_signals_loop_termination() {
        let value = json!({
            "output": [
                { "type": "message", "content": [{ "type": "output_text", "text": "done" }] }
            ]
        });
        let response = extract_tool_loop_response(&value);
        assert!(response.tool_calls.is_empty());
        assert_eq!(response.text, Some("done".to_string()));
    }
}
