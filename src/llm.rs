//! `LLMProvider` interface and call-site configuration (spec §4.11, §6).
//!
//! This is the seam the spec calls out as an external collaborator: the
//! smart and agent crawlers depend only on this trait, never on a concrete
//! provider.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::LlmError;

/// Recognized call-site keys (spec §6). Each selects a per-site config
/// override (model, temperature, etc.) on top of the defaults.
pub const CALL_SITE_LINK_CLASSIFIER: &str = "link-classifier";
pub const CALL_SITE_LINK_CLASSIFIER_PER_LINK: &str = "link-classifier-per-link";
pub const CALL_SITE_CONVERSION_STRATEGY_SELECTOR: &str = "conversion-strategy-selector";
pub const CALL_SITE_CONVERSION_OPTIMIZER: &str = "conversion-optimizer";
pub const CALL_SITE_AGENT_ROUTER: &str = "agent-router";
pub const CALL_SITE_PAGE_SUMMARIZER: &str = "page-summarizer";
pub const CALL_SITE_INDEX_GENERATOR: &str = "index-generator";

/// Resolved settings for one invocation, after merging defaults with any
/// per-call-site override.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
    pub max_retries: u32,
}

/// One entry of the LLM config JSON file (`defaults` or a `callSites` value).
/// All fields optional so a call-site override can patch just one field.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallSiteSettings {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    #[serde(rename = "maxTokens")]
    pub max_tokens: Option<u32>,
    /// Seconds.
    pub timeout: Option<u64>,
    #[serde(rename = "maxRetries")]
    pub max_retries: Option<u32>,
}

/// The LLM config file shape (spec §6): `{defaults, callSites?}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub defaults: CallSiteSettings,
    #[serde(rename = "callSites", default)]
    pub call_sites: HashMap<String, CallSiteSettings>,
}

impl LlmConfig {
    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Merges `defaults` with the override for `call_site`, if any. Unknown
    /// call sites fall through to defaults (spec §4.11).
    pub fn resolve(&self, call_site: &str) -> ResolvedSettings {
        let overrides = self.call_sites.get(call_site);
        let provider = pick(overrides.and_then(|o| o.provider.clone()), self.defaults.provider.clone())
            .unwrap_or_else(|| "openai".to_string());
        let model = pick(overrides.and_then(|o| o.model.clone()), self.defaults.model.clone())
            .unwrap_or_else(|| "gpt-4.1".to_string());
        let temperature = pick(overrides.and_then(|o| o.temperature), self.defaults.temperature).unwrap_or(0.0);
        let max_tokens = pick(overrides.and_then(|o| o.max_tokens), self.defaults.max_tokens);
        let timeout_secs = pick(overrides.and_then(|o| o.timeout), self.defaults.timeout).unwrap_or(60);
        let max_retries = pick(overrides.and_then(|o| o.max_retries), self.defaults.max_retries).unwrap_or(2);

        ResolvedSettings {
            provider,
            model,
            temperature,
            max_tokens,
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        }
    }
}

fn pick<T>(override_value: Option<T>, default_value: Option<T>) -> Option<T> {
    override_value.or(default_value)
}

/// Per-invocation options. `call_site` selects the config override.
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    pub call_site: &'static str,
}

/// Schema for a tool the agent crawler exposes to the model (spec §4.10).
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// One turn of the agent's tool-loop conversation.
#[derive(Debug, Clone)]
pub enum ToolMessage {
    System(String),
    User(String),
    Assistant(String),
    ToolResult { call_id: String, name: String, output: String },
}

/// A tool invocation the model requested.
#[derive(Debug, Clone)]
pub struct ToolCall {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// Result of one agent-loop turn: either tool calls to execute, or a final
/// text response with none (loop termination per spec §4.10).
#[derive(Debug, Clone)]
pub struct ToolLoopResponse {
    pub tool_calls: Vec<ToolCall>,
    pub text: Option<String>,
}

/// The language-model provider seam. Smart and agent crawlers depend on
/// this trait only, never a concrete implementation.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn invoke(&self, prompt: &str, opts: &InvokeOptions) -> Result<String, LlmError>;

    async fn invoke_structured(&self, prompt: &str, schema: &Value, opts: &InvokeOptions) -> Result<Value, LlmError>;

    /// Drives one turn of a tool-calling conversation. Only the agent
    /// crawler uses this; providers that can't support tool calls should
    /// return `LlmError::UnsupportedProvider`.
    async fn invoke_with_tools(
        &self,
        messages: &[ToolMessage],
        tools: &[ToolSpec],
        opts: &InvokeOptions,
    ) -> Result<ToolLoopResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_through_to_defaults_for_unknown_call_site() {
        let config = LlmConfig {
            defaults: CallSiteSettings {
                provider: Some("openai".into()),
                model: Some("gpt-4.1".into()),
                temperature: Some(0.2),
                max_tokens: None,
                timeout: Some(30),
                max_retries: Some(1),
            },
            call_sites: HashMap::new(),
        };
        let resolved = config.resolve("unknown-call-site");
        assert_eq!(resolved.model, "gpt-4.1");
        assert_eq!(resolved.timeout, Duration::from_secs(30));
    }

    #[test]
    fn resolve_applies_call_site_override_on_top_of_defaults() {
        let mut call_sites = HashMap::new();
        call_sites.insert(
            CALL_SITE_LINK_CLASSIFIER.to_string(),
            CallSiteSettings {
                model: Some("gpt-4.1-mini".into()),
                ..Default::default()
            },
        );
        let config = LlmConfig {
            defaults: CallSiteSettings {
                provider: Some("openai".into()),
                model: Some("gpt-4.1".into()),
                temperature: Some(0.0),
                max_tokens: None,
                timeout: Some(60),
                max_retries: Some(2),
            },
            call_sites,
        };
        let resolved = config.resolve(CALL_SITE_LINK_CLASSIFIER);
        assert_eq!(resolved.model, "gpt-4.1-mini");
        assert_eq!(resolved.provider, "openai");
    }

    #[test]
    fn parses_config_file_json() {
        let json = r#"{
            "defaults": {"provider": "openai", "model": "gpt-4.1"},
            "callSites": {"page-summarizer": {"model": "gpt-4.1-mini", "timeout": 15}}
        }"#;
        let config = LlmConfig::from_json(json).unwrap();
        let resolved = config.resolve(CALL_SITE_PAGE_SUMMARIZER);
        assert_eq!(resolved.model, "gpt-4.1-mini");
        assert_eq!(resolved.timeout, Duration::from_secs(15));
    }
}
