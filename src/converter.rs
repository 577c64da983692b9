//! `Converter` external interface: HTML → Markdown (spec §4.11, §6).
//!
//! Three selectable strategies (`--conversion default|readability|custom`).
//! `convert` is idempotent and never touches the filesystem.

use async_trait::async_trait;
use readability_js::{Readability, ReadabilityError, ReadabilityOptions};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::llm::{InvokeOptions, LLMProvider, CALL_SITE_CONVERSION_OPTIMIZER};

/// Output of a conversion: the markdown body plus an optional extracted title.
#[derive(Debug, Clone)]
pub struct ConvertedContent {
    pub markdown: String,
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("readability extraction failed for {url}: {source}")]
    Readability { url: String, source: ReadabilityError },
    #[error("custom converter command failed: {0}")]
    Custom(String),
}

#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, html: &str, url: &str) -> Result<ConvertedContent, ConvertError>;
}

/// Straight HTML → Markdown with no content extraction; keeps the whole
/// document body.
pub struct DefaultConverter;

#[async_trait]
impl Converter for DefaultConverter {
    async fn convert(&self, html: &str, _url: &str) -> Result<ConvertedContent, ConvertError> {
        let html = html.to_string();
        let markdown = tokio::task::spawn_blocking(move || html2md::parse_html(&html))
            .await
            .map_err(|e| ConvertError::Custom(format!("conversion task panicked: {e}")))?;
        Ok(ConvertedContent { markdown, title: None })
    }
}

/// Readability-based main-content extraction, then HTML → Markdown.
pub struct ReadabilityConverter {
    readability: Readability,
}

impl ReadabilityConverter {
    pub fn new() -> Result<Self, ReadabilityError> {
        Ok(Self { readability: Readability::new()? })
    }
}

#[async_trait]
impl Converter for ReadabilityConverter {
    async fn convert(&self, html: &str, url: &str) -> Result<ConvertedContent, ConvertError> {
        let article = match self.readability.parse_with_url(html, url) {
            Ok(article) => article,
            Err(ReadabilityError::ReadabilityCheckFailed) => {
                let options = ReadabilityOptions::new()
                    .char_threshold(0)
                    .nb_top_candidates(10)
                    .link_density_modifier(2.0);
                self.readability
                    .parse_with_options(html, Some(url), Some(options))
                    .map_err(|source| ConvertError::Readability { url: url.to_string(), source })?
            }
            Err(source) => return Err(ConvertError::Readability { url: url.to_string(), source }),
        };

        let markdown = html2md::parse_html(&article.content);
        let title = if article.title.trim().is_empty() { None } else { Some(article.title) };
        Ok(ConvertedContent { markdown, title })
    }
}

/// Invokes an external command with the raw HTML on stdin and the resulting
/// Markdown on stdout, for sites whose structure needs bespoke handling.
pub struct CustomConverter {
    pub program: String,
    pub args: Vec<String>,
}

#[async_trait]
impl Converter for CustomConverter {
    async fn convert(&self, html: &str, url: &str) -> Result<ConvertedContent, ConvertError> {
        use tokio::io::AsyncWriteExt;
        use tokio::process::Command;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .env("WEBSITE_FETCH_URL", url)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .spawn()
            .map_err(|e| ConvertError::Custom(format!("spawn {}: {e}", self.program)))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| ConvertError::Custom("missing stdin".to_string()))?;
            stdin
                .write_all(html.as_bytes())
                .await
                .map_err(|e| ConvertError::Custom(format!("write stdin: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ConvertError::Custom(format!("wait for {}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(ConvertError::Custom(format!("{} exited with {}", self.program, output.status)));
        }

        let markdown = String::from_utf8(output.stdout)
            .map_err(|e| ConvertError::Custom(format!("non-UTF8 output: {e}")))?;
        Ok(ConvertedContent { markdown, title: None })
    }
}

/// Wraps another converter with an LLM cleanup pass over its markdown
/// output (`--optimize-conversion`). Falls back to the inner converter's
/// unmodified output if the LLM call fails.
pub struct OptimizingConverter {
    pub inner: Box<dyn Converter>,
    pub provider: std::sync::Arc<dyn LLMProvider>,
}

impl OptimizingConverter {
    pub fn new(inner: Box<dyn Converter>, provider: std::sync::Arc<dyn LLMProvider>) -> Self {
        Self { inner, provider }
    }
}

#[async_trait]
impl Converter for OptimizingConverter {
    async fn convert(&self, html: &str, url: &str) -> Result<ConvertedContent, ConvertError> {
        let mut converted = self.inner.convert(html, url).await?;

        let prompt = format!(
            "Clean up the following Markdown extracted from {url}. Remove navigation \
             boilerplate, fix broken formatting, and keep the original meaning and \
             structure. Return only the cleaned Markdown.\n\n{}",
            converted.markdown
        );
        let opts = InvokeOptions { call_site: CALL_SITE_CONVERSION_OPTIMIZER };
        match self.provider.invoke(&prompt, &opts).await {
            Ok(optimized) if !optimized.trim().is_empty() => converted.markdown = optimized,
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, url, "conversion optimizer failed, keeping unoptimized markdown"),
        }

        Ok(converted)
    }
}

/// Stable content-addressed id for a page, used by the agent crawler and
/// index generators that need a filesystem-safe key.
pub fn page_id_from_normalized_url(normalized_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized_url.as_bytes());
    format!("p_{}", hex::encode(hasher.finalize()))
}
