//! Index and aggregation generators (spec §6: "Optional `INDEX.md` and
//! `aggregated.md` at the output root... not part of the core").
//!
//! Both operate purely on already-written `FetchedPage`s; neither touches
//! the fetch pipeline. `write_index` recognizes the `index-generator` call
//! site when a provider is supplied, and degrades to a plain listing
//! without one.

use std::path::{Path, PathBuf};

use crate::llm::{InvokeOptions, LLMProvider, CALL_SITE_INDEX_GENERATOR};
use crate::model::FetchedPage;
use crate::output::{url_to_file_path, OutputLayout};

pub async fn write_index(
    pages: &[FetchedPage],
    output_dir: &Path,
    layout: OutputLayout,
    provider: Option<&dyn LLMProvider>,
) -> std::io::Result<PathBuf> {
    let mut sorted: Vec<&FetchedPage> = pages.iter().collect();
    sorted.sort_by(|a, b| a.url.cmp(&b.url));

    let mut body = String::from("# Index\n\n");

    if let Some(provider) = provider {
        match summarize(provider, &sorted).await {
            Ok(overview) => {
                body.push_str(overview.trim());
                body.push_str("\n\n");
            }
            Err(e) => {
                tracing::warn!(error = %e, "index generator failed, writing plain listing");
            }
        }
    }

    for page in &sorted {
        let rel = url_to_file_path(&page.url, layout);
        let title = page.title.clone().unwrap_or_else(|| page.url.clone());
        body.push_str(&format!("- [{}]({}) — {}\n", title, rel.display(), page.url));
    }

    let path = output_dir.join("INDEX.md");
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

async fn summarize(provider: &dyn LLMProvider, pages: &[&FetchedPage]) -> Result<String, crate::errors::LlmError> {
    let mut listing = String::new();
    for page in pages {
        listing.push_str(&format!("- {} ({})\n", page.url, page.title.clone().unwrap_or_default()));
    }
    let prompt = format!(
        "The following pages were crawled from a single site. Write a short overview \
         (3-5 sentences) of what the site covers, for a reader skimming the index:\n\n{listing}"
    );
    let opts = InvokeOptions { call_site: CALL_SITE_INDEX_GENERATOR };
    provider.invoke(&prompt, &opts).await
}

pub async fn write_aggregated(pages: &[FetchedPage], output_dir: &Path) -> std::io::Result<PathBuf> {
    let mut sorted: Vec<&FetchedPage> = pages.iter().collect();
    sorted.sort_by(|a, b| a.url.cmp(&b.url));

    let mut body = String::new();
    for page in sorted {
        let title = page.title.clone().unwrap_or_else(|| page.url.clone());
        body.push_str(&format!("# {title}\n\nSource: {}\n\n{}\n\n---\n\n", page.url, page.markdown));
    }

    let path = output_dir.join("aggregated.md");
    tokio::fs::write(&path, body).await?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LlmError;
    use crate::llm::{LLMProvider, ToolLoopResponse, ToolMessage, ToolSpec};
    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Value;
    use std::collections::HashMap;

    fn page(url: &str, title: &str, markdown: &str) -> FetchedPage {
        FetchedPage {
            url: url.to_string(),
            html: String::new(),
            status_code: 200,
            headers: HashMap::new(),
            fetched_at: Utc::now(),
            markdown: markdown.to_string(),
            title: Some(title.to_string()),
            depth: 0,
        }
    }

    struct StubProvider;

    #[async_trait]
    impl LLMProvider for StubProvider {
        async fn invoke(&self, _prompt: &str, _opts: &InvokeOptions) -> Result<String, LlmError> {
            Ok("This site covers two pages.".to_string())
        }
        async fn invoke_structured(&self, _prompt: &str, _schema: &Value, _opts: &InvokeOptions) -> Result<Value, LlmError> {
            unimplemented!()
        }
        async fn invoke_with_tools(
            &self,
            _messages: &[ToolMessage],
            _tools: &[ToolSpec],
            _opts: &InvokeOptions,
        ) -> Result<ToolLoopResponse, LlmError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn plain_index_lists_every_page_sorted_by_url() {
        let pages = vec![page("https://ex.com/b", "B", "b body"), page("https://ex.com/a", "A", "a body")];
        let tmp = tempfile::tempdir().unwrap();
        let path = write_index(&pages, tmp.path(), OutputLayout::Mirror, None).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let a_pos = contents.find("https://ex.com/a").unwrap();
        let b_pos = contents.find("https://ex.com/b").unwrap();
        assert!(a_pos < b_pos);
    }

    #[tokio::test]
    async fn index_with_provider_prepends_overview() {
        let pages = vec![page("https://ex.com/a", "A", "a body")];
        let tmp = tempfile::tempdir().unwrap();
        let path = write_index(&pages, tmp.path(), OutputLayout::Mirror, Some(&StubProvider)).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("This site covers two pages."));
    }

    #[tokio::test]
    async fn aggregated_file_concatenates_every_page_markdown() {
        let pages = vec![page("https://ex.com/a", "A", "alpha content"), page("https://ex.com/b", "B", "beta content")];
        let tmp = tempfile::tempdir().unwrap();
        let path = write_aggregated(&pages, tmp.path()).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("alpha content"));
        assert!(contents.contains("beta content"));
    }
}
