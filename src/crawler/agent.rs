//! Agent Crawler: tool-loop driven crawl (spec §4.10).
//!
//! Unlike Simple/Smart, the frontier here is entirely the model's tool
//! calls — there is no shared BFS driver. `TempStorage` holds fetched-but-
//! undecided pages; a page becomes permanent only when `storePage` moves it
//! out.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::{json, Value};
use tracing::warn;
use url::Url;

use crate::converter::Converter;
use crate::fetcher::Fetcher;
use crate::link_extract::{self, LinkExtractOptions};
use crate::llm::{InvokeOptions, LLMProvider, ToolCall, ToolMessage, ToolSpec, CALL_SITE_AGENT_ROUTER, CALL_SITE_PAGE_SUMMARIZER};
use crate::model::{CrawlStats, FetchResult, FetchedPage, FetchedPageRaw, Link, SkippedPage};
use crate::output::OutputWriter;
use crate::url_canon;

use super::{CrawlObserver, NoopObserver};

const STEP_BUDGET_PER_TURN: usize = 10;
const SUMMARY_SOURCE_CHARS: usize = 8000;
const SUMMARY_FALLBACK_CHARS: usize = 500;

struct TempEntry {
    raw: FetchedPageRaw,
    markdown: String,
    title: Option<String>,
    summary: String,
    links: Vec<Link>,
}

pub async fn crawl(
    root_url: &str,
    description: &str,
    max_pages: usize,
    provider: &dyn LLMProvider,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
) -> FetchResult {
    crawl_with_observer(root_url, description, max_pages, provider, fetcher, converter, writer, &NoopObserver).await
}

pub async fn crawl_with_observer(
    root_url: &str,
    description: &str,
    max_pages: usize,
    provider: &dyn LLMProvider,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
    observer: &dyn CrawlObserver,
) -> FetchResult {
    let started_at = Instant::now();
    let mut temp: HashMap<String, TempEntry> = HashMap::new();
    let mut stored_pages: Vec<FetchedPage> = Vec::new();
    let mut skipped_pages: Vec<SkippedPage> = Vec::new();

    let mut messages = vec![
        ToolMessage::System(system_prompt(root_url, description, max_pages)),
        ToolMessage::User(format!("Begin crawling from {root_url}")),
    ];

    'turns: loop {
        if stored_pages.len() >= max_pages {
            break;
        }

        let response = match provider
            .invoke_with_tools(&messages, &tool_specs(), &InvokeOptions { call_site: CALL_SITE_AGENT_ROUTER })
            .await
        {
            Ok(response) => response,
            Err(err) => {
                let message = err.to_string();
                warn!(error = %message, "agent crawler LLM call failed");
                observer.on_error(root_url, &message);
                break;
            }
        };

        if response.tool_calls.is_empty() {
            // Model returned a plain text response with no tool calls: terminate.
            break;
        }

        for call in response.tool_calls.into_iter().take(STEP_BUDGET_PER_TURN) {
            let done_requested = call.name == "done";
            let output = execute_tool(
                &call,
                root_url,
                max_pages,
                fetcher,
                converter,
                writer,
                provider,
                &mut temp,
                &mut stored_pages,
                &mut skipped_pages,
                observer,
            )
            .await;

            messages.push(ToolMessage::ToolResult { call_id: call.call_id.clone(), name: call.name.clone(), output });

            if done_requested {
                break 'turns;
            }
            if stored_pages.len() >= max_pages {
                break 'turns;
            }
        }
    }

    for (url, entry) in temp.into_iter() {
        let _ = entry;
        skipped_pages.push(SkippedPage { url, reason: "Fetched but not stored".to_string() });
    }

    let stats = CrawlStats {
        total_pages: stored_pages.len(),
        total_skipped: skipped_pages.len(),
        duration: started_at.elapsed(),
    };

    FetchResult {
        pages: stored_pages,
        skipped: skipped_pages,
        output_path: std::path::PathBuf::new(),
        stats,
        index_path: None,
        single_file_path: None,
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_tool(
    call: &ToolCall,
    root_url: &str,
    max_pages: usize,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    writer: &dyn OutputWriter,
    provider: &dyn LLMProvider,
    temp: &mut HashMap<String, TempEntry>,
    stored_pages: &mut Vec<FetchedPage>,
    skipped_pages: &mut Vec<SkippedPage>,
    observer: &dyn CrawlObserver,
) -> String {
    let _ = root_url;
    match call.name.as_str() {
        "fetchPage" => fetch_page_tool(call, fetcher, converter, provider, temp).await,
        "storePage" => store_page_tool(call, max_pages, writer, temp, stored_pages, observer).await,
        "markIrrelevant" => mark_irrelevant_tool(call, temp, skipped_pages, observer),
        "getLinks" => get_links_tool(call, temp),
        "done" => format!("Crawl complete: {} pages stored", stored_pages.len()),
        other => format!("Unknown tool: {other}"),
    }
}

fn arg_url(call: &ToolCall) -> Option<String> {
    call.arguments.get("url").and_then(Value::as_str).map(str::to_string)
}

async fn fetch_page_tool(
    call: &ToolCall,
    fetcher: &Fetcher,
    converter: &dyn Converter,
    provider: &dyn LLMProvider,
    temp: &mut HashMap<String, TempEntry>,
) -> String {
    let Some(url) = arg_url(call) else {
        return "Missing required argument: url".to_string();
    };
    let canonical = url_canon::canonicalize(&url).to_string();

    if let Some(entry) = temp.get(&canonical) {
        return format!("Page already fetched: {}", entry.summary);
    }

    let raw = match fetcher.fetch(&url).await {
        Ok(raw) => raw,
        Err(err) => return format!("Failed to fetch page: {err}"),
    };

    let converted = match converter.convert(&raw.html, &raw.url).await {
        Ok(content) => content,
        Err(err) => return format!("Failed to fetch page: {err}"),
    };

    let links = extract_links(&raw.url, &raw.html);
    let summary = summarize(provider, &converted.markdown).await;

    temp.insert(
        canonical,
        TempEntry { raw, markdown: converted.markdown, title: converted.title, summary: summary.clone(), links },
    );

    format!("Page fetched successfully: {summary}")
}

async fn summarize(provider: &dyn LLMProvider, markdown: &str) -> String {
    let truncated: String = markdown.chars().take(SUMMARY_SOURCE_CHARS).collect();
    let prompt = format!("Summarize the following page content in 2-3 sentences:\n\n{truncated}");
    let opts = InvokeOptions { call_site: CALL_SITE_PAGE_SUMMARIZER };
    match provider.invoke(&prompt, &opts).await {
        Ok(summary) => summary,
        Err(_) => {
            let fallback: String = markdown.chars().take(SUMMARY_FALLBACK_CHARS).collect();
            format!("{fallback}...")
        }
    }
}

fn extract_links(base_url: &str, html: &str) -> Vec<Link> {
    let Ok(base) = Url::parse(base_url) else {
        return Vec::new();
    };
    link_extract::extract_links(html, &base, &LinkExtractOptions::default())
}

async fn store_page_tool(
    call: &ToolCall,
    max_pages: usize,
    writer: &dyn OutputWriter,
    temp: &mut HashMap<String, TempEntry>,
    stored_pages: &mut Vec<FetchedPage>,
    observer: &dyn CrawlObserver,
) -> String {
    let Some(url) = arg_url(call) else {
        return "Missing required argument: url".to_string();
    };
    let canonical = url_canon::canonicalize(&url).to_string();

    let Some(entry) = temp.get(&canonical) else {
        return "Page not found in temporary storage — must fetch it first".to_string();
    };

    if stored_pages.len() >= max_pages {
        return format!("Cannot store page: maxPages budget of {max_pages} already reached");
    }

    let page = FetchedPage::from_raw(entry.raw.clone(), entry.markdown.clone(), entry.title.clone(), 0);
    if let Err(err) = writer.write_page(&page).await {
        return format!("Failed to store page: {err}");
    }

    let links = entry.links.clone();
    temp.remove(&canonical);
    stored_pages.push(page.clone());
    observer.on_page_fetched(&page);

    format!(
        "Page stored ({}/{} pages). Links on this page: {}",
        stored_pages.len(),
        max_pages,
        format_links(&links)
    )
}

fn mark_irrelevant_tool(
    call: &ToolCall,
    temp: &mut HashMap<String, TempEntry>,
    skipped_pages: &mut Vec<SkippedPage>,
    observer: &dyn CrawlObserver,
) -> String {
    let Some(url) = arg_url(call) else {
        return "Missing required argument: url".to_string();
    };
    let canonical = url_canon::canonicalize(&url).to_string();

    let Some(entry) = temp.remove(&canonical) else {
        return "Page not found in temporary storage — must fetch it first".to_string();
    };

    let skip = SkippedPage { url: canonical, reason: "irrelevant".to_string() };
    observer.on_page_skipped(&skip);
    let links = entry.links.clone();
    skipped_pages.push(skip);

    format!("Marked irrelevant. Links on this page: {}", format_links(&links))
}

fn get_links_tool(call: &ToolCall, temp: &HashMap<String, TempEntry>) -> String {
    let Some(url) = arg_url(call) else {
        return "Missing required argument: url".to_string();
    };
    let canonical = url_canon::canonicalize(&url).to_string();

    match temp.get(&canonical) {
        Some(entry) => format_links(&entry.links),
        None => "Page not found in temporary storage — must fetch it first".to_string(),
    }
}

fn format_links(links: &[Link]) -> String {
    if links.is_empty() {
        return "(none)".to_string();
    }
    links.iter().map(|l| format!("{} ({})", l.url, l.text)).collect::<Vec<_>>().join(", ")
}

fn system_prompt(root_url: &str, description: &str, max_pages: usize) -> String {
    format!(
        "You are crawling the web starting from {root_url} to accomplish this goal: {description}\n\
         You may store at most {max_pages} pages. Use fetchPage to retrieve a page, storePage to \
         keep it, markIrrelevant to discard it, getLinks to inspect its outbound links, and done \
         when the crawl goal is satisfied."
    )
}

fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "fetchPage".to_string(),
            description: "Fetch a page and cache a summary of its content.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"],
            }),
        },
        ToolSpec {
            name: "storePage".to_string(),
            description: "Persist a previously fetched page as crawl output.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"],
            }),
        },
        ToolSpec {
            name: "markIrrelevant".to_string(),
            description: "Discard a previously fetched page as irrelevant to the crawl goal.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"],
            }),
        },
        ToolSpec {
            name: "getLinks".to_string(),
            description: "List the links extracted from a previously fetched page.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "url": { "type": "string" } },
                "required": ["url"],
            }),
        },
        ToolSpec {
            name: "done".to_string(),
            description: "Signal that the crawl is complete.".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        },
    ]
}
