//! Link Extractor (spec §4.2).

use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

use crate::model::Link;
use crate::url_canon::{self, GlobSet};

const CONTEXT_MAX_CHARS: usize = 200;
const BLOCK_ANCESTOR_TAGS: &[&str] = &["p", "li", "h1", "h2", "h3", "h4", "h5", "h6", "div"];

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("static selector"));

/// Options controlling link extraction, matching the CLI's `--include`/`--exclude`
/// and same-domain flags.
pub struct LinkExtractOptions {
    pub same_domain_only: bool,
    pub include: GlobSet,
    pub exclude: GlobSet,
    /// When set, a link's canonical path must start with this prefix
    /// (`--prefix`), independent of `include`/`exclude`.
    pub prefix: Option<String>,
}

impl Default for LinkExtractOptions {
    fn default() -> Self {
        Self {
            same_domain_only: true,
            include: GlobSet::new(&[]),
            exclude: GlobSet::new(&[]),
            prefix: None,
        }
    }
}

/// Extract links from `html`, resolved against `base_url`, deduped by
/// canonical URL with first occurrence winning.
pub fn extract_links(html: &str, base_url: &Url, opts: &LinkExtractOptions) -> Vec<Link> {
    let document = Html::parse_document(html);
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for anchor in document.select(&ANCHOR_SELECTOR) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let href_trimmed = href.trim();
        if href_trimmed.is_empty() || is_rejected_scheme(href_trimmed) {
            continue;
        }

        let Ok(resolved) = base_url.join(href_trimmed) else {
            continue;
        };
        let canonical = url_canon::canonicalize_url(&resolved);

        if opts.same_domain_only && !same_host_urls(base_url, &canonical) {
            continue;
        }
        if !opts.include.is_empty() && !opts.include.matches(canonical.path()) {
            continue;
        }
        if opts.exclude.matches(canonical.path()) {
            continue;
        }
        if let Some(prefix) = &opts.prefix {
            if !canonical.path().starts_with(prefix.as_str()) {
                continue;
            }
        }

        let canonical_str = canonical.to_string();
        if !seen.insert(canonical_str.clone()) {
            continue;
        }

        let text = anchor.text().collect::<String>().trim().to_string();
        let context = block_context(&anchor, &text);

        links.push(Link {
            url: canonical_str,
            text,
            context,
        });
    }

    links
}

fn is_rejected_scheme(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    lower.starts_with('#')
        || lower.starts_with("mailto:")
        || lower.starts_with("javascript:")
        || lower.starts_with("tel:")
}

fn same_host_urls(a: &Url, b: &Url) -> bool {
    a.host_str().map(str::to_ascii_lowercase) == b.host_str().map(str::to_ascii_lowercase)
}

fn block_context(anchor: &scraper::ElementRef, fallback_text: &str) -> String {
    let mut node = anchor.parent();
    while let Some(parent_node) = node {
        if let Some(el) = scraper::ElementRef::wrap(parent_node) {
            if BLOCK_ANCESTOR_TAGS.contains(&el.value().name()) {
                let text = el.text().collect::<String>();
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    return truncate_chars(trimmed, CONTEXT_MAX_CHARS);
                }
            }
        }
        node = parent_node.parent();
    }
    truncate_chars(fallback_text, CONTEXT_MAX_CHARS)
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/docs/intro").unwrap()
    }

    #[test]
    fn rejects_fragment_mailto_js_tel_links() {
        let html = r#"
            <a href="#top">a</a>
            <a href="mailto:x@y.com">b</a>
            <a href="javascript:void(0)">c</a>
            <a href="tel:+1234">d</a>
            <a href="/ok">e</a>
        "#;
        let links = extract_links(html, &base(), &LinkExtractOptions::default());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://example.com/ok");
    }

    #[test]
    fn dedups_by_canonical_url_first_occurrence_wins() {
        let html = r#"
            <a href="/a">First</a>
            <a href="/a/">Second</a>
        "#;
        let links = extract_links(html, &base(), &LinkExtractOptions::default());
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].text, "First");
    }

    #[test]
    fn same_domain_only_drops_cross_host() {
        let html = r#"<a href="https://other.com/x">x</a><a href="/y">y</a>"#;
        let links = extract_links(html, &base(), &LinkExtractOptions::default());
        assert_eq!(links.len(), 1);
        assert!(links[0].url.contains("example.com"));
    }

    #[test]
    fn include_patterns_keep_only_matches() {
        let html = r#"<a href="/docs/a">a</a><a href="/blog/b">b</a>"#;
        let mut opts = LinkExtractOptions::default();
        opts.include = GlobSet::new(&["/docs/*".to_string()]);
        let links = extract_links(html, &base(), &opts);
        assert_eq!(links.len(), 1);
        assert!(links[0].url.ends_with("/docs/a"));
    }

    #[test]
    fn exclude_patterns_drop_matches() {
        let html = r#"<a href="/docs/a">a</a><a href="/docs/secret">b</a>"#;
        let mut opts = LinkExtractOptions::default();
        opts.exclude = GlobSet::new(&["/docs/secret".to_string()]);
        let links = extract_links(html, &base(), &opts);
        assert_eq!(links.len(), 1);
        assert!(links[0].url.ends_with("/docs/a"));
    }

    #[test]
    fn context_falls_back_to_anchor_text_without_block_ancestor() {
        let html = r#"<a href="/a">Anchor Text</a>"#;
        let links = extract_links(html, &base(), &LinkExtractOptions::default());
        assert_eq!(links[0].context, "Anchor Text");
    }

    #[test]
    fn context_uses_nearest_block_ancestor() {
        let html = r#"<p>Surrounding paragraph text with <a href="/a">a link</a> inside it.</p>"#;
        let links = extract_links(html, &base(), &LinkExtractOptions::default());
        assert!(links[0].context.contains("Surrounding paragraph text"));
    }

    #[test]
    fn prefix_restricts_to_matching_paths() {
        let html = r#"<a href="/docs/a">a</a><a href="/blog/b">b</a>"#;
        let mut opts = LinkExtractOptions::default();
        opts.prefix = Some("/docs".to_string());
        let links = extract_links(html, &base(), &opts);
        assert_eq!(links.len(), 1);
        assert!(links[0].url.ends_with("/docs/a"));
    }

    #[test]
    fn malformed_href_is_skipped() {
        let html = r#"<a href="http://[invalid">bad</a><a href="/ok">ok</a>"#;
        let links = extract_links(html, &base(), &LinkExtractOptions::default());
        assert_eq!(links.len(), 1);
    }
}
