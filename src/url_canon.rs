//! URL canonicalization and glob matching (spec §4.1).

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::model::CanonicalUrl;

/// Normalize a URL string per spec §3: lowercase host, strip trailing slash
/// (unless the path is exactly "/"), drop query and fragment.
///
/// Invalid input strings pass through unchanged — callers must treat a
/// non-canonical string as an uninterpretable identifier, not retry parsing.
pub fn canonicalize(s: &str) -> CanonicalUrl {
    match Url::parse(s) {
        Ok(url) => CanonicalUrl(canonicalize_url(&url).to_string()),
        Err(_) => CanonicalUrl(s.to_string()),
    }
}

/// Same as [`canonicalize`] but operating on an already-parsed `Url`.
pub fn canonicalize_url(url: &Url) -> Url {
    let mut out = url.clone();
    out.set_fragment(None);
    out.set_query(None);
    if let Some(host) = out.host_str() {
        let lower = host.to_ascii_lowercase();
        let _ = out.set_host(Some(&lower));
    }

    let mut path = out.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    out.set_path(&path);
    out
}

/// Compare the canonical hosts of two URL strings.
pub fn same_host(a: &str, b: &str) -> bool {
    let host = |s: &str| Url::parse(s).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase));
    match (host(a), host(b)) {
        (Some(ha), Some(hb)) => ha == hb,
        _ => false,
    }
}

/// Match a URL path against a glob pattern: `*` matches within one path
/// segment (no `/`), `**` matches across segments (including `/`).
pub fn path_matches_glob(path: &str, pattern: &str) -> bool {
    match compile_glob(pattern) {
        Some(re) => re.is_match(path),
        None => false,
    }
}

fn compile_glob(pattern: &str) -> Option<Regex> {
    // Split on the `**` / `*` wildcards, escaping the literal chunks between them.
    let mut regex_str = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                regex_str.push_str(".*");
            } else {
                regex_str.push_str("[^/]*");
            }
        } else {
            regex_str.push_str(&regex::escape(&c.to_string()));
        }
    }
    regex_str.push('$');
    Regex::new(&regex_str).ok()
}

/// Cache of compiled glob patterns used by the link extractor's include/exclude lists.
pub struct GlobSet {
    patterns: Vec<Regex>,
}

impl GlobSet {
    pub fn new(patterns: &[String]) -> Self {
        Self {
            patterns: patterns.iter().filter_map(|p| compile_glob(p)).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }
}

/// Matches the default "allow everything" glob, used when no filter is configured.
pub static MATCH_ALL: LazyLock<Regex> = LazyLock::new(|| Regex::new(".*").expect("match-all regex"));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_strips_query_fragment_and_lowercases_host() {
        let c = canonicalize("https://EX.com/a/b/?x=1#frag");
        assert_eq!(c.as_str(), "https://ex.com/a/b");
    }

    #[test]
    fn canonicalize_strips_trailing_slash_unless_root() {
        assert_eq!(canonicalize("https://ex.com/a/").as_str(), "https://ex.com/a");
        assert_eq!(canonicalize("https://ex.com/").as_str(), "https://ex.com/");
    }

    #[test]
    fn canonicalize_is_idempotent() {
        let once = canonicalize("https://EX.com/a/?x=1");
        let twice = canonicalize(once.as_str());
        assert_eq!(once, twice);
    }

    #[test]
    fn canonicalize_dedups_case_and_slash_variants() {
        let a = canonicalize("https://EX.com/a/");
        let b = canonicalize("https://ex.com/a");
        let c = canonicalize("https://ex.com/a/");
        assert_eq!(a, b);
        assert_eq!(b, c);
    }

    #[test]
    fn canonicalize_passes_through_invalid_input() {
        let c = canonicalize("not a url");
        assert_eq!(c.as_str(), "not a url");
    }

    #[test]
    fn glob_star_matches_single_segment() {
        assert!(path_matches_glob("/docs/intro", "/docs/*"));
        assert!(!path_matches_glob("/docs/intro/deep", "/docs/*"));
    }

    #[test]
    fn glob_double_star_matches_across_segments() {
        assert!(path_matches_glob("/docs/intro/deep", "/docs/**"));
        assert!(path_matches_glob("/docs", "/docs/**".trim_end_matches("/**")));
    }

    #[test]
    fn glob_set_requires_any_match() {
        let set = GlobSet::new(&["/blog/**".to_string(), "/docs/*".to_string()]);
        assert!(set.matches("/blog/post-1"));
        assert!(set.matches("/docs/intro"));
        assert!(!set.matches("/other"));
    }
}
