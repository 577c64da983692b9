//! `OutputWriter` external interface: filesystem emission (spec §4.11, §6).
//!
//! `mirror` turns the URL path into a directory tree; `flat` joins path
//! segments with `_` into a single basename. Both write YAML front matter
//! (`source`, `fetchedAt`) followed by the markdown body.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

use crate::model::FetchedPage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
    Mirror,
    Flat,
}

#[derive(Debug, Serialize)]
struct FrontMatter<'a> {
    source: &'a str,
    #[serde(rename = "fetchedAt")]
    fetched_at: String,
}

#[async_trait]
pub trait OutputWriter: Send + Sync {
    async fn write_page(&self, page: &FetchedPage) -> Result<PathBuf, std::io::Error>;
    fn url_to_file_path(&self, url: &str) -> PathBuf;
}

pub struct FsOutputWriter {
    pub output_dir: PathBuf,
    pub layout: OutputLayout,
}

impl FsOutputWriter {
    pub fn new(output_dir: impl Into<PathBuf>, layout: OutputLayout) -> Self {
        Self { output_dir: output_dir.into(), layout }
    }
}

#[async_trait]
impl OutputWriter for FsOutputWriter {
    async fn write_page(&self, page: &FetchedPage) -> Result<PathBuf, std::io::Error> {
        let path = self.output_dir.join(self.url_to_file_path(&page.url));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let front_matter = FrontMatter {
            source: &page.url,
            fetched_at: page.fetched_at.to_rfc3339(),
        };
        let yaml = serde_yaml::to_string(&front_matter)
            .map_err(|e| std::io::Error::other(format!("serialize front matter: {e}")))?;
        let contents = format!("---\n{yaml}---\n\n{}\n", page.markdown);

        tokio::fs::write(&path, contents).await?;
        Ok(path)
    }

    fn url_to_file_path(&self, url: &str) -> PathBuf {
        url_to_file_path(url, self.layout)
    }
}

/// Pure mapping from a URL to its relative output path, used by index and
/// aggregation generators without needing a writer instance.
pub fn url_to_file_path(url: &str, layout: OutputLayout) -> PathBuf {
    let (segments, trailing_slash) = path_segments(url);
    match layout {
        OutputLayout::Mirror => mirror_path(&segments, trailing_slash),
        OutputLayout::Flat => flat_path(&segments),
    }
}

/// Splits a URL's path into sanitized segments, also reporting whether the
/// original path ended in `/` (other than the bare root) — mirror layout
/// nests those under `index.md` instead of naming a file after the segment.
fn path_segments(url: &str) -> (Vec<String>, bool) {
    let Ok(parsed) = Url::parse(url) else {
        return (vec![sanitize(url)], false);
    };
    let path = parsed.path();
    let trailing_slash = path != "/" && path.ends_with('/');
    let segments = path.trim_matches('/').split('/').filter(|s| !s.is_empty()).map(sanitize).collect();
    (segments, trailing_slash)
}

fn mirror_path(segments: &[String], trailing_slash: bool) -> PathBuf {
    if segments.is_empty() {
        return PathBuf::from("index.md");
    }
    if trailing_slash {
        let mut path = PathBuf::new();
        for segment in segments {
            path.push(segment);
        }
        path.push("index.md");
        return path;
    }
    let mut path = PathBuf::new();
    for segment in &segments[..segments.len() - 1] {
        path.push(segment);
    }
    path.push(format!("{}.md", segments.last().unwrap()));
    path
}

fn flat_path(segments: &[String]) -> PathBuf {
    if segments.is_empty() {
        return PathBuf::from("index.md");
    }
    PathBuf::from(format!("{}.md", segments.join("_")))
}

fn sanitize(segment: &str) -> String {
    segment.chars().map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_' { c } else { '_' }).collect()
}
