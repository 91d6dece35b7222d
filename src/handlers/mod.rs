use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub mod entities;
pub mod markup;
pub mod wikilinks;

pub use entities::EntityDetector;
pub use markup::{MarkupNormalizer, NormalizedArticle, Section};
pub use wikilinks::{Blacklists, WikilinkHarvester};

/// Raw article as delivered by the dump reader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WikiArticle {
    pub wikid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub markup: String,
}

impl WikiArticle {
    pub fn new(wikid: impl Into<String>, markup: impl Into<String>) -> Self {
        Self {
            wikid: wikid.into(),
            title: None,
            markup: markup.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// A sequence of articles pulled one at a time, so a dump never has to be
/// held in memory as a whole.
#[async_trait]
pub trait ArticleSource: Send {
    /// The next article, or `None` once the source is exhausted. Records
    /// missing a required field are skipped with a warning.
    async fn next_article(&mut self) -> Result<Option<WikiArticle>>;
}

#[async_trait]
impl ArticleSource for std::vec::IntoIter<WikiArticle> {
    async fn next_article(&mut self) -> Result<Option<WikiArticle>> {
        Ok(self.next())
    }
}

#[async_trait]
pub trait ArticleHandler: Send + Sync {
    /// Open `source` for streaming.
    async fn open(&self, source: &Path) -> Result<Box<dyn ArticleSource>>;
}

#[derive(Debug, Deserialize)]
struct ArticleRecord {
    wikid: Option<String>,
    title: Option<String>,
    markup: Option<String>,
}

/// One JSON object per line: `{"wikid": ..., "title": ..., "markup": ...}`.
pub struct JsonLinesHandler;

#[async_trait]
impl ArticleHandler for JsonLinesHandler {
    async fn open(&self, source: &Path) -> Result<Box<dyn ArticleSource>> {
        let file = tokio::fs::File::open(source)
            .await
            .with_context(|| format!("Failed to open article file: {}", source.display()))?;

        Ok(Box::new(JsonLinesSource {
            path: source.to_path_buf(),
            lines: BufReader::new(file).lines(),
            number: 0,
        }))
    }
}

pub struct JsonLinesSource {
    path: PathBuf,
    lines: Lines<BufReader<tokio::fs::File>>,
    number: usize,
}

impl JsonLinesSource {
    fn parse(&self, line: &str) -> Option<WikiArticle> {
        let record: ArticleRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed record at {}:{}: {}", self.path.display(), self.number, e);
                return None;
            }
        };
        match (record.wikid, record.markup) {
            (Some(wikid), Some(markup)) if !wikid.is_empty() => Some(WikiArticle {
                wikid,
                title: record.title,
                markup,
            }),
            (wikid, _) => {
                warn!(
                    "Record at {}:{} ({}) lacks a wikid or markup field",
                    self.path.display(),
                    self.number,
                    wikid.as_deref().unwrap_or("no wikid")
                );
                None
            }
        }
    }
}

#[async_trait]
impl ArticleSource for JsonLinesSource {
    async fn next_article(&mut self) -> Result<Option<WikiArticle>> {
        while let Some(line) = self
            .lines
            .next_line()
            .await
            .with_context(|| format!("Failed to read article file: {}", self.path.display()))?
        {
            self.number += 1;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(article) = self.parse(&line) {
                return Ok(Some(article));
            }
        }

        debug!("Read {} lines from {}", self.number, self.path.display());
        Ok(None)
    }
}

/// A directory tree of `.wiki` / `.txt` files; the file stem is the wikid.
pub struct DirectoryHandler;

impl DirectoryHandler {
    fn is_article_file(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("wiki") | Some("txt")
        )
    }
}

#[async_trait]
impl ArticleHandler for DirectoryHandler {
    async fn open(&self, source: &Path) -> Result<Box<dyn ArticleSource>> {
        let mut paths: Vec<_> = WalkDir::new(source)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", source.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && Self::is_article_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        paths.sort();

        debug!("Found {} article files under {}", paths.len(), source.display());
        Ok(Box::new(DirectorySource {
            paths: paths.into_iter(),
        }))
    }
}

/// Reads one file per article, only when asked for it.
pub struct DirectorySource {
    paths: std::vec::IntoIter<PathBuf>,
}

#[async_trait]
impl ArticleSource for DirectorySource {
    async fn next_article(&mut self) -> Result<Option<WikiArticle>> {
        for path in self.paths.by_ref() {
            let Some(wikid) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                warn!("Skipping file without a usable name: {}", path.display());
                continue;
            };
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read article file: {}", path.display()))?;
            return Ok(Some(WikiArticle::new(wikid, decode_text(&bytes, &path))));
        }
        Ok(None)
    }
}

/// Decode bytes, sniffing a BOM and falling back to UTF-8.
fn decode_text(bytes: &[u8], path: &Path) -> String {
    let encoding = match encoding_rs::Encoding::for_bom(bytes) {
        Some((enc, _)) => enc,
        None => encoding_rs::UTF_8,
    };

    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        warn!("Encoding errors detected in file: {}", path.display());
    }
    text.into_owned()
}

/// Picks the handler for an input path.
pub struct ArticleReader {
    jsonl: JsonLinesHandler,
    directory: DirectoryHandler,
}

impl Default for ArticleReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ArticleReader {
    pub fn new() -> Self {
        Self {
            jsonl: JsonLinesHandler,
            directory: DirectoryHandler,
        }
    }

    /// Stream the articles at `source`.
    pub async fn open(&self, source: &Path) -> Result<Box<dyn ArticleSource>> {
        self.handler_for(source)?.open(source).await
    }

    /// Read every article at `source` into memory.
    pub async fn read(&self, source: &Path) -> Result<Vec<WikiArticle>> {
        let mut articles = Vec::new();
        let mut stream = self.open(source).await?;
        while let Some(article) = stream.next_article().await? {
            articles.push(article);
        }
        debug!("Read {} articles from {}", articles.len(), source.display());
        Ok(articles)
    }

    fn handler_for(&self, source: &Path) -> Result<&dyn ArticleHandler> {
        if source.is_dir() {
            return Ok(&self.directory);
        }

        match source.extension().and_then(|e| e.to_str()) {
            Some("jsonl") | Some("ndjson") | Some("json") => Ok(&self.jsonl),
            Some("wiki") | Some("txt") => Ok(&self.directory),
            other => anyhow::bail!(
                "No article handler for {} (extension {:?})",
                source.display(),
                other.unwrap_or("none")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_jsonl_handler_skips_incomplete_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("articles.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"wikid\":\"Rome\",\"markup\":\"'''Rome''' is a city.\"}\n",
                "{\"wikid\":\"Ulm\"}\n",
                "not json\n",
                "\n",
                "{\"wikid\":\"Bern\",\"title\":\"Bern\",\"markup\":\"Bern.\"}\n",
            ),
        )
        .unwrap();

        let articles = ArticleReader::new().read(&path).await.unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].wikid, "Rome");
        assert_eq!(articles[1].title.as_deref(), Some("Bern"));
    }

    #[tokio::test]
    async fn test_directory_handler() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("Rome.wiki"), "Rome text").unwrap();
        std::fs::write(dir.path().join("nested").join("Ulm.txt"), b"\xEF\xBB\xBFUlm text").unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let articles = ArticleReader::new().read(dir.path()).await.unwrap();
        let mut wikids: Vec<_> = articles.iter().map(|a| a.wikid.as_str()).collect();
        wikids.sort_unstable();

        assert_eq!(wikids, ["Rome", "Ulm"]);
        let ulm = articles.iter().find(|a| a.wikid == "Ulm").unwrap();
        assert_eq!(ulm.markup, "Ulm text");
    }

    #[tokio::test]
    async fn test_jsonl_source_yields_one_article_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("articles.jsonl");
        std::fs::write(
            &path,
            concat!(
                "{\"wikid\":\"Rome\",\"markup\":\"Rome.\"}\n",
                "broken\n",
                "{\"wikid\":\"Bern\",\"markup\":\"Bern.\"}\n",
            ),
        )
        .unwrap();

        let mut source = ArticleReader::new().open(&path).await.unwrap();
        assert_eq!(source.next_article().await.unwrap().unwrap().wikid, "Rome");
        assert_eq!(source.next_article().await.unwrap().unwrap().wikid, "Bern");
        assert!(source.next_article().await.unwrap().is_none());
        assert!(source.next_article().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_files_read_lazily() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Bern.wiki"), "Bern text").unwrap();
        std::fs::write(dir.path().join("Rome.wiki"), "Rome text").unwrap();

        let mut source = ArticleReader::new().open(dir.path()).await.unwrap();
        std::fs::write(dir.path().join("Rome.wiki"), "Rome, edited").unwrap();

        assert_eq!(source.next_article().await.unwrap().unwrap().markup, "Bern text");
        assert_eq!(source.next_article().await.unwrap().unwrap().markup, "Rome, edited");
        assert!(source.next_article().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_extension_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("articles.xml");
        std::fs::write(&path, "<page/>").unwrap();

        assert!(ArticleReader::new().read(&path).await.is_err());
    }
}
