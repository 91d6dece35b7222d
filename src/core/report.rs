use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::core::triple::{Route, TripleKind};

/// Counters for one processed article.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleOutcome {
    pub sections: usize,
    pub sentences: usize,
    pub candidates: usize,
    pub labeled: usize,
    pub unlabeled: usize,
    pub other: usize,
    pub lists: usize,
    pub mentions: u64,
    pub kinds: BTreeMap<TripleKind, usize>,
}

impl ArticleOutcome {
    pub fn record(&mut self, kind: TripleKind, route: &Route) {
        self.candidates += 1;
        *self.kinds.entry(kind).or_default() += 1;
        match route {
            Route::Labeled(relations) => self.labeled += relations.len(),
            Route::Unlabeled => self.unlabeled += 1,
            Route::Other => self.other += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroppedArticle {
    pub wikid: String,
    pub error: String,
}

/// Summary of one extraction run, written as `report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub id: String,
    pub config_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: f64,
    pub articles_seen: usize,
    pub articles_processed: usize,
    pub sentences: usize,
    pub candidates: usize,
    pub labeled: usize,
    pub unlabeled: usize,
    pub other: usize,
    pub lists: usize,
    pub mentions_tagged: u64,
    pub kinds: BTreeMap<TripleKind, usize>,
    #[serde(default)]
    pub dropped: Vec<DroppedArticle>,
}

impl ExtractionReport {
    pub const FILE_NAME: &'static str = "report.json";

    pub fn new(config_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            config_name: config_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            processing_time_seconds: 0.0,
            articles_seen: 0,
            articles_processed: 0,
            sentences: 0,
            candidates: 0,
            labeled: 0,
            unlabeled: 0,
            other: 0,
            lists: 0,
            mentions_tagged: 0,
            kinds: BTreeMap::new(),
            dropped: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: &ArticleOutcome) {
        self.articles_seen += 1;
        self.articles_processed += 1;
        self.sentences += outcome.sentences;
        self.candidates += outcome.candidates;
        self.labeled += outcome.labeled;
        self.unlabeled += outcome.unlabeled;
        self.other += outcome.other;
        self.lists += outcome.lists;
        self.mentions_tagged += outcome.mentions;
        for (kind, count) in &outcome.kinds {
            *self.kinds.entry(*kind).or_default() += count;
        }
    }

    pub fn drop_article(&mut self, wikid: impl Into<String>, error: impl Into<String>) {
        self.articles_seen += 1;
        self.dropped.push(DroppedArticle {
            wikid: wikid.into(),
            error: error.into(),
        });
    }

    pub fn finish(mut self, processing_time_seconds: f64) -> Self {
        self.finished_at = Some(Utc::now());
        self.processing_time_seconds = processing_time_seconds;
        self
    }

    pub fn kind_count(&self, kind: TripleKind) -> usize {
        self.kinds.get(&kind).copied().unwrap_or(0)
    }

    pub async fn save(&self, directory: &Path) -> Result<PathBuf> {
        let path = directory.join(Self::FILE_NAME);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }
}
