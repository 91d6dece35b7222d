use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::{OutputSettings, SinkFormat};
use crate::core::triple::{ClassifiedTriple, LabeledTriple, MultiValueList, Route};
use crate::utils::serialization::{self, NTriplesSerializer, Table};

/// Triples and lists produced since the last flush.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripleBatch {
    pub labeled: Vec<LabeledTriple>,
    pub unlabeled: Vec<ClassifiedTriple>,
    pub other: Vec<ClassifiedTriple>,
    pub lists: Vec<MultiValueList>,
}

impl TripleBatch {
    pub fn push(&mut self, triple: ClassifiedTriple, route: Route) {
        match route {
            Route::Labeled(relations) => {
                for relation in relations {
                    self.labeled.push(LabeledTriple {
                        triple: triple.clone(),
                        relation,
                    });
                }
            }
            Route::Unlabeled => self.unlabeled.push(triple),
            Route::Other => self.other.push(triple),
        }
    }

    pub fn append(&mut self, mut other: TripleBatch) {
        self.labeled.append(&mut other.labeled);
        self.unlabeled.append(&mut other.unlabeled);
        self.other.append(&mut other.other);
        self.lists.append(&mut other.lists);
    }

    pub fn len(&self) -> usize {
        self.labeled.len() + self.unlabeled.len() + self.other.len() + self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A worker's output queue. Producers push while the coordinator drains;
/// a drain claims and clears the contents in one step.
#[derive(Debug, Default)]
pub struct TripleQueue {
    inner: Mutex<TripleBatch>,
}

impl TripleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, triple: ClassifiedTriple, route: Route) {
        self.lock().push(triple, route);
    }

    /// Enqueue a whole article's output at once.
    pub fn extend(&self, batch: TripleBatch) {
        self.lock().append(batch);
    }

    pub fn drain(&self) -> TripleBatch {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // A panicking producer leaves whole records behind, so the data stays usable.
    fn lock(&self) -> std::sync::MutexGuard<'_, TripleBatch> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Destination for drained batches.
#[async_trait]
pub trait TripleSink: Send {
    async fn write_batch(&mut self, batch: TripleBatch) -> Result<()>;

    async fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects everything in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub batches: Vec<TripleBatch>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All batches merged in arrival order.
    pub fn collected(&self) -> TripleBatch {
        let mut all = TripleBatch::default();
        for batch in &self.batches {
            all.append(batch.clone());
        }
        all
    }
}

#[async_trait]
impl TripleSink for MemorySink {
    async fn write_batch(&mut self, batch: TripleBatch) -> Result<()> {
        self.batches.push(batch);
        Ok(())
    }
}

/// One file per table in the output directory, plus optional N-Triples.
pub struct FileSink {
    directory: PathBuf,
    format: SinkFormat,
    ntriples: Option<NTriplesSerializer>,
    written: usize,
}

impl FileSink {
    pub const NTRIPLES_FILE: &'static str = "labeled_facts.nt";

    /// Create the directory and truncate every table, writing TSV headers.
    pub async fn create(settings: &OutputSettings) -> Result<Self> {
        let directory = settings.directory.clone();
        tokio::fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("Failed to create output directory: {}", directory.display()))?;

        for table in Table::ALL {
            let path = directory.join(table.file_name(settings.format));
            let header = match settings.format {
                SinkFormat::Tsv => format!("{}\n", table.tsv_header()),
                SinkFormat::JsonLines => String::new(),
            };
            tokio::fs::write(&path, header)
                .await
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
        }

        let ntriples = if settings.ntriples {
            let path = directory.join(Self::NTRIPLES_FILE);
            tokio::fs::write(&path, "")
                .await
                .with_context(|| format!("Failed to create output file: {}", path.display()))?;
            Some(NTriplesSerializer::new(
                settings.resource_namespace.clone(),
                settings.ontology_namespace.clone(),
            ))
        } else {
            None
        };

        Ok(Self {
            directory,
            format: settings.format,
            ntriples,
            written: 0,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    fn rows<T>(
        &self,
        items: &[T],
        tsv: impl Fn(&T) -> String,
    ) -> Result<String>
    where
        T: Serialize,
    {
        let mut out = String::new();
        for item in items {
            let line = match self.format {
                SinkFormat::JsonLines => serialization::json_line(item)?,
                SinkFormat::Tsv => tsv(item),
            };
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }

    async fn append(&self, file_name: &str, content: &str) -> Result<()> {
        if content.is_empty() {
            return Ok(());
        }
        let path = self.directory.join(file_name);
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open output file: {}", path.display()))?;
        file.write_all(content.as_bytes())
            .await
            .with_context(|| format!("Failed to write output file: {}", path.display()))?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TripleSink for FileSink {
    async fn write_batch(&mut self, batch: TripleBatch) -> Result<()> {
        let tables = [
            (Table::Labeled, self.rows(&batch.labeled, serialization::tsv_labeled)?),
            (Table::Unlabeled, self.rows(&batch.unlabeled, serialization::tsv_triple)?),
            (Table::Other, self.rows(&batch.other, serialization::tsv_triple)?),
            (Table::Lists, self.rows(&batch.lists, serialization::tsv_list)?),
        ];
        for (table, content) in &tables {
            self.append(&table.file_name(self.format), content).await?;
        }

        if let Some(serializer) = &self.ntriples {
            let facts: String = batch
                .labeled
                .iter()
                .filter_map(|l| serializer.serialize(l))
                .map(|line| line + "\n")
                .collect();
            self.append(Self::NTRIPLES_FILE, &facts).await?;
        }

        self.written += batch.len();
        debug!("Wrote {} records to {}", batch.len(), self.directory.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::triple::{CandidateTriple, Mention};
    use crate::knowledge_graph::EntityType;

    fn triple(subject: &str, object: &str) -> ClassifiedTriple {
        let candidate = CandidateTriple {
            wikid: "Albert_Einstein".to_string(),
            section: "#Abstract".to_string(),
            sentence: format!("<PE<{}>> was born in <PE<{}>>.", subject, object),
            pre: String::new(),
            subject: format!("<PE<{}>>", subject),
            phrase_original: "was born in".to_string(),
            phrase_placeholders: "was born in".to_string(),
            object: format!("<PE<{}>>", object),
            post: ".".to_string(),
        };
        let typed = |id: &str| Mention::Entity {
            id: id.to_string(),
            entity_type: EntityType::Typed("Thing".to_string()),
        };
        ClassifiedTriple::new(candidate, &typed(subject), &typed(object))
    }

    #[test]
    fn test_queue_drain_claims_contents() {
        let queue = TripleQueue::new();
        queue.push(
            triple("Albert_Einstein", "Ulm"),
            Route::Labeled(vec!["birthPlace".into(), "residence".into()]),
        );
        queue.push(triple("Albert_Einstein", "Bern"), Route::Unlabeled);
        queue.push(triple("Albert_Einstein", "Zurich"), Route::Other);
        assert_eq!(queue.len(), 4);

        let batch = queue.drain();
        assert_eq!(batch.labeled.len(), 2);
        assert_eq!(batch.unlabeled.len(), 1);
        assert_eq!(batch.other.len(), 1);
        assert!(queue.is_empty());
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_queue_shared_between_threads() {
        let queue = std::sync::Arc::new(TripleQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        queue.push(triple(&format!("S{}", i), &format!("O{}", j)), Route::Unlabeled);
                    }
                })
            })
            .collect();

        let mut drained = 0;
        for handle in handles {
            handle.join().unwrap();
            drained += queue.drain().len();
        }
        drained += queue.drain().len();
        assert_eq!(drained, 100);
    }

    #[tokio::test]
    async fn test_file_sink_tsv() {
        let dir = tempfile::tempdir().unwrap();
        let settings = OutputSettings {
            directory: dir.path().join("out"),
            format: SinkFormat::Tsv,
            ..OutputSettings::default()
        };
        let mut sink = FileSink::create(&settings).await.unwrap();

        let mut batch = TripleBatch::default();
        batch.push(triple("Albert_Einstein", "Ulm"), Route::Labeled(vec!["birthPlace".into()]));
        batch.push(triple("Albert_Einstein", "Bern"), Route::Other);
        sink.write_batch(batch.clone()).await.unwrap();
        sink.write_batch(batch).await.unwrap();
        sink.finish().await.unwrap();

        let labeled = std::fs::read_to_string(dir.path().join("out/labeled_triples.tsv")).unwrap();
        let lines: Vec<_> = labeled.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("wikid\tsection"));
        assert!(lines[1].ends_with("birthPlace"));

        let facts = std::fs::read_to_string(dir.path().join("out").join(FileSink::NTRIPLES_FILE)).unwrap();
        assert_eq!(facts.lines().count(), 2);
        assert_eq!(sink.written(), 4);
    }

    #[tokio::test]
    async fn test_file_sink_json_lines_without_ntriples() {
        let dir = tempfile::tempdir().unwrap();
        let settings = OutputSettings {
            directory: dir.path().to_path_buf(),
            ntriples: false,
            ..OutputSettings::default()
        };
        let mut sink = FileSink::create(&settings).await.unwrap();

        let mut batch = TripleBatch::default();
        batch.push(triple("Albert_Einstein", "Bern"), Route::Unlabeled);
        sink.write_batch(batch).await.unwrap();

        let unlabeled = std::fs::read_to_string(dir.path().join("unlabeled_triples.jsonl")).unwrap();
        let record: ClassifiedTriple = serde_json::from_str(unlabeled.trim()).unwrap();
        assert_eq!(record.wiki_object.as_deref(), Some("Bern"));
        assert!(!dir.path().join(FileSink::NTRIPLES_FILE).exists());
    }
}
