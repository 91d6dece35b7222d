use anyhow::{anyhow, Result};
use indicatif::ProgressBar;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::PipelineSettings;
use crate::core::context::KnowledgeContext;
use crate::core::report::{ArticleOutcome, ExtractionReport};
use crate::core::sink::{TripleBatch, TripleQueue, TripleSink};
use crate::handlers::markup::remove_parenthesis;
use crate::handlers::{ArticleSource, EntityDetector, WikiArticle};

/// Per-worker state. The entity detector is never shared; the queue is
/// shared only with the coordinator that drains it.
#[derive(Debug)]
pub struct Worker {
    id: usize,
    detector: EntityDetector,
    queue: Arc<TripleQueue>,
}

impl Worker {
    pub fn new(id: usize) -> Self {
        Self::with_queue(id, Arc::new(TripleQueue::new()))
    }

    pub fn with_queue(id: usize, queue: Arc<TripleQueue>) -> Self {
        Self {
            id,
            detector: EntityDetector::new(),
            queue,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn queue(&self) -> Arc<TripleQueue> {
        Arc::clone(&self.queue)
    }

    /// Normalize, extract and classify one article. Its output reaches the
    /// queue only if the whole article succeeds.
    pub fn process(&mut self, context: &KnowledgeContext, article: &WikiArticle) -> Result<ArticleOutcome> {
        if article.wikid.trim().is_empty() {
            return Err(anyhow!("article has an empty wikid"));
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| self.extract_article(context, article)));
        match outcome {
            Ok((outcome, batch)) => {
                self.queue.extend(batch);
                Ok(outcome)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(anyhow!("processing panicked: {}", message))
            }
        }
    }

    fn extract_article(&mut self, context: &KnowledgeContext, article: &WikiArticle) -> (ArticleOutcome, TripleBatch) {
        let mut normalized = context.normalizer().normalize(article, Some(context.resolver()));
        let mut outcome = ArticleOutcome {
            sections: normalized.sections.len(),
            ..ArticleOutcome::default()
        };

        if context.settings().detect_mentions {
            let before = self.detector.mentions();
            self.detector.annotate(&mut normalized);
            outcome.mentions = self.detector.mentions() - before;
        }

        let extractor = context.extractor();
        let classifier = context.classifier();
        let mut batch = TripleBatch::default();

        for section in &normalized.sections {
            for sentence in section.sentences() {
                outcome.sentences += 1;
                let sentence = remove_parenthesis(sentence);
                let (sentence, lists) = extractor.replace_lists(&normalized.wikid, &section.name, &sentence);
                outcome.lists += lists.len();
                batch.lists.extend(lists);

                for candidate in extractor.extract(&normalized.wikid, &section.name, &sentence) {
                    let triple = classifier.classify(candidate);
                    let route = classifier.route(&triple);
                    outcome.record(triple.kind, &route);
                    batch.push(triple, route);
                }
            }
        }

        debug!(
            "Worker {} extracted {} candidates from {}",
            self.id, outcome.candidates, normalized.wikid
        );
        (outcome, batch)
    }
}

/// Drives articles through a pool of workers in batches and flushes every
/// worker queue to the sink after each batch.
pub struct ExtractionPipeline {
    context: Arc<KnowledgeContext>,
    settings: PipelineSettings,
    config_name: String,
    progress: Option<ProgressBar>,
}

impl ExtractionPipeline {
    pub fn new(context: Arc<KnowledgeContext>, settings: PipelineSettings) -> Self {
        Self {
            context,
            settings,
            config_name: String::new(),
            progress: None,
        }
    }

    pub fn with_config_name(mut self, name: impl Into<String>) -> Self {
        self.config_name = name.into();
        self
    }

    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Run over articles already in memory.
    pub async fn run(&self, articles: Vec<WikiArticle>, sink: &mut dyn TripleSink) -> Result<ExtractionReport> {
        self.run_source(&mut articles.into_iter(), sink).await
    }

    /// Pull articles from `source` one batch at a time. At most one batch of
    /// articles is held in memory.
    pub async fn run_source(
        &self,
        source: &mut dyn ArticleSource,
        sink: &mut dyn TripleSink,
    ) -> Result<ExtractionReport> {
        let start = Instant::now();
        let mut report = ExtractionReport::new(self.config_name.clone());

        let worker_count = self.settings.workers.max(1);
        let batch_size = self.settings.batch_size.max(1);
        let mut remaining = self.settings.article_limit.unwrap_or(usize::MAX);

        let queues: Vec<Arc<TripleQueue>> = (0..worker_count).map(|_| Arc::new(TripleQueue::new())).collect();
        let mut workers: Vec<Option<Worker>> = queues
            .iter()
            .enumerate()
            .map(|(id, queue)| Some(Worker::with_queue(id, Arc::clone(queue))))
            .collect();

        info!(
            "Extracting with {} workers (batch size {}, limit {})",
            worker_count,
            batch_size,
            self.settings
                .article_limit
                .map_or_else(|| "none".to_string(), |limit| limit.to_string())
        );

        let mut batch_number = 0usize;
        loop {
            let mut chunk = Vec::with_capacity(batch_size.min(remaining));
            while chunk.len() < batch_size && remaining > 0 {
                let Some(article) = source.next_article().await? else {
                    break;
                };
                chunk.push(article);
                remaining -= 1;
            }
            if chunk.is_empty() {
                break;
            }
            batch_number += 1;
            let chunk_len = chunk.len();

            let mut assignments: Vec<Vec<WikiArticle>> = vec![Vec::new(); worker_count];
            for (i, article) in chunk.into_iter().enumerate() {
                assignments[i % worker_count].push(article);
            }

            let mut handles = Vec::with_capacity(worker_count);
            for (id, assigned) in assignments.into_iter().enumerate() {
                let Some(mut worker) = workers[id].take() else {
                    continue;
                };
                let wikids: Vec<String> = assigned.iter().map(|a| a.wikid.clone()).collect();
                let context = Arc::clone(&self.context);
                let handle = tokio::task::spawn_blocking(move || {
                    let results: Vec<(String, Result<ArticleOutcome>)> = assigned
                        .iter()
                        .map(|article| (article.wikid.clone(), worker.process(&context, article)))
                        .collect();
                    (worker, results)
                });
                handles.push((id, wikids, handle));
            }

            for (id, wikids, handle) in handles {
                match handle.await {
                    Ok((worker, results)) => {
                        workers[id] = Some(worker);
                        for (wikid, result) in results {
                            match result {
                                Ok(outcome) => report.record(&outcome),
                                Err(e) => {
                                    warn!("Dropping article {}: {:#}", wikid, e);
                                    report.drop_article(wikid, format!("{:#}", e));
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("Worker {} failed: {}", id, e);
                        workers[id] = Some(Worker::with_queue(id, Arc::clone(&queues[id])));
                        for wikid in wikids {
                            report.drop_article(wikid, format!("worker task failed: {}", e));
                        }
                    }
                }
            }

            let mut flushed = TripleBatch::default();
            for queue in &queues {
                flushed.append(queue.drain());
            }
            if !flushed.is_empty() {
                sink.write_batch(flushed).await?;
            }

            if let Some(progress) = &self.progress {
                progress.inc(chunk_len as u64);
            }
            info!(
                "Batch {} done: {} articles processed, {} dropped",
                batch_number,
                report.articles_processed,
                report.dropped.len()
            );
        }

        sink.finish().await?;
        if let Some(progress) = &self.progress {
            progress.finish_with_message("done");
        }

        let report = report.finish(start.elapsed().as_secs_f64());
        info!(
            "Extraction completed: {} labeled, {} unlabeled, {} other triples in {:.2}s",
            report.labeled, report.unlabeled, report.other, report.processing_time_seconds
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionSettings, LanguageProfile};
    use crate::core::sink::MemorySink;
    use crate::core::triple::TripleKind;
    use crate::handlers::Blacklists;
    use crate::knowledge_graph::resolver::index_from_tsv;
    use crate::knowledge_graph::{EntityResolver, Ontology, TypeSource};

    fn context() -> Arc<KnowledgeContext> {
        let ontology = Ontology::from_edges([
            ("Agent", "Thing"),
            ("Person", "Agent"),
            ("Place", "Thing"),
            ("City", "Place"),
        ])
        .unwrap();
        let resolver = EntityResolver::new(
            index_from_tsv("Ulm\tUlm,_Germany\n"),
            index_from_tsv("Albert_Einstein###Ulm\tbirthPlace\n"),
            ontology,
            vec![TypeSource::new(
                "mappingbased",
                index_from_tsv("Albert_Einstein\tPerson\nUlm\tCity\nBern\tCity\n"),
            )],
            "en",
        );
        Arc::new(KnowledgeContext::new(
            resolver,
            LanguageProfile::english(),
            Blacklists::default(),
            ExtractionSettings::default(),
        ))
    }

    fn einstein() -> WikiArticle {
        WikiArticle::new(
            "Albert_Einstein",
            "'''Albert Einstein''' was born in [[Ulm, Germany|Ulm]]. Albert Einstein later moved to [[Bern]].",
        )
    }

    #[test]
    fn test_worker_routes_triples() {
        let context = context();
        let mut worker = Worker::new(0);
        let outcome = worker.process(&context, &einstein()).unwrap();

        assert_eq!(outcome.sentences, 2);
        assert_eq!(outcome.labeled, 1);
        assert_eq!(outcome.unlabeled, 1);
        assert_eq!(outcome.kinds.get(&TripleKind::Joinable), Some(&2));

        let batch = worker.queue().drain();
        assert_eq!(batch.labeled[0].relation, "birthPlace");
        assert_eq!(batch.labeled[0].triple.candidate.phrase_original, "was born in");
        assert_eq!(batch.unlabeled[0].wiki_object.as_deref(), Some("Bern"));
    }

    #[test]
    fn test_worker_rejects_empty_wikid() {
        let mut worker = Worker::new(0);
        assert!(worker.process(&context(), &WikiArticle::new(" ", "text")).is_err());
        assert!(worker.queue().is_empty());
    }

    #[tokio::test]
    async fn test_pipeline_drops_bad_articles_and_keeps_going() {
        let articles = vec![
            einstein(),
            WikiArticle::new("", "[[Ulm]] and [[Bern]]"),
            WikiArticle::new("Bern", "'''Bern''' is near [[Ulm]] in the hills."),
        ];
        let settings = PipelineSettings {
            workers: 2,
            batch_size: 2,
            article_limit: None,
        };
        let mut sink = MemorySink::new();
        let report = ExtractionPipeline::new(context(), settings)
            .with_config_name("test")
            .run(articles, &mut sink)
            .await
            .unwrap();

        assert_eq!(report.articles_seen, 3);
        assert_eq!(report.articles_processed, 2);
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(sink.batches.len(), 2);

        let all = sink.collected();
        assert_eq!(all.labeled.len(), 1);
        assert_eq!(all.unlabeled.len(), 2);
        assert_eq!(report.unlabeled, 2);
    }

    #[tokio::test]
    async fn test_article_limit() {
        let settings = PipelineSettings {
            workers: 3,
            batch_size: 10,
            article_limit: Some(1),
        };
        let mut sink = MemorySink::new();
        let report = ExtractionPipeline::new(context(), settings)
            .run(vec![einstein(), einstein()], &mut sink)
            .await
            .unwrap();

        assert_eq!(report.articles_seen, 1);
        assert_eq!(report.labeled, 1);
    }

    /// Endless source that counts how often it is pulled.
    struct Repeating {
        pulled: usize,
    }

    #[async_trait::async_trait]
    impl ArticleSource for Repeating {
        async fn next_article(&mut self) -> Result<Option<WikiArticle>> {
            self.pulled += 1;
            Ok(Some(einstein()))
        }
    }

    #[tokio::test]
    async fn test_streamed_source_is_pulled_per_batch() {
        let settings = PipelineSettings {
            workers: 2,
            batch_size: 2,
            article_limit: Some(3),
        };
        let mut source = Repeating { pulled: 0 };
        let mut sink = MemorySink::new();
        let report = ExtractionPipeline::new(context(), settings)
            .run_source(&mut source, &mut sink)
            .await
            .unwrap();

        assert_eq!(source.pulled, 3);
        assert_eq!(report.articles_processed, 3);
        assert_eq!(sink.batches.len(), 2);
        assert_eq!(sink.batches[0].labeled.len(), 2);
        assert_eq!(sink.batches[1].labeled.len(), 1);
    }
}
