use anyhow::{Context, Result};
use std::time::Instant;
use tracing::info;

use crate::config::{Configuration, ExtractionSettings, LanguageProfile};
use crate::core::classifier::TripleClassifier;
use crate::core::extractor::TripleExtractor;
use crate::handlers::{Blacklists, MarkupNormalizer};
use crate::knowledge_graph::EntityResolver;

/// Everything workers read and nobody writes: built once, shared through `Arc`.
#[derive(Debug)]
pub struct KnowledgeContext {
    resolver: EntityResolver,
    normalizer: MarkupNormalizer,
    extractor: TripleExtractor,
    settings: ExtractionSettings,
}

impl KnowledgeContext {
    pub fn new(
        resolver: EntityResolver,
        profile: LanguageProfile,
        blacklists: Blacklists,
        settings: ExtractionSettings,
    ) -> Self {
        let extractor = TripleExtractor::new(profile.clone(), &settings);
        let normalizer =
            MarkupNormalizer::new(profile, blacklists).with_redirect_resolution(settings.resolve_redirects);
        Self {
            resolver,
            normalizer,
            extractor,
            settings,
        }
    }

    /// Open every index (building the missing ones) and load the blacklists.
    pub fn from_config(config: &Configuration) -> Result<Self> {
        let start = Instant::now();
        let resolver = EntityResolver::from_config(&config.knowledge, &config.language)
            .context("Failed to open the knowledge indexes")?;
        let blacklists = config.blacklists.load()?;
        info!(
            "Knowledge context ready in {:.2}s ({} blacklisted entries)",
            start.elapsed().as_secs_f64(),
            blacklists.len()
        );

        Ok(Self::new(
            resolver,
            config.language.clone(),
            blacklists,
            config.extraction.clone(),
        ))
    }

    pub fn resolver(&self) -> &EntityResolver {
        &self.resolver
    }

    pub fn normalizer(&self) -> &MarkupNormalizer {
        &self.normalizer
    }

    pub fn extractor(&self) -> &TripleExtractor {
        &self.extractor
    }

    pub fn settings(&self) -> &ExtractionSettings {
        &self.settings
    }

    pub fn classifier(&self) -> TripleClassifier<'_> {
        TripleClassifier::new(&self.resolver)
    }
}
