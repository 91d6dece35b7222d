use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub mod language;

pub use language::LanguageProfile;

use crate::handlers::wikilinks::Blacklists;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub language: LanguageProfile,
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub blacklists: BlacklistConfig,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub pipeline: PipelineSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

/// A flat dump and the path of its persisted index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDump {
    pub source: PathBuf,
    pub index: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeSourceConfig {
    pub name: String,
    #[serde(flatten)]
    pub dump: IndexedDump,
    /// Language codes the source covers; absent means every language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub languages: Option<Vec<String>>,
}

impl TypeSourceConfig {
    pub fn is_available_for(&self, language: &str) -> bool {
        self.languages
            .as_ref()
            .map_or(true, |langs| langs.iter().any(|l| l == language))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub redirects: IndexedDump,
    pub relations: IndexedDump,
    pub ontology: PathBuf,
    /// Type sources in precedence order.
    pub type_sources: Vec<TypeSourceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlacklistConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currencies: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub professions: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nationalities: Option<PathBuf>,
}

impl BlacklistConfig {
    /// Read the configured lists, one entry per line.
    pub fn load(&self) -> Result<Blacklists> {
        let mut targets = read_lines(self.currencies.as_deref())?;
        targets.extend(read_lines(self.professions.as_deref())?);
        let names = read_lines(self.nationalities.as_deref())?;
        Ok(Blacklists::new(targets, names))
    }
}

fn read_lines(path: Option<&Path>) -> Result<HashSet<String>> {
    let Some(path) = path else {
        return Ok(HashSet::new());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read blacklist: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionSettings {
    #[serde(default = "default_window")]
    pub window_size: usize,
    #[serde(default = "default_max_phrase_tokens")]
    pub max_phrase_tokens: usize,
    #[serde(default = "default_context_chars")]
    pub context_chars: usize,
    #[serde(default = "default_true")]
    pub resolve_redirects: bool,
    #[serde(default = "default_true")]
    pub detect_mentions: bool,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            window_size: default_window(),
            max_phrase_tokens: default_max_phrase_tokens(),
            context_chars: default_context_chars(),
            resolve_redirects: true,
            detect_mentions: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_limit: Option<usize>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            article_limit: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SinkFormat {
    #[default]
    JsonLines,
    Tsv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSettings {
    #[serde(default = "default_output_dir")]
    pub directory: PathBuf,
    #[serde(default)]
    pub format: SinkFormat,
    #[serde(default = "default_resource_namespace")]
    pub resource_namespace: String,
    #[serde(default = "default_ontology_namespace")]
    pub ontology_namespace: String,
    /// Also export labeled facts as N-Triples.
    #[serde(default = "default_true")]
    pub ntriples: bool,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            directory: default_output_dir(),
            format: SinkFormat::default(),
            resource_namespace: default_resource_namespace(),
            ontology_namespace: default_ontology_namespace(),
            ntriples: true,
        }
    }
}

fn default_version() -> String { "1.0".to_string() }
fn default_window() -> usize { 3 }
fn default_max_phrase_tokens() -> usize { 10 }
fn default_context_chars() -> usize { 200 }
fn default_workers() -> usize { 4 }
fn default_batch_size() -> usize { 256 }
fn default_true() -> bool { true }
fn default_output_dir() -> PathBuf { PathBuf::from("output") }
fn default_resource_namespace() -> String { "http://dbpedia.org/resource/".to_string() }
fn default_ontology_namespace() -> String { "http://dbpedia.org/ontology/".to_string() }

impl Configuration {
    /// Load configuration from a YAML or JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = if path.extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON config: {}", path.display()))?
        } else {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Invalid YAML config: {}", path.display()))?
        };

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.language.code.is_empty() {
            anyhow::bail!("No language code defined");
        }

        let knowledge = &self.knowledge;
        for (name, dump) in [("redirects", &knowledge.redirects), ("relations", &knowledge.relations)] {
            if dump.source.as_os_str().is_empty() || dump.index.as_os_str().is_empty() {
                anyhow::bail!("Knowledge dump '{}' needs both a source and an index path", name);
            }
        }

        if knowledge.ontology.as_os_str().is_empty() {
            anyhow::bail!("No ontology file defined");
        }

        if knowledge.type_sources.is_empty() {
            anyhow::bail!("No type sources defined");
        }

        for source in &knowledge.type_sources {
            if source.name.is_empty() {
                anyhow::bail!("Type source missing name: {}", source.dump.source.display());
            }
            if source.dump.source.as_os_str().is_empty() || source.dump.index.as_os_str().is_empty() {
                anyhow::bail!("Type source '{}' needs both a source and an index path", source.name);
            }
        }

        if self.pipeline.workers == 0 {
            anyhow::bail!("Pipeline needs at least one worker");
        }

        if self.pipeline.batch_size == 0 {
            anyhow::bail!("Pipeline batch size must be positive");
        }

        if self.extraction.window_size == 0 || self.extraction.max_phrase_tokens == 0 {
            anyhow::bail!("Extraction window size and phrase token limit must be positive");
        }

        Ok(())
    }

    /// Create an example configuration
    pub fn example() -> Self {
        let dump = |name: &str| IndexedDump {
            source: PathBuf::from(format!("data/{}.tsv.gz", name)),
            index: PathBuf::from(format!("indexes/{}.idx", name)),
        };

        Configuration {
            name: "English fact extraction".to_string(),
            description: "Extract grounded triples from English encyclopedia articles".to_string(),
            version: default_version(),
            language: LanguageProfile::english(),
            knowledge: KnowledgeConfig {
                redirects: dump("redirects"),
                relations: dump("relations"),
                ontology: PathBuf::from("data/ontology.tsv"),
                type_sources: vec![
                    TypeSourceConfig {
                        name: "mappingbased".to_string(),
                        dump: dump("types_mappingbased"),
                        languages: None,
                    },
                    TypeSourceConfig {
                        name: "sdtyped".to_string(),
                        dump: dump("types_sdtyped"),
                        languages: Some(vec!["en".to_string()]),
                    },
                    TypeSourceConfig {
                        name: "airpedia".to_string(),
                        dump: dump("types_airpedia"),
                        languages: None,
                    },
                    TypeSourceConfig {
                        name: "lhd".to_string(),
                        dump: dump("types_lhd"),
                        languages: Some(vec!["en".to_string()]),
                    },
                ],
            },
            blacklists: BlacklistConfig {
                currencies: Some(PathBuf::from("data/blacklist/currencies.txt")),
                professions: Some(PathBuf::from("data/blacklist/professions.txt")),
                nationalities: Some(PathBuf::from("data/blacklist/nationalities.txt")),
            },
            extraction: ExtractionSettings::default(),
            pipeline: PipelineSettings::default(),
            output: OutputSettings::default(),
        }
    }
}
