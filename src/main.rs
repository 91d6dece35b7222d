use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use wiki_fact_extractor::{
    config::{Configuration, IndexedDump, LanguageProfile, SinkFormat},
    core::{ExtractionPipeline, FileSink, KnowledgeContext, TripleKind},
    handlers::{ArticleReader, Blacklists, MarkupNormalizer},
    knowledge_graph::{EntityResolver, KnowledgeIndex},
};

#[derive(Parser)]
#[command(
    name = "wiki_fact_extractor",
    about = "Extract candidate facts from wiki articles and ground them against a knowledge graph",
    long_about = None,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and persist the knowledge indexes from their source dumps
    BuildIndex {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Which indexes to build
        #[arg(short, long, value_enum, default_value = "all")]
        index: IndexKind,

        /// Rebuild even when a persisted index exists
        #[arg(long)]
        force: bool,
    },

    /// Extract and classify triples from a set of articles
    Extract {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Article source: a JSON-lines file or a directory of .wiki/.txt files
        #[arg(short, long)]
        input: PathBuf,

        /// Output directory (overrides config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format (overrides config)
        #[arg(short, long, value_enum)]
        format: Option<FormatArg>,

        /// Number of workers (overrides config)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Process at most this many articles
        #[arg(short, long)]
        limit: Option<usize>,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Normalize articles and print the annotated sentences
    Normalize {
        /// Article source: a JSON-lines file or a directory of .wiki/.txt files
        #[arg(short, long)]
        input: PathBuf,

        /// Configuration file; without it links are not redirect-resolved
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write the normalized articles as JSON to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve titles through the redirect index
    Resolve {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Titles to resolve
        #[arg(required = true)]
        titles: Vec<String>,
    },

    /// Show the assigned type of entities and the candidates of every source
    Types {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Entity wikids
        #[arg(required = true)]
        entities: Vec<String>,
    },

    /// List known relations between two entities
    Relations {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,

        /// Subject wikid
        subject: String,

        /// Object wikid
        object: String,
    },

    /// Validate configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate example configuration file
    GenerateConfig {
        /// Output path for configuration file
        #[arg(short, long)]
        output: PathBuf,

        /// Configuration format (yaml or json)
        #[arg(short, long, default_value = "yaml")]
        format: ConfigFormat,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, PartialEq, Eq)]
enum IndexKind {
    All,
    Redirects,
    Relations,
    Types,
}

#[derive(clap::ValueEnum, Clone, Copy)]
enum FormatArg {
    JsonLines,
    Tsv,
}

impl From<FormatArg> for SinkFormat {
    fn from(format: FormatArg) -> Self {
        match format {
            FormatArg::JsonLines => Self::JsonLines,
            FormatArg::Tsv => Self::Tsv,
        }
    }
}

#[derive(clap::ValueEnum, Clone)]
enum ConfigFormat {
    Yaml,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.debug {
        tracing::Level::DEBUG
    } else if cli.verbose {
        tracing::Level::INFO
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::BuildIndex { config, index, force } => build_index_command(config, index, force).await,
        Commands::Extract {
            config,
            input,
            output,
            format,
            workers,
            limit,
            no_progress,
        } => extract_command(config, input, output, format, workers, limit, no_progress).await,
        Commands::Normalize { input, config, output } => normalize_command(input, config, output).await,
        Commands::Resolve { config, titles } => resolve_command(config, titles).await,
        Commands::Types { config, entities } => types_command(config, entities).await,
        Commands::Relations { config, subject, object } => relations_command(config, subject, object).await,
        Commands::Validate { config } => validate_command(config).await,
        Commands::GenerateConfig { output, format } => generate_config_command(output, format).await,
    }
}

fn load_config(path: &Path) -> Result<Configuration> {
    let config = Configuration::from_file(path)?;
    config.validate()?;
    Ok(config)
}

async fn build_index_command(config_path: PathBuf, kind: IndexKind, force: bool) -> Result<()> {
    println!("{}", " Building knowledge indexes...".bright_blue().bold());

    let config = load_config(&config_path)?;
    let knowledge = &config.knowledge;

    let mut dumps: Vec<(String, &IndexedDump)> = Vec::new();
    if matches!(kind, IndexKind::All | IndexKind::Redirects) {
        dumps.push(("redirects".to_string(), &knowledge.redirects));
    }
    if matches!(kind, IndexKind::All | IndexKind::Relations) {
        dumps.push(("relations".to_string(), &knowledge.relations));
    }
    if matches!(kind, IndexKind::All | IndexKind::Types) {
        for source in &knowledge.type_sources {
            if source.is_available_for(&config.language.code) {
                dumps.push((format!("types/{}", source.name), &source.dump));
            } else {
                info!("Skipping type source {} for language {}", source.name, config.language.code);
            }
        }
    }

    for (name, dump) in dumps {
        if !force && KnowledgeIndex::exists_on_disk(&dump.index) {
            println!(" {} already built at {}", name.bright_cyan(), dump.index.display());
            continue;
        }

        let start = Instant::now();
        let index = KnowledgeIndex::build(&dump.source)
            .with_context(|| format!("Failed to build the {} index", name))?;
        index
            .persist(&dump.index)
            .with_context(|| format!("Failed to persist the {} index", name))?;

        println!(
            " {} built in {:.2}s: {}",
            name.bright_cyan(),
            start.elapsed().as_secs_f64(),
            index.stats()
        );
        println!("   Stored at: {}", dump.index.display().to_string().bright_green());
    }

    Ok(())
}

async fn extract_command(
    config_path: PathBuf,
    input: PathBuf,
    output: Option<PathBuf>,
    format: Option<FormatArg>,
    workers: Option<usize>,
    limit: Option<usize>,
    no_progress: bool,
) -> Result<()> {
    println!("{}", " Starting fact extraction...".bright_blue().bold());

    let mut config = load_config(&config_path)?;
    if let Some(directory) = output {
        config.output.directory = directory;
    }
    if let Some(format) = format {
        config.output.format = format.into();
    }
    if let Some(workers) = workers {
        config.pipeline.workers = workers;
    }
    if limit.is_some() {
        config.pipeline.article_limit = limit;
    }

    println!(" Configuration: {}", config.name.bright_green());
    println!(" Language: {}", config.language.code);
    println!(" Workers: {}", config.pipeline.workers);

    let mut articles = ArticleReader::new().open(&input).await?;
    println!(" Input: {}", input.display());

    let context = Arc::new(KnowledgeContext::from_config(&config)?);
    let mut sink = FileSink::create(&config.output).await?;

    let mut pipeline = ExtractionPipeline::new(Arc::clone(&context), config.pipeline.clone())
        .with_config_name(config.name.clone());
    if !no_progress {
        let progress = match config.pipeline.article_limit {
            Some(limit) => {
                let progress = ProgressBar::new(limit as u64);
                progress.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} articles",
                    )
                    .context("Invalid progress template")?,
                );
                progress
            }
            None => {
                let progress = ProgressBar::new_spinner();
                progress.set_style(
                    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {pos} articles")
                        .context("Invalid progress template")?,
                );
                progress
            }
        };
        pipeline = pipeline.with_progress(progress);
    }

    let report = pipeline.run_source(articles.as_mut(), &mut sink).await?;
    let report_path = report.save(sink.directory()).await?;
    if report.articles_seen == 0 {
        warn!(" No articles found in {}", input.display());
    }

    println!("\n{}", " Extraction Summary".bright_green().bold());
    println!(" Articles processed: {}", report.articles_processed.to_string().bright_cyan());
    println!(" Sentences: {}", report.sentences);
    println!(" Candidates: {}", report.candidates);
    println!(" Labeled facts: {}", report.labeled.to_string().bright_cyan());
    println!(" Unlabeled triples: {}", report.unlabeled);
    println!(" Other triples: {}", report.other);
    println!(" Multi-value lists: {}", report.lists);
    for kind in TripleKind::ALL {
        println!("   {:<22} {}", kind.to_string(), report.kind_count(kind));
    }
    println!(" Total processing time: {:.2}s", report.processing_time_seconds);
    println!(" Output written to: {}", sink.directory().display().to_string().bright_green());
    println!(" Report: {}", report_path.display());

    if report.dropped.is_empty() {
        println!(" {} completed successfully!", "Extraction".bright_green());
    } else {
        println!(
            " {} completed with {} dropped articles",
            "Extraction".bright_yellow(),
            report.dropped.len()
        );
    }

    Ok(())
}

async fn normalize_command(input: PathBuf, config_path: Option<PathBuf>, output: Option<PathBuf>) -> Result<()> {
    println!("{}", " Normalizing articles...".bright_blue().bold());

    let articles = ArticleReader::new().read(&input).await?;

    let (normalizer, resolver) = match &config_path {
        Some(path) => {
            let config = load_config(path)?;
            let resolver = EntityResolver::from_config(&config.knowledge, &config.language)?;
            let normalizer = MarkupNormalizer::new(config.language.clone(), config.blacklists.load()?)
                .with_redirect_resolution(config.extraction.resolve_redirects);
            (normalizer, Some(resolver))
        }
        None => (
            MarkupNormalizer::new(LanguageProfile::english(), Blacklists::default()),
            None,
        ),
    };

    let normalized: Vec<_> = articles
        .iter()
        .map(|article| normalizer.normalize(article, resolver.as_ref()))
        .collect();

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&normalized)?;
        tokio::fs::write(&path, json).await?;
        println!(" Normalized articles written to: {}", path.display().to_string().bright_green());
        return Ok(());
    }

    for article in &normalized {
        println!("\n{} ({})", article.title.bright_green().bold(), article.wikid);
        if !article.aliases.is_empty() {
            println!(" Aliases: {}", article.aliases.join(", "));
        }
        for section in &article.sections {
            println!(" {}", section.name.bright_cyan());
            for sentence in section.sentences() {
                println!("   {}", sentence);
            }
        }
    }

    Ok(())
}

fn open_resolver(config_path: &Path) -> Result<EntityResolver> {
    let config = load_config(config_path)?;
    Ok(EntityResolver::from_config(&config.knowledge, &config.language)?)
}

async fn resolve_command(config_path: PathBuf, titles: Vec<String>) -> Result<()> {
    let resolver = open_resolver(&config_path)?;

    for title in titles {
        let canonical = resolver.resolve(&title);
        if canonical == title {
            println!(" {} (no redirect)", title);
        } else {
            println!(" {} -> {}", title, canonical.bright_green());
        }
    }
    Ok(())
}

async fn types_command(config_path: PathBuf, entities: Vec<String>) -> Result<()> {
    let resolver = open_resolver(&config_path)?;
    let sources: Vec<String> = resolver.type_source_names().map(str::to_string).collect();

    for entity in entities {
        let assigned = resolver.assign_type(&entity);
        println!("\n{} {}", entity.bright_green().bold(), assigned.to_string().bright_cyan());
        if let Some(name) = assigned.name() {
            println!(" Path: {}", resolver.ontology().path_of(name));
        }
        for source in &sources {
            match resolver.types_in(source, &entity) {
                Some(candidates) if !candidates.is_empty() => {
                    println!("   {:<16} {}", source, candidates.join(", "))
                }
                _ => println!("   {:<16} -", source),
            }
        }
    }
    Ok(())
}

async fn relations_command(config_path: PathBuf, subject: String, object: String) -> Result<()> {
    let resolver = open_resolver(&config_path)?;
    let relations = resolver.relations(&subject, &object);

    if relations.is_empty() {
        println!(" No known relation between {} and {}", subject, object);
        return Ok(());
    }
    println!("{}", format!(" {} -> {}", subject, object).bright_blue().bold());
    for relation in relations {
        println!("   {}", relation.bright_cyan());
    }
    Ok(())
}

async fn validate_command(config_path: PathBuf) -> Result<()> {
    println!("{}", " Validating configuration...".bright_blue().bold());

    match Configuration::from_file(&config_path) {
        Ok(config) => match config.validate() {
            Ok(()) => {
                println!(" Configuration is valid!");
                println!(" Name: {}", config.name.bright_green());
                println!(" Version: {}", config.version);
                println!(" Language: {}", config.language.code);
                println!(" Type sources: {}", config.knowledge.type_sources.len());
                println!(" Output: {}", config.output.directory.display());
                Ok(())
            }
            Err(e) => {
                error!(" Configuration validation failed: {}", e);
                Err(e)
            }
        },
        Err(e) => {
            error!(" Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

async fn generate_config_command(output_path: PathBuf, format: ConfigFormat) -> Result<()> {
    println!("{}", " Generating example configuration...".bright_blue().bold());

    let config = Configuration::example();

    let content = match format {
        ConfigFormat::Yaml => serde_yaml::to_string(&config)?,
        ConfigFormat::Json => serde_json::to_string_pretty(&config)?,
    };

    tokio::fs::write(&output_path, content).await?;

    println!(" Example configuration generated at: {}", output_path.display().to_string().bright_green());
    println!(" Edit the file to point at your dumps and indexes");

    Ok(())
}
