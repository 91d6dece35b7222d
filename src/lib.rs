pub mod config;
pub mod core;
pub mod error;
pub mod handlers;
pub mod knowledge_graph;
pub mod utils;

pub use config::Configuration;
pub use core::{ExtractionPipeline, ExtractionReport, KnowledgeContext, TripleKind};
pub use error::{KnowledgeError, KnowledgeResult};
pub use handlers::{ArticleReader, MarkupNormalizer, WikiArticle};
pub use knowledge_graph::{EntityResolver, KnowledgeIndex, Ontology};
