pub mod classifier;
pub mod context;
pub mod extractor;
pub mod pipeline;
pub mod report;
pub mod sink;
pub mod triple;

pub use classifier::TripleClassifier;
pub use context::KnowledgeContext;
pub use extractor::{PlaceholderFilter, TripleExtractor};
pub use pipeline::{ExtractionPipeline, Worker};
pub use report::{ArticleOutcome, DroppedArticle, ExtractionReport};
pub use sink::{FileSink, MemorySink, TripleBatch, TripleQueue, TripleSink};
pub use triple::{
    classify, CandidateTriple, ClassifiedTriple, LabeledTriple, Mention, MultiValueList, Route, TripleKind,
};
