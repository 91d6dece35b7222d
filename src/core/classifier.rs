use crate::core::triple::{CandidateTriple, ClassifiedTriple, Mention, Route, TripleKind};
use crate::knowledge_graph::EntityResolver;

/// Grounds candidates against the knowledge graph.
#[derive(Debug, Clone, Copy)]
pub struct TripleClassifier<'a> {
    resolver: &'a EntityResolver,
}

impl<'a> TripleClassifier<'a> {
    pub fn new(resolver: &'a EntityResolver) -> Self {
        Self { resolver }
    }

    pub fn mention(&self, span: &str) -> Mention {
        Mention::parse(span, |id| self.resolver.assign_type(id))
    }

    pub fn classify(&self, candidate: CandidateTriple) -> ClassifiedTriple {
        let subject = self.mention(&candidate.subject);
        let object = self.mention(&candidate.object);
        ClassifiedTriple::new(candidate, &subject, &object)
    }

    /// Joinable triples are labeled with every known relation between their
    /// entities, or left unlabeled; everything else is kept aside.
    pub fn route(&self, triple: &ClassifiedTriple) -> Route {
        if triple.kind != TripleKind::Joinable {
            return Route::Other;
        }
        let (Some(subject), Some(object)) = (&triple.wiki_subject, &triple.wiki_object) else {
            return Route::Other;
        };
        let relations = self.resolver.relations(subject, object);
        if relations.is_empty() {
            Route::Unlabeled
        } else {
            Route::Labeled(relations)
        }
    }
}
