use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::knowledge_graph::EntityType;

/// Role of the placeholder standing for a whole multi-value list.
pub const LIST_ROLE: &str = "MVL";

static PLACEHOLDER_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<([A-Z]+(?:-[A-Z]+)*)<([^<>]*)>>$").expect("Invalid regex"));

/// What an extracted span stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mention {
    /// A wiki entity with its resolved type.
    Entity { id: String, entity_type: EntityType },
    /// A multi-value list placeholder.
    List { code: String },
    /// Anything the extractor matched that is not a well-formed placeholder.
    Unresolved,
}

impl Mention {
    /// Parse a placeholder, typing entities with `type_of`.
    pub fn parse(span: &str, type_of: impl FnOnce(&str) -> EntityType) -> Self {
        let Some(caps) = PLACEHOLDER_SHAPE.captures(span) else {
            return Self::Unresolved;
        };
        let id = &caps[2];
        if id.is_empty() {
            return Self::Unresolved;
        }
        if &caps[1] == LIST_ROLE {
            Self::List { code: id.to_string() }
        } else {
            Self::Entity {
                id: id.to_string(),
                entity_type: type_of(id),
            }
        }
    }

    pub fn wikid(&self) -> Option<&str> {
        match self {
            Self::Entity { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Entity { entity_type, .. } => entity_type.clone(),
            _ => EntityType::None,
        }
    }
}

/// Wikid carried by an entity placeholder, if the span is one.
pub fn placeholder_wikid(span: &str) -> Option<&str> {
    let caps = PLACEHOLDER_SHAPE.captures(span)?;
    let role = caps.get(1)?.as_str();
    let id = caps.get(2)?.as_str();
    (role != LIST_ROLE && !id.is_empty()).then_some(id)
}

/// How groundable a candidate is. Checks run top to bottom; the first match wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TripleKind {
    #[serde(rename = "MVL")]
    Mvl,
    #[serde(rename = "JOINABLE")]
    Joinable,
    #[serde(rename = "JOINABLE_NOTYPE_BOTH")]
    JoinableNoTypeBoth,
    #[serde(rename = "JOINABLE_NOTYPE_OBJ")]
    JoinableNoTypeObj,
    #[serde(rename = "JOINABLE_NOTYPE_SBJ")]
    JoinableNoTypeSbj,
    #[serde(rename = "DROP")]
    Drop,
}

impl TripleKind {
    pub const ALL: [TripleKind; 6] = [
        TripleKind::Mvl,
        TripleKind::Joinable,
        TripleKind::JoinableNoTypeBoth,
        TripleKind::JoinableNoTypeObj,
        TripleKind::JoinableNoTypeSbj,
        TripleKind::Drop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TripleKind::Mvl => "MVL",
            TripleKind::Joinable => "JOINABLE",
            TripleKind::JoinableNoTypeBoth => "JOINABLE_NOTYPE_BOTH",
            TripleKind::JoinableNoTypeObj => "JOINABLE_NOTYPE_OBJ",
            TripleKind::JoinableNoTypeSbj => "JOINABLE_NOTYPE_SBJ",
            TripleKind::Drop => "DROP",
        }
    }
}

impl fmt::Display for TripleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Label a subject/object pair. Total over every combination of mentions.
pub fn classify(subject: &Mention, object: &Mention) -> TripleKind {
    match (subject, object) {
        (Mention::Entity { .. }, Mention::List { .. }) => TripleKind::Mvl,
        (
            Mention::Entity { entity_type: sbj, .. },
            Mention::Entity { entity_type: obj, .. },
        ) => match (sbj.is_none(), obj.is_none()) {
            (false, false) => TripleKind::Joinable,
            (true, true) => TripleKind::JoinableNoTypeBoth,
            (false, true) => TripleKind::JoinableNoTypeObj,
            (true, false) => TripleKind::JoinableNoTypeSbj,
        },
        _ => TripleKind::Drop,
    }
}

/// A raw subject–phrase–object span pulled out of one sentence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTriple {
    pub wikid: String,
    pub section: String,
    pub sentence: String,
    pub pre: String,
    pub subject: String,
    pub phrase_original: String,
    pub phrase_placeholders: String,
    pub object: String,
    pub post: String,
}

/// A candidate with resolved ids, types and its label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedTriple {
    #[serde(flatten)]
    pub candidate: CandidateTriple,
    pub wiki_subject: Option<String>,
    pub type_subject: EntityType,
    pub wiki_object: Option<String>,
    pub type_object: EntityType,
    pub kind: TripleKind,
}

impl ClassifiedTriple {
    pub fn new(candidate: CandidateTriple, subject: &Mention, object: &Mention) -> Self {
        Self {
            wiki_subject: subject.wikid().map(str::to_string),
            type_subject: subject.entity_type(),
            wiki_object: object.wikid().map(str::to_string),
            type_object: object.entity_type(),
            kind: classify(subject, object),
            candidate,
        }
    }
}

impl fmt::Display for ClassifiedTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}\t{}\t{}{}",
            self.candidate.subject,
            self.type_subject,
            self.candidate.phrase_placeholders,
            self.candidate.object,
            self.type_object
        )
    }
}

/// A joinable triple paired with one relation the knowledge graph knows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledTriple {
    #[serde(flatten)]
    pub triple: ClassifiedTriple,
    pub relation: String,
}

/// Where a classified triple goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Joinable with known relations; one labeled record per relation.
    Labeled(Vec<String>),
    /// Joinable but no relation known.
    Unlabeled,
    Other,
}

/// A comma list of entities collapsed into one `<MVL<code>>` placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiValueList {
    pub code: String,
    pub section: String,
    pub wikid: String,
    pub list: String,
    pub entities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn typed(name: &str) -> EntityType {
        EntityType::Typed(name.to_string())
    }

    #[test]
    fn test_mention_parsing() {
        let person = Mention::parse("<PE-TITLE<Albert_Einstein>>", |_| typed("Person"));
        assert_eq!(person.wikid(), Some("Albert_Einstein"));
        assert_eq!(person.entity_type(), typed("Person"));

        assert_eq!(
            Mention::parse("<MVL<3fa2>>", |_| unreachable!()),
            Mention::List { code: "3fa2".to_string() }
        );
        assert_eq!(Mention::parse("<EN>", |_| EntityType::None), Mention::Unresolved);
        assert_eq!(Mention::parse("<SE-ORG<>>", |_| EntityType::None), Mention::Unresolved);
        assert_eq!(placeholder_wikid("<PE<Ulm>>"), Some("Ulm"));
        assert_eq!(placeholder_wikid("<MVL<Ulm>>"), None);
    }

    #[test]
    fn test_classification_is_total() {
        let person = Mention::Entity { id: "A".into(), entity_type: typed("Person") };
        let untyped = Mention::Entity { id: "B".into(), entity_type: EntityType::None };
        let list = Mention::List { code: "c".into() };
        let other = Mention::Unresolved;

        assert_eq!(classify(&person, &list), TripleKind::Mvl);
        assert_eq!(classify(&untyped, &list), TripleKind::Mvl);
        assert_eq!(classify(&person, &person), TripleKind::Joinable);
        assert_eq!(classify(&untyped, &untyped), TripleKind::JoinableNoTypeBoth);
        assert_eq!(classify(&person, &untyped), TripleKind::JoinableNoTypeObj);
        assert_eq!(classify(&untyped, &person), TripleKind::JoinableNoTypeSbj);

        for mention in [&person, &untyped, &list, &other] {
            assert_eq!(classify(&list, mention), TripleKind::Drop);
            assert_eq!(classify(&other, mention), TripleKind::Drop);
        }
        assert_eq!(classify(&person, &other), TripleKind::Drop);
    }

    #[test]
    fn test_kind_serializes_as_label() {
        let json = serde_json::to_string(&TripleKind::JoinableNoTypeSbj).unwrap();
        assert_eq!(json, "\"JOINABLE_NOTYPE_SBJ\"");
        for kind in TripleKind::ALL {
            assert_eq!(serde_json::to_string(&kind).unwrap(), format!("\"{}\"", kind));
        }
    }
}
