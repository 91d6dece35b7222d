use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, info};

use crate::config::{KnowledgeConfig, LanguageProfile};
use crate::error::KnowledgeResult;
use crate::knowledge_graph::ontology::{normalize_type, NONE_TYPE};
use crate::knowledge_graph::{KnowledgeIndex, Ontology, COMPOSITE_KEY_SEPARATOR};

/// Suffix marking a relation found in the object→subject direction.
pub const INVERSE_MARKER: &str = "(-1)";

/// Resolved type of an entity: a concrete ontology type or the `[none]` sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum EntityType {
    Typed(String),
    #[default]
    None,
}

impl EntityType {
    /// Parse `[Type]`, `Type` or `[none]`.
    pub fn parse(raw: &str) -> Self {
        match normalize_type(raw) {
            "" | NONE_TYPE => Self::None,
            name => Self::Typed(name.to_string()),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Typed(name) => Some(name),
            Self::None => None,
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Typed(name) => write!(f, "[{}]", name),
            Self::None => write!(f, "[{}]", NONE_TYPE),
        }
    }
}

impl Serialize for EntityType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// One dictionary of `entity<TAB>type` assignments.
#[derive(Debug)]
pub struct TypeSource {
    pub name: String,
    index: KnowledgeIndex,
    languages: Option<Vec<String>>,
}

impl TypeSource {
    pub fn new(name: impl Into<String>, index: KnowledgeIndex) -> Self {
        Self {
            name: name.into(),
            index,
            languages: None,
        }
    }

    /// Restrict the source to the given language codes.
    pub fn for_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = Some(languages);
        self
    }

    pub fn is_available_for(&self, language: &str) -> bool {
        self.languages
            .as_ref()
            .map_or(true, |langs| langs.iter().any(|l| l == language))
    }

    pub fn candidates(&self, entity: &str) -> Vec<&str> {
        self.index.retrieve_values(entity)
    }
}

/// Index-backed entity knowledge: redirects, relations and types.
///
/// Immutable after construction and shared read-only between workers.
#[derive(Debug)]
pub struct EntityResolver {
    redirects: KnowledgeIndex,
    relations: KnowledgeIndex,
    type_sources: Vec<TypeSource>,
    ontology: Ontology,
    language: String,
}

impl EntityResolver {
    pub fn new(
        redirects: KnowledgeIndex,
        relations: KnowledgeIndex,
        ontology: Ontology,
        type_sources: Vec<TypeSource>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            redirects,
            relations,
            type_sources,
            ontology,
            language: language.into(),
        }
    }

    /// Open (or build and persist) every configured index. Type sources not
    /// available for the profile's language are never opened.
    pub fn from_config(config: &KnowledgeConfig, language: &LanguageProfile) -> KnowledgeResult<Self> {
        let redirects = KnowledgeIndex::open_or_build(&config.redirects.index, &config.redirects.source)?;
        let relations = KnowledgeIndex::open_or_build(&config.relations.index, &config.relations.source)?;
        let ontology = Ontology::load(&config.ontology)?;

        let mut type_sources = Vec::new();
        for source in &config.type_sources {
            if !source.is_available_for(&language.code) {
                debug!("Type source '{}' unavailable for language {}", source.name, language.code);
                continue;
            }
            let index = KnowledgeIndex::open_or_build(&source.dump.index, &source.dump.source)?;
            let mut type_source = TypeSource::new(source.name.clone(), index);
            if let Some(languages) = &source.languages {
                type_source = type_source.for_languages(languages.clone());
            }
            type_sources.push(type_source);
        }

        info!(
            "Entity resolver ready: {} type sources for language {}",
            type_sources.len(),
            language.code
        );

        Ok(Self::new(redirects, relations, ontology, type_sources, language.code.clone()))
    }

    pub fn ontology(&self) -> &Ontology {
        &self.ontology
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Map a possibly-aliased title to its canonical title.
    ///
    /// The redirect index stores `canonical<TAB>alias`, so the canonical form
    /// is the first key whose alias set contains the capitalized title. Only
    /// one hop is followed; unknown titles come back unchanged.
    pub fn resolve(&self, title: &str) -> String {
        let capitalized = capitalize(title);
        match self.redirects.retrieve_keys(&capitalized).first() {
            Some(canonical) => canonical.to_string(),
            None => title.to_string(),
        }
    }

    /// Relations between two entities. Relations found only in the reverse
    /// direction carry the `(-1)` suffix.
    pub fn relations(&self, subject: &str, object: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        let forward_key = format!("{}{}{}", subject, COMPOSITE_KEY_SEPARATOR, object);
        for relation in self.relations.retrieve_values(&forward_key) {
            if !found.iter().any(|r| r == relation) {
                found.push(relation.to_string());
            }
        }

        let forward_count = found.len();
        let inverse_key = format!("{}{}{}", object, COMPOSITE_KEY_SEPARATOR, subject);
        for relation in self.relations.retrieve_values(&inverse_key) {
            if found[..forward_count].iter().any(|r| r == relation) {
                continue;
            }
            let inverse = format!("{}{}", relation, INVERSE_MARKER);
            if !found.contains(&inverse) {
                found.push(inverse);
            }
        }
        found
    }

    /// Most specific type for an entity, falling through the type sources in
    /// precedence order until one yields a type.
    pub fn assign_type(&self, entity: &str) -> EntityType {
        self.type_sources
            .iter()
            .filter(|source| source.is_available_for(&self.language))
            .map(|source| self.deepest(source.candidates(entity)))
            .find(|t| !t.is_none())
            .unwrap_or(EntityType::None)
    }

    /// Raw type candidates for an entity in a named source.
    pub fn types_in(&self, source_name: &str, entity: &str) -> Option<Vec<&str>> {
        self.type_sources
            .iter()
            .find(|s| s.name == source_name)
            .map(|s| s.candidates(entity))
    }

    pub fn type_source_names(&self) -> impl Iterator<Item = &str> {
        self.type_sources.iter().map(|s| s.name.as_str())
    }

    /// Deepest candidate by ontology depth; on equal depth the first wins.
    fn deepest(&self, candidates: Vec<&str>) -> EntityType {
        let mut best: Option<(&str, usize)> = None;
        for candidate in candidates {
            if EntityType::parse(candidate).is_none() {
                continue;
            }
            let depth = self.ontology.depth(candidate);
            if best.map_or(true, |(_, best_depth)| depth > best_depth) {
                best = Some((candidate, depth));
            }
        }
        best.map(|(name, _)| EntityType::parse(name))
            .unwrap_or(EntityType::None)
    }
}

/// Upper-case the first character, following the encyclopedia's title rule.
pub fn capitalize(title: &str) -> String {
    let mut chars = title.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Test helper: an index from `key<TAB>value` text.
#[cfg(test)]
pub(crate) fn index_from_tsv(text: &str) -> KnowledgeIndex {
    KnowledgeIndex::from_pairs(text.lines().filter_map(|line| line.split_once('\t')))
        .expect("small test index fits the arena")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(language: &str) -> EntityResolver {
        let ontology = Ontology::from_edges([
            ("Person", "Agent"),
            ("Agent", "Thing"),
            ("Scientist", "Person"),
            ("City", "Settlement"),
            ("Settlement", "Place"),
            ("Place", "Thing"),
            ("Organisation", "Agent"),
        ])
        .unwrap();

        let redirects = index_from_tsv("Rome\tRoma\nAlbert_Einstein\tEinstein\n");
        let relations = index_from_tsv(
            "Albert_Einstein###Ulm\tbirthPlace\nUlm###Albert_Einstein\tfamousResident\nUlm###Germany\tcountry\nGermany###Ulm\tcountry\n",
        );
        let primary = TypeSource::new(
            "mappingbased",
            index_from_tsv("Albert_Einstein\tPerson\nAlbert_Einstein\tScientist\nUlm\tPlace\nUlm\tSettlement\nUlm\tCity\n"),
        );
        let english_only = TypeSource::new("sdtyped", index_from_tsv("Real_Madrid\tOrganisation\n"))
            .for_languages(vec!["en".to_string()]);
        let fallback = TypeSource::new(
            "airpedia",
            index_from_tsv("Real_Madrid\tAgent\nLeonardo\tPerson\nTie\tSettlement\nTie\tOrganisation\n"),
        );

        EntityResolver::new(
            redirects,
            relations,
            ontology,
            vec![primary, english_only, fallback],
            language,
        )
    }

    #[test]
    fn test_resolve_redirect() {
        let resolver = resolver("en");

        assert_eq!(resolver.resolve("Roma"), "Rome");
        assert_eq!(resolver.resolve("einstein"), "Albert_Einstein");
        assert_eq!(resolver.resolve("Unknown_Title"), "Unknown_Title");
    }

    #[test]
    fn test_resolve_is_stable_without_chains() {
        let resolver = resolver("en");
        for title in ["Roma", "Rome", "Einstein", "Nowhere"] {
            let once = resolver.resolve(title);
            assert_eq!(resolver.resolve(&once), once);
        }
    }

    #[test]
    fn test_chained_redirect_follows_one_hop() {
        let redirects = index_from_tsv("Roma_Capitale\tRoma\nRome\tRoma_Capitale\n");
        let resolver = EntityResolver::new(
            redirects,
            KnowledgeIndex::default(),
            Ontology::default(),
            Vec::new(),
            "en",
        );

        assert_eq!(resolver.resolve("Roma"), "Roma_Capitale");
        assert_eq!(resolver.resolve("Roma_Capitale"), "Rome");
    }

    #[test]
    fn test_resolve_prefers_first_redirect_line() {
        // "Rome" is seen as a redirect alias before either article title.
        let redirects = index_from_tsv("Other\tRome\nRome_City\tRoma\nRome\tRoma\n");
        let resolver = EntityResolver::new(
            redirects,
            KnowledgeIndex::default(),
            Ontology::default(),
            Vec::new(),
            "en",
        );

        assert_eq!(resolver.resolve("Roma"), "Rome_City");
    }

    #[test]
    fn test_relations_both_directions() {
        let resolver = resolver("en");

        assert_eq!(
            resolver.relations("Albert_Einstein", "Ulm"),
            vec!["birthPlace".to_string(), "famousResident(-1)".to_string()]
        );
        assert_eq!(
            resolver.relations("Ulm", "Albert_Einstein"),
            vec!["famousResident".to_string(), "birthPlace(-1)".to_string()]
        );
    }

    #[test]
    fn test_relations_dedup_symmetric() {
        let resolver = resolver("en");
        assert_eq!(resolver.relations("Ulm", "Germany"), vec!["country".to_string()]);
        assert!(resolver.relations("Ulm", "Rome").is_empty());
    }

    #[test]
    fn test_assign_deepest_type() {
        let resolver = resolver("en");

        assert_eq!(resolver.assign_type("Albert_Einstein"), EntityType::Typed("Scientist".into()));
        assert_eq!(resolver.assign_type("Ulm").to_string(), "[City]");
    }

    #[test]
    fn test_depth_tie_keeps_first_found() {
        // Settlement and Organisation both sit at depth 2.
        let resolver = resolver("en");
        assert_eq!(resolver.assign_type("Tie").to_string(), "[Settlement]");
    }

    #[test]
    fn test_language_conditional_sources() {
        assert_eq!(resolver("en").assign_type("Real_Madrid").to_string(), "[Organisation]");
        assert_eq!(resolver("it").assign_type("Real_Madrid").to_string(), "[Agent]");
    }

    #[test]
    fn test_unknown_entity_is_none() {
        let resolver = resolver("en");
        let assigned = resolver.assign_type("Nobody");

        assert_eq!(assigned, EntityType::None);
        assert_eq!(assigned.to_string(), "[none]");
        assert_eq!(resolver.ontology().depth(&assigned.to_string()), 0);
    }

    #[test]
    fn test_types_in_named_source() {
        let resolver = resolver("en");

        assert_eq!(resolver.types_in("mappingbased", "Ulm").unwrap().len(), 3);
        assert!(resolver.types_in("missing", "Ulm").is_none());
    }

    #[test]
    fn test_entity_type_text_forms() {
        assert_eq!(EntityType::parse("[Person]"), EntityType::Typed("Person".into()));
        assert_eq!(EntityType::parse("[none]"), EntityType::None);
        assert_eq!(EntityType::parse("none"), EntityType::None);

        let json = serde_json::to_string(&EntityType::Typed("City".into())).unwrap();
        assert_eq!(json, "\"[City]\"");
        let back: EntityType = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name(), Some("City"));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("roma"), "Roma");
        assert_eq!(capitalize("éire"), "Éire");
        assert_eq!(capitalize(""), "");
    }
}
