use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{info, warn};

use crate::error::{KnowledgeError, KnowledgeResult};

pub const ROOT_TYPE: &str = "Thing";
pub const NONE_TYPE: &str = "none";

const ONTOLOGY_NAMESPACE: &str = "http://dbpedia.org/ontology/";

/// Root-first chain of types from `Thing` down to a given type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OntologyPath {
    nodes: Vec<String>,
}

impl OntologyPath {
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// Distance from the root in hops. The root itself and `[none]` have depth 0.
    pub fn depth(&self) -> usize {
        self.nodes.len().saturating_sub(1)
    }

    pub fn contains(&self, node: &str) -> bool {
        let node = normalize_type(node);
        self.nodes.iter().any(|n| n == node)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl std::fmt::Display for OntologyPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.nodes.join(" > "))
    }
}

/// Single-parent type tree loaded from `child<TAB>parent` pairs.
#[derive(Debug, Default)]
pub struct Ontology {
    parent_of: HashMap<String, String>,
    leaves: HashSet<String>,
    intermediates: HashSet<String>,
}

impl Ontology {
    pub fn load(path: &Path) -> KnowledgeResult<Self> {
        let file = File::open(path).map_err(|e| KnowledgeError::io(path, e))?;
        let mut pairs = Vec::new();
        let mut skipped = 0usize;

        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| KnowledgeError::io(path, e))?;
            let mut fields = line.trim_end_matches('\r').split('\t');
            match (fields.next(), fields.next(), fields.next()) {
                (Some(child), Some(parent), None) if !child.is_empty() && !parent.is_empty() => {
                    pairs.push((child.to_string(), parent.to_string()));
                }
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!("Skipped {} malformed ontology lines in {}", skipped, path.display());
        }

        let ontology = Self::from_edges(pairs.iter().map(|(c, p)| (c.as_str(), p.as_str())))?;
        info!(
            "Ontology loaded from {}: {} edges, {} leaf types",
            path.display(),
            ontology.parent_of.len(),
            ontology.leaves.len()
        );
        Ok(ontology)
    }

    /// Build from `(child, parent)` edges. A later edge for the same child
    /// replaces the earlier one. Fails if the edges contain a cycle.
    pub fn from_edges<'a, I>(edges: I) -> KnowledgeResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut ontology = Self::default();
        for (child, parent) in edges {
            let child = normalize_type(child).to_string();
            let parent = normalize_type(parent).to_string();
            ontology.intermediates.insert(parent.clone());
            ontology.parent_of.insert(child, parent);
        }
        ontology.leaves = ontology
            .parent_of
            .keys()
            .filter(|child| !ontology.intermediates.contains(*child))
            .cloned()
            .collect();

        ontology.check_acyclic()?;
        Ok(ontology)
    }

    /// Walk parent links up to the root and return the chain root-first.
    ///
    /// A type without a listed parent hangs directly below `Thing`.
    pub fn path_of(&self, node: &str) -> OntologyPath {
        let node = normalize_type(node);
        if node.is_empty() || node == NONE_TYPE {
            return OntologyPath::default();
        }

        let mut nodes = vec![node.to_string()];
        let mut current = node;
        // Bounded by the edge count; load already rejected cycles.
        for _ in 0..=self.parent_of.len() {
            match self.parent_of.get(current) {
                Some(parent) => {
                    nodes.push(parent.clone());
                    current = parent;
                }
                None => break,
            }
        }

        if current != ROOT_TYPE {
            nodes.push(ROOT_TYPE.to_string());
        }
        nodes.reverse();
        OntologyPath { nodes }
    }

    /// True if `ancestor` lies on the path from the root to `node` (a type
    /// counts as its own ancestor).
    pub fn is_ancestor(&self, ancestor: &str, node: &str) -> bool {
        self.path_of(node).contains(ancestor)
    }

    pub fn depth(&self, node: &str) -> usize {
        self.path_of(node).depth()
    }

    pub fn is_leaf(&self, node: &str) -> bool {
        self.leaves.contains(normalize_type(node))
    }

    pub fn leaf_types(&self) -> impl Iterator<Item = &str> {
        self.leaves.iter().map(String::as_str)
    }

    pub fn intermediate_types(&self) -> impl Iterator<Item = &str> {
        self.intermediates.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.parent_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent_of.is_empty()
    }

    fn check_acyclic(&self) -> KnowledgeResult<()> {
        let mut settled: HashSet<&str> = HashSet::new();

        for start in self.parent_of.keys() {
            let mut on_path: HashSet<&str> = HashSet::new();
            let mut current = start.as_str();
            while !settled.contains(current) {
                if !on_path.insert(current) {
                    return Err(KnowledgeError::OntologyCycle {
                        node: current.to_string(),
                    });
                }
                match self.parent_of.get(current) {
                    Some(parent) => current = parent,
                    None => break,
                }
            }
            settled.extend(on_path);
        }
        Ok(())
    }
}

/// Strip the bracketed form (`[Person]`) and the ontology namespace.
pub fn normalize_type(node: &str) -> &str {
    let node = node.trim();
    let node = node
        .strip_prefix('[')
        .and_then(|n| n.strip_suffix(']'))
        .unwrap_or(node);
    node.strip_prefix(ONTOLOGY_NAMESPACE).unwrap_or(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ontology {
        Ontology::from_edges([
            ("Person", "Agent"),
            ("Agent", "Thing"),
            ("Scientist", "Person"),
            ("Place", "Thing"),
        ])
        .unwrap()
    }

    #[test]
    fn test_depth_and_ancestry() {
        let ontology = sample();

        assert_eq!(ontology.depth("Person"), 2);
        assert_eq!(ontology.depth("Scientist"), 3);
        assert!(ontology.is_ancestor("Agent", "Person"));
        assert!(!ontology.is_ancestor("Person", "Agent"));
        assert!(ontology.is_ancestor("Thing", "Scientist"));
        assert!(!ontology.is_ancestor("Place", "Scientist"));
        assert!(ontology.is_ancestor("Person", "Person"));
    }

    #[test]
    fn test_path_is_root_first() {
        let path = sample().path_of("[Scientist]");

        assert_eq!(path.nodes(), ["Thing", "Agent", "Person", "Scientist"]);
        assert_eq!(path.depth(), 3);
        assert_eq!(path.to_string(), "Thing > Agent > Person > Scientist");
    }

    #[test]
    fn test_unknown_type_hangs_below_root() {
        let ontology = sample();
        let path = ontology.path_of("Spaceship");

        assert_eq!(path.nodes(), ["Thing", "Spaceship"]);
        assert_eq!(ontology.depth("Spaceship"), 1);
        assert_eq!(ontology.depth("Thing"), 0);
    }

    #[test]
    fn test_none_short_circuits() {
        let ontology = sample();

        assert!(ontology.path_of("[none]").is_empty());
        assert_eq!(ontology.depth("[none]"), 0);
        assert!(!ontology.is_ancestor("Thing", "[none]"));
    }

    #[test]
    fn test_depth_matches_path_for_every_type() {
        let ontology = sample();
        for node in ["Person", "Agent", "Scientist", "Place", "Thing", "Unknown"] {
            let path = ontology.path_of(node);
            assert_eq!(ontology.depth(node), path.depth());
            assert_eq!(path.nodes().first().map(String::as_str), Some(ROOT_TYPE));
        }
    }

    #[test]
    fn test_leaf_and_intermediate_sets() {
        let ontology = sample();

        assert!(ontology.is_leaf("Scientist"));
        assert!(ontology.is_leaf("Place"));
        assert!(!ontology.is_leaf("Person"));
        let mut intermediates: Vec<_> = ontology.intermediate_types().collect();
        intermediates.sort_unstable();
        assert_eq!(intermediates, ["Agent", "Person", "Thing"]);
    }

    #[test]
    fn test_namespaced_types() {
        let ontology = Ontology::from_edges([(
            "http://dbpedia.org/ontology/City",
            "http://dbpedia.org/ontology/Place",
        )])
        .unwrap();

        assert_eq!(ontology.depth("City"), 2);
    }

    #[test]
    fn test_cycle_fails_fast() {
        let result = Ontology::from_edges([("A", "B"), ("B", "C"), ("C", "A")]);
        assert!(matches!(result, Err(KnowledgeError::OntologyCycle { .. })));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ontology.tsv");
        std::fs::write(&path, "Person\tAgent\nAgent\tThing\nbroken line\n").unwrap();

        let ontology = Ontology::load(&path).unwrap();
        assert_eq!(ontology.len(), 2);
        assert_eq!(ontology.depth("Person"), 2);
    }
}
