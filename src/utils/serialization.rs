use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::SinkFormat;
use crate::core::triple::{ClassifiedTriple, LabeledTriple, MultiValueList};
use crate::knowledge_graph::resolver::INVERSE_MARKER;

/// The output tables a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    Labeled,
    Unlabeled,
    Other,
    Lists,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Labeled, Table::Unlabeled, Table::Other, Table::Lists];

    pub fn file_stem(&self) -> &'static str {
        match self {
            Table::Labeled => "labeled_triples",
            Table::Unlabeled => "unlabeled_triples",
            Table::Other => "other_triples",
            Table::Lists => "mvl_collection",
        }
    }

    pub fn file_name(&self, format: SinkFormat) -> String {
        let extension = match format {
            SinkFormat::JsonLines => "jsonl",
            SinkFormat::Tsv => "tsv",
        };
        format!("{}.{}", self.file_stem(), extension)
    }

    pub fn tsv_header(&self) -> String {
        match self {
            Table::Labeled => format!("{}\trelation", TRIPLE_COLUMNS.join("\t")),
            Table::Unlabeled | Table::Other => TRIPLE_COLUMNS.join("\t"),
            Table::Lists => "code\tsection\twikid\tlist\tentities".to_string(),
        }
    }
}

const TRIPLE_COLUMNS: [&str; 14] = [
    "wikid",
    "section",
    "sentence",
    "phrase_original",
    "phrase_placeholders",
    "pre",
    "post",
    "subject",
    "wiki_subject",
    "type_subject",
    "object",
    "wiki_object",
    "type_object",
    "kind",
];

pub fn json_line<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).context("Failed to serialize record")
}

/// Tabs and line breaks would break the row layout.
fn cell(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

pub fn tsv_triple(triple: &ClassifiedTriple) -> String {
    let c = &triple.candidate;
    let type_subject = triple.type_subject.to_string();
    let type_object = triple.type_object.to_string();
    [
        c.wikid.as_str(),
        c.section.as_str(),
        c.sentence.as_str(),
        c.phrase_original.as_str(),
        c.phrase_placeholders.as_str(),
        c.pre.as_str(),
        c.post.as_str(),
        c.subject.as_str(),
        triple.wiki_subject.as_deref().unwrap_or(""),
        type_subject.as_str(),
        c.object.as_str(),
        triple.wiki_object.as_deref().unwrap_or(""),
        type_object.as_str(),
        triple.kind.as_str(),
    ]
    .iter()
    .map(|v| cell(v))
    .collect::<Vec<_>>()
    .join("\t")
}

pub fn tsv_labeled(labeled: &LabeledTriple) -> String {
    format!("{}\t{}", tsv_triple(&labeled.triple), cell(&labeled.relation))
}

pub fn tsv_list(list: &MultiValueList) -> String {
    [
        cell(&list.code),
        cell(&list.section),
        cell(&list.wikid),
        cell(&list.list),
        cell(&list.entities.join("|")),
    ]
    .join("\t")
}

/// Labeled facts as N-Triples. Inverse relations are written in their
/// forward direction.
#[derive(Debug, Clone)]
pub struct NTriplesSerializer {
    resource_namespace: String,
    ontology_namespace: String,
}

impl NTriplesSerializer {
    pub fn new(resource_namespace: impl Into<String>, ontology_namespace: impl Into<String>) -> Self {
        Self {
            resource_namespace: resource_namespace.into(),
            ontology_namespace: ontology_namespace.into(),
        }
    }

    pub fn serialize(&self, labeled: &LabeledTriple) -> Option<String> {
        let subject = labeled.triple.wiki_subject.as_deref()?;
        let object = labeled.triple.wiki_object.as_deref()?;
        let (relation, subject, object) = match labeled.relation.strip_suffix(INVERSE_MARKER) {
            Some(forward) => (forward, object, subject),
            None => (labeled.relation.as_str(), subject, object),
        };
        Some(format!(
            "<{}{}> <{}{}> <{}{}> .",
            self.resource_namespace,
            escape_iri(subject),
            self.ontology_namespace,
            escape_iri(relation),
            self.resource_namespace,
            escape_iri(object)
        ))
    }
}

fn escape_iri(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_control() || matches!(c, ' ' | '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\') {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    out
}
