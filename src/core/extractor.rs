use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

use crate::config::{ExtractionSettings, LanguageProfile};
use crate::core::triple::{placeholder_wikid, CandidateTriple, MultiValueList, LIST_ROLE};

/// Any placeholder, including `<MVL<..>>`.
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Z-][^>]*?>>").expect("Invalid regex"));

/// Three or more placeholders joined by commas, closed by `and`/`or` or a last comma.
static ENTITY_LIST: LazyLock<Regex> = LazyLock::new(|| {
    let e = r"<[A-Z-][^>]*?>>";
    Regex::new(&format!(
        r"{e}(?:\s*,\s*{e})+(?:,?\s+(?:and|or)\s+{e}|\s*,\s*{e})"
    ))
    .expect("Invalid regex")
});

static QUOTED_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"''[^']+?''").expect("Invalid regex"));
static ORDINAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:st|nd|rd|th)\b").expect("Invalid regex"));
static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:1\d{3}|20\d{2})\b").expect("Invalid regex"));
static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(?:[.,]\d+)*\b").expect("Invalid regex"));

/// Generic marker replacing other entities inside context windows.
pub const ENTITY_MARKER: &str = "<EN>";

/// Abstracts the surface of a phrase: quoted titles, ordinals, years, numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderFilter;

impl PlaceholderFilter {
    pub fn apply(&self, phrase: &str) -> String {
        let phrase = QUOTED_TITLE.replace_all(phrase, "#QUOTE");
        let phrase = ORDINAL.replace_all(&phrase, "#ORD");
        let phrase = YEAR.replace_all(&phrase, "#YEAR");
        NUMBER.replace_all(&phrase, "#NUM").into_owned()
    }
}

/// Turns annotated sentences into subject–phrase–object candidates.
#[derive(Debug, Clone)]
pub struct TripleExtractor {
    profile: LanguageProfile,
    window_size: usize,
    max_phrase_tokens: usize,
    context_chars: usize,
    filter: PlaceholderFilter,
}

impl TripleExtractor {
    pub fn new(profile: LanguageProfile, settings: &ExtractionSettings) -> Self {
        Self {
            profile,
            window_size: settings.window_size,
            max_phrase_tokens: settings.max_phrase_tokens,
            context_chars: settings.context_chars,
            filter: PlaceholderFilter,
        }
    }

    /// Candidates that survive filtering.
    pub fn extract(&self, wikid: &str, section: &str, sentence: &str) -> Vec<CandidateTriple> {
        self.candidates(wikid, section, sentence)
            .into_iter()
            .filter(|c| self.accepts(c))
            .collect()
    }

    /// One candidate per pair of adjacent placeholders, before any filtering.
    pub fn candidates(&self, wikid: &str, section: &str, sentence: &str) -> Vec<CandidateTriple> {
        let spans: Vec<_> = ENTITY.find_iter(sentence).collect();

        spans
            .windows(2)
            .map(|pair| {
                let (subject, object) = (pair[0], pair[1]);
                let phrase = sentence[subject.end()..object.start()].trim();
                CandidateTriple {
                    wikid: wikid.to_string(),
                    section: section.to_string(),
                    sentence: sentence.to_string(),
                    pre: self.pre_window(sentence, subject.start()),
                    subject: subject.as_str().to_string(),
                    phrase_original: phrase.to_string(),
                    phrase_placeholders: self.filter.apply(phrase),
                    object: object.as_str().to_string(),
                    post: self.post_window(sentence, object.end()),
                }
            })
            .collect()
    }

    /// Reject empty phrases, possessive objects, phrases closed by a
    /// subordinating conjunction and overlong phrases.
    pub fn accepts(&self, candidate: &CandidateTriple) -> bool {
        let phrase = &candidate.phrase_original;
        !phrase.is_empty()
            && !self.profile.starts_with_clitic(&candidate.post)
            && !self.profile.ends_with_conjunction(phrase)
            && phrase.split_whitespace().count() <= self.max_phrase_tokens
    }

    /// Collapse every entity list in the sentence into one `<MVL<code>>`.
    pub fn replace_lists(&self, wikid: &str, section: &str, sentence: &str) -> (String, Vec<MultiValueList>) {
        let mut lists = Vec::new();
        let mut out = String::with_capacity(sentence.len());
        let mut last = 0usize;

        for found in ENTITY_LIST.find_iter(sentence) {
            let list = found.as_str();
            let code = list_code(wikid, section, list);
            out.push_str(&sentence[last..found.start()]);
            out.push_str(&format!("<{}<{}>>", LIST_ROLE, code));
            last = found.end();

            lists.push(MultiValueList {
                code,
                section: section.to_string(),
                wikid: wikid.to_string(),
                list: list.to_string(),
                entities: ENTITY
                    .find_iter(list)
                    .map(|m| placeholder_wikid(m.as_str()).unwrap_or(m.as_str()).to_string())
                    .collect(),
            });
        }
        out.push_str(&sentence[last..]);
        (out, lists)
    }

    fn pre_window(&self, sentence: &str, subject_start: usize) -> String {
        let mut from = subject_start.saturating_sub(self.context_chars);
        while !sentence.is_char_boundary(from) {
            from += 1;
        }
        let span = ENTITY.replace_all(sentence[from..subject_start].trim(), ENTITY_MARKER);
        let mut tokens: Vec<&str> = span.split_whitespace().collect();
        // A cut span starts mid-word.
        if from > 0 && !tokens.is_empty() {
            tokens.remove(0);
        }
        let skip = tokens.len().saturating_sub(self.window_size);
        tokens[skip..].join(" ")
    }

    fn post_window(&self, sentence: &str, object_end: usize) -> String {
        let mut to = (object_end + self.context_chars).min(sentence.len());
        while !sentence.is_char_boundary(to) {
            to -= 1;
        }
        let span = ENTITY.replace_all(sentence[object_end..to].trim(), ENTITY_MARKER);
        let mut tokens: Vec<&str> = span.split_whitespace().collect();
        if to < sentence.len() {
            tokens.pop();
        }
        tokens.truncate(self.window_size);
        tokens.join(" ")
    }
}

/// Stable code for a list: article, section and list text hashed together.
pub fn list_code(wikid: &str, section: &str, list: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(wikid.as_bytes());
    hasher.update(b"\t");
    hasher.update(section.as_bytes());
    hasher.update(b"\t");
    hasher.update(list.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}
