use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tracing::debug;

use crate::config::LanguageProfile;
use crate::handlers::wikilinks::{Blacklists, SurfaceForms, WikilinkHarvester};
use crate::handlers::WikiArticle;
use crate::knowledge_graph::EntityResolver;

/// Name of the lead section, before the first heading.
pub const ABSTRACT_SECTION: &str = "#Abstract";

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("Invalid regex"));
    };
}

// Markup noise. Every tag pattern also accepts the escaped forms of `<` and `>`.
pattern!(TOC_MARKER, r"__[A-Z]+__");
pattern!(INTERWIKI_LINK, r"\[\[[a-z\-]+:[^|\]]+\]\]");
pattern!(EXTERNAL_LINK, r"\[http[^\s\]]+\]");
pattern!(EXTERNAL_LINK_WITH_TEXT, r"\[http[^\s\]]+(?:\s([^\]]+))?\]");
pattern!(BR_TAG, r"(?:<|&lt;|&#60;)br */?(?:>|&gt;|&#62;)");
pattern!(SELF_CLOSING_REF, r"(?s)(?:<|&lt;|&#60;)ref[^/<>&]*/(?:>|&gt;|&#62;)");
pattern!(REF_BLOCK, r"(?s)(?:<|&lt;|&#60;)ref.*?(?:<|&lt;|&#60;)/ref(?:>|&gt;|&#62;)");
pattern!(MATH_BLOCK, r"(?s)(?:<|&lt;|&#60;)math.*?(?:<|&lt;|&#60;)/math(?:>|&gt;|&#62;)");
pattern!(GALLERY_BLOCK, r"(?is)(?:<|&lt;|&#60;)gallery.*?(?:<|&lt;|&#60;)/gallery(?:>|&gt;|&#62;)");
pattern!(HTML_COMMENT, r"(?s)(?:<|&lt;|&#60;)!--.*?--(?:>|&gt;|&#62;)");
pattern!(HTML_TAG, r"</?[a-zA-Z][^<>]*>");
pattern!(DEFINITION_LINE, r"(?m)^;.+\n");
pattern!(ITALIC_HATNOTE, r"(?m)^:''[^.']+\.''");
pattern!(INDENTATION, r"\n[ \t]*(?::[ \t]*)+");

// Templates rendered in place.
pattern!(CONVERT_SHORT, r"\{\{convert\|(\d+)\|([^|}]+)\}\}");
pattern!(CONVERT_LONG, r"\{\{convert\|(\d+)\|([^|}]+)\|[^}]+\}\}");
pattern!(LANG_TEMPLATE, r"(?i)\{\{lang\|[^|]+\|([^{|}]+)\}\}");
pattern!(LANG_PREFIXED, r"(?i)\{\{lang-[^|]+\|([^{|}]+)\}\}");
pattern!(NIHONGO, r"(?i)\{\{Nihongo\|([^|]+)\|[^{}]+?\}\}");

// Prose structure.
pattern!(HEADING, r"^(={2,6})\s*(.+?)\s*={2,6}\s*$");
pattern!(BOLD_NAME, r"'''('')?([^{}()+*]*?)('')?'''");
pattern!(DOUBLE_SPACES, r" {2,}");
pattern!(BLANK_LINES, r"\n{2,}");
pattern!(PARENTHESIS, r"(?:\s|_)?'*\([^(]*?\)'*");
pattern!(PLACEHOLDER, r"<[A-Z-]+<([^>]*?)>>");
pattern!(DISAMBIGUATION_SUFFIX, r" \(\w+\)$");

const MAX_UNESCAPE_ROUNDS: usize = 8;

const MASK_OPEN: char = '\u{E000}';
const MASK_CLOSE: char = '\u{E001}';

/// One section of a normalized article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub text: String,
}

impl Section {
    pub fn sentences(&self) -> Vec<&str> {
        split_sentences(&self.text)
    }
}

/// Plain text annotated with entity placeholders, ready for extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedArticle {
    pub wikid: String,
    pub title: String,
    pub aliases: Vec<String>,
    pub sections: Vec<Section>,
    pub surface_forms: SurfaceForms,
}

/// Multi-pass wiki markup rewriter.
///
/// Each pass is a pure `&str -> String` function. Passes are applied in order:
/// noise stripping, template fixing, structured-content removal, common-sense
/// link suppression, then wikilink harvesting.
#[derive(Debug, Clone)]
pub struct MarkupNormalizer {
    profile: LanguageProfile,
    harvester: WikilinkHarvester,
    resolve_redirects: bool,
}

impl MarkupNormalizer {
    pub fn new(profile: LanguageProfile, blacklists: Blacklists) -> Self {
        let harvester = WikilinkHarvester::new(&profile, blacklists);
        Self {
            profile,
            harvester,
            resolve_redirects: true,
        }
    }

    pub fn with_redirect_resolution(mut self, enabled: bool) -> Self {
        self.resolve_redirects = enabled;
        self
    }

    pub fn profile(&self) -> &LanguageProfile {
        &self.profile
    }

    pub fn harvester(&self) -> &WikilinkHarvester {
        &self.harvester
    }

    /// Run every pass over an article.
    pub fn normalize(&self, article: &WikiArticle, resolver: Option<&EntityResolver>) -> NormalizedArticle {
        let resolver = resolver.filter(|_| self.resolve_redirects);

        let text = self.strip_noise(&article.markup);
        let text = self.fix_templates(&text);
        let text = self.remove_structured(&text);
        let text = self.harvester.suppress_common_sense(&text);

        let mut normalized = NormalizedArticle {
            wikid: article.wikid.clone(),
            title: article.title.clone().unwrap_or_else(|| title_of(&article.wikid)),
            ..NormalizedArticle::default()
        };

        for (index, (name, body)) in self.split_sections(&text).into_iter().enumerate() {
            if index == 0 && name == ABSTRACT_SECTION {
                normalized.aliases = aliases_of(&body);
            }
            let harvest = self.harvester.harvest(&body, resolver);
            for (surface, ids) in harvest.surface_forms {
                normalized.surface_forms.entry(surface).or_default().extend(ids);
            }
            let text = final_clean(&harvest.text);
            if !text.is_empty() {
                normalized.sections.push(Section { name, text });
            }
        }

        debug!(
            "Normalized {}: {} sections, {} aliases, {} surface forms",
            normalized.wikid,
            normalized.sections.len(),
            normalized.aliases.len(),
            normalized.surface_forms.len()
        );
        normalized
    }

    /// Pass 1: comments, references, math and gallery blocks, HTML tags,
    /// indentation artifacts, interwiki/external links and TOC markers.
    pub fn strip_noise(&self, text: &str) -> String {
        let text = TOC_MARKER.replace_all(text, "");
        let text = INTERWIKI_LINK.replace_all(&text, " ");
        let text = EXTERNAL_LINK.replace_all(&text, "");
        let text = EXTERNAL_LINK_WITH_TEXT.replace_all(&text, "$1");
        let text = HTML_COMMENT.replace_all(&text, "");
        let text = BR_TAG.replace_all(&text, "");
        let text = SELF_CLOSING_REF.replace_all(&text, "");
        let text = REF_BLOCK.replace_all(&text, "");
        let text = MATH_BLOCK.replace_all(&text, "");
        let text = GALLERY_BLOCK.replace_all(&text, "");
        let text = HTML_TAG.replace_all(&text, "");
        let text = DEFINITION_LINE.replace_all(&text, "");
        let text = ITALIC_HATNOTE.replace_all(&text, "");
        INDENTATION.replace_all(&text, "\n").into_owned()
    }

    /// Pass 2: unescape entities (dumps are often escaped more than once),
    /// strip the HTML tags that unescaping reveals, and render unit
    /// conversion and language templates by their argument.
    pub fn fix_templates(&self, text: &str) -> String {
        let text = unescape_markup(text);
        let text = CONVERT_SHORT.replace_all(&text, "$1 $2");
        let text = CONVERT_LONG.replace_all(&text, "$1 $2");
        let text = LANG_TEMPLATE.replace_all(&text, "$1");
        let text = LANG_PREFIXED.replace_all(&text, "$1");
        NIHONGO.replace_all(&text, "$1").into_owned()
    }

    /// Pass 3: templates, tables, media embeds, category links and lists.
    pub fn remove_structured(&self, text: &str) -> String {
        let text = remove_nested(text, "{{", "}}", |_| true);
        let text = remove_nested(&text, "{|", "|}", |_| true);
        let text = remove_nested(&text, "[[", "]]", |rest| {
            namespace_of(rest).is_some_and(|ns| self.profile.is_media(ns) || self.profile.is_category(ns))
        });
        remove_list_lines(&text)
    }

    /// Split on `== Heading ==` lines. The lead is `#Abstract`; footer
    /// sections (and their subsections) are dropped.
    pub fn split_sections(&self, text: &str) -> Vec<(String, String)> {
        let mut sections = Vec::new();
        let mut name = ABSTRACT_SECTION.to_string();
        let mut body = String::new();
        let mut skip_below: Option<usize> = None;

        for line in text.lines() {
            if let Some(caps) = HEADING.captures(line) {
                let level = caps[1].len();
                if skip_below.is_none() {
                    sections.push((std::mem::take(&mut name), std::mem::take(&mut body)));
                } else {
                    body.clear();
                }
                match skip_below {
                    Some(footer_level) if level > footer_level => continue,
                    _ => skip_below = None,
                }
                let heading = caps[2].trim();
                if self.profile.is_footer(heading) {
                    skip_below = Some(level);
                    continue;
                }
                name = format!("#{}", heading);
                continue;
            }
            if skip_below.is_none() {
                body.push_str(line);
                body.push('\n');
            }
        }
        if skip_below.is_none() {
            sections.push((name, body));
        }

        sections.retain(|(_, body)| !body.trim().is_empty());
        sections
    }
}

/// Remove `open ... close` blocks, honouring nesting. `qualifies` sees the
/// text right after an opener and decides whether that block is removed.
/// Stray closers stay in place; an opener that is never closed is kept as
/// text and scanning resumes right after it.
fn remove_nested(text: &str, open: &str, close: &str, qualifies: impl Fn(&str) -> bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        let mut depth = 0usize;
        let mut block_start = 0usize;
        let mut copied_to = 0usize;
        let mut pos = 0usize;

        while pos < rest.len() {
            let tail = &rest[pos..];
            if tail.starts_with(open) {
                if depth > 0 || qualifies(&tail[open.len()..]) {
                    if depth == 0 {
                        block_start = pos;
                    }
                    depth += 1;
                }
                pos += open.len();
            } else if depth > 0 && tail.starts_with(close) {
                depth -= 1;
                pos += close.len();
                if depth == 0 {
                    out.push_str(&rest[copied_to..block_start]);
                    copied_to = pos;
                }
            } else {
                pos += tail.chars().next().map_or(1, char::len_utf8);
            }
        }

        if depth == 0 {
            out.push_str(&rest[copied_to..]);
            return out;
        }

        let literal_end = block_start + open.len();
        out.push_str(&rest[copied_to..literal_end]);
        rest = &rest[literal_end..];
    }
}

fn namespace_of(link_body: &str) -> Option<&str> {
    let (namespace, _) = link_body.split_once(':')?;
    (!namespace.contains(['|', ']', '['])).then_some(namespace)
}

fn remove_list_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if !line.trim_start().starts_with(['*', '#']) {
            out.push_str(line);
        }
    }
    out
}

/// Bold names of the lead section. Italic names keep their `''` quotes.
pub fn aliases_of(lead: &str) -> Vec<String> {
    let mut aliases: Vec<String> = Vec::new();
    for caps in BOLD_NAME.captures_iter(lead) {
        let name = caps[2].replace(['[', ']'], "");
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let alias = if caps.get(1).is_some() && caps.get(3).is_some() {
            format!("''{}''", name)
        } else {
            name.to_string()
        };
        if !aliases.contains(&alias) {
            aliases.push(alias);
        }
    }
    aliases
}

/// Collapse whitespace, drop bold emphasis (italics kept) and tidy commas.
pub fn final_clean(text: &str) -> String {
    let text = DOUBLE_SPACES.replace_all(text, " ");
    let text = BOLD_NAME.replace_all(&text, |caps: &Captures| {
        if caps.get(1).is_some() && caps.get(3).is_some() {
            format!("''{}''", &caps[2])
        } else {
            caps[2].to_string()
        }
    });
    let text = BLANK_LINES.replace_all(&text, "\n");
    text.replace(" , ", ", ").trim().to_string()
}

fn closes_sentence(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, ']' | '"' | '>')
}

/// Where the next sentence may begin: an optional quote, an optional
/// wikilink opener, then an uppercase letter; or an entity placeholder.
fn opens_sentence(rest: &str) -> bool {
    let rest = rest.strip_prefix('"').unwrap_or(rest);
    if let Some(tag) = rest.strip_prefix('<') {
        return tag.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    }
    let rest = rest.strip_prefix("[[").unwrap_or(rest);
    rest.chars().next().is_some_and(char::is_uppercase)
}

/// Split text into sentences after `.`, `?` or `!` (optionally followed by a
/// closing quote) when preceded by two lowercase letters, digits, brackets or
/// quotes and followed by whitespace and a sentence opener.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let chars: Vec<(usize, char)> = text.char_indices().collect();

    let mut i = 2usize;
    while i < chars.len() {
        let (pos, c) = chars[i];
        if !matches!(c, '.' | '?' | '!') || !closes_sentence(chars[i - 1].1) || !closes_sentence(chars[i - 2].1) {
            i += 1;
            continue;
        }

        let mut end = pos + c.len_utf8();
        let mut next = i + 1;
        if next < chars.len() && chars[next].1 == '"' {
            end += 1;
            next += 1;
        }
        let mut gap_end = next;
        while gap_end < chars.len() && chars[gap_end].1.is_whitespace() {
            gap_end += 1;
        }

        if gap_end > next && gap_end < chars.len() && opens_sentence(&text[chars[gap_end].0..]) {
            sentences.push(&text[start..end]);
            start = chars[gap_end].0;
            i = gap_end + 2;
        } else {
            i += 1;
        }
    }

    if start < text.len() {
        let tail = text[start..].trim_end();
        if !tail.is_empty() {
            sentences.push(tail);
        }
    }
    sentences
}

/// Remove parenthesised asides (and the space before them) until none are
/// left. Placeholders are never cut into.
pub fn remove_parenthesis(sentence: &str) -> String {
    let mut hidden: Vec<String> = Vec::new();
    let mut masked = PLACEHOLDER
        .replace_all(sentence, |caps: &Captures| {
            hidden.push(caps[0].to_string());
            format!("{}{}{}", MASK_OPEN, hidden.len() - 1, MASK_CLOSE)
        })
        .into_owned();

    while PARENTHESIS.is_match(&masked) {
        masked = PARENTHESIS.replace_all(&masked, "").into_owned();
    }

    let mut out = String::with_capacity(masked.len());
    let mut rest = masked.as_str();
    while let Some(open) = rest.find(MASK_OPEN) {
        out.push_str(&rest[..open]);
        let after = &rest[open + MASK_OPEN.len_utf8()..];
        match after.find(MASK_CLOSE) {
            Some(close) => {
                let restored = after[..close].parse::<usize>().ok().and_then(|i| hidden.get(i));
                if let Some(placeholder) = restored {
                    out.push_str(placeholder);
                }
                rest = &after[close + MASK_CLOSE.len_utf8()..];
            }
            None => {
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out.trim().to_string()
}

/// Decode entities and drop HTML tags until neither changes the text.
fn unescape_markup(text: &str) -> String {
    let mut text = text.to_string();
    for _ in 0..MAX_UNESCAPE_ROUNDS {
        let next = {
            let decoded = html_escape::decode_html_entities(&text);
            HTML_TAG.replace_all(&decoded, "").into_owned()
        };
        if next == text {
            break;
        }
        text = next;
    }
    text
}

/// Render placeholders back to plain names: `<SE-ORG<Real_Madrid>>` → `Real Madrid`.
pub fn strip_placeholders(text: &str) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| caps[1].replace('_', " "))
        .into_owned()
}

/// Human title of a wikid: underscores become spaces and a trailing
/// single-word disambiguation like ` (film)` is dropped.
pub fn title_of(wikid: &str) -> String {
    let title = wikid.replace('_', " ");
    DISAMBIGUATION_SUFFIX.replace(&title, "").into_owned()
}
