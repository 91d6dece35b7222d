use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::handlers::markup::NormalizedArticle;

pub const TITLE_ROLE: &str = "PE-TITLE";
pub const ALIAS_ROLE: &str = "PE-ALIAS";
pub const AUGMENTED_ROLE: &str = "SE-AUG";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[A-Z-][^>]*?>>").expect("Invalid regex"));

#[derive(Debug, Clone)]
struct Candidate {
    surface: String,
    tag: String,
}

/// Tags plain-text mentions of known entities after wikilink harvesting.
///
/// The article's title and bold aliases denote the article itself; harvested
/// surface forms that denote exactly one id become augmented mentions. One
/// detector is owned by each worker.
#[derive(Debug, Default)]
pub struct EntityDetector {
    by_first_char: HashMap<char, Vec<usize>>,
    candidates: Vec<Candidate>,
    mentions: u64,
}

impl EntityDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total mentions tagged by this detector.
    pub fn mentions(&self) -> u64 {
        self.mentions
    }

    /// Tag mentions in every section of the article, in place.
    pub fn annotate(&mut self, article: &mut NormalizedArticle) {
        self.prepare(article);
        if self.candidates.is_empty() {
            return;
        }
        for section in &mut article.sections {
            let tagged = self.tag_text(&section.text);
            section.text = tagged;
        }
    }

    fn prepare(&mut self, article: &NormalizedArticle) {
        self.candidates.clear();
        self.by_first_char.clear();

        let primary = format!("<{}<{}>>", TITLE_ROLE, article.wikid);
        self.push(&article.title, primary);
        for alias in &article.aliases {
            self.push(alias, format!("<{}<{}>>", ALIAS_ROLE, article.wikid));
        }
        for (surface, ids) in &article.surface_forms {
            if let (1, Some(id)) = (ids.len(), ids.iter().next()) {
                self.push(surface, format!("<{}<{}>>", AUGMENTED_ROLE, id));
            }
        }

        // Longest surface first; ties keep insertion order, so primary entities win.
        let mut order: Vec<usize> = (0..self.candidates.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.candidates[i].surface.chars().count()));
        for i in order {
            if let Some(first) = self.candidates[i].surface.chars().next() {
                self.by_first_char.entry(first).or_default().push(i);
            }
        }
    }

    fn push(&mut self, surface: &str, tag: String) {
        let surface = surface.trim();
        if surface.chars().count() < 2 || self.candidates.iter().any(|c| c.surface == surface) {
            return;
        }
        self.candidates.push(Candidate {
            surface: surface.to_string(),
            tag,
        });
    }

    fn tag_text(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        let mut last = 0usize;
        for placeholder in PLACEHOLDER.find_iter(text) {
            self.tag_plain(&text[last..placeholder.start()], &mut out);
            out.push_str(placeholder.as_str());
            last = placeholder.end();
        }
        self.tag_plain(&text[last..], &mut out);
        out
    }

    fn tag_plain(&mut self, plain: &str, out: &mut String) {
        let mut pos = 0usize;
        let mut previous: Option<char> = None;

        while let Some(c) = plain[pos..].chars().next() {
            let at_word_start = previous.map_or(true, |p| !p.is_alphanumeric());
            let matched = if at_word_start {
                self.match_at(&plain[pos..])
            } else {
                None
            };

            match matched {
                Some((len, index)) => {
                    out.push_str(&self.candidates[index].tag);
                    previous = plain[..pos + len].chars().next_back();
                    pos += len;
                    self.mentions += 1;
                }
                None => {
                    out.push(c);
                    previous = Some(c);
                    pos += c.len_utf8();
                }
            }
        }
    }

    fn match_at(&self, rest: &str) -> Option<(usize, usize)> {
        let first = rest.chars().next()?;
        self.by_first_char.get(&first)?.iter().find_map(|&index| {
            let surface = &self.candidates[index].surface;
            let after = rest.strip_prefix(surface.as_str())?;
            let ends_word = after.chars().next().map_or(true, |c| !c.is_alphanumeric());
            ends_word.then_some((surface.len(), index))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::markup::Section;
    use std::collections::BTreeSet;

    fn article(text: &str) -> NormalizedArticle {
        let mut surface_forms = std::collections::BTreeMap::new();
        surface_forms.insert("Ulm".to_string(), BTreeSet::from(["Ulm".to_string()]));
        surface_forms.insert(
            "Paris".to_string(),
            BTreeSet::from(["Paris".to_string(), "Paris,_Texas".to_string()]),
        );
        surface_forms.insert(
            "Kingdom of Württemberg".to_string(),
            BTreeSet::from(["Kingdom_of_Württemberg".to_string()]),
        );
        NormalizedArticle {
            wikid: "Albert_Einstein".to_string(),
            title: "Albert Einstein".to_string(),
            aliases: vec!["Einstein".to_string()],
            sections: vec![Section {
                name: "#Abstract".to_string(),
                text: text.to_string(),
            }],
            surface_forms,
        }
    }

    #[test]
    fn test_primary_and_secondary_mentions() {
        let mut article = article("Albert Einstein left Ulm. Later Einstein visited Paris.");
        let mut detector = EntityDetector::new();
        detector.annotate(&mut article);

        assert_eq!(
            article.sections[0].text,
            "<PE-TITLE<Albert_Einstein>> left <SE-AUG<Ulm>>. Later <PE-ALIAS<Albert_Einstein>> visited Paris."
        );
        assert_eq!(detector.mentions(), 3);
    }

    #[test]
    fn test_longest_match_and_whole_words() {
        let mut article = article("Born in the Kingdom of Württemberg near Ulmer and Ulm");
        EntityDetector::new().annotate(&mut article);

        assert_eq!(
            article.sections[0].text,
            "Born in the <SE-AUG<Kingdom_of_Württemberg>> near Ulmer and <SE-AUG<Ulm>>"
        );
    }

    #[test]
    fn test_placeholders_are_not_rewritten() {
        let mut article = article("<SE-ORG<Ulm>> is where Einstein was born");
        EntityDetector::new().annotate(&mut article);

        assert_eq!(
            article.sections[0].text,
            "<SE-ORG<Ulm>> is where <PE-ALIAS<Albert_Einstein>> was born"
        );
    }

    #[test]
    fn test_detector_is_reusable_across_articles() {
        let mut detector = EntityDetector::new();
        let mut first = article("Ulm");
        detector.annotate(&mut first);

        let mut second = NormalizedArticle {
            wikid: "Rome".to_string(),
            title: "Rome".to_string(),
            sections: vec![Section {
                name: "#Abstract".to_string(),
                text: "Rome and Ulm".to_string(),
            }],
            ..NormalizedArticle::default()
        };
        detector.annotate(&mut second);

        assert_eq!(second.sections[0].text, "<PE-TITLE<Rome>> and Ulm");
    }
}
