use serde::{Deserialize, Serialize};

/// Language-specific vocabulary used by markup normalization and extraction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LanguageProfile {
    pub code: String,
    #[serde(default)]
    pub category_identifiers: Vec<String>,
    #[serde(default)]
    pub list_identifiers: Vec<String>,
    #[serde(default)]
    pub media_identifiers: Vec<String>,
    #[serde(default)]
    pub footer_identifiers: Vec<String>,
    #[serde(default)]
    pub disambiguation_identifiers: Vec<String>,
    #[serde(default)]
    pub subordinating_conjunctions: Vec<String>,
    #[serde(default)]
    pub possessive_clitics: Vec<String>,
}

impl Default for LanguageProfile {
    fn default() -> Self {
        Self::english()
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl LanguageProfile {
    pub fn english() -> Self {
        Self {
            code: "en".to_string(),
            category_identifiers: strings(&["Category"]),
            list_identifiers: strings(&["List of", "Lists of", "Index of"]),
            media_identifiers: strings(&["File", "Image", "Media"]),
            footer_identifiers: strings(&[
                "See also",
                "References",
                "Further reading",
                "External links",
                "Related pages",
                "Notes",
                "Bibliography",
                "Sources",
            ]),
            disambiguation_identifiers: strings(&["disambiguation"]),
            subordinating_conjunctions: strings(&["that"]),
            possessive_clitics: strings(&["'s"]),
        }
    }

    pub fn is_footer(&self, heading: &str) -> bool {
        let heading = heading.trim();
        self.footer_identifiers
            .iter()
            .any(|f| f.eq_ignore_ascii_case(heading))
    }

    pub fn is_category(&self, namespace: &str) -> bool {
        let namespace = namespace.trim();
        self.category_identifiers
            .iter()
            .any(|c| c.eq_ignore_ascii_case(namespace))
    }

    pub fn is_media(&self, namespace: &str) -> bool {
        let namespace = namespace.trim();
        self.media_identifiers
            .iter()
            .any(|m| m.eq_ignore_ascii_case(namespace))
    }

    /// True if a page id ends in a disambiguation qualifier, as in
    /// `Mercury_(disambiguation)`.
    pub fn is_disambiguation_page(&self, wikid: &str) -> bool {
        let Some(open) = wikid.rfind("_(") else {
            return false;
        };
        let Some(qualifier) = wikid[open + 2..].strip_suffix(')') else {
            return false;
        };
        self.disambiguation_identifiers
            .iter()
            .any(|d| d.eq_ignore_ascii_case(qualifier))
    }

    pub fn ends_with_conjunction(&self, phrase: &str) -> bool {
        phrase
            .split_whitespace()
            .last()
            .map(|last| {
                let last = last.to_lowercase();
                self.subordinating_conjunctions.iter().any(|c| *c == last)
            })
            .unwrap_or(false)
    }

    pub fn starts_with_clitic(&self, text: &str) -> bool {
        self.possessive_clitics.iter().any(|c| text.starts_with(c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_english_profile() {
        let profile = LanguageProfile::english();

        assert!(profile.is_footer(" External links "));
        assert!(profile.is_footer("see also"));
        assert!(!profile.is_footer("Early life"));
        assert!(profile.is_category("Category"));
        assert!(profile.is_media("image"));
        assert!(profile.is_disambiguation_page("Mercury_(disambiguation)"));
        assert!(profile.is_disambiguation_page("Mercury_(Disambiguation)"));
        assert!(!profile.is_disambiguation_page("Mercury_(planet)"));
        assert!(!profile.is_disambiguation_page("Disambiguation"));
    }

    #[test]
    fn test_conjunction_and_clitic() {
        let profile = LanguageProfile::english();

        assert!(profile.ends_with_conjunction("argued that"));
        assert!(profile.ends_with_conjunction("argued That"));
        assert!(!profile.ends_with_conjunction("thatcher"));
        assert!(!profile.ends_with_conjunction(""));
        assert!(profile.starts_with_clitic("'s team"));
        assert!(!profile.starts_with_clitic(" team"));
    }
}
