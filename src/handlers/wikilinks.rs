use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;
use tracing::debug;

use crate::config::LanguageProfile;
use crate::knowledge_graph::EntityResolver;

/// Role tag of placeholders produced by harvesting.
pub const HARVESTED_ROLE: &str = "SE-ORG";

/// Surface form → ids of the links rendered with that text.
pub type SurfaceForms = BTreeMap<String, BTreeSet<String>>;

static ENTITY_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"('')?\[\[+([^\]|]*\|)?('')?([^\]]*?)('')?\]\]+('')?").expect("Invalid regex")
});

static EMPTY_ANCHOR_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[\[+([^\]|]+)\|\]\]+").expect("Invalid regex"));

static TEMPLATE_ANCHOR_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[+([^\]|]+)\|('')?([^{\]]*\{\{[^}]*\}\}[^\]]*)('')?\]\]+").expect("Invalid regex")
});

static LOWERCASE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[+([^\]|]*\|)?('')?([a-z][^A-Z\]'][^\]]*?)('')?\]\]+").expect("Invalid regex")
});

static SPECIAL_CHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9/@#!-*$%^'&._+={}()]+$").expect("Invalid regex"));

/// Link targets and anchor texts that never become entities.
#[derive(Debug, Clone, Default)]
pub struct Blacklists {
    targets: HashSet<String>,
    names: HashSet<String>,
}

impl Blacklists {
    /// `targets` are matched against link ids (currencies, professions),
    /// `names` against rendered text (nationalities).
    pub fn new(targets: HashSet<String>, names: HashSet<String>) -> Self {
        Self { targets, names }
    }

    pub fn blocks_target(&self, wikid: &str) -> bool {
        self.targets.contains(wikid)
    }

    pub fn blocks_name(&self, rendered: &str) -> bool {
        self.names.contains(rendered)
    }

    pub fn len(&self) -> usize {
        self.targets.len() + self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Harvested text plus the surface-form mapping collected on the way.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Harvest {
    pub text: String,
    pub surface_forms: SurfaceForms,
}

/// Rewrites wikilinks into entity placeholders.
#[derive(Debug, Clone)]
pub struct WikilinkHarvester {
    profile: LanguageProfile,
    blacklists: Blacklists,
    category_prefixes: Vec<String>,
    list_link: Option<Regex>,
}

impl WikilinkHarvester {
    pub fn new(profile: &LanguageProfile, blacklists: Blacklists) -> Self {
        let list_link = if profile.list_identifiers.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = profile
                .list_identifiers
                .iter()
                .map(|l| regex::escape(l).replace(' ', "[ _]"))
                .collect();
            Regex::new(&format!(
                r"\[\[+((?:{})[^|\]]*)(?:\|('')?([^\]]+?)('')?)?\]\]+",
                alternatives.join("|")
            ))
            .ok()
        };

        Self {
            profile: profile.clone(),
            blacklists,
            category_prefixes: profile
                .category_identifiers
                .iter()
                .map(|c| format!("{}:", c))
                .collect(),
            list_link,
        }
    }

    /// Render "common-sense" links as plain text: empty anchors, anchors
    /// built from templates, links to list pages and all-lowercase anchors.
    /// Runs before [`harvest`](Self::harvest), which would otherwise turn
    /// them into entities.
    pub fn suppress_common_sense(&self, text: &str) -> String {
        let text = clean_empty_anchors(text);
        let text = self.remove_list_links(&text);
        let text = remove_template_anchors(&text);
        remove_lowercase_links(&text)
    }

    fn remove_list_links(&self, text: &str) -> String {
        let Some(list_link) = &self.list_link else {
            return text.to_string();
        };
        list_link
            .replace_all(text, |caps: &Captures| match caps.get(3) {
                Some(anchor) => italic_aware(caps.get(2), anchor.as_str(), caps.get(4)),
                None => caps[1].replace('_', " "),
            })
            .into_owned()
    }

    /// Replace every surviving wikilink with a `<SE-ORG<id>>` placeholder.
    ///
    /// Link ids go through redirect resolution when a resolver is given.
    /// Blacklisted links, links to disambiguation pages and anchors made only
    /// of digits or punctuation are rendered as plain text. Category links are
    /// left untouched.
    pub fn harvest(&self, text: &str, resolver: Option<&EntityResolver>) -> Harvest {
        let mut surface_forms = SurfaceForms::new();
        let mut kept_as_text = 0usize;

        let rewritten = ENTITY_LINK.replace_all(text, |caps: &Captures| {
            let anchor = caps.get(4).map_or("", |m| m.as_str());
            let (raw_target, rendered) = match caps.get(2) {
                Some(target) => {
                    let target = target.as_str();
                    let rendered = if caps.get(3).is_some() && caps.get(5).is_some() {
                        format!("''{}''", anchor)
                    } else if caps.get(1).is_some() && caps.get(6).is_some() {
                        format!("''{}''", anchor)
                    } else {
                        anchor.to_string()
                    };
                    (&target[..target.len() - 1], rendered)
                }
                None => (anchor, anchor.to_string()),
            };

            if self.is_category(raw_target) || self.is_category(&rendered) {
                return caps[0].to_string();
            }

            let mut wikid = link_target_id(raw_target);
            if wikid.is_empty() {
                kept_as_text += 1;
                return rendered;
            }
            if let Some(resolver) = resolver {
                wikid = resolver.resolve(&wikid);
            }

            if self.blacklists.blocks_target(&wikid)
                || self.blacklists.blocks_name(&rendered)
                || self.profile.is_disambiguation_page(&wikid)
                || rendered.is_empty()
                || SPECIAL_CHARACTERS.is_match(&rendered)
            {
                kept_as_text += 1;
                return rendered;
            }

            let placeholder = format!("<{}<{}>>", HARVESTED_ROLE, wikid);
            surface_forms.entry(rendered).or_default().insert(wikid);
            placeholder
        });

        let text = rewritten.into_owned();
        debug!(
            "Harvested {} surface forms, {} links kept as text",
            surface_forms.len(),
            kept_as_text
        );
        Harvest { text, surface_forms }
    }

    fn is_category(&self, text: &str) -> bool {
        self.category_prefixes.iter().any(|p| text.starts_with(p.as_str()))
    }
}

/// Canonical id of a link target: spaces become underscores and any
/// `#section` fragment is dropped.
pub fn link_target_id(target: &str) -> String {
    let target = target.split('#').next().unwrap_or_default();
    target.trim().replace(' ', "_")
}

fn italic_aware(open: Option<regex::Match>, anchor: &str, close: Option<regex::Match>) -> String {
    if open.is_some() && close.is_some() {
        format!("''{}''", anchor)
    } else {
        anchor.to_string()
    }
}

/// `[[Target#Section|]]` becomes `Target Section`.
fn clean_empty_anchors(text: &str) -> String {
    EMPTY_ANCHOR_LINK
        .replace_all(text, |caps: &Captures| caps[1].replace(['_', '#'], " "))
        .into_owned()
}

/// `[[Target|{{tpl}} name]]` becomes `{{tpl}} name`; if the anchor is only
/// punctuation the bare link `[[Target]]` is kept.
fn remove_template_anchors(text: &str) -> String {
    TEMPLATE_ANCHOR_LINK
        .replace_all(text, |caps: &Captures| {
            let anchor = &caps[3];
            if SPECIAL_CHARACTERS.is_match(anchor) {
                format!("[[{}]]", &caps[1])
            } else {
                italic_aware(caps.get(2), anchor, caps.get(4))
            }
        })
        .into_owned()
}

fn remove_lowercase_links(text: &str) -> String {
    LOWERCASE_LINK
        .replace_all(text, |caps: &Captures| italic_aware(caps.get(2), &caps[3], caps.get(4)))
        .into_owned()
}
