//! Rule tables: which pages each chapter of an edition has.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{ChapterId, ChapterRange, ChapterRule, Edition, SpecialChapter};
use crate::path_template::PathTemplate;

const DEFAULT_EXTENSION: &str = "jpg";

#[derive(Debug, Error)]
pub enum RuleTableError {
    #[error("failed to parse rule table {name}: {source}")]
    Parse {
        name: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown built-in edition '{0}'")]
    UnknownEdition(String),
    #[error("edition '{0}' inherits from itself")]
    InheritanceCycle(String),
    #[error("rule table {name} is invalid: {}", .violations.join("; "))]
    Invalid {
        name: String,
        violations: Vec<String>,
    },
}

#[derive(Debug, Deserialize)]
struct RuleTableRaw {
    id: Option<String>,
    title: Option<String>,
    inherits: Option<String>,
    chapters: Option<ChapterRangeRaw>,
    default_extension: Option<String>,
    path_template: Option<String>,
    specials: Option<Vec<SpecialRaw>>,
    #[serde(default)]
    rules: Vec<RuleRaw>,
}

#[derive(Debug, Deserialize)]
struct ChapterRangeRaw {
    min: Option<u32>,
    max: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct SpecialRaw {
    token: Option<TokenRaw>,
    after: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RuleRaw {
    id: Option<TokenRaw>,
    pages: Option<PagesRaw>,
    skip: Option<Vec<u32>>,
    extension: Option<String>,
    overrides: Option<BTreeMap<u32, String>>,
    path_template: Option<String>,
}

/// Plain chapter numbers may be written bare. A bare `90.2` arrives as a
/// float and has already lost its source text (`1.10` reads as `1.1`), so
/// special tokens must be quoted.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TokenRaw {
    Int(u64),
    Float(f64),
    Text(String),
}

impl TokenRaw {
    fn into_token(self) -> Result<String, String> {
        match self {
            TokenRaw::Int(value) => Ok(value.to_string()),
            TokenRaw::Float(value) => Err(format!(
                "bare number {value} is ambiguous; quote special chapter ids, e.g. \"{value}\""
            )),
            TokenRaw::Text(text) => Ok(text.trim().to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PagesRaw {
    Single(u32),
    Span(String),
}

impl PagesRaw {
    fn span(&self) -> Result<(u32, u32), String> {
        match self {
            PagesRaw::Single(page) => Ok((*page, *page)),
            PagesRaw::Span(text) => {
                let trimmed = text.trim();
                let (first, last) = match trimmed.split_once('-') {
                    Some((first, last)) => (first.trim(), last.trim()),
                    None => (trimmed, trimmed),
                };
                let first = first
                    .parse::<u32>()
                    .map_err(|_| format!("pages '{text}' must look like 'first-last'"))?;
                let last = last
                    .parse::<u32>()
                    .map_err(|_| format!("pages '{text}' must look like 'first-last'"))?;
                if first > last {
                    return Err(format!("pages '{text}' starts after it ends"));
                }
                Ok((first, last))
            }
        }
    }
}

/// Parses a rule table. `inherits` may only name a built-in edition.
pub fn parse_rule_table(source_name: &str, text: &str) -> Result<Edition, RuleTableError> {
    parse_with_parents(source_name, text, &mut Vec::new())
}

pub fn load_builtin_edition(name: &str) -> Result<Edition, RuleTableError> {
    resolve_builtin(name, &mut Vec::new())
}

pub fn load_rule_table(path: &Path) -> anyhow::Result<Edition> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read rule table {}", path.display()))?;
    let edition = parse_rule_table(&path.display().to_string(), &text)?;
    Ok(edition)
}

pub fn builtin_edition_names() -> Vec<&'static str> {
    panelsite_embedded_assets::edition_names()
}

fn resolve_builtin(name: &str, visiting: &mut Vec<String>) -> Result<Edition, RuleTableError> {
    if visiting.iter().any(|seen| seen == name) {
        return Err(RuleTableError::InheritanceCycle(name.to_string()));
    }
    let text = panelsite_embedded_assets::edition_yaml(name)
        .ok_or_else(|| RuleTableError::UnknownEdition(name.to_string()))?;
    visiting.push(name.to_string());
    let edition = parse_with_parents(&format!("builtin:{name}"), &text, visiting);
    visiting.pop();
    edition
}

fn parse_with_parents(
    source_name: &str,
    text: &str,
    visiting: &mut Vec<String>,
) -> Result<Edition, RuleTableError> {
    let raw: RuleTableRaw =
        serde_yaml::from_str(text).map_err(|source| RuleTableError::Parse {
            name: source_name.to_string(),
            source,
        })?;
    let parent = match raw.inherits.as_deref() {
        Some(name) => Some(resolve_builtin(name.trim(), visiting)?),
        None => None,
    };
    let mut violations = Vec::new();
    let edition = build_edition(raw, parent, &mut violations);
    if violations.is_empty() {
        Ok(edition)
    } else {
        Err(RuleTableError::Invalid {
            name: source_name.to_string(),
            violations,
        })
    }
}

fn build_edition(
    raw: RuleTableRaw,
    parent: Option<Edition>,
    violations: &mut Vec<String>,
) -> Edition {
    let id = match raw.id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => {
            violations.push("missing required field: id".to_string());
            String::new()
        }
    };
    let title = raw
        .title
        .filter(|title| !title.trim().is_empty())
        .unwrap_or_else(|| id.clone());

    let parent_range = parent.as_ref().map(|edition| edition.range);
    let min = raw
        .chapters
        .as_ref()
        .and_then(|chapters| chapters.min)
        .or(parent_range.map(|range| range.min));
    let max = raw
        .chapters
        .as_ref()
        .and_then(|chapters| chapters.max)
        .or(parent_range.map(|range| range.max));
    let range = match (min, max) {
        (Some(min), Some(max)) => {
            if min > max {
                violations.push(format!("chapters.min {min} is greater than chapters.max {max}"));
            }
            ChapterRange { min, max }
        }
        (None, _) => {
            violations.push("missing required field: chapters.min".to_string());
            ChapterRange { min: 0, max: 0 }
        }
        (_, None) => {
            violations.push("missing required field: chapters.max".to_string());
            ChapterRange { min: 0, max: 0 }
        }
    };

    let default_extension = match raw.default_extension {
        Some(ext) => {
            check_extension(&ext, "default_extension", violations);
            ext.trim().to_string()
        }
        None => parent
            .as_ref()
            .map(|edition| edition.default_extension.clone())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
    };

    let path_template = match raw.path_template {
        Some(pattern) => parse_template(&pattern, "path_template", violations),
        None => parent.as_ref().map(|edition| edition.path_template.clone()),
    }
    .unwrap_or_default();

    let specials = match raw.specials {
        Some(items) => build_specials(items, violations),
        None => parent
            .as_ref()
            .map(|edition| edition.specials.clone())
            .unwrap_or_default(),
    };

    let mut edition = Edition {
        id,
        title,
        range,
        specials,
        default_extension,
        path_template,
        rules: BTreeMap::new(),
    };

    if let Some(parent) = parent {
        let inherited: BTreeMap<ChapterId, ChapterRule> = parent
            .rules
            .into_iter()
            .filter(|(id, _)| edition.is_known(id))
            .collect();
        edition.rules = inherited;
    }

    let mut local_ids = BTreeSet::new();
    for (index, rule_raw) in raw.rules.into_iter().enumerate() {
        let Some(rule) = build_rule(index, rule_raw, &edition, violations) else {
            continue;
        };
        if !local_ids.insert(rule.id.clone()) {
            violations.push(format!("rules[{index}]: duplicate rule for chapter {}", rule.id));
            continue;
        }
        edition.rules.insert(rule.id.clone(), rule);
    }
    edition
}

fn build_specials(items: Vec<SpecialRaw>, violations: &mut Vec<String>) -> Vec<SpecialChapter> {
    let mut out: Vec<SpecialChapter> = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let field = format!("specials[{index}]");
        let token = match item.token.map(TokenRaw::into_token) {
            Some(Ok(token)) if !token.is_empty() => token,
            Some(Err(message)) => {
                violations.push(format!("{field}: token: {message}"));
                continue;
            }
            _ => {
                violations.push(format!("{field}: missing required field: token"));
                continue;
            }
        };
        if !matches!(ChapterId::parse_token(&token), Some(ChapterId::Special(_))) {
            violations.push(format!(
                "{field}: token '{token}' is a plain chapter number, not a special chapter"
            ));
            continue;
        }
        let Some(after) = item.after else {
            violations.push(format!("{field}: missing required field: after"));
            continue;
        };
        if out.iter().any(|special| special.token == token) {
            violations.push(format!("{field}: duplicate special token '{token}'"));
            continue;
        }
        out.push(SpecialChapter { token, after });
    }
    out
}

fn build_rule(
    index: usize,
    raw: RuleRaw,
    edition: &Edition,
    violations: &mut Vec<String>,
) -> Option<ChapterRule> {
    let field = format!("rules[{index}]");
    let token = match raw.id.map(TokenRaw::into_token) {
        Some(Ok(token)) => token,
        Some(Err(message)) => {
            violations.push(format!("{field}: id: {message}"));
            return None;
        }
        None => String::new(),
    };
    let Some(id) = ChapterId::parse_token(&token) else {
        violations.push(format!("{field}: missing required field: id"));
        return None;
    };
    let field = format!("{field} (chapter {id})");
    if !edition.is_known(&id) {
        violations.push(format!(
            "{field}: chapter is outside {}-{} and not a declared special",
            edition.range.min, edition.range.max
        ));
    }
    let Some(pages) = raw.pages else {
        violations.push(format!("{field}: missing required field: pages"));
        return None;
    };
    let (first, last) = match pages.span() {
        Ok(span) => span,
        Err(message) => {
            violations.push(format!("{field}: {message}"));
            return None;
        }
    };

    let mut rule = ChapterRule::new(id, first, last);
    for page in raw.skip.unwrap_or_default() {
        if page < first || page > last {
            violations.push(format!("{field}: skip page {page} is outside pages {first}-{last}"));
        } else if page == first || page == last {
            violations.push(format!(
                "{field}: skip page {page} is a bound of pages {first}-{last}; narrow the range instead"
            ));
        } else if !rule.excluded.insert(page) {
            violations.push(format!("{field}: skip page {page} listed twice"));
        }
    }

    if let Some(ext) = raw.extension {
        if check_extension(&ext, &format!("{field}: extension"), violations) {
            rule.extension = Some(ext.trim().to_string());
        }
    }

    for (page, ext) in raw.overrides.unwrap_or_default() {
        if page < first || page > last || rule.excluded.contains(&page) {
            violations.push(format!(
                "{field}: override for page {page} which the chapter does not have"
            ));
            continue;
        }
        if check_extension(&ext, &format!("{field}: overrides.{page}"), violations) {
            rule.extension_overrides.insert(page, ext.trim().to_string());
        }
    }

    if let Some(pattern) = raw.path_template {
        rule.path_template = parse_template(&pattern, &format!("{field}: path_template"), violations);
    }
    Some(rule)
}

fn parse_template(pattern: &str, field: &str, violations: &mut Vec<String>) -> Option<PathTemplate> {
    match PathTemplate::parse(pattern) {
        Ok(template) => Some(template),
        Err(err) => {
            violations.push(format!("{field}: {err}"));
            None
        }
    }
}

fn check_extension(ext: &str, field: &str, violations: &mut Vec<String>) -> bool {
    let trimmed = ext.trim();
    let valid = !trimmed.is_empty()
        && trimmed
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric());
    if !valid {
        violations.push(format!("{field} '{ext}' must be a bare file extension like 'jpg'"));
    }
    valid
}
