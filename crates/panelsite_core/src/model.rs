//! Core chapter and site models

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::path_template::PathTemplate;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChapterId {
    Number(u32),
    Special(String),
}

impl ChapterId {
    /// All-digit tokens are numbered chapters, anything else is a special token.
    pub fn parse_token(token: &str) -> Option<Self> {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            return trimmed.parse::<u32>().ok().map(ChapterId::Number);
        }
        Some(ChapterId::Special(trimmed.to_string()))
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            ChapterId::Number(value) => Some(*value),
            ChapterId::Special(_) => None,
        }
    }

    pub fn is_special(&self) -> bool {
        matches!(self, ChapterId::Special(_))
    }
}

impl fmt::Display for ChapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChapterId::Number(value) => write!(f, "{value}"),
            ChapterId::Special(token) => f.write_str(token),
        }
    }
}

impl From<u32> for ChapterId {
    fn from(value: u32) -> Self {
        ChapterId::Number(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterRule {
    pub id: ChapterId,
    pub first_page: u32,
    pub last_page: u32,
    pub excluded: BTreeSet<u32>,
    pub extension: Option<String>,
    pub extension_overrides: BTreeMap<u32, String>,
    pub path_template: Option<PathTemplate>,
}

impl ChapterRule {
    pub fn new(id: ChapterId, first_page: u32, last_page: u32) -> Self {
        Self {
            id,
            first_page,
            last_page,
            excluded: BTreeSet::new(),
            extension: None,
            extension_overrides: BTreeMap::new(),
            path_template: None,
        }
    }

    pub fn page_count(&self) -> usize {
        if self.last_page < self.first_page {
            return 0;
        }
        let span = (self.last_page - self.first_page) as usize + 1;
        span.saturating_sub(self.excluded.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChapterRange {
    pub min: u32,
    pub max: u32,
}

impl ChapterRange {
    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clamp(&self, value: i64) -> u32 {
        if value < i64::from(self.min) {
            self.min
        } else if value > i64::from(self.max) {
            self.max
        } else {
            value as u32
        }
    }
}

/// A non-integer chapter shown directly after the numbered chapter `after`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpecialChapter {
    pub token: String,
    pub after: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edition {
    pub id: String,
    pub title: String,
    pub range: ChapterRange,
    pub specials: Vec<SpecialChapter>,
    pub default_extension: String,
    pub path_template: PathTemplate,
    pub rules: BTreeMap<ChapterId, ChapterRule>,
}

impl Edition {
    pub fn rule(&self, id: &ChapterId) -> Option<&ChapterRule> {
        self.rules.get(id)
    }

    pub fn special(&self, token: &str) -> Option<&SpecialChapter> {
        self.specials.iter().find(|special| special.token == token)
    }

    /// Whether `id` names a chapter of this edition.
    pub fn is_known(&self, id: &ChapterId) -> bool {
        match id {
            ChapterId::Number(value) => self.range.contains(*value),
            ChapterId::Special(token) => self.special(token).is_some(),
        }
    }

    /// Display order: ascending numbers with each special token placed right
    /// after the chapter it follows.
    pub fn chapter_order(&self) -> Vec<ChapterId> {
        let mut order = Vec::with_capacity((self.range.max - self.range.min) as usize + 1);
        let mut leading: Vec<&SpecialChapter> = self
            .specials
            .iter()
            .filter(|special| special.after < self.range.min)
            .collect();
        leading.sort_by(|a, b| a.after.cmp(&b.after));
        for special in leading {
            order.push(ChapterId::Special(special.token.clone()));
        }
        for number in self.range.min..=self.range.max {
            order.push(ChapterId::Number(number));
            for special in self.specials.iter().filter(|special| special.after == number) {
                order.push(ChapterId::Special(special.token.clone()));
            }
        }
        for special in self.specials.iter().filter(|special| special.after > self.range.max) {
            order.push(ChapterId::Special(special.token.clone()));
        }
        order
    }

    pub fn extension_for(&self, rule: &ChapterRule, page: u32) -> String {
        rule.extension_overrides
            .get(&page)
            .or(rule.extension.as_ref())
            .cloned()
            .unwrap_or_else(|| self.default_extension.clone())
    }

    pub fn template_for<'a>(&'a self, rule: &'a ChapterRule) -> &'a PathTemplate {
        rule.path_template.as_ref().unwrap_or(&self.path_template)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageDescriptor {
    pub chapter: ChapterId,
    pub page_number: u32,
    pub extension: String,
    pub file_path: String,
    pub alt_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ManifestEntry {
    Page(PageDescriptor),
    Placeholder { slot: usize },
}

impl ManifestEntry {
    pub fn page(&self) -> Option<&PageDescriptor> {
        match self {
            ManifestEntry::Page(page) => Some(page),
            ManifestEntry::Placeholder { .. } => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, ManifestEntry::Placeholder { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSource {
    Rule,
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Manifest {
    pub chapter: ChapterId,
    pub source: ManifestSource,
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn pages(&self) -> impl Iterator<Item = &PageDescriptor> {
        self.entries.iter().filter_map(ManifestEntry::page)
    }

    pub fn is_placeholder(&self) -> bool {
        self.source == ManifestSource::Placeholder
    }

    /// Re-derives `(first, last, excluded)` from the resolved pages.
    pub fn page_span(&self) -> Option<(u32, u32, BTreeSet<u32>)> {
        let numbers: Vec<u32> = self.pages().map(|page| page.page_number).collect();
        let first = *numbers.first()?;
        let last = *numbers.last()?;
        let present: BTreeSet<u32> = numbers.iter().copied().collect();
        let excluded = (first..=last)
            .filter(|number| !present.contains(number))
            .collect();
        Some((first, last, excluded))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStyle {
    #[default]
    Html,
    Pretty,
    PrettyWithFallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteMeta {
    pub id: String,
    pub title: String,
    pub tagline: Option<String>,
    pub about: Option<String>,
    pub copyright: Option<String>,
    pub base_url: String,
    pub language: String,
    pub url_style: UrlStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum EditionSource {
    Builtin(String),
    File(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct ReaderConfig {
    pub placeholder_pages: usize,
    pub compact_label_max_width: u32,
    pub images_dir: String,
    pub check_images: bool,
    pub featured_chapters: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssetsConfig {
    pub cache_busting: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FooterConfig {
    pub show_generator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavItem {
    pub label: String,
    pub href: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SiteConfig {
    pub site: SiteMeta,
    pub edition: EditionSource,
    pub reader: ReaderConfig,
    pub assets: AssetsConfig,
    pub footer: FooterConfig,
    pub nav: Vec<NavItem>,
}

#[derive(Debug, Clone)]
pub struct Project {
    pub root: PathBuf,
    pub config: SiteConfig,
    pub edition: Edition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Hint,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub source_path: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn error(source_path: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Error,
            source_path,
            message: message.into(),
        }
    }

    pub fn warning(source_path: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Warning,
            source_path,
            message: message.into(),
        }
    }

    pub fn hint(source_path: Option<String>, message: impl Into<String>) -> Self {
        Self {
            level: DiagnosticLevel::Hint,
            source_path,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new(kind: &str, parts: &[&str]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"panelsite.task.v1");
        hasher.update(&(kind.len() as u64).to_le_bytes());
        hasher.update(kind.as_bytes());
        for part in parts {
            hasher.update(&(part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        let hex = hasher.finalize().to_hex();
        TaskId(format!("{kind}-{}", &hex[..16]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFingerprint(pub [u8; 32]);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskKind {
    RenderChapter { chapter: ChapterId },
    RenderCatalog,
    RenderHome,
    RenderRedirect,
    CopyImage { chapter: ChapterId, rel: String },
    CopyAsset {
        rel: String,
        source: String,
        out_rel: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputArtifact {
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BuildTask {
    pub id: TaskId,
    pub kind: TaskKind,
    pub inputs_fingerprint: InputFingerprint,
    pub outputs: Vec<OutputArtifact>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildPlan {
    pub tasks: Vec<BuildTask>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edition() -> Edition {
        Edition {
            id: "demo".to_string(),
            title: "Demo".to_string(),
            range: ChapterRange { min: 0, max: 3 },
            specials: vec![SpecialChapter {
                token: "1.5".to_string(),
                after: 1,
            }],
            default_extension: "jpg".to_string(),
            path_template: PathTemplate::default(),
            rules: BTreeMap::new(),
        }
    }

    #[test]
    fn parse_token_splits_numbers_and_specials() {
        assert_eq!(ChapterId::parse_token(" 12 "), Some(ChapterId::Number(12)));
        assert_eq!(
            ChapterId::parse_token("90.2"),
            Some(ChapterId::Special("90.2".to_string()))
        );
        assert_eq!(ChapterId::parse_token(""), None);
        assert_eq!(ChapterId::Special("90.2".to_string()).to_string(), "90.2");
    }

    #[test]
    fn specials_follow_their_anchor() {
        let order: Vec<String> = edition()
            .chapter_order()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(order, ["0", "1", "1.5", "2", "3"]);
    }

    #[test]
    fn clamp_saturates_at_both_ends() {
        let range = ChapterRange { min: 1, max: 204 };
        assert_eq!(range.clamp(-3), 1);
        assert_eq!(range.clamp(999), 204);
        assert_eq!(range.clamp(90), 90);
    }

    #[test]
    fn overrides_win_over_chapter_extension() {
        let edition = edition();
        let mut rule = ChapterRule::new(ChapterId::Number(2), 1, 30);
        rule.extension = Some("png".to_string());
        rule.extension_overrides.insert(30, "webp".to_string());
        assert_eq!(edition.extension_for(&rule, 1), "png");
        assert_eq!(edition.extension_for(&rule, 30), "webp");
        let plain = ChapterRule::new(ChapterId::Number(3), 1, 2);
        assert_eq!(edition.extension_for(&plain, 1), "jpg");
    }
}
