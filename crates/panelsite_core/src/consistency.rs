//! Cross-checks an edition's rule table against the image files on disk.

use std::collections::{BTreeMap, BTreeSet};

use crate::manifest::expand_rule;
use crate::model::{ChapterId, Diagnostic, Edition};

/// `files` holds site-relative paths with `/` separators, e.g.
/// `images/chapter 12/03.jpg`. `images_dir` bounds the search for stray
/// directories.
pub fn check_consistency(
    edition: &Edition,
    files: &BTreeSet<String>,
    images_dir: &str,
) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    let by_dir = files_by_dir(files);
    let mut known_dirs = BTreeSet::new();

    for chapter in edition.chapter_order() {
        let chapter_dir = edition
            .rule(&chapter)
            .map(|rule| edition.template_for(rule))
            .unwrap_or(&edition.path_template)
            .chapter_dir(&chapter);
        if let Some(dir) = &chapter_dir {
            known_dirs.insert(dir.clone());
        }
        match edition.rule(&chapter) {
            Some(rule) => {
                let pages = expand_rule(rule, edition);
                let referenced: BTreeSet<&str> =
                    pages.iter().map(|page| page.file_path.as_str()).collect();
                for page in &pages {
                    if files.contains(&page.file_path) {
                        continue;
                    }
                    diagnostics.push(Diagnostic::error(
                        Some(page.file_path.clone()),
                        format!(
                            "chapter {chapter} page {} is missing",
                            page.page_number
                        ),
                    ));
                    if let Some(sibling) = sibling_with_other_extension(&page.file_path, files) {
                        diagnostics.push(Diagnostic::hint(
                            Some(sibling.clone()),
                            format!(
                                "found {sibling}; chapter {chapter} page {} may need an extension override",
                                page.page_number
                            ),
                        ));
                    }
                }
                if let Some(dir) = &chapter_dir {
                    for file in by_dir.get(dir.as_str()).into_iter().flatten() {
                        if referenced.contains(file.as_str()) || is_sibling_of_missing(file, &referenced, files) {
                            continue;
                        }
                        diagnostics.push(Diagnostic::warning(
                            Some(file.to_string()),
                            format!(
                                "not referenced by the rule for chapter {chapter}; its page range or skip list may be stale"
                            ),
                        ));
                    }
                }
            }
            None => {
                let has_files = chapter_dir
                    .as_deref()
                    .and_then(|dir| by_dir.get(dir))
                    .is_some_and(|files| !files.is_empty());
                if has_files {
                    diagnostics.push(Diagnostic::warning(
                        chapter_dir.clone(),
                        format!("chapter {chapter} has images but no rule; it renders placeholders"),
                    ));
                }
            }
        }
    }

    let prefix = format!("{}/", images_dir.trim_matches('/'));
    for dir in by_dir.keys() {
        let inside = dir.starts_with(&prefix) || *dir == prefix.trim_end_matches('/');
        if inside && !known_dirs.contains(*dir) {
            diagnostics.push(Diagnostic::warning(
                Some((*dir).to_string()),
                "directory does not belong to any chapter of this edition",
            ));
        }
    }
    diagnostics
}

fn files_by_dir(files: &BTreeSet<String>) -> BTreeMap<&str, Vec<&String>> {
    let mut out: BTreeMap<&str, Vec<&String>> = BTreeMap::new();
    for file in files {
        let dir = file.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("");
        out.entry(dir).or_default().push(file);
    }
    out
}

fn split_extension(path: &str) -> Option<(&str, &str)> {
    let (stem, ext) = path.rsplit_once('.')?;
    if ext.contains('/') {
        return None;
    }
    Some((stem, ext))
}

fn sibling_with_other_extension<'a>(path: &str, files: &'a BTreeSet<String>) -> Option<&'a String> {
    let (stem, ext) = split_extension(path)?;
    files.iter().find(|candidate| {
        split_extension(candidate)
            .is_some_and(|(other_stem, other_ext)| other_stem == stem && other_ext != ext)
    })
}

/// Files already reported through a missing page's extension hint.
fn is_sibling_of_missing(file: &str, referenced: &BTreeSet<&str>, files: &BTreeSet<String>) -> bool {
    let Some((stem, _)) = split_extension(file) else {
        return false;
    };
    referenced.iter().any(|path| {
        !files.contains(*path) && split_extension(path).is_some_and(|(other, _)| other == stem)
    })
}

/// Chapters whose rule references at least one file that exists.
pub fn chapters_with_files(edition: &Edition, files: &BTreeSet<String>) -> BTreeSet<ChapterId> {
    edition
        .rules
        .values()
        .filter(|rule| {
            expand_rule(rule, edition)
                .iter()
                .any(|page| files.contains(&page.file_path))
        })
        .map(|rule| rule.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterRange, ChapterRule, DiagnosticLevel};
    use crate::path_template::PathTemplate;

    fn edition() -> Edition {
        let mut rule = ChapterRule::new(ChapterId::Number(1), 1, 4);
        rule.excluded.insert(3);
        let mut edition = Edition {
            id: "test".to_string(),
            title: "Test".to_string(),
            range: ChapterRange { min: 1, max: 3 },
            specials: Vec::new(),
            default_extension: "jpg".to_string(),
            path_template: PathTemplate::default(),
            rules: Default::default(),
        };
        edition.rules.insert(rule.id.clone(), rule);
        edition
    }

    fn files(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|path| path.to_string()).collect()
    }

    #[test]
    fn complete_chapter_is_clean() {
        let files = files(&[
            "images/chapter 1/01.jpg",
            "images/chapter 1/02.jpg",
            "images/chapter 1/04.jpg",
        ]);
        assert!(check_consistency(&edition(), &files, "images").is_empty());
    }

    #[test]
    fn reports_missing_stale_and_extension_problems() {
        let files = files(&[
            "images/chapter 1/01.jpg",
            "images/chapter 1/02.png",
            "images/chapter 1/03.jpg",
            "images/chapter 1/04.jpg",
            "images/chapter 2/01.jpg",
            "images/chapter 9/01.jpg",
        ]);
        let diagnostics = check_consistency(&edition(), &files, "images");
        let by_level = |level: DiagnosticLevel| -> Vec<&Diagnostic> {
            diagnostics.iter().filter(|diag| diag.level == level).collect()
        };

        let errors = by_level(DiagnosticLevel::Error);
        assert_eq!(errors.len(), 1, "{diagnostics:?}");
        assert_eq!(errors[0].source_path.as_deref(), Some("images/chapter 1/02.jpg"));

        let hints = by_level(DiagnosticLevel::Hint);
        assert_eq!(hints.len(), 1);
        assert!(hints[0].message.contains("extension override"));

        let warnings = by_level(DiagnosticLevel::Warning);
        let sources: Vec<&str> = warnings
            .iter()
            .filter_map(|diag| diag.source_path.as_deref())
            .collect();
        assert_eq!(
            sources,
            ["images/chapter 1/03.jpg", "images/chapter 2", "images/chapter 9"]
        );
    }

    #[test]
    fn chapters_with_files_ignores_empty_rules() {
        let present = chapters_with_files(&edition(), &files(&["images/chapter 1/04.jpg"]));
        assert_eq!(present, BTreeSet::from([ChapterId::Number(1)]));
        assert!(chapters_with_files(&edition(), &BTreeSet::new()).is_empty());
    }
}
