//! Chapter index entries.

use serde::Serialize;

use crate::model::{ChapterId, Edition};
use crate::url::ChapterHref;

pub const DEFAULT_COMPACT_LABEL_MAX_WIDTH: u32 = 768;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    pub id: ChapterId,
    pub href: String,
    pub label: String,
    pub compact_label: String,
    pub has_pages: bool,
}

/// Same order as the navigator's selector.
pub fn list_chapters(edition: &Edition) -> Vec<ChapterId> {
    edition.chapter_order()
}

pub fn full_label(id: &ChapterId) -> String {
    format!("Chapter {id}")
}

pub fn compact_label(id: &ChapterId) -> String {
    id.to_string()
}

/// Narrow viewports (at or below `threshold` pixels) get the bare id.
pub fn label_for_width(id: &ChapterId, viewport_width: u32, threshold: u32) -> String {
    if viewport_width <= threshold {
        compact_label(id)
    } else {
        full_label(id)
    }
}

pub fn build_catalog(edition: &Edition, hrefs: &dyn ChapterHref) -> Vec<CatalogEntry> {
    list_chapters(edition)
        .into_iter()
        .map(|id| CatalogEntry {
            href: hrefs.href(&id),
            label: full_label(&id),
            compact_label: compact_label(&id),
            has_pages: edition.rule(&id).is_some(),
            id,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::ChapterNavigator;
    use crate::rule_table::load_builtin_edition;
    use crate::url::QueryHref;

    #[test]
    fn labels_switch_at_the_threshold() {
        let id = ChapterId::Number(42);
        assert_eq!(label_for_width(&id, 768, DEFAULT_COMPACT_LABEL_MAX_WIDTH), "42");
        assert_eq!(label_for_width(&id, 769, DEFAULT_COMPACT_LABEL_MAX_WIDTH), "Chapter 42");
        assert_eq!(label_for_width(&id, 320, 400), "42");
    }

    #[test]
    fn catalog_matches_selector_order() {
        let edition = load_builtin_edition("archive").expect("archive");
        let catalog = build_catalog(&edition, &QueryHref::default());
        let selector = ChapterNavigator::from_query(&edition, None).build_selector();
        let catalog_ids: Vec<&ChapterId> = catalog.iter().map(|entry| &entry.id).collect();
        let selector_ids: Vec<&ChapterId> = selector.iter().map(|option| &option.id).collect();
        assert_eq!(catalog_ids, selector_ids);
    }

    #[test]
    fn entries_report_whether_pages_are_known() {
        let edition = load_builtin_edition("archive").expect("archive");
        let catalog = build_catalog(&edition, &QueryHref::default());
        let bonus = catalog
            .iter()
            .find(|entry| entry.id == ChapterId::Special("90.2".to_string()))
            .expect("bonus entry");
        assert!(bonus.has_pages);
        assert_eq!(bonus.label, "Chapter 90.2");
        assert_eq!(bonus.compact_label, "90.2");
        assert_eq!(bonus.href, "chapter.html?id=90.2");
        let last = catalog.last().expect("entries");
        assert_eq!(last.id, ChapterId::Number(204));
        assert!(!last.has_pages);
    }

    #[test]
    fn solo_leveling_lists_one_to_one_hundred() {
        let edition = load_builtin_edition("solo-leveling").expect("edition");
        let chapters = list_chapters(&edition);
        assert_eq!(chapters.len(), 100);
        assert_eq!(chapters.first(), Some(&ChapterId::Number(1)));
        assert_eq!(chapters.last(), Some(&ChapterId::Number(100)));
    }
}
