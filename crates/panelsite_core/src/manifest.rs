use thiserror::Error;
use tracing::debug;

use crate::model::{
    ChapterId, ChapterRule, Edition, Manifest, ManifestEntry, ManifestSource, PageDescriptor,
};

pub const DEFAULT_PLACEHOLDER_PAGES: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no page rule for chapter {0}")]
    UnknownChapter(ChapterId),
}

/// Turns chapter ids into page manifests using an edition's rule table.
#[derive(Debug, Clone, Copy)]
pub struct ManifestResolver<'a> {
    edition: &'a Edition,
    placeholder_pages: usize,
}

impl<'a> ManifestResolver<'a> {
    pub fn new(edition: &'a Edition) -> Self {
        Self {
            edition,
            placeholder_pages: DEFAULT_PLACEHOLDER_PAGES,
        }
    }

    pub fn with_placeholder_pages(mut self, pages: usize) -> Self {
        self.placeholder_pages = pages;
        self
    }

    pub fn edition(&self) -> &'a Edition {
        self.edition
    }

    pub fn has_rule(&self, id: &ChapterId) -> bool {
        self.edition.rule(id).is_some()
    }

    /// Chapters without a rule get a placeholder manifest instead of an error.
    /// The id is used as given; clamping is the navigator's job.
    pub fn resolve(&self, id: &ChapterId) -> Manifest {
        match self.resolve_strict(id) {
            Ok(manifest) => manifest,
            Err(ResolveError::UnknownChapter(_)) => {
                debug!(chapter = %id, slots = self.placeholder_pages, "no page rule, using placeholders");
                Manifest {
                    chapter: id.clone(),
                    source: ManifestSource::Placeholder,
                    entries: (0..self.placeholder_pages)
                        .map(|slot| ManifestEntry::Placeholder { slot })
                        .collect(),
                }
            }
        }
    }

    pub fn resolve_strict(&self, id: &ChapterId) -> Result<Manifest, ResolveError> {
        let rule = self
            .edition
            .rule(id)
            .ok_or_else(|| ResolveError::UnknownChapter(id.clone()))?;
        Ok(Manifest {
            chapter: id.clone(),
            source: ManifestSource::Rule,
            entries: expand_rule(rule, self.edition)
                .into_iter()
                .map(ManifestEntry::Page)
                .collect(),
        })
    }
}

pub fn expand_rule(rule: &ChapterRule, edition: &Edition) -> Vec<PageDescriptor> {
    let template = edition.template_for(rule);
    let mut pages = Vec::with_capacity(rule.page_count());
    for page_number in rule.first_page..=rule.last_page {
        if rule.excluded.contains(&page_number) {
            continue;
        }
        let extension = edition.extension_for(rule, page_number);
        pages.push(PageDescriptor {
            chapter: rule.id.clone(),
            page_number,
            file_path: template.render(&rule.id, page_number, &extension),
            extension,
            alt_text: alt_text(&rule.id, page_number),
        });
    }
    pages
}

pub fn alt_text(chapter: &ChapterId, page_number: u32) -> String {
    format!("Chapter {chapter} - Page {page_number}")
}
