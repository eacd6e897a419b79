//! Current-chapter state with previous/next movement and the chapter selector.

use serde::Serialize;
use tracing::debug;

use crate::catalog::full_label;
use crate::model::{ChapterId, Edition};
use crate::url::{ChapterHref, QueryHref};

/// Receives the href of the chapter to show next.
pub trait NavigationSink {
    fn navigate(&mut self, href: &str);
}

impl NavigationSink for Vec<String> {
    fn navigate(&mut self, href: &str) {
        self.push(href.to_string());
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectorOption {
    pub id: ChapterId,
    pub label: String,
    pub href: String,
    pub selected: bool,
}

pub struct ChapterNavigator<'a> {
    order: Vec<ChapterId>,
    position: usize,
    hrefs: Box<dyn ChapterHref + 'a>,
}

impl<'a> ChapterNavigator<'a> {
    /// Picks the current chapter from the `id` parameter of a query string.
    pub fn from_query(edition: &Edition, query: Option<&str>) -> Self {
        let param = query.and_then(|query| query_param(query, "id"));
        let current = chapter_from_param(edition, param.as_deref());
        debug!(param = ?param, chapter = %current, "navigator start");
        Self::starting_at(edition, &current)
    }

    /// Starts at `id`, or at the first chapter when the edition does not know it.
    pub fn starting_at(edition: &Edition, id: &ChapterId) -> Self {
        let order = edition.chapter_order();
        let position = order.iter().position(|entry| entry == id).unwrap_or(0);
        Self {
            order,
            position,
            hrefs: Box::new(QueryHref::default()),
        }
    }

    pub fn with_hrefs(mut self, hrefs: impl ChapterHref + 'a) -> Self {
        self.hrefs = Box::new(hrefs);
        self
    }

    pub fn current_chapter_id(&self) -> &ChapterId {
        &self.order[self.position]
    }

    pub fn previous(&self) -> Option<&ChapterId> {
        self.position
            .checked_sub(1)
            .and_then(|index| self.order.get(index))
    }

    pub fn next(&self) -> Option<&ChapterId> {
        self.order.get(self.position + 1)
    }

    pub fn can_go_previous(&self) -> bool {
        self.previous().is_some()
    }

    pub fn can_go_next(&self) -> bool {
        self.next().is_some()
    }

    pub fn href_for(&self, id: &ChapterId) -> String {
        self.hrefs.href(id)
    }

    pub fn previous_href(&self) -> Option<String> {
        self.previous().map(|id| self.href_for(id))
    }

    pub fn next_href(&self) -> Option<String> {
        self.next().map(|id| self.href_for(id))
    }

    /// Returns false and leaves the current chapter alone at the first chapter.
    pub fn go_previous(&mut self, sink: &mut dyn NavigationSink) -> bool {
        if !self.can_go_previous() {
            return false;
        }
        self.position -= 1;
        sink.navigate(&self.href_for(self.current_chapter_id()));
        true
    }

    /// Returns false and leaves the current chapter alone at the last chapter.
    pub fn go_next(&mut self, sink: &mut dyn NavigationSink) -> bool {
        if !self.can_go_next() {
            return false;
        }
        self.position += 1;
        sink.navigate(&self.href_for(self.current_chapter_id()));
        true
    }

    pub fn build_selector(&self) -> Vec<SelectorOption> {
        self.order
            .iter()
            .enumerate()
            .map(|(index, id)| SelectorOption {
                id: id.clone(),
                label: full_label(id),
                href: self.href_for(id),
                selected: index == self.position,
            })
            .collect()
    }
}

/// Maps a raw `id` value to a chapter of the edition. Numbers are read like
/// an integer prefix and clamped; declared special tokens pass through.
pub fn chapter_from_param(edition: &Edition, value: Option<&str>) -> ChapterId {
    let fallback = ChapterId::Number(edition.range.clamp(1));
    let Some(value) = value.map(str::trim).filter(|value| !value.is_empty()) else {
        return fallback;
    };
    if edition.special(value).is_some() {
        return ChapterId::Special(value.to_string());
    }
    match parse_int_prefix(value) {
        Some(number) => ChapterId::Number(edition.range.clamp(number)),
        None => fallback,
    }
}

/// Leading optional sign and digits, the rest ignored. Saturates on overflow.
fn parse_int_prefix(text: &str) -> Option<i64> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    let mut seen = false;
    for byte in digits.bytes() {
        if !byte.is_ascii_digit() {
            break;
        }
        seen = true;
        value = value
            .saturating_mul(10)
            .saturating_add(i64::from(byte - b'0'));
    }
    if !seen {
        return None;
    }
    Some(if negative { -value } else { value })
}

/// First value of `key` in a query string, percent-decoded.
pub fn query_param(query: &str, key: &str) -> Option<String> {
    let query = query.trim_start_matches('?');
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .find_map(|pair| {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_component(name) == key).then(|| decode_component(value))
        })
}

fn decode_component(text: &str) -> String {
    let spaced = text.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChapterRange, UrlStyle};
    use crate::rule_table::load_builtin_edition;
    use crate::url::{SiteHref, UrlMapper};

    fn archive() -> Edition {
        load_builtin_edition("archive").expect("archive")
    }

    fn special(token: &str) -> ChapterId {
        ChapterId::Special(token.to_string())
    }

    #[test]
    fn reads_and_clamps_query_ids() {
        let edition = archive();
        let cases: [(Option<&str>, ChapterId); 9] = [
            (None, ChapterId::Number(1)),
            (Some(""), ChapterId::Number(1)),
            (Some("?id=12"), ChapterId::Number(12)),
            (Some("x=1&id=12abc"), ChapterId::Number(12)),
            (Some("id=-3"), ChapterId::Number(0)),
            (Some("id=999"), ChapterId::Number(204)),
            (Some("id=abc"), ChapterId::Number(1)),
            (Some("id=90.2"), special("90.2")),
            (Some("id=90%2E2"), special("90.2")),
        ];
        for (query, expected) in cases {
            let navigator = ChapterNavigator::from_query(&edition, query);
            assert_eq!(navigator.current_chapter_id(), &expected, "query {query:?}");
        }
    }

    #[test]
    fn undeclared_decimal_reads_as_integer() {
        let edition = archive();
        let navigator = ChapterNavigator::from_query(&edition, Some("id=50.5"));
        assert_eq!(navigator.current_chapter_id(), &ChapterId::Number(50));
    }

    #[test]
    fn default_chapter_is_clamped_into_range() {
        let mut edition = archive();
        edition.range = ChapterRange { min: 5, max: 9 };
        edition.specials.clear();
        let navigator = ChapterNavigator::from_query(&edition, None);
        assert_eq!(navigator.current_chapter_id(), &ChapterId::Number(5));
    }

    #[test]
    fn bonus_chapter_sits_between_its_neighbours() {
        let edition = archive();
        let navigator = ChapterNavigator::from_query(&edition, Some("id=90"));
        assert_eq!(navigator.next(), Some(&special("90.2")));
        let navigator = ChapterNavigator::from_query(&edition, Some("id=90.2"));
        assert_eq!(navigator.previous(), Some(&ChapterId::Number(90)));
        assert_eq!(navigator.next(), Some(&ChapterId::Number(91)));
        let navigator = ChapterNavigator::from_query(&edition, Some("id=91"));
        assert_eq!(navigator.previous(), Some(&special("90.2")));
    }

    #[test]
    fn movement_stops_at_the_boundaries() {
        let edition = archive();
        let mut visited: Vec<String> = Vec::new();

        let mut navigator = ChapterNavigator::from_query(&edition, Some("id=204"));
        assert!(!navigator.can_go_next());
        assert!(!navigator.go_next(&mut visited));
        assert_eq!(navigator.current_chapter_id(), &ChapterId::Number(204));

        let mut navigator = ChapterNavigator::from_query(&edition, Some("id=0"));
        assert!(!navigator.go_previous(&mut visited));
        assert_eq!(navigator.current_chapter_id(), &ChapterId::Number(0));
        assert!(visited.is_empty());

        assert!(navigator.go_next(&mut visited));
        assert!(navigator.go_previous(&mut visited));
        assert_eq!(visited, ["chapter.html?id=1", "chapter.html?id=0"]);
    }

    #[test]
    fn selector_lists_every_chapter_in_order() {
        let edition = archive();
        let navigator = ChapterNavigator::from_query(&edition, Some("id=90.2"));
        let options = navigator.build_selector();
        assert_eq!(options.len(), 206);
        assert_eq!(options[0].label, "Chapter 0");
        assert_eq!(options[90].id, ChapterId::Number(90));
        assert_eq!(options[91].id, special("90.2"));
        assert_eq!(options[92].id, ChapterId::Number(91));
        let selected: Vec<&SelectorOption> = options.iter().filter(|option| option.selected).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, special("90.2"));
    }

    #[test]
    fn static_site_hrefs() {
        let edition = archive();
        let navigator = ChapterNavigator::from_query(&edition, Some("id=90"))
            .with_hrefs(SiteHref::new(UrlMapper::with_style(UrlStyle::Html), "../"));
        assert_eq!(navigator.next_href().as_deref(), Some("../chapter/90.2.html"));
        assert_eq!(navigator.previous_href().as_deref(), Some("../chapter/89.html"));
    }

    #[test]
    fn query_param_decodes_values() {
        assert_eq!(query_param("a=1&id=7", "id").as_deref(), Some("7"));
        assert_eq!(query_param("?id=chapter+9", "id").as_deref(), Some("chapter 9"));
        assert_eq!(query_param("a=1", "id"), None);
        assert_eq!(query_param("id", "id").as_deref(), Some(""));
    }
}
