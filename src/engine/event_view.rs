//! Filtered, paginated view over the event store
//!
//! The filter is a case-insensitive substring match against an event's full
//! JSON form, so a term can hit any field the server sent. Pages are 1-based
//! and the cursor lives in the store, which resets it on forced refreshes.

use crate::engine::store::{EventFeed, PollMergeStore};
use crate::types::Event;
use crate::{Result, triage_error};
use regex::RegexBuilder;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

/// Allowed page sizes
pub const PAGE_SIZES: [usize; 4] = [10, 20, 50, 100];

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Longest filter term accepted; longer input is truncated
pub const MAX_FILTER_LEN: usize = 300;

/// Pages shown either side of the current one in the page bar
const WINDOW_RADIUS: usize = 3;

const MARK_OPEN: &str = "<mark>";
const MARK_CLOSE: &str = "</mark>";

/// Lowercased JSON form of an event, the text the filter searches
pub fn search_text(event: &Event) -> String {
    searchable(event, serde_json::to_string(event))
}

/// Falls back to the named fields when the event cannot be serialized
fn searchable(event: &Event, serialized: serde_json::Result<String>) -> String {
    match serialized {
        Ok(json) => json.to_lowercase(),
        Err(e) => {
            tracing::warn!(event_id = %event.id, "Event not serializable for search: {}", e);
            [
                event.id.as_str(),
                event.event_type.as_str(),
                event.source_ip.as_str(),
                event.message.as_str(),
                event.severity.as_str(),
            ]
            .join(" ")
            .to_lowercase()
        }
    }
}

/// Events whose serialized form contains `term`, ignoring case
///
/// An empty term matches everything.
pub fn filter_events<'a>(events: &'a [Event], term: &str) -> Vec<&'a Event> {
    let needle = term.to_lowercase();
    if needle.is_empty() {
        return events.iter().collect();
    }
    events
        .iter()
        .filter(|e| search_text(e).contains(&needle))
        .collect()
}

/// Number of pages needed for `len` items
pub fn total_pages(len: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return 0;
    }
    len.div_ceil(page_size)
}

/// Index range of a 1-based page, clamped to `len`
pub fn page_range(len: usize, page: usize, page_size: usize) -> std::ops::Range<usize> {
    let start = page.saturating_sub(1).saturating_mul(page_size).min(len);
    let end = start.saturating_add(page_size).min(len);
    start..end
}

/// One entry of the page bar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageLink {
    Page { number: usize, current: bool },
    Ellipsis,
}

/// Page bar layout: first page, a window around the current page, last page
pub fn page_window(current: usize, total: usize) -> Vec<PageLink> {
    let link = |number: usize| PageLink::Page {
        number,
        current: number == current,
    };

    let mut links = vec![link(1)];
    if total <= 1 {
        return links;
    }

    let start = current.saturating_sub(WINDOW_RADIUS).max(2);
    let end = (current + WINDOW_RADIUS).min(total - 1);

    if start > 2 {
        links.push(PageLink::Ellipsis);
    }
    links.extend((start..=end).map(link));
    if end < total - 1 {
        links.push(PageLink::Ellipsis);
    }
    links.push(link(total));
    links
}

/// Wrap every case-insensitive occurrence of `term` in `<mark>` tags
///
/// The term is matched literally; regex metacharacters have no effect.
pub fn highlight(text: &str, term: &str) -> String {
    if term.is_empty() {
        return text.to_string();
    }

    match RegexBuilder::new(&regex::escape(term))
        .case_insensitive(true)
        .build()
    {
        Ok(pattern) => pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                format!("{MARK_OPEN}{}{MARK_CLOSE}", &caps[0])
            })
            .into_owned(),
        Err(e) => {
            tracing::warn!("Highlight pattern rejected: {}", e);
            text.to_string()
        }
    }
}

/// One displayed row
#[derive(Debug, Clone, PartialEq)]
pub struct EventRow {
    pub event: Event,
    /// First seen in the latest poll
    pub is_new: bool,
}

/// One rendered page of the event table
#[derive(Debug, Clone, PartialEq)]
pub struct EventPage {
    pub rows: Vec<EventRow>,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    /// Events matching the filter
    pub total_matches: usize,
    /// Events in the store
    pub total_events: usize,
    pub links: Vec<PageLink>,
}

/// Event table state: filter term and page size over the event store
pub struct EventTable {
    store: Arc<PollMergeStore<EventFeed>>,
    filter: RwLock<String>,
    page_size: AtomicUsize,
}

impl EventTable {
    pub fn new(store: Arc<PollMergeStore<EventFeed>>, page_size: usize) -> Result<Self> {
        check_page_size(page_size)?;
        Ok(Self {
            store,
            filter: RwLock::new(String::new()),
            page_size: AtomicUsize::new(page_size),
        })
    }

    pub fn store(&self) -> &Arc<PollMergeStore<EventFeed>> {
        &self.store
    }

    pub fn filter(&self) -> String {
        self.filter.read().map(|f| f.clone()).unwrap_or_default()
    }

    /// Replace the filter term and go back to page 1
    pub fn set_filter(&self, term: &str) -> Result<()> {
        let term: String = term.chars().take(MAX_FILTER_LEN).collect();
        let mut filter = self
            .filter
            .write()
            .map_err(|_| triage_error!("Event filter lock poisoned"))?;
        *filter = term;
        self.store.set_page_cursor(1);
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.page_size.load(Ordering::Relaxed)
    }

    /// Change the page size and go back to page 1
    pub fn set_page_size(&self, page_size: usize) -> Result<()> {
        check_page_size(page_size)?;
        self.page_size.store(page_size, Ordering::Relaxed);
        self.store.set_page_cursor(1);
        Ok(())
    }

    pub fn current_page_number(&self) -> usize {
        self.store.page_cursor()
    }

    /// Jump to a page; out-of-range targets leave the cursor alone
    pub async fn go_to_page(&self, page: usize) -> bool {
        let total = total_pages(self.match_count().await, self.page_size());
        if page < 1 || page > total {
            return false;
        }
        self.store.set_page_cursor(page);
        true
    }

    pub async fn next_page(&self) -> bool {
        self.go_to_page(self.current_page_number() + 1).await
    }

    pub async fn previous_page(&self) -> bool {
        match self.current_page_number().checked_sub(1) {
            Some(page) => self.go_to_page(page).await,
            None => false,
        }
    }

    /// Render the current page
    pub async fn current_page(&self) -> EventPage {
        let snapshot = self.store.snapshot().await;
        let term = self.filter();
        let matches = filter_events(&snapshot.items, &term);

        let page = self.current_page_number();
        let page_size = self.page_size();
        let total = total_pages(matches.len(), page_size);
        let rows = matches[page_range(matches.len(), page, page_size)]
            .iter()
            .map(|event| EventRow {
                event: (*event).clone(),
                is_new: snapshot.is_new(&event.id),
            })
            .collect();

        EventPage {
            rows,
            page,
            page_size,
            total_pages: total,
            total_matches: matches.len(),
            total_events: snapshot.len(),
            links: page_window(page, total),
        }
    }

    async fn match_count(&self) -> usize {
        let snapshot = self.store.snapshot().await;
        filter_events(&snapshot.items, &self.filter()).len()
    }
}

fn check_page_size(page_size: usize) -> Result<()> {
    if !PAGE_SIZES.contains(&page_size) {
        return Err(crate::errors::Error::validation(format!(
            "page size must be one of {PAGE_SIZES:?}, got {page_size}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use chrono::Utc;
    use serde_json::json;

    fn event(id: &str, message: &str) -> Event {
        Event {
            id: id.to_string(),
            timestamp: Utc::now(),
            event_type: "auth".to_string(),
            source_ip: "192.168.1.20".to_string(),
            message: message.to_string(),
            severity: "low".to_string(),
            label: None,
            category: None,
            scenario_id: None,
            threat_pattern: None,
            extra: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_filter_searches_every_field() {
        let mut with_host = event("e2", "Outbound transfer");
        with_host.extra.insert("hostname".to_string(), json!("FIN-LAPTOP-7"));
        let events = vec![event("e1", "Failed login for ADMIN"), with_host];

        assert_eq!(filter_events(&events, "admin").len(), 1);
        assert_eq!(filter_events(&events, "fin-laptop").len(), 1);
        assert_eq!(filter_events(&events, "192.168").len(), 2);
        assert_eq!(filter_events(&events, "").len(), 2);
        assert!(filter_events(&events, "nothing-like-this").is_empty());
    }

    #[test]
    fn test_unserializable_event_still_searchable() {
        let login = event("e7", "Failed login for ADMIN");
        let failure = serde_json::from_str::<String>("not json");
        assert!(failure.is_err());

        let text = searchable(&login, failure);
        assert!(text.contains("e7"));
        assert!(text.contains("admin"));
        assert!(text.contains("192.168.1.20"));
        assert_eq!(searchable(&login, Ok("{\"ID\":\"E7\"}".to_string())), "{\"id\":\"e7\"}");
    }

    #[test]
    fn test_pagination_math() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(21, 20), 2);
        assert_eq!(page_range(45, 3, 20), 40..45);
        assert_eq!(page_range(45, 9, 20), 45..45);
        assert_eq!(page_range(45, 0, 20), 0..20);
    }

    #[test]
    fn test_page_window_layout() {
        use PageLink::{Ellipsis, Page};
        let numbers = |links: Vec<PageLink>| -> Vec<Option<usize>> {
            links
                .into_iter()
                .map(|l| match l {
                    Page { number, .. } => Some(number),
                    Ellipsis => None,
                })
                .collect()
        };

        assert_eq!(numbers(page_window(1, 0)), [Some(1)]);
        assert_eq!(numbers(page_window(1, 1)), [Some(1)]);
        assert_eq!(
            numbers(page_window(1, 10)),
            [Some(1), Some(2), Some(3), Some(4), None, Some(10)]
        );
        assert_eq!(
            numbers(page_window(10, 20)),
            [Some(1), None, Some(7), Some(8), Some(9), Some(10), Some(11), Some(12), Some(13), None, Some(20)]
        );
        assert_eq!(
            numbers(page_window(6, 6)),
            [Some(1), None, Some(3), Some(4), Some(5), Some(6)]
        );

        let current: Vec<_> = page_window(4, 9)
            .into_iter()
            .filter(|l| matches!(l, Page { current: true, .. }))
            .collect();
        assert_eq!(current, [Page { number: 4, current: true }]);
    }

    #[test]
    fn test_highlight_is_literal() {
        assert_eq!(highlight("a.b axb A.B", "a.b"), "<mark>a.b</mark> axb <mark>A.B</mark>");
        assert_eq!(highlight("cost (usd)", "(usd)"), "cost <mark>(usd)</mark>");
        assert_eq!(highlight("plain", ""), "plain");
        assert_eq!(highlight("no hit", "zzz"), "no hit");
    }

    #[tokio::test]
    async fn test_table_paging() {
        let backend = Arc::new(InMemoryBackend::new());
        for i in 0..45 {
            backend.push_normal_event(&format!("e{i}"), &format!("event number {i}"));
        }
        let store = Arc::new(PollMergeStore::new(EventFeed(backend.clone())));
        store.refresh().await.unwrap();
        let table = EventTable::new(store.clone(), DEFAULT_PAGE_SIZE).unwrap();

        let page = table.current_page().await;
        assert_eq!(page.rows.len(), 20);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.rows[0].event.id, "e44");

        assert!(table.go_to_page(3).await);
        assert_eq!(table.current_page().await.rows.len(), 5);
        assert!(!table.go_to_page(4).await);
        assert!(!table.go_to_page(0).await);
        assert_eq!(table.current_page_number(), 3);

        table.set_page_size(50).unwrap();
        assert_eq!(table.current_page_number(), 1);
        assert!(table.set_page_size(25).is_err());
        assert_eq!(table.page_size(), 50);

        table.go_to_page(1).await;
        table.set_filter("number 4").unwrap();
        // "number 4" and "number 40".."number 44"
        assert_eq!(table.current_page().await.total_matches, 6);

        table.set_filter(&"x".repeat(400)).unwrap();
        assert_eq!(table.filter().len(), MAX_FILTER_LEN);
    }

    #[tokio::test]
    async fn test_no_match_leaves_cursor() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.push_normal_event("e1", "only one");
        let store = Arc::new(PollMergeStore::new(EventFeed(backend.clone())));
        store.refresh().await.unwrap();
        let table = EventTable::new(store, 10).unwrap();

        table.set_filter("absent").unwrap();
        let page = table.current_page().await;
        assert!(page.rows.is_empty());
        assert_eq!(page.total_pages, 0);
        assert!(!table.next_page().await);
        assert_eq!(table.current_page_number(), 1);
    }
}
