use std::collections::HashSet;

/// Rows of headroom left before the bottom of the rendered list at which the
/// next page is requested. Tunable; large enough that the fetch usually lands
/// before the user reaches the end.
pub const SCROLL_FETCH_MARGIN: usize = 12;

pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Anything the Bumaview API pages over: identified by a single integer id.
/// Two values with the same id are the same item; the first one fetched wins.
pub trait Entity {
    fn entity_id(&self) -> i64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageRequest {
    pub cursor_id: Option<i64>,
    pub size: u32,
}

impl PageRequest {
    pub fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(cursor) = self.cursor_id {
            params.push(("cursor_id".into(), cursor.to_string()));
        }
        if self.size > 0 {
            params.push(("size".into(), self.size.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub values: Vec<T>,
    pub has_next: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Page {
            values: Vec::new(),
            has_next: false,
        }
    }
}

impl<T> Default for Page<T> {
    fn default() -> Self {
        Page::empty()
    }
}

/// Server-side filter parameters that scope one pagination sequence. Changing
/// any field starts a new sequence: cursor back to none, list emptied.
///
/// `search` is the client-side term: it narrows the already-fetched list by
/// substring match and suppresses incremental loading while active, but it is
/// never sent to the server and so is not part of the sequence identity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryKey {
    pub company_name: Option<String>,
    pub employment_type: Option<String>,
    pub work_location: Option<String>,
}

impl QueryKey {
    pub fn into_params(self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(name) = self.company_name {
            params.push(("company_name".into(), name));
        }
        if let Some(kind) = self.employment_type {
            params.push(("employment_type".into(), kind));
        }
        if let Some(location) = self.work_location {
            params.push(("work_location".into(), location));
        }
        params
    }

    pub fn is_empty(&self) -> bool {
        self.company_name.is_none()
            && self.employment_type.is_none()
            && self.work_location.is_none()
    }
}

/// Tracks the cursor through one pagination sequence.
///
/// The next cursor is always the id of the last item of the most recently
/// recorded page. An empty page terminates the sequence even when the server
/// claims more data, so a malformed tail response cannot loop forever.
#[derive(Debug, Clone)]
pub struct Paginator {
    cursor: Option<i64>,
    has_next: bool,
    size: u32,
}

impl Paginator {
    pub fn new(size: u32) -> Self {
        debug_assert!(size > 0, "page size must be positive");
        Paginator {
            cursor: None,
            has_next: true,
            size: size.max(1),
        }
    }

    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    pub fn has_next(&self) -> bool {
        self.has_next
    }

    /// The request for the next page, or `None` once the sequence is done.
    pub fn next_request(&self) -> Option<PageRequest> {
        if !self.has_next {
            return None;
        }
        Some(PageRequest {
            cursor_id: self.cursor,
            size: self.size,
        })
    }

    pub fn record<T: Entity>(&mut self, page: &Page<T>) {
        match page.values.last() {
            Some(last) => {
                self.cursor = Some(last.entity_id());
                self.has_next = page.has_next;
            }
            None => {
                // Defensive termination: an empty page means stop, whatever
                // the server's has_next flag says.
                self.has_next = false;
            }
        }
    }
}

/// Insertion-ordered list of entities with no duplicate ids.
#[derive(Debug, Clone, Default)]
pub struct Accumulator<T> {
    items: Vec<T>,
    seen: HashSet<i64>,
}

impl<T: Entity> Accumulator<T> {
    pub fn new() -> Self {
        Accumulator {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Appends the items whose id has not been seen yet, in server order.
    /// Returns how many were actually added.
    pub fn merge(&mut self, new: Vec<T>) -> usize {
        let mut added = 0;
        for item in new {
            if self.seen.insert(item.entity_id()) {
                self.items.push(item);
                added += 1;
            }
        }
        added
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.seen.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    FetchingInitial,
    FetchingMore,
    Exhausted,
    Errored,
}

/// Handed out when a fetch is dispatched; must be passed back with the
/// result. The generation pins the result to the query key that was active
/// at issue time, so completions for an abandoned sequence are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: u64,
    pub request: PageRequest,
}

/// Viewport geometry at the moment a scroll event fired, in rendered rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrollMetrics {
    pub viewport: usize,
    pub scrolled: usize,
    pub content_height: usize,
}

impl ScrollMetrics {
    fn near_bottom(&self) -> bool {
        self.viewport + self.scrolled >= self.content_height.saturating_sub(SCROLL_FETCH_MARGIN)
    }
}

/// One paginated list view: accumulated items, cursor, and the loader state
/// machine that serializes fetches.
///
/// The feed never performs I/O. Callers ask it for a [`FetchTicket`], run the
/// request however they like, and hand the outcome to [`Feed::complete`].
/// At most one ticket is outstanding at a time.
#[derive(Debug)]
pub struct Feed<T> {
    query: QueryKey,
    search: String,
    state: LoadState,
    generation: u64,
    in_flight: bool,
    paginator: Paginator,
    list: Accumulator<T>,
    page_size: u32,
    pub last_error: Option<String>,
}

impl<T: Entity> Feed<T> {
    pub fn new(page_size: u32) -> Self {
        Feed {
            query: QueryKey::default(),
            search: String::new(),
            state: LoadState::Idle,
            generation: 0,
            in_flight: false,
            paginator: Paginator::new(page_size),
            list: Accumulator::new(),
            page_size,
            last_error: None,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn query(&self) -> &QueryKey {
        &self.query
    }

    pub fn items(&self) -> &[T] {
        self.list.items()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn cursor(&self) -> Option<i64> {
        self.paginator.cursor()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    /// Sets the client-side search term. Does not start a new pagination
    /// sequence; a non-empty term suppresses further incremental loads.
    pub fn set_search(&mut self, term: impl Into<String>) {
        self.search = term.into();
    }

    /// Starts a new pagination sequence for `query`, discarding the current
    /// list and invalidating any fetch still in flight. Returns the ticket
    /// for the first page.
    pub fn reset(&mut self, query: QueryKey) -> FetchTicket {
        self.query = query;
        self.generation += 1;
        self.in_flight = true;
        self.state = LoadState::FetchingInitial;
        self.paginator = Paginator::new(self.page_size);
        self.list.clear();
        self.last_error = None;
        FetchTicket {
            generation: self.generation,
            request: PageRequest {
                cursor_id: None,
                size: self.page_size,
            },
        }
    }

    /// Decides whether the scroll position warrants fetching the next page.
    /// Returns a ticket only when the feed is idle, more data exists, no
    /// fetch is in flight, and no search term is suppressing paging. The
    /// in-flight guard is set before this returns, so overlapping scroll
    /// events cannot issue duplicate requests.
    pub fn maybe_fetch_more(&mut self, metrics: ScrollMetrics) -> Option<FetchTicket> {
        if self.state != LoadState::Idle || self.in_flight {
            return None;
        }
        if self.list.is_empty() {
            return None;
        }
        if !self.search.trim().is_empty() {
            return None;
        }
        if !metrics.near_bottom() {
            return None;
        }
        let request = self.paginator.next_request()?;
        self.in_flight = true;
        self.state = LoadState::FetchingMore;
        Some(FetchTicket {
            generation: self.generation,
            request,
        })
    }

    /// Records a fetch outcome. Results carrying a stale generation (the
    /// query key changed while they were in flight) are dropped without
    /// touching the list or cursor.
    pub fn complete(&mut self, ticket: FetchTicket, outcome: Result<Page<T>, String>) {
        if ticket.generation != self.generation {
            tracing::debug!(
                stale = ticket.generation,
                current = self.generation,
                "dropping completion from abandoned pagination sequence"
            );
            return;
        }
        self.in_flight = false;
        match outcome {
            Ok(page) => {
                self.paginator.record(&page);
                self.list.merge(page.values);
                self.state = if self.paginator.has_next() {
                    LoadState::Idle
                } else {
                    LoadState::Exhausted
                };
                self.last_error = None;
            }
            Err(message) => {
                // Cursor and list stay untouched; a manual reload is the only
                // way out of Errored.
                self.state = LoadState::Errored;
                self.last_error = Some(message);
            }
        }
    }

    /// Indices into `items()` matching the active search term, newest-first
    /// order preserved. With no term, every index matches.
    pub fn visible_indices<F>(&self, haystack: F) -> Vec<usize>
    where
        F: Fn(&T) -> &str,
    {
        let term = self.search.trim().to_lowercase();
        self.list
            .items()
            .iter()
            .enumerate()
            .filter(|(_, item)| term.is_empty() || haystack(item).to_lowercase().contains(&term))
            .map(|(idx, _)| idx)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: i64,
        label: String,
    }

    impl Entity for Row {
        fn entity_id(&self) -> i64 {
            self.id
        }
    }

    fn rows(ids: std::ops::RangeInclusive<i64>) -> Vec<Row> {
        ids.map(|id| Row {
            id,
            label: format!("row {id}"),
        })
        .collect()
    }

    fn page(ids: std::ops::RangeInclusive<i64>, has_next: bool) -> Page<Row> {
        Page {
            values: rows(ids),
            has_next,
        }
    }

    #[test]
    fn merge_is_idempotent() {
        let mut list = Accumulator::new();
        list.merge(rows(1..=5));
        let once: Vec<Row> = list.items().to_vec();
        let added = list.merge(rows(1..=5));
        assert_eq!(added, 0);
        assert_eq!(list.items(), once.as_slice());
    }

    #[test]
    fn merge_preserves_first_seen_order() {
        let mut list = Accumulator::new();
        list.merge(vec![
            Row {
                id: 3,
                label: "c".into(),
            },
            Row {
                id: 1,
                label: "a".into(),
            },
        ]);
        list.merge(vec![
            Row {
                id: 1,
                label: "a-again".into(),
            },
            Row {
                id: 2,
                label: "b".into(),
            },
        ]);
        let ids: Vec<i64> = list.items().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
        // First-seen wins: the duplicate's fields are dropped.
        assert_eq!(list.items()[1].label, "a");
    }

    #[test]
    fn empty_page_terminates_despite_has_next() {
        let mut paginator = Paginator::new(20);
        paginator.record(&Page::<Row> {
            values: Vec::new(),
            has_next: true,
        });
        assert!(!paginator.has_next());
        assert_eq!(paginator.next_request(), None);
    }

    #[test]
    fn cursor_tracks_last_item_of_each_page() {
        let mut paginator = Paginator::new(20);
        assert_eq!(
            paginator.next_request(),
            Some(PageRequest {
                cursor_id: None,
                size: 20
            })
        );
        paginator.record(&page(1..=20, true));
        assert_eq!(paginator.cursor(), Some(20));
        paginator.record(&page(15..=34, true));
        assert_eq!(paginator.cursor(), Some(34));
        assert_eq!(
            paginator.next_request(),
            Some(PageRequest {
                cursor_id: Some(34),
                size: 20
            })
        );
    }

    #[test]
    fn all_duplicate_page_still_advances_cursor() {
        let mut feed = Feed::new(20);
        let ticket = feed.reset(QueryKey::default());
        feed.complete(ticket, Ok(page(1..=20, true)));
        assert_eq!(feed.cursor(), Some(20));

        let ticket = feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 30,
                scrolled: 0,
                content_height: 20,
            })
            .expect("more data expected");
        feed.complete(ticket, Ok(page(1..=20, true)));
        assert_eq!(feed.len(), 20);
        // Forward progress: the cursor moved even though nothing was added.
        assert_eq!(feed.cursor(), Some(20));
        assert_eq!(feed.state(), LoadState::Idle);
    }

    #[test]
    fn overlapping_pages_dedup_to_unique_items() {
        let mut feed = Feed::new(20);
        let ticket = feed.reset(QueryKey::default());
        feed.complete(ticket, Ok(page(1..=20, true)));
        assert_eq!(feed.state(), LoadState::Idle);
        assert_eq!(feed.cursor(), Some(20));

        // Server race: second page overlaps the first by five items.
        let ticket = feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 20,
                scrolled: 0,
                content_height: 20,
            })
            .expect("second page");
        assert_eq!(ticket.request.cursor_id, Some(20));
        feed.complete(ticket, Ok(page(15..=34, false)));

        assert_eq!(feed.len(), 34);
        let ids: Vec<i64> = feed.items().iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=34).collect::<Vec<i64>>());
        assert_eq!(feed.state(), LoadState::Exhausted);
    }

    #[test]
    fn stale_completion_is_discarded_after_query_change() {
        let mut feed = Feed::new(20);
        let ticket = feed.reset(QueryKey::default());
        feed.complete(ticket, Ok(page(1..=20, true)));
        let stale = feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 20,
                scrolled: 5,
                content_height: 20,
            })
            .expect("fetch for the old query");

        // User narrows the search to one company while the fetch is out.
        let fresh = feed.reset(QueryKey {
            company_name: Some("카카오".into()),
            ..QueryKey::default()
        });
        feed.complete(stale, Ok(page(21..=40, true)));
        assert!(feed.is_empty(), "stale page must not populate the new list");
        assert_eq!(feed.state(), LoadState::FetchingInitial);

        feed.complete(fresh, Ok(page(100..=104, false)));
        let ids: Vec<i64> = feed.items().iter().map(|r| r.id).collect();
        assert_eq!(ids, (100..=104).collect::<Vec<i64>>());
    }

    #[test]
    fn only_one_fetch_in_flight() {
        let mut feed = Feed::new(20);
        let ticket = feed.reset(QueryKey::default());
        feed.complete(ticket, Ok(page(1..=20, true)));
        let metrics = ScrollMetrics {
            viewport: 20,
            scrolled: 0,
            content_height: 20,
        };
        assert!(feed.maybe_fetch_more(metrics).is_some());
        // Second scroll event before the first completes must not dispatch.
        assert!(feed.maybe_fetch_more(metrics).is_none());
    }

    #[test]
    fn error_leaves_state_for_manual_reload_only() {
        let mut feed = Feed::new(20);
        let ticket = feed.reset(QueryKey::default());
        feed.complete(ticket, Ok(page(1..=20, true)));
        let ticket = feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 20,
                scrolled: 0,
                content_height: 20,
            })
            .unwrap();
        feed.complete(ticket, Err("connection reset".into()));

        assert_eq!(feed.state(), LoadState::Errored);
        assert_eq!(feed.len(), 20, "list survives a failed page");
        assert_eq!(feed.cursor(), Some(20), "cursor survives for retry");
        // No automatic retries from Errored.
        assert!(feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 50,
                scrolled: 50,
                content_height: 20,
            })
            .is_none());

        let ticket = feed.reset(QueryKey::default());
        assert_eq!(feed.state(), LoadState::FetchingInitial);
        assert_eq!(ticket.request.cursor_id, None);
    }

    #[test]
    fn search_term_suppresses_incremental_loading() {
        let mut feed = Feed::new(20);
        let ticket = feed.reset(QueryKey::default());
        feed.complete(ticket, Ok(page(1..=20, true)));
        feed.set_search("row 1");
        assert!(feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 40,
                scrolled: 0,
                content_height: 20,
            })
            .is_none());
        let visible = feed.visible_indices(|row| row.label.as_str());
        // "row 1" matches 1 and 10..=19.
        assert_eq!(visible.len(), 11);

        feed.set_search("");
        assert!(feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 40,
                scrolled: 0,
                content_height: 20,
            })
            .is_some());
    }

    #[test]
    fn scroll_far_from_bottom_does_not_fetch() {
        let mut feed = Feed::new(20);
        let ticket = feed.reset(QueryKey::default());
        feed.complete(ticket, Ok(page(1..=200, true)));
        assert!(feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 30,
                scrolled: 0,
                content_height: 200,
            })
            .is_none());
        assert!(feed
            .maybe_fetch_more(ScrollMetrics {
                viewport: 30,
                scrolled: 170,
                content_height: 200,
            })
            .is_some());
    }
}
