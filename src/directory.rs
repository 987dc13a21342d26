use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::api::{ApiError, Company};
use crate::data::PageSource;
use crate::feed::{Accumulator, Paginator, QueryKey, DEFAULT_PAGE_SIZE};
use crate::storage::Store;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);

const CACHE_NAME: &str = "companies";

/// The full company directory, used by the feeds to resolve `company_id`
/// into a display name.
///
/// Lookup order: in-memory copy, then the persisted entry if younger than
/// the TTL, then a full paginated fetch. Persistence is an optimization
/// only; every storage failure is logged and swallowed, and the directory
/// works identically with no store at all.
pub struct Directory {
    source: Arc<dyn PageSource<Company>>,
    store: Option<Arc<Store>>,
    ttl: Duration,
    companies: RwLock<Vec<Company>>,
    // Serializes full fetches so concurrent load() calls coalesce.
    fetch_lock: Mutex<()>,
}

impl Directory {
    pub fn new(
        source: Arc<dyn PageSource<Company>>,
        store: Option<Arc<Store>>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            store,
            ttl,
            companies: RwLock::new(Vec::new()),
            fetch_lock: Mutex::new(()),
        }
    }

    pub fn is_loaded(&self) -> bool {
        !self.companies.read().is_empty()
    }

    pub fn companies(&self) -> Vec<Company> {
        self.companies.read().clone()
    }

    /// Returns the directory, fetching it only when neither the in-memory
    /// copy nor a fresh persisted entry exists.
    pub fn load(&self) -> Result<Vec<Company>, ApiError> {
        {
            let companies = self.companies.read();
            if !companies.is_empty() {
                return Ok(companies.clone());
            }
        }

        let _guard = self.fetch_lock.lock();
        // A concurrent load may have finished while we waited on the lock.
        {
            let companies = self.companies.read();
            if !companies.is_empty() {
                return Ok(companies.clone());
            }
        }

        if let Some(cached) = self.read_persisted() {
            *self.companies.write() = cached.clone();
            return Ok(cached);
        }

        let fetched = self.fetch_all()?;
        *self.companies.write() = fetched.clone();
        self.persist(&fetched);
        Ok(fetched)
    }

    /// Discards both copies and refetches from the API.
    pub fn refresh(&self) -> Result<Vec<Company>, ApiError> {
        let _guard = self.fetch_lock.lock();
        self.companies.write().clear();
        if let Some(store) = &self.store {
            if let Err(err) = store.delete_reference(CACHE_NAME) {
                tracing::warn!(error = %err, "failed to drop persisted company cache");
            }
        }
        let fetched = self.fetch_all()?;
        *self.companies.write() = fetched.clone();
        self.persist(&fetched);
        Ok(fetched)
    }

    /// Resolves an id to a company name. Never fails: unknown ids get a
    /// deterministic placeholder, same as the web client shows.
    pub fn name(&self, company_id: i64) -> String {
        self.companies
            .read()
            .iter()
            .find(|company| company.company_id == company_id)
            .map(|company| company.company_name.clone())
            .unwrap_or_else(|| format!("회사 {company_id}"))
    }

    fn read_persisted(&self) -> Option<Vec<Company>> {
        let store = self.store.as_ref()?;
        let entry = match store.get_reference(CACHE_NAME) {
            Ok(entry) => entry?,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read persisted company cache");
                return None;
            }
        };
        let age = Utc::now().signed_duration_since(entry.fetched_at);
        let expired = age
            .to_std()
            .map(|age| age >= self.ttl)
            // A future timestamp means a clock jump; treat it as expired
            // rather than serving an entry of unknown age.
            .unwrap_or(true);
        if expired {
            tracing::debug!("persisted company cache expired, purging");
            if let Err(err) = store.delete_reference(CACHE_NAME) {
                tracing::warn!(error = %err, "failed to purge expired company cache");
            }
            return None;
        }
        match serde_json::from_str::<Vec<Company>>(&entry.payload) {
            Ok(companies) if !companies.is_empty() => Some(companies),
            Ok(_) => None,
            Err(err) => {
                tracing::warn!(error = %err, "undecodable persisted company cache, purging");
                if let Err(err) = store.delete_reference(CACHE_NAME) {
                    tracing::warn!(error = %err, "failed to purge broken company cache");
                }
                None
            }
        }
    }

    fn persist(&self, companies: &[Company]) {
        let Some(store) = &self.store else {
            return;
        };
        let payload = match serde_json::to_string(companies) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "failed to serialize company cache");
                return;
            }
        };
        if let Err(err) = store.put_reference(CACHE_NAME, &payload, Utc::now()) {
            tracing::warn!(error = %err, "failed to persist company cache");
        }
    }

    /// Walks the companies endpoint page by page until the server reports
    /// the end, deduplicating along the way.
    fn fetch_all(&self) -> Result<Vec<Company>, ApiError> {
        let query = QueryKey::default();
        let mut paginator = Paginator::new(DEFAULT_PAGE_SIZE);
        let mut list = Accumulator::new();
        while let Some(request) = paginator.next_request() {
            let page = self.source.fetch_page(&query, request)?;
            paginator.record(&page);
            list.merge(page.values);
        }
        Ok(list.items().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StaticPages;
    use tempfile::tempdir;

    fn companies(n: i64) -> Vec<Company> {
        (1..=n)
            .map(|id| Company {
                company_id: id,
                company_name: format!("회사{id}"),
            })
            .collect()
    }

    fn temp_store(dir: &tempfile::TempDir) -> Arc<Store> {
        Arc::new(
            Store::open(crate::storage::Options {
                path: Some(dir.path().join("cache.db")),
            })
            .unwrap(),
        )
    }

    #[test]
    fn load_fetches_every_page_once() {
        let source = Arc::new(StaticPages::new(companies(45)));
        let directory = Directory::new(source.clone(), None, DEFAULT_TTL);

        let loaded = directory.load().unwrap();
        assert_eq!(loaded.len(), 45);
        // 45 items at page size 20: pages ending at 20, 40, 45.
        assert_eq!(source.calls(), 3);

        // Memory hit: no further network traffic.
        let again = directory.load().unwrap();
        assert_eq!(again.len(), 45);
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn fresh_persisted_entry_is_served_without_network() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        store
            .put_reference(
                "companies",
                &serde_json::to_string(&companies(5)).unwrap(),
                Utc::now(),
            )
            .unwrap();

        let source = Arc::new(StaticPages::new(companies(45)));
        let directory = Directory::new(source.clone(), Some(store), DEFAULT_TTL);
        let loaded = directory.load().unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(source.calls(), 0, "cache hit must not touch the API");
    }

    #[test]
    fn expired_persisted_entry_forces_full_fetch() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        let stale = Utc::now() - chrono::Duration::seconds(DEFAULT_TTL.as_secs() as i64 + 1);
        store
            .put_reference(
                "companies",
                &serde_json::to_string(&companies(5)).unwrap(),
                stale,
            )
            .unwrap();

        let source = Arc::new(StaticPages::new(companies(45)));
        let directory = Directory::new(source.clone(), Some(store.clone()), DEFAULT_TTL);
        let loaded = directory.load().unwrap();
        assert_eq!(loaded.len(), 45);
        assert!(source.calls() > 0);

        // The stale entry was replaced, not left behind.
        let entry = store.get_reference("companies").unwrap().unwrap();
        let persisted: Vec<Company> = serde_json::from_str(&entry.payload).unwrap();
        assert_eq!(persisted.len(), 45);
    }

    #[test]
    fn refresh_discards_cache_and_refetches() {
        let dir = tempdir().unwrap();
        let store = temp_store(&dir);
        let source = Arc::new(StaticPages::new(companies(10)));
        let directory = Directory::new(source.clone(), Some(store), DEFAULT_TTL);

        directory.load().unwrap();
        let after_load = source.calls();
        directory.refresh().unwrap();
        assert!(source.calls() > after_load);
    }

    #[test]
    fn lookup_never_fails() {
        let source = Arc::new(StaticPages::new(companies(3)));
        let directory = Directory::new(source, None, DEFAULT_TTL);
        directory.load().unwrap();

        assert_eq!(directory.name(2), "회사2");
        assert_eq!(directory.name(999), "회사 999");
    }

    #[test]
    fn concurrent_loads_coalesce_into_one_fetch() {
        let source = Arc::new(StaticPages::new(companies(45)));
        let directory = Arc::new(Directory::new(source.clone(), None, DEFAULT_TTL));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let directory = directory.clone();
                std::thread::spawn(move || directory.load().unwrap().len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 45);
        }
        // One full fetch (3 pages) no matter how the threads interleave.
        assert_eq!(source.calls(), 3);
    }

    #[test]
    fn works_without_a_store() {
        let source = Arc::new(StaticPages::new(companies(25)));
        let directory = Directory::new(source, None, DEFAULT_TTL);
        assert_eq!(directory.load().unwrap().len(), 25);
        assert_eq!(directory.refresh().unwrap().len(), 25);
    }
}
