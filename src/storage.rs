use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Durable key/value store backing the reference-data cache. Each cached
/// list occupies two paired keys, `<name>/values` and `<name>/fetched_at`,
/// which are always written and removed together.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub payload: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    /// Writes both halves of a reference entry in one transaction.
    pub fn put_reference(&self, name: &str, payload: &str, fetched_at: DateTime<Utc>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO reference_cache (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![values_key(name), payload],
        )?;
        tx.execute(
            "INSERT INTO reference_cache (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![timestamp_key(name), fetched_at.timestamp().to_string()],
        )?;
        tx.commit().context("storage: commit reference entry")
    }

    /// Reads a reference entry. Returns `None` when either half is missing
    /// or the timestamp does not parse; a torn pair is dropped on the spot.
    pub fn get_reference(&self, name: &str) -> Result<Option<ReferenceEntry>> {
        let payload = self.get_value(&values_key(name))?;
        let stamp = self.get_value(&timestamp_key(name))?;
        match (payload, stamp) {
            (Some(payload), Some(stamp)) => {
                let Some(fetched_at) = stamp
                    .parse::<i64>()
                    .ok()
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
                else {
                    tracing::warn!(name, "unreadable cache timestamp, purging entry");
                    self.delete_reference(name)?;
                    return Ok(None);
                };
                Ok(Some(ReferenceEntry {
                    payload,
                    fetched_at,
                }))
            }
            (None, None) => Ok(None),
            _ => {
                tracing::warn!(name, "half-written cache entry, purging");
                self.delete_reference(name)?;
                Ok(None)
            }
        }
    }

    /// Removes both halves of an entry together.
    pub fn delete_reference(&self, name: &str) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM reference_cache WHERE key IN (?1, ?2)",
            params![values_key(name), timestamp_key(name)],
        )?;
        tx.commit().context("storage: delete reference entry")
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM reference_cache WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .context("storage: query reference cache")
    }
}

fn values_key(name: &str) -> String {
    format!("{name}/values")
}

fn timestamp_key(name: &str) -> String {
    format!("{name}/fetched_at")
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS reference_cache (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("bumaview").join("cache.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_temp(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("cache.db")),
        })
        .unwrap()
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);
        assert!(dir.path().join("cache.db").exists());
        store.close().unwrap();
    }

    #[test]
    fn reference_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);
        let stamp = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        store.put_reference("companies", r#"[{"company_id":1}]"#, stamp).unwrap();

        let entry = store.get_reference("companies").unwrap().unwrap();
        assert_eq!(entry.payload, r#"[{"company_id":1}]"#);
        assert_eq!(entry.fetched_at, stamp);

        store.delete_reference("companies").unwrap();
        assert!(store.get_reference("companies").unwrap().is_none());
    }

    #[test]
    fn overwrite_replaces_both_halves() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);
        let old = Utc.timestamp_opt(1_600_000_000, 0).single().unwrap();
        let new = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap();
        store.put_reference("companies", "old", old).unwrap();
        store.put_reference("companies", "new", new).unwrap();

        let entry = store.get_reference("companies").unwrap().unwrap();
        assert_eq!(entry.payload, "new");
        assert_eq!(entry.fetched_at, new);
    }

    #[test]
    fn missing_entry_is_none() {
        let dir = tempdir().unwrap();
        let store = open_temp(&dir);
        assert!(store.get_reference("companies").unwrap().is_none());
    }
}
