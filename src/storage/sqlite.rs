//! SQLite storage backend for the entity cache

use super::traits::{EntityStore, OpenStore, StorageResult};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Pending writes that trigger an automatic commit.
pub const DEFAULT_COMMIT_THRESHOLD: usize = 10_000;

/// SQLite-backed entity store
///
/// Uses a single SQLite database file with a `vertices` and an `edges` table.
/// Thread-safe via internal mutex on the connection.
///
/// Writes open a transaction lazily and accumulate in it until the pending
/// count exceeds `commit_threshold` or `commit(true)` is called. Reads on the
/// same store see uncommitted writes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    pending: AtomicUsize,
    commit_threshold: usize,
}

impl SqliteStore {
    /// Initialize the database schema
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS vertices (
                key TEXT PRIMARY KEY,
                label TEXT NOT NULL,
                json TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
                src TEXT NOT NULL,
                dst TEXT NOT NULL,
                src_name TEXT NOT NULL,
                dst_name TEXT NOT NULL,
                UNIQUE (src, dst, src_name, dst_name)
            );
            "#,
        )?;
        Ok(())
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
            pending: AtomicUsize::new(0),
            commit_threshold: DEFAULT_COMMIT_THRESHOLD,
        }
    }

    /// Override the automatic commit threshold
    pub fn with_commit_threshold(mut self, threshold: usize) -> Self {
        self.commit_threshold = threshold.max(1);
        self
    }

    /// Writes not yet committed
    pub fn pending_writes(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Run a write, opening a transaction first if none is active, then
    /// commit if the threshold was crossed.
    fn write(&self, f: impl FnOnce(&Connection) -> StorageResult<()>) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }
        f(&conn)?;
        let pending = self.pending.fetch_add(1, Ordering::SeqCst) + 1;
        if pending > self.commit_threshold {
            Self::flush(&conn, &self.pending)?;
        }
        Ok(())
    }

    fn flush(conn: &Connection, pending: &AtomicUsize) -> StorageResult<()> {
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT")?;
            tracing::debug!(writes = pending.load(Ordering::SeqCst), "committed entity store batch");
        }
        pending.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn parse_rows(rows: Vec<(String, String)>) -> StorageResult<Vec<(String, Value)>> {
        rows.into_iter()
            .map(|(key, json)| Ok((key, serde_json::from_str(&json)?)))
            .collect()
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn open_read_only(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self::from_connection(conn))
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }
}

impl EntityStore for SqliteStore {
    // === Vertex Operations ===

    fn put(&self, key: &str, label: &str, payload: &Value) -> StorageResult<()> {
        let json = serde_json::to_string(payload)?;
        self.write(|conn| {
            conn.execute(
                r#"
                INSERT INTO vertices (key, label, json)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(key) DO UPDATE SET
                    label = excluded.label,
                    json = excluded.json
                "#,
                params![key, label, json],
            )?;
            Ok(())
        })
    }

    fn get(&self, key: &str) -> StorageResult<Option<Value>> {
        let conn = self.conn.lock().unwrap();
        let json: Option<String> = conn
            .query_row("SELECT json FROM vertices WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn scan_label(
        &self,
        label: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StorageResult<Vec<(String, Value)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT key, json FROM vertices
             WHERE label = ?1 AND (?2 IS NULL OR key > ?2)
             ORDER BY key LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![label, after, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Self::parse_rows(rows)
    }

    fn count_by_label(&self, label: &str) -> StorageResult<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vertices WHERE label = ?1",
            params![label],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // === Edge Operations ===

    fn put_edge(&self, src: &str, dst: &str, src_name: &str, dst_name: &str) -> StorageResult<()> {
        self.write(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO edges (src, dst, src_name, dst_name) VALUES (?1, ?2, ?3, ?4)",
                params![src, dst, src_name, dst_name],
            )?;
            Ok(())
        })
    }

    fn get_edges(&self, src: &str, src_name: &str) -> StorageResult<BTreeMap<String, Vec<Value>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.dst_name, v.json
             FROM edges e JOIN vertices v ON v.key = e.dst
             WHERE e.src = ?1 AND e.src_name = ?2
             ORDER BY e.dst_name, e.dst",
        )?;
        let rows = stmt
            .query_map(params![src, src_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut children: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for (dst_name, json) in rows {
            children
                .entry(dst_name)
                .or_default()
                .push(serde_json::from_str(&json)?);
        }
        Ok(children)
    }

    fn get_edges_by_label(
        &self,
        src: &str,
        src_name: &str,
        dst_name: &str,
        limit: Option<usize>,
    ) -> StorageResult<BTreeMap<String, Value>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT e.dst_name, v.json
             FROM edges e JOIN vertices v ON v.key = e.dst
             WHERE e.src = ?1 AND e.src_name = ?2 AND e.dst_name = ?3
             ORDER BY e.dst LIMIT ?4",
        )?;
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let rows = stmt
            .query_map(params![src, src_name, dst_name, limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut children = BTreeMap::new();
        for (role, json) in rows {
            if !children.contains_key(&role) {
                children.insert(role, serde_json::from_str(&json)?);
            }
        }
        Ok(children)
    }

    // === Maintenance ===

    fn commit(&self, force: bool) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        if force || self.pending.load(Ordering::SeqCst) > self.commit_threshold {
            Self::flush(&conn, &self.pending)?;
        }
        Ok(())
    }

    fn index(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE INDEX IF NOT EXISTS idx_vertices_label ON vertices(label);
            CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src, src_name, dst_name);
            CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst);
            "#,
        )?;
        Ok(())
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Ok(conn) = self.conn.lock() {
            if let Err(e) = Self::flush(&conn, &self.pending) {
                tracing::error!(error = %e, "failed to commit pending entity store writes");
            }
        }
    }
}
