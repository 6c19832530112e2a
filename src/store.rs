// src/store.rs

use crate::error::Result;
use crate::ids::now_millis;
use crate::model::{PayloadAudit, PayloadKind, Run, RunPage, TokenRecord};
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// SQLite-backed store for runs, their audit payloads and OAuth tokens.
///
/// Each method is a single statement (or a short sequence on one locked
/// connection); nothing is held across an await point.
pub struct Store {
    conn: Mutex<Connection>,
}

/// Outcome of inserting a run keyed by content hash.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted,
    /// Another run already holds this content hash.
    Existing(Run),
}

impl Store {
    /// Open (or create) a store with SQLite backend
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // The unique content_hash is what makes concurrent duplicate uploads
        // collapse into one run.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                content_hash TEXT NOT NULL UNIQUE,
                stored_file TEXT,
                created_at INTEGER NOT NULL,
                data TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS payloads (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS tokens (
                provider TEXT PRIMARY KEY,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_created_at ON runs(created_at)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_payloads_run_kind ON payloads(run_id, kind)",
            [],
        )?;

        info!("Database initialized successfully");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Insert a run unless its content hash is already taken.
    pub fn insert_run(
        &self,
        run: &Run,
        content_hash: &str,
        stored_file: Option<&str>,
    ) -> Result<InsertOutcome> {
        let data = serde_json::to_string(run)?;
        let changed = self.conn().execute(
            "INSERT INTO runs (id, content_hash, stored_file, created_at, data)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(content_hash) DO NOTHING",
            params![run.id, content_hash, stored_file, run.created_at, data],
        )?;

        if changed == 0 {
            warn!(run_id = %run.id, "Content hash already stored, keeping existing run");
            return match self.find_run_by_hash(content_hash)? {
                Some(existing) => Ok(InsertOutcome::Existing(existing)),
                None => Err(rusqlite::Error::QueryReturnedNoRows.into()),
            };
        }
        info!(run_id = %run.id, "Run stored");
        Ok(InsertOutcome::Inserted)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let data: Option<String> = self
            .conn()
            .query_row("SELECT data FROM runs WHERE id = ?1", params![id], |row| {
                row.get(0)
            })
            .optional()?;
        match data {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    pub fn find_run_by_hash(&self, content_hash: &str) -> Result<Option<Run>> {
        let data: Option<String> = self
            .conn()
            .query_row(
                "SELECT data FROM runs WHERE content_hash = ?1",
                params![content_hash],
                |row| row.get(0),
            )
            .optional()?;
        match data {
            Some(d) => Ok(Some(serde_json::from_str(&d)?)),
            None => Ok(None),
        }
    }

    /// Newest-first page of runs strictly older than `before`.
    ///
    /// The cursor is the creation time of the last run returned; it is `None`
    /// when the page came back short.
    pub fn list_runs(&self, limit: usize, before: Option<i64>) -> Result<RunPage> {
        let rows: Vec<String> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT data FROM runs
                 WHERE (?1 IS NULL OR created_at < ?1)
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![before, limit as i64], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let runs = rows
            .iter()
            .map(|d| serde_json::from_str(d))
            .collect::<serde_json::Result<Vec<Run>>>()?;
        let next_cursor = if limit > 0 && runs.len() == limit {
            runs.last().map(|r| r.created_at)
        } else {
            None
        };
        Ok(RunPage { runs, next_cursor })
    }

    /// Set the external bill link on a run. Returns false if the run is gone.
    pub fn set_bill_link(&self, id: &str, link: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE runs SET data = json_set(data, '$.billLink', ?1) WHERE id = ?2",
            params![link, id],
        )?;
        info!(run_id = %id, link = %link, "Bill link set");
        Ok(changed > 0)
    }

    /// Blob key of the original upload for a run, if one was stored.
    pub fn stored_file(&self, id: &str) -> Result<Option<String>> {
        let file: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT stored_file FROM runs WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(file.flatten())
    }

    /// Remove a run and its audit payloads.
    pub fn delete_run(&self, id: &str) -> Result<bool> {
        let conn = self.conn();
        conn.execute("DELETE FROM payloads WHERE run_id = ?1", params![id])?;
        let changed = conn.execute("DELETE FROM runs WHERE id = ?1", params![id])?;
        info!(run_id = %id, deleted = changed > 0, "Run deleted");
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Payload audits
    // -----------------------------------------------------------------------

    /// Append a raw JSON payload for a run.
    pub fn insert_payload(
        &self,
        run_id: &str,
        kind: PayloadKind,
        body: &serde_json::Value,
    ) -> Result<i64> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO payloads (run_id, kind, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                run_id,
                kind.as_str(),
                serde_json::to_string(body)?,
                now_millis()
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(run_id = %run_id, kind = %kind, payload_id = id, "Payload stored");
        Ok(id)
    }

    /// Most recent payload of a kind for a run.
    pub fn latest_payload(&self, run_id: &str, kind: PayloadKind) -> Result<Option<PayloadAudit>> {
        let row: Option<(i64, String, i64)> = self
            .conn()
            .query_row(
                "SELECT id, body, created_at FROM payloads
                 WHERE run_id = ?1 AND kind = ?2
                 ORDER BY id DESC LIMIT 1",
                params![run_id, kind.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((id, body, created_at)) = row else {
            return Ok(None);
        };
        Ok(Some(PayloadAudit {
            id,
            run_id: run_id.to_string(),
            kind,
            body: serde_json::from_str(&body)?,
            created_at,
        }))
    }

    /// All payloads for a run, oldest first.
    pub fn payloads_for(&self, run_id: &str) -> Result<Vec<PayloadAudit>> {
        let rows: Vec<(i64, String, String, i64)> = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, kind, body, created_at FROM payloads
                 WHERE run_id = ?1
                 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![run_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut audits = Vec::with_capacity(rows.len());
        for (id, kind, body, created_at) in rows {
            let Ok(kind) = kind.parse::<PayloadKind>() else {
                warn!(payload_id = id, kind = %kind, "Skipping payload of unknown kind");
                continue;
            };
            audits.push(PayloadAudit {
                id,
                run_id: run_id.to_string(),
                kind,
                body: serde_json::from_str(&body)?,
                created_at,
            });
        }
        Ok(audits)
    }

    // -----------------------------------------------------------------------
    // OAuth tokens
    // -----------------------------------------------------------------------

    pub fn get_token(&self, provider: &str) -> Result<Option<TokenRecord>> {
        let token = self
            .conn()
            .query_row(
                "SELECT provider, access_token, refresh_token, expires_at
                 FROM tokens WHERE provider = ?1",
                params![provider],
                |row| {
                    Ok(TokenRecord {
                        provider: row.get(0)?,
                        access_token: row.get(1)?,
                        refresh_token: row.get(2)?,
                        expires_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(token)
    }

    /// Store the token set for a provider, superseding any previous one.
    pub fn put_token(&self, token: &TokenRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO tokens (provider, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(provider) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                token.provider,
                token.access_token,
                token.refresh_token,
                token.expires_at,
                now_millis(),
            ],
        )?;
        info!(provider = %token.provider, expires_at = token.expires_at, "Token stored");
        Ok(())
    }

    pub fn delete_token(&self, provider: &str) -> Result<bool> {
        let changed = self
            .conn()
            .execute("DELETE FROM tokens WHERE provider = ?1", params![provider])?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InvoiceMeta, RunStatus, Totals};
    use serde_json::json;

    fn run(id: &str, created_at: i64) -> Run {
        Run {
            id: id.to_string(),
            status: RunStatus::Success,
            meta: InvoiceMeta::default(),
            items: vec![],
            totals: Totals::default(),
            bill_link: None,
            duration: 1.0,
            file_name: "invoice.pdf".to_string(),
            notes: vec![],
            created_at,
        }
    }

    #[test]
    fn test_insert_is_unique_by_hash() {
        let store = Store::open_in_memory().unwrap();
        let first = run("run_a", 1);
        assert!(matches!(
            store.insert_run(&first, "h1", Some("run_a_invoice.pdf")).unwrap(),
            InsertOutcome::Inserted
        ));

        match store.insert_run(&run("run_b", 2), "h1", None).unwrap() {
            InsertOutcome::Existing(existing) => assert_eq!(existing.id, "run_a"),
            other => panic!("expected existing run, got {other:?}"),
        }
        assert!(store.get_run("run_b").unwrap().is_none());
        assert_eq!(
            store.stored_file("run_a").unwrap().as_deref(),
            Some("run_a_invoice.pdf")
        );
    }

    #[test]
    fn test_list_runs_paginates_newest_first() {
        let store = Store::open_in_memory().unwrap();
        for i in 1..=5 {
            store
                .insert_run(&run(&format!("run_{i}"), i * 100), &format!("h{i}"), None)
                .unwrap();
        }

        let page = store.list_runs(2, None).unwrap();
        let ids: Vec<_> = page.runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["run_5", "run_4"]);
        assert_eq!(page.next_cursor, Some(400));

        let page = store.list_runs(2, page.next_cursor).unwrap();
        let ids: Vec<_> = page.runs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["run_3", "run_2"]);

        let page = store.list_runs(2, page.next_cursor).unwrap();
        assert_eq!(page.runs.len(), 1);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn test_set_bill_link_updates_run_json() {
        let store = Store::open_in_memory().unwrap();
        store.insert_run(&run("run_a", 1), "h1", None).unwrap();
        assert!(store.set_bill_link("run_a", "https://example.test/b/1").unwrap());
        assert_eq!(
            store.get_run("run_a").unwrap().unwrap().bill_link.as_deref(),
            Some("https://example.test/b/1")
        );
        assert!(!store.set_bill_link("missing", "x").unwrap());
    }

    #[test]
    fn test_latest_payload_by_kind() {
        let store = Store::open_in_memory().unwrap();
        store
            .insert_payload("run_a", PayloadKind::IntegrationRequest, &json!({"n": 1}))
            .unwrap();
        store
            .insert_payload("run_a", PayloadKind::IntegrationRequest, &json!({"n": 2}))
            .unwrap();
        store
            .insert_payload("run_a", PayloadKind::Parsed, &json!({"p": true}))
            .unwrap();

        let latest = store
            .latest_payload("run_a", PayloadKind::IntegrationRequest)
            .unwrap()
            .unwrap();
        assert_eq!(latest.body["n"], 2);
        assert!(
            store
                .latest_payload("run_a", PayloadKind::IntegrationResponse)
                .unwrap()
                .is_none()
        );
        assert_eq!(store.payloads_for("run_a").unwrap().len(), 3);

        store.insert_run(&run("run_a", 1), "h1", None).unwrap();
        assert!(store.delete_run("run_a").unwrap());
        assert!(store.payloads_for("run_a").unwrap().is_empty());
    }

    #[test]
    fn test_token_upsert_supersedes() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_token("zoho").unwrap().is_none());

        let mut token = TokenRecord {
            provider: "zoho".into(),
            access_token: "a1".into(),
            refresh_token: "r1".into(),
            expires_at: 10,
        };
        store.put_token(&token).unwrap();
        token.access_token = "a2".into();
        token.expires_at = 20;
        store.put_token(&token).unwrap();

        let stored = store.get_token("zoho").unwrap().unwrap();
        assert_eq!(stored, token);
        assert!(store.delete_token("zoho").unwrap());
        assert!(store.get_token("zoho").unwrap().is_none());
    }

    #[test]
    fn test_open_on_disk_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bills.db");
        let store = Store::open(&path).unwrap();
        store.insert_run(&run("run_a", 1), "h1", None).unwrap();
        drop(store);

        let reopened = Store::open(&path).unwrap();
        assert!(reopened.get_run("run_a").unwrap().is_some());
    }
}
