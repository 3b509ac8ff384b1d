//! SQLite-backed credential store.
//!
//! Every operation opens its own connection on a blocking worker thread and
//! drops it before returning, so no connection outlives the call and none is
//! held while a QuickBooks round-trip is in flight. Writes run inside a
//! transaction that is committed before the connection is released.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::CredentialStore;
use crate::error::StoreError;
use crate::types::{Credential, NewCredential};

pub struct SqliteCredentialStore {
    path: PathBuf,
}

impl SqliteCredentialStore {
    /// Open (creating if needed) the database file and ensure the schema exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = connect(&path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS credentials (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                access_token  TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                realm_id      TEXT NOT NULL,
                expires_at    TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );
        ",
        )?;
        info!(path = %path.display(), "Credential store ready");

        Ok(Self { path })
    }

    /// Run `op` against a fresh connection on the blocking pool
    async fn with_connection<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = connect(&path)?;
            op(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

fn connect(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(conn)
}

fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::InvalidData(format!("bad timestamp {raw:?}: {e}")))
}

type RawRow = (i64, String, String, String, String, String);

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_credential(raw: RawRow) -> Result<Credential, StoreError> {
    let (id, access_token, refresh_token, realm_id, expires_at, updated_at) = raw;
    Ok(Credential {
        id,
        access_token,
        refresh_token,
        realm_id,
        expires_at: parse_ts(&expires_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn add(&self, credential: NewCredential) -> Result<Credential, StoreError> {
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO credentials (access_token, refresh_token, realm_id, expires_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    credential.access_token,
                    credential.refresh_token,
                    credential.realm_id,
                    format_ts(&credential.expires_at),
                    format_ts(&credential.updated_at),
                ],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;

            debug!(id, realm_id = %credential.realm_id, "Inserted credential");
            Ok(credential.with_id(id))
        })
        .await
    }

    async fn current(&self) -> Result<Option<Credential>, StoreError> {
        self.with_connection(|conn| {
            let raw = conn
                .query_row(
                    "SELECT id, access_token, refresh_token, realm_id, expires_at, updated_at
                     FROM credentials ORDER BY id DESC LIMIT 1",
                    [],
                    read_row,
                )
                .optional()?;
            raw.map(into_credential).transpose()
        })
        .await
    }

    async fn commit(&self, credential: &Credential) -> Result<(), StoreError> {
        let credential = credential.clone();
        self.with_connection(move |conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute(
                "UPDATE credentials
                 SET access_token = ?1, refresh_token = ?2, realm_id = ?3, expires_at = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    credential.access_token,
                    credential.refresh_token,
                    credential.realm_id,
                    format_ts(&credential.expires_at),
                    format_ts(&credential.updated_at),
                    credential.id,
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(credential.id));
            }
            tx.commit()?;

            debug!(id = credential.id, "Committed credential");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_credential(access: &str, realm: &str) -> NewCredential {
        let now = Utc::now();
        NewCredential {
            access_token: access.to_string(),
            refresh_token: format!("{access}-refresh"),
            realm_id: realm.to_string(),
            expires_at: now + Duration::hours(1),
            updated_at: now,
        }
    }

    fn temp_store() -> (tempfile::TempDir, SqliteCredentialStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteCredentialStore::open(dir.path().join("nested/credentials.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_empty_store_has_no_current() {
        let (_dir, store) = temp_store();
        assert!(store.current().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_current_is_highest_id() {
        let (_dir, store) = temp_store();

        let c1 = store.add(new_credential("first", "r1")).await.unwrap();
        let c2 = store.add(new_credential("second", "r2")).await.unwrap();

        assert!(c2.id > c1.id);
        assert_eq!(store.current().await.unwrap(), Some(c2));
    }

    #[tokio::test]
    async fn test_commit_updates_in_place() {
        let (_dir, store) = temp_store();
        let mut cred = store.add(new_credential("old", "realm")).await.unwrap();

        cred.access_token = "new".to_string();
        cred.expires_at = Utc::now() + Duration::hours(2);
        cred.updated_at = Utc::now();
        store.commit(&cred).await.unwrap();

        let current = store.current().await.unwrap().unwrap();
        assert_eq!(current, cred);

        // Still a single row: refresh never inserts
        let next = store.add(new_credential("later", "realm")).await.unwrap();
        assert_eq!(next.id, cred.id + 1);
    }

    #[tokio::test]
    async fn test_commit_unknown_id_fails() {
        let (_dir, store) = temp_store();
        let ghost = new_credential("ghost", "realm").with_id(42);

        let err = store.commit(&ghost).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(42)));
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.db");

        let added = {
            let store = SqliteCredentialStore::open(&path).unwrap();
            store.add(new_credential("persisted", "realm")).await.unwrap()
        };

        let reopened = SqliteCredentialStore::open(&path).unwrap();
        assert_eq!(reopened.current().await.unwrap(), Some(added));
    }

    #[tokio::test]
    async fn test_unreachable_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as a database file
        assert!(SqliteCredentialStore::open(dir.path()).is_err());
    }
}
