//! Credential persistence.
//!
//! The store is append-only apart from refresh: `add` inserts a new row,
//! `commit` writes a refreshed credential back over its own row, and the
//! current credential is always the row with the highest id.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryCredentialStore;
pub use sqlite::SqliteCredentialStore;

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::types::{Credential, NewCredential};
use async_trait::async_trait;
use std::sync::Arc;

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Append a credential, returning it with its assigned id
    async fn add(&self, credential: NewCredential) -> Result<Credential, StoreError>;

    /// Most recently added credential, if any
    async fn current(&self) -> Result<Option<Credential>, StoreError>;

    /// Persist in-place mutations of an existing credential
    async fn commit(&self, credential: &Credential) -> Result<(), StoreError>;
}

/// Open the backend named by the database URL
pub fn open(config: &DatabaseConfig) -> Result<Arc<dyn CredentialStore>, StoreError> {
    let url = config.url.trim();

    if url == ":memory:" {
        tracing::warn!("Using in-memory credential store - credentials are lost on restart");
        return Ok(Arc::new(MemoryCredentialStore::new()));
    }

    let path = url.strip_prefix("sqlite://").unwrap_or(url);
    Ok(Arc::new(SqliteCredentialStore::open(path)?))
}
