use async_trait::async_trait;
use std::sync::{Mutex, PoisonError};

use super::CredentialStore;
use crate::error::StoreError;
use crate::types::{Credential, NewCredential};

/// Process-local credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    rows: Mutex<Vec<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows ever added
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn add(&self, credential: NewCredential) -> Result<Credential, StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let id = rows.last().map(|c| c.id + 1).unwrap_or(1);
        let credential = credential.with_id(id);
        rows.push(credential.clone());
        Ok(credential)
    }

    async fn current(&self) -> Result<Option<Credential>, StoreError> {
        let rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.last().cloned())
    }

    async fn commit(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        let row = rows
            .iter_mut()
            .find(|c| c.id == credential.id)
            .ok_or(StoreError::NotFound(credential.id))?;
        *row = credential.clone();
        Ok(())
    }
}
