// Account listing through the resilient executor
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::auth::AccountingProvider;
use crate::error::{ApiError, RemoteError};
use crate::resilience::{ProtectedCall, ResilientExecutor};
use crate::types::Credential;

/// `SELECT * FROM Account`, optionally filtered by name prefix
pub struct ListAccounts<'a> {
    provider: &'a dyn AccountingProvider,
    name_prefix: Option<&'a str>,
}

#[async_trait]
impl<'a> ProtectedCall for ListAccounts<'a> {
    type Output = Value;

    async fn call(&self, credential: &Credential) -> Result<Value, RemoteError> {
        self.provider.query_accounts(credential, self.name_prefix).await
    }
}

pub struct AccountService {
    provider: Arc<dyn AccountingProvider>,
    executor: ResilientExecutor,
}

impl AccountService {
    pub fn new(provider: Arc<dyn AccountingProvider>, executor: ResilientExecutor) -> Self {
        Self { provider, executor }
    }

    pub async fn list_accounts(&self, name_prefix: Option<&str>) -> Result<Value, ApiError> {
        let call = ListAccounts {
            provider: self.provider.as_ref(),
            name_prefix,
        };
        self.executor.execute(&call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::resilience::CredentialRefresher;
    use crate::store::{CredentialStore, MemoryCredentialStore};
    use crate::types::NewCredential;
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingProvider {
        prefixes: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl AccountingProvider for RecordingProvider {
        fn authorization_url(&self, state: &str) -> String {
            state.to_string()
        }

        async fn exchange_code(&self, _code: &str, _realm_id: &str) -> Result<NewCredential, RemoteError> {
            Err(RemoteError::Transport("unused".into()))
        }

        async fn refresh(&self, _credential: &mut Credential) -> Result<(), RemoteError> {
            Err(RemoteError::Transport("unused".into()))
        }

        async fn query_accounts(
            &self,
            credential: &Credential,
            name_prefix: Option<&str>,
        ) -> Result<Value, RemoteError> {
            self.prefixes.lock().unwrap().push(name_prefix.map(String::from));
            Ok(json!({ "QueryResponse": { "realm": credential.realm_id } }))
        }
    }

    struct NoRefresh;

    #[async_trait]
    impl CredentialRefresher for NoRefresh {
        async fn refresh(&self, _stale: &Credential) -> Result<Credential, ApiError> {
            Err(ApiError::Internal("refresh not expected".into()))
        }
    }

    #[tokio::test]
    async fn test_list_accounts_passes_prefix_and_payload() {
        let store = Arc::new(MemoryCredentialStore::new());
        let now = Utc::now();
        store
            .add(NewCredential {
                access_token: "at".into(),
                refresh_token: "rt".into(),
                realm_id: "realm-5".into(),
                expires_at: now + Duration::hours(1),
                updated_at: now,
            })
            .await
            .unwrap();

        let provider = Arc::new(RecordingProvider {
            prefixes: Mutex::new(Vec::new()),
        });
        let executor = ResilientExecutor::new(store, Arc::new(NoRefresh), &RetryConfig::default());
        let service = AccountService::new(provider.clone(), executor);

        let payload = service.list_accounts(Some("Bank")).await.unwrap();

        assert_eq!(payload["QueryResponse"]["realm"], "realm-5");
        assert_eq!(*provider.prefixes.lock().unwrap(), vec![Some("Bank".to_string())]);
    }
}
