// Login callback handling and credential refresh
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::client::AccountingProvider;
use crate::error::ApiError;
use crate::resilience::CredentialRefresher;
use crate::store::CredentialStore;
use crate::types::{CallbackParams, Credential};

pub struct AuthService {
    provider: Arc<dyn AccountingProvider>,
    store: Arc<dyn CredentialStore>,
    // Serializes refreshes within this process
    refresh_lock: Mutex<()>,
}

impl AuthService {
    pub fn new(provider: Arc<dyn AccountingProvider>, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            provider,
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn authorization_url(&self, state: &str) -> String {
        self.provider.authorization_url(state)
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Complete a login attempt.
    ///
    /// `expected_state` is the nonce recorded for this attempt, if any. The
    /// presented state must match it exactly before anything is exchanged.
    pub async fn handle_callback(
        &self,
        params: CallbackParams,
        expected_state: Option<&str>,
    ) -> Result<Value, ApiError> {
        match (params.state.as_deref(), expected_state) {
            (Some(state), Some(expected)) if !state.is_empty() && state == expected => {}
            _ => {
                warn!("Rejected OAuth callback with missing or mismatched state");
                return Err(ApiError::InvalidState);
            }
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing authorization code".to_string()))?;
        let realm_id = params
            .realm_id
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ApiError::BadRequest("Missing realmId".to_string()))?;

        let new_credential = self
            .provider
            .exchange_code(&code, &realm_id)
            .await
            .map_err(|e| {
                error!("Code exchange failed: {}", e);
                ApiError::AuthenticationFailed(e.to_string())
            })?;

        let credential = self.store.add(new_credential).await?;
        info!(
            id = credential.id,
            realm_id = %credential.realm_id,
            expires_at = %credential.expires_at,
            "Issued new credential"
        );

        Ok(json!({
            "msg": "Authentication successful, now you can access your accounts."
        }))
    }

    /// Refresh the current credential regardless of its expiry
    pub async fn refresh_current(&self) -> Result<Credential, ApiError> {
        let current = self
            .store
            .current()
            .await?
            .ok_or_else(ApiError::no_credential)?;
        self.refresh(&current).await
    }
}

#[async_trait]
impl CredentialRefresher for AuthService {
    /// Refresh the current credential in place of `stale` and persist it.
    ///
    /// Only the current row is ever refreshed. If it no longer carries
    /// `stale`'s access token (a concurrent refresh, or a newer login) and is
    /// still valid, it is returned without contacting QuickBooks.
    async fn refresh(&self, stale: &Credential) -> Result<Credential, ApiError> {
        let _guard = self.refresh_lock.lock().await;

        let mut credential = self
            .store
            .current()
            .await?
            .ok_or_else(ApiError::no_credential)?;

        if credential.access_token != stale.access_token && !credential.is_expired() {
            info!(
                id = credential.id,
                stale_id = stale.id,
                "Current credential already replaced, skipping refresh"
            );
            return Ok(credential);
        }

        if let Err(e) = self.provider.refresh(&mut credential).await {
            error!(id = credential.id, "Token refresh failed: {}", e);
            crate::metrics::METRICS
                .token_refreshes_total
                .with_label_values(&["failure"])
                .inc();
            return Err(ApiError::AuthenticationFailed(e.to_string()));
        }

        self.store.commit(&credential).await?;
        crate::metrics::METRICS
            .token_refreshes_total
            .with_label_values(&["success"])
            .inc();
        info!(
            id = credential.id,
            expires_at = %credential.expires_at,
            "Refreshed access token"
        );

        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::store::MemoryCredentialStore;
    use crate::types::NewCredential;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeProvider {
        exchanges: AtomicUsize,
        refreshes: AtomicUsize,
        fail_exchange: bool,
        fail_refresh: bool,
    }

    #[async_trait]
    impl AccountingProvider for FakeProvider {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://example.test/auth?state={state}")
        }

        async fn exchange_code(&self, code: &str, realm_id: &str) -> Result<NewCredential, RemoteError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if self.fail_exchange {
                return Err(RemoteError::Status { status: 400, body: "invalid_grant".into() });
            }
            let now = Utc::now();
            Ok(NewCredential {
                access_token: format!("access-for-{code}"),
                refresh_token: "refresh".to_string(),
                realm_id: realm_id.to_string(),
                expires_at: now + Duration::hours(1),
                updated_at: now,
            })
        }

        async fn refresh(&self, credential: &mut Credential) -> Result<(), RemoteError> {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_refresh {
                return Err(RemoteError::Status { status: 400, body: "invalid_grant".into() });
            }
            credential.access_token = format!("refreshed-{n}");
            credential.expires_at = Utc::now() + Duration::hours(1);
            credential.updated_at = Utc::now();
            Ok(())
        }

        async fn query_accounts(
            &self,
            _credential: &Credential,
            _name_prefix: Option<&str>,
        ) -> Result<Value, RemoteError> {
            Ok(json!({}))
        }
    }

    fn service(provider: Arc<FakeProvider>) -> (AuthService, Arc<MemoryCredentialStore>) {
        let store = Arc::new(MemoryCredentialStore::new());
        (AuthService::new(provider, store.clone()), store)
    }

    fn params(code: Option<&str>, state: Option<&str>, realm: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(String::from),
            state: state.map(String::from),
            realm_id: realm.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_callback_mismatched_state() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, store) = service(provider.clone());

        let err = auth
            .handle_callback(params(Some("code"), Some("abc"), Some("realm")), Some("xyz"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidState));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_callback_without_stored_state() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, store) = service(provider.clone());

        let err = auth
            .handle_callback(params(Some("code"), Some("abc"), Some("realm")), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidState));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_callback_missing_state() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, _store) = service(provider.clone());

        let err = auth
            .handle_callback(params(Some("code"), None, Some("realm")), Some("xyz"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::InvalidState));
    }

    #[tokio::test]
    async fn test_callback_missing_code() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, store) = service(provider.clone());

        let err = auth
            .handle_callback(params(None, Some("xyz"), Some("realm")), Some("xyz"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::BadRequest(_)));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_callback_persists_credential() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, store) = service(provider.clone());

        let body = auth
            .handle_callback(params(Some("c1"), Some("xyz"), Some("realm-1")), Some("xyz"))
            .await
            .unwrap();

        assert_eq!(
            body["msg"],
            "Authentication successful, now you can access your accounts."
        );
        let current = store.current().await.unwrap().unwrap();
        assert_eq!(current.access_token, "access-for-c1");
        assert_eq!(current.realm_id, "realm-1");
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_callback_exchange_failure_persists_nothing() {
        let provider = Arc::new(FakeProvider {
            fail_exchange: true,
            ..FakeProvider::default()
        });
        let (auth, store) = service(provider.clone());

        let err = auth
            .handle_callback(params(Some("used-code"), Some("xyz"), Some("realm")), Some("xyz"))
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::AuthenticationFailed(_)));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_commits_and_preserves_identity() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, store) = service(provider.clone());
        auth.handle_callback(params(Some("c"), Some("s"), Some("realm")), Some("s"))
            .await
            .unwrap();
        let before = store.current().await.unwrap().unwrap();

        let refreshed = auth.refresh(&before).await.unwrap();

        assert_eq!(refreshed.id, before.id);
        assert_eq!(refreshed.refresh_token, before.refresh_token);
        assert_eq!(refreshed.realm_id, before.realm_id);
        assert_eq!(refreshed.access_token, "refreshed-1");
        assert_eq!(store.current().await.unwrap(), Some(refreshed));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_refresh_is_single_flight() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, store) = service(provider.clone());
        auth.handle_callback(params(Some("c"), Some("s"), Some("realm")), Some("s"))
            .await
            .unwrap();
        let stale = store.current().await.unwrap().unwrap();

        let first = auth.refresh(&stale).await.unwrap();
        // A second caller still holding the stale copy reuses the first result
        let second = auth.refresh(&stale).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_never_touches_superseded_row() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, store) = service(provider.clone());
        auth.handle_callback(params(Some("old"), Some("s"), Some("realm-old")), Some("s"))
            .await
            .unwrap();
        let superseded = store.current().await.unwrap().unwrap();
        auth.handle_callback(params(Some("new"), Some("s"), Some("realm-new")), Some("s"))
            .await
            .unwrap();

        let credential = auth.refresh(&superseded).await.unwrap();

        assert_eq!(credential.realm_id, "realm-new");
        assert_eq!(credential.access_token, "access-for-new");
        assert_eq!(provider.refreshes.load(Ordering::SeqCst), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_of_superseded_row_refreshes_current_when_expired() {
        let provider = Arc::new(FakeProvider::default());
        let (auth, store) = service(provider.clone());
        let now = Utc::now();
        let superseded = store
            .add(NewCredential {
                access_token: "old".into(),
                refresh_token: "rt-old".into(),
                realm_id: "realm-old".into(),
                expires_at: now - Duration::minutes(5),
                updated_at: now,
            })
            .await
            .unwrap();
        store
            .add(NewCredential {
                access_token: "new".into(),
                refresh_token: "rt-new".into(),
                realm_id: "realm-new".into(),
                expires_at: now - Duration::minutes(1),
                updated_at: now,
            })
            .await
            .unwrap();

        let credential = auth.refresh(&superseded).await.unwrap();

        assert_eq!(credential.realm_id, "realm-new");
        assert_eq!(credential.refresh_token, "rt-new");
        assert_eq!(credential.access_token, "refreshed-1");
        assert_eq!(store.current().await.unwrap(), Some(credential));
    }

    #[tokio::test]
    async fn test_refresh_failure_is_authentication_error() {
        let provider = Arc::new(FakeProvider {
            fail_refresh: true,
            ..FakeProvider::default()
        });
        let (auth, store) = service(provider.clone());
        auth.handle_callback(params(Some("c"), Some("s"), Some("realm")), Some("s"))
            .await
            .unwrap();
        let before = store.current().await.unwrap().unwrap();

        let err = auth.refresh(&before).await.unwrap_err();

        assert!(matches!(err, ApiError::AuthenticationFailed(_)));
        assert_eq!(store.current().await.unwrap(), Some(before));
    }

    #[tokio::test]
    async fn test_refresh_current_without_credential() {
        let (auth, _store) = service(Arc::new(FakeProvider::default()));
        let err = auth.refresh_current().await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthenticated(_)));
    }
}
