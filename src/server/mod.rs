pub mod http;

use crate::accounts::AccountService;
use crate::auth::{AccountingProvider, AuthService, LoginStates, QuickBooksClient};
use crate::config::Config;
use crate::resilience::ResilientExecutor;
use crate::store::{self, CredentialStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared state handed to every HTTP handler
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Arc<AuthService>,
    pub accounts: Arc<AccountService>,
    pub login_states: Arc<LoginStates>,
}

impl AppState {
    /// Wire services around an explicit provider and store
    pub fn new(
        config: Config,
        provider: Arc<dyn AccountingProvider>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        let auth = Arc::new(AuthService::new(provider.clone(), store.clone()));
        let executor = ResilientExecutor::new(store, auth.clone(), &config.retry);
        let accounts = Arc::new(AccountService::new(provider, executor));
        let login_states = Arc::new(LoginStates::new(Duration::from_secs(
            config.session.state_ttl_secs,
        )));

        Self {
            config: Arc::new(config),
            auth,
            accounts,
            login_states,
        }
    }

    /// Build state from configuration: QuickBooks client plus configured store
    pub fn from_config(config: Config) -> Result<Self> {
        let provider = QuickBooksClient::new(config.quickbooks.clone())
            .context("Failed to create QuickBooks client")?;
        let store = store::open(&config.database)
            .with_context(|| format!("Failed to open credential store: {}", config.database.url))?;

        Ok(Self::new(config, Arc::new(provider), store))
    }
}

/// Run the HTTP server until it fails
pub async fn run(config: Config) -> Result<()> {
    let bind = config.server.bind.clone();
    let state = AppState::from_config(config)?;
    let app = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {}", bind))?;
    info!("✓ HTTP server listening on {}", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
