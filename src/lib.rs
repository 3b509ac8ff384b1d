pub mod accounts;
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;
pub mod resilience;
pub mod server;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use error::{ApiError, RemoteError, StoreError};
pub use types::{Credential, NewCredential};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
