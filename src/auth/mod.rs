// OAuth flow: QuickBooks client, login state, credential orchestration

pub mod client;
pub mod service;
pub mod session;

pub use client::{AccountingProvider, QuickBooksClient};
pub use service::AuthService;
pub use session::LoginStates;
