use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RemoteError;

/// A persisted OAuth credential for one QuickBooks company (realm)
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub access_token: String,
    pub refresh_token: String,
    pub realm_id: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A credential produced by a code exchange, before the store assigns an id
#[derive(Clone, PartialEq)]
pub struct NewCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub realm_id: String,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Token endpoint response (authorization_code and refresh_token grants)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub x_refresh_token_expires_in: Option<i64>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl TokenGrant {
    /// `now + expires_in`, rejecting lifetimes chrono cannot represent
    pub fn expires_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, RemoteError> {
        Duration::try_seconds(self.expires_in)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .ok_or_else(|| {
                RemoteError::Decode(format!("expires_in out of range: {}", self.expires_in))
            })
    }
}

impl Credential {
    /// Expired iff `now >= expires_at`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Overwrite the short-lived half of the credential with a refresh grant.
    ///
    /// `id`, `refresh_token` and `realm_id` are left untouched: refresh is an
    /// update of the existing row, never a new one.
    pub fn apply_refresh(&mut self, grant: &TokenGrant, now: DateTime<Utc>) -> Result<(), RemoteError> {
        let expires_at = grant.expires_at(now)?;
        self.access_token = grant.access_token.clone();
        self.expires_at = expires_at;
        self.updated_at = now;
        Ok(())
    }

    /// Time left until expiry, negative once expired
    pub fn remaining(&self) -> Duration {
        self.expires_at - Utc::now()
    }
}

impl NewCredential {
    pub fn from_grant(grant: &TokenGrant, realm_id: &str, now: DateTime<Utc>) -> Result<Self, RemoteError> {
        Ok(Self {
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            realm_id: realm_id.to_string(),
            expires_at: grant.expires_at(now)?,
            updated_at: now,
        })
    }

    pub fn with_id(self, id: i64) -> Credential {
        Credential {
            id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            realm_id: self.realm_id,
            expires_at: self.expires_at,
            updated_at: self.updated_at,
        }
    }
}

// Tokens never reach logs
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("realm_id", &self.realm_id)
            .field("expires_at", &self.expires_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCredential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("realm_id", &self.realm_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Query parameters QuickBooks sends back to the redirect URI
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    #[serde(rename = "realmId")]
    pub realm_id: Option<String>,
}

/// Query parameters for `GET /accounts`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountsQuery {
    pub name_prefix: Option<String>,
}
