use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub quickbooks: QuickBooksConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuickBooksConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path (optionally `sqlite://`-prefixed), or `:memory:`
    #[serde(default = "default_database_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts for a rate-limited call, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Flat cooldown between attempts after a 429
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_state_ttl")]
    pub state_ttl_secs: u64,
}

// Defaults
fn default_http_bind() -> String { "0.0.0.0:8000".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_redirect_uri() -> String { "http://localhost:8000/callback".to_string() }
fn default_scope() -> String { "com.intuit.quickbooks.accounting".to_string() }
fn default_auth_url() -> String { "https://appcenter.intuit.com/connect/oauth2".to_string() }
fn default_token_url() -> String { "https://oauth.platform.intuit.com/oauth2/v1/tokens/bearer".to_string() }
fn default_api_base_url() -> String { "https://sandbox-quickbooks.api.intuit.com/v3/company".to_string() }
fn default_timeout_secs() -> u64 { 30 }
fn default_database_url() -> String { "ledgerlink.db".to_string() }
// QuickBooks guidance: 5 attempts, flat 60 second cooldown
fn default_max_attempts() -> u32 { 5 }
fn default_delay_secs() -> u64 { 60 }
fn default_state_ttl() -> u64 { 600 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_http_bind(),
            log_level: default_log_level(),
        }
    }
}

impl Default for QuickBooksConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: default_redirect_uri(),
            scope: default_scope(),
            auth_url: default_auth_url(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            state_ttl_secs: default_state_ttl(),
        }
    }
}

impl RetryConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_secs)
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// A missing config file is not an error: every setting has a default and
    /// the QuickBooks credentials can come from the environment alone.
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config_path = env::var("LEDGERLINK_CONFIG").ok().or_else(|| {
            let home_config = format!(
                "{}/.config/ledgerlink/config.toml",
                env::var("HOME").unwrap_or_default()
            );
            [
                "./config.toml".to_string(),
                "./ledgerlink.toml".to_string(),
                "/etc/ledgerlink/config.toml".to_string(),
                home_config,
            ]
            .into_iter()
            .find(|path| Path::new(path).exists())
        });

        let mut config = match config_path {
            Some(path) => Self::from_file(&path)?,
            None => {
                tracing::debug!("No config file found, using defaults");
                Config::default()
            }
        };

        config.apply_env_overrides();

        Ok(config)
    }

    /// Read and parse a TOML config file, substituting `${VAR}` references
    pub fn from_file(path: &str) -> Result<Self> {
        #[cfg(unix)]
        Self::validate_file_permissions(path)?;

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::from_toml(&content).with_context(|| format!("Failed to parse config file: {}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let content = Self::substitute_env_vars(content);
        Ok(toml::from_str(&content)?)
    }

    /// Substitute ${VAR_NAME} with environment variable values
    fn substitute_env_vars(content: &str) -> String {
        let mut result = String::with_capacity(content.len());
        let mut rest = content;

        // Substituted values are copied as-is, never rescanned
        while let Some(start) = rest.find("${") {
            let Some(end) = rest[start..].find('}') else {
                break;
            };
            result.push_str(&rest[..start]);
            let var_name = &rest[start + 2..start + end];
            result.push_str(&env::var(var_name).unwrap_or_default());
            rest = &rest[start + end + 1..];
        }

        result.push_str(rest);
        result
    }

    /// Well-known environment variables win over the file
    fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 4] = [
            ("QB_CLIENT_ID", &mut self.quickbooks.client_id),
            ("QB_CLIENT_SECRET", &mut self.quickbooks.client_secret),
            ("QB_REDIRECT_URI", &mut self.quickbooks.redirect_uri),
            ("DATABASE_URL", &mut self.database.url),
        ];

        for (var, slot) in overrides {
            if let Ok(value) = env::var(var) {
                if !value.is_empty() {
                    *slot = value;
                }
            }
        }
    }

    /// Log settings that will make QuickBooks calls fail
    pub fn validate(&self) {
        if self.quickbooks.client_id.is_empty() || self.quickbooks.client_secret.is_empty() {
            tracing::warn!(
                "QuickBooks client id/secret not configured - token requests will be rejected"
            );
        }
        if self.retry.max_attempts == 0 {
            tracing::warn!("retry.max_attempts is 0 - treating as a single attempt");
        }
    }

    /// Validate config file permissions (Unix only)
    #[cfg(unix)]
    fn validate_file_permissions(path: &str) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let path_obj = Path::new(path);

        if !path_obj.exists() {
            tracing::debug!("Config file does not exist yet: {}", path);
            return Ok(());
        }

        let metadata = fs::metadata(path_obj)
            .with_context(|| format!("Failed to read metadata for config file: {}", path))?;
        let mode = metadata.permissions().mode();

        let group_readable = (mode & 0o040) != 0;
        let others_readable = (mode & 0o004) != 0;
        let group_writable = (mode & 0o020) != 0;
        let others_writable = (mode & 0o002) != 0;

        if group_readable || others_readable {
            tracing::warn!(
                "Config file {} has insecure permissions: {:o} (it holds the QuickBooks client secret, run: chmod 600 {})",
                path,
                mode & 0o777,
                path
            );
        }

        if group_writable || others_writable {
            anyhow::bail!(
                "Config file {} is writable by group or others (mode: {:o}). \
                This is a security risk. Run: chmod 600 {}",
                path,
                mode & 0o777,
                path
            );
        }

        Ok(())
    }
}
