//! Individual configuration sections with their defaults.

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::ValidationError;

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    /// Allowed CORS origins; empty means any.
    pub cors_origins: Vec<String>,
    /// Peers whose `X-Forwarded-For` header is believed. Empty means the
    /// socket address is always the client.
    pub trusted_proxies: Vec<String>,
    /// Emit JSON log lines instead of the human format.
    pub json_logs: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn trusted_proxy_addrs(&self) -> Result<Vec<IpAddr>, ValidationError> {
        self.trusted_proxies
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| ValidationError::InvalidProxy(raw.clone()))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.trusted_proxy_addrs()?;
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.request_timeout_secs == 0 || self.request_timeout_secs > 300 {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.host.trim().is_empty() {
            return Err(ValidationError::MissingRequired("SERVER__HOST"));
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            request_timeout_secs: 30,
            cors_origins: Vec::new(),
            trusted_proxies: Vec::new(),
            json_logs: false,
        }
    }
}

/// Which document store backs the engine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// `memory` or `sqlite`.
    pub backend: String,
    pub database_url: String,
    pub max_connections: u32,
}

impl StorageConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self.backend.as_str() {
            "memory" => Ok(()),
            "sqlite" if self.database_url.trim().is_empty() => {
                Err(ValidationError::MissingRequired("STORAGE__DATABASE_URL"))
            }
            "sqlite" if self.max_connections == 0 => {
                Err(ValidationError::NotPositive("storage.max_connections"))
            }
            "sqlite" => Ok(()),
            other => Err(ValidationError::UnknownBackend(other.to_string())),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".into(),
            database_url: "sqlite://data/firechan.db".into(),
            max_connections: 5,
        }
    }
}

/// Local attachment storage.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub root: String,
    pub url_prefix: String,
    pub max_upload_bytes: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            root: "data/uploads".into(),
            url_prefix: "/uploads".into(),
            max_upload_bytes: 5 * 1024 * 1024,
        }
    }
}

/// Captcha and automatic ban tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AntiAbuseConfig {
    pub captcha_ttl_secs: i64,
    pub captcha_sweep_interval_secs: u64,
    pub failure_threshold: u32,
    pub failure_window_mins: i64,
    pub auto_ban_mins: i64,
}

impl AntiAbuseConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.captcha_ttl_secs <= 0 {
            return Err(ValidationError::NotPositive("anti_abuse.captcha_ttl_secs"));
        }
        if self.captcha_sweep_interval_secs == 0 {
            return Err(ValidationError::NotPositive(
                "anti_abuse.captcha_sweep_interval_secs",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ValidationError::NotPositive("anti_abuse.failure_threshold"));
        }
        if self.failure_window_mins <= 0 || self.auto_ban_mins <= 0 {
            return Err(ValidationError::NotPositive("anti_abuse windows"));
        }
        Ok(())
    }
}

impl Default for AntiAbuseConfig {
    fn default() -> Self {
        Self {
            captcha_ttl_secs: 300,
            captcha_sweep_interval_secs: 600,
            failure_threshold: 5,
            failure_window_mins: 30,
            auto_ban_mins: 15,
        }
    }
}

/// Retry budget of the post-number allocator.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 10,
            max_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Hosts whose links are replaced by the blocked marker.
    pub blocked_hosts: Vec<String>,
}

/// Administrator sessions.
#[derive(Debug, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    #[serde(default)]
    pub admins: Vec<AdminConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdminConfig {
    pub email: String,
    #[serde(default = "default_admin_name")]
    pub display_name: String,
    pub password_hash: String,
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.jwt_secret.expose_secret().len() < 32 {
            return Err(ValidationError::WeakJwtSecret);
        }
        if self.session_ttl_hours <= 0 {
            return Err(ValidationError::NotPositive("auth.session_ttl_hours"));
        }
        for admin in &self.admins {
            if admin.password_hash.trim().is_empty() {
                return Err(ValidationError::AdminWithoutHash(admin.email.clone()));
            }
        }
        Ok(())
    }
}

fn default_session_ttl_hours() -> i64 {
    12
}

fn default_admin_name() -> String {
    "Administrator".into()
}

/// Text limits and naming for new posts.
#[derive(Debug, Deserialize)]
pub struct PostingConfig {
    pub ip_salt: SecretString,
    #[serde(default = "default_max_comment_chars")]
    pub max_comment_chars: usize,
    #[serde(default = "default_anonymous_name")]
    pub anonymous_name: String,
}

impl PostingConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.ip_salt.expose_secret().is_empty() {
            return Err(ValidationError::MissingRequired("POSTING__IP_SALT"));
        }
        if self.max_comment_chars == 0 {
            return Err(ValidationError::NotPositive("posting.max_comment_chars"));
        }
        Ok(())
    }
}

fn default_max_comment_chars() -> usize {
    2000
}

fn default_anonymous_name() -> String {
    "Anonymous".into()
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BoardConfig {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
}

pub fn default_boards() -> Vec<BoardConfig> {
    [
        ("b", "Random", "Anything goes"),
        ("tech", "Technology", "Hardware, software and programming"),
        ("art", "Art", "Drawing, painting and design"),
    ]
    .into_iter()
    .map(|(slug, title, description)| BoardConfig {
        slug: slug.into(),
        title: title.into(),
        description: description.into(),
    })
    .collect()
}

pub fn validate_boards(boards: &[BoardConfig]) -> Result<(), ValidationError> {
    if boards.is_empty() {
        return Err(ValidationError::MissingRequired("boards"));
    }
    let mut seen = HashSet::new();
    for board in boards {
        let valid = !board.slug.is_empty()
            && board
                .slug
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ValidationError::InvalidBoard(board.slug.clone()));
        }
        if !seen.insert(board.slug.as_str()) {
            return Err(ValidationError::DuplicateBoard(board.slug.clone()));
        }
    }
    Ok(())
}
