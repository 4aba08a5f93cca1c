//! crates/configs/src/lib.rs
//!
//! Layered settings for FireChan: built-in defaults, then the optional
//! `config/firechan.toml`, then `FIRECHAN__*` environment variables (a
//! `.env` file is read first when present).
//!
//! - `FIRECHAN__SERVER__PORT=8080` -> `server.port = 8080`
//! - `FIRECHAN__RENDER__BLOCKED_HOSTS=a.test,b.test` -> a two-entry list

mod error;
mod sections;

pub use error::{ConfigError, ValidationError};
pub use sections::{
    default_boards, AdminConfig, AllocatorConfig, AntiAbuseConfig, AuthConfig, BoardConfig,
    MediaConfig, PostingConfig, RenderConfig, ServerConfig, StorageConfig,
};

use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "FIRECHAN";
pub const CONFIG_FILE: &str = "config/firechan";

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub anti_abuse: AntiAbuseConfig,
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub render: RenderConfig,
    pub auth: AuthConfig,
    pub posting: PostingConfig,
    #[serde(default = "default_boards")]
    pub boards: Vec<BoardConfig>,
}

impl Settings {
    /// Loads and validates the process configuration.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let builder = Config::builder().add_source(File::with_name(CONFIG_FILE).required(false));
        let settings = Self::build(builder, ENV_PREFIX)?;
        settings.validate()?;

        tracing::debug!(
            backend = %settings.storage.backend,
            boards = settings.boards.len(),
            admins = settings.auth.admins.len(),
            "configuration loaded"
        );
        Ok(settings)
    }

    /// Parses settings from TOML text with the same environment overlay.
    pub fn from_toml(toml: &str, env_prefix: &str) -> Result<Self, ConfigError> {
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build(builder, env_prefix)
    }

    fn build(
        builder: ConfigBuilder<config::builder::DefaultState>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        let settings = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("render.blocked_hosts")
                    .with_list_parse_key("server.cors_origins")
                    .with_list_parse_key("server.trusted_proxies"),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.storage.validate()?;
        self.anti_abuse.validate()?;
        self.auth.validate()?;
        self.posting.validate()?;
        sections::validate_boards(&self.boards)?;
        if self.media.max_upload_bytes == 0 {
            return Err(ValidationError::NotPositive("media.max_upload_bytes"));
        }
        if self.allocator.max_attempts == 0 {
            return Err(ValidationError::NotPositive("allocator.max_attempts"));
        }
        Ok(())
    }
}
