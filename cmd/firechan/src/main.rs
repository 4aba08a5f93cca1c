//! # FireChan Binary
//!
//! Assembles the engine from configuration and serves it over HTTP.
//!
//! `firechan hash-password <password>` prints an argon2 hash for the
//! `auth.admins` list and exits.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use api_adapters::{router, AppState, EngineConfig, HttpOptions};
use auth_adapters::{hash_password, AdminAccount, JwtIdentityProvider};
use configs::{Settings, StorageConfig};
use domains::{Board, Repositories};
use secrecy::ExposeSecret;
use services::{CaptchaService, GatePolicy, PostingLimits, RetryPolicy};
use storage_adapters::{LocalMediaStore, MemoryDocumentStore};
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some("hash-password") {
        let password = args.next().context("usage: firechan hash-password <password>")?;
        println!("{}", hash_password(&password)?);
        return Ok(());
    }

    let settings = Settings::load().context("failed to load configuration")?;
    init_tracing(settings.server.json_logs);

    let repos = open_store(&settings.storage).await?;
    let media = Arc::new(LocalMediaStore::new(
        PathBuf::from(&settings.media.root),
        settings.media.url_prefix.clone(),
        settings.media.max_upload_bytes,
    ));

    let accounts: Vec<AdminAccount> = settings
        .auth
        .admins
        .iter()
        .map(|admin| AdminAccount {
            email: admin.email.clone(),
            display_name: admin.display_name.clone(),
            password_hash: admin.password_hash.clone(),
        })
        .collect();
    if accounts.is_empty() {
        warn!("no administrators configured; moderation endpoints will refuse every caller");
    }
    let identity = Arc::new(JwtIdentityProvider::new(
        settings.auth.jwt_secret.expose_secret().as_bytes(),
        accounts,
        chrono::Duration::hours(settings.auth.session_ttl_hours),
    ));

    let state = AppState::build(&repos, media, identity, engine_config(&settings));
    spawn_captcha_sweeper(
        state.captcha.clone(),
        Duration::from_secs(settings.anti_abuse.captcha_sweep_interval_secs),
    );

    let options = HttpOptions {
        cors_origins: settings.server.cors_origins.clone(),
        trusted_proxies: settings.server.trusted_proxy_addrs()?,
        request_timeout: settings.server.request_timeout(),
        max_upload_bytes: usize::try_from(settings.media.max_upload_bytes)
            .context("media.max_upload_bytes does not fit in memory")?,
        uploads: Some((
            settings.media.url_prefix.clone(),
            PathBuf::from(&settings.media.root),
        )),
    };
    let app = router(state, &options);

    let addr = settings.server.socket_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, boards = settings.boards.len(), "FireChan listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("server shutdown complete");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "firechan=info,services=info,tower_http=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(storage: &StorageConfig) -> anyhow::Result<Repositories> {
    match storage.backend.as_str() {
        "memory" => {
            warn!("using the in-memory store; all content is lost on exit");
            Ok(Repositories::from_store(Arc::new(MemoryDocumentStore::new())))
        }
        #[cfg(feature = "db-sqlite")]
        "sqlite" => {
            let store = storage_adapters::SqliteDocumentStore::connect(
                &storage.database_url,
                storage.max_connections,
            )
            .await
            .with_context(|| format!("failed to open {}", storage.database_url))?;
            store.health_check().await?;
            Ok(Repositories::from_store(Arc::new(store)))
        }
        other => anyhow::bail!("storage backend `{other}` is not compiled into this binary"),
    }
}

fn engine_config(settings: &Settings) -> EngineConfig {
    let anti_abuse = &settings.anti_abuse;
    let allocator = &settings.allocator;

    EngineConfig {
        boards: settings
            .boards
            .iter()
            .map(|board| Board {
                slug: board.slug.clone(),
                title: board.title.clone(),
                description: Some(board.description.clone()).filter(|d| !d.is_empty()),
            })
            .collect(),
        limits: PostingLimits {
            max_comment_chars: settings.posting.max_comment_chars,
            max_attachment_bytes: settings.media.max_upload_bytes,
            anonymous_name: settings.posting.anonymous_name.clone(),
            ip_salt: settings.posting.ip_salt.expose_secret().to_string(),
            ..PostingLimits::default()
        },
        gate: GatePolicy {
            captcha_failure_threshold: anti_abuse.failure_threshold,
            captcha_failure_window: chrono::Duration::minutes(anti_abuse.failure_window_mins),
            auto_ban_duration: chrono::Duration::minutes(anti_abuse.auto_ban_mins),
        },
        retry: RetryPolicy {
            max_attempts: allocator.max_attempts,
            base_delay: Duration::from_millis(allocator.base_delay_ms),
            max_delay: Duration::from_millis(allocator.max_delay_ms),
            ..RetryPolicy::default()
        },
        captcha_ttl: chrono::Duration::seconds(anti_abuse.captcha_ttl_secs),
        blocked_hosts: settings.render.blocked_hosts.clone(),
    }
}

fn spawn_captcha_sweeper(captcha: Arc<CaptchaService>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            if let Err(err) = captcha.sweep_expired().await {
                error!(error = %err, "captcha sweep failed");
            }
        }
    });
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, starting shutdown"),
        _ = terminate => info!("received SIGTERM, starting shutdown"),
    }
}
