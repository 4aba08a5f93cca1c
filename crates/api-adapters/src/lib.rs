//! # api-adapters
//!
//! The HTTP surface of FireChan. Request/response shapes live in [`dto`]
//! and build without any web framework; the axum router sits behind the
//! `web-axum` feature.

pub mod dto;

#[cfg(feature = "web-axum")]
pub mod error;
#[cfg(feature = "web-axum")]
pub mod extract;
#[cfg(feature = "web-axum")]
pub mod handlers;
#[cfg(feature = "web-axum")]
pub mod middleware;
#[cfg(feature = "web-axum")]
pub mod state;

#[cfg(feature = "web-axum")]
pub use router::{router, HttpOptions};
#[cfg(feature = "web-axum")]
pub use extract::TrustedProxies;
#[cfg(feature = "web-axum")]
pub use state::{AppState, EngineConfig};

#[cfg(feature = "web-axum")]
mod router {
    use std::net::IpAddr;
    use std::path::PathBuf;
    use std::time::Duration;

    use axum::{
        extract::DefaultBodyLimit,
        routing::{delete, get, post},
        Router,
    };
    use tower_http::services::ServeDir;

    use crate::extract::TrustedProxies;
    use crate::handlers;
    use crate::middleware;
    use crate::state::AppState;

    /// Multipart framing on top of the image itself.
    const MULTIPART_OVERHEAD: usize = 64 * 1024;

    #[derive(Debug, Clone)]
    pub struct HttpOptions {
        pub cors_origins: Vec<String>,
        /// Peers whose `X-Forwarded-For` chain is believed.
        pub trusted_proxies: Vec<IpAddr>,
        pub request_timeout: Duration,
        pub max_upload_bytes: usize,
        /// URL prefix and directory of stored attachments, served as-is.
        pub uploads: Option<(String, PathBuf)>,
    }

    impl Default for HttpOptions {
        fn default() -> Self {
            Self {
                cors_origins: Vec::new(),
                trusted_proxies: Vec::new(),
                request_timeout: Duration::from_secs(30),
                max_upload_bytes: 5 * 1024 * 1024,
                uploads: None,
            }
        }
    }

    /// Configures every route of the engine.
    pub fn router(mut state: AppState, options: &HttpOptions) -> Router {
        state.proxies = TrustedProxies::new(options.trusted_proxies.iter().copied());

        let admin = Router::new()
            .route("/threads/{number}", delete(handlers::admin_delete_thread))
            .route("/threads/{number}/pin", post(handlers::admin_pin))
            .route("/threads/{number}/lock", post(handlers::admin_lock))
            .route("/replies/{number}", delete(handlers::admin_delete_reply))
            .route(
                "/reports",
                get(handlers::admin_list_reports).delete(handlers::admin_clear_reports),
            )
            .route("/reports/{id}/dismiss", post(handlers::admin_dismiss_report))
            .route("/reports/{id}/resolve", post(handlers::admin_resolve_report))
            .route(
                "/bans",
                get(handlers::admin_list_bans).post(handlers::admin_issue_ban),
            )
            .route("/bans/{id}", delete(handlers::admin_remove_ban))
            .route("/stats", get(handlers::admin_stats));

        let api = Router::new()
            .route("/captcha", get(handlers::issue_captcha))
            .route("/boards", get(handlers::list_boards))
            .route(
                "/boards/{board}/threads",
                get(handlers::list_threads).post(handlers::create_thread),
            )
            .route("/threads/{number}", get(handlers::view_thread))
            .route("/threads/{number}/replies", post(handlers::create_reply))
            .route("/posts/{number}", get(handlers::view_post))
            .route("/reports", post(handlers::submit_report))
            .route("/auth/sign-in", post(handlers::sign_in))
            .route("/auth/sign-out", post(handlers::sign_out))
            .nest("/admin", admin);

        let mut app = Router::new()
            .route("/health", get(handlers::health))
            .route(
                "/upload",
                post(handlers::upload).layer(DefaultBodyLimit::max(
                    options.max_upload_bytes + MULTIPART_OVERHEAD,
                )),
            )
            .route("/delete", post(handlers::delete_image))
            .nest("/api", api);

        if let Some((prefix, root)) = &options.uploads {
            app = app.nest_service(prefix, ServeDir::new(root));
        }

        app.layer(middleware::nosniff())
            .layer(middleware::referrer_policy())
            .layer(middleware::timeout_layer(options.request_timeout))
            .layer(middleware::cors_policy(&options.cors_origins))
            .layer(middleware::trace_layer())
            .with_state(state)
    }
}
