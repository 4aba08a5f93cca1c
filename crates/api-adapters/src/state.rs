//! Shared application state and the wiring of the engine services.

use std::sync::Arc;

use axum::extract::FromRef;
use chrono::Duration;
use domains::{Board, IdentityProvider, MediaStorage, Repositories};
use services::{
    AntiAbuseGate, CaptchaService, ContentService, GatePolicy, IdentifierAllocator,
    ModerationService, PostingLimits, PostingService, RetryPolicy, StatsService, TextRenderer,
};

use crate::extract::TrustedProxies;

/// Tunables the engine is assembled with.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub boards: Vec<Board>,
    pub limits: PostingLimits,
    pub gate: GatePolicy,
    pub retry: RetryPolicy,
    pub captcha_ttl: Duration,
    pub blocked_hosts: Vec<String>,
}

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub posting: Arc<PostingService>,
    pub moderation: Arc<ModerationService>,
    pub captcha: Arc<CaptchaService>,
    pub content: Arc<ContentService>,
    pub stats: Arc<StatsService>,
    pub identity: Arc<dyn IdentityProvider>,
    pub renderer: Arc<TextRenderer>,
    /// Set by the router from its options.
    pub proxies: TrustedProxies,
}

impl FromRef<AppState> for TrustedProxies {
    fn from_ref(state: &AppState) -> Self {
        state.proxies.clone()
    }
}

impl AppState {
    pub fn build(
        repos: &Repositories,
        media: Arc<dyn MediaStorage>,
        identity: Arc<dyn IdentityProvider>,
        config: EngineConfig,
    ) -> Self {
        let gate = Arc::new(AntiAbuseGate::new(
            repos.bans.clone(),
            repos.captchas.clone(),
            identity.clone(),
            config.gate,
        ));
        let allocator = Arc::new(IdentifierAllocator::new(
            repos.counters.clone(),
            config.retry,
        ));
        let content = Arc::new(ContentService::new(repos, media.clone()));

        let posting = PostingService::new(
            gate.clone(),
            allocator,
            content.clone(),
            media,
            config.boards,
            config.limits,
        );
        let moderation = ModerationService::new(
            gate.clone(),
            content.clone(),
            repos.reports.clone(),
            repos.bans.clone(),
        );
        let stats = StatsService::new(gate, repos.threads.clone(), repos.replies.clone());

        Self {
            posting: Arc::new(posting),
            moderation: Arc::new(moderation),
            captcha: Arc::new(CaptchaService::new(
                repos.captchas.clone(),
                config.captcha_ttl,
            )),
            content,
            stats: Arc::new(stats),
            identity,
            renderer: Arc::new(TextRenderer::new(config.blocked_hosts)),
            proxies: TrustedProxies::default(),
        }
    }
}
