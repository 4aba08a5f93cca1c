//! Shared fixtures: the engine assembled over the in-memory document store,
//! with mocked identity and attachment collaborators.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use domains::{
    AdminIdentity, Attachment, CallerContext, CaptchaAnswer, CaptchaChallenge, CaptchaRepository,
    MediaStorage, MockIdentityProvider, MockMediaStorage, NewReply, NewThread, PostNumber,
    ReleaseOutcome, Reply, Repositories, Thread,
};
use services::{
    AntiAbuseGate, CaptchaService, ContentService, GatePolicy, IdentifierAllocator,
    ModerationService, PostingLimits, PostingService, RetryPolicy, StatsService,
};
use storage_adapters::MemoryDocumentStore;

pub const ADMIN_TOKEN: &str = "admin-session";
pub const ADMIN_IP: &str = "192.0.2.250";
pub const BOARD: &str = "tech";

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

pub fn admin() -> CallerContext {
    CallerContext::with_session(ADMIN_IP, ADMIN_TOKEN)
}

pub fn anon(ip: &str) -> CallerContext {
    CallerContext::anonymous(ip)
}

/// Resolves [`ADMIN_TOKEN`] to a moderator and every other token to nobody.
pub fn identity() -> MockIdentityProvider {
    let mut identity = MockIdentityProvider::new();
    identity.expect_resolve_admin().returning(|token| {
        Ok((token.as_str() == ADMIN_TOKEN).then(|| AdminIdentity {
            email: "mod@firechan.test".into(),
            display_name: "Moderator".into(),
        }))
    });
    identity
}

/// Accepts every release without counting.
pub fn permissive_media() -> MockMediaStorage {
    let mut media = MockMediaStorage::new();
    media
        .expect_release()
        .returning(|_| Ok(ReleaseOutcome::Removed));
    media
}

pub fn attachment(name: &str) -> Attachment {
    Attachment {
        url: format!("/uploads/{BOARD}/{name}"),
        file_name: name.to_string(),
        size: 2048,
        width: 64,
        height: 64,
    }
}

pub struct Engine {
    pub store: Arc<MemoryDocumentStore>,
    pub gate: Arc<AntiAbuseGate>,
    pub content: Arc<ContentService>,
    pub posting: PostingService,
    pub moderation: ModerationService,
    pub captcha: CaptchaService,
    pub stats: StatsService,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_media(permissive_media())
    }

    pub fn with_media(media: impl MediaStorage + 'static) -> Self {
        Self::assemble(Arc::new(media), GatePolicy::default())
    }

    pub fn with_policy(policy: GatePolicy) -> Self {
        Self::assemble(Arc::new(permissive_media()), policy)
    }

    fn assemble(media: Arc<dyn MediaStorage>, policy: GatePolicy) -> Self {
        let store = Arc::new(MemoryDocumentStore::new());
        let repos = Repositories::from_store(store.clone());

        let gate = Arc::new(AntiAbuseGate::new(
            repos.bans.clone(),
            repos.captchas.clone(),
            Arc::new(identity()),
            policy,
        ));
        let allocator = Arc::new(IdentifierAllocator::new(
            repos.counters.clone(),
            RetryPolicy::default(),
        ));
        let content = Arc::new(ContentService::new(&repos, media.clone()));
        let boards = vec![domains::Board {
            slug: BOARD.into(),
            title: "Technology".into(),
            description: None,
        }];
        let limits = PostingLimits {
            ip_salt: "integration".into(),
            ..PostingLimits::default()
        };

        Self {
            posting: PostingService::new(
                gate.clone(),
                allocator,
                content.clone(),
                media,
                boards,
                limits,
            ),
            moderation: ModerationService::new(
                gate.clone(),
                content.clone(),
                repos.reports.clone(),
                repos.bans.clone(),
            ),
            captcha: CaptchaService::new(repos.captchas.clone(), Duration::minutes(5)),
            stats: StatsService::new(gate.clone(), repos.threads.clone(), repos.replies.clone()),
            gate,
            content,
            store,
        }
    }

    /// Plants a live challenge whose answer is `answer`.
    pub async fn known_captcha(&self, answer: i64) -> CaptchaAnswer {
        let token = format!("fixture-{}", NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        let now = Utc::now();
        CaptchaRepository::insert(
            &*self.store,
            CaptchaChallenge {
                token: token.clone(),
                question: format!("{answer} + 0 ="),
                answer,
                issued_at: now,
                expires_at: now + Duration::minutes(5),
                consumed: false,
            },
        )
        .await
        .unwrap();
        CaptchaAnswer { token, answer }
    }

    pub async fn thread(&self, ip: &str, comment: &str, attachment: Option<Attachment>) -> Thread {
        let captcha = self.known_captcha(7).await;
        self.posting
            .create_thread(
                &anon(ip),
                Some(&captcha),
                NewThread {
                    board: BOARD.into(),
                    comment: comment.into(),
                    attachment,
                    ..NewThread::default()
                },
            )
            .await
            .unwrap()
            .post
    }

    pub async fn reply(
        &self,
        ip: &str,
        thread: PostNumber,
        comment: &str,
        attachment: Option<Attachment>,
    ) -> Reply {
        let captcha = self.known_captcha(7).await;
        self.posting
            .create_reply(
                &anon(ip),
                Some(&captcha),
                thread,
                NewReply {
                    comment: comment.into(),
                    attachment,
                    ..NewReply::default()
                },
            )
            .await
            .unwrap()
            .post
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
