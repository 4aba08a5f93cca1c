//! # Ports
//!
//! Contracts between the engine and its collaborators. Storage adapters
//! implement the repository traits against a document store; the attachment
//! storage and identity provider sit behind [`MediaStorage`] and
//! [`IdentityProvider`].

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};

use crate::errors::{MediaError, Result};
use crate::models::{
    AdminIdentity, Attachment, Ban, BanId, CaptchaChallenge, ContentRef, PostNumber, Reply,
    ReplyId, Report, ReportId, SessionToken, Thread, ThreadId,
};

/// Persistence of the `threads` collection.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ThreadRepository: Send + Sync {
    async fn insert(&self, thread: Thread) -> Result<()>;
    async fn get(&self, id: ThreadId) -> Result<Option<Thread>>;
    async fn find_by_number(&self, number: PostNumber) -> Result<Option<Thread>>;
    async fn list_by_board(&self, board: &str) -> Result<Vec<Thread>>;
    async fn list_all(&self) -> Result<Vec<Thread>>;
    /// Returns `false` when the thread does not exist.
    async fn set_pinned(&self, id: ThreadId, pinned: bool) -> Result<bool>;
    /// Returns `false` when the thread does not exist.
    async fn set_locked(&self, id: ThreadId, locked: bool) -> Result<bool>;
    async fn increment_reply_count(&self, id: ThreadId) -> Result<()>;
    /// Overwrites the cached counter, e.g. after a reply was removed.
    async fn set_reply_count(&self, id: ThreadId, count: u32) -> Result<()>;
    /// Returns `false` when there was nothing to delete.
    async fn delete(&self, id: ThreadId) -> Result<bool>;
}

/// Persistence of the `replies` collection.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReplyRepository: Send + Sync {
    async fn insert(&self, reply: Reply) -> Result<()>;
    async fn get(&self, id: ReplyId) -> Result<Option<Reply>>;
    async fn find_by_number(&self, number: PostNumber) -> Result<Option<Reply>>;
    /// Replies of one thread in post-number order.
    async fn list_by_thread(&self, thread_id: ThreadId) -> Result<Vec<Reply>>;
    async fn count_by_thread(&self, thread_id: ThreadId) -> Result<u64>;
    async fn delete(&self, id: ReplyId) -> Result<bool>;
}

/// Persistence of the `reports` collection.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn insert(&self, report: Report) -> Result<()>;
    async fn get(&self, id: ReportId) -> Result<Option<Report>>;
    /// Newest first.
    async fn list(&self) -> Result<Vec<Report>>;
    async fn delete(&self, id: ReportId) -> Result<bool>;
    /// Removes every report whose owning thread is `thread_id`.
    async fn delete_by_thread(&self, thread_id: ThreadId) -> Result<u64>;
    async fn delete_by_content(&self, content: ContentRef) -> Result<u64>;
    async fn delete_all(&self) -> Result<u64>;
}

/// Persistence of the `ip_bans` collection.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BanRepository: Send + Sync {
    async fn insert(&self, ban: Ban) -> Result<()>;
    async fn get(&self, id: BanId) -> Result<Option<Ban>>;
    /// Bans for `ip` with the active flag set, expired or not.
    async fn find_active_by_ip(&self, ip: &str) -> Result<Vec<Ban>>;
    async fn list_active(&self) -> Result<Vec<Ban>>;
    /// Clears the active flag. Returns `false` when the ban does not exist.
    async fn deactivate(&self, id: BanId) -> Result<bool>;
    async fn delete(&self, id: BanId) -> Result<bool>;
}

/// Result of the single conditional write that consumes a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Token was live and the answer matched; it is now consumed.
    Accepted,
    /// Token was live but the answer was wrong; it is consumed all the same.
    WrongAnswer,
    Expired,
    /// Unknown token, or one that was already consumed.
    Unknown,
}

/// Persistence of `captcha_challenges` and the per-IP failure records.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CaptchaRepository: Send + Sync {
    async fn insert(&self, challenge: CaptchaChallenge) -> Result<()>;
    /// Check-and-mark in one conditional write; two racing callers can never
    /// both observe `Accepted` for the same token. Any attempt on a live
    /// token retires it, right answer or not.
    async fn consume(&self, token: &str, answer: i64, now: DateTime<Utc>)
        -> Result<ConsumeOutcome>;
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64>;
    /// Records one failure and returns the count inside the rolling window.
    /// A previous failure older than `window` restarts the count at 1.
    async fn record_failure(&self, ip: &str, now: DateTime<Utc>, window: Duration)
        -> Result<u32>;
    async fn clear_failures(&self, ip: &str) -> Result<()>;
}

/// The single shared counter record behind post-number allocation.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn read(&self, name: &str) -> Result<Option<u64>>;
    /// Writes `new` only if the stored value still equals `expected`
    /// (`None` meaning the record is absent). Returns whether it wrote.
    async fn compare_and_swap(&self, name: &str, expected: Option<u64>, new: u64) -> Result<bool>;
}

/// What happened to an attachment on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Removed,
    /// Nothing on disk anymore; treated as success.
    AlreadyGone,
    /// Hosted elsewhere; nothing to do locally.
    External,
}

/// Attachment storage contract for handling uploads and removals.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Validates and saves raw image bytes under `board`.
    async fn store(
        &self,
        board: &str,
        data: Bytes,
        content_type: &mime::Mime,
    ) -> std::result::Result<Attachment, MediaError>;

    /// Removes the file behind a previously returned URL.
    async fn release(&self, url: &str) -> std::result::Result<ReleaseOutcome, MediaError>;
}

/// Identity and session contract for administrators.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Fails with `AppError::Denied(Denial::Unauthorized)` on bad credentials.
    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionToken>;
    async fn sign_out(&self, session: &SessionToken) -> Result<()>;
    /// The administrator behind a live session, if any.
    async fn resolve_admin(&self, session: &SessionToken) -> Result<Option<AdminIdentity>>;
}

/// Handles to every document collection, shared by the services.
#[derive(Clone)]
pub struct Repositories {
    pub threads: Arc<dyn ThreadRepository>,
    pub replies: Arc<dyn ReplyRepository>,
    pub reports: Arc<dyn ReportRepository>,
    pub bans: Arc<dyn BanRepository>,
    pub captchas: Arc<dyn CaptchaRepository>,
    pub counters: Arc<dyn CounterStore>,
}

impl Repositories {
    /// Builds the bundle from one store implementing every collection.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: ThreadRepository
            + ReplyRepository
            + ReportRepository
            + BanRepository
            + CaptchaRepository
            + CounterStore
            + 'static,
    {
        Self {
            threads: store.clone(),
            replies: store.clone(),
            reports: store.clone(),
            bans: store.clone(),
            captchas: store.clone(),
            counters: store,
        }
    }
}
