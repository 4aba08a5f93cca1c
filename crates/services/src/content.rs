//! The content graph: threads, replies and everything hanging off them.
//!
//! Deletion cascades run as an ordered batch of independent deletes:
//! replies, then their attachments, then reports, then the thread's own
//! attachment and record. Attachment removal is best-effort; record
//! deletion is authoritative and its errors propagate.

use std::sync::Arc;

use domains::{
    AppError, Attachment, ContentRef, MediaStorage, Post, PostNumber, Reply, ReplyId,
    ReplyRepository, ReportRepository, Repositories, Result, Thread, ThreadId, ThreadRepository,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// What a cascade removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeSummary {
    pub threads_removed: u32,
    pub replies_removed: u32,
    pub reports_removed: u64,
    /// Release calls that succeeded (removed, already gone, or external).
    pub attachments_released: u32,
    /// Release calls that failed; logged and otherwise ignored.
    pub attachment_failures: u32,
}

/// A thread with its replies in post order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadView {
    pub thread: Thread,
    pub replies: Vec<Reply>,
}

pub struct ContentService {
    threads: Arc<dyn ThreadRepository>,
    replies: Arc<dyn ReplyRepository>,
    reports: Arc<dyn ReportRepository>,
    media: Arc<dyn MediaStorage>,
}

impl ContentService {
    pub fn new(repos: &Repositories, media: Arc<dyn MediaStorage>) -> Self {
        Self {
            threads: repos.threads.clone(),
            replies: repos.replies.clone(),
            reports: repos.reports.clone(),
            media,
        }
    }

    #[instrument(skip_all, fields(board = %thread.board, post_number = thread.number.get()))]
    pub async fn create_thread(&self, thread: Thread) -> Result<Thread> {
        self.threads.insert(thread.clone()).await?;
        info!("thread created");
        Ok(thread)
    }

    /// Persists a reply after re-checking that its thread is live and open.
    #[instrument(skip_all, fields(post_number = reply.number.get()))]
    pub async fn create_reply(&self, reply: Reply, caller_is_admin: bool) -> Result<Reply> {
        let thread = self
            .threads
            .get(reply.thread_id)
            .await?
            .ok_or_else(|| AppError::not_found("thread", reply.thread_id))?;

        if thread.locked && !caller_is_admin {
            return Err(AppError::ThreadLocked(thread.number));
        }

        self.replies.insert(reply.clone()).await?;

        // The cached counter is advisory; count_replies is the source of truth.
        if let Err(err) = self.threads.increment_reply_count(thread.id).await {
            warn!(error = %err, thread = %thread.id, "failed to bump reply count");
        }

        info!(thread_number = thread.number.get(), "reply created");
        Ok(reply)
    }

    pub async fn delete_post(&self, content: ContentRef) -> Result<CascadeSummary> {
        match content {
            ContentRef::Thread(id) => self.delete_thread(id).await,
            ContentRef::Reply(id) => self.delete_reply(id).await,
        }
    }

    #[instrument(skip(self))]
    pub async fn delete_thread(&self, id: ThreadId) -> Result<CascadeSummary> {
        let thread = self
            .threads
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("thread", id))?;

        let mut summary = CascadeSummary::default();

        for reply in self.replies.list_by_thread(id).await? {
            if self.replies.delete(reply.id).await? {
                summary.replies_removed += 1;
            }
            self.release_attachment(reply.attachment.as_ref(), &mut summary)
                .await;
        }

        summary.reports_removed = self.reports.delete_by_thread(id).await?;
        self.release_attachment(thread.attachment.as_ref(), &mut summary)
            .await;

        if self.threads.delete(id).await? {
            summary.threads_removed = 1;
        }

        info!(
            post_number = thread.number.get(),
            replies = summary.replies_removed,
            reports = summary.reports_removed,
            attachment_failures = summary.attachment_failures,
            "thread deleted"
        );
        Ok(summary)
    }

    #[instrument(skip(self))]
    pub async fn delete_reply(&self, id: ReplyId) -> Result<CascadeSummary> {
        let reply = self
            .replies
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("reply", id))?;

        let mut summary = CascadeSummary::default();
        if self.replies.delete(id).await? {
            summary.replies_removed = 1;
        }
        summary.reports_removed = self.reports.delete_by_content(ContentRef::Reply(id)).await?;
        self.release_attachment(reply.attachment.as_ref(), &mut summary)
            .await;

        if let Err(err) = self.sync_reply_count(reply.thread_id).await {
            warn!(error = %err, thread = %reply.thread_id, "failed to resync reply count");
        }

        info!(post_number = reply.number.get(), "reply deleted");
        Ok(summary)
    }

    pub async fn set_pinned(&self, id: ThreadId, pinned: bool) -> Result<()> {
        if !self.threads.set_pinned(id, pinned).await? {
            return Err(AppError::not_found("thread", id));
        }
        info!(thread = %id, pinned, "thread pin toggled");
        Ok(())
    }

    pub async fn set_locked(&self, id: ThreadId, locked: bool) -> Result<()> {
        if !self.threads.set_locked(id, locked).await? {
            return Err(AppError::not_found("thread", id));
        }
        info!(thread = %id, locked, "thread lock toggled");
        Ok(())
    }

    /// Recomputed from stored replies, never from the cached counter.
    pub async fn count_replies(&self, id: ThreadId) -> Result<u64> {
        self.replies.count_by_thread(id).await
    }

    async fn sync_reply_count(&self, id: ThreadId) -> Result<()> {
        let count = self.count_replies(id).await?;
        self.threads
            .set_reply_count(id, u32::try_from(count).unwrap_or(u32::MAX))
            .await
    }

    pub async fn thread_by_number(&self, number: PostNumber) -> Result<Thread> {
        self.threads
            .find_by_number(number)
            .await?
            .ok_or_else(|| AppError::not_found("thread", number))
    }

    /// Pinned threads first, then newest first.
    pub async fn list_threads(&self, board: &str) -> Result<Vec<Thread>> {
        let mut threads = self.threads.list_by_board(board).await?;
        threads.sort_by(|a, b| b.pinned.cmp(&a.pinned).then(b.number.cmp(&a.number)));
        Ok(threads)
    }

    pub async fn thread_view(&self, number: PostNumber) -> Result<ThreadView> {
        let thread = self.thread_by_number(number).await?;
        let mut replies = self.replies.list_by_thread(thread.id).await?;
        replies.sort_by_key(|r| r.number);
        Ok(ThreadView { thread, replies })
    }

    /// Looks a post number up in both collections.
    pub async fn find_post(&self, number: PostNumber) -> Result<Option<Post>> {
        if let Some(thread) = self.threads.find_by_number(number).await? {
            return Ok(Some(Post::Thread(thread)));
        }
        Ok(self.replies.find_by_number(number).await?.map(Post::Reply))
    }

    pub async fn resolve(&self, content: ContentRef) -> Result<Option<Post>> {
        match content {
            ContentRef::Thread(id) => Ok(self.threads.get(id).await?.map(Post::Thread)),
            ContentRef::Reply(id) => Ok(self.replies.get(id).await?.map(Post::Reply)),
        }
    }

    async fn release_attachment(&self, attachment: Option<&Attachment>, summary: &mut CascadeSummary) {
        let Some(attachment) = attachment else { return };

        match self.media.release(&attachment.url).await {
            Ok(outcome) => {
                summary.attachments_released += 1;
                debug!(url = %attachment.url, ?outcome, "attachment released");
            }
            Err(err) => {
                summary.attachment_failures += 1;
                warn!(
                    url = %attachment.url,
                    error = %err,
                    "CascadeFailure: attachment release failed, continuing"
                );
            }
        }
    }
}
