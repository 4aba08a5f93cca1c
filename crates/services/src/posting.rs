//! Creating threads and replies, and the attachment uploads they carry.
//!
//! Order per submission: gate, validation, post-number allocation,
//! persistence. Validation failures after the gate still burn the captcha.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use domains::{
    AppError, Attachment, Board, CallerContext, CaptchaAnswer, MediaStorage, NewReply, NewThread,
    PostNumber, ReleaseOutcome, Reply, ReplyId, Result, Submitter, Thread, ThreadId,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::allocator::IdentifierAllocator;
use crate::content::ContentService;
use crate::gate::{Action, AntiAbuseGate, Clearance};
use crate::render::extract_references;
use crate::utils::{ip_hash, non_blank, sanitize_board};

#[derive(Debug, Clone)]
pub struct PostingLimits {
    pub max_comment_chars: usize,
    pub max_subject_chars: usize,
    pub max_name_chars: usize,
    pub max_attachment_bytes: u64,
    pub anonymous_name: String,
    pub admin_name: String,
    /// Salt for the opaque poster id.
    pub ip_salt: String,
}

impl Default for PostingLimits {
    fn default() -> Self {
        Self {
            max_comment_chars: 2000,
            max_subject_chars: 100,
            max_name_chars: 50,
            max_attachment_bytes: 5 * 1024 * 1024,
            anonymous_name: "Anonymous".into(),
            admin_name: "Administrator".into(),
            ip_salt: String::new(),
        }
    }
}

/// A persisted post plus how its number was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostReceipt<T> {
    pub post: T,
    /// The number came from the clock fallback rather than the counter.
    pub degraded: bool,
}

pub struct PostingService {
    gate: Arc<AntiAbuseGate>,
    allocator: Arc<IdentifierAllocator>,
    content: Arc<ContentService>,
    media: Arc<dyn MediaStorage>,
    boards: Vec<Board>,
    limits: PostingLimits,
}

impl PostingService {
    pub fn new(
        gate: Arc<AntiAbuseGate>,
        allocator: Arc<IdentifierAllocator>,
        content: Arc<ContentService>,
        media: Arc<dyn MediaStorage>,
        boards: Vec<Board>,
        limits: PostingLimits,
    ) -> Self {
        Self {
            gate,
            allocator,
            content,
            media,
            boards,
            limits,
        }
    }

    pub fn boards(&self) -> &[Board] {
        &self.boards
    }

    pub fn board(&self, slug: &str) -> Result<&Board> {
        let slug = sanitize_board(slug);
        self.boards
            .iter()
            .find(|b| b.slug == slug)
            .ok_or_else(|| AppError::not_found("board", slug))
    }

    #[instrument(skip_all, fields(ip = %caller.ip, board = %submission.board))]
    pub async fn create_thread(
        &self,
        caller: &CallerContext,
        captcha: Option<&CaptchaAnswer>,
        submission: NewThread,
    ) -> Result<PostReceipt<Thread>> {
        let clearance = self
            .gate
            .check(Action::CreateThread, caller, captcha)
            .await?;

        let board = self.board(&submission.board)?.slug.clone();
        let comment = self.validate_comment(&submission.comment)?;
        let subject = non_blank(submission.subject.as_deref());
        if let Some(subject) = &subject {
            self.check_length("subject", subject, self.limits.max_subject_chars)?;
        }
        let name = self.display_name(submission.name.as_deref(), &clearance)?;
        self.validate_attachment(submission.attachment.as_ref())?;

        let allocation = self.allocator.allocate().await;
        let thread = Thread {
            id: ThreadId::new(),
            board,
            number: allocation.number(),
            name,
            subject,
            comment,
            attachment: submission.attachment,
            created_at: Utc::now(),
            reply_count: 0,
            pinned: false,
            locked: false,
            is_admin: clearance.is_admin(),
            submitter: self.submitter(caller),
        };

        let thread = self.content.create_thread(thread).await?;
        Ok(PostReceipt {
            post: thread,
            degraded: allocation.is_degraded(),
        })
    }

    #[instrument(skip_all, fields(ip = %caller.ip, thread_number = thread_number.get()))]
    pub async fn create_reply(
        &self,
        caller: &CallerContext,
        captcha: Option<&CaptchaAnswer>,
        thread_number: PostNumber,
        submission: NewReply,
    ) -> Result<PostReceipt<Reply>> {
        let clearance = self
            .gate
            .check(Action::CreateReply, caller, captcha)
            .await?;

        let comment = self.validate_comment(&submission.comment)?;
        let name = self.display_name(submission.name.as_deref(), &clearance)?;
        self.validate_attachment(submission.attachment.as_ref())?;

        let thread = self.content.thread_by_number(thread_number).await?;
        // Checked again on insert; failing here keeps a number from being spent.
        if thread.locked && !clearance.is_admin() {
            return Err(AppError::ThreadLocked(thread.number));
        }

        let references = extract_references(&comment);
        let allocation = self.allocator.allocate().await;
        let reply = Reply {
            id: ReplyId::new(),
            thread_id: thread.id,
            board: thread.board.clone(),
            number: allocation.number(),
            parent: references.first().copied(),
            references,
            name,
            comment,
            attachment: submission.attachment,
            created_at: Utc::now(),
            is_admin: clearance.is_admin(),
            submitter: self.submitter(caller),
        };

        let reply = self
            .content
            .create_reply(reply, clearance.is_admin())
            .await?;
        Ok(PostReceipt {
            post: reply,
            degraded: allocation.is_degraded(),
        })
    }

    /// Stores an image for later attachment to a post.
    #[instrument(skip(self, caller, data), fields(ip = %caller.ip, bytes = data.len()))]
    pub async fn upload_attachment(
        &self,
        caller: &CallerContext,
        board: &str,
        data: Bytes,
        content_type: &mime::Mime,
    ) -> Result<Attachment> {
        self.gate
            .check(Action::UploadAttachment, caller, None)
            .await?;
        let board = self.board(board)?.slug.clone();

        let attachment = self.media.store(&board, data, content_type).await?;
        info!(url = %attachment.url, size = attachment.size, "attachment stored");
        Ok(attachment)
    }

    /// Removes an attachment by URL outside of any cascade.
    #[instrument(skip(self, caller), fields(ip = %caller.ip))]
    pub async fn release_attachment(
        &self,
        caller: &CallerContext,
        url: &str,
    ) -> Result<ReleaseOutcome> {
        self.gate
            .check(Action::ReleaseAttachment, caller, None)
            .await?;

        let outcome = self.media.release(url).await.map_err(|err| {
            warn!(error = %err, "attachment release refused");
            AppError::from(err)
        })?;
        info!(?outcome, "attachment released");
        Ok(outcome)
    }

    fn validate_comment(&self, raw: &str) -> Result<String> {
        let comment = raw.trim();
        if comment.is_empty() {
            return Err(AppError::ValidationError("comment is required".into()));
        }
        self.check_length("comment", comment, self.limits.max_comment_chars)?;
        Ok(comment.to_string())
    }

    fn check_length(&self, field: &str, value: &str, max: usize) -> Result<()> {
        if value.chars().count() > max {
            return Err(AppError::ValidationError(format!(
                "{field} exceeds {max} characters"
            )));
        }
        Ok(())
    }

    fn validate_attachment(&self, attachment: Option<&Attachment>) -> Result<()> {
        match attachment {
            Some(a) if a.size > self.limits.max_attachment_bytes => {
                Err(AppError::ValidationError(format!(
                    "attachment exceeds {} bytes",
                    self.limits.max_attachment_bytes
                )))
            }
            Some(a) if a.url.trim().is_empty() => {
                Err(AppError::ValidationError("attachment url is empty".into()))
            }
            _ => Ok(()),
        }
    }

    /// The admin name is reserved; anyone else asking for it posts anonymously.
    fn display_name(&self, requested: Option<&str>, clearance: &Clearance) -> Result<String> {
        let reserved = |name: &str| name.eq_ignore_ascii_case(self.limits.admin_name.trim());
        match non_blank(requested) {
            Some(name) if !clearance.is_admin() && reserved(&name) => {
                Ok(self.limits.anonymous_name.clone())
            }
            Some(name) => {
                self.check_length("name", &name, self.limits.max_name_chars)?;
                Ok(name)
            }
            None if clearance.is_admin() => Ok(self.limits.admin_name.clone()),
            None => Ok(self.limits.anonymous_name.clone()),
        }
    }

    fn submitter(&self, caller: &CallerContext) -> Submitter {
        Submitter {
            user_id: ip_hash(&self.limits.ip_salt, &caller.ip),
            ip: caller.ip.clone(),
        }
    }
}
