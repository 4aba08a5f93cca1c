//! # Domain Models
//!
//! These structs represent the core entities of FireChan.
//! Storage ids are UUID v7 (time-ordered); the user-visible identifier of a
//! post is its [`PostNumber`], drawn from one global sequence shared by
//! threads and replies.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! storage_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
            #[serde(transparent)]
            pub struct $name(pub Uuid);

            impl $name {
                pub fn new() -> Self {
                    Self(Uuid::now_v7())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        )+
    };
}

storage_id!(
    /// Storage id of a [`Thread`] document.
    ThreadId,
    /// Storage id of a [`Reply`] document.
    ReplyId,
    /// Storage id of a [`Report`] document.
    ReportId,
    /// Storage id of a [`Ban`] document.
    BanId,
);

/// The global sequential identifier shared by threads and replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostNumber(pub u64);

impl PostNumber {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PostNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A topic partition (e.g. /tech/, /random/).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// The URL slug (e.g., "tech" for /tech/)
    pub slug: String,
    pub title: String,
    pub description: Option<String>,
}

/// Metadata of an uploaded image as returned by the attachment storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub url: String,
    pub file_name: String,
    /// Size in bytes
    pub size: u64,
    pub width: u32,
    pub height: u32,
}

/// Who submitted a post: an opaque user id plus the raw IP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submitter {
    pub user_id: String,
    pub ip: String,
}

/// The root post of a discussion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub board: String,
    pub number: PostNumber,
    pub name: String,
    pub subject: Option<String>,
    /// Raw comment as typed by the poster; rendering happens on read.
    pub comment: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    /// Cached counter, see `ContentService::count_replies` for the
    /// authoritative value.
    pub reply_count: u32,
    pub pinned: bool,
    pub locked: bool,
    pub is_admin: bool,
    pub submitter: Submitter,
}

/// A follow-up post attached to exactly one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: ReplyId,
    pub thread_id: ThreadId,
    pub board: String,
    pub number: PostNumber,
    /// First post referenced in the comment, if any.
    pub parent: Option<PostNumber>,
    pub references: Vec<PostNumber>,
    pub name: String,
    pub comment: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub is_admin: bool,
    pub submitter: Submitter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Thread,
    Reply,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Thread => "thread",
            ContentKind::Reply => "reply",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tagged storage reference to either kind of post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum ContentRef {
    Thread(ThreadId),
    Reply(ReplyId),
}

impl ContentRef {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentRef::Thread(_) => ContentKind::Thread,
            ContentRef::Reply(_) => ContentKind::Reply,
        }
    }

    pub fn uuid(&self) -> Uuid {
        match self {
            ContentRef::Thread(id) => id.0,
            ContentRef::Reply(id) => id.0,
        }
    }
}

/// Either a thread or a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Post {
    Thread(Thread),
    Reply(Reply),
}

impl Post {
    pub fn number(&self) -> PostNumber {
        match self {
            Post::Thread(t) => t.number,
            Post::Reply(r) => r.number,
        }
    }

    pub fn board(&self) -> &str {
        match self {
            Post::Thread(t) => &t.board,
            Post::Reply(r) => &r.board,
        }
    }

    pub fn comment(&self) -> &str {
        match self {
            Post::Thread(t) => &t.comment,
            Post::Reply(r) => &r.comment,
        }
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        match self {
            Post::Thread(t) => t.attachment.as_ref(),
            Post::Reply(r) => r.attachment.as_ref(),
        }
    }

    pub fn submitter(&self) -> &Submitter {
        match self {
            Post::Thread(t) => &t.submitter,
            Post::Reply(r) => &r.submitter,
        }
    }

    pub fn content_ref(&self) -> ContentRef {
        match self {
            Post::Thread(t) => ContentRef::Thread(t.id),
            Post::Reply(r) => ContentRef::Reply(r.id),
        }
    }

    /// The thread this post lives in (itself, for a thread).
    pub fn thread_id(&self) -> ThreadId {
        match self {
            Post::Thread(t) => t.id,
            Post::Reply(r) => r.thread_id,
        }
    }
}

/// A user complaint about a post, awaiting triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub content: ContentRef,
    /// Owning thread, resolved when the report is written.
    pub thread_id: ThreadId,
    pub post_number: PostNumber,
    pub board: String,
    pub reporter_ip: String,
    pub author_ip: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Represents a moderation action against an IP address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ban {
    pub id: BanId,
    pub ip: String,
    pub reason: String,
    pub admin_name: String,
    pub issued_at: DateTime<Utc>,
    /// `None` means permanent.
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl Ban {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }

    /// Active and not yet expired.
    pub fn is_in_force(&self, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired_at(now)
    }
}

/// A one-time arithmetic challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaChallenge {
    pub token: String,
    pub question: String,
    pub answer: i64,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

/// Opaque session token handed out by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(pub String);

impl SessionToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An authenticated administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminIdentity {
    pub email: String,
    pub display_name: String,
}

/// Everything the engine knows about who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub ip: String,
    pub session: Option<SessionToken>,
}

impl CallerContext {
    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            session: None,
        }
    }

    pub fn with_session(ip: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            session: Some(SessionToken(token.into())),
        }
    }
}

/// A captcha token plus the answer typed by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaAnswer {
    pub token: String,
    pub answer: i64,
}

/// Submission of a new thread, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewThread {
    pub board: String,
    pub name: Option<String>,
    pub subject: Option<String>,
    pub comment: String,
    pub attachment: Option<Attachment>,
}

/// Submission of a new reply, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewReply {
    pub name: Option<String>,
    pub comment: String,
    pub attachment: Option<Attachment>,
}
