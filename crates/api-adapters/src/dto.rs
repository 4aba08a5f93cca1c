//! Request bodies and the public views returned by the HTTP surface.
//!
//! Public views never carry the submitter's IP; only the opaque poster id
//! leaves the server. Administrators get the raw domain records instead.

use chrono::{DateTime, Utc};
use domains::{Attachment, CaptchaAnswer, NewReply, NewThread, Post, PostNumber, Reply, Thread};
use serde::{Deserialize, Serialize};
use services::{ResolveAction, TextRenderer, ThreadView};

/// Success envelope shared by every JSON endpoint.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub success: bool,
    pub message: String,
}

impl Message {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadRequest {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub comment: String,
    pub attachment: Option<Attachment>,
    pub captcha: Option<CaptchaAnswer>,
}

impl CreateThreadRequest {
    pub fn into_parts(self, board: String) -> (NewThread, Option<CaptchaAnswer>) {
        let submission = NewThread {
            board,
            name: self.name,
            subject: self.subject,
            comment: self.comment,
            attachment: self.attachment,
        };
        (submission, self.captcha)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReplyRequest {
    pub name: Option<String>,
    pub comment: String,
    pub attachment: Option<Attachment>,
    pub captcha: Option<CaptchaAnswer>,
}

impl CreateReplyRequest {
    pub fn into_parts(self) -> (NewReply, Option<CaptchaAnswer>) {
        let submission = NewReply {
            name: self.name,
            comment: self.comment,
            attachment: self.attachment,
        };
        (submission, self.captcha)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub post_number: u64,
    /// Either a canned code (`1`..`5`) or free text.
    pub reason: String,
    pub captcha: Option<CaptchaAnswer>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportReceipt {
    pub id: String,
    pub post_number: PostNumber,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct SignInResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub value: bool,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub action: ResolveAction,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanRequest {
    pub ip: String,
    #[serde(default)]
    pub reason: String,
    /// Omitted for a permanent ban.
    pub duration_minutes: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteImageRequest {
    pub image_url: Option<String>,
}

/// A thread or reply as anonymous readers see it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostView {
    pub kind: &'static str,
    pub number: PostNumber,
    pub board: String,
    /// Owning thread's number; absent for thread posts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_number: Option<PostNumber>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub poster_id: String,
    pub comment: String,
    /// Rendered, escaped markup.
    pub html: String,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    pub is_admin: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<PostNumber>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<PostNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_count: Option<u32>,
    pub pinned: bool,
    pub locked: bool,
}

impl PostView {
    pub fn thread(thread: &Thread, renderer: &TextRenderer) -> Self {
        Self {
            kind: "thread",
            number: thread.number,
            board: thread.board.clone(),
            thread_number: None,
            name: thread.name.clone(),
            subject: thread.subject.clone(),
            poster_id: thread.submitter.user_id.clone(),
            comment: thread.comment.clone(),
            html: renderer.render(&thread.comment),
            attachment: thread.attachment.clone(),
            created_at: thread.created_at,
            is_admin: thread.is_admin,
            parent: None,
            references: Vec::new(),
            reply_count: Some(thread.reply_count),
            pinned: thread.pinned,
            locked: thread.locked,
        }
    }

    /// `thread_number` is only known when the caller has the thread at hand.
    pub fn reply(reply: &Reply, thread_number: Option<PostNumber>, renderer: &TextRenderer) -> Self {
        Self {
            kind: "reply",
            number: reply.number,
            board: reply.board.clone(),
            thread_number,
            name: reply.name.clone(),
            subject: None,
            poster_id: reply.submitter.user_id.clone(),
            comment: reply.comment.clone(),
            html: renderer.render(&reply.comment),
            attachment: reply.attachment.clone(),
            created_at: reply.created_at,
            is_admin: reply.is_admin,
            parent: reply.parent,
            references: reply.references.clone(),
            reply_count: None,
            pinned: false,
            locked: false,
        }
    }

    pub fn post(post: &Post, renderer: &TextRenderer) -> Self {
        match post {
            Post::Thread(thread) => Self::thread(thread, renderer),
            Post::Reply(reply) => Self::reply(reply, None, renderer),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ThreadPage {
    pub thread: PostView,
    pub replies: Vec<PostView>,
}

impl ThreadPage {
    pub fn new(view: &ThreadView, renderer: &TextRenderer) -> Self {
        let thread_number = Some(view.thread.number);
        Self {
            thread: PostView::thread(&view.thread, renderer),
            replies: view
                .replies
                .iter()
                .map(|reply| PostView::reply(reply, thread_number, renderer))
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Posted {
    pub post: PostView,
    /// The post number came from the clock fallback.
    pub degraded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::{ReplyId, Submitter, ThreadId};

    fn thread() -> Thread {
        Thread {
            id: ThreadId::new(),
            board: "tech".into(),
            number: PostNumber(10),
            name: "Anonymous".into(),
            subject: None,
            comment: "<b>hi</b>".into(),
            attachment: None,
            created_at: Utc::now(),
            reply_count: 1,
            pinned: true,
            locked: false,
            is_admin: false,
            submitter: Submitter {
                user_id: "0011223344556677".into(),
                ip: "203.0.113.50".into(),
            },
        }
    }

    #[test]
    fn public_view_hides_the_submitter_ip() {
        let renderer = TextRenderer::default();
        let json = serde_json::to_string(&PostView::thread(&thread(), &renderer)).unwrap();

        assert!(!json.contains("203.0.113.50"));
        assert!(json.contains("\"posterId\":\"0011223344556677\""));
        assert!(json.contains("&lt;b&gt;hi"));
        assert!(!json.contains("\"html\":\"<b>"));
    }

    #[test]
    fn thread_page_numbers_replies_against_their_thread() {
        let thread = thread();
        let reply = Reply {
            id: ReplyId::new(),
            thread_id: thread.id,
            board: "tech".into(),
            number: PostNumber(11),
            parent: Some(PostNumber(10)),
            references: vec![PostNumber(10)],
            name: "Anonymous".into(),
            comment: ">>10 yes".into(),
            attachment: None,
            created_at: Utc::now(),
            is_admin: false,
            submitter: thread.submitter.clone(),
        };
        let page = ThreadPage::new(
            &ThreadView {
                thread,
                replies: vec![reply],
            },
            &TextRenderer::default(),
        );

        assert_eq!(page.replies[0].thread_number, Some(PostNumber(10)));
        assert_eq!(page.replies[0].parent, Some(PostNumber(10)));
        assert_eq!(page.thread.reply_count, Some(1));
    }

    #[test]
    fn ban_request_accepts_a_missing_duration() {
        let req: BanRequest = serde_json::from_str(r#"{"ip":"198.51.100.7"}"#).unwrap();
        assert_eq!(req.duration_minutes, None);
        assert!(req.reason.is_empty());
    }
}
