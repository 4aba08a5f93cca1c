//! crates/domains/src/lib.rs
//!
//! The central domain types and interface definitions for FireChan.
//! Nothing in this crate performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

// Re-exporting for easier access in other crates
pub use errors::*;
pub use models::*;
pub use ports::*;

#[cfg(test)]
mod tests {
    use super::models::*;
    use chrono::{Duration, Utc};

    fn submitter() -> Submitter {
        Submitter {
            user_id: "a1b2c3d4e5f60718".into(),
            ip: "203.0.113.9".into(),
        }
    }

    fn sample_thread() -> Thread {
        Thread {
            id: ThreadId::new(),
            board: "tech".into(),
            number: PostNumber(7),
            name: "Anonymous".into(),
            subject: Some("Rust".into()),
            comment: "Hello Rust!".into(),
            attachment: None,
            created_at: Utc::now(),
            reply_count: 0,
            pinned: false,
            locked: false,
            is_admin: false,
            submitter: submitter(),
        }
    }

    #[test]
    fn test_storage_ids_are_time_ordered() {
        let first = ThreadId::new();
        let second = ThreadId::new();
        assert!(first < second);
    }

    #[test]
    fn test_post_union_dispatches_on_kind() {
        let thread = sample_thread();
        let reply = Reply {
            id: ReplyId::new(),
            thread_id: thread.id,
            board: "tech".into(),
            number: PostNumber(8),
            parent: Some(PostNumber(7)),
            references: vec![PostNumber(7)],
            name: "Anonymous".into(),
            comment: ">>7 agreed".into(),
            attachment: None,
            created_at: Utc::now(),
            is_admin: false,
            submitter: submitter(),
        };

        let op = Post::Thread(thread.clone());
        let follow_up = Post::Reply(reply.clone());

        assert_eq!(op.thread_id(), thread.id);
        assert_eq!(follow_up.thread_id(), thread.id);
        assert_eq!(op.content_ref().kind(), ContentKind::Thread);
        assert_eq!(follow_up.content_ref(), ContentRef::Reply(reply.id));
        assert_eq!(follow_up.number(), PostNumber(8));
    }

    #[test]
    fn test_post_serializes_with_kind_tag() {
        let json = serde_json::to_value(Post::Thread(sample_thread())).unwrap();
        assert_eq!(json["kind"], "thread");
        assert_eq!(json["number"], 7);
    }

    #[test]
    fn test_ban_expiry() {
        let now = Utc::now();
        let mut ban = Ban {
            id: BanId::new(),
            ip: "198.51.100.4".into(),
            reason: "spam".into(),
            admin_name: "mod".into(),
            issued_at: now - Duration::hours(2),
            expires_at: Some(now - Duration::minutes(1)),
            active: true,
        };
        assert!(ban.is_expired_at(now));
        assert!(!ban.is_in_force(now));

        ban.expires_at = None;
        assert!(ban.is_in_force(now));

        ban.active = false;
        assert!(!ban.is_in_force(now));
    }
}
