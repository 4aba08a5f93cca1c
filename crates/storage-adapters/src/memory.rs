//! # In-memory document store
//!
//! Every collection lives in its own `DashMap`. Conditional writes (counter
//! compare-and-swap, captcha consumption, failure counting) run under the
//! entry's shard lock, which gives them the same atomicity a document
//! store's conditional update would.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domains::{
    Ban, BanId, BanRepository, CaptchaChallenge, CaptchaRepository, ConsumeOutcome, ContentRef,
    CounterStore, PostNumber, Reply, ReplyId, ReplyRepository, Report, ReportId, ReportRepository,
    Result, Thread, ThreadId, ThreadRepository,
};
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_failure: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    threads: DashMap<ThreadId, Thread>,
    replies: DashMap<ReplyId, Reply>,
    reports: DashMap<ReportId, Report>,
    bans: DashMap<BanId, Ban>,
    captchas: DashMap<String, CaptchaChallenge>,
    captcha_failures: DashMap<String, FailureRecord>,
    counters: DashMap<String, u64>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ThreadRepository for MemoryDocumentStore {
    async fn insert(&self, thread: Thread) -> Result<()> {
        self.threads.insert(thread.id, thread);
        Ok(())
    }

    async fn get(&self, id: ThreadId) -> Result<Option<Thread>> {
        Ok(self.threads.get(&id).map(|t| t.clone()))
    }

    async fn find_by_number(&self, number: PostNumber) -> Result<Option<Thread>> {
        Ok(self
            .threads
            .iter()
            .find(|t| t.number == number)
            .map(|t| t.clone()))
    }

    async fn list_by_board(&self, board: &str) -> Result<Vec<Thread>> {
        Ok(self
            .threads
            .iter()
            .filter(|t| t.board == board)
            .map(|t| t.clone())
            .collect())
    }

    async fn list_all(&self) -> Result<Vec<Thread>> {
        let mut threads: Vec<Thread> = self.threads.iter().map(|t| t.clone()).collect();
        threads.sort_by_key(|t| t.number);
        Ok(threads)
    }

    async fn set_pinned(&self, id: ThreadId, pinned: bool) -> Result<bool> {
        Ok(self
            .threads
            .get_mut(&id)
            .map(|mut t| t.pinned = pinned)
            .is_some())
    }

    async fn set_locked(&self, id: ThreadId, locked: bool) -> Result<bool> {
        Ok(self
            .threads
            .get_mut(&id)
            .map(|mut t| t.locked = locked)
            .is_some())
    }

    async fn increment_reply_count(&self, id: ThreadId) -> Result<()> {
        if let Some(mut thread) = self.threads.get_mut(&id) {
            thread.reply_count = thread.reply_count.saturating_add(1);
        }
        Ok(())
    }

    async fn set_reply_count(&self, id: ThreadId, count: u32) -> Result<()> {
        if let Some(mut thread) = self.threads.get_mut(&id) {
            thread.reply_count = count;
        }
        Ok(())
    }

    async fn delete(&self, id: ThreadId) -> Result<bool> {
        Ok(self.threads.remove(&id).is_some())
    }
}

#[async_trait]
impl ReplyRepository for MemoryDocumentStore {
    async fn insert(&self, reply: Reply) -> Result<()> {
        self.replies.insert(reply.id, reply);
        Ok(())
    }

    async fn get(&self, id: ReplyId) -> Result<Option<Reply>> {
        Ok(self.replies.get(&id).map(|r| r.clone()))
    }

    async fn find_by_number(&self, number: PostNumber) -> Result<Option<Reply>> {
        Ok(self
            .replies
            .iter()
            .find(|r| r.number == number)
            .map(|r| r.clone()))
    }

    async fn list_by_thread(&self, thread_id: ThreadId) -> Result<Vec<Reply>> {
        let mut replies: Vec<Reply> = self
            .replies
            .iter()
            .filter(|r| r.thread_id == thread_id)
            .map(|r| r.clone())
            .collect();
        replies.sort_by_key(|r| r.number);
        Ok(replies)
    }

    async fn count_by_thread(&self, thread_id: ThreadId) -> Result<u64> {
        Ok(self
            .replies
            .iter()
            .filter(|r| r.thread_id == thread_id)
            .count() as u64)
    }

    async fn delete(&self, id: ReplyId) -> Result<bool> {
        Ok(self.replies.remove(&id).is_some())
    }
}

#[async_trait]
impl ReportRepository for MemoryDocumentStore {
    async fn insert(&self, report: Report) -> Result<()> {
        self.reports.insert(report.id, report);
        Ok(())
    }

    async fn get(&self, id: ReportId) -> Result<Option<Report>> {
        Ok(self.reports.get(&id).map(|r| r.clone()))
    }

    async fn list(&self) -> Result<Vec<Report>> {
        let mut reports: Vec<Report> = self.reports.iter().map(|r| r.clone()).collect();
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }

    async fn delete(&self, id: ReportId) -> Result<bool> {
        Ok(self.reports.remove(&id).is_some())
    }

    async fn delete_by_thread(&self, thread_id: ThreadId) -> Result<u64> {
        let mut removed = 0;
        self.reports.retain(|_, r| {
            let keep = r.thread_id != thread_id;
            removed += u64::from(!keep);
            keep
        });
        Ok(removed)
    }

    async fn delete_by_content(&self, content: ContentRef) -> Result<u64> {
        let mut removed = 0;
        self.reports.retain(|_, r| {
            let keep = r.content != content;
            removed += u64::from(!keep);
            keep
        });
        Ok(removed)
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut removed = 0;
        self.reports.retain(|_, _| {
            removed += 1;
            false
        });
        Ok(removed)
    }
}

#[async_trait]
impl BanRepository for MemoryDocumentStore {
    async fn insert(&self, ban: Ban) -> Result<()> {
        self.bans.insert(ban.id, ban);
        Ok(())
    }

    async fn get(&self, id: BanId) -> Result<Option<Ban>> {
        Ok(self.bans.get(&id).map(|b| b.clone()))
    }

    async fn find_active_by_ip(&self, ip: &str) -> Result<Vec<Ban>> {
        Ok(self
            .bans
            .iter()
            .filter(|b| b.active && b.ip == ip)
            .map(|b| b.clone())
            .collect())
    }

    async fn list_active(&self) -> Result<Vec<Ban>> {
        Ok(self
            .bans
            .iter()
            .filter(|b| b.active)
            .map(|b| b.clone())
            .collect())
    }

    async fn deactivate(&self, id: BanId) -> Result<bool> {
        Ok(self
            .bans
            .get_mut(&id)
            .map(|mut b| b.active = false)
            .is_some())
    }

    async fn delete(&self, id: BanId) -> Result<bool> {
        Ok(self.bans.remove(&id).is_some())
    }
}

#[async_trait]
impl CaptchaRepository for MemoryDocumentStore {
    async fn insert(&self, challenge: CaptchaChallenge) -> Result<()> {
        self.captchas.insert(challenge.token.clone(), challenge);
        Ok(())
    }

    async fn consume(&self, token: &str, answer: i64, now: DateTime<Utc>) -> Result<ConsumeOutcome> {
        let Some(mut challenge) = self.captchas.get_mut(token) else {
            return Ok(ConsumeOutcome::Unknown);
        };
        if challenge.consumed {
            return Ok(ConsumeOutcome::Unknown);
        }
        if challenge.expires_at <= now {
            return Ok(ConsumeOutcome::Expired);
        }
        challenge.consumed = true;
        Ok(if challenge.answer == answer {
            ConsumeOutcome::Accepted
        } else {
            ConsumeOutcome::WrongAnswer
        })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut removed = 0;
        self.captchas.retain(|_, c| {
            let keep = c.expires_at > now;
            removed += u64::from(!keep);
            keep
        });
        debug!(removed, "expired captchas removed");
        Ok(removed)
    }

    async fn record_failure(&self, ip: &str, now: DateTime<Utc>, window: Duration) -> Result<u32> {
        let count = match self.captcha_failures.entry(ip.to_string()) {
            Entry::Occupied(mut entry) => {
                let record = entry.get_mut();
                record.count = if now - record.last_failure > window {
                    1
                } else {
                    record.count + 1
                };
                record.last_failure = now;
                record.count
            }
            Entry::Vacant(entry) => {
                entry.insert(FailureRecord {
                    count: 1,
                    last_failure: now,
                });
                1
            }
        };
        Ok(count)
    }

    async fn clear_failures(&self, ip: &str) -> Result<()> {
        self.captcha_failures.remove(ip);
        Ok(())
    }
}

#[async_trait]
impl CounterStore for MemoryDocumentStore {
    async fn read(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.counters.get(name).map(|v| *v))
    }

    async fn compare_and_swap(&self, name: &str, expected: Option<u64>, new: u64) -> Result<bool> {
        match (self.counters.entry(name.to_string()), expected) {
            (Entry::Vacant(entry), None) => {
                entry.insert(new);
                Ok(true)
            }
            (Entry::Occupied(mut entry), Some(expected)) if *entry.get() == expected => {
                entry.insert(new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use domains::Submitter;

    fn thread(number: u64, board: &str) -> Thread {
        Thread {
            id: ThreadId::new(),
            board: board.into(),
            number: PostNumber(number),
            name: "Anonymous".into(),
            subject: None,
            comment: "op".into(),
            attachment: None,
            created_at: Utc::now(),
            reply_count: 0,
            pinned: false,
            locked: false,
            is_admin: false,
            submitter: Submitter {
                user_id: "u".into(),
                ip: "192.0.2.1".into(),
            },
        }
    }

    fn challenge(token: &str, answer: i64, ttl: Duration) -> CaptchaChallenge {
        let now = Utc::now();
        CaptchaChallenge {
            token: token.into(),
            question: "1 + 1 =".into(),
            answer,
            issued_at: now,
            expires_at: now + ttl,
            consumed: false,
        }
    }

    #[tokio::test]
    async fn counter_cas_rejects_stale_expectation() {
        let store = MemoryDocumentStore::new();
        assert!(store.compare_and_swap("post_number", None, 1).await.unwrap());
        assert!(!store.compare_and_swap("post_number", None, 1).await.unwrap());
        assert!(!store.compare_and_swap("post_number", Some(0), 2).await.unwrap());
        assert!(store.compare_and_swap("post_number", Some(1), 2).await.unwrap());
        assert_eq!(store.read("post_number").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn captcha_consumes_once() {
        let store = MemoryDocumentStore::new();
        CaptchaRepository::insert(&store, challenge("t", 4, Duration::minutes(5)))
            .await
            .unwrap();
        let now = Utc::now();

        assert_eq!(store.consume("t", 4, now).await.unwrap(), ConsumeOutcome::Accepted);
        assert_eq!(store.consume("t", 4, now).await.unwrap(), ConsumeOutcome::Unknown);
        assert_eq!(store.consume("zzz", 4, now).await.unwrap(), ConsumeOutcome::Unknown);
    }

    #[tokio::test]
    async fn wrong_answer_retires_the_challenge() {
        let store = MemoryDocumentStore::new();
        CaptchaRepository::insert(&store, challenge("t", 4, Duration::minutes(5)))
            .await
            .unwrap();
        let now = Utc::now();

        assert_eq!(store.consume("t", 5, now).await.unwrap(), ConsumeOutcome::WrongAnswer);
        assert_eq!(store.consume("t", 4, now).await.unwrap(), ConsumeOutcome::Unknown);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_consumers_accept_exactly_once() {
        let store = Arc::new(MemoryDocumentStore::new());
        CaptchaRepository::insert(&*store, challenge("shared", 9, Duration::minutes(5)))
            .await
            .unwrap();
        let now = Utc::now();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.consume("shared", 9, now).await.unwrap() })
            })
            .collect();
        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() == ConsumeOutcome::Accepted {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
    }

    #[tokio::test]
    async fn expired_captchas_are_refused_and_swept() {
        let store = MemoryDocumentStore::new();
        CaptchaRepository::insert(&store, challenge("old", 1, -Duration::seconds(1)))
            .await
            .unwrap();
        CaptchaRepository::insert(&store, challenge("new", 1, Duration::minutes(5)))
            .await
            .unwrap();

        let now = Utc::now();
        assert_eq!(store.consume("old", 1, now).await.unwrap(), ConsumeOutcome::Expired);
        assert_eq!(store.delete_expired(now).await.unwrap(), 1);
        assert_eq!(store.consume("new", 1, now).await.unwrap(), ConsumeOutcome::Accepted);
    }

    #[tokio::test]
    async fn failure_window_restarts_count() {
        let store = MemoryDocumentStore::new();
        let window = Duration::minutes(30);
        let t0 = Utc::now();

        assert_eq!(store.record_failure("ip", t0, window).await.unwrap(), 1);
        assert_eq!(
            store
                .record_failure("ip", t0 + Duration::minutes(10), window)
                .await
                .unwrap(),
            2
        );
        assert_eq!(
            store
                .record_failure("ip", t0 + Duration::minutes(50), window)
                .await
                .unwrap(),
            1
        );
        store.clear_failures("ip").await.unwrap();
        assert_eq!(store.record_failure("ip", t0, window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn threads_index_by_board_and_number() {
        let store = MemoryDocumentStore::new();
        let a = thread(1, "tech");
        ThreadRepository::insert(&store, a.clone()).await.unwrap();
        ThreadRepository::insert(&store, thread(2, "art")).await.unwrap();

        assert_eq!(store.list_by_board("tech").await.unwrap().len(), 1);
        let found = ThreadRepository::find_by_number(&store, PostNumber(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, a.id);
        assert!(store.set_locked(a.id, true).await.unwrap());
        assert!(!store.set_locked(ThreadId::new(), true).await.unwrap());
    }
}
