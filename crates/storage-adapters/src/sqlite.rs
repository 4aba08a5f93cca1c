//! # SQLite document store
//!
//! Maps the document collections onto SQLite tables. Nested values
//! (attachments, reference lists) are kept as JSON text; storage ids as
//! UUID blobs. Conditional writes are single statements so they stay
//! atomic without explicit transactions.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use domains::{
    AppError, Attachment, Ban, BanId, BanRepository, CaptchaChallenge, CaptchaRepository,
    ConsumeOutcome, ContentRef, CounterStore, PostNumber, Reply, ReplyId, ReplyRepository, Report,
    ReportId, ReportRepository, Result, Submitter, Thread, ThreadId, ThreadRepository,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS threads (
        id BLOB PRIMARY KEY,
        board TEXT NOT NULL,
        number INTEGER NOT NULL UNIQUE,
        name TEXT NOT NULL,
        subject TEXT,
        comment TEXT NOT NULL,
        attachment TEXT,
        created_at TEXT NOT NULL,
        reply_count INTEGER NOT NULL DEFAULT 0,
        pinned INTEGER NOT NULL DEFAULT 0,
        locked INTEGER NOT NULL DEFAULT 0,
        is_admin INTEGER NOT NULL DEFAULT 0,
        user_id TEXT NOT NULL,
        ip TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_threads_board ON threads (board)",
    r#"
    CREATE TABLE IF NOT EXISTS replies (
        id BLOB PRIMARY KEY,
        thread_id BLOB NOT NULL,
        board TEXT NOT NULL,
        number INTEGER NOT NULL UNIQUE,
        parent INTEGER,
        refs TEXT NOT NULL DEFAULT '[]',
        name TEXT NOT NULL,
        comment TEXT NOT NULL,
        attachment TEXT,
        created_at TEXT NOT NULL,
        is_admin INTEGER NOT NULL DEFAULT 0,
        user_id TEXT NOT NULL,
        ip TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_replies_thread ON replies (thread_id)",
    r#"
    CREATE TABLE IF NOT EXISTS reports (
        id BLOB PRIMARY KEY,
        content_kind TEXT NOT NULL,
        content_id BLOB NOT NULL,
        thread_id BLOB NOT NULL,
        post_number INTEGER NOT NULL,
        board TEXT NOT NULL,
        reporter_ip TEXT NOT NULL,
        author_ip TEXT NOT NULL,
        reason TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_reports_thread ON reports (thread_id)",
    r#"
    CREATE TABLE IF NOT EXISTS ip_bans (
        id BLOB PRIMARY KEY,
        ip TEXT NOT NULL,
        reason TEXT NOT NULL,
        admin_name TEXT NOT NULL,
        issued_at TEXT NOT NULL,
        expires_at TEXT,
        active INTEGER NOT NULL DEFAULT 1
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_bans_ip ON ip_bans (ip, active)",
    r#"
    CREATE TABLE IF NOT EXISTS captcha_challenges (
        token TEXT PRIMARY KEY,
        question TEXT NOT NULL,
        answer INTEGER NOT NULL,
        issued_at TEXT NOT NULL,
        expires_at_ms INTEGER NOT NULL,
        consumed INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS captcha_failures (
        ip TEXT PRIMARY KEY,
        count INTEGER NOT NULL,
        last_failure_ms INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS counters (
        name TEXT PRIMARY KEY,
        value INTEGER NOT NULL
    )
    "#,
];

pub struct SqliteDocumentStore {
    pool: SqlitePool,
}

fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

fn blob_to_uuid(blob: &[u8]) -> Result<Uuid> {
    Uuid::from_slice(blob).map_err(AppError::internal)
}

fn db_err(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(db.to_string()),
        _ => AppError::internal(err),
    }
}

fn post_number(row: &SqliteRow, column: &str) -> Result<PostNumber> {
    let raw: i64 = row.try_get(column).map_err(db_err)?;
    u64::try_from(raw)
        .map(PostNumber)
        .map_err(|_| AppError::Internal(format!("negative post number in {column}")))
}

fn number_to_sql(number: PostNumber) -> Result<i64> {
    i64::try_from(number.get())
        .map_err(|_| AppError::ValidationError(format!("post number {number} out of range")))
}

fn attachment_to_json(attachment: Option<&Attachment>) -> Result<Option<String>> {
    attachment
        .map(serde_json::to_string)
        .transpose()
        .map_err(AppError::internal)
}

fn attachment_from_row(row: &SqliteRow) -> Result<Option<Attachment>> {
    let raw: Option<String> = row.try_get("attachment").map_err(db_err)?;
    raw.as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(AppError::internal)
}

fn submitter_from_row(row: &SqliteRow) -> Result<Submitter> {
    Ok(Submitter {
        user_id: row.try_get("user_id").map_err(db_err)?,
        ip: row.try_get("ip").map_err(db_err)?,
    })
}

fn thread_from_row(row: &SqliteRow) -> Result<Thread> {
    let reply_count: i64 = row.try_get("reply_count").map_err(db_err)?;
    Ok(Thread {
        id: ThreadId(blob_to_uuid(row.try_get::<Vec<u8>, _>("id").map_err(db_err)?.as_slice())?),
        board: row.try_get("board").map_err(db_err)?,
        number: post_number(row, "number")?,
        name: row.try_get("name").map_err(db_err)?,
        subject: row.try_get("subject").map_err(db_err)?,
        comment: row.try_get("comment").map_err(db_err)?,
        attachment: attachment_from_row(row)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        reply_count: u32::try_from(reply_count).unwrap_or(0),
        pinned: row.try_get("pinned").map_err(db_err)?,
        locked: row.try_get("locked").map_err(db_err)?,
        is_admin: row.try_get("is_admin").map_err(db_err)?,
        submitter: submitter_from_row(row)?,
    })
}

fn reply_from_row(row: &SqliteRow) -> Result<Reply> {
    let parent: Option<i64> = row.try_get("parent").map_err(db_err)?;
    let refs: String = row.try_get("refs").map_err(db_err)?;
    Ok(Reply {
        id: ReplyId(blob_to_uuid(row.try_get::<Vec<u8>, _>("id").map_err(db_err)?.as_slice())?),
        thread_id: ThreadId(blob_to_uuid(
            row.try_get::<Vec<u8>, _>("thread_id").map_err(db_err)?.as_slice(),
        )?),
        board: row.try_get("board").map_err(db_err)?,
        number: post_number(row, "number")?,
        parent: parent.and_then(|p| u64::try_from(p).ok()).map(PostNumber),
        references: serde_json::from_str(&refs).map_err(AppError::internal)?,
        name: row.try_get("name").map_err(db_err)?,
        comment: row.try_get("comment").map_err(db_err)?,
        attachment: attachment_from_row(row)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        is_admin: row.try_get("is_admin").map_err(db_err)?,
        submitter: submitter_from_row(row)?,
    })
}

fn report_from_row(row: &SqliteRow) -> Result<Report> {
    let kind: String = row.try_get("content_kind").map_err(db_err)?;
    let content_id = blob_to_uuid(row.try_get::<Vec<u8>, _>("content_id").map_err(db_err)?.as_slice())?;
    let content = match kind.as_str() {
        "thread" => ContentRef::Thread(ThreadId(content_id)),
        "reply" => ContentRef::Reply(ReplyId(content_id)),
        other => return Err(AppError::Internal(format!("unknown content kind {other}"))),
    };
    Ok(Report {
        id: ReportId(blob_to_uuid(row.try_get::<Vec<u8>, _>("id").map_err(db_err)?.as_slice())?),
        content,
        thread_id: ThreadId(blob_to_uuid(
            row.try_get::<Vec<u8>, _>("thread_id").map_err(db_err)?.as_slice(),
        )?),
        post_number: post_number(row, "post_number")?,
        board: row.try_get("board").map_err(db_err)?,
        reporter_ip: row.try_get("reporter_ip").map_err(db_err)?,
        author_ip: row.try_get("author_ip").map_err(db_err)?,
        reason: row.try_get("reason").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn ban_from_row(row: &SqliteRow) -> Result<Ban> {
    Ok(Ban {
        id: BanId(blob_to_uuid(row.try_get::<Vec<u8>, _>("id").map_err(db_err)?.as_slice())?),
        ip: row.try_get("ip").map_err(db_err)?,
        reason: row.try_get("reason").map_err(db_err)?,
        admin_name: row.try_get("admin_name").map_err(db_err)?,
        issued_at: row.try_get("issued_at").map_err(db_err)?,
        expires_at: row.try_get("expires_at").map_err(db_err)?,
        active: row.try_get("active").map_err(db_err)?,
    })
}

impl SqliteDocumentStore {
    /// Opens (creating if needed) the database at `url` and applies the schema.
    /// In-memory URLs should use a single connection so every query sees
    /// the same database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(db_err)?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .map_err(db_err)?;

        let store = Self { pool };
        store.migrate().await?;
        info!(url, "sqlite document store ready");
        Ok(store)
    }

    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ThreadRepository for SqliteDocumentStore {
    async fn insert(&self, thread: Thread) -> Result<()> {
        sqlx::query(
            "INSERT INTO threads (id, board, number, name, subject, comment, attachment, created_at, \
             reply_count, pinned, locked, is_admin, user_id, ip) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(thread.id.0))
        .bind(&thread.board)
        .bind(number_to_sql(thread.number)?)
        .bind(&thread.name)
        .bind(&thread.subject)
        .bind(&thread.comment)
        .bind(attachment_to_json(thread.attachment.as_ref())?)
        .bind(thread.created_at)
        .bind(i64::from(thread.reply_count))
        .bind(thread.pinned)
        .bind(thread.locked)
        .bind(thread.is_admin)
        .bind(&thread.submitter.user_id)
        .bind(&thread.submitter.ip)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: ThreadId) -> Result<Option<Thread>> {
        sqlx::query("SELECT * FROM threads WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(thread_from_row)
            .transpose()
    }

    async fn find_by_number(&self, number: PostNumber) -> Result<Option<Thread>> {
        sqlx::query("SELECT * FROM threads WHERE number = ?")
            .bind(number_to_sql(number)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(thread_from_row)
            .transpose()
    }

    async fn list_by_board(&self, board: &str) -> Result<Vec<Thread>> {
        sqlx::query("SELECT * FROM threads WHERE board = ? ORDER BY pinned DESC, number DESC")
            .bind(board)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(thread_from_row)
            .collect()
    }

    async fn list_all(&self) -> Result<Vec<Thread>> {
        sqlx::query("SELECT * FROM threads ORDER BY number ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(thread_from_row)
            .collect()
    }

    async fn set_pinned(&self, id: ThreadId, pinned: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE threads SET pinned = ? WHERE id = ?")
            .bind(pinned)
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn set_locked(&self, id: ThreadId, locked: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE threads SET locked = ? WHERE id = ?")
            .bind(locked)
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_reply_count(&self, id: ThreadId) -> Result<()> {
        sqlx::query("UPDATE threads SET reply_count = reply_count + 1 WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn set_reply_count(&self, id: ThreadId, count: u32) -> Result<()> {
        sqlx::query("UPDATE threads SET reply_count = ? WHERE id = ?")
            .bind(i64::from(count))
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete(&self, id: ThreadId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM threads WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ReplyRepository for SqliteDocumentStore {
    async fn insert(&self, reply: Reply) -> Result<()> {
        let refs = serde_json::to_string(&reply.references).map_err(AppError::internal)?;
        let parent = reply.parent.map(number_to_sql).transpose()?;
        sqlx::query(
            "INSERT INTO replies (id, thread_id, board, number, parent, refs, name, comment, \
             attachment, created_at, is_admin, user_id, ip) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(reply.id.0))
        .bind(uuid_to_blob(reply.thread_id.0))
        .bind(&reply.board)
        .bind(number_to_sql(reply.number)?)
        .bind(parent)
        .bind(refs)
        .bind(&reply.name)
        .bind(&reply.comment)
        .bind(attachment_to_json(reply.attachment.as_ref())?)
        .bind(reply.created_at)
        .bind(reply.is_admin)
        .bind(&reply.submitter.user_id)
        .bind(&reply.submitter.ip)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: ReplyId) -> Result<Option<Reply>> {
        sqlx::query("SELECT * FROM replies WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(reply_from_row)
            .transpose()
    }

    async fn find_by_number(&self, number: PostNumber) -> Result<Option<Reply>> {
        sqlx::query("SELECT * FROM replies WHERE number = ?")
            .bind(number_to_sql(number)?)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(reply_from_row)
            .transpose()
    }

    async fn list_by_thread(&self, thread_id: ThreadId) -> Result<Vec<Reply>> {
        sqlx::query("SELECT * FROM replies WHERE thread_id = ? ORDER BY number ASC")
            .bind(uuid_to_blob(thread_id.0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(reply_from_row)
            .collect()
    }

    async fn count_by_thread(&self, thread_id: ThreadId) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM replies WHERE thread_id = ?")
            .bind(uuid_to_blob(thread_id.0))
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete(&self, id: ReplyId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM replies WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl ReportRepository for SqliteDocumentStore {
    async fn insert(&self, report: Report) -> Result<()> {
        sqlx::query(
            "INSERT INTO reports (id, content_kind, content_id, thread_id, post_number, board, \
             reporter_ip, author_ip, reason, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(report.id.0))
        .bind(report.content.kind().as_str())
        .bind(uuid_to_blob(report.content.uuid()))
        .bind(uuid_to_blob(report.thread_id.0))
        .bind(number_to_sql(report.post_number)?)
        .bind(&report.board)
        .bind(&report.reporter_ip)
        .bind(&report.author_ip)
        .bind(&report.reason)
        .bind(report.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: ReportId) -> Result<Option<Report>> {
        sqlx::query("SELECT * FROM reports WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(report_from_row)
            .transpose()
    }

    async fn list(&self) -> Result<Vec<Report>> {
        sqlx::query("SELECT * FROM reports ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(report_from_row)
            .collect()
    }

    async fn delete(&self, id: ReportId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM reports WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_by_thread(&self, thread_id: ThreadId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reports WHERE thread_id = ?")
            .bind(uuid_to_blob(thread_id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_by_content(&self, content: ContentRef) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reports WHERE content_kind = ? AND content_id = ?")
            .bind(content.kind().as_str())
            .bind(uuid_to_blob(content.uuid()))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM reports")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl BanRepository for SqliteDocumentStore {
    async fn insert(&self, ban: Ban) -> Result<()> {
        sqlx::query(
            "INSERT INTO ip_bans (id, ip, reason, admin_name, issued_at, expires_at, active) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(uuid_to_blob(ban.id.0))
        .bind(&ban.ip)
        .bind(&ban.reason)
        .bind(&ban.admin_name)
        .bind(ban.issued_at)
        .bind(ban.expires_at)
        .bind(ban.active)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, id: BanId) -> Result<Option<Ban>> {
        sqlx::query("SELECT * FROM ip_bans WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?
            .as_ref()
            .map(ban_from_row)
            .transpose()
    }

    async fn find_active_by_ip(&self, ip: &str) -> Result<Vec<Ban>> {
        sqlx::query("SELECT * FROM ip_bans WHERE ip = ? AND active = 1")
            .bind(ip)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(ban_from_row)
            .collect()
    }

    async fn list_active(&self) -> Result<Vec<Ban>> {
        sqlx::query("SELECT * FROM ip_bans WHERE active = 1 ORDER BY issued_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?
            .iter()
            .map(ban_from_row)
            .collect()
    }

    async fn deactivate(&self, id: BanId) -> Result<bool> {
        let result = sqlx::query("UPDATE ip_bans SET active = 0 WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: BanId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ip_bans WHERE id = ?")
            .bind(uuid_to_blob(id.0))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl CaptchaRepository for SqliteDocumentStore {
    async fn insert(&self, challenge: CaptchaChallenge) -> Result<()> {
        sqlx::query(
            "INSERT INTO captcha_challenges (token, question, answer, issued_at, expires_at_ms, consumed) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&challenge.token)
        .bind(&challenge.question)
        .bind(challenge.answer)
        .bind(challenge.issued_at)
        .bind(challenge.expires_at.timestamp_millis())
        .bind(challenge.consumed)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn consume(&self, token: &str, answer: i64, now: DateTime<Utc>) -> Result<ConsumeOutcome> {
        let now_ms = now.timestamp_millis();
        // Any attempt on a live token retires it; the stored answer comes
        // back so the verdict needs no second read.
        let stored: Option<i64> = sqlx::query_scalar(
            "UPDATE captcha_challenges SET consumed = 1 \
             WHERE token = ? AND consumed = 0 AND expires_at_ms > ? \
             RETURNING answer",
        )
        .bind(token)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        if let Some(stored) = stored {
            return Ok(if stored == answer {
                ConsumeOutcome::Accepted
            } else {
                ConsumeOutcome::WrongAnswer
            });
        }

        let row = sqlx::query(
            "SELECT consumed, expires_at_ms FROM captcha_challenges WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some(row) = row else {
            return Ok(ConsumeOutcome::Unknown);
        };
        let consumed: bool = row.try_get("consumed").map_err(db_err)?;
        let expires_at_ms: i64 = row.try_get("expires_at_ms").map_err(db_err)?;
        Ok(if !consumed && expires_at_ms <= now_ms {
            ConsumeOutcome::Expired
        } else {
            ConsumeOutcome::Unknown
        })
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM captcha_challenges WHERE expires_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        debug!(removed = result.rows_affected(), "expired captchas removed");
        Ok(result.rows_affected())
    }

    async fn record_failure(&self, ip: &str, now: DateTime<Utc>, window: Duration) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "INSERT INTO captcha_failures (ip, count, last_failure_ms) VALUES (?1, 1, ?2) \
             ON CONFLICT(ip) DO UPDATE SET \
               count = CASE WHEN ?2 - captcha_failures.last_failure_ms > ?3 \
                            THEN 1 ELSE captcha_failures.count + 1 END, \
               last_failure_ms = ?2 \
             RETURNING count",
        )
        .bind(ip)
        .bind(now.timestamp_millis())
        .bind(window.num_milliseconds())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn clear_failures(&self, ip: &str) -> Result<()> {
        sqlx::query("DELETE FROM captcha_failures WHERE ip = ?")
            .bind(ip)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl CounterStore for SqliteDocumentStore {
    async fn read(&self, name: &str) -> Result<Option<u64>> {
        let value: Option<i64> = sqlx::query_scalar("SELECT value FROM counters WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(value.and_then(|v| u64::try_from(v).ok()))
    }

    async fn compare_and_swap(&self, name: &str, expected: Option<u64>, new: u64) -> Result<bool> {
        let new = number_to_sql(PostNumber(new))?;
        let result = match expected {
            None => sqlx::query(
                "INSERT INTO counters (name, value) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
            )
            .bind(name)
            .bind(new)
            .execute(&self.pool)
            .await
            .map_err(db_err)?,
            Some(expected) => sqlx::query("UPDATE counters SET value = ? WHERE name = ? AND value = ?")
                .bind(new)
                .bind(name)
                .bind(number_to_sql(PostNumber(expected))?)
                .execute(&self.pool)
                .await
                .map_err(db_err)?,
        };
        Ok(result.rows_affected() == 1)
    }
}
