//! # Moderation workflow
//!
//! Reports, bans and thread toggles. Every operation takes the caller's
//! [`CallerContext`] and runs through the [`AntiAbuseGate`] first; report
//! submission is the only one open to anonymous callers.

use std::sync::Arc;

use chrono::{Duration, Utc};
use domains::{
    AppError, Ban, BanId, BanRepository, CallerContext, CaptchaAnswer, ContentRef, Post,
    PostNumber, Report, ReportId, ReportRepository, Result, Thread,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::content::{CascadeSummary, ContentService};
use crate::gate::{Action, AntiAbuseGate, Clearance};
use crate::utils::is_valid_ip;

const MAX_REASON_CHARS: usize = 500;

/// Maps the short codes offered by the report form to their full text.
/// Anything else is taken as a free-form reason.
pub fn canned_reason(raw: &str) -> Result<String> {
    let reason = match raw.trim() {
        "" => {
            return Err(AppError::ValidationError(
                "a report reason is required".into(),
            ))
        }
        "1" => "Inappropriate content",
        "2" => "Spam",
        "3" => "Illegal content",
        "4" => "Rule violation",
        "5" => "Other",
        other => other,
    };
    if reason.chars().count() > MAX_REASON_CHARS {
        return Err(AppError::ValidationError(format!(
            "report reason exceeds {MAX_REASON_CHARS} characters"
        )));
    }
    Ok(reason.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveAction {
    /// Remove the reported content, then the report.
    Delete,
    /// Drop the report and keep the content.
    Dismiss,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub report_id: ReportId,
    pub action: ResolveAction,
    /// Present when content was deleted.
    pub cascade: Option<CascadeSummary>,
}

pub struct ModerationService {
    gate: Arc<AntiAbuseGate>,
    content: Arc<ContentService>,
    reports: Arc<dyn ReportRepository>,
    bans: Arc<dyn BanRepository>,
}

impl ModerationService {
    pub fn new(
        gate: Arc<AntiAbuseGate>,
        content: Arc<ContentService>,
        reports: Arc<dyn ReportRepository>,
        bans: Arc<dyn BanRepository>,
    ) -> Self {
        Self {
            gate,
            content,
            reports,
            bans,
        }
    }

    async fn admin(&self, action: Action, caller: &CallerContext) -> Result<Clearance> {
        self.gate.check(action, caller, None).await
    }

    /// Files a report against a post. The reported content must still exist.
    #[instrument(skip(self, caller, captcha, reason), fields(ip = %caller.ip))]
    pub async fn submit_report(
        &self,
        caller: &CallerContext,
        captcha: Option<&CaptchaAnswer>,
        content: ContentRef,
        reason: &str,
    ) -> Result<Report> {
        self.gate.check(Action::SubmitReport, caller, captcha).await?;
        let reason = canned_reason(reason)?;

        let post = self
            .content
            .resolve(content)
            .await?
            .ok_or_else(|| AppError::not_found(content.kind().as_str(), content.uuid()))?;
        self.file_report(caller, post, reason).await
    }

    /// Same as [`submit_report`](Self::submit_report), addressed by post number.
    #[instrument(skip(self, caller, captcha, reason), fields(ip = %caller.ip))]
    pub async fn report_post(
        &self,
        caller: &CallerContext,
        captcha: Option<&CaptchaAnswer>,
        number: PostNumber,
        reason: &str,
    ) -> Result<Report> {
        self.gate.check(Action::SubmitReport, caller, captcha).await?;
        let reason = canned_reason(reason)?;

        let post = self
            .content
            .find_post(number)
            .await?
            .ok_or_else(|| AppError::not_found("post", number))?;
        self.file_report(caller, post, reason).await
    }

    async fn file_report(
        &self,
        caller: &CallerContext,
        post: Post,
        reason: String,
    ) -> Result<Report> {
        let report = Report {
            id: ReportId::new(),
            content: post.content_ref(),
            thread_id: post.thread_id(),
            post_number: post.number(),
            board: post.board().to_string(),
            reporter_ip: caller.ip.clone(),
            author_ip: post.submitter().ip.clone(),
            reason,
            created_at: Utc::now(),
        };
        self.reports.insert(report.clone()).await?;

        info!(report = %report.id, post_number = report.post_number.get(), "report filed");
        Ok(report)
    }

    /// Newest first.
    pub async fn list_reports(&self, caller: &CallerContext) -> Result<Vec<Report>> {
        self.admin(Action::ReviewReports, caller).await?;
        let mut reports = self.reports.list().await?;
        reports.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(reports)
    }

    #[instrument(skip(self, caller))]
    pub async fn dismiss_report(&self, caller: &CallerContext, id: ReportId) -> Result<()> {
        self.admin(Action::DismissReport, caller).await?;
        if !self.reports.delete(id).await? {
            return Err(AppError::not_found("report", id));
        }
        info!("report dismissed");
        Ok(())
    }

    #[instrument(skip(self, caller))]
    pub async fn resolve_report(
        &self,
        caller: &CallerContext,
        id: ReportId,
        action: ResolveAction,
    ) -> Result<Resolution> {
        self.admin(Action::ResolveReport, caller).await?;
        let report = self
            .reports
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found("report", id))?;

        let cascade = match action {
            ResolveAction::Dismiss => None,
            ResolveAction::Delete => match self.content.delete_post(report.content).await {
                Ok(summary) => Some(summary),
                // Someone got there first.
                Err(err) if err.is_not_found() => Some(CascadeSummary::default()),
                Err(err) => return Err(err),
            },
        };

        // The cascade may already have taken the report with it.
        self.reports.delete(id).await?;

        info!(?action, post_number = report.post_number.get(), "report resolved");
        Ok(Resolution {
            report_id: id,
            action,
            cascade,
        })
    }

    pub async fn clear_reports(&self, caller: &CallerContext) -> Result<u64> {
        self.admin(Action::ReviewReports, caller).await?;
        let removed = self.reports.delete_all().await?;
        info!(removed, "all reports cleared");
        Ok(removed)
    }

    /// Bans `ip`. `duration` of `None` issues a permanent ban.
    #[instrument(skip(self, caller, reason))]
    pub async fn issue_ban(
        &self,
        caller: &CallerContext,
        ip: &str,
        reason: &str,
        duration: Option<Duration>,
    ) -> Result<Ban> {
        let clearance = self.admin(Action::IssueBan, caller).await?;

        let ip = ip.trim();
        if !is_valid_ip(ip) {
            return Err(AppError::ValidationError(format!("invalid IP address: {ip}")));
        }
        if matches!(duration, Some(d) if d <= Duration::zero()) {
            return Err(AppError::ValidationError(
                "ban duration must be positive".into(),
            ));
        }
        let reason = match reason.trim() {
            "" => "No reason provided".to_string(),
            r => r.to_string(),
        };

        let now = Utc::now();
        let expires_at = match duration {
            Some(d) => Some(now.checked_add_signed(d).ok_or_else(|| {
                AppError::ValidationError("ban duration is too long".into())
            })?),
            None => None,
        };
        let ban = Ban {
            id: BanId::new(),
            ip: ip.to_string(),
            reason,
            admin_name: clearance
                .admin
                .map(|a| a.display_name)
                .unwrap_or_else(|| "Administrator".into()),
            issued_at: now,
            expires_at,
            active: true,
        };
        self.bans.insert(ban.clone()).await?;
        self.gate.note_ban(&ban);

        info!(ban = %ban.id, permanent = ban.expires_at.is_none(), "ban issued");
        Ok(ban)
    }

    /// Removing a ban that is already gone is not an error.
    #[instrument(skip(self, caller))]
    pub async fn remove_ban(&self, caller: &CallerContext, id: BanId) -> Result<bool> {
        self.admin(Action::RemoveBan, caller).await?;

        let Some(ban) = self.bans.get(id).await? else {
            return Ok(false);
        };
        let removed = self.bans.delete(id).await?;
        self.gate.forget_ban(&ban.ip);

        info!(ip = %ban.ip, "ban removed");
        Ok(removed)
    }

    /// Active, unexpired bans, newest first.
    pub async fn list_active_bans(&self, caller: &CallerContext) -> Result<Vec<Ban>> {
        self.admin(Action::IssueBan, caller).await?;
        let now = Utc::now();
        let mut bans: Vec<Ban> = self
            .bans
            .list_active()
            .await?
            .into_iter()
            .filter(|ban| ban.is_in_force(now))
            .collect();
        bans.sort_by(|a, b| b.issued_at.cmp(&a.issued_at));
        Ok(bans)
    }

    pub async fn set_pinned(
        &self,
        caller: &CallerContext,
        number: PostNumber,
        pinned: bool,
    ) -> Result<Thread> {
        self.admin(Action::SetPinned, caller).await?;
        let thread = self.content.thread_by_number(number).await?;
        self.content.set_pinned(thread.id, pinned).await?;
        Ok(Thread { pinned, ..thread })
    }

    pub async fn set_locked(
        &self,
        caller: &CallerContext,
        number: PostNumber,
        locked: bool,
    ) -> Result<Thread> {
        self.admin(Action::SetLocked, caller).await?;
        let thread = self.content.thread_by_number(number).await?;
        self.content.set_locked(thread.id, locked).await?;
        Ok(Thread { locked, ..thread })
    }

    pub async fn delete_thread(
        &self,
        caller: &CallerContext,
        number: PostNumber,
    ) -> Result<CascadeSummary> {
        self.admin(Action::DeletePost, caller).await?;
        let thread = self.content.thread_by_number(number).await?;
        self.content.delete_thread(thread.id).await
    }

    pub async fn delete_reply(
        &self,
        caller: &CallerContext,
        number: PostNumber,
    ) -> Result<CascadeSummary> {
        self.admin(Action::DeletePost, caller).await?;
        match self.content.find_post(number).await? {
            Some(Post::Reply(reply)) => self.content.delete_reply(reply.id).await,
            Some(Post::Thread(_)) => {
                warn!(post_number = number.get(), "reply delete addressed a thread");
                Err(AppError::ValidationError(format!(
                    "post {number} is a thread, not a reply"
                )))
            }
            None => Err(AppError::not_found("reply", number)),
        }
    }
}
