//! # Anti-abuse gate
//!
//! Every mutating request passes through [`AntiAbuseGate::check`], which runs
//! three checks in a fixed order and stops at the first denial:
//!
//! 1. **BanCheck**: an active, unexpired ban on the caller IP denies.
//!    Expired bans are lifted on sight.
//! 2. **CaptchaCheck**: content creation and reports only. The challenge is
//!    consumed with one conditional write; repeated failures from one IP
//!    trigger a temporary ban.
//! 3. **AdminCheck**: privileged actions need a live administrator session.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use domains::{
    AdminIdentity, AppError, Ban, BanId, BanInfo, BanRepository, CallerContext, CaptchaAnswer,
    CaptchaRepository, ConsumeOutcome, Denial, IdentityProvider, Result,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

/// Name recorded on bans issued automatically by the gate.
pub const AUTO_BAN_ADMIN: &str = "Anti-spam system";

/// Everything a request can ask the engine to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateThread,
    CreateReply,
    SubmitReport,
    UploadAttachment,
    DeletePost,
    SetPinned,
    SetLocked,
    IssueBan,
    RemoveBan,
    ReviewReports,
    DismissReport,
    ResolveReport,
    ReleaseAttachment,
    ViewStats,
}

impl Action {
    pub fn requires_captcha(self) -> bool {
        matches!(
            self,
            Action::CreateThread | Action::CreateReply | Action::SubmitReport
        )
    }

    pub fn requires_admin(self) -> bool {
        match self {
            Action::CreateThread
            | Action::CreateReply
            | Action::SubmitReport
            | Action::UploadAttachment => false,
            Action::DeletePost
            | Action::SetPinned
            | Action::SetLocked
            | Action::IssueBan
            | Action::RemoveBan
            | Action::ReviewReports
            | Action::DismissReport
            | Action::ResolveReport
            | Action::ReleaseAttachment
            | Action::ViewStats => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub captcha_failure_threshold: u32,
    pub captcha_failure_window: Duration,
    pub auto_ban_duration: Duration,
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self {
            captcha_failure_threshold: 5,
            captcha_failure_window: Duration::minutes(30),
            auto_ban_duration: Duration::minutes(15),
        }
    }
}

/// Proof that a request passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Clearance {
    /// Set when the caller presented a live administrator session.
    pub admin: Option<AdminIdentity>,
}

impl Clearance {
    pub fn is_admin(&self) -> bool {
        self.admin.is_some()
    }
}

pub struct AntiAbuseGate {
    bans: Arc<dyn BanRepository>,
    captchas: Arc<dyn CaptchaRepository>,
    identity: Arc<dyn IdentityProvider>,
    policy: GatePolicy,
    /// Advisory only: consulted when the ban store cannot be queried.
    known_bans: DashMap<String, BanInfo>,
}

impl AntiAbuseGate {
    pub fn new(
        bans: Arc<dyn BanRepository>,
        captchas: Arc<dyn CaptchaRepository>,
        identity: Arc<dyn IdentityProvider>,
        policy: GatePolicy,
    ) -> Self {
        Self {
            bans,
            captchas,
            identity,
            policy,
            known_bans: DashMap::new(),
        }
    }

    #[instrument(skip(self, caller, captcha), fields(ip = %caller.ip))]
    pub async fn check(
        &self,
        action: Action,
        caller: &CallerContext,
        captcha: Option<&CaptchaAnswer>,
    ) -> Result<Clearance> {
        self.ban_check(caller).await?;

        if action.requires_captcha() {
            self.captcha_check(caller, captcha).await?;
        }

        let admin = self.admin_check(action, caller).await?;
        debug!(admin = admin.is_some(), "request allowed");
        Ok(Clearance { admin })
    }

    async fn ban_check(&self, caller: &CallerContext) -> Result<()> {
        let now = Utc::now();

        let bans = match self.bans.find_active_by_ip(&caller.ip).await {
            Ok(bans) => bans,
            Err(err) => {
                warn!(error = %err, "ban store unreachable, consulting local cache");
                if let Some(info) = self.cached_ban(&caller.ip, now) {
                    return Err(Denial::Banned(info).into());
                }
                return Err(err);
            }
        };

        let mut in_force: Option<Ban> = None;
        for ban in bans {
            if ban.is_expired_at(now) {
                self.lift_expired(&ban).await;
            } else if in_force.is_none() {
                in_force = Some(ban);
            }
        }

        match in_force {
            Some(ban) => {
                info!(ban = %ban.id, "banned caller denied");
                self.note_ban(&ban);
                Err(Denial::Banned(BanInfo::from(&ban)).into())
            }
            None => {
                self.known_bans.remove(&caller.ip);
                Ok(())
            }
        }
    }

    async fn lift_expired(&self, ban: &Ban) {
        match self.bans.deactivate(ban.id).await {
            Ok(_) => info!(ban = %ban.id, ip = %ban.ip, "expired ban lifted"),
            Err(err) => warn!(ban = %ban.id, error = %err, "failed to lift expired ban"),
        }
        self.known_bans.remove(&ban.ip);
    }

    fn cached_ban(&self, ip: &str, now: DateTime<Utc>) -> Option<BanInfo> {
        let entry = self.known_bans.get(ip)?;
        match entry.expires_at {
            Some(expiry) if expiry <= now => None,
            _ => Some(entry.clone()),
        }
    }

    async fn captcha_check(
        &self,
        caller: &CallerContext,
        captcha: Option<&CaptchaAnswer>,
    ) -> Result<()> {
        let Some(captcha) = captcha else {
            return Err(Denial::CaptchaFailed {
                reason: "captcha answer required".into(),
                auto_banned: false,
            }
            .into());
        };

        let now = Utc::now();
        let reason = match self
            .captchas
            .consume(&captcha.token, captcha.answer, now)
            .await?
        {
            ConsumeOutcome::Accepted => {
                if let Err(err) = self.captchas.clear_failures(&caller.ip).await {
                    warn!(error = %err, "failed to reset captcha failure counter");
                }
                return Ok(());
            }
            ConsumeOutcome::WrongAnswer => "incorrect captcha answer",
            ConsumeOutcome::Expired => "captcha expired",
            ConsumeOutcome::Unknown => "invalid or already used captcha token",
        };

        let failures = self
            .captchas
            .record_failure(&caller.ip, now, self.policy.captcha_failure_window)
            .await?;
        debug!(failures, reason, "captcha failure recorded");

        let mut auto_banned = false;
        if failures >= self.policy.captcha_failure_threshold {
            auto_banned = self.auto_ban(&caller.ip, failures, now).await?;
            if let Err(err) = self.captchas.clear_failures(&caller.ip).await {
                warn!(error = %err, "failed to reset captcha failure counter");
            }
        }

        Err(Denial::CaptchaFailed {
            reason: reason.to_string(),
            auto_banned,
        }
        .into())
    }

    /// Issues the temporary ban unless one is already in force.
    async fn auto_ban(&self, ip: &str, failures: u32, now: DateTime<Utc>) -> Result<bool> {
        let existing = self.bans.find_active_by_ip(ip).await?;
        if existing.iter().any(|ban| ban.is_in_force(now)) {
            return Ok(false);
        }

        let ban = Ban {
            id: BanId::new(),
            ip: ip.to_string(),
            reason: format!("Repeated captcha failures ({failures} attempts)"),
            admin_name: AUTO_BAN_ADMIN.to_string(),
            issued_at: now,
            expires_at: Some(now + self.policy.auto_ban_duration),
            active: true,
        };
        self.bans.insert(ban.clone()).await?;
        self.note_ban(&ban);

        warn!(ip, failures, ban = %ban.id, "temporary ban issued for captcha failures");
        Ok(true)
    }

    async fn admin_check(
        &self,
        action: Action,
        caller: &CallerContext,
    ) -> Result<Option<AdminIdentity>> {
        let admin = match &caller.session {
            None => None,
            Some(token) => match self.identity.resolve_admin(token).await {
                Ok(admin) => admin,
                Err(err) if !action.requires_admin() => {
                    warn!(error = %err, "session lookup failed, continuing as anonymous");
                    None
                }
                Err(err) => return Err(err),
            },
        };

        if action.requires_admin() && admin.is_none() {
            info!(?action, "privileged action without administrator session");
            return Err(AppError::Denied(Denial::Unauthorized));
        }
        Ok(admin)
    }

    /// Records a ban in the advisory cache.
    pub fn note_ban(&self, ban: &Ban) {
        self.known_bans.insert(ban.ip.clone(), BanInfo::from(ban));
    }

    /// Drops an IP from the advisory cache.
    pub fn forget_ban(&self, ip: &str) {
        self.known_bans.remove(ip);
    }
}
