//! # Handlers
//!
//! Each handler extracts the caller, hands the request to a service and
//! shapes the answer. Authorization lives in the services' gate, not here.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use chrono::Duration;
use domains::{
    AppError, Attachment, Ban, BanId, Board, PostNumber, ReleaseOutcome, Report, ReportId,
    Thread,
};
use serde_json::{json, Value};
use services::{CaptchaPrompt, CascadeSummary, Resolution, StatsReport};
use tracing::info;
use uuid::Uuid;

use crate::dto::{
    BanRequest, CreateReplyRequest, CreateThreadRequest, DeleteImageRequest, Envelope, Message,
    PostView, Posted, ReportReceipt, ReportRequest, ResolveRequest, SignInRequest,
    SignInResponse, ThreadPage, ToggleRequest,
};
use crate::error::ApiError;
use crate::extract::{ApiJson, Caller};
use crate::state::AppState;

type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(Envelope::ok(data)))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

// ── Public reads ────────────────────────────────────────────────────────────

pub async fn issue_captcha(State(state): State<AppState>) -> ApiResult<CaptchaPrompt> {
    ok(state.captcha.issue().await?)
}

pub async fn list_boards(State(state): State<AppState>) -> ApiResult<Vec<Board>> {
    ok(state.posting.boards().to_vec())
}

/// Pinned threads first, then newest first.
pub async fn list_threads(
    State(state): State<AppState>,
    Path(board): Path<String>,
) -> ApiResult<Vec<PostView>> {
    let board = state.posting.board(&board)?.slug.clone();
    let threads = state.content.list_threads(&board).await?;
    ok(threads
        .iter()
        .map(|thread| PostView::thread(thread, &state.renderer))
        .collect())
}

pub async fn view_thread(
    State(state): State<AppState>,
    Path(number): Path<u64>,
) -> ApiResult<ThreadPage> {
    let view = state.content.thread_view(PostNumber(number)).await?;
    ok(ThreadPage::new(&view, &state.renderer))
}

pub async fn view_post(
    State(state): State<AppState>,
    Path(number): Path<u64>,
) -> ApiResult<PostView> {
    let post = state
        .content
        .find_post(PostNumber(number))
        .await?
        .ok_or_else(|| AppError::not_found("post", number))?;
    ok(PostView::post(&post, &state.renderer))
}

// ── Posting ─────────────────────────────────────────────────────────────────

pub async fn create_thread(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(board): Path<String>,
    ApiJson(body): ApiJson<CreateThreadRequest>,
) -> Result<(StatusCode, Json<Envelope<Posted>>), ApiError> {
    let (submission, captcha) = body.into_parts(board);
    let receipt = state
        .posting
        .create_thread(&caller, captcha.as_ref(), submission)
        .await?;

    let posted = Posted {
        post: PostView::thread(&receipt.post, &state.renderer),
        degraded: receipt.degraded,
    };
    Ok((StatusCode::CREATED, Json(Envelope::ok(posted))))
}

pub async fn create_reply(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(number): Path<u64>,
    ApiJson(body): ApiJson<CreateReplyRequest>,
) -> Result<(StatusCode, Json<Envelope<Posted>>), ApiError> {
    let (submission, captcha) = body.into_parts();
    let thread_number = PostNumber(number);
    let receipt = state
        .posting
        .create_reply(&caller, captcha.as_ref(), thread_number, submission)
        .await?;

    let posted = Posted {
        post: PostView::reply(&receipt.post, Some(thread_number), &state.renderer),
        degraded: receipt.degraded,
    };
    Ok((StatusCode::CREATED, Json(Envelope::ok(posted))))
}

pub async fn submit_report(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<ReportRequest>,
) -> Result<(StatusCode, Json<Envelope<ReportReceipt>>), ApiError> {
    let report = state
        .moderation
        .report_post(
            &caller,
            body.captcha.as_ref(),
            PostNumber(body.post_number),
            &body.reason,
        )
        .await?;

    let receipt = ReportReceipt {
        id: report.id.to_string(),
        post_number: report.post_number,
        created_at: report.created_at,
    };
    Ok((StatusCode::CREATED, Json(Envelope::ok(receipt))))
}

// ── Attachments ─────────────────────────────────────────────────────────────

/// Multipart form with an `image` file and a `board` field.
pub async fn upload(
    State(state): State<AppState>,
    Caller(caller): Caller,
    mut multipart: Multipart,
) -> ApiResult<Attachment> {
    let mut board = None;
    let mut image: Option<(Bytes, mime::Mime)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("board") => board = Some(field.text().await?),
            Some("image") => {
                let content_type = field
                    .content_type()
                    .and_then(|ct| ct.parse::<mime::Mime>().ok())
                    .or_else(|| {
                        field
                            .file_name()
                            .and_then(|name| mime_guess::from_path(name).first())
                    })
                    .unwrap_or(mime::APPLICATION_OCTET_STREAM);
                image = Some((field.bytes().await?, content_type));
            }
            _ => {}
        }
    }

    let (data, content_type) =
        image.ok_or_else(|| ApiError::BadRequest("no file received".into()))?;
    let board = board
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("board not specified".into()))?;

    ok(state
        .posting
        .upload_attachment(&caller, &board, data, &content_type)
        .await?)
}

pub async fn delete_image(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<DeleteImageRequest>,
) -> Result<Json<Message>, ApiError> {
    let url = body
        .image_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("image URL not specified".into()))?;

    let message = match state.posting.release_attachment(&caller, &url).await? {
        ReleaseOutcome::Removed => "image deleted",
        ReleaseOutcome::AlreadyGone => "file not found (possibly already deleted)",
        ReleaseOutcome::External => "external images are not managed here",
    };
    Ok(Json(Message::new(message)))
}

// ── Sessions ────────────────────────────────────────────────────────────────

pub async fn sign_in(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<SignInRequest>,
) -> ApiResult<SignInResponse> {
    let token = state.identity.sign_in(&body.email, &body.password).await?;
    ok(SignInResponse { token: token.0 })
}

pub async fn sign_out(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Result<Json<Message>, ApiError> {
    let session = caller
        .session
        .ok_or(AppError::Denied(domains::Denial::Unauthorized))?;
    state.identity.sign_out(&session).await?;
    Ok(Json(Message::new("signed out")))
}

// ── Administration ──────────────────────────────────────────────────────────

pub async fn admin_delete_thread(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(number): Path<u64>,
) -> ApiResult<CascadeSummary> {
    ok(state
        .moderation
        .delete_thread(&caller, PostNumber(number))
        .await?)
}

pub async fn admin_delete_reply(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(number): Path<u64>,
) -> ApiResult<CascadeSummary> {
    ok(state
        .moderation
        .delete_reply(&caller, PostNumber(number))
        .await?)
}

pub async fn admin_pin(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(number): Path<u64>,
    ApiJson(body): ApiJson<ToggleRequest>,
) -> ApiResult<Thread> {
    ok(state
        .moderation
        .set_pinned(&caller, PostNumber(number), body.value)
        .await?)
}

pub async fn admin_lock(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(number): Path<u64>,
    ApiJson(body): ApiJson<ToggleRequest>,
) -> ApiResult<Thread> {
    ok(state
        .moderation
        .set_locked(&caller, PostNumber(number), body.value)
        .await?)
}

pub async fn admin_list_reports(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Vec<Report>> {
    ok(state.moderation.list_reports(&caller).await?)
}

pub async fn admin_clear_reports(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Value> {
    let removed = state.moderation.clear_reports(&caller).await?;
    ok(json!({ "removed": removed }))
}

pub async fn admin_dismiss_report(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<Message>, ApiError> {
    state
        .moderation
        .dismiss_report(&caller, ReportId(id))
        .await?;
    Ok(Json(Message::new("report dismissed")))
}

pub async fn admin_resolve_report(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
    ApiJson(body): ApiJson<ResolveRequest>,
) -> ApiResult<Resolution> {
    ok(state
        .moderation
        .resolve_report(&caller, ReportId(id), body.action)
        .await?)
}

pub async fn admin_list_bans(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<Vec<Ban>> {
    ok(state.moderation.list_active_bans(&caller).await?)
}

pub async fn admin_issue_ban(
    State(state): State<AppState>,
    Caller(caller): Caller,
    ApiJson(body): ApiJson<BanRequest>,
) -> Result<(StatusCode, Json<Envelope<Ban>>), ApiError> {
    let duration = body
        .duration_minutes
        .map(|minutes| {
            Duration::try_minutes(minutes).ok_or_else(|| {
                AppError::ValidationError(format!("ban duration of {minutes} minutes is too long"))
            })
        })
        .transpose()?;
    let ban = state
        .moderation
        .issue_ban(&caller, &body.ip, &body.reason, duration)
        .await?;
    info!(ban = %ban.id, "ban issued over HTTP");
    Ok((StatusCode::CREATED, Json(Envelope::ok(ban))))
}

pub async fn admin_remove_ban(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(id): Path<Uuid>,
) -> ApiResult<Value> {
    let removed = state.moderation.remove_ban(&caller, BanId(id)).await?;
    ok(json!({ "removed": removed }))
}

pub async fn admin_stats(
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> ApiResult<StatsReport> {
    ok(state.stats.collect(&caller).await?)
}
