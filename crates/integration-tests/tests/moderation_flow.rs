use chrono::Duration;
use domains::{AppError, Denial, NewReply};
use integration_tests::{admin, anon, attachment, Engine, BOARD};
use services::ResolveAction;

#[tokio::test]
async fn reports_are_listed_and_dismissed_without_touching_content() {
    let engine = Engine::new();
    let thread = engine.thread("203.0.113.1", "op", None).await;

    let captcha = engine.known_captcha(5).await;
    let report = engine
        .moderation
        .report_post(&anon("203.0.113.2"), Some(&captcha), thread.number, "3")
        .await
        .unwrap();
    assert_eq!(report.reason, "Illegal content");
    assert_eq!(report.thread_id, thread.id);
    assert_eq!(report.author_ip, "203.0.113.1");

    let anonymous = engine
        .moderation
        .list_reports(&anon("203.0.113.2"))
        .await
        .unwrap_err();
    assert!(matches!(anonymous, AppError::Denied(Denial::Unauthorized)));

    let listed = engine.moderation.list_reports(&admin()).await.unwrap();
    assert_eq!(listed.len(), 1);

    let resolution = engine
        .moderation
        .resolve_report(&admin(), report.id, ResolveAction::Dismiss)
        .await
        .unwrap();
    assert!(resolution.cascade.is_none());
    assert!(engine.moderation.list_reports(&admin()).await.unwrap().is_empty());
    assert!(engine.content.find_post(thread.number).await.unwrap().is_some());
}

#[tokio::test]
async fn locked_threads_only_accept_administrator_replies() {
    let engine = Engine::new();
    let thread = engine.thread("203.0.113.1", "op", None).await;

    let locked = engine
        .moderation
        .set_locked(&admin(), thread.number, true)
        .await
        .unwrap();
    assert!(locked.locked);

    let captcha = engine.known_captcha(8).await;
    let err = engine
        .posting
        .create_reply(
            &anon("203.0.113.3"),
            Some(&captcha),
            thread.number,
            NewReply {
                comment: "let me in".into(),
                ..NewReply::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ThreadLocked(n) if n == thread.number));

    let captcha = engine.known_captcha(8).await;
    let receipt = engine
        .posting
        .create_reply(
            &admin(),
            Some(&captcha),
            thread.number,
            NewReply {
                comment: "thread closed".into(),
                ..NewReply::default()
            },
        )
        .await
        .unwrap();
    assert!(receipt.post.is_admin);
    assert_eq!(receipt.post.name, "Administrator");
}

#[tokio::test]
async fn pinned_threads_sort_first() {
    let engine = Engine::new();
    let older = engine.thread("203.0.113.1", "older", None).await;
    let newer = engine.thread("203.0.113.1", "newer", None).await;

    engine
        .moderation
        .set_pinned(&admin(), older.number, true)
        .await
        .unwrap();

    let listed = engine.content.list_threads(BOARD).await.unwrap();
    assert_eq!(listed[0].number, older.number);
    assert_eq!(listed[1].number, newer.number);
}

#[tokio::test]
async fn manual_bans_can_be_lifted() {
    let engine = Engine::new();
    let ip = "198.51.100.9";

    let ban = engine
        .moderation
        .issue_ban(&admin(), ip, "", Some(Duration::hours(2)))
        .await
        .unwrap();
    assert_eq!(ban.reason, "No reason provided");
    assert_eq!(ban.admin_name, "Moderator");
    assert_eq!(
        engine.moderation.list_active_bans(&admin()).await.unwrap().len(),
        1
    );

    let captcha = engine.known_captcha(2).await;
    assert!(engine
        .moderation
        .report_post(&anon(ip), Some(&captcha), domains::PostNumber(1), "spam")
        .await
        .is_err());

    assert!(engine.moderation.remove_ban(&admin(), ban.id).await.unwrap());
    assert!(!engine.moderation.remove_ban(&admin(), ban.id).await.unwrap());

    engine.thread(ip, "reformed", None).await;
}

#[tokio::test]
async fn stats_tally_posts_and_attachments() {
    let engine = Engine::new();
    let thread = engine
        .thread("203.0.113.1", "op", Some(attachment("op.png")))
        .await;
    engine.reply("203.0.113.2", thread.number, "one", None).await;
    engine
        .reply("203.0.113.1", thread.number, "two", Some(attachment("two.png")))
        .await;

    let report = engine.stats.collect(&admin()).await.unwrap();
    let board = &report.boards[BOARD];
    assert_eq!(board.threads, 1);
    assert_eq!(board.replies, 2);
    assert_eq!(board.attachments, 2);
    assert_eq!(board.attachment_bytes, 4096);
    assert_eq!(board.distinct_posters, 2);
    assert_eq!(report.total, *board);
}
