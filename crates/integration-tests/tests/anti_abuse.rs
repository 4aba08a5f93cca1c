use chrono::{Duration, Utc};
use domains::{
    AppError, Ban, BanId, BanRepository, CaptchaAnswer, Denial, NewThread, ThreadRepository,
};
use integration_tests::{anon, Engine, BOARD};
use services::{Action, GatePolicy};

fn submission(comment: &str) -> NewThread {
    NewThread {
        board: BOARD.into(),
        comment: comment.into(),
        ..NewThread::default()
    }
}

fn ban(ip: &str, expires_in: Option<Duration>) -> Ban {
    let now = Utc::now();
    Ban {
        id: BanId::new(),
        ip: ip.into(),
        reason: "spam".into(),
        admin_name: "Moderator".into(),
        issued_at: now - Duration::hours(1),
        expires_at: expires_in.map(|d| now + d),
        active: true,
    }
}

fn is_captcha_failure(err: &AppError) -> bool {
    matches!(err, AppError::Denied(Denial::CaptchaFailed { .. }))
}

#[tokio::test]
async fn active_ban_denies_before_the_captcha_is_touched() {
    let engine = Engine::new();
    let ip = "198.51.100.1";
    BanRepository::insert(&*engine.store, ban(ip, None))
        .await
        .unwrap();

    let captcha = engine.known_captcha(11).await;
    let err = engine
        .posting
        .create_thread(&anon(ip), Some(&captcha), submission("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Denied(Denial::Banned(_))));

    // The challenge is still live for an innocent caller.
    engine
        .gate
        .check(Action::CreateThread, &anon("198.51.100.2"), Some(&captcha))
        .await
        .unwrap();
}

#[tokio::test]
async fn expired_ban_allows_and_is_marked_inactive() {
    let engine = Engine::new();
    let ip = "198.51.100.3";
    let expired = ban(ip, Some(Duration::minutes(-5)));
    BanRepository::insert(&*engine.store, expired.clone())
        .await
        .unwrap();

    let captcha = engine.known_captcha(4).await;
    engine
        .posting
        .create_thread(&anon(ip), Some(&captcha), submission("back again"))
        .await
        .unwrap();

    let stored = BanRepository::get(&*engine.store, expired.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.active);
}

#[tokio::test]
async fn a_captcha_validates_only_once() {
    let engine = Engine::new();
    let captcha = engine.known_captcha(9).await;

    engine
        .posting
        .create_thread(&anon("203.0.113.9"), Some(&captcha), submission("first"))
        .await
        .unwrap();
    let replay = engine
        .posting
        .create_thread(&anon("203.0.113.9"), Some(&captcha), submission("second"))
        .await
        .unwrap_err();

    assert!(is_captcha_failure(&replay));
    assert_eq!(
        ThreadRepository::list_by_board(&*engine.store, BOARD)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn issued_challenges_round_trip_through_the_service() {
    let engine = Engine::new();
    let prompt = engine.captcha.issue().await.unwrap();
    let parts: Vec<&str> = prompt.question.split_whitespace().collect();
    let (a, b): (i64, i64) = (parts[0].parse().unwrap(), parts[2].parse().unwrap());
    let answer = if parts[1] == "+" { a + b } else { a - b };

    let wrong = CaptchaAnswer {
        token: prompt.token.clone(),
        answer: answer + 1,
    };
    let err = engine
        .gate
        .check(Action::SubmitReport, &anon("203.0.113.70"), Some(&wrong))
        .await
        .unwrap_err();
    assert!(is_captcha_failure(&err));

    // A wrong answer burns the token.
    let right = CaptchaAnswer {
        token: prompt.token,
        answer,
    };
    assert!(engine
        .gate
        .check(Action::SubmitReport, &anon("203.0.113.70"), Some(&right))
        .await
        .is_err());
}

#[tokio::test]
async fn five_failures_issue_exactly_one_ban() {
    let engine = Engine::with_policy(GatePolicy::default());
    let ip = "198.51.100.50";

    for attempt in 1..=5 {
        let captcha = engine.known_captcha(20).await;
        let wrong = CaptchaAnswer {
            answer: 21,
            ..captcha
        };
        let err = engine
            .posting
            .create_thread(&anon(ip), Some(&wrong), submission("spam"))
            .await
            .unwrap_err();
        match err {
            AppError::Denied(Denial::CaptchaFailed { auto_banned, .. }) => {
                assert_eq!(auto_banned, attempt == 5, "attempt {attempt}");
            }
            other => panic!("unexpected error on attempt {attempt}: {other:?}"),
        }
    }

    let bans = engine.store.find_active_by_ip(ip).await.unwrap();
    assert_eq!(bans.len(), 1);
    assert!(bans[0].expires_at.is_some());

    // Sixth attempt stops at the ban check and issues nothing new.
    let captcha = engine.known_captcha(20).await;
    let sixth = engine
        .posting
        .create_thread(
            &anon(ip),
            Some(&CaptchaAnswer {
                answer: 99,
                ..captcha.clone()
            }),
            submission("spam"),
        )
        .await
        .unwrap_err();
    assert!(matches!(sixth, AppError::Denied(Denial::Banned(_))));
    assert_eq!(engine.store.find_active_by_ip(ip).await.unwrap().len(), 1);

    // The ban check ran first, so the sixth challenge was never consumed.
    engine
        .gate
        .check(Action::CreateThread, &anon("198.51.100.51"), Some(&captcha))
        .await
        .unwrap();
}

#[tokio::test]
async fn failures_outside_the_window_do_not_accumulate() {
    let engine = Engine::with_policy(GatePolicy {
        captcha_failure_threshold: 2,
        captcha_failure_window: Duration::zero(),
        ..GatePolicy::default()
    });
    let ip = "198.51.100.60";

    for _ in 0..3 {
        let captcha = engine.known_captcha(1).await;
        let wrong = CaptchaAnswer {
            answer: 2,
            ..captcha
        };
        let _ = engine
            .gate
            .check(Action::CreateReply, &anon(ip), Some(&wrong))
            .await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert!(engine.store.find_active_by_ip(ip).await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_challenge_clears_exactly_one_racing_request() {
    let engine = Engine::new();
    let captcha = engine.known_captcha(13).await;

    let handles: Vec<_> = (0..16)
        .map(|n| {
            let gate = engine.gate.clone();
            let captcha = captcha.clone();
            tokio::spawn(async move {
                let caller = anon(&format!("203.0.113.{}", 100 + n));
                gate.check(Action::CreateThread, &caller, Some(&captcha))
                    .await
                    .is_ok()
            })
        })
        .collect();

    let mut cleared = 0;
    for handle in handles {
        if handle.await.unwrap() {
            cleared += 1;
        }
    }
    assert_eq!(cleared, 1);
}
