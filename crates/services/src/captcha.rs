//! One-time arithmetic challenges.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use domains::{CaptchaChallenge, CaptchaRepository, Result};
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// What the client sees: never the answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptchaPrompt {
    pub token: String,
    pub question: String,
    pub expires_at: DateTime<Utc>,
}

pub struct CaptchaService {
    captchas: Arc<dyn CaptchaRepository>,
    ttl: Duration,
}

impl CaptchaService {
    pub fn new(captchas: Arc<dyn CaptchaRepository>, ttl: Duration) -> Self {
        Self { captchas, ttl }
    }

    #[instrument(skip(self))]
    pub async fn issue(&self) -> Result<CaptchaPrompt> {
        let (question, answer) = generate_problem(&mut rand::thread_rng());
        let now = Utc::now();
        let challenge = CaptchaChallenge {
            token: Uuid::new_v4().simple().to_string(),
            question,
            answer,
            issued_at: now,
            expires_at: now + self.ttl,
            consumed: false,
        };
        let prompt = CaptchaPrompt {
            token: challenge.token.clone(),
            question: challenge.question.clone(),
            expires_at: challenge.expires_at,
        };
        self.captchas.insert(challenge).await?;
        debug!(token = %prompt.token, "captcha issued");
        Ok(prompt)
    }

    /// Deletes every challenge past its expiry. Returns how many went.
    pub async fn sweep_expired(&self) -> Result<u64> {
        let removed = self.captchas.delete_expired(Utc::now()).await?;
        if removed > 0 {
            info!(removed, "expired captchas swept");
        }
        Ok(removed)
    }
}

/// Addition of two numbers in 1..=20, or a subtraction that stays positive.
pub fn generate_problem<R: Rng + ?Sized>(rng: &mut R) -> (String, i64) {
    if rng.gen_bool(0.5) {
        let a = rng.gen_range(1..=20);
        let b = rng.gen_range(1..=20);
        (format!("{a} + {b} ="), a + b)
    } else {
        let a = rng.gen_range(10..=39);
        let b = rng.gen_range(1..a);
        (format!("{a} - {b} ="), a - b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domains::MockCaptchaRepository;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn problems_have_positive_answers_matching_the_question() {
        let mut rng = rand::thread_rng();
        for _ in 0..500 {
            let (question, answer) = generate_problem(&mut rng);
            assert!(answer > 0, "{question}");
            let parts: Vec<&str> = question.split_whitespace().collect();
            let a: i64 = parts[0].parse().unwrap();
            let b: i64 = parts[2].parse().unwrap();
            let expected = if parts[1] == "+" { a + b } else { a - b };
            assert_eq!(expected, answer);
            assert_eq!(parts[3], "=");
        }
    }

    #[tokio::test]
    async fn issue_stores_challenge_with_ttl() {
        let mut repo = MockCaptchaRepository::new();
        repo.expect_insert()
            .withf(|c| {
                !c.consumed
                    && c.token.len() == 32
                    && c.expires_at - c.issued_at == Duration::minutes(5)
            })
            .times(1)
            .returning(|_| Ok(()));

        let service = CaptchaService::new(Arc::new(repo), Duration::minutes(5));
        let prompt = assert_ok!(service.issue().await);
        assert!(prompt.question.ends_with('='));
    }

    #[tokio::test]
    async fn issue_fails_when_the_store_does() {
        let mut repo = MockCaptchaRepository::new();
        repo.expect_insert()
            .returning(|_| Err(domains::AppError::internal("store offline")));

        let service = CaptchaService::new(Arc::new(repo), Duration::minutes(5));
        assert_err!(service.issue().await);
    }

    #[tokio::test]
    async fn sweep_reports_removed_count() {
        let mut repo = MockCaptchaRepository::new();
        repo.expect_delete_expired().returning(|_| Ok(3));
        let service = CaptchaService::new(Arc::new(repo), Duration::minutes(5));
        assert_eq!(service.sweep_expired().await.unwrap(), 3);
    }
}
