//! # JWT identity provider
//!
//! Administrators are a fixed list of accounts with argon2 password hashes.
//! A successful sign-in yields an HS256 token carrying a unique `jti`;
//! sign-out revokes that id until the token would have expired anyway.

use std::collections::HashMap;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;
use domains::{AdminIdentity, AppError, Denial, IdentityProvider, Result, SessionToken};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// A configured administrator.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminAccount {
    pub email: String,
    pub display_name: String,
    /// PHC string as produced by [`hash_password`].
    pub password_hash: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    jti: String,
    iat: i64,
    exp: i64,
}

pub struct JwtIdentityProvider {
    accounts: HashMap<String, AdminAccount>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    session_ttl: Duration,
    /// Revoked token ids mapped to their expiry (unix seconds).
    revoked: DashMap<String, i64>,
}

impl JwtIdentityProvider {
    pub fn new(secret: &[u8], accounts: Vec<AdminAccount>, session_ttl: Duration) -> Self {
        let accounts = accounts
            .into_iter()
            .map(|account| (account.email.trim().to_lowercase(), account))
            .collect();
        Self {
            accounts,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            session_ttl,
            revoked: DashMap::new(),
        }
    }

    fn decode_claims(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Some(data.claims),
            Err(err) => {
                debug!(error = %err, "session token rejected");
                None
            }
        }
    }

    fn prune_revoked(&self) {
        let now = Utc::now().timestamp();
        self.revoked.retain(|_, exp| *exp > now);
    }
}

fn unauthorized() -> AppError {
    AppError::Denied(Denial::Unauthorized)
}

/// Hashes a password into a PHC string for the admin list.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes()).map_err(AppError::internal)?;
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(AppError::internal)
}

fn verify_password(password: &str, hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(p) => p,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<SessionToken> {
        let key = email.trim().to_lowercase();
        let Some(account) = self.accounts.get(&key).cloned() else {
            info!("sign-in for unknown administrator");
            return Err(unauthorized());
        };

        let password = password.to_string();
        let hash = account.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(AppError::internal)?;
        if !verified {
            warn!(email = %key, "administrator sign-in failed");
            return Err(unauthorized());
        }

        let now = Utc::now();
        let claims = Claims {
            sub: key.clone(),
            name: account.display_name,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + self.session_ttl).timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(AppError::internal)?;

        info!(email = %key, "administrator signed in");
        Ok(SessionToken(token))
    }

    async fn sign_out(&self, session: &SessionToken) -> Result<()> {
        self.prune_revoked();
        if let Some(claims) = self.decode_claims(session.as_str()) {
            self.revoked.insert(claims.jti, claims.exp);
            info!(email = %claims.sub, "administrator signed out");
        }
        Ok(())
    }

    async fn resolve_admin(&self, session: &SessionToken) -> Result<Option<AdminIdentity>> {
        let Some(claims) = self.decode_claims(session.as_str()) else {
            return Ok(None);
        };
        if self.revoked.contains_key(&claims.jti) {
            return Ok(None);
        }
        Ok(self.accounts.get(&claims.sub).map(|account| AdminIdentity {
            email: claims.sub.clone(),
            display_name: account.display_name.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> JwtIdentityProvider {
        let account = AdminAccount {
            email: "Admin@FireChan.test".into(),
            display_name: "Admin".into(),
            password_hash: hash_password("hunter2").unwrap(),
        };
        JwtIdentityProvider::new(b"test-secret", vec![account], Duration::hours(1))
    }

    #[tokio::test]
    async fn sign_in_resolve_and_sign_out() {
        let auth = provider();
        let token = auth.sign_in("admin@firechan.test", "hunter2").await.unwrap();

        let admin = auth.resolve_admin(&token).await.unwrap().unwrap();
        assert_eq!(admin.email, "admin@firechan.test");
        assert_eq!(admin.display_name, "Admin");

        auth.sign_out(&token).await.unwrap();
        assert!(auth.resolve_admin(&token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_are_unauthorized() {
        let auth = provider();
        for (email, password) in [("admin@firechan.test", "nope"), ("who@firechan.test", "hunter2")] {
            let err = auth.sign_in(email, password).await.unwrap_err();
            assert!(matches!(err, AppError::Denied(Denial::Unauthorized)));
        }
    }

    #[tokio::test]
    async fn foreign_or_garbage_tokens_resolve_to_nobody() {
        let auth = provider();
        let other = JwtIdentityProvider::new(
            b"other-secret",
            vec![AdminAccount {
                email: "admin@firechan.test".into(),
                display_name: "Admin".into(),
                password_hash: hash_password("hunter2").unwrap(),
            }],
            Duration::hours(1),
        );
        let forged = other.sign_in("admin@firechan.test", "hunter2").await.unwrap();

        assert!(auth.resolve_admin(&forged).await.unwrap().is_none());
        assert!(auth
            .resolve_admin(&SessionToken("garbage".into()))
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("pw").unwrap();
        let b = hash_password("pw").unwrap();
        assert_ne!(a, b);
        assert!(verify_password("pw", &a));
        assert!(!verify_password("pw2", &a));
    }
}
