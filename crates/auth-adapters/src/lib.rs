//! crates/auth-adapters/src/lib.rs
//!
//! Identity providers for administrator sessions.

#[cfg(feature = "auth-jwt")]
pub mod jwt;

#[cfg(feature = "auth-jwt")]
pub use jwt::{hash_password, AdminAccount, JwtIdentityProvider};
