//! crates/services/src/lib.rs
//!
//! The posting-and-moderation engine. Services depend only on the ports in
//! `domains`; adapters are injected at startup.

pub mod allocator;
pub mod captcha;
pub mod content;
pub mod gate;
pub mod moderation;
pub mod posting;
pub mod render;
pub mod stats;
pub mod utils;

pub use allocator::{Allocation, IdentifierAllocator, RetryPolicy, POST_COUNTER};
pub use captcha::{CaptchaPrompt, CaptchaService};
pub use content::{CascadeSummary, ContentService, ThreadView};
pub use gate::{Action, AntiAbuseGate, Clearance, GatePolicy};
pub use moderation::{ModerationService, Resolution, ResolveAction};
pub use posting::{PostReceipt, PostingLimits, PostingService};
pub use render::{extract_references, TextRenderer};
pub use stats::{BoardStats, StatsReport, StatsService};
