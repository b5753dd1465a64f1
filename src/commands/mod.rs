//! Command dispatch.
//!
//! Turns incoming messages into observer fan-out or authorized,
//! rate-limited command execution.

mod context;
mod handler;
mod rate_limiter;
mod types;

pub use context::{CommandContext, ReplyOptions, ReplyTo, escape_html};
pub use handler::{CommandHandler, DispatchOutcome};
pub use rate_limiter::{
    RateDecision, RateLimitConfig, RateLimiter, RateLimiterStats, rate_limit_key,
};
pub use types::{CommandLine, ParsedCommand};
