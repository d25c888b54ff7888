//! Device onboarding
//!
//! This module handles:
//! - Fetching the verification code from the connect page
//! - Registering the code and polling for the channel token
//! - Persisting the token between runs
//!
//! The state machine lives in the shared crate; the `Agent` drives it with
//! the pieces defined here.

mod api;
mod code;
mod token;

pub use api::{DeviceStatusResponse, OnboardingApi, OnboardingError, ReqwestOnboardingApi};
pub use code::extract_verification_code;
pub use token::TokenStore;

use async_trait::async_trait;
use std::time::Duration;

/// Timer seam so retry waits can be observed in tests
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Shorten a token for log output
pub fn redact_token(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    if prefix.len() < token.len() {
        format!("{}…", prefix)
    } else {
        "***".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_token() {
        assert_eq!(redact_token("eyJhbGciOiJIUzI1NiJ9.payload"), "eyJhbG…");
        assert_eq!(redact_token("short"), "***");
    }
}
