//! Shared fixtures for unit tests

use crate::error::TokenError;
use crate::token::{JwtManager, ManagerOption, TokenManager, VerifyOption};
use axum::response::Response;
use chrono::{TimeZone, Utc};
use http_body_util::BodyExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) use crate::api::UserClaims;

/// 2023-09-24T16:00:00Z
pub(crate) const NOW_MILLIS: i64 = 1_695_571_200_000;

fn fixed_clock() -> ManagerOption {
    ManagerOption::fixed_time(Utc.timestamp_millis_opt(NOW_MILLIS).unwrap())
}

pub(crate) fn access_manager() -> JwtManager {
    JwtManager::new_with("access key", Duration::from_secs(600), [fixed_clock()])
}

pub(crate) fn refresh_manager() -> JwtManager {
    JwtManager::new_with("refresh key", Duration::from_secs(24 * 60 * 60), [fixed_clock()])
}

pub(crate) async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Delegates to a real manager and counts verifications
pub(crate) struct CountingManager {
    inner: JwtManager,
    verify_calls: AtomicUsize,
}

impl CountingManager {
    pub(crate) fn new(inner: JwtManager) -> Self {
        Self {
            inner,
            verify_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }
}

impl TokenManager<UserClaims> for CountingManager {
    fn generate_token(&self, claims: UserClaims) -> Result<String, TokenError> {
        self.inner.generate_token(claims)
    }

    fn verify_token_with(&self, token: &str, options: &[VerifyOption]) -> Result<UserClaims, TokenError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.verify_token_with(token, options)
    }
}

/// Verifies like a real manager but cannot issue tokens
pub(crate) struct FailingManager {
    inner: JwtManager,
    generate_calls: AtomicUsize,
}

impl FailingManager {
    pub(crate) fn new(inner: JwtManager) -> Self {
        Self {
            inner,
            generate_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }
}

impl TokenManager<UserClaims> for FailingManager {
    fn generate_token(&self, _claims: UserClaims) -> Result<String, TokenError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        Err(TokenError::Generation("signing backend unavailable".to_string()))
    }

    fn verify_token_with(&self, token: &str, options: &[VerifyOption]) -> Result<UserClaims, TokenError> {
        self.inner.verify_token_with(token, options)
    }
}
