//! API request handlers

use axum::{
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::middleware::Claims;
use crate::server::AppError;
use crate::token::{JwtManager, RegisteredClaims, StandardClaims, TokenManager};

/// Claims carried by the demo server's tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserClaims {
    pub uid: i64,
    #[serde(flatten)]
    pub registered: RegisteredClaims,
}

impl UserClaims {
    /// Claims for `uid` with no registered fields set
    pub fn new(uid: i64) -> Self {
        Self {
            uid,
            registered: RegisteredClaims::default(),
        }
    }
}

impl StandardClaims for UserClaims {
    fn registered(&self) -> &RegisteredClaims {
        &self.registered
    }

    fn registered_mut(&mut self) -> &mut RegisteredClaims {
        &mut self.registered
    }
}

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub access: Arc<JwtManager>,
    pub refresh: Arc<JwtManager>,
    pub access_header: HeaderName,
    pub refresh_header: HeaderName,
}

/// Login request. Credentials are not checked; the demo trusts `uid`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub uid: i64,
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub uid: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// Issue an access and a refresh token in response headers
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let access_token = state.access.generate_token(UserClaims::new(req.uid))?;
    let refresh_token = state.refresh.generate_token(UserClaims::new(req.uid))?;

    let mut headers = HeaderMap::new();
    headers.insert(state.access_header.clone(), HeaderValue::from_str(&access_token)?);
    headers.insert(state.refresh_header.clone(), HeaderValue::from_str(&refresh_token)?);

    info!(uid = req.uid, "User logged in");
    Ok((StatusCode::NO_CONTENT, headers))
}

/// Return the caller's claims
pub async fn profile(Claims(user): Claims<UserClaims>) -> Json<ProfileResponse> {
    Json(ProfileResponse {
        uid: user.uid,
        expires_at: user.registered.expires_at.map(|exp| exp.timestamp()),
    })
}

/// Root handler
pub async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "gatekeeper",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Liveness probe, always 200
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "alive"})))
}
