//! Authentication middleware

use crate::error::TokenError;
use crate::token::{StandardClaims, TokenManager};
use axum::{
    async_trait,
    extract::{FromRequestParts, MatchedPath, Request, State},
    http::{header::AUTHORIZATION, request::Parts, Extensions, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

const BEARER_PREFIX: &str = "Bearer ";

/// Decides whether a request skips authentication
pub type IgnorePathFn = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Pulls the raw token out of a request
pub type ExtractTokenFn = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// Stores verified claims where downstream handlers can find them
pub type SetClaimsFn<C> = Arc<dyn Fn(&mut Request, C) + Send + Sync>;

/// Extension slot holding verified claims. Private so only this module's
/// helpers can read or write it.
#[derive(Clone)]
struct ClaimsSlot<C>(C);

/// Attach claims to the request extensions
pub fn insert_claims<C: StandardClaims>(req: &mut Request, claims: C) {
    req.extensions_mut().insert(ClaimsSlot(claims));
}

/// Claims attached by [`insert_claims`], if any
pub fn claims_from_request<C: StandardClaims>(req: &Request) -> Option<C> {
    claims_from_extensions(req.extensions())
}

/// Claims attached by [`insert_claims`], read from bare extensions
pub fn claims_from_extensions<C: StandardClaims>(extensions: &Extensions) -> Option<C> {
    extensions.get::<ClaimsSlot<C>>().map(|slot| slot.0.clone())
}

/// Read attached claims from anything carrying request extensions
pub trait ClaimsExt {
    fn claims<C: StandardClaims>(&self) -> Option<C>;
}

impl<B> ClaimsExt for axum::http::Request<B> {
    fn claims<C: StandardClaims>(&self) -> Option<C> {
        claims_from_extensions(self.extensions())
    }
}

impl ClaimsExt for Parts {
    fn claims<C: StandardClaims>(&self) -> Option<C> {
        claims_from_extensions(&self.extensions)
    }
}

/// Token from an `Authorization: Bearer <token>` header.
///
/// The scheme must match exactly; a missing header, another scheme or an
/// empty token all yield `None`.
pub fn bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER_PREFIX)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Why a request was refused
#[derive(Debug, Clone, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication is required but no token provided")]
    MissingToken,

    #[error("Invalid authentication token: {0}")]
    InvalidToken(#[from] TokenError),
}

/// Result of running the authenticator over one request
#[derive(Debug)]
pub enum AuthOutcome<C> {
    /// Path is exempt; nothing was extracted or verified
    Exempt,
    Rejected(AuthError),
    /// Claims were verified and attached to the request
    Authenticated(C),
}

/// Builder for an [`Authenticator`]
pub struct AuthMiddlewareBuilder<C> {
    ignore_path: IgnorePathFn,
    extract_token: ExtractTokenFn,
    set_claims: SetClaimsFn<C>,
    manager: Arc<dyn TokenManager<C>>,
}

impl<C: StandardClaims> AuthMiddlewareBuilder<C> {
    /// Defaults: nothing is exempt, bearer extraction, claims stored in the
    /// request extensions
    pub fn new(manager: Arc<dyn TokenManager<C>>) -> Self {
        Self {
            ignore_path: Arc::new(|_| false),
            extract_token: Arc::new(bearer_token),
            set_claims: Arc::new(insert_claims::<C>),
            manager,
        }
    }

    /// Exempt requests for which `ignore` returns true
    pub fn ignore_path_fn<F>(mut self, ignore: F) -> Self
    where
        F: Fn(&Request) -> bool + Send + Sync + 'static,
    {
        self.ignore_path = Arc::new(ignore);
        self
    }

    /// Exempt exact request paths, e.g. `/login`
    pub fn ignore_paths<I, S>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let paths: HashSet<String> = paths.into_iter().map(Into::into).collect();
        self.ignore_path_fn(move |req| paths.contains(req.uri().path()))
    }

    /// Exempt matched route templates, e.g. `/user/:id`
    pub fn ignore_full_paths<I, S>(self, routes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let routes: HashSet<String> = routes.into_iter().map(Into::into).collect();
        self.ignore_path_fn(move |req| {
            req.extensions()
                .get::<MatchedPath>()
                .is_some_and(|matched| routes.contains(matched.as_str()))
        })
    }

    /// Replace bearer-header extraction
    pub fn extract_token_fn<F>(mut self, extract: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        self.extract_token = Arc::new(extract);
        self
    }

    /// Replace how claims are attached. Anything reading them back, such as
    /// a refresh manager's claims getter, must be changed to match.
    pub fn set_claims_fn<F>(mut self, set: F) -> Self
    where
        F: Fn(&mut Request, C) + Send + Sync + 'static,
    {
        self.set_claims = Arc::new(set);
        self
    }

    /// Freeze the builder into a cloneable authenticator
    pub fn build(self) -> Authenticator<C> {
        Authenticator {
            inner: Arc::new(self),
        }
    }
}

/// Verifies bearer tokens and attaches their claims to the request
pub struct Authenticator<C> {
    inner: Arc<AuthMiddlewareBuilder<C>>,
}

impl<C> Clone for Authenticator<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: StandardClaims> Authenticator<C> {
    /// Run one authentication attempt; no retries
    pub fn authenticate(&self, req: &mut Request) -> AuthOutcome<C> {
        let inner = &self.inner;

        if (inner.ignore_path)(req) {
            debug!(path = %req.uri().path(), "Authentication skipped for exempt path");
            return AuthOutcome::Exempt;
        }

        let token = match (inner.extract_token)(req) {
            Some(token) if !token.is_empty() => token,
            _ => {
                warn!(path = %req.uri().path(), "Missing authentication token");
                return AuthOutcome::Rejected(AuthError::MissingToken);
            }
        };

        match inner.manager.verify_token(&token) {
            Ok(claims) => {
                (inner.set_claims)(req, claims.clone());
                debug!(path = %req.uri().path(), "Authentication successful");
                AuthOutcome::Authenticated(claims)
            }
            Err(e) => {
                warn!(path = %req.uri().path(), error = %e, "Invalid authentication token");
                AuthOutcome::Rejected(AuthError::InvalidToken(e))
            }
        }
    }

    /// Like [`Authenticator::authenticate`], with rejection rendered as a
    /// bare 401
    pub fn check(&self, req: &mut Request) -> Result<(), Response> {
        match self.authenticate(req) {
            AuthOutcome::Rejected(_) => Err(StatusCode::UNAUTHORIZED.into_response()),
            AuthOutcome::Exempt | AuthOutcome::Authenticated(_) => Ok(()),
        }
    }
}

/// Authentication middleware.
///
/// ```rust,ignore
/// let auth = AuthMiddlewareBuilder::<UserClaims>::new(manager)
///     .ignore_full_paths(["/login"])
///     .build();
/// let app = Router::new()
///     .route("/profile", get(profile))
///     .layer(axum::middleware::from_fn_with_state(auth, require_auth::<UserClaims>));
/// ```
pub async fn require_auth<C: StandardClaims>(
    State(auth): State<Authenticator<C>>,
    mut req: Request,
    next: Next,
) -> Response {
    match auth.check(&mut req) {
        Ok(()) => next.run(req).await,
        Err(rejection) => rejection,
    }
}

/// Extractor for claims attached by the default claims setter
#[derive(Debug, Clone)]
pub struct Claims<C>(pub C);

#[async_trait]
impl<S, C> FromRequestParts<S> for Claims<C>
where
    S: Send + Sync,
    C: StandardClaims,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        claims_from_extensions(&parts.extensions)
            .map(Claims)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}
