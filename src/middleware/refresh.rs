//! Refresh-token endpoint: trades a valid refresh token for a new access
//! token, and optionally a rotated refresh token

use super::auth::{claims_from_request, AuthMiddlewareBuilder};
use crate::token::{StandardClaims, TokenManager};
use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub const ACCESS_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-access-token");
pub const REFRESH_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-refresh-token");

/// Authenticates the refresh request; `Err` is sent back unchanged
pub type AuthHandlerFn = Arc<dyn Fn(&mut Request) -> Result<(), Response> + Send + Sync>;

/// Reads the claims the auth handler attached
pub type GetClaimsFn<C> = Arc<dyn Fn(&Request) -> Option<C> + Send + Sync>;

/// Records a freshly issued token on the response being assembled
pub type TokenSetterFn = Arc<dyn Fn(&mut IssuedTokens, &str) + Send + Sync>;

/// Turns the issued tokens into the final response
pub type ResponseFn = Arc<dyn Fn(IssuedTokens) -> Response + Send + Sync>;

/// Everything the token setters produced for one refresh
#[derive(Debug, Default, Clone)]
pub struct IssuedTokens {
    pub headers: HeaderMap,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Which body field a token goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSlot {
    Access,
    Refresh,
}

/// Setter writing the token to a response header
pub fn header_token_setter(name: HeaderName) -> TokenSetterFn {
    Arc::new(move |issued: &mut IssuedTokens, token: &str| match HeaderValue::from_str(token) {
        Ok(value) => {
            issued.headers.insert(name.clone(), value);
        }
        Err(e) => warn!(header = %name, error = %e, "Token is not a valid header value"),
    })
}

/// Setter keeping the token for a JSON body; pair with [`json_body`]
pub fn body_token_setter(slot: TokenSlot) -> TokenSetterFn {
    Arc::new(move |issued: &mut IssuedTokens, token: &str| {
        let token = Some(token.to_string());
        match slot {
            TokenSlot::Access => issued.access_token = token,
            TokenSlot::Refresh => issued.refresh_token = token,
        }
    })
}

/// Default finalizer: 204 with whatever headers the setters emitted
pub fn no_content(issued: IssuedTokens) -> Response {
    (StatusCode::NO_CONTENT, issued.headers).into_response()
}

#[derive(Serialize)]
struct TokenBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

/// Finalizer: 200 with `{"access_token": .., "refresh_token": ..}`, keeping
/// any emitted headers
pub fn json_body(issued: IssuedTokens) -> Response {
    let body = TokenBody {
        access_token: issued.access_token,
        refresh_token: issued.refresh_token,
    };
    (StatusCode::OK, issued.headers, Json(body)).into_response()
}

/// A named mutation applied by [`RefreshManager::with_options`]
pub enum RefreshOption<C> {
    /// Also issue a new refresh token; off by default
    RotateRefreshToken(bool),
    RefreshAuthHandler(AuthHandlerFn),
    GetClaims(GetClaimsFn<C>),
    AccessTokenSetter(TokenSetterFn),
    RefreshTokenSetter(TokenSetterFn),
    ResponseSetter(ResponseFn),
}

impl<C> RefreshOption<C> {
    /// Wrap a closure as [`RefreshOption::RefreshAuthHandler`]
    pub fn auth_handler<F>(handler: F) -> Self
    where
        F: Fn(&mut Request) -> Result<(), Response> + Send + Sync + 'static,
    {
        RefreshOption::RefreshAuthHandler(Arc::new(handler))
    }

    /// Wrap a closure as [`RefreshOption::GetClaims`]
    pub fn get_claims<F>(getter: F) -> Self
    where
        F: Fn(&Request) -> Option<C> + Send + Sync + 'static,
    {
        RefreshOption::GetClaims(Arc::new(getter))
    }

    /// Wrap a closure as [`RefreshOption::ResponseSetter`]
    pub fn response<F>(finalize: F) -> Self
    where
        F: Fn(IssuedTokens) -> Response + Send + Sync + 'static,
    {
        RefreshOption::ResponseSetter(Arc::new(finalize))
    }

    /// Deliver both tokens in a JSON body instead of headers
    pub fn json_tokens() -> [Self; 3] {
        [
            RefreshOption::AccessTokenSetter(body_token_setter(TokenSlot::Access)),
            RefreshOption::RefreshTokenSetter(body_token_setter(TokenSlot::Refresh)),
            RefreshOption::ResponseSetter(Arc::new(json_body)),
        ]
    }
}

/// Issues new tokens for a request carrying a valid refresh token
pub struct RefreshManager<C> {
    access: Arc<dyn TokenManager<C>>,
    refresh: Arc<dyn TokenManager<C>>,
    rotate_refresh_token: bool,
    refresh_auth: AuthHandlerFn,
    get_claims: GetClaimsFn<C>,
    access_setter: TokenSetterFn,
    refresh_setter: TokenSetterFn,
    respond: ResponseFn,
}

impl<C> Clone for RefreshManager<C> {
    fn clone(&self) -> Self {
        Self {
            access: Arc::clone(&self.access),
            refresh: Arc::clone(&self.refresh),
            rotate_refresh_token: self.rotate_refresh_token,
            refresh_auth: Arc::clone(&self.refresh_auth),
            get_claims: Arc::clone(&self.get_claims),
            access_setter: Arc::clone(&self.access_setter),
            refresh_setter: Arc::clone(&self.refresh_setter),
            respond: Arc::clone(&self.respond),
        }
    }
}

impl<C: StandardClaims> RefreshManager<C> {
    /// Defaults: no rotation, refresh tokens checked by an authenticator
    /// over `refresh`, claims read from the request extensions, tokens
    /// returned in `x-access-token`/`x-refresh-token` with a 204
    pub fn new(access: Arc<dyn TokenManager<C>>, refresh: Arc<dyn TokenManager<C>>) -> Self {
        let authenticator = AuthMiddlewareBuilder::new(Arc::clone(&refresh)).build();

        Self {
            access,
            refresh,
            rotate_refresh_token: false,
            refresh_auth: Arc::new(move |req: &mut Request| authenticator.check(req)),
            get_claims: Arc::new(claims_from_request::<C>),
            access_setter: header_token_setter(ACCESS_TOKEN_HEADER),
            refresh_setter: header_token_setter(REFRESH_TOKEN_HEADER),
            respond: Arc::new(no_content),
        }
    }

    /// Copy with `options` applied; `self` is left untouched
    pub fn with_options(&self, options: impl IntoIterator<Item = RefreshOption<C>>) -> Self {
        let mut manager = self.clone();
        for option in options {
            match option {
                RefreshOption::RotateRefreshToken(rotate) => manager.rotate_refresh_token = rotate,
                RefreshOption::RefreshAuthHandler(handler) => manager.refresh_auth = handler,
                RefreshOption::GetClaims(getter) => manager.get_claims = getter,
                RefreshOption::AccessTokenSetter(setter) => manager.access_setter = setter,
                RefreshOption::RefreshTokenSetter(setter) => manager.refresh_setter = setter,
                RefreshOption::ResponseSetter(respond) => manager.respond = respond,
            }
        }
        manager
    }

    /// Whether a new refresh token is issued alongside the access token
    pub fn rotates_refresh_token(&self) -> bool {
        self.rotate_refresh_token
    }

    /// Run one refresh
    pub fn handle(&self, mut req: Request) -> Response {
        if let Err(rejection) = (self.refresh_auth)(&mut req) {
            return rejection;
        }

        let Some(claims) = (self.get_claims)(&req) else {
            error!("Refresh request authenticated but no claims were attached");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        };

        let mut issued = IssuedTokens::default();

        let access_token = match self.access.generate_token(claims.clone()) {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Failed to generate access token");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };
        (self.access_setter)(&mut issued, &access_token);

        if self.rotate_refresh_token {
            match self.refresh.generate_token(claims) {
                Ok(token) => (self.refresh_setter)(&mut issued, &token),
                Err(e) => {
                    error!(error = %e, "Failed to generate refresh token");
                    return (StatusCode::INTERNAL_SERVER_ERROR, issued.headers).into_response();
                }
            }
        }

        debug!(rotated = self.rotate_refresh_token, "Tokens refreshed");
        (self.respond)(issued)
    }
}

/// Axum handler for the refresh endpoint.
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/refresh-token", post(refresh_handler::<UserClaims>))
///     .with_state(refresh_manager);
/// ```
pub async fn refresh_handler<C: StandardClaims>(
    State(manager): State<RefreshManager<C>>,
    req: Request,
) -> Response {
    manager.handle(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{access_manager, body_string, refresh_manager, FailingManager, UserClaims};
    use axum::{body::Body, http::header::AUTHORIZATION, routing::post, Router};
    use tower::ServiceExt;

    fn manager() -> RefreshManager<UserClaims> {
        RefreshManager::<UserClaims>::new(Arc::new(access_manager()), Arc::new(refresh_manager()))
    }

    fn app(manager: RefreshManager<UserClaims>) -> Router {
        Router::new()
            .route("/refresh-token", post(refresh_handler::<UserClaims>))
            .with_state(manager)
    }

    fn refresh_request(bearer: Option<&str>) -> Request {
        let mut builder = Request::builder().method("POST").uri("/refresh-token");
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn refresh_token(uid: i64) -> String {
        refresh_manager().generate_token(UserClaims::new(uid)).unwrap()
    }

    fn header(response: &Response, name: &str) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    #[tokio::test]
    async fn test_refresh_issues_access_token() {
        let response = app(manager())
            .oneshot(refresh_request(Some(&refresh_token(1))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(header(&response, "x-refresh-token").is_none());

        let access = header(&response, "x-access-token").unwrap();
        let claims: UserClaims = access_manager().verify_token(&access).unwrap();
        assert_eq!(claims.uid, 1);
        let as_refresh: Result<UserClaims, _> = refresh_manager().verify_token(&access);
        assert!(as_refresh.is_err());
    }

    #[tokio::test]
    async fn test_rotation_issues_both_tokens() {
        let manager = manager().with_options([RefreshOption::RotateRefreshToken(true)]);

        let response = app(manager)
            .oneshot(refresh_request(Some(&refresh_token(7))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let access = header(&response, "x-access-token").unwrap();
        let refresh = header(&response, "x-refresh-token").unwrap();

        let access_claims: UserClaims = access_manager().verify_token(&access).unwrap();
        let refresh_claims: UserClaims = refresh_manager().verify_token(&refresh).unwrap();
        assert_eq!(access_claims.uid, 7);
        assert_eq!(refresh_claims.uid, 7);
    }

    #[tokio::test]
    async fn test_with_options_is_copy_on_write() {
        let base = manager();
        let rotating = base.with_options([RefreshOption::RotateRefreshToken(true)]);

        assert!(!base.rotates_refresh_token());
        assert!(rotating.rotates_refresh_token());
    }

    #[tokio::test]
    async fn test_rejections_never_generate() {
        let access = Arc::new(FailingManager::new(access_manager()));
        let manager = RefreshManager::<UserClaims>::new(access.clone(), Arc::new(refresh_manager()));
        let access_token = access_manager().generate_token(UserClaims::new(1)).unwrap();

        for bearer in [None, Some("garbage"), Some(access_token.as_str())] {
            let response = app(manager.clone())
                .oneshot(refresh_request(bearer))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "bearer {:?}", bearer);
            assert!(header(&response, "x-access-token").is_none());
        }
        assert_eq!(access.generate_calls(), 0);
    }

    #[tokio::test]
    async fn test_custom_rejection_passes_through() {
        let manager = manager().with_options([RefreshOption::auth_handler(|_: &mut Request| {
            Err((StatusCode::FORBIDDEN, "refresh disabled").into_response())
        })]);

        let response = app(manager)
            .oneshot(refresh_request(Some(&refresh_token(1))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_string(response).await, "refresh disabled");
    }

    #[tokio::test]
    async fn test_missing_claims_is_internal_error() {
        let manager = manager().with_options([RefreshOption::get_claims(|_: &Request| None)]);

        let response = app(manager)
            .oneshot(refresh_request(Some(&refresh_token(1))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(header(&response, "x-access-token").is_none());
    }

    #[tokio::test]
    async fn test_access_generation_failure() {
        let access = Arc::new(FailingManager::new(access_manager()));
        let manager = RefreshManager::<UserClaims>::new(access, Arc::new(refresh_manager()));

        let response = app(manager)
            .oneshot(refresh_request(Some(&refresh_token(1))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(header(&response, "x-access-token").is_none());
    }

    #[tokio::test]
    async fn test_rotation_failure_keeps_access_header() {
        let refresh = Arc::new(FailingManager::new(refresh_manager()));
        let manager = RefreshManager::<UserClaims>::new(Arc::new(access_manager()), refresh)
            .with_options([RefreshOption::RotateRefreshToken(true)]);

        let response = app(manager)
            .oneshot(refresh_request(Some(&refresh_token(1))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(header(&response, "x-access-token").is_some());
        assert!(header(&response, "x-refresh-token").is_none());
    }

    #[tokio::test]
    async fn test_json_body_delivery() {
        let mut options = vec![RefreshOption::RotateRefreshToken(true)];
        options.extend(RefreshOption::json_tokens());
        let manager = manager().with_options(options);

        let response = app(manager)
            .oneshot(refresh_request(Some(&refresh_token(3))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, "x-access-token").is_none());

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let access = body["access_token"].as_str().unwrap();
        let refresh = body["refresh_token"].as_str().unwrap();
        let claims: UserClaims = access_manager().verify_token(access).unwrap();
        assert_eq!(claims.uid, 3);
        let claims: UserClaims = refresh_manager().verify_token(refresh).unwrap();
        assert_eq!(claims.uid, 3);
    }

    #[test]
    fn test_body_setter_and_finalizers() {
        let mut issued = IssuedTokens::default();
        body_token_setter(TokenSlot::Access)(&mut issued, "a.b.c");
        header_token_setter(ACCESS_TOKEN_HEADER)(&mut issued, "a.b.c");

        assert_eq!(issued.access_token.as_deref(), Some("a.b.c"));
        assert!(issued.refresh_token.is_none());

        let response = no_content(issued);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()["x-access-token"], "a.b.c");
    }
}
