//! API route configuration

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{self, AppState, UserClaims};
use crate::middleware::{
    active_limit, bucket_limit, rate_limit, refresh_handler, require_auth, ActiveGate,
    Authenticator, BucketGate, RateGate, RefreshManager,
};

/// Rate limiting gates; `None` leaves the layer out
#[derive(Clone, Default)]
pub struct Gates {
    /// Per-IP sliding window over every route
    pub rate: Option<RateGate>,
    /// Global in-flight cap over every route
    pub active: Option<ActiveGate>,
    /// Token bucket in front of `/login`
    pub login: Option<BucketGate>,
}

/// Build the complete API router with middleware
pub fn build_router(
    app_state: AppState,
    auth: Authenticator<UserClaims>,
    refresh: RefreshManager<UserClaims>,
    gates: Gates,
    max_body_size: usize,
) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::root_handler))
        .route("/health", get(handlers::health_handler));

    let mut login_routes = Router::new().route("/login", post(handlers::login));
    if let Some(gate) = gates.login {
        login_routes = login_routes.route_layer(axum::middleware::from_fn_with_state(gate, bucket_limit));
    }
    let login_routes = login_routes.with_state(app_state);

    let refresh_routes = Router::new()
        .route("/refresh-token", post(refresh_handler::<UserClaims>))
        .with_state(refresh);

    let protected_routes = Router::new().route("/profile", get(handlers::profile));

    // Exempt paths are configured on the authenticator itself
    let mut router = public_routes
        .merge(login_routes)
        .merge(refresh_routes)
        .merge(protected_routes)
        .layer(axum::middleware::from_fn_with_state(auth, require_auth::<UserClaims>));

    if max_body_size > 0 {
        router = router.layer(RequestBodyLimitLayer::new(max_body_size));
    }
    if let Some(gate) = gates.active {
        router = router.layer(axum::middleware::from_fn_with_state(gate, active_limit));
    }
    if let Some(gate) = gates.rate {
        router = router.layer(axum::middleware::from_fn_with_state(gate, rate_limit));
    }

    router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}
