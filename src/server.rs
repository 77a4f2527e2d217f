//! Server assembly: builds the demo application from configuration and runs it

use crate::api::{build_router, AppState, Gates, UserClaims};
use crate::config::Config;
use crate::error::{GateError, Result};
use crate::limiter::{BucketLimiter, LocalActiveLimiter, SlidingWindowLimiter, TokenBucketLimiter};
use crate::middleware::{
    ActiveLimitBuilder, AuthMiddlewareBuilder, BucketLimitBuilder, RateLimitBuilder,
    RefreshManager, RefreshOption,
};
use crate::middleware::refresh::header_token_setter;
use crate::shutdown::ShutdownCoordinator;
use crate::token::{JwtManager, ManagerOption};
use axum::{
    http::{HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use secrecy::ExposeSecret;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

/// The assembled application plus the limiters that own background work
pub struct App {
    router: Router,
    window: Option<Arc<SlidingWindowLimiter>>,
    login_bucket: Option<Arc<TokenBucketLimiter>>,
}

impl App {
    /// Build everything the configuration describes.
    ///
    /// Must run inside a tokio runtime: the login bucket starts its refill
    /// task here.
    pub fn from_config(config: &Config) -> Result<Self> {
        let jwt = &config.jwt;
        let access_header = header_name(&jwt.access_header)?;
        let refresh_header = header_name(&jwt.refresh_header)?;

        let manager_options = || {
            [
                ManagerOption::issuer(jwt.issuer.clone()),
                ManagerOption::uuid_ids(),
            ]
        };
        let access = Arc::new(JwtManager::new_with(
            jwt.access_key.expose_secret(),
            jwt.access_expire(),
            manager_options(),
        ));
        let refresh = Arc::new(JwtManager::new_with(
            jwt.refresh_key.expose_secret(),
            jwt.refresh_expire(),
            manager_options(),
        ));

        let auth = AuthMiddlewareBuilder::<UserClaims>::new(access.clone())
            .ignore_paths(jwt.ignore_paths.iter().cloned())
            .build();

        let refresh_manager = RefreshManager::<UserClaims>::new(access.clone(), refresh.clone())
            .with_options([
                RefreshOption::RotateRefreshToken(jwt.rotate_refresh_token),
                RefreshOption::AccessTokenSetter(header_token_setter(access_header.clone())),
                RefreshOption::RefreshTokenSetter(header_token_setter(refresh_header.clone())),
            ]);

        let mut gates = Gates::default();
        let mut window = None;
        let mut login_bucket = None;

        let limits = &config.rate_limit;
        if limits.enabled {
            let sliding = Arc::new(SlidingWindowLimiter::new(limits.window(), limits.max_requests));
            gates.rate = Some(RateLimitBuilder::new(sliding.clone()).build());
            window = Some(sliding);

            let active = Arc::new(LocalActiveLimiter::new(limits.max_active));
            gates.active = Some(ActiveLimitBuilder::new(active).build());

            let bucket = Arc::new(TokenBucketLimiter::new(
                limits.login_bucket_capacity,
                limits.login_refill_interval(),
            ));
            gates.login = Some(
                BucketLimitBuilder::new(bucket.clone())
                    .blocking(limits.login_block_timeout())
                    .build(),
            );
            login_bucket = Some(bucket);

            info!(
                window_ms = limits.window_millis,
                max_requests = limits.max_requests,
                max_active = limits.max_active,
                "Rate limiting enabled"
            );
        } else {
            info!("Rate limiting is disabled");
        }

        let state = AppState {
            access,
            refresh,
            access_header,
            refresh_header,
        };

        let router = build_router(
            state,
            auth,
            refresh_manager,
            gates,
            config.server.max_body_size_mb * 1024 * 1024,
        );

        Ok(Self {
            router,
            window,
            login_bucket,
        })
    }

    /// Router without connect info, for in-memory use
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then stop background limiter work
    pub async fn serve(self, addr: SocketAddr, shutdown: &ShutdownCoordinator) -> Result<()> {
        if let Some(window) = &self.window {
            window.clone().start_cleanup_task(shutdown.subscribe());
        }

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GateError::Internal(format!("Failed to bind {}: {}", addr, e)))?;
        info!("Server listening on {}", addr);

        let notifier = shutdown.subscribe();
        axum::serve(
            listener,
            self.router
                .clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { notifier.wait().await })
        .await
        .map_err(|e| GateError::Internal(format!("Server error: {}", e)))?;

        if let Some(bucket) = &self.login_bucket {
            bucket.close();
        }
        info!("Server shutdown complete");
        Ok(())
    }
}

fn header_name(name: &str) -> Result<HeaderName> {
    HeaderName::try_from(name)
        .map_err(|_| GateError::Config(format!("Invalid token header name '{}'", name)))
}

/// Application error wrapper
pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Request failed");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
