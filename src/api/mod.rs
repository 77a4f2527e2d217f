//! Demo HTTP API wiring the middleware together

pub mod handlers;
pub mod routes;

pub use handlers::{AppState, UserClaims};
pub use routes::{build_router, Gates};
