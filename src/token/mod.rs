//! Token generation and verification

pub mod claims;
pub mod manager;
pub mod options;

pub use claims::{Audience, NumericDate, RegisteredClaims, StandardClaims};
pub use manager::{IdFn, JwtManager, TimeFn, TokenManager};
pub use options::{ManagerOption, VerifyOption};

pub use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
