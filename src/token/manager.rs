//! JWT token manager: signs claims into compact tokens and verifies them back

use super::claims::{NumericDate, RegisteredClaims, StandardClaims};
use super::options::{ManagerOption, VerifyOption};
use crate::error::TokenError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Validation};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Clock consulted when stamping and checking token lifetimes
pub type TimeFn = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Generator for the `jti` claim
pub type IdFn = Arc<dyn Fn() -> String + Send + Sync>;

/// Issues and verifies tokens for a claims type `C`
pub trait TokenManager<C>: Send + Sync {
    /// Stamp the registered fields onto `claims` and sign them
    fn generate_token(&self, claims: C) -> Result<String, TokenError>;

    /// Verify signature and lifetime, plus any extra `options`
    fn verify_token_with(&self, token: &str, options: &[VerifyOption]) -> Result<C, TokenError>;

    fn verify_token(&self, token: &str) -> Result<C, TokenError> {
        self.verify_token_with(token, &[])
    }
}

/// JOSE header, serialized in the same field order as other JWT stacks
#[derive(Serialize)]
struct Header {
    alg: Algorithm,
    typ: &'static str,
}

/// Token manager backed by `jsonwebtoken`.
///
/// Configuration is immutable: [`JwtManager::with_options`] returns a
/// reconfigured copy and leaves `self` untouched, so one manager can be
/// shared across requests without locking.
#[derive(Clone)]
pub struct JwtManager {
    pub(crate) encryption_key: EncodingKey,
    pub(crate) decryption_key: DecodingKey,
    pub(crate) algorithm: Algorithm,
    pub(crate) expire: Duration,
    pub(crate) issuer: String,
    pub(crate) gen_id: IdFn,
    pub(crate) now: TimeFn,
}

impl JwtManager {
    /// Create an HMAC manager; HS256 by default, verify key = signing secret
    pub fn new(secret: impl AsRef<[u8]>, expire: Duration) -> Self {
        let secret = secret.as_ref();
        Self {
            encryption_key: EncodingKey::from_secret(secret),
            decryption_key: DecodingKey::from_secret(secret),
            algorithm: Algorithm::HS256,
            expire,
            issuer: String::new(),
            gen_id: Arc::new(String::new),
            now: Arc::new(Utc::now),
        }
    }

    /// [`JwtManager::new`] followed by [`JwtManager::with_options`]
    pub fn new_with(
        secret: impl AsRef<[u8]>,
        expire: Duration,
        options: impl IntoIterator<Item = ManagerOption>,
    ) -> Self {
        Self::new(secret, expire).with_options(options)
    }

    /// Create a manager from an explicit key pair, e.g. RS256 or ES256 PEM keys
    pub fn from_keys(
        encryption_key: EncodingKey,
        decryption_key: DecodingKey,
        algorithm: Algorithm,
        expire: Duration,
    ) -> Self {
        Self {
            encryption_key,
            decryption_key,
            algorithm,
            expire,
            issuer: String::new(),
            gen_id: Arc::new(String::new),
            now: Arc::new(Utc::now),
        }
    }

    /// Copy of this manager with `options` applied in order
    pub fn with_options(&self, options: impl IntoIterator<Item = ManagerOption>) -> Self {
        let mut manager = self.clone();
        for option in options {
            option.apply(&mut manager);
        }
        manager
    }

    /// Signing and verification algorithm
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Lifetime stamped into `exp` on generation
    pub fn expire(&self) -> Duration {
        self.expire
    }

    /// Issuer stamped into `iss`; empty means omitted
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Current time according to the configured clock
    pub fn now(&self) -> DateTime<Utc> {
        (self.now)()
    }

    fn check_lifetime(&self, claims: &RegisteredClaims, leeway: Duration) -> Result<(), TokenError> {
        let now = self.now();
        // A leeway past the representable range admits every lifetime.
        let leeway = chrono::Duration::from_std(leeway).ok();
        let earliest = leeway.and_then(|skew| now.checked_sub_signed(skew));
        let latest = leeway.and_then(|skew| now.checked_add_signed(skew));

        // exp and nbf are whole seconds, so flooring `now` keeps the comparison exact.
        if let (Some(exp), Some(earliest)) = (claims.expires_at, earliest) {
            if earliest.timestamp() >= exp.timestamp() {
                return Err(TokenError::Expired);
            }
        }
        if let (Some(nbf), Some(latest)) = (claims.not_before, latest) {
            if latest.timestamp() < nbf.timestamp() {
                return Err(TokenError::NotYetValid);
            }
        }
        Ok(())
    }
}

impl<C: StandardClaims> TokenManager<C> for JwtManager {
    fn generate_token(&self, mut claims: C) -> Result<String, TokenError> {
        let now = self.now();
        let expires_at = chrono::Duration::from_std(self.expire)
            .ok()
            .and_then(|expire| now.checked_add_signed(expire))
            .ok_or_else(|| {
                TokenError::Generation(format!("expiry of {:?} is out of range", self.expire))
            })?;

        claims.set_issuer(&self.issuer);
        claims.set_expires_at(Some(NumericDate::from_datetime(expires_at)));
        claims.set_issued_at(Some(NumericDate::from_datetime(now)));
        claims.set_id(&(self.gen_id)());

        let header = encode_segment(&Header {
            alg: self.algorithm,
            typ: "JWT",
        })?;
        let payload = encode_segment(&claims)?;
        let message = format!("{}.{}", header, payload);

        let signature = jsonwebtoken::crypto::sign(message.as_bytes(), &self.encryption_key, self.algorithm)
            .map_err(|e| TokenError::Generation(e.to_string()))?;

        Ok(format!("{}.{}", message, signature))
    }

    fn verify_token_with(&self, token: &str, options: &[VerifyOption]) -> Result<C, TokenError> {
        if token.split('.').count() != 3 {
            return Err(TokenError::Malformed(
                "token contains an invalid number of segments".to_string(),
            ));
        }
        jsonwebtoken::decode_header(token).map_err(|e| TokenError::Malformed(e.to_string()))?;

        // Lifetime is checked below against our own clock.
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let claims = jsonwebtoken::decode::<C>(token, &self.decryption_key, &validation)
            .map_err(classify)?
            .claims;

        let mut leeway = Duration::ZERO;
        for option in options {
            if let VerifyOption::Leeway(skew) = option {
                leeway = *skew;
            }
        }
        self.check_lifetime(claims.registered(), leeway)?;

        for option in options {
            check_expectation(claims.registered(), option)?;
        }

        debug!("Token verified");
        Ok(claims)
    }
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("algorithm", &self.algorithm)
            .field("expire", &self.expire)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value).map_err(|e| TokenError::Generation(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn check_expectation(claims: &RegisteredClaims, option: &VerifyOption) -> Result<(), TokenError> {
    match option {
        VerifyOption::Leeway(_) => Ok(()),
        VerifyOption::Issuer(want) if claims.issuer.as_deref() != Some(want.as_str()) => {
            Err(TokenError::InvalidClaim("iss"))
        }
        VerifyOption::Subject(want) if claims.subject.as_deref() != Some(want.as_str()) => {
            Err(TokenError::InvalidClaim("sub"))
        }
        VerifyOption::Audience(want) if !claims.audience.as_ref().is_some_and(|aud| aud.contains(want)) => {
            Err(TokenError::InvalidClaim("aud"))
        }
        _ => Ok(()),
    }
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidSignature
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::InvalidAlgorithmName
        | ErrorKind::InvalidKeyFormat => TokenError::SignatureInvalid,
        ErrorKind::ExpiredSignature => TokenError::Expired,
        ErrorKind::ImmatureSignature => TokenError::NotYetValid,
        ErrorKind::Json(e) if e.is_data() => TokenError::ClaimsTypeMismatch(e.to_string()),
        _ => TokenError::Malformed(err.to_string()),
    }
}
