//! Construction options for [`JwtManager`](super::JwtManager) and
//! per-call verification options

use super::manager::{IdFn, JwtManager, TimeFn};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::sync::Arc;
use std::time::Duration;

/// A named mutation applied to a cloned [`JwtManager`]
#[derive(Clone)]
pub enum ManagerOption {
    /// Key used to verify signatures; defaults to the signing secret
    DecryptKey(DecodingKey),
    /// Signing algorithm; defaults to HS256
    Algorithm(Algorithm),
    /// Value stamped into `iss`; empty means omitted
    Issuer(String),
    /// Generator for `jti`; defaults to an empty ID
    IdGenerator(IdFn),
    /// Clock used both to stamp and to check token lifetimes
    Clock(TimeFn),
}

impl ManagerOption {
    /// Verify with a different HMAC secret than the one used to sign
    pub fn decrypt_secret(secret: impl AsRef<[u8]>) -> Self {
        ManagerOption::DecryptKey(DecodingKey::from_secret(secret.as_ref()))
    }

    /// Stamp `iss` on generated tokens
    pub fn issuer(issuer: impl Into<String>) -> Self {
        ManagerOption::Issuer(issuer.into())
    }

    /// Stamp `jti` from `generate` on generated tokens
    pub fn id_generator<F>(generate: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        ManagerOption::IdGenerator(Arc::new(generate))
    }

    /// Random v4 UUIDs as token IDs
    pub fn uuid_ids() -> Self {
        Self::id_generator(|| uuid::Uuid::new_v4().to_string())
    }

    /// Read the current time from `now`
    pub fn clock<F>(now: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        ManagerOption::Clock(Arc::new(now))
    }

    /// Pins the clock, which makes generated tokens deterministic
    pub fn fixed_time(at: DateTime<Utc>) -> Self {
        Self::clock(move || at)
    }

    pub(crate) fn apply(self, manager: &mut JwtManager) {
        match self {
            ManagerOption::DecryptKey(key) => manager.decryption_key = key,
            ManagerOption::Algorithm(algorithm) => manager.algorithm = algorithm,
            ManagerOption::Issuer(issuer) => manager.issuer = issuer,
            ManagerOption::IdGenerator(generate) => manager.gen_id = generate,
            ManagerOption::Clock(now) => manager.now = now,
        }
    }
}

impl std::fmt::Debug for ManagerOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerOption::DecryptKey(_) => f.write_str("DecryptKey(<redacted>)"),
            ManagerOption::Algorithm(algorithm) => write!(f, "Algorithm({:?})", algorithm),
            ManagerOption::Issuer(issuer) => write!(f, "Issuer({:?})", issuer),
            ManagerOption::IdGenerator(_) => f.write_str("IdGenerator(..)"),
            ManagerOption::Clock(_) => f.write_str("Clock(..)"),
        }
    }
}

/// Extra checks applied by a single verification call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOption {
    /// Clock skew tolerated on `exp` and `nbf`
    Leeway(Duration),
    /// Required `iss`
    Issuer(String),
    /// Required entry in `aud`
    Audience(String),
    /// Required `sub`
    Subject(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SECRET: &str = "sign key";
    const EXPIRE: Duration = Duration::from_secs(600);

    fn nop() -> Vec<ManagerOption> {
        Vec::new()
    }

    #[test]
    fn test_with_algorithm() {
        let cases = [
            (nop(), Algorithm::HS256),
            (vec![ManagerOption::Algorithm(Algorithm::HS384)], Algorithm::HS384),
        ];

        for (options, want) in cases {
            let manager = JwtManager::new_with(SECRET, EXPIRE, options);
            assert_eq!(manager.algorithm(), want);
        }
    }

    #[test]
    fn test_with_issuer() {
        let cases = [(nop(), ""), (vec![ManagerOption::issuer("foo")], "foo")];

        for (options, want) in cases {
            let manager = JwtManager::new_with(SECRET, EXPIRE, options);
            assert_eq!(manager.issuer(), want);
        }
    }

    #[test]
    fn test_with_id_generator() {
        let cases = [
            (nop(), ""),
            (vec![ManagerOption::id_generator(|| "unique id".to_string())], "unique id"),
        ];

        for (options, want) in cases {
            let manager = JwtManager::new_with(SECRET, EXPIRE, options);
            assert_eq!((manager.gen_id)(), want);
        }
    }

    #[test]
    fn test_uuid_ids_are_unique() {
        let manager = JwtManager::new_with(SECRET, EXPIRE, [ManagerOption::uuid_ids()]);
        let first = (manager.gen_id)();
        let second = (manager.gen_id)();
        assert_eq!(first.len(), 36);
        assert_ne!(first, second);
    }

    #[test]
    fn test_with_clock() {
        let at = Utc.timestamp_millis_opt(1_695_571_200_000).unwrap();
        let manager = JwtManager::new_with(SECRET, EXPIRE, [ManagerOption::fixed_time(at)]);
        assert_eq!(manager.now().timestamp_millis(), 1_695_571_200_000);
    }

    #[test]
    fn test_debug_redacts_keys() {
        let option = ManagerOption::decrypt_secret("super secret");
        assert_eq!(format!("{:?}", option), "DecryptKey(<redacted>)");
    }
}
