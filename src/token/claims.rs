//! Registered JWT claims and the capability trait application claims implement

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Seconds since the Unix epoch, as carried by `exp`, `nbf` and `iat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NumericDate(i64);

impl NumericDate {
    /// Seconds since the Unix epoch
    pub fn new(secs: i64) -> Self {
        Self(secs)
    }

    /// Truncates to whole seconds
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.timestamp())
    }

    pub fn timestamp(&self) -> i64 {
        self.0
    }
}

impl Serialize for NumericDate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for NumericDate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Other issuers may emit fractional seconds.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(i64),
            Float(f64),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::Int(secs) => NumericDate(secs),
            Repr::Float(secs) => NumericDate(secs.trunc() as i64),
        })
    }
}

/// The `aud` claim: a single string on the wire when it holds one entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(Vec<String>);

impl Audience {
    /// Audience listing `entries`
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(entries.into_iter().map(Into::into).collect())
    }

    /// Whether `audience` is one of the entries
    pub fn contains(&self, audience: &str) -> bool {
        self.0.iter().any(|a| a == audience)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl Serialize for Audience {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if let [single] = self.0.as_slice() {
            return serializer.serialize_str(single);
        }
        let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
        for entry in &self.0 {
            seq.serialize_element(entry)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            One(String),
            Many(Vec<String>),
        }

        Ok(match Repr::deserialize(deserializer)? {
            Repr::One(entry) => Audience(vec![entry]),
            Repr::Many(entries) => Audience(entries),
        })
    }
}

/// The seven registered claims of RFC 7519.
///
/// Application claims embed this struct with `#[serde(flatten)]` and
/// implement [`StandardClaims`] to expose it:
///
/// ```rust
/// use gatekeeper::token::{RegisteredClaims, StandardClaims};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct UserClaims {
///     uid: i64,
///     #[serde(flatten)]
///     registered: RegisteredClaims,
/// }
///
/// impl StandardClaims for UserClaims {
///     fn registered(&self) -> &RegisteredClaims {
///         &self.registered
///     }
///
///     fn registered_mut(&mut self) -> &mut RegisteredClaims {
///         &mut self.registered
///     }
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClaims {
    #[serde(rename = "iss", default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,

    #[serde(rename = "sub", default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,

    #[serde(rename = "aud", default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<Audience>,

    #[serde(rename = "exp", default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<NumericDate>,

    #[serde(rename = "nbf", default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<NumericDate>,

    #[serde(rename = "iat", default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<NumericDate>,

    #[serde(rename = "jti", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Capability implemented by every claims type a token manager can sign.
///
/// Only the two accessors are required. The setters are what the token
/// manager uses to stamp the registered fields at generation time; an empty
/// string clears the field so it is omitted from the payload.
pub trait StandardClaims: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn registered(&self) -> &RegisteredClaims;

    fn registered_mut(&mut self) -> &mut RegisteredClaims;

    fn set_issuer(&mut self, issuer: &str) {
        self.registered_mut().issuer = non_empty(issuer);
    }

    fn set_subject(&mut self, subject: &str) {
        self.registered_mut().subject = non_empty(subject);
    }

    fn set_audience(&mut self, audience: Option<Audience>) {
        self.registered_mut().audience = audience;
    }

    fn set_expires_at(&mut self, expires_at: Option<NumericDate>) {
        self.registered_mut().expires_at = expires_at;
    }

    fn set_not_before(&mut self, not_before: Option<NumericDate>) {
        self.registered_mut().not_before = not_before;
    }

    fn set_issued_at(&mut self, issued_at: Option<NumericDate>) {
        self.registered_mut().issued_at = issued_at;
    }

    fn set_id(&mut self, id: &str) {
        self.registered_mut().id = non_empty(id);
    }
}

impl StandardClaims for RegisteredClaims {
    fn registered(&self) -> &RegisteredClaims {
        self
    }

    fn registered_mut(&mut self) -> &mut RegisteredClaims {
        self
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_claims_serialize_to_empty_object() {
        let json = serde_json::to_string(&RegisteredClaims::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_registered_claims_field_order() {
        let claims = RegisteredClaims {
            issuer: Some("gatekeeper".to_string()),
            subject: Some("42".to_string()),
            audience: Some(Audience::new(["api"])),
            expires_at: Some(NumericDate::new(20)),
            not_before: Some(NumericDate::new(5)),
            issued_at: Some(NumericDate::new(10)),
            id: Some("abc".to_string()),
        };

        let json = serde_json::to_string(&claims).unwrap();
        assert_eq!(
            json,
            r#"{"iss":"gatekeeper","sub":"42","aud":"api","exp":20,"nbf":5,"iat":10,"jti":"abc"}"#
        );
    }

    #[test]
    fn test_audience_accepts_string_or_array() {
        let one: Audience = serde_json::from_str(r#""api""#).unwrap();
        assert_eq!(one.as_slice(), ["api".to_string()]);

        let many: Audience = serde_json::from_str(r#"["api","admin"]"#).unwrap();
        assert!(many.contains("admin"));
        assert_eq!(serde_json::to_string(&many).unwrap(), r#"["api","admin"]"#);
    }

    #[test]
    fn test_numeric_date_accepts_fractional_seconds() {
        let date: NumericDate = serde_json::from_str("1695571800.75").unwrap();
        assert_eq!(date.timestamp(), 1695571800);
    }

    #[test]
    fn test_setters_clear_on_empty_string() {
        let mut claims = RegisteredClaims::default();
        claims.set_issuer("issuer");
        claims.set_id("id");
        assert_eq!(claims.issuer.as_deref(), Some("issuer"));

        claims.set_issuer("");
        claims.set_id("");
        assert!(claims.issuer.is_none());
        assert!(claims.id.is_none());
    }
}
