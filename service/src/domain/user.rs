//! User-related definitions.

use std::{str::FromStr, sync::LazyLock};

use derive_more::{AsRef, Display, From, Into};
use regex::Regex;
use secrecy::{zeroize::Zeroize, CloneableSecret};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque user representation returned by the upstream provider.
///
/// An order-preserving string-keyed map passed through unmodified end-to-end:
/// nothing in this system assumes specific keys, except the optional identity
/// fields inspected by [`Payload::identity()`] for session trimming.
#[derive(Clone, Debug, Default, Deserialize, Eq, From, Into, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    /// Identity keys recognized for session trimming, alongside the
    /// [`Identity`] field each one feeds.
    const IDENTITY_KEYS: [&'static str; 3] = ["_id", "id", "email"];

    /// Extracts the trim-matching [`Identity`] out of this [`Payload`].
    #[must_use]
    pub fn identity(&self) -> Identity {
        let mut keys = Self::IDENTITY_KEYS
            .iter()
            .map(|key| self.0.get(*key).filter(|v| is_non_empty(v)).cloned());
        Identity {
            internal_id: keys.next().flatten(),
            external_id: keys.next().flatten(),
            email: keys.next().flatten(),
        }
    }

    /// Indicates whether this [`Payload`] carries no fields at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Indicates whether the provided [`Value`] is meaningful as an identity key.
fn is_non_empty(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(true) => true,
    }
}

/// Identity keys of a user, used to match sessions belonging to the same
/// person across logins.
///
/// Each field is the raw upstream-provided value, compared for exact
/// equality against stored [`Payload`] snapshots.
#[derive(Clone, Debug, Default)]
pub struct Identity {
    /// Store-internal ID of the user (the `_id` payload field).
    pub internal_id: Option<Value>,

    /// External ID of the user (the `id` payload field).
    pub external_id: Option<Value>,

    /// Email address of the user (the `email` payload field).
    pub email: Option<Value>,
}

impl Identity {
    /// Indicates whether this [`Identity`] carries no recognized keys, making
    /// session trimming impossible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.internal_id.is_none()
            && self.external_id.is_none()
            && self.email.is_none()
    }
}

/// Email address of a user, as accepted by the upstream provider.
#[derive(AsRef, Clone, Debug, Display, Eq, PartialEq)]
#[as_ref(str, String)]
pub struct Email(String);

impl Email {
    /// Creates a new [`Email`] if the given `address` is valid.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Option<Self> {
        let address = address.into();
        Self::check(&address).then_some(Self(address))
    }

    /// Checks whether the given `address` is a valid [`Email`].
    fn check(address: impl AsRef<str>) -> bool {
        /// Regular expression checking [`Email`] format.
        static REGEX: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(
                "^([^\\x00-\\x20\\x22\\x28\\x29\\x2c\\x2e\\x3a-\
                     \\x3c\\x3e\\x40\\x5b-\\x5d\\x7f-\\xff]+\
                  |\\x22([^\\x0d\\x22\\x5c\\x80-\\xff]\
                  |\\x5c[\\x00-\\x7f])*\\x22)\
                  (\\x2e([^\\x00-\\x20\\x22\\x28\\x29\\x2c\\x2e\\x3a-\
                           \\x3c\\x3e\\x40\\x5b-\\x5d\\x7f-\\xff]+\
                        |\\x22([^\\x0d\\x22\\x5c\\x80-\\xff]\
                        |\\x5c[\\x00-\\x7f])*\\x22))*\\x40\
                  ([^\\x00-\\x20\\x22\\x28\\x29\\x2c\\x2e\\x3a-\
                     \\x3c\\x3e\\x40\\x5b-\\x5d\\x7f-\\xff]+\
                  |\\x5b([^\\x0d\\x5b-\\x5d\\x80-\\xff]\
                        |\\x5c[\\x00-\\x7f])*\\x5d)\
                  (\\x2e([^\\x00-\\x20\\x22\\x28\\x29\\x2c\\x2e\\x3a-\
                           \\x3c\\x3e\\x40\\x5b-\\x5d\\x7f-\\xff]+\
                  |\\x5b([^\\x0d\\x5b-\\x5d\\x80-\\xff]\
                        |\\x5c[\\x00-\\x7f])*\\x5d))*$",
            )
            .expect("valid regex")
        });

        REGEX.is_match(address.as_ref())
    }
}

impl FromStr for Email {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `Email`")
    }
}

/// Password of a user, sent to the upstream provider over TLS and never
/// stored.
#[derive(Clone, Debug, Display, Eq, From, PartialEq)]
#[from(&str, String)]
pub struct Password(String);

impl Password {
    /// Creates a new [`Password`] if the given `password` is valid.
    #[must_use]
    pub fn new(password: impl Into<String>) -> Option<Self> {
        let password = password.into();
        Self::check(&password).then_some(Self(password))
    }

    /// Checks whether the given `password` is a valid [`Password`].
    fn check(password: impl AsRef<str>) -> bool {
        let password = password.as_ref();
        password.len() >= 8 && password.len() <= 128
    }
}

impl AsRef<str> for Password {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Password {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or("invalid `Password`")
    }
}

impl CloneableSecret for Password {}
impl Zeroize for Password {
    fn zeroize(&mut self) {
        self.0.zeroize();
    }
}

#[cfg(test)]
mod spec {
    use serde_json::json;

    use super::Payload;

    fn payload(value: serde_json::Value) -> Payload {
        Payload::from(value.as_object().unwrap().clone())
    }

    #[test]
    fn extracts_identity_keys() {
        let identity = payload(json!({
            "_id": "663bd2",
            "id": 42,
            "email": "a@b.com",
            "name": "irrelevant",
        }))
        .identity();

        assert_eq!(identity.internal_id, Some(json!("663bd2")));
        assert_eq!(identity.external_id, Some(json!(42)));
        assert_eq!(identity.email, Some(json!("a@b.com")));
    }

    #[test]
    fn skips_empty_identity_values() {
        let identity = payload(json!({
            "_id": "",
            "id": null,
            "email": "a@b.com",
        }))
        .identity();

        assert!(identity.internal_id.is_none());
        assert!(identity.external_id.is_none());
        assert_eq!(identity.email, Some(json!("a@b.com")));
    }

    #[test]
    fn identity_of_an_anonymous_payload_is_empty() {
        assert!(payload(json!({"name": "no identity here"}))
            .identity()
            .is_empty());
        assert!(Payload::default().identity().is_empty());
    }

    #[test]
    fn preserves_field_order() {
        let payload = payload(json!({
            "zeta": 1,
            "alpha": 2,
            "mid": 3,
        }));

        let keys =
            serde_json::Map::from(payload).keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }
}
