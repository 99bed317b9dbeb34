//! Derived bearer [`Token`] definitions and its wire codec.

use std::fmt::Write as _;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
#[cfg(doc)]
use common::DateTime;
use common::{datetime, unit, DateTimeOf};
use derive_more::{AsRef, Display, Error, From, Into};
use hmac::{Hmac, Mac as _};
use rand::RngCore as _;
use secrecy::{ExposeSecret as _, SecretString};
use sha2::{Digest as _, Sha256};
use subtle::ConstantTimeEq as _;

use super::Id;

/// HMAC-SHA256 instance signing derived [`Token`]s.
type HmacSha256 = Hmac<Sha256>;

/// Derived bearer token in its wire form:
/// `sessionId.issuedAt.nonce.signature`.
///
/// The signature is computed over the `sessionId.issuedAt.nonce` payload
/// concatenated with the upstream token the session held at mint time, so a
/// derived [`Token`] is bound to that specific upstream token value: rotating
/// the upstream token invalidates the [`Token`] without any revocation step.
#[derive(AsRef, Clone, Debug, From, Into)]
#[as_ref(str, String)]
pub struct Token(String);

impl Token {
    /// Number of random bytes in a [`Token`] nonce.
    const NONCE_LENGTH: usize = 16;

    /// Mints a new [`Token`] for the provided session, bound to the provided
    /// upstream token value.
    #[must_use]
    pub fn build(
        session_id: &Id,
        upstream_token: &str,
        issued_at: IssuedAtDateTime,
        secret: &SecretString,
    ) -> Self {
        let mut nonce = [0u8; Self::NONCE_LENGTH];
        rand::thread_rng().fill_bytes(&mut nonce);

        let payload = format!(
            "{session_id}.{issued_at}.{nonce}",
            issued_at = issued_at.to_rfc3339(),
            nonce = hex(&nonce),
        );
        let signature =
            sign(&payload, upstream_token, secret.expose_secret());

        Self(format!("{payload}.{signature}"))
    }

    /// Returns the [`Hash`] of this [`Token`], as kept by the session store.
    #[must_use]
    pub fn hash(&self) -> Hash {
        Hash(hex(&Sha256::digest(self.0.as_bytes())))
    }

    /// Parses this [`Token`] into its [`Parsed`] form without verifying the
    /// signature.
    ///
    /// # Errors
    ///
    /// Errors if this [`Token`] doesn't follow the
    /// `sessionId.issuedAt.nonce.signature` wire format.
    pub fn parse(&self) -> Result<Parsed, ParseError> {
        use ParseError as E;

        let segments = self.0.split('.').collect::<Vec<_>>();
        if segments.len() < 4 {
            return Err(E::TooFewSegments);
        }

        let session_id = segments[0];
        let signature = segments[segments.len() - 1];
        let nonce = segments[segments.len() - 2];
        // `issuedAt` text may itself contain `.` (fractional seconds), so
        // everything between the first and the two trailing segments belongs
        // to it.
        let issued_at_text = segments[1..segments.len() - 2].join(".");

        if session_id.is_empty()
            || issued_at_text.is_empty()
            || nonce.is_empty()
            || signature.is_empty()
        {
            return Err(E::EmptySegment);
        }

        let issued_at = DateTimeOf::from_iso8601(&issued_at_text)
            .map_err(E::InvalidIssuedAt)?;

        Ok(Parsed {
            session_id: Id::from(session_id.to_owned()),
            issued_at,
            payload: format!("{session_id}.{issued_at_text}.{nonce}"),
            nonce: nonce.to_owned(),
            signature: signature.to_owned(),
        })
    }

    /// Verifies this [`Token`] against the provided upstream token value and
    /// signing secret, returning its [`Parsed`] form on success.
    ///
    /// The signature is recomputed from the *current* upstream token, so a
    /// [`Token`] minted against a rotated-away upstream token fails here.
    ///
    /// # Errors
    ///
    /// Errors if this [`Token`] is malformed, belongs to another session than
    /// the `expected_session_id` one, or carries a signature not matching the
    /// provided upstream token and secret.
    pub fn verify(
        &self,
        upstream_token: &str,
        secret: &SecretString,
        expected_session_id: Option<&Id>,
    ) -> Result<Parsed, ValidationError> {
        use ValidationError as E;

        let parsed = self.parse()?;

        if let Some(expected) = expected_session_id {
            if parsed.session_id != *expected {
                return Err(E::SessionIdMismatch);
            }
        }

        let expected_signature = sign(
            &parsed.payload,
            upstream_token,
            secret.expose_secret(),
        );
        if parsed
            .signature
            .as_bytes()
            .ct_eq(expected_signature.as_bytes())
            .unwrap_u8()
            != 1
        {
            return Err(E::SignatureMismatch);
        }

        Ok(parsed)
    }
}

/// Parsed form of a derived [`Token`].
#[derive(Clone, Debug)]
pub struct Parsed {
    /// [`Id`] of the session this [`Token`] belongs to.
    pub session_id: Id,

    /// [`DateTime`] when this [`Token`] was issued.
    pub issued_at: IssuedAtDateTime,

    /// Hex-encoded random nonce of this [`Token`].
    pub nonce: String,

    /// Signature of this [`Token`].
    pub signature: String,

    /// Exact payload text the signature was computed over, preserved
    /// byte-for-byte from the wire form.
    pub payload: String,
}

/// One-way [`Hash`] of a full derived [`Token`] string.
///
/// Kept by the session store instead of the [`Token`] itself and used for
/// the storage-equality check, independent of signature verification.
#[derive(AsRef, Clone, Debug, Eq, From, Into, PartialEq)]
#[as_ref(str, String)]
pub struct Hash(String);

/// Error of parsing a [`Token`] from its wire form.
#[derive(Clone, Copy, Debug, Display, Error)]
pub enum ParseError {
    /// [`Token`] contains less than 4 `.`-separated segments.
    #[display("derived token must contain at least 4 `.`-separated segments")]
    TooFewSegments,

    /// [`Token`] contains an empty segment.
    #[display("derived token contains an empty segment")]
    EmptySegment,

    /// [`Token`] carries an issuance timestamp not parseable as ISO 8601.
    #[display("derived token carries an invalid issuance timestamp: {_0}")]
    InvalidIssuedAt(datetime::ParseError),
}

/// Error of verifying a [`Token`].
#[derive(Clone, Copy, Debug, Display, Error, From)]
pub enum ValidationError {
    /// [`Token`] is malformed.
    #[display("{_0}")]
    Parse(ParseError),

    /// [`Token`] belongs to another session.
    #[display("derived token doesn't belong to the expected session")]
    SessionIdMismatch,

    /// Signature of the [`Token`] doesn't match the upstream token and
    /// secret it's checked against.
    #[display("derived token signature is invalid")]
    SignatureMismatch,
}

/// [`DateTime`] when a [`Token`] was issued.
pub type IssuedAtDateTime = DateTimeOf<(Token, unit::Issuance)>;

/// Computes a [`Token`] signature over the provided payload bound to the
/// provided upstream token value.
fn sign(payload: &str, upstream_token: &str, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.as_bytes());
    mac.update(upstream_token.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Encodes the provided bytes as a lowercase hex string.
fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut out, byte| {
            _ = write!(out, "{byte:02x}");
            out
        },
    )
}

#[cfg(test)]
mod spec {
    use secrecy::SecretString;

    use super::{
        Id, IssuedAtDateTime, ParseError, Token, ValidationError,
    };

    fn secret() -> SecretString {
        SecretString::from("test-signing-secret".to_owned())
    }

    #[test]
    fn round_trips_through_build_and_verify() {
        let id = Id::generate();
        let issued_at = IssuedAtDateTime::now();
        let token = Token::build(&id, "upstream-token", issued_at, &secret());

        let parsed = token
            .verify("upstream-token", &secret(), Some(&id))
            .unwrap();

        assert_eq!(parsed.session_id, id);
        assert_eq!(parsed.issued_at, issued_at);
        assert_eq!(
            parsed.payload,
            format!(
                "{id}.{}.{}",
                issued_at.to_rfc3339(),
                parsed.nonce
            ),
        );
    }

    #[test]
    fn is_bound_to_the_upstream_token_value() {
        let id = Id::generate();
        let token = Token::build(
            &id,
            "upstream-a",
            IssuedAtDateTime::now(),
            &secret(),
        );

        assert!(matches!(
            token.verify("upstream-b", &secret(), None),
            Err(ValidationError::SignatureMismatch),
        ));
    }

    #[test]
    fn rejects_a_wrong_secret() {
        let token = Token::build(
            &Id::generate(),
            "upstream-token",
            IssuedAtDateTime::now(),
            &secret(),
        );

        assert!(matches!(
            token.verify(
                "upstream-token",
                &SecretString::from("other-secret".to_owned()),
                None,
            ),
            Err(ValidationError::SignatureMismatch),
        ));
    }

    #[test]
    fn rejects_an_unexpected_session_id() {
        let token = Token::build(
            &Id::generate(),
            "upstream-token",
            IssuedAtDateTime::now(),
            &secret(),
        );

        assert!(matches!(
            token.verify(
                "upstream-token",
                &secret(),
                Some(&Id::generate()),
            ),
            Err(ValidationError::SessionIdMismatch),
        ));
    }

    #[test]
    fn any_flipped_character_fails_verification() {
        let token = Token::build(
            &Id::generate(),
            "upstream-token",
            IssuedAtDateTime::now(),
            &secret(),
        );
        let text: &str = token.as_ref();

        for pos in 0..text.len() {
            let original = text.as_bytes()[pos] as char;
            let flipped = if original == 'x' { 'y' } else { 'x' };
            let mut tampered = String::with_capacity(text.len());
            tampered.push_str(&text[..pos]);
            tampered.push(flipped);
            tampered.push_str(&text[pos + 1..]);

            assert!(
                Token::from(tampered)
                    .verify("upstream-token", &secret(), None)
                    .is_err(),
                "flip at position {pos} slipped through",
            );
        }
    }

    #[test]
    fn parses_naive_issuance_timestamps_as_utc() {
        let naive = Token::from(
            "abc.2024-05-02T10:20:30.400500.deadbeef.signature".to_owned(),
        )
        .parse()
        .unwrap();
        let aware = Token::from(
            "abc.2024-05-02T10:20:30.400500+00:00.deadbeef.signature"
                .to_owned(),
        )
        .parse()
        .unwrap();

        assert_eq!(naive.issued_at, aware.issued_at);
        assert_eq!(naive.nonce, "deadbeef");
        assert_eq!(naive.signature, "signature");
    }

    #[test]
    fn rejects_malformed_wire_forms() {
        assert!(matches!(
            Token::from("only.three.segments".to_owned()).parse(),
            Err(ParseError::TooFewSegments),
        ));
        assert!(matches!(
            Token::from("...".to_owned()).parse(),
            Err(ParseError::EmptySegment),
        ));
        assert!(matches!(
            Token::from("abc.not-a-timestamp.nonce.sig".to_owned()).parse(),
            Err(ParseError::InvalidIssuedAt(_)),
        ));
    }

    #[test]
    fn hashes_the_full_wire_form() {
        let token = Token::build(
            &Id::generate(),
            "upstream-token",
            IssuedAtDateTime::now(),
            &secret(),
        );

        let hash = token.hash();
        let hex: &str = hash.as_ref();
        assert_eq!(hex.len(), 64);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(token.hash(), token.hash());

        let other = Token::build(
            &Id::generate(),
            "upstream-token",
            IssuedAtDateTime::now(),
            &secret(),
        );
        assert_ne!(token.hash(), other.hash());
    }
}
