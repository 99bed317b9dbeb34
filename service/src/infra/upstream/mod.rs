//! Upstream identity provider client.

pub mod http;

use derive_more::{Display, Error as StdError, From};
use secrecy::{SecretBox, SecretString};
use serde::Deserialize;

use crate::domain::user;

pub use self::http::Http;

/// Upstream identity provider operation.
pub use common::Handler as Upstream;

/// Credentials to authenticate a user against the upstream provider with.
#[derive(Debug)]
pub struct Login {
    /// [`user::Email`] to authenticate with.
    pub email: user::Email,

    /// [`user::Password`] to authenticate with.
    pub password: SecretBox<user::Password>,
}

/// Upstream refresh token to renew an upstream session with.
///
/// Carries the *plain* upstream refresh token, decrypted only for the
/// duration of the call.
#[derive(Debug)]
pub struct Renew {
    /// Plain upstream refresh token.
    pub refresh_token: SecretString,
}

/// Token pair issued by the upstream provider.
///
/// Ephemeral: encrypted before any persistence and never returned to
/// clients.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenPair {
    /// Access token issued by the upstream provider.
    #[serde(rename = "access_token")]
    pub access_token: String,

    /// Refresh token issued by the upstream provider.
    #[serde(rename = "refresh_token")]
    pub refresh_token: String,

    /// [`user::Payload`] of the authenticated user, as the upstream provider
    /// represents it.
    #[serde(default)]
    pub user: user::Payload,

    /// Lifetime of the access token in seconds, if the upstream provider
    /// reports one.
    #[serde(default, rename = "expires_in")]
    pub expires_in: Option<u64>,

    /// Lifetime of the refresh token in seconds, if the upstream provider
    /// reports one.
    #[serde(default, rename = "refresh_expires_in")]
    pub refresh_expires_in: Option<u64>,
}

/// [`Upstream`] provider error.
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    /// Upstream provider rejected the request as a client error.
    ///
    /// Surfaces as an unauthorized response to the caller.
    #[display("upstream provider rejected the request (HTTP {_0})")]
    #[from(ignore)]
    Rejected(#[error(not(source))] u16),

    /// Upstream provider couldn't answer the request: unreachable, answered
    /// with a server error, or returned a malformed response.
    ///
    /// Surfaces as a gateway-style failure, safe to retry at the caller's
    /// discretion.
    #[display("upstream provider is unavailable: {_0}")]
    Unavailable(http::Error),
}
