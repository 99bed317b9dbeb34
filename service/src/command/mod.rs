//! [`Command`] definition.

pub mod authorize_session;
pub mod create_session;
pub mod refresh_session;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use crate::domain::session;

/// [`Command`] of the [`Service`].
///
/// [`Service`]: crate::Service
pub use common::Handler as Command;

pub use self::{
    authorize_session::AuthorizeSession, create_session::CreateSession,
    refresh_session::RefreshSession,
};

/// Computes the expiration moment of a token issued at the provided moment.
///
/// An upstream-reported TTL wins over the configured fallback, and a
/// zero-second upstream TTL counts as not reported. Absent both, the token
/// never expires.
fn expires_at(
    issued_at: session::IssuanceDateTime,
    upstream_ttl: Option<u64>,
    fallback: Option<Duration>,
) -> Option<session::ExpirationDateTime> {
    upstream_ttl
        .filter(|ttl| *ttl > 0)
        .map(Duration::from_secs)
        .or(fallback)
        .map(|ttl| (issued_at + ttl).coerce())
}
