//! [`Command`] for authorizing a request.

use common::operations::{By, Select, Update};
use derive_more::{Display, Error, From};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        session::{self, token, Token},
        user,
    },
    infra::{
        cipher,
        database::{self, Database},
    },
    Service,
};

use super::Command;

/// [`Command`] for authorizing a request by its bearer [`Token`].
///
/// Walks the whole verification chain: wire format, session presence,
/// access expiry, stored-hash equality, decryption of the upstream access
/// token, signature verification bound to it, and the session-wide refresh
/// window. Any ambiguity rejects.
#[derive(Debug, From)]
pub struct AuthorizeSession {
    /// Bearer [`Token`] presented by the client.
    pub token: Token,
}

/// Output of [`AuthorizeSession`] [`Command`]: the authenticated identity.
#[derive(Debug)]
pub struct Output {
    /// [`session::Id`] of the authorized session.
    pub session_id: session::Id,

    /// Stored [`user::Payload`] snapshot of the authorized user.
    pub user: user::Payload,
}

impl<Db, Up> Command<AuthorizeSession> for Service<Db, Up>
where
    Db: Database<
            Select<By<Option<session::Record>, session::Id>>,
            Ok = Option<session::Record>,
            Err = Traced<database::Error>,
        > + Database<
            Update<session::Touch>,
            Ok = (),
            Err = Traced<database::Error>,
        >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: AuthorizeSession,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let AuthorizeSession { token } = cmd;

        let parsed = token.parse().map_err(|e| {
            log::warn!("bearer token is malformed: {e}");
            tracerr::new!(E::MalformedToken(e))
        })?;

        let Some(record) = self
            .database()
            .execute(Select(By::new(parsed.session_id.clone())))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        else {
            log::warn!(
                session_id = %parsed.session_id,
                "no session found for the bearer token",
            );
            return Err(tracerr::new!(E::SessionNotFound(parsed.session_id)));
        };

        let now = session::ExpirationDateTime::now();
        if record.access_expires_at.is_some_and(|at| at <= now) {
            log::info!(
                session_id = %record.session_id,
                "access token has expired",
            );
            return Err(tracerr::new!(E::AccessExpired));
        }

        // Stored-hash equality defends against a structurally valid but
        // substituted token, independently of the signature check below.
        if record.session_token_hash != token.hash() {
            log::warn!(
                session_id = %record.session_id,
                "bearer token doesn't match the stored hash",
            );
            return Err(tracerr::new!(E::TokenMismatch));
        }

        // Stored material that fails authentication rejects like any other
        // invalid token, never as a server-side failure.
        let upstream_access = self
            .config()
            .vault
            .decrypt(&record.upstream_access_token)
            .map_err(|e| {
                log::error!(
                    session_id = %record.session_id,
                    "failed to decrypt the stored upstream access token: {e}",
                );
                tracerr::new!(E::Cipher(e))
            })?;

        drop(
            token
                .verify(
                    &upstream_access,
                    &self.config().access_secret,
                    Some(&record.session_id),
                )
                .map_err(|e| {
                    log::warn!(
                        session_id = %record.session_id,
                        "bearer token signature is invalid: {e}",
                    );
                    tracerr::new!(E::InvalidToken(e))
                })?,
        );

        // A session whose refresh window elapsed is dead even if the access
        // token itself still verifies: it can never be renewed.
        if record.refresh_expires_at.is_some_and(|at| at <= now) {
            log::info!(
                session_id = %record.session_id,
                "session refresh window has elapsed",
            );
            return Err(tracerr::new!(E::SessionExpired));
        }

        // Fire-and-forget relative to the decision: a failed touch never
        // turns an authorized request into a rejection.
        let touched = self
            .database()
            .execute(Update(session::Touch {
                session_id: record.session_id.clone(),
                at: session::AccessDateTime::now(),
            }))
            .await;
        if let Err(e) = touched {
            log::warn!(
                session_id = %record.session_id,
                "failed to touch the session access time: {e}",
            );
        }

        Ok(Output {
            session_id: record.session_id,
            user: record.user,
        })
    }
}

/// Error of [`AuthorizeSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// Presented bearer [`Token`] doesn't follow the wire format.
    #[display("bearer token is malformed: {_0}")]
    MalformedToken(token::ParseError),

    /// No session exists for the presented bearer [`Token`].
    #[display("session `{_0}` not found or expired")]
    #[from(ignore)]
    SessionNotFound(#[error(not(source))] session::Id),

    /// Derived access [`Token`] of the session has expired.
    #[display("access token has expired")]
    AccessExpired,

    /// Presented bearer [`Token`] doesn't match the stored hash.
    #[display("bearer token doesn't match the stored session")]
    TokenMismatch,

    /// Stored upstream access token failed to decrypt.
    #[display("cipher operation failed: {_0}")]
    Cipher(cipher::Error),

    /// Presented bearer [`Token`] failed signature verification.
    #[display("bearer token signature is invalid: {_0}")]
    InvalidToken(token::ValidationError),

    /// Session refresh window has elapsed, terminally: only a new login can
    /// help.
    #[display("session has expired")]
    SessionExpired,

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),
}
