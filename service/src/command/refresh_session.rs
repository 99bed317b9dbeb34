//! [`Command`] for refreshing a session.

use common::operations::{By, Perform, Select, Update};
use derive_more::{Display, Error, From};
use secrecy::{ExposeSecret as _, SecretString};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::session::{self, token, Token},
    infra::{
        cipher,
        database::{self, Database},
        upstream::{self, Upstream},
    },
    Service,
};

use super::Command;

/// [`Command`] for refreshing a session with its derived refresh [`Token`].
///
/// Re-verifies the presented [`Token`] the same way request authorization
/// does, renews the upstream session with the decrypted upstream refresh
/// token, and rewrites the same session [`Record`] in place: the session ID
/// survives, the token material doesn't.
///
/// [`Record`]: session::Record
#[derive(Debug, From)]
pub struct RefreshSession {
    /// Derived refresh [`Token`] presented by the client.
    pub token: Token,
}

/// Output of [`RefreshSession`] [`Command`].
pub type Output = super::create_session::Output;

impl<Db, Up> Command<RefreshSession> for Service<Db, Up>
where
    Db: Database<
            Select<By<Option<session::Record>, session::Id>>,
            Ok = Option<session::Record>,
            Err = Traced<database::Error>,
        > + Database<
            Update<session::RewrittenTokens>,
            Ok = (),
            Err = Traced<database::Error>,
        >,
    Up: Upstream<
        Perform<upstream::Renew>,
        Ok = upstream::TokenPair,
        Err = Traced<upstream::Error>,
    >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: RefreshSession,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let RefreshSession { token } = cmd;

        if self.config().access_secret.expose_secret().is_empty() {
            return Err(tracerr::new!(E::MissingSigningSecret));
        }

        let parsed = token.parse().map_err(|e| {
            log::info!("refresh token is malformed: {e}");
            tracerr::new!(E::MalformedToken(e))
        })?;

        let Some(record) = self
            .database()
            .execute(Select(By::new(parsed.session_id.clone())))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?
        else {
            log::info!(
                session_id = %parsed.session_id,
                "session not found during refresh",
            );
            return Err(tracerr::new!(E::SessionNotFound(parsed.session_id)));
        };

        let now = session::ExpirationDateTime::now();
        if record.refresh_expires_at.is_some_and(|at| at <= now) {
            log::info!(
                session_id = %record.session_id,
                "session refresh window has elapsed",
            );
            return Err(tracerr::new!(E::SessionExpired));
        }

        // Stored-hash equality defends against a structurally valid but
        // substituted token, independently of the signature check below.
        if record.refresh_token_hash != token.hash() {
            log::warn!(
                session_id = %record.session_id,
                "refresh token doesn't match the stored hash",
            );
            return Err(tracerr::new!(E::TokenMismatch));
        }

        let upstream_refresh = self
            .config()
            .vault
            .decrypt(&record.upstream_refresh_token)
            .map_err(|e| {
                log::error!(
                    session_id = %record.session_id,
                    "failed to decrypt the stored upstream refresh token: {e}",
                );
                tracerr::new!(E::Cipher(e))
            })?;

        drop(
            token
                .verify(
                    &upstream_refresh,
                    self.config().refresh_signing_secret(),
                    Some(&record.session_id),
                )
                .map_err(|e| {
                    log::warn!(
                        session_id = %record.session_id,
                        "refresh token signature is invalid: {e}",
                    );
                    tracerr::new!(E::InvalidToken(e))
                })?,
        );

        let pair = self
            .upstream()
            .execute(Perform(upstream::Renew {
                refresh_token: SecretString::from(upstream_refresh),
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        let issued_at = session::IssuanceDateTime::now();

        let access_expires_at = super::expires_at(
            issued_at,
            pair.expires_in,
            self.config().access_ttl,
        );
        let refresh_expires_at = super::expires_at(
            issued_at,
            pair.refresh_expires_in,
            self.config().refresh_ttl,
        );

        let access_token = Token::build(
            &record.session_id,
            &pair.access_token,
            issued_at.coerce(),
            &self.config().access_secret,
        );
        let refresh_token = Token::build(
            &record.session_id,
            &pair.refresh_token,
            issued_at.coerce(),
            self.config().refresh_signing_secret(),
        );

        let upstream_access_token = self
            .config()
            .vault
            .encrypt(&pair.access_token)
            .map_err(tracerr::from_and_wrap!(=> E))?;
        let upstream_refresh_token = self
            .config()
            .vault
            .encrypt(&pair.refresh_token)
            .map_err(tracerr::from_and_wrap!(=> E))?;

        self.database()
            .execute(Update(session::RewrittenTokens {
                session_id: record.session_id.clone(),
                session_token_hash: access_token.hash(),
                refresh_token_hash: refresh_token.hash(),
                upstream_access_token,
                upstream_refresh_token,
                access_expires_at,
                refresh_expires_at,
                at: issued_at,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        Ok(Output {
            access_token,
            refresh_token,
            user: record.user,
        })
    }
}

/// Error of [`RefreshSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// Signing secret is not configured.
    #[display("signing secret is not configured")]
    MissingSigningSecret,

    /// Presented refresh [`Token`] doesn't follow the wire format.
    #[display("refresh token is malformed: {_0}")]
    MalformedToken(token::ParseError),

    /// No session exists for the presented refresh [`Token`].
    #[display("session `{_0}` not found or expired")]
    #[from(ignore)]
    SessionNotFound(#[error(not(source))] session::Id),

    /// Session refresh window has elapsed, terminally: only a new login can
    /// help.
    #[display("session has expired")]
    SessionExpired,

    /// Presented refresh [`Token`] doesn't match the stored hash.
    #[display("refresh token doesn't match the stored session")]
    TokenMismatch,

    /// Stored upstream material failed to decrypt or fresh upstream tokens
    /// failed to encrypt.
    #[display("cipher operation failed: {_0}")]
    Cipher(cipher::Error),

    /// Presented refresh [`Token`] failed signature verification.
    #[display("refresh token is invalid: {_0}")]
    InvalidToken(token::ValidationError),

    /// [`Upstream`] provider operation failed.
    #[display("`Upstream` provider operation failed: {_0}")]
    Upstream(upstream::Error),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),
}

#[cfg(test)]
mod spec {
    use std::time::Duration;

    use crate::{
        command::{mock, CreateSession},
        domain::session::{token, Token},
        Command as _,
    };

    use super::{ExecutionError, RefreshSession};

    async fn login(
        service: &crate::Service<mock::Db, mock::Up>,
    ) -> super::Output {
        service
            .execute(CreateSession {
                email: mock::email(),
                password: mock::password(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn rotates_the_token_pair_in_place() {
        let mut up = mock::Up::issue(mock::token_pair(
            "U1", "U2", Some(3600), None,
        ));
        up.renew = mock::Plan::Issue(mock::token_pair(
            "U3", "U4", Some(3600), None,
        ));
        let service =
            mock::service(mock::config(), mock::Db::default(), up);

        let logged_in = login(&service).await;
        let refreshed = service
            .execute(RefreshSession {
                token: logged_in.refresh_token.clone(),
            })
            .await
            .unwrap();

        let access: &str = refreshed.access_token.as_ref();
        let old_access: &str = logged_in.access_token.as_ref();
        assert_ne!(access, old_access);
        // The session ID segment survives the refresh.
        assert_eq!(
            access.split('.').next(),
            old_access.split('.').next(),
        );
        assert_eq!(refreshed.user, mock::payload());

        let sessions = service.database().sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        let record = &sessions[0];
        assert_eq!(
            record.session_token_hash,
            refreshed.access_token.hash(),
        );
        assert_eq!(
            record.refresh_token_hash,
            refreshed.refresh_token.hash(),
        );
        let vault = &mock::config().vault;
        assert_eq!(
            vault.decrypt(&record.upstream_access_token).unwrap(),
            "U3",
        );
        assert_eq!(
            vault.decrypt(&record.upstream_refresh_token).unwrap(),
            "U4",
        );
    }

    #[tokio::test]
    async fn rejects_a_substituted_token_without_mutating_the_record() {
        let service = mock::service(
            mock::config(),
            mock::Db::default(),
            mock::Up::issue(mock::token_pair("U1", "U2", None, None)),
        );

        let logged_in = login(&service).await;
        let before =
            service.database().sessions.lock().unwrap()[0].clone();

        // Structurally valid, signed with the right secret for the right
        // session, but not the token the store knows about.
        let parsed = logged_in.refresh_token.parse().unwrap();
        let substituted = Token::build(
            &parsed.session_id,
            "U2",
            parsed.issued_at,
            mock::config().refresh_signing_secret(),
        );

        let err = service
            .execute(RefreshSession { token: substituted })
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), ExecutionError::TokenMismatch));
        let sessions = service.database().sessions.lock().unwrap();
        assert_eq!(sessions[0].refresh_token_hash, before.refresh_token_hash);
        assert_eq!(sessions[0].updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn upstream_rotation_invalidates_the_derived_token() {
        let service = mock::service(
            mock::config(),
            mock::Db::default(),
            mock::Up::issue(mock::token_pair("U1", "U2", None, None)),
        );

        let logged_in = login(&service).await;
        // The upstream refresh token rotates outside of this system.
        service.database().sessions.lock().unwrap()[0]
            .upstream_refresh_token =
            mock::config().vault.encrypt("ROTATED").unwrap();

        let err = service
            .execute(RefreshSession {
                token: logged_in.refresh_token,
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::InvalidToken(
                token::ValidationError::SignatureMismatch,
            ),
        ));
    }

    #[tokio::test]
    async fn rejects_an_elapsed_refresh_window() {
        let mut config = mock::config();
        config.refresh_ttl = Some(Duration::ZERO);
        let service = mock::service(
            config,
            mock::Db::default(),
            mock::Up::issue(mock::token_pair("U1", "U2", None, None)),
        );

        let logged_in = login(&service).await;
        let err = service
            .execute(RefreshSession {
                token: logged_in.refresh_token,
            })
            .await
            .unwrap_err();

        assert!(matches!(err.as_ref(), ExecutionError::SessionExpired));
    }

    #[tokio::test]
    async fn rejects_an_unknown_session() {
        let service = mock::service(
            mock::config(),
            mock::Db::default(),
            mock::Up::issue(mock::token_pair("U1", "U2", None, None)),
        );

        let stray = Token::build(
            &crate::domain::session::Id::generate(),
            "U2",
            crate::domain::session::token::IssuedAtDateTime::now(),
            mock::config().refresh_signing_secret(),
        );

        let err = service
            .execute(RefreshSession { token: stray })
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::SessionNotFound(_),
        ));
    }

    #[tokio::test]
    async fn rejects_a_malformed_token() {
        let service = mock::service(
            mock::config(),
            mock::Db::default(),
            mock::Up::issue(mock::token_pair("U1", "U2", None, None)),
        );

        let err = service
            .execute(RefreshSession {
                token: Token::from("definitely-not-a-token".to_owned()),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::MalformedToken(_),
        ));
    }
}
