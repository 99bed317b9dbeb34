//! [`Command`] for creating a session.

use common::operations::{By, Delete, Insert, Perform};
use derive_more::{Display, Error, From};
use secrecy::{ExposeSecret as _, SecretBox};
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::{
        session::{self, Token},
        user,
    },
    infra::{
        cipher,
        database::{self, Database},
        upstream::{self, Upstream},
    },
    Service,
};

use super::Command;

/// [`Command`] for creating a session by authenticating a user against the
/// upstream provider.
///
/// Mints a fresh derived [`Token`] pair bound to the upstream-issued tokens,
/// persists the session [`Record`] (token hashes and encrypted upstream
/// material only) and caps the number of live sessions the user holds.
///
/// [`Record`]: session::Record
#[derive(Debug, From)]
pub struct CreateSession {
    /// [`user::Email`] to authenticate with.
    pub email: user::Email,

    /// [`user::Password`] to authenticate with.
    pub password: SecretBox<user::Password>,
}

/// Output of [`CreateSession`] [`Command`].
#[derive(Debug)]
pub struct Output {
    /// Derived access [`Token`] of the session.
    pub access_token: Token,

    /// Derived refresh [`Token`] of the session.
    pub refresh_token: Token,

    /// [`user::Payload`] as the upstream provider returned it.
    pub user: user::Payload,
}

impl<Db, Up> Command<CreateSession> for Service<Db, Up>
where
    Db: Database<
            Insert<session::Record>,
            Ok = session::Record,
            Err = Traced<database::Error>,
        > + Database<
            Delete<By<u64, session::Trim>>,
            Ok = u64,
            Err = Traced<database::Error>,
        >,
    Up: Upstream<
        Perform<upstream::Login>,
        Ok = upstream::TokenPair,
        Err = Traced<upstream::Error>,
    >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(&self, cmd: CreateSession) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let CreateSession { email, password } = cmd;

        if self.config().access_secret.expose_secret().is_empty() {
            return Err(tracerr::new!(E::MissingSigningSecret));
        }

        let pair = self
            .upstream()
            .execute(Perform(upstream::Login {
                email: email.clone(),
                password,
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;
        log::info!(email = %email, "upstream login succeeded");

        let session_id = session::Id::generate();
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
            &session_id,
            &pair.access_token,
            issued_at.coerce(),
            &self.config().access_secret,
        );
        let refresh_token = Token::build(
            &session_id,
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

        let record = self
            .database()
            .execute(Insert(session::Record {
                id: None,
                session_id,
                session_token_hash: access_token.hash(),
                refresh_token_hash: refresh_token.hash(),
                upstream_access_token,
                upstream_refresh_token,
                user: pair.user.clone(),
                issued_at,
                last_access_at: Some(issued_at.coerce()),
                access_expires_at,
                refresh_expires_at,
                created_at: issued_at.coerce(),
                updated_at: issued_at.coerce(),
            }))
            .await
            .map_err(tracerr::map_from_and_wrap!(=> E))?;

        // The tokens are already minted at this point, so a trimming failure
        // doesn't fail the login.
        let trimmed = self
            .database()
            .execute(Delete(By::new(session::Trim {
                identity: record.user.identity(),
                keep: self.config().max_sessions_per_user,
            })))
            .await;
        match trimmed {
            Ok(0) => {}
            Ok(count) => log::debug!(
                session_id = %record.session_id,
                "trimmed {count} exceeding sessions",
            ),
            Err(e) => log::warn!(
                session_id = %record.session_id,
                "failed to trim exceeding sessions: {e}",
            ),
        }

        Ok(Output {
            access_token,
            refresh_token,
            user: pair.user,
        })
    }
}

/// Error of [`CreateSession`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// Signing secret is not configured.
    #[display("signing secret is not configured")]
    MissingSigningSecret,

    /// [`Upstream`] provider operation failed.
    #[display("`Upstream` provider operation failed: {_0}")]
    Upstream(upstream::Error),

    /// Freshly issued upstream tokens failed to encrypt.
    #[display("failed to protect upstream tokens: {_0}")]
    Cipher(cipher::Error),

    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),
}

#[cfg(test)]
mod spec {
    use std::{thread, time::Duration};

    use secrecy::SecretString;

    use crate::{
        command::mock,
        infra::upstream,
        Command as _,
    };

    use super::{CreateSession, ExecutionError};

    fn command() -> CreateSession {
        CreateSession {
            email: mock::email(),
            password: mock::password(),
        }
    }

    #[tokio::test]
    async fn mints_a_session_from_upstream_credentials() {
        let service = mock::service(
            mock::config(),
            mock::Db::default(),
            mock::Up::issue(mock::token_pair("U1", "U2", Some(3600), None)),
        );

        let out = service.execute(command()).await.unwrap();

        let access: &str = out.access_token.as_ref();
        let refresh: &str = out.refresh_token.as_ref();
        assert_ne!(access, refresh);
        assert_eq!(access.split('.').next(), refresh.split('.').next());
        assert_eq!(out.user, mock::payload());

        let sessions = service.database().sessions.lock().unwrap();
        assert_eq!(sessions.len(), 1);
        let record = &sessions[0];
        assert!(record.id.is_some());
        assert_eq!(record.session_token_hash, out.access_token.hash());
        assert_eq!(record.refresh_token_hash, out.refresh_token.hash());
        assert_eq!(record.user, mock::payload());
        assert!(record.last_access_at.is_some());

        // The upstream-reported access TTL wins over the configured
        // fallback, while the refresh expiry falls back.
        assert_eq!(
            record.access_expires_at.unwrap(),
            (record.issued_at + Duration::from_secs(3600)).coerce(),
        );
        assert_eq!(
            record.refresh_expires_at.unwrap(),
            (record.issued_at + mock::config().refresh_ttl.unwrap()).coerce(),
        );

        // Only hashes and ciphertext are persisted, and the ciphertext
        // decrypts back to the upstream tokens.
        let vault = &mock::config().vault;
        assert_eq!(
            vault.decrypt(&record.upstream_access_token).unwrap(),
            "U1",
        );
        assert_eq!(
            vault.decrypt(&record.upstream_refresh_token).unwrap(),
            "U2",
        );

        // The minted tokens verify against the respective upstream tokens
        // and secrets.
        let config = mock::config();
        assert!(out
            .access_token
            .verify("U1", &config.access_secret, Some(&record.session_id))
            .is_ok());
        assert!(out
            .refresh_token
            .verify(
                "U2",
                config.refresh_signing_secret(),
                Some(&record.session_id),
            )
            .is_ok());
    }

    #[tokio::test]
    async fn caps_live_sessions_per_user_identity() {
        let service = mock::service(
            mock::config(),
            mock::Db::default(),
            mock::Up::issue(mock::token_pair("U1", "U2", None, None)),
        );

        let mut session_ids = Vec::new();
        for _ in 0..3 {
            let out = service.execute(command()).await.unwrap();
            let access: &str = out.access_token.as_ref();
            session_ids.push(access.split('.').next().unwrap().to_owned());
            // Keeps `issuedAt` ordering unambiguous.
            thread::sleep(Duration::from_millis(2));
        }

        let sessions = service.database().sessions.lock().unwrap();
        assert_eq!(sessions.len(), 2);
        let remaining = sessions
            .iter()
            .map(|r| AsRef::<str>::as_ref(&r.session_id))
            .collect::<Vec<_>>();
        assert!(!remaining.contains(&session_ids[0].as_str()));
        assert!(remaining.contains(&session_ids[1].as_str()));
        assert!(remaining.contains(&session_ids[2].as_str()));
    }

    #[tokio::test]
    async fn requires_a_configured_signing_secret() {
        let mut config = mock::config();
        config.access_secret = SecretString::from(String::new());
        let service = mock::service(
            config,
            mock::Db::default(),
            mock::Up::issue(mock::token_pair("U1", "U2", None, None)),
        );

        let err = service.execute(command()).await.unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::MissingSigningSecret,
        ));
        assert!(service.database().sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn surfaces_an_upstream_rejection() {
        let service = mock::service(
            mock::config(),
            mock::Db::default(),
            mock::Up::reject(401),
        );

        let err = service.execute(command()).await.unwrap_err();

        assert!(matches!(
            err.as_ref(),
            ExecutionError::Upstream(upstream::Error::Rejected(401)),
        ));
        assert!(service.database().sessions.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn treats_trimming_as_best_effort() {
        let service = mock::service(
            mock::config(),
            mock::Db {
                fail_trim: true,
                ..mock::Db::default()
            },
            mock::Up::issue(mock::token_pair("U1", "U2", None, None)),
        );

        let out = service.execute(command()).await;

        assert!(out.is_ok());
        assert_eq!(service.database().sessions.lock().unwrap().len(), 1);
    }
}
