//! In-memory collaborators for exercising [`Command`]s.
//!
//! [`Command`]: super::Command

use std::{sync::Mutex, time::Duration};

use common::operations::{By, Delete, Insert, Perform, Select, Update};
use mongodb::bson::oid::ObjectId;
use secrecy::{SecretBox, SecretString};
use serde_json::json;
use tracerr::Traced;

use crate::{
    domain::{session, user},
    infra::{
        cipher,
        database::{self, mongo, Database},
        upstream::{self, http, Login, Renew, TokenPair, Upstream},
    },
    task, Config, Service,
};

/// In-memory session store mirroring the document-store contract.
#[derive(Debug, Default)]
pub(crate) struct Db {
    /// Stored session records.
    pub(crate) sessions: Mutex<Vec<session::Record>>,

    /// Makes trim operations fail, exercising their best-effort contract.
    pub(crate) fail_trim: bool,

    /// Makes touch operations fail, exercising their best-effort contract.
    pub(crate) fail_touch: bool,
}

/// Scripted upstream provider answer.
#[derive(Clone, Debug)]
pub(crate) enum Plan {
    /// Answer with the provided token pair.
    Issue(TokenPair),

    /// Reject with the provided client-error status.
    Reject(u16),

    /// Fail as unavailable.
    Unavailable,
}

impl Plan {
    /// Plays this [`Plan`] out.
    fn run(&self) -> Result<TokenPair, Traced<upstream::Error>> {
        match self {
            Self::Issue(pair) => Ok(pair.clone()),
            Self::Reject(status) => {
                Err(tracerr::new!(upstream::Error::Rejected(*status)))
            }
            Self::Unavailable => Err(tracerr::new!(
                upstream::Error::Unavailable(http::Error::Status(503))
            )),
        }
    }
}

/// Scripted upstream provider.
#[derive(Debug)]
pub(crate) struct Up {
    /// Answer to login operations.
    pub(crate) login: Plan,

    /// Answer to renew operations.
    pub(crate) renew: Plan,
}

impl Up {
    /// Creates an [`Up`] answering every operation with the provided pair.
    pub(crate) fn issue(pair: TokenPair) -> Self {
        Self {
            login: Plan::Issue(pair.clone()),
            renew: Plan::Issue(pair),
        }
    }

    /// Creates an [`Up`] rejecting every operation with the provided status.
    pub(crate) fn reject(status: u16) -> Self {
        Self {
            login: Plan::Reject(status),
            renew: Plan::Reject(status),
        }
    }
}

impl Upstream<Perform<Login>> for Up {
    type Ok = TokenPair;
    type Err = Traced<upstream::Error>;

    async fn execute(
        &self,
        _: Perform<Login>,
    ) -> Result<Self::Ok, Self::Err> {
        self.login.run()
    }
}

impl Upstream<Perform<Renew>> for Up {
    type Ok = TokenPair;
    type Err = Traced<upstream::Error>;

    async fn execute(
        &self,
        _: Perform<Renew>,
    ) -> Result<Self::Ok, Self::Err> {
        self.renew.run()
    }
}

/// Fabricates a storage failure.
fn storage_error() -> Traced<database::Error> {
    tracerr::new!(database::Error::Mongo(mongo::Error::MalformedDocument))
}

impl Database<Insert<session::Record>> for Db {
    type Ok = session::Record;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Insert(record): Insert<session::Record>,
    ) -> Result<Self::Ok, Self::Err> {
        let mut record = record;
        _ = record
            .last_access_at
            .get_or_insert_with(session::AccessDateTime::now);
        record.id = Some(ObjectId::new());

        self.sessions.lock().unwrap().push(record.clone());
        Ok(record)
    }
}

impl Database<Select<By<Option<session::Record>, session::Id>>> for Db {
    type Ok = Option<session::Record>;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Select(by): Select<By<Option<session::Record>, session::Id>>,
    ) -> Result<Self::Ok, Self::Err> {
        let session_id = by.into_inner();
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.session_id == session_id)
            .cloned())
    }
}

impl Database<Update<session::Touch>> for Db {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(touch): Update<session::Touch>,
    ) -> Result<Self::Ok, Self::Err> {
        if self.fail_touch {
            return Err(storage_error());
        }

        let session::Touch { session_id, at } = touch;
        if let Some(record) = self
            .sessions
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.session_id == session_id)
        {
            record.last_access_at = Some(at);
            record.updated_at = at.coerce();
        }
        Ok(())
    }
}

impl Database<Update<session::RewrittenTokens>> for Db {
    type Ok = ();
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Update(tokens): Update<session::RewrittenTokens>,
    ) -> Result<Self::Ok, Self::Err> {
        let session::RewrittenTokens {
            session_id,
            session_token_hash,
            refresh_token_hash,
            upstream_access_token,
            upstream_refresh_token,
            access_expires_at,
            refresh_expires_at,
            at,
        } = tokens;

        if let Some(record) = self
            .sessions
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.session_id == session_id)
        {
            record.issued_at = at;
            record.session_token_hash = session_token_hash;
            record.refresh_token_hash = refresh_token_hash;
            record.upstream_access_token = upstream_access_token;
            record.upstream_refresh_token = upstream_refresh_token;
            record.access_expires_at = access_expires_at;
            record.refresh_expires_at = refresh_expires_at;
            record.last_access_at = Some(at.coerce());
            record.updated_at = at.coerce();
        }
        Ok(())
    }
}

impl Database<Delete<By<u64, session::Trim>>> for Db {
    type Ok = u64;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Delete(by): Delete<By<u64, session::Trim>>,
    ) -> Result<Self::Ok, Self::Err> {
        if self.fail_trim {
            return Err(storage_error());
        }

        let session::Trim { identity, keep } = by.into_inner();
        if identity.is_empty() {
            return Ok(0);
        }

        let mut sessions = self.sessions.lock().unwrap();
        let mut matched = sessions
            .iter()
            .filter(|r| {
                let stored = r.user.identity();
                let matched = [
                    (&stored.internal_id, &identity.internal_id),
                    (&stored.external_id, &identity.external_id),
                    (&stored.email, &identity.email),
                ]
                .into_iter()
                .any(|(a, b)| {
                    matches!((a, b), (Some(x), Some(y)) if x == y)
                });
                matched
            })
            .map(|r| (r.issued_at, r.session_id.clone()))
            .collect::<Vec<_>>();
        matched.sort_by(|a, b| b.0.cmp(&a.0));

        let doomed = matched
            .into_iter()
            .skip(keep)
            .map(|(_, id)| id)
            .collect::<Vec<_>>();
        let before = sessions.len();
        sessions.retain(|r| !doomed.contains(&r.session_id));

        Ok(u64::try_from(before - sessions.len()).unwrap())
    }
}

impl Database<Delete<By<u64, session::Expired>>> for Db {
    type Ok = u64;
    type Err = Traced<database::Error>;

    async fn execute(
        &self,
        Delete(by): Delete<By<u64, session::Expired>>,
    ) -> Result<Self::Ok, Self::Err> {
        let session::Expired(deadline) = by.into_inner();

        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|r| {
            r.refresh_expires_at.is_none_or(|at| at > deadline)
        });

        Ok(u64::try_from(before - sessions.len()).unwrap())
    }
}

/// Builds a [`Service`] over the in-memory collaborators, without spawning
/// any background tasks.
pub(crate) fn service(
    config: Config,
    database: Db,
    upstream: Up,
) -> Service<Db, Up> {
    Service {
        config,
        database,
        upstream,
    }
}

/// Builds a test [`Config`] with both signing secrets set and the original
/// fallback TTLs.
pub(crate) fn config() -> Config {
    Config {
        access_secret: SecretString::from("access-signing-secret".to_owned()),
        refresh_secret: Some(SecretString::from(
            "refresh-signing-secret".to_owned(),
        )),
        access_ttl: Some(Duration::from_secs(172_800)),
        refresh_ttl: Some(Duration::from_secs(604_800)),
        max_sessions_per_user: 2,
        vault: cipher::Vault::new(&SecretString::from(
            "000102030405060708090a0b0c0d0e0f\
             101112131415161718191a1b1c1d1e1f"
                .to_owned(),
        ))
        .unwrap(),
        purge_expired_sessions: task::purge_expired_sessions::Config {
            interval: Duration::from_secs(60 * 60),
        },
    }
}

/// Builds an upstream [`TokenPair`] carrying the shared test [`payload()`].
pub(crate) fn token_pair(
    access: &str,
    refresh: &str,
    expires_in: Option<u64>,
    refresh_expires_in: Option<u64>,
) -> TokenPair {
    TokenPair {
        access_token: access.to_owned(),
        refresh_token: refresh.to_owned(),
        user: payload(),
        expires_in,
        refresh_expires_in,
    }
}

/// Builds the [`user::Payload`] every scripted upstream answer carries.
pub(crate) fn payload() -> user::Payload {
    user::Payload::from(
        json!({
            "_id": "663bd2f1c0ffee",
            "email": "a@b.com",
            "name": "Test User",
        })
        .as_object()
        .unwrap()
        .clone(),
    )
}

/// Builds the [`user::Email`] used across tests.
pub(crate) fn email() -> user::Email {
    user::Email::new("a@b.com").unwrap()
}

/// Builds a valid [`user::Password`] used across tests.
pub(crate) fn password() -> SecretBox<user::Password> {
    SecretBox::new(Box::new(user::Password::new("password123").unwrap()))
}
