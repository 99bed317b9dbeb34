//! Service contains the business logic of the application.

#![deny(
    nonstandard_style,
    rust_2018_idioms,
    rustdoc::all,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]
#![forbid(non_ascii_idents)]
#![warn(
    clippy::allow_attributes,
    clippy::allow_attributes_without_reason,
    clippy::pedantic,
    clippy::wildcard_enum_match_arm,
    deprecated_in_future,
    missing_copy_implementations,
    missing_debug_implementations,
    missing_docs,
    unreachable_pub,
    unused_crate_dependencies,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications,
    unused_results
)]

pub mod command;
pub mod domain;
pub mod infra;
pub mod query;
pub mod task;

use std::{error::Error, time::Duration};

use common::operations::{By, Start};
use secrecy::SecretString;

use crate::infra::cipher;
#[cfg(doc)]
use crate::infra::{Database, Upstream};

pub use self::{command::Command, query::Query, task::Task};

/// [`Service`] configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Secret signing derived access tokens.
    pub access_secret: SecretString,

    /// Separate secret signing derived refresh tokens.
    ///
    /// Falls back to the [`access_secret`] when unset.
    ///
    /// [`access_secret`]: Config::access_secret
    pub refresh_secret: Option<SecretString>,

    /// Fallback lifetime of derived access tokens, applied whenever the
    /// upstream provider doesn't report one.
    ///
    /// [`None`] means such tokens never expire.
    pub access_ttl: Option<Duration>,

    /// Fallback lifetime of whole sessions, applied whenever the upstream
    /// provider doesn't report a refresh token lifetime.
    ///
    /// [`None`] means such sessions never expire.
    pub refresh_ttl: Option<Duration>,

    /// Maximum number of live sessions a single user identity may hold.
    pub max_sessions_per_user: usize,

    /// [`cipher::Vault`] protecting upstream tokens at rest.
    pub vault: cipher::Vault,

    /// [`task::PurgeExpiredSessions`] configuration.
    pub purge_expired_sessions: task::purge_expired_sessions::Config,
}

impl Config {
    /// Returns the secret signing derived refresh tokens: the dedicated one
    /// if configured, the access one otherwise.
    #[must_use]
    pub fn refresh_signing_secret(&self) -> &SecretString {
        self.refresh_secret.as_ref().unwrap_or(&self.access_secret)
    }
}

/// Domain service.
#[derive(Clone, Debug)]
pub struct Service<Db, Up> {
    /// Configuration of this [`Service`].
    config: Config,

    /// [`Database`] of this [`Service`].
    database: Db,

    /// [`Upstream`] provider client of this [`Service`].
    upstream: Up,
}

impl<Db, Up> Service<Db, Up> {
    /// Creates a new [`Service`] with the provided parameters.
    pub fn new(
        config: Config,
        database: Db,
        upstream: Up,
    ) -> (Self, task::Background)
    where
        Self: Task<
                Start<
                    By<
                        task::PurgeExpiredSessions<Self>,
                        task::purge_expired_sessions::Config,
                    >,
                >,
                Ok = (),
                Err: Error + 'static,
            > + Clone
            + 'static,
    {
        let this = Service {
            config,
            database,
            upstream,
        };

        let mut bg = task::Background::default();
        let svc = this.clone();
        bg.spawn(async move {
            svc.execute(Start(By::new(svc.config().purge_expired_sessions)))
                .await
        });

        (this, bg)
    }

    /// Returns [`Config`] of this [`Service`].
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns [`Database`] of this [`Service`].
    #[must_use]
    pub fn database(&self) -> &Db {
        &self.database
    }

    /// Returns the [`Upstream`] provider client of this [`Service`].
    #[must_use]
    pub fn upstream(&self) -> &Up {
        &self.upstream
    }
}
