//! [`PurgeExpiredSessions`] [`Task`].

use std::{convert::Infallible, error::Error, time};

use common::operations::{By, Delete, Perform, Start};
use tokio::time::interval;
use tracerr::Traced;
use tracing as log;

use crate::{
    domain::session,
    infra::{database, Database},
    Service,
};

use super::Task;

/// Configuration for [`PurgeExpiredSessions`] [`Task`].
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Interval between expired session purges.
    pub interval: time::Duration,
}

/// [`Task`] deleting session [`Record`]s whose refresh window has elapsed.
///
/// Such [`Record`]s can neither authorize requests nor be refreshed anymore,
/// so removing them is pure storage housekeeping and never races with a
/// legitimate use of the session.
///
/// [`Record`]: session::Record
#[derive(Clone, Copy, Debug)]
pub struct PurgeExpiredSessions<S> {
    /// [`Config`] of this [`Task`].
    config: Config,

    /// [`Service`] instance.
    service: S,
}

impl<Db, Up> Task<Start<By<PurgeExpiredSessions<Self>, Config>>>
    for Service<Db, Up>
where
    PurgeExpiredSessions<Service<Db, Up>>:
        Task<Perform<()>, Ok = (), Err: Error> + Send + Sync + 'static,
    Self: Clone,
{
    type Ok = ();
    type Err = Infallible;

    async fn execute(
        &self,
        Start(by): Start<By<PurgeExpiredSessions<Self>, Config>>,
    ) -> Result<Self::Ok, Self::Err> {
        let config = by.into_inner();
        let task = PurgeExpiredSessions {
            config,
            service: self.clone(),
        };

        let mut interval = interval(task.config.interval);
        loop {
            let _ = interval.tick().await;
            _ = task.execute(Perform(())).await.map_err(|e| {
                log::error!("`task::PurgeExpiredSessions` failed: {e}");
            });
        }
    }
}

impl<Db, Up> Task<Perform<()>> for PurgeExpiredSessions<Service<Db, Up>>
where
    Db: Database<
        Delete<By<u64, session::Expired>>,
        Ok = u64,
        Err = Traced<database::Error>,
    >,
{
    type Ok = ();
    type Err = ExecutionError;

    async fn execute(&self, _: Perform<()>) -> Result<Self::Ok, Self::Err> {
        let deadline = session::ExpirationDateTime::now();
        let purged = self
            .service
            .database()
            .execute(Delete(By::new(session::Expired(deadline))))
            .await
            .map_err(tracerr::map_from_and_wrap!())?;

        if purged > 0 {
            log::info!("purged {purged} expired sessions");
        }

        Ok(())
    }
}

/// Error of [`PurgeExpiredSessions`] execution.
pub type ExecutionError = Traced<database::Error>;
