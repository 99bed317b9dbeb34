//! MongoDB [`Database`] implementation.

mod document;
mod impls;

use derive_more::{Display, Error as StdError, From};
#[cfg(doc)]
use mongodb::bson::oid::ObjectId;
use tracerr::Traced;

use crate::infra::database;
#[cfg(doc)]
use crate::{domain::session, infra::Database};

/// MongoDB [`Database`] client, scoped to the collection holding
/// [`session::Record`]s.
#[derive(Clone, Debug)]
pub struct Mongo {
    /// Collection the [`session::Record`]s live in.
    collection: mongodb::Collection<document::SessionDocument>,
}

impl Mongo {
    /// Creates a new [`Mongo`] client with the provided [`Config`].
    ///
    /// # Errors
    ///
    /// If failed to connect to the configured MongoDB deployment.
    pub async fn new(conf: &Config) -> Result<Self, Traced<database::Error>> {
        let client = mongodb::Client::with_uri_str(&conf.uri)
            .await
            .map_err(tracerr::from_and_wrap!(=> Error))
            .map_err(tracerr::map_from)?;
        Ok(Self {
            collection: client
                .database(&conf.database)
                .collection(&conf.collection),
        })
    }
}

/// [`Mongo`] client configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Connection URI of the MongoDB deployment.
    pub uri: String,

    /// Name of the database holding the sessions collection.
    pub database: String,

    /// Name of the sessions collection.
    pub collection: String,
}

/// MongoDB database [`Error`].
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    /// MongoDB driver error.
    #[display("MongoDB driver operation failed: {_0}")]
    Driver(mongodb::error::Error),

    /// Identity value failed to convert into a BSON filter.
    #[display("identity value is not representable in BSON: {_0}")]
    IdentityNotBson(mongodb::bson::ser::Error),

    /// Stored session document doesn't map back into a domain record.
    #[display("stored session document is malformed")]
    MalformedDocument,

    /// Inserted session document got assigned a non-[`ObjectId`] ID.
    #[display("inserted session document got a non-ObjectId `_id`")]
    UnexpectedIdType,
}
