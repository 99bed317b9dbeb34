//! [`Database`]-related implementations.

pub mod mongo;

use derive_more::{Display, Error as StdError, From};

pub use self::mongo::Mongo;

/// Database operation.
pub use common::Handler as Database;

/// [`Database`] error.
#[derive(Debug, Display, From, StdError)]
pub enum Error {
    /// [`Mongo`] error.
    Mongo(mongo::Error),
}
