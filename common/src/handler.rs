//! [`Handler`] abstractions.

use std::future::Future;

/// Executable handler.
///
/// This is the single seam every collaborator of the system is expressed
/// through: database operations, upstream provider calls, commands, queries
/// and background tasks are all [`Handler`]s over their argument types.
pub trait Handler<Args = ()> {
    /// Type of successful [`Handler`] result.
    type Ok;

    /// Type of this [`Handler`] error.
    type Err;

    /// Executes this [`Handler`] with the provided arguments.
    fn execute(
        &self,
        args: Args,
    ) -> impl Future<Output = Result<Self::Ok, Self::Err>>;
}
