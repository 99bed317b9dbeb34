//! [`Query`] collection related to a single session.

use common::operations::By;

use crate::domain::session;
#[cfg(doc)]
use crate::Query;

use super::DatabaseQuery;

/// Queries a session [`Record`] by its [`session::Id`].
///
/// [`Record`]: session::Record
pub type ById = DatabaseQuery<By<Option<session::Record>, session::Id>>;
