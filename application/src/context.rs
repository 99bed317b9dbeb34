//! Authenticated request context definitions.

use axum::{async_trait, extract::FromRequestParts};
use service::domain::{session, user};

#[cfg(doc)]
use crate::guard;
use crate::error::{ApiError, Error};

/// Session authenticated by the [`guard`] and attached to the request.
#[derive(Clone, Debug)]
pub struct CurrentSession {
    /// [`session::Id`] of the authenticated session.
    pub session_id: session::Id,

    /// Stored [`user::Payload`] of the authenticated user.
    pub user: user::Payload,
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentSession
where
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(
        parts: &mut http::request::Parts,
        _: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| ApiError::AuthorizationRequired.into())
    }
}
