//! Bearer-token guard protecting the API routes.

use std::sync::Arc;

use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse as _, Response},
    Extension,
};
use http::{header, HeaderMap};
use service::{domain::session::Token, Command as _};

use crate::{
    error::{ApiError, AsError as _},
    CurrentSession, Service,
};

/// Path prefixes reachable without a bearer token.
#[derive(Clone, Debug)]
pub struct PublicPaths(Arc<[String]>);

impl PublicPaths {
    /// Creates a new [`PublicPaths`] allowlist out of the provided prefixes.
    #[must_use]
    pub fn new(prefixes: Vec<String>) -> Self {
        Self(prefixes.into())
    }

    /// Indicates whether the provided request path is reachable without a
    /// bearer token.
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.0.iter().any(|prefix| path.starts_with(prefix.as_str()))
    }
}

/// Authenticates every non-public request by its `Authorization: Bearer`
/// header before dispatching it.
///
/// On success the [`CurrentSession`] is attached to the request extensions;
/// any failure short-circuits into a structured unauthorized response.
pub async fn require_auth(
    Extension(service): Extension<Service>,
    Extension(public_paths): Extension<PublicPaths>,
    mut request: Request,
    next: Next,
) -> Response {
    if public_paths.contains(request.uri().path()) {
        return next.run(request).await;
    }

    let Some(token) = bearer_token(request.headers()) else {
        return crate::Error::from(ApiError::AuthorizationRequired)
            .into_response();
    };

    match service
        .execute(service::command::AuthorizeSession {
            token: Token::from(token.to_owned()),
        })
        .await
    {
        Ok(authorized) => {
            _ = request.extensions_mut().insert(CurrentSession {
                session_id: authorized.session_id,
                user: authorized.user,
            });
            next.run(request).await
        }
        Err(e) => e.into_error().into_response(),
    }
}

/// Extracts a non-empty bearer token out of the `Authorization` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let authorization = headers.get(header::AUTHORIZATION)?.to_str().ok()?;

    let (scheme, token) = authorization.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|token| !token.is_empty())
}
