//! REST API definitions.

use axum::{Extension, Json};
use secrecy::SecretBox;
use serde::{ser::SerializeStruct as _, Deserialize, Serialize, Serializer};
use serde_json::json;
use service::{
    command,
    domain::{session, user},
    query, Command as _, Query as _,
};
use tracing as log;

use crate::{
    error::{ApiError, AsError as _},
    CurrentSession, Error, Service,
};

/// Body of the login request.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Email to authenticate with.
    pub email: String,

    /// Plain-text password, sent over a TLS channel.
    pub password: String,
}

/// Body of the refresh request.
#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    /// Derived refresh token issued previously.
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

/// Derived token pair response, as both login and refresh answer it.
///
/// Serializes each field twice: camelCase for the API's own clients and
/// snake_case for OAuth2-style tooling, matching the established wire shape.
#[derive(Debug)]
pub struct TokenPairResponse {
    /// Derived access token.
    pub access_token: String,

    /// Derived refresh token.
    pub refresh_token: String,

    /// User payload exposed to the client.
    pub user: user::Payload,
}

impl TokenPairResponse {
    /// Token type exposed by the OAuth2-style flow.
    const TOKEN_TYPE: &'static str = "bearer";
}

impl From<command::create_session::Output> for TokenPairResponse {
    fn from(output: command::create_session::Output) -> Self {
        let command::create_session::Output {
            access_token,
            refresh_token,
            user,
        } = output;

        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            user,
        }
    }
}

impl Serialize for TokenPairResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut s =
            serializer.serialize_struct("TokenPairResponse", 7)?;
        s.serialize_field("accessToken", &self.access_token)?;
        s.serialize_field("refreshToken", &self.refresh_token)?;
        s.serialize_field("tokenType", Self::TOKEN_TYPE)?;
        s.serialize_field("user", &self.user)?;
        s.serialize_field("access_token", &self.access_token)?;
        s.serialize_field("refresh_token", &self.refresh_token)?;
        s.serialize_field("token_type", Self::TOKEN_TYPE)?;
        s.end()
    }
}

/// Status of the authenticated session.
#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    /// ID of the session.
    #[serde(rename = "sessionId")]
    pub session_id: String,

    /// Stored user payload of the session.
    pub user: user::Payload,

    /// Moment the current token pair was issued.
    #[serde(rename = "issuedAt")]
    pub issued_at: session::IssuanceDateTime,

    /// Moment the session was last used to authorize a request.
    #[serde(rename = "lastAccessAt")]
    pub last_access_at: Option<session::AccessDateTime>,

    /// Moment the derived access token expires.
    #[serde(rename = "accessExpiresAt")]
    pub access_expires_at: Option<session::ExpirationDateTime>,

    /// Moment the whole session expires.
    #[serde(rename = "refreshExpiresAt")]
    pub refresh_expires_at: Option<session::ExpirationDateTime>,
}

/// `POST /auth/login` handler.
///
/// # Errors
///
/// Errors if the credentials are malformed, the upstream provider rejects
/// them, or minting the session fails.
pub async fn login(
    Extension(service): Extension<Service>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, Error> {
    let email = user::Email::new(request.email)
        .ok_or_else(|| Error::from(ApiError::InvalidEmail))?;
    let password = user::Password::new(request.password)
        .ok_or_else(|| Error::from(ApiError::InvalidPassword))?;
    log::info!(email = %email, "login attempt");

    service
        .execute(command::CreateSession {
            email,
            password: SecretBox::new(Box::new(password)),
        })
        .await
        .map(|output| Json(output.into()))
        .map_err(|e| e.into_error())
}

/// `POST /auth/refresh` handler.
///
/// # Errors
///
/// Errors if the presented refresh token doesn't verify against the stored
/// session, or renewing the upstream session fails.
pub async fn refresh(
    Extension(service): Extension<Service>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, Error> {
    log::info!("session refresh requested");

    service
        .execute(command::RefreshSession {
            token: session::Token::from(request.refresh_token),
        })
        .await
        .map(|output| Json(output.into()))
        .map_err(|e| e.into_error())
}

/// `GET /auth/session` handler.
///
/// # Errors
///
/// Errors if the authenticated session disappeared since the request was
/// authorized.
pub async fn session_status(
    Extension(service): Extension<Service>,
    session: CurrentSession,
) -> Result<Json<SessionStatusResponse>, Error> {
    let record = service
        .execute(query::session::ById::by(session.session_id))
        .await
        .map_err(|e| e.into_error())?
        .ok_or_else(|| Error::from(ApiError::SessionNotFound))?;

    Ok(Json(SessionStatusResponse {
        session_id: record.session_id.into(),
        user: record.user,
        issued_at: record.issued_at,
        last_access_at: record.last_access_at,
        access_expires_at: record.access_expires_at,
        refresh_expires_at: record.refresh_expires_at,
    }))
}

/// `GET /health` handler.
#[expect(
    clippy::unused_async,
    reason = "`async` is required to match signature"
)]
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
