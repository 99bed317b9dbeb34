//! [`Error`]-related definitions.

use std::fmt;

use axum::response::{IntoResponse, Response};
use derive_more::Error as StdError;
use serde_json::json;
use service::{
    command::{authorize_session, create_session, refresh_session},
    infra::{database, upstream},
};
use tracerr::{Trace, Traced};

/// Defines a new error type.
#[expect(clippy::module_name_repetitions, reason = "more readable")]
#[macro_export]
macro_rules! define_error {
    (
        enum $name:ident {
            $(
                #[code = $code:literal]
                #[status = $status_code:ident]
                #[message = $message:literal]
                $variant:ident
            ),* $(,)?
        }
    ) => {
        /// Error type.
        #[derive(
            Clone,
            Copy,
            Debug,
            ::derive_more::Display,
            ::derive_more::Error
        )]
        #[repr(u16)]
        pub enum $name {
            $(
                #[display($message)]
                #[doc = $message]
                $variant,
            )*
        }

        impl From<$name> for $crate::Error {
            fn from(err: $name) -> Self {
                match err {
                    $(
                        $name::$variant => Self {
                            code: $code,
                            status_code: ::http::StatusCode::$status_code,
                            message: $message.to_string(),
                            backtrace: None,
                        },
                    )*
                }
            }
        }
    };
}

/// REST API [`Error`].
#[derive(Clone, Debug, StdError)]
pub struct Error {
    /// [`Error`] code.
    pub code: Code,

    /// [`http::StatusCode`] of this [`Error`].
    pub status_code: http::StatusCode,

    /// Backtrace of this [`Error`].
    #[error(not(backtrace))]
    pub backtrace: Option<Trace>,

    /// [`Error`] message.
    pub message: String,
}

impl Error {
    /// Create a new [`Error`] representing an internal server error.
    #[must_use]
    pub fn internal(msg: &impl ToString) -> Self {
        Self {
            code: "INTERNAL_SERVER_ERROR",
            status_code: http::StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.to_string(),
            backtrace: None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Self {
            code,
            status_code: _,
            backtrace,
            message,
        } = self;

        write!(f, "[{code}]: {message}")?;
        if let Some(trace) = backtrace {
            write!(f, "\n{trace}")?;
        }
        Ok(())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let Self {
            code,
            status_code,
            backtrace: _,
            message,
        } = self;

        (
            status_code,
            axum::Json(json!({
                "code": code,
                "detail": message,
            })),
        )
            .into_response()
    }
}

/// [`Error`] code.
pub type Code = &'static str;

/// Helper trait for converting types into [`Error`]s.
pub trait AsError {
    /// Tries to convert the type into an [`Error`].
    ///
    /// [`None`] is returned if the type cannot be converted into an [`Error`].
    fn try_as_error(&self) -> Option<Error>;

    /// Converts the type into an [`Error`].
    fn as_error(&self) -> Error
    where
        Self: fmt::Display,
    {
        self.try_as_error()
            .unwrap_or_else(|| Error::internal(&self))
    }

    /// Converts the type into an [`Error`] by consuming it.
    fn into_error(self) -> Error
    where
        Self: fmt::Display + Sized,
    {
        self.as_error()
    }
}

impl<E: AsError> AsError for Traced<E> {
    fn try_as_error(&self) -> Option<Error> {
        let mut error = self.as_ref().try_as_error()?;
        error.backtrace = Some(self.trace().clone());
        Some(error)
    }
}

impl AsError for database::Error {
    fn try_as_error(&self) -> Option<Error> {
        None
    }
}

impl AsError for upstream::Error {
    fn try_as_error(&self) -> Option<Error> {
        match self {
            Self::Rejected(_) => Some(ApiError::InvalidCredentials.into()),
            Self::Unavailable(_) => {
                Some(ApiError::UpstreamUnavailable.into())
            }
        }
    }
}

impl AsError for create_session::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        use create_session::ExecutionError as E;

        match self {
            E::MissingSigningSecret => Some(ApiError::Misconfigured.into()),
            E::Upstream(e) => e.try_as_error(),
            // The plaintext is fresh here, so an encryption failure is an
            // internal fault, not a client one.
            E::Cipher(_) | E::Db(_) => None,
        }
    }
}

impl AsError for refresh_session::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        use refresh_session::ExecutionError as E;

        match self {
            E::MissingSigningSecret => Some(ApiError::Misconfigured.into()),
            E::MalformedToken(_) | E::TokenMismatch | E::InvalidToken(_) => {
                Some(ApiError::InvalidRefreshToken.into())
            }
            E::SessionNotFound(_) => Some(ApiError::SessionNotFound.into()),
            E::SessionExpired => Some(ApiError::SessionExpired.into()),
            E::Upstream(e) => e.try_as_error(),
            E::Cipher(_) | E::Db(_) => None,
        }
    }
}

impl AsError for authorize_session::ExecutionError {
    fn try_as_error(&self) -> Option<Error> {
        use authorize_session::ExecutionError as E;

        match self {
            // A cipher failure on the verification path rejects like any
            // other invalid token instead of leaking storage details.
            E::MalformedToken(_)
            | E::TokenMismatch
            | E::InvalidToken(_)
            | E::Cipher(_) => Some(ApiError::InvalidToken.into()),
            E::SessionNotFound(_) => Some(ApiError::SessionNotFound.into()),
            E::AccessExpired => Some(ApiError::TokenExpired.into()),
            E::SessionExpired => Some(ApiError::SessionExpired.into()),
            E::Db(_) => None,
        }
    }
}

define_error! {
    enum ApiError {
        #[code = "AUTHORIZATION_REQUIRED"]
        #[status = UNAUTHORIZED]
        #[message = "Missing or malformed bearer token"]
        AuthorizationRequired,

        #[code = "INVALID_TOKEN"]
        #[status = UNAUTHORIZED]
        #[message = "Invalid token"]
        InvalidToken,

        #[code = "TOKEN_EXPIRED"]
        #[status = UNAUTHORIZED]
        #[message = "The token has expired"]
        TokenExpired,

        #[code = "INVALID_REFRESH_TOKEN"]
        #[status = UNAUTHORIZED]
        #[message = "Invalid refresh token"]
        InvalidRefreshToken,

        #[code = "SESSION_NOT_FOUND"]
        #[status = UNAUTHORIZED]
        #[message = "Session not found or expired"]
        SessionNotFound,

        #[code = "SESSION_EXPIRED"]
        #[status = UNAUTHORIZED]
        #[message = "The session has expired"]
        SessionExpired,

        #[code = "INVALID_CREDENTIALS"]
        #[status = UNAUTHORIZED]
        #[message = "Invalid or unauthorized credentials"]
        InvalidCredentials,

        #[code = "INVALID_EMAIL"]
        #[status = UNPROCESSABLE_ENTITY]
        #[message = "Email address is not well-formed"]
        InvalidEmail,

        #[code = "INVALID_PASSWORD"]
        #[status = UNPROCESSABLE_ENTITY]
        #[message = "Password must be between 8 and 128 characters long"]
        InvalidPassword,

        #[code = "UPSTREAM_UNAVAILABLE"]
        #[status = BAD_GATEWAY]
        #[message = "Failed to communicate with the authentication provider"]
        UpstreamUnavailable,

        #[code = "CONFIGURATION_ERROR"]
        #[status = INTERNAL_SERVER_ERROR]
        #[message = "Authentication is not configured correctly"]
        Misconfigured,
    }
}
