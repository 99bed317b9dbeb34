//! [`Config`]-related definitions.

use std::time;

use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use secrecy::SecretString;
use serde::Deserialize;
use smart_default::SmartDefault;

/// Application configuration.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    pub server: Server,

    /// Service configuration.
    pub service: Service,

    /// Upstream identity provider configuration.
    pub upstream: Upstream,

    /// MongoDB configuration.
    pub mongo: Mongo,

    /// Log configuration.
    pub log: Log,
}

impl Config {
    /// Creates a new [`Config`] by:
    /// - loading it from the provided `path` (if any);
    /// - merging it with the environment variables (if any);
    /// - using default values for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(path: impl AsRef<str>) -> Result<Self, ConfigError> {
        ConfigBuilder::<DefaultState>::default()
            .add_source(config::File::with_name(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("CONF").separator("."))
            .build()?
            .try_deserialize()
    }
}

/// Server configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Server {
    /// Host to bind the server to.
    #[default("0.0.0.0".to_owned())]
    pub host: String,

    /// Port to bind the server to.
    #[default(8080)]
    pub port: u16,

    /// [CORS] configuration.
    ///
    /// [CORS]: https://developer.mozilla.org/en-US/docs/Web/HTTP/CORS
    pub cors: Cors,

    /// Path prefixes reachable without a bearer token.
    #[default(vec![
        "/auth/login".to_owned(),
        "/auth/refresh".to_owned(),
        "/health".to_owned(),
    ])]
    pub public_paths: Vec<String>,
}

/// [CORS] configuration.
///
/// [CORS]: https://developer.mozilla.org/en-US/docs/Web/HTTP/CORS
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Cors {
    /// List of allowed origins.
    #[default(vec!["*".to_owned()])]
    pub origins: Vec<String>,
}

/// Service configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Service {
    /// Secret signing derived access tokens.
    pub auth_secret: String,

    /// Separate secret signing derived refresh tokens, falling back to
    /// `auth_secret` when unset.
    pub refresh_secret: Option<String>,

    /// Key encrypting upstream tokens at rest: 64 hex characters, base64 of
    /// 32 bytes, or 32 raw bytes.
    pub encryption_key: String,

    /// Fallback lifetime of derived access tokens, applied whenever the
    /// upstream provider doesn't report one. Unset means no expiry.
    #[default(Some(time::Duration::from_secs(60 * 60 * 48)))]
    #[serde(with = "humantime_serde")]
    pub derived_token_ttl: Option<time::Duration>,

    /// Fallback lifetime of whole sessions, applied whenever the upstream
    /// provider doesn't report a refresh token lifetime. Unset means no
    /// expiry.
    #[default(Some(time::Duration::from_secs(60 * 60 * 24 * 7)))]
    #[serde(with = "humantime_serde")]
    pub session_ttl: Option<time::Duration>,

    /// Maximum number of live sessions a single user identity may hold.
    #[default(2)]
    pub max_sessions: usize,

    /// Interval between expired session purges.
    #[default(time::Duration::from_secs(60 * 60))]
    #[serde(with = "humantime_serde")]
    pub purge_interval: time::Duration,
}

impl TryFrom<Service> for service::Config {
    type Error = service::infra::cipher::Error;

    fn try_from(value: Service) -> Result<Self, Self::Error> {
        let Service {
            auth_secret,
            refresh_secret,
            encryption_key,
            derived_token_ttl,
            session_ttl,
            max_sessions,
            purge_interval,
        } = value;

        Ok(Self {
            access_secret: SecretString::from(auth_secret),
            refresh_secret: refresh_secret.map(SecretString::from),
            access_ttl: derived_token_ttl,
            refresh_ttl: session_ttl,
            max_sessions_per_user: max_sessions,
            vault: service::infra::Vault::new(&SecretString::from(
                encryption_key,
            ))?,
            purge_expired_sessions:
                service::task::purge_expired_sessions::Config {
                    interval: purge_interval,
                },
        })
    }
}

/// Upstream identity provider configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Upstream {
    /// Base URL of the upstream provider
    /// (e.g. `https://auth.example.com/api`). Required.
    pub base_url: String,

    /// Endpoint of the upstream login operation, relative to `base_url`.
    #[default("/auth/login".to_owned())]
    pub login_endpoint: String,

    /// Endpoint of the upstream refresh operation, relative to `base_url`.
    #[default("/auth/refresh".to_owned())]
    pub refresh_endpoint: String,

    /// Timeout applied to every upstream request.
    #[default(time::Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub timeout: time::Duration,
}

impl From<Upstream> for service::infra::http::Config {
    fn from(value: Upstream) -> Self {
        let Upstream {
            base_url,
            login_endpoint,
            refresh_endpoint,
            timeout,
        } = value;

        Self {
            base_url,
            login_endpoint,
            refresh_endpoint,
            timeout,
        }
    }
}

/// MongoDB configuration.
#[derive(Clone, Debug, Deserialize, SmartDefault)]
#[serde(default)]
pub struct Mongo {
    /// Connection URI of the MongoDB deployment.
    #[default("mongodb://127.0.0.1:27017".to_owned())]
    pub uri: String,

    /// Name of the database holding the sessions collection.
    #[default("auth".to_owned())]
    pub database: String,

    /// Name of the sessions collection.
    #[default("sessions".to_owned())]
    pub collection: String,
}

impl From<Mongo> for service::infra::mongo::Config {
    fn from(value: Mongo) -> Self {
        let Mongo {
            uri,
            database,
            collection,
        } = value;

        Self {
            uri,
            database,
            collection,
        }
    }
}

/// Log configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Log {
    /// Log level.
    pub level: LogLevel,
}

/// Log level.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    /// Designates very low priority, often extremely verbose, information.
    Trace,

    /// Designates lower priority information.
    Debug,

    /// Designates useful information.
    #[default]
    Info,

    /// Designates hazardous situations.
    Warn,

    /// Designates very serious errors.
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Self::TRACE,
            LogLevel::Debug => Self::DEBUG,
            LogLevel::Info => Self::INFO,
            LogLevel::Warn => Self::WARN,
            LogLevel::Error => Self::ERROR,
        }
    }
}
