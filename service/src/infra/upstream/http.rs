//! HTTP implementation of the [`Upstream`] provider client.

use std::time::Duration;

use common::operations::Perform;
use derive_more::{Display, Error as StdError};
use secrecy::ExposeSecret as _;
use serde_json::json;
use tracerr::Traced;

use crate::infra::upstream::{self, Login, Renew, TokenPair, Upstream};

/// HTTP [`Upstream`] provider client.
///
/// Applies the configured bounded timeout to every request and never retries
/// on its own: every failure is classified once and propagated.
#[derive(Clone, Debug)]
pub struct Http {
    /// Underlying HTTP client.
    client: reqwest::Client,

    /// Full URL of the upstream login endpoint.
    login_url: String,

    /// Full URL of the upstream refresh endpoint.
    refresh_url: String,
}

impl Http {
    /// Creates a new [`Http`] client with the provided [`Config`].
    ///
    /// # Errors
    ///
    /// Errors if the base URL is not configured, or the underlying HTTP
    /// client fails to initialize. Both are fatal configuration errors and
    /// must abort startup.
    pub fn new(conf: &Config) -> Result<Self, Traced<upstream::Error>> {
        if conf.base_url.trim().is_empty() {
            return Err(tracerr::new!(Error::MissingBaseUrl))
                .map_err(tracerr::map_from);
        }
        let base = conf.base_url.trim_end_matches('/');

        let client = reqwest::Client::builder()
            .timeout(conf.timeout)
            .build()
            .map_err(|e| tracerr::new!(Error::Initialization(e)))
            .map_err(tracerr::map_from)?;

        Ok(Self {
            client,
            login_url: format!("{base}{}", conf.login_endpoint),
            refresh_url: format!("{base}{}", conf.refresh_endpoint),
        })
    }

    /// Sends the provided request and decodes the upstream answer into a
    /// [`TokenPair`], telling client-side rejections apart from
    /// availability failures.
    async fn token_pair(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<TokenPair, Traced<upstream::Error>> {
        use upstream::Error as E;

        let response = request
            .send()
            .await
            .map_err(|e| tracerr::new!(E::Unavailable(Error::Request(e))))?;

        let status = response.status().as_u16();
        if matches!(status, 400 | 401 | 403) {
            return Err(tracerr::new!(E::Rejected(status)));
        }
        if !response.status().is_success() {
            return Err(tracerr::new!(E::Unavailable(Error::Status(status))));
        }

        response.json::<TokenPair>().await.map_err(|e| {
            tracerr::new!(E::Unavailable(Error::MalformedResponse(e)))
        })
    }
}

impl Upstream<Perform<Login>> for Http {
    type Ok = TokenPair;
    type Err = Traced<upstream::Error>;

    async fn execute(
        &self,
        Perform(login): Perform<Login>,
    ) -> Result<Self::Ok, Self::Err> {
        let Login { email, password } = login;
        let body = json!({
            "email": AsRef::<str>::as_ref(&email),
            "password": AsRef::<str>::as_ref(password.expose_secret()),
        });

        self.token_pair(self.client.post(&self.login_url).json(&body))
            .await
    }
}

impl Upstream<Perform<Renew>> for Http {
    type Ok = TokenPair;
    type Err = Traced<upstream::Error>;

    async fn execute(
        &self,
        Perform(renew): Perform<Renew>,
    ) -> Result<Self::Ok, Self::Err> {
        let Renew { refresh_token } = renew;

        self.token_pair(
            self.client
                .post(&self.refresh_url)
                .bearer_auth(refresh_token.expose_secret()),
        )
        .await
    }
}

/// [`Http`] client configuration.
#[derive(Clone, Debug)]
pub struct Config {
    /// Base URL of the upstream provider
    /// (e.g. `https://auth.example.com/api`).
    pub base_url: String,

    /// Endpoint of the upstream login operation, relative to the base URL.
    pub login_endpoint: String,

    /// Endpoint of the upstream refresh operation, relative to the base URL.
    pub refresh_endpoint: String,

    /// Timeout applied to every upstream request.
    pub timeout: Duration,
}

/// [`Http`] client [`Error`].
#[derive(Debug, Display, StdError)]
pub enum Error {
    /// Base URL of the upstream provider is not configured.
    #[display("upstream provider base URL is not configured")]
    MissingBaseUrl,

    /// Underlying HTTP client failed to initialize.
    #[display("failed to initialize the upstream HTTP client: {_0}")]
    Initialization(reqwest::Error),

    /// Request to the upstream provider failed to complete (network error or
    /// timeout).
    #[display("request to the upstream provider failed: {_0}")]
    Request(reqwest::Error),

    /// Upstream provider answered with an unexpected status.
    #[display("upstream provider answered with HTTP {_0}")]
    Status(#[error(not(source))] u16),

    /// Upstream provider answered with a body not decodable as a token pair.
    #[display("upstream provider returned a malformed response: {_0}")]
    MalformedResponse(reqwest::Error),
}
