use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{Error, ExpiryReason};
use crate::types::{AccessToken, NewAccount, RefreshToken, UserProfile};

/// Token pair returned by the login endpoint.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TokenPair {
    pub access: AccessToken,
    pub refresh: RefreshToken,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Refresh endpoint answer. `refresh` is present when the backend rotates.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct RefreshedTokens {
    pub access: AccessToken,
    #[serde(default)]
    pub refresh: Option<RefreshToken>,
}

/// Registration endpoint answer: a token pair, a confirmation, or both.
#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct RegisterResponse {
    #[serde(default)]
    pub access: Option<AccessToken>,
    #[serde(default)]
    pub refresh: Option<RefreshToken>,
    #[serde(default)]
    pub user: Option<UserProfile>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Result of asking the backend whether an access token is still good.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(Option<UserProfile>),
    Rejected { status: u16 },
}

/// Why the refresh endpoint did not produce a token. Cloneable so every
/// waiter on a shared refresh sees the same outcome.
#[derive(Debug, Clone)]
pub(crate) enum RefreshFailure {
    Expired(ExpiryReason),
    Network(Arc<reqwest::Error>),
    Config(String),
    Interrupted(String),
}

impl From<RefreshFailure> for Error {
    fn from(f: RefreshFailure) -> Self {
        match f {
            RefreshFailure::Expired(reason) => Self::SessionExpired(reason),
            RefreshFailure::Network(e) => Self::Network(e),
            RefreshFailure::Config(msg) => Self::Config(msg),
            RefreshFailure::Interrupted(msg) => Self::Interrupted(msg),
        }
    }
}

#[derive(Serialize)]
struct Credentials<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct VerifyResponse {
    #[serde(default)]
    user: Option<UserProfile>,
}

/// Unauthenticated exchanges with the backend's token endpoints.
///
/// Holds the HTTP client that the [`Session`](crate::Session) and the
/// [`AuthenticatedClient`](crate::AuthenticatedClient) share.
#[derive(Debug, Clone)]
pub struct AuthApi {
    config: ClientConfig,
    http: reqwest::Client,
}

impl AuthApi {
    /// Create an endpoint client with a fresh HTTP client built from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] if the HTTP client cannot be constructed.
    pub fn new(config: ClientConfig) -> Result<Self, Error> {
        let http = config.http_client()?;
        Ok(Self { config, http })
    }

    /// Use a custom HTTP client (for connection pool reuse or testing).
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Exchange a username and password for a token pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] with the backend's message when the
    /// credentials are rejected, or [`Error::Network`] on transport failure.
    pub async fn obtain_pair(&self, username: &str, password: &str) -> Result<TokenPair, Error> {
        let response = self
            .http
            .post(self.config.endpoint(&self.config.token_path)?)
            .json(&Credentials { username, password })
            .send()
            .await?;

        if !response.status().is_success() {
            let detail = backend_message(response).await;
            return Err(Error::Authentication(
                detail.unwrap_or_else(|| "Login failed".to_owned()),
            ));
        }
        response.json::<TokenPair>().await.map_err(Into::into)
    }

    /// Exchange a refresh token for a new access token.
    pub(crate) async fn refresh(
        &self,
        refresh_token: &RefreshToken,
    ) -> Result<RefreshedTokens, RefreshFailure> {
        let network = |e: reqwest::Error| RefreshFailure::Network(Arc::new(e));
        let url = self
            .config
            .endpoint(&self.config.refresh_path)
            .map_err(|e| RefreshFailure::Config(e.to_string()))?;

        let response = self
            .http
            .post(url)
            .json(&RefreshRequest {
                refresh: refresh_token.as_str(),
            })
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshFailure::Expired(ExpiryReason::Rejected {
                status: status.as_u16(),
            }));
        }
        response.json::<RefreshedTokens>().await.map_err(network)
    }

    /// Ask the backend whether `token` is still accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] when the backend could not be reached; a
    /// rejection is reported as [`Verification::Rejected`], not as an error.
    pub async fn verify(&self, token: &AccessToken) -> Result<Verification, Error> {
        let response = self
            .http
            .post(self.config.endpoint(&self.config.verify_path)?)
            .json(&VerifyRequest {
                token: token.as_str(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Ok(Verification::Rejected {
                status: status.as_u16(),
            });
        }
        // simplejwt answers `{}`; anything richer may carry a profile.
        let body = response.bytes().await?;
        let user = serde_json::from_slice::<VerifyResponse>(&body)
            .ok()
            .and_then(|v| v.user);
        Ok(Verification::Valid(user))
    }

    /// Create a new account.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Api`] with the backend's message when registration is
    /// refused, or [`Error::Network`] on transport failure.
    pub async fn register(&self, account: &NewAccount) -> Result<RegisterResponse, Error> {
        let response = self
            .http
            .post(self.config.endpoint(&self.config.register_path)?)
            .json(account)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = backend_message(response).await;
            return Err(Error::Api {
                operation: "registration",
                status: status.as_u16(),
                detail: detail.unwrap_or_else(|| "Registration failed".to_owned()),
            });
        }
        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(RegisterResponse::default());
        }
        serde_json::from_slice(&body).map_err(|e| Error::Api {
            operation: "registration",
            status: status.as_u16(),
            detail: format!("unreadable response: {e}"),
        })
    }
}

/// Pulls a human-readable message out of an error body.
///
/// Looks at `detail`, then `message`, then the first field error of a
/// validation response (`{"username": ["already taken"]}`).
pub(crate) async fn backend_message(response: reqwest::Response) -> Option<String> {
    let body = response.text().await.unwrap_or_default();
    message_from_body(&body)
}

fn message_from_body(body: &str) -> Option<String> {
    let json: serde_json::Value = match serde_json::from_str(body) {
        Ok(json) => json,
        Err(_) => {
            let trimmed = body.trim();
            return (!trimmed.is_empty()).then(|| trimmed.to_owned());
        }
    };

    for key in ["detail", "message"] {
        if let Some(text) = json.get(key).and_then(|v| v.as_str()) {
            return Some(text.to_owned());
        }
    }

    json.as_object()?.iter().find_map(|(field, value)| {
        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items.first()?.as_str()?.to_owned(),
            _ => return None,
        };
        Some(format!("{field}: {text}"))
    })
}
