use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Method, Request, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use url::Url;

use crate::error::{Error, ValidationError};
use crate::session::Session;
use crate::types::AccessToken;

/// Sends protected requests on behalf of a [`Session`].
///
/// Every data call goes through [`call`](Self::call): it attaches the bearer
/// token, and on `401 Unauthorized` renews the token once (shared with any
/// concurrent caller) and resends once. Statuses other than 401 are returned
/// untouched for the caller to interpret.
///
/// ```rust,ignore
/// let client = AuthenticatedClient::new(session.clone());
/// let response = client.get("api/teams/teams/").await?;
/// ```
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    session: Session,
}

impl AuthenticatedClient {
    #[must_use]
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Start a request to `path`, relative to the configured base URL.
    ///
    /// The builder carries no credentials; [`call`](Self::call) adds them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `path` does not resolve to a valid URL.
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder, Error> {
        let url = self.session.api().config().endpoint(path)?;
        Ok(self.request_url(method, url))
    }

    pub(crate) fn request_url(&self, method: Method, url: Url) -> RequestBuilder {
        self.session.api().http().request(method, url)
    }

    /// `GET path` through [`call`](Self::call).
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn get(&self, path: &str) -> Result<Response, Error> {
        let request = self.request(Method::GET, path)?.build()?;
        self.call(request).await
    }

    /// `POST path` with a JSON body through [`call`](Self::call).
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<Response, Error> {
        let request = self.request(Method::POST, path)?.json(body).build()?;
        self.call(request).await
    }

    /// Send `request` with the current access token.
    ///
    /// On 401:
    /// - without a refresh token the session is signed out and the 401 returned;
    /// - otherwise the token is renewed and the request resent exactly once;
    ///   that second response is returned whatever its status, and a second
    ///   401 signs the session out;
    /// - if renewal fails terminally (the session is already signed out) the
    ///   original 401 is returned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Network`] when either attempt, or the renewal, fails in
    /// transport.
    pub async fn call(&self, request: Request) -> Result<Response, Error> {
        let token = self.session.access_token();
        let replay = request.try_clone();

        let response = self.send(request, token.as_ref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        if !self.session.has_refresh_token() {
            tracing::warn!(url = %response.url(), "Request unauthorized without a refresh token, signing out");
            self.session.logout();
            return Ok(response);
        }

        let fresh = match self.session.renew_rejected(token.as_ref()).await {
            Ok(fresh) => fresh,
            Err(e) if e.is_terminal() => return Ok(response),
            Err(e) => return Err(e),
        };

        let Some(replay) = replay else {
            tracing::warn!(url = %response.url(), "Request body cannot be replayed, not retrying");
            return Ok(response);
        };

        let retried = self.send(replay, Some(&fresh)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(url = %retried.url(), "Request rejected after token refresh, signing out");
            self.session.logout();
        }
        Ok(retried)
    }

    async fn send(&self, mut request: Request, token: Option<&AccessToken>) -> Result<Response, Error> {
        match token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
                    .map_err(|_| ValidationError::InvalidToken)?;
                value.set_sensitive(true);
                request.headers_mut().insert(AUTHORIZATION, value);
            }
            None => {
                request.headers_mut().remove(AUTHORIZATION);
            }
        }
        Ok(self.session.api().http().execute(request).await?)
    }
}
