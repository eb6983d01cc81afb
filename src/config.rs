use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::error::Error;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";

/// Backend location and endpoint layout.
///
/// Paths are resolved relative to the base URL, so they carry no leading
/// slash. Defaults match the judging backend's routing.
///
/// ```rust,ignore
/// use judging_session::ClientConfig;
///
/// let config = ClientConfig::new("https://judging.example.com/".parse()?)
///     .with_request_timeout(std::time::Duration::from_secs(15));
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ClientConfig {
    pub(crate) base_url: Url,
    pub(crate) token_path: String,
    pub(crate) refresh_path: String,
    pub(crate) verify_path: String,
    pub(crate) register_path: String,
    pub(crate) worklist_path: String,
    pub(crate) rubric_path: String,
    pub(crate) scores_path: String,
    pub(crate) approvals_path: String,
    pub(crate) request_timeout: Option<Duration>,
    pub(crate) credentials_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL.parse().expect("valid default URL"))
    }
}

impl ClientConfig {
    /// Create a configuration for the backend at `base_url`.
    #[must_use]
    pub fn new(mut base_url: Url) -> Self {
        // Without a trailing slash `join` would replace the last segment.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            base_url,
            token_path: "api/token/".into(),
            refresh_path: "api/token/refresh/".into(),
            verify_path: "api/token/verify/".into(),
            register_path: "api/register/".into(),
            worklist_path: "api/teams/teams/".into(),
            rubric_path: "api/judging/rubrics/".into(),
            scores_path: "api/judging/scores/".into(),
            approvals_path: "api/judging/approvals/".into(),
            request_timeout: None,
            credentials_path: None,
        }
    }

    /// Create config from environment variables.
    ///
    /// # Optional env vars
    /// - `JUDGING_API_URL`: backend base URL (default `http://127.0.0.1:8000/`)
    /// - `JUDGING_REQUEST_TIMEOUT_SECS`: per-request timeout in seconds
    /// - `JUDGING_CREDENTIALS_FILE`: where a [`FileStore`](crate::FileStore) keeps credentials
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self, Error> {
        let mut config = match std::env::var("JUDGING_API_URL") {
            Ok(url_str) => {
                let url: Url = url_str
                    .parse()
                    .map_err(|e| Error::Config(format!("JUDGING_API_URL: {e}")))?;
                Self::new(url)
            }
            Err(_) => {
                tracing::debug!(default = DEFAULT_BASE_URL, "JUDGING_API_URL not set, using default");
                Self::default()
            }
        };

        if let Ok(secs) = std::env::var("JUDGING_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("JUDGING_REQUEST_TIMEOUT_SECS: {e}")))?;
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Ok(path) = std::env::var("JUDGING_CREDENTIALS_FILE") {
            config = config.with_credentials_path(path);
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_token_path(mut self, path: impl Into<String>) -> Self {
        self.token_path = path.into();
        self
    }

    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    #[must_use]
    pub fn with_verify_path(mut self, path: impl Into<String>) -> Self {
        self.verify_path = path.into();
        self
    }

    #[must_use]
    pub fn with_register_path(mut self, path: impl Into<String>) -> Self {
        self.register_path = path.into();
        self
    }

    /// Override the worklist collection path. Team detail lives at `<path><id>/`.
    #[must_use]
    pub fn with_worklist_path(mut self, path: impl Into<String>) -> Self {
        self.worklist_path = path.into();
        self
    }

    #[must_use]
    pub fn with_rubric_path(mut self, path: impl Into<String>) -> Self {
        self.rubric_path = path.into();
        self
    }

    #[must_use]
    pub fn with_scores_path(mut self, path: impl Into<String>) -> Self {
        self.scores_path = path.into();
        self
    }

    #[must_use]
    pub fn with_approvals_path(mut self, path: impl Into<String>) -> Self {
        self.approvals_path = path.into();
        self
    }

    /// Bound every HTTP call. Without it a hung request waits on the transport.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    /// Backend base URL (always ends with `/`).
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout
    }

    #[must_use]
    pub fn credentials_path(&self) -> Option<&std::path::Path> {
        self.credentials_path.as_deref()
    }

    /// Resolve `path` against the base URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the result is not a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::Config(format!("{path}: {e}")))
    }

    /// URL of a single team under the worklist collection.
    pub(crate) fn team_url(&self, id: &str) -> Result<Url, Error> {
        let collection = self.worklist_path.trim_end_matches('/');
        self.endpoint(&format!("{collection}/{}/", urlencoding::encode(id)))
    }

    /// HTTP client honouring the configured timeout.
    pub(crate) fn http_client(&self) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder.build().map_err(Error::from)
    }
}
