use std::sync::Arc;

/// Errors surfaced by the session, the request wrapper and the judging API.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Credentials were rejected. Recoverable by prompting again.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The session could not be renewed and has been cleared.
    #[error("Session expired: {0}")]
    SessionExpired(ExpiryReason),

    /// Transport failure or an undecodable response body.
    #[error("Network error: {0}")]
    Network(#[source] Arc<reqwest::Error>),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// One or both halves of an evaluation submission failed.
    #[error("{failed} submission failed: {source}")]
    PartialSubmission {
        failed: SubmissionPart,
        #[source]
        source: Box<Error>,
    },

    /// The backend answered with an unexpected non-2xx status.
    #[error("{operation} failed with status {status}: {detail}")]
    Api {
        operation: &'static str,
        status: u16,
        detail: String,
    },

    /// A background task ended before producing a result.
    #[error("Interrupted: {0}")]
    Interrupted(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(Arc::new(e))
    }
}

impl Error {
    /// `true` for failures that end the session.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

/// Why a refresh could not produce a new access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ExpiryReason {
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("refresh token has expired")]
    RefreshTokenExpired,
    #[error("refresh rejected with status {status}")]
    Rejected { status: u16 },
}

/// Client-side input problems, caught before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),
    #[error("unknown rubric criterion: {0}")]
    UnknownCriterion(String),
    #[error("criteria left unscored: {}", .0.join(", "))]
    UnscoredCriteria(Vec<String>),
    #[error("rubric has no criteria")]
    EmptyRubric,
    #[error("duplicate rubric criterion: {0}")]
    DuplicateCriterion(String),
    #[error("reserved rubric criterion name: {0}")]
    ReservedCriterion(String),
    #[error("access token is not a valid header value")]
    InvalidToken,
}

/// Which half of an evaluation submission failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum SubmissionPart {
    #[display("Score")]
    Scores,
    #[display("Approval")]
    Approvals,
    #[display("Score and approval")]
    Both,
}
