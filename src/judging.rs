use std::collections::BTreeMap;

use reqwest::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};

use crate::auth::backend_message;
use crate::client::AuthenticatedClient;
use crate::error::Error;
use crate::rubric::{ApprovalPayload, Criterion, Rubric, ScorePayload};
use crate::types::TeamId;

/// Review state of a worklist entry, as labelled by the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ReviewProgress {
    #[serde(rename = "Reviewed")]
    Reviewed,
    #[serde(rename = "In Review")]
    InReview,
    #[default]
    #[serde(rename = "Not Reviewed")]
    NotReviewed,
    #[serde(other)]
    Unknown,
}

/// One row of the evaluator's worklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TeamSummary {
    pub id: u64,
    pub team_id: TeamId,
    pub team_name: String,
    #[serde(default)]
    pub idea_title: Option<String>,
    #[serde(default)]
    pub ps_title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub progress: ReviewProgress,
    #[serde(default)]
    pub marks: Option<u32>,
}

/// An idea submitted by a team against a problem statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct Idea {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub sih_ps_id: String,
    #[serde(default)]
    pub ps_title: String,
    #[serde(default)]
    pub ps_description: String,
    pub idea_title: String,
    #[serde(default)]
    pub idea_description: String,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub is_primary: bool,
}

/// A team with its ideas and the current evaluator's earlier scores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct TeamDetail {
    pub id: u64,
    pub team_id: TeamId,
    pub team_name: String,
    #[serde(default)]
    pub ideas: Vec<Idea>,
    #[serde(default)]
    pub prior_scores: BTreeMap<String, i64>,
}

impl TeamDetail {
    /// The idea flagged primary, else the first one listed.
    #[must_use]
    pub fn primary_idea(&self) -> Option<&Idea> {
        self.primary_index().map(|i| &self.ideas[i])
    }

    pub fn secondary_ideas(&self) -> impl Iterator<Item = &Idea> {
        let primary = self.primary_index();
        self.ideas
            .iter()
            .enumerate()
            .filter(move |(i, _)| Some(*i) != primary)
            .map(|(_, idea)| idea)
    }

    fn primary_index(&self) -> Option<usize> {
        self.ideas
            .iter()
            .position(|idea| idea.is_primary)
            .or_else(|| (!self.ideas.is_empty()).then_some(0))
    }

    /// Titles an evaluator may approve: the primary idea first.
    #[must_use]
    pub fn idea_titles(&self) -> Vec<&str> {
        self.primary_idea()
            .into_iter()
            .chain(self.secondary_ideas())
            .map(|idea| idea.idea_title.as_str())
            .collect()
    }
}

#[derive(Deserialize)]
struct RubricEntry {
    name: String,
    #[serde(default)]
    max_score: Option<u32>,
}

/// Typed access to the judging endpoints. Every call goes through the
/// [`AuthenticatedClient`], so token renewal is handled there.
#[derive(Debug, Clone)]
pub struct JudgingApi {
    client: AuthenticatedClient,
}

impl JudgingApi {
    #[must_use]
    pub fn new(client: AuthenticatedClient) -> Self {
        Self { client }
    }

    #[must_use]
    pub fn client(&self) -> &AuthenticatedClient {
        &self.client
    }

    /// # Errors
    ///
    /// [`Error::Api`] on a non-2xx answer, [`Error::Network`] on transport or
    /// decode failure.
    pub async fn fetch_worklist(&self) -> Result<Vec<TeamSummary>, Error> {
        let path = &self.client.session().api().config().worklist_path;
        let response = self.client.get(path).await?;
        let response = Self::ensure_success(response, "worklist fetch").await?;
        response.json().await.map_err(Into::into)
    }

    /// Fetch one team. `Ok(None)` when the backend has no such team.
    ///
    /// # Errors
    ///
    /// [`Error::Api`] on a non-2xx answer other than 404, [`Error::Network`]
    /// on transport or decode failure.
    pub async fn fetch_team(&self, id: impl std::fmt::Display) -> Result<Option<TeamDetail>, Error> {
        let id = id.to_string();
        let url = self.client.session().api().config().team_url(&id)?;
        let request = self.client.request_url(Method::GET, url).build()?;
        let response = self.client.call(request).await?;
        if response.status() == StatusCode::NOT_FOUND {
            tracing::debug!(team = %id, "Team not found");
            return Ok(None);
        }
        let response = Self::ensure_success(response, "team fetch").await?;
        response.json().await.map(Some).map_err(Into::into)
    }

    /// Fetch the criteria catalog.
    ///
    /// Falls back to [`Rubric::default`] when the backend lists no criteria or
    /// omits their maxima.
    ///
    /// # Errors
    ///
    /// [`Error::Api`] on a non-2xx answer, [`Error::Validation`] for duplicate
    /// criterion names, [`Error::Network`] on transport or decode failure.
    pub async fn fetch_rubric(&self) -> Result<Rubric, Error> {
        let path = &self.client.session().api().config().rubric_path;
        let response = self.client.get(path).await?;
        let response = Self::ensure_success(response, "rubric fetch").await?;
        let entries: Vec<RubricEntry> = response.json().await?;

        let criteria: Option<Vec<Criterion>> = entries
            .into_iter()
            .map(|entry| entry.max_score.map(|max| Criterion::new(entry.name, max)))
            .collect();
        match criteria {
            Some(criteria) if !criteria.is_empty() => Ok(Rubric::new(criteria)?),
            _ => {
                tracing::warn!("Backend rubric is empty or lacks maxima, using default catalog");
                Ok(Rubric::default())
            }
        }
    }

    /// # Errors
    ///
    /// [`Error::Api`] on a non-2xx answer, [`Error::Network`] on transport failure.
    pub async fn submit_scores(&self, payload: &ScorePayload) -> Result<(), Error> {
        let path = &self.client.session().api().config().scores_path;
        let response = self.client.post_json(path, payload).await?;
        Self::ensure_success(response, "score submission").await?;
        Ok(())
    }

    /// # Errors
    ///
    /// [`Error::Api`] on a non-2xx answer, [`Error::Network`] on transport failure.
    pub async fn submit_approvals(&self, payload: &ApprovalPayload) -> Result<(), Error> {
        let path = &self.client.session().api().config().approvals_path;
        let response = self.client.post_json(path, payload).await?;
        Self::ensure_success(response, "approval submission").await?;
        Ok(())
    }

    /// Checks HTTP response status; returns the response on success or an error with details.
    async fn ensure_success(response: Response, operation: &'static str) -> Result<Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let detail = backend_message(response).await.unwrap_or_default();
        Err(Error::Api {
            operation,
            status,
            detail,
        })
    }
}
