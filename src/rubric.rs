use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, SubmissionPart, ValidationError};
use crate::judging::{JudgingApi, TeamDetail};
use crate::types::TeamId;

/// One independently bounded scoring dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub max_score: u32,
}

impl Criterion {
    #[must_use]
    pub fn new(name: impl Into<String>, max_score: u32) -> Self {
        Self {
            name: name.into(),
            max_score,
        }
    }

    /// Clamp `value` into `[0, max_score]`.
    #[must_use]
    pub fn clamp(&self, value: i64) -> u32 {
        let clamped = value.clamp(0, i64::from(self.max_score));
        u32::try_from(clamped).unwrap_or(self.max_score)
    }
}

/// Ordered criteria catalog. Non-empty, names unique.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rubric {
    criteria: Vec<Criterion>,
}

const DEFAULT_CRITERIA: [(&str, u32); 6] = [
    ("Problem Understanding", 20),
    ("Innovativeness", 20),
    ("Feasibility", 15),
    ("Prototype Quality", 20),
    ("Impact", 15),
    ("Presentation/Teamwork", 10),
];

impl Default for Rubric {
    /// The seeded judging catalog, totalling 100.
    fn default() -> Self {
        Self {
            criteria: DEFAULT_CRITERIA
                .iter()
                .map(|&(name, max)| Criterion::new(name, max))
                .collect(),
        }
    }
}

impl Rubric {
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyRubric`],
    /// [`ValidationError::DuplicateCriterion`], or
    /// [`ValidationError::ReservedCriterion`] for a name that collides with
    /// the team id key of the score payload.
    pub fn new(criteria: Vec<Criterion>) -> Result<Self, ValidationError> {
        if criteria.is_empty() {
            return Err(ValidationError::EmptyRubric);
        }
        let mut seen = HashSet::new();
        for criterion in &criteria {
            if criterion.name == TEAM_ID_KEY {
                return Err(ValidationError::ReservedCriterion(criterion.name.clone()));
            }
            if !seen.insert(criterion.name.as_str()) {
                return Err(ValidationError::DuplicateCriterion(criterion.name.clone()));
            }
        }
        Ok(Self { criteria })
    }

    #[must_use]
    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn max_total(&self) -> u64 {
        self.criteria.iter().map(|c| u64::from(c.max_score)).sum()
    }
}

const TEAM_ID_KEY: &str = "teamId";

/// Body of the score submission: `{"teamId": .., "<criterion>": n, ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScorePayload {
    #[serde(rename = "teamId")]
    pub team_id: TeamId,
    #[serde(flatten)]
    pub scores: BTreeMap<String, u32>,
}

/// Body of the approval submission: `{"approvedIdeas": [..]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalPayload {
    pub approved_ideas: Vec<String>,
}

/// A single evaluator's scoring of one team, held while the form is open.
///
/// Every write is clamped into the criterion's range, so a stored score is
/// always valid. Unset criteria count as zero but block submission.
#[derive(Debug, Clone)]
pub struct Evaluation {
    team_id: TeamId,
    rubric: Rubric,
    scores: BTreeMap<String, u32>,
    approved_ideas: BTreeSet<String>,
}

impl Evaluation {
    #[must_use]
    pub fn new(team_id: impl Into<TeamId>, rubric: Rubric) -> Self {
        Self {
            team_id: team_id.into(),
            rubric,
            scores: BTreeMap::new(),
            approved_ideas: BTreeSet::new(),
        }
    }

    /// Start from the team's previously saved scores. Criteria unknown to the
    /// rubric are ignored; out-of-range values are clamped.
    #[must_use]
    pub fn from_detail(rubric: Rubric, detail: &TeamDetail) -> Self {
        let mut evaluation = Self::new(detail.team_id.clone(), rubric);
        for (name, &value) in &detail.prior_scores {
            if evaluation.set_score_value(name, value).is_err() {
                tracing::debug!(criterion = %name, "Ignoring prior score for unknown criterion");
            }
        }
        evaluation
    }

    #[must_use]
    pub fn team_id(&self) -> &TeamId {
        &self.team_id
    }

    #[must_use]
    pub fn rubric(&self) -> &Rubric {
        &self.rubric
    }

    /// Store a score typed into a form field.
    ///
    /// The leading integer of `raw` is used (`"12.5"` → 12, `"abc"` → 0) and
    /// clamped into range. Returns the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownCriterion`] for a name not in the rubric.
    pub fn set_score(&mut self, criterion: &str, raw: &str) -> Result<u32, ValidationError> {
        self.set_score_value(criterion, parse_form_int(raw))
    }

    /// Store `value` clamped into the criterion's range. Returns the stored value.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UnknownCriterion`] for a name not in the rubric.
    pub fn set_score_value(&mut self, criterion: &str, value: i64) -> Result<u32, ValidationError> {
        let bounds = self
            .rubric
            .get(criterion)
            .ok_or_else(|| ValidationError::UnknownCriterion(criterion.to_owned()))?;
        let stored = bounds.clamp(value);
        self.scores.insert(bounds.name.clone(), stored);
        Ok(stored)
    }

    #[must_use]
    pub fn score(&self, criterion: &str) -> Option<u32> {
        self.scores.get(criterion).copied()
    }

    /// Sum of stored scores; unset criteria contribute nothing.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.scores.values().copied().map(u64::from).sum()
    }

    #[must_use]
    pub fn max_total(&self) -> u64 {
        self.rubric.max_total()
    }

    /// Criteria without a score, in rubric order.
    #[must_use]
    pub fn unscored(&self) -> Vec<&str> {
        self.rubric
            .criteria()
            .iter()
            .filter(|c| !self.scores.contains_key(&c.name))
            .map(|c| c.name.as_str())
            .collect()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unscored().is_empty()
    }

    /// Flip whether `title` is approved. Returns the new membership.
    pub fn toggle_approval(&mut self, title: impl Into<String>) -> bool {
        let title = title.into();
        if self.approved_ideas.remove(&title) {
            false
        } else {
            self.approved_ideas.insert(title);
            true
        }
    }

    #[must_use]
    pub fn is_approved(&self, title: &str) -> bool {
        self.approved_ideas.contains(title)
    }

    pub fn approved_ideas(&self) -> impl Iterator<Item = &str> {
        self.approved_ideas.iter().map(String::as_str)
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::UnscoredCriteria`] while any criterion is unset.
    pub fn score_payload(&self) -> Result<ScorePayload, ValidationError> {
        let unscored = self.unscored();
        if !unscored.is_empty() {
            return Err(ValidationError::UnscoredCriteria(
                unscored.into_iter().map(str::to_owned).collect(),
            ));
        }
        Ok(ScorePayload {
            team_id: self.team_id.clone(),
            scores: self.scores.clone(),
        })
    }

    /// `None` when nothing is approved; no approval request is sent then.
    #[must_use]
    pub fn approval_payload(&self) -> Option<ApprovalPayload> {
        if self.approved_ideas.is_empty() {
            return None;
        }
        Some(ApprovalPayload {
            approved_ideas: self.approved_ideas.iter().cloned().collect(),
        })
    }

    /// Send scores and, if any, approvals.
    ///
    /// The two requests are independent: both are sent even if one fails, and
    /// neither is rolled back when the other fails.
    ///
    /// # Errors
    ///
    /// - [`Error::Validation`] if a criterion is unscored (nothing is sent);
    /// - [`Error::PartialSubmission`] naming the half (or both) that failed.
    pub async fn submit(&self, api: &JudgingApi) -> Result<(), Error> {
        let scores = self.score_payload()?;
        let approvals = self.approval_payload();

        let (score_result, approval_result) = futures::join!(api.submit_scores(&scores), async {
            match &approvals {
                Some(payload) => api.submit_approvals(payload).await,
                None => Ok(()),
            }
        });

        let (failed, source) = match (score_result, approval_result) {
            (Ok(()), Ok(())) => {
                tracing::info!(
                    team_id = %self.team_id,
                    total = self.total(),
                    approvals = approvals.map_or(0, |p| p.approved_ideas.len()),
                    "Evaluation submitted"
                );
                return Ok(());
            }
            (Err(e), Ok(())) => (SubmissionPart::Scores, e),
            (Ok(()), Err(e)) => (SubmissionPart::Approvals, e),
            (Err(e), Err(_)) => (SubmissionPart::Both, e),
        };
        tracing::warn!(team_id = %self.team_id, failed = %failed, error = %source, "Evaluation submission incomplete");
        Err(Error::PartialSubmission {
            failed,
            source: Box::new(source),
        })
    }
}

/// Reads the leading integer of a form value the way a browser number field
/// reports it. Anything without leading digits is 0.
fn parse_form_int(raw: &str) -> i64 {
    let s = raw.trim();
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let end = rest
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..end];
    if digits.is_empty() {
        return 0;
    }
    let magnitude = digits.parse::<i64>().unwrap_or(i64::MAX);
    if negative { -magnitude } else { magnitude }
}
