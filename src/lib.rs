#![doc = include_str!("../README.md")]

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod judging;
pub mod rubric;
pub mod session;
pub mod store;
#[cfg(feature = "jwt")]
pub mod token;
pub mod types;

// Re-exports for convenient access
pub use auth::{AuthApi, RefreshedTokens, RegisterResponse, TokenPair, Verification};
pub use client::AuthenticatedClient;
pub use config::ClientConfig;
pub use error::{Error, ExpiryReason, SubmissionPart, ValidationError};
pub use judging::{Idea, JudgingApi, ReviewProgress, TeamDetail, TeamSummary};
pub use rubric::{ApprovalPayload, Criterion, Evaluation, Rubric, ScorePayload};
pub use session::{Phase, Session};
#[cfg(feature = "file-store")]
pub use store::FileStore;
pub use store::{CredentialKey, CredentialStore, MemoryStore, StoreError};
#[cfg(feature = "jwt")]
pub use token::UnverifiedClaims;
pub use types::{AccessToken, NewAccount, RefreshToken, Registration, Role, TeamId, UserProfile};
