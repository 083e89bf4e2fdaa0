use std::future::Future;

use thiserror::Error;

use crate::models::{Job, PullRequest, Repository, RepositoryRef, Review, WorkflowRun};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("No GitHub token found, set GITHUB_TOKEN")]
    MissingCredentials,
    #[error("Authentication failed while trying to {operation} for {target}")]
    Unauthorized {
        operation: &'static str,
        target: String,
        #[source]
        source: BoxError,
    },
    #[error("Malformed repository reference {0:?}, expected owner/name")]
    MalformedRepository(String),
    #[error("Repository {0} not found")]
    RepositoryNotFound(String),
    #[error("Pull request #{number} not found in {repository}")]
    PullRequestNotFound { repository: String, number: u64 },
    #[error("Workflow run {run_id} not found in {repository}")]
    WorkflowRunNotFound { repository: String, run_id: u64 },
    #[error("Failed to {operation} for {target}")]
    Api {
        operation: &'static str,
        target: String,
        #[source]
        source: BoxError,
    },
}

impl ForgeError {
    /// Whether the error means the repository or pull request given on the
    /// command line does not resolve.
    pub fn is_reference_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedRepository(_)
                | Self::RepositoryNotFound(_)
                | Self::PullRequestNotFound { .. }
        )
    }
}

/// Entry point to a hosted forge. Connecting yields the session every
/// subsequent call goes through.
pub trait Forge {
    type Session: ForgeSession;

    fn connect(&self) -> impl Future<Output = Result<Self::Session, ForgeError>> + Send;
}

/// Operations against an authenticated forge session.
pub trait ForgeSession {
    fn resolve_repository(
        &self,
        reference: &RepositoryRef,
    ) -> impl Future<Output = Result<Repository, ForgeError>> + Send;

    fn get_pull_request(
        &self,
        repository: &Repository,
        number: u64,
    ) -> impl Future<Output = Result<PullRequest, ForgeError>> + Send;

    fn get_workflow_run(
        &self,
        repository: &Repository,
        run_id: u64,
    ) -> impl Future<Output = Result<WorkflowRun, ForgeError>> + Send;

    /// Lists every job of the run, across all result pages.
    fn list_jobs(
        &self,
        run: &WorkflowRun,
    ) -> impl Future<Output = Result<Vec<Job>, ForgeError>> + Send;

    /// Submits a review of kind `COMMENT` with `body` and no line comments.
    /// Calling this twice posts two reviews.
    fn post_review_comment(
        &self,
        pull_request: &PullRequest,
        body: &str,
    ) -> impl Future<Output = Result<Review, ForgeError>> + Send;
}
