use std::{collections::HashSet, fmt};

use serde::Deserialize;

/// A job name paired with the message to post when that job fails.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRule {
    pub job_name: String,
    pub message: String,
}

impl FailureRule {
    pub fn new(job_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { job_name: job_name.into(), message: message.into() }
    }
}

/// Ordered failure rules. Earlier rules take precedence over later ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RuleTable {
    rules: Vec<FailureRule>,
}

impl RuleTable {
    pub fn rules(&self) -> &[FailureRule] { &self.rules }

    pub fn len(&self) -> usize { self.rules.len() }

    pub fn is_empty(&self) -> bool { self.rules.is_empty() }
}

impl FromIterator<FailureRule> for RuleTable {
    fn from_iter<T: IntoIterator<Item = FailureRule>>(iter: T) -> Self {
        Self { rules: iter.into_iter().collect() }
    }
}

/// Conclusion of a completed workflow job, as reported by the Actions API.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum JobConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    /// A conclusion this client does not know about.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    /// `None` while the job is still queued or running.
    pub conclusion: Option<JobConclusion>,
}

impl Job {
    pub fn new(name: impl Into<String>, conclusion: Option<JobConclusion>) -> Self {
        Self { name: name.into(), conclusion }
    }

    pub fn failed(&self) -> bool { self.conclusion == Some(JobConclusion::Failure) }
}

/// Names of the jobs in a workflow run that concluded with a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedJobSet {
    names: HashSet<String>,
}

impl FailedJobSet {
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        jobs.into_iter().filter(|job| job.failed()).map(|job| job.name.clone()).collect()
    }

    pub fn contains(&self, job_name: &str) -> bool { self.names.contains(job_name) }

    pub fn len(&self) -> usize { self.names.len() }

    pub fn is_empty(&self) -> bool { self.names.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = &str> { self.names.iter().map(String::as_str) }
}

impl<S: Into<String>> FromIterator<S> for FailedJobSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self { names: iter.into_iter().map(Into::into).collect() }
    }
}

/// A repository reference in the form `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepositoryRef {
    pub owner: String,
    pub name: String,
}

impl RepositoryRef {
    /// Parses `owner/name`. Both parts must be non-empty and the name may not
    /// contain further slashes.
    pub fn parse(value: &str) -> Option<Self> {
        let (owner, name) = value.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some(Self { owner: owner.to_string(), name: name.to_string() })
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// The workflow run to inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRunRef {
    pub workflow_run_id: u64,
}

/// The pull request to comment on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequestRef {
    pub repository: String,
    pub number: u64,
}

/// Identifiers supplied on the command line for a single invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub repository: String,
    pub workflow_run_id: u64,
    pub pull_request_number: u64,
}

impl Invocation {
    pub fn workflow_run(&self) -> WorkflowRunRef {
        WorkflowRunRef { workflow_run_id: self.workflow_run_id }
    }

    pub fn pull_request(&self) -> PullRequestRef {
        PullRequestRef { repository: self.repository.clone(), number: self.pull_request_number }
    }
}

/// A repository as resolved by the forge. `owner` and `name` are canonical,
/// which may differ from the reference used to look it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn full_name(&self) -> String { format!("{}/{}", self.owner, self.name) }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub repository: Repository,
    pub number: u64,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowRun {
    pub repository: Repository,
    pub id: u64,
    pub name: String,
    pub status: String,
}

/// A review created on a pull request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Review {
    pub id: u64,
    pub html_url: Option<String>,
}

/// The single comment to publish for an invocation.
#[derive(Debug)]
pub struct CommentAction<'a> {
    pub pull_request: &'a PullRequest,
    pub rule: &'a FailureRule,
}
