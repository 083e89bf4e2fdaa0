use std::path::Path;

use thiserror::Error;

use crate::{
    config::{self, ConfigError},
    forge::{Forge, ForgeError, ForgeSession},
    matcher::find_failure_rule,
    models::{
        CommentAction, FailedJobSet, Invocation, PullRequest, PullRequestRef, Repository,
        RepositoryRef, Review, WorkflowRunRef,
    },
};

pub const EXIT_REPOSITORY_REFERENCE_ERROR: u8 = 1;
pub const EXIT_CONFIG_NOT_FOUND: u8 = 2;
pub const EXIT_FAILURE: u8 = 3;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Error in repository reference {repository}")]
    RepositoryReference {
        repository: String,
        #[source]
        source: ForgeError,
    },
    #[error(transparent)]
    Forge(#[from] ForgeError),
}

impl Error {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(ConfigError::NotFound { .. }) => EXIT_CONFIG_NOT_FOUND,
            Self::RepositoryReference { .. } => EXIT_REPOSITORY_REFERENCE_ERROR,
            _ => EXIT_FAILURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// A review was posted for the failed job `job_name`.
    Commented { job_name: String, review: Review },
    /// No rule matched a failed job; nothing was posted.
    NoMatch,
}

/// Inspects the workflow run and comments on the pull request if a failed job
/// has a rule in the config found in `config_dir`.
///
/// The config file is located before any forge call, and the pull request is
/// resolved before the job listing so that bad references fail early.
pub async fn run<F: Forge>(
    forge: &F,
    config_dir: &Path,
    invocation: &Invocation,
) -> Result<Outcome, Error> {
    let config_path = config::locate_config(config_dir)?;

    tracing::info!("Connecting to {}...", invocation.repository);
    let session = forge.connect().await?;

    let (repository, pull_request) =
        resolve_targets(&session, &invocation.pull_request()).await.map_err(|source| {
            if source.is_reference_error() {
                Error::RepositoryReference { repository: invocation.repository.clone(), source }
            } else {
                Error::Forge(source)
            }
        })?;

    let failed_jobs =
        fetch_failed_jobs(&session, &repository, &invocation.workflow_run()).await?;
    tracing::debug!("Failed jobs: {:?}", failed_jobs.iter().collect::<Vec<_>>());

    let rules = config::load_rules(&config_path)?;
    let Some(rule) = find_failure_rule(&failed_jobs, &rules) else {
        tracing::info!(
            "No failure rule matched {} failed job(s) in workflow run {}",
            failed_jobs.len(),
            invocation.workflow_run_id
        );
        return Ok(Outcome::NoMatch);
    };
    tracing::debug!("Found comment: {:?}", rule);

    let review = publish(&session, CommentAction { pull_request: &pull_request, rule }).await?;
    Ok(Outcome::Commented { job_name: rule.job_name.clone(), review })
}

async fn resolve_targets<S: ForgeSession>(
    session: &S,
    target: &PullRequestRef,
) -> Result<(Repository, PullRequest), ForgeError> {
    let reference = RepositoryRef::parse(&target.repository)
        .ok_or_else(|| ForgeError::MalformedRepository(target.repository.clone()))?;
    let repository = session.resolve_repository(&reference).await?;
    let pull_request = session.get_pull_request(&repository, target.number).await?;
    tracing::debug!(
        "Resolved pull request {}#{} ({})",
        repository.full_name(),
        pull_request.number,
        pull_request.title.as_deref().unwrap_or("untitled")
    );
    Ok((repository, pull_request))
}

async fn fetch_failed_jobs<S: ForgeSession>(
    session: &S,
    repository: &Repository,
    run_ref: &WorkflowRunRef,
) -> Result<FailedJobSet, ForgeError> {
    let run = session.get_workflow_run(repository, run_ref.workflow_run_id).await?;
    if run.status != "completed" {
        tracing::warn!("Workflow run {} has not completed yet (status {})", run.id, run.status);
    }
    let jobs = session.list_jobs(&run).await?;
    tracing::debug!(
        "Workflow run {} ({}) has {} jobs",
        run.id,
        run.name,
        jobs.len()
    );
    Ok(FailedJobSet::from_jobs(&jobs))
}

async fn publish<S: ForgeSession>(
    session: &S,
    action: CommentAction<'_>,
) -> Result<Review, ForgeError> {
    let pull_request = action.pull_request;
    let review = session.post_review_comment(pull_request, &action.rule.message).await?;
    match &review.html_url {
        Some(url) => tracing::info!(
            "Posted comment for failed job {} on {}#{}: {}",
            action.rule.job_name,
            pull_request.repository.full_name(),
            pull_request.number,
            url
        ),
        None => tracing::info!(
            "Posted comment for failed job {} on {}#{}",
            action.rule.job_name,
            pull_request.repository.full_name(),
            pull_request.number
        ),
    }
    Ok(review)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        fs,
        sync::{Arc, Mutex},
    };

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::models::{Job, JobConclusion, WorkflowRun};

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Connect,
        ResolveRepository(String),
        GetPullRequest(u64),
        GetWorkflowRun(u64),
        ListJobs(u64),
        PostReviewComment(u64, String),
    }

    #[derive(Default)]
    struct FakeState {
        repositories: Vec<String>,
        pull_requests: Vec<u64>,
        runs: HashMap<u64, Vec<Job>>,
        fail_connect: bool,
        fail_post: bool,
        calls: Mutex<Vec<Call>>,
    }

    /// In-memory forge that records every call made through its sessions.
    #[derive(Clone)]
    struct FakeForge {
        state: Arc<FakeState>,
    }

    impl FakeForge {
        fn new(state: FakeState) -> Self { Self { state: Arc::new(state) } }

        fn record(&self, call: Call) { self.state.calls.lock().unwrap().push(call); }

        fn calls(&self) -> Vec<Call> { self.state.calls.lock().unwrap().clone() }

        fn posted(&self) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter_map(|call| match call {
                    Call::PostReviewComment(_, body) => Some(body),
                    _ => None,
                })
                .collect()
        }
    }

    impl Forge for FakeForge {
        type Session = FakeForge;

        async fn connect(&self) -> Result<FakeForge, ForgeError> {
            self.record(Call::Connect);
            if self.state.fail_connect {
                return Err(ForgeError::MissingCredentials);
            }
            Ok(self.clone())
        }
    }

    impl ForgeSession for FakeForge {
        async fn resolve_repository(
            &self,
            reference: &RepositoryRef,
        ) -> Result<Repository, ForgeError> {
            let full_name = reference.to_string();
            self.record(Call::ResolveRepository(full_name.clone()));
            if !self.state.repositories.contains(&full_name) {
                return Err(ForgeError::RepositoryNotFound(full_name));
            }
            Ok(Repository { owner: reference.owner.clone(), name: reference.name.clone() })
        }

        async fn get_pull_request(
            &self,
            repository: &Repository,
            number: u64,
        ) -> Result<PullRequest, ForgeError> {
            self.record(Call::GetPullRequest(number));
            if !self.state.pull_requests.contains(&number) {
                return Err(ForgeError::PullRequestNotFound {
                    repository: repository.full_name(),
                    number,
                });
            }
            Ok(PullRequest { repository: repository.clone(), number, title: None })
        }

        async fn get_workflow_run(
            &self,
            repository: &Repository,
            run_id: u64,
        ) -> Result<WorkflowRun, ForgeError> {
            self.record(Call::GetWorkflowRun(run_id));
            if !self.state.runs.contains_key(&run_id) {
                return Err(ForgeError::WorkflowRunNotFound {
                    repository: repository.full_name(),
                    run_id,
                });
            }
            Ok(WorkflowRun {
                repository: repository.clone(),
                id: run_id,
                name: "Tests".to_string(),
                status: "completed".to_string(),
            })
        }

        async fn list_jobs(&self, run: &WorkflowRun) -> Result<Vec<Job>, ForgeError> {
            self.record(Call::ListJobs(run.id));
            Ok(self.state.runs.get(&run.id).cloned().unwrap_or_default())
        }

        async fn post_review_comment(
            &self,
            pull_request: &PullRequest,
            body: &str,
        ) -> Result<Review, ForgeError> {
            self.record(Call::PostReviewComment(pull_request.number, body.to_string()));
            if self.state.fail_post {
                return Err(ForgeError::Api {
                    operation: "create review",
                    target: format!("{}#{}", pull_request.repository.full_name(), pull_request.number),
                    source: "Resource not accessible by integration".into(),
                });
            }
            let id = self.posted().len() as u64;
            Ok(Review {
                id,
                html_url: Some(format!("https://github.com/JabRef/jabref/pull/42#review-{id}")),
            })
        }
    }

    const RUN_ID: u64 = 10_500_000_000;
    const PR: u64 = 42;

    fn config_dir(contents: &str) -> TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("ghprcomment.yml"), contents).unwrap();
        dir
    }

    fn invocation(repository: &str) -> Invocation {
        Invocation {
            repository: repository.to_string(),
            workflow_run_id: RUN_ID,
            pull_request_number: PR,
        }
    }

    fn forge_with_jobs(jobs: &[(&str, JobConclusion)]) -> FakeForge {
        FakeForge::new(FakeState {
            repositories: vec!["JabRef/jabref".to_string()],
            pull_requests: vec![PR],
            runs: HashMap::from([(
                RUN_ID,
                jobs.iter().map(|&(name, conclusion)| Job::new(name, Some(conclusion))).collect(),
            )]),
            ..Default::default()
        })
    }

    const BUILD_RULE: &str = "- jobName: build\n  message: Build failed, check logs\n";

    #[tokio::test]
    async fn test_posts_comment_for_matching_failure() {
        let dir = config_dir(BUILD_RULE);
        let forge = forge_with_jobs(&[
            ("build", JobConclusion::Failure),
            ("test", JobConclusion::Failure),
            ("lint", JobConclusion::Success),
        ]);
        let outcome = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap();
        assert!(matches!(outcome, Outcome::Commented { ref job_name, .. } if job_name == "build"));
        assert_eq!(forge.calls(), vec![
            Call::Connect,
            Call::ResolveRepository("JabRef/jabref".to_string()),
            Call::GetPullRequest(PR),
            Call::GetWorkflowRun(RUN_ID),
            Call::ListJobs(RUN_ID),
            Call::PostReviewComment(PR, "Build failed, check logs".to_string()),
        ]);
    }

    #[tokio::test]
    async fn test_no_match_posts_nothing() {
        let dir = config_dir(BUILD_RULE);
        let forge = forge_with_jobs(&[
            ("build", JobConclusion::Success),
            ("test", JobConclusion::Failure),
        ]);
        let outcome = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap();
        assert_eq!(outcome, Outcome::NoMatch);
        assert!(forge.posted().is_empty());
    }

    #[tokio::test]
    async fn test_only_failure_conclusion_counts() {
        let dir = config_dir(BUILD_RULE);
        let forge = forge_with_jobs(&[("build", JobConclusion::Cancelled)]);
        let outcome = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap();
        assert_eq!(outcome, Outcome::NoMatch);
        assert!(forge.posted().is_empty());
    }

    #[tokio::test]
    async fn test_missing_config_makes_no_forge_calls() {
        let dir = tempdir().unwrap();
        let forge = forge_with_jobs(&[("build", JobConclusion::Failure)]);
        let err = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::NotFound { .. })));
        assert_eq!(err.exit_code(), EXIT_CONFIG_NOT_FOUND);
        assert!(forge.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_repository_is_reference_error() {
        let dir = config_dir(BUILD_RULE);
        let forge = forge_with_jobs(&[("build", JobConclusion::Failure)]);
        let err =
            run(&forge, dir.path(), &invocation("doesnotexist/doesnotexist")).await.unwrap_err();
        assert!(matches!(err, Error::RepositoryReference { .. }));
        assert_eq!(err.exit_code(), EXIT_REPOSITORY_REFERENCE_ERROR);
        assert_eq!(forge.calls(), vec![
            Call::Connect,
            Call::ResolveRepository("doesnotexist/doesnotexist".to_string()),
        ]);
    }

    #[tokio::test]
    async fn test_malformed_repository_is_reference_error() {
        let dir = config_dir(BUILD_RULE);
        let forge = forge_with_jobs(&[("build", JobConclusion::Failure)]);
        let err = run(&forge, dir.path(), &invocation("jabref")).await.unwrap_err();
        assert_eq!(err.exit_code(), EXIT_REPOSITORY_REFERENCE_ERROR);
        assert_eq!(forge.calls(), vec![Call::Connect]);
    }

    #[tokio::test]
    async fn test_unknown_pull_request_fails_before_job_listing() {
        let dir = config_dir(BUILD_RULE);
        let forge = forge_with_jobs(&[("build", JobConclusion::Failure)]);
        let mut invocation = invocation("JabRef/jabref");
        invocation.pull_request_number = 7;
        let err = run(&forge, dir.path(), &invocation).await.unwrap_err();
        assert_eq!(err.exit_code(), EXIT_REPOSITORY_REFERENCE_ERROR);
        assert!(!forge.calls().iter().any(|c| matches!(c, Call::ListJobs(_))));
        assert!(forge.posted().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_workflow_run_is_fatal() {
        let dir = config_dir(BUILD_RULE);
        let forge = forge_with_jobs(&[("build", JobConclusion::Failure)]);
        let mut invocation = invocation("JabRef/jabref");
        invocation.workflow_run_id = 1;
        let err = run(&forge, dir.path(), &invocation).await.unwrap_err();
        assert!(matches!(err, Error::Forge(ForgeError::WorkflowRunNotFound { run_id: 1, .. })));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_connect_failure_is_fatal() {
        let dir = config_dir(BUILD_RULE);
        let forge = FakeForge::new(FakeState { fail_connect: true, ..Default::default() });
        let err = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap_err();
        assert!(matches!(err, Error::Forge(ForgeError::MissingCredentials)));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
        assert_eq!(forge.calls(), vec![Call::Connect]);
    }

    #[tokio::test]
    async fn test_malformed_config_is_fatal() {
        let dir = config_dir("- jobName: build\n");
        let forge = forge_with_jobs(&[("build", JobConclusion::Failure)]);
        let err = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse { .. })));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
        assert!(forge.posted().is_empty());
    }

    #[tokio::test]
    async fn test_empty_config_is_fatal() {
        let dir = config_dir("");
        let forge = forge_with_jobs(&[("build", JobConclusion::Failure)]);
        let err = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::Parse { .. })));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
        assert!(forge.posted().is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_is_surfaced() {
        let dir = config_dir(BUILD_RULE);
        let forge = FakeForge::new(FakeState {
            repositories: vec!["JabRef/jabref".to_string()],
            pull_requests: vec![PR],
            runs: HashMap::from([(RUN_ID, vec![Job::new(
                "build",
                Some(JobConclusion::Failure),
            )])]),
            fail_post: true,
            ..Default::default()
        });
        let err = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap_err();
        assert!(matches!(err, Error::Forge(ForgeError::Api { operation: "create review", .. })));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }

    #[tokio::test]
    async fn test_table_order_decides_between_failures() {
        let dir = config_dir("- jobName: a\n  message: A\n- jobName: b\n  message: B\n");
        let forge = forge_with_jobs(&[("b", JobConclusion::Failure), ("a", JobConclusion::Failure)]);
        run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap();
        assert_eq!(forge.posted(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_rerun_posts_again() {
        // Nothing remembers earlier runs, so a second invocation posts a second review.
        let dir = config_dir(BUILD_RULE);
        let forge = forge_with_jobs(&[("build", JobConclusion::Failure)]);
        let first = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap();
        let second = run(&forge, dir.path(), &invocation("JabRef/jabref")).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(forge.posted(), vec![
            "Build failed, check logs".to_string(),
            "Build failed, check logs".to_string(),
        ]);
    }
}
