use ghprcomment_core::{
    config::GitHubConfig,
    forge::{Forge, ForgeError, ForgeSession},
    models::{Job, JobConclusion, PullRequest, Repository, RepositoryRef, Review, WorkflowRun},
};
use http::StatusCode;
use octocrab::{
    Octocrab,
    models::workflows::{self, Conclusion},
    params::workflows::Filter,
};
use serde::{Deserialize, Serialize};

/// GitHub forge backed by octocrab.
#[derive(Debug, Clone)]
pub struct GitHub {
    config: GitHubConfig,
}

impl GitHub {
    pub fn new(config: GitHubConfig) -> Self { Self { config } }
}

impl Forge for GitHub {
    type Session = GitHubSession;

    async fn connect(&self) -> Result<GitHubSession, ForgeError> {
        let token = self.config.token.clone().ok_or(ForgeError::MissingCredentials)?;
        let mut builder = Octocrab::builder().personal_token(token);
        if let Some(api_url) = &self.config.api_url {
            tracing::debug!("Using GitHub API at {}", api_url);
            builder = builder
                .base_uri(api_url.as_str())
                .map_err(|e| api_error("configure GitHub client", api_url, e))?;
        }
        let client =
            builder.build().map_err(|e| api_error("create GitHub client", "api.github.com", e))?;
        Ok(GitHubSession { client })
    }
}

/// An authenticated GitHub API client.
#[derive(Clone)]
pub struct GitHubSession {
    pub client: Octocrab,
}

#[derive(Serialize)]
struct CreateReview<'a> {
    body: &'a str,
    event: &'static str,
}

#[derive(Deserialize)]
struct ReviewResponse {
    id: u64,
    html_url: Option<String>,
}

const JOBS_PER_PAGE: u8 = 100;

impl ForgeSession for GitHubSession {
    async fn resolve_repository(
        &self,
        reference: &RepositoryRef,
    ) -> Result<Repository, ForgeError> {
        let repo = self
            .client
            .repos(&reference.owner, &reference.name)
            .get()
            .await
            .map_err(|e| {
                map_error(e, "fetch repository", reference.to_string(), || {
                    ForgeError::RepositoryNotFound(reference.to_string())
                })
            })?;
        let owner = repo.owner.map(|o| o.login).unwrap_or_else(|| reference.owner.clone());
        if owner != reference.owner || repo.name != reference.name {
            tracing::info!("Repository {} resolved to {}/{}", reference, owner, repo.name);
        }
        Ok(Repository { owner, name: repo.name })
    }

    async fn get_pull_request(
        &self,
        repository: &Repository,
        number: u64,
    ) -> Result<PullRequest, ForgeError> {
        let target = format!("{}#{}", repository.full_name(), number);
        let pull_request = self
            .client
            .pulls(&repository.owner, &repository.name)
            .get(number)
            .await
            .map_err(|e| {
                map_error(e, "fetch pull request", target, || ForgeError::PullRequestNotFound {
                    repository: repository.full_name(),
                    number,
                })
            })?;
        Ok(PullRequest {
            repository: repository.clone(),
            number: pull_request.number,
            title: pull_request.title,
        })
    }

    async fn get_workflow_run(
        &self,
        repository: &Repository,
        run_id: u64,
    ) -> Result<WorkflowRun, ForgeError> {
        let target = format!("{} run {}", repository.full_name(), run_id);
        let run = self
            .client
            .workflows(&repository.owner, &repository.name)
            .get(run_id.into())
            .await
            .map_err(|e| {
                map_error(e, "fetch workflow run", target, || ForgeError::WorkflowRunNotFound {
                    repository: repository.full_name(),
                    run_id,
                })
            })?;
        Ok(WorkflowRun {
            repository: repository.clone(),
            id: run.id.into_inner(),
            name: run.name,
            status: run.status,
        })
    }

    async fn list_jobs(&self, run: &WorkflowRun) -> Result<Vec<Job>, ForgeError> {
        let repository = &run.repository;
        let target = format!("{} run {}", repository.full_name(), run.id);
        let list_error = |e: octocrab::Error| {
            map_error(e, "list workflow jobs", target.clone(), || ForgeError::WorkflowRunNotFound {
                repository: repository.full_name(),
                run_id: run.id,
            })
        };
        // Jobs of earlier attempts are included, so a job that failed once
        // still counts after a successful re-run.
        let first_page = self
            .client
            .workflows(&repository.owner, &repository.name)
            .list_jobs(run.id.into())
            .filter(Filter::All)
            .per_page(JOBS_PER_PAGE)
            .page(1u32)
            .send()
            .await
            .map_err(&list_error)?;
        let jobs = self.client.all_pages(first_page).await.map_err(&list_error)?;
        tracing::debug!("Fetched {} jobs for workflow run {}", jobs.len(), run.id);
        Ok(jobs.into_iter().map(job_from_api).collect())
    }

    async fn post_review_comment(
        &self,
        pull_request: &PullRequest,
        body: &str,
    ) -> Result<Review, ForgeError> {
        let repository = &pull_request.repository;
        let route = format!(
            "/repos/{}/{}/pulls/{}/reviews",
            repository.owner, repository.name, pull_request.number
        );
        let target = format!("{}#{}", repository.full_name(), pull_request.number);
        let review: ReviewResponse = self
            .client
            .post(&route, Some(&CreateReview { body, event: "COMMENT" }))
            .await
            .map_err(|e| api_error("create review", &target, e))?;
        Ok(Review { id: review.id, html_url: review.html_url })
    }
}

fn job_from_api(job: workflows::Job) -> Job {
    let conclusion = job.conclusion.map(|conclusion| match conclusion {
        Conclusion::Success => JobConclusion::Success,
        Conclusion::Failure => JobConclusion::Failure,
        Conclusion::Neutral => JobConclusion::Neutral,
        Conclusion::Cancelled => JobConclusion::Cancelled,
        Conclusion::Skipped => JobConclusion::Skipped,
        Conclusion::TimedOut => JobConclusion::TimedOut,
        Conclusion::ActionRequired => JobConclusion::ActionRequired,
        _ => JobConclusion::Unknown,
    });
    Job::new(job.name, conclusion)
}

fn status_code(err: &octocrab::Error) -> Option<StatusCode> {
    match err {
        octocrab::Error::GitHub { source, .. } => Some(source.status_code),
        _ => None,
    }
}

/// Maps a 404 to the error produced by `not_found` and a 401 to
/// [`ForgeError::Unauthorized`].
fn map_error(
    err: octocrab::Error,
    operation: &'static str,
    target: String,
    not_found: impl FnOnce() -> ForgeError,
) -> ForgeError {
    match status_code(&err) {
        Some(StatusCode::NOT_FOUND) => not_found(),
        Some(StatusCode::UNAUTHORIZED) => {
            ForgeError::Unauthorized { operation, target, source: Box::new(err) }
        }
        _ => ForgeError::Api { operation, target, source: Box::new(err) },
    }
}

fn api_error(operation: &'static str, target: &str, err: octocrab::Error) -> ForgeError {
    if status_code(&err) == Some(StatusCode::UNAUTHORIZED) {
        return ForgeError::Unauthorized {
            operation,
            target: target.to_string(),
            source: Box::new(err),
        };
    }
    ForgeError::Api { operation, target: target.to_string(), source: Box::new(err) }
}
