use std::{env, ffi::OsString, process::ExitCode};

use anyhow::{Context, Result, anyhow};
use argp::{EarlyExit, FromArgs};
use ghprcomment_core::{
    Outcome,
    config::GitHubConfig,
    models::Invocation,
    pipeline::{self, EXIT_FAILURE},
};
use ghprcomment_github::GitHub;
use tracing_subscriber::{
    EnvFilter, Layer, filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt,
};

const BIN_NAME: &str = "ghprcomment";

#[derive(FromArgs, PartialEq, Eq, Debug)]
/// Posts a comment on a pull request when a workflow job listed in
/// ghprcomment.yaml has failed.
struct Args {
    #[argp(option, short = 'r')]
    /// the GitHub repository in the form owner/repository, e.g. JabRef/jabref
    repository: Option<String>,
    #[argp(option, short = 'w')]
    /// id of the workflow run to inspect
    workflow_run_id: Option<u64>,
    #[argp(option, short = 'p')]
    /// number of the pull request to comment on
    pr_number: Option<u64>,
    #[argp(switch, short = 'V')]
    /// print version information and exit
    version: bool,
}

impl Args {
    fn invocation(self) -> Result<Invocation> {
        let missing = |flag: &str| anyhow!("Missing required option {flag}");
        Ok(Invocation {
            repository: self.repository.ok_or_else(|| missing("--repository"))?,
            workflow_run_id: self.workflow_run_id.ok_or_else(|| missing("--workflow-run-id"))?,
            pull_request_number: self.pr_number.ok_or_else(|| missing("--pr-number"))?,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let env_filter = EnvFilter::builder()
        // Default to info level
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(env_filter))
        .init();

    let argv: Vec<OsString> = env::args_os().skip(1).collect();
    let args = match parse_args(&argv) {
        Ok(args) => args,
        Err(code) => return ExitCode::from(code),
    };
    if args.version {
        println!("{BIN_NAME} {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    match run(args).await {
        Ok(Outcome::Commented { job_name, review }) => {
            tracing::debug!("Review {} posted for job {}", review.id, job_name);
            ExitCode::SUCCESS
        }
        Ok(Outcome::NoMatch) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Parses the command line. Usage errors exit with [`EXIT_FAILURE`], which
/// keeps them apart from the repository reference exit code.
fn parse_args<S: AsRef<std::ffi::OsStr>>(argv: &[S]) -> Result<Args, u8> {
    Args::from_args(&[BIN_NAME], argv).map_err(|early_exit| match early_exit {
        EarlyExit::Help(help) => {
            println!("{}", help.generate(argp::DEFAULT));
            0
        }
        EarlyExit::Err(err) => {
            eprintln!("{err}\nRun {BIN_NAME} --help for more information.");
            EXIT_FAILURE
        }
    })
}

async fn run(args: Args) -> Result<Outcome> {
    let invocation = args.invocation()?;
    let config_dir = env::current_dir().context("Failed to determine working directory")?;
    let github = GitHub::new(GitHubConfig::from_env());
    Ok(pipeline::run(&github, &config_dir, &invocation).await?)
}

fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<pipeline::Error>().map_or(EXIT_FAILURE, pipeline::Error::exit_code)
}
