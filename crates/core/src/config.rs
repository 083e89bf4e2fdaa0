use std::{
    env,
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::models::RuleTable;

pub const CONFIG_FILE_NAME: &str = "ghprcomment";

/// Extensions tried, in order, when locating the rule file.
pub const CONFIG_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("ghprcomment.yaml or ghprcomment.yml not found in {}", .dir.display())]
    NotFound { dir: PathBuf },
    #[error("Failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Finds the rule file in `dir`, preferring `.yaml` over `.yml`.
pub fn locate_config(dir: &Path) -> Result<PathBuf, ConfigError> {
    CONFIG_EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{CONFIG_FILE_NAME}.{ext}")))
        .find(|path| path.is_file())
        .ok_or_else(|| ConfigError::NotFound { dir: dir.to_path_buf() })
}

/// Reads the rule table from a YAML sequence of `{jobName, message}` mappings.
pub fn load_rules(path: &Path) -> Result<RuleTable, ConfigError> {
    let file = File::open(path)
        .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let parse_error =
        |source: serde_yaml::Error| ConfigError::Parse { path: path.to_path_buf(), source };
    let rules: Option<RuleTable> =
        serde_yaml::from_reader(BufReader::new(file)).map_err(parse_error)?;
    // An empty or null document is not a sequence of rules.
    let rules = rules.ok_or_else(|| {
        parse_error(serde::de::Error::custom("expected a sequence of rules, found no document"))
    })?;
    tracing::debug!("Loaded {} failure rules from {}", rules.len(), path.display());
    Ok(rules)
}

/// Credentials and endpoint for the GitHub API.
#[derive(Clone, Default)]
pub struct GitHubConfig {
    pub token: Option<String>,
    /// Base URL for GitHub Enterprise; `None` means api.github.com.
    pub api_url: Option<String>,
}

const TOKEN_VARS: [&str; 3] = ["GITHUB_TOKEN", "GH_TOKEN", "GITHUB_OAUTH"];
const API_URL_VARS: [&str; 2] = ["GITHUB_API_URL", "GITHUB_ENDPOINT"];

impl GitHubConfig {
    pub fn from_env() -> Self { Self::from_lookup(|key| env::var(key).ok()) }

    /// Builds the config from a variable lookup. The first non-empty variable wins.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let first = |keys: &[&str]| {
            keys.iter().filter_map(|key| lookup(key)).find(|value| !value.trim().is_empty())
        };
        Self { token: first(&TOKEN_VARS), api_url: first(&API_URL_VARS) }
    }
}

impl std::fmt::Debug for GitHubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubConfig")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("api_url", &self.api_url)
            .finish()
    }
}
