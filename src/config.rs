//! Engine configuration
//!
//! Defaults suit tests and the CLI; deployments override through
//! environment variables (a `.env` file is honoured by the binary).

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::case::Actor;
use crate::workflow::WorkflowError;

pub const ENV_CATALOG_PATH: &str = "TRANSFER_CATALOG_PATH";
pub const ENV_LEASE_WAIT_MS: &str = "TRANSFER_LEASE_WAIT_MS";
pub const ENV_COMMIT_RETRIES: &str = "TRANSFER_COMMIT_RETRIES";
pub const ENV_MAX_AUTO_CHAIN: &str = "TRANSFER_MAX_AUTO_CHAIN";
pub const ENV_BULK_CONCURRENCY: &str = "TRANSFER_BULK_CONCURRENCY";
pub const ENV_HOOKS_DETACHED: &str = "TRANSFER_HOOKS_DETACHED";

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Catalog YAML file or directory
    pub catalog_path: PathBuf,
    /// How long a commit waits for another commit on the same case
    pub lease_wait: Duration,
    /// Re-runs of a commit that hit a concurrent modification
    pub commit_retries: u32,
    /// Upper bound on auto-transitions chained from one commit
    pub max_auto_chain: usize,
    /// Cases processed at once by a bulk run
    pub bulk_concurrency: usize,
    /// Run stage hooks on a spawned task instead of before `commit` returns
    pub hooks_detached: bool,
    /// Recorded as the actor of auto-transitions and hook side effects
    pub system_actor: Actor,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            catalog_path: PathBuf::from("config/catalog"),
            lease_wait: Duration::from_millis(2_000),
            commit_retries: 1,
            max_auto_chain: 8,
            bulk_concurrency: 8,
            hooks_detached: false,
            system_actor: Actor::system(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by any `TRANSFER_*` variables that are set
    pub fn from_env() -> Result<Self, WorkflowError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, WorkflowError> {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_CATALOG_PATH) {
            config.catalog_path = PathBuf::from(path);
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_LEASE_WAIT_MS)? {
            config.lease_wait = Duration::from_millis(ms);
        }
        if let Some(retries) = parse(&lookup, ENV_COMMIT_RETRIES)? {
            config.commit_retries = retries;
        }
        if let Some(depth) = parse(&lookup, ENV_MAX_AUTO_CHAIN)? {
            config.max_auto_chain = depth;
        }
        if let Some(concurrency) = parse::<usize>(&lookup, ENV_BULK_CONCURRENCY)? {
            if concurrency == 0 {
                return Err(WorkflowError::Config(format!(
                    "{} must be at least 1",
                    ENV_BULK_CONCURRENCY
                )));
            }
            config.bulk_concurrency = concurrency;
        }
        if let Some(detached) = parse(&lookup, ENV_HOOKS_DETACHED)? {
            config.hooks_detached = detached;
        }

        Ok(config)
    }

    pub fn with_commit_retries(mut self, retries: u32) -> Self {
        self.commit_retries = retries;
        self
    }

    pub fn with_lease_wait(mut self, wait: Duration) -> Self {
        self.lease_wait = wait;
        self
    }

    pub fn with_bulk_concurrency(mut self, concurrency: usize) -> Self {
        self.bulk_concurrency = concurrency.max(1);
        self
    }

    pub fn with_hooks_detached(mut self, detached: bool) -> Self {
        self.hooks_detached = detached;
        self
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, WorkflowError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| WorkflowError::Config(format!("{}={:?}: {}", key, raw, e))),
    }
}
