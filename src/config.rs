//! Environment-provided paths and credentials for the hands side of the loop.

use crate::artifact::{self, TASK_FILE};
use std::path::PathBuf;
use thiserror::Error;

pub const REMOTE_USER: &str = "REMOTE_USER";
pub const REMOTE_HOST: &str = "REMOTE_HOST";
pub const IMG_REMOTE_BASE_PATH: &str = "IMG_REMOTE_BASE_PATH";
pub const IMG_LOCAL_BASE_PATH: &str = "IMG_LOCAL_BASE_PATH";
pub const REMOTE_BASE_PATH: &str = "REMOTE_BASE_PATH";
pub const LOCAL_BASE_PATH: &str = "LOCAL_BASE_PATH";
pub const TASK_REMOTE_BASE_PATH: &str = "TASK_REMOTE_BASE_PATH";
pub const TASK_LOCAL_PATH: &str = "TASK_LOCAL_PATH";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variables: {}", .0.join(", "))]
    Missing(Vec<&'static str>),
}

/// Where each artifact lives on both machines.
///
/// `*_remote_*` values are paths on the brain machine; `*_local_*` values are
/// paths on this machine. Every base path names a directory except
/// `task_local_path`, which is the task file itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub remote_user: String,
    pub remote_host: String,
    pub img_remote_base: String,
    pub img_local_base: PathBuf,
    pub results_remote_base: String,
    pub results_local_base: PathBuf,
    pub task_remote_base: String,
    pub task_local_path: PathBuf,
}

impl RemoteConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. Empty values count as
    /// missing; all missing keys are reported together.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();
        let mut get = |key: &'static str| match lookup(key) {
            Some(value) if !value.trim().is_empty() => value,
            _ => {
                missing.push(key);
                String::new()
            }
        };

        let config = RemoteConfig {
            remote_user: get(REMOTE_USER),
            remote_host: get(REMOTE_HOST),
            img_remote_base: get(IMG_REMOTE_BASE_PATH),
            img_local_base: PathBuf::from(get(IMG_LOCAL_BASE_PATH)),
            results_remote_base: get(REMOTE_BASE_PATH),
            results_local_base: PathBuf::from(get(LOCAL_BASE_PATH)),
            task_remote_base: get(TASK_REMOTE_BASE_PATH),
            task_local_path: PathBuf::from(get(TASK_LOCAL_PATH)),
        };

        if missing.is_empty() {
            Ok(config)
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    pub fn remote_task(&self) -> String {
        artifact::remote_join(&self.task_remote_base, TASK_FILE)
    }

    pub fn local_screenshot(&self, step: u64) -> PathBuf {
        self.img_local_base.join(artifact::screenshot_name(step))
    }

    pub fn remote_screenshot(&self, step: u64) -> String {
        artifact::remote_join(&self.img_remote_base, &artifact::screenshot_name(step))
    }

    pub fn local_result(&self, step: u64) -> PathBuf {
        self.results_local_base.join(artifact::result_name(step))
    }

    pub fn remote_result(&self, step: u64) -> String {
        artifact::remote_join(&self.results_remote_base, &artifact::result_name(step))
    }

    pub fn local_labeled(&self, step: u64) -> PathBuf {
        self.results_local_base
            .join(artifact::labeled_screenshot_name(step))
    }

    pub fn remote_labeled(&self, step: u64) -> String {
        artifact::remote_join(
            &self.results_remote_base,
            &artifact::labeled_screenshot_name(step),
        )
    }
}
