//! One-way artifact exchange with the brain machine.
//!
//! [`ScpChannel`] shells out to `scp`/`ssh`; [`LocalChannel`] moves files
//! within one filesystem (a shared mount, or tests). Pushes are two-phase:
//! the artifact lands at `<path>.part` and is renamed into place, so the
//! peer's existence check can only ever observe a complete file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

const PART_SUFFIX: &str = ".part";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("copy {from} -> {to} failed: {source}")]
    Io {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait TransferChannel: Send + Sync {
    /// Copy a local file to `remote` and commit it atomically.
    async fn push(&self, local: &Path, remote: &str) -> Result<(), TransferError>;

    /// Whether `remote` exists. A failed probe is logged and reported as absent.
    async fn exists(&self, remote: &str) -> bool;

    /// Copy `remote` to a local file.
    async fn pull(&self, remote: &str, local: &Path) -> Result<(), TransferError>;
}

fn part_path(remote: &str) -> String {
    format!("{remote}{PART_SUFFIX}")
}

/// Quote a path for a POSIX remote shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `scp` + `ssh` against `user@host`.
#[derive(Debug, Clone)]
pub struct ScpChannel {
    user: String,
    host: String,
    options: Vec<String>,
    scp_program: String,
    ssh_program: String,
}

impl ScpChannel {
    pub fn new(user: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
            scp_program: "scp".to_string(),
            ssh_program: "ssh".to_string(),
        }
    }

    /// Run these executables instead of the `scp` and `ssh` found on `PATH`.
    pub fn with_programs(mut self, scp: impl Into<String>, ssh: impl Into<String>) -> Self {
        self.scp_program = scp.into();
        self.ssh_program = ssh.into();
        self
    }

    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// `user@host:'path'`, quoted the same way as paths in remote commands.
    fn remote_spec(&self, path: &str) -> String {
        format!("{}:{}", self.target(), shell_quote(path))
    }

    async fn run(&self, program: &str, args: Vec<String>) -> Result<String, TransferError> {
        let command = format!("{program} {}", args.join(" "));
        debug!(%command, "running transfer command");

        let output = Command::new(program)
            .args(&self.options)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| TransferError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(TransferError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn ssh(&self, remote_command: String) -> Result<String, TransferError> {
        self.run(&self.ssh_program, vec![self.target(), remote_command]).await
    }
}

#[async_trait]
impl TransferChannel for ScpChannel {
    async fn push(&self, local: &Path, remote: &str) -> Result<(), TransferError> {
        let staged = part_path(remote);
        self.run(
            &self.scp_program,
            vec![local.display().to_string(), self.remote_spec(&staged)],
        )
        .await?;
        self.ssh(format!(
            "mv -f {} {}",
            shell_quote(&staged),
            shell_quote(remote)
        ))
        .await?;
        Ok(())
    }

    async fn exists(&self, remote: &str) -> bool {
        let probe = format!("test -f {} && echo 1 || echo 0", shell_quote(remote));
        match self.ssh(probe).await {
            Ok(stdout) => stdout.trim() == "1",
            Err(e) => {
                warn!(path = remote, "existence probe failed: {e}");
                false
            }
        }
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), TransferError> {
        if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| TransferError::Io {
                    from: remote.to_string(),
                    to: local.display().to_string(),
                    source,
                })?;
        }
        self.run(
            &self.scp_program,
            vec![self.remote_spec(remote), local.display().to_string()],
        )
        .await?;
        Ok(())
    }
}

/// Channel whose "remote" paths are ordinary local paths.
#[derive(Debug, Clone, Default)]
pub struct LocalChannel;

impl LocalChannel {
    async fn copy(from: &Path, to: &Path) -> Result<(), TransferError> {
        let io_err = |source| TransferError::Io {
            from: from.display().to_string(),
            to: to.display().to_string(),
            source,
        };
        if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::copy(from, to).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl TransferChannel for LocalChannel {
    async fn push(&self, local: &Path, remote: &str) -> Result<(), TransferError> {
        let staged = PathBuf::from(part_path(remote));
        Self::copy(local, &staged).await?;
        tokio::fs::rename(&staged, remote)
            .await
            .map_err(|source| TransferError::Io {
                from: staged.display().to_string(),
                to: remote.to_string(),
                source,
            })
    }

    async fn exists(&self, remote: &str) -> bool {
        match tokio::fs::try_exists(remote).await {
            Ok(found) => found,
            Err(e) => {
                warn!(path = remote, "existence probe failed: {e}");
                false
            }
        }
    }

    async fn pull(&self, remote: &str, local: &Path) -> Result<(), TransferError> {
        Self::copy(Path::new(remote), local).await
    }
}
