//! MEGA cloud drive driven through the MEGAcmd executables.
//!
//! Every operation is a subprocess. A login session is opened before a
//! record's batch of uploads and closed afterwards.

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{StorageBackend, StorageError};

const BACKEND: &str = "mega";

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError>;
}

#[derive(Debug, Clone, Default)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput, StorageError> {
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| StorageError::Command {
                program: program.to_string(),
                message: e.to_string(),
            })?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MegaConfig {
    pub email: String,
    pub password: String,
    /// Directory holding the MEGAcmd executables; `None` resolves through PATH.
    pub cmd_dir: Option<PathBuf>,
}

pub struct MegaStorage {
    runner: std::sync::Arc<dyn CommandRunner>,
    config: MegaConfig,
}

impl MegaStorage {
    pub fn new(
        config: MegaConfig,
        runner: std::sync::Arc<dyn CommandRunner>,
    ) -> Result<Self, StorageError> {
        if config.email.trim().is_empty() || config.password.is_empty() {
            return Err(StorageError::Config(
                "MEGA_EMAIL and MEGA_PASSWORD are required".into(),
            ));
        }
        Ok(Self { runner, config })
    }

    fn program(&self, command: &str) -> String {
        let file = if cfg!(windows) {
            format!("{command}.bat")
        } else {
            command.to_string()
        };
        match &self.config.cmd_dir {
            Some(dir) => dir.join(file).to_string_lossy().into_owned(),
            None => file,
        }
    }

    /// Run a command and turn a non-zero exit into an error. `secret` keeps
    /// the argument list out of the logs.
    async fn run_checked(
        &self,
        command: &str,
        args: &[String],
        secret: bool,
    ) -> Result<CommandOutput, StorageError> {
        let program = self.program(command);
        if secret {
            debug!(program = %program, "running command");
        } else {
            debug!(program = %program, args = ?args, "running command");
        }
        let out = self.runner.run(&program, args).await?;
        if !out.stderr.is_empty() {
            warn!(program = %program, stderr = %out.stderr, "command stderr");
        }
        if !out.success {
            return Err(StorageError::Command {
                program: command.to_string(),
                message: if out.stderr.is_empty() {
                    out.stdout.clone()
                } else {
                    out.stderr.clone()
                },
            });
        }
        Ok(out)
    }
}

fn remote_path(key: &str) -> String {
    format!("/{}", key.trim_start_matches('/'))
}

#[async_trait]
impl StorageBackend for MegaStorage {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn open_session(&self) -> Result<(), StorageError> {
        self.run_checked(
            "mega-login",
            &[self.config.email.clone(), self.config.password.clone()],
            true,
        )
        .await?;
        info!("mega session opened");
        Ok(())
    }

    async fn close_session(&self) -> Result<(), StorageError> {
        self.run_checked("mega-logout", &[], false).await?;
        info!("mega session closed");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let out = self
            .runner
            .run(&self.program("mega-ls"), &[remote_path(key)])
            .await?;
        Ok(out.success)
    }

    async fn put(&self, key: &str, data: Bytes, _content_type: &str) -> Result<String, StorageError> {
        let remote = remote_path(key);
        let tmp = tempfile::Builder::new()
            .prefix("harvest-mega-")
            .tempfile()?;
        tokio::fs::write(tmp.path(), &data).await?;

        if let Some((dir, _)) = remote.rsplit_once('/') {
            if !dir.is_empty() {
                if let Err(e) = self
                    .run_checked("mega-mkdir", &["-p".into(), dir.to_string()], false)
                    .await
                {
                    debug!(dir, error = %e, "mkdir -p reported an error; continuing");
                }
            }
        }
        // mega-put keeps both copies on a name clash, so clear the old object first.
        if self.exists(key).await? {
            self.run_checked("mega-rm", &["-f".into(), remote.clone()], false)
                .await?;
        }
        self.run_checked(
            "mega-put",
            &[
                "-c".into(),
                tmp.path().to_string_lossy().into_owned(),
                remote.clone(),
            ],
            false,
        )
        .await?;
        Ok(remote)
    }

    async fn reference_for(&self, key: &str) -> Result<String, StorageError> {
        Ok(remote_path(key))
    }
}
