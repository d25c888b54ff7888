//! Local process execution for OS-level commands (`adb`, `cec-client`, ...)

use async_trait::async_trait;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Errors from running a local process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit; carries stderr or the exit code
    #[error("{0}")]
    Failed(String),
}

/// Runs a binary with arguments and returns its stdout
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, binary: &str, args: &[String]) -> Result<String, ProcessError>;
}

/// Spawns real child processes
///
/// No timeout and no binary allow-list are applied.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessExecutor;

impl LocalProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for LocalProcessExecutor {
    async fn run(&self, binary: &str, args: &[String]) -> Result<String, ProcessError> {
        info!("[EXEC] Spawning local process: {} {}", binary, args.join(" "));

        let output = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ProcessError::Spawn {
                binary: binary.to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("[EXEC] {} exited with {}", binary, output.status);

        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = stderr.trim();
        if !stderr.is_empty() {
            return Err(ProcessError::Failed(stderr.to_string()));
        }
        Err(ProcessError::Failed(match output.status.code() {
            Some(code) => format!("Exit code {}", code),
            None => "Terminated by signal".into(),
        }))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".into(), script.into()]
    }

    #[tokio::test]
    async fn test_success_returns_stdout() {
        let out = LocalProcessExecutor::new()
            .run("sh", &sh("echo hello; echo ignored >&2"))
            .await
            .unwrap();
        assert_eq!(out, "hello\n");
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let err = LocalProcessExecutor::new()
            .run("sh", &sh("echo partial; echo '  device offline ' >&2; exit 1"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "device offline");
    }

    #[tokio::test]
    async fn test_failure_without_stderr_reports_exit_code() {
        let err = LocalProcessExecutor::new()
            .run("sh", &sh("exit 3"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Exit code 3");
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = LocalProcessExecutor::new()
            .run("definitely-not-a-real-binary-4821", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }
}
