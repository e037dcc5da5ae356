//! Process-backed workers.
//!
//! Lifecycle plumbing for engines that run as external child processes
//! speaking a line-oriented protocol over stdio. The protocol vocabulary
//! belongs to the layer above; this module only spawns, probes, and stops
//! the process and moves raw lines across the pipes.

use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use crate::factory::WorkerFactory;

/// How to launch and stop one engine process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineProcessConfig {
    /// Executable to spawn (e.g. `stockfish`).
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Line written to the engine before killing it, for engines with a
    /// graceful quit command. `None` kills outright.
    #[serde(default)]
    pub quit_command: Option<String>,

    /// How long to wait for the process to exit after the quit command.
    #[serde(with = "crate::config::duration_millis")]
    pub quit_timeout: Duration,
}

impl EngineProcessConfig {
    /// Create a configuration for `command` with no arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            quit_command: None,
            quit_timeout: Duration::from_secs(2),
        }
    }

    /// Set the arguments
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Set the graceful quit line
    pub fn with_quit_command(mut self, line: impl Into<String>) -> Self {
        self.quit_command = Some(line.into());
        self
    }

    /// Set the post-quit grace period
    pub fn with_quit_timeout(mut self, timeout: Duration) -> Self {
        self.quit_timeout = timeout;
        self
    }
}

/// One running engine process with line-oriented stdio.
///
/// The process is killed when this value is dropped, so a leaked lease
/// cannot leak the child.
#[derive(Debug)]
pub struct EngineProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl EngineProcess {
    /// Write one line to the engine's stdin.
    pub async fn send_line(&mut self, line: &str) -> std::io::Result<()> {
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await
    }

    /// Read one line from the engine's stdout, without the trailing
    /// newline. EOF means the engine closed its side and is reported as
    /// an error.
    pub async fn read_line(&mut self) -> std::io::Result<String> {
        let mut line = String::new();
        let n = self.stdout.read_line(&mut line).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "engine closed its stdout",
            ));
        }
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Whether the backing process is still running.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// OS process id, if the process is still attached.
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Spawns [`EngineProcess`] workers from an [`EngineProcessConfig`].
pub struct EngineProcessFactory {
    config: EngineProcessConfig,
}

impl EngineProcessFactory {
    /// Create a factory for the given process configuration.
    pub fn new(config: EngineProcessConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl WorkerFactory for EngineProcessFactory {
    type Worker = EngineProcess;

    async fn create(&self) -> anyhow::Result<EngineProcess> {
        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| {
                format!("failed to spawn engine process `{}`", self.config.command)
            })?;

        let stdin = child
            .stdin
            .take()
            .context("engine process has no stdin pipe")?;
        let stdout = child
            .stdout
            .take()
            .context("engine process has no stdout pipe")?;

        debug!(pid = child.id(), command = %self.config.command, "spawned engine process");
        Ok(EngineProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn destroy(&self, mut worker: EngineProcess) {
        if let Some(quit) = &self.config.quit_command {
            if worker.is_alive() {
                let _ = worker.send_line(quit).await;
                match tokio::time::timeout(self.config.quit_timeout, worker.child.wait()).await {
                    Ok(Ok(status)) => {
                        debug!(%status, "engine process exited cleanly");
                        return;
                    }
                    Ok(Err(e)) => warn!("error waiting for engine process: {e}"),
                    Err(_) => warn!("engine process ignored quit command; killing it"),
                }
            }
        }
        if let Err(e) = worker.child.kill().await {
            debug!("engine process already gone: {e}");
        }
    }

    async fn health_check(&self, worker: &mut EngineProcess) -> bool {
        worker.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_send_and_read() {
        let factory = EngineProcessFactory::new(EngineProcessConfig::new("cat"));
        let mut worker = factory.create().await.unwrap();

        assert!(worker.is_alive());
        worker.send_line("hello engine").await.unwrap();
        assert_eq!(worker.read_line().await.unwrap(), "hello engine");

        factory.destroy(worker).await;
    }

    #[tokio::test]
    async fn test_health_check_detects_dead_process() {
        let factory = EngineProcessFactory::new(EngineProcessConfig::new("true"));
        let mut worker = factory.create().await.unwrap();

        // `true` exits immediately; wait for it.
        let _ = worker.child.wait().await;
        assert!(!factory.health_check(&mut worker).await);

        factory.destroy(worker).await;
    }

    #[tokio::test]
    async fn test_create_fails_for_missing_binary() {
        let factory = EngineProcessFactory::new(EngineProcessConfig::new(
            "definitely-not-a-real-engine-binary",
        ));
        let err = factory.create().await.unwrap_err();
        assert!(err.to_string().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_destroy_falls_back_to_kill_when_quit_ignored() {
        // `cat` echoes the quit line instead of exiting.
        let config = EngineProcessConfig::new("cat")
            .with_quit_command("quit")
            .with_quit_timeout(Duration::from_millis(50));
        let factory = EngineProcessFactory::new(config);

        let worker = factory.create().await.unwrap();
        factory.destroy(worker).await;
    }

    #[test]
    fn test_config_builder() {
        let config = EngineProcessConfig::new("stockfish")
            .with_args(["--uci"])
            .with_quit_command("quit")
            .with_quit_timeout(Duration::from_millis(500));

        assert_eq!(config.command, "stockfish");
        assert_eq!(config.args, vec!["--uci"]);
        assert_eq!(config.quit_command.as_deref(), Some("quit"));
        assert_eq!(config.quit_timeout, Duration::from_millis(500));
    }
}
