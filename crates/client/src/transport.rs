//! Transport layer: a raw byte channel to the remote tool host.
//!
//! The only production transport is stdio — spawn a child process and bind
//! to its stdin/stdout. Tests (or alternate embeddings) can wrap any pair
//! of async streams via [`Channel::from_streams`]. Request framing and
//! correlation live one layer up, in [`session`](crate::session).

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;

use crate::config::ServerConfig;
use crate::error::{ClientError, Result};

/// A bidirectional byte channel to one remote host instance.
///
/// Exclusively owned: a `Channel` is consumed by the session that drives
/// it, and no two sessions ever share one.
pub struct Channel {
    pub(crate) reader: Box<dyn AsyncRead + Send + Unpin>,
    pub(crate) writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub(crate) child: Option<Child>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel").finish_non_exhaustive()
    }
}

impl Channel {
    /// Spawn the configured server command and bind to its stdio.
    pub fn spawn(config: &ServerConfig) -> Result<Self> {
        if config.command.is_empty() {
            return Err(ClientError::Validation(
                "server command is empty (set [server].command or --server)".into(),
            ));
        }

        let mut cmd = tokio::process::Command::new(&config.command);
        cmd.args(&config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| ClientError::Connection(format!("spawning {}: {e}", config.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ClientError::Connection("failed to capture child stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ClientError::Connection("failed to capture child stdout".into()))?;

        tracing::debug!(command = %config.command, "spawned server process");

        Ok(Self {
            reader: Box::new(stdout),
            writer: Box::new(stdin),
            child: Some(child),
        })
    }

    /// Build a channel over an arbitrary stream pair (no child process).
    pub fn from_streams(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            child: None,
        }
    }
}

/// Wait briefly for a child to exit on its own, then kill it.
///
/// Called after the session has closed the child's stdin, which is the
/// shutdown signal MCP servers respond to.
pub(crate) async fn reap_child(mut child: Child) {
    let wait = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait()).await;
    match wait {
        Ok(Ok(status)) => {
            tracing::debug!(?status, "server process exited");
        }
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "error waiting for server process");
        }
        Err(_) => {
            tracing::warn!("server process did not exit within grace period, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to kill server process");
            }
        }
    }
}
