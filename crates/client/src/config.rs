//! Client configuration.
//!
//! Deserialized from `semem.toml`. Every field has a default so an empty
//! file (or no file at all) yields a working configuration; the CLI layers
//! flag overrides on top.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-call deadline in milliseconds.
    #[serde(default = "d_30000")]
    pub timeout_ms: u64,

    /// Connect-phase retry budget for transport-level failures.
    /// Application-level errors are never retried.
    #[serde(default = "d_3")]
    pub retries: u32,

    /// Deadline for spawning the server and completing the handshake.
    #[serde(default = "d_10000")]
    pub startup_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            timeout_ms: 30_000,
            retries: 3,
            startup_timeout_ms: 10_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The remote endpoint: a command spawned as a child process, spoken to
/// over stdin/stdout.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// The command to spawn (e.g. `"node"`).
    #[serde(default)]
    pub command: String,

    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,

    /// Additional environment variables for the spawned process.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl ClientConfig {
    /// Parse a config file from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| ClientError::Validation(format!("config {}: {e}", path.display())))
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

fn d_30000() -> u64 {
    30_000
}

fn d_10000() -> u64 {
    10_000
}

fn d_3() -> u32 {
    3
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_gets_documented_defaults() {
        let cfg: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.timeout_ms, 30_000);
        assert_eq!(cfg.retries, 3);
        assert_eq!(cfg.startup_timeout_ms, 10_000);
        assert!(cfg.server.command.is_empty());
    }

    #[test]
    fn parse_full_config() {
        let raw = r#"
            timeout_ms = 5000
            retries = 1

            [server]
            command = "node"
            args = ["mcp/index.js"]

            [server.env]
            SEMEM_LOG = "debug"
        "#;
        let cfg: ClientConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.timeout_ms, 5_000);
        assert_eq!(cfg.retries, 1);
        assert_eq!(cfg.server.command, "node");
        assert_eq!(cfg.server.args, vec!["mcp/index.js"]);
        assert_eq!(cfg.server.env.get("SEMEM_LOG").unwrap(), "debug");
    }

    #[test]
    fn partial_server_section() {
        let raw = r#"
            [server]
            command = "semem-mcp"
        "#;
        let cfg: ClientConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.server.command, "semem-mcp");
        assert!(cfg.server.args.is_empty());
        assert_eq!(cfg.timeout_ms, 30_000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = ClientConfig::load_or_default(Path::new("/nonexistent/semem.toml")).unwrap();
        assert_eq!(cfg.retries, 3);
    }
}
