//! `semem-client` — a generic JSON-RPC tool-invocation client for MCP
//! (Model Context Protocol) servers.
//!
//! This crate provides:
//! - JSON-RPC 2.0 protocol types plus MCP tool/resource catalog shapes.
//! - A stdio transport that spawns the server process and binds to its
//!   stdin/stdout.
//! - A [`Session`] that correlates concurrent in-flight requests over the
//!   shared channel, with per-call timeouts and cancellation safety.
//!
//! The remote catalog is discovered dynamically via `tools/list` and
//! `resources/list`; nothing about the tool set is hard-coded here.
//!
//! # Usage
//!
//! ```rust,ignore
//! use semem_client::{ClientConfig, Session};
//!
//! let config = ClientConfig::load_or_default("semem.toml".as_ref())?;
//! let session = Session::connect(&config).await?;
//!
//! for tool in session.tools() {
//!     println!("{}  {}", tool.name, tool.description);
//! }
//!
//! let result = session
//!     .call_tool("semem_generate_embedding", serde_json::json!({"text": "hello"}))
//!     .await?;
//! session.close().await;
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience.
pub use config::{ClientConfig, ServerConfig};
pub use error::{ClientError, Result};
pub use protocol::{ResourceDef, ToolCallResult, ToolDef};
pub use session::Session;
pub use transport::Channel;
