//! Stdio Model Context Protocol (MCP) client for toolwire.
//!
//! Launches a tool server as a child process and talks JSON-RPC to it over
//! the child's stdin/stdout.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐ call  ┌────────────┐ stdin  ┌────────────┐
//! │  caller  │──────▶│ Correlator │───────▶│ MCP server │
//! │          │◀──────│  (pending) │◀───────│  (child)   │
//! └──────────┘ result└────────────┘ stdout └────────────┘
//!                          ▲                     │ stderr
//!                          │ frames              ▼
//!                    JsonFrameCodec           tracing
//! ```
//!
//! - [`process`]: spawns and stops the child, drains stderr into the log.
//! - [`codec`]: splits stdout into JSON frames, writes one frame per line.
//! - [`correlator`]: assigns ids, tracks pending calls, matches responses.
//! - [`handshake`]: `initialize` / `initialized` ordering.
//! - [`retry`]: bounded retries for discovery calls.
//! - [`McpSession`]: all of the above behind one owned session.
//!
//! # Example
//!
//! ```no_run
//! use toolwire_mcp::{McpSession, ServerConfig};
//!
//! # async fn example() -> toolwire_mcp::McpResult<()> {
//! let config = ServerConfig::stdio(
//!     "spendcast",
//!     ".venv/bin/python",
//!     ["src/spendcast_mcp/server.py"],
//! )
//! .with_cwd("/srv/spendcast-mcp");
//!
//! // Spawn, initialize, send the initialized notification.
//! let session = McpSession::connect(config).await?;
//!
//! // Discover tools (retried while the server warms up).
//! let tools = session.list_tools().await?;
//!
//! // Run a query.
//! let rows = session
//!     .execute_sparql("SELECT (COUNT(*) AS ?c) WHERE { ?s ?p ?o }")
//!     .await?;
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
mod config;
pub mod correlator;
mod error;
pub mod handshake;
pub mod process;
pub mod protocol;
pub mod retry;
mod session;

pub use codec::JsonFrameCodec;
pub use config::{BackoffKind, RetryConfig, ServerConfig, ToolwireConfig};
pub use error::{McpError, McpResult};
pub use handshake::HandshakeState;
pub use protocol::{ClientInfo, InitializeResult, McpTool, ToolCallResult, ToolContent};
pub use retry::{Backoff, RetryPolicy, MAX_RETRY_DELAY};
pub use session::McpSession;
