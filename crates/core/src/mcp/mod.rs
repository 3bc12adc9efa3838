//! MCP Supervisor (spec §4.4): discovers external Model-Context-Protocol
//! servers over stdio/SSE/HTTP, initializes them, enumerates their tools,
//! and wraps each as a registry entry named `mcp_<server>_<tool>`.

pub mod client;
pub mod config;
pub mod manager;
pub mod protocol;
pub mod tool;
pub mod transport;

pub use config::McpServerConfig;
pub use manager::{McpManager, McpServerInfo, McpServerStatus};
pub use tool::{register_mcp_tools, McpTool};
