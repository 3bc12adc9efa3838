//! Core of an embeddable terminal coding agent (spec.md §1-§2): the agent
//! execution loop and its supporting infrastructure — event bus,
//! permission broker, tool registry, MCP supervisor, provider adapters,
//! and session/message store. The terminal UI, configuration loading,
//! log rotation, cost bookkeeping, and the persistence layer's SQL schema
//! are external collaborators this crate consumes through narrow traits,
//! not implements.
//!
//! Module map mirrors spec.md §4's component list:
//!
//! | module | spec §4 component |
//! |---|---|
//! | [`event_bus`] | 4.1 Event Bus |
//! | [`permission`] | 4.2 Permission Broker |
//! | [`tools`] | 4.3 Tool Registry |
//! | [`mcp`] | 4.4 MCP Supervisor |
//! | [`ai`] | 4.5 Provider Adapters |
//! | [`store`] | 4.6 Session & Message Store |
//! | [`agent`] | 4.7 Agent Orchestrator |

pub mod agent;
pub mod ai;
pub mod config;
pub mod error;
pub mod event_bus;
pub mod mcp;
pub mod observability;
pub mod paths;
pub mod permission;
pub mod process;
pub mod store;
pub mod tools;

pub use error::CoreError;

/// Aggregate of the collaborators a [`agent::AgenticOrchestrator`] (and the
/// components it drives) needs, assembled once at startup and threaded
/// through by reference rather than reached for as process-global state
/// (spec.md §9: "Global singletons in the source become explicit
/// collaborators").
pub struct CoreEnv {
    pub config: config::CoreConfig,
    pub event_bus: std::sync::Arc<event_bus::EventBus>,
    pub permission_broker: std::sync::Arc<permission::PermissionBroker>,
    pub tool_registry: std::sync::Arc<tools::ToolRegistry>,
    pub mcp_manager: std::sync::Arc<mcp::McpManager>,
    pub session_store: std::sync::Arc<dyn store::SessionStore>,
    pub message_store: std::sync::Arc<dyn store::MessageStore>,
}
