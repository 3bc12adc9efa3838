//! Agent Orchestrator (spec §4.7): the run loop that assembles a prompt,
//! streams from a provider adapter, dispatches tool calls concurrently
//! through the registry and permission broker, feeds results back, and
//! finalizes a run with one of the terminal `Finish` reasons.
//!
//! - `orchestrator` — `AgenticOrchestrator`, the public `Run`/`Cancel`/
//!   `IsBusy`/`Summarize` surface and the per-session state machine.
//! - `stream` — drives a single provider turn, forwarding content/reasoning
//!   deltas and accumulating tool-call parts.
//! - `executor` — concurrent, permission-gated dispatch of a turn's tool
//!   calls, preserving result ordering by call-id.
//! - `context` — system-prompt assembly and the auto-summarize token
//!   estimate.
//! - `translate` — Message/Part ↔ provider wire-model conversion shared by
//!   the orchestrator and sub-agents.
//! - `subagent` — the "task", "title", and "summarize" agent roles.
//! - `cancellation` — per-run `CancellationToken` registry.
//! - `failure` — repeated tool-failure detection.
//! - `hooks` — pre/post tool-execution hooks (safety veto, logging).
//! - `loop_events` — the `RunEvent` protocol published to callers.

pub mod cancellation;
pub mod context;
pub mod executor;
pub mod failure;
pub mod hooks;
pub mod loop_events;
pub mod orchestrator;
pub mod stream;
pub mod subagent;
pub mod translate;

pub use cancellation::CancellationRegistry;
pub use context::{build_context_prefix, estimate_tokens};
pub use executor::SessionToolEnv;
pub use failure::detect_repeated_failures;
pub use hooks::{HookResult, LoggingHook, PostToolHook, PreToolHook, SafetyHook};
pub use loop_events::{LoopInput, RunEvent};
pub use orchestrator::{Attachment, AgenticOrchestrator, OrchestratorConfig, OrchestratorServices, RunRequest};
pub use subagent::{generate_summary, generate_title, run_task, SubAgentTask};
