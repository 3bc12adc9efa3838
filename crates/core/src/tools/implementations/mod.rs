//! Built-in tool implementations backing the tool registry (spec §4.3):
//!
//! - `view`: read file text, recording a last-read timestamp.
//! - `write` / `edit` / `multiedit`: atomic file modification, gated by the
//!   read-before-write invariant.
//! - `bash`: execute shell commands through the persistent shell session.
//! - `ls`: gitignore-aware recursive directory listing.
//! - `glob`: find files by doublestar pattern, newest-first.
//! - `grep`: regex content search with line numbers.
//! - `fetch`: HTTP GET with text/markdown/html conversion.
//! - `download`: stream a URL to a file.

pub mod bash;
pub mod download;
pub mod edit;
pub mod fetch;
pub mod glob;
pub mod grep;
pub mod list;
pub mod multiedit;
pub mod read;
pub mod write;

pub use bash::BashTool;
pub use download::DownloadTool;
pub use edit::EditTool;
pub use fetch::FetchTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use list::ListTool;
pub use multiedit::MultiEditTool;
pub use read::ReadTool;
pub use write::WriteTool;

use std::sync::Arc;

use crate::tools::registry::ToolRegistry;

/// Register every built-in tool from spec.md §4.3's table. MCP-derived tools
/// are registered separately by the MCP supervisor once servers have been
/// initialized.
pub async fn register_all_tools(registry: &ToolRegistry) {
    registry.register(Arc::new(ReadTool)).await;
    registry.register(Arc::new(WriteTool)).await;
    registry.register(Arc::new(EditTool)).await;
    registry.register(Arc::new(MultiEditTool)).await;
    registry.register(Arc::new(BashTool)).await;
    registry.register(Arc::new(GrepTool)).await;
    registry.register(Arc::new(GlobTool)).await;
    registry.register(Arc::new(ListTool)).await;
    registry.register(Arc::new(FetchTool)).await;
    registry.register(Arc::new(DownloadTool)).await;
}
