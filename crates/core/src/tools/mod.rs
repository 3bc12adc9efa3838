//! Tool implementations for Krusty
//!
//! Provides the tool registry and all built-in tool implementations.

pub mod image;
pub mod implementations;
pub mod matching;
pub mod path_utils;
pub mod persistent_shell;
pub mod registry;
pub mod shell_safety;
pub mod truncation;

pub use image::{
    is_image_extension, is_supported_file, load_from_clipboard_rgba, load_from_path, load_from_url,
};
pub use implementations::register_all_tools;
pub use registry::{parse_params, ToolContext, ToolOutputChunk, ToolRegistry, ToolResult};
