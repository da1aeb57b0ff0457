//! ai-tool-sync core types.
//!
//! This crate provides:
//! - [`dirs`]: the global home layout (`~/.ai-tool-sync/`) and per-project
//!   workspace directory detection
//! - [`content`]: the typed content model returned by plugin loaders and the
//!   [`ContentParser`] seam that turns raw fetched bytes into records

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod content;
pub mod dirs;

pub use content::{
    ContentKind, ContentParser, FrontmatterParser, LoadError, LoadResult, ParsedContent,
};
pub use dirs::{ToolSyncHome, WorkspaceDir};
