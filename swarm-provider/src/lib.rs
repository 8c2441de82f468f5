#![deny(missing_docs)]
//! Backend contract and wire types for language-model providers.
//!
//! The full turn loop (context assembly, retry, tool dispatch) lives in
//! `swarm-process::process::Process`, which is generic over this crate's
//! [`Provider`] trait.
//!
//! Key traits defined here:
//! - [`Provider`] — LLM provider interface (not object-safe, uses RPITIT)
//! - [`ContextStrategy`] — context window management

pub mod context;
pub mod convert;
pub mod provider;
pub mod types;

// Re-exports
pub use context::{ContextStrategy, NoCompaction};
pub use convert::{
    content_block_to_part, content_part_to_block, content_to_parts, content_to_user_message,
    parts_to_content,
};
pub use provider::{Provider, ProviderError};
pub use types::*;
