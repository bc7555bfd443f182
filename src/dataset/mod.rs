//! Conversational dataset records and the transformations applied to them.
//!
//! - [`types`]: turns, tool calls, dataset items and final records
//! - [`normalize`]: loose generated JSON into typed items
//! - [`persona`]: structure-preserving merge of persona-styled wording
//! - [`format`]: chat-template rendering into training text

pub mod format;
pub mod normalize;
pub mod persona;
pub mod types;

pub use format::{ChatFormatter, TeraChatTemplate, CHATML};
pub use normalize::{normalize_conversation, MIN_TURNS};
pub use persona::{merge_styled, MergeOutcome};
pub use types::{DatasetItem, FinalRecord, Role, ToolCall, Turn};
