//! Durable artifact storage for pipeline sessions.
//!
//! A session directory is the durability boundary: every stage output, every
//! fetched document and the checkpoint record live under it.
//!
//! # Usage
//!
//! ```rust,ignore
//! use knowledge_forge::storage::{content_address, keys, ArtifactStore};
//!
//! let store = ArtifactStore::open("./knowledge_session_rust_async_1700000000").await?;
//! let key = keys::raw_document(&content_address("https://tokio.rs"));
//! if store.get(&key).await?.is_none() {
//!     store.put(&key, b"...").await?;
//! }
//! ```

pub mod artifacts;
pub mod keys;

pub use artifacts::{content_address, ArtifactStore};
