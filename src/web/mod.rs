//! Web adapters: search, raw content fetching and text extraction.
//!
//! Each adapter sits behind a narrow trait ([`SearchProvider`],
//! [`ContentFetcher`], [`TextExtractor`]) so stages can be driven by test
//! doubles. Every network call is bounded by a timeout.

pub mod extract;
pub mod fetch;
pub mod search;

pub use extract::{ExtractedText, HtmlTextExtractor, TextExtractor, MIN_TEXT_CHARS};
pub use fetch::{ContentFetcher, HttpFetcher, USER_AGENT};
pub use search::{SearchHit, SearchProvider, SearxngClient};
