//! Shared utility functions for knowledge-forge.
//!
//! This module provides common utilities used across multiple modules,
//! including JSON extraction from completion-service responses.

pub mod json_extraction;

pub use json_extraction::{extract_json_from_response, JsonExtractionError};
