//! Shared utility functions.
//!
//! This module provides JSON extraction from LLM replies.

pub mod json_extraction;

pub use json_extraction::{
    extract_from_code_block, extract_json_value, find_matching_delimiter, parse_json_list,
    JsonExtractionError,
};
