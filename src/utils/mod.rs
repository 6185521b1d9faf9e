//! Shared helpers.

pub mod json_extraction;
pub mod text;

pub use json_extraction::{
    extract_json_from_response, try_extract_json_from_response, JsonExtractionError,
    JsonExtractionResult,
};
