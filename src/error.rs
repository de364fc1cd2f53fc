//! Crate-wide error taxonomy.
//!
//! Module errors ([`ExtractError`], [`EmbedError`], [`ModelError`],
//! [`RagError`]) convert into one of four user-facing categories. Every
//! category maps to a plain-text message via [`DocChatError::user_message`],
//! which is what outer layers show instead of crashing.

use thiserror::Error;

use crate::embedding::EmbedError;
use crate::extract::ExtractError;
use crate::llm::ModelError;
use crate::respond::RagError;

pub const PLEASE_UPLOAD_FILE: &str = "Please upload a file.";
pub const PLEASE_UPLOAD_DOCUMENT: &str = "Please upload a document first.";

#[derive(Debug, Error)]
pub enum DocChatError {
    /// The file's extension is not `.pdf`, `.docx` or `.txt`, or its
    /// contents could not be read as that format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A document, file, credential or index was required but missing.
    #[error("{0}")]
    EmptyOrMissingInput(&'static str),

    /// Upload rejected by the size guard before extraction.
    #[error("file is {size} bytes, limit is {limit} bytes")]
    OversizeInput { size: usize, limit: usize },

    /// The embedding or language-model call failed.
    #[error("upstream model failure: {0}")]
    UpstreamModelFailure(String),
}

impl DocChatError {
    /// Message suitable for showing to the person who made the request.
    pub fn user_message(&self) -> String {
        match self {
            DocChatError::UnsupportedFormat(detail) => format!(
                "Unsupported file ({}). Please upload a .pdf, .docx, or .txt file.",
                detail
            ),
            DocChatError::EmptyOrMissingInput(msg) => msg.to_string(),
            DocChatError::OversizeInput { limit, .. } => format!(
                "File too large. Maximum allowed size is {}.",
                human_size(*limit)
            ),
            DocChatError::UpstreamModelFailure(_) => {
                "Unable to process request right now. Please try again.".to_string()
            }
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DocChatError::UnsupportedFormat(_) => "unsupported_format",
            DocChatError::EmptyOrMissingInput(_) => "empty_or_missing_input",
            DocChatError::OversizeInput { .. } => "oversize_input",
            DocChatError::UpstreamModelFailure(_) => "upstream_model_failure",
        }
    }
}

impl From<ExtractError> for DocChatError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::UnsupportedFormat(ext) => DocChatError::UnsupportedFormat(ext),
            other => DocChatError::UnsupportedFormat(other.to_string()),
        }
    }
}

impl From<EmbedError> for DocChatError {
    fn from(e: EmbedError) -> Self {
        DocChatError::UpstreamModelFailure(e.to_string())
    }
}

impl From<ModelError> for DocChatError {
    fn from(e: ModelError) -> Self {
        DocChatError::UpstreamModelFailure(e.to_string())
    }
}

impl From<RagError> for DocChatError {
    fn from(e: RagError) -> Self {
        DocChatError::UpstreamModelFailure(e.to_string())
    }
}

/// `2097152` → `"2 MB"`, `1536` → `"1.5 KB"`.
pub fn human_size(bytes: usize) -> String {
    const UNITS: [&str; 3] = ["bytes", "KB", "MB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 || value.fract() == 0.0 {
        format!("{} {}", value as u64, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
