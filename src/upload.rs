//! Upload pipeline: size guard, text extraction, index build.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::{DocChatError, PLEASE_UPLOAD_FILE};
use crate::extract::{extract_text, FileKind};
use crate::index::{build_index, VectorIndex};
use crate::models::Document;

pub const FILE_LOADED: &str = "File loaded successfully.";

/// A document and the index built from it. They are created together and
/// replaced together.
#[derive(Debug)]
pub struct LoadedDocument {
    pub document: Document,
    pub index: VectorIndex,
}

/// Rejects uploads over `limit` bytes.
pub fn check_size(size: usize, limit: usize) -> Result<(), DocChatError> {
    if size > limit {
        return Err(DocChatError::OversizeInput { size, limit });
    }
    Ok(())
}

/// Validates, extracts and indexes one uploaded file.
///
/// Checks run in order: missing file name or empty body, size guard,
/// extension. Nothing is extracted or embedded if any check fails.
pub async fn load_document(
    filename: &str,
    bytes: Vec<u8>,
    config: &Config,
    embedder: &dyn Embedder,
) -> Result<LoadedDocument, DocChatError> {
    let filename = filename.trim();
    if filename.is_empty() || bytes.is_empty() {
        return Err(DocChatError::EmptyOrMissingInput(PLEASE_UPLOAD_FILE));
    }
    if let Err(e) = check_size(bytes.len(), config.upload.max_bytes) {
        warn!(filename, size = bytes.len(), "upload rejected by size guard");
        return Err(e);
    }
    FileKind::from_filename(filename)?;

    let started = Instant::now();
    let name = filename.to_string();
    let text = tokio::task::spawn_blocking(move || extract_text(&name, &bytes))
        .await
        .map_err(|e| DocChatError::UnsupportedFormat(format!("extraction aborted: {}", e)))??;

    let index = build_index(
        &text,
        &config.chunking,
        embedder,
        config.embedding.batch_size,
    )
    .await?;

    let document = Document::new(filename, text);
    info!(
        filename,
        chars = document.char_count(),
        chunks = index.len(),
        latency_ms = started.elapsed().as_millis(),
        "document loaded"
    );

    Ok(LoadedDocument { document, index })
}
