//! Single-call document summaries.
//!
//! Only the first `max_chars` characters of the document are sent. The cut
//! is hard and may land mid-word; long documents are not summarized in
//! pieces.

use std::sync::Arc;

use tracing::info;

use crate::llm::{ChatMessage, ChatModel, ModelError};

pub const SUMMARY_INSTRUCTION: &str = "Summarize the following document:";

pub const NOTHING_TO_SUMMARIZE: &str = "Nothing to summarize. Please upload a document first.";

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Prompt sent for `text`: instruction, blank line, truncated document.
pub fn summary_prompt(text: &str, max_chars: usize) -> String {
    format!("{}\n\n{}", SUMMARY_INSTRUCTION, truncate_chars(text, max_chars))
}

pub struct Summarizer {
    model: Arc<dyn ChatModel>,
    max_chars: usize,
}

impl Summarizer {
    pub fn new(model: Arc<dyn ChatModel>, max_chars: usize) -> Self {
        Self { model, max_chars }
    }

    /// Summarizes `text`, or returns [`NOTHING_TO_SUMMARIZE`] without a
    /// model call when there is no text.
    pub async fn summarize(&self, text: Option<&str>) -> Result<String, ModelError> {
        let text = match text {
            Some(t) if !t.trim().is_empty() => t,
            _ => return Ok(NOTHING_TO_SUMMARIZE.to_string()),
        };

        let prompt = summary_prompt(text, self.max_chars);
        let reply = self.model.complete(&[ChatMessage::user(prompt)]).await?;
        info!(
            model = %self.model.model_name(),
            input_chars = text.chars().count().min(self.max_chars),
            "summary produced"
        );
        Ok(reply)
    }
}
