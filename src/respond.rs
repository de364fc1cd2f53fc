//! Context-grounded answers over the uploaded document.
//!
//! Each question is answered on its own: the model sees one system
//! instruction and one user message holding the retrieved context and the
//! question. Earlier turns of the conversation are not sent.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::embedding::EmbedError;
use crate::index::VectorIndex;
use crate::llm::{ChatMessage, ChatModel, ModelError};
use crate::models::ScoredChunk;
use crate::retrieve::{Retrieval, Retriever};

pub const GROUNDING_INSTRUCTION: &str = "Answer ONLY from the provided context.";

/// Reply when there is nothing to retrieve from.
pub const NO_DOCUMENT_REPLY: &str = "No document uploaded yet.";

/// Failures on the document path. Not classified further.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("retrieval failed: {0}")]
    Retrieval(#[from] EmbedError),
    #[error("model call failed: {0}")]
    Model(#[from] ModelError),
}

/// Chunk texts in retrieval order, separated by blank lines.
pub fn build_context(hits: &[ScoredChunk]) -> String {
    hits.iter()
        .map(|h| h.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// The full message list sent for a grounded question.
pub fn grounded_messages(question: &str, hits: &[ScoredChunk]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(GROUNDING_INSTRUCTION),
        ChatMessage::user(format!(
            "Context:\n{}\n\nQuestion: {}",
            build_context(hits),
            question
        )),
    ]
}

pub struct GroundedResponder {
    retriever: Retriever,
    model: Arc<dyn ChatModel>,
}

impl GroundedResponder {
    pub fn new(retriever: Retriever, model: Arc<dyn ChatModel>) -> Self {
        Self { retriever, model }
    }

    /// Retrieves context for `question` and returns the model's reply as is.
    ///
    /// Returns [`NO_DOCUMENT_REPLY`] when `index` is absent or empty. The
    /// model is called at most once.
    pub async fn answer(
        &self,
        question: &str,
        index: Option<&VectorIndex>,
    ) -> Result<String, RagError> {
        let hits = match self.retriever.retrieve(question, index).await? {
            Retrieval::NoDocument => return Ok(NO_DOCUMENT_REPLY.to_string()),
            Retrieval::Hits(hits) => hits,
        };

        let messages = grounded_messages(question, &hits);
        let reply = self.model.complete(&messages).await?;
        info!(
            model = %self.model.model_name(),
            chunks = hits.len(),
            reply_len = reply.len(),
            "grounded answer produced"
        );
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::embedding::HashEmbedder;
    use crate::index::build_index;
    use crate::llm::ModelErrorKind;
    use crate::models::{Chunk, Role};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records every message list and echoes the last user message.
    #[derive(Default)]
    struct EchoModel {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for EchoModel {
        fn model_name(&self) -> &str {
            "echo"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok(messages.last().map(|m| m.content.clone()).unwrap_or_default())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, ModelError> {
            Err(ModelError::from_status(401, "bad key"))
        }
    }

    fn hit(index: usize, text: &str) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                index,
                start: 0,
                end: text.len(),
                text: text.to_string(),
                hash: String::new(),
            },
            score: 1.0,
        }
    }

    #[test]
    fn prompt_layout() {
        let msgs = grounded_messages("What?", &[hit(0, "one"), hit(1, "two")]);
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, Role::System);
        assert_eq!(msgs[0].content, GROUNDING_INSTRUCTION);
        assert_eq!(msgs[1].role, Role::User);
        assert_eq!(msgs[1].content, "Context:\none\n\ntwo\n\nQuestion: What?");
    }

    #[tokio::test]
    async fn no_index_returns_sentinel_without_model_call() {
        let model = Arc::new(EchoModel::default());
        let responder = GroundedResponder::new(
            Retriever::new(Arc::new(HashEmbedder::new(16)), 3),
            model.clone(),
        );
        let reply = responder.answer("hello?", None).await.unwrap();
        assert_eq!(reply, NO_DOCUMENT_REPLY);
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn answer_sends_retrieved_context_once() {
        let embedder = Arc::new(HashEmbedder::new(256));
        let index = build_index(
            "Rust guarantees memory safety without a garbage collector.",
            &ChunkingConfig::default(),
            embedder.as_ref(),
            8,
        )
        .await
        .unwrap();

        let model = Arc::new(EchoModel::default());
        let responder = GroundedResponder::new(Retriever::new(embedder, 3), model.clone());
        let reply = responder
            .answer("How does Rust manage memory?", Some(&index))
            .await
            .unwrap();

        assert!(reply.contains("memory safety without a garbage collector"));
        assert!(reply.ends_with("Question: How does Rust manage memory?"));
        assert_eq!(model.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn model_failure_propagates_unclassified() {
        let embedder = Arc::new(HashEmbedder::new(16));
        let index = build_index("some text", &ChunkingConfig::default(), embedder.as_ref(), 8)
            .await
            .unwrap();
        let responder = GroundedResponder::new(Retriever::new(embedder, 3), Arc::new(FailingModel));
        let err = responder.answer("q", Some(&index)).await.unwrap_err();
        match err {
            RagError::Model(e) => assert_eq!(e.kind, ModelErrorKind::AuthInvalid),
            other => panic!("unexpected error: {other}"),
        }
    }
}
