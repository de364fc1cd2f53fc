//! Direct chat with the language model using the caller's own API key.
//!
//! The key comes with each request and is used for exactly one client,
//! which is dropped when the call returns. The process environment is never
//! consulted here. Failures are turned into one of three fixed replies; no
//! call is retried.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::credential::CredentialSource;
use crate::llm::{classify_error_text, ChatMessage, ChatModelFactory, ModelError, ModelErrorKind};
use crate::models::{Role, Turn};

pub const MISSING_KEY_REPLY: &str = "Please enter your OpenAI API key to use LLM Chat. \
     You can generate one at https://platform.openai.com/account/api-keys";

pub const INVALID_KEY_REPLY: &str =
    "Invalid API key. You can generate one at https://platform.openai.com/api-keys";

pub const RATE_LIMITED_REPLY: &str = "Rate limit exceeded. Please wait a moment and try again.";

pub const GENERIC_FAILURE_REPLY: &str =
    "Unable to process request. Please check your API key and try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "kind")]
pub enum DirectOutcome {
    Answered,
    MissingCredential,
    Failed(ModelErrorKind),
}

#[derive(Debug, Clone)]
pub struct DirectReply {
    pub text: String,
    pub outcome: DirectOutcome,
}

/// History replayed in order, then the new message as a user turn.
///
/// Turns not tagged `user` are replayed as assistant turns.
pub fn direct_messages(history: &[Turn], message: &str) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = history
        .iter()
        .map(|turn| match turn.role {
            Role::User => ChatMessage::user(turn.content.clone()),
            _ => ChatMessage::assistant(turn.content.clone()),
        })
        .collect();
    messages.push(ChatMessage::user(message));
    messages
}

/// Kind used to pick the failure reply.
///
/// Trusts the structured kind when the client set one (or saw an HTTP
/// status); otherwise falls back to matching the error text.
pub fn failure_kind(err: &ModelError) -> ModelErrorKind {
    if err.kind != ModelErrorKind::Other || err.status.is_some() {
        err.kind
    } else {
        classify_error_text(&err.message)
    }
}

pub fn failure_reply(kind: ModelErrorKind) -> &'static str {
    match kind {
        ModelErrorKind::AuthInvalid => INVALID_KEY_REPLY,
        ModelErrorKind::RateLimited => RATE_LIMITED_REPLY,
        ModelErrorKind::Other => GENERIC_FAILURE_REPLY,
    }
}

pub struct DirectChat {
    factory: Arc<dyn ChatModelFactory>,
}

impl DirectChat {
    pub fn new(factory: Arc<dyn ChatModelFactory>) -> Self {
        Self { factory }
    }

    /// Sends `history` plus `message` with the caller's `api_key`.
    ///
    /// A missing or blank key returns [`MISSING_KEY_REPLY`] without building
    /// a client.
    pub async fn respond(&self, message: &str, history: &[Turn], api_key: Option<&str>) -> DirectReply {
        let credential = match api_key.map(str::trim) {
            Some(key) if !key.is_empty() => CredentialSource::CallerSupplied(key.to_string()),
            _ => {
                return DirectReply {
                    text: MISSING_KEY_REPLY.to_string(),
                    outcome: DirectOutcome::MissingCredential,
                }
            }
        };

        let result = match self.factory.build(credential) {
            Ok(model) => {
                let messages = direct_messages(history, message);
                model.complete(&messages).await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(text) => {
                info!(history = history.len(), "direct chat answered");
                DirectReply {
                    text,
                    outcome: DirectOutcome::Answered,
                }
            }
            Err(e) => {
                let kind = failure_kind(&e);
                warn!(?kind, status = ?e.status, error = %e, "direct chat failed");
                DirectReply {
                    text: failure_reply(kind).to_string(),
                    outcome: DirectOutcome::Failed(kind),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatModel;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Factory whose models reply with a fixed result; counts builds.
    struct StubFactory {
        builds: AtomicUsize,
        result: Result<String, (Option<u16>, String)>,
        seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    impl StubFactory {
        fn replying(text: &str) -> Self {
            Self {
                builds: AtomicUsize::new(0),
                result: Ok(text.to_string()),
                seen: Arc::default(),
            }
        }

        fn failing(status: Option<u16>, message: &str) -> Self {
            Self {
                builds: AtomicUsize::new(0),
                result: Err((status, message.to_string())),
                seen: Arc::default(),
            }
        }
    }

    struct StubModel {
        result: Result<String, (Option<u16>, String)>,
        seen: Arc<Mutex<Vec<Vec<ChatMessage>>>>,
    }

    #[async_trait]
    impl ChatModel for StubModel {
        fn model_name(&self) -> &str {
            "stub"
        }
        async fn complete(&self, messages: &[ChatMessage]) -> Result<String, ModelError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            match &self.result {
                Ok(text) => Ok(text.clone()),
                Err((Some(status), body)) => Err(ModelError::from_status(*status, body)),
                Err((None, message)) => Err(ModelError::new(ModelErrorKind::Other, message.clone())),
            }
        }
    }

    impl ChatModelFactory for StubFactory {
        fn build(&self, credential: CredentialSource) -> Result<Box<dyn ChatModel>, ModelError> {
            assert!(matches!(credential, CredentialSource::CallerSupplied(_)));
            self.builds.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubModel {
                result: self.result.clone(),
                seen: self.seen.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn missing_key_builds_no_client() {
        let factory = Arc::new(StubFactory::replying("hi"));
        let chat = DirectChat::new(factory.clone());
        for key in [None, Some(""), Some("   ")] {
            let reply = chat.respond("hello", &[], key).await;
            assert_eq!(reply.text, MISSING_KEY_REPLY);
            assert_eq!(reply.outcome, DirectOutcome::MissingCredential);
        }
        assert_eq!(factory.builds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn replays_history_then_new_message() {
        let factory = Arc::new(StubFactory::replying("fine, thanks"));
        let chat = DirectChat::new(factory.clone());
        let history = vec![Turn::user("hi"), Turn::assistant("hello!")];

        let reply = chat.respond("how are you?", &history, Some("sk-test")).await;
        assert_eq!(reply.text, "fine, thanks");
        assert_eq!(reply.outcome, DirectOutcome::Answered);

        let seen = factory.seen.lock().unwrap();
        assert_eq!(
            seen[0],
            vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello!"),
                ChatMessage::user("how are you?"),
            ]
        );
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn each_call_builds_a_fresh_client() {
        let factory = Arc::new(StubFactory::replying("ok"));
        let chat = DirectChat::new(factory.clone());
        chat.respond("a", &[], Some("k1")).await;
        chat.respond("b", &[], Some("k2")).await;
        assert_eq!(factory.builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn status_401_maps_to_invalid_key() {
        let chat = DirectChat::new(Arc::new(StubFactory::failing(Some(401), "Incorrect API key")));
        let reply = chat.respond("x", &[], Some("bad")).await;
        assert_eq!(reply.text, INVALID_KEY_REPLY);
        assert_eq!(reply.outcome, DirectOutcome::Failed(ModelErrorKind::AuthInvalid));
    }

    #[tokio::test]
    async fn status_429_maps_to_rate_limited() {
        let chat = DirectChat::new(Arc::new(StubFactory::failing(Some(429), "slow down")));
        let reply = chat.respond("x", &[], Some("k")).await;
        assert_eq!(reply.text, RATE_LIMITED_REPLY);
    }

    #[tokio::test]
    async fn unstructured_errors_fall_back_to_text_matching() {
        let chat = DirectChat::new(Arc::new(StubFactory::failing(
            None,
            "Error code: 401 - invalid_api_key",
        )));
        assert_eq!(chat.respond("x", &[], Some("k")).await.text, INVALID_KEY_REPLY);

        let chat = DirectChat::new(Arc::new(StubFactory::failing(
            None,
            "You hit a RATE LIMIT on tokens",
        )));
        assert_eq!(chat.respond("x", &[], Some("k")).await.text, RATE_LIMITED_REPLY);
    }

    #[tokio::test]
    async fn other_failures_map_to_generic() {
        let chat = DirectChat::new(Arc::new(StubFactory::failing(Some(500), "boom")));
        assert_eq!(chat.respond("x", &[], Some("k")).await.text, GENERIC_FAILURE_REPLY);

        let chat = DirectChat::new(Arc::new(StubFactory::failing(None, "connection reset")));
        assert_eq!(chat.respond("x", &[], Some("k")).await.text, GENERIC_FAILURE_REPLY);
    }

    #[test]
    fn non_user_turns_replay_as_assistant() {
        let mut system_turn = Turn::assistant("note");
        system_turn.role = Role::System;
        let msgs = direct_messages(&[system_turn], "q");
        assert_eq!(msgs[0].role, Role::Assistant);
        assert_eq!(msgs[1], ChatMessage::user("q"));
    }
}
