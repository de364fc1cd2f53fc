//! Per-session state held by the server.
//!
//! A session owns at most one loaded document (text plus index, swapped as
//! a single `Arc`), the document-chat history, the direct-chat history and
//! the last summary. Sessions never share state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Turn;
use crate::upload::LoadedDocument;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    Rag,
    Direct,
}

pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub loaded: Option<Arc<LoadedDocument>>,
    pub summary: Option<String>,
    rag_history: Vec<Turn>,
    direct_history: Vec<Turn>,
}

impl Session {
    fn new(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            loaded: None,
            summary: None,
            rag_history: Vec::new(),
            direct_history: Vec::new(),
        }
    }

    pub fn history(&self, mode: ChatMode) -> &[Turn] {
        match mode {
            ChatMode::Rag => &self.rag_history,
            ChatMode::Direct => &self.direct_history,
        }
    }

    /// Appends a user turn and the assistant's reply.
    pub fn record_exchange(&mut self, mode: ChatMode, question: &str, reply: &str) {
        let history = match mode {
            ChatMode::Rag => &mut self.rag_history,
            ChatMode::Direct => &mut self.direct_history,
        };
        history.push(Turn::user(question));
        history.push(Turn::assistant(reply));
    }

    pub fn clear_history(&mut self, mode: ChatMode) {
        match mode {
            ChatMode::Rag => self.rag_history.clear(),
            ChatMode::Direct => self.direct_history.clear(),
        }
    }

    /// True while `doc` is still the loaded document.
    pub fn is_current(&self, doc: &Arc<LoadedDocument>) -> bool {
        self.loaded.as_ref().is_some_and(|cur| Arc::ptr_eq(cur, doc))
    }

    /// Records a document-chat exchange answered from `doc`.
    ///
    /// Dropped if another upload replaced `doc` while the answer was being
    /// produced, since that upload already cleared the history.
    pub fn record_answer_for(
        &mut self,
        doc: &Arc<LoadedDocument>,
        question: &str,
        reply: &str,
    ) -> bool {
        if !self.is_current(doc) {
            return false;
        }
        self.record_exchange(ChatMode::Rag, question, reply);
        true
    }

    /// Stores a summary of `doc`, unless `doc` has since been replaced.
    pub fn store_summary_for(&mut self, doc: &Arc<LoadedDocument>, summary: &str) -> bool {
        if !self.is_current(doc) {
            return false;
        }
        self.summary = Some(summary.to_string());
        true
    }

    /// Replaces the loaded document and its index in one step.
    ///
    /// Clears the document-chat history and the last summary; direct-chat
    /// history is kept.
    pub fn install_document(&mut self, loaded: LoadedDocument) {
        self.loaded = Some(Arc::new(loaded));
        self.rag_history.clear();
        self.summary = None;
    }
}

/// All live sessions, keyed by id.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, Session::new(id));
        id
    }

    pub fn remove(&self, id: &Uuid) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` against a session, or returns `None` if it does not exist.
    ///
    /// The store lock is held for the duration of `f`, so `f` must not
    /// block or await.
    pub fn with_session<R>(&self, id: &Uuid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.get_mut(id).map(f)
    }

    /// The session's loaded document, if the session exists.
    pub fn loaded(&self, id: &Uuid) -> Option<Option<Arc<LoadedDocument>>> {
        self.with_session(id, |s| s.loaded.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::VectorIndex;
    use crate::models::Document;

    fn loaded(text: &str) -> LoadedDocument {
        LoadedDocument {
            document: Document::new("doc.txt", text),
            index: VectorIndex::new("hash", 8),
        }
    }

    #[test]
    fn create_and_remove() {
        let store = SessionStore::new();
        let id = store.create();
        assert_eq!(store.len(), 1);
        assert!(store.loaded(&id).unwrap().is_none());
        assert!(store.remove(&id));
        assert!(!store.remove(&id));
        assert!(store.loaded(&id).is_none());
    }

    #[test]
    fn upload_clears_rag_history_and_summary_only() {
        let store = SessionStore::new();
        let id = store.create();
        store.with_session(&id, |s| {
            s.install_document(loaded("first"));
            s.record_exchange(ChatMode::Rag, "q", "a");
            s.record_exchange(ChatMode::Direct, "hi", "hello");
            s.summary = Some("old summary".into());
        });

        store.with_session(&id, |s| s.install_document(loaded("second")));

        store
            .with_session(&id, |s| {
                assert!(s.history(ChatMode::Rag).is_empty());
                assert_eq!(s.history(ChatMode::Direct).len(), 2);
                assert!(s.summary.is_none());
                assert_eq!(s.loaded.as_ref().unwrap().document.text, "second");
            })
            .unwrap();
    }

    #[test]
    fn old_document_stays_valid_for_holders() {
        let store = SessionStore::new();
        let id = store.create();
        store.with_session(&id, |s| s.install_document(loaded("first")));
        let held = store.loaded(&id).unwrap().unwrap();
        store.with_session(&id, |s| s.install_document(loaded("second")));
        assert_eq!(held.document.text, "first");
    }

    #[test]
    fn late_answer_for_replaced_document_is_dropped() {
        let store = SessionStore::new();
        let id = store.create();
        store.with_session(&id, |s| s.install_document(loaded("first")));
        let asked_against = store.loaded(&id).unwrap().unwrap();

        // A second upload lands while the first answer is in flight.
        store.with_session(&id, |s| s.install_document(loaded("second")));

        store
            .with_session(&id, |s| {
                assert!(!s.record_answer_for(&asked_against, "q", "stale"));
                assert!(!s.store_summary_for(&asked_against, "stale summary"));
                assert!(s.history(ChatMode::Rag).is_empty());
                assert!(s.summary.is_none());
            })
            .unwrap();

        let current = store.loaded(&id).unwrap().unwrap();
        store
            .with_session(&id, |s| {
                assert!(s.record_answer_for(&current, "q", "fresh"));
                assert!(s.store_summary_for(&current, "fresh summary"));
                assert_eq!(s.history(ChatMode::Rag).len(), 2);
                assert_eq!(s.summary.as_deref(), Some("fresh summary"));
            })
            .unwrap();
    }

    #[test]
    fn history_is_ordered_and_clearable() {
        let store = SessionStore::new();
        let id = store.create();
        store.with_session(&id, |s| {
            s.record_exchange(ChatMode::Direct, "one", "1");
            s.record_exchange(ChatMode::Direct, "two", "2");
        });
        let contents: Vec<String> = store
            .with_session(&id, |s| {
                s.history(ChatMode::Direct)
                    .iter()
                    .map(|t| t.content.clone())
                    .collect()
            })
            .unwrap();
        assert_eq!(contents, vec!["one", "1", "two", "2"]);

        store.with_session(&id, |s| s.clear_history(ChatMode::Direct));
        assert!(store
            .with_session(&id, |s| s.history(ChatMode::Direct).is_empty())
            .unwrap());
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new();
        let a = store.create();
        let b = store.create();
        store.with_session(&a, |s| s.install_document(loaded("a")));
        assert!(store.loaded(&b).unwrap().is_none());
    }
}
