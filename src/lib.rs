//! # Doc Chat
//!
//! Ask questions about an uploaded document, or chat with a model directly.
//!
//! An uploaded PDF, DOCX or plain-text file is extracted, split into
//! overlapping chunks and embedded into an in-memory vector index. Questions
//! are answered from the most similar chunks only. A second mode talks to
//! the language model with an API key supplied by the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌─────────────┐
//! │  Upload  │──▶│ Extract  │──▶│  Chunk   │──▶│ VectorIndex │
//! │ pdf/docx │   │   text   │   │ 800/100  │   │  (embed)    │
//! └──────────┘   └──────────┘   └──────────┘   └──────┬──────┘
//!                                                     │ top 3
//!                      ┌──────────────────────────────┤
//!                      ▼                              ▼
//!                ┌───────────┐                 ┌────────────┐
//!                │ Summarize │                 │  Grounded  │
//!                │ first 6k  │                 │   answer   │
//!                └───────────┘                 └────────────┘
//!
//!                ┌───────────────────────────────────────────┐
//!                │ Direct chat (caller key, no document)     │
//!                └───────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat extract report.pdf
//! docchat ask report.pdf "What was revenue in Q3?"
//! docchat chat "hello" --api-key sk-...
//! docchat serve --config ./config/docchat.toml
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / DOCX / TXT text extraction |
//! | [`chunk`] | Overlapping text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory vector index |
//! | [`retrieve`] | Top-k retrieval |
//! | [`llm`] | Chat model abstraction and OpenAI client |
//! | [`respond`] | Grounded answers |
//! | [`summarize`] | Document summaries |
//! | [`direct_chat`] | Chat with a caller-supplied key |
//! | [`credential`] | Where API keys come from |
//! | [`upload`] | Upload pipeline |
//! | [`session`] | Per-session state |
//! | [`error`] | User-facing error taxonomy |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod config;
pub mod credential;
pub mod direct_chat;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod llm;
pub mod models;
pub mod respond;
pub mod retrieve;
pub mod server;
pub mod session;
pub mod summarize;
pub mod upload;
