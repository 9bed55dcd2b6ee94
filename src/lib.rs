//! # Astro Bot
//!
//! A local retrieval-augmented chat bot over a folder of documents.
//!
//! Documents are loaded, chunked, embedded through a locally served model
//! (Ollama), and kept in a persisted vector index. The chat loop answers
//! each question by retrieving the closest chunks and conditioning the
//! completion model on them, with a bounded conversational memory.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌─────────────┐
//! │  Loader  │──▶│ Chunk+Embed │──▶│ VectorStore │
//! │ txt/pdf… │   │  (ingest)   │   │ index.json  │
//! └──────────┘   └─────────────┘   └──────┬──────┘
//!                                         │
//!                                  ┌──────▼──────┐   ┌────────────┐
//!                                  │  Retriever  │──▶│Conversation│
//!                                  └─────────────┘   └─────┬──────┘
//!                                                          ▼
//!                                                    ┌────────────┐
//!                                                    │ Chat loop  │
//!                                                    └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! astrobot ingest ./papers      # build the index
//! astrobot search "pulsars"     # inspect retrieval
//! astrobot chat                 # talk to Astro Bot
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Core data types |
//! | [`loader`] | Folder and file loading |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`completion`] | Streaming chat completion |
//! | [`store`] | Vector index with atomic persistence |
//! | [`ingest`] | Ingestion pipeline |
//! | [`retriever`] | Query-time retrieval |
//! | [`conversation`] | Conversation state and prompt assembly |
//! | [`chat`] | Interactive chat loop |
//! | [`search`] | Retrieval inspection command |
//! | [`stats`] | Index statistics command |

pub mod chat;
pub mod chunk;
pub mod completion;
pub mod config;
pub mod conversation;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod http;
pub mod ingest;
pub mod loader;
pub mod models;
pub mod retriever;
pub mod search;
pub mod stats;
pub mod store;
