//! # Paper Harness
//!
//! Ingest a folder of PDF papers into a local knowledge base and ask
//! questions against it, with the bracket citations of every retrieved
//! passage attached.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────┐   ┌──────────────────┐
//! │  PDFs     │──▶│  Ingest          │──▶│  per-document    │
//! │ (folder)  │   │ metadata + refs  │   │  artifacts       │
//! └─────┬─────┘   │ + images         │   └──────────────────┘
//!       │         └──────────────────┘
//!       │         ┌──────────────────┐   ┌──────────────────┐
//!       └────────▶│  Chunk + Embed   │──▶│  SQLite index    │
//!                 └──────────────────┘   └────────┬─────────┘
//!                                                 ▼
//!                 ┌──────────────────────────────────────────┐
//!                 │ stepback → retrieve → cite → answer      │
//!                 │ (session memory, streaming)              │
//!                 └──────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pharness ingest --rename          # per-document metadata, references, images
//! pharness index                    # build the "combined" vector index
//! pharness ask "What optimizer did they use?" --show-context
//! pharness chat --stream char       # multi-turn conversation
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`hashing`] | Canonical JSON and content-addressed ids |
//! | [`metadata`] | PDF info dictionary and filesystem metadata |
//! | [`extract`] | Page text and embedded images |
//! | [`references`] | Reference section location, segmentation, remote lookup |
//! | [`retry`] | Bounded retry policy for remote calls |
//! | [`ingest`] | Per-document pipeline and batch driver |
//! | [`chunk`] | Text normalization and overlapping chunks |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Persisted vector index |
//! | [`citations`] | Bracket citation parsing |
//! | [`retrieve`] | Top-k passage retrieval |
//! | [`reformulate`] | Stepback questions |
//! | [`memory`] | Per-session conversation memory |
//! | [`llm`] | Language-model provider abstraction |
//! | [`answer`] | Query state machine, prompting, streaming |

pub mod answer;
pub mod chat;
pub mod chunk;
pub mod citations;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod hashing;
pub mod index;
pub mod index_cmd;
pub mod ingest;
pub mod llm;
pub mod memory;
pub mod metadata;
pub mod models;
pub mod progress;
pub mod references;
pub mod reformulate;
pub mod retrieve;
pub mod retry;
