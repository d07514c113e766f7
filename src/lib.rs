//! Engram — a memory-and-claim substrate for LLM applications.
//!
//! A stateless HTTP service over SQLite with vector-similarity support
//! ([sqlite-vec](https://github.com/asg017/sqlite-vec)) that persists
//! per-subject durable memories, derives structured claims (predicate/value
//! assertions), and maintains a live truth state where every semantic slot
//! has at most one active winning claim.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL) with a vec0 virtual table for KNN duplicate
//!   and conflict detection; exact scoring uses per-row embedding BLOBs
//! - **Write path**: duplicate suppression and conflict supersession by
//!   embedding similarity, soft deletion, restoration
//! - **Truth state**: atomic claim insertion with slot winner promotion;
//!   retraction with deterministic previous-winner restoration
//! - **Retrieval**: LLM-classified multi-query fusion search with
//!   truth-aware boosting and reranking, degrading to a simple lexical path
//! - **Events**: in-process topic-keyed pub/sub drained by SSE subscribers
//!
//! # Modules
//!
//! - [`config`] — TOML + environment configuration
//! - [`db`] — database initialization, schema, and migrations
//! - [`store`] — the typed storage facade
//! - [`memory`] / [`claims`] — the write orchestrators
//! - [`retrieval`] / [`extract`] — the LLM-backed pipelines and fallbacks
//! - [`http`] — REST routes and the SSE stream

pub mod claims;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod events;
pub mod extract;
pub mod http;
pub mod llm;
pub mod memory;
pub mod retrieval;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
