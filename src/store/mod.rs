//! Storage facade — typed operations against SQLite + sqlite-vec.
//!
//! [`Store`] is a cheap-to-clone handle over a shared connection. Every
//! operation takes explicit project (and usually subject) keys and returns
//! typed rows; query and index details never leak past this module.
//!
//! Methods are synchronous; async callers hop through
//! `tokio::task::spawn_blocking` so slow queries never pin the scheduler.

pub mod claims;
pub mod memories;
pub mod recalls;
pub mod types;

use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// Shared handle to the engram database.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open an in-memory store with schema applied.
    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self::new(crate::db::open_memory_database()?))
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| Error::Task(format!("db lock poisoned: {e}")))
    }
}

/// Current UTC timestamp in RFC 3339, the format of every timestamp column.
pub fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Run a storage closure on the blocking pool so slow queries never pin the
/// async scheduler.
pub async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Task(format!("blocking task failed: {e}")))?
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec and BLOB columns.
pub fn embedding_to_bytes(embedding: &[f32]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(
            embedding.as_ptr() as *const u8,
            embedding.len() * std::mem::size_of::<f32>(),
        )
    }
}

/// Decode a BLOB column back into an f32 vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Cosine similarity scaled to `[−100, 100]`.
///
/// Vectors are L2-normalized on ingest, so this is a plain dot product.
pub fn cosine_similarity_x100(a: &[f32], b: &[f32]) -> f64 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot as f64) * 100.0
}

/// Convert an L2 distance from sqlite-vec KNN back to cosine ×100.
///
/// For unit vectors: `L2² = 2·(1 − cos)` ⟹ `cos = 1 − L2²/2`.
pub fn l2_distance_to_similarity_x100(distance: f64) -> f64 {
    (1.0 - distance * distance / 2.0) * 100.0
}

/// L2-normalize a vector in place. A zero vector is left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}
