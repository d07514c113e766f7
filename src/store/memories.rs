//! Memory operations — list, fusion search, create, mutate, duplicate and
//! conflict detection, bulk supersession.
//!
//! Vector KNN goes through the `memories_vec` vec0 table (candidates ordered
//! by distance, post-filtered by project/subject/status); exact per-row
//! scoring uses the embedding BLOB stored on the row itself.

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use super::types::{Memory, MemoryKind, MemoryStatus, ScoredMemory, Visibility};
use super::{
    bytes_to_embedding, cosine_similarity_x100, embedding_to_bytes,
    l2_distance_to_similarity_x100, now, Store,
};
use crate::error::{Error, Result};

/// Tolerance for threshold comparisons after f32 round-trips through the
/// vector index. Must stay well below the 0.001 granularity of the band
/// boundaries.
const SIM_EPSILON: f64 = 1e-4;

/// KNN candidate pool for the duplicate check.
const DUP_KNN_CANDIDATES: i64 = 64;

/// KNN candidate pool for the conflict band scan.
const CONFLICT_KNN_CANDIDATES: i64 = 256;

/// Stop words dropped by the search tokenizer.
const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "does", "for", "from", "how", "i",
    "in", "is", "it", "me", "my", "of", "on", "or", "our", "personal", "preference",
    "preferences", "the", "to", "user", "users", "what", "where", "who", "why", "you", "your",
];

/// Input for [`Store::create_memory`]. Unset fields take the documented defaults.
#[derive(Debug, Clone, Default)]
pub struct CreateMemoryInput {
    pub id: String,
    pub project_id: String,
    pub subject_id: String,
    pub text: String,
    pub kind: Option<MemoryKind>,
    pub visibility: Option<Visibility>,
    pub importance: Option<i64>,
    pub confidence: Option<f64>,
    pub is_temporal: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub source_type: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Patch for [`Store::update_memory`]. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct UpdateMemoryInput {
    pub text: Option<String>,
    pub kind: Option<MemoryKind>,
    pub visibility: Option<Visibility>,
    pub importance: Option<i64>,
    pub confidence: Option<f64>,
    pub is_temporal: Option<bool>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<serde_json::Value>,
    pub source_type: Option<String>,
    /// Outer `None` leaves the vector unchanged; `Some(None)` clears it.
    pub new_embedding: Option<Option<Vec<f32>>>,
}

/// Pagination and visibility flags for [`Store::list_memories`].
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub include_deleted: bool,
    pub include_superseded: bool,
}

impl Store {
    /// List memories newest-first. Deleted and superseded rows are excluded
    /// unless the corresponding flag is set.
    pub fn list_memories(
        &self,
        project_id: &str,
        subject_id: &str,
        params_in: &ListParams,
    ) -> Result<Vec<Memory>> {
        let limit = params_in.limit.unwrap_or(25).clamp(1, 200);
        let offset = params_in.offset.unwrap_or(0).clamp(0, 1_000_000);

        let mut sql = String::from(
            "SELECT id, project_id, subject_id, text, kind, visibility, importance, confidence, \
             is_temporal, tags, metadata, embedding, status, superseded_by, is_deleted, \
             source_type, created_at, updated_at, last_reinforced_at \
             FROM memories WHERE project_id = ?1 AND subject_id = ?2",
        );
        if !params_in.include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }
        if !params_in.include_superseded {
            sql.push_str(" AND status = 'active'");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?3 OFFSET ?4");

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![project_id, subject_id, limit, offset], memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// List superseded (non-deleted) memories, newest-first.
    pub fn list_superseded(
        &self,
        project_id: &str,
        subject_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<Memory>> {
        let limit = limit.unwrap_or(25).clamp(1, 200);
        let offset = offset.unwrap_or(0).clamp(0, 1_000_000);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, subject_id, text, kind, visibility, importance, confidence, \
             is_temporal, tags, metadata, embedding, status, superseded_by, is_deleted, \
             source_type, created_at, updated_at, last_reinforced_at \
             FROM memories WHERE project_id = ?1 AND subject_id = ?2 \
             AND status = 'superseded' AND is_deleted = 0 \
             ORDER BY created_at DESC LIMIT ?3 OFFSET ?4",
        )?;
        let rows = stmt
            .query_map(params![project_id, subject_id, limit, offset], memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Fusion search over active, non-deleted memories of a subject.
    ///
    /// A row qualifies if the query is empty, the whole query is a substring,
    /// any non-stop token is a substring, or embedding similarity reaches
    /// `min_score`. Ranking fuses similarity, importance, confidence, and a
    /// lexical bonus.
    pub fn search_memories(
        &self,
        project_id: &str,
        subject_id: &str,
        q: &str,
        query_embedding: Option<&[f32]>,
        limit: i64,
        min_score: f64,
    ) -> Result<Vec<ScoredMemory>> {
        let limit = limit.clamp(1, 200) as usize;
        let q_trimmed = q.trim();
        let q_lower = q_trimmed.to_lowercase();
        let tokens = tokenize_query(q_trimmed);

        let candidates = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, project_id, subject_id, text, kind, visibility, importance, \
                 confidence, is_temporal, tags, metadata, embedding, status, superseded_by, \
                 is_deleted, source_type, created_at, updated_at, last_reinforced_at \
                 FROM memories WHERE project_id = ?1 AND subject_id = ?2 \
                 AND is_deleted = 0 AND status = 'active'",
            )?;
            let rows = stmt
                .query_map(params![project_id, subject_id], memory_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let mut scored: Vec<ScoredMemory> = Vec::new();
        for memory in candidates {
            let text_lower = memory.text.to_lowercase();
            let whole_match = !q_lower.is_empty() && text_lower.contains(&q_lower);
            let token_match = tokens.iter().any(|t| text_lower.contains(t.as_str()));

            let similarity = match (query_embedding, memory.embedding.as_deref()) {
                (Some(qe), Some(me)) if !qe.is_empty() => cosine_similarity_x100(qe, me),
                _ => 0.0,
            };

            let qualifies = q_lower.is_empty()
                || whole_match
                || token_match
                || (query_embedding.is_some_and(|e| !e.is_empty())
                    && memory.embedding.is_some()
                    && similarity + SIM_EPSILON >= min_score);
            if !qualifies {
                continue;
            }

            let lexical_bonus = if whole_match {
                20.0
            } else if token_match {
                16.0
            } else {
                0.0
            };
            let effective_score = 0.60 * similarity
                + 0.25 * memory.importance as f64
                + 0.15 * memory.confidence * 100.0
                + lexical_bonus;

            scored.push(ScoredMemory {
                memory,
                score: similarity,
                effective_score,
            });
        }

        scored.sort_by(|a, b| {
            b.effective_score
                .partial_cmp(&a.effective_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    /// Insert a new memory row (plus its vector, when present) atomically.
    ///
    /// An explicit id that already exists surfaces as [`Error::AlreadyExists`].
    pub fn create_memory(&self, input: CreateMemoryInput) -> Result<Memory> {
        let ts = now();
        let memory = Memory {
            id: input.id,
            project_id: input.project_id,
            subject_id: input.subject_id,
            text: input.text,
            kind: input.kind.unwrap_or(MemoryKind::Fact),
            visibility: input.visibility.unwrap_or(Visibility::Private),
            importance: input.importance.unwrap_or(50).clamp(0, 100),
            confidence: input.confidence.unwrap_or(0.95).clamp(0.0, 1.0),
            is_temporal: input.is_temporal.unwrap_or(false),
            tags: input.tags.unwrap_or_default(),
            metadata: input
                .metadata
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            embedding: input.embedding.filter(|e| !e.is_empty()),
            status: MemoryStatus::Active,
            superseded_by: None,
            is_deleted: false,
            source_type: input.source_type.unwrap_or_else(|| "explicit".into()),
            created_at: ts.clone(),
            updated_at: ts.clone(),
            last_reinforced_at: ts,
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        insert_memory_row(&tx, &memory)?;
        if let Some(ref embedding) = memory.embedding {
            insert_vec_row(&tx, &memory.id, embedding)?;
        }
        tx.commit()?;
        Ok(memory)
    }

    pub fn get_memory(&self, project_id: &str, id: &str) -> Result<Option<Memory>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT id, project_id, subject_id, text, kind, visibility, importance, \
                 confidence, is_temporal, tags, metadata, embedding, status, superseded_by, \
                 is_deleted, source_type, created_at, updated_at, last_reinforced_at \
                 FROM memories WHERE project_id = ?1 AND id = ?2",
                params![project_id, id],
                memory_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Apply a partial update. Returns the updated row, or `None` if absent.
    pub fn update_memory(
        &self,
        project_id: &str,
        id: &str,
        patch: UpdateMemoryInput,
    ) -> Result<Option<Memory>> {
        let Some(mut memory) = self.get_memory(project_id, id)? else {
            return Ok(None);
        };

        if let Some(text) = patch.text {
            memory.text = text;
        }
        if let Some(kind) = patch.kind {
            memory.kind = kind;
        }
        if let Some(visibility) = patch.visibility {
            memory.visibility = visibility;
        }
        if let Some(importance) = patch.importance {
            memory.importance = importance.clamp(0, 100);
        }
        if let Some(confidence) = patch.confidence {
            memory.confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(is_temporal) = patch.is_temporal {
            memory.is_temporal = is_temporal;
        }
        if let Some(tags) = patch.tags {
            memory.tags = tags;
        }
        if let Some(metadata) = patch.metadata {
            memory.metadata = metadata;
        }
        if let Some(source_type) = patch.source_type {
            memory.source_type = source_type;
        }
        let embedding_changed = patch.new_embedding.is_some();
        if let Some(new_embedding) = patch.new_embedding {
            memory.embedding = new_embedding.filter(|e| !e.is_empty());
        }
        memory.updated_at = now();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE memories SET text = ?1, kind = ?2, visibility = ?3, importance = ?4, \
             confidence = ?5, is_temporal = ?6, tags = ?7, metadata = ?8, source_type = ?9, \
             embedding = ?10, updated_at = ?11 WHERE project_id = ?12 AND id = ?13",
            params![
                memory.text,
                memory.kind.as_str(),
                memory.visibility.as_str(),
                memory.importance,
                memory.confidence,
                memory.is_temporal,
                serde_json::to_string(&memory.tags)?,
                serde_json::to_string(&memory.metadata)?,
                memory.source_type,
                memory.embedding.as_deref().map(embedding_to_bytes),
                memory.updated_at,
                project_id,
                id,
            ],
        )?;
        if embedding_changed {
            tx.execute("DELETE FROM memories_vec WHERE id = ?1", params![id])?;
            if let Some(ref embedding) = memory.embedding {
                insert_vec_row(&tx, id, embedding)?;
            }
        }
        tx.commit()?;
        Ok(Some(memory))
    }

    /// Soft delete. Returns `true` only if the row actually transitioned.
    pub fn delete_memory(&self, project_id: &str, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE memories SET is_deleted = 1, updated_at = ?1 \
             WHERE project_id = ?2 AND id = ?3 AND is_deleted = 0",
            params![now(), project_id, id],
        )?;
        Ok(changed > 0)
    }

    /// Reactivate a superseded row: `status='active'`, `superseded_by=NULL`.
    /// Only meaningful for non-deleted rows; the orchestrator gates that.
    pub fn restore_memory(&self, project_id: &str, id: &str) -> Result<Option<Memory>> {
        {
            let conn = self.conn()?;
            conn.execute(
                "UPDATE memories SET status = 'active', superseded_by = NULL, updated_at = ?1 \
                 WHERE project_id = ?2 AND id = ?3 AND is_deleted = 0",
                params![now(), project_id, id],
            )?;
        }
        self.get_memory(project_id, id)
    }

    /// Find the single most-similar active, non-deleted memory at or above
    /// `threshold` (cosine ×100), or `None`.
    pub fn find_duplicate(
        &self,
        project_id: &str,
        subject_id: &str,
        embedding: &[f32],
        threshold: f64,
    ) -> Result<Option<(Memory, f64)>> {
        let conn = self.conn()?;
        let candidates = knn_candidates(&conn, embedding, DUP_KNN_CANDIDATES)?;

        for (candidate_id, distance) in candidates {
            let similarity = l2_distance_to_similarity_x100(distance);
            // Ordered by distance — once below threshold, no later hit exists
            if similarity + SIM_EPSILON < threshold {
                break;
            }
            if let Some(memory) = eligible_candidate(&conn, project_id, subject_id, &candidate_id)?
            {
                return Ok(Some((memory, similarity)));
            }
        }
        Ok(None)
    }

    /// Active, non-deleted memories in the half-open similarity band
    /// `[min, max)` (cosine ×100), most similar first, up to `limit`.
    pub fn find_conflicting(
        &self,
        project_id: &str,
        subject_id: &str,
        embedding: &[f32],
        min_sim: f64,
        max_sim: f64,
        limit: usize,
    ) -> Result<Vec<(Memory, f64)>> {
        let conn = self.conn()?;
        let candidates = knn_candidates(&conn, embedding, CONFLICT_KNN_CANDIDATES)?;

        let mut hits = Vec::new();
        for (candidate_id, distance) in candidates {
            let similarity = l2_distance_to_similarity_x100(distance);
            if similarity + SIM_EPSILON < min_sim {
                break;
            }
            if similarity + SIM_EPSILON >= max_sim {
                continue;
            }
            if let Some(memory) = eligible_candidate(&conn, project_id, subject_id, &candidate_id)?
            {
                hits.push((memory, similarity));
                if hits.len() >= limit {
                    break;
                }
            }
        }
        Ok(hits)
    }

    /// Bulk-transition active rows to `superseded`. Returns the ids that
    /// actually transitioned.
    pub fn supersede_memories(
        &self,
        project_id: &str,
        ids: &[String],
        superseded_by: &str,
    ) -> Result<Vec<String>> {
        let ts = now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut transitioned = Vec::new();
        for id in ids {
            let changed = tx.execute(
                "UPDATE memories SET status = 'superseded', superseded_by = ?1, updated_at = ?2 \
                 WHERE project_id = ?3 AND id = ?4 AND status = 'active' AND is_deleted = 0",
                params![superseded_by, ts, project_id, id],
            )?;
            if changed > 0 {
                transitioned.push(id.clone());
            }
        }
        tx.commit()?;
        Ok(transitioned)
    }
}

/// Vector KNN: nearest neighbors ordered by L2 distance.
fn knn_candidates(
    conn: &Connection,
    embedding: &[f32],
    limit: i64,
) -> Result<Vec<(String, f64)>> {
    let mut stmt = conn.prepare(
        "SELECT id, distance FROM memories_vec WHERE embedding MATCH ?1 \
         ORDER BY distance LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![embedding_to_bytes(embedding), limit], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Hydrate a KNN candidate if it belongs to the subject and is live.
fn eligible_candidate(
    conn: &Connection,
    project_id: &str,
    subject_id: &str,
    id: &str,
) -> Result<Option<Memory>> {
    let row = conn
        .query_row(
            "SELECT id, project_id, subject_id, text, kind, visibility, importance, confidence, \
             is_temporal, tags, metadata, embedding, status, superseded_by, is_deleted, \
             source_type, created_at, updated_at, last_reinforced_at \
             FROM memories WHERE id = ?1 AND project_id = ?2 AND subject_id = ?3 \
             AND status = 'active' AND is_deleted = 0",
            params![id, project_id, subject_id],
            memory_from_row,
        )
        .optional()?;
    Ok(row)
}

fn insert_memory_row(tx: &Transaction, memory: &Memory) -> Result<()> {
    let result = tx.execute(
        "INSERT INTO memories (id, project_id, subject_id, text, kind, visibility, importance, \
         confidence, is_temporal, tags, metadata, embedding, status, superseded_by, is_deleted, \
         source_type, created_at, updated_at, last_reinforced_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
        params![
            memory.id,
            memory.project_id,
            memory.subject_id,
            memory.text,
            memory.kind.as_str(),
            memory.visibility.as_str(),
            memory.importance,
            memory.confidence,
            memory.is_temporal,
            serde_json::to_string(&memory.tags)?,
            serde_json::to_string(&memory.metadata)?,
            memory.embedding.as_deref().map(embedding_to_bytes),
            memory.status.as_str(),
            memory.superseded_by,
            memory.is_deleted,
            memory.source_type,
            memory.created_at,
            memory.updated_at,
            memory.last_reinforced_at,
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::AlreadyExists(memory.id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

fn insert_vec_row(tx: &Transaction, id: &str, embedding: &[f32]) -> Result<()> {
    tx.execute(
        "INSERT INTO memories_vec (id, embedding) VALUES (?1, ?2)",
        params![id, embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

/// Map a full memories SELECT row into a [`Memory`].
pub(crate) fn memory_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let kind: String = row.get(4)?;
    let visibility: String = row.get(5)?;
    let tags: String = row.get(9)?;
    let metadata: String = row.get(10)?;
    let embedding: Option<Vec<u8>> = row.get(11)?;
    let status: String = row.get(12)?;
    Ok(Memory {
        id: row.get(0)?,
        project_id: row.get(1)?,
        subject_id: row.get(2)?,
        text: row.get(3)?,
        kind: kind.parse().unwrap_or(MemoryKind::Fact),
        visibility: visibility.parse().unwrap_or(Visibility::Private),
        importance: row.get(6)?,
        confidence: row.get(7)?,
        is_temporal: row.get(8)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        metadata: serde_json::from_str(&metadata)
            .unwrap_or(serde_json::Value::Object(Default::default())),
        embedding: embedding.map(|b| bytes_to_embedding(&b)),
        status: status.parse().unwrap_or(MemoryStatus::Active),
        superseded_by: row.get(13)?,
        is_deleted: row.get(14)?,
        source_type: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
        last_reinforced_at: row.get(18)?,
    })
}

/// Search tokenizer: lowercase, strip non-alphanumerics, drop short and stop
/// tokens, dedupe, keep the first 10.
pub fn tokenize_query(q: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for raw in q.to_lowercase().split_whitespace() {
        let token: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if token.len() < 2 || STOP_WORDS.contains(&token.as_str()) {
            continue;
        }
        if !seen.contains(&token) {
            seen.push(token);
        }
        if seen.len() >= 10 {
            break;
        }
    }
    seen
}
