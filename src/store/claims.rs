//! Claim operations — atomic create with slot promotion, retraction with
//! previous-winner restoration, and the truth-state read views.
//!
//! Single-winner semantics live entirely in `slot_state`: promoting a new
//! claim never retracts the incumbent at the claim table level; the
//! truth views JOIN `slot_state` to active claims and that join is what
//! enforces one winner per slot.

use rusqlite::{params, OptionalExtension, Transaction};
use std::collections::HashMap;

use super::types::{
    AssertedValue, Claim, ClaimAssertion, ClaimEdge, ClaimStatus, EdgeType, SlotState, SlotStatus,
};
use super::{embedding_to_bytes, now, Store};
use crate::error::{Error, Result};

/// Input for [`Store::create_claim`].
#[derive(Debug, Clone, Default)]
pub struct CreateClaimInput {
    pub claim_id: String,
    pub project_id: String,
    pub subject_id: String,
    pub predicate: String,
    pub object_value: String,
    pub slot: String,
    pub claim_type: String,
    pub confidence: Option<f64>,
    pub importance: Option<f64>,
    pub tags: Option<Vec<String>>,
    pub source_memory_id: Option<String>,
    pub subject_entity: Option<String>,
    pub valid_from: Option<String>,
    pub valid_until: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Result of [`Store::retract_claim`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct RetractOutcome {
    pub success: bool,
    pub claim_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_claim_id: Option<String>,
    pub restored_previous: bool,
}

/// Claims plus edges plus an edge-type histogram.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ClaimGraph {
    pub claims: Vec<Claim>,
    pub edges: Vec<ClaimEdge>,
    pub edge_counts: HashMap<String, i64>,
}

impl Store {
    /// Atomically insert a claim, its initial assertion, the slot upsert, and
    /// (when displacing an incumbent) a `supersedes` edge.
    ///
    /// The displaced incumbent stays `active` at the claim level; only the
    /// slot winner changes. Returns the claim and the displaced incumbent id.
    pub fn create_claim(&self, input: CreateClaimInput) -> Result<(Claim, Option<String>)> {
        let ts = now();
        let claim = Claim {
            claim_id: input.claim_id,
            project_id: input.project_id,
            subject_id: input.subject_id,
            predicate: input.predicate,
            object_value: input.object_value,
            slot: input.slot,
            claim_type: input.claim_type,
            confidence: input.confidence.unwrap_or(0.9).clamp(0.0, 1.0),
            importance: input.importance.unwrap_or(0.5).clamp(0.0, 1.0),
            tags: input.tags.unwrap_or_default(),
            source_memory_id: input.source_memory_id,
            subject_entity: input.subject_entity.unwrap_or_else(|| "self".into()),
            status: ClaimStatus::Active,
            retracted_at: None,
            retract_reason: None,
            valid_from: input.valid_from,
            valid_until: input.valid_until,
            created_at: ts.clone(),
            updated_at: ts.clone(),
        };

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let incumbent: Option<String> = tx
            .query_row(
                "SELECT active_claim_id FROM slot_state \
                 WHERE project_id = ?1 AND subject_id = ?2 AND slot = ?3",
                params![claim.project_id, claim.subject_id, claim.slot],
                |row| row.get(0),
            )
            .optional()?
            .flatten();

        insert_claim_row(&tx, &claim, input.embedding.as_deref())?;

        // Initial evidence row
        let assertion_id = format!("asr_{}", uuid::Uuid::now_v7());
        tx.execute(
            "INSERT INTO claim_assertions (assertion_id, claim_id, project_id, memory_id, \
             object_type, value_string, confidence, status, first_seen_at, last_seen_at) \
             VALUES (?1, ?2, ?3, ?4, 'string', ?5, ?6, 'active', ?7, ?7)",
            params![
                assertion_id,
                claim.claim_id,
                claim.project_id,
                claim.source_memory_id,
                claim.object_value,
                claim.confidence,
                ts,
            ],
        )?;

        // Displacing an incumbent is recorded as an edge, not a retraction
        if let Some(ref old_id) = incumbent {
            if old_id != &claim.claim_id {
                tx.execute(
                    "INSERT OR IGNORE INTO claim_edges (project_id, from_claim_id, to_claim_id, \
                     edge_type, weight, reason_code, created_at) \
                     VALUES (?1, ?2, ?3, 'supersedes', 1.0, 'slot_promotion', ?4)",
                    params![claim.project_id, claim.claim_id, old_id, ts],
                )?;
            }
        }

        tx.execute(
            "INSERT INTO slot_state (project_id, subject_id, slot, active_claim_id, status, \
             replaced_by_claim_id, updated_at) VALUES (?1, ?2, ?3, ?4, 'active', NULL, ?5) \
             ON CONFLICT(project_id, subject_id, slot) DO UPDATE SET \
             active_claim_id = excluded.active_claim_id, status = 'active', \
             replaced_by_claim_id = NULL, updated_at = excluded.updated_at",
            params![claim.project_id, claim.subject_id, claim.slot, claim.claim_id, ts],
        )?;

        tx.commit()?;
        let incumbent = incumbent.filter(|id| id != &claim.claim_id);
        Ok((claim, incumbent))
    }

    /// Atomically retract a claim and restore the most recently created other
    /// active claim in the slot, if any, recording a `retracts` edge.
    ///
    /// A claim that is already retracted yields `success: false`; a missing
    /// claim is a `claim_not_found` error.
    pub fn retract_claim(
        &self,
        project_id: &str,
        claim_id: &str,
        reason: Option<&str>,
    ) -> Result<RetractOutcome> {
        let ts = now();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let row: Option<(String, String, String)> = tx
            .query_row(
                "SELECT subject_id, slot, status FROM claims \
                 WHERE project_id = ?1 AND claim_id = ?2",
                params![project_id, claim_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((subject_id, slot, status)) = row else {
            return Err(Error::not_found(
                "claim_not_found",
                format!("claim not found: {claim_id}"),
            ));
        };
        if status != "active" {
            return Ok(RetractOutcome {
                success: false,
                claim_id: claim_id.to_string(),
                slot: Some(slot),
                previous_claim_id: None,
                restored_previous: false,
            });
        }

        tx.execute(
            "UPDATE claims SET status = 'retracted', retracted_at = ?1, retract_reason = ?2, \
             updated_at = ?1 WHERE project_id = ?3 AND claim_id = ?4",
            params![ts, reason, project_id, claim_id],
        )?;

        let previous: Option<String> = tx
            .query_row(
                "SELECT claim_id FROM claims WHERE project_id = ?1 AND subject_id = ?2 \
                 AND slot = ?3 AND status = 'active' AND claim_id != ?4 \
                 ORDER BY created_at DESC LIMIT 1",
                params![project_id, subject_id, slot, claim_id],
                |row| row.get(0),
            )
            .optional()?;

        let slot_status = if previous.is_some() {
            "active"
        } else {
            "retracted"
        };
        tx.execute(
            "INSERT INTO slot_state (project_id, subject_id, slot, active_claim_id, status, \
             replaced_by_claim_id, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(project_id, subject_id, slot) DO UPDATE SET \
             active_claim_id = excluded.active_claim_id, status = excluded.status, \
             replaced_by_claim_id = excluded.replaced_by_claim_id, \
             updated_at = excluded.updated_at",
            params![project_id, subject_id, slot, previous, slot_status, claim_id, ts],
        )?;

        if let Some(ref prev_id) = previous {
            // Unique on (project, from, to, type) makes this idempotent
            tx.execute(
                "INSERT OR IGNORE INTO claim_edges (project_id, from_claim_id, to_claim_id, \
                 edge_type, weight, reason_code, reason_text, created_at) \
                 VALUES (?1, ?2, ?3, 'retracts', 1.0, 'manual_retraction', ?4, ?5)",
                params![project_id, claim_id, prev_id, reason, ts],
            )?;
        }

        tx.commit()?;
        Ok(RetractOutcome {
            success: true,
            claim_id: claim_id.to_string(),
            slot: Some(slot),
            previous_claim_id: previous.clone(),
            restored_previous: previous.is_some(),
        })
    }

    pub fn get_claim(&self, project_id: &str, claim_id: &str) -> Result<Option<Claim>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("{CLAIM_SELECT} WHERE project_id = ?1 AND claim_id = ?2"),
                params![project_id, claim_id],
                claim_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn get_claim_assertions(
        &self,
        project_id: &str,
        claim_id: &str,
    ) -> Result<Vec<ClaimAssertion>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT assertion_id, claim_id, memory_id, object_type, value_string, value_number, \
             value_date, value_json, confidence, status, first_seen_at, last_seen_at \
             FROM claim_assertions WHERE project_id = ?1 AND claim_id = ?2 \
             ORDER BY first_seen_at",
        )?;
        let rows = stmt
            .query_map(params![project_id, claim_id], assertion_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Edges touching the claim, in either direction.
    pub fn get_claim_edges(&self, project_id: &str, claim_id: &str) -> Result<Vec<ClaimEdge>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT from_claim_id, to_claim_id, edge_type, weight, reason_code, reason_text, \
             created_at FROM claim_edges WHERE project_id = ?1 \
             AND (from_claim_id = ?2 OR to_claim_id = ?2) ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![project_id, claim_id], edge_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Walk `supersedes` edges transitively in both directions from a claim.
    /// Returns claim ids ordered oldest → newest, including the start claim.
    pub fn get_supersession_chain(
        &self,
        project_id: &str,
        claim_id: &str,
    ) -> Result<Vec<String>> {
        const CHAIN_CAP: usize = 50;
        let conn = self.conn()?;

        let mut older: Vec<String> = Vec::new();
        let mut cursor = claim_id.to_string();
        while older.len() < CHAIN_CAP {
            let next: Option<String> = conn
                .query_row(
                    "SELECT to_claim_id FROM claim_edges WHERE project_id = ?1 \
                     AND from_claim_id = ?2 AND edge_type = 'supersedes' LIMIT 1",
                    params![project_id, cursor],
                    |row| row.get(0),
                )
                .optional()?;
            match next {
                Some(id) if !older.contains(&id) && id != claim_id => {
                    older.push(id.clone());
                    cursor = id;
                }
                _ => break,
            }
        }

        let mut newer: Vec<String> = Vec::new();
        let mut cursor = claim_id.to_string();
        while newer.len() < CHAIN_CAP {
            let next: Option<String> = conn
                .query_row(
                    "SELECT from_claim_id FROM claim_edges WHERE project_id = ?1 \
                     AND to_claim_id = ?2 AND edge_type = 'supersedes' LIMIT 1",
                    params![project_id, cursor],
                    |row| row.get(0),
                )
                .optional()?;
            match next {
                Some(id) if !newer.contains(&id) && id != claim_id => {
                    newer.push(id.clone());
                    cursor = id;
                }
                _ => break,
            }
        }

        let mut chain: Vec<String> = older.into_iter().rev().collect();
        chain.push(claim_id.to_string());
        chain.extend(newer);
        Ok(chain)
    }

    /// Active slots snapshot: slot → winning claim, via the slot_state JOIN.
    pub fn get_current_truth(
        &self,
        project_id: &str,
        subject_id: &str,
    ) -> Result<Vec<(String, Claim)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT ss.slot, c.claim_id, c.project_id, c.subject_id, c.predicate, \
             c.object_value, c.slot, c.claim_type, c.confidence, c.importance, c.tags, \
             c.source_memory_id, c.subject_entity, c.status, c.retracted_at, c.retract_reason, \
             c.valid_from, c.valid_until, c.created_at, c.updated_at \
             FROM slot_state ss JOIN claims c ON c.claim_id = ss.active_claim_id \
             WHERE ss.project_id = ?1 AND ss.subject_id = ?2 \
             AND ss.status = 'active' AND c.status = 'active' \
             ORDER BY ss.slot",
        )?;
        let rows = stmt
            .query_map(params![project_id, subject_id], |row| {
                let slot: String = row.get(0)?;
                let claim = claim_from_offset_row(row, 1)?;
                Ok((slot, claim))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// The winning claim for a single slot, if the slot is active.
    pub fn get_current_slot(
        &self,
        project_id: &str,
        subject_id: &str,
        slot: &str,
    ) -> Result<Option<Claim>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT c.claim_id, c.project_id, c.subject_id, c.predicate, c.object_value, \
                 c.slot, c.claim_type, c.confidence, c.importance, c.tags, c.source_memory_id, \
                 c.subject_entity, c.status, c.retracted_at, c.retract_reason, c.valid_from, \
                 c.valid_until, c.created_at, c.updated_at \
                 FROM slot_state ss JOIN claims c ON c.claim_id = ss.active_claim_id \
                 WHERE ss.project_id = ?1 AND ss.subject_id = ?2 AND ss.slot = ?3 \
                 AND ss.status = 'active' AND c.status = 'active'",
                params![project_id, subject_id, slot],
                claim_from_row,
            )
            .optional()?;
        Ok(row)
    }

    /// All slot_state rows for a subject, most recently updated first.
    pub fn get_slots(
        &self,
        project_id: &str,
        subject_id: &str,
        limit: i64,
    ) -> Result<Vec<SlotState>> {
        let limit = limit.clamp(1, 500);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT project_id, subject_id, slot, active_claim_id, status, \
             replaced_by_claim_id, updated_at FROM slot_state \
             WHERE project_id = ?1 AND subject_id = ?2 ORDER BY updated_at DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![project_id, subject_id, limit], |row| {
                let status: String = row.get(4)?;
                Ok(SlotState {
                    project_id: row.get(0)?,
                    subject_id: row.get(1)?,
                    slot: row.get(2)?,
                    active_claim_id: row.get(3)?,
                    status: status.parse().unwrap_or(SlotStatus::Active),
                    replaced_by_claim_id: row.get(5)?,
                    updated_at: row.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Subject's claims, the edges among them, and an edge-type histogram.
    pub fn get_claim_graph(
        &self,
        project_id: &str,
        subject_id: &str,
        limit: i64,
    ) -> Result<ClaimGraph> {
        let limit = limit.clamp(1, 500);
        let claims = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "{CLAIM_SELECT} WHERE project_id = ?1 AND subject_id = ?2 \
                 ORDER BY created_at DESC LIMIT ?3"
            ))?;
            let rows = stmt
                .query_map(params![project_id, subject_id, limit], claim_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        let ids: std::collections::HashSet<&str> =
            claims.iter().map(|c| c.claim_id.as_str()).collect();

        let all_edges = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT from_claim_id, to_claim_id, edge_type, weight, reason_code, \
                 reason_text, created_at FROM claim_edges WHERE project_id = ?1 \
                 ORDER BY created_at",
            )?;
            let rows = stmt
                .query_map(params![project_id], edge_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        let edges: Vec<ClaimEdge> = all_edges
            .into_iter()
            .filter(|e| {
                ids.contains(e.from_claim_id.as_str()) || ids.contains(e.to_claim_id.as_str())
            })
            .collect();

        let mut edge_counts: HashMap<String, i64> = HashMap::new();
        for edge in &edges {
            *edge_counts
                .entry(edge.edge_type.as_str().to_string())
                .or_insert(0) += 1;
        }

        Ok(ClaimGraph {
            claims,
            edges,
            edge_counts,
        })
    }

    /// Claims for a subject (optionally one slot) plus the `supersedes` edges
    /// among them, newest claims first.
    pub fn get_claim_history(
        &self,
        project_id: &str,
        subject_id: &str,
        slot: Option<&str>,
        limit: i64,
    ) -> Result<(Vec<Claim>, Vec<ClaimEdge>)> {
        let limit = limit.clamp(1, 500);
        let conn = self.conn()?;

        let claims = match slot {
            Some(slot) => {
                let mut stmt = conn.prepare(&format!(
                    "{CLAIM_SELECT} WHERE project_id = ?1 AND subject_id = ?2 AND slot = ?3 \
                     ORDER BY created_at DESC LIMIT ?4"
                ))?;
                let rows = stmt
                    .query_map(params![project_id, subject_id, slot, limit], claim_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "{CLAIM_SELECT} WHERE project_id = ?1 AND subject_id = ?2 \
                     ORDER BY created_at DESC LIMIT ?3"
                ))?;
                let rows = stmt
                    .query_map(params![project_id, subject_id, limit], claim_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                rows
            }
        };

        let ids: std::collections::HashSet<&str> =
            claims.iter().map(|c| c.claim_id.as_str()).collect();
        let mut stmt = conn.prepare(
            "SELECT from_claim_id, to_claim_id, edge_type, weight, reason_code, reason_text, \
             created_at FROM claim_edges WHERE project_id = ?1 AND edge_type = 'supersedes' \
             ORDER BY created_at",
        )?;
        let edges = stmt
            .query_map(params![project_id], edge_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|e: &ClaimEdge| {
                ids.contains(e.from_claim_id.as_str()) && ids.contains(e.to_claim_id.as_str())
            })
            .collect();

        Ok((claims, edges))
    }

    /// Assertion-centric view for a memory: claims sourced from it plus
    /// every assertion row referencing it.
    pub fn claims_for_memory(
        &self,
        project_id: &str,
        memory_id: &str,
    ) -> Result<(Vec<Claim>, Vec<ClaimAssertion>)> {
        let conn = self.conn()?;
        let claims = {
            let mut stmt = conn.prepare(&format!(
                "{CLAIM_SELECT} WHERE project_id = ?1 AND source_memory_id = ?2 \
                 ORDER BY created_at DESC"
            ))?;
            let rows = stmt
                .query_map(params![project_id, memory_id], claim_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        let assertions = {
            let mut stmt = conn.prepare(
                "SELECT assertion_id, claim_id, memory_id, object_type, value_string, \
                 value_number, value_date, value_json, confidence, status, first_seen_at, \
                 last_seen_at FROM claim_assertions \
                 WHERE project_id = ?1 AND memory_id = ?2 ORDER BY first_seen_at",
            )?;
            let rows = stmt
                .query_map(params![project_id, memory_id], assertion_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        Ok((claims, assertions))
    }
}

const CLAIM_SELECT: &str = "SELECT claim_id, project_id, subject_id, predicate, object_value, \
    slot, claim_type, confidence, importance, tags, source_memory_id, subject_entity, status, \
    retracted_at, retract_reason, valid_from, valid_until, created_at, updated_at FROM claims";

fn insert_claim_row(tx: &Transaction, claim: &Claim, embedding: Option<&[f32]>) -> Result<()> {
    let result = tx.execute(
        "INSERT INTO claims (claim_id, project_id, subject_id, predicate, object_value, slot, \
         claim_type, confidence, importance, tags, source_memory_id, subject_entity, status, \
         valid_from, valid_until, embedding, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            claim.claim_id,
            claim.project_id,
            claim.subject_id,
            claim.predicate,
            claim.object_value,
            claim.slot,
            claim.claim_type,
            claim.confidence,
            claim.importance,
            serde_json::to_string(&claim.tags)?,
            claim.source_memory_id,
            claim.subject_entity,
            claim.status.as_str(),
            claim.valid_from,
            claim.valid_until,
            embedding.filter(|e| !e.is_empty()).map(embedding_to_bytes),
            claim.created_at,
            claim.updated_at,
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::AlreadyExists(claim.claim_id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

fn claim_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Claim> {
    claim_from_offset_row(row, 0)
}

fn claim_from_offset_row(row: &rusqlite::Row<'_>, base: usize) -> rusqlite::Result<Claim> {
    let tags: String = row.get(base + 9)?;
    let status: String = row.get(base + 12)?;
    Ok(Claim {
        claim_id: row.get(base)?,
        project_id: row.get(base + 1)?,
        subject_id: row.get(base + 2)?,
        predicate: row.get(base + 3)?,
        object_value: row.get(base + 4)?,
        slot: row.get(base + 5)?,
        claim_type: row.get(base + 6)?,
        confidence: row.get(base + 7)?,
        importance: row.get(base + 8)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        source_memory_id: row.get(base + 10)?,
        subject_entity: row.get(base + 11)?,
        status: status.parse().unwrap_or(ClaimStatus::Active),
        retracted_at: row.get(base + 13)?,
        retract_reason: row.get(base + 14)?,
        valid_from: row.get(base + 15)?,
        valid_until: row.get(base + 16)?,
        created_at: row.get(base + 17)?,
        updated_at: row.get(base + 18)?,
    })
}

fn assertion_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClaimAssertion> {
    let object_type: String = row.get(3)?;
    let value = match object_type.as_str() {
        "number" => AssertedValue::Number(row.get::<_, Option<f64>>(5)?.unwrap_or(0.0)),
        "date" => AssertedValue::Date(row.get::<_, Option<String>>(6)?.unwrap_or_default()),
        "json" => AssertedValue::Json(
            row.get::<_, Option<String>>(7)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
        ),
        _ => AssertedValue::String(row.get::<_, Option<String>>(4)?.unwrap_or_default()),
    };
    Ok(ClaimAssertion {
        assertion_id: row.get(0)?,
        claim_id: row.get(1)?,
        memory_id: row.get(2)?,
        value,
        confidence: row.get(8)?,
        status: row.get(9)?,
        first_seen_at: row.get(10)?,
        last_seen_at: row.get(11)?,
    })
}

fn edge_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClaimEdge> {
    let edge_type: String = row.get(2)?;
    Ok(ClaimEdge {
        from_claim_id: row.get(0)?,
        to_claim_id: row.get(1)?,
        edge_type: edge_type.parse().unwrap_or(EdgeType::Related),
        weight: row.get(3)?,
        reason_code: row.get(4)?,
        reason_text: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> Store {
        Store::in_memory().unwrap()
    }

    fn claim_input(id: &str, predicate: &str, value: &str) -> CreateClaimInput {
        CreateClaimInput {
            claim_id: id.into(),
            project_id: "proj".into(),
            subject_id: "subj".into(),
            predicate: predicate.into(),
            object_value: value.into(),
            slot: predicate.into(),
            claim_type: "fact".into(),
            ..Default::default()
        }
    }

    #[test]
    fn create_claim_promotes_slot_winner() {
        let store = test_store();
        let (claim, displaced) = store
            .create_claim(claim_input("clm_a", "favorite_color", "yellow"))
            .unwrap();
        assert!(displaced.is_none());
        assert_eq!(claim.status, ClaimStatus::Active);

        let winner = store
            .get_current_slot("proj", "subj", "favorite_color")
            .unwrap()
            .unwrap();
        assert_eq!(winner.claim_id, "clm_a");
        assert_eq!(winner.object_value, "yellow");

        // initial assertion written
        let assertions = store.get_claim_assertions("proj", "clm_a").unwrap();
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].value, AssertedValue::String("yellow".into()));
    }

    #[test]
    fn second_claim_displaces_but_does_not_retract() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_a", "favorite_color", "yellow"))
            .unwrap();
        let (_, displaced) = store
            .create_claim(claim_input("clm_b", "favorite_color", "blue"))
            .unwrap();
        assert_eq!(displaced.as_deref(), Some("clm_a"));

        // single winner via slot_state
        let truth = store.get_current_truth("proj", "subj").unwrap();
        assert_eq!(truth.len(), 1);
        assert_eq!(truth[0].1.claim_id, "clm_b");

        // the displaced claim is still active at the claim level
        let old = store.get_claim("proj", "clm_a").unwrap().unwrap();
        assert_eq!(old.status, ClaimStatus::Active);

        // displacement recorded as a supersedes edge
        let edges = store.get_claim_edges("proj", "clm_b").unwrap();
        assert!(edges
            .iter()
            .any(|e| e.edge_type == EdgeType::Supersedes && e.to_claim_id == "clm_a"));
    }

    #[test]
    fn duplicate_claim_id_is_already_exists() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_a", "name", "Ada"))
            .unwrap();
        let err = store
            .create_claim(claim_input("clm_a", "name", "Ada"))
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists(_)));
    }

    #[test]
    fn retract_restores_previous_winner() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_a", "favorite_color", "yellow"))
            .unwrap();
        store
            .create_claim(claim_input("clm_b", "favorite_color", "blue"))
            .unwrap();

        let outcome = store
            .retract_claim("proj", "clm_b", Some("user corrected"))
            .unwrap();
        assert!(outcome.success);
        assert!(outcome.restored_previous);
        assert_eq!(outcome.previous_claim_id.as_deref(), Some("clm_a"));

        let winner = store
            .get_current_slot("proj", "subj", "favorite_color")
            .unwrap()
            .unwrap();
        assert_eq!(winner.object_value, "yellow");

        // retracts edge written
        let edges = store.get_claim_edges("proj", "clm_b").unwrap();
        assert!(edges
            .iter()
            .any(|e| e.edge_type == EdgeType::Retracts && e.to_claim_id == "clm_a"));
    }

    #[test]
    fn retract_last_claim_empties_slot() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_a", "favorite_color", "yellow"))
            .unwrap();

        let outcome = store.retract_claim("proj", "clm_a", None).unwrap();
        assert!(outcome.success);
        assert!(!outcome.restored_previous);

        assert!(store
            .get_current_slot("proj", "subj", "favorite_color")
            .unwrap()
            .is_none());

        let slots = store.get_slots("proj", "subj", 100).unwrap();
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].status, SlotStatus::Retracted);
        assert!(slots[0].active_claim_id.is_none());
        assert_eq!(slots[0].replaced_by_claim_id.as_deref(), Some("clm_a"));
    }

    #[test]
    fn double_retract_is_noop() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_a", "favorite_color", "yellow"))
            .unwrap();
        assert!(store.retract_claim("proj", "clm_a", None).unwrap().success);
        assert!(!store.retract_claim("proj", "clm_a", None).unwrap().success);
    }

    #[test]
    fn retract_missing_claim_is_not_found() {
        let store = test_store();
        let err = store.retract_claim("proj", "clm_ghost", None).unwrap_err();
        assert!(matches!(err, Error::NotFound { code, .. } if code == "claim_not_found"));
    }

    #[test]
    fn full_retraction_sequence_drains_slot() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_x", "favorite_color", "yellow"))
            .unwrap();
        store
            .create_claim(claim_input("clm_y", "favorite_color", "blue"))
            .unwrap();

        store.retract_claim("proj", "clm_y", None).unwrap();
        let outcome = store.retract_claim("proj", "clm_x", None).unwrap();
        assert!(outcome.success);
        assert!(!outcome.restored_previous);

        let slots = store.get_slots("proj", "subj", 100).unwrap();
        assert_eq!(slots[0].status, SlotStatus::Retracted);
        assert!(slots[0].active_claim_id.is_none());
    }

    #[test]
    fn supersession_chain_walks_both_directions() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_1", "favorite_color", "red"))
            .unwrap();
        store
            .create_claim(claim_input("clm_2", "favorite_color", "green"))
            .unwrap();
        store
            .create_claim(claim_input("clm_3", "favorite_color", "blue"))
            .unwrap();

        let chain = store.get_supersession_chain("proj", "clm_2").unwrap();
        assert_eq!(chain, vec!["clm_1", "clm_2", "clm_3"]);
    }

    #[test]
    fn graph_includes_histogram() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_1", "favorite_color", "red"))
            .unwrap();
        store
            .create_claim(claim_input("clm_2", "favorite_color", "green"))
            .unwrap();
        store.retract_claim("proj", "clm_2", None).unwrap();

        let graph = store.get_claim_graph("proj", "subj", 100).unwrap();
        assert_eq!(graph.claims.len(), 2);
        assert_eq!(graph.edge_counts.get("supersedes"), Some(&1));
        assert_eq!(graph.edge_counts.get("retracts"), Some(&1));
    }

    #[test]
    fn history_filters_by_slot() {
        let store = test_store();
        store
            .create_claim(claim_input("clm_1", "favorite_color", "red"))
            .unwrap();
        store
            .create_claim(claim_input("clm_2", "lives_in", "Lisbon"))
            .unwrap();

        let (claims, _) = store
            .get_claim_history("proj", "subj", Some("favorite_color"), 100)
            .unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].claim_id, "clm_1");

        let (claims, _) = store.get_claim_history("proj", "subj", None, 100).unwrap();
        assert_eq!(claims.len(), 2);
    }

    #[test]
    fn claims_for_memory_links_sources() {
        let store = test_store();
        store
            .create_claim(CreateClaimInput {
                source_memory_id: Some("mem_src".into()),
                ..claim_input("clm_1", "works_at", "Acme")
            })
            .unwrap();

        let (claims, assertions) = store.claims_for_memory("proj", "mem_src").unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(assertions.len(), 1);
        assert_eq!(assertions[0].memory_id.as_deref(), Some("mem_src"));
    }
}
