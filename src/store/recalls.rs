//! Recall audit trail — one row per memory surfaced to a chat.

use rusqlite::params;

use super::types::{RecallEvent, RecallStats};
use super::{now, Store};
use crate::error::Result;

/// Input for [`Store::record_recall`].
#[derive(Debug, Clone)]
pub struct NewRecallEvent {
    pub project_id: String,
    pub memory_id: String,
    pub subject_id: String,
    pub chat_id: String,
    pub message_index: i64,
    pub similarity: f64,
    pub request_type: String,
    pub model_id: Option<String>,
}

impl Store {
    pub fn record_recall(&self, event: &NewRecallEvent) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO memory_recall_events (project_id, memory_id, subject_id, chat_id, \
             message_index, similarity, request_type, model_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.project_id,
                event.memory_id,
                event.subject_id,
                event.chat_id,
                event.message_index,
                event.similarity,
                event.request_type,
                event.model_id,
                now(),
            ],
        )?;
        Ok(())
    }

    /// All recalls for a chat, oldest first.
    pub fn recalls_by_chat(&self, project_id: &str, chat_id: &str) -> Result<Vec<RecallEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, memory_id, subject_id, chat_id, message_index, similarity, \
             request_type, model_id, created_at FROM memory_recall_events \
             WHERE project_id = ?1 AND chat_id = ?2 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map(params![project_id, chat_id], recall_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Recalls of one memory, newest first, limit clamped to 1000.
    pub fn recalls_by_memory(
        &self,
        project_id: &str,
        memory_id: &str,
        limit: i64,
    ) -> Result<Vec<RecallEvent>> {
        let limit = limit.clamp(1, 1000);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, memory_id, subject_id, chat_id, message_index, similarity, \
             request_type, model_id, created_at FROM memory_recall_events \
             WHERE project_id = ?1 AND memory_id = ?2 \
             ORDER BY created_at DESC, id DESC LIMIT ?3",
        )?;
        let rows = stmt
            .query_map(params![project_id, memory_id, limit], recall_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Aggregate statistics over a project's recall trail.
    pub fn recall_stats(&self, project_id: &str) -> Result<RecallStats> {
        let conn = self.conn()?;
        let stats = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT chat_id), COUNT(DISTINCT subject_id), \
             COALESCE(AVG(similarity), 0.0), MIN(created_at), MAX(created_at) \
             FROM memory_recall_events WHERE project_id = ?1",
            params![project_id],
            |row| {
                Ok(RecallStats {
                    count: row.get(0)?,
                    distinct_chats: row.get(1)?,
                    distinct_subjects: row.get(2)?,
                    avg_similarity: row.get(3)?,
                    first_at: row.get(4)?,
                    last_at: row.get(5)?,
                })
            },
        )?;
        Ok(stats)
    }
}

fn recall_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecallEvent> {
    Ok(RecallEvent {
        id: row.get(0)?,
        memory_id: row.get(1)?,
        subject_id: row.get(2)?,
        chat_id: row.get(3)?,
        message_index: row.get(4)?,
        similarity: row.get(5)?,
        request_type: row.get(6)?,
        model_id: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(memory: &str, chat: &str, index: i64, similarity: f64) -> NewRecallEvent {
        NewRecallEvent {
            project_id: "proj".into(),
            memory_id: memory.into(),
            subject_id: "subj".into(),
            chat_id: chat.into(),
            message_index: index,
            similarity,
            request_type: "direct".into(),
            model_id: Some("gpt-4o".into()),
        }
    }

    #[test]
    fn recalls_by_chat_ascending() {
        let store = Store::in_memory().unwrap();
        store.record_recall(&event("mem_1", "chat_1", 0, 90.0)).unwrap();
        store.record_recall(&event("mem_2", "chat_1", 1, 80.0)).unwrap();
        store.record_recall(&event("mem_3", "chat_2", 0, 70.0)).unwrap();

        let rows = store.recalls_by_chat("proj", "chat_1").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].memory_id, "mem_1");
        assert_eq!(rows[1].memory_id, "mem_2");
    }

    #[test]
    fn recalls_by_memory_descending_with_clamp() {
        let store = Store::in_memory().unwrap();
        for i in 0..3 {
            store.record_recall(&event("mem_1", "chat_1", i, 50.0)).unwrap();
        }
        let rows = store.recalls_by_memory("proj", "mem_1", 10_000).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].message_index, 2);
    }

    #[test]
    fn stats_aggregate() {
        let store = Store::in_memory().unwrap();
        store.record_recall(&event("mem_1", "chat_1", 0, 80.0)).unwrap();
        store.record_recall(&event("mem_2", "chat_2", 0, 60.0)).unwrap();

        let stats = store.recall_stats("proj").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.distinct_chats, 2);
        assert_eq!(stats.distinct_subjects, 1);
        assert!((stats.avg_similarity - 70.0).abs() < 1e-9);
        assert!(stats.first_at.is_some());
    }

    #[test]
    fn stats_on_empty_trail() {
        let store = Store::in_memory().unwrap();
        let stats = store.recall_stats("proj").unwrap();
        assert_eq!(stats.count, 0);
        assert!(stats.first_at.is_none());
    }
}
