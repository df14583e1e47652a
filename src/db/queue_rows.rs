use rusqlite::params;

use super::*;
use crate::types::{QueueEntry, TtrLevel, UrgencyTier};

impl TriageDb {
    // =========================================================================
    // Queue entry persistence
    // =========================================================================
    //
    // The in-memory queue in `queue.rs` is authoritative at runtime. These
    // rows exist so a restart rebuilds the same queue (versions included).

    /// Helper: map a row to `QueueEntry`.
    pub(crate) fn map_queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueEntry> {
        Ok(QueueEntry {
            patient_id: row.get(0)?,
            patient_name: row.get(1)?,
            risk_score: row.get(2)?,
            urgency: parse_enum::<UrgencyTier>(3, row.get(3)?)?,
            time_to_risk_minutes: row.get(4)?,
            ttr_level: parse_enum::<TtrLevel>(5, row.get(5)?)?,
            condition: row.get(6)?,
            enqueued_at: parse_timestamp(7, row.get(7)?)?,
            updated_at: parse_timestamp(8, row.get(8)?)?,
            version: row.get(9)?,
            stale: row.get::<_, i32>(10)? != 0,
        })
    }

    /// Insert or replace a patient's queue row. The caller owns version and
    /// enqueued_at semantics; this writes exactly what it is handed.
    pub fn upsert_queue_entry(&self, entry: &QueueEntry) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO queue_entries (
                patient_id, patient_name, risk_score, urgency, time_to_risk_minutes,
                ttr_level, condition_label, enqueued_at, updated_at, version, stale
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(patient_id) DO UPDATE SET
                patient_name = excluded.patient_name,
                risk_score = excluded.risk_score,
                urgency = excluded.urgency,
                time_to_risk_minutes = excluded.time_to_risk_minutes,
                ttr_level = excluded.ttr_level,
                condition_label = excluded.condition_label,
                enqueued_at = excluded.enqueued_at,
                updated_at = excluded.updated_at,
                version = excluded.version,
                stale = excluded.stale",
            params![
                entry.patient_id,
                entry.patient_name,
                entry.risk_score,
                entry.urgency.as_str(),
                entry.time_to_risk_minutes,
                entry.ttr_level.as_str(),
                entry.condition,
                entry.enqueued_at.to_rfc3339(),
                entry.updated_at.to_rfc3339(),
                entry.version,
                entry.stale as i32,
            ],
        )?;
        Ok(())
    }

    /// Drop a patient's queue row (dequeue or discharge). Returns whether a
    /// row existed.
    pub fn remove_queue_entry(&self, patient_id: &str) -> Result<bool, DbError> {
        let removed = self
            .conn
            .execute("DELETE FROM queue_entries WHERE patient_id = ?1", params![patient_id])?;
        Ok(removed > 0)
    }

    /// All persisted queue rows, unordered. Sort order is a read-time concern.
    pub fn load_queue_entries(&self) -> Result<Vec<QueueEntry>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT patient_id, patient_name, risk_score, urgency, time_to_risk_minutes,
                    ttr_level, condition_label, enqueued_at, updated_at, version, stale
             FROM queue_entries",
        )?;
        let rows = stmt.query_map([], Self::map_queue_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    fn entry(patient_id: &str, risk: f64, version: i64) -> QueueEntry {
        let now = Utc::now();
        QueueEntry {
            patient_id: patient_id.to_string(),
            patient_name: "Rosa Vance".to_string(),
            risk_score: risk,
            urgency: UrgencyTier::Medium,
            time_to_risk_minutes: 120,
            ttr_level: TtrLevel::Watch,
            condition: "Early Warning".to_string(),
            enqueued_at: now,
            updated_at: now,
            version,
            stale: false,
        }
    }

    #[test]
    fn test_upsert_replaces_existing_row() {
        let db = test_db();
        db.upsert_queue_entry(&entry("pat-1", 40.0, 1)).expect("insert");

        let mut updated = entry("pat-1", 72.5, 2);
        updated.urgency = UrgencyTier::High;
        updated.stale = true;
        db.upsert_queue_entry(&updated).expect("upsert");

        let entries = db.load_queue_entries().expect("load");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].risk_score, 72.5);
        assert_eq!(entries[0].urgency, UrgencyTier::High);
        assert_eq!(entries[0].version, 2);
        assert!(entries[0].stale);
    }

    #[test]
    fn test_remove_reports_whether_row_existed() {
        let db = test_db();
        db.upsert_queue_entry(&entry("pat-1", 40.0, 1)).expect("insert");

        assert!(db.remove_queue_entry("pat-1").expect("remove"));
        assert!(!db.remove_queue_entry("pat-1").expect("remove again"));
        assert!(db.load_queue_entries().expect("load").is_empty());
    }

    #[test]
    fn test_load_returns_every_row() {
        let db = test_db();
        db.upsert_queue_entry(&entry("pat-1", 40.0, 1)).expect("insert");
        db.upsert_queue_entry(&entry("pat-2", 88.0, 3)).expect("insert");

        let entries = db.load_queue_entries().expect("load");
        assert_eq!(entries.len(), 2);
    }
}
