use rusqlite::params;

use super::*;
use crate::types::{Modality, ModalitySample, SamplePayload};

impl TriageDb {
    // =========================================================================
    // Modality samples
    // =========================================================================

    /// Helper: map a row to `ModalitySample`.
    pub(crate) fn map_sample_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModalitySample> {
        let payload_json: String = row.get(3)?;
        Ok(ModalitySample {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            captured_at: parse_timestamp(2, row.get(2)?)?,
            payload: parse_json::<SamplePayload>(3, &payload_json)?,
            digest: row.get(4)?,
        })
    }

    /// Append one capture event. The `(patient_id, captured_at, digest)`
    /// unique index rejects byte-identical re-submissions; callers check
    /// `find_sample_by_digest` first so a duplicate is a no-op, not an error.
    pub fn insert_sample(&self, sample: &ModalitySample) -> Result<(), DbError> {
        let payload_json = serde_json::to_string(&sample.payload)?;
        self.conn.execute(
            "INSERT INTO samples (
                id, patient_id, captured_at, modality, payload_json, digest, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                sample.id,
                sample.patient_id,
                sample.captured_at.to_rfc3339(),
                sample.payload.modality().as_str(),
                payload_json,
                sample.digest,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Look up a previously ingested sample by its duplicate-detection key.
    /// Returns `(sample_id, assessment_id)` when found.
    pub fn find_sample_by_digest(
        &self,
        patient_id: &str,
        captured_at: DateTime<Utc>,
        digest: &str,
    ) -> Result<Option<(String, Option<String>)>, DbError> {
        match self.conn.query_row(
            "SELECT id, assessment_id FROM samples
             WHERE patient_id = ?1 AND captured_at = ?2 AND digest = ?3",
            params![patient_id, captured_at.to_rfc3339(), digest],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        ) {
            Ok(pair) => Ok(Some(pair)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// Record which assessment a sample produced.
    pub fn link_sample_assessment(
        &self,
        sample_id: &str,
        assessment_id: &str,
    ) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE samples SET assessment_id = ?1 WHERE id = ?2",
            params![assessment_id, sample_id],
        )?;
        Ok(())
    }

    /// The newest sample of one modality for a patient. Fusion assembles its
    /// input from these, one per modality.
    pub fn latest_sample_for_modality(
        &self,
        patient_id: &str,
        modality: Modality,
    ) -> Result<Option<ModalitySample>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, captured_at, payload_json, digest
             FROM samples
             WHERE patient_id = ?1 AND modality = ?2
             ORDER BY captured_at DESC, created_at DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![patient_id, modality.as_str()], Self::map_sample_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Most recent samples for a patient, newest first.
    pub fn samples_for_patient(
        &self,
        patient_id: &str,
        limit: usize,
    ) -> Result<Vec<ModalitySample>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, captured_at, payload_json, digest
             FROM samples
             WHERE patient_id = ?1
             ORDER BY captured_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![patient_id, limit as i64], Self::map_sample_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
