use rusqlite::params;

use super::*;
use crate::types::{NormalizedSignal, RiskAssessment, TtrLevel, UrgencyTier};

impl TriageDb {
    // =========================================================================
    // Risk assessments (append-only)
    // =========================================================================

    /// Helper: map a row to `RiskAssessment`.
    pub(crate) fn map_assessment_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RiskAssessment> {
        let signals_json: String = row.get(8)?;
        Ok(RiskAssessment {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            overall_risk_score: row.get(2)?,
            urgency: parse_enum::<UrgencyTier>(3, row.get(3)?)?,
            time_to_risk_minutes: row.get(4)?,
            ttr_level: parse_enum::<TtrLevel>(5, row.get(5)?)?,
            condition: row.get(6)?,
            recommendation: row.get(7)?,
            signals: parse_json::<Vec<NormalizedSignal>>(8, &signals_json)?,
            rationale: row.get(9)?,
            created_at: parse_timestamp(10, row.get(10)?)?,
        })
    }

    /// Append a fusion output. Assessments are never updated or deleted.
    pub fn insert_assessment(&self, assessment: &RiskAssessment) -> Result<(), DbError> {
        let signals_json = serde_json::to_string(&assessment.signals)?;
        self.conn.execute(
            "INSERT INTO assessments (
                id, patient_id, overall_risk_score, urgency, time_to_risk_minutes,
                ttr_level, condition_label, recommendation, signals_json, rationale,
                created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                assessment.id,
                assessment.patient_id,
                assessment.overall_risk_score,
                assessment.urgency.as_str(),
                assessment.time_to_risk_minutes,
                assessment.ttr_level.as_str(),
                assessment.condition,
                assessment.recommendation,
                signals_json,
                assessment.rationale,
                assessment.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// A patient's full assessment history, oldest first.
    pub fn assessment_history(&self, patient_id: &str) -> Result<Vec<RiskAssessment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, overall_risk_score, urgency, time_to_risk_minutes,
                    ttr_level, condition_label, recommendation, signals_json, rationale,
                    created_at
             FROM assessments
             WHERE patient_id = ?1
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![patient_id], Self::map_assessment_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The most recent assessment for a patient, if any.
    pub fn latest_assessment(&self, patient_id: &str) -> Result<Option<RiskAssessment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, overall_risk_score, urgency, time_to_risk_minutes,
                    ttr_level, condition_label, recommendation, signals_json, rationale,
                    created_at
             FROM assessments
             WHERE patient_id = ?1
             ORDER BY created_at DESC
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![patient_id], Self::map_assessment_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Fetch one assessment by id. Drives the duplicate-sample replay path.
    pub fn assessment_by_id(&self, id: &str) -> Result<Option<RiskAssessment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, overall_risk_score, urgency, time_to_risk_minutes,
                    ttr_level, condition_label, recommendation, signals_json, rationale,
                    created_at
             FROM assessments
             WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_assessment_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Most recent assessments across all patients, newest first.
    pub fn recent_assessments(&self, limit: usize) -> Result<Vec<RiskAssessment>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, overall_risk_score, urgency, time_to_risk_minutes,
                    ttr_level, condition_label, recommendation, signals_json, rationale,
                    created_at
             FROM assessments
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::map_assessment_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// The last `window` fused scores for a patient, newest first, bounded to
    /// assessments at or after `since`. The bound keeps trend computation
    /// inside the current admission.
    pub fn recent_scores(
        &self,
        patient_id: &str,
        window: usize,
        since: DateTime<Utc>,
    ) -> Result<Vec<f64>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT overall_risk_score FROM assessments
             WHERE patient_id = ?1 AND created_at >= ?2
             ORDER BY created_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![patient_id, since.to_rfc3339(), window as i64],
            |row| row.get::<_, f64>(0),
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}
