use rusqlite::params;

use super::*;
use crate::types::{ComorbidityProfile, PatientRecord};

impl TriageDb {
    // =========================================================================
    // Patients
    // =========================================================================

    /// Helper: map a row to `PatientRecord`.
    pub(crate) fn map_patient_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PatientRecord> {
        Ok(PatientRecord {
            id: row.get(0)?,
            display_name: row.get(1)?,
            comorbidities: ComorbidityProfile {
                renal_disease: row.get::<_, i32>(2)? != 0,
                diabetes: row.get::<_, i32>(3)? != 0,
                cardiac_disease: row.get::<_, i32>(4)? != 0,
                immunocompromised: row.get::<_, i32>(5)? != 0,
            },
            admitted_at: parse_timestamp(6, row.get(6)?)?,
            discharged_at: parse_timestamp_opt(7, row.get(7)?)?,
        })
    }

    /// Insert or update a patient record.
    pub fn upsert_patient(&self, patient: &PatientRecord) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO patients (
                id, display_name, renal_disease, diabetes, cardiac_disease,
                immunocompromised, admitted_at, discharged_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                renal_disease = excluded.renal_disease,
                diabetes = excluded.diabetes,
                cardiac_disease = excluded.cardiac_disease,
                immunocompromised = excluded.immunocompromised,
                admitted_at = excluded.admitted_at,
                discharged_at = excluded.discharged_at",
            params![
                patient.id,
                patient.display_name,
                patient.comorbidities.renal_disease as i32,
                patient.comorbidities.diabetes as i32,
                patient.comorbidities.cardiac_disease as i32,
                patient.comorbidities.immunocompromised as i32,
                patient.admitted_at.to_rfc3339(),
                patient.discharged_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Get a patient by ID, discharged or not.
    pub fn get_patient(&self, id: &str) -> Result<Option<PatientRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, renal_disease, diabetes, cardiac_disease,
                    immunocompromised, admitted_at, discharged_at
             FROM patients WHERE id = ?1",
        )?;
        let mut rows = stmt.query_map(params![id], Self::map_patient_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// All patients currently under monitoring, ordered by admission time.
    pub fn active_patients(&self) -> Result<Vec<PatientRecord>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, renal_disease, diabetes, cardiac_disease,
                    immunocompromised, admitted_at, discharged_at
             FROM patients
             WHERE discharged_at IS NULL
             ORDER BY admitted_at",
        )?;
        let rows = stmt.query_map([], Self::map_patient_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Set the discharge timestamp. Returns false when the patient does not
    /// exist or is already discharged.
    pub fn mark_discharged(&self, id: &str, at: DateTime<Utc>) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "UPDATE patients SET discharged_at = ?1
             WHERE id = ?2 AND discharged_at IS NULL",
            params![at.to_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }

    /// Clear the discharge marker and reset the admission time.
    /// Used when a discharged patient is re-admitted.
    pub fn mark_readmitted(&self, id: &str, at: DateTime<Utc>) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "UPDATE patients SET admitted_at = ?1, discharged_at = NULL
             WHERE id = ?2 AND discharged_at IS NOT NULL",
            params![at.to_rfc3339(), id],
        )?;
        Ok(updated > 0)
    }
}
