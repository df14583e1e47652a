//! Service command layer: patient administration, sample ingest, queue
//! reads, sample and assessment history, and the alert backlog.
//!
//! Commands take shared [`EngineState`] and return domain types or
//! [`EngineError`]; transports serialize [`EngineFault`] from the error.
//! Administrative commands hold the same per-patient lock as ingest, so an
//! admission change never interleaves with a sample mid-assessment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::pipeline::{self, IngestOutcome};
use crate::state::{self, EngineState};
use crate::types::{
    AlertEvent, ComorbidityProfile, EngineConfig, ModalitySample, PatientRecord, QueueEntry,
    RiskAssessment, SamplePayload,
};
use crate::{queue, ttr};

// =============================================================================
// Request and view types
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmitPatientRequest {
    /// Caller-assigned identifier; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub comorbidities: ComorbidityProfile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePatientRequest {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub comorbidities: Option<ComorbidityProfile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitSampleRequest {
    pub patient_id: String,
    pub captured_at: DateTime<Utc>,
    pub payload: SamplePayload,
}

/// Queue row decorated for display: the entry plus formatted horizon and
/// wait-time strings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRowView {
    #[serde(flatten)]
    pub entry: QueueEntry,
    pub ttr_label: String,
    pub waiting: String,
}

/// One patient's monitoring picture in a single read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDetail {
    pub patient: PatientRecord,
    pub latest_assessment: Option<RiskAssessment>,
    pub queue_row: Option<QueueRowView>,
}

fn decorate(entry: QueueEntry, now: DateTime<Utc>) -> QueueRowView {
    QueueRowView {
        ttr_label: ttr::format_duration(entry.time_to_risk_minutes),
        waiting: queue::format_wait(entry.enqueued_at, now),
        entry,
    }
}

// =============================================================================
// Patient administration
// =============================================================================

/// Admit a patient into monitoring.
///
/// A discharged patient re-admits under the same identifier with a fresh
/// admission time, so trend and queue position start over. Admitting an
/// already-active patient returns the existing record unchanged; field
/// changes go through [`update_patient`].
pub async fn admit_patient(
    state: &EngineState,
    req: AdmitPatientRequest,
) -> Result<PatientRecord, EngineError> {
    let id = req.id.unwrap_or_else(|| format!("pat-{}", uuid::Uuid::new_v4()));
    let ordering = state.patient_lock(&id);
    let _guard = ordering.lock().await;

    let db = state.db.lock();
    match db.get_patient(&id)? {
        Some(existing) if existing.is_active() => {
            log::warn!("Api: admit for already-active patient {id}, returning existing record");
            Ok(existing)
        }
        Some(mut existing) => {
            let now = Utc::now();
            db.mark_readmitted(&id, now)?;
            existing.admitted_at = now;
            existing.discharged_at = None;
            log::info!("Api: re-admitted patient {id}");
            Ok(existing)
        }
        None => {
            let patient = PatientRecord {
                id: id.clone(),
                display_name: req.display_name,
                comorbidities: req.comorbidities,
                admitted_at: Utc::now(),
                discharged_at: None,
            };
            db.upsert_patient(&patient)?;
            log::info!("Api: admitted patient {id}");
            Ok(patient)
        }
    }
}

/// Administrative update of a patient's display name or comorbidity flags.
///
/// Comorbidity changes apply to future assessments only; nothing recomputes
/// retroactively. A display-name change writes through to the live queue row.
pub async fn update_patient(
    state: &EngineState,
    req: UpdatePatientRequest,
) -> Result<PatientRecord, EngineError> {
    let ordering = state.patient_lock(&req.id);
    let _guard = ordering.lock().await;

    let db = state.db.lock();
    let mut patient = db
        .get_patient(&req.id)?
        .ok_or_else(|| EngineError::UnknownPatient(req.id.clone()))?;

    if let Some(name) = req.display_name {
        patient.display_name = name;
    }
    if let Some(profile) = req.comorbidities {
        patient.comorbidities = profile;
    }
    db.upsert_patient(&patient)?;

    if let Some(entry) = state.queue.rename(&patient.id, &patient.display_name) {
        db.upsert_queue_entry(&entry)?;
    }

    log::info!("Api: updated patient {}", patient.id);
    Ok(patient)
}

/// Discharge a patient: the queue entry is removed and later samples reject
/// with an unknown-patient error. History stays readable for auditing.
pub async fn discharge_patient(
    state: &EngineState,
    patient_id: &str,
) -> Result<PatientRecord, EngineError> {
    let ordering = state.patient_lock(patient_id);
    let _guard = ordering.lock().await;

    let db = state.db.lock();
    let mut patient = db
        .get_patient(patient_id)?
        .ok_or_else(|| EngineError::UnknownPatient(patient_id.to_string()))?;
    if !patient.is_active() {
        log::warn!("Api: discharge for already-discharged patient {patient_id}");
        return Ok(patient);
    }

    let now = Utc::now();
    db.mark_discharged(patient_id, now)?;
    db.remove_queue_entry(patient_id)?;
    state.queue.dequeue(patient_id);
    patient.discharged_at = Some(now);

    log::info!("Api: discharged patient {patient_id}");
    Ok(patient)
}

/// All patients currently under monitoring.
pub fn monitored_patients(state: &EngineState) -> Result<Vec<PatientRecord>, EngineError> {
    Ok(state.db.lock().active_patients()?)
}

/// One patient's record, latest assessment, and live queue row.
pub fn patient_detail(state: &EngineState, patient_id: &str) -> Result<PatientDetail, EngineError> {
    let db = state.db.lock();
    let patient = db
        .get_patient(patient_id)?
        .ok_or_else(|| EngineError::UnknownPatient(patient_id.to_string()))?;
    let latest_assessment = db.latest_assessment(patient_id)?;
    drop(db);

    let queue_row = state.queue.get(patient_id).map(|entry| decorate(entry, Utc::now()));
    Ok(PatientDetail { patient, latest_assessment, queue_row })
}

// =============================================================================
// Ingest
// =============================================================================

/// Submit one modality sample for assessment.
pub async fn submit_sample(
    state: &EngineState,
    req: SubmitSampleRequest,
) -> Result<IngestOutcome, EngineError> {
    pipeline::ingest(state, &req.patient_id, req.payload, req.captured_at).await
}

// =============================================================================
// Queue reads
// =============================================================================

/// Risk-ranked queue: soonest predicted deterioration first.
pub fn queue_by_risk(state: &EngineState) -> Vec<QueueRowView> {
    let now = Utc::now();
    state.queue.ai_view().into_iter().map(|entry| decorate(entry, now)).collect()
}

/// Arrival-order queue: first admitted, first listed. Risk data never moves
/// a row in this view.
pub fn queue_by_arrival(state: &EngineState) -> Vec<QueueRowView> {
    let now = Utc::now();
    state.queue.fifo_view().into_iter().map(|entry| decorate(entry, now)).collect()
}

// =============================================================================
// History and alerts
// =============================================================================

/// Full assessment history for one patient, oldest first. Works for
/// discharged patients; only a never-admitted identifier rejects.
pub fn assessment_history(
    state: &EngineState,
    patient_id: &str,
) -> Result<Vec<RiskAssessment>, EngineError> {
    let db = state.db.lock();
    if db.get_patient(patient_id)?.is_none() {
        return Err(EngineError::UnknownPatient(patient_id.to_string()));
    }
    Ok(db.assessment_history(patient_id)?)
}

/// Capture history for one patient, newest first. Same admission rules as
/// [`assessment_history`].
pub fn sample_history(
    state: &EngineState,
    patient_id: &str,
    limit: usize,
) -> Result<Vec<ModalitySample>, EngineError> {
    let db = state.db.lock();
    if db.get_patient(patient_id)?.is_none() {
        return Err(EngineError::UnknownPatient(patient_id.to_string()));
    }
    Ok(db.samples_for_patient(patient_id, limit)?)
}

/// Cross-patient feed of the newest assessments.
pub fn recent_assessments(
    state: &EngineState,
    limit: usize,
) -> Result<Vec<RiskAssessment>, EngineError> {
    Ok(state.db.lock().recent_assessments(limit)?)
}

/// The newest emitted alerts, delivered or not.
pub fn recent_alerts(state: &EngineState, limit: usize) -> Result<Vec<AlertEvent>, EngineError> {
    Ok(state.db.lock().recent_alerts(limit)?)
}

// =============================================================================
// Configuration
// =============================================================================

/// Snapshot of the current engine configuration.
pub fn engine_config(state: &EngineState) -> EngineConfig {
    state.config_snapshot()
}

/// Replace the engine configuration, persisting it to disk. The new values
/// apply to subsequent assessments; nothing recomputes retroactively.
pub fn apply_engine_config(
    state: &EngineState,
    new: EngineConfig,
) -> Result<EngineConfig, EngineError> {
    new.validate()?;
    state::update_config(state, |config| *config = new)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_utils::test_state;
    use crate::types::{UrgencyTier, VitalsQuality, VitalsReading};

    fn admit_req(id: &str, renal: bool) -> AdmitPatientRequest {
        AdmitPatientRequest {
            id: Some(id.to_string()),
            display_name: "Rosa Vance".to_string(),
            comorbidities: ComorbidityProfile { renal_disease: renal, ..Default::default() },
        }
    }

    fn vitals_req(patient_id: &str, heart_rate: f64, spo2: f64) -> SubmitSampleRequest {
        SubmitSampleRequest {
            patient_id: patient_id.to_string(),
            captured_at: Utc::now(),
            payload: SamplePayload::Vitals {
                reading: VitalsReading {
                    heart_rate,
                    spo2,
                    systolic: 118.0,
                    diastolic: 76.0,
                    temperature: 36.8,
                    pain: None,
                    fatigue: None,
                },
                quality: VitalsQuality::Ok,
            },
        }
    }

    #[tokio::test]
    async fn test_admit_then_detail() {
        let (state, _rx) = test_state();
        let patient = admit_patient(&state, admit_req("pat-1", true)).await.expect("admit");
        assert_eq!(patient.id, "pat-1");
        assert!(patient.is_active());

        let detail = patient_detail(&state, "pat-1").expect("detail");
        assert!(detail.latest_assessment.is_none());
        assert!(detail.queue_row.is_none());
        assert_eq!(monitored_patients(&state).expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_admit_generates_an_id_when_absent() {
        let (state, _rx) = test_state();
        let req = AdmitPatientRequest {
            id: None,
            display_name: "Ramesh Kumar".to_string(),
            comorbidities: ComorbidityProfile::default(),
        };
        let patient = admit_patient(&state, req).await.expect("admit");
        assert!(patient.id.starts_with("pat-"));
    }

    #[tokio::test]
    async fn test_double_admit_returns_existing_record() {
        let (state, _rx) = test_state();
        admit_patient(&state, admit_req("pat-1", true)).await.expect("admit");

        let mut second = admit_req("pat-1", false);
        second.display_name = "Someone Else".to_string();
        let patient = admit_patient(&state, second).await.expect("second admit");
        assert_eq!(patient.display_name, "Rosa Vance");
        assert!(patient.comorbidities.renal_disease);
    }

    #[tokio::test]
    async fn test_discharge_removes_entry_and_blocks_samples() {
        let (state, _rx) = test_state();
        admit_patient(&state, admit_req("pat-1", false)).await.expect("admit");
        submit_sample(&state, vitals_req("pat-1", 110.0, 92.0)).await.expect("sample");
        assert_eq!(state.queue.len(), 1);

        let patient = discharge_patient(&state, "pat-1").await.expect("discharge");
        assert!(!patient.is_active());
        assert!(state.queue.is_empty());
        assert!(state.db.lock().load_queue_entries().expect("rows").is_empty());

        let err = submit_sample(&state, vitals_req("pat-1", 110.0, 92.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownPatient(_)));

        // History survives discharge
        assert_eq!(assessment_history(&state, "pat-1").expect("history").len(), 1);
    }

    #[tokio::test]
    async fn test_readmission_starts_trend_and_queue_over() {
        let (state, _rx) = test_state();
        admit_patient(&state, admit_req("pat-1", false)).await.expect("admit");
        submit_sample(&state, vitals_req("pat-1", 72.0, 98.0)).await.expect("sample");
        discharge_patient(&state, "pat-1").await.expect("discharge");

        let readmitted = admit_patient(&state, admit_req("pat-1", false)).await.expect("readmit");
        assert!(readmitted.is_active());
        assert!(state.queue.is_empty(), "re-admission enqueues on first assessment");

        // The prior admission's score 0 sits outside the new admission, so
        // this high reading shows no deteriorating trend: base band applies.
        let outcome =
            submit_sample(&state, vitals_req("pat-1", 110.0, 92.0)).await.expect("sample");
        let assessment = outcome.assessment().expect("assessed");
        assert_eq!(assessment.overall_risk_score, 50.0);
        assert_eq!(assessment.time_to_risk_minutes, 120);
        assert!(!assessment.rationale.contains("trend"));
    }

    #[tokio::test]
    async fn test_update_patient_changes_future_assessments_only() {
        let (state, _rx) = test_state();
        admit_patient(&state, admit_req("pat-1", false)).await.expect("admit");
        let first = submit_sample(&state, vitals_req("pat-1", 110.0, 92.0))
            .await
            .expect("sample")
            .assessment()
            .expect("assessed")
            .clone();
        assert_eq!(first.urgency, UrgencyTier::Medium);

        let req = UpdatePatientRequest {
            id: "pat-1".to_string(),
            display_name: Some("Rosa Vance-Holt".to_string()),
            comorbidities: Some(ComorbidityProfile {
                renal_disease: true,
                ..Default::default()
            }),
        };
        update_patient(&state, req).await.expect("update");

        // Name writes through to the live queue row immediately
        assert_eq!(state.queue.get("pat-1").expect("entry").patient_name, "Rosa Vance-Holt");

        // The stored assessment is untouched; the next one escalates
        let history = assessment_history(&state, "pat-1").expect("history");
        assert_eq!(history[0].urgency, UrgencyTier::Medium);

        let second = submit_sample(&state, vitals_req("pat-1", 111.0, 92.0))
            .await
            .expect("sample")
            .assessment()
            .expect("assessed")
            .clone();
        assert_eq!(second.urgency, UrgencyTier::High);
        assert!(second.rationale.contains("renal disease"));
    }

    #[tokio::test]
    async fn test_update_unknown_patient_rejects() {
        let (state, _rx) = test_state();
        let req = UpdatePatientRequest {
            id: "pat-404".to_string(),
            display_name: None,
            comorbidities: None,
        };
        let err = update_patient(&state, req).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownPatient(_)));
    }

    #[tokio::test]
    async fn test_queue_views_carry_display_labels() {
        let (state, _rx) = test_state();
        admit_patient(&state, admit_req("pat-a", false)).await.expect("admit a");
        admit_patient(&state, admit_req("pat-b", false)).await.expect("admit b");
        submit_sample(&state, vitals_req("pat-a", 72.0, 98.0)).await.expect("a sample");
        submit_sample(&state, vitals_req("pat-b", 110.0, 92.0)).await.expect("b sample");

        let ranked = queue_by_risk(&state);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].entry.patient_id, "pat-b", "shorter horizon first");
        assert_eq!(ranked[0].ttr_label, "2 hours");
        assert_eq!(ranked[0].waiting, "Just now");
        assert_eq!(ranked[1].ttr_label, "8 hours");

        let arrival = queue_by_arrival(&state);
        assert_eq!(arrival[0].entry.patient_id, "pat-a", "first admitted first");
    }

    #[tokio::test]
    async fn test_history_rejects_never_admitted() {
        let (state, _rx) = test_state();
        let err = assessment_history(&state, "pat-404").unwrap_err();
        assert!(matches!(err, EngineError::UnknownPatient(_)));
    }

    #[tokio::test]
    async fn test_sample_history_lists_captures_newest_first() {
        let (state, _rx) = test_state();
        admit_patient(&state, admit_req("pat-1", false)).await.expect("admit");

        let mut earlier = vitals_req("pat-1", 72.0, 98.0);
        earlier.captured_at = Utc::now() - chrono::Duration::minutes(5);
        submit_sample(&state, earlier).await.expect("first sample");
        submit_sample(&state, vitals_req("pat-1", 110.0, 92.0)).await.expect("second sample");

        let samples = sample_history(&state, "pat-1", 10).expect("history");
        assert_eq!(samples.len(), 2);
        assert!(samples[0].captured_at > samples[1].captured_at);

        assert_eq!(sample_history(&state, "pat-1", 1).expect("capped").len(), 1);
        let err = sample_history(&state, "pat-404", 10).unwrap_err();
        assert!(matches!(err, EngineError::UnknownPatient(_)));
    }

    #[test]
    fn test_apply_config_rejects_broken_math() {
        let (state, _rx) = test_state();
        let mut config = EngineConfig::default();
        config.vitals_weight = 0.0;
        config.face_weight = 0.0;
        config.voice_weight = 0.0;
        let err = apply_engine_config(&state, config).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
        // The live configuration is untouched
        assert_eq!(state.config_snapshot().vitals_weight, 0.6);
    }
}
