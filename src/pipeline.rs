//! The ingest path: validate → dedup → order → normalize → fuse → estimate →
//! re-rank → alert gate. Plus the background staleness monitor.
//!
//! Hard rejections (malformed payload, unknown patient) happen before any
//! state change. Past that point the sample is always recorded; whether a
//! fresh assessment supersedes the prior one depends on fusion. Samples for
//! one patient apply strictly in arrival order under a per-patient lock;
//! different patients proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::db::TriageDb;
use crate::error::EngineError;
use crate::normalizer;
use crate::state::EngineState;
use crate::types::{
    Modality, ModalitySample, NormalizedSignal, QueueEntry, RiskAssessment, SamplePayload,
    VitalsQuality, VitalsReading,
};
use crate::{alerts, fusion, ttr};

/// What an accepted sample produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum IngestOutcome {
    /// A fresh assessment was computed and the queue re-ranked.
    #[serde(rename_all = "camelCase")]
    Assessed { assessment: RiskAssessment },
    /// Exact replay of an already-recorded sample. The original assessment
    /// answers; nothing is recomputed or double-counted.
    #[serde(rename_all = "camelCase")]
    Duplicate { assessment: Option<RiskAssessment> },
    /// No modality contributed a usable score. The sample is recorded, the
    /// prior assessment stays authoritative, and the queue entry carries a
    /// stale flag instead of an invented number.
    #[serde(rename_all = "camelCase")]
    AwaitingSignal { prior: Option<RiskAssessment> },
}

impl IngestOutcome {
    /// The assessment answering this ingest, when one exists.
    pub fn assessment(&self) -> Option<&RiskAssessment> {
        match self {
            IngestOutcome::Assessed { assessment } => Some(assessment),
            IngestOutcome::Duplicate { assessment } => assessment.as_ref(),
            IngestOutcome::AwaitingSignal { prior } => prior.as_ref(),
        }
    }
}

/// Ingest one modality sample for a patient.
///
/// The patient must be admitted and active. Validation failures and unknown
/// patients reject without touching engine state.
pub async fn ingest(
    state: &EngineState,
    patient_id: &str,
    payload: SamplePayload,
    captured_at: DateTime<Utc>,
) -> Result<IngestOutcome, EngineError> {
    // 1. Structural validation, before any lock or lookup
    normalizer::validate_payload(&payload)?;

    // 2. Per-patient ordering lock
    let ordering = state.patient_lock(patient_id);
    let _guard = ordering.lock().await;

    let config = state.config_snapshot();
    let db = state.db.lock();

    // 3. The patient must be admitted and active
    let patient = db
        .get_patient(patient_id)?
        .filter(|p| p.is_active())
        .ok_or_else(|| EngineError::UnknownPatient(patient_id.to_string()))?;

    // 4. Duplicate detection by content digest
    let digest = sample_digest(patient_id, captured_at, &payload)?;
    if let Some((sample_id, assessment_id)) =
        db.find_sample_by_digest(patient_id, captured_at, &digest)?
    {
        log::debug!("Pipeline: duplicate of sample {sample_id} for {patient_id}, replaying");
        let assessment = match assessment_id {
            Some(id) => db.assessment_by_id(&id)?,
            None => db.latest_assessment(patient_id)?,
        };
        return Ok(IngestOutcome::Duplicate { assessment });
    }

    let sample = ModalitySample {
        id: format!("smp-{}", uuid::Uuid::new_v4()),
        patient_id: patient_id.to_string(),
        captured_at,
        payload,
        digest,
    };

    // 5. Normalize the patient's current signal set: the arriving sample
    //    plus the newest recorded sample of each other modality
    let (signals, latest_vitals) = assemble_signals(&db, &sample)?;

    // 6. Fuse. Zero contributing modalities keeps the prior assessment
    //    authoritative and flags the entry stale.
    let fused = match fusion::fuse(&signals, &patient.comorbidities, latest_vitals.as_ref(), &config)
    {
        Ok(fused) => fused,
        Err(EngineError::InsufficientSignal) => {
            db.insert_sample(&sample)?;
            if let Some(entry) = state.queue.mark_stale(patient_id) {
                db.upsert_queue_entry(&entry)?;
            }
            let prior = db.latest_assessment(patient_id)?;
            log::info!(
                "Pipeline: no usable signal for {patient_id}, prior assessment stays authoritative"
            );
            return Ok(IngestOutcome::AwaitingSignal { prior });
        }
        Err(e) => return Err(e),
    };

    // 7. Estimate time-to-risk against the recent trend, bounded to this
    //    admission so re-admission starts a fresh trend
    let prior_assessment = db.latest_assessment(patient_id)?;
    let prior_scores = db.recent_scores(patient_id, config.trend_window, patient.admitted_at)?;
    let estimate = ttr::estimate(fused.score, &prior_scores, &config);

    let mut rationale = fused.rationale.clone();
    if estimate.trend != ttr::Trend::Flat {
        rationale.push_str(&format!(" · trend {}", estimate.trend.as_str()));
    }

    let recommendation = if fused.score > config.immediate_attention_line {
        "Immediate attention required"
    } else {
        "Continue monitoring"
    };

    let assessment = RiskAssessment {
        id: format!("asm-{}", uuid::Uuid::new_v4()),
        patient_id: patient_id.to_string(),
        overall_risk_score: fused.score,
        urgency: fused.urgency,
        time_to_risk_minutes: estimate.minutes,
        ttr_level: estimate.level,
        condition: ttr::condition_label(fused.urgency, estimate.level, estimate.minutes)
            .to_string(),
        recommendation: recommendation.to_string(),
        signals,
        rationale,
        created_at: Utc::now(),
    };

    // 8. Persist sample + assessment + queue row atomically, then publish
    //    the re-rank to the live queue
    let entry = next_queue_entry(state, &patient.display_name, &assessment);
    db.with_transaction(|tx| {
        tx.insert_sample(&sample)?;
        tx.insert_assessment(&assessment)?;
        tx.link_sample_assessment(&sample.id, &assessment.id)?;
        tx.upsert_queue_entry(&entry)?;
        Ok(())
    })?;

    if state.queue.apply_assessment(&assessment).is_none() {
        state.queue.enqueue(entry);
    }

    // 9. Alert gate on the tier transition
    let prior_tiers = prior_assessment.map(|a| (a.urgency, a.ttr_level));
    alerts::gate_and_emit(
        &db,
        &config,
        &state.alert_tx,
        prior_tiers,
        &assessment,
        &patient.display_name,
    )?;

    log::info!(
        "Pipeline: assessed {} risk={:.1} urgency={} ttr={}",
        patient_id,
        assessment.overall_risk_score,
        assessment.urgency,
        estimate.label
    );
    Ok(IngestOutcome::Assessed { assessment })
}

/// Content digest over (patient, capture time, payload) for duplicate
/// detection.
pub fn sample_digest(
    patient_id: &str,
    captured_at: DateTime<Utc>,
    payload: &SamplePayload,
) -> Result<String, EngineError> {
    let body = serde_json::to_string(payload)
        .map_err(|e| EngineError::MalformedSample(format!("payload not serializable: {e}")))?;
    let mut hasher = Sha256::new();
    hasher.update(patient_id.as_bytes());
    hasher.update(captured_at.to_rfc3339().as_bytes());
    hasher.update(body.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// The patient's current signal set: the arriving sample plus the newest
/// recorded sample of each other modality. Also surfaces the raw vitals
/// reading behind a usable vitals capture, for the escalation check.
fn assemble_signals(
    db: &TriageDb,
    sample: &ModalitySample,
) -> Result<(Vec<NormalizedSignal>, Option<VitalsReading>), EngineError> {
    let mut signals = Vec::new();
    let mut latest_vitals = None;

    for modality in [Modality::Vitals, Modality::Face, Modality::Voice] {
        let current = if modality == sample.payload.modality() {
            Some(sample.clone())
        } else {
            db.latest_sample_for_modality(&sample.patient_id, modality)?
        };
        let Some(current) = current else { continue };

        if let SamplePayload::Vitals { reading, quality } = &current.payload {
            if *quality == VitalsQuality::Ok {
                latest_vitals = Some(reading.clone());
            }
        }
        signals.push(normalizer::normalize(&current.payload));
    }

    Ok((signals, latest_vitals))
}

/// The queue row a fresh assessment produces: a field-replace of the current
/// entry, or a brand-new entry when the patient holds none.
fn next_queue_entry(
    state: &EngineState,
    patient_name: &str,
    assessment: &RiskAssessment,
) -> QueueEntry {
    match state.queue.get(&assessment.patient_id) {
        Some(current) => QueueEntry {
            patient_id: current.patient_id,
            patient_name: current.patient_name,
            risk_score: assessment.overall_risk_score,
            urgency: assessment.urgency,
            time_to_risk_minutes: assessment.time_to_risk_minutes,
            ttr_level: assessment.ttr_level,
            condition: assessment.condition.clone(),
            enqueued_at: current.enqueued_at,
            updated_at: assessment.created_at,
            version: current.version + 1,
            stale: false,
        },
        None => QueueEntry {
            patient_id: assessment.patient_id.clone(),
            patient_name: patient_name.to_string(),
            risk_score: assessment.overall_risk_score,
            urgency: assessment.urgency,
            time_to_risk_minutes: assessment.time_to_risk_minutes,
            ttr_level: assessment.ttr_level,
            condition: assessment.condition.clone(),
            enqueued_at: assessment.created_at,
            updated_at: assessment.created_at,
            version: 1,
            stale: false,
        },
    }
}

// =============================================================================
// Staleness monitor
// =============================================================================

/// Background sweep flagging queue entries with no fresh assessment inside
/// the reassessment window. Flagged entries keep their scores; the flag
/// tells readers the number is old, and clears on the next assessment.
pub struct StalenessMonitor {
    state: Arc<EngineState>,
}

impl StalenessMonitor {
    pub fn new(state: Arc<EngineState>) -> Self {
        Self { state }
    }

    /// Run indefinitely. The interval is re-read each pass so config updates
    /// apply without a restart.
    pub async fn run(&self) {
        loop {
            let interval = self.state.config.lock().monitor_interval_secs;
            tokio::time::sleep(Duration::from_secs(interval.max(1))).await;
            if let Err(e) = self.sweep_once(Utc::now()) {
                log::warn!("Monitor: staleness sweep failed: {e}");
            }
        }
    }

    /// One sweep at `now`. Returns how many entries were newly flagged.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        let window = self.state.config.lock().reassess_after_secs;
        let cutoff = now - chrono::Duration::seconds(window);

        let flagged = self.state.queue.flag_stale_older_than(cutoff);
        if flagged.is_empty() {
            return Ok(0);
        }

        let db = self.state.db.lock();
        for entry in &flagged {
            db.upsert_queue_entry(entry)?;
        }
        log::info!(
            "Monitor: flagged {} entries stale (no assessment in {}s)",
            flagged.len(),
            window
        );
        Ok(flagged.len())
    }
}

// =============================================================================
// Tests
// =============================================================================
