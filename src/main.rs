//! Headless service entry.
//!
//! Starts the engine, the staleness monitor, and the alert dispatcher, then
//! replays a small demo ward so every moving part shows up in the log:
//! admission, scorer captures (including a timeout fallback), fusion,
//! re-ranking, the alert gate, duplicate replay, staleness, and discharge.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use triagecore::alerts::{AlertDispatcher, LogChannel};
use triagecore::api::{self, AdmitPatientRequest, SubmitSampleRequest, UpdatePatientRequest};
use triagecore::error::EngineError;
use triagecore::pipeline::{IngestOutcome, StalenessMonitor};
use triagecore::scorer::{capture_with_timeout, ModalityScorer};
use triagecore::state::{self, EngineState};
use triagecore::types::{
    ComorbidityProfile, EmotionLabel, FaceQuality, Modality, SamplePayload, VitalsQuality,
    VitalsReading, VoiceQuality,
};

#[tokio::main]
async fn main() -> Result<(), EngineError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let (state, mut alert_rx) = state::init()?;
    let state = Arc::new(state);
    log::info!("Engine started with {} queued patients", state.queue.len());

    let monitor = StalenessMonitor::new(state.clone());
    tokio::spawn(async move { monitor.run().await });

    let dispatcher = AlertDispatcher::new(state.clone(), Box::new(LogChannel));
    tokio::spawn(async move { dispatcher.run().await });

    // Live alert stream, as a subscriber would consume it
    tokio::spawn(async move {
        while let Some(alert) = alert_rx.recv().await {
            log::info!("Stream: [{}] {}", alert.severity.as_str(), alert.message);
        }
    });

    replay_demo_ward(&state).await?;

    // Let the dispatcher sweep the outbox before exiting
    tokio::time::sleep(std::time::Duration::from_secs(6)).await;
    print_alert_backlog(&state)?;

    log::info!("Demo replay complete");
    Ok(())
}

// =============================================================================
// Demo scorers
// =============================================================================

/// Scripted bedside monitor.
struct BedsideMonitor {
    reading: VitalsReading,
}

#[async_trait]
impl ModalityScorer for BedsideMonitor {
    fn modality(&self) -> Modality {
        Modality::Vitals
    }

    async fn capture(&self, _patient_id: &str) -> Result<SamplePayload, EngineError> {
        Ok(SamplePayload::Vitals { reading: self.reading.clone(), quality: VitalsQuality::Ok })
    }

    fn unusable_payload(&self) -> SamplePayload {
        SamplePayload::Vitals { reading: self.reading.clone(), quality: VitalsQuality::Unusable }
    }
}

/// Scripted ward camera.
struct WardCamera {
    fatigue_index: f64,
    emotion: EmotionLabel,
}

#[async_trait]
impl ModalityScorer for WardCamera {
    fn modality(&self) -> Modality {
        Modality::Face
    }

    async fn capture(&self, _patient_id: &str) -> Result<SamplePayload, EngineError> {
        Ok(SamplePayload::Face {
            fatigue_index: self.fatigue_index,
            emotion: Some(self.emotion),
            quality: FaceQuality::Ok,
        })
    }

    fn unusable_payload(&self) -> SamplePayload {
        SamplePayload::Face { fatigue_index: 0.0, emotion: None, quality: FaceQuality::Unusable }
    }
}

/// Voice analyzer that takes longer than the ingest path will wait,
/// demonstrating the timeout fallback.
struct SlowVoiceAnalyzer {
    delay_ms: u64,
}

#[async_trait]
impl ModalityScorer for SlowVoiceAnalyzer {
    fn modality(&self) -> Modality {
        Modality::Voice
    }

    async fn capture(&self, _patient_id: &str) -> Result<SamplePayload, EngineError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(SamplePayload::Voice {
            stress_score: 55.0,
            pitch_avg: Some(182.0),
            quality: VoiceQuality::Ok,
        })
    }

    fn unusable_payload(&self) -> SamplePayload {
        SamplePayload::Voice { stress_score: 0.0, pitch_avg: None, quality: VoiceQuality::Unusable }
    }
}

// =============================================================================
// Demo ward replay
// =============================================================================

fn vitals(heart_rate: f64, spo2: f64, systolic: f64, diastolic: f64, temp: f64) -> SamplePayload {
    SamplePayload::Vitals {
        reading: VitalsReading {
            heart_rate,
            spo2,
            systolic,
            diastolic,
            temperature: temp,
            pain: None,
            fatigue: None,
        },
        quality: VitalsQuality::Ok,
    }
}

async fn submit(
    state: &EngineState,
    patient_id: &str,
    payload: SamplePayload,
    captured_at: DateTime<Utc>,
) -> Result<IngestOutcome, EngineError> {
    let req = SubmitSampleRequest { patient_id: patient_id.to_string(), captured_at, payload };
    let outcome = api::submit_sample(state, req).await?;
    match &outcome {
        IngestOutcome::Assessed { assessment } => log::info!(
            "Demo: {} assessed at {:.1} ({})",
            patient_id,
            assessment.overall_risk_score,
            assessment.condition
        ),
        IngestOutcome::Duplicate { .. } => {
            log::info!("Demo: {} sample was a duplicate, replayed", patient_id)
        }
        IngestOutcome::AwaitingSignal { .. } => {
            log::info!("Demo: {} has no usable signal, entry flagged stale", patient_id)
        }
    }
    Ok(outcome)
}

async fn replay_demo_ward(state: &EngineState) -> Result<(), EngineError> {
    let scorer_timeout_ms = state.config_snapshot().scorer_timeout_ms;
    let base = Utc::now() - Duration::minutes(40);

    // Admissions
    for (id, name, comorbidities) in [
        (
            "pat-rosa",
            "Rosa Vance",
            ComorbidityProfile { renal_disease: true, cardiac_disease: true, ..Default::default() },
        ),
        ("pat-ramesh", "Ramesh Kumar", ComorbidityProfile::default()),
        (
            "pat-elena",
            "Elena Brooks",
            ComorbidityProfile { immunocompromised: true, ..Default::default() },
        ),
    ] {
        api::admit_patient(
            state,
            AdmitPatientRequest {
                id: Some(id.to_string()),
                display_name: name.to_string(),
                comorbidities,
            },
        )
        .await?;
    }

    // Baseline vitals, all quiet
    submit(state, "pat-rosa", vitals(78.0, 97.0, 122.0, 80.0, 36.9), base).await?;
    submit(state, "pat-ramesh", vitals(72.0, 98.0, 118.0, 76.0, 36.7), base).await?;
    submit(state, "pat-elena", vitals(84.0, 96.0, 126.0, 82.0, 37.1), base).await?;

    // Rosa deteriorates across two readings: the first enters the critical
    // horizon (critical alert), the peak raises urgency to high (warning)
    submit(
        state,
        "pat-rosa",
        vitals(112.0, 93.0, 138.0, 88.0, 38.4),
        base + Duration::minutes(10),
    )
    .await?;
    let rosa_peak = vitals(118.0, 89.0, 144.0, 92.0, 38.9);
    submit(state, "pat-rosa", rosa_peak.clone(), base + Duration::minutes(20)).await?;

    // Exact resubmission is deduplicated, not double-counted
    submit(state, "pat-rosa", rosa_peak, base + Duration::minutes(20)).await?;

    // Elena's scorers: camera works, voice analyzer exceeds the timeout and
    // degrades to an unusable capture instead of blocking ingest
    let camera = WardCamera { fatigue_index: 72.0, emotion: EmotionLabel::Sad };
    let face = capture_with_timeout(&camera, "pat-elena", scorer_timeout_ms).await;
    submit(state, "pat-elena", face, base + Duration::minutes(22)).await?;

    let analyzer = SlowVoiceAnalyzer { delay_ms: scorer_timeout_ms + 500 };
    let voice = capture_with_timeout(&analyzer, "pat-elena", scorer_timeout_ms).await;
    submit(state, "pat-elena", voice, base + Duration::minutes(23)).await?;

    // Ramesh's monitor disconnects: sample recorded, prior score retained,
    // entry flagged stale
    let monitor = BedsideMonitor {
        reading: VitalsReading {
            heart_rate: 72.0,
            spo2: 98.0,
            systolic: 118.0,
            diastolic: 76.0,
            temperature: 36.7,
            pain: None,
            fatigue: None,
        },
    };
    let disconnected = monitor.unusable_payload();
    submit(state, "pat-ramesh", disconnected, base + Duration::minutes(25)).await?;

    // Administrative update lands on future assessments only
    api::update_patient(
        state,
        UpdatePatientRequest {
            id: "pat-elena".to_string(),
            display_name: None,
            comorbidities: Some(ComorbidityProfile {
                immunocompromised: true,
                diabetes: true,
                ..Default::default()
            }),
        },
    )
    .await?;

    print_queues(state);

    let history = api::assessment_history(state, "pat-rosa")?;
    log::info!("Demo: Rosa has {} assessments on record", history.len());
    if let Some(last) = history.last() {
        log::info!("Demo: latest rationale: {}", last.rationale);
    }
    for sample in api::sample_history(state, "pat-rosa", 5)? {
        log::info!(
            "Demo: capture {} {} at {}",
            sample.id,
            sample.payload.modality(),
            sample.captured_at.to_rfc3339()
        );
    }

    api::discharge_patient(state, "pat-ramesh").await?;
    print_queues(state);

    for assessment in api::recent_assessments(state, 5)? {
        log::info!(
            "Demo: recent {} risk={:.1} {}",
            assessment.patient_id,
            assessment.overall_risk_score,
            assessment.condition
        );
    }

    Ok(())
}

fn print_queues(state: &EngineState) {
    log::info!("Demo: risk-ranked queue:");
    for (position, row) in api::queue_by_risk(state).iter().enumerate() {
        log::info!(
            "  {}. {} risk={:.1} urgency={} ttr={} wait={}{}",
            position + 1,
            row.entry.patient_name,
            row.entry.risk_score,
            row.entry.urgency,
            row.ttr_label,
            row.waiting,
            if row.entry.stale { " [stale]" } else { "" }
        );
    }
    log::info!("Demo: arrival-order queue:");
    for (position, row) in api::queue_by_arrival(state).iter().enumerate() {
        log::info!("  {}. {} waiting {}", position + 1, row.entry.patient_name, row.waiting);
    }
}

fn print_alert_backlog(state: &EngineState) -> Result<(), EngineError> {
    for alert in api::recent_alerts(state, 10)? {
        log::info!("Demo: alert [{}] {}", alert.severity.as_str(), alert.message);
    }
    Ok(())
}
