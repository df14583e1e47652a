//! Upstream modality scorers.
//!
//! Face and voice sub-scores come from opaque upstream models. The engine
//! treats each as a producer of sample payloads behind a timeout: a scorer
//! that hangs or fails yields that modality's explicit unusable capture
//! instead of stalling the ingest path.

use std::time::Duration;

use crate::error::EngineError;
use crate::types::{Modality, SamplePayload};

/// A producer of scored sample payloads for one modality.
#[async_trait::async_trait]
pub trait ModalityScorer: Send + Sync {
    /// Which modality this scorer produces.
    fn modality(&self) -> Modality;

    /// Capture and score one sample for a patient.
    async fn capture(&self, patient_id: &str) -> Result<SamplePayload, EngineError>;

    /// Payload recorded when the capture times out or fails. Must carry a
    /// degraded quality flag so it normalizes to non-contributing.
    fn unusable_payload(&self) -> SamplePayload;
}

/// Capture through a scorer, bounded by the configured timeout.
///
/// Elapse and scorer errors both degrade to the unusable payload, so the
/// caller always gets a payload to record.
pub async fn capture_with_timeout(
    scorer: &dyn ModalityScorer,
    patient_id: &str,
    timeout_ms: u64,
) -> SamplePayload {
    let deadline = Duration::from_millis(timeout_ms);
    match tokio::time::timeout(deadline, scorer.capture(patient_id)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            log::warn!("Scorer: {} capture for {} failed: {e}", scorer.modality(), patient_id);
            scorer.unusable_payload()
        }
        Err(_) => {
            let err = EngineError::ScorerTimeout(scorer.modality(), timeout_ms);
            log::warn!("Scorer: {err} for {patient_id}, recording unusable capture");
            scorer.unusable_payload()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer;
    use crate::types::{FaceQuality, VoiceQuality};

    struct FastFaceScorer;

    #[async_trait::async_trait]
    impl ModalityScorer for FastFaceScorer {
        fn modality(&self) -> Modality {
            Modality::Face
        }

        async fn capture(&self, _patient_id: &str) -> Result<SamplePayload, EngineError> {
            Ok(SamplePayload::Face {
                fatigue_index: 44.0,
                emotion: None,
                quality: FaceQuality::Ok,
            })
        }

        fn unusable_payload(&self) -> SamplePayload {
            SamplePayload::Face {
                fatigue_index: 0.0,
                emotion: None,
                quality: FaceQuality::Unusable,
            }
        }
    }

    struct HungVoiceScorer;

    #[async_trait::async_trait]
    impl ModalityScorer for HungVoiceScorer {
        fn modality(&self) -> Modality {
            Modality::Voice
        }

        async fn capture(&self, _patient_id: &str) -> Result<SamplePayload, EngineError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(SamplePayload::Voice {
                stress_score: 60.0,
                pitch_avg: None,
                quality: VoiceQuality::Ok,
            })
        }

        fn unusable_payload(&self) -> SamplePayload {
            SamplePayload::Voice {
                stress_score: 0.0,
                pitch_avg: None,
                quality: VoiceQuality::Unusable,
            }
        }
    }

    struct BrokenVoiceScorer;

    #[async_trait::async_trait]
    impl ModalityScorer for BrokenVoiceScorer {
        fn modality(&self) -> Modality {
            Modality::Voice
        }

        async fn capture(&self, _patient_id: &str) -> Result<SamplePayload, EngineError> {
            Err(EngineError::Io("microphone unavailable".to_string()))
        }

        fn unusable_payload(&self) -> SamplePayload {
            SamplePayload::Voice {
                stress_score: 0.0,
                pitch_avg: None,
                quality: VoiceQuality::Unusable,
            }
        }
    }

    #[tokio::test]
    async fn test_fast_scorer_passes_through() {
        let payload = capture_with_timeout(&FastFaceScorer, "pat-1", 1000).await;
        match payload {
            SamplePayload::Face { fatigue_index, quality, .. } => {
                assert_eq!(fatigue_index, 44.0);
                assert_eq!(quality, FaceQuality::Ok);
            }
            other => panic!("wrong payload: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hung_scorer_degrades_to_unusable() {
        let payload = capture_with_timeout(&HungVoiceScorer, "pat-1", 10).await;
        let signal = normalizer::normalize(&payload);
        assert!(!signal.is_contributing(), "timed-out capture must not score");
    }

    #[tokio::test]
    async fn test_failing_scorer_degrades_to_unusable() {
        let payload = capture_with_timeout(&BrokenVoiceScorer, "pat-1", 1000).await;
        match payload {
            SamplePayload::Voice { quality, .. } => assert_eq!(quality, VoiceQuality::Unusable),
            other => panic!("wrong payload: {:?}", other),
        }
    }
}
