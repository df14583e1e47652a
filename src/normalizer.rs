//! Per-modality signal normalization.
//!
//! Turns a raw sample payload into a `NormalizedSignal`: a bounded sub-score
//! in [0, 100] with rationale text, or an explicit `NotContributing` marker
//! when the capture was degraded. A degraded capture never becomes a numeric
//! score, and in particular is never read as zero risk.
//!
//! Structural validation lives here too so all modality bounds stay in one
//! place. The ingest path validates before normalizing; `normalize` assumes
//! its payload already passed.

use crate::error::EngineError;
use crate::types::{EmotionLabel, Modality, NormalizedSignal, SamplePayload, VitalsReading};

// =============================================================================
// Constants
// =============================================================================

/// Safe vital ranges. Deviation beyond a bound accrues penalty points.
pub const SAFE_HEART_RATE: (f64, f64) = (60.0, 100.0);
pub const SAFE_SPO2_FLOOR: f64 = 94.0;
pub const SAFE_SYSTOLIC: (f64, f64) = (90.0, 140.0);
pub const SAFE_DIASTOLIC: (f64, f64) = (60.0, 90.0);
pub const SAFE_TEMPERATURE: (f64, f64) = (36.1, 37.8);

/// Penalty points per unit of deviation, tuned so a clinically serious
/// excursion (10 bpm of tachycardia, 2% desaturation, 2 degrees of fever)
/// reaches the per-vital cap.
const HEART_RATE_POINTS_PER_BPM: f64 = 2.5;
const SPO2_POINTS_PER_PERCENT: f64 = 12.5;
const SYSTOLIC_POINTS_PER_MMHG: f64 = 1.25;
const DIASTOLIC_POINTS_PER_MMHG: f64 = 1.25;
const TEMPERATURE_POINTS_PER_DEGREE: f64 = 12.5;

/// Ceiling on what any single vital contributes to the sub-score.
const PER_VITAL_CAP: f64 = 25.0;

/// Structural intake bounds. Values outside these are rejected as malformed
/// before normalization.
pub const INTAKE_HEART_RATE: (f64, f64) = (30.0, 220.0);
pub const INTAKE_SYSTOLIC: (f64, f64) = (50.0, 250.0);
pub const INTAKE_DIASTOLIC: (f64, f64) = (30.0, 150.0);
pub const INTAKE_SPO2: (f64, f64) = (70.0, 100.0);
pub const INTAKE_TEMPERATURE: (f64, f64) = (30.0, 45.0);
pub const INTAKE_SELF_REPORT: (f64, f64) = (0.0, 10.0);
pub const INTAKE_SUB_SCORE: (f64, f64) = (0.0, 100.0);

// =============================================================================
// Validation
// =============================================================================

/// Reject structurally implausible payloads at ingest. NaN fails every range
/// check, so non-finite values are rejected without a separate test.
pub fn validate_payload(payload: &SamplePayload) -> Result<(), EngineError> {
    match payload {
        SamplePayload::Vitals { reading, .. } => validate_vitals(reading),
        SamplePayload::Face { fatigue_index, .. } => {
            check_bound("fatigue index", *fatigue_index, INTAKE_SUB_SCORE)
        }
        SamplePayload::Voice { stress_score, pitch_avg, .. } => {
            check_bound("stress score", *stress_score, INTAKE_SUB_SCORE)?;
            if let Some(pitch) = pitch_avg {
                if !pitch.is_finite() || *pitch < 0.0 {
                    return Err(EngineError::MalformedSample(format!(
                        "average pitch {pitch} is not a plausible frequency"
                    )));
                }
            }
            Ok(())
        }
    }
}

fn validate_vitals(reading: &VitalsReading) -> Result<(), EngineError> {
    check_bound("heart rate", reading.heart_rate, INTAKE_HEART_RATE)?;
    check_bound("systolic", reading.systolic, INTAKE_SYSTOLIC)?;
    check_bound("diastolic", reading.diastolic, INTAKE_DIASTOLIC)?;
    check_bound("spo2", reading.spo2, INTAKE_SPO2)?;
    check_bound("temperature", reading.temperature, INTAKE_TEMPERATURE)?;
    if let Some(pain) = reading.pain {
        check_bound("pain", pain, INTAKE_SELF_REPORT)?;
    }
    if let Some(fatigue) = reading.fatigue {
        check_bound("fatigue", fatigue, INTAKE_SELF_REPORT)?;
    }
    Ok(())
}

fn check_bound(field: &str, value: f64, (low, high): (f64, f64)) -> Result<(), EngineError> {
    if (low..=high).contains(&value) {
        Ok(())
    } else {
        Err(EngineError::MalformedSample(format!(
            "{field} {value} outside {low}-{high}"
        )))
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalize one validated payload into its modality signal.
pub fn normalize(payload: &SamplePayload) -> NormalizedSignal {
    match payload {
        SamplePayload::Vitals { reading, quality } => {
            if let Some(reason) = quality.degraded_reason() {
                return NormalizedSignal::NotContributing {
                    modality: payload.modality(),
                    reason: reason.to_string(),
                };
            }
            normalize_vitals(reading)
        }
        SamplePayload::Face { fatigue_index, emotion, quality } => {
            if let Some(reason) = quality.degraded_reason() {
                return NormalizedSignal::NotContributing {
                    modality: payload.modality(),
                    reason: reason.to_string(),
                };
            }
            normalize_face(*fatigue_index, *emotion)
        }
        SamplePayload::Voice { stress_score, pitch_avg, quality } => {
            if let Some(reason) = quality.degraded_reason() {
                return NormalizedSignal::NotContributing {
                    modality: payload.modality(),
                    reason: reason.to_string(),
                };
            }
            normalize_voice(*stress_score, *pitch_avg)
        }
    }
}

/// Deviation scoring over the five vitals. Each out-of-range vital
/// contributes distance from the nearest safe bound times its per-unit
/// weight, capped per vital, summed, clamped to [0, 100].
fn normalize_vitals(reading: &VitalsReading) -> NormalizedSignal {
    let mut reasons = Vec::new();

    // 1. Heart rate (60-100 bpm)
    let hr = range_penalty(reading.heart_rate, SAFE_HEART_RATE, HEART_RATE_POINTS_PER_BPM);
    if hr > 0.0 {
        reasons.push(format!(
            "HR {:.0} outside {:.0}-{:.0}",
            reading.heart_rate, SAFE_HEART_RATE.0, SAFE_HEART_RATE.1
        ));
    }

    // 2. Oxygen saturation (floor only)
    let spo2 = floor_penalty(reading.spo2, SAFE_SPO2_FLOOR, SPO2_POINTS_PER_PERCENT);
    if spo2 > 0.0 {
        reasons.push(format!("SpO2 {:.0} below {:.0}", reading.spo2, SAFE_SPO2_FLOOR));
    }

    // 3. Blood pressure, both sides
    let systolic = range_penalty(reading.systolic, SAFE_SYSTOLIC, SYSTOLIC_POINTS_PER_MMHG);
    if systolic > 0.0 {
        reasons.push(format!(
            "systolic {:.0} outside {:.0}-{:.0}",
            reading.systolic, SAFE_SYSTOLIC.0, SAFE_SYSTOLIC.1
        ));
    }
    let diastolic = range_penalty(reading.diastolic, SAFE_DIASTOLIC, DIASTOLIC_POINTS_PER_MMHG);
    if diastolic > 0.0 {
        reasons.push(format!(
            "diastolic {:.0} outside {:.0}-{:.0}",
            reading.diastolic, SAFE_DIASTOLIC.0, SAFE_DIASTOLIC.1
        ));
    }

    // 4. Temperature
    let temp =
        range_penalty(reading.temperature, SAFE_TEMPERATURE, TEMPERATURE_POINTS_PER_DEGREE);
    if temp > 0.0 {
        reasons.push(format!(
            "temp {:.1} outside {:.1}-{:.1}",
            reading.temperature, SAFE_TEMPERATURE.0, SAFE_TEMPERATURE.1
        ));
    }

    // 5. Self-reports are echoed for the record but carry no points
    if let Some(pain) = reading.pain {
        reasons.push(format!("pain {:.0}/10 reported", pain));
    }
    if let Some(fatigue) = reading.fatigue {
        reasons.push(format!("fatigue {:.0}/10 reported", fatigue));
    }

    let value = (hr + spo2 + systolic + diastolic + temp).clamp(0.0, 100.0);
    let rationale = if reasons.is_empty() {
        "vitals within safe ranges".to_string()
    } else {
        reasons.join(" · ")
    };

    NormalizedSignal::Score { modality: Modality::Vitals, value, rationale }
}

/// Face sub-score: the worse of the upstream fatigue index and the risk the
/// detected emotion carries.
fn normalize_face(fatigue_index: f64, emotion: Option<EmotionLabel>) -> NormalizedSignal {
    let mut reasons = vec![format!("fatigue index {:.0}", fatigue_index)];

    let value = match emotion {
        Some(label) => {
            let risk = emotion_risk(label);
            reasons.push(format!("emotion {}", label.as_str()));
            fatigue_index.max(risk)
        }
        None => fatigue_index,
    };

    NormalizedSignal::Score {
        modality: Modality::Face,
        value: value.clamp(0.0, 100.0),
        rationale: reasons.join(" · "),
    }
}

/// Voice sub-score: upstream stress score passed through. Average pitch is
/// display metadata only.
fn normalize_voice(stress_score: f64, pitch_avg: Option<f64>) -> NormalizedSignal {
    let mut reasons = vec![format!("voice stress {:.0}", stress_score)];
    if let Some(pitch) = pitch_avg {
        reasons.push(format!("avg pitch {:.0} Hz", pitch));
    }

    NormalizedSignal::Score {
        modality: Modality::Voice,
        value: stress_score.clamp(0.0, 100.0),
        rationale: reasons.join(" · "),
    }
}

/// Risk carried by a detected emotion.
fn emotion_risk(emotion: EmotionLabel) -> f64 {
    match emotion {
        EmotionLabel::Fear | EmotionLabel::Sad | EmotionLabel::Angry | EmotionLabel::Disgust => {
            80.0
        }
        EmotionLabel::Surprise => 30.0,
        EmotionLabel::Neutral => 10.0,
        EmotionLabel::Happy => 0.0,
    }
}

/// Distance beyond either bound, weighted and capped.
fn range_penalty(value: f64, (low, high): (f64, f64), points_per_unit: f64) -> f64 {
    let deviation = if value < low {
        low - value
    } else if value > high {
        value - high
    } else {
        return 0.0;
    };
    (deviation * points_per_unit).min(PER_VITAL_CAP)
}

/// Distance below a one-sided floor, weighted and capped.
fn floor_penalty(value: f64, floor: f64, points_per_unit: f64) -> f64 {
    if value >= floor {
        return 0.0;
    }
    ((floor - value) * points_per_unit).min(PER_VITAL_CAP)
}
