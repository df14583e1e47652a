//! Multimodal risk fusion.
//!
//! Combines the per-modality sub-scores into one overall risk score in
//! [0, 100]. Vitals carry most of the weight; face and voice are
//! supplementary distress indicators. Weights of non-contributing modalities
//! are redistributed proportionally so the contributing weights always sum
//! to 1.0.

use crate::error::EngineError;
use crate::types::{ComorbidityProfile, EngineConfig, NormalizedSignal, UrgencyTier, VitalsReading};

/// Tightened vital thresholds for comorbidity escalation. A flagged
/// comorbidity plus any crossing adds the configured bonus once.
const ESCALATION_HEART_RATE_FLOOR: f64 = 90.0;
const ESCALATION_SYSTOLIC_FLOOR: f64 = 140.0;
const ESCALATION_DIASTOLIC_FLOOR: f64 = 90.0;
const ESCALATION_TEMPERATURE_FLOOR: f64 = 38.0;
const ESCALATION_SPO2_CEILING: f64 = 94.0;

/// Fusion output, before time-to-risk estimation.
#[derive(Debug, Clone)]
pub struct FusedRisk {
    /// Overall risk in [0, 100], rounded to one decimal.
    pub score: f64,
    pub urgency: UrgencyTier,
    pub rationale: String,
}

/// Fuse the latest signal per modality into an overall risk score.
///
/// `signals` carries at most one entry per modality. `latest_vitals` is the
/// raw reading behind a contributing vitals signal, used for the tightened
/// threshold check; absent when vitals did not contribute.
///
/// Returns `InsufficientSignal` when no modality contributes. The caller
/// keeps the prior assessment authoritative in that case.
pub fn fuse(
    signals: &[NormalizedSignal],
    comorbidities: &ComorbidityProfile,
    latest_vitals: Option<&VitalsReading>,
    config: &EngineConfig,
) -> Result<FusedRisk, EngineError> {
    let mut reasons = Vec::new();

    // 1. Split contributing from degraded and total the live weight
    let mut weight_sum = 0.0;
    for signal in signals {
        if signal.is_contributing() {
            weight_sum += config.weight_for(signal.modality());
        }
    }
    if weight_sum <= 0.0 {
        return Err(EngineError::InsufficientSignal);
    }

    // 2. Weighted sum with proportional redistribution
    let mut score = 0.0;
    for signal in signals {
        match signal {
            NormalizedSignal::Score { modality, value, .. } => {
                let weight = config.weight_for(*modality) / weight_sum;
                score += value * weight;
                reasons.push(format!("{} {:.0} (weight {:.2})", modality, value, weight));
            }
            NormalizedSignal::NotContributing { modality, reason } => {
                reasons.push(format!("{} not contributing ({})", modality, reason));
            }
        }
    }

    // 3. Comorbidity escalation
    if comorbidities.any_flagged() {
        if let Some(crossing) = latest_vitals.and_then(tightened_threshold_crossing) {
            score += config.escalation_bonus;
            reasons.push(format!(
                "comorbidity escalation +{:.0}: {}, {}",
                config.escalation_bonus,
                comorbidities.flagged_labels().join(", "),
                crossing
            ));
        }
    }

    // 4. Critical-modality override: one alarming channel floors the total
    for signal in signals {
        if let NormalizedSignal::Score { modality, value, .. } = signal {
            let line = config.critical_line_for(*modality);
            if *value > line && score < config.critical_override_floor {
                score = config.critical_override_floor;
                reasons.push(format!(
                    "critical {} override, floored at {:.0}",
                    modality, config.critical_override_floor
                ));
                break;
            }
        }
    }

    let score = round1(score.clamp(0.0, 100.0));
    Ok(FusedRisk {
        score,
        urgency: urgency_for(score, config),
        rationale: reasons.join(" · "),
    })
}

/// Urgency tier for a fused score.
pub fn urgency_for(score: f64, config: &EngineConfig) -> UrgencyTier {
    if score >= config.high_urgency_floor {
        UrgencyTier::High
    } else if score >= config.medium_urgency_floor {
        UrgencyTier::Medium
    } else {
        UrgencyTier::Low
    }
}

/// Which tightened threshold the reading crosses, if any.
fn tightened_threshold_crossing(reading: &VitalsReading) -> Option<&'static str> {
    if reading.heart_rate >= ESCALATION_HEART_RATE_FLOOR {
        Some("HR at or above 90")
    } else if reading.systolic >= ESCALATION_SYSTOLIC_FLOOR {
        Some("systolic at or above 140")
    } else if reading.diastolic >= ESCALATION_DIASTOLIC_FLOOR {
        Some("diastolic at or above 90")
    } else if reading.temperature >= ESCALATION_TEMPERATURE_FLOOR {
        Some("temp at or above 38.0")
    } else if reading.spo2 <= ESCALATION_SPO2_CEILING {
        Some("SpO2 at or below 94")
    } else {
        None
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
