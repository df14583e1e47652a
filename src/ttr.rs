//! Time-to-risk estimation.
//!
//! Maps a fused risk score onto an ordered band table (score floor to
//! duration), then lets the recent score trend shift the result by at most
//! one band: deteriorating patients get a shorter horizon, clearly improving
//! ones a longer one. The ttr level is a pure function of the resulting
//! duration and is never set independently.

use crate::types::{EngineConfig, TtrLevel, UrgencyTier};

/// Duration cutoffs for the ttr level.
const CRITICAL_WITHIN_MINUTES: i64 = 30;
const WATCH_WITHIN_MINUTES: i64 = 180;

/// Observation Required rather than Early Warning when the horizon is this
/// short.
const OBSERVATION_WITHIN_MINUTES: i64 = 60;

/// Score trend across the rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Improving,
    Flat,
    Deteriorating,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Improving => "improving",
            Trend::Flat => "flat",
            Trend::Deteriorating => "deteriorating",
        }
    }
}

/// Time-to-risk output for one assessment.
#[derive(Debug, Clone)]
pub struct TtrEstimate {
    pub minutes: i64,
    pub level: TtrLevel,
    /// Display form, e.g. "15 min" or "2 hours".
    pub label: String,
    pub trend: Trend,
}

/// Estimate time-to-risk for a fused score.
///
/// `prior_scores` are the patient's recent fused scores, newest first,
/// already bounded to the current admission. The window counts the score
/// being estimated, so `trend_window - 1` priors participate.
pub fn estimate(score: f64, prior_scores: &[f64], config: &EngineConfig) -> TtrEstimate {
    let bands = &config.ttr_bands;
    let base_index = bands
        .iter()
        .position(|band| score >= band.score_floor)
        .unwrap_or(bands.len().saturating_sub(1));

    let trend = trend_over_window(score, prior_scores, config);
    let index = match trend {
        Trend::Deteriorating => base_index.saturating_sub(1),
        Trend::Improving => (base_index + 1).min(bands.len().saturating_sub(1)),
        Trend::Flat => base_index,
    };

    let minutes = bands.get(index).map(|band| band.minutes).unwrap_or(FALLBACK_MINUTES);
    TtrEstimate { minutes, level: level_for(minutes), label: format_duration(minutes), trend }
}

/// Safety net for an empty band table in config.
const FALLBACK_MINUTES: i64 = 480;

/// Rolling delta of the current score against the oldest score in the
/// window. One band-step at most; the magnitude of the delta beyond the
/// threshold does not matter.
fn trend_over_window(score: f64, prior_scores: &[f64], config: &EngineConfig) -> Trend {
    let priors = config.trend_window.saturating_sub(1).min(prior_scores.len());
    if priors == 0 {
        return Trend::Flat;
    }
    let oldest = prior_scores[priors - 1];
    let delta = score - oldest;
    if delta >= config.deteriorating_delta {
        Trend::Deteriorating
    } else if delta <= config.improving_delta {
        Trend::Improving
    } else {
        Trend::Flat
    }
}

/// Level cutoffs: critical within 30 minutes, watch within 3 hours.
pub fn level_for(minutes: i64) -> TtrLevel {
    if minutes <= CRITICAL_WITHIN_MINUTES {
        TtrLevel::Critical
    } else if minutes <= WATCH_WITHIN_MINUTES {
        TtrLevel::Watch
    } else {
        TtrLevel::Safe
    }
}

/// Condition label shown on queue rows and assessments.
pub fn condition_label(urgency: UrgencyTier, level: TtrLevel, minutes: i64) -> &'static str {
    match level {
        TtrLevel::Critical => "Critical Decompensation",
        TtrLevel::Watch if urgency == UrgencyTier::High => "Observation Required",
        TtrLevel::Watch if minutes <= OBSERVATION_WITHIN_MINUTES => "Observation Required",
        TtrLevel::Watch => "Early Warning",
        TtrLevel::Safe => "Stable",
    }
}

/// "15 min", "1 hour", "2 hours", "1h 30m".
pub fn format_duration(minutes: i64) -> String {
    if minutes < 60 {
        return format!("{} min", minutes);
    }
    let hours = minutes / 60;
    let rem = minutes % 60;
    if rem == 0 {
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{} hours", hours)
        }
    } else {
        format!("{}h {}m", hours, rem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_lookup_covers_the_table() {
        let config = EngineConfig::default();
        let cases = [
            (95.0, 15),
            (90.0, 15),
            (85.0, 30),
            (70.0, 45),
            (50.0, 120),
            (30.0, 180),
            (15.0, 360),
            (5.0, 480),
        ];
        for (score, minutes) in cases {
            let result = estimate(score, &[], &config);
            assert_eq!(result.minutes, minutes, "score {score}");
            assert_eq!(result.trend, Trend::Flat);
        }
    }

    #[test]
    fn test_level_is_monotone_in_duration() {
        assert_eq!(level_for(15), TtrLevel::Critical);
        assert_eq!(level_for(30), TtrLevel::Critical);
        assert_eq!(level_for(45), TtrLevel::Watch);
        assert_eq!(level_for(180), TtrLevel::Watch);
        assert_eq!(level_for(181), TtrLevel::Safe);
        assert_eq!(level_for(480), TtrLevel::Safe);
    }

    #[test]
    fn test_deteriorating_trend_tightens_one_band() {
        let config = EngineConfig::default();
        // Oldest score in the window is 38; delta +12 crosses the threshold.
        let result = estimate(50.0, &[45.0, 38.0], &config);
        assert_eq!(result.trend, Trend::Deteriorating);
        assert_eq!(result.minutes, 45);
        assert_eq!(result.level, TtrLevel::Watch);
    }

    #[test]
    fn test_improving_trend_relaxes_one_band() {
        let config = EngineConfig::default();
        let result = estimate(50.0, &[55.0, 62.0], &config);
        assert_eq!(result.trend, Trend::Improving);
        assert_eq!(result.minutes, 180);
    }

    #[test]
    fn test_small_delta_keeps_the_base_band() {
        let config = EngineConfig::default();
        let result = estimate(50.0, &[48.0], &config);
        assert_eq!(result.trend, Trend::Flat);
        assert_eq!(result.minutes, 120);
    }

    #[test]
    fn test_trend_never_shifts_more_than_one_band() {
        let config = EngineConfig::default();
        // A 40-point jump is still a single band-step.
        let result = estimate(50.0, &[20.0, 10.0], &config);
        assert_eq!(result.minutes, 45);
    }

    #[test]
    fn test_shift_clamps_at_both_ends() {
        let config = EngineConfig::default();
        let top = estimate(95.0, &[70.0, 60.0], &config);
        assert_eq!(top.minutes, 15, "already in the shortest band");

        let bottom = estimate(5.0, &[30.0, 40.0], &config);
        assert_eq!(bottom.minutes, 480, "already in the longest band");
    }

    #[test]
    fn test_trend_ignores_scores_outside_the_window() {
        let config = EngineConfig::default();
        // Window 3 uses two priors; the 10.0 beyond it must not drive trend.
        let result = estimate(50.0, &[49.0, 48.0, 10.0], &config);
        assert_eq!(result.trend, Trend::Flat);
    }

    #[test]
    fn test_condition_labels() {
        assert_eq!(
            condition_label(UrgencyTier::High, TtrLevel::Critical, 15),
            "Critical Decompensation"
        );
        assert_eq!(
            condition_label(UrgencyTier::High, TtrLevel::Watch, 120),
            "Observation Required"
        );
        assert_eq!(
            condition_label(UrgencyTier::Medium, TtrLevel::Watch, 45),
            "Observation Required"
        );
        assert_eq!(condition_label(UrgencyTier::Medium, TtrLevel::Watch, 120), "Early Warning");
        assert_eq!(condition_label(UrgencyTier::Low, TtrLevel::Safe, 480), "Stable");
    }

    #[test]
    fn test_duration_formatting() {
        assert_eq!(format_duration(15), "15 min");
        assert_eq!(format_duration(45), "45 min");
        assert_eq!(format_duration(60), "1 hour");
        assert_eq!(format_duration(120), "2 hours");
        assert_eq!(format_duration(90), "1h 30m");
    }
}
