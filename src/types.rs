use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

// =============================================================================
// Patients
// =============================================================================

/// Static comorbidity flags used as risk multipliers during fusion.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ComorbidityProfile {
    #[serde(default)]
    pub renal_disease: bool,
    #[serde(default)]
    pub diabetes: bool,
    #[serde(default)]
    pub cardiac_disease: bool,
    #[serde(default)]
    pub immunocompromised: bool,
}

impl ComorbidityProfile {
    /// True when any high-risk flag is set.
    pub fn any_flagged(&self) -> bool {
        self.renal_disease || self.diabetes || self.cardiac_disease || self.immunocompromised
    }

    /// Human-readable list of the set flags, for rationale text.
    pub fn flagged_labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.renal_disease {
            labels.push("renal disease");
        }
        if self.diabetes {
            labels.push("diabetes");
        }
        if self.cardiac_disease {
            labels.push("cardiac disease");
        }
        if self.immunocompromised {
            labels.push("immunocompromised");
        }
        labels
    }
}

/// A monitored patient. Created at intake, mutated only by administrative
/// update, never deleted while under active monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientRecord {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub comorbidities: ComorbidityProfile,
    pub admitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discharged_at: Option<DateTime<Utc>>,
}

impl PatientRecord {
    pub fn is_active(&self) -> bool {
        self.discharged_at.is_none()
    }
}

// =============================================================================
// Modality samples
// =============================================================================

/// Signal modality identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Vitals,
    Face,
    Voice,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Vitals => "vitals",
            Modality::Face => "face",
            Modality::Voice => "voice",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vitals" => Ok(Modality::Vitals),
            "face" => Ok(Modality::Face),
            "voice" => Ok(Modality::Voice),
            _ => Err(format!("Unknown modality: {}", s)),
        }
    }
}

/// Capture quality for a vitals reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VitalsQuality {
    Ok,
    /// Monitor disconnect or implausible sensor output.
    Unusable,
}

impl VitalsQuality {
    pub fn degraded_reason(&self) -> Option<&'static str> {
        match self {
            VitalsQuality::Ok => None,
            VitalsQuality::Unusable => Some("vitals capture unusable"),
        }
    }
}

/// Capture quality reported by the upstream face analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceQuality {
    Ok,
    LowLight,
    TooFar,
    NoFace,
    Unusable,
}

impl FaceQuality {
    /// Reason string carried into rationale text for degraded captures.
    pub fn degraded_reason(&self) -> Option<&'static str> {
        match self {
            FaceQuality::Ok => None,
            FaceQuality::LowLight => Some("low light"),
            FaceQuality::TooFar => Some("subject too far from camera"),
            FaceQuality::NoFace => Some("no face detected"),
            FaceQuality::Unusable => Some("face capture unusable"),
        }
    }
}

/// Capture quality reported by the upstream voice analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceQuality {
    Ok,
    NoSpeech,
    Unusable,
}

impl VoiceQuality {
    pub fn degraded_reason(&self) -> Option<&'static str> {
        match self {
            VoiceQuality::Ok => None,
            VoiceQuality::NoSpeech => Some("no speech detected"),
            VoiceQuality::Unusable => Some("voice capture unusable"),
        }
    }
}

/// One set of vital signs from a monitor or intake form.
///
/// Pain and fatigue are optional 0-10 self-reports. They are validated and
/// echoed in rationale text but excluded from the deviation score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VitalsReading {
    pub heart_rate: f64,
    pub spo2: f64,
    pub systolic: f64,
    pub diastolic: f64,
    pub temperature: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pain: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatigue: Option<f64>,
}

/// Emotion label from the upstream face analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionLabel {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fear,
    Disgust,
    Surprise,
}

impl EmotionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionLabel::Neutral => "neutral",
            EmotionLabel::Happy => "happy",
            EmotionLabel::Sad => "sad",
            EmotionLabel::Angry => "angry",
            EmotionLabel::Fear => "fear",
            EmotionLabel::Disgust => "disgust",
            EmotionLabel::Surprise => "surprise",
        }
    }
}

/// Tagged per-modality payload. Each variant carries its own quality flag;
/// an unusable capture must never be read as a numeric score.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "modality", rename_all = "lowercase")]
pub enum SamplePayload {
    #[serde(rename_all = "camelCase")]
    Vitals {
        reading: VitalsReading,
        quality: VitalsQuality,
    },
    #[serde(rename_all = "camelCase")]
    Face {
        /// Upstream fatigue index in [0,100].
        fatigue_index: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emotion: Option<EmotionLabel>,
        quality: FaceQuality,
    },
    #[serde(rename_all = "camelCase")]
    Voice {
        /// Upstream stress score in [0,100].
        stress_score: f64,
        /// Average pitch in Hz, carried for display only.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pitch_avg: Option<f64>,
        quality: VoiceQuality,
    },
}

impl SamplePayload {
    pub fn modality(&self) -> Modality {
        match self {
            SamplePayload::Vitals { .. } => Modality::Vitals,
            SamplePayload::Face { .. } => Modality::Face,
            SamplePayload::Voice { .. } => Modality::Voice,
        }
    }
}

/// One capture event for one patient. Immutable once recorded; per-patient
/// history is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalitySample {
    pub id: String,
    pub patient_id: String,
    pub captured_at: DateTime<Utc>,
    pub payload: SamplePayload,
    /// Content digest over (patient, capture time, payload) for duplicate
    /// detection.
    pub digest: String,
}

// =============================================================================
// Normalized signals
// =============================================================================

/// Output of the normalizer for one modality: either a bounded sub-score or
/// an explicit non-contributing marker with the reason preserved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NormalizedSignal {
    #[serde(rename_all = "camelCase")]
    Score {
        modality: Modality,
        /// Sub-score in [0,100].
        value: f64,
        rationale: String,
    },
    #[serde(rename_all = "camelCase")]
    NotContributing {
        modality: Modality,
        reason: String,
    },
}

impl NormalizedSignal {
    pub fn modality(&self) -> Modality {
        match self {
            NormalizedSignal::Score { modality, .. } => *modality,
            NormalizedSignal::NotContributing { modality, .. } => *modality,
        }
    }

    pub fn is_contributing(&self) -> bool {
        matches!(self, NormalizedSignal::Score { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            NormalizedSignal::Score { value, .. } => Some(*value),
            NormalizedSignal::NotContributing { .. } => None,
        }
    }
}

// =============================================================================
// Risk assessments
// =============================================================================

/// Qualitative urgency tier derived from the fused risk score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrgencyTier {
    Low,
    Medium,
    High,
}

impl UrgencyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyTier::Low => "low",
            UrgencyTier::Medium => "medium",
            UrgencyTier::High => "high",
        }
    }
}

impl std::fmt::Display for UrgencyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for UrgencyTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(UrgencyTier::Low),
            "medium" => Ok(UrgencyTier::Medium),
            "high" => Ok(UrgencyTier::High),
            _ => Err(format!("Unknown urgency tier: {}", s)),
        }
    }
}

/// Discrete time-to-risk level. Deterministic, monotone function of the
/// predicted duration; never set independently of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtrLevel {
    Safe,
    Watch,
    Critical,
}

impl TtrLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            TtrLevel::Safe => "safe",
            TtrLevel::Watch => "watch",
            TtrLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for TtrLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TtrLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(TtrLevel::Safe),
            "watch" => Ok(TtrLevel::Watch),
            "critical" => Ok(TtrLevel::Critical),
            _ => Err(format!("Unknown ttr level: {}", s)),
        }
    }
}

/// Fusion output at a point in time. Append-only history per patient,
/// ordered by timestamp, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub id: String,
    pub patient_id: String,
    /// Fused risk in [0,100].
    pub overall_risk_score: f64,
    pub urgency: UrgencyTier,
    /// Predicted minutes until deterioration.
    pub time_to_risk_minutes: i64,
    pub ttr_level: TtrLevel,
    pub condition: String,
    pub recommendation: String,
    /// Per-modality contributions, including non-contributing markers.
    pub signals: Vec<NormalizedSignal>,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Queue entries
// =============================================================================

/// Live queue row for one monitored patient. Exactly one active entry per
/// patient; score fields are replaced atomically on each new assessment and
/// the version counter bumps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub patient_id: String,
    pub patient_name: String,
    pub risk_score: f64,
    pub urgency: UrgencyTier,
    pub time_to_risk_minutes: i64,
    pub ttr_level: TtrLevel,
    pub condition: String,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
    /// Set when the latest ingest could not produce a fresh assessment.
    #[serde(default)]
    pub stale: bool,
}

// =============================================================================
// Alerts
// =============================================================================

/// Alert severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    Info,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        }
    }
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(AlertSeverity::Critical),
            "warning" => Ok(AlertSeverity::Warning),
            "info" => Ok(AlertSeverity::Info),
            _ => Err(format!("Unknown alert severity: {}", s)),
        }
    }
}

/// An alert emitted by the gate. Persisted to the delivery outbox and pushed
/// onto the in-process stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub id: String,
    pub patient_id: String,
    pub patient_name: String,
    pub severity: AlertSeverity,
    pub urgency: UrgencyTier,
    pub ttr_level: TtrLevel,
    pub risk_score: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Engine configuration
// =============================================================================

/// One row of the time-to-risk band table: fused scores at or above
/// `score_floor` map to `minutes`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TtrBand {
    pub score_floor: f64,
    pub minutes: i64,
}

/// Configuration stored in ~/.triagecore/config.json.
///
/// Every field has a default so an empty file (or no file) yields the
/// shipped behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Base fusion weights. Non-contributing weight is redistributed
    /// proportionally across the contributing modalities.
    #[serde(default = "default_vitals_weight")]
    pub vitals_weight: f64,
    #[serde(default = "default_face_weight")]
    pub face_weight: f64,
    #[serde(default = "default_voice_weight")]
    pub voice_weight: f64,

    /// Added once when a flagged comorbidity coincides with a tightened
    /// vital threshold crossing.
    #[serde(default = "default_escalation_bonus")]
    pub escalation_bonus: f64,

    /// Floor applied to the fused score when any single contributing
    /// modality crosses its critical line.
    #[serde(default = "default_critical_override_floor")]
    pub critical_override_floor: f64,
    #[serde(default = "default_vitals_critical_line")]
    pub vitals_critical_line: f64,
    #[serde(default = "default_face_critical_line")]
    pub face_critical_line: f64,
    #[serde(default = "default_voice_critical_line")]
    pub voice_critical_line: f64,

    /// Urgency tier floors: high at or above, medium at or above, else low.
    #[serde(default = "default_high_urgency_floor")]
    pub high_urgency_floor: f64,
    #[serde(default = "default_medium_urgency_floor")]
    pub medium_urgency_floor: f64,

    /// Fused scores strictly above this carry the "Immediate attention
    /// required" recommendation.
    #[serde(default = "default_immediate_attention_line")]
    pub immediate_attention_line: f64,

    /// Ordered band table, highest floor first.
    #[serde(default = "default_ttr_bands")]
    pub ttr_bands: Vec<TtrBand>,

    /// Rolling trend window (number of recent assessments, including the
    /// one being computed).
    #[serde(default = "default_trend_window")]
    pub trend_window: usize,
    /// Score delta across the window that shifts the band one step shorter.
    #[serde(default = "default_deteriorating_delta")]
    pub deteriorating_delta: f64,
    /// Score delta across the window that shifts the band one step longer.
    #[serde(default = "default_improving_delta")]
    pub improving_delta: f64,

    /// Cool-down for repeated critical alerts per patient.
    #[serde(default = "default_critical_cooldown_secs")]
    pub critical_cooldown_secs: i64,
    /// Non-critical cool-down is the entry's TTR band divided by this.
    #[serde(default = "default_cooldown_band_divisor")]
    pub cooldown_band_divisor: i64,

    /// Upstream scorer timeout. On elapse the sample is recorded as
    /// unusable instead of blocking ingest.
    #[serde(default = "default_scorer_timeout_ms")]
    pub scorer_timeout_ms: u64,

    /// Staleness sweep cadence for the background monitor.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Entries with no fresh assessment inside this window are flagged stale.
    #[serde(default = "default_reassess_after_secs")]
    pub reassess_after_secs: i64,

    /// Override for the database location (used by ops tooling).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<String>,
}

fn default_vitals_weight() -> f64 {
    0.6
}
fn default_face_weight() -> f64 {
    0.2
}
fn default_voice_weight() -> f64 {
    0.2
}
fn default_escalation_bonus() -> f64 {
    20.0
}
fn default_critical_override_floor() -> f64 {
    85.0
}
fn default_vitals_critical_line() -> f64 {
    90.0
}
fn default_face_critical_line() -> f64 {
    80.0
}
fn default_voice_critical_line() -> f64 {
    80.0
}
fn default_high_urgency_floor() -> f64 {
    70.0
}
fn default_medium_urgency_floor() -> f64 {
    40.0
}
fn default_immediate_attention_line() -> f64 {
    80.0
}

fn default_ttr_bands() -> Vec<TtrBand> {
    vec![
        TtrBand { score_floor: 90.0, minutes: 15 },
        TtrBand { score_floor: 80.0, minutes: 30 },
        TtrBand { score_floor: 65.0, minutes: 45 },
        TtrBand { score_floor: 45.0, minutes: 120 },
        TtrBand { score_floor: 25.0, minutes: 180 },
        TtrBand { score_floor: 10.0, minutes: 360 },
        TtrBand { score_floor: 0.0, minutes: 480 },
    ]
}

fn default_trend_window() -> usize {
    3
}
fn default_deteriorating_delta() -> f64 {
    10.0
}
fn default_improving_delta() -> f64 {
    -10.0
}
fn default_critical_cooldown_secs() -> i64 {
    300
}
fn default_cooldown_band_divisor() -> i64 {
    4
}
fn default_scorer_timeout_ms() -> u64 {
    1500
}
fn default_monitor_interval_secs() -> u64 {
    60
}
fn default_reassess_after_secs() -> i64 {
    900
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vitals_weight: default_vitals_weight(),
            face_weight: default_face_weight(),
            voice_weight: default_voice_weight(),
            escalation_bonus: default_escalation_bonus(),
            critical_override_floor: default_critical_override_floor(),
            vitals_critical_line: default_vitals_critical_line(),
            face_critical_line: default_face_critical_line(),
            voice_critical_line: default_voice_critical_line(),
            high_urgency_floor: default_high_urgency_floor(),
            medium_urgency_floor: default_medium_urgency_floor(),
            immediate_attention_line: default_immediate_attention_line(),
            ttr_bands: default_ttr_bands(),
            trend_window: default_trend_window(),
            deteriorating_delta: default_deteriorating_delta(),
            improving_delta: default_improving_delta(),
            critical_cooldown_secs: default_critical_cooldown_secs(),
            cooldown_band_divisor: default_cooldown_band_divisor(),
            scorer_timeout_ms: default_scorer_timeout_ms(),
            monitor_interval_secs: default_monitor_interval_secs(),
            reassess_after_secs: default_reassess_after_secs(),
            database_path: None,
        }
    }
}

impl EngineConfig {
    /// Base weight for a modality.
    pub fn weight_for(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Vitals => self.vitals_weight,
            Modality::Face => self.face_weight,
            Modality::Voice => self.voice_weight,
        }
    }

    /// Critical line for a modality sub-score (exclusive).
    pub fn critical_line_for(&self, modality: Modality) -> f64 {
        match modality {
            Modality::Vitals => self.vitals_critical_line,
            Modality::Face => self.face_critical_line,
            Modality::Voice => self.voice_critical_line,
        }
    }

    /// Reject values the fusion and estimation math cannot run on. Applied
    /// both to runtime config changes and to the file loaded at startup.
    pub fn validate(&self) -> Result<(), EngineError> {
        let weights = [
            ("vitalsWeight", self.vitals_weight),
            ("faceWeight", self.face_weight),
            ("voiceWeight", self.voice_weight),
        ];
        for (label, weight) in weights {
            if !weight.is_finite() || weight < 0.0 {
                return Err(EngineError::Configuration(format!(
                    "{label} must be a non-negative number, got {weight}"
                )));
            }
        }
        if self.vitals_weight + self.face_weight + self.voice_weight <= 0.0 {
            return Err(EngineError::Configuration(
                "fusion weights must sum to a positive number".to_string(),
            ));
        }
        if self.trend_window == 0 {
            return Err(EngineError::Configuration("trendWindow must be at least 1".to_string()));
        }
        if self.ttr_bands.is_empty() {
            return Err(EngineError::Configuration("ttrBands must not be empty".to_string()));
        }
        if self.cooldown_band_divisor <= 0 {
            return Err(EngineError::Configuration(
                "cooldownBandDivisor must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
