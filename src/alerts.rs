//! Alerting gate and delivery.
//!
//! The gate fires on state transitions only: an urgency tier increase, or the
//! first entry into the critical time-to-risk horizon. Staying high never
//! re-alerts, and a per-(patient, severity) cool-down absorbs oscillation
//! around a boundary. Each alert class cools down independently, so a recent
//! tier alert never mutes a first critical-horizon entry. Every emitted alert
//! lands in the outbox before any delivery attempt; a dispatcher task drains
//! pending rows through a pluggable channel, so a failed delivery is retried
//! on the next sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::db::TriageDb;
use crate::error::EngineError;
use crate::state::EngineState;
use crate::ttr;
use crate::types::{
    AlertEvent, AlertSeverity, EngineConfig, RiskAssessment, TtrLevel, UrgencyTier,
};

/// Poll interval for the dispatcher loop.
const DISPATCH_INTERVAL_SECS: u64 = 5;

/// Maximum alerts drained per sweep.
const DISPATCH_BATCH: usize = 32;

// =============================================================================
// Gate
// =============================================================================

/// Severity of the transition from the prior assessment to the new one, or
/// `None` when the change does not warrant an alert.
///
/// A patient with no prior assessment is treated as (low, safe), so a first
/// assessment that lands high still fires.
pub fn evaluate_transition(
    prior: Option<(UrgencyTier, TtrLevel)>,
    assessment: &RiskAssessment,
) -> Option<AlertSeverity> {
    let (prior_urgency, prior_level) = prior.unwrap_or((UrgencyTier::Low, TtrLevel::Safe));

    // Entry into the critical horizon outranks a plain tier change.
    if assessment.ttr_level == TtrLevel::Critical && prior_level != TtrLevel::Critical {
        return Some(AlertSeverity::Critical);
    }

    if assessment.urgency > prior_urgency {
        return Some(match assessment.urgency {
            UrgencyTier::High => AlertSeverity::Warning,
            _ => AlertSeverity::Info,
        });
    }

    None
}

/// Cool-down window for a candidate alert. Critical alerts use the fixed
/// configured window; everything else scales with the TTR band, so a patient
/// predicted to deteriorate sooner may re-alert sooner.
fn cooldown_window_secs(severity: AlertSeverity, band_minutes: i64, config: &EngineConfig) -> i64 {
    match severity {
        AlertSeverity::Critical => config.critical_cooldown_secs,
        _ => (band_minutes * 60 / config.cooldown_band_divisor.max(1)).max(1),
    }
}

fn alert_message(severity: AlertSeverity, assessment: &RiskAssessment, patient_name: &str) -> String {
    let horizon = ttr::format_duration(assessment.time_to_risk_minutes);
    match severity {
        AlertSeverity::Critical => {
            format!("{patient_name} likely to deteriorate within {horizon}")
        }
        _ => format!(
            "{patient_name} urgency escalated to {}, time-to-risk {horizon}",
            assessment.urgency
        ),
    }
}

/// Run the gate for a fresh assessment: evaluate the transition, apply the
/// cool-down, then persist to the outbox and push onto the in-process stream.
///
/// Returns the emitted alert, or `None` when the gate stayed closed. The
/// caller already holds the database lock, so this takes the handle directly.
pub fn gate_and_emit(
    db: &TriageDb,
    config: &EngineConfig,
    alert_tx: &mpsc::UnboundedSender<AlertEvent>,
    prior: Option<(UrgencyTier, TtrLevel)>,
    assessment: &RiskAssessment,
    patient_name: &str,
) -> Result<Option<AlertEvent>, EngineError> {
    let severity = match evaluate_transition(prior, assessment) {
        Some(severity) => severity,
        None => return Ok(None),
    };

    let window = cooldown_window_secs(severity, assessment.time_to_risk_minutes, config);
    if let Some(last) = db.last_alert_for_severity(&assessment.patient_id, severity)? {
        let elapsed = (assessment.created_at - last).num_seconds();
        if elapsed < window {
            log::debug!(
                "Alerts: suppressed {} alert for {} ({}s into {}s cool-down)",
                severity.as_str(),
                assessment.patient_id,
                elapsed,
                window
            );
            return Ok(None);
        }
    }

    let event = AlertEvent {
        id: format!("alr-{}", uuid::Uuid::new_v4()),
        patient_id: assessment.patient_id.clone(),
        patient_name: patient_name.to_string(),
        severity,
        urgency: assessment.urgency,
        ttr_level: assessment.ttr_level,
        risk_score: assessment.overall_risk_score,
        message: alert_message(severity, assessment, patient_name),
        created_at: assessment.created_at,
    };

    db.insert_alert(&event)?;
    if alert_tx.send(event.clone()).is_err() {
        // Stream consumer gone. The outbox still holds the alert for delivery.
        log::debug!("Alerts: stream receiver dropped, alert {} kept in outbox", event.id);
    }

    log::info!(
        "Alerts: {} for {}: {}",
        event.severity.as_str(),
        event.patient_id,
        event.message
    );
    Ok(Some(event))
}

// =============================================================================
// Delivery channels
// =============================================================================

/// Delivery target for alerts drained from the outbox.
#[async_trait::async_trait]
pub trait AlertChannel: Send + Sync {
    /// Channel name, for delivery logging.
    fn name(&self) -> &str;

    /// Deliver one alert. An `Err` keeps the alert pending for retry.
    async fn deliver(&self, alert: &AlertEvent) -> Result<(), EngineError>;
}

/// Structured-log delivery, the shipped default.
pub struct LogChannel;

#[async_trait::async_trait]
impl AlertChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, alert: &AlertEvent) -> Result<(), EngineError> {
        log::info!(
            "[ALERT {}] {} (risk {:.1}, urgency {}, ttr {})",
            alert.severity.as_str(),
            alert.message,
            alert.risk_score,
            alert.urgency,
            alert.ttr_level
        );
        Ok(())
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Background task draining the alert outbox through a delivery channel.
pub struct AlertDispatcher {
    state: Arc<EngineState>,
    channel: Box<dyn AlertChannel>,
}

impl AlertDispatcher {
    pub fn new(state: Arc<EngineState>, channel: Box<dyn AlertChannel>) -> Self {
        Self { state, channel }
    }

    /// Run indefinitely, sweeping the outbox every few seconds.
    pub async fn run(&self) {
        loop {
            tokio::time::sleep(Duration::from_secs(DISPATCH_INTERVAL_SECS)).await;
            if let Err(e) = self.drain_once().await {
                log::warn!("Alerts: dispatch sweep failed: {e}");
            }
        }
    }

    /// Deliver every pending alert once, oldest first. Returns how many were
    /// delivered; failures stay pending with the error recorded.
    pub async fn drain_once(&self) -> Result<usize, EngineError> {
        let pending = { self.state.db.lock().pending_alerts(DISPATCH_BATCH)? };
        if pending.is_empty() {
            return Ok(0);
        }

        let mut delivered = 0;
        for alert in pending {
            match self.channel.deliver(&alert).await {
                Ok(()) => {
                    if self.state.db.lock().mark_alert_delivered(&alert.id)? {
                        delivered += 1;
                    }
                }
                Err(e) => {
                    log::warn!(
                        "Alerts: delivery of {} via {} failed: {e}",
                        alert.id,
                        self.channel.name()
                    );
                    self.state.db.lock().mark_alert_delivery_failed(&alert.id, &e.to_string())?;
                }
            }
        }

        log::debug!("Alerts: delivered {delivered} pending alerts");
        Ok(delivered)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_utils::test_state;
    use chrono::Utc;

    fn assessment(
        patient_id: &str,
        score: f64,
        urgency: UrgencyTier,
        minutes: i64,
        level: TtrLevel,
    ) -> RiskAssessment {
        RiskAssessment {
            id: "asm-1".to_string(),
            patient_id: patient_id.to_string(),
            overall_risk_score: score,
            urgency,
            time_to_risk_minutes: minutes,
            ttr_level: level,
            condition: "Observation Required".to_string(),
            recommendation: "Continue monitoring".to_string(),
            signals: Vec::new(),
            rationale: "vitals 72 (weight 1.00)".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_high_assessment_fires_warning() {
        let new = assessment("pat-1", 72.0, UrgencyTier::High, 45, TtrLevel::Watch);
        assert_eq!(evaluate_transition(None, &new), Some(AlertSeverity::Warning));
    }

    #[test]
    fn test_increase_to_medium_fires_info() {
        let new = assessment("pat-1", 48.0, UrgencyTier::Medium, 120, TtrLevel::Watch);
        let prior = Some((UrgencyTier::Low, TtrLevel::Safe));
        assert_eq!(evaluate_transition(prior, &new), Some(AlertSeverity::Info));
    }

    #[test]
    fn test_entering_critical_horizon_fires_critical() {
        let new = assessment("pat-1", 91.0, UrgencyTier::High, 15, TtrLevel::Critical);
        let prior = Some((UrgencyTier::High, TtrLevel::Watch));
        assert_eq!(evaluate_transition(prior, &new), Some(AlertSeverity::Critical));
    }

    #[test]
    fn test_steady_state_and_decrease_stay_silent() {
        let steady = assessment("pat-1", 75.0, UrgencyTier::High, 45, TtrLevel::Watch);
        assert_eq!(evaluate_transition(Some((UrgencyTier::High, TtrLevel::Watch)), &steady), None);

        let calmer = assessment("pat-1", 42.0, UrgencyTier::Medium, 120, TtrLevel::Watch);
        assert_eq!(evaluate_transition(Some((UrgencyTier::High, TtrLevel::Watch)), &calmer), None);

        let still_critical = assessment("pat-1", 93.0, UrgencyTier::High, 15, TtrLevel::Critical);
        assert_eq!(
            evaluate_transition(Some((UrgencyTier::High, TtrLevel::Critical)), &still_critical),
            None
        );
    }

    #[test]
    fn test_gate_emits_once_then_cools_down() {
        let (state, mut rx) = test_state();
        let db = state.db.lock();
        let config = EngineConfig::default();

        let first = assessment("pat-1", 72.0, UrgencyTier::High, 45, TtrLevel::Watch);
        let emitted = gate_and_emit(&db, &config, &state.alert_tx, None, &first, "Rosa Vance")
            .expect("gate");
        let emitted = emitted.expect("first transition should alert");
        assert_eq!(emitted.severity, AlertSeverity::Warning);
        assert!(emitted.message.contains("urgency escalated to high"));
        assert_eq!(rx.try_recv().expect("stream push").id, emitted.id);

        // Oscillation: dropped to medium (silent), then back to high inside
        // the cool-down window.
        let back_up = assessment("pat-1", 74.0, UrgencyTier::High, 45, TtrLevel::Watch);
        let suppressed = gate_and_emit(
            &db,
            &config,
            &state.alert_tx,
            Some((UrgencyTier::Medium, TtrLevel::Watch)),
            &back_up,
            "Rosa Vance",
        )
        .expect("gate");
        assert!(suppressed.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_gate_fires_again_after_cooldown_expires() {
        let (state, _rx) = test_state();
        let config = EngineConfig::default();

        // Seed an old high-tier alert well past any cool-down window.
        let seeded = AlertEvent {
            id: "alr-old".to_string(),
            patient_id: "pat-1".to_string(),
            patient_name: "Rosa Vance".to_string(),
            severity: AlertSeverity::Warning,
            urgency: UrgencyTier::High,
            ttr_level: TtrLevel::Watch,
            risk_score: 72.0,
            message: "Rosa Vance urgency escalated to high, time-to-risk 45 min".to_string(),
            created_at: Utc::now() - chrono::Duration::hours(2),
        };
        state.db.lock().insert_alert(&seeded).expect("seed");

        let fresh = assessment("pat-1", 76.0, UrgencyTier::High, 45, TtrLevel::Watch);
        let db = state.db.lock();
        let emitted = gate_and_emit(
            &db,
            &config,
            &state.alert_tx,
            Some((UrgencyTier::Medium, TtrLevel::Watch)),
            &fresh,
            "Rosa Vance",
        )
        .expect("gate");
        assert!(emitted.is_some());
    }

    #[test]
    fn test_critical_entry_not_muted_by_recent_warning() {
        let (state, mut rx) = test_state();
        let db = state.db.lock();
        let config = EngineConfig::default();

        // Medium -> high fires a warning; two minutes later the horizon
        // collapses into critical while the tier stays high.
        let mut warning = assessment("pat-1", 72.0, UrgencyTier::High, 45, TtrLevel::Watch);
        warning.created_at = Utc::now() - chrono::Duration::minutes(4);
        let emitted = gate_and_emit(
            &db,
            &config,
            &state.alert_tx,
            Some((UrgencyTier::Medium, TtrLevel::Watch)),
            &warning,
            "Rosa Vance",
        )
        .expect("gate")
        .expect("tier increase should alert");
        assert_eq!(emitted.severity, AlertSeverity::Warning);

        // A different alert class: the warning's cool-down must not apply.
        let mut critical = assessment("pat-1", 85.0, UrgencyTier::High, 30, TtrLevel::Critical);
        critical.created_at = Utc::now() - chrono::Duration::minutes(2);
        let emitted = gate_and_emit(
            &db,
            &config,
            &state.alert_tx,
            Some((UrgencyTier::High, TtrLevel::Watch)),
            &critical,
            "Rosa Vance",
        )
        .expect("gate")
        .expect("first entry into the critical horizon must alert");
        assert_eq!(emitted.severity, AlertSeverity::Critical);
        assert_eq!(rx.try_recv().expect("warning push").severity, AlertSeverity::Warning);
        assert_eq!(rx.try_recv().expect("critical push").severity, AlertSeverity::Critical);

        // Oscillating out of and back into the horizon stays muted by the
        // critical cool-down itself.
        let back_in = assessment("pat-1", 86.0, UrgencyTier::High, 30, TtrLevel::Critical);
        let suppressed = gate_and_emit(
            &db,
            &config,
            &state.alert_tx,
            Some((UrgencyTier::High, TtrLevel::Watch)),
            &back_in,
            "Rosa Vance",
        )
        .expect("gate");
        assert!(suppressed.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_critical_message_names_the_horizon() {
        let new = assessment("pat-1", 92.0, UrgencyTier::High, 15, TtrLevel::Critical);
        let message = alert_message(AlertSeverity::Critical, &new, "Rosa Vance");
        assert_eq!(message, "Rosa Vance likely to deteriorate within 15 min");
    }

    #[test]
    fn test_cooldown_windows() {
        let config = EngineConfig::default();
        assert_eq!(cooldown_window_secs(AlertSeverity::Critical, 15, &config), 300);
        // Non-critical scales with the band: 45 min band / 4.
        assert_eq!(cooldown_window_secs(AlertSeverity::Warning, 45, &config), 675);
        assert_eq!(cooldown_window_secs(AlertSeverity::Info, 120, &config), 1800);
    }

    #[tokio::test]
    async fn test_dispatcher_drains_outbox() {
        let (state, _rx) = test_state();
        let state = Arc::new(state);

        let event = AlertEvent {
            id: "alr-1".to_string(),
            patient_id: "pat-1".to_string(),
            patient_name: "Rosa Vance".to_string(),
            severity: AlertSeverity::Warning,
            urgency: UrgencyTier::High,
            ttr_level: TtrLevel::Watch,
            risk_score: 72.0,
            message: "Rosa Vance urgency escalated to high, time-to-risk 45 min".to_string(),
            created_at: Utc::now(),
        };
        state.db.lock().insert_alert(&event).expect("insert");

        let dispatcher = AlertDispatcher::new(state.clone(), Box::new(LogChannel));
        assert_eq!(dispatcher.drain_once().await.expect("drain"), 1);
        assert_eq!(dispatcher.drain_once().await.expect("drain"), 0);
        assert!(state.db.lock().pending_alerts(10).expect("pending").is_empty());
    }

    #[tokio::test]
    async fn test_failed_delivery_stays_pending() {
        struct DownChannel;

        #[async_trait::async_trait]
        impl AlertChannel for DownChannel {
            fn name(&self) -> &str {
                "down"
            }

            async fn deliver(&self, _alert: &AlertEvent) -> Result<(), EngineError> {
                Err(EngineError::DeliveryFailure("channel unreachable".to_string()))
            }
        }

        let (state, _rx) = test_state();
        let state = Arc::new(state);
        let event = AlertEvent {
            id: "alr-1".to_string(),
            patient_id: "pat-1".to_string(),
            patient_name: "Rosa Vance".to_string(),
            severity: AlertSeverity::Critical,
            urgency: UrgencyTier::High,
            ttr_level: TtrLevel::Critical,
            risk_score: 92.0,
            message: "Rosa Vance likely to deteriorate within 15 min".to_string(),
            created_at: Utc::now(),
        };
        state.db.lock().insert_alert(&event).expect("insert");

        let dispatcher = AlertDispatcher::new(state.clone(), Box::new(DownChannel));
        assert_eq!(dispatcher.drain_once().await.expect("drain"), 0);

        let pending = state.db.lock().pending_alerts(10).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "alr-1");
    }
}
