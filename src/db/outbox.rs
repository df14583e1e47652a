use rusqlite::params;

use super::*;
use crate::types::{AlertEvent, AlertSeverity, TtrLevel, UrgencyTier};

impl TriageDb {
    // =========================================================================
    // Alert outbox
    // =========================================================================
    //
    // Alerts are written here before any delivery attempt. The dispatcher
    // drains pending rows; the cool-down gate reads the newest row per
    // (patient, severity) so de-duplication survives a restart.

    /// Helper: map a row to `AlertEvent`.
    pub(crate) fn map_alert_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertEvent> {
        Ok(AlertEvent {
            id: row.get(0)?,
            patient_id: row.get(1)?,
            patient_name: row.get(2)?,
            severity: parse_enum::<AlertSeverity>(3, row.get(3)?)?,
            urgency: parse_enum::<UrgencyTier>(4, row.get(4)?)?,
            ttr_level: parse_enum::<TtrLevel>(5, row.get(5)?)?,
            risk_score: row.get(6)?,
            message: row.get(7)?,
            created_at: parse_timestamp(8, row.get(8)?)?,
        })
    }

    /// Queue an alert for delivery.
    pub fn insert_alert(&self, alert: &AlertEvent) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO alert_outbox (
                id, patient_id, patient_name, severity, urgency, ttr_level,
                risk_score, message, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                alert.id,
                alert.patient_id,
                alert.patient_name,
                alert.severity.as_str(),
                alert.urgency.as_str(),
                alert.ttr_level.as_str(),
                alert.risk_score,
                alert.message,
                alert.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Undelivered alerts, oldest first, for the dispatcher.
    pub fn pending_alerts(&self, limit: usize) -> Result<Vec<AlertEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, patient_name, severity, urgency, ttr_level,
                    risk_score, message, created_at
             FROM alert_outbox
             WHERE delivered_at IS NULL
             ORDER BY created_at
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::map_alert_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Acknowledge delivery. Returns whether the alert was still pending.
    pub fn mark_alert_delivered(&self, alert_id: &str) -> Result<bool, DbError> {
        let updated = self.conn.execute(
            "UPDATE alert_outbox
             SET delivered_at = ?1, last_error = NULL
             WHERE id = ?2 AND delivered_at IS NULL",
            params![Utc::now().to_rfc3339(), alert_id],
        )?;
        Ok(updated > 0)
    }

    /// Record a failed delivery attempt. The row stays pending; the channel
    /// owns retry policy.
    pub fn mark_alert_delivery_failed(&self, alert_id: &str, error: &str) -> Result<(), DbError> {
        self.conn.execute(
            "UPDATE alert_outbox
             SET delivery_attempts = delivery_attempts + 1, last_error = ?1
             WHERE id = ?2",
            params![error, alert_id],
        )?;
        Ok(())
    }

    /// Most recent alerts across all patients, newest first.
    pub fn recent_alerts(&self, limit: usize) -> Result<Vec<AlertEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, patient_id, patient_name, severity, urgency, ttr_level,
                    risk_score, message, created_at
             FROM alert_outbox
             ORDER BY created_at DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], Self::map_alert_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// When the newest alert of one severity was emitted for a patient, if
    /// ever. Drives the cool-down gate: each alert class cools down on its
    /// own, so a tier alert never mutes a later critical-horizon entry.
    pub fn last_alert_for_severity(
        &self,
        patient_id: &str,
        severity: AlertSeverity,
    ) -> Result<Option<DateTime<Utc>>, DbError> {
        let newest: Option<String> = self.conn.query_row(
            "SELECT MAX(created_at) FROM alert_outbox
             WHERE patient_id = ?1 AND severity = ?2",
            params![patient_id, severity.as_str()],
            |row| row.get(0),
        )?;
        Ok(parse_timestamp_opt(0, newest)?)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::test_db;
    use super::*;

    fn alert(id: &str, patient_id: &str, urgency: UrgencyTier, at: DateTime<Utc>) -> AlertEvent {
        AlertEvent {
            id: id.to_string(),
            patient_id: patient_id.to_string(),
            patient_name: "Rosa Vance".to_string(),
            severity: AlertSeverity::Warning,
            urgency,
            ttr_level: TtrLevel::Watch,
            risk_score: 72.0,
            message: "Urgency escalated to high".to_string(),
            created_at: at,
        }
    }

    #[test]
    fn test_pending_drains_oldest_first_until_delivered() {
        let db = test_db();
        let now = Utc::now();
        db.insert_alert(&alert("al-2", "pat-1", UrgencyTier::High, now)).expect("insert");
        db.insert_alert(&alert(
            "al-1",
            "pat-1",
            UrgencyTier::Medium,
            now - chrono::Duration::minutes(5),
        ))
        .expect("insert");

        let pending = db.pending_alerts(10).expect("pending");
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, "al-1");

        assert!(db.mark_alert_delivered("al-1").expect("deliver"));
        assert!(!db.mark_alert_delivered("al-1").expect("redeliver"));

        let pending = db.pending_alerts(10).expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "al-2");
    }

    #[test]
    fn test_failed_delivery_keeps_alert_pending() {
        let db = test_db();
        db.insert_alert(&alert("al-1", "pat-1", UrgencyTier::High, Utc::now())).expect("insert");

        db.mark_alert_delivery_failed("al-1", "channel unreachable").expect("mark failed");

        let pending = db.pending_alerts(10).expect("pending");
        assert_eq!(pending.len(), 1);

        let attempts: i64 = db
            .conn_ref()
            .query_row(
                "SELECT delivery_attempts FROM alert_outbox WHERE id = 'al-1'",
                [],
                |row| row.get(0),
            )
            .expect("attempts");
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_last_alert_scoped_to_patient_and_severity() {
        let db = test_db();
        let now = Utc::now();
        db.insert_alert(&alert(
            "al-1",
            "pat-1",
            UrgencyTier::High,
            now - chrono::Duration::minutes(10),
        ))
        .expect("insert");
        db.insert_alert(&alert("al-2", "pat-1", UrgencyTier::High, now)).expect("insert");

        let mut critical =
            alert("al-3", "pat-1", UrgencyTier::High, now - chrono::Duration::minutes(30));
        critical.severity = AlertSeverity::Critical;
        db.insert_alert(&critical).expect("insert");
        db.insert_alert(&alert("al-4", "pat-2", UrgencyTier::High, now)).expect("insert");

        let newest = db
            .last_alert_for_severity("pat-1", AlertSeverity::Warning)
            .expect("query")
            .expect("exists");
        assert!((newest - now).num_seconds().abs() <= 1);

        // The warnings do not shadow the older critical row
        let newest_critical = db
            .last_alert_for_severity("pat-1", AlertSeverity::Critical)
            .expect("query")
            .expect("exists");
        let critical_at = now - chrono::Duration::minutes(30);
        assert!((newest_critical - critical_at).num_seconds().abs() <= 1);

        assert!(db
            .last_alert_for_severity("pat-1", AlertSeverity::Info)
            .expect("query")
            .is_none());
        assert!(db
            .last_alert_for_severity("pat-9", AlertSeverity::Warning)
            .expect("query")
            .is_none());
    }

    #[test]
    fn test_recent_alerts_newest_first() {
        let db = test_db();
        let now = Utc::now();
        for i in 0..3 {
            db.insert_alert(&alert(
                &format!("al-{i}"),
                "pat-1",
                UrgencyTier::High,
                now - chrono::Duration::minutes(i),
            ))
            .expect("insert");
        }

        let recent = db.recent_alerts(2).expect("recent");
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "al-0");
        assert_eq!(recent[1].id, "al-1");
    }
}
