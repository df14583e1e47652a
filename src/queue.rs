//! Priority queue over monitored patients.
//!
//! One owned entry set with two read projections. The AI view orders by
//! ascending time-to-risk (ties: descending risk, then enqueue time); the
//! FIFO view orders by enqueue time alone and never looks at risk data.
//! Re-ranking one patient replaces that entry's fields in place and bumps
//! its version; no other entry is touched, so the relative order of every
//! other pair is preserved by construction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::types::{QueueEntry, RiskAssessment};

/// Thread-safe queue store. Exactly one active entry per monitored patient;
/// entries appear at admission and leave at discharge.
pub struct PatientQueue {
    entries: Mutex<HashMap<String, QueueEntry>>,
}

impl PatientQueue {
    pub fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }

    /// Rebuild the store from persisted rows at startup.
    pub fn restore(&self, rows: Vec<QueueEntry>) {
        let mut entries = self.entries.lock();
        for row in rows {
            entries.insert(row.patient_id.clone(), row);
        }
        log::info!("PatientQueue: restored {} entries", entries.len());
    }

    /// Admit a patient into the queue. Returns false (and changes nothing)
    /// if the patient already holds an entry.
    pub fn enqueue(&self, entry: QueueEntry) -> bool {
        let mut entries = self.entries.lock();
        if entries.contains_key(&entry.patient_id) {
            return false;
        }
        log::info!("PatientQueue: enqueued {}", entry.patient_id);
        entries.insert(entry.patient_id.clone(), entry);
        true
    }

    /// Re-rank one patient from a fresh assessment: replace the score
    /// fields, clear the stale flag, bump the version. The enqueue
    /// timestamp is preserved so the FIFO view is unaffected.
    ///
    /// Returns the updated entry for persistence, or None when the patient
    /// holds no entry (discharged mid-flight).
    pub fn apply_assessment(&self, assessment: &RiskAssessment) -> Option<QueueEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&assessment.patient_id)?;
        entry.risk_score = assessment.overall_risk_score;
        entry.urgency = assessment.urgency;
        entry.time_to_risk_minutes = assessment.time_to_risk_minutes;
        entry.ttr_level = assessment.ttr_level;
        entry.condition = assessment.condition.clone();
        entry.updated_at = assessment.created_at;
        entry.version += 1;
        entry.stale = false;
        log::debug!(
            "PatientQueue: re-ranked {} risk={:.1} ttr={}m v{}",
            entry.patient_id,
            entry.risk_score,
            entry.time_to_risk_minutes,
            entry.version
        );
        Some(entry.clone())
    }

    /// Flag one entry stale, keeping its scores authoritative. Returns the
    /// updated entry, or None when the patient holds no entry or the flag
    /// was already set.
    pub fn mark_stale(&self, patient_id: &str) -> Option<QueueEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(patient_id)?;
        if entry.stale {
            return None;
        }
        entry.stale = true;
        entry.version += 1;
        Some(entry.clone())
    }

    /// Administrative rename. Scores and both view positions are untouched.
    /// Returns the updated entry, or None when the patient holds no entry
    /// or the name already matches.
    pub fn rename(&self, patient_id: &str, display_name: &str) -> Option<QueueEntry> {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(patient_id)?;
        if entry.patient_name == display_name {
            return None;
        }
        entry.patient_name = display_name.to_string();
        entry.version += 1;
        Some(entry.clone())
    }

    /// Sweep: flag every fresh entry whose last update predates `cutoff`.
    /// Returns the newly flagged entries for persistence.
    pub fn flag_stale_older_than(&self, cutoff: DateTime<Utc>) -> Vec<QueueEntry> {
        let mut entries = self.entries.lock();
        let mut flagged = Vec::new();
        for entry in entries.values_mut() {
            if !entry.stale && entry.updated_at < cutoff {
                entry.stale = true;
                entry.version += 1;
                flagged.push(entry.clone());
            }
        }
        if !flagged.is_empty() {
            log::info!("PatientQueue: flagged {} entries stale", flagged.len());
        }
        flagged
    }

    /// Remove a patient at discharge. Terminal for that entry; a
    /// re-admission starts over with a fresh enqueue timestamp.
    pub fn dequeue(&self, patient_id: &str) -> Option<QueueEntry> {
        let removed = self.entries.lock().remove(patient_id);
        if removed.is_some() {
            log::info!("PatientQueue: dequeued {}", patient_id);
        }
        removed
    }

    pub fn get(&self, patient_id: &str) -> Option<QueueEntry> {
        self.entries.lock().get(patient_id).cloned()
    }

    /// AI-prioritized projection: soonest time-to-risk first.
    pub fn ai_view(&self) -> Vec<QueueEntry> {
        let mut rows: Vec<QueueEntry> = self.entries.lock().values().cloned().collect();
        rows.sort_by(|a, b| {
            a.time_to_risk_minutes
                .cmp(&b.time_to_risk_minutes)
                .then_with(|| {
                    b.risk_score.partial_cmp(&a.risk_score).unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.enqueued_at.cmp(&b.enqueued_at))
        });
        rows
    }

    /// FIFO projection: arrival order, independent of risk data.
    pub fn fifo_view(&self) -> Vec<QueueEntry> {
        let mut rows: Vec<QueueEntry> = self.entries.lock().values().cloned().collect();
        rows.sort_by(|a, b| {
            a.enqueued_at.cmp(&b.enqueued_at).then_with(|| a.patient_id.cmp(&b.patient_id))
        });
        rows
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for PatientQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait time shown on queue rows: "Just now", "25m", "1h 10m".
pub fn format_wait(enqueued_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - enqueued_at).num_seconds().max(0);
    if elapsed < 60 {
        return "Just now".to_string();
    }
    let minutes = elapsed / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }
    format!("{}h {}m", minutes / 60, minutes % 60)
}
