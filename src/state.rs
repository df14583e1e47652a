//! Shared engine state: database handle, configuration, the live queue, and
//! the alert stream sender.
//!
//! Everything is owned here and shared behind locks. The database sits behind
//! a `parking_lot::Mutex` (SQLite connections are not `Sync`); per-patient
//! ingest ordering uses a `DashMap` of async mutexes because those are held
//! across await points in the pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::db::TriageDb;
use crate::error::EngineError;
use crate::queue::PatientQueue;
use crate::types::{AlertEvent, EngineConfig};

/// Engine state shared by the API surface and the background tasks.
pub struct EngineState {
    pub db: Mutex<TriageDb>,
    pub config: Mutex<EngineConfig>,
    pub queue: PatientQueue,
    /// Sending half of the alert stream. The dispatcher owns the receiver.
    pub alert_tx: mpsc::UnboundedSender<AlertEvent>,
    /// Per-patient ingest locks: samples for one patient apply in arrival
    /// order while different patients proceed in parallel.
    patient_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl EngineState {
    /// Lock handle serializing the ingest path for one patient.
    pub fn patient_lock(&self, patient_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.patient_locks
            .entry(patient_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Clone of the current configuration. Callers hold no lock while using it.
    pub fn config_snapshot(&self) -> EngineConfig {
        self.config.lock().clone()
    }
}

/// Initialize engine state: load config, open the database, restore the live
/// queue from its persisted rows. Returns the state together with the
/// receiving end of the alert stream.
pub fn init() -> Result<(EngineState, mpsc::UnboundedReceiver<AlertEvent>), EngineError> {
    let config = load_config();

    let db = match &config.database_path {
        Some(path) => TriageDb::open_at(PathBuf::from(path))?,
        None => TriageDb::open()?,
    };

    let queue = PatientQueue::new();
    queue.restore(db.load_queue_entries()?);

    let (alert_tx, alert_rx) = mpsc::unbounded_channel();

    let state = EngineState {
        db: Mutex::new(db),
        config: Mutex::new(config),
        queue,
        alert_tx,
        patient_locks: DashMap::new(),
    };

    Ok((state, alert_rx))
}

/// Canonical config file path (`~/.triagecore/config.json`).
pub fn config_path() -> Result<PathBuf, EngineError> {
    let home = dirs::home_dir()
        .ok_or_else(|| EngineError::Configuration("Could not find home directory".to_string()))?;
    Ok(home.join(".triagecore").join("config.json"))
}

/// Load configuration from `~/.triagecore/config.json`.
///
/// A missing file yields the shipped defaults. A malformed file, or one
/// whose values fail [`EngineConfig::validate`], is logged and the defaults
/// apply so the engine still starts.
pub fn load_config() -> EngineConfig {
    match config_path() {
        Ok(path) => load_config_from(&path),
        Err(e) => {
            log::warn!("State: config path unavailable: {e}. Using defaults.");
            EngineConfig::default()
        }
    }
}

fn load_config_from(path: &Path) -> EngineConfig {
    if !path.exists() {
        log::info!("State: no config at {}, using defaults", path.display());
        return EngineConfig::default();
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("State: failed to read {}: {e}. Using defaults.", path.display());
            return EngineConfig::default();
        }
    };

    let config: EngineConfig = match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("State: failed to parse {}: {e}. Using defaults.", path.display());
            return EngineConfig::default();
        }
    };

    // Same checks as a runtime config change; a hand-edited file gets no pass.
    if let Err(e) = config.validate() {
        log::warn!("State: config at {} is unusable: {e}. Using defaults.", path.display());
        return EngineConfig::default();
    }
    config
}

/// Write a configuration to disk, creating `~/.triagecore/` if needed.
pub fn save_config(config: &EngineConfig) -> Result<(), EngineError> {
    let path = config_path()?;
    save_config_to(&path, config)
}

fn save_config_to(path: &Path, config: &EngineConfig) -> Result<(), EngineError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| EngineError::Configuration(format!("Failed to serialize config: {e}")))?;
    fs::write(path, content)?;
    Ok(())
}

/// Apply a mutation to the in-memory configuration and persist the result.
/// The in-memory copy only updates once the write succeeds.
pub fn update_config(
    state: &EngineState,
    mutator: impl FnOnce(&mut EngineConfig),
) -> Result<EngineConfig, EngineError> {
    let mut guard = state.config.lock();
    let mut config = guard.clone();
    mutator(&mut config);
    save_config(&config)?;
    *guard = config.clone();
    Ok(config)
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use crate::db::test_utils::test_db;

    /// Engine state over a throwaway database, for pipeline and API tests.
    pub fn test_state() -> (EngineState, mpsc::UnboundedReceiver<AlertEvent>) {
        let (alert_tx, alert_rx) = mpsc::unbounded_channel();
        let state = EngineState {
            db: Mutex::new(test_db()),
            config: Mutex::new(EngineConfig::default()),
            queue: PatientQueue::new(),
            alert_tx,
            patient_locks: DashMap::new(),
        };
        (state, alert_rx)
    }
}

// =============================================================================
// Tests
// =============================================================================
