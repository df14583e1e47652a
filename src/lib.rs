//! Multimodal clinical risk fusion and time-to-risk prioritization.
//!
//! Samples from bedside vitals, face analysis, and voice analysis are
//! normalized onto a shared 0-100 scale, fused into one risk score with
//! comorbidity escalation, and mapped to a predicted deterioration horizon.
//! A live queue ranks monitored patients by that horizon; an alerting gate
//! notifies on tier transitions without re-firing on steady state.

pub mod alerts;
pub mod api;
pub mod db;
pub mod error;
pub mod fusion;
pub mod normalizer;
pub mod pipeline;
pub mod queue;
pub mod scorer;
pub mod state;
pub mod ttr;
pub mod types;
