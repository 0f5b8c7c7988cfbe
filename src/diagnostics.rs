//! Side-channel for anomalies and per-segment estimates. The engine never
//! blocks on the sink; deployments point it at their store of choice, tests
//! use [`VecSink`].

use std::sync::Mutex;

use chrono::NaiveDateTime;
use compact_str::CompactString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticEventKind {
    /// A Kalman estimate diverged from its base prediction beyond both the
    /// absolute and relative thresholds.
    PredictionVariation,
    /// A last-vehicle travel-time lookup produced a non-positive duration,
    /// which points at bad matcher output.
    TravelTimeException,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticEvent {
    pub kind: DiagnosticEventKind,
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub stop_id: CompactString,
    pub time: NaiveDateTime,
    pub description: String,
}

/// One stored per-segment travel estimate, kept for later accuracy analysis
/// against what the vehicle actually did.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentPrediction {
    pub trip_id: CompactString,
    pub stop_path_index: usize,
    pub vehicle_id: CompactString,
    pub travel_time_ms: i64,
    /// Which estimator produced the value, for accuracy breakdowns.
    pub algorithm: &'static str,
    pub created_at: NaiveDateTime,
}

pub trait DiagnosticSink: Send + Sync {
    fn record_event(&self, event: DiagnosticEvent);
    fn record_prediction(&self, prediction: SegmentPrediction);
}

/// Discards everything.
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn record_event(&self, _event: DiagnosticEvent) {}
    fn record_prediction(&self, _prediction: SegmentPrediction) {}
}

/// Collects everything in memory.
#[derive(Default)]
pub struct VecSink {
    pub events: Mutex<Vec<DiagnosticEvent>>,
    pub predictions: Mutex<Vec<SegmentPrediction>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagnosticSink for VecSink {
    fn record_event(&self, event: DiagnosticEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn record_prediction(&self, prediction: SegmentPrediction) {
        self.predictions.lock().unwrap().push(prediction);
    }
}
