use dashmap::DashMap;

use crate::events::SegmentKey;

/// Error-state record for one (trip, segment). Tracks how many times the
/// variance has been replaced, which is useful when judging how settled the
/// filter is for a segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanError {
    error: f64,
    updates: u32,
}

impl KalmanError {
    fn new(error: f64) -> Self {
        KalmanError { error, updates: 0 }
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn updates(&self) -> u32 {
        self.updates
    }
}

/// Carries the Kalman filter's error variance across prediction calls,
/// keyed by (trip, path segment). Absence always reads as the configured
/// initial variance, never as an error: the first prediction for a segment
/// is expected to find nothing here.
pub struct KalmanErrorCache {
    errors: DashMap<SegmentKey, KalmanError>,
    initial_error_value: f64,
}

impl KalmanErrorCache {
    pub fn new(initial_error_value: f64) -> Self {
        KalmanErrorCache {
            errors: DashMap::new(),
            initial_error_value,
        }
    }

    /// The carried variance for this segment, or the configured initial
    /// value if the segment has never been predicted.
    pub fn error_value_or_default(&self, key: &SegmentKey) -> f64 {
        self.errors
            .get(key)
            .map(|e| e.error())
            .unwrap_or(self.initial_error_value)
    }

    /// Only present once a prediction has stored a value. Tests and
    /// observability use this to distinguish "never predicted" from
    /// "predicted with the default".
    pub fn error_value(&self, key: &SegmentKey) -> Option<KalmanError> {
        self.errors.get(key).map(|e| *e)
    }

    pub fn put_error_value(&self, key: &SegmentKey, value: f64) {
        self.errors
            .entry(key.clone())
            .and_modify(|e| {
                if e.error != value {
                    e.error = value;
                    e.updates += 1;
                }
            })
            .or_insert_with(|| KalmanError::new(value));
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}
