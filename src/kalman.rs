// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Scalar Kalman step over trip-segment travel times.
//!
//! One estimator serves both scheduled and frequency service; the only
//! thing that differs between the two is how the caller extracts the
//! historical durations, not the filter math.
//!
//! ```text
//! avg   = mean(hist)
//! var   = sum((d - avg)^2) / n
//! gain  = (err + var) / (err + 2*var)
//! loop  = 1 - gain
//! pred  = loop*last + gain*(use_average ? avg : hist[0])
//! err'  = var * gain
//! ```
//!
//! `err` is the error variance carried over from the previous prediction
//! for the same segment, which is what makes the filter adaptive: each
//! prediction's output variance becomes the next prediction's prior.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanResult {
    /// Predicted segment duration in milliseconds.
    pub duration_ms: f64,
    /// Updated error variance, to be stored back for the next prediction.
    pub filter_error: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct KalmanEstimator {
    /// Blend the last-vehicle measurement against the historical mean
    /// rather than the single most recent historical day. Damps the filter
    /// when one day's value was dramatically different.
    pub use_average: bool,
}

impl KalmanEstimator {
    pub fn new(use_average: bool) -> Self {
        KalmanEstimator { use_average }
    }

    /// One filter step. `historical_durations_ms` must be ordered most
    /// recent day first; empty history returns None (the caller falls back
    /// to its base prediction).
    pub fn predict(
        &self,
        last_vehicle_duration_ms: i64,
        historical_durations_ms: &[i64],
        last_prediction_error: f64,
    ) -> Option<KalmanResult> {
        if historical_durations_ms.is_empty() {
            return None;
        }

        let n = historical_durations_ms.len() as f64;
        let average = historical_durations_ms.iter().sum::<i64>() as f64 / n;
        let variance = historical_durations_ms
            .iter()
            .map(|&d| {
                let diff = d as f64 - average;
                diff * diff
            })
            .sum::<f64>()
            / n;

        let gain = (last_prediction_error + variance) / (last_prediction_error + 2.0 * variance);
        let loop_gain = 1.0 - gain;

        let historical_duration = if self.use_average {
            average
        } else {
            historical_durations_ms[0] as f64
        };

        Some(KalmanResult {
            duration_ms: loop_gain * last_vehicle_duration_ms as f64 + gain * historical_duration,
            filter_error: variance * gain,
        })
    }
}
