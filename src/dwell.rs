// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use dashmap::DashMap;
use tracing::debug;

use crate::events::{ArrivalDeparture, SegmentKey, StopDayKey};
use crate::filters::DwellTimeFilter;
use crate::history::StopEventCache;

/// Recursive-least-squares fit of dwell time against headway,
/// `dwell = w0 + w1 * headway`. Longer gaps between vehicles mean more
/// passengers waiting and longer boarding, and this model learns that slope
/// per segment instead of assuming a flat average.
#[derive(Debug, Clone, Copy)]
pub struct DwellRls {
    w0: f64,
    w1: f64,
    // Inverse covariance, symmetric 2x2.
    p00: f64,
    p01: f64,
    p11: f64,
    lambda: f64,
    samples: u64,
}

impl DwellRls {
    pub fn new(lambda: f64) -> Self {
        DwellRls {
            w0: 0.0,
            w1: 0.0,
            p00: 1e6,
            p01: 0.0,
            p11: 1e6,
            lambda,
            samples: 0,
        }
    }

    pub fn put_sample(&mut self, dwell_ms: i64, headway_ms: i64) {
        let y = dwell_ms as f64;
        let h = headway_ms as f64;

        // Regressor x = [1, h].
        let px0 = self.p00 + self.p01 * h;
        let px1 = self.p01 + self.p11 * h;
        let denom = self.lambda + px0 + px1 * h;
        let k0 = px0 / denom;
        let k1 = px1 / denom;

        let residual = y - (self.w0 + self.w1 * h);
        self.w0 += k0 * residual;
        self.w1 += k1 * residual;

        let p00 = (self.p00 - k0 * px0) / self.lambda;
        let p01 = (self.p01 - k0 * px1) / self.lambda;
        let p11 = (self.p11 - k1 * px1) / self.lambda;
        self.p00 = p00;
        self.p01 = p01;
        self.p11 = p11;

        self.samples += 1;
    }

    /// Predicted dwell for a given headway, clamped to non-negative. None
    /// until at least one sample has been folded in.
    pub fn predict(&self, headway_ms: i64) -> Option<i64> {
        if self.samples == 0 {
            return None;
        }
        let dwell = self.w0 + self.w1 * headway_ms as f64;
        Some(dwell.max(0.0) as i64)
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

/// Per-segment RLS dwell models, fed from departure events and the stop-day
/// event index.
pub struct DwellModelCache {
    models: DashMap<SegmentKey, DwellRls>,
    lambda: f64,
}

impl DwellModelCache {
    pub fn new(lambda: f64) -> Self {
        DwellModelCache {
            models: DashMap::new(),
            lambda,
        }
    }

    /// Folds one departure into the segment's model. The dwell is the gap
    /// from the vehicle's own arrival to this departure; the headway is the
    /// gap from the preceding different-vehicle arrival at the same stop to
    /// the vehicle's own arrival. Either gap missing, or the gates failing,
    /// drops the sample.
    pub fn record_departure(
        &self,
        departure: &ArrivalDeparture,
        stop_events: &StopEventCache,
        filter: &DwellTimeFilter,
    ) {
        if !departure.is_departure() {
            return;
        }
        let key = StopDayKey::new(&departure.stop_id, departure.time);
        let Some(events) = stop_events.query(&key) else {
            return;
        };

        let Some(own_arrival) = events.iter().find(|e| {
            e.is_arrival() && e.vehicle_id == departure.vehicle_id && e.time <= departure.time
        }) else {
            return;
        };
        // Newest-first scan: the first different-vehicle arrival before our
        // own is the immediately preceding one.
        let Some(preceding) = events.iter().find(|e| {
            e.is_arrival()
                && e.vehicle_id != departure.vehicle_id
                && e.trip_id != departure.trip_id
                && e.time < own_arrival.time
        }) else {
            debug!(
                vehicle = %departure.vehicle_id,
                stop = %departure.stop_id,
                "no preceding vehicle arrival, dropping dwell model sample"
            );
            return;
        };

        let dwell_ms = crate::ms_between(departure.time, own_arrival.time);
        let headway_ms = crate::ms_between(own_arrival.time, preceding.time);
        if !filter.accepts(
            departure,
            own_arrival.scheduled_adherence,
            dwell_ms,
            headway_ms,
        ) {
            return;
        }

        self.models
            .entry(SegmentKey::new(
                &departure.trip_id,
                departure.stop_path_index,
            ))
            .or_insert_with(|| DwellRls::new(self.lambda))
            .put_sample(dwell_ms, headway_ms);
    }

    pub fn predict_dwell_time(&self, key: &SegmentKey, headway_ms: i64) -> Option<i64> {
        self.models.get(key)?.predict(headway_ms)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
