// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use chrono::{NaiveDate, NaiveDateTime};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use crate::service_day;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Arrival,
    Departure,
}

/// Schedule adherence in milliseconds. Positive means the vehicle is early,
/// negative means late.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemporalDifference(pub i64);

impl TemporalDifference {
    pub fn ms(&self) -> i64 {
        self.0
    }

    /// Bounds are in seconds: at most `early_limit_secs` early and at most
    /// `late_limit_secs` late.
    pub fn is_within_bounds(&self, early_limit_secs: i64, late_limit_secs: i64) -> bool {
        let secs = self.0 / 1000;
        secs <= early_limit_secs && secs >= -late_limit_secs
    }
}

/// One observed arrival or departure at a stop, produced by the external
/// matcher. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalDeparture {
    pub vehicle_id: CompactString,
    pub stop_id: CompactString,
    pub trip_id: CompactString,
    pub route_id: CompactString,
    pub direction_id: Option<CompactString>,
    pub stop_path_index: usize,
    pub time: NaiveDateTime,
    pub kind: EventKind,
    pub scheduled_adherence: Option<TemporalDifference>,
}

impl ArrivalDeparture {
    pub fn is_arrival(&self) -> bool {
        self.kind == EventKind::Arrival
    }

    pub fn is_departure(&self) -> bool {
        self.kind == EventKind::Departure
    }

    pub fn time_ms(&self) -> i64 {
        crate::timestamp_ms(self.time)
    }
}

/// One stop on one service day. The constructor truncates the timestamp so
/// records and queries always address the same bucket regardless of
/// time-of-day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StopDayKey {
    pub stop_id: CompactString,
    pub day: NaiveDate,
}

impl StopDayKey {
    pub fn new(stop_id: &str, time: NaiveDateTime) -> Self {
        StopDayKey {
            stop_id: CompactString::from(stop_id),
            day: service_day(time),
        }
    }
}

/// One concrete running of a trip: trip, service day, start time of day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TripInstanceKey {
    pub trip_id: CompactString,
    pub day: NaiveDate,
    pub start_time_secs: i64,
}

impl TripInstanceKey {
    pub fn new(trip_id: &str, time: NaiveDateTime, start_time_secs: i64) -> Self {
        TripInstanceKey {
            trip_id: CompactString::from(trip_id),
            day: service_day(time),
            start_time_secs,
        }
    }

    pub fn on_day(trip_id: &str, day: NaiveDate, start_time_secs: i64) -> Self {
        TripInstanceKey {
            trip_id: CompactString::from(trip_id),
            day,
            start_time_secs,
        }
    }
}

/// One path segment of one trip. Keys the Kalman error state and the dwell
/// model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentKey {
    pub trip_id: CompactString,
    pub stop_path_index: usize,
}

impl SegmentKey {
    pub fn new(trip_id: &str, stop_path_index: usize) -> Self {
        SegmentKey {
            trip_id: CompactString::from(trip_id),
            stop_path_index,
        }
    }
}
