use chrono::NaiveDateTime;
use compact_str::CompactString;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::events::TemporalDifference;
use crate::headway::Headway;

/// One automatic-vehicle-location sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvlReport {
    pub vehicle_id: CompactString,
    pub time: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: Option<f32>,
    pub heading: Option<f32>,
}

/// The stop at the end of one path segment plus its scheduled timings.
/// `segments[i].stop_id` is the stop a vehicle arrives at when it finishes
/// segment `i`; the origin stop of segment `i` is therefore
/// `segments[i - 1].stop_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentProfile {
    pub stop_id: CompactString,
    pub length_m: f64,
    pub scheduled_travel_time_ms: i64,
    pub scheduled_dwell_time_ms: i64,
}

/// The shape of the trip a vehicle is matched to, as supplied by the
/// external matcher from the static schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripProfile {
    pub trip_id: CompactString,
    pub route_id: CompactString,
    pub direction_id: Option<CompactString>,
    pub start_time_secs: i64,
    pub frequency_based: bool,
    pub segments: Vec<SegmentProfile>,
}

impl TripProfile {
    pub fn segment(&self, stop_path_index: usize) -> Option<&SegmentProfile> {
        self.segments.get(stop_path_index)
    }

    pub fn num_segments(&self) -> usize {
        self.segments.len()
    }
}

/// Where along its trip the vehicle currently is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialMatch {
    pub stop_path_index: usize,
    pub distance_along_segment_m: f64,
}

impl SpatialMatch {
    /// Fraction of the current segment still ahead of the vehicle, in 0..=1.
    pub fn remaining_fraction(&self, segment_length_m: f64) -> f64 {
        if segment_length_m <= 0.0 {
            return 0.0;
        }
        ((segment_length_m - self.distance_along_segment_m) / segment_length_m).clamp(0.0, 1.0)
    }
}

/// Read-only input to every generator call: the vehicle's current spatial
/// match plus its trip assignment. The `headway` field is the one mutable
/// piece of per-vehicle state this engine maintains, written back by the
/// headway generator through the [`VehicleStatusStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    pub vehicle_id: CompactString,
    pub avl: AvlReport,
    pub trip: TripProfile,
    pub spatial: SpatialMatch,
    pub predictable: bool,
    pub schedule_adherence: Option<TemporalDifference>,
    pub headway: Option<Headway>,
}

impl VehicleStatus {
    /// Stop id of the origin of the given segment, None at the start of the
    /// trip where there is no previous stop.
    pub fn origin_stop_id(&self, stop_path_index: usize) -> Option<&str> {
        if stop_path_index == 0 {
            return None;
        }
        self.trip
            .segment(stop_path_index - 1)
            .map(|s| s.stop_id.as_str())
    }

    pub fn destination_stop_id(&self, stop_path_index: usize) -> Option<&str> {
        self.trip.segment(stop_path_index).map(|s| s.stop_id.as_str())
    }
}

/// Shared per-vehicle state, keyed by vehicle id. Safe for concurrent use
/// from the worker threads that feed status updates into the engine.
#[derive(Default)]
pub struct VehicleStatusStore {
    vehicles: DashMap<CompactString, VehicleStatus>,
}

impl VehicleStatusStore {
    pub fn new() -> Self {
        VehicleStatusStore {
            vehicles: DashMap::new(),
        }
    }

    pub fn upsert(&self, status: VehicleStatus) {
        self.vehicles.insert(status.vehicle_id.clone(), status);
    }

    pub fn get(&self, vehicle_id: &str) -> Option<VehicleStatus> {
        self.vehicles.get(vehicle_id).map(|s| s.clone())
    }

    pub fn remove(&self, vehicle_id: &str) -> Option<VehicleStatus> {
        self.vehicles.remove(vehicle_id).map(|(_, s)| s)
    }

    pub fn set_headway(&self, vehicle_id: &str, headway: Option<Headway>) {
        if let Some(mut status) = self.vehicles.get_mut(vehicle_id) {
            status.headway = headway;
        }
    }

    pub fn cached_headway(&self, vehicle_id: &str) -> Option<Headway> {
        self.vehicles
            .get(vehicle_id)
            .and_then(|s| s.headway.clone())
    }

    /// Every vehicle currently assigned to the route.
    pub fn vehicles_on_route(&self, route_id: &str) -> Vec<CompactString> {
        self.vehicles
            .iter()
            .filter(|entry| entry.trip.route_id == route_id)
            .map(|entry| entry.vehicle_id.clone())
            .collect()
    }

    /// (total active vehicles on route, headways of those that have one).
    pub fn route_headway_coverage(&self, route_id: &str) -> (usize, Vec<i64>) {
        let mut total = 0;
        let mut headways = Vec::new();
        for entry in self.vehicles.iter() {
            if entry.trip.route_id == route_id {
                total += 1;
                if let Some(h) = &entry.headway {
                    headways.push(h.headway_ms);
                }
            }
        }
        (total, headways)
    }
}
