// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use chrono::NaiveDateTime;
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{HeadwayConfig, HeadwayStrategy};
use crate::events::{ArrivalDeparture, EventKind, StopDayKey};
use crate::history::StopEventCache;
use crate::status::{VehicleStatus, VehicleStatusStore};

/// Route-wide headway statistics. Only computed once every active vehicle
/// on the route has an individual headway; a partial fleet reports nothing
/// rather than a misleading aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemHeadwayStats {
    pub average_ms: f64,
    pub variance: f64,
    pub coefficient_of_variation: f64,
    pub num_vehicles: usize,
}

/// Spacing between one vehicle and the vehicle ahead of it at a stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headway {
    pub headway_ms: i64,
    pub vehicle_id: CompactString,
    pub preceding_vehicle_id: CompactString,
    pub stop_id: CompactString,
    pub trip_id: CompactString,
    pub route_id: CompactString,
    pub created_at: NaiveDateTime,
    pub own_event_time: NaiveDateTime,
    pub preceding_event_time: NaiveDateTime,
    pub system: Option<SystemHeadwayStats>,
}

impl Headway {
    /// Same underlying measurement, regardless of when it was generated or
    /// what the fleet-wide stats looked like at the time.
    pub fn same_measurement(&self, other: &Headway) -> bool {
        self.vehicle_id == other.vehicle_id
            && self.preceding_vehicle_id == other.preceding_vehicle_id
            && self.stop_id == other.stop_id
            && self.own_event_time == other.own_event_time
            && self.preceding_event_time == other.preceding_event_time
    }
}

/// Derives inter-vehicle spacing from the stop-day event index. The arrival
/// variant measures gaps between arrivals; the departure variant measures
/// gaps between departures and additionally refuses stale measurements.
pub struct HeadwayGenerator {
    strategy: HeadwayStrategy,
    config: HeadwayConfig,
}

impl HeadwayGenerator {
    pub fn new(strategy: HeadwayStrategy, config: HeadwayConfig) -> Self {
        HeadwayGenerator { strategy, config }
    }

    fn event_kind(&self) -> EventKind {
        match self.strategy {
            HeadwayStrategy::LastArrival => EventKind::Arrival,
            HeadwayStrategy::LastDeparture => EventKind::Departure,
        }
    }

    /// Headway for the vehicle at the stop it most recently completed,
    /// written back onto its status. None when the vehicle or its
    /// predecessor has no event at the stop yet, when the measurement is
    /// stale, or when it duplicates the cached one.
    pub fn generate(
        &self,
        status: &VehicleStatus,
        stop_events: &StopEventCache,
        store: &VehicleStatusStore,
    ) -> Option<Headway> {
        let now = status.avl.time;
        let stop_id = status.origin_stop_id(status.spatial.stop_path_index)?;
        let kind = self.event_kind();

        let events = stop_events.query(&StopDayKey::new(stop_id, now))?;
        let past: Vec<&ArrivalDeparture> = events.iter().filter(|e| e.time <= now).collect();

        let own_depth = past
            .iter()
            .position(|e| e.kind == kind && e.vehicle_id == status.vehicle_id)?;
        let own = past[own_depth];

        if self.strategy == HeadwayStrategy::LastDeparture {
            let age_ms = crate::ms_between(now, own.time);
            if own_depth > self.config.max_scan_depth || age_ms > self.config.staleness_ms {
                debug!(
                    vehicle = %status.vehicle_id,
                    stop = %stop_id,
                    own_depth,
                    age_ms,
                    "stale departure headway, discarding"
                );
                store.set_headway(&status.vehicle_id, None);
                return None;
            }
        }

        let preceding = past[own_depth + 1..].iter().find(|e| {
            e.kind == kind
                && e.vehicle_id != status.vehicle_id
                && e.direction_id == status.trip.direction_id
        })?;

        let mut headway = Headway {
            headway_ms: crate::ms_between(own.time, preceding.time).abs(),
            vehicle_id: status.vehicle_id.clone(),
            preceding_vehicle_id: preceding.vehicle_id.clone(),
            stop_id: CompactString::from(stop_id),
            trip_id: status.trip.trip_id.clone(),
            route_id: status.trip.route_id.clone(),
            created_at: now,
            own_event_time: own.time,
            preceding_event_time: preceding.time,
            system: None,
        };

        if self.strategy == HeadwayStrategy::LastDeparture
            && let Some(cached) = store.cached_headway(&status.vehicle_id)
            && cached.same_measurement(&headway)
        {
            return None;
        }

        store.set_headway(&status.vehicle_id, Some(headway.clone()));
        headway.system = self.system_stats(&status.trip.route_id, store);
        if headway.system.is_some() {
            store.set_headway(&status.vehicle_id, Some(headway.clone()));
        }
        Some(headway)
    }

    /// Mean, population variance, and coefficient of variation across the
    /// route, gated on every active vehicle having a headway.
    fn system_stats(&self, route_id: &str, store: &VehicleStatusStore) -> Option<SystemHeadwayStats> {
        let (total, headways) = store.route_headway_coverage(route_id);
        if total == 0 || headways.len() != total {
            return None;
        }
        let n = headways.len() as f64;
        let average = headways.iter().sum::<i64>() as f64 / n;
        let variance = headways
            .iter()
            .map(|&h| {
                let diff = h as f64 - average;
                diff * diff
            })
            .sum::<f64>()
            / n;
        let coefficient_of_variation = if average != 0.0 {
            variance / (average * average)
        } else {
            0.0
        };
        Some(SystemHeadwayStats {
            average_ms: average,
            variance,
            coefficient_of_variation,
            num_vehicles: total,
        })
    }
}
