use tracing::debug;

use crate::config::{DwellFilterConfig, TravelFilterConfig};
use crate::events::{ArrivalDeparture, TemporalDifference};
use crate::ms_between;

/// Gate for travel-time samples: duration bounds plus schedule-adherence
/// bounds on both endpoint events. Arrivals often carry no adherence, so an
/// absent value passes; only a present out-of-bounds value rejects.
/// Rejections are expected feed noise and log at debug.
#[derive(Debug, Clone)]
pub struct TravelTimeFilter {
    config: TravelFilterConfig,
}

impl TravelTimeFilter {
    pub fn new(config: TravelFilterConfig) -> Self {
        TravelTimeFilter { config }
    }

    pub fn accepts(&self, departure: &ArrivalDeparture, arrival: &ArrivalDeparture) -> bool {
        let travel_time_ms = ms_between(arrival.time, departure.time);

        if !adherence_ok(
            departure.scheduled_adherence,
            self.config.min_schedule_adherence_secs,
            self.config.max_schedule_adherence_secs,
        ) {
            debug!(
                vehicle = %departure.vehicle_id,
                stop = %departure.stop_id,
                "departure schedule adherence outside allowable range, dropping travel sample"
            );
            return false;
        }
        if !adherence_ok(
            arrival.scheduled_adherence,
            self.config.min_schedule_adherence_secs,
            self.config.max_schedule_adherence_secs,
        ) {
            debug!(
                vehicle = %arrival.vehicle_id,
                stop = %arrival.stop_id,
                "arrival schedule adherence outside allowable range, dropping travel sample"
            );
            return false;
        }
        if travel_time_ms <= self.config.min_travel_time_ms
            || travel_time_ms >= self.config.max_travel_time_ms
        {
            debug!(
                travel_time_ms,
                vehicle = %departure.vehicle_id,
                from = %departure.stop_id,
                to = %arrival.stop_id,
                "travel time outside allowable range, dropping sample"
            );
            return false;
        }
        true
    }

    /// Bounds check for a bare duration, used where the endpoints are not
    /// available (historical average folding).
    pub fn accepts_duration(&self, travel_time_ms: i64) -> bool {
        if travel_time_ms <= self.config.min_travel_time_ms
            || travel_time_ms >= self.config.max_travel_time_ms
        {
            debug!(travel_time_ms, "travel time outside allowable range, dropping sample");
            return false;
        }
        true
    }
}

/// Gate for dwell-time samples: dwell and headway bounds plus adherence
/// bounds. Unlike arrivals, the departure that closes a dwell must carry an
/// adherence value for the sample to correlate with the schedule at all.
#[derive(Debug, Clone)]
pub struct DwellTimeFilter {
    config: DwellFilterConfig,
    min_schedule_adherence_secs: i64,
    max_schedule_adherence_secs: i64,
}

impl DwellTimeFilter {
    pub fn new(config: DwellFilterConfig, travel: &TravelFilterConfig) -> Self {
        DwellTimeFilter {
            config,
            min_schedule_adherence_secs: travel.min_schedule_adherence_secs,
            max_schedule_adherence_secs: travel.max_schedule_adherence_secs,
        }
    }

    pub fn max_headway_ms(&self) -> i64 {
        self.config.max_headway_ms
    }

    pub fn accepts(
        &self,
        departure: &ArrivalDeparture,
        previous_arrival_adherence: Option<TemporalDifference>,
        dwell_time_ms: i64,
        headway_ms: i64,
    ) -> bool {
        let departure_ok = departure
            .scheduled_adherence
            .map(|a| {
                a.is_within_bounds(
                    self.min_schedule_adherence_secs,
                    self.max_schedule_adherence_secs,
                )
            })
            .unwrap_or(false);
        if !departure_ok {
            debug!(
                vehicle = %departure.vehicle_id,
                stop = %departure.stop_id,
                "departure schedule adherence missing or outside range, dropping dwell sample"
            );
            return false;
        }
        if !adherence_ok(
            previous_arrival_adherence,
            self.min_schedule_adherence_secs,
            self.max_schedule_adherence_secs,
        ) {
            debug!(
                vehicle = %departure.vehicle_id,
                stop = %departure.stop_id,
                "preceding arrival schedule adherence outside range, dropping dwell sample"
            );
            return false;
        }
        if dwell_time_ms <= self.config.min_dwell_time_ms
            || dwell_time_ms >= self.config.max_dwell_time_ms
        {
            debug!(
                dwell_time_ms,
                vehicle = %departure.vehicle_id,
                stop = %departure.stop_id,
                "dwell time outside allowable range, dropping sample"
            );
            return false;
        }
        if headway_ms <= self.config.min_headway_ms || headway_ms >= self.config.max_headway_ms {
            debug!(
                headway_ms,
                vehicle = %departure.vehicle_id,
                stop = %departure.stop_id,
                "headway outside allowable range, dropping dwell sample"
            );
            return false;
        }
        true
    }

    pub fn accepts_duration(&self, dwell_time_ms: i64) -> bool {
        if dwell_time_ms <= self.config.min_dwell_time_ms
            || dwell_time_ms >= self.config.max_dwell_time_ms
        {
            debug!(dwell_time_ms, "dwell time outside allowable range, dropping sample");
            return false;
        }
        true
    }
}

fn adherence_ok(
    adherence: Option<TemporalDifference>,
    early_limit_secs: i64,
    late_limit_secs: i64,
) -> bool {
    match adherence {
        Some(a) => a.is_within_bounds(early_limit_secs, late_limit_secs),
        None => true,
    }
}
