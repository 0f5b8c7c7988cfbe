// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

//! Forward arrival/departure predictions for a matched vehicle, plus the
//! event fan-out that keeps every cache current.
//!
//! The estimator ladder is fixed at startup by configuration. Whatever the
//! configured strategy, a call always produces a duration: each estimator
//! falls back down Kalman -> historical average -> last vehicle -> schedule
//! when it has insufficient data, and the schedule is always available.

use std::sync::Arc;

use chrono::{Days, Duration, NaiveDateTime};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{DwellStrategy, EngineConfig, TravelTimeStrategy};
use crate::diagnostics::{
    DiagnosticEvent, DiagnosticEventKind, DiagnosticSink, SegmentPrediction,
};
use crate::dwell::DwellModelCache;
use crate::error_cache::KalmanErrorCache;
use crate::events::{ArrivalDeparture, EventKind, SegmentKey, TripInstanceKey};
use crate::filters::{DwellTimeFilter, TravelTimeFilter};
use crate::headway::{Headway, HeadwayGenerator};
use crate::history::averages::SegmentStatKey;
use crate::history::{
    FrequencyAverageCache, HistoryReplaySource, ReplayError, RouteFilter, ScheduledAverageCache,
    StatKind, StopEventCache, TripHistoryCache, TripResolver,
};
use crate::kalman::KalmanEstimator;
use crate::status::{TripProfile, VehicleStatus, VehicleStatusStore};

/// One predicted stop event for one vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub vehicle_id: CompactString,
    pub trip_id: CompactString,
    pub route_id: CompactString,
    pub stop_id: CompactString,
    pub stop_path_index: usize,
    pub kind: EventKind,
    pub time: NaiveDateTime,
    pub generated_at: NaiveDateTime,
}

/// Owns every cache and generator in the engine. One instance per process,
/// shared across the worker threads that feed it status updates.
pub struct PredictionContext {
    config: EngineConfig,
    stop_events: StopEventCache,
    trip_history: TripHistoryCache,
    scheduled_averages: ScheduledAverageCache,
    frequency_averages: FrequencyAverageCache,
    error_cache: KalmanErrorCache,
    dwell_models: DwellModelCache,
    vehicles: VehicleStatusStore,
    travel_filter: TravelTimeFilter,
    dwell_filter: DwellTimeFilter,
    estimator: KalmanEstimator,
    headway_generator: HeadwayGenerator,
    resolver: Arc<dyn TripResolver>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl PredictionContext {
    pub fn new(
        config: EngineConfig,
        resolver: Arc<dyn TripResolver>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let travel_filter = TravelTimeFilter::new(config.travel_filter.clone());
        let dwell_filter = DwellTimeFilter::new(config.dwell_filter.clone(), &config.travel_filter);
        PredictionContext {
            stop_events: StopEventCache::new(),
            trip_history: TripHistoryCache::new(config.cache.days_to_file, config.frequency.clone()),
            scheduled_averages: ScheduledAverageCache::new(),
            frequency_averages: FrequencyAverageCache::new(
                config.frequency.bucket_width_secs,
                config.frequency.day_start_hour,
            ),
            error_cache: KalmanErrorCache::new(config.kalman.initial_error_value),
            dwell_models: DwellModelCache::new(config.dwell_model.lambda),
            vehicles: VehicleStatusStore::new(),
            travel_filter,
            dwell_filter,
            estimator: KalmanEstimator::new(config.kalman.use_average),
            headway_generator: HeadwayGenerator::new(config.headway_strategy, config.headway.clone()),
            resolver,
            diagnostics,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stop_events(&self) -> &StopEventCache {
        &self.stop_events
    }

    pub fn trip_history(&self) -> &TripHistoryCache {
        &self.trip_history
    }

    pub fn error_cache(&self) -> &KalmanErrorCache {
        &self.error_cache
    }

    pub fn dwell_models(&self) -> &DwellModelCache {
        &self.dwell_models
    }

    pub fn vehicles(&self) -> &VehicleStatusStore {
        &self.vehicles
    }

    /// Fans one observed event out to every cache that learns from it.
    pub fn record_event(&self, event: &ArrivalDeparture) {
        self.stop_events.record(event);
        let Some(instance) = self.trip_history.record(event, self.resolver.as_ref()) else {
            return;
        };
        if self.resolver.is_frequency_based(&event.trip_id) {
            self.frequency_averages.record_event(
                event,
                &instance,
                &self.trip_history,
                &self.travel_filter,
                &self.dwell_filter,
            );
        } else {
            self.scheduled_averages.record_event(
                event,
                &instance,
                &self.trip_history,
                &self.travel_filter,
                &self.dwell_filter,
            );
        }
        if event.is_departure() {
            self.dwell_models
                .record_departure(event, &self.stop_events, &self.dwell_filter);
        }
    }

    /// Replays persisted events through [`Self::record_event`] to warm the
    /// caches at startup. Returns how many events were folded in; events on
    /// filtered-out routes are skipped, not errors.
    pub fn populate_from_history(
        &self,
        source: &dyn HistoryReplaySource,
        routes: &RouteFilter,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<usize, ReplayError> {
        let mut events = source.events_between(start, end)?;
        events.sort_by_key(|e| e.time);
        let total = events.len();
        let mut recorded = 0;
        for event in &events {
            if !routes.allows(&event.route_id) {
                continue;
            }
            self.record_event(event);
            recorded += 1;
        }
        info!(recorded, skipped = total - recorded, "cache warm-up replay finished");
        Ok(recorded)
    }

    /// Warm-up over the configured trailing window ending at `now`.
    /// `warmup_days = 0` disables replay entirely.
    pub fn warm_up(
        &self,
        source: &dyn HistoryReplaySource,
        routes: &RouteFilter,
        now: NaiveDateTime,
    ) -> Result<usize, ReplayError> {
        let days = self.config.cache.warmup_days;
        if days == 0 {
            return Ok(0);
        }
        let start = now - Duration::days(days as i64);
        self.populate_from_history(source, routes, start, now)
    }

    /// Full predicted traversal time of one segment, per the configured
    /// strategy. Always produces a value.
    pub fn travel_time_for_segment(
        &self,
        status: &VehicleStatus,
        stop_path_index: usize,
        now: NaiveDateTime,
    ) -> i64 {
        let scheduled = self.scheduled_travel_time(&status.trip, stop_path_index);
        match self.config.travel_strategy {
            TravelTimeStrategy::Scheduled => scheduled,
            TravelTimeStrategy::HistoricalAverage => self
                .average_travel_time(&status.trip, stop_path_index, now)
                .unwrap_or(scheduled),
            TravelTimeStrategy::LastVehicle => self
                .last_vehicle_travel_time(&status.trip, stop_path_index, now)
                .or_else(|| self.average_travel_time(&status.trip, stop_path_index, now))
                .unwrap_or(scheduled),
            TravelTimeStrategy::KalmanScheduled | TravelTimeStrategy::KalmanFrequency => {
                let base = self
                    .average_travel_time(&status.trip, stop_path_index, now)
                    .unwrap_or(scheduled);
                self.kalman_travel_time(status, stop_path_index, now, base)
                    .unwrap_or(base)
            }
        }
    }

    /// Predicted dwell at the stop closing the given segment.
    pub fn stop_time_for_segment(
        &self,
        status: &VehicleStatus,
        stop_path_index: usize,
        now: NaiveDateTime,
    ) -> i64 {
        let scheduled = status
            .trip
            .segment(stop_path_index)
            .map(|s| s.scheduled_dwell_time_ms)
            .unwrap_or(0);
        match self.config.dwell_strategy {
            DwellStrategy::Scheduled => scheduled,
            DwellStrategy::HistoricalAverage => self
                .average_dwell_time(&status.trip, stop_path_index, now)
                .unwrap_or(scheduled),
            DwellStrategy::Rls => status
                .headway
                .as_ref()
                .and_then(|h| {
                    self.dwell_models.predict_dwell_time(
                        &SegmentKey::new(&status.trip.trip_id, stop_path_index),
                        h.headway_ms,
                    )
                })
                .or_else(|| self.average_dwell_time(&status.trip, stop_path_index, now))
                .unwrap_or(scheduled),
        }
    }

    /// Chained predictions for every remaining stop of the vehicle's trip.
    /// The partially traversed current segment is interpolated by remaining
    /// distance; every later segment gets a full traversal plus a dwell.
    pub fn generate(&self, status: &VehicleStatus) -> Vec<Prediction> {
        if !status.predictable {
            return Vec::new();
        }
        let now = status.avl.time;
        let first = status.spatial.stop_path_index;
        let num_segments = status.trip.num_segments();
        let mut predictions = Vec::new();
        let mut at = now;

        for index in first..num_segments {
            let Some(segment) = status.trip.segment(index) else {
                break;
            };
            let travel_ms = if index == first {
                let full = if self.config.kalman.use_kalman_for_partial {
                    self.travel_time_for_segment(status, index, at)
                } else {
                    self.scheduled_travel_time(&status.trip, index)
                };
                let fraction = status.spatial.remaining_fraction(segment.length_m);
                (full as f64 * fraction).round() as i64
            } else {
                self.travel_time_for_segment(status, index, at)
            };

            at += Duration::milliseconds(travel_ms);
            predictions.push(self.prediction(status, index, EventKind::Arrival, at, now));

            if index + 1 < num_segments {
                let dwell_ms = self.stop_time_for_segment(status, index, at);
                at += Duration::milliseconds(dwell_ms);
                predictions.push(self.prediction(status, index, EventKind::Departure, at, now));
            }
        }
        predictions
    }

    /// Spacing estimate for the vehicle, written back onto its status.
    pub fn generate_headway(&self, status: &VehicleStatus) -> Option<Headway> {
        self.headway_generator
            .generate(status, &self.stop_events, &self.vehicles)
    }

    fn prediction(
        &self,
        status: &VehicleStatus,
        stop_path_index: usize,
        kind: EventKind,
        time: NaiveDateTime,
        generated_at: NaiveDateTime,
    ) -> Prediction {
        Prediction {
            vehicle_id: status.vehicle_id.clone(),
            trip_id: status.trip.trip_id.clone(),
            route_id: status.trip.route_id.clone(),
            stop_id: status
                .destination_stop_id(stop_path_index)
                .unwrap_or_default()
                .into(),
            stop_path_index,
            kind,
            time,
            generated_at,
        }
    }

    fn scheduled_travel_time(&self, trip: &TripProfile, stop_path_index: usize) -> i64 {
        trip.segment(stop_path_index)
            .map(|s| s.scheduled_travel_time_ms)
            .unwrap_or(0)
    }

    fn average_travel_time(
        &self,
        trip: &TripProfile,
        stop_path_index: usize,
        when: NaiveDateTime,
    ) -> Option<i64> {
        let key = SegmentStatKey::new(&trip.trip_id, stop_path_index, StatKind::TravelTime);
        let average = if trip.frequency_based {
            self.frequency_averages.average(&key, when)?
        } else {
            self.scheduled_averages.average(&key)?
        };
        // A mean of one or two noisy traversals is worse than the timetable.
        if average.count() < self.config.kalman.min_days as u64 {
            return None;
        }
        Some(average.average_ms().round() as i64)
    }

    fn average_dwell_time(
        &self,
        trip: &TripProfile,
        stop_path_index: usize,
        when: NaiveDateTime,
    ) -> Option<i64> {
        let key = SegmentStatKey::new(&trip.trip_id, stop_path_index, StatKind::DwellTime);
        let average = if trip.frequency_based {
            self.frequency_averages.average(&key, when)?
        } else {
            self.scheduled_averages.average(&key)?
        };
        Some(average.average_ms().round() as i64)
    }

    /// Travel time the last vehicle actually took over this segment today.
    /// None for the first vehicle of the day; a non-positive duration is
    /// matcher noise and reported through the diagnostics sink.
    fn last_vehicle_travel_time(
        &self,
        trip: &TripProfile,
        stop_path_index: usize,
        now: NaiveDateTime,
    ) -> Option<i64> {
        let start = self
            .trip_history
            .instance_start_secs(&trip.trip_id, now, self.resolver.as_ref())?;
        let key = TripInstanceKey::new(&trip.trip_id, now, start);
        let events = self.trip_history.query(&key)?;
        let arrival = self.trip_history.find_arrival_at(&events, stop_path_index)?;
        let departure = self.trip_history.find_previous_departure(&events, arrival)?;
        let duration_ms = crate::ms_between(arrival.time, departure.time);
        if duration_ms <= 0 {
            self.diagnostics.record_event(DiagnosticEvent {
                kind: DiagnosticEventKind::TravelTimeException,
                vehicle_id: arrival.vehicle_id.clone(),
                trip_id: trip.trip_id.clone(),
                stop_id: arrival.stop_id.clone(),
                time: arrival.time,
                description: format!("non-positive last-vehicle travel time {duration_ms}ms"),
            });
            return None;
        }
        if !self.travel_filter.accepts(departure, arrival) {
            return None;
        }
        Some(duration_ms)
    }

    /// Per-day historical traversals of this segment, most recent day first,
    /// capped at `max_days` accepted samples from `max_days_to_search`
    /// calendar days.
    fn historical_travel_times(
        &self,
        trip: &TripProfile,
        stop_path_index: usize,
        now: NaiveDateTime,
    ) -> Vec<i64> {
        let Some(start) = self
            .trip_history
            .instance_start_secs(&trip.trip_id, now, self.resolver.as_ref())
        else {
            return Vec::new();
        };
        let today = crate::service_day(now);
        let mut durations = Vec::new();
        for days_back in 1..=self.config.kalman.max_days_to_search {
            if durations.len() >= self.config.kalman.max_days {
                break;
            }
            let Some(day) = today.checked_sub_days(Days::new(days_back as u64)) else {
                break;
            };
            let key = TripInstanceKey::on_day(&trip.trip_id, day, start);
            let Some(events) = self.trip_history.query(&key) else {
                continue;
            };
            let Some(arrival) = self.trip_history.find_arrival_at(&events, stop_path_index) else {
                continue;
            };
            let Some(departure) = self.trip_history.find_previous_departure(&events, arrival)
            else {
                continue;
            };
            if !self.travel_filter.accepts(departure, arrival) {
                continue;
            }
            durations.push(crate::ms_between(arrival.time, departure.time));
        }
        durations
    }

    fn kalman_travel_time(
        &self,
        status: &VehicleStatus,
        stop_path_index: usize,
        now: NaiveDateTime,
        base_ms: i64,
    ) -> Option<i64> {
        let trip = &status.trip;
        let last_ms = self.last_vehicle_travel_time(trip, stop_path_index, now)?;
        let history = self.historical_travel_times(trip, stop_path_index, now);
        if history.len() < self.config.kalman.min_days {
            debug!(
                trip = %trip.trip_id,
                stop_path_index,
                days = history.len(),
                min_days = self.config.kalman.min_days,
                "not enough historical days for kalman, using base prediction"
            );
            return None;
        }

        let segment = SegmentKey::new(&trip.trip_id, stop_path_index);
        let carried_error = self.error_cache.error_value_or_default(&segment);
        let result = self.estimator.predict(last_ms, &history, carried_error)?;
        self.error_cache.put_error_value(&segment, result.filter_error);

        let predicted_ms = result.duration_ms.round() as i64;
        let difference_ms = (predicted_ms - base_ms).abs();
        let percentage = if base_ms != 0 {
            difference_ms as f64 * 100.0 / base_ms as f64
        } else {
            0.0
        };
        if difference_ms > self.config.kalman.threshold_for_difference_event_ms
            && percentage > self.config.kalman.percentage_difference_threshold
        {
            warn!(
                trip = %trip.trip_id,
                stop_path_index,
                predicted_ms,
                base_ms,
                "kalman estimate diverges from base prediction"
            );
            self.diagnostics.record_event(DiagnosticEvent {
                kind: DiagnosticEventKind::PredictionVariation,
                vehicle_id: status.vehicle_id.clone(),
                trip_id: trip.trip_id.clone(),
                stop_id: status
                    .destination_stop_id(stop_path_index)
                    .unwrap_or_default()
                    .into(),
                time: now,
                description: format!(
                    "kalman {predicted_ms}ms diverges from base {base_ms}ms by {difference_ms}ms"
                ),
            });
        }
        if self.config.store_segment_predictions {
            self.diagnostics.record_prediction(SegmentPrediction {
                trip_id: trip.trip_id.clone(),
                stop_path_index,
                vehicle_id: status.vehicle_id.clone(),
                travel_time_ms: predicted_ms,
                algorithm: "kalman",
                created_at: now,
            });
        }
        Some(predicted_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::VecSink;
    use crate::events::TemporalDifference;
    use crate::history::ScheduleTable;
    use crate::status::{AvlReport, SegmentProfile, SpatialMatch};
    use chrono::{NaiveDate, NaiveDateTime};

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn context(config: EngineConfig) -> (PredictionContext, Arc<VecSink>) {
        let mut table = ScheduleTable::new();
        table.insert("trip_1", 8 * 3600, false);
        let sink = Arc::new(VecSink::new());
        let ctx = PredictionContext::new(config, Arc::new(table), sink.clone());
        (ctx, sink)
    }

    fn event(
        vehicle: &str,
        index: usize,
        time: NaiveDateTime,
        kind: EventKind,
    ) -> ArrivalDeparture {
        ArrivalDeparture {
            vehicle_id: vehicle.into(),
            stop_id: format!("s{index}").into(),
            trip_id: "trip_1".into(),
            route_id: "route_a".into(),
            direction_id: Some("0".into()),
            stop_path_index: index,
            time,
            kind,
            scheduled_adherence: Some(TemporalDifference(0)),
        }
    }

    /// Departure from s1 then arrival at s2, `travel_secs` apart.
    fn record_traversal(ctx: &PredictionContext, vehicle: &str, day: u32, travel_secs: u32) {
        ctx.record_event(&event(vehicle, 1, at(day, 8, 0, 0), EventKind::Departure));
        ctx.record_event(&event(
            vehicle,
            2,
            at(day, 8, 0, 0) + Duration::seconds(travel_secs as i64),
            EventKind::Arrival,
        ));
    }

    fn status(vehicle: &str, now: NaiveDateTime, stop_path_index: usize) -> VehicleStatus {
        VehicleStatus {
            vehicle_id: vehicle.into(),
            avl: AvlReport {
                vehicle_id: vehicle.into(),
                time: now,
                latitude: 33.64,
                longitude: -117.84,
                speed: None,
                heading: None,
            },
            trip: TripProfile {
                trip_id: "trip_1".into(),
                route_id: "route_a".into(),
                direction_id: Some("0".into()),
                start_time_secs: 8 * 3600,
                frequency_based: false,
                segments: ["s0", "s1", "s2"]
                    .iter()
                    .map(|s| SegmentProfile {
                        stop_id: (*s).into(),
                        length_m: 500.0,
                        scheduled_travel_time_ms: 120_000,
                        scheduled_dwell_time_ms: 20_000,
                    })
                    .collect(),
            },
            spatial: SpatialMatch {
                stop_path_index,
                distance_along_segment_m: 250.0,
            },
            predictable: true,
            schedule_adherence: None,
            headway: None,
        }
    }

    #[test]
    fn first_vehicle_of_day_falls_back_to_schedule() {
        let (ctx, _) = context(EngineConfig::default());
        let status = status("v1", at(20, 8, 30, 0), 2);

        // Nothing recorded: the kalman strategy degrades all the way to the
        // timetable and leaves the error cache untouched.
        assert_eq!(ctx.travel_time_for_segment(&status, 2, status.avl.time), 120_000);
        assert!(ctx.error_cache().is_empty());
    }

    #[test]
    fn kalman_runs_at_min_days_and_stores_error() {
        let (ctx, _) = context(EngineConfig::default());

        // Three historical days: 380s, 420s, 400s (most recent first), plus
        // today's vehicle taking 300s.
        record_traversal(&ctx, "h1", 19, 380);
        record_traversal(&ctx, "h2", 18, 420);
        record_traversal(&ctx, "h3", 17, 400);
        record_traversal(&ctx, "v0", 20, 300);

        let status = status("v1", at(20, 8, 30, 0), 2);
        let predicted = ctx.travel_time_for_segment(&status, 2, status.avl.time);

        // Near-equal blend of last vehicle (300s) and the 400s history mean.
        assert!(
            (349_000..=351_000).contains(&predicted),
            "predicted {predicted}"
        );
        let error = ctx
            .error_cache()
            .error_value(&SegmentKey::new("trip_1", 2))
            .unwrap();
        assert!(error.error() > 0.0);
    }

    #[test]
    fn below_min_days_uses_base_prediction() {
        let (ctx, _) = context(EngineConfig::default());

        record_traversal(&ctx, "h1", 19, 380);
        record_traversal(&ctx, "h2", 18, 420);
        record_traversal(&ctx, "v0", 20, 300);

        let status = status("v1", at(20, 8, 30, 0), 2);
        let predicted = ctx.travel_time_for_segment(&status, 2, status.avl.time);

        // Base is the running average of all three accepted samples.
        let expected = (380_000 + 420_000 + 300_000) / 3;
        assert!((predicted - expected).abs() <= 1, "predicted {predicted}");
        assert!(ctx.error_cache().is_empty());
    }

    #[test]
    fn average_strategy_drops_out_of_bounds_samples() {
        let mut config = EngineConfig::default();
        config.travel_strategy = TravelTimeStrategy::HistoricalAverage;
        let (ctx, _) = context(config);

        for i in 0..10 {
            record_traversal(&ctx, &format!("good_{i}"), 20, 120);
        }
        // Two 9999s traversals, far beyond the 600s acceptance bound.
        record_traversal(&ctx, "bad_1", 20, 9_999);
        record_traversal(&ctx, "bad_2", 20, 9_999);

        let status = status("v1", at(20, 9, 0, 0), 2);
        assert_eq!(ctx.travel_time_for_segment(&status, 2, status.avl.time), 120_000);
    }

    #[test]
    fn generate_chains_travel_and_dwell() {
        let mut config = EngineConfig::default();
        config.travel_strategy = TravelTimeStrategy::Scheduled;
        config.dwell_strategy = DwellStrategy::Scheduled;
        let (ctx, _) = context(config);

        // Halfway along segment 1: 60s left of it, then 20s dwell at s1,
        // then the full 120s of segment 2.
        let now = at(20, 8, 30, 0);
        let status = status("v1", now, 1);
        let predictions = ctx.generate(&status);

        assert_eq!(predictions.len(), 3);
        assert_eq!(predictions[0].kind, EventKind::Arrival);
        assert_eq!(predictions[0].stop_id, "s1");
        assert_eq!(predictions[0].time, now + Duration::seconds(60));
        assert_eq!(predictions[1].kind, EventKind::Departure);
        assert_eq!(predictions[1].time, now + Duration::seconds(80));
        assert_eq!(predictions[2].kind, EventKind::Arrival);
        assert_eq!(predictions[2].stop_id, "s2");
        assert_eq!(predictions[2].time, now + Duration::seconds(200));
    }

    #[test]
    fn unpredictable_vehicle_gets_no_predictions() {
        let (ctx, _) = context(EngineConfig::default());
        let mut status = status("v1", at(20, 8, 30, 0), 1);
        status.predictable = false;
        assert!(ctx.generate(&status).is_empty());
    }

    #[test]
    fn populate_from_history_respects_route_filter() {
        let (ctx, _) = context(EngineConfig::default());

        let mut other = event("v9", 2, at(19, 9, 0, 0), EventKind::Arrival);
        other.route_id = "route_x".into();
        let source = vec![
            event("v1", 1, at(19, 8, 0, 0), EventKind::Departure),
            event("v1", 2, at(19, 8, 2, 0), EventKind::Arrival),
            other,
        ];

        let filter = RouteFilter::new(None, Some(regex::Regex::new("^route_x$").unwrap()));
        let recorded = ctx
            .populate_from_history(&source, &filter, at(19, 0, 0, 0), at(20, 0, 0, 0))
            .unwrap();
        assert_eq!(recorded, 2);
        assert_eq!(ctx.stop_events().num_buckets(), 2);
    }

    #[test]
    fn warm_up_window_follows_config() {
        let source = vec![
            event("v1", 1, at(18, 8, 0, 0), EventKind::Departure),
            event("v1", 2, at(18, 8, 2, 0), EventKind::Arrival),
        ];

        // Disabled by default.
        let (ctx, _) = context(EngineConfig::default());
        assert_eq!(
            ctx.warm_up(&source, &RouteFilter::default(), at(20, 4, 0, 0))
                .unwrap(),
            0
        );

        let mut config = EngineConfig::default();
        config.cache.warmup_days = 3;
        let (ctx, _) = context(config);
        assert_eq!(
            ctx.warm_up(&source, &RouteFilter::default(), at(20, 4, 0, 0))
                .unwrap(),
            2
        );
    }

    #[test]
    fn divergence_emits_diagnostic_event() {
        let mut config = EngineConfig::default();
        // Force a large gap between base and kalman output.
        config.kalman.threshold_for_difference_event_ms = 10_000;
        config.kalman.percentage_difference_threshold = 1.0;
        let (ctx, sink) = context(config);

        record_traversal(&ctx, "h1", 19, 380);
        record_traversal(&ctx, "h2", 18, 420);
        record_traversal(&ctx, "h3", 17, 400);
        record_traversal(&ctx, "v0", 20, 300);

        let status = status("v1", at(20, 8, 30, 0), 2);
        ctx.travel_time_for_segment(&status, 2, status.avl.time);

        let events = sink.events.lock().unwrap();
        assert!(
            events
                .iter()
                .any(|e| e.kind == DiagnosticEventKind::PredictionVariation)
        );
        let predictions = sink.predictions.lock().unwrap();
        assert_eq!(predictions.len(), 1);
    }
}
