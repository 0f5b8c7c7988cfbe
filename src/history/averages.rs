// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use std::collections::BTreeMap;

use chrono::{NaiveDateTime, Timelike};
use compact_str::CompactString;
use dashmap::DashMap;
use tracing::debug;

use crate::events::{ArrivalDeparture, TripInstanceKey};
use crate::filters::{DwellTimeFilter, TravelTimeFilter};
use crate::history::trip_instance::TripHistoryCache;

/// Which per-segment statistic a sample contributes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatKind {
    TravelTime,
    DwellTime,
}

/// Incrementally maintained mean. One per (segment, statistic), updated on
/// every accepted sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalAverage {
    count: u64,
    average: f64,
}

impl HistoricalAverage {
    pub fn new() -> Self {
        HistoricalAverage {
            count: 0,
            average: 0.0,
        }
    }

    pub fn update(&mut self, value_ms: i64) {
        self.count += 1;
        self.average += (value_ms as f64 - self.average) / self.count as f64;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn average_ms(&self) -> f64 {
        self.average
    }
}

impl Default for HistoricalAverage {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SegmentStatKey {
    pub trip_id: CompactString,
    pub stop_path_index: usize,
    pub kind: StatKind,
}

impl SegmentStatKey {
    pub fn new(trip_id: &str, stop_path_index: usize, kind: StatKind) -> Self {
        SegmentStatKey {
            trip_id: CompactString::from(trip_id),
            stop_path_index,
            kind,
        }
    }
}

/// Running travel and dwell averages for schedule-based service, one flat
/// average per segment.
pub struct ScheduledAverageCache {
    averages: DashMap<SegmentStatKey, HistoricalAverage>,
}

impl ScheduledAverageCache {
    pub fn new() -> Self {
        ScheduledAverageCache {
            averages: DashMap::new(),
        }
    }

    pub fn add_sample(&self, key: SegmentStatKey, value_ms: i64) {
        self.averages
            .entry(key)
            .or_default()
            .update(value_ms);
    }

    pub fn average(&self, key: &SegmentStatKey) -> Option<HistoricalAverage> {
        self.averages.get(key).map(|a| *a)
    }

    /// Folds one matched event into the running averages: an arrival closes
    /// a travel-time sample, a departure closes a dwell-time sample. Samples
    /// whose counterpart event is missing or whose duration fails the filter
    /// are dropped.
    pub fn record_event(
        &self,
        event: &ArrivalDeparture,
        instance: &TripInstanceKey,
        trip_history: &TripHistoryCache,
        travel_filter: &TravelTimeFilter,
        dwell_filter: &DwellTimeFilter,
    ) {
        if event.is_arrival() {
            let Some(pair) = trip_history.travel_time_pair(instance, event) else {
                return;
            };
            if !travel_filter.accepts(&pair.departure, &pair.arrival) {
                return;
            }
            self.add_sample(
                SegmentStatKey::new(&event.trip_id, event.stop_path_index, StatKind::TravelTime),
                pair.travel_time_ms(),
            );
        } else {
            let Some(pair) = trip_history.dwell_time_pair(instance, event) else {
                return;
            };
            if !dwell_filter.accepts_duration(pair.dwell_time_ms()) {
                return;
            }
            self.add_sample(
                SegmentStatKey::new(&event.trip_id, event.stop_path_index, StatKind::DwellTime),
                pair.dwell_time_ms(),
            );
        }
    }

    pub fn len(&self) -> usize {
        self.averages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.averages.is_empty()
    }
}

impl Default for ScheduledAverageCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Seconds since the bucket clock's day start. Service before `day_start_hour`
/// lands negative instead of wrapping to the next day.
pub fn seconds_from_day_start(time: NaiveDateTime, day_start_hour: u32) -> i64 {
    time.num_seconds_from_midnight() as i64 - (day_start_hour as i64) * 3600
}

/// Floor of `secs` to its bucket. Euclidean so negative (pre-day-start)
/// seconds still bucket consistently.
pub fn bucket_start(secs: i64, bucket_width_secs: i64) -> i64 {
    secs.div_euclid(bucket_width_secs) * bucket_width_secs
}

/// Running averages for frequency-based service, bucketed by time of day.
/// The same segment at 08:00 and at 22:00 keeps separate statistics.
pub struct FrequencyAverageCache {
    averages: DashMap<SegmentStatKey, BTreeMap<i64, HistoricalAverage>>,
    bucket_width_secs: i64,
    day_start_hour: u32,
}

impl FrequencyAverageCache {
    pub fn new(bucket_width_secs: i64, day_start_hour: u32) -> Self {
        FrequencyAverageCache {
            averages: DashMap::new(),
            bucket_width_secs,
            day_start_hour,
        }
    }

    pub fn bucket_width_secs(&self) -> i64 {
        self.bucket_width_secs
    }

    pub fn bucket_for(&self, time: NaiveDateTime) -> i64 {
        bucket_start(
            seconds_from_day_start(time, self.day_start_hour),
            self.bucket_width_secs,
        )
    }

    pub fn add_sample(&self, key: SegmentStatKey, time: NaiveDateTime, value_ms: i64) {
        let bucket = self.bucket_for(time);
        self.averages
            .entry(key)
            .or_default()
            .entry(bucket)
            .or_default()
            .update(value_ms);
    }

    /// The average for the bucket covering `time`. None when the bucket has
    /// never seen a sample.
    pub fn average(&self, key: &SegmentStatKey, time: NaiveDateTime) -> Option<HistoricalAverage> {
        let bucket = self.bucket_for(time);
        let buckets = self.averages.get(key)?;
        let matches: Vec<HistoricalAverage> = buckets
            .range(bucket..bucket + self.bucket_width_secs)
            .map(|(_, avg)| *avg)
            .collect();
        // Bucket starts are aligned to the width, so more than one hit means
        // the map was written with a different width. Treat that as no data.
        if matches.len() == 1 {
            Some(matches[0])
        } else {
            if matches.len() > 1 {
                debug!(
                    ?key,
                    bucket,
                    hits = matches.len(),
                    "multiple average buckets inside one window, ignoring"
                );
            }
            None
        }
    }

    pub fn record_event(
        &self,
        event: &ArrivalDeparture,
        instance: &TripInstanceKey,
        trip_history: &TripHistoryCache,
        travel_filter: &TravelTimeFilter,
        dwell_filter: &DwellTimeFilter,
    ) {
        if event.is_arrival() {
            let Some(pair) = trip_history.travel_time_pair(instance, event) else {
                return;
            };
            if !travel_filter.accepts(&pair.departure, &pair.arrival) {
                return;
            }
            self.add_sample(
                SegmentStatKey::new(&event.trip_id, event.stop_path_index, StatKind::TravelTime),
                pair.departure.time,
                pair.travel_time_ms(),
            );
        } else {
            let Some(pair) = trip_history.dwell_time_pair(instance, event) else {
                return;
            };
            if !dwell_filter.accepts_duration(pair.dwell_time_ms()) {
                return;
            }
            self.add_sample(
                SegmentStatKey::new(&event.trip_id, event.stop_path_index, StatKind::DwellTime),
                pair.arrival.time,
                pair.dwell_time_ms(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DwellFilterConfig, FrequencyConfig, TravelFilterConfig};
    use crate::events::EventKind;
    use crate::history::trip_instance::{ScheduleTable, TripResolver};
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 20)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn event(index: usize, time: NaiveDateTime, kind: EventKind) -> ArrivalDeparture {
        ArrivalDeparture {
            vehicle_id: "v1".into(),
            stop_id: format!("s{index}").into(),
            trip_id: "trip_1".into(),
            route_id: "route_a".into(),
            direction_id: Some("0".into()),
            stop_path_index: index,
            time,
            kind,
            scheduled_adherence: None,
        }
    }

    #[test]
    fn incremental_mean() {
        let mut avg = HistoricalAverage::new();
        avg.update(100);
        avg.update(200);
        avg.update(300);
        assert_eq!(avg.count(), 3);
        assert!((avg.average_ms() - 200.0).abs() < 1e-9);
    }

    #[test]
    fn scheduled_cache_folds_travel_samples() {
        let cache = ScheduledAverageCache::new();
        let trips = TripHistoryCache::new(1, FrequencyConfig::default());
        let mut table = ScheduleTable::new();
        table.insert("trip_1", 8 * 3600, false);
        let travel = TravelTimeFilter::new(TravelFilterConfig::default());
        let dwell = DwellTimeFilter::new(DwellFilterConfig::default(), &TravelFilterConfig::default());

        let dep = event(1, at(8, 10, 0), EventKind::Departure);
        let arr = event(2, at(8, 12, 0), EventKind::Arrival);
        trips.record(&dep, &table as &dyn TripResolver);
        let key = trips.record(&arr, &table as &dyn TripResolver).unwrap();
        cache.record_event(&arr, &key, &trips, &travel, &dwell);

        let stat = cache
            .average(&SegmentStatKey::new("trip_1", 2, StatKind::TravelTime))
            .unwrap();
        assert_eq!(stat.count(), 1);
        assert!((stat.average_ms() - 120_000.0).abs() < 1e-9);
    }

    #[test]
    fn scheduled_cache_rejects_out_of_bounds_travel() {
        let cache = ScheduledAverageCache::new();
        let trips = TripHistoryCache::new(1, FrequencyConfig::default());
        let mut table = ScheduleTable::new();
        table.insert("trip_1", 8 * 3600, false);
        let travel = TravelTimeFilter::new(TravelFilterConfig::default());
        let dwell = DwellTimeFilter::new(DwellFilterConfig::default(), &TravelFilterConfig::default());

        // 11 minutes, beyond the 600s max.
        let dep = event(1, at(8, 10, 0), EventKind::Departure);
        let arr = event(2, at(8, 21, 0), EventKind::Arrival);
        trips.record(&dep, &table as &dyn TripResolver);
        let key = trips.record(&arr, &table as &dyn TripResolver).unwrap();
        cache.record_event(&arr, &key, &trips, &travel, &dwell);

        assert!(
            cache
                .average(&SegmentStatKey::new("trip_1", 2, StatKind::TravelTime))
                .is_none()
        );
    }

    #[test]
    fn bucket_clock_starts_at_day_start_hour() {
        // day starts at 02:00: 08:15 is 6h15m = 22500s in
        assert_eq!(seconds_from_day_start(at(8, 15, 0), 2), 22_500);
        // 01:00 service is before the day start, negative
        assert_eq!(seconds_from_day_start(at(1, 0, 0), 2), -3_600);
        assert_eq!(bucket_start(22_500, 10_800), 10_800);
        assert_eq!(bucket_start(-3_600, 10_800), -10_800);
    }

    #[test]
    fn frequency_buckets_are_separate() {
        let cache = FrequencyAverageCache::new(10_800, 2);
        let key = SegmentStatKey::new("trip_1", 2, StatKind::TravelTime);

        cache.add_sample(key.clone(), at(8, 0, 0), 120_000);
        cache.add_sample(key.clone(), at(22, 0, 0), 240_000);

        let morning = cache.average(&key, at(8, 30, 0)).unwrap();
        let evening = cache.average(&key, at(22, 30, 0)).unwrap();
        assert!((morning.average_ms() - 120_000.0).abs() < 1e-9);
        assert!((evening.average_ms() - 240_000.0).abs() < 1e-9);
        assert!(cache.average(&key, at(14, 0, 0)).is_none());
    }
}
