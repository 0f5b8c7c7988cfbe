use ahash::AHashMap;
use chrono::{Days, NaiveDateTime};
use dashmap::DashMap;
use itertools::Itertools;
use tracing::debug;

use crate::config::FrequencyConfig;
use crate::events::{ArrivalDeparture, TripInstanceKey};
use crate::history::averages::{bucket_start, seconds_from_day_start};

/// Schedule lookups this engine needs but does not own: the static GTFS
/// loader supplies an implementation. A trip the resolver does not know is
/// not an error; the event referencing it is skipped.
pub trait TripResolver: Send + Sync {
    /// Scheduled start time of the trip, seconds after midnight.
    fn start_time_secs(&self, trip_id: &str) -> Option<i64>;

    /// Whether the trip runs as frequency-based (headway) service rather
    /// than to a fixed timetable.
    fn is_frequency_based(&self, trip_id: &str) -> bool;
}

/// In-memory resolver backed by a plain table. Enough for deployments that
/// preload the schedule, and for tests.
#[derive(Default)]
pub struct ScheduleTable {
    trips: AHashMap<String, (i64, bool)>,
}

impl ScheduleTable {
    pub fn new() -> Self {
        ScheduleTable {
            trips: AHashMap::new(),
        }
    }

    pub fn insert(&mut self, trip_id: &str, start_time_secs: i64, frequency_based: bool) {
        self.trips
            .insert(trip_id.to_string(), (start_time_secs, frequency_based));
    }
}

impl TripResolver for ScheduleTable {
    fn start_time_secs(&self, trip_id: &str) -> Option<i64> {
        self.trips.get(trip_id).map(|(start, _)| *start)
    }

    fn is_frequency_based(&self, trip_id: &str) -> bool {
        self.trips
            .get(trip_id)
            .map(|(_, freq)| *freq)
            .unwrap_or(false)
    }
}

/// The matched departure/arrival endpoints of one segment traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelTimePair {
    pub departure: ArrivalDeparture,
    pub arrival: ArrivalDeparture,
}

impl TravelTimePair {
    pub fn travel_time_ms(&self) -> i64 {
        crate::ms_between(self.arrival.time, self.departure.time)
    }
}

/// The matched arrival/departure endpoints of one stop visit.
#[derive(Debug, Clone, PartialEq)]
pub struct DwellTimePair {
    pub arrival: ArrivalDeparture,
    pub departure: ArrivalDeparture,
}

impl DwellTimePair {
    pub fn dwell_time_ms(&self) -> i64 {
        crate::ms_between(self.departure.time, self.arrival.time)
    }
}

/// Arrival/departure events indexed by trip instance (trip, service day,
/// start time of day).
///
/// Each event is filed under `days_to_file` consecutive day keys. Normal
/// operation files one; filing more makes a freshly started process see
/// "yesterday's" data sooner during diagnostics at the cost of attributing
/// events to days they did not occur on.
///
/// Scheduled trips key on their timetabled start time. Frequency trips have
/// no meaningful fixed start, so their instances key on the time-of-day
/// bucket the event fell in, which is what lets the same bucket line up
/// across days.
pub struct TripHistoryCache {
    events: DashMap<TripInstanceKey, Vec<ArrivalDeparture>>,
    days_to_file: u32,
    frequency: FrequencyConfig,
}

impl TripHistoryCache {
    pub fn new(days_to_file: u32, frequency: FrequencyConfig) -> Self {
        TripHistoryCache {
            events: DashMap::new(),
            days_to_file: days_to_file.max(1),
            frequency,
        }
    }

    /// The start-time component of the instance key for an event of this
    /// trip at this time. None when the resolver does not know the trip.
    pub fn instance_start_secs(
        &self,
        trip_id: &str,
        time: NaiveDateTime,
        resolver: &dyn TripResolver,
    ) -> Option<i64> {
        let scheduled_start = resolver.start_time_secs(trip_id)?;
        if resolver.is_frequency_based(trip_id) {
            Some(bucket_start(
                seconds_from_day_start(time, self.frequency.day_start_hour),
                self.frequency.bucket_width_secs,
            ))
        } else {
            Some(scheduled_start)
        }
    }

    /// Files the event under its trip instance. Returns None (and skips the
    /// event) when the resolver does not know the trip, e.g. an event
    /// replayed from before a schedule change.
    pub fn record(
        &self,
        event: &ArrivalDeparture,
        resolver: &dyn TripResolver,
    ) -> Option<TripInstanceKey> {
        let Some(start_time_secs) =
            self.instance_start_secs(&event.trip_id, event.time, resolver)
        else {
            debug!(
                trip = %event.trip_id,
                vehicle = %event.vehicle_id,
                "trip not in current schedule, skipping trip-history record"
            );
            return None;
        };

        let day = crate::service_day(event.time);
        for days_back in 0..self.days_to_file {
            let Some(filed_day) = day.checked_sub_days(Days::new(days_back as u64)) else {
                continue;
            };
            let key = TripInstanceKey::on_day(&event.trip_id, filed_day, start_time_secs);
            self.events
                .entry(key)
                .or_default()
                .push(event.clone());
        }
        Some(TripInstanceKey::on_day(&event.trip_id, day, start_time_secs))
    }

    /// Events for one exact trip instance, newest first.
    pub fn query(&self, key: &TripInstanceKey) -> Option<Vec<ArrivalDeparture>> {
        let entry = self.events.get(key)?;
        Some(
            entry
                .iter()
                .cloned()
                .sorted_by(|a, b| b.time.cmp(&a.time))
                .collect(),
        )
    }

    pub fn num_buckets(&self) -> usize {
        self.events.len()
    }

    /// The arrival that closed the given segment within one trip instance.
    pub fn find_arrival_at<'a>(
        &self,
        events: &'a [ArrivalDeparture],
        stop_path_index: usize,
    ) -> Option<&'a ArrivalDeparture> {
        events
            .iter()
            .find(|e| e.is_arrival() && e.stop_path_index == stop_path_index)
    }

    /// The departure that opened the segment an arrival closed: previous
    /// stop path index, same vehicle.
    pub fn find_previous_departure<'a>(
        &self,
        events: &'a [ArrivalDeparture],
        arrival: &ArrivalDeparture,
    ) -> Option<&'a ArrivalDeparture> {
        if arrival.stop_path_index == 0 {
            return None;
        }
        events.iter().find(|e| {
            e.is_departure()
                && e.stop_path_index == arrival.stop_path_index - 1
                && e.vehicle_id == arrival.vehicle_id
        })
    }

    /// The arrival that opened the stop visit a departure closed: same
    /// stop, same vehicle.
    pub fn find_previous_arrival<'a>(
        &self,
        events: &'a [ArrivalDeparture],
        departure: &ArrivalDeparture,
    ) -> Option<&'a ArrivalDeparture> {
        events.iter().find(|e| {
            e.is_arrival()
                && e.stop_id == departure.stop_id
                && e.vehicle_id == departure.vehicle_id
                && e.stop_path_index == departure.stop_path_index
        })
    }

    /// Segment traversal ending in `arrival`, if this instance's history
    /// holds the matching departure.
    pub fn travel_time_pair(
        &self,
        key: &TripInstanceKey,
        arrival: &ArrivalDeparture,
    ) -> Option<TravelTimePair> {
        if !arrival.is_arrival() {
            return None;
        }
        let events = self.query(key)?;
        let departure = self.find_previous_departure(&events, arrival)?;
        Some(TravelTimePair {
            departure: departure.clone(),
            arrival: arrival.clone(),
        })
    }

    /// Stop visit ending in `departure`, if this instance's history holds
    /// the matching arrival.
    pub fn dwell_time_pair(
        &self,
        key: &TripInstanceKey,
        departure: &ArrivalDeparture,
    ) -> Option<DwellTimePair> {
        if !departure.is_departure() {
            return None;
        }
        let events = self.query(key)?;
        let arrival = self.find_previous_arrival(&events, departure)?;
        Some(DwellTimePair {
            arrival: arrival.clone(),
            departure: departure.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use chrono::{NaiveDate, NaiveDateTime};

    fn resolver() -> ScheduleTable {
        let mut table = ScheduleTable::new();
        table.insert("trip_1", 8 * 3600, false);
        table
    }

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn event(
        trip: &str,
        index: usize,
        time: NaiveDateTime,
        kind: EventKind,
    ) -> ArrivalDeparture {
        ArrivalDeparture {
            vehicle_id: "v1".into(),
            stop_id: format!("s{index}").into(),
            trip_id: trip.into(),
            route_id: "route_a".into(),
            direction_id: Some("0".into()),
            stop_path_index: index,
            time,
            kind,
            scheduled_adherence: None,
        }
    }

    #[test]
    fn record_and_query_same_instance() {
        let cache = TripHistoryCache::new(1, FrequencyConfig::default());
        let resolver = resolver();
        let key = cache
            .record(
                &event("trip_1", 2, at(20, 8, 10, 0), EventKind::Arrival),
                &resolver,
            )
            .unwrap();

        assert_eq!(key, TripInstanceKey::on_day("trip_1", at(20, 0, 0, 0).date(), 8 * 3600));
        assert_eq!(cache.query(&key).unwrap().len(), 1);
    }

    #[test]
    fn unknown_trip_is_skipped() {
        let cache = TripHistoryCache::new(1, FrequencyConfig::default());
        let resolver = resolver();
        assert!(
            cache
                .record(
                    &event("trip_unknown", 2, at(20, 8, 10, 0), EventKind::Arrival),
                    &resolver,
                )
                .is_none()
        );
        assert_eq!(cache.num_buckets(), 0);
    }

    #[test]
    fn multi_day_filing_lands_on_previous_days() {
        let cache = TripHistoryCache::new(3, FrequencyConfig::default());
        let resolver = resolver();
        cache.record(
            &event("trip_1", 2, at(20, 8, 10, 0), EventKind::Arrival),
            &resolver,
        );

        for day in [18, 19, 20] {
            let key = TripInstanceKey::on_day("trip_1", at(day, 0, 0, 0).date(), 8 * 3600);
            assert_eq!(cache.query(&key).unwrap().len(), 1, "day {day}");
        }
        assert!(
            cache
                .query(&TripInstanceKey::on_day(
                    "trip_1",
                    at(21, 0, 0, 0).date(),
                    8 * 3600
                ))
                .is_none()
        );
    }

    #[test]
    fn travel_pair_matches_departure_to_arrival() {
        let cache = TripHistoryCache::new(1, FrequencyConfig::default());
        let resolver = resolver();
        let departure = event("trip_1", 1, at(20, 8, 10, 0), EventKind::Departure);
        let arrival = event("trip_1", 2, at(20, 8, 12, 30), EventKind::Arrival);
        cache.record(&departure, &resolver);
        let key = cache.record(&arrival, &resolver).unwrap();

        let pair = cache.travel_time_pair(&key, &arrival).unwrap();
        assert_eq!(pair.travel_time_ms(), 150_000);
        assert_eq!(pair.departure, departure);
    }

    #[test]
    fn dwell_pair_matches_arrival_to_departure() {
        let cache = TripHistoryCache::new(1, FrequencyConfig::default());
        let resolver = resolver();
        let arrival = event("trip_1", 2, at(20, 8, 12, 30), EventKind::Arrival);
        let departure = event("trip_1", 2, at(20, 8, 13, 0), EventKind::Departure);
        cache.record(&arrival, &resolver);
        let key = cache.record(&departure, &resolver).unwrap();

        let pair = cache.dwell_time_pair(&key, &departure).unwrap();
        assert_eq!(pair.dwell_time_ms(), 30_000);
    }

    #[test]
    fn frequency_trips_key_on_time_of_day_bucket() {
        let cache = TripHistoryCache::new(1, FrequencyConfig::default());
        let mut table = ScheduleTable::new();
        table.insert("freq_1", 0, true);

        // 08:10 with a 02:00 day start is 22_200s in, bucket 21_600.
        let key = cache
            .record(
                &event("freq_1", 2, at(20, 8, 10, 0), EventKind::Arrival),
                &table,
            )
            .unwrap();
        assert_eq!(key.start_time_secs, 21_600);

        // 09:30 falls in the same 3h bucket, same instance.
        let later = cache
            .record(
                &event("freq_1", 3, at(20, 9, 30, 0), EventKind::Arrival),
                &table,
            )
            .unwrap();
        assert_eq!(key, later);
    }

    #[test]
    fn travel_pair_needs_the_previous_departure() {
        let cache = TripHistoryCache::new(1, FrequencyConfig::default());
        let resolver = resolver();
        let arrival = event("trip_1", 2, at(20, 8, 12, 30), EventKind::Arrival);
        let key = cache.record(&arrival, &resolver).unwrap();
        assert!(cache.travel_time_pair(&key, &arrival).is_none());
    }
}
