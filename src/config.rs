use serde::Deserialize;

/// Selects which travel-time estimator runs. Resolved once at startup;
/// every variant falls back down the chain
/// Kalman -> HistoricalAverage -> LastVehicle -> Scheduled when it has
/// insufficient data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelTimeStrategy {
    Scheduled,
    HistoricalAverage,
    LastVehicle,
    KalmanScheduled,
    KalmanFrequency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DwellStrategy {
    Scheduled,
    HistoricalAverage,
    Rls,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadwayStrategy {
    LastArrival,
    LastDeparture,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How many trailing days of persisted events to replay at startup.
    /// 0 disables warm-up.
    pub warmup_days: u32,
    /// How many consecutive day keys each event is filed under in the
    /// trip-instance index. 1 in normal operation; higher values warm the
    /// cache faster at the cost of attributing events to days they did not
    /// occur on.
    pub days_to_file: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            warmup_days: 0,
            days_to_file: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TravelFilterConfig {
    pub min_travel_time_ms: i64,
    pub max_travel_time_ms: i64,
    /// Seconds early a correlated event may be before its sample is dropped.
    pub min_schedule_adherence_secs: i64,
    /// Seconds late a correlated event may be before its sample is dropped.
    pub max_schedule_adherence_secs: i64,
}

impl Default for TravelFilterConfig {
    fn default() -> Self {
        TravelFilterConfig {
            min_travel_time_ms: 0,
            max_travel_time_ms: 600_000,
            min_schedule_adherence_secs: 600,
            max_schedule_adherence_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DwellFilterConfig {
    pub min_dwell_time_ms: i64,
    pub max_dwell_time_ms: i64,
    pub min_headway_ms: i64,
    pub max_headway_ms: i64,
}

impl Default for DwellFilterConfig {
    fn default() -> Self {
        DwellFilterConfig {
            min_dwell_time_ms: 1_000,
            max_dwell_time_ms: 120_000,
            min_headway_ms: 1_000,
            max_headway_ms: 3_600_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KalmanConfig {
    /// Minimum historical day count before the filter is trusted over the
    /// base prediction.
    pub min_days: usize,
    /// At most this many historical days feed one filter step.
    pub max_days: usize,
    /// How many calendar days back to search for those samples.
    pub max_days_to_search: usize,
    /// Error variance assumed for a segment that has never been predicted.
    pub initial_error_value: f64,
    /// Blend against the historical mean rather than the single most recent
    /// historical day.
    pub use_average: bool,
    /// Interpolate the partially traversed first segment from the full
    /// Kalman estimate instead of the scheduled remainder.
    pub use_kalman_for_partial: bool,
    /// Absolute divergence from the base prediction (ms) below which no
    /// divergence event is considered.
    pub threshold_for_difference_event_ms: i64,
    /// Relative divergence (percent) that, together with the absolute
    /// threshold, triggers a divergence event.
    pub percentage_difference_threshold: f64,
}

impl Default for KalmanConfig {
    fn default() -> Self {
        KalmanConfig {
            min_days: 3,
            max_days: 3,
            max_days_to_search: 30,
            initial_error_value: 100.0,
            use_average: true,
            use_kalman_for_partial: true,
            threshold_for_difference_event_ms: 60_000,
            percentage_difference_threshold: 50.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FrequencyConfig {
    /// Width of one time-of-day bucket, in seconds.
    pub bucket_width_secs: i64,
    /// Hour of day the bucket clock starts from. Buckets are measured in
    /// seconds after this hour, so late-night service before it lands in
    /// negative buckets rather than wrapping onto the next day.
    pub day_start_hour: u32,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        FrequencyConfig {
            bucket_width_secs: 10_800,
            day_start_hour: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DwellModelConfig {
    /// RLS forgetting factor, 0..1. Lower forgets old samples faster.
    pub lambda: f64,
}

impl Default for DwellModelConfig {
    fn default() -> Self {
        DwellModelConfig { lambda: 0.75 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeadwayConfig {
    /// A departure-based headway older than this is treated as stale and
    /// discarded.
    pub staleness_ms: i64,
    /// If the vehicle's own event sits deeper than this in the stop's event
    /// list the measurement is also considered stale.
    pub max_scan_depth: usize,
}

impl Default for HeadwayConfig {
    fn default() -> Self {
        HeadwayConfig {
            staleness_ms: 1_200_000,
            max_scan_depth: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub travel_filter: TravelFilterConfig,
    pub dwell_filter: DwellFilterConfig,
    pub kalman: KalmanConfig,
    pub frequency: FrequencyConfig,
    pub dwell_model: DwellModelConfig,
    pub headway: HeadwayConfig,
    pub travel_strategy: TravelTimeStrategy,
    pub dwell_strategy: DwellStrategy,
    pub headway_strategy: HeadwayStrategy,
    /// Record every successful per-segment estimate to the diagnostics sink
    /// for later accuracy analysis.
    pub store_segment_predictions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache: CacheConfig::default(),
            travel_filter: TravelFilterConfig::default(),
            dwell_filter: DwellFilterConfig::default(),
            kalman: KalmanConfig::default(),
            frequency: FrequencyConfig::default(),
            dwell_model: DwellModelConfig::default(),
            headway: HeadwayConfig::default(),
            travel_strategy: TravelTimeStrategy::KalmanScheduled,
            dwell_strategy: DwellStrategy::HistoricalAverage,
            headway_strategy: HeadwayStrategy::LastDeparture,
            store_segment_predictions: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_uses_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{
                "travel_strategy": "historical_average",
                "kalman": { "min_days": 5 }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.travel_strategy, TravelTimeStrategy::HistoricalAverage);
        assert_eq!(cfg.kalman.min_days, 5);
        assert_eq!(cfg.kalman.max_days_to_search, 30);
        assert_eq!(cfg.frequency.bucket_width_secs, 10_800);
        assert_eq!(cfg.headway_strategy, HeadwayStrategy::LastDeparture);
    }

    #[test]
    fn empty_config_is_complete() {
        let cfg: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.kalman.initial_error_value, 100.0);
        assert_eq!(cfg.dwell_filter.max_dwell_time_ms, 120_000);
        assert_eq!(cfg.headway.staleness_ms, 1_200_000);
        assert_eq!(cfg.cache.days_to_file, 1);
    }
}
