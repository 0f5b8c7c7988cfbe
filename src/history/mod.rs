//! Rolling historical records of stop events plus the aggregated statistics
//! derived from them. Two event indexes (stop-day and trip-instance), the
//! running historical averages for scheduled and frequency service, and the
//! bulk-replay plumbing used to warm everything at startup.

pub mod averages;
pub mod replay;
pub mod stop_day;
pub mod trip_instance;

pub use averages::{FrequencyAverageCache, HistoricalAverage, ScheduledAverageCache, StatKind};
pub use replay::{HistoryReplaySource, ReplayError, RouteFilter};
pub use stop_day::StopEventCache;
pub use trip_instance::{ScheduleTable, TripHistoryCache, TripResolver};
