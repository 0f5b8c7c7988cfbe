use chrono::NaiveDateTime;
use regex::Regex;
use thiserror::Error;

use crate::events::ArrivalDeparture;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("replay source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("replay source returned malformed data: {0}")]
    MalformedData(String),
}

/// Source of persisted arrival/departure events, used to warm the caches at
/// startup. The storage layer supplies an implementation; tests use an
/// in-memory Vec.
pub trait HistoryReplaySource: Send + Sync {
    /// Events observed in `[start, end)`, in any order.
    fn events_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ArrivalDeparture>, ReplayError>;
}

impl HistoryReplaySource for Vec<ArrivalDeparture> {
    fn events_between(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ArrivalDeparture>, ReplayError> {
        Ok(self
            .iter()
            .filter(|e| e.time >= start && e.time < end)
            .cloned()
            .collect())
    }
}

/// Restricts which routes participate in cache warm-up. An empty filter
/// allows everything; the deny pattern wins over the allow pattern.
#[derive(Debug, Clone, Default)]
pub struct RouteFilter {
    allow: Option<Regex>,
    deny: Option<Regex>,
}

impl RouteFilter {
    pub fn new(allow: Option<Regex>, deny: Option<Regex>) -> Self {
        RouteFilter { allow, deny }
    }

    pub fn allows(&self, route_id: &str) -> bool {
        if let Some(deny) = &self.deny
            && deny.is_match(route_id)
        {
            return false;
        }
        match &self.allow {
            Some(allow) => allow.is_match(route_id),
            None => true,
        }
    }
}
