// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

use dashmap::DashMap;
use itertools::Itertools;
use tracing::debug;

use crate::events::{ArrivalDeparture, StopDayKey};

/// Arrival/departure events indexed by (stop, service day).
///
/// Events append in whatever order the matcher emits them; `query` sorts
/// newest-first before returning, so consumers can always scan from "now"
/// backwards. Append and fetch-or-create happen inside one `entry` call, so
/// two vehicles hitting the same stop concurrently cannot lose an event.
pub struct StopEventCache {
    events: DashMap<StopDayKey, Vec<ArrivalDeparture>>,
}

impl StopEventCache {
    pub fn new() -> Self {
        StopEventCache {
            events: DashMap::new(),
        }
    }

    /// Files the event under its stop and service day. The same event
    /// recorded twice appends twice: this index is an append-only log and
    /// dedup is the matcher's responsibility.
    pub fn record(&self, event: &ArrivalDeparture) -> StopDayKey {
        let key = StopDayKey::new(&event.stop_id, event.time);
        debug!(stop = %event.stop_id, vehicle = %event.vehicle_id, "recording stop event");
        self.events
            .entry(key.clone())
            .or_default()
            .push(event.clone());
        key
    }

    /// All events for the stop on the key's service day, newest first.
    /// None when the bucket has never been written.
    pub fn query(&self, key: &StopDayKey) -> Option<Vec<ArrivalDeparture>> {
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
}

impl Default for StopEventCache {
    fn default() -> Self {
        Self::new()
    }
}
