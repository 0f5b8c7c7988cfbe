// Copyright: Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Removal of the attribution is not allowed, as covered under the AGPL license

#![deny(
    clippy::mutable_key_type,
    clippy::map_entry,
    clippy::boxed_local,
    clippy::let_unit_value,
    clippy::redundant_allocation,
    clippy::bool_comparison,
    clippy::bind_instead_of_map,
    clippy::vec_box,
    clippy::while_let_loop,
    clippy::useless_asref,
    clippy::repeat_once,
    clippy::deref_addrof,
    clippy::suspicious_map,
    clippy::arc_with_non_send_sync,
    clippy::single_char_pattern,
    clippy::for_kv_map,
    clippy::let_and_return,
    clippy::iter_nth,
    clippy::iter_cloned_collect,
    clippy::bytes_nth,
    clippy::deprecated_clippy_cfg_attr,
    clippy::match_result_ok,
    clippy::cmp_owned,
    clippy::cmp_null,
    clippy::op_ref
)]

pub mod config;
pub mod diagnostics;
pub mod dwell;
pub mod error_cache;
pub mod events;
pub mod filters;
pub mod headway;
pub mod history;
pub mod kalman;
pub mod prediction;
pub mod status;

use chrono::{NaiveDate, NaiveDateTime};

/// Truncate a timestamp to its service day (local midnight).
pub fn service_day(time: NaiveDateTime) -> NaiveDate {
    time.date()
}

/// Milliseconds since the unix epoch for a local timestamp.
pub fn timestamp_ms(time: NaiveDateTime) -> i64 {
    time.and_utc().timestamp_millis()
}

/// Signed difference `later - earlier` in milliseconds.
pub fn ms_between(later: NaiveDateTime, earlier: NaiveDateTime) -> i64 {
    (later - earlier).num_milliseconds()
}
