//! Time-related utilities

use chrono::{DateTime, Timelike, Utc};
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds in one second
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Get the current system time in microseconds since UNIX epoch
pub fn system_time_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

/// Get the current system time in nanoseconds since UNIX epoch
pub fn system_time_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

fn to_datetime(micros_since_epoch: u64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros_since_epoch as i64).unwrap_or_default()
}

/// UTC hour of day (0-23) for an epoch timestamp in microseconds
pub fn utc_hour(micros_since_epoch: u64) -> u32 {
    to_datetime(micros_since_epoch).hour()
}

/// `YYYYMMDDHH` bucket name for an epoch timestamp in microseconds
pub fn hour_bucket(micros_since_epoch: u64) -> String {
    to_datetime(micros_since_epoch)
        .format("%Y%m%d%H")
        .to_string()
}
