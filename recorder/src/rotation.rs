//! File rotation policy

use gputrace_shared::utils::time::utc_hour;
use std::fmt;
use std::time::Duration;

/// Limits that close the active file and start a new one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Rotate once the file grows past this many bytes
    pub max_file_size: u64,

    /// Rotate once this many microseconds have passed since the last rotation
    pub interval_micros: u64,
}

impl RotationPolicy {
    pub fn new(max_file_size: u64, interval: Duration) -> Self {
        Self {
            max_file_size,
            interval_micros: interval.as_micros().min(u64::MAX as u128) as u64,
        }
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::new(u64::MAX, Duration::from_secs(600))
    }
}

/// What the policy needs to know about the active file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// UTC hour the file was opened in
    pub opened_at_hour: u32,
    pub bytes_written: u64,
    /// Epoch micros of the last rotation (or of the file open)
    pub last_rotation_micros: u64,
}

/// Why a rotation was triggered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationReason {
    HourChanged { from: u32, to: u32 },
    SizeExceeded { bytes: u64, limit: u64 },
    IntervalElapsed { elapsed_micros: u64 },
}

impl RotationReason {
    /// Short label used for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RotationReason::HourChanged { .. } => "hour",
            RotationReason::SizeExceeded { .. } => "size",
            RotationReason::IntervalElapsed { .. } => "interval",
        }
    }
}

impl fmt::Display for RotationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationReason::HourChanged { from, to } => {
                write!(f, "UTC hour changed from {} to {}", from, to)
            }
            RotationReason::SizeExceeded { bytes, limit } => {
                write!(f, "file size {} exceeds {} bytes", bytes, limit)
            }
            RotationReason::IntervalElapsed { elapsed_micros } => {
                write!(f, "file open for {}s", elapsed_micros / 1_000_000)
            }
        }
    }
}

/// Decide whether the active file must be rotated at `now_micros`.
///
/// Checks, in order: hour boundary, file size, rotation interval.
pub fn rotation_reason(
    stats: &SessionStats,
    now_micros: u64,
    policy: &RotationPolicy,
) -> Option<RotationReason> {
    let hour = utc_hour(now_micros);
    if hour != stats.opened_at_hour {
        return Some(RotationReason::HourChanged {
            from: stats.opened_at_hour,
            to: hour,
        });
    }

    if stats.bytes_written > policy.max_file_size {
        return Some(RotationReason::SizeExceeded {
            bytes: stats.bytes_written,
            limit: policy.max_file_size,
        });
    }

    let elapsed_micros = now_micros.saturating_sub(stats.last_rotation_micros);
    if elapsed_micros > policy.interval_micros {
        return Some(RotationReason::IntervalElapsed { elapsed_micros });
    }

    None
}

/// Boolean form of [`rotation_reason`]
pub fn should_rotate(stats: &SessionStats, now_micros: u64, policy: &RotationPolicy) -> bool {
    rotation_reason(stats, now_micros, policy).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: u64 = 3_600_000_000;
    // 2021-03-04T05:00:00Z
    const FIVE_AM: u64 = 1_614_834_000_000_000;

    fn stats_at(opened: u64) -> SessionStats {
        SessionStats {
            opened_at_hour: utc_hour(opened),
            bytes_written: 3,
            last_rotation_micros: opened,
        }
    }

    #[test]
    fn test_no_rotation_within_limits() {
        let policy = RotationPolicy::default();
        let stats = stats_at(FIVE_AM);

        assert!(!should_rotate(&stats, FIVE_AM + 1_000_000, &policy));
        assert_eq!(rotation_reason(&stats, FIVE_AM, &policy), None);
    }

    #[test]
    fn test_rotates_on_hour_change() {
        let policy = RotationPolicy::default();
        let stats = stats_at(FIVE_AM + HOUR - 1_000);

        assert_eq!(
            rotation_reason(&stats, FIVE_AM + HOUR, &policy),
            Some(RotationReason::HourChanged { from: 5, to: 6 })
        );
    }

    #[test]
    fn test_rotates_on_size() {
        let policy = RotationPolicy::new(1024, Duration::from_secs(600));
        let mut stats = stats_at(FIVE_AM);

        stats.bytes_written = 1024;
        assert!(!should_rotate(&stats, FIVE_AM, &policy));

        stats.bytes_written = 1025;
        assert_eq!(
            rotation_reason(&stats, FIVE_AM, &policy),
            Some(RotationReason::SizeExceeded {
                bytes: 1025,
                limit: 1024
            })
        );
    }

    #[test]
    fn test_rotates_after_interval() {
        let policy = RotationPolicy::new(u64::MAX, Duration::from_secs(600));
        let stats = stats_at(FIVE_AM);

        assert!(!should_rotate(&stats, FIVE_AM + 600_000_000, &policy));
        assert_eq!(
            rotation_reason(&stats, FIVE_AM + 600_000_001, &policy),
            Some(RotationReason::IntervalElapsed {
                elapsed_micros: 600_000_001
            })
        );
    }

    #[test]
    fn test_clock_going_backwards_within_hour() {
        let policy = RotationPolicy::default();
        let stats = stats_at(FIVE_AM + 10_000_000);

        assert!(!should_rotate(&stats, FIVE_AM, &policy));
    }

    #[test]
    fn test_hour_check_wins_over_size() {
        let policy = RotationPolicy::new(1, Duration::from_secs(600));
        let mut stats = stats_at(FIVE_AM);
        stats.bytes_written = 10;

        let reason = rotation_reason(&stats, FIVE_AM + HOUR, &policy).unwrap();
        assert_eq!(reason.as_str(), "hour");
    }
}
