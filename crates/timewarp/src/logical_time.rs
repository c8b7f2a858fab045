// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::{Duration, SystemTime};

/// A point on the logical timeline, in nanoseconds since the UNIX epoch.
///
/// Logical time equals real wall-clock time plus the offset of the [`Clock`][crate::Clock]
/// it was read from. Because the offset is signed, logical time can be earlier than the
/// real time, and a later reading can be smaller than an earlier one if the offset was
/// rewound in between.
///
/// All arithmetic saturates at [`LogicalTime::MIN`] and [`LogicalTime::MAX`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use timewarp::LogicalTime;
///
/// let start = LogicalTime::from_nanos(1_000);
/// let later = start.saturating_add(Duration::from_micros(1));
///
/// assert_eq!(later.as_nanos(), 2_000);
/// assert_eq!(later.saturating_duration_since(start), Duration::from_micros(1));
/// assert_eq!(start.saturating_duration_since(later), Duration::ZERO);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogicalTime(i64);

impl LogicalTime {
    /// The UNIX epoch, `1970-01-01T00:00:00Z`.
    pub const UNIX_EPOCH: Self = Self(0);

    /// The earliest representable logical time.
    pub const MIN: Self = Self(i64::MIN);

    /// The latest representable logical time. Timers scheduled this far out never fire.
    pub const MAX: Self = Self(i64::MAX);

    /// Creates a logical time from nanoseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Returns the number of nanoseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Adds a duration, saturating at [`LogicalTime::MAX`].
    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        Self(self.0.saturating_add(duration_to_nanos(duration)))
    }

    /// Subtracts a duration, saturating at [`LogicalTime::MIN`].
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration_to_nanos(duration)))
    }

    /// Returns the duration elapsed since `earlier`, or zero if `earlier` is later than `self`.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: Self) -> Duration {
        self.checked_duration_since(earlier).unwrap_or(Duration::ZERO)
    }

    /// Returns the duration elapsed since `earlier`, or `None` if `earlier` is later than `self`.
    #[must_use]
    pub fn checked_duration_since(self, earlier: Self) -> Option<Duration> {
        (self.0 >= earlier.0).then(|| Duration::from_nanos(self.0.abs_diff(earlier.0)))
    }

    /// Shifts the time by a signed number of nanoseconds.
    pub(crate) const fn shifted(self, nanos: i64) -> Self {
        Self(self.0.saturating_add(nanos))
    }

    /// Converts the logical time into a [`SystemTime`].
    ///
    /// The whole `i64` nanosecond range is representable as `SystemTime` on all supported
    /// platforms; should a platform reject a value, the UNIX epoch is returned.
    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        let magnitude = Duration::from_nanos(self.0.unsigned_abs());

        let time = if self.0 >= 0 {
            SystemTime::UNIX_EPOCH.checked_add(magnitude)
        } else {
            SystemTime::UNIX_EPOCH.checked_sub(magnitude)
        };

        time.unwrap_or(SystemTime::UNIX_EPOCH)
    }

    /// Converts the logical time into a [`jiff::Timestamp`].
    ///
    /// # Errors
    ///
    /// Returns an error if the time lies outside of the range supported by `jiff`.
    #[cfg(any(feature = "fmt", test))]
    #[cfg_attr(docsrs, doc(cfg(feature = "fmt")))]
    pub fn to_timestamp(self) -> crate::Result<jiff::Timestamp> {
        jiff::Timestamp::from_nanosecond(i128::from(self.0)).map_err(crate::Error::jiff)
    }
}

impl From<SystemTime> for LogicalTime {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(since) => Self(duration_to_nanos(since)),
            Err(e) => Self(duration_to_nanos(e.duration()).saturating_neg()),
        }
    }
}

impl From<LogicalTime> for SystemTime {
    fn from(time: LogicalTime) -> Self {
        time.to_system_time()
    }
}

/// Displays the time in RFC 3339 format, e.g. `2024-02-29T12:01:59Z`.
#[cfg(any(feature = "fmt", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "fmt")))]
impl std::fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_timestamp() {
            Ok(timestamp) => std::fmt::Display::fmt(&timestamp, f),
            Err(_) => write!(f, "{}ns", self.0),
        }
    }
}

/// Serializes `LogicalTime` as integer nanoseconds since the UNIX epoch.
#[cfg(feature = "serde")]
impl serde_core::Serialize for LogicalTime {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde_core::Serializer,
    {
        serializer.serialize_i64(self.0)
    }
}

/// Deserializes `LogicalTime` from integer nanoseconds since the UNIX epoch.
#[cfg(feature = "serde")]
impl<'de> serde_core::Deserialize<'de> for LogicalTime {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde_core::Deserializer<'de>,
    {
        <i64 as serde_core::Deserialize>::deserialize(deserializer).map(Self)
    }
}

pub(crate) fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
