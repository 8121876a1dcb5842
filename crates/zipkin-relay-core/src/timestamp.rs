// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Nanosecond timestamps.

use serde::{Deserialize, Serialize};

/// A signed count of nanoseconds since the Unix epoch. Zero means "unset".
///
/// Durations in this codebase are plain `i64` nanosecond counts; timestamp
/// arithmetic is ordinary integer arithmetic, which is exactly what the
/// clock-skew correction relies on (offsets may be negative).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

pub const NANOS_PER_MICRO: i64 = 1_000;
pub const NANOS_PER_MILLI: i64 = 1_000_000;

impl Timestamp {
    pub const UNSET: Timestamp = Timestamp(0);

    pub const fn from_micros(us: i64) -> Timestamp {
        Timestamp(us * NANOS_PER_MICRO)
    }

    pub const fn from_millis(ms: i64) -> Timestamp {
        Timestamp(ms * NANOS_PER_MILLI)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub const fn as_micros(self) -> i64 {
        self.0 / NANOS_PER_MICRO
    }

    /// A timestamp is valid when it is strictly positive; zero and negative
    /// values are treated as "not observed".
    pub const fn is_valid(self) -> bool {
        self.0 > 0
    }

    pub const fn add_nanos(self, nanos: i64) -> Timestamp {
        Timestamp(self.0 + nanos)
    }
}

impl From<i64> for Timestamp {
    fn from(nanos: i64) -> Timestamp {
        Timestamp(nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units() {
        assert_eq!(Timestamp::from_micros(7).as_nanos(), 7_000);
        assert_eq!(Timestamp::from_millis(7).as_nanos(), 7_000_000);
        assert_eq!(Timestamp(1_234_000).as_micros(), 1_234);
    }

    #[test]
    fn test_validity() {
        assert!(!Timestamp::UNSET.is_valid());
        assert!(!Timestamp(-1).is_valid());
        assert!(Timestamp(1).is_valid());
    }
}
