// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! 64 bit span and trace identifiers.
//!
//! Identifiers are opaque 64 bit values; the value `0` means "absent". On the
//! wire (JSON v1/v2 and our own debug output) an id is a hex string of at
//! most 16 characters, emitted as exactly 16 lowercase characters.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A span, parent or trace identifier. `Id::UNKNOWN` (zero) marks an absent
/// value, e.g. the parent id of a root span.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(u64);

impl Id {
    pub const UNKNOWN: Id = Id(0);

    pub const fn new(value: u64) -> Id {
        Id(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub const fn is_unknown(self) -> bool {
        self.0 == 0
    }

    /// Returns `self`, or `other` if this id is unknown.
    pub fn or(self, other: Id) -> Id {
        if self.is_unknown() {
            other
        } else {
            self
        }
    }

    /// The partition key used when sharding spans by trace over the bus.
    pub const fn to_le_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Id {
        Id(value)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Error parsing a hex identifier.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseIdError {
    #[error("hex value too large, expected at most 16 characters")]
    TooLong,
    #[error("hex value must only contain [0-9a-fA-F], got '{0}'")]
    InvalidChar(char),
}

impl FromStr for Id {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Id, ParseIdError> {
        if s.len() > 16 {
            return Err(ParseIdError::TooLong);
        }

        let mut value: u64 = 0;
        for c in s.chars() {
            let digit = c.to_digit(16).ok_or(ParseIdError::InvalidChar(c))?;
            value = (value << 4) | u64::from(digit);
        }

        Ok(Id(value))
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Id, D::Error> {
        struct IdVisitor;

        impl Visitor<'_> for IdVisitor {
            type Value = Id;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a hex encoded identifier of at most 16 characters")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Id, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_str(IdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_fixed_width_lowercase_hex() {
        assert_eq!(Id::new(0xdead).to_string(), "000000000000dead");
        assert_eq!(Id::new(u64::MAX).to_string(), "ffffffffffffffff");
    }

    #[test]
    fn test_parse_short_and_mixed_case() {
        assert_eq!("dead".parse::<Id>(), Ok(Id::new(0xdead)));
        assert_eq!("DeAd".parse::<Id>(), Ok(Id::new(0xdead)));
        assert_eq!("0".parse::<Id>(), Ok(Id::UNKNOWN));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            "00000000000000000".parse::<Id>(),
            Err(ParseIdError::TooLong)
        );
        assert_eq!("xyz".parse::<Id>(), Err(ParseIdError::InvalidChar('x')));
    }

    #[test]
    fn test_json_round_trip() {
        let id = Id::new(0xbeaf);
        let encoded = serde_json::to_string(&id).unwrap();
        assert_eq!(encoded, "\"000000000000beaf\"");
        let decoded: Id = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn test_partition_key_is_little_endian() {
        assert_eq!(
            Id::new(0x0102030405060708).to_le_bytes(),
            [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
        );
    }
}
