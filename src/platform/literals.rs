//! Scenario literal parsing: durations ("250ms", "30s", "5m", "2h") and
//! underscore-grouped token amounts ("1_000_000_000_000_000_000").

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::{SkeinError, SkeinResult};

/// Wrapper so clap can parse `--poll-interval 500ms` style flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkeinDuration(pub Duration);

impl FromStr for SkeinDuration {
    type Err = SkeinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(Self)
    }
}

pub fn parse_duration(input: &str) -> SkeinResult<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(SkeinError::InvalidArgument("empty duration".to_string()));
    }

    let split = s
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map(|(i, _)| i);

    let (num_part, unit_part) = match split {
        Some(0) => {
            return Err(SkeinError::InvalidArgument(format!(
                "invalid duration {s:?} (missing number)"
            )));
        }
        // A bare number is taken as seconds; scenario files use `wait: 120`.
        None => (s, "s"),
        Some(i) => s.split_at(i),
    };

    let value: u64 = num_part.parse().map_err(|_| {
        SkeinError::InvalidArgument(format!(
            "invalid duration number: {num_part} (from {input:?})"
        ))
    })?;

    let dur = match unit_part {
        "ms" => Duration::from_millis(value),
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value.saturating_mul(60)),
        "h" => Duration::from_secs(value.saturating_mul(60 * 60)),
        _ => {
            return Err(SkeinError::InvalidArgument(format!(
                "invalid duration unit {unit_part:?} (expected ms|s|m|h)"
            )));
        }
    };

    Ok(dur)
}

/// Token amount in the smallest token unit.
///
/// Scenario files write amounts as underscore-grouped integers
/// (`1_000_000_000_000_000_000`); YAML hands those to us as strings, while
/// ungrouped amounts arrive as numbers. Both deserialize into this newtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TokenAmount(pub u128);

impl TokenAmount {
    pub fn value(self) -> u128 {
        self.0
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for TokenAmount {
    fn from(v: u128) -> Self {
        Self(v)
    }
}

pub fn parse_amount(input: &str) -> SkeinResult<u128> {
    let s = input.trim();
    if s.is_empty() || s.starts_with('_') || s.ends_with('_') || s.contains("__") {
        return Err(SkeinError::InvalidArgument(format!(
            "invalid token amount {input:?}"
        )));
    }
    let digits: String = s.chars().filter(|c| *c != '_').collect();
    digits.parse().map_err(|_| {
        SkeinError::InvalidArgument(format!(
            "invalid token amount {input:?} (expected an underscore-grouped integer)"
        ))
    })
}

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AmountVisitor;

        impl Visitor<'_> for AmountVisitor {
            type Value = TokenAmount;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a non-negative integer, optionally underscore-grouped")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(TokenAmount(u128::from(v)))
            }

            fn visit_u128<E: de::Error>(self, v: u128) -> Result<Self::Value, E> {
                Ok(TokenAmount(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                u128::try_from(v)
                    .map(TokenAmount)
                    .map_err(|_| E::custom("token amount cannot be negative"))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                parse_amount(v).map(TokenAmount).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}
