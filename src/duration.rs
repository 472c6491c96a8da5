// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Duration values found in application configuration.
//!
//! Durations show up in checks and stop configuration. Historical manifests
//! encode them three different ways: plain integers, numeric strings, and
//! suffixed strings like "10s" or "1m21s". Both integer forms are treated as
//! __milliseconds__. Suffixed strings are parsed through [`humantime`].
//!
//! Serialization always produces the suffixed form without spaces, e.g.,
//! "1m21s" or "1s500ms", which round trips through the parser.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
    time::Duration as StdDuration,
};

/// Duration as written in application configuration.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(StdDuration);

impl Duration {
    /// Construct duration from whole milliseconds.
    pub fn from_millis(millis: u64) -> Self {
        Self(StdDuration::from_millis(millis))
    }

    /// Construct duration from whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self(StdDuration::from_secs(secs))
    }

    /// Borrow inner standard library duration.
    pub fn as_std(&self) -> StdDuration {
        self.0
    }
}

impl From<StdDuration> for Duration {
    fn from(duration: StdDuration) -> Self {
        Self(duration)
    }
}

impl FromStr for Duration {
    type Err = DurationError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = data.trim();
        if data.is_empty() {
            return Err(DurationError::Empty);
        }

        // INVARIANT: Bare numbers are milliseconds.
        if let Ok(millis) = data.parse::<u64>() {
            return Ok(Self::from_millis(millis));
        }

        humantime::parse_duration(data)
            .map(Self)
            .map_err(|source| DurationError::Parse {
                value: data.to_string(),
                source,
            })
    }
}

impl Display for Duration {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.0.is_zero() {
            return fmt.write_str("0s");
        }

        let text = humantime::format_duration(self.0).to_string();
        fmt.write_str(text.replace(' ', "").as_str())
    }
}

impl Serialize for Duration {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Duration {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }
}

struct DurationVisitor;

impl de::Visitor<'_> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str("integer milliseconds or a duration string like \"10s\"")
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<Duration, E> {
        Ok(Duration::from_millis(value))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<Duration, E> {
        u64::try_from(value)
            .map(Duration::from_millis)
            .map_err(|_| E::custom(format!("negative duration: {value}")))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> std::result::Result<Duration, E> {
        if value < 0.0 || !value.is_finite() {
            return Err(E::custom(format!("invalid duration: {value}")));
        }

        Ok(Duration::from_millis(value as u64))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<Duration, E> {
        value.parse().map_err(E::custom)
    }
}

/// Duration parsing error types.
#[derive(Debug, thiserror::Error)]
pub enum DurationError {
    /// Empty duration string.
    #[error("empty duration")]
    Empty,

    /// Duration string could not be understood.
    #[error("invalid duration {value:?}: {source}")]
    Parse {
        value: String,
        source: humantime::DurationError,
    },
}
