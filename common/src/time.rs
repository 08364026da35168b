// SPDX-FileCopyrightText: 2024 Veil Messenger Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wire and storage timestamps.
//!
//! Every timestamp the server stores or emits is UTC ISO-8601 with a fixed
//! six-digit fractional part and an explicit `+00:00` offset. The width is
//! fixed so the TEXT columns compare lexicographically in the same order as
//! chronologically, which the history pagination queries rely on.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

/// Current UTC time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current UTC time shifted `seconds` into the future.
pub fn now_delta(seconds: i64) -> DateTime<Utc> {
    Utc::now() + Duration::seconds(seconds)
}

/// Render a timestamp in the canonical fixed-width format.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Parse an ISO-8601 timestamp with offset, e.g. a pagination cursor.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|t| t.with_timezone(&Utc))
}

/// Serde adapter serializing [`DateTime<Utc>`] in the canonical format.
pub mod serde_ts {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(
        timestamp: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(timestamp))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let value = String::deserialize(deserializer)?;
        super::parse_timestamp(&value).map_err(de::Error::custom)
    }
}

/// Same as [`serde_ts`] for optional timestamps.
pub mod serde_ts_opt {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(
        timestamp: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match timestamp {
            Some(timestamp) => serializer.serialize_some(&super::format_timestamp(timestamp)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        value
            .map(|v| super::parse_timestamp(&v).map_err(de::Error::custom))
            .transpose()
    }
}
