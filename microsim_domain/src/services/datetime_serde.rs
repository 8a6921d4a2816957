// /////////////////////////////////////////////////////////////////////////////
// Microsim RS
// Copyright (c) 2025 Microsim Contributors
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Serde helpers for chrono types that lack stable derives.

/// Serializes a `chrono::Duration` as whole milliseconds.
///
/// Usage: `#[serde(with = "datetime_serde::duration_millis")]`.
pub mod duration_millis {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Wrapper {
        #[serde(with = "super::duration_millis")]
        step: Duration,
    }

    #[test]
    fn test_duration_roundtrip() {
        let original = Wrapper {
            step: Duration::milliseconds(43_200_000),
        };
        let json = serde_json::to_string(&original).unwrap();
        assert_eq!(json, r#"{"step":43200000}"#);
        let restored: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, original);
    }
}
