//! Serde helpers for `Duration` fields.
//!
//! Configuration files use human-readable strings (`"10s"`, `"1500ms"`),
//! while exported records carry plain millisecond counts.

/// Serialize a `Duration` as a humantime string ("10s"), accept the same on input.
pub mod humantime_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}

/// Serialize a `Duration` as whole milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Timed {
        #[serde(with = "super::humantime_str")]
        timeout: Duration,
        #[serde(with = "super::millis")]
        elapsed: Duration,
    }

    #[test]
    fn test_humantime_input() {
        let parsed: Timed =
            serde_json::from_str(r#"{"timeout": "1m 30s", "elapsed": 250}"#).unwrap();
        assert_eq!(parsed.timeout, Duration::from_secs(90));
        assert_eq!(parsed.elapsed, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let parsed: Result<Timed, _> =
            serde_json::from_str(r#"{"timeout": "soon", "elapsed": 0}"#);
        assert!(parsed.is_err());
    }
}
