//! Serde adapter storing a [`Duration`] as whole milliseconds
//!
//! Use with `#[serde(with = "eeg_core::duration_ms")]` or import the module
//! and write `#[serde(with = "duration_ms")]`.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
    Ok(Duration::from_millis(u64::deserialize(d)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeout {
        #[serde(with = "super")]
        wait: Duration,
    }

    #[test]
    fn test_millisecond_json() {
        let json = serde_json::to_string(&Timeout { wait: Duration::from_millis(1500) }).unwrap();
        assert_eq!(json, r#"{"wait":1500}"#);
        let back: Timeout = serde_json::from_str(r#"{"wait":250}"#).unwrap();
        assert_eq!(back.wait, Duration::from_millis(250));
    }
}
