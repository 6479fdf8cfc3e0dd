use serde::{Deserialize, Deserializer};
use std::time::SystemTime;

pub fn deserialize_timestamp_rfc3339<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_rfc3339(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::time::{Duration, UNIX_EPOCH};

    #[derive(Deserialize)]
    struct TestStruct {
        #[serde(deserialize_with = "deserialize_timestamp_rfc3339")]
        timestamp: SystemTime,
    }

    #[test]
    fn test_deserialize_timestamp_rfc3339() {
        let json = r#"{"timestamp": "2022-01-01T00:00:00Z"}"#;
        let result: TestStruct = serde_json::from_str(json).unwrap();

        let expected_time = UNIX_EPOCH + Duration::from_secs(1640995200);

        assert_eq!(result.timestamp, expected_time);
    }

    #[test]
    fn test_rejects_non_rfc3339() {
        let json = r#"{"timestamp": "yesterday"}"#;
        let result: Result<TestStruct, _> = serde_json::from_str(json);

        assert!(result.is_err());
    }
}
