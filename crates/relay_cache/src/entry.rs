use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// One stored response.
///
/// Wire layout: `{"data": <payload>, "status": <u16>, "timestamp": <ms since epoch>}`.
/// `stored_at` is fixed at creation; an entry is replaced, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T = Value> {
    #[serde(rename = "data")]
    pub payload: T,

    #[serde(rename = "status")]
    pub status_code: u16,

    #[serde(rename = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub stored_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    pub fn new(payload: T, status_code: u16) -> Self {
        // Truncate to the wire precision so a decoded entry compares equal.
        let now = Utc::now();
        let stored_at = DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now);

        Self {
            payload,
            status_code,
            stored_at,
        }
    }

    /// ISO-8601 storage time, as sent in `X-Cache-Date`.
    pub fn stored_at_iso(&self) -> String {
        self.stored_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl<T: Serialize> CacheEntry<T> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl<T: DeserializeOwned> CacheEntry<T> {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
