use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const ZIP_TRACE_TTL_HOURS: i64 = 24;

/// Transient record of a zip bundle generated for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DocumentZipTrace {
    #[serde(rename = "ID")]
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub file_location: String,
    /// Expiry as epoch seconds.
    #[serde(rename = "TTL")]
    pub ttl: i64,
}

impl DocumentZipTrace {
    pub fn new(file_location: impl Into<String>, now: DateTime<Utc>) -> Self {
        DocumentZipTrace {
            id: Uuid::new_v4(),
            created: now,
            file_location: file_location.into(),
            ttl: (now + Duration::hours(ZIP_TRACE_TTL_HOURS)).timestamp(),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.timestamp() >= self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ttl_is_one_day_after_creation() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let trace = DocumentZipTrace::new("zips/a.zip", now);
        assert_eq!(trace.ttl - now.timestamp(), 86_400);
        assert!(!trace.is_expired(now));
        assert!(trace.is_expired(now + Duration::hours(24)));
    }
}
