//! Domain types for the workspace knowledge graph

pub mod graph;
pub mod job;
pub mod resource;
pub mod source;
pub mod workspace;

pub use graph::{Chunk, Entity, EntityType, Evidence, Relation, RelationType};
pub use job::{ExtractionJob, FailedSource, JobMode, JobStats, JobStatus};
pub use resource::{Resource, ResourceStatus};
pub use source::{Source, SourceStatus, SourceType};
pub use workspace::Workspace;

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time serialized the way every table stores it
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp back into UTC
pub fn parse_rfc3339(value: &str) -> crate::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| crate::Error::Other(format!("Invalid timestamp '{}': {}", value, err)))
}

/// Serialize a UTC timestamp for storage
pub fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_roundtrip() {
        let now = Utc::now();
        let text = to_rfc3339(now);
        let parsed = parse_rfc3339(&text).unwrap();
        assert!((now - parsed).num_microseconds().unwrap().abs() < 2);
    }

    #[test]
    fn test_stored_timestamps_sort_lexicographically() {
        let earlier = to_rfc3339(Utc::now());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let later = to_rfc3339(Utc::now());
        assert!(earlier < later);
    }

    #[test]
    fn test_invalid_timestamp_is_rejected() {
        assert!(parse_rfc3339("yesterday").is_err());
    }
}
