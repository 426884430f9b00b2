//! Extraction job records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Extraction depth for a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    Quick,
    Full,
}

impl JobMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Full => "full",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "quick" => Some(Self::Quick),
            "full" => Some(Self::Full),
            _ => None,
        }
    }
}

impl fmt::Display for JobMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job state machine: queued -> processing -> terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Done,
    PartialFailed,
    Failed,
    Skipped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Done => "done",
            Self::PartialFailed => "partial_failed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "done" => Some(Self::Done),
            "partial_failed" => Some(Self::PartialFailed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

const STAGE_MAX_CHARS: usize = 50;
const MESSAGE_MAX_CHARS: usize = 800;

/// One per-source failure record inside a job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailedSource {
    /// None for faults outside the per-source loop
    pub source_id: Option<i64>,
    pub stage: String,
    pub message: String,
}

impl FailedSource {
    pub fn new(source_id: Option<i64>, stage: &str, message: &str) -> Self {
        let stage = stage.trim();
        let stage = if stage.is_empty() { "extract" } else { stage };
        Self {
            source_id: source_id.filter(|id| *id > 0),
            stage: truncate_chars(stage, STAGE_MAX_CHARS),
            message: truncate_chars(message.trim(), MESSAGE_MAX_CHARS),
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Aggregate stats persisted on the job row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobStats {
    #[serde(default)]
    pub processed_sources: i64,
    #[serde(default)]
    pub succeeded_sources: i64,
    #[serde(default)]
    pub failed_sources_count: i64,
    #[serde(default)]
    pub failed_sources: Vec<FailedSource>,
    #[serde(default)]
    pub entities_created: i64,
    #[serde(default)]
    pub relations_created: i64,
    #[serde(default)]
    pub evidences_created: i64,
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl JobStats {
    /// Terminal status implied by the counters
    pub fn terminal_status(&self) -> JobStatus {
        if self.processed_sources == 0 {
            JobStatus::Skipped
        } else if self.failed_sources_count == 0 {
            JobStatus::Done
        } else if self.succeeded_sources > 0 {
            JobStatus::PartialFailed
        } else {
            JobStatus::Failed
        }
    }

    pub fn record_failure(&mut self, failure: FailedSource) {
        self.failed_sources.push(failure);
        self.failed_sources_count = self.failed_sources.len() as i64;
    }
}

/// One asynchronous batch run of extraction over a source set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub id: String,
    pub workspace_id: i64,
    pub mode: JobMode,
    pub status: JobStatus,
    pub stats: JobStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_statuses() {
        assert!(JobStatus::Queued.is_active());
        assert!(JobStatus::Processing.is_active());
        for status in [
            JobStatus::Done,
            JobStatus::PartialFailed,
            JobStatus::Failed,
            JobStatus::Skipped,
        ] {
            assert!(!status.is_active());
        }
    }

    #[test]
    fn test_terminal_status_from_counters() {
        let mut stats = JobStats {
            processed_sources: 5,
            succeeded_sources: 5,
            ..Default::default()
        };
        assert_eq!(stats.terminal_status(), JobStatus::Done);

        stats.succeeded_sources = 3;
        stats.failed_sources_count = 2;
        assert_eq!(stats.terminal_status(), JobStatus::PartialFailed);

        stats.succeeded_sources = 0;
        stats.failed_sources_count = 5;
        assert_eq!(stats.terminal_status(), JobStatus::Failed);

        stats.processed_sources = 0;
        assert_eq!(stats.terminal_status(), JobStatus::Skipped);
    }

    #[test]
    fn test_failed_source_truncation() {
        let long_message = "x".repeat(1000);
        let failure = FailedSource::new(Some(3), "", &long_message);
        assert_eq!(failure.stage, "extract");
        assert_eq!(failure.message.chars().count(), 800);
        assert_eq!(failure.source_id, Some(3));

        let synthetic = FailedSource::new(Some(0), "bootstrap", "boom");
        assert_eq!(synthetic.source_id, None);
    }

    #[test]
    fn test_stats_json_roundtrip() {
        let mut stats = JobStats {
            processed_sources: 2,
            succeeded_sources: 1,
            mode: "quick".into(),
            ..Default::default()
        };
        stats.record_failure(FailedSource::new(Some(9), "extract", "bad text"));

        let json = serde_json::to_string(&stats).unwrap();
        let back: JobStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back.failed_sources_count, 1);
        assert_eq!(back.failed_sources[0].source_id, Some(9));
        // Empty stats payloads deserialize to defaults
        let empty: JobStats = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.processed_sources, 0);
        assert!(empty.reason.is_none());
    }
}
