//! Scan outcomes reported to hosts.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use tokentree_core::FileRecord;
use tokentree_scan::{ResolvedRules, ScanProgress};

/// Terminal status of a scan request.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ScanStatus {
    Completed,
    /// Cancelled by the host or superseded by a newer scan.
    Cancelled,
    /// The session timeout fired first.
    TimedOut,
}

/// Everything a host gets back from [`ScanSession::scan`](crate::ScanSession::scan).
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    pub status: ScanStatus,
    /// Partial unless `status` is [`ScanStatus::Completed`].
    pub records: Vec<Arc<FileRecord>>,
    pub progress: ScanProgress,
    pub duration: Duration,
    /// The rules the scan ran with.
    pub rules: Arc<ResolvedRules>,
}

impl ScanOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == ScanStatus::Completed
    }

    pub fn total_tokens(&self) -> usize {
        self.records.iter().map(|r| r.token_count).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.size_bytes).sum()
    }

    /// Records sorted by relative path.
    pub fn sorted_records(&self) -> Vec<Arc<FileRecord>> {
        let mut records = self.records.clone();
        records.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_strings() {
        assert_eq!(ScanStatus::TimedOut.to_string(), "timed_out");
        assert_eq!(ScanStatus::Completed.to_string(), "completed");
        assert_eq!(ScanStatus::from_str("cancelled").unwrap(), ScanStatus::Cancelled);
        assert!(ScanStatus::from_str("paused").is_err());
    }
}
