//! Job types
//!
//! Jobs are owned by the marketplace catalog; the lifecycle engine only
//! mutates `status` as reservations are created and resolved.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{JobId, UserId};

/// Status of a marketplace job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Available for reservation
    Open,
    /// Exclusively held by a worker
    Reserved,
    /// Work approved and settled
    Completed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Reserved => "reserved",
            Self::Completed => "completed",
        }
    }
}

/// A marketplace work unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Account that posted the job and funds its escrow
    pub poster: UserId,
    /// Short title for listings
    pub title: String,
    /// Payout amount on approval
    pub payout: Decimal,
    /// Current status
    pub status: JobStatus,
    /// When the job was created
    pub created_at: DateTime<Utc>,
    /// When the job was last updated
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new open job
    pub fn new(poster: UserId, title: impl Into<String>, payout: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            poster,
            title: title.into(),
            payout,
            status: JobStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the job can accept a reservation
    pub fn is_open(&self) -> bool {
        self.status == JobStatus::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_new_job_is_open() {
        let job = Job::new(UserId::new(), "Deliver flyers", dec!(25));
        assert!(job.is_open());
        assert_eq!(job.status.as_str(), "open");
    }
}
