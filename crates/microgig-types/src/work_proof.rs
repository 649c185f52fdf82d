//! Work-proof types
//!
//! A work proof is evidence of completed work submitted against a
//! reservation, subject to review with a deadline. A reservation has at
//! most one proof in a reviewable state at a time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{ReservationId, UserId, WorkProofId};

/// Status of a work-proof submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkProofStatus {
    /// Awaiting reviewer decision
    UnderReview,
    /// Accepted; escrow settled to the worker
    Approved,
    /// Declined; escrow released back to the funder
    Rejected,
    /// Reviewer asked for changes; deadline extended
    RevisionRequested,
    /// Review deadline passed; default resolution applied
    TimedOut,
}

impl WorkProofStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::TimedOut)
    }

    /// Whether a reviewer decision is still possible
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::UnderReview | Self::RevisionRequested)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnderReview => "under_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::RevisionRequested => "revision_requested",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Evidence of completed work submitted against a reservation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkProof {
    /// Unique proof ID
    pub id: WorkProofId,
    /// Reservation this proof settles
    pub reservation_id: ReservationId,
    /// Worker who submitted
    pub worker: UserId,
    /// Current status
    pub status: WorkProofStatus,
    /// When the proof was submitted
    pub submitted_at: DateTime<Utc>,
    /// Deadline for a reviewer decision
    pub review_deadline: DateTime<Utc>,
    /// Reviewer note from reject/revision
    pub reviewer_note: Option<String>,
    /// How many revisions have been requested
    pub revision_count: u32,
}

impl WorkProof {
    /// Create a new proof under review with a deadline `review_window` out
    pub fn new(reservation_id: ReservationId, worker: UserId, review_window: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: WorkProofId::new(),
            reservation_id,
            worker,
            status: WorkProofStatus::UnderReview,
            submitted_at: now,
            review_deadline: now + review_window,
            reviewer_note: None,
            revision_count: 0,
        }
    }

    /// Whether the review deadline has passed as of `now`
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.review_deadline
    }
}

/// Default resolution applied when a review times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutResolution {
    /// Settle escrow to the worker as if approved
    AutoApprove,
    /// Release escrow back to the funder as if rejected
    AutoReject,
}

/// Policy knobs for the review workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPolicy {
    /// Deadline for the initial review
    #[serde(with = "crate::reservation::duration_secs")]
    pub review_window: Duration,
    /// Extension granted on each revision request
    #[serde(with = "crate::reservation::duration_secs")]
    pub revision_window: Duration,
    /// What a timeout sweep does to an overdue proof
    pub timeout_resolution: TimeoutResolution,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            review_window: Duration::hours(24),
            revision_window: Duration::hours(48),
            timeout_resolution: TimeoutResolution::AutoApprove,
        }
    }
}
