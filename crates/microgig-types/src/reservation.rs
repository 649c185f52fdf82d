//! Reservation types
//!
//! A reservation is an exclusive, time-bounded claim by a worker on a job.
//! Reservations are never deleted, only status-transitioned, so the rows
//! double as an audit trail.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, ReservationId, UserId};

/// Status of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    /// Exclusive claim is live
    Active,
    /// Work was approved and settled
    Completed,
    /// Worker cancelled before completion
    Cancelled,
    /// Deadline passed without completion
    Expired,
}

impl ReservationStatus {
    /// Check if this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

/// An exclusive claim on a job by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Unique reservation ID
    pub id: ReservationId,
    /// Job being claimed
    pub job_id: JobId,
    /// Worker holding the claim
    pub worker: UserId,
    /// Current status
    pub status: ReservationStatus,
    /// When the claim was created
    pub created_at: DateTime<Utc>,
    /// Deadline after which the claim is sweepable
    pub expires_at: DateTime<Utc>,
    /// Reason recorded on cancel/reject (blanked by cleanup)
    pub cancel_reason: Option<String>,
    /// Set once cleanup has purged transient fields
    pub purged_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Create a new active reservation expiring after `window`
    pub fn new(job_id: JobId, worker: UserId, window: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: ReservationId::new(),
            job_id,
            worker,
            status: ReservationStatus::Active,
            created_at: now,
            expires_at: now + window,
            cancel_reason: None,
            purged_at: None,
        }
    }

    /// Whether the deadline has passed as of `now`
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Policy knobs for the reservation state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationPolicy {
    /// Master switch; `Reserve` fails Validation when off
    pub enabled: bool,
    /// How long a reservation is held before it is sweepable
    #[serde(with = "crate::reservation::duration_secs")]
    pub window: Duration,
    /// Cap on concurrently active reservations per worker
    pub max_concurrent_per_worker: u32,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            window: Duration::hours(1),
            max_concurrent_per_worker: 5,
        }
    }
}

/// Record of a worker letting a reservation lapse, kept for admin reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationViolation {
    /// Worker whose reservation lapsed
    pub worker: UserId,
    /// Job that was released back to the board
    pub job_id: JobId,
    /// The lapsed reservation
    pub reservation_id: ReservationId,
    /// When the expiry was applied
    pub occurred_at: DateTime<Utc>,
}

/// Serde helper: chrono::Duration as whole seconds
pub(crate) mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(Duration::seconds(secs))
    }
}
