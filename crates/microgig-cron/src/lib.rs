//! Microgig CronOrchestrator - periodic expiry and timeout sweeps
//!
//! The scheduler is external; it may fire late, twice, or concurrently
//! with a slow earlier run. Safety comes from the per-row idempotent
//! terminal-state checks in the reservation and work-proof state
//! machines, not from anything here. A row that fails is logged and
//! skipped; one bad row never aborts a sweep.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use microgig_reservation::ReservationManager;
use microgig_types::{ReservationId, WorkProofId};
use microgig_workproof::WorkProofManager;

/// Outcome of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Overdue rows found by the scan
    pub scanned: usize,
    /// Rows actually transitioned this pass
    pub applied: usize,
    /// Rows that errored and were skipped
    pub failed: usize,
}

/// Combined outcome of both sweeps, for the manual trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronRunReport {
    pub reservations: SweepReport,
    pub work_proofs: SweepReport,
}

/// What a sweep would touch, without touching it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DryRunReport {
    pub overdue_reservations: Vec<ReservationId>,
    pub overdue_work_proofs: Vec<WorkProofId>,
}

impl DryRunReport {
    pub fn is_empty(&self) -> bool {
        self.overdue_reservations.is_empty() && self.overdue_work_proofs.is_empty()
    }
}

/// Drives the idempotent expiry and timeout sweeps
#[derive(Clone)]
pub struct CronOrchestrator {
    reservations: ReservationManager,
    proofs: WorkProofManager,
}

impl CronOrchestrator {
    pub fn new(reservations: ReservationManager, proofs: WorkProofManager) -> Self {
        Self {
            reservations,
            proofs,
        }
    }

    /// Expire every Active reservation past its deadline
    pub async fn expire_reservations(&self) -> SweepReport {
        let overdue = self.reservations.overdue(Utc::now()).await;
        let mut report = SweepReport {
            scanned: overdue.len(),
            ..SweepReport::default()
        };

        for id in overdue {
            match self.reservations.expire(&id).await {
                // false: another pass got there first
                Ok(applied) => report.applied += applied as usize,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(reservation_id = %id, error = %err, "expiry failed, row skipped");
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            applied = report.applied,
            failed = report.failed,
            "reservation expiry sweep"
        );
        report
    }

    /// Apply the default resolution to every reviewable proof past deadline
    pub async fn process_work_proof_timeouts(&self) -> SweepReport {
        let overdue = self.proofs.overdue(Utc::now()).await;
        let mut report = SweepReport {
            scanned: overdue.len(),
            ..SweepReport::default()
        };

        for id in overdue {
            match self.proofs.timeout(&id).await {
                Ok(applied) => report.applied += applied as usize,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(proof_id = %id, error = %err, "timeout failed, row skipped");
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            applied = report.applied,
            failed = report.failed,
            "work proof timeout sweep"
        );
        report
    }

    /// Both sweeps back to back; operator recovery path
    pub async fn run_all(&self) -> CronRunReport {
        CronRunReport {
            reservations: self.expire_reservations().await,
            work_proofs: self.process_work_proof_timeouts().await,
        }
    }

    /// Report what the sweeps would touch without mutating anything
    pub async fn dry_run(&self) -> DryRunReport {
        let now = Utc::now();
        DryRunReport {
            overdue_reservations: self.reservations.overdue(now).await,
            overdue_work_proofs: self.proofs.overdue(now).await,
        }
    }
}
