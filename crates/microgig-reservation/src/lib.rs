//! Microgig ReservationManager - exclusive-lock state machine over jobs
//!
//! A reservation is a time-bounded exclusive claim by a worker on an open
//! job. Invariants:
//!
//! - at most one Active reservation per job at any instant
//! - `Active -> {Completed, Cancelled, Expired}`; terminal states never
//!   transition again
//! - escrow for the payout is held from the poster when the claim is
//!   created and resolved (released or settled) exactly once
//!
//! All mutations run under a single writer lock, so reserve is a true
//! test-and-set: two workers racing for one job see exactly one success
//! and one conflict. The escrow hold happens inside the same critical
//! section, before any state is touched, so a failed hold leaves the job
//! open.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use microgig_types::{
    CoreError, Job, JobId, JobStatus, Reservation, ReservationId, ReservationPolicy,
    ReservationStatus, ReservationViolation, Result, UserId,
};
use microgig_wallet::EscrowWallet;

#[derive(Default)]
struct ReservationState {
    jobs: HashMap<JobId, Job>,
    reservations: HashMap<ReservationId, Reservation>,
    /// Index enforcing the one-active-claim-per-job invariant
    active_by_job: HashMap<JobId, ReservationId>,
    violations: Vec<ReservationViolation>,
}

/// Exclusive-lock reservation state machine
#[derive(Clone)]
pub struct ReservationManager {
    state: Arc<RwLock<ReservationState>>,
    policy: Arc<parking_lot::RwLock<ReservationPolicy>>,
    wallet: EscrowWallet,
}

impl ReservationManager {
    pub fn new(wallet: EscrowWallet) -> Self {
        Self::with_policy(wallet, ReservationPolicy::default())
    }

    pub fn with_policy(wallet: EscrowWallet, policy: ReservationPolicy) -> Self {
        Self {
            state: Arc::new(RwLock::new(ReservationState::default())),
            policy: Arc::new(parking_lot::RwLock::new(policy)),
            wallet,
        }
    }

    /// Current reservation policy
    pub fn policy(&self) -> ReservationPolicy {
        self.policy.read().clone()
    }

    /// Replace the reservation policy; affects future reservations only
    pub fn set_policy(&self, policy: ReservationPolicy) {
        *self.policy.write() = policy;
    }

    // ========================================================================
    // Job catalog seam
    // ========================================================================

    /// Register an open job on the board
    pub async fn create_job(
        &self,
        poster: UserId,
        title: impl Into<String>,
        payout: Decimal,
    ) -> Result<Job> {
        if payout <= Decimal::ZERO {
            return Err(CoreError::invalid_amount("payout must be greater than zero"));
        }
        let job = Job::new(poster, title, payout);
        let mut state = self.state.write().await;
        state.jobs.insert(job.id.clone(), job.clone());
        tracing::info!(job_id = %job.id, payout = %job.payout, "job created");
        Ok(job)
    }

    /// All jobs on the board
    pub async fn jobs(&self) -> Vec<Job> {
        let state = self.state.read().await;
        let mut jobs: Vec<_> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    /// Look up one job
    pub async fn job(&self, job_id: &JobId) -> Result<Job> {
        let state = self.state.read().await;
        state
            .jobs
            .get(job_id)
            .cloned()
            .ok_or_else(|| CoreError::JobNotFound {
                job_id: job_id.clone(),
            })
    }

    // ========================================================================
    // Reservation lifecycle
    // ========================================================================

    /// Claim an open job for a worker.
    ///
    /// Holds `payout` of the poster's available balance in escrow, flips
    /// the job to Reserved and creates an Active reservation expiring
    /// after the policy window. Atomic test-and-set: under contention
    /// exactly one caller wins, the rest get `AlreadyReserved`.
    pub async fn reserve(&self, job_id: &JobId, worker: &UserId) -> Result<Reservation> {
        let policy = self.policy();
        if !policy.enabled {
            return Err(CoreError::ReservationsDisabled);
        }

        let mut state = self.state.write().await;

        let job = state
            .jobs
            .get(job_id)
            .ok_or_else(|| CoreError::JobNotFound {
                job_id: job_id.clone(),
            })?;
        if state.active_by_job.contains_key(job_id) {
            return Err(CoreError::AlreadyReserved {
                job_id: job_id.clone(),
            });
        }
        if !job.is_open() {
            return Err(CoreError::JobNotOpen {
                job_id: job_id.clone(),
                status: job.status.as_str().to_string(),
            });
        }

        let active_count = state
            .reservations
            .values()
            .filter(|r| r.worker == *worker && r.status == ReservationStatus::Active)
            .count() as u32;
        if active_count >= policy.max_concurrent_per_worker {
            return Err(CoreError::ReservationLimitReached {
                worker: worker.clone(),
                limit: policy.max_concurrent_per_worker,
            });
        }

        let poster = job.poster.clone();
        let payout = job.payout;
        let reservation = Reservation::new(job_id.clone(), worker.clone(), policy.window);

        // Escrow first, state second: a failed hold must leave the job open.
        self.wallet
            .hold_escrow(&poster, payout, &reservation.id.to_string())
            .await?;

        let job = state.jobs.get_mut(job_id).expect("job checked above");
        job.status = JobStatus::Reserved;
        job.updated_at = Utc::now();
        state
            .active_by_job
            .insert(job_id.clone(), reservation.id.clone());
        state
            .reservations
            .insert(reservation.id.clone(), reservation.clone());

        tracing::info!(
            reservation_id = %reservation.id,
            job_id = %job_id,
            worker = %worker,
            expires_at = %reservation.expires_at,
            "job reserved"
        );
        Ok(reservation)
    }

    /// Worker-initiated cancellation of an Active reservation.
    ///
    /// Releases the escrow hold and reopens the job.
    pub async fn cancel(
        &self,
        reservation_id: &ReservationId,
        worker: &UserId,
        reason: Option<String>,
    ) -> Result<Reservation> {
        let mut state = self.state.write().await;

        let reservation = state.reservations.get(reservation_id).ok_or_else(|| {
            CoreError::ReservationNotFound {
                reservation_id: reservation_id.clone(),
            }
        })?;
        if reservation.worker != *worker {
            return Err(CoreError::unauthorized(
                "only the reservation's worker may cancel it",
            ));
        }
        if reservation.status != ReservationStatus::Active {
            return Err(CoreError::InvalidTransition {
                entity: "reservation",
                from: reservation.status.as_str().to_string(),
                to: ReservationStatus::Cancelled.as_str().to_string(),
            });
        }

        let job_id = reservation.job_id.clone();
        self.release_locked(
            &mut state,
            reservation_id,
            ReservationStatus::Cancelled,
            reason.or_else(|| Some("cancelled by worker".to_string())),
        )
        .await?;

        tracing::info!(reservation_id = %reservation_id, job_id = %job_id, "reservation cancelled");
        Ok(state.reservations[reservation_id].clone())
    }

    /// Pure read: has the reservation's deadline passed?
    pub async fn check_expiry(&self, reservation_id: &ReservationId) -> Result<bool> {
        let state = self.state.read().await;
        let reservation = state.reservations.get(reservation_id).ok_or_else(|| {
            CoreError::ReservationNotFound {
                reservation_id: reservation_id.clone(),
            }
        })?;
        Ok(reservation.is_past_deadline(Utc::now()))
    }

    /// Sweep-invoked expiry. Idempotent: returns false without touching
    /// anything when the reservation is already terminal.
    ///
    /// On the first application: Active -> Expired, job reopened, escrow
    /// released, and a violation recorded against the worker.
    pub async fn expire(&self, reservation_id: &ReservationId) -> Result<bool> {
        let mut state = self.state.write().await;

        let reservation = state.reservations.get(reservation_id).ok_or_else(|| {
            CoreError::ReservationNotFound {
                reservation_id: reservation_id.clone(),
            }
        })?;
        if reservation.status.is_terminal() {
            return Ok(false);
        }

        let violation = ReservationViolation {
            worker: reservation.worker.clone(),
            job_id: reservation.job_id.clone(),
            reservation_id: reservation_id.clone(),
            occurred_at: Utc::now(),
        };

        self.release_locked(
            &mut state,
            reservation_id,
            ReservationStatus::Expired,
            Some("reservation window elapsed".to_string()),
        )
        .await?;
        state.violations.push(violation);

        tracing::info!(reservation_id = %reservation_id, "reservation expired");
        Ok(true)
    }

    /// Purge transient fields from terminal reservations older than the
    /// retention window. The audit row itself is kept. Returns the number
    /// of rows purged.
    pub async fn cleanup(&self, older_than: Duration) -> Result<usize> {
        let cutoff = Utc::now() - older_than;
        let mut state = self.state.write().await;

        let mut purged = 0;
        for reservation in state.reservations.values_mut() {
            if reservation.status.is_terminal()
                && reservation.purged_at.is_none()
                && reservation.expires_at < cutoff
            {
                reservation.cancel_reason = None;
                reservation.purged_at = Some(Utc::now());
                purged += 1;
            }
        }

        if purged > 0 {
            tracing::info!(purged, "reservation cleanup");
        }
        Ok(purged)
    }

    // ========================================================================
    // Review-driven resolution (called by the work-proof workflow)
    // ========================================================================

    /// Mark a reservation Completed and its job Completed. The caller is
    /// responsible for settling the escrow in the same logical step.
    pub async fn complete(&self, reservation_id: &ReservationId) -> Result<Reservation> {
        let mut state = self.state.write().await;

        let reservation = state.reservations.get_mut(reservation_id).ok_or_else(|| {
            CoreError::ReservationNotFound {
                reservation_id: reservation_id.clone(),
            }
        })?;
        if reservation.status != ReservationStatus::Active {
            return Err(CoreError::InvalidTransition {
                entity: "reservation",
                from: reservation.status.as_str().to_string(),
                to: ReservationStatus::Completed.as_str().to_string(),
            });
        }
        reservation.status = ReservationStatus::Completed;
        let job_id = reservation.job_id.clone();
        let reservation = reservation.clone();

        state.active_by_job.remove(&job_id);
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Completed;
            job.updated_at = Utc::now();
        }
        Ok(reservation)
    }

    /// Resolve a rejected review: reservation Cancelled, job reopened,
    /// escrow released back to the poster.
    pub async fn resolve_rejected(
        &self,
        reservation_id: &ReservationId,
        reason: impl Into<String>,
    ) -> Result<Reservation> {
        let mut state = self.state.write().await;

        let reservation = state.reservations.get(reservation_id).ok_or_else(|| {
            CoreError::ReservationNotFound {
                reservation_id: reservation_id.clone(),
            }
        })?;
        if reservation.status != ReservationStatus::Active {
            return Err(CoreError::InvalidTransition {
                entity: "reservation",
                from: reservation.status.as_str().to_string(),
                to: ReservationStatus::Cancelled.as_str().to_string(),
            });
        }

        self.release_locked(
            &mut state,
            reservation_id,
            ReservationStatus::Cancelled,
            Some(reason.into()),
        )
        .await?;
        Ok(state.reservations[reservation_id].clone())
    }

    /// Escrow settlement inputs for a reservation: (poster, worker, payout)
    pub async fn settlement_parties(
        &self,
        reservation_id: &ReservationId,
    ) -> Result<(UserId, UserId, Decimal)> {
        let state = self.state.read().await;
        let reservation = state.reservations.get(reservation_id).ok_or_else(|| {
            CoreError::ReservationNotFound {
                reservation_id: reservation_id.clone(),
            }
        })?;
        let job = state
            .jobs
            .get(&reservation.job_id)
            .ok_or_else(|| CoreError::JobNotFound {
                job_id: reservation.job_id.clone(),
            })?;
        Ok((job.poster.clone(), reservation.worker.clone(), job.payout))
    }

    // ========================================================================
    // Read surface
    // ========================================================================

    /// Look up one reservation
    pub async fn reservation(&self, reservation_id: &ReservationId) -> Result<Reservation> {
        let state = self.state.read().await;
        state
            .reservations
            .get(reservation_id)
            .cloned()
            .ok_or_else(|| CoreError::ReservationNotFound {
                reservation_id: reservation_id.clone(),
            })
    }

    /// The Active reservation on a job, if any
    pub async fn active_for_job(&self, job_id: &JobId) -> Option<Reservation> {
        let state = self.state.read().await;
        let id = state.active_by_job.get(job_id)?;
        state.reservations.get(id).cloned()
    }

    /// A worker's Active reservations, oldest first
    pub async fn active_for_worker(&self, worker: &UserId) -> Vec<Reservation> {
        let state = self.state.read().await;
        let mut rows: Vec<_> = state
            .reservations
            .values()
            .filter(|r| r.worker == *worker && r.status == ReservationStatus::Active)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows
    }

    /// Reservations past deadline and still Active, for the expiry sweep
    pub async fn overdue(&self, now: DateTime<Utc>) -> Vec<ReservationId> {
        let state = self.state.read().await;
        state
            .reservations
            .values()
            .filter(|r| r.status == ReservationStatus::Active && r.is_past_deadline(now))
            .map(|r| r.id.clone())
            .collect()
    }

    /// Lapsed-reservation report for operators
    pub async fn violations(&self) -> Vec<ReservationViolation> {
        self.state.read().await.violations.clone()
    }

    /// Clear the violation report, returning how many rows were dropped
    pub async fn clear_violations(&self) -> usize {
        let mut state = self.state.write().await;
        let count = state.violations.len();
        state.violations.clear();
        count
    }

    /// Shared terminal-transition path: flip the reservation status, reopen
    /// the job and release the escrow hold. Caller holds the write lock and
    /// has verified the reservation is Active.
    async fn release_locked(
        &self,
        state: &mut ReservationState,
        reservation_id: &ReservationId,
        to: ReservationStatus,
        reason: Option<String>,
    ) -> Result<()> {
        let (job_id, payout, poster) = {
            let reservation = state
                .reservations
                .get(reservation_id)
                .expect("caller verified existence");
            let job = state
                .jobs
                .get(&reservation.job_id)
                .ok_or_else(|| CoreError::JobNotFound {
                    job_id: reservation.job_id.clone(),
                })?;
            (job.id.clone(), job.payout, job.poster.clone())
        };

        self.wallet
            .release_escrow(&poster, payout, &reservation_id.to_string())
            .await?;

        let reservation = state
            .reservations
            .get_mut(reservation_id)
            .expect("caller verified existence");
        reservation.status = to;
        reservation.cancel_reason = reason;

        state.active_by_job.remove(&job_id);
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.status = JobStatus::Open;
            job.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microgig_ledger::Ledger;
    use microgig_types::{FeeSettingsUpdate, FeeType};
    use microgig_wallet::FeeSchedule;
    use rust_decimal_macros::dec;

    async fn manager() -> (ReservationManager, EscrowWallet) {
        let wallet = EscrowWallet::new(Ledger::new(), FeeSchedule::with_defaults());
        for fee_type in FeeType::all() {
            wallet.update_fee_settings(
                fee_type,
                &FeeSettingsUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            );
        }
        (ReservationManager::new(wallet.clone()), wallet)
    }

    async fn funded_poster(wallet: &EscrowWallet, amount: Decimal) -> UserId {
        let poster = UserId::new();
        wallet.deposit(&poster, amount).await.unwrap();
        poster
    }

    #[tokio::test]
    async fn test_reserve_holds_escrow_and_flips_job() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();

        let job = mgr.create_job(poster.clone(), "Paint fence", dec!(60)).await.unwrap();
        let reservation = mgr.reserve(&job.id, &worker).await.unwrap();

        assert_eq!(reservation.status, ReservationStatus::Active);
        assert_eq!(mgr.job(&job.id).await.unwrap().status, JobStatus::Reserved);

        let balance = wallet.balance(&poster).await;
        assert_eq!(balance.available, dec!(40));
        assert_eq!(balance.escrow_held, dec!(60));
    }

    #[tokio::test]
    async fn test_double_reserve_yields_one_winner() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let job = mgr.create_job(poster, "Rake leaves", dec!(25)).await.unwrap();

        let w1 = UserId::new();
        let w2 = UserId::new();
        let (r1, r2) = tokio::join!(mgr.reserve(&job.id, &w1), mgr.reserve(&job.id, &w2));

        let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let conflict = if r1.is_err() { r1 } else { r2 };
        assert!(matches!(
            conflict,
            Err(CoreError::AlreadyReserved { .. })
        ));
    }

    #[tokio::test]
    async fn test_reserve_fails_without_poster_funds() {
        let (mgr, _wallet) = manager().await;
        let poster = UserId::new();
        let worker = UserId::new();

        let job = mgr.create_job(poster, "Unfunded job", dec!(50)).await.unwrap();
        let result = mgr.reserve(&job.id, &worker).await;
        assert!(matches!(result, Err(CoreError::InsufficientBalance { .. })));

        // Failed hold must leave the job open for a later attempt.
        assert_eq!(mgr.job(&job.id).await.unwrap().status, JobStatus::Open);
        assert!(mgr.active_for_job(&job.id).await.is_none());
    }

    #[tokio::test]
    async fn test_reserve_respects_policy() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();

        mgr.set_policy(ReservationPolicy {
            enabled: false,
            ..ReservationPolicy::default()
        });
        let job = mgr.create_job(poster, "Walk dog", dec!(10)).await.unwrap();
        assert!(matches!(
            mgr.reserve(&job.id, &worker).await,
            Err(CoreError::ReservationsDisabled)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_reservation_cap() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();

        mgr.set_policy(ReservationPolicy {
            max_concurrent_per_worker: 2,
            ..ReservationPolicy::default()
        });

        for i in 0..2 {
            let job = mgr
                .create_job(poster.clone(), format!("Job {i}"), dec!(10))
                .await
                .unwrap();
            mgr.reserve(&job.id, &worker).await.unwrap();
        }

        let third = mgr.create_job(poster, "Job 3", dec!(10)).await.unwrap();
        assert!(matches!(
            mgr.reserve(&third.id, &worker).await,
            Err(CoreError::ReservationLimitReached { limit: 2, .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_releases_escrow_and_reopens_job() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();

        let job = mgr.create_job(poster.clone(), "Mow lawn", dec!(30)).await.unwrap();
        let reservation = mgr.reserve(&job.id, &worker).await.unwrap();

        let cancelled = mgr.cancel(&reservation.id, &worker, None).await.unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert_eq!(mgr.job(&job.id).await.unwrap().status, JobStatus::Open);

        let balance = wallet.balance(&poster).await;
        assert_eq!(balance.available, dec!(100));
        assert_eq!(balance.escrow_held, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_cancel_requires_owning_worker() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();
        let stranger = UserId::new();

        let job = mgr.create_job(poster, "Wash car", dec!(15)).await.unwrap();
        let reservation = mgr.reserve(&job.id, &worker).await.unwrap();

        assert!(matches!(
            mgr.cancel(&reservation.id, &stranger, None).await,
            Err(CoreError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_expire_is_idempotent() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();

        mgr.set_policy(ReservationPolicy {
            window: Duration::seconds(0),
            ..ReservationPolicy::default()
        });
        let job = mgr.create_job(poster.clone(), "Shovel snow", dec!(20)).await.unwrap();
        let reservation = mgr.reserve(&job.id, &worker).await.unwrap();

        assert!(mgr.expire(&reservation.id).await.unwrap());
        assert!(!mgr.expire(&reservation.id).await.unwrap());

        assert_eq!(mgr.job(&job.id).await.unwrap().status, JobStatus::Open);
        assert_eq!(wallet.balance(&poster).await.available, dec!(100));
        assert_eq!(mgr.violations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_check_expiry_is_pure() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();

        let job = mgr.create_job(poster, "Clean gutters", dec!(20)).await.unwrap();
        let reservation = mgr.reserve(&job.id, &worker).await.unwrap();

        assert!(!mgr.check_expiry(&reservation.id).await.unwrap());
        assert_eq!(
            mgr.reservation(&reservation.id).await.unwrap().status,
            ReservationStatus::Active
        );
    }

    #[tokio::test]
    async fn test_cleanup_purges_terminal_rows() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();

        mgr.set_policy(ReservationPolicy {
            window: Duration::seconds(-3600),
            ..ReservationPolicy::default()
        });
        let job = mgr.create_job(poster, "Old job", dec!(10)).await.unwrap();
        let reservation = mgr.reserve(&job.id, &worker).await.unwrap();
        mgr.cancel(&reservation.id, &worker, Some("changed my mind".into()))
            .await
            .unwrap();

        // Retention of zero: everything terminal and past deadline purges.
        let purged = mgr.cleanup(Duration::seconds(0)).await.unwrap();
        assert_eq!(purged, 1);

        let row = mgr.reservation(&reservation.id).await.unwrap();
        assert_eq!(row.status, ReservationStatus::Cancelled);
        assert!(row.cancel_reason.is_none());
        assert!(row.purged_at.is_some());

        // Second pass finds nothing.
        assert_eq!(mgr.cleanup(Duration::seconds(0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_complete_closes_job() {
        let (mgr, wallet) = manager().await;
        let poster = funded_poster(&wallet, dec!(100)).await;
        let worker = UserId::new();

        let job = mgr.create_job(poster, "Assemble desk", dec!(45)).await.unwrap();
        let reservation = mgr.reserve(&job.id, &worker).await.unwrap();

        let completed = mgr.complete(&reservation.id).await.unwrap();
        assert_eq!(completed.status, ReservationStatus::Completed);
        assert_eq!(mgr.job(&job.id).await.unwrap().status, JobStatus::Completed);

        // Terminal: no further transitions.
        assert!(matches!(
            mgr.complete(&reservation.id).await,
            Err(CoreError::InvalidTransition { .. })
        ));
        assert!(matches!(
            mgr.cancel(&reservation.id, &worker, None).await,
            Err(CoreError::InvalidTransition { .. })
        ));
    }
}
