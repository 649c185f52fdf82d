//! Microgig WorkProofManager - review workflow for submitted work
//!
//! A proof moves `UnderReview -> {Approved, Rejected, TimedOut}` with an
//! optional detour through `RevisionRequested` (which extends the review
//! deadline). Approval settles the escrow to the worker minus commission;
//! rejection releases it back to the poster. The timeout sweep applies a
//! policy-configured default resolution to overdue proofs exactly once.
//!
//! Invariants:
//!
//! - a proof references exactly one reservation, and a reservation has at
//!   most one proof in a reviewable state at a time
//! - terminal proofs never transition again; a replayed timeout is a no-op
//! - settlement entries (earning + commission) are written as one atomic
//!   ledger group, keyed by the proof id

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use microgig_reservation::ReservationManager;
use microgig_types::{
    CoreError, ReservationId, ReservationStatus, Result, ReviewPolicy, TimeoutResolution, UserId,
    WorkProof, WorkProofId, WorkProofStatus,
};
use microgig_wallet::EscrowWallet;

#[derive(Default)]
struct WorkProofState {
    proofs: HashMap<WorkProofId, WorkProof>,
    /// Index enforcing one reviewable proof per reservation
    pending_by_reservation: HashMap<ReservationId, WorkProofId>,
}

/// Review workflow over submitted work proofs
#[derive(Clone)]
pub struct WorkProofManager {
    state: Arc<RwLock<WorkProofState>>,
    policy: Arc<parking_lot::RwLock<ReviewPolicy>>,
    reservations: ReservationManager,
    wallet: EscrowWallet,
}

impl WorkProofManager {
    pub fn new(reservations: ReservationManager, wallet: EscrowWallet) -> Self {
        Self::with_policy(reservations, wallet, ReviewPolicy::default())
    }

    pub fn with_policy(
        reservations: ReservationManager,
        wallet: EscrowWallet,
        policy: ReviewPolicy,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(WorkProofState::default())),
            policy: Arc::new(parking_lot::RwLock::new(policy)),
            reservations,
            wallet,
        }
    }

    /// Current review policy
    pub fn policy(&self) -> ReviewPolicy {
        self.policy.read().clone()
    }

    /// Replace the review policy; read again at each sweep, so it affects
    /// proofs not yet resolved
    pub fn set_policy(&self, policy: ReviewPolicy) {
        *self.policy.write() = policy;
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Submit proof of completed work against an Active reservation.
    ///
    /// Fails `Expired` when the reservation deadline has already passed
    /// (the expiry sweep owns that reservation now) and `Conflict` when a
    /// reviewable proof already exists.
    pub async fn submit(
        &self,
        reservation_id: &ReservationId,
        worker: &UserId,
    ) -> Result<WorkProof> {
        let reservation = self.reservations.reservation(reservation_id).await?;
        if reservation.worker != *worker {
            return Err(CoreError::unauthorized(
                "only the reservation's worker may submit proof",
            ));
        }
        if reservation.status != ReservationStatus::Active {
            return Err(CoreError::InvalidTransition {
                entity: "reservation",
                from: reservation.status.as_str().to_string(),
                to: "under_review".to_string(),
            });
        }
        if reservation.is_past_deadline(Utc::now()) {
            return Err(CoreError::ReservationExpired {
                reservation_id: reservation_id.clone(),
            });
        }

        let review_window = self.policy().review_window;
        let mut state = self.state.write().await;
        if state.pending_by_reservation.contains_key(reservation_id) {
            return Err(CoreError::ProofAlreadyPending {
                reservation_id: reservation_id.clone(),
            });
        }

        let proof = WorkProof::new(reservation_id.clone(), worker.clone(), review_window);
        state
            .pending_by_reservation
            .insert(reservation_id.clone(), proof.id.clone());
        state.proofs.insert(proof.id.clone(), proof.clone());

        tracing::info!(
            proof_id = %proof.id,
            reservation_id = %reservation_id,
            review_deadline = %proof.review_deadline,
            "work proof submitted"
        );
        Ok(proof)
    }

    // ========================================================================
    // Reviewer decisions
    // ========================================================================

    /// Approve a proof: reservation Completed, escrow settled to the worker
    /// minus the commission current at this moment.
    pub async fn approve(&self, proof_id: &WorkProofId, reviewer: &UserId) -> Result<WorkProof> {
        let mut state = self.state.write().await;
        let proof = self.reviewable(&state, proof_id, "approved")?;
        let reservation_id = proof.reservation_id.clone();

        let (poster, worker, payout) =
            self.reservations.settlement_parties(&reservation_id).await?;
        self.authorize_reviewer(reviewer, &poster)?;

        // Money moves first: a failed settlement leaves the proof
        // reviewable and the reservation active, with the hold intact.
        let settlement = self
            .wallet
            .settle(
                &poster,
                &worker,
                payout,
                &proof_id.to_string(),
                format!("Job payout for reservation {reservation_id}"),
            )
            .await?;
        self.reservations.complete(&reservation_id).await?;

        let proof = state.proofs.get_mut(proof_id).expect("checked above");
        proof.status = WorkProofStatus::Approved;
        state.pending_by_reservation.remove(&reservation_id);

        tracing::info!(
            proof_id = %proof_id,
            reservation_id = %reservation_id,
            payout = %payout,
            worker_net = %settlement.worker_entry.as_ref().map(|e| e.amount).unwrap_or_default(),
            "work proof approved"
        );
        Ok(state.proofs[proof_id].clone())
    }

    /// Reject a proof: reservation Cancelled, job reopened, escrow back to
    /// the poster. The worker receives nothing.
    pub async fn reject(
        &self,
        proof_id: &WorkProofId,
        reviewer: &UserId,
        reason: impl Into<String>,
    ) -> Result<WorkProof> {
        let mut state = self.state.write().await;
        let proof = self.reviewable(&state, proof_id, "rejected")?;
        let reservation_id = proof.reservation_id.clone();

        let (poster, _, _) = self.reservations.settlement_parties(&reservation_id).await?;
        self.authorize_reviewer(reviewer, &poster)?;

        let reason = reason.into();
        self.reservations
            .resolve_rejected(&reservation_id, reason.clone())
            .await?;

        let proof = state.proofs.get_mut(proof_id).expect("checked above");
        proof.status = WorkProofStatus::Rejected;
        proof.reviewer_note = Some(reason);
        state.pending_by_reservation.remove(&reservation_id);

        tracing::info!(proof_id = %proof_id, reservation_id = %reservation_id, "work proof rejected");
        Ok(state.proofs[proof_id].clone())
    }

    /// Ask the worker for changes. Extends the review deadline by the
    /// revision window, measured from the request rather than the original
    /// deadline. Escrow is untouched.
    pub async fn request_revision(
        &self,
        proof_id: &WorkProofId,
        reviewer: &UserId,
        reason: impl Into<String>,
    ) -> Result<WorkProof> {
        let mut state = self.state.write().await;
        let proof = self.reviewable(&state, proof_id, "revision_requested")?;

        let (poster, _, _) = self
            .reservations
            .settlement_parties(&proof.reservation_id)
            .await?;
        self.authorize_reviewer(reviewer, &poster)?;

        let revision_window = self.policy().revision_window;
        let proof = state.proofs.get_mut(proof_id).expect("checked above");
        proof.status = WorkProofStatus::RevisionRequested;
        proof.review_deadline = Utc::now() + revision_window;
        proof.reviewer_note = Some(reason.into());
        proof.revision_count += 1;

        tracing::info!(
            proof_id = %proof_id,
            review_deadline = %proof.review_deadline,
            revision_count = proof.revision_count,
            "revision requested"
        );
        Ok(proof.clone())
    }

    // ========================================================================
    // Timeout sweep
    // ========================================================================

    /// Sweep-invoked timeout. Idempotent: terminal proofs and proofs still
    /// inside their deadline return false untouched.
    ///
    /// An overdue proof transitions to TimedOut and the policy's default
    /// resolution is applied: AutoApprove settles to the worker,
    /// AutoReject releases escrow to the poster. A proof whose reservation
    /// was already resolved elsewhere is closed without escrow movement.
    pub async fn timeout(&self, proof_id: &WorkProofId) -> Result<bool> {
        let mut state = self.state.write().await;

        let proof = state
            .proofs
            .get(proof_id)
            .ok_or_else(|| CoreError::WorkProofNotFound {
                proof_id: proof_id.clone(),
            })?;
        if proof.status.is_terminal() {
            return Ok(false);
        }
        if !proof.is_past_deadline(Utc::now()) {
            return Ok(false);
        }
        let reservation_id = proof.reservation_id.clone();

        let resolution = self.policy().timeout_resolution;
        let reservation = self.reservations.reservation(&reservation_id).await?;

        let note = if reservation.status != ReservationStatus::Active {
            // Reservation resolved elsewhere (expired or cancelled); just
            // close the proof so the sweep stops revisiting it.
            "review window elapsed; reservation already resolved".to_string()
        } else {
            match resolution {
                TimeoutResolution::AutoApprove => {
                    let (poster, worker, payout) =
                        self.reservations.settlement_parties(&reservation_id).await?;
                    // Same ordering as approve: settle, then complete.
                    self.wallet
                        .settle(
                            &poster,
                            &worker,
                            payout,
                            &proof_id.to_string(),
                            format!("Job payout for reservation {reservation_id} (auto-approved)"),
                        )
                        .await?;
                    self.reservations.complete(&reservation_id).await?;
                    "review window elapsed; auto-approved".to_string()
                }
                TimeoutResolution::AutoReject => {
                    self.reservations
                        .resolve_rejected(&reservation_id, "review window elapsed; auto-rejected")
                        .await?;
                    "review window elapsed; auto-rejected".to_string()
                }
            }
        };

        let proof = state.proofs.get_mut(proof_id).expect("checked above");
        proof.status = WorkProofStatus::TimedOut;
        proof.reviewer_note = Some(note);
        state.pending_by_reservation.remove(&reservation_id);

        tracing::info!(proof_id = %proof_id, resolution = ?resolution, "work proof timed out");
        Ok(true)
    }

    // ========================================================================
    // Read surface
    // ========================================================================

    /// Look up one proof
    pub async fn proof(&self, proof_id: &WorkProofId) -> Result<WorkProof> {
        let state = self.state.read().await;
        state
            .proofs
            .get(proof_id)
            .cloned()
            .ok_or_else(|| CoreError::WorkProofNotFound {
                proof_id: proof_id.clone(),
            })
    }

    /// The reviewable proof on a reservation, if any
    pub async fn pending_for_reservation(
        &self,
        reservation_id: &ReservationId,
    ) -> Option<WorkProof> {
        let state = self.state.read().await;
        let id = state.pending_by_reservation.get(reservation_id)?;
        state.proofs.get(id).cloned()
    }

    /// Reviewable proofs past deadline, for the timeout sweep
    pub async fn overdue(&self, now: DateTime<Utc>) -> Vec<WorkProofId> {
        let state = self.state.read().await;
        state
            .proofs
            .values()
            .filter(|p| p.status.is_reviewable() && p.is_past_deadline(now))
            .map(|p| p.id.clone())
            .collect()
    }

    fn reviewable(
        &self,
        state: &WorkProofState,
        proof_id: &WorkProofId,
        to: &str,
    ) -> Result<WorkProof> {
        let proof = state
            .proofs
            .get(proof_id)
            .ok_or_else(|| CoreError::WorkProofNotFound {
                proof_id: proof_id.clone(),
            })?;
        if !proof.status.is_reviewable() {
            return Err(CoreError::InvalidTransition {
                entity: "work_proof",
                from: proof.status.as_str().to_string(),
                to: to.to_string(),
            });
        }
        Ok(proof.clone())
    }

    fn authorize_reviewer(&self, reviewer: &UserId, poster: &UserId) -> Result<()> {
        if reviewer != poster && !reviewer.is_platform() {
            return Err(CoreError::unauthorized(
                "only the job's poster may review this proof",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use microgig_ledger::Ledger;
    use microgig_types::{FeeSettingsUpdate, FeeType, JobStatus, ReservationPolicy};
    use microgig_wallet::FeeSchedule;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        wallet: EscrowWallet,
        reservations: ReservationManager,
        proofs: WorkProofManager,
        poster: UserId,
        worker: UserId,
    }

    /// Poster funded with $200, all fees off except a 3% commission
    async fn fixture() -> Fixture {
        let wallet = EscrowWallet::new(Ledger::new(), FeeSchedule::with_defaults());
        for fee_type in [FeeType::Deposit, FeeType::Withdrawal, FeeType::Tip] {
            wallet.update_fee_settings(
                fee_type,
                &FeeSettingsUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            );
        }
        wallet.update_fee_settings(
            FeeType::Commission,
            &FeeSettingsUpdate {
                minimum_fee: Some(Decimal::ZERO),
                ..Default::default()
            },
        );

        let reservations = ReservationManager::new(wallet.clone());
        let proofs = WorkProofManager::new(reservations.clone(), wallet.clone());

        let poster = UserId::new();
        wallet.deposit(&poster, dec!(200)).await.unwrap();

        Fixture {
            wallet,
            reservations,
            proofs,
            poster,
            worker: UserId::new(),
        }
    }

    async fn reserved(fx: &Fixture, payout: Decimal) -> ReservationId {
        let job = fx
            .reservations
            .create_job(fx.poster.clone(), "Fix the sink", payout)
            .await
            .unwrap();
        fx.reservations
            .reserve(&job.id, &fx.worker)
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_submit_requires_active_reservation() {
        let fx = fixture().await;
        let reservation_id = reserved(&fx, dec!(50)).await;

        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();
        assert_eq!(proof.status, WorkProofStatus::UnderReview);

        // Second submission while the first is pending is a conflict.
        assert!(matches!(
            fx.proofs.submit(&reservation_id, &fx.worker).await,
            Err(CoreError::ProofAlreadyPending { .. })
        ));

        // A stranger cannot submit at all.
        assert!(matches!(
            fx.proofs.submit(&reservation_id, &UserId::new()).await,
            Err(CoreError::Unauthorized { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_after_deadline_is_expired() {
        let fx = fixture().await;
        fx.reservations.set_policy(ReservationPolicy {
            window: Duration::seconds(-1),
            ..ReservationPolicy::default()
        });
        let reservation_id = reserved(&fx, dec!(50)).await;

        assert!(matches!(
            fx.proofs.submit(&reservation_id, &fx.worker).await,
            Err(CoreError::ReservationExpired { .. })
        ));
    }

    #[tokio::test]
    async fn test_approve_settles_payout_minus_commission() {
        let fx = fixture().await;
        let reservation_id = reserved(&fx, dec!(100)).await;
        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();

        let approved = fx.proofs.approve(&proof.id, &fx.poster).await.unwrap();
        assert_eq!(approved.status, WorkProofStatus::Approved);

        let reservation = fx.reservations.reservation(&reservation_id).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Completed);
        assert_eq!(
            fx.reservations.job(&reservation.job_id).await.unwrap().status,
            JobStatus::Completed
        );

        // 3% commission on $100.
        assert_eq!(fx.wallet.balance(&fx.worker).await.available, dec!(97));
        assert_eq!(
            fx.wallet.balance(&UserId::platform()).await.available,
            dec!(3)
        );
        assert_eq!(fx.wallet.balance(&fx.poster).await.escrow_held, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_approve_requires_poster() {
        let fx = fixture().await;
        let reservation_id = reserved(&fx, dec!(50)).await;
        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();

        assert!(matches!(
            fx.proofs.approve(&proof.id, &fx.worker).await,
            Err(CoreError::Unauthorized { .. })
        ));

        // Terminal after a real approval; replay is a conflict.
        fx.proofs.approve(&proof.id, &fx.poster).await.unwrap();
        assert!(matches!(
            fx.proofs.approve(&proof.id, &fx.poster).await,
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_settlement_leaves_proof_reviewable() {
        let fx = fixture().await;
        let reservation_id = reserved(&fx, dec!(100)).await;
        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();

        // An earlier entry under the proof's reference makes the settlement
        // group a duplicate, so the ledger rejects it.
        fx.wallet
            .add_earnings(&fx.worker, dec!(1), &proof.id.to_string(), "adjustment")
            .await
            .unwrap();

        assert!(matches!(
            fx.proofs.approve(&proof.id, &fx.poster).await,
            Err(CoreError::DuplicateReference { .. })
        ));

        // Nothing moved: the proof is still reviewable, the reservation
        // active, and the escrow hold intact.
        assert_eq!(
            fx.proofs.proof(&proof.id).await.unwrap().status,
            WorkProofStatus::UnderReview
        );
        assert_eq!(
            fx.reservations
                .reservation(&reservation_id)
                .await
                .unwrap()
                .status,
            ReservationStatus::Active
        );
        assert_eq!(fx.wallet.balance(&fx.poster).await.escrow_held, dec!(100));
    }

    #[tokio::test]
    async fn test_reject_releases_escrow_and_reopens_job() {
        let fx = fixture().await;
        let reservation_id = reserved(&fx, dec!(80)).await;
        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();

        let rejected = fx
            .proofs
            .reject(&proof.id, &fx.poster, "photos do not match")
            .await
            .unwrap();
        assert_eq!(rejected.status, WorkProofStatus::Rejected);
        assert_eq!(rejected.reviewer_note.as_deref(), Some("photos do not match"));

        let reservation = fx.reservations.reservation(&reservation_id).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Cancelled);
        assert_eq!(
            fx.reservations.job(&reservation.job_id).await.unwrap().status,
            JobStatus::Open
        );

        let balance = fx.wallet.balance(&fx.poster).await;
        assert_eq!(balance.available, dec!(200));
        assert_eq!(balance.escrow_held, Decimal::ZERO);
        assert_eq!(fx.wallet.balance(&fx.worker).await.available, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_revision_extends_deadline() {
        let fx = fixture().await;
        let reservation_id = reserved(&fx, dec!(50)).await;
        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();

        let revised = fx
            .proofs
            .request_revision(&proof.id, &fx.poster, "fix the trim")
            .await
            .unwrap();
        assert_eq!(revised.status, WorkProofStatus::RevisionRequested);
        assert_eq!(revised.revision_count, 1);
        assert!(revised.review_deadline > proof.review_deadline);

        // Still reviewable: the revised proof can be approved.
        let approved = fx.proofs.approve(&proof.id, &fx.poster).await.unwrap();
        assert_eq!(approved.status, WorkProofStatus::Approved);
    }

    #[tokio::test]
    async fn test_timeout_auto_approves_once() {
        let fx = fixture().await;
        fx.proofs.set_policy(ReviewPolicy {
            review_window: Duration::seconds(-1),
            ..ReviewPolicy::default()
        });
        let reservation_id = reserved(&fx, dec!(100)).await;
        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();

        assert!(fx.proofs.timeout(&proof.id).await.unwrap());
        assert!(!fx.proofs.timeout(&proof.id).await.unwrap());

        let resolved = fx.proofs.proof(&proof.id).await.unwrap();
        assert_eq!(resolved.status, WorkProofStatus::TimedOut);
        assert_eq!(fx.wallet.balance(&fx.worker).await.available, dec!(97));
    }

    #[tokio::test]
    async fn test_timeout_auto_reject_releases_escrow() {
        let fx = fixture().await;
        fx.proofs.set_policy(ReviewPolicy {
            review_window: Duration::seconds(-1),
            timeout_resolution: TimeoutResolution::AutoReject,
            ..ReviewPolicy::default()
        });
        let reservation_id = reserved(&fx, dec!(60)).await;
        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();

        assert!(fx.proofs.timeout(&proof.id).await.unwrap());

        assert_eq!(fx.wallet.balance(&fx.poster).await.available, dec!(200));
        assert_eq!(fx.wallet.balance(&fx.worker).await.available, Decimal::ZERO);
        let reservation = fx.reservations.reservation(&reservation_id).await.unwrap();
        assert_eq!(reservation.status, ReservationStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_skips_proofs_inside_deadline() {
        let fx = fixture().await;
        let reservation_id = reserved(&fx, dec!(50)).await;
        let proof = fx.proofs.submit(&reservation_id, &fx.worker).await.unwrap();

        assert!(!fx.proofs.timeout(&proof.id).await.unwrap());
        assert_eq!(
            fx.proofs.proof(&proof.id).await.unwrap().status,
            WorkProofStatus::UnderReview
        );
    }
}
