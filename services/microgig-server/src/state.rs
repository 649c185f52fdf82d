//! Shared application state: the lifecycle engine wired together.

use microgig_cron::CronOrchestrator;
use microgig_ledger::Ledger;
use microgig_reservation::ReservationManager;
use microgig_wallet::{EscrowWallet, FeeSchedule};
use microgig_workproof::WorkProofManager;

use crate::auth::AuthConfig;

pub struct AppState {
    pub wallet: EscrowWallet,
    pub reservations: ReservationManager,
    pub proofs: WorkProofManager,
    pub cron: CronOrchestrator,
    pub auth: AuthConfig,
}

impl AppState {
    /// Build the full engine on a fresh ledger
    pub fn new(auth: AuthConfig) -> Self {
        let wallet = EscrowWallet::new(Ledger::new(), FeeSchedule::with_defaults());
        let reservations = ReservationManager::new(wallet.clone());
        let proofs = WorkProofManager::new(reservations.clone(), wallet.clone());
        let cron = CronOrchestrator::new(reservations.clone(), proofs.clone());
        Self {
            wallet,
            reservations,
            proofs,
            cron,
            auth,
        }
    }
}
