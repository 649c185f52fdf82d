//! Microgig EscrowWallet - per-user balance operations atop the ledger
//!
//! All balance mutations go through here as atomic ledger groups. Fees are
//! computed from the schedule current at settlement time, never from a
//! value captured earlier, so administrative updates affect only future
//! settlements.

mod schedule;

pub use schedule::FeeSchedule;

use rust_decimal::Decimal;

use microgig_ledger::Ledger;
use microgig_types::{
    BalanceView, CoreError, FeeSettings, FeeType, LedgerEntry, LedgerEntryKind, Posting, Result,
    UserId,
};

/// Bounded retry attempts for transient storage errors at the ledger-write
/// boundary. Logically-final errors are never retried.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Outcome of a settlement: the worker's payout entry and the platform's
/// commission entry, committed as one group
#[derive(Debug, Clone)]
pub struct Settlement {
    pub worker_entry: Option<LedgerEntry>,
    pub commission_entry: Option<LedgerEntry>,
}

/// Per-user wallet view and mutation operations built atop the ledger
#[derive(Clone)]
pub struct EscrowWallet {
    ledger: Ledger,
    fees: FeeSchedule,
}

impl EscrowWallet {
    pub fn new(ledger: Ledger, fees: FeeSchedule) -> Self {
        Self { ledger, fees }
    }

    /// The underlying ledger
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The fee schedule
    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    /// Current balance view for a user
    pub async fn balance(&self, user: &UserId) -> BalanceView {
        self.ledger.balance(user).await
    }

    /// Entry history for a user, newest first
    pub async fn transactions(&self, user: &UserId) -> Vec<LedgerEntry> {
        let mut entries = self.ledger.account_entries(user).await;
        entries.reverse();
        entries
    }

    /// Add external funds to a user's available balance.
    ///
    /// The deposit fee (if any) is collected into the platform account in
    /// the same atomic group.
    pub async fn deposit(&self, user: &UserId, amount: Decimal) -> Result<LedgerEntry> {
        require_positive(amount)?;

        let fee = self.fees.snapshot(FeeType::Deposit).calculate(amount);
        let net = amount - fee;
        if net <= Decimal::ZERO {
            return Err(CoreError::invalid_amount(format!(
                "deposit of {amount} does not cover the {fee} fee"
            )));
        }

        let mut postings = vec![Posting::available(
            user.clone(),
            net,
            LedgerEntryKind::Deposit,
            describe_fee("Deposit", fee),
        )];
        if fee > Decimal::ZERO {
            postings.push(Posting::available(
                UserId::platform(),
                fee,
                LedgerEntryKind::CommissionFee,
                "Deposit fee",
            ));
        }

        let mut entries = self.commit(postings).await?;
        Ok(entries.remove(0))
    }

    /// Pay out available funds externally.
    ///
    /// Fails with InsufficientBalance when `available < amount`; the check
    /// and the debit are one atomic unit against concurrent mutations.
    pub async fn withdraw(&self, user: &UserId, amount: Decimal) -> Result<LedgerEntry> {
        require_positive(amount)?;

        let fee = self.fees.snapshot(FeeType::Withdrawal).calculate(amount);
        if fee >= amount {
            return Err(CoreError::invalid_amount(format!(
                "withdrawal of {amount} does not cover the {fee} fee"
            )));
        }

        let mut postings = vec![Posting::available(
            user.clone(),
            -amount,
            LedgerEntryKind::Withdrawal,
            describe_fee("Withdrawal", fee),
        )];
        if fee > Decimal::ZERO {
            postings.push(Posting::available(
                UserId::platform(),
                fee,
                LedgerEntryKind::CommissionFee,
                "Withdrawal fee",
            ));
        }

        let mut entries = self.commit(postings).await?;
        Ok(entries.remove(0))
    }

    /// Internal settlement path: credit earnings to a worker.
    ///
    /// Duplicate-guarded per reference, so replaying a settlement is a
    /// Conflict rather than a double credit.
    pub async fn add_earnings(
        &self,
        user: &UserId,
        amount: Decimal,
        reference: &str,
        description: impl Into<String>,
    ) -> Result<LedgerEntry> {
        require_positive(amount)?;

        let posting = Posting::available(
            user.clone(),
            amount,
            LedgerEntryKind::EarningRelease,
            description,
        )
        .with_reference(reference);

        let mut entries = self.commit(vec![posting]).await?;
        Ok(entries.remove(0))
    }

    /// Move `amount` of a funder's available balance into escrow
    pub async fn hold_escrow(
        &self,
        funder: &UserId,
        amount: Decimal,
        reference: &str,
    ) -> Result<()> {
        require_positive(amount)?;

        self.commit(vec![
            Posting::available(
                funder.clone(),
                -amount,
                LedgerEntryKind::EscrowHold,
                "Escrow hold",
            )
            .with_reference(reference),
            Posting::escrow(
                funder.clone(),
                amount,
                LedgerEntryKind::EscrowHold,
                "Escrow hold",
            )
            .with_reference(reference),
        ])
        .await?;
        Ok(())
    }

    /// Release held escrow back to the funder's available balance
    pub async fn release_escrow(
        &self,
        funder: &UserId,
        amount: Decimal,
        reference: &str,
    ) -> Result<()> {
        require_positive(amount)?;

        self.commit(vec![
            Posting::escrow(
                funder.clone(),
                -amount,
                LedgerEntryKind::EscrowRelease,
                "Escrow release",
            )
            .with_reference(reference),
            Posting::available(
                funder.clone(),
                amount,
                LedgerEntryKind::EscrowRelease,
                "Escrow release",
            )
            .with_reference(reference),
        ])
        .await?;
        Ok(())
    }

    /// Settle held escrow: the worker receives `payout - commission`, the
    /// platform receives `commission`, and the funder's escrow is consumed.
    ///
    /// Commission is computed from the schedule at call time. The three
    /// entries are one atomic group; a reader never observes the earning
    /// without the commission.
    pub async fn settle(
        &self,
        funder: &UserId,
        worker: &UserId,
        payout: Decimal,
        reference: &str,
        description: impl Into<String>,
    ) -> Result<Settlement> {
        require_positive(payout)?;

        let mut commission = self.fees.snapshot(FeeType::Commission).calculate(payout);
        if commission > payout {
            commission = payout;
        }
        let net = payout - commission;
        let description = description.into();

        let mut postings = vec![Posting::escrow(
            funder.clone(),
            -payout,
            LedgerEntryKind::EscrowRelease,
            description.clone(),
        )
        .with_reference(reference)];
        if net > Decimal::ZERO {
            postings.push(
                Posting::available(
                    worker.clone(),
                    net,
                    LedgerEntryKind::EarningRelease,
                    description.clone(),
                )
                .with_reference(reference),
            );
        }
        if commission > Decimal::ZERO {
            postings.push(
                Posting::available(
                    UserId::platform(),
                    commission,
                    LedgerEntryKind::CommissionFee,
                    format!("Commission: {description}"),
                )
                .with_reference(reference),
            );
        }

        let entries = self.commit(postings).await?;
        let worker_entry = entries
            .iter()
            .find(|e| e.kind == LedgerEntryKind::EarningRelease)
            .cloned();
        let commission_entry = entries
            .iter()
            .find(|e| e.kind == LedgerEntryKind::CommissionFee)
            .cloned();
        Ok(Settlement {
            worker_entry,
            commission_entry,
        })
    }

    /// Read-only tip precheck: balance and tip limits.
    ///
    /// Advisory only; `process_tip` re-validates under the commit lock, so
    /// two concurrent tips cannot both pass on the same funds.
    pub async fn validate_tip_balance(&self, user: &UserId, amount: Decimal) -> Result<()> {
        require_positive(amount)?;
        self.check_tip_limits(amount)?;

        let view = self.ledger.balance(user).await;
        if view.available < amount {
            return Err(CoreError::InsufficientBalance {
                user_id: user.clone(),
                requested: amount,
                available: view.available,
            });
        }
        Ok(())
    }

    /// Transfer a tip between users.
    ///
    /// The balance check happens at commit time inside the atomic group;
    /// both sides commit or neither does. The receiver gets
    /// `amount - tip fee`.
    pub async fn process_tip(
        &self,
        from: &UserId,
        to: &UserId,
        amount: Decimal,
        reference: &str,
        description: impl Into<String>,
    ) -> Result<Vec<LedgerEntry>> {
        require_positive(amount)?;
        self.check_tip_limits(amount)?;
        if from == to {
            return Err(CoreError::invalid_input("to_user_id", "cannot tip yourself"));
        }

        let fee = self.fees.snapshot(FeeType::Tip).calculate(amount);
        let net = amount - fee;
        if net <= Decimal::ZERO {
            return Err(CoreError::invalid_amount(format!(
                "tip of {amount} does not cover the {fee} fee"
            )));
        }
        let description = description.into();

        let mut postings = vec![
            Posting::available(
                from.clone(),
                -amount,
                LedgerEntryKind::TipTransfer,
                format!("Tip sent: {description}"),
            )
            .with_reference(reference),
            Posting::available(
                to.clone(),
                net,
                LedgerEntryKind::TipTransfer,
                format!("Tip received: {description}"),
            )
            .with_reference(reference),
        ];
        if fee > Decimal::ZERO {
            postings.push(
                Posting::available(
                    UserId::platform(),
                    fee,
                    LedgerEntryKind::CommissionFee,
                    "Tip fee",
                )
                .with_reference(reference),
            );
        }

        self.commit(postings).await
    }

    fn check_tip_limits(&self, amount: Decimal) -> Result<()> {
        let settings = self.fees.snapshot(FeeType::Tip);
        if !settings.is_active {
            return Ok(());
        }
        if amount < settings.minimum_fee {
            return Err(CoreError::invalid_amount(format!(
                "minimum tip amount is {}",
                settings.minimum_fee
            )));
        }
        if let Some(max) = settings.maximum_fee {
            if amount > max {
                return Err(CoreError::invalid_amount(format!(
                    "maximum tip amount is {max}"
                )));
            }
        }
        Ok(())
    }

    /// Commit a posting group, retrying transient storage errors only
    async fn commit(&self, postings: Vec<Posting>) -> Result<Vec<LedgerEntry>> {
        let mut attempt = 1;
        loop {
            match self.ledger.append(postings.clone()).await {
                Ok(entries) => return Ok(entries),
                Err(err) if err.is_retriable() && attempt < MAX_COMMIT_ATTEMPTS => {
                    tracing::warn!(attempt, error = %err, "retrying ledger commit");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Fee schedule read-through helpers for the admin surface
impl EscrowWallet {
    pub fn fee_settings(&self, fee_type: FeeType) -> FeeSettings {
        self.fees.snapshot(fee_type)
    }

    pub fn update_fee_settings(
        &self,
        fee_type: FeeType,
        update: &microgig_types::FeeSettingsUpdate,
    ) -> FeeSettings {
        self.fees.update(fee_type, update)
    }
}

fn require_positive(amount: Decimal) -> Result<()> {
    if amount <= Decimal::ZERO {
        return Err(CoreError::invalid_amount("amount must be greater than zero"));
    }
    Ok(())
}

fn describe_fee(label: &str, fee: Decimal) -> String {
    if fee > Decimal::ZERO {
        format!("{label} (fee: {fee})")
    } else {
        label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microgig_types::FeeSettingsUpdate;
    use rust_decimal_macros::dec;

    fn wallet() -> EscrowWallet {
        EscrowWallet::new(Ledger::new(), FeeSchedule::with_defaults())
    }

    /// Wallet with every fee switched off, for exercising the pure flows
    fn feeless_wallet() -> EscrowWallet {
        let w = wallet();
        for fee_type in FeeType::all() {
            w.update_fee_settings(
                fee_type,
                &FeeSettingsUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            );
        }
        w
    }

    #[tokio::test]
    async fn test_deposit_increases_available() {
        let w = feeless_wallet();
        let user = UserId::new();

        let entry = w.deposit(&user, dec!(100)).await.unwrap();
        assert_eq!(entry.amount, dec!(100));
        assert_eq!(w.balance(&user).await.available, dec!(100));
    }

    #[tokio::test]
    async fn test_deposit_rejects_non_positive() {
        let w = wallet();
        let user = UserId::new();
        assert!(matches!(
            w.deposit(&user, dec!(0)).await,
            Err(CoreError::InvalidAmount { .. })
        ));
        assert!(matches!(
            w.deposit(&user, dec!(-5)).await,
            Err(CoreError::InvalidAmount { .. })
        ));
    }

    #[tokio::test]
    async fn test_deposit_fee_goes_to_platform() {
        let w = wallet();
        let user = UserId::new();

        // Default deposit fee: 2.5% of $100 = $2.50
        w.deposit(&user, dec!(100)).await.unwrap();
        assert_eq!(w.balance(&user).await.available, dec!(97.50));
        assert_eq!(w.balance(&UserId::platform()).await.available, dec!(2.50));
    }

    #[tokio::test]
    async fn test_withdrawal_checks_balance() {
        let w = feeless_wallet();
        let user = UserId::new();
        w.deposit(&user, dec!(50)).await.unwrap();

        let result = w.withdraw(&user, dec!(80)).await;
        assert!(matches!(result, Err(CoreError::InsufficientBalance { .. })));
        assert_eq!(w.balance(&user).await.available, dec!(50));

        w.withdraw(&user, dec!(30)).await.unwrap();
        assert_eq!(w.balance(&user).await.available, dec!(20));
    }

    #[tokio::test]
    async fn test_settlement_splits_payout() {
        let w = wallet();
        let poster = UserId::new();
        let worker = UserId::new();

        // Fund and hold $100 of escrow, feeless deposit for clarity.
        w.update_fee_settings(
            FeeType::Deposit,
            &FeeSettingsUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        );
        w.deposit(&poster, dec!(100)).await.unwrap();
        w.hold_escrow(&poster, dec!(100), "rsv_1").await.unwrap();

        // Default commission: 3% of $100 = $3.
        let settlement = w
            .settle(&poster, &worker, dec!(100), "wp_1", "Job payout")
            .await
            .unwrap();

        let worker_entry = settlement.worker_entry.unwrap();
        let commission_entry = settlement.commission_entry.unwrap();
        assert_eq!(worker_entry.amount, dec!(97));
        assert_eq!(commission_entry.amount, dec!(3));
        assert_eq!(worker_entry.amount + commission_entry.amount, dec!(100));

        assert_eq!(w.balance(&poster).await.escrow_held, Decimal::ZERO);
        assert_eq!(w.balance(&worker).await.available, dec!(97));
        assert_eq!(w.balance(&UserId::platform()).await.available, dec!(3));
    }

    #[tokio::test]
    async fn test_settlement_replay_is_conflict() {
        let w = feeless_wallet();
        let poster = UserId::new();
        let worker = UserId::new();

        w.deposit(&poster, dec!(200)).await.unwrap();
        w.hold_escrow(&poster, dec!(200), "rsv_1").await.unwrap();

        w.settle(&poster, &worker, dec!(100), "wp_1", "Job payout")
            .await
            .unwrap();
        let replay = w
            .settle(&poster, &worker, dec!(100), "wp_1", "Job payout")
            .await;
        assert!(matches!(replay, Err(CoreError::DuplicateReference { .. })));
        assert_eq!(w.balance(&worker).await.available, dec!(100));
    }

    #[tokio::test]
    async fn test_commission_reads_schedule_at_settlement_time() {
        let w = feeless_wallet();
        let poster = UserId::new();
        let worker = UserId::new();

        w.deposit(&poster, dec!(400)).await.unwrap();
        w.hold_escrow(&poster, dec!(400), "rsv_1").await.unwrap();

        // Re-enable commission at 10% after the hold was taken.
        w.update_fee_settings(
            FeeType::Commission,
            &FeeSettingsUpdate {
                fee_percentage: Some(dec!(10)),
                is_active: Some(true),
                ..Default::default()
            },
        );

        let settlement = w
            .settle(&poster, &worker, dec!(400), "wp_1", "Job payout")
            .await
            .unwrap();
        assert_eq!(settlement.worker_entry.unwrap().amount, dec!(360));
        assert_eq!(settlement.commission_entry.unwrap().amount, dec!(40));
    }

    #[tokio::test]
    async fn test_tip_never_partially_commits() {
        let w = feeless_wallet();
        let sender = UserId::new();
        let receiver = UserId::new();
        w.deposit(&sender, dec!(10)).await.unwrap();

        let result = w
            .process_tip(&sender, &receiver, dec!(50), "tip_1", "thanks")
            .await;
        assert!(matches!(result, Err(CoreError::InsufficientBalance { .. })));
        assert_eq!(w.balance(&sender).await.available, dec!(10));
        assert_eq!(w.balance(&receiver).await.available, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_tip_limits() {
        let w = wallet();
        let sender = UserId::new();
        w.update_fee_settings(
            FeeType::Deposit,
            &FeeSettingsUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        );
        w.deposit(&sender, dec!(500)).await.unwrap();

        // Default tip limits: min $0.50, max $100.
        let receiver = UserId::new();
        assert!(matches!(
            w.validate_tip_balance(&sender, dec!(0.25)).await,
            Err(CoreError::InvalidAmount { .. })
        ));
        assert!(matches!(
            w.process_tip(&sender, &receiver, dec!(200), "tip_1", "big").await,
            Err(CoreError::InvalidAmount { .. })
        ));
        assert!(w.validate_tip_balance(&sender, dec!(20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_tip_fee_deducted_from_gross() {
        let w = wallet();
        let sender = UserId::new();
        let receiver = UserId::new();
        w.update_fee_settings(
            FeeType::Deposit,
            &FeeSettingsUpdate {
                is_active: Some(false),
                ..Default::default()
            },
        );
        w.deposit(&sender, dec!(100)).await.unwrap();

        // Default tip fee floors at $0.50.
        w.process_tip(&sender, &receiver, dec!(20), "tip_1", "thanks")
            .await
            .unwrap();
        assert_eq!(w.balance(&sender).await.available, dec!(80));
        assert_eq!(w.balance(&receiver).await.available, dec!(19.50));
        assert_eq!(w.balance(&UserId::platform()).await.available, dec!(0.50));
    }

    #[tokio::test]
    async fn test_balance_law_after_mixed_operations() {
        let w = wallet();
        let user = UserId::new();
        let other = UserId::new();

        w.deposit(&user, dec!(200)).await.unwrap();
        w.withdraw(&user, dec!(40)).await.unwrap();
        w.hold_escrow(&user, dec!(50), "rsv_1").await.unwrap();
        w.process_tip(&user, &other, dec!(10), "tip_1", "thanks")
            .await
            .unwrap();
        w.release_escrow(&user, dec!(50), "rsv_1_release").await.unwrap();

        // available + escrow_held must equal the signed entry sum.
        for account in [&user, &other, &UserId::platform()] {
            let view = w.ledger().reconcile(account).await.unwrap();
            assert_eq!(w.balance(account).await, view);
        }
    }
}
