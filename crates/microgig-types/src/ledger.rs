//! Ledger entry and balance types
//!
//! A ledger entry is an immutable, signed record of a balance-affecting
//! event. Each entry targets one balance bucket, so the per-user invariant
//! is exact: the signed sum of a user's entries equals
//! `available + escrow_held`, and the per-bucket sums equal each derived
//! balance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EntryId, UserId};

/// Which derived balance an entry affects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceBucket {
    /// Spendable balance
    Available,
    /// Balance committed to pending reservations
    Escrow,
}

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryKind {
    /// External funds added to available
    Deposit,
    /// Available funds paid out externally
    Withdrawal,
    /// Worker payout on settlement
    EarningRelease,
    /// Platform cut on settlement or fee collection
    CommissionFee,
    /// Peer-to-peer tip movement
    TipTransfer,
    /// Available moved into escrow
    EscrowHold,
    /// Escrow moved back to available or consumed by settlement
    EscrowRelease,
}

impl LedgerEntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::EarningRelease => "earning_release",
            Self::CommissionFee => "commission_fee",
            Self::TipTransfer => "tip_transfer",
            Self::EscrowHold => "escrow_hold",
            Self::EscrowRelease => "escrow_release",
        }
    }
}

/// Immutable record of one balance-affecting event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID
    pub id: EntryId,
    /// Account the entry applies to
    pub user: UserId,
    /// Signed amount (positive credits, negative debits)
    pub amount: Decimal,
    /// Bucket the amount applies to
    pub bucket: BalanceBucket,
    /// Kind of event
    pub kind: LedgerEntryKind,
    /// Reservation, work-proof or transaction id this entry settles
    pub reference: Option<String>,
    /// Human-readable description
    pub description: String,
    /// Balance of the bucket after this entry
    pub balance_after: Decimal,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
}

/// An entry not yet committed to the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    /// Account to post against
    pub user: UserId,
    /// Signed amount
    pub amount: Decimal,
    /// Bucket the amount applies to
    pub bucket: BalanceBucket,
    /// Kind of event
    pub kind: LedgerEntryKind,
    /// Settlement reference (duplicate-guarded per (reference, kind))
    pub reference: Option<String>,
    /// Human-readable description
    pub description: String,
}

impl Posting {
    /// Posting against the available bucket
    pub fn available(
        user: UserId,
        amount: Decimal,
        kind: LedgerEntryKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user,
            amount,
            bucket: BalanceBucket::Available,
            kind,
            reference: None,
            description: description.into(),
        }
    }

    /// Posting against the escrow bucket
    pub fn escrow(
        user: UserId,
        amount: Decimal,
        kind: LedgerEntryKind,
        description: impl Into<String>,
    ) -> Self {
        Self {
            user,
            amount,
            bucket: BalanceBucket::Escrow,
            kind,
            reference: None,
            description: description.into(),
        }
    }

    /// Attach a settlement reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Per-user derived balance view
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceView {
    /// Spendable balance
    pub available: Decimal,
    /// Balance committed to pending reservations
    pub escrow_held: Decimal,
}

impl BalanceView {
    /// Total balance across both buckets
    pub fn total(&self) -> Decimal {
        self.available + self.escrow_held
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_posting_builders() {
        let user = UserId::new();
        let p = Posting::available(user.clone(), dec!(10), LedgerEntryKind::Deposit, "deposit")
            .with_reference("txn_1");
        assert_eq!(p.bucket, BalanceBucket::Available);
        assert_eq!(p.reference.as_deref(), Some("txn_1"));

        let p = Posting::escrow(user, dec!(-10), LedgerEntryKind::EscrowRelease, "release");
        assert_eq!(p.bucket, BalanceBucket::Escrow);
    }

    #[test]
    fn test_balance_total() {
        let view = BalanceView {
            available: dec!(40),
            escrow_held: dec!(10),
        };
        assert_eq!(view.total(), dec!(50));
    }
}
