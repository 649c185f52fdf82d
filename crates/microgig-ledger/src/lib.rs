//! Microgig Ledger - append-only record of balance-affecting events
//!
//! The ledger is:
//! - Account-keyed by UserId
//! - Bucket-aware (available vs. escrow-held)
//! - Immutable (entries are append-only, never edited or removed)
//! - Group-atomic (a settlement's entries commit together or not at all)
//!
//! # Invariants
//!
//! 1. No negative balances in either bucket
//! 2. The signed sum of a user's entries equals available + escrow held
//! 3. A reader never observes part of a committed group
//! 4. A (reference, kind) pair is settled at most once

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::RwLock;

use microgig_types::{
    BalanceBucket, BalanceView, CoreError, EntryId, LedgerEntry, LedgerEntryKind, Posting, Result,
    UserId,
};

/// Cached per-account state, reconcilable from the entry log
#[derive(Debug, Clone, Default)]
struct AccountState {
    available: Decimal,
    escrow_held: Decimal,
    entry_count: u64,
}

impl AccountState {
    fn bucket(&self, bucket: BalanceBucket) -> Decimal {
        match bucket {
            BalanceBucket::Available => self.available,
            BalanceBucket::Escrow => self.escrow_held,
        }
    }

    fn bucket_mut(&mut self, bucket: BalanceBucket) -> &mut Decimal {
        match bucket {
            BalanceBucket::Available => &mut self.available,
            BalanceBucket::Escrow => &mut self.escrow_held,
        }
    }

    fn view(&self) -> BalanceView {
        BalanceView {
            available: self.available,
            escrow_held: self.escrow_held,
        }
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<UserId, AccountState>,
    entries: Vec<LedgerEntry>,
    /// (reference, kind) pairs already committed, for the duplicate guard
    settled: HashSet<(String, LedgerEntryKind)>,
    /// reference -> entry ids, for settlement lookups
    reference_index: HashMap<String, Vec<EntryId>>,
}

/// The Microgig ledger
///
/// Thread-safe and designed for concurrent access: every append takes the
/// single write lock, so a check-then-write is one atomic unit and per-user
/// balance mutations are linearizable.
#[derive(Clone, Default)]
pub struct Ledger {
    state: Arc<RwLock<LedgerState>>,
}

impl Ledger {
    /// Create a new in-memory ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the balance view for an account (zero if never posted to)
    pub async fn balance(&self, user: &UserId) -> BalanceView {
        let state = self.state.read().await;
        state
            .accounts
            .get(user)
            .map(AccountState::view)
            .unwrap_or_default()
    }

    /// Append a single posting
    pub async fn append_one(&self, posting: Posting) -> Result<LedgerEntry> {
        let mut entries = self.append(vec![posting]).await?;
        Ok(entries.remove(0))
    }

    /// Append a group of postings atomically
    ///
    /// Every posting is validated against the balances that would result
    /// from the earlier postings in the group; if any fails, nothing is
    /// applied. A reader never observes a partially committed group.
    pub async fn append(&self, postings: Vec<Posting>) -> Result<Vec<LedgerEntry>> {
        if postings.is_empty() {
            return Err(CoreError::invalid_input("postings", "group is empty"));
        }

        let mut state = self.state.write().await;

        // Validate against a scratch copy of the affected accounts.
        let mut scratch: HashMap<UserId, AccountState> = HashMap::new();
        for posting in &postings {
            if posting.amount.is_zero() {
                return Err(CoreError::invalid_amount("amount must be non-zero"));
            }
            if let Some(reference) = &posting.reference {
                // Within-group repeats are fine (an escrow hold is a pair);
                // a prior committed group with the same key is not.
                if state.settled.contains(&(reference.clone(), posting.kind)) {
                    return Err(CoreError::DuplicateReference {
                        reference: reference.clone(),
                    });
                }
            }

            let account = scratch.entry(posting.user.clone()).or_insert_with(|| {
                state
                    .accounts
                    .get(&posting.user)
                    .cloned()
                    .unwrap_or_default()
            });
            let balance = account.bucket(posting.bucket);
            let after = balance + posting.amount;
            if after < Decimal::ZERO {
                return Err(CoreError::InsufficientBalance {
                    user_id: posting.user.clone(),
                    requested: -posting.amount,
                    available: balance,
                });
            }
            *account.bucket_mut(posting.bucket) = after;
        }

        // Commit: apply for real and write the entries.
        let now = chrono::Utc::now();
        let mut written = Vec::with_capacity(postings.len());
        for posting in postings {
            let account = state.accounts.entry(posting.user.clone()).or_default();
            let after = account.bucket(posting.bucket) + posting.amount;
            *account.bucket_mut(posting.bucket) = after;
            account.entry_count += 1;

            let entry = LedgerEntry {
                id: EntryId::new(),
                user: posting.user,
                amount: posting.amount,
                bucket: posting.bucket,
                kind: posting.kind,
                reference: posting.reference.clone(),
                description: posting.description,
                balance_after: after,
                created_at: now,
            };

            if let Some(reference) = &posting.reference {
                state
                    .settled
                    .insert((reference.clone(), posting.kind));
                state
                    .reference_index
                    .entry(reference.clone())
                    .or_default()
                    .push(entry.id.clone());
            }

            state.entries.push(entry.clone());
            written.push(entry);
        }

        Ok(written)
    }

    /// All entries for an account, in commit order
    pub async fn account_entries(&self, user: &UserId) -> Vec<LedgerEntry> {
        let state = self.state.read().await;
        state
            .entries
            .iter()
            .filter(|e| &e.user == user)
            .cloned()
            .collect()
    }

    /// Entries committed under a settlement reference
    pub async fn entries_by_reference(&self, reference: &str) -> Vec<LedgerEntry> {
        let state = self.state.read().await;
        match state.reference_index.get(reference) {
            Some(ids) => state
                .entries
                .iter()
                .filter(|e| ids.contains(&e.id))
                .cloned()
                .collect(),
            None => vec![],
        }
    }

    /// Whether any entry of `kind` was committed under `reference`
    pub async fn has_reference(&self, reference: &str, kind: LedgerEntryKind) -> bool {
        let state = self.state.read().await;
        state.settled.contains(&(reference.to_string(), kind))
    }

    /// Total number of committed entries
    pub async fn entry_count(&self) -> usize {
        self.state.read().await.entries.len()
    }

    /// Most recent entries, newest first
    pub async fn recent_entries(&self, limit: usize) -> Vec<LedgerEntry> {
        let state = self.state.read().await;
        state.entries.iter().rev().take(limit).cloned().collect()
    }

    /// All accounts that have ever been posted to
    pub async fn accounts(&self) -> Vec<UserId> {
        self.state.read().await.accounts.keys().cloned().collect()
    }

    /// Recompute an account's balances from the entry log and compare with
    /// the cached view. Returns the recomputed view on success.
    pub async fn reconcile(&self, user: &UserId) -> Result<BalanceView> {
        let state = self.state.read().await;
        let mut recomputed = BalanceView::default();
        for entry in state.entries.iter().filter(|e| &e.user == user) {
            match entry.bucket {
                BalanceBucket::Available => recomputed.available += entry.amount,
                BalanceBucket::Escrow => recomputed.escrow_held += entry.amount,
            }
        }
        let cached = state
            .accounts
            .get(user)
            .map(AccountState::view)
            .unwrap_or_default();
        if cached != recomputed {
            return Err(CoreError::internal(format!(
                "ledger drift for {user}: cached {cached:?} != recomputed {recomputed:?}"
            )));
        }
        Ok(recomputed)
    }
}
