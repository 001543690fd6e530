use super::models::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Snapshot of the last completed sync
#[derive(Debug, Clone)]
pub struct SyncedSet {
    pub account: AccountRef,
    pub synced_at: DateTime<Utc>,
    pub transactions: Arc<Vec<Transaction>>,
}

/// In-memory holder of the most recent sync result.
///
/// Snapshots are handed out behind an `Arc` and never mutated; a status
/// change swaps in a new vector so a reader holding the previous snapshot
/// is unaffected.
#[derive(Default)]
pub struct TransactionRepository {
    current: RwLock<Option<SyncedSet>>,
}

impl TransactionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set with a fresh sync result.
    pub async fn replace_all(&self, account: AccountRef, transactions: Vec<Transaction>) -> SyncedSet {
        let set = SyncedSet {
            account,
            synced_at: Utc::now(),
            transactions: Arc::new(transactions),
        };

        let mut current = self.current.write().await;
        info!(
            "💾 Stored {} transactions for {}",
            set.transactions.len(),
            set.account
        );
        *current = Some(set.clone());
        set
    }

    pub async fn snapshot(&self) -> Option<SyncedSet> {
        self.current.read().await.clone()
    }

    pub async fn get(&self, id: &SignatureRef) -> Option<Transaction> {
        let current = self.current.read().await;
        current
            .as_ref()
            .and_then(|set| set.transactions.iter().find(|t| &t.id == id).cloned())
    }

    /// Swap the record for `id` with its refunded copy.
    ///
    /// Returns `None` when the id is not part of the current set, which
    /// happens when a re-sync for another account landed in between.
    pub async fn mark_refunded(&self, id: &SignatureRef) -> Option<Transaction> {
        let mut current = self.current.write().await;
        let set = current.as_mut()?;

        let position = set.transactions.iter().position(|t| &t.id == id)?;
        let mut next: Vec<Transaction> = set.transactions.as_ref().clone();
        next[position] = next[position].refunded();
        let updated = next[position].clone();
        set.transactions = Arc::new(next);

        debug!("Marked {} as refunded", id);
        Some(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn txn(id: &str) -> Transaction {
        Transaction {
            id: SignatureRef::new(id),
            sender: AccountRef::parse("GA26NywR5aAvs6HswujnfQusBDUSmW6U7rGdrD9GEEM").unwrap(),
            amount: dec!(1),
            amount_usd: dec!(0),
            status: TransactionStatus::Completed,
            timestamp: Utc::now(),
        }
    }

    fn account() -> AccountRef {
        AccountRef::parse("11111111111111111111111111111111").unwrap()
    }

    #[tokio::test]
    async fn test_replace_all_drops_previous_set() {
        let repo = TransactionRepository::new();
        repo.replace_all(account(), vec![txn("a"), txn("b")]).await;
        repo.replace_all(account(), vec![txn("c")]).await;

        let snapshot = repo.snapshot().await.unwrap();
        assert_eq!(snapshot.transactions.len(), 1);
        assert!(repo.get(&SignatureRef::new("a")).await.is_none());
        assert!(repo.get(&SignatureRef::new("c")).await.is_some());
    }

    #[tokio::test]
    async fn test_mark_refunded_replaces_without_touching_old_snapshot() {
        let repo = TransactionRepository::new();
        repo.replace_all(account(), vec![txn("a"), txn("b")]).await;
        let before = repo.snapshot().await.unwrap();

        let updated = repo.mark_refunded(&SignatureRef::new("b")).await.unwrap();
        assert_eq!(updated.status, TransactionStatus::Refunded);

        assert_eq!(before.transactions[1].status, TransactionStatus::Completed);
        let after = repo.snapshot().await.unwrap();
        assert_eq!(after.transactions[0].status, TransactionStatus::Completed);
        assert_eq!(after.transactions[1].status, TransactionStatus::Refunded);
    }

    #[tokio::test]
    async fn test_mark_refunded_unknown_id() {
        let repo = TransactionRepository::new();
        assert!(repo.mark_refunded(&SignatureRef::new("x")).await.is_none());
        repo.replace_all(account(), vec![txn("a")]).await;
        assert!(repo.mark_refunded(&SignatureRef::new("x")).await.is_none());
    }
}
