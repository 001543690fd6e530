use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::ledger::models::{RefundResult, SignatureRef};

/// Deterministic key for refunds of one original transaction.
pub fn request_id(original: &SignatureRef) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"refund:");
    hasher.update(original.as_str().as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefundEntry {
    /// A settlement is running for this key
    InFlight,
    /// Submitted, outcome unknown
    Unresolved {
        signature: SignatureRef,
        last_valid_block_height: u64,
    },
    /// One caller is re-checking an unresolved submission
    Rechecking {
        signature: SignatureRef,
        last_valid_block_height: u64,
    },
    /// Confirmed; repeats return this result
    Settled(RefundResult),
}

/// What a caller may do after trying to claim a key.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The key is now `InFlight` and belongs to the caller
    Acquired,
    Busy,
    Settled(RefundResult),
    /// The key is now `Rechecking` and belongs to the caller; the earlier
    /// submission must be checked before anything new is sent
    Unresolved {
        signature: SignatureRef,
        last_valid_block_height: u64,
    },
}

/// In-memory table guarding against double refunds.
#[derive(Default)]
pub struct RefundTable {
    entries: Mutex<HashMap<String, RefundEntry>>,
}

impl RefundTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, id: &str) -> Claim {
        let mut entries = self.entries.lock();
        match entries.get(id).cloned() {
            None => {
                entries.insert(id.to_string(), RefundEntry::InFlight);
                Claim::Acquired
            }
            Some(RefundEntry::InFlight | RefundEntry::Rechecking { .. }) => Claim::Busy,
            Some(RefundEntry::Settled(result)) => Claim::Settled(result),
            Some(RefundEntry::Unresolved {
                signature,
                last_valid_block_height,
            }) => {
                entries.insert(
                    id.to_string(),
                    RefundEntry::Rechecking {
                        signature: signature.clone(),
                        last_valid_block_height,
                    },
                );
                Claim::Unresolved {
                    signature,
                    last_valid_block_height,
                }
            }
        }
    }

    /// Turn a held recheck into a fresh settlement once the earlier
    /// transaction can no longer land. Returns false if the caller does not
    /// hold the recheck.
    pub fn reclaim(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        if !matches!(entries.get(id), Some(RefundEntry::Rechecking { .. })) {
            return false;
        }
        entries.insert(id.to_string(), RefundEntry::InFlight);
        true
    }

    /// Give up a held recheck, leaving the submission unresolved.
    pub fn restore(&self, id: &str) {
        let mut entries = self.entries.lock();
        if let Some(RefundEntry::Rechecking {
            signature,
            last_valid_block_height,
        }) = entries.get(id).cloned()
        {
            entries.insert(
                id.to_string(),
                RefundEntry::Unresolved {
                    signature,
                    last_valid_block_height,
                },
            );
        }
    }

    pub fn settle(&self, id: &str, result: RefundResult) {
        self.entries
            .lock()
            .insert(id.to_string(), RefundEntry::Settled(result));
    }

    pub fn mark_unresolved(&self, id: &str, signature: SignatureRef, last_valid_block_height: u64) {
        self.entries.lock().insert(
            id.to_string(),
            RefundEntry::Unresolved {
                signature,
                last_valid_block_height,
            },
        );
    }

    /// Forget the key; nothing reached the ledger.
    pub fn release(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    pub fn get(&self, id: &str) -> Option<RefundEntry> {
        self.entries.lock().get(id).cloned()
    }
}
