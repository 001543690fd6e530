use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::{hash::Hash, transaction::Transaction as SignedTransaction};
use std::fmt;
use std::str::FromStr;

use crate::error::LedgerResult;
use crate::ledger::models::{AccountRef, SignatureRef};

/// One entry of the signature index, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureInfo {
    pub signature: SignatureRef,
    pub slot: u64,
    pub block_time: Option<i64>,
    /// The ledger recorded an execution error for this entry
    pub failed: bool,
}

/// The parts of a confirmed transaction the sync engine projects from.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDetail {
    pub signature: SignatureRef,
    pub slot: u64,
    pub block_time: Option<i64>,
    /// Static account keys; index 0 is the fee payer
    pub account_keys: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub fee: u64,
}

/// Recent blockhash a new transaction must be built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Anchor {
    pub blockhash: Hash,
    /// Past this block height the transaction can no longer land
    pub last_valid_block_height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Commitment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Ok(Commitment::Processed),
            "confirmed" => Ok(Commitment::Confirmed),
            "finalized" => Ok(Commitment::Finalized),
            other => Err(format!("unknown commitment level: {}", other)),
        }
    }
}

/// Status of a submitted signature as reported by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureStatus {
    pub slot: u64,
    pub commitment: Option<Commitment>,
    /// Set when the transaction landed but its program failed
    pub err: Option<String>,
}

impl SignatureStatus {
    pub fn reached(&self, target: Commitment) -> bool {
        self.commitment.map(|c| c >= target).unwrap_or(false)
    }
}

/// Remote ledger operations used by the sync and settlement engines.
///
/// Implementations are shared across concurrent detail fetches and must be
/// safe to call from many tasks at once.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Page of the signature index for `account`, newest first, strictly
    /// older than `before` when given.
    async fn signatures_for_address(
        &self,
        account: &AccountRef,
        before: Option<&SignatureRef>,
        limit: usize,
    ) -> LedgerResult<Vec<SignatureInfo>>;

    /// Full detail for a signature, `None` while the ledger does not know it yet.
    async fn transaction_detail(
        &self,
        signature: &SignatureRef,
    ) -> LedgerResult<Option<TransactionDetail>>;

    /// Balance in lamports
    async fn balance(&self, account: &AccountRef) -> LedgerResult<u64>;

    async fn latest_anchor(&self) -> LedgerResult<Anchor>;

    async fn submit(&self, transaction: &SignedTransaction) -> LedgerResult<SignatureRef>;

    async fn signature_status(
        &self,
        signature: &SignatureRef,
    ) -> LedgerResult<Option<SignatureStatus>>;

    async fn block_height(&self) -> LedgerResult<u64>;
}
