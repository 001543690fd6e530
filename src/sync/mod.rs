//! Ledger history synchronization.
//!
//! Walks the signature index of an account page by page, resolves every
//! signature to its transaction detail with bounded retry, and projects the
//! details into [`Transaction`] records in the ledger's newest-first order.

pub mod retry;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt, TryStreamExt};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::chain::{LedgerClient, SignatureInfo, TransactionDetail};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::models::*;

pub use retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Signatures requested per index page
    pub page_size: usize,
    /// Detail fetches allowed in flight at once
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// Conversion rate used for `amountUSD`
    pub usd_per_sol: Decimal,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            concurrency: 8,
            retry: RetryPolicy::default(),
            usd_per_sol: Decimal::ZERO,
        }
    }
}

pub struct SyncEngine {
    config: SyncConfig,
    client: Arc<dyn LedgerClient>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, client: Arc<dyn LedgerClient>) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Full transaction history of `account`, newest first.
    ///
    /// All or nothing: if any signature cannot be resolved within the retry
    /// budget the whole call fails and no partial set is returned.
    #[instrument(skip_all, fields(account = %account))]
    pub async fn sync_ledger_history(
        &self,
        account: &AccountRef,
        cancel: &CancelToken,
    ) -> LedgerResult<Vec<Transaction>> {
        info!("🔄 Syncing ledger history for {}", account);

        let signatures = self.fetch_all_signatures(account, cancel).await?;
        info!("Found {} signatures for {}", signatures.len(), account);

        let transactions: Vec<Transaction> = stream::iter(signatures)
            .map(|info| self.resolve(info, cancel))
            .buffered(self.config.concurrency.max(1))
            .try_collect()
            .await?;

        info!("✅ Synced {} transactions for {}", transactions.len(), account);
        Ok(transactions)
    }

    /// Walk the signature index until a short or empty page.
    pub async fn fetch_all_signatures(
        &self,
        account: &AccountRef,
        cancel: &CancelToken,
    ) -> LedgerResult<Vec<SignatureInfo>> {
        let limit = self.config.page_size.max(1);
        let mut all: Vec<SignatureInfo> = Vec::new();
        let mut seen: HashSet<SignatureRef> = HashSet::new();
        let mut before: Option<SignatureRef> = None;

        loop {
            let page = cancel
                .run(self.client.signatures_for_address(account, before.as_ref(), limit))
                .await?;

            let fetched = page.len();
            debug!("Fetched signature page of {} (before {:?})", fetched, before);

            let Some(last) = page.last() else {
                break;
            };
            before = Some(last.signature.clone());

            let mut fresh = 0;
            for info in page {
                if seen.insert(info.signature.clone()) {
                    all.push(info);
                    fresh += 1;
                } else {
                    warn!("Dropping duplicate signature {} across pages", info.signature);
                }
            }

            if fetched < limit {
                break;
            }
            if fresh == 0 {
                warn!("Full page with no new signatures; stopping pagination");
                break;
            }
        }

        Ok(all)
    }

    async fn resolve(&self, info: SignatureInfo, cancel: &CancelToken) -> LedgerResult<Transaction> {
        let signature = &info.signature;
        let client = &self.client;
        let detail = self
            .config
            .retry
            .run(signature.as_str(), cancel, || async move {
                client
                    .transaction_detail(signature)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound(signature.to_string()))
            })
            .await?;

        project(&detail, &info, self.config.usd_per_sol).map_err(|reason| {
            LedgerError::PermanentResolution {
                target: signature.to_string(),
                attempts: 1,
                reason,
            }
        })
    }
}

/// Map a resolved detail into a synced record.
///
/// The amount is the absolute balance change of the fee payer (account 0),
/// converted from lamports to SOL. Status is always `completed`.
pub fn project(
    detail: &TransactionDetail,
    info: &SignatureInfo,
    usd_per_sol: Decimal,
) -> Result<Transaction, String> {
    let payer = detail
        .account_keys
        .first()
        .ok_or_else(|| "transaction has no account keys".to_string())?;
    let sender = AccountRef::parse(payer).map_err(|e| e.to_string())?;

    let (pre, post) = match (detail.pre_balances.first(), detail.post_balances.first()) {
        (Some(pre), Some(post)) => (*pre, *post),
        _ => return Err("transaction meta has no balances".to_string()),
    };
    let delta = (post as i128 - pre as i128).unsigned_abs();
    let amount = Decimal::from_i128_with_scale(delta as i128, SOL_DECIMALS);

    let block_time = detail
        .block_time
        .or(info.block_time)
        .ok_or_else(|| "no block time reported".to_string())?;
    let timestamp: DateTime<Utc> = DateTime::from_timestamp(block_time, 0)
        .ok_or_else(|| format!("block time out of range: {}", block_time))?;

    Ok(Transaction {
        id: detail.signature.clone(),
        sender,
        amount,
        amount_usd: (amount * usd_per_sol).round_dp(2),
        status: TransactionStatus::Completed,
        timestamp,
    })
}
