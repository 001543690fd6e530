//! In-memory ledger used by the engine tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use solana_sdk::{hash::Hash, pubkey::Pubkey, transaction::Transaction as SignedTransaction};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use super::client::*;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::models::{AccountRef, SignatureRef};

#[derive(Default)]
pub struct MockLedger {
    /// Newest first
    index: Mutex<Vec<SignatureInfo>>,
    details: Mutex<HashMap<SignatureRef, TransactionDetail>>,
    /// Remaining transient failures per signature
    failures: Mutex<HashMap<SignatureRef, u32>>,
    detail_attempts: Mutex<HashMap<SignatureRef, Vec<Instant>>>,
    detail_latency: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    page_calls: Mutex<Vec<(Option<SignatureRef>, usize)>>,

    balance: Mutex<u64>,
    anchor_calls: AtomicUsize,
    submit_error: Mutex<Option<LedgerError>>,
    submitted: Mutex<Vec<SignedTransaction>>,
    statuses: Mutex<VecDeque<Option<SignatureStatus>>>,
    block_height: Mutex<u64>,
}

pub fn pubkey(seed: u8) -> Pubkey {
    Pubkey::new_from_array([seed; 32])
}

pub fn signature(n: usize) -> SignatureRef {
    SignatureRef::new(format!("sig-{:06}", n))
}

impl MockLedger {
    pub fn new() -> Self {
        Self {
            balance: Mutex::new(10_000_000_000),
            ..Default::default()
        }
    }

    /// Ledger with `count` transfers into the merchant, newest first. Entry
    /// `n` moved `(n + 1) * 1000` lamports from the payer seeded `n % 200 + 1`.
    pub fn with_history(count: usize) -> Self {
        let ledger = Self::new();
        for n in 0..count {
            let sig = signature(n);
            let payer = pubkey((n % 200) as u8 + 1);
            let moved = (n as u64 + 1) * 1000;
            ledger.push(
                SignatureInfo {
                    signature: sig.clone(),
                    slot: (count - n) as u64,
                    block_time: Some(1_700_000_000 - n as i64),
                    failed: false,
                },
                Some(TransactionDetail {
                    signature: sig,
                    slot: (count - n) as u64,
                    block_time: Some(1_700_000_000 - n as i64),
                    account_keys: vec![payer.to_string(), pubkey(250).to_string()],
                    pre_balances: vec![5_000_000_000, 0],
                    post_balances: vec![5_000_000_000 - moved - 5000, moved],
                    fee: 5000,
                }),
            );
        }
        ledger
    }

    pub fn push(&self, info: SignatureInfo, detail: Option<TransactionDetail>) {
        if let Some(detail) = detail {
            self.details.lock().insert(info.signature.clone(), detail);
        }
        self.index.lock().push(info);
    }

    pub fn fail_detail(&self, sig: &SignatureRef, times: u32) {
        self.failures.lock().insert(sig.clone(), times);
    }

    pub fn set_detail_latency(&self, latency: Duration) {
        *self.detail_latency.lock() = Some(latency);
    }

    pub fn detail_attempts(&self, sig: &SignatureRef) -> Vec<Instant> {
        self.detail_attempts.lock().get(sig).cloned().unwrap_or_default()
    }

    pub fn total_detail_attempts(&self) -> usize {
        self.detail_attempts.lock().values().map(Vec::len).sum()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> Vec<(Option<SignatureRef>, usize)> {
        self.page_calls.lock().clone()
    }

    pub fn set_balance(&self, lamports: u64) {
        *self.balance.lock() = lamports;
    }

    pub fn reject_submissions(&self, error: LedgerError) {
        *self.submit_error.lock() = Some(error);
    }

    pub fn submitted(&self) -> Vec<SignedTransaction> {
        self.submitted.lock().clone()
    }

    pub fn anchor_calls(&self) -> usize {
        self.anchor_calls.load(Ordering::SeqCst)
    }

    /// Queue poll answers; the last one repeats once the queue drains.
    pub fn script_statuses(&self, statuses: Vec<Option<SignatureStatus>>) {
        *self.statuses.lock() = statuses.into();
    }

    pub fn set_block_height(&self, height: u64) {
        *self.block_height.lock() = height;
    }

    pub fn processed(slot: u64) -> Option<SignatureStatus> {
        Some(SignatureStatus {
            slot,
            commitment: Some(Commitment::Processed),
            err: None,
        })
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerClient for MockLedger {
    async fn signatures_for_address(
        &self,
        _account: &AccountRef,
        before: Option<&SignatureRef>,
        limit: usize,
    ) -> LedgerResult<Vec<SignatureInfo>> {
        self.page_calls.lock().push((before.cloned(), limit));

        let index = self.index.lock();
        let start = match before {
            Some(cursor) => index
                .iter()
                .position(|s| &s.signature == cursor)
                .map(|p| p + 1)
                .unwrap_or(index.len()),
            None => 0,
        };
        Ok(index.iter().skip(start).take(limit).cloned().collect())
    }

    async fn transaction_detail(
        &self,
        signature: &SignatureRef,
    ) -> LedgerResult<Option<TransactionDetail>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(&self.in_flight);
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.detail_attempts
            .lock()
            .entry(signature.clone())
            .or_default()
            .push(Instant::now());

        let latency = *self.detail_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        {
            let mut failures = self.failures.lock();
            if let Some(remaining) = failures.get_mut(signature) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(LedgerError::TransientNetwork("429 Too Many Requests".into()));
                }
            }
        }

        Ok(self.details.lock().get(signature).cloned())
    }

    async fn balance(&self, _account: &AccountRef) -> LedgerResult<u64> {
        Ok(*self.balance.lock())
    }

    async fn latest_anchor(&self) -> LedgerResult<Anchor> {
        let n = self.anchor_calls.fetch_add(1, Ordering::SeqCst) as u8;
        Ok(Anchor {
            blockhash: Hash::new_from_array([n.wrapping_add(1); 32]),
            last_valid_block_height: *self.block_height.lock() + 150,
        })
    }

    async fn submit(&self, transaction: &SignedTransaction) -> LedgerResult<SignatureRef> {
        if let Some(error) = self.submit_error.lock().clone() {
            return Err(error);
        }
        self.submitted.lock().push(transaction.clone());
        Ok(SignatureRef::new(transaction.signatures[0].to_string()))
    }

    async fn signature_status(
        &self,
        _signature: &SignatureRef,
    ) -> LedgerResult<Option<SignatureStatus>> {
        let mut statuses = self.statuses.lock();
        if statuses.len() > 1 {
            Ok(statuses.pop_front().flatten())
        } else {
            Ok(statuses.front().cloned().flatten())
        }
    }

    async fn block_height(&self) -> LedgerResult<u64> {
        Ok(*self.block_height.lock())
    }
}
