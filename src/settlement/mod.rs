//! Refund settlement: reversing transfer from the custodial account.

pub mod idempotency;
pub mod signer;

use chrono::{DateTime, Utc};
use solana_sdk::{
    hash::Hash, message::Message, pubkey::Pubkey, transaction::Transaction as SignedTransaction,
};
use solana_system_interface::instruction as system_instruction;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, instrument, warn};

use crate::cancel::CancelToken;
use crate::chain::{Anchor, Commitment, LedgerClient};
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::models::*;

pub use idempotency::{request_id, Claim, RefundEntry, RefundTable};
pub use signer::{LocalKeySigner, RefundSigner};

#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Commitment level at which a refund counts as confirmed
    pub commitment: Commitment,
    pub poll_interval: Duration,
    pub confirmation_timeout: Duration,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            commitment: Commitment::Processed,
            poll_interval: Duration::from_millis(500),
            confirmation_timeout: Duration::from_secs(60),
        }
    }
}

/// How far a settlement got before it stopped.
enum Outcome {
    Confirmed {
        signature: SignatureRef,
        at: DateTime<Utc>,
    },
    /// Nothing reached the ledger
    NotSubmitted(LedgerError),
    /// A signed transaction left the process; `anchor` bounds when it can land
    Submitted {
        signature: SignatureRef,
        anchor: Anchor,
        error: LedgerError,
    },
}

/// Result of re-checking a submission whose outcome was unknown.
enum Recheck {
    Landed(DateTime<Utc>),
    LandedWithError(LedgerError),
    Expired,
    Pending,
}

pub struct SettlementEngine {
    config: SettlementConfig,
    client: Arc<dyn LedgerClient>,
    signer: Arc<dyn RefundSigner>,
    refunds: RefundTable,
}

impl SettlementEngine {
    pub fn new(
        config: SettlementConfig,
        client: Arc<dyn LedgerClient>,
        signer: Arc<dyn RefundSigner>,
    ) -> Self {
        Self {
            config,
            client,
            signer,
            refunds: RefundTable::new(),
        }
    }

    pub fn custodial_account(&self) -> AccountRef {
        AccountRef::from(self.signer.pubkey())
    }

    /// Custodial balance in lamports
    pub async fn custodial_balance(&self) -> LedgerResult<u64> {
        self.client.balance(&self.custodial_account()).await
    }

    pub fn refund_entry(&self, original: &SignatureRef) -> Option<RefundEntry> {
        self.refunds.get(&request_id(original))
    }

    /// Refund `request.original_txn` from the custodial account.
    ///
    /// Never resubmits on its own. A repeat call for the same transaction
    /// returns the settled result, is refused while another call is running,
    /// or re-checks the earlier submission when its outcome was unknown.
    #[instrument(skip_all, fields(txn = %request.original_txn.id, payer_covers_fee = request.payer_covers_fee))]
    pub async fn settle_refund(&self, request: RefundRequest, cancel: &CancelToken) -> RefundResult {
        let original = &request.original_txn;
        let id = request_id(&original.id);
        let result = RefundResult {
            request_id: id.clone(),
            original_transaction: original.id.clone(),
            recipient: original.sender,
            amount: original.amount,
            payer_covers_fee: request.payer_covers_fee,
            signature: None,
            confirmed_at: None,
            notice: String::new(),
            error: None,
        };

        let lamports = match self.validate(&request) {
            Ok(lamports) => lamports,
            Err(e) => return failed(result, None, e),
        };

        match self.refunds.claim(&id) {
            Claim::Acquired => {}
            Claim::Busy => {
                return failed(result, None, LedgerError::DuplicateRefund(original.id.to_string()))
            }
            Claim::Settled(previous) => {
                info!("Refund for {} already settled; returning stored result", original.id);
                return previous;
            }
            Claim::Unresolved {
                signature,
                last_valid_block_height,
            } => match self.recheck(&signature, last_valid_block_height, cancel).await {
                Ok(Recheck::Landed(at)) => {
                    let done = confirmed(result, signature, at);
                    self.refunds.settle(&id, done.clone());
                    return done;
                }
                Ok(Recheck::LandedWithError(e)) => {
                    self.refunds.release(&id);
                    return failed(result, Some(signature), e);
                }
                Ok(Recheck::Expired) => {
                    if !self.refunds.reclaim(&id) {
                        let e = LedgerError::DuplicateRefund(original.id.to_string());
                        return failed(result, None, e);
                    }
                    info!("Earlier refund {} expired without landing; settling again", signature);
                }
                Ok(Recheck::Pending) => {
                    self.refunds.restore(&id);
                    let e = LedgerError::ConfirmationTimeout {
                        signature: signature.to_string(),
                    };
                    return failed(result, Some(signature), e);
                }
                Err(e) => {
                    self.refunds.restore(&id);
                    return failed(result, Some(signature), e);
                }
            },
        }

        match self.execute(&request, lamports, cancel).await {
            Outcome::Confirmed { signature, at } => {
                info!("✅ Refund confirmed: {}", signature);
                let done = confirmed(result, signature, at);
                self.refunds.settle(&id, done.clone());
                done
            }
            Outcome::NotSubmitted(e) => {
                error!("Refund for {} failed before landing: {}", original.id, e);
                self.refunds.release(&id);
                failed(result, None, e)
            }
            Outcome::Submitted {
                signature,
                anchor,
                error,
            } => {
                match &error {
                    LedgerError::SubmissionRejected { .. } | LedgerError::AnchorExpired => {
                        self.refunds.release(&id)
                    }
                    _ => self.refunds.mark_unresolved(
                        &id,
                        signature.clone(),
                        anchor.last_valid_block_height,
                    ),
                }
                warn!("Refund {} did not confirm: {}", signature, error);
                failed(result, Some(signature), error)
            }
        }
    }

    fn validate(&self, request: &RefundRequest) -> LedgerResult<u64> {
        let original = &request.original_txn;
        match original.status {
            TransactionStatus::Completed => {}
            TransactionStatus::Refunded => {
                return Err(LedgerError::AlreadyRefunded(original.id.to_string()))
            }
            status => {
                return Err(LedgerError::InvalidRefund(format!(
                    "transaction {} is {}, only completed transactions can be refunded",
                    original.id, status
                )))
            }
        }

        if original.sender == self.custodial_account() {
            return Err(LedgerError::InvalidRefund(
                "sender is the custodial account".to_string(),
            ));
        }

        let lamports = original.amount_lamports()?;
        if lamports == 0 {
            return Err(LedgerError::InvalidRefund(format!(
                "amount {} is below one lamport",
                original.amount
            )));
        }
        Ok(lamports)
    }

    async fn execute(&self, request: &RefundRequest, lamports: u64, cancel: &CancelToken) -> Outcome {
        let custodial = self.signer.pubkey();
        let recipient = *request.original_txn.sender.pubkey();

        let available = match cancel.run(self.client.balance(&AccountRef::from(custodial))).await {
            Ok(balance) => balance,
            Err(e) => return Outcome::NotSubmitted(e),
        };
        if available < lamports {
            return Outcome::NotSubmitted(LedgerError::InsufficientFunds {
                required: lamports,
                available,
            });
        }

        // Anchors expire; fetch right before building.
        let anchor = match cancel.run(self.client.latest_anchor()).await {
            Ok(anchor) => anchor,
            Err(e) => return Outcome::NotSubmitted(e),
        };

        let message = build_refund_message(&custodial, &recipient, lamports, anchor.blockhash);
        let signature = match cancel.run(self.signer.sign(&message.serialize())).await {
            Ok(signature) => signature,
            Err(e) => return Outcome::NotSubmitted(e),
        };
        let local_signature = SignatureRef::new(signature.to_string());
        let transaction = SignedTransaction {
            signatures: vec![signature],
            message,
        };

        info!(
            "📤 Submitting refund of {} lamports {} -> {} ({})",
            lamports, custodial, recipient, local_signature
        );

        let signature = match cancel.run(self.client.submit(&transaction)).await {
            Ok(signature) => signature,
            // The request may have reached the node.
            Err(e @ (LedgerError::TransientNetwork(_) | LedgerError::Cancelled)) => {
                return Outcome::Submitted {
                    signature: local_signature,
                    anchor,
                    error: e,
                }
            }
            Err(e) => return Outcome::NotSubmitted(e),
        };

        match self.await_confirmation(&signature, &anchor, cancel).await {
            Ok(at) => Outcome::Confirmed { signature, at },
            Err(error) => Outcome::Submitted {
                signature,
                anchor,
                error,
            },
        }
    }

    /// Poll at a fixed interval until the target commitment, the anchor
    /// expiring, an on-chain failure, or the timeout.
    async fn await_confirmation(
        &self,
        signature: &SignatureRef,
        anchor: &Anchor,
        cancel: &CancelToken,
    ) -> LedgerResult<DateTime<Utc>> {
        let deadline = Instant::now() + self.config.confirmation_timeout;

        loop {
            match self.poll_once(signature, anchor.last_valid_block_height, cancel).await {
                Ok(Recheck::Landed(at)) => return Ok(at),
                Ok(Recheck::LandedWithError(e)) => return Err(e),
                Ok(Recheck::Expired) => return Err(LedgerError::AnchorExpired),
                Ok(Recheck::Pending) => {}
                Err(LedgerError::Cancelled) => return Err(LedgerError::Cancelled),
                Err(e) => warn!("Confirmation poll for {} failed: {}", signature, e),
            }

            if Instant::now() >= deadline {
                return Err(LedgerError::ConfirmationTimeout {
                    signature: signature.to_string(),
                });
            }
            cancel.sleep(self.config.poll_interval).await?;
        }
    }

    async fn recheck(
        &self,
        signature: &SignatureRef,
        last_valid_block_height: u64,
        cancel: &CancelToken,
    ) -> LedgerResult<Recheck> {
        info!("Re-checking earlier refund submission {}", signature);
        self.poll_once(signature, last_valid_block_height, cancel).await
    }

    async fn poll_once(
        &self,
        signature: &SignatureRef,
        last_valid_block_height: u64,
        cancel: &CancelToken,
    ) -> LedgerResult<Recheck> {
        if let Some(status) = cancel.run(self.client.signature_status(signature)).await? {
            if let Some(err) = status.err {
                return Ok(Recheck::LandedWithError(LedgerError::SubmissionRejected {
                    message: format!("refund transaction failed on-chain: {}", err),
                    logs: Vec::new(),
                }));
            }
            if status.reached(self.config.commitment) {
                return Ok(Recheck::Landed(Utc::now()));
            }
            return Ok(Recheck::Pending);
        }

        let height = cancel.run(self.client.block_height()).await?;
        if height > last_valid_block_height {
            Ok(Recheck::Expired)
        } else {
            Ok(Recheck::Pending)
        }
    }
}

/// Single System Program transfer `from -> to`, paid by `from`.
pub fn build_refund_message(from: &Pubkey, to: &Pubkey, lamports: u64, blockhash: Hash) -> Message {
    let transfer = system_instruction::transfer(from, to, lamports);
    let mut message = Message::new(&[transfer], Some(from));
    message.recent_blockhash = blockhash;
    message
}

fn confirmed(mut result: RefundResult, signature: SignatureRef, at: DateTime<Utc>) -> RefundResult {
    result.notice = format!(
        "Transaction {} has been refunded.{}",
        result.original_transaction,
        if result.payer_covers_fee {
            " Gas fees passed to the user."
        } else {
            ""
        }
    );
    result.signature = Some(signature);
    result.confirmed_at = Some(at);
    result
}

fn failed(mut result: RefundResult, signature: Option<SignatureRef>, error: LedgerError) -> RefundResult {
    result.notice = match &error {
        LedgerError::ConfirmationTimeout { .. } => format!(
            "Refund for transaction {} was submitted but is not confirmed yet; its outcome is unknown.",
            result.original_transaction
        ),
        _ => format!(
            "Refund for transaction {} failed: {}",
            result.original_transaction, error
        ),
    };
    result.signature = signature;
    result.confirmed_at = None;
    result.error = Some(RefundFailure::from(&error));
    result
}
