use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ledger::models::AccountRef;

// ========== REQUEST MODELS ==========

/// Body of `POST /api/refund`
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefundBody {
    /// Signature of the synced transaction to reverse
    #[validate(length(min = 1, max = 128, message = "must be a transaction signature"))]
    pub transaction_id: String,

    #[serde(default)]
    pub payer_covers_fee: bool,
}

// ========== RESPONSE MODELS ==========

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub settlement_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_account: Option<AccountRef>,
    pub synced_transactions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CustodianBalanceResponse {
    pub account: AccountRef,
    pub lamports: u64,
    pub sol: Decimal,
}
