use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::str::FromStr;

use crate::error::{ErrorKind, LedgerError, LedgerResult};

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Decimal places between lamports and SOL
pub const SOL_DECIMALS: u32 = 9;

/// A ledger account, held as its public key and rendered in base58.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountRef(Pubkey);

impl AccountRef {
    pub fn parse(address: &str) -> LedgerResult<Self> {
        Pubkey::from_str(address.trim())
            .map(AccountRef)
            .map_err(|_| LedgerError::InvalidAccount(address.to_string()))
    }

    pub fn pubkey(&self) -> &Pubkey {
        &self.0
    }
}

impl From<Pubkey> for AccountRef {
    fn from(pubkey: Pubkey) -> Self {
        AccountRef(pubkey)
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for AccountRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for AccountRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        AccountRef::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Base58 signature identifying one ledger entry. Doubles as the
/// pagination cursor for the signature index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignatureRef(String);

impl SignatureRef {
    pub fn new(signature: impl Into<String>) -> Self {
        SignatureRef(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SignatureRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Refunded,
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Refunded => "refunded",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A synced merchant payment as shown in the transaction table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: SignatureRef,
    pub sender: AccountRef,
    /// Always non-negative, in SOL
    pub amount: Decimal,
    #[serde(rename = "amountUSD")]
    pub amount_usd: Decimal,
    pub status: TransactionStatus,
    pub timestamp: DateTime<Utc>,
}

impl Transaction {
    /// Copy of this record marked as refunded.
    pub fn refunded(&self) -> Transaction {
        Transaction {
            status: TransactionStatus::Refunded,
            ..self.clone()
        }
    }

    /// Amount in lamports, truncating anything below one lamport.
    pub fn amount_lamports(&self) -> LedgerResult<u64> {
        sol_to_lamports(self.amount)
    }
}

/// Operator request to reverse a synced payment.
#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub original_txn: Transaction,
    pub payer_covers_fee: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub logs: Vec<String>,
}

impl From<&LedgerError> for RefundFailure {
    fn from(error: &LedgerError) -> Self {
        RefundFailure {
            kind: error.kind(),
            message: error.to_string(),
            logs: error.logs().to_vec(),
        }
    }
}

/// Outcome of one settlement attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResult {
    pub request_id: String,
    pub original_transaction: SignatureRef,
    pub recipient: AccountRef,
    pub amount: Decimal,
    pub payer_covers_fee: bool,
    pub signature: Option<SignatureRef>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub notice: String,
    pub error: Option<RefundFailure>,
}

impl RefundResult {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some() && self.error.is_none()
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from_i128_with_scale(lamports as i128, SOL_DECIMALS)
}

pub fn sol_to_lamports(amount: Decimal) -> LedgerResult<u64> {
    use rust_decimal::prelude::ToPrimitive;

    if amount.is_sign_negative() {
        return Err(LedgerError::InvalidRefund(format!(
            "amount must not be negative: {}",
            amount
        )));
    }
    (amount * Decimal::from(LAMPORTS_PER_SOL))
        .trunc()
        .to_u64()
        .ok_or_else(|| LedgerError::InvalidRefund(format!("amount out of range: {}", amount)))
}
