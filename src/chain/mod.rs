pub mod client;
pub mod solana;

#[cfg(test)]
pub mod mock;

pub use client::{Anchor, Commitment, LedgerClient, SignatureInfo, SignatureStatus, TransactionDetail};
pub use solana::{SolanaRpcClient, SolanaRpcConfig};
