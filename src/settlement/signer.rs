//! Custodial signing for refund transfers.
//!
//! The engine only ever sees a public key and a `sign` call; where the
//! secret lives is up to the implementation.

use anyhow::anyhow;
use async_trait::async_trait;
use solana_sdk::{
    pubkey::Pubkey,
    signature::{read_keypair_file, Keypair, Signature, Signer},
};
use std::path::Path;

use crate::error::{LedgerError, LedgerResult};

/// Signs refund transaction messages on behalf of the custodial account.
#[async_trait]
pub trait RefundSigner: Send + Sync {
    /// The custodial account that pays refunds
    fn pubkey(&self) -> Pubkey;

    /// Sign the serialized transaction message
    async fn sign(&self, message: &[u8]) -> LedgerResult<Signature>;
}

/// Keypair held in process memory.
///
/// Loaded from a Solana CLI keypair file or built from a fixed seed in tests.
pub struct LocalKeySigner {
    keypair: Keypair,
}

impl LocalKeySigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            keypair: Keypair::new_from_array(seed),
        }
    }

    /// 64 bytes: secret then public half
    pub fn from_keypair_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let keypair = Keypair::try_from(bytes).map_err(|e| anyhow!("invalid keypair: {}", e))?;
        Ok(Self { keypair })
    }

    pub fn from_keypair_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let keypair = read_keypair_file(path)
            .map_err(|e| anyhow!("reading keypair file {}: {}", path.display(), e))?;
        Ok(Self { keypair })
    }
}

#[async_trait]
impl RefundSigner for LocalKeySigner {
    fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign(&self, message: &[u8]) -> LedgerResult<Signature> {
        self.keypair
            .try_sign_message(message)
            .map_err(|e| LedgerError::Signer(e.to_string()))
    }
}
