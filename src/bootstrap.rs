use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    api::handler::AppState,
    cancel::CancelToken,
    chain::SolanaRpcClient,
    config::Config,
    error::AppResult,
    ledger::{models::AccountRef, TransactionRepository},
    settlement::{LocalKeySigner, SettlementEngine},
    sync::SyncEngine,
};

pub async fn initialize_app_state(config: &Config, shutdown: CancelToken) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let client = Arc::new(SolanaRpcClient::new(config.rpc()));
    info!(
        "✅ Solana RPC client ready: {} ({} req/s)",
        config.solana_rpc_url, config.rpc_requests_per_second
    );

    let sync_engine = Arc::new(SyncEngine::new(config.sync(), client.clone()));
    let repository = Arc::new(TransactionRepository::new());

    let merchant_account = match &config.merchant_account {
        Some(address) => {
            let account = AccountRef::parse(address)?;
            info!("✅ Merchant account: {}", account);
            Some(account)
        }
        None => {
            warn!("⚠️  MERCHANT_ACCOUNT not set - GET /api/transactions disabled");
            None
        }
    };

    let settlement = match &config.custodial_keypair_path {
        Some(path) => {
            let signer = LocalKeySigner::from_keypair_file(path)?;
            let engine = SettlementEngine::new(config.settlement(), client, Arc::new(signer));
            info!(
                "✅ Refund settlement enabled, custodial account {}",
                engine.custodial_account()
            );
            Some(Arc::new(engine))
        }
        None => {
            warn!("⚠️  CUSTODIAL_KEYPAIR_PATH not set - refunds disabled");
            None
        }
    };

    if config.sol_usd_price.is_zero() {
        warn!("⚠️  SOL_USD_PRICE not set - amountUSD will be 0");
    }

    Ok(AppState {
        sync_engine,
        repository,
        settlement,
        merchant_account,
        shutdown,
    })
}
