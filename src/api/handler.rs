use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use super::models::*;
use crate::{
    cancel::CancelToken,
    error::{AppError, AppResult},
    ledger::{models::*, TransactionRepository},
    middleware::ValidatedJson,
    settlement::SettlementEngine,
    sync::SyncEngine,
};

#[derive(Clone)]
pub struct AppState {
    pub sync_engine: Arc<SyncEngine>,
    pub repository: Arc<TransactionRepository>,
    /// `None` when no custodial keypair is configured
    pub settlement: Option<Arc<SettlementEngine>>,
    pub merchant_account: Option<AccountRef>,
    /// Cancelled on shutdown
    pub shutdown: CancelToken,
}

impl AppState {
    fn settlement(&self) -> AppResult<&Arc<SettlementEngine>> {
        self.settlement.as_ref().ok_or(AppError::SettlementDisabled)
    }
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.repository.snapshot().await;

    Json(HealthResponse {
        status: "healthy".to_string(),
        settlement_enabled: state.settlement.is_some(),
        synced_account: snapshot.as_ref().map(|s| s.account),
        synced_transactions: snapshot.as_ref().map_or(0, |s| s.transactions.len()),
        synced_at: snapshot.map(|s| s.synced_at),
        timestamp: Utc::now(),
    })
}

/// Sync an account's history and make it the current transaction set
/// GET /api/transactions/:account
pub async fn get_transactions(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> AppResult<Json<Vec<Transaction>>> {
    let account = AccountRef::parse(&account)?;
    sync_and_store(&state, account).await
}

/// GET /api/transactions
pub async fn get_merchant_transactions(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<Transaction>>> {
    let account = state
        .merchant_account
        .ok_or_else(|| AppError::NotFound("merchant account (MERCHANT_ACCOUNT is not set)".to_string()))?;
    sync_and_store(&state, account).await
}

async fn sync_and_store(state: &AppState, account: AccountRef) -> AppResult<Json<Vec<Transaction>>> {
    let transactions = state
        .sync_engine
        .sync_ledger_history(&account, &state.shutdown)
        .await?;

    let set = state.repository.replace_all(account, transactions).await;
    info!("Stored {} transactions for {}", set.transactions.len(), account);

    Ok(Json(set.transactions.as_ref().clone()))
}

/// Refund a synced transaction from the custodial account
/// POST /api/refund
///
/// The body is always a `RefundResult`; the status code reflects its error
/// kind (202 when the outcome is still unknown).
pub async fn refund(
    State(state): State<AppState>,
    ValidatedJson(body): ValidatedJson<RefundBody>,
) -> AppResult<(StatusCode, Json<RefundResult>)> {
    let settlement = state.settlement()?;
    let id = SignatureRef::new(body.transaction_id);

    let original = state
        .repository
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("transaction {} in the synced set", id)))?;

    info!("Refund requested for {} ({} SOL to {})", id, original.amount, original.sender);

    let result = settlement
        .settle_refund(
            RefundRequest {
                original_txn: original,
                payer_covers_fee: body.payer_covers_fee,
            },
            &state.shutdown,
        )
        .await;

    let status = match result.error_kind() {
        None if result.is_confirmed() => {
            if state.repository.mark_refunded(&id).await.is_none() {
                warn!("Refunded {} but it left the synced set in the meantime", id);
            }
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
        Some(kind) => kind.status_code(),
    };

    Ok((status, Json(result)))
}

/// GET /api/custodian/balance
pub async fn get_custodian_balance(
    State(state): State<AppState>,
) -> AppResult<Json<CustodianBalanceResponse>> {
    let settlement = state.settlement()?;
    let lamports = settlement.custodial_balance().await?;

    Ok(Json(CustodianBalanceResponse {
        account: settlement.custodial_account(),
        lamports,
        sol: lamports_to_sol(lamports),
    }))
}
