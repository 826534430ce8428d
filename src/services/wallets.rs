//! Wallet balances, the transaction ledger and withdrawals.
//!
//! Every movement writes the wallet and its ledger entry in the same commit.
//! Withdrawals move funds from `balance` to `pending` on request and only
//! produce a ledger entry once approved, so a wallet's ledger always sums to
//! `balance + pending`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    db::{with_retry, Batch, Db, Direction, Query},
    error::{AppError, AppResult},
    models::{
        new_id, Page, PageParams, TransactionKind, User, Wallet, WalletStatus, WalletTransaction,
        Withdrawal, WithdrawalStatus,
    },
};

pub const DEFAULT_TRANSACTION_LIMIT: usize = 50;
pub const MAX_TRANSACTION_LIMIT: usize = 100;
pub const DEFAULT_WITHDRAWAL_METHOD: &str = "bank_transfer";

/// One balance change to apply to a wallet
#[derive(Debug, Clone)]
pub struct Movement {
    pub kind: TransactionKind,
    pub amount_cents: i64,
    pub description: String,
    pub counterparty_id: Option<String>,
    pub reference: Option<String>,
}

impl Movement {
    pub fn new(kind: TransactionKind, amount_cents: i64, description: impl Into<String>) -> Self {
        Self {
            kind,
            amount_cents,
            description: description.into(),
            counterparty_id: None,
            reference: None,
        }
    }

    pub fn counterparty(mut self, user_id: &str) -> Self {
        self.counterparty_id = Some(user_id.to_string());
        self
    }

    pub fn reference(mut self, reference: &str) -> Self {
        self.reference = Some(reference.to_string());
        self
    }
}

#[derive(Debug, Serialize)]
pub struct Balance {
    pub balance_cents: i64,
    pub pending_cents: i64,
    pub currency: String,
    pub status: WalletStatus,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalInput {
    pub amount_cents: i64,
    pub method: Option<String>,
    #[serde(default)]
    pub account_details: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
pub struct WalletFilters {
    pub status: Option<WalletStatus>,
    pub min_balance: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Serialize, PartialEq)]
pub struct WalletStats {
    pub wallets: usize,
    pub active: usize,
    pub frozen: usize,
    pub total_balance_cents: i64,
    pub total_pending_cents: i64,
    pub total_withdrawn_cents: i64,
    pub pending_withdrawals: usize,
}

fn ensure_positive(amount_cents: i64) -> AppResult<()> {
    if amount_cents <= 0 {
        return Err(AppError::invalid("Amount must be greater than zero"));
    }
    Ok(())
}

/// Applies `movement` to the wallet in memory and returns its ledger entry.
///
/// Debits fail on frozen wallets and when the balance would go negative.
pub fn apply_movement(wallet: &mut Wallet, movement: &Movement, now: DateTime<Utc>) -> AppResult<WalletTransaction> {
    ensure_positive(movement.amount_cents)?;
    let amount = movement.amount_cents;

    if movement.kind.is_credit() {
        wallet.balance_cents += amount;
        match movement.kind {
            TransactionKind::Refund => {
                wallet.total_spent_cents = (wallet.total_spent_cents - amount).max(0);
            }
            _ => wallet.total_earned_cents += amount,
        }
    } else {
        if wallet.status == WalletStatus::Frozen {
            return Err(AppError::forbidden("WALLET_FROZEN", "This wallet is frozen"));
        }
        if wallet.balance_cents < amount {
            return Err(AppError::InsufficientFunds);
        }
        wallet.balance_cents -= amount;
        match movement.kind {
            TransactionKind::Withdrawal => wallet.total_withdrawn_cents += amount,
            _ => wallet.total_spent_cents += amount,
        }
    }
    wallet.updated_at = now;

    Ok(WalletTransaction {
        id: WalletTransaction::new_id(),
        wallet_id: wallet.id.clone(),
        user_id: wallet.user_id.clone(),
        kind: movement.kind,
        amount_cents: amount,
        balance_after_cents: wallet.balance_cents,
        description: movement.description.clone(),
        counterparty_id: movement.counterparty_id.clone(),
        reference: movement.reference.clone(),
        created_at: now,
    })
}

/// Reads the wallet (creating it when missing) and stages the movement
/// and its ledger entry on `batch`
pub async fn stage_movement(
    db: &Db,
    batch: &mut Batch,
    user_id: &str,
    movement: &Movement,
    now: DateTime<Utc>,
) -> AppResult<WalletTransaction> {
    let transaction = match db.get_versioned::<Wallet>(user_id).await? {
        Some(mut wallet) => {
            let transaction = apply_movement(&mut wallet, movement, now)?;
            batch.update(&wallet)?;
            transaction
        }
        None => {
            let mut wallet = Wallet::new(user_id);
            let transaction = apply_movement(&mut wallet, movement, now)?;
            batch.insert(&wallet)?;
            transaction
        }
    };
    batch.insert(&transaction)?;
    Ok(transaction)
}

async fn commit_movement(
    db: &Db,
    operation: &'static str,
    user_id: &str,
    movement: &Movement,
) -> AppResult<WalletTransaction> {
    with_retry(operation, || async {
        let mut batch = db.batch();
        let transaction = stage_movement(db, &mut batch, user_id, movement, Utc::now()).await?;
        batch.commit().await?;
        Ok(transaction)
    })
    .await
}

pub async fn get_or_create(db: &Db, user_id: &str) -> AppResult<Wallet> {
    if let Some(wallet) = db.get::<Wallet>(user_id).await? {
        return Ok(wallet);
    }
    match db.insert(&Wallet::new(user_id)).await {
        Ok(()) | Err(AppError::WriteConflict(_)) => {}
        Err(e) => return Err(e),
    }
    Ok(db.require::<Wallet>(user_id).await?.into_inner())
}

pub async fn balance(db: &Db, user_id: &str) -> AppResult<Balance> {
    let wallet = get_or_create(db, user_id).await?;
    Ok(Balance {
        balance_cents: wallet.balance_cents,
        pending_cents: wallet.pending_cents,
        currency: wallet.currency,
        status: wallet.status,
    })
}

/// Ledger entries, newest first
pub async fn transactions(db: &Db, user_id: &str, limit: Option<usize>) -> AppResult<Vec<WalletTransaction>> {
    let limit = limit
        .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
        .clamp(1, MAX_TRANSACTION_LIMIT);
    db.find(
        &Query::new()
            .eq("wallet_id", user_id)
            .order_by("created_at", Direction::Desc)
            .limit(limit),
    )
    .await
}

/// Admin credit
pub async fn deposit(
    db: &Db,
    user_id: &str,
    amount_cents: i64,
    description: Option<String>,
    source: Option<String>,
) -> AppResult<WalletTransaction> {
    ensure_positive(amount_cents)?;
    db.get::<User>(user_id).await?.ok_or(AppError::UserNotFound)?;
    let mut movement = Movement::new(
        TransactionKind::Credit,
        amount_cents,
        description.unwrap_or_else(|| "Deposit".to_string()),
    );
    movement.reference = source;

    let transaction = commit_movement(db, "wallet_deposit", user_id, &movement).await?;
    tracing::info!(user_id, amount_cents, balance_after = transaction.balance_after_cents, "Wallet deposit");
    Ok(transaction)
}

/// Admin debit
pub async fn deduct(
    db: &Db,
    user_id: &str,
    amount_cents: i64,
    description: Option<String>,
) -> AppResult<WalletTransaction> {
    ensure_positive(amount_cents)?;
    let movement = Movement::new(
        TransactionKind::Debit,
        amount_cents,
        description.unwrap_or_else(|| "Deduction".to_string()),
    );
    let transaction = commit_movement(db, "wallet_deduct", user_id, &movement).await?;
    tracing::info!(user_id, amount_cents, balance_after = transaction.balance_after_cents, "Wallet deduction");
    Ok(transaction)
}

/// Moves funds between two users; both ledgers and wallets commit together
pub async fn transfer(
    db: &Db,
    from_id: &str,
    to_id: &str,
    amount_cents: i64,
    description: Option<String>,
) -> AppResult<WalletTransaction> {
    if from_id == to_id {
        return Err(AppError::invalid("Cannot transfer to yourself"));
    }
    ensure_positive(amount_cents)?;
    let receiver = db.get::<User>(to_id).await?.ok_or(AppError::UserNotFound)?;
    if !receiver.is_active() {
        return Err(AppError::invalid("The receiving account is not active"));
    }
    let description = description.unwrap_or_else(|| "Transfer".to_string());

    let outgoing = Movement::new(TransactionKind::TransferOut, amount_cents, description.clone())
        .counterparty(to_id);
    let incoming = Movement::new(TransactionKind::TransferIn, amount_cents, description)
        .counterparty(from_id);

    let sent = with_retry("wallet_transfer", || async {
        let now = Utc::now();
        let mut batch = db.batch();
        let sent = stage_movement(db, &mut batch, from_id, &outgoing, now).await?;
        let received = stage_movement(db, &mut batch, to_id, &incoming, now).await?;
        batch.commit().await?;
        tracing::debug!(sent = %sent.id, received = %received.id, "Transfer ledger entries written");
        Ok(sent)
    })
    .await?;

    tracing::info!(from_id, to_id, amount_cents, "Wallet transfer");
    Ok(sent)
}

/// Reserves funds for payout: balance moves to pending until an admin decides
pub async fn request_withdrawal(db: &Db, user_id: &str, input: WithdrawalInput) -> AppResult<Withdrawal> {
    ensure_positive(input.amount_cents)?;
    let method = input
        .method
        .map(|m| m.trim().to_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_WITHDRAWAL_METHOD.to_string());

    let withdrawal = with_retry("request_withdrawal", || async {
        let mut wallet = db
            .get_versioned::<Wallet>(user_id)
            .await?
            .ok_or(AppError::InsufficientFunds)?;
        if wallet.status == WalletStatus::Frozen {
            return Err(AppError::forbidden("WALLET_FROZEN", "This wallet is frozen"));
        }
        if wallet.balance_cents < input.amount_cents {
            return Err(AppError::InsufficientFunds);
        }

        let now = Utc::now();
        wallet.balance_cents -= input.amount_cents;
        wallet.pending_cents += input.amount_cents;
        wallet.updated_at = now;
        let withdrawal = Withdrawal {
            id: new_id(),
            user_id: user_id.to_string(),
            amount_cents: input.amount_cents,
            method: method.clone(),
            account_details: input.account_details.clone(),
            status: WithdrawalStatus::Pending,
            admin_notes: None,
            requested_at: now,
            processed_at: None,
        };

        let mut batch = db.batch();
        batch.update(&wallet)?;
        batch.insert(&withdrawal)?;
        batch.commit().await?;
        Ok(withdrawal)
    })
    .await?;

    tracing::info!(
        withdrawal_id = %withdrawal.id,
        user_id,
        amount_cents = withdrawal.amount_cents,
        "Withdrawal requested"
    );
    Ok(withdrawal)
}

/// Approval pays out the pending funds; rejection returns them to the balance
pub async fn process_withdrawal(
    db: &Db,
    withdrawal_id: &str,
    decision: WithdrawalStatus,
    notes: Option<String>,
) -> AppResult<Withdrawal> {
    if decision == WithdrawalStatus::Pending {
        return Err(AppError::invalid("Decision must be approved or rejected"));
    }

    let withdrawal = with_retry("process_withdrawal", || async {
        let mut withdrawal = db.require::<Withdrawal>(withdrawal_id).await?;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(AppError::InvalidTransition(
                "Withdrawal has already been processed".to_string(),
            ));
        }
        let mut wallet = db.require::<Wallet>(&withdrawal.user_id).await?;
        let now = Utc::now();
        let amount = withdrawal.amount_cents;

        let mut batch = db.batch();
        wallet.pending_cents = (wallet.pending_cents - amount).max(0);
        if decision == WithdrawalStatus::Approved {
            wallet.total_withdrawn_cents += amount;
            batch.insert(&WalletTransaction {
                id: WalletTransaction::new_id(),
                wallet_id: wallet.id.clone(),
                user_id: wallet.user_id.clone(),
                kind: TransactionKind::Withdrawal,
                amount_cents: amount,
                balance_after_cents: wallet.balance_cents,
                description: format!("Withdrawal via {}", withdrawal.method),
                counterparty_id: None,
                reference: Some(withdrawal.id.clone()),
                created_at: now,
            })?;
        } else {
            wallet.balance_cents += amount;
        }
        wallet.updated_at = now;

        withdrawal.status = decision;
        withdrawal.admin_notes = notes.clone();
        withdrawal.processed_at = Some(now);
        batch.update(&wallet)?;
        batch.update(&withdrawal)?;
        batch.commit().await?;
        Ok(withdrawal.into_inner())
    })
    .await?;

    tracing::info!(withdrawal_id, decision = ?decision, "Withdrawal processed");
    Ok(withdrawal)
}

pub async fn set_status(db: &Db, user_id: &str, status: WalletStatus) -> AppResult<Wallet> {
    get_or_create(db, user_id).await?;
    let wallet = with_retry("set_wallet_status", || async {
        let mut wallet = db.require::<Wallet>(user_id).await?;
        wallet.status = status;
        wallet.updated_at = Utc::now();
        db.update(&wallet).await?;
        Ok(wallet.into_inner())
    })
    .await?;
    tracing::info!(user_id, status = ?status, "Wallet status set");
    Ok(wallet)
}

/// Wallets by balance, largest first
pub async fn list_wallets(db: &Db, filters: &WalletFilters) -> AppResult<Vec<Wallet>> {
    let mut query = Query::new()
        .order_by("balance_cents", Direction::Desc)
        .limit(filters.limit.unwrap_or(50).clamp(1, MAX_TRANSACTION_LIMIT));
    if let Some(status) = filters.status {
        query = query.eq("status", status);
    }
    if let Some(min) = filters.min_balance {
        query = query.gte("balance_cents", min);
    }
    db.find(&query).await
}

pub async fn stats(db: &Db) -> AppResult<WalletStats> {
    let wallets = db.find::<Wallet>(&Query::new()).await?;
    let pending_withdrawals = db
        .count::<Withdrawal>(&Query::new().eq("status", WithdrawalStatus::Pending))
        .await?;

    let mut stats = WalletStats {
        wallets: wallets.len(),
        pending_withdrawals,
        ..Default::default()
    };
    for wallet in &wallets {
        match wallet.status {
            WalletStatus::Active => stats.active += 1,
            WalletStatus::Frozen => stats.frozen += 1,
        }
        stats.total_balance_cents += wallet.balance_cents;
        stats.total_pending_cents += wallet.pending_cents;
        stats.total_withdrawn_cents += wallet.total_withdrawn_cents;
    }
    Ok(stats)
}

pub async fn list_withdrawals(
    db: &Db,
    status: Option<WithdrawalStatus>,
    params: &PageParams,
) -> AppResult<Page<Withdrawal>> {
    let mut query = Query::new()
        .order_by("requested_at", Direction::Desc)
        .offset(params.offset())
        .limit(params.limit() + 1);
    if let Some(status) = status {
        query = query.eq("status", status);
    }
    let items = db.find::<Withdrawal>(&query).await?;
    Ok(Page::from_overfetch(items, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::users::tests::seed_user;

    async fn ledger_sum(db: &Db, user_id: &str) -> i64 {
        transactions(db, user_id, Some(MAX_TRANSACTION_LIMIT))
            .await
            .unwrap()
            .iter()
            .map(WalletTransaction::signed_amount)
            .sum()
    }

    #[tokio::test]
    async fn test_deposit_and_deduct() {
        let db = Db::memory();
        seed_user(&db, "alice").await;

        let credit = deposit(&db, "alice", 5000, None, Some("promo".to_string())).await.unwrap();
        assert_eq!(credit.balance_after_cents, 5000);
        assert!(credit.id.starts_with("txn_"));

        assert!(matches!(
            deduct(&db, "alice", 6000, None).await,
            Err(AppError::InsufficientFunds)
        ));
        deduct(&db, "alice", 2000, None).await.unwrap();

        let wallet = db.require::<Wallet>("alice").await.unwrap();
        assert_eq!(wallet.balance_cents, 3000);
        assert_eq!(wallet.total_earned_cents, 5000);
        assert_eq!(wallet.total_spent_cents, 2000);
        assert_eq!(ledger_sum(&db, "alice").await, 3000);
        assert!(deposit(&db, "ghost", 100, None, None).await.is_err());
        assert!(deposit(&db, "alice", 0, None, None).await.is_err());
    }

    #[tokio::test]
    async fn test_transfer_moves_funds_atomically() {
        let db = Db::memory();
        seed_user(&db, "alice").await;
        seed_user(&db, "bob").await;
        deposit(&db, "alice", 1000, None, None).await.unwrap();

        assert!(transfer(&db, "alice", "alice", 100, None).await.is_err());
        assert!(matches!(
            transfer(&db, "alice", "bob", 5000, None).await,
            Err(AppError::InsufficientFunds)
        ));
        assert!(db.get::<Wallet>("bob").await.unwrap().is_none());

        let sent = transfer(&db, "alice", "bob", 400, Some("lunch".to_string())).await.unwrap();
        assert_eq!(sent.kind, TransactionKind::TransferOut);
        assert_eq!(sent.counterparty_id.as_deref(), Some("bob"));
        assert_eq!(balance(&db, "alice").await.unwrap().balance_cents, 600);
        assert_eq!(balance(&db, "bob").await.unwrap().balance_cents, 400);
        assert_eq!(ledger_sum(&db, "bob").await, 400);
    }

    #[tokio::test]
    async fn test_frozen_wallet_rejects_debits() {
        let db = Db::memory();
        seed_user(&db, "alice").await;
        deposit(&db, "alice", 1000, None, None).await.unwrap();
        set_status(&db, "alice", WalletStatus::Frozen).await.unwrap();

        let err = deduct(&db, "alice", 100, None).await.unwrap_err();
        assert_eq!(err.code(), "WALLET_FROZEN");
        assert!(deposit(&db, "alice", 100, None, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_withdrawal_approval_and_rejection_keep_ledger_balanced() {
        let db = Db::memory();
        seed_user(&db, "alice").await;
        deposit(&db, "alice", 1000, None, None).await.unwrap();

        let request = |amount| WithdrawalInput {
            amount_cents: amount,
            method: None,
            account_details: serde_json::json!({"iban": "XX00"}),
        };
        assert!(matches!(
            request_withdrawal(&db, "alice", request(5000)).await,
            Err(AppError::InsufficientFunds)
        ));

        let first = request_withdrawal(&db, "alice", request(300)).await.unwrap();
        assert_eq!(first.method, DEFAULT_WITHDRAWAL_METHOD);
        let second = request_withdrawal(&db, "alice", request(200)).await.unwrap();

        let wallet = db.require::<Wallet>("alice").await.unwrap();
        assert_eq!((wallet.balance_cents, wallet.pending_cents), (500, 500));
        assert_eq!(ledger_sum(&db, "alice").await, 1000);

        process_withdrawal(&db, &first.id, WithdrawalStatus::Approved, None).await.unwrap();
        process_withdrawal(&db, &second.id, WithdrawalStatus::Rejected, Some("bad account".into()))
            .await
            .unwrap();
        assert!(matches!(
            process_withdrawal(&db, &first.id, WithdrawalStatus::Rejected, None).await,
            Err(AppError::InvalidTransition(_))
        ));

        let wallet = db.require::<Wallet>("alice").await.unwrap();
        assert_eq!(wallet.balance_cents, 700);
        assert_eq!(wallet.pending_cents, 0);
        assert_eq!(wallet.total_withdrawn_cents, 300);
        assert_eq!(ledger_sum(&db, "alice").await, wallet.balance_cents + wallet.pending_cents);

        let pending = list_withdrawals(&db, Some(WithdrawalStatus::Pending), &PageParams::default())
            .await
            .unwrap();
        assert!(pending.items.is_empty());
    }

    #[tokio::test]
    async fn test_list_and_stats() {
        let db = Db::memory();
        for (id, amount) in [("a", 100), ("b", 900), ("c", 500)] {
            seed_user(&db, id).await;
            deposit(&db, id, amount, None, None).await.unwrap();
        }
        set_status(&db, "c", WalletStatus::Frozen).await.unwrap();

        let rich = list_wallets(
            &db,
            &WalletFilters {
                min_balance: Some(400),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let ids: Vec<_> = rich.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c"]);

        let stats = stats(&db).await.unwrap();
        assert_eq!(stats.wallets, 3);
        assert_eq!(stats.frozen, 1);
        assert_eq!(stats.total_balance_cents, 1500);
    }
}
