use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Document;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    #[default]
    Active,
    Frozen,
}

/// Balance holder, one per user (id = user id). All amounts in cents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub id: String,
    pub user_id: String,
    pub balance_cents: i64,
    /// Held for withdrawals awaiting review
    pub pending_cents: i64,
    pub total_earned_cents: i64,
    pub total_spent_cents: i64,
    pub total_withdrawn_cents: i64,
    pub currency: String,
    pub status: WalletStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document for Wallet {
    const COLLECTION: &'static str = "wallets";
    const NAME: &'static str = "Wallet";

    fn id(&self) -> &str {
        &self.id
    }
}

impl Wallet {
    pub fn new(user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: user_id.to_string(),
            user_id: user_id.to_string(),
            balance_cents: 0,
            pending_cents: 0,
            total_earned_cents: 0,
            total_spent_cents: 0,
            total_withdrawn_cents: 0,
            currency: "USD".to_string(),
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Credit,
    Debit,
    TransferIn,
    TransferOut,
    Withdrawal,
    Refund,
    Purchase,
    GiftSent,
    GiftReceived,
}

impl TransactionKind {
    /// Whether the amount adds to the balance
    pub fn is_credit(self) -> bool {
        matches!(
            self,
            TransactionKind::Credit
                | TransactionKind::TransferIn
                | TransactionKind::Refund
                | TransactionKind::GiftReceived
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: String,
    pub wallet_id: String,
    pub user_id: String,
    pub kind: TransactionKind,
    /// Always positive; `kind` gives the direction
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub description: String,
    pub counterparty_id: Option<String>,
    /// Order id, withdrawal id or deposit source
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Document for WalletTransaction {
    const COLLECTION: &'static str = "wallet_transactions";
    const NAME: &'static str = "Transaction";

    fn id(&self) -> &str {
        &self.id
    }
}

impl WalletTransaction {
    pub fn new_id() -> String {
        format!("txn_{}", Uuid::new_v4().simple())
    }

    pub fn signed_amount(&self) -> i64 {
        if self.kind.is_credit() {
            self.amount_cents
        } else {
            -self.amount_cents
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: String,
    pub user_id: String,
    pub amount_cents: i64,
    pub method: String,
    #[serde(default)]
    pub account_details: serde_json::Value,
    pub status: WithdrawalStatus,
    pub admin_notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document for Withdrawal {
    const COLLECTION: &'static str = "withdrawals";
    const NAME: &'static str = "Withdrawal";

    fn id(&self) -> &str {
        &self.id
    }
}
