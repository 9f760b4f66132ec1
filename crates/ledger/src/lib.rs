use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use veilpay_core::Token;

/// One entry of an address's recent transaction history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub signature: String,
    pub block_time: Option<DateTime<Utc>>,
    pub err: Option<String>,
}

/// Net token-account movement observed in one transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenDelta {
    pub owner: String,
    pub mint: String,
    /// Post minus pre, in UI units.
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDetail {
    pub block_time: Option<DateTime<Utc>>,
    pub account_keys: Vec<String>,
    /// Post minus pre lamport balance per account key, index-aligned with
    /// `account_keys`.
    pub native_deltas: Vec<i64>,
    pub token_deltas: Vec<TokenDelta>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureStatus {
    pub confirmation: Option<Commitment>,
    pub err: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmResult {
    pub err: Option<String>,
}

/// A native or token transfer, ready for signing. The checkpoint must be
/// fetched fresh immediately before building the instruction — the ledger
/// rejects transactions referencing a stale one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferInstruction {
    pub from: String,
    pub to: String,
    pub amount: f64,
    pub token: Token,
    pub checkpoint: String,
}

/// Read/submit access to the underlying ledger.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn recent_activity(&self, address: &str, limit: usize) -> Result<Vec<ActivityEntry>>;

    async fn transaction_detail(&self, signature: &str) -> Result<TransactionDetail>;

    async fn signature_status(&self, signature: &str) -> Result<SignatureStatus>;

    /// Spendable balance of the native unit, in UI units.
    async fn spendable_balance(&self, address: &str) -> Result<f64>;

    /// Latest checkpoint reference (blockhash equivalent).
    async fn latest_checkpoint(&self) -> Result<String>;

    /// Sign and submit a transfer built by this client; returns the
    /// transaction signature.
    async fn submit_transfer(
        &self,
        instruction: &TransferInstruction,
        wallet: &dyn Wallet,
    ) -> Result<String>;

    /// Sign and submit an externally prepared transaction blob (base64),
    /// e.g. a gateway pool deposit.
    async fn submit_raw(&self, blob_base64: &str, wallet: &dyn Wallet) -> Result<String>;

    /// Primary confirmation call. An `Err` here means the call itself did
    /// not complete; callers fall back to `signature_status` polling.
    async fn confirm_signature(
        &self,
        signature: &str,
        checkpoint: &str,
        commitment: Commitment,
    ) -> Result<ConfirmResult>;
}

pub mod mock;
pub mod rpc;
pub mod wallet;

pub use wallet::Wallet;
