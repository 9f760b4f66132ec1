use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use veilpay_core::Token;
use ledger::Wallet;

/// Failures the privacy gateway can raise, mapped one-to-one onto the
/// categories the UI layer shows.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("recipient is not resolvable in the privacy pool")]
    RecipientUnresolvable,

    #[error("insufficient pool balance: {available} available, {required} required")]
    InsufficientBalance { available: f64, required: f64 },

    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("gateway network failure: {0}")]
    Network(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::RecipientUnresolvable => "RECIPIENT_UNRESOLVABLE",
            GatewayError::InsufficientBalance { .. } => "INSUFFICIENT_POOL_BALANCE",
            GatewayError::TransferFailed(_) => "TRANSFER_FAILED",
            GatewayError::Network(_) => "NETWORK_FAILURE",
            GatewayError::Unavailable(_) => "GATEWAY_UNAVAILABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferType {
    /// Stays inside the pool: amount hidden, sender visible to pool
    /// accounting.
    Internal,
    /// Delivered to the recipient's public ledger account; the resulting
    /// transaction is not attributable to the payer's wallet.
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositRequest {
    pub address: String,
    pub amount: f64,
    /// Present only for non-native tokens.
    pub token_mint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub address: String,
    pub amount: f64,
    pub token_mint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub sender: String,
    pub recipient: String,
    pub amount: f64,
    pub token: Token,
    pub transfer_type: TransferType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub success: bool,
    /// A public-ledger signature when the gateway produced one, or an
    /// internal-only reference that cannot be verified on the ledger.
    pub signature: Option<String>,
    pub error: Option<String>,
}

/// The anonymity network's SDK surface: pool balance, deposits/withdrawals
/// prepared as unsigned transactions, and pooled transfers signed via a
/// wallet message-signing callback.
#[async_trait]
pub trait PrivacyGateway: Send + Sync {
    /// One-time async runtime setup. Idempotent; fails fast when the
    /// gateway is unsupported in this environment or init already errored.
    async fn ensure_ready(&self) -> Result<(), GatewayError>;

    async fn pool_balance(&self, address: &str, token: Token) -> Result<f64, GatewayError>;

    /// Returns an unsigned transaction blob (base64) that funds the pool.
    async fn prepare_deposit(&self, request: DepositRequest) -> Result<String, GatewayError>;

    /// Returns an unsigned transaction blob (base64); may require two
    /// signatures before submission.
    async fn prepare_withdraw(&self, request: WithdrawRequest) -> Result<String, GatewayError>;

    async fn transfer(
        &self,
        request: TransferRequest,
        signer: &dyn Wallet,
    ) -> Result<TransferOutcome, GatewayError>;
}

pub mod http;
pub mod mock;
