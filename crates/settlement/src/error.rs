use thiserror::Error;
use veilpay_core::Token;
use gateway::GatewayError;

/// Everything that can stop a settlement attempt, mapped one-to-one onto
/// user-facing categories.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("unknown invoice: {0}")]
    UnknownInvoice(String),

    #[error("no wallet connected")]
    WalletNotConnected,

    #[error("connected wallet cannot {0}")]
    WalletIncapable(&'static str),

    #[error("invoice is already paid")]
    AlreadyPaid,

    #[error("this wallet already submitted payment for this invoice")]
    SelfRepay,

    #[error("payment already submitted, awaiting confirmation: {signature}")]
    AlreadySubmitted { signature: String },

    #[error("amount is below the {token} minimum of {minimum}")]
    BelowMinimum { minimum: f64, token: Token },

    #[error("insufficient funds: {available} available, {required} required")]
    InsufficientFunds { available: f64, required: f64 },

    #[error("transaction failed on the ledger: {0}")]
    TransactionFailed(String),

    #[error("pool deposit failed: {0}")]
    DepositFailed(String),

    #[error("pool deposit submitted but not yet reflected in the balance")]
    DepositNotReflected,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("ledger error: {0}")]
    Ledger(String),
}

impl SettlementError {
    pub fn error_code(&self) -> &'static str {
        match self {
            SettlementError::UnknownInvoice(_) => "UNKNOWN_INVOICE",
            SettlementError::WalletNotConnected => "WALLET_NOT_CONNECTED",
            SettlementError::WalletIncapable(_) => "WALLET_INCAPABLE",
            SettlementError::AlreadyPaid => "ALREADY_PAID",
            SettlementError::SelfRepay => "SELF_REPAY",
            SettlementError::AlreadySubmitted { .. } => "ALREADY_SUBMITTED",
            SettlementError::BelowMinimum { .. } => "BELOW_MINIMUM",
            SettlementError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            SettlementError::TransactionFailed(_) => "TRANSACTION_FAILED",
            SettlementError::DepositFailed(_) => "DEPOSIT_FAILED",
            SettlementError::DepositNotReflected => "DEPOSIT_NOT_REFLECTED",
            SettlementError::Gateway(e) => e.error_code(),
            SettlementError::Ledger(_) => "LEDGER_ERROR",
        }
    }
}

/// How a settlement attempt ended when it did not error. Partial success
/// (submitted, confirmation still pending) is its own outcome — the ledger
/// transaction may still land and the observer will reconcile it.
#[derive(Debug, Clone, PartialEq)]
pub enum SettlementOutcome {
    /// Ledger-confirmed settlement.
    Confirmed {
        signature: String,
        /// True when a private transfer had to fall back to external
        /// delivery, so full privacy was not achieved.
        privacy_downgraded: bool,
    },
    /// Signature obtained, confirmation polling exhausted its budget. The
    /// invoice keeps the signature; resubmission stays blocked while it is
    /// well-formed.
    SubmittedUnconfirmed { signature: String },
    /// The gateway asserted success but returned a pool-internal reference
    /// that cannot be verified on the ledger. Reduced assurance: paid on
    /// the gateway's word alone.
    GatewayReference { reference: String },
}

impl SettlementOutcome {
    pub fn signature(&self) -> &str {
        match self {
            SettlementOutcome::Confirmed { signature, .. } => signature,
            SettlementOutcome::SubmittedUnconfirmed { signature } => signature,
            SettlementOutcome::GatewayReference { reference } => reference,
        }
    }
}
