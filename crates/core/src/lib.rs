pub mod link;
pub mod merge;
pub mod models;
pub mod signature;
pub mod tokens;

use sha2::{Digest, Sha256};

pub use models::{Invoice, InvoiceStatus, PaymentMethod, PrivacyLevel, Token};

/// SHA-256 hex digest of the canonical JSON form of an invoice record.
/// Attached to audit events so a log entry can be tied to the exact record
/// state it described.
pub fn invoice_fingerprint(invoice: &models::Invoice) -> String {
    let json = serde_json::to_string(invoice).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    hex::encode(hasher.finalize())
}
