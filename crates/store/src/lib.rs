pub mod audit;
pub mod blob;

use chrono::Utc;
use std::sync::Mutex;
use uuid::Uuid;
use veilpay_core::merge::merge_invoice;
use veilpay_core::signature::is_well_formed_signature;
use veilpay_core::{Invoice, InvoiceStatus, Token};

pub use blob::{InvoiceBlob, MemoryBlob, SledBlob};

/// Single source of truth for invoice records in this session. All writes
/// go through `create`/`merge`/`mark_expired`; persistence to the blob is
/// best-effort and never rolls back the in-memory mutation.
pub struct InvoiceStore {
    invoices: Mutex<Vec<Invoice>>,
    blob: Box<dyn InvoiceBlob>,
}

impl InvoiceStore {
    /// Load the collection from the blob. A missing or corrupt blob starts
    /// an empty session rather than failing startup.
    pub fn open(blob: Box<dyn InvoiceBlob>) -> Self {
        let invoices = match blob.load_all() {
            Ok(Some(serialized)) => match serde_json::from_str::<Vec<Invoice>>(&serialized) {
                Ok(invoices) => invoices.into_iter().map(Invoice::normalized).collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "invoice blob corrupt, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load invoice blob, starting empty");
                Vec::new()
            }
        };

        tracing::debug!(count = invoices.len(), "invoice store loaded");
        Self {
            invoices: Mutex::new(invoices),
            blob,
        }
    }

    pub fn create(
        &self,
        amount: f64,
        token: Token,
        description: Option<String>,
        recipient: &str,
    ) -> Invoice {
        let invoice = Invoice::new(
            Uuid::new_v4().to_string(),
            amount,
            token,
            description,
            recipient,
            Utc::now(),
        );

        let mut invoices = self.invoices.lock().unwrap();
        invoices.insert(0, invoice.clone());
        self.persist(&invoices);

        tracing::info!(invoice_id = %invoice.id, amount, token = %token, "invoice created");
        invoice
    }

    pub fn get(&self, id: &str) -> Option<Invoice> {
        self.invoices.lock().unwrap().iter().find(|i| i.id == id).cloned()
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Invoice> {
        self.invoices.lock().unwrap().clone()
    }

    /// Reconcile a candidate into the collection under the merge rule:
    /// paid status is absorbing, settlement-evidence fields fill once.
    /// Inserts the (normalized) candidate when the id is unknown.
    pub fn merge(&self, candidate: Invoice) -> Invoice {
        let mut invoices = self.invoices.lock().unwrap();
        let merged = match invoices.iter().position(|i| i.id == candidate.id) {
            Some(index) => {
                let merged = merge_invoice(&invoices[index], &candidate);
                invoices[index] = merged.clone();
                merged
            }
            None => {
                let normalized = candidate.normalized();
                invoices.insert(0, normalized.clone());
                normalized
            }
        };
        self.persist(&invoices);

        tracing::debug!(invoice_id = %merged.id, status = ?merged.status, "invoice merged");
        merged
    }

    /// Recovery write for a prior bad-state record: clears a recorded
    /// signature that cannot be a ledger reference so a retried settlement
    /// can attach its real one. No-op for well-formed signatures and for
    /// paid invoices (their gateway-internal references are evidence, not
    /// damage).
    pub fn clear_malformed_signature(&self, id: &str) -> Option<Invoice> {
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices.iter_mut().find(|i| i.id == id)?;
        if invoice.status == InvoiceStatus::Pending {
            if let Some(sig) = &invoice.signature {
                if !is_well_formed_signature(sig) {
                    tracing::warn!(invoice_id = %id, "clearing malformed recorded signature");
                    invoice.signature = None;
                    let repaired = invoice.clone();
                    self.persist(&invoices);
                    return Some(repaired);
                }
            }
        }
        Some(invoice.clone())
    }

    /// Apply the expiry transition. Legal only from `Pending`; the policy
    /// deciding *when* an invoice expires lives with the caller.
    pub fn mark_expired(&self, id: &str) -> Option<Invoice> {
        let mut invoices = self.invoices.lock().unwrap();
        let invoice = invoices.iter_mut().find(|i| i.id == id)?;
        if invoice.status != InvoiceStatus::Pending {
            return Some(invoice.clone());
        }
        invoice.status = InvoiceStatus::Expired;
        let expired = invoice.clone();
        self.persist(&invoices);

        tracing::info!(invoice_id = %id, "invoice expired");
        Some(expired)
    }

    fn persist(&self, invoices: &[Invoice]) {
        let serialized = match serde_json::to_string(invoices) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize invoices");
                return;
            }
        };
        if let Err(e) = self.blob.save_all(&serialized) {
            tracing::warn!(error = %e, "failed to persist invoices");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veilpay_core::Invoice;

    fn memory_store() -> InvoiceStore {
        InvoiceStore::open(Box::new(MemoryBlob::new()))
    }

    #[test]
    fn create_then_get() {
        let store = memory_store();
        let invoice = store.create(2.5, Token::Sol, Some("design work".into()), "Recipient1");

        let fetched = store.get(&invoice.id).unwrap();
        assert_eq!(fetched.amount, 2.5);
        assert_eq!(fetched.status, InvoiceStatus::Pending);
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn newest_invoice_listed_first() {
        let store = memory_store();
        store.create(1.0, Token::Sol, None, "R");
        let second = store.create(2.0, Token::Sol, None, "R");
        assert_eq!(store.list()[0].id, second.id);
    }

    #[test]
    fn collection_survives_reload() {
        let blob = MemoryBlob::new();
        let id = {
            let store = InvoiceStore::open(Box::new(blob.clone()));
            store.create(1.0, Token::Usdc, None, "R").id
        };
        let store = InvoiceStore::open(Box::new(blob));
        assert_eq!(store.get(&id).unwrap().token, Token::Usdc);
    }

    #[test]
    fn merge_inserts_unknown_ids() {
        let store = memory_store();
        let foreign = Invoice::new("from-link", 3.0, Token::Sol, None, "R", Utc::now());
        store.merge(foreign);
        assert!(store.get("from-link").is_some());
    }

    #[test]
    fn paid_survives_pending_merge() {
        let store = memory_store();
        let invoice = store.create(2.0, Token::Sol, None, "R");

        let mut paid = invoice.clone();
        paid.status = InvoiceStatus::Paid;
        paid.signature = Some("sig".into());
        store.merge(paid);

        let stale_pending = invoice.clone();
        let merged = store.merge(stale_pending);
        assert_eq!(merged.status, InvoiceStatus::Paid);
        assert_eq!(merged.signature.as_deref(), Some("sig"));
    }

    #[test]
    fn expiry_only_from_pending() {
        let store = memory_store();
        let invoice = store.create(2.0, Token::Sol, None, "R");

        let mut paid = invoice.clone();
        paid.status = InvoiceStatus::Paid;
        store.merge(paid);

        let after = store.mark_expired(&invoice.id).unwrap();
        assert_eq!(after.status, InvoiceStatus::Paid);

        let pending = store.create(1.0, Token::Sol, None, "R");
        let after = store.mark_expired(&pending.id).unwrap();
        assert_eq!(after.status, InvoiceStatus::Expired);
    }

    #[test]
    fn malformed_signature_can_be_repaired_on_pending_invoices() {
        let store = memory_store();
        let invoice = store.create(2.0, Token::Sol, None, "R");

        let mut damaged = invoice.clone();
        damaged.signature = Some("!!garbage!!".into());
        store.merge(damaged);

        let repaired = store.clear_malformed_signature(&invoice.id).unwrap();
        assert!(repaired.signature.is_none());

        // A well-formed signature is evidence and stays put.
        let mut submitted = invoice.clone();
        submitted.signature = Some("4".repeat(87));
        store.merge(submitted);
        let untouched = store.clear_malformed_signature(&invoice.id).unwrap();
        assert_eq!(untouched.signature.as_deref(), Some("4".repeat(87).as_str()));
    }

    #[test]
    fn corrupt_blob_starts_empty() {
        let store = InvoiceStore::open(Box::new(MemoryBlob::with_contents("not json")));
        assert!(store.list().is_empty());
    }
}
