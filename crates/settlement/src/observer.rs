use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use veilpay_core::tokens::{TokenPolicy, LAMPORTS_PER_SOL};
use veilpay_core::{invoice_fingerprint, Invoice, InvoiceStatus, Token};
use ledger::{LedgerClient, TransactionDetail};
use store::audit::{write_audit_event, AuditEvent};
use store::InvoiceStore;

#[derive(Debug, Clone, Copy)]
pub struct ObserverConfig {
    pub interval: Duration,
    pub max_attempts: u32,
    /// How many recent activity entries to inspect per poll.
    pub activity_limit: usize,
    /// Accept a delta within this fraction of the expected amount; covers
    /// gateway fee deduction and dust.
    pub relative_tolerance: f64,
    /// Absolute tolerance for native-unit direct transfers, in lamports.
    pub native_fee_tolerance_lamports: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 60,
            activity_limit: 15,
            relative_tolerance: 0.02,
            native_fee_tolerance_lamports: 10_000,
        }
    }
}

/// Passive settlement detector. Polls the recipient's ledger activity for a
/// pending invoice — no wallet needed — and promotes it to paid when a
/// transfer matching the amount shows up. This is what makes the
/// recipient's dashboard and the payer's receipt page converge without a
/// manual refresh.
#[derive(Clone)]
pub struct PaymentObserver {
    ledger: Arc<dyn LedgerClient>,
    store: Arc<InvoiceStore>,
    config: ObserverConfig,
}

/// Handle to a spawned observer loop. Dropping the handle leaves the loop
/// running (it is bounded anyway); `stop` cancels it immediately.
pub struct ObserverHandle {
    handle: JoinHandle<Option<Invoice>>,
}

impl ObserverHandle {
    pub fn stop(&self) {
        self.handle.abort();
    }

    pub async fn join(self) -> Option<Invoice> {
        self.handle.await.unwrap_or(None)
    }
}

impl PaymentObserver {
    pub fn new(ledger: Arc<dyn LedgerClient>, store: Arc<InvoiceStore>) -> Self {
        Self::with_config(ledger, store, ObserverConfig::default())
    }

    pub fn with_config(
        ledger: Arc<dyn LedgerClient>,
        store: Arc<InvoiceStore>,
        config: ObserverConfig,
    ) -> Self {
        Self {
            ledger,
            store,
            config,
        }
    }

    pub fn spawn(&self, invoice_id: &str) -> ObserverHandle {
        let observer = self.clone();
        let invoice_id = invoice_id.to_string();
        ObserverHandle {
            handle: tokio::spawn(async move { observer.run(&invoice_id).await }),
        }
    }

    /// Poll until settlement is detected, the invoice leaves `Pending` by
    /// any means, or the attempt budget runs out. Returns the paid invoice
    /// when the loop ends in a settled state.
    pub async fn run(&self, invoice_id: &str) -> Option<Invoice> {
        let mut ruled_out: HashSet<String> = HashSet::new();

        for attempt in 0..self.config.max_attempts {
            let invoice = self.store.get(invoice_id)?;
            match invoice.status {
                InvoiceStatus::Pending => {}
                // Settled through another path while we were polling.
                InvoiceStatus::Paid => return Some(invoice),
                InvoiceStatus::Expired => return None,
            }

            match self.scan_once(&invoice, &mut ruled_out).await {
                Ok(Some(paid)) => return Some(paid),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(invoice_id = %invoice_id, error = %e, "observer poll failed")
                }
            }

            if attempt + 1 < self.config.max_attempts {
                tokio::time::sleep(self.config.interval).await;
            }
        }

        tracing::debug!(invoice_id = %invoice_id, "observer budget exhausted, invoice still pending");
        None
    }

    async fn scan_once(
        &self,
        invoice: &Invoice,
        ruled_out: &mut HashSet<String>,
    ) -> Result<Option<Invoice>> {
        let entries = self
            .ledger
            .recent_activity(&invoice.recipient, self.config.activity_limit)
            .await?;

        for entry in entries {
            if ruled_out.contains(&entry.signature) {
                continue;
            }
            if entry.err.is_some() {
                ruled_out.insert(entry.signature);
                continue;
            }
            // Pre-existing history cannot settle this invoice.
            if matches!(entry.block_time, Some(t) if t < invoice.created_at) {
                ruled_out.insert(entry.signature);
                continue;
            }

            let detail = match self.ledger.transaction_detail(&entry.signature).await {
                Ok(detail) => detail,
                Err(e) => {
                    // Possibly not indexed yet; inspect again next poll.
                    tracing::debug!(signature = %entry.signature, error = %e,
                        "transaction detail unavailable");
                    continue;
                }
            };

            let Some(delta) = recipient_delta(&detail, invoice) else {
                ruled_out.insert(entry.signature);
                continue;
            };

            if self.matches_amount(delta, invoice) {
                let mut candidate = invoice.clone();
                candidate.status = InvoiceStatus::Paid;
                candidate.signature = Some(entry.signature.clone());
                candidate.payer = derive_payer(&detail, &invoice.recipient);
                candidate.paid_at = detail
                    .block_time
                    .or(entry.block_time)
                    .or_else(|| Some(Utc::now()));
                let merged = self.store.merge(candidate);

                tracing::info!(invoice_id = %invoice.id, signature = %entry.signature,
                    delta, "settlement detected on ledger");
                let _ = write_audit_event(
                    &AuditEvent::new("payment_detected", &invoice.id, "paid")
                        .with_signature(entry.signature)
                        .with_fingerprint(invoice_fingerprint(&merged))
                        .with_parties(merged.payer.clone(), invoice.recipient.clone()),
                );
                return Ok(Some(merged));
            }

            tracing::debug!(signature = %entry.signature, delta, expected = invoice.amount,
                "delta outside tolerance");
            ruled_out.insert(entry.signature);
        }

        Ok(None)
    }

    fn matches_amount(&self, delta: f64, invoice: &Invoice) -> bool {
        if delta <= 0.0 {
            return false;
        }
        let expected = invoice.amount;
        let deviation = (delta - expected).abs();
        if deviation <= expected * self.config.relative_tolerance {
            return true;
        }
        // Direct native transfers can also deviate by a flat fee's worth.
        invoice.token == Token::Sol
            && deviation
                <= self.config.native_fee_tolerance_lamports as f64 / LAMPORTS_PER_SOL as f64
    }
}

/// Net amount the recipient gained in this transaction, in UI units of the
/// invoice's token.
fn recipient_delta(detail: &TransactionDetail, invoice: &Invoice) -> Option<f64> {
    match invoice.token {
        Token::Sol => {
            let index = detail
                .account_keys
                .iter()
                .position(|key| key == &invoice.recipient)?;
            detail
                .native_deltas
                .get(index)
                .map(|lamports| *lamports as f64 / LAMPORTS_PER_SOL as f64)
        }
        token => {
            let mint = TokenPolicy::of(token).mint?;
            detail
                .token_deltas
                .iter()
                .find(|d| d.owner == invoice.recipient && d.mint == mint)
                .map(|d| d.delta)
        }
    }
}

/// The counterparty whose native balance decreased the most — when the
/// transfer went through the gateway there usually is none attributable.
fn derive_payer(detail: &TransactionDetail, recipient: &str) -> Option<String> {
    detail
        .account_keys
        .iter()
        .zip(&detail.native_deltas)
        .filter(|(key, delta)| key.as_str() != recipient && **delta < 0)
        .min_by_key(|(_, delta)| **delta)
        .map(|(key, _)| key.clone())
}
