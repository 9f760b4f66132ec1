use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// One line of the append-only settlement audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event_type: String,
    pub invoice_id: String,
    pub fingerprint: Option<String>,
    pub signature: Option<String>,
    pub state: String,
    pub error: Option<String>,
    pub payer: Option<String>,
    pub recipient: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: &str, invoice_id: &str, state: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            invoice_id: invoice_id.to_string(),
            fingerprint: None,
            signature: None,
            state: state.to_string(),
            error: None,
            payer: None,
            recipient: None,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn with_signature(mut self, signature: String) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_parties(mut self, payer: Option<String>, recipient: String) -> Self {
        self.payer = payer;
        self.recipient = Some(recipient);
        self
    }
}

fn audit_log_path() -> PathBuf {
    PathBuf::from("settlement_audit.jsonl")
}

pub fn write_audit_event(event: &AuditEvent) -> Result<()> {
    let path = audit_log_path();
    let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

    let json = serde_json::to_string(event)?;
    writeln!(file, "{}", json)?;
    tracing::debug!(event_type=%event.event_type, invoice_id=%event.invoice_id, "Audit event written");
    Ok(())
}
