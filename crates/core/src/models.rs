use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

pub const MAX_DESCRIPTION_LEN: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Token {
    #[default]
    Sol,
    Usdc,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Sol => write!(f, "sol"),
            Token::Usdc => write!(f, "usdc"),
        }
    }
}

impl FromStr for Token {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sol" => Ok(Token::Sol),
            "usdc" => Ok(Token::Usdc),
            other => Err(anyhow::anyhow!("unknown token: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Direct,
    Gateway,
}

/// How much of the payer's identity and the amount a settlement should hide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyLevel {
    Direct,
    Private,
    Anonymous,
}

impl FromStr for PrivacyLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(PrivacyLevel::Direct),
            "private" => Ok(PrivacyLevel::Private),
            "anonymous" => Ok(PrivacyLevel::Anonymous),
            other => Err(anyhow::anyhow!("unknown privacy level: {other}")),
        }
    }
}

/// A payment request. `id`, `recipient`, `amount` and `token` are fixed at
/// creation; everything else is filled in by the settlement flow, the ledger
/// observer, or a merge from a shared link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: f64,
    #[serde(default)]
    pub token: Token,
    #[serde(default)]
    pub description: Option<String>,
    pub recipient: String,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub payer: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub paid_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
}

impl Invoice {
    pub fn new(
        id: impl Into<String>,
        amount: f64,
        token: Token,
        description: Option<String>,
        recipient: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            amount,
            token,
            description,
            recipient: recipient.into(),
            status: InvoiceStatus::Pending,
            payer: None,
            signature: None,
            created_at,
            paid_at: None,
            expires_at: None,
            is_anonymous: false,
            payment_method: None,
        }
        .normalized()
    }

    /// Coerce fields into their canonical shape. Applied on every store
    /// write so records arriving from links or older blobs never carry a
    /// negative/non-finite amount or an oversized description.
    pub fn normalized(mut self) -> Self {
        if !self.amount.is_finite() || self.amount < 0.0 {
            self.amount = 0.0;
        }
        if let Some(desc) = &mut self.description {
            if desc.len() > MAX_DESCRIPTION_LEN {
                desc.truncate(MAX_DESCRIPTION_LEN);
            }
        }
        self
    }

    pub fn is_paid(&self) -> bool {
        self.status == InvoiceStatus::Paid
    }

    pub fn is_past_expiry(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(t) if t <= now)
    }
}

/// Older records stored the amount as a string. Accept either form and fall
/// back to zero on garbage rather than rejecting the whole record.
fn lenient_amount<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer) {
        Ok(Raw::Num(n)) if n.is_finite() => n,
        Ok(Raw::Text(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_accepts_number_or_string() {
        let v: Invoice = serde_json::from_str(
            r#"{"id":"a","amount":"2.5","recipient":"R","status":"pending","created_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(v.amount, 2.5);

        let v: Invoice = serde_json::from_str(
            r#"{"id":"a","amount":"not a number","recipient":"R","status":"pending","created_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(v.amount, 0.0);
    }

    #[test]
    fn missing_token_defaults_to_native() {
        let v: Invoice = serde_json::from_str(
            r#"{"id":"a","amount":1,"recipient":"R","status":"pending","created_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(v.token, Token::Sol);
    }

    #[test]
    fn normalization_clamps_bad_amounts() {
        let v = Invoice::new("a", -3.0, Token::Sol, None, "R", Utc::now());
        assert_eq!(v.amount, 0.0);

        let long = "x".repeat(1000);
        let v = Invoice::new("a", 1.0, Token::Sol, Some(long), "R", Utc::now());
        assert_eq!(v.description.unwrap().len(), MAX_DESCRIPTION_LEN);
    }
}
