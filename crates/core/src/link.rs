use crate::models::{Invoice, InvoiceStatus, Token};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use url::Url;

/// Build a shareable payment link. The query parameters double as a
/// fallback data channel: a session that has no local copy of the invoice
/// can reconstruct a transient record from them.
pub fn build_share_link(base: &str, invoice: &Invoice) -> Result<String> {
    let mut url = Url::parse(base)
        .with_context(|| format!("invalid share link base: {base}"))?
        .join(&format!("invoice/{}", invoice.id))
        .context("failed to append invoice path")?;

    {
        let mut q = url.query_pairs_mut();
        q.append_pair("amount", &invoice.amount.to_string());
        q.append_pair("token", &invoice.token.to_string());
        if let Some(desc) = &invoice.description {
            q.append_pair("desc", desc);
        }
        q.append_pair("recipient", &invoice.recipient);
        q.append_pair("created", &invoice.created_at.to_rfc3339());
        if invoice.status == InvoiceStatus::Paid {
            q.append_pair("status", "paid");
            if let Some(sig) = &invoice.signature {
                q.append_pair("sig", sig);
            }
            if let Some(payer) = &invoice.payer {
                q.append_pair("payer", payer);
            }
        }
    }

    Ok(url.to_string())
}

/// Reconstruct a transient invoice from a shared link. The result must be
/// fed through the store's merge — a link claiming `paid` never overrides a
/// locally-held record, and a locally-paid record absorbs a stale pending
/// link.
pub fn parse_share_link(link: &str) -> Result<Invoice> {
    let url = Url::parse(link).with_context(|| format!("invalid share link: {link}"))?;

    let id = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(str::to_string)
        .filter(|s| !s.is_empty())
        .context("share link carries no invoice id")?;

    let mut amount = 0.0;
    let mut token = Token::default();
    let mut description = None;
    let mut recipient = None;
    let mut created_at = None;
    let mut status = InvoiceStatus::Pending;
    let mut signature = None;
    let mut payer = None;

    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "amount" => amount = value.trim().parse().unwrap_or(0.0),
            "token" => token = value.parse().unwrap_or_default(),
            "desc" => description = Some(value.into_owned()),
            "recipient" => recipient = Some(value.into_owned()),
            "created" => {
                created_at = DateTime::parse_from_rfc3339(&value)
                    .ok()
                    .map(|t| t.with_timezone(&Utc))
            }
            "status" if value == "paid" => status = InvoiceStatus::Paid,
            "sig" => signature = Some(value.into_owned()),
            "payer" => payer = Some(value.into_owned()),
            _ => {}
        }
    }

    let Some(recipient) = recipient else {
        bail!("share link carries no recipient");
    };

    let mut invoice = Invoice::new(
        id,
        amount,
        token,
        description,
        recipient,
        created_at.unwrap_or_else(Utc::now),
    );
    invoice.status = status;
    invoice.signature = signature;
    invoice.payer = payer;
    Ok(invoice)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_pending_invoice() {
        let invoice = Invoice::new(
            "inv-42",
            2.5,
            Token::Sol,
            Some("logo design".into()),
            "Recipient111",
            Utc::now(),
        );
        let link = build_share_link("https://pay.example.com/", &invoice).unwrap();
        let parsed = parse_share_link(&link).unwrap();

        assert_eq!(parsed.id, "inv-42");
        assert_eq!(parsed.amount, 2.5);
        assert_eq!(parsed.token, Token::Sol);
        assert_eq!(parsed.recipient, "Recipient111");
        assert_eq!(parsed.status, InvoiceStatus::Pending);
        assert_eq!(parsed.description.as_deref(), Some("logo design"));
    }

    #[test]
    fn paid_links_carry_settlement_evidence() {
        let mut invoice = Invoice::new("inv-7", 10.0, Token::Usdc, None, "R", Utc::now());
        invoice.status = InvoiceStatus::Paid;
        invoice.signature = Some("3".repeat(80));
        invoice.payer = Some("PayerAddr".into());

        let link = build_share_link("https://pay.example.com/", &invoice).unwrap();
        let parsed = parse_share_link(&link).unwrap();

        assert_eq!(parsed.status, InvoiceStatus::Paid);
        assert_eq!(parsed.signature.as_deref(), Some("3".repeat(80).as_str()));
        assert_eq!(parsed.payer.as_deref(), Some("PayerAddr"));
        assert_eq!(parsed.token, Token::Usdc);
    }

    #[test]
    fn rejects_links_without_recipient() {
        assert!(parse_share_link("https://pay.example.com/invoice/x?amount=1").is_err());
    }

    #[test]
    fn garbage_amount_falls_back_to_zero() {
        let parsed =
            parse_share_link("https://pay.example.com/invoice/x?amount=abc&recipient=R").unwrap();
        assert_eq!(parsed.amount, 0.0);
    }
}
