use crate::models::{Invoice, InvoiceStatus};

/// Reconcile a candidate record into the stored one.
///
/// Every field is taken from the candidate except the four that carry
/// settlement evidence: `status` keeps `Paid` absorbing, and `signature`,
/// `payer` and `paid_at` keep the first non-empty value ever written.
/// Repeated or out-of-order merges converge to the same record, which is
/// what lets the payer's flow, the passive observer and a reconstructed
/// shared link all write concurrently without losing a paid state.
pub fn merge_invoice(existing: &Invoice, candidate: &Invoice) -> Invoice {
    let mut merged = candidate.clone().normalized();
    merged.id = existing.id.clone();

    merged.status = if existing.status == InvoiceStatus::Paid {
        InvoiceStatus::Paid
    } else {
        candidate.status
    };
    merged.signature = first_non_empty(&existing.signature, &candidate.signature);
    merged.payer = first_non_empty(&existing.payer, &candidate.payer);
    merged.paid_at = existing.paid_at.or(candidate.paid_at);

    merged
}

fn first_non_empty(existing: &Option<String>, candidate: &Option<String>) -> Option<String> {
    match existing {
        Some(s) if !s.is_empty() => Some(s.clone()),
        _ => candidate.clone().filter(|s| !s.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Token;
    use chrono::Utc;

    fn base() -> Invoice {
        Invoice::new("inv-1", 2.5, Token::Sol, None, "RecipientAddr", Utc::now())
    }

    #[test]
    fn paid_never_regresses_to_pending() {
        let mut paid = base();
        paid.status = InvoiceStatus::Paid;
        paid.signature = Some("sig".into());

        let pending = base();
        let merged = merge_invoice(&paid, &pending);
        assert_eq!(merged.status, InvoiceStatus::Paid);
    }

    #[test]
    fn evidence_fields_fill_once() {
        let mut existing = base();
        existing.signature = Some("first".into());
        existing.payer = Some("P1".into());

        let mut candidate = base();
        candidate.signature = Some("second".into());
        candidate.payer = Some("P2".into());

        let merged = merge_invoice(&existing, &candidate);
        assert_eq!(merged.signature.as_deref(), Some("first"));
        assert_eq!(merged.payer.as_deref(), Some("P1"));
    }

    #[test]
    fn empty_strings_do_not_claim_the_slot() {
        let mut existing = base();
        existing.signature = Some(String::new());

        let mut candidate = base();
        candidate.signature = Some("real".into());

        let merged = merge_invoice(&existing, &candidate);
        assert_eq!(merged.signature.as_deref(), Some("real"));
    }

    #[test]
    fn merge_is_idempotent() {
        let existing = base();
        let mut candidate = base();
        candidate.status = InvoiceStatus::Paid;
        candidate.signature = Some("sig".into());
        candidate.paid_at = Some(Utc::now());

        let once = merge_invoice(&existing, &candidate);
        let twice = merge_invoice(&once, &candidate);
        assert_eq!(once, twice);
    }

    #[test]
    fn paid_absorbs_in_either_order() {
        let start = base();

        let mut paid = base();
        paid.status = InvoiceStatus::Paid;
        paid.signature = Some("sig".into());
        let pending = base();

        let ab = merge_invoice(&merge_invoice(&start, &paid), &pending);
        let ba = merge_invoice(&merge_invoice(&start, &pending), &paid);
        assert_eq!(ab.status, InvoiceStatus::Paid);
        assert_eq!(ba.status, InvoiceStatus::Paid);
        assert_eq!(ab.signature, ba.signature);
    }

    #[test]
    fn non_evidence_fields_follow_the_candidate() {
        let existing = base();
        let mut candidate = base();
        candidate.description = Some("updated".into());
        candidate.is_anonymous = true;

        let merged = merge_invoice(&existing, &candidate);
        assert_eq!(merged.description.as_deref(), Some("updated"));
        assert!(merged.is_anonymous);
    }
}
