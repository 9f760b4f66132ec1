use crate::error::SettlementError;
use veilpay_core::{tokens::TokenPolicy, Invoice, PrivacyLevel};
use gateway::TransferType;

/// Concrete transfer path for one settlement attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementPlan {
    /// Plain ledger transfer from payer to recipient.
    Direct,
    Gateway {
        transfer_type: TransferType,
        /// Retry once as an external transfer when the recipient is not
        /// resolvable in the pool. Delivery guarantee over full privacy;
        /// callers surface the downgrade.
        fallback_external: bool,
    },
}

/// Map the payer's requested privacy level to a transfer plan. Rejects
/// amounts below the token minimum before any network call happens.
pub fn select_plan(
    level: PrivacyLevel,
    invoice: &Invoice,
) -> Result<SettlementPlan, SettlementError> {
    let policy = TokenPolicy::of(invoice.token);
    if !policy.meets_minimum(invoice.amount) {
        return Err(SettlementError::BelowMinimum {
            minimum: policy.min_transfer,
            token: invoice.token,
        });
    }

    Ok(match level {
        PrivacyLevel::Direct => SettlementPlan::Direct,
        PrivacyLevel::Private => SettlementPlan::Gateway {
            transfer_type: TransferType::Internal,
            fallback_external: true,
        },
        PrivacyLevel::Anonymous => SettlementPlan::Gateway {
            transfer_type: TransferType::External,
            fallback_external: false,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use veilpay_core::Token;

    fn invoice(amount: f64, token: Token) -> Invoice {
        Invoice::new("inv", amount, token, None, "R", Utc::now())
    }

    #[test]
    fn below_minimum_is_rejected_for_every_level() {
        for level in [
            PrivacyLevel::Direct,
            PrivacyLevel::Private,
            PrivacyLevel::Anonymous,
        ] {
            let result = select_plan(level, &invoice(0.05, Token::Sol));
            assert!(matches!(
                result,
                Err(SettlementError::BelowMinimum { minimum, token: Token::Sol }) if minimum == 0.1
            ));
        }
    }

    #[test]
    fn levels_map_to_their_transfer_paths() {
        let inv = invoice(2.5, Token::Sol);
        assert_eq!(
            select_plan(PrivacyLevel::Direct, &inv).unwrap(),
            SettlementPlan::Direct
        );
        assert_eq!(
            select_plan(PrivacyLevel::Private, &inv).unwrap(),
            SettlementPlan::Gateway {
                transfer_type: TransferType::Internal,
                fallback_external: true,
            }
        );
        assert_eq!(
            select_plan(PrivacyLevel::Anonymous, &inv).unwrap(),
            SettlementPlan::Gateway {
                transfer_type: TransferType::External,
                fallback_external: false,
            }
        );
    }
}
