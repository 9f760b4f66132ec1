use crate::models::Token;
use once_cell::sync::Lazy;
use std::collections::HashMap;

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Per-token settlement policy. Minimums and fee percentages mirror what
/// the privacy gateway enforces, so a request below the minimum is rejected
/// locally before any transfer is attempted.
#[derive(Debug, Clone)]
pub struct TokenPolicy {
    pub token: Token,
    /// Smallest transferable amount, in UI units.
    pub min_transfer: f64,
    /// Gateway fee, as a fraction of the transferred amount.
    pub gateway_fee_pct: f64,
    pub decimals: u8,
    /// Mint address; present only for non-native tokens.
    pub mint: Option<&'static str>,
    /// Estimated flat network fee for one direct transfer, in native units.
    pub network_fee: f64,
}

static POLICIES: Lazy<HashMap<Token, TokenPolicy>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        Token::Sol,
        TokenPolicy {
            token: Token::Sol,
            min_transfer: 0.1,
            gateway_fee_pct: 0.025,
            decimals: 9,
            mint: None,
            network_fee: 0.000_005,
        },
    );
    m.insert(
        Token::Usdc,
        TokenPolicy {
            token: Token::Usdc,
            min_transfer: 1.0,
            gateway_fee_pct: 0.025,
            decimals: 6,
            mint: Some("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"),
            network_fee: 0.000_005,
        },
    );
    m
});

impl TokenPolicy {
    pub fn of(token: Token) -> &'static TokenPolicy {
        &POLICIES[&token]
    }

    pub fn meets_minimum(&self, amount: f64) -> bool {
        amount >= self.min_transfer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimums_per_token() {
        assert!(!TokenPolicy::of(Token::Sol).meets_minimum(0.05));
        assert!(TokenPolicy::of(Token::Sol).meets_minimum(0.1));
        assert!(!TokenPolicy::of(Token::Usdc).meets_minimum(0.5));
        assert!(TokenPolicy::of(Token::Usdc).meets_minimum(2.0));
    }

    #[test]
    fn only_non_native_tokens_carry_a_mint() {
        assert!(TokenPolicy::of(Token::Sol).mint.is_none());
        assert!(TokenPolicy::of(Token::Usdc).mint.is_some());
    }
}
