/// Ledger transaction signatures are base58-encoded 64-byte values, which
/// encode to somewhere between 64 and 88 characters. Anything outside that
/// shape cannot be looked up on the public ledger — the gateway sometimes
/// returns such internal-only references for pooled transfers.
const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

pub fn is_well_formed_signature(sig: &str) -> bool {
    (64..=88).contains(&sig.len()) && sig.chars().all(|c| BASE58_ALPHABET.contains(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_typical_signature() {
        let sig = "5VERv8NMvzbJMEkV8xnrLkEaWRtSz9CosKDYjCJjBRnbJLgp8uirBgmQpjKhoR4tjF3ZpRzrFmBV6UjKdiSZkQUW";
        assert!(is_well_formed_signature(sig));
    }

    #[test]
    fn rejects_short_and_non_base58_input() {
        assert!(!is_well_formed_signature("tooshort"));
        assert!(!is_well_formed_signature(&"0".repeat(80)));
        assert!(!is_well_formed_signature(&"l".repeat(80)));
        assert!(!is_well_formed_signature(&"a!b".repeat(30)));
        assert!(!is_well_formed_signature(""));
    }

    #[test]
    fn rejects_overlong_input() {
        assert!(!is_well_formed_signature(&"2".repeat(89)));
    }
}
