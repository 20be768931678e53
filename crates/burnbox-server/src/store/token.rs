use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};

/// Length of a retrieval token. 32 symbols over `[A-Za-z0-9]` is ~190 bits.
pub const TOKEN_LEN: usize = 32;

/// Mint a new retrieval token from the OS CSPRNG.
///
/// Nothing caller-supplied feeds into the token, so it can safely appear in
/// URLs, proxy logs and the like.
pub fn new_token() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// True if `token` has the shape produced by [`new_token`].
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Short prefix safe to put in logs. The full token is a capability.
pub fn hint(token: &str) -> &str {
    token.get(..6).unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn token_format() {
        let token = new_token();
        assert_eq!(token.len(), TOKEN_LEN);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(is_well_formed(&token));
    }

    #[test]
    fn tokens_are_unique() {
        let tokens: HashSet<String> = (0..1_000).map(|_| new_token()).collect();
        assert_eq!(tokens.len(), 1_000);
    }

    #[test]
    fn malformed_tokens_rejected() {
        assert!(!is_well_formed(""));
        assert!(!is_well_formed("short"));
        assert!(!is_well_formed(&"a".repeat(TOKEN_LEN + 1)));
        assert!(!is_well_formed(&format!("{}-", "a".repeat(TOKEN_LEN - 1))));
        assert!(!is_well_formed(&"é".repeat(TOKEN_LEN / 2)));
    }

    #[test]
    fn hint_is_a_prefix() {
        assert_eq!(hint("abcdefghij"), "abcdef");
        assert_eq!(hint("abc"), "abc");
    }
}
