//! Mapping from raw user identities to container- and path-safe tokens.
//!
//! The front end hands us whatever identity it authenticated (an email, a
//! numeric id). Everything downstream (container names, workspace
//! directories, the identity header sent to the agent) uses the normalized
//! [`UserToken`] instead.

use std::fmt;

/// Normalized per-user identifier, restricted to `[a-z0-9_]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserToken(String);

impl UserToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for UserToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Rule for turning a raw identity into a token.
///
/// Distinct raw identities are assumed not to collide; no collision
/// detection is performed.
pub trait IdentityNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> UserToken;
}

/// Lower-cases the identity and replaces every character outside
/// `[a-z0-9]` with `_`. Replacement counts UTF-16 code units, so a
/// character outside the Basic Multilingual Plane becomes `__`.
///
/// `alice@example.com` becomes `alice_example_com`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SanitizingNormalizer;

impl IdentityNormalizer for SanitizingNormalizer {
    fn normalize(&self, raw: &str) -> UserToken {
        let mut token = String::with_capacity(raw.len());
        for c in raw.chars().flat_map(char::to_lowercase) {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                token.push(c);
            } else {
                // One `_` per UTF-16 unit: astral characters take two.
                token.extend(std::iter::repeat_n('_', c.len_utf16()));
            }
        }
        UserToken(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(raw: &str) -> String {
        SanitizingNormalizer.normalize(raw).to_string()
    }

    #[test]
    fn email_is_lowercased_and_sanitized() {
        assert_eq!(normalize("Alice.Smith@Example.com"), "alice_smith_example_com");
    }

    #[test]
    fn numeric_id_passes_through() {
        assert_eq!(normalize("12345"), "12345");
    }

    #[test]
    fn already_normalized_token_is_stable() {
        assert_eq!(normalize("a_b"), "a_b");
        assert_eq!(normalize(&normalize("New+User@x.io")), normalize("New+User@x.io"));
    }

    #[test]
    fn non_ascii_becomes_underscore() {
        assert_eq!(normalize("jörg"), "j_rg");
    }

    #[test]
    fn astral_character_becomes_two_underscores() {
        assert_eq!(normalize("a\u{1F4A5}b"), "a__b");
        assert_eq!(normalize("\u{1D400}@x.io"), "___x_io");
    }

    #[test]
    fn empty_input_yields_empty_token() {
        assert!(SanitizingNormalizer.normalize("").is_empty());
    }

    #[test]
    fn output_alphabet_is_restricted() {
        let token = normalize("We!rd <Name> 💥 /../etc");
        assert!(
            token
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
            "got: {}",
            token
        );
    }
}
