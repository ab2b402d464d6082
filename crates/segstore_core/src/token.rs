//! Position tokens.
//!
//! A [`Token`] is a bookmark minted by [`crate::Store::save`] and redeemed by
//! [`crate::Store::resume`]. It is a plain value: holding one pins no
//! resource. Redeeming consumes the token by move, and the store forgets
//! its identity, so a reconstructed copy (for example decoded from bytes a
//! caller persisted) is rejected with [`crate::CoreError::UnknownToken`].

use std::fmt;
use std::sync::Arc;

/// Backend identity of a segment.
///
/// The integer identity is assigned by the backend (a sequence number for
/// the bundled backends). Backends that address segments by name also carry
/// the name; equality covers both parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenId {
    id: i64,
    name: Option<Arc<str>>,
}

impl TokenId {
    /// Creates a purely numeric identity.
    #[must_use]
    pub const fn numbered(id: i64) -> Self {
        Self { id, name: None }
    }

    /// Creates an identity that also carries a name.
    #[must_use]
    pub fn named(id: i64, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: Some(name.into()),
        }
    }

    /// Returns the integer identity.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Returns the name, if the backend assigned one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "#{}", self.id),
        }
    }
}

/// A single-use bookmark into a store's chain.
///
/// Tokens are deliberately not `Clone`: [`crate::Store::resume`] takes the
/// token by value.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Token(TokenId);

impl Token {
    pub(crate) fn new(identity: TokenId) -> Self {
        Self(identity)
    }

    /// Returns the backend identity of the bookmarked segment.
    #[must_use]
    pub fn identity(&self) -> &TokenId {
        &self.0
    }

    /// Returns the integer identity.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.0.id()
    }

    pub(crate) fn into_identity(self) -> TokenId {
        self.0
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn numbered_and_named_differ() {
        let a = TokenId::numbered(7);
        let b = TokenId::named(7, "0000000000007-000007");
        assert_ne!(a, b);
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn named_equality_uses_name() {
        let a = TokenId::named(1, "x");
        let b = TokenId::named(1, String::from("x"));
        assert_eq!(a, b);

        let mut table = HashMap::new();
        table.insert(a, 10usize);
        assert_eq!(table.get(&b), Some(&10));
    }

    #[test]
    fn display_forms() {
        assert_eq!(TokenId::numbered(12).to_string(), "#12");
        assert_eq!(TokenId::named(3, "stem").to_string(), "stem");
        assert_eq!(Token::new(TokenId::numbered(-1)).to_string(), "#-1");
    }
}
