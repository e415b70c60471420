//! Shared value types used across subsystems.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Error;

/// Free-form string labels attached to keys and wallets.
pub type Tags = HashMap<String, String>;

/// One page of results plus an opaque continuation token.
///
/// `next_token` is `None` when the listing is exhausted. Tokens are only
/// meaningful when passed back to the operation that produced them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items in this page, at most the requested limit.
    pub items: Vec<T>,
    /// Token for the next page, if any.
    pub next_token: Option<String>,
}

impl<T> Page<T> {
    /// A page with no items and no continuation.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            next_token: None,
        }
    }
}

/// Encode a cursor value as an opaque continuation token.
pub fn encode_token<C: Serialize>(cursor: &C) -> String {
    let json = serde_json::to_vec(cursor).expect("cursor serializes");
    URL_SAFE_NO_PAD.encode(json)
}

/// Decode a continuation token produced by [`encode_token`].
///
/// # Errors
/// Returns [`Error::InvalidInput`] on tokens this service did not mint.
pub fn decode_token<C: DeserializeOwned>(token: &str) -> Result<C, Error> {
    let json = URL_SAFE_NO_PAD
        .decode(token)
        .map_err(|_| Error::InvalidInput("malformed continuation token".to_string()))?;
    serde_json::from_slice(&json)
        .map_err(|_| Error::InvalidInput("malformed continuation token".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Cursor {
        after: String,
    }

    #[test]
    fn tokens_round_trip() {
        let cursor = Cursor {
            after: "2024-01-01T00:00:00Z|42".to_string(),
        };
        let token = encode_token(&cursor);
        assert_eq!(decode_token::<Cursor>(&token).expect("decodes"), cursor);
    }

    #[test]
    fn foreign_tokens_are_rejected() {
        assert!(decode_token::<Cursor>("definitely not a token").is_err());
        let not_json = URL_SAFE_NO_PAD.encode(b"plain text");
        assert!(decode_token::<Cursor>(&not_json).is_err());
    }
}
