//! Opaque `$skiptoken` cursors.
//!
//! A token is base64url (no padding) over a small JSON document:
//!
//! ```text
//! {"v":1,"k":["'Ann'","7"],"s":"+Name,+Id","f":"3f2a..."}
//! ```
//!
//! `k` holds the ordering values of the last item on the previous page as
//! OData literals, `s` the signed order signature the keys belong to and `f`
//! the hash of the row-membership options. Queries whose ordering does not
//! cover the stable keys resume by offset (`n`) instead of keys. When the
//! client asked for `$top`, `t` carries how many rows it still expects.

use std::cmp::Ordering;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use odata_edm::Value;
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ValidationError};
use crate::syntax::ast::SortDir;
use crate::syntax::lexer::parse_literal;

const OPTION: &str = "$skiptoken";
const VERSION: u8 = 1;

#[derive(Clone, Debug, PartialEq)]
pub struct SkipToken {
    /// Ordering values of the last returned item.
    pub keys: Vec<Value>,
    /// Absolute position to resume from when there is no ordering.
    pub offset: Option<usize>,
    pub order: String,
    pub filter_hash: Option<String>,
    /// Rows still owed to a client `$top` after the pages already served.
    pub remaining_top: Option<usize>,
}

#[derive(Serialize, Deserialize)]
struct Wire {
    v: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    k: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    n: Option<usize>,
    s: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    f: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    t: Option<usize>,
}

/// Enum keys travel as their underlying integer so decoding needs no model.
fn normalize(v: &Value) -> Value {
    match v {
        Value::Enum(e) => Value::Int(e.value),
        other => other.clone(),
    }
}

impl SkipToken {
    #[must_use]
    pub fn keyset(keys: &[Value], order: impl Into<String>, filter_hash: Option<String>) -> Self {
        Self {
            keys: keys.iter().map(normalize).collect(),
            offset: None,
            order: order.into(),
            filter_hash,
            remaining_top: None,
        }
    }

    #[must_use]
    pub fn offset(offset: usize, order: impl Into<String>, filter_hash: Option<String>) -> Self {
        Self {
            keys: Vec::new(),
            offset: Some(offset),
            order: order.into(),
            filter_hash,
            remaining_top: None,
        }
    }

    #[must_use]
    pub const fn with_remaining_top(mut self, remaining: Option<usize>) -> Self {
        self.remaining_top = remaining;
        self
    }

    /// Encode to a URL-safe token.
    ///
    /// # Errors
    /// Returns a JSON serialization error if encoding fails.
    pub fn encode(&self) -> serde_json::Result<String> {
        let wire = Wire {
            v: VERSION,
            k: self.keys.iter().map(Value::to_literal).collect(),
            n: self.offset,
            s: self.order.clone(),
            f: self.filter_hash.clone(),
            t: self.remaining_top,
        };
        serde_json::to_vec(&wire).map(|bytes| URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Decode a token produced by [`SkipToken::encode`].
    ///
    /// # Errors
    /// Returns [`ParseError`] for bad base64, bad JSON, an unknown version or
    /// a key that is not a literal.
    pub fn decode(token: &str) -> Result<Self, ParseError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| ParseError::new(OPTION, "invalid base64url encoding", 0, token))?;
        let wire: Wire = serde_json::from_slice(&bytes)
            .map_err(|_| ParseError::new(OPTION, "invalid token payload", 0, token))?;
        if wire.v != VERSION {
            return Err(ParseError::new(OPTION, "unsupported token version", 0, token));
        }
        if wire.k.is_empty() == wire.n.is_none() {
            return Err(ParseError::new(
                OPTION,
                "token must carry either keys or an offset",
                0,
                token,
            ));
        }
        let keys = wire
            .k
            .iter()
            .map(|k| parse_literal(OPTION, k))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            keys,
            offset: wire.n,
            order: wire.s,
            filter_hash: wire.f,
            remaining_top: wire.t,
        })
    }

    /// Check the token was issued for the same ordering and row membership.
    ///
    /// # Errors
    /// Returns [`ValidationError::SkipTokenMismatch`] naming what differs.
    pub fn validate_against(
        &self,
        order: &str,
        key_count: usize,
        filter_hash: Option<&str>,
    ) -> Result<(), ValidationError> {
        if self.order != order {
            return Err(ValidationError::SkipTokenMismatch("ordering differs"));
        }
        if self.filter_hash.as_deref() != filter_hash {
            return Err(ValidationError::SkipTokenMismatch("filter differs"));
        }
        let expected = if self.offset.is_some() { 0 } else { key_count };
        if self.keys.len() != expected {
            return Err(ValidationError::SkipTokenMismatch("key count differs"));
        }
        Ok(())
    }

    /// Whether an item with ordering values `item` comes strictly after the
    /// token position under `directions`.
    #[must_use]
    pub fn is_after(&self, item: &[Value], directions: &[SortDir]) -> bool {
        for ((value, key), dir) in item.iter().zip(&self.keys).zip(directions) {
            let ord = normalize(value).sort_cmp(key);
            let ord = match dir {
                SortDir::Asc => ord,
                SortDir::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord == Ordering::Greater;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_edm::EnumValue;

    #[test]
    fn token_survives_encoding() {
        let token = SkipToken::keyset(
            &[Value::from("O'Neil"), Value::Int(7), Value::Null],
            "+Name,+Id,-Score",
            Some("abcd".to_owned()),
        )
        .with_remaining_top(Some(3));
        let text = token.encode().unwrap();
        assert!(!text.contains(['+', '/', '=']));
        assert_eq!(SkipToken::decode(&text).unwrap(), token);
    }

    #[test]
    fn enum_keys_become_integers() {
        let color = EnumValue {
            type_name: "Ns.Color".into(),
            member: "Red".into(),
            value: 1,
        };
        let token = SkipToken::keyset(&[Value::Enum(color.clone())], "+Color", None);
        assert_eq!(token.keys, vec![Value::Int(1)]);
        assert!(!token.is_after(&[Value::Enum(color)], &[SortDir::Asc]));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(SkipToken::decode("!!!").unwrap_err().option, "$skiptoken");
        let not_json = URL_SAFE_NO_PAD.encode(b"nope");
        assert!(SkipToken::decode(&not_json).is_err());
        let v2 = URL_SAFE_NO_PAD.encode(br#"{"v":2,"n":3,"s":""}"#);
        assert!(SkipToken::decode(&v2).unwrap_err().message.contains("version"));
        let neither = URL_SAFE_NO_PAD.encode(br#"{"v":1,"s":"+Id"}"#);
        assert!(SkipToken::decode(&neither).is_err());
    }

    #[test]
    fn mismatches_are_reported() {
        let token = SkipToken::keyset(&[Value::Int(3)], "+Id", Some("h1".to_owned()));
        assert!(token.validate_against("+Id", 1, Some("h1")).is_ok());
        assert_eq!(
            token.validate_against("-Id", 1, Some("h1")),
            Err(ValidationError::SkipTokenMismatch("ordering differs"))
        );
        assert_eq!(
            token.validate_against("+Id", 1, None),
            Err(ValidationError::SkipTokenMismatch("filter differs"))
        );
        assert!(token.validate_against("+Id", 2, Some("h1")).is_err());
    }

    #[test]
    fn keyset_comparison_honours_direction() {
        let token = SkipToken::keyset(&[Value::from("b"), Value::Int(2)], "+Name,-Id", None);
        let dirs = [SortDir::Asc, SortDir::Desc];
        assert!(token.is_after(&[Value::from("b"), Value::Int(1)], &dirs));
        assert!(!token.is_after(&[Value::from("b"), Value::Int(2)], &dirs));
        assert!(!token.is_after(&[Value::from("b"), Value::Int(3)], &dirs));
        assert!(token.is_after(&[Value::from("c"), Value::Int(9)], &dirs));
        assert!(!token.is_after(&[Value::Null, Value::Int(0)], &dirs));
    }
}
