//! Structural message filters.
//!
//! A filter is itself a JSON value, interpreted as a pattern:
//! - `{}` matches every message
//! - an object pattern requires each of its keys to be present in the
//!   message with a recursively matching value, so `{"Ping": {}}` matches
//!   any message tagged `Ping` and `{"Ping": {"ty": "P"}}` additionally
//!   constrains a nested field
//! - arrays match element-wise and must have equal length
//! - scalars match by equality

use crate::Message;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A structural pattern over [`Message`]s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter(Value);

impl Filter {
    /// Filter matching every message.
    pub fn any() -> Self {
        Self(Value::Object(serde_json::Map::new()))
    }

    /// Filter from a JSON pattern.
    pub fn new(pattern: Value) -> Self {
        Self(pattern)
    }

    /// Does `msg` structurally match this pattern?
    pub fn matches(&self, msg: &Message) -> bool {
        matches_value(&self.0, msg)
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::any()
    }
}

impl From<Value> for Filter {
    fn from(pattern: Value) -> Self {
        Self::new(pattern)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn matches_value(pattern: &Value, value: &Value) -> bool {
    match pattern {
        Value::Object(fields) => {
            // Empty pattern is the match-all wildcard at any depth.
            if fields.is_empty() {
                return true;
            }
            match value {
                Value::Object(target) => fields
                    .iter()
                    .all(|(key, sub)| target.get(key).is_some_and(|v| matches_value(sub, v))),
                _ => false,
            }
        }
        Value::Array(items) => match value {
            Value::Array(target) => {
                items.len() == target.len()
                    && items.iter().zip(target).all(|(sub, v)| matches_value(sub, v))
            }
            _ => false,
        },
        scalar => scalar == value,
    }
}
