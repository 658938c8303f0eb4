//! Semantic equality of serialized YAML documents.
//!
//! Two documents are equal when they parse to the same structure. Formatting,
//! mapping key order, quoting style, comments and anchors do not matter.

use serde_yaml_ng::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid YAML: {message}")]
pub struct YamlError {
    pub message: String,
}

impl From<serde_yaml_ng::Error> for YamlError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self {
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum YamlVerdict {
    Equal,
    Different,
    /// One of the documents could not be parsed; counts as different.
    Unparsable { side: Side, error: YamlError },
}

impl YamlVerdict {
    pub fn is_equal(&self) -> bool {
        matches!(self, YamlVerdict::Equal)
    }
}

pub fn parse(doc: &str) -> Result<Value, YamlError> {
    Ok(serde_yaml_ng::from_str(doc)?)
}

pub fn compare(a: Option<&str>, b: Option<&str>) -> YamlVerdict {
    let (a, b) = match (a, b) {
        (None, None) => return YamlVerdict::Equal,
        (Some(a), Some(b)) if a == b => return YamlVerdict::Equal,
        (Some(a), Some(b)) => (a, b),
        _ => return YamlVerdict::Different,
    };

    let left = match parse(a) {
        Ok(v) => v,
        Err(error) => {
            return YamlVerdict::Unparsable {
                side: Side::Left,
                error,
            }
        }
    };
    let right = match parse(b) {
        Ok(v) => v,
        Err(error) => {
            return YamlVerdict::Unparsable {
                side: Side::Right,
                error,
            }
        }
    };

    // Mapping equality ignores insertion order.
    if left == right {
        YamlVerdict::Equal
    } else {
        YamlVerdict::Different
    }
}

pub fn equal(a: Option<&str>, b: Option<&str>) -> bool {
    compare(a, b).is_equal()
}
