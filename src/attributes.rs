use std::collections::HashMap;

use derive_more::From;
use serde::{Deserialize, Serialize};

/// Type alias for a HashMap representing key-value pairs of attributes.
///
/// # Examples
/// ```
/// # use splitio::{Attributes, AttributeValue};
/// let attributes = [
///     ("age".to_owned(), 30.0.into()),
///     ("is_premium_member".to_owned(), true.into()),
///     ("username".to_owned(), "john_doe".into()),
///     ("groups".to_owned(), vec!["beta".to_owned(), "staff".to_owned()].into()),
/// ].into_iter().collect::<Attributes>();
/// ```
pub type Attributes = HashMap<String, AttributeValue>;

/// Enum representing possible values of an attribute passed to an evaluation.
///
/// Conveniently implements `From` conversions for `String`, `&str`, `f64`, `bool` and
/// `Vec<String>`.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A string value.
    String(String),
    /// A numerical value. Datetime attributes are numbers holding epoch milliseconds.
    Number(f64),
    /// A boolean value.
    Boolean(bool),
    /// A set of strings, used by the set matchers.
    List(Vec<String>),
    /// A null value or absence of value.
    Null,
}

impl AttributeValue {
    /// Return the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        if let AttributeValue::String(s) = self {
            Some(s.as_str())
        } else {
            None
        }
    }

    /// Interpret the value as an integer.
    ///
    /// Numbers with a fractional part do not qualify. Strings holding an integer literal do.
    pub(crate) fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Number(n) if n.fract() == 0.0 && n.is_finite() => Some(*n as i64),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Interpret the value as a boolean. Accepts `"true"`/`"false"` strings in any case.
    pub(crate) fn as_boolean(&self) -> Option<bool> {
        match self {
            AttributeValue::Boolean(b) => Some(*b),
            AttributeValue::String(s) => s.to_lowercase().parse().ok(),
            _ => None,
        }
    }

    pub(crate) fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::List(l) => Some(l),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}
