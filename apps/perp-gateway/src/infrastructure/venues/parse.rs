//! Field extraction shared by the venue parsers.
//!
//! Every helper returns a [`ParseError`] instead of panicking. Numbers are
//! parsed straight from the wire text into [`Decimal`] so no precision is
//! lost to floating point.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::domain::market::timestamp_from_millis;

/// Malformed venue payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Required field absent or null.
    #[error("missing field '{0}'")]
    MissingField(String),

    /// Field present but not a decimal.
    #[error("invalid decimal in '{field}': {value}")]
    InvalidDecimal {
        /// Field name.
        field: String,
        /// Offending text.
        value: String,
    },

    /// Field present but not a millisecond timestamp.
    #[error("invalid timestamp in '{field}': {value}")]
    InvalidTimestamp {
        /// Field name.
        field: String,
        /// Offending text.
        value: String,
    },

    /// Field has the wrong JSON type.
    #[error("field '{field}' is not {expected}")]
    WrongType {
        /// Field name.
        field: String,
        /// Expected JSON type.
        expected: &'static str,
    },

    /// Frame carries a channel discriminator this parser does not handle.
    #[error("unexpected channel '{0}'")]
    WrongChannel(String),

    /// Field present with a value outside its domain.
    #[error("invalid value for '{field}': {value}")]
    InvalidValue {
        /// Field name.
        field: String,
        /// Offending text.
        value: String,
    },
}

impl ParseError {
    pub(crate) fn invalid_value(field: &str, value: impl ToString) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

/// Required field.
///
/// # Errors
///
/// `MissingField` when absent or null.
pub fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value, ParseError> {
    match value.get(name) {
        None | Some(Value::Null) => Err(ParseError::MissingField(name.to_string())),
        Some(v) => Ok(v),
    }
}

/// Required string field.
///
/// # Errors
///
/// `MissingField` or `WrongType`.
pub fn str_field<'a>(value: &'a Value, name: &str) -> Result<&'a str, ParseError> {
    field(value, name)?
        .as_str()
        .ok_or_else(|| ParseError::WrongType {
            field: name.to_string(),
            expected: "a string",
        })
}

/// Optional string field; absent, null, and non-string values read as `None`.
#[must_use]
pub fn opt_str_field<'a>(value: &'a Value, name: &str) -> Option<&'a str> {
    value.get(name).and_then(Value::as_str)
}

/// Required array field.
///
/// # Errors
///
/// `MissingField` or `WrongType`.
pub fn array_field<'a>(value: &'a Value, name: &str) -> Result<&'a [Value], ParseError> {
    as_array(field(value, name)?, name)
}

/// View `value` as an array.
///
/// # Errors
///
/// `WrongType` when it is not one.
pub fn as_array<'a>(value: &'a Value, name: &str) -> Result<&'a [Value], ParseError> {
    value
        .as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| ParseError::WrongType {
            field: name.to_string(),
            expected: "an array",
        })
}

/// Parse a decimal from a JSON string or number.
///
/// # Errors
///
/// `InvalidDecimal` for anything else.
pub fn decimal(value: &Value, name: &str) -> Result<Decimal, ParseError> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(ParseError::InvalidDecimal {
                field: name.to_string(),
                value: other.to_string(),
            });
        }
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| ParseError::InvalidDecimal {
            field: name.to_string(),
            value: text,
        })
}

/// Required decimal field.
///
/// # Errors
///
/// `MissingField` or `InvalidDecimal`.
pub fn decimal_field(value: &Value, name: &str) -> Result<Decimal, ParseError> {
    decimal(field(value, name)?, name)
}

/// Optional decimal field. Absent, null, and empty strings are `None`; a
/// present but malformed value is still an error.
///
/// # Errors
///
/// `InvalidDecimal`.
pub fn opt_decimal_field(value: &Value, name: &str) -> Result<Option<Decimal>, ParseError> {
    match value.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(v) => decimal(v, name).map(Some),
    }
}

/// Parse milliseconds since the epoch from a JSON number or numeric string.
///
/// # Errors
///
/// `InvalidTimestamp`.
pub fn millis(value: &Value, name: &str) -> Result<DateTime<Utc>, ParseError> {
    let invalid = || ParseError::InvalidTimestamp {
        field: name.to_string(),
        value: value.to_string(),
    };
    let ms = match value {
        Value::Number(n) => n.as_i64().ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    timestamp_from_millis(ms).ok_or_else(invalid)
}

/// Required millisecond timestamp field.
///
/// # Errors
///
/// `MissingField` or `InvalidTimestamp`.
pub fn millis_field(value: &Value, name: &str) -> Result<DateTime<Utc>, ParseError> {
    millis(field(value, name)?, name)
}

/// Optional millisecond timestamp field.
///
/// # Errors
///
/// `InvalidTimestamp` for a present but malformed value.
pub fn opt_millis_field(value: &Value, name: &str) -> Result<Option<DateTime<Utc>>, ParseError> {
    match value.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => millis(v, name).map(Some),
    }
}
