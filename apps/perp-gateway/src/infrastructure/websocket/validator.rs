//! Inbound message validation.
//!
//! Checks run in order: non-empty, size, JSON object, type field, required
//! fields. The first failure wins.

use serde_json::Value;

/// Default largest accepted frame (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Validation rules for one venue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorConfig {
    /// Largest accepted frame in bytes.
    pub max_message_size: usize,
    /// Field that must be present and a string, if any.
    pub type_field: Option<String>,
    /// Top-level fields that must be present.
    pub required_fields: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            type_field: None,
            required_fields: Vec::new(),
        }
    }
}

impl ValidatorConfig {
    /// Require a string discriminator field.
    #[must_use]
    pub fn with_type_field(mut self, field: impl Into<String>) -> Self {
        self.type_field = Some(field.into());
        self
    }

    /// Override the size limit.
    #[must_use]
    pub const fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

/// Validation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Frame was empty.
    #[error("empty message")]
    Empty,

    /// Frame exceeded the size limit.
    #[error("message size {size} exceeds limit {max}")]
    TooLarge {
        /// Frame size in bytes.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Frame was not a JSON object.
    #[error("invalid json: {0}")]
    InvalidJson(String),

    /// Discriminator field missing or not a string.
    #[error("missing type field '{0}'")]
    MissingTypeField(String),

    /// Required field missing.
    #[error("missing required field '{0}'")]
    MissingField(String),
}

/// Validates raw frames before parsing.
#[derive(Debug, Clone, Default)]
pub struct MessageValidator {
    config: ValidatorConfig,
}

impl MessageValidator {
    /// Create a validator.
    #[must_use]
    pub const fn new(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validation rules in use.
    #[must_use]
    pub const fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validate `raw` and return the decoded JSON object.
    ///
    /// # Errors
    ///
    /// Returns the first rule the frame breaks.
    pub fn validate(&self, raw: &str) -> Result<Value, ValidationError> {
        if raw.trim().is_empty() {
            return Err(ValidationError::Empty);
        }
        if raw.len() > self.config.max_message_size {
            return Err(ValidationError::TooLarge {
                size: raw.len(),
                max: self.config.max_message_size,
            });
        }

        let value: Value =
            serde_json::from_str(raw).map_err(|e| ValidationError::InvalidJson(e.to_string()))?;
        let Some(object) = value.as_object() else {
            return Err(ValidationError::InvalidJson("not an object".to_string()));
        };

        if let Some(field) = &self.config.type_field {
            if !object.get(field).is_some_and(Value::is_string) {
                return Err(ValidationError::MissingTypeField(field.clone()));
            }
        }

        if let Some(missing) = self
            .config
            .required_fields
            .iter()
            .find(|field| !object.contains_key(field.as_str()))
        {
            return Err(ValidationError::MissingField(missing.clone()));
        }

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn channel_validator() -> MessageValidator {
        MessageValidator::new(ValidatorConfig {
            max_message_size: 64,
            type_field: Some("channel".to_string()),
            required_fields: vec!["data".to_string()],
        })
    }

    #[test]
    fn accepts_valid_frame() {
        let value = channel_validator()
            .validate(r#"{"channel":"l2Book","data":{}}"#)
            .unwrap();
        assert_eq!(value["channel"], "l2Book");
    }

    #[test_case("", ValidationError::Empty ; "empty")]
    #[test_case("   ", ValidationError::Empty ; "whitespace")]
    #[test_case(r#"{"data":1}"#, ValidationError::MissingTypeField("channel".into()) ; "no channel")]
    #[test_case(r#"{"channel":5,"data":1}"#, ValidationError::MissingTypeField("channel".into()) ; "non string channel")]
    #[test_case(r#"{"channel":"trades"}"#, ValidationError::MissingField("data".into()) ; "no data")]
    fn rejects(raw: &str, expected: ValidationError) {
        assert_eq!(channel_validator().validate(raw), Err(expected));
    }

    #[test]
    fn rejects_oversized_frame() {
        let raw = format!(r#"{{"channel":"{}","data":1}}"#, "x".repeat(80));
        assert!(matches!(
            channel_validator().validate(&raw),
            Err(ValidationError::TooLarge { max: 64, .. })
        ));
    }

    #[test]
    fn rejects_non_object_json() {
        assert!(matches!(
            MessageValidator::default().validate("[1,2]"),
            Err(ValidationError::InvalidJson(_))
        ));
        assert!(matches!(
            MessageValidator::default().validate("{oops"),
            Err(ValidationError::InvalidJson(_))
        ));
    }
}
