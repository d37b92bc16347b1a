//! Strict-mode event validation.

use crate::{Event, ValidationError};
use serde_json::Value;

/// Decides whether an event may enter the store in strict mode.
pub trait EventValidator: Send + Sync {
    fn validate(&self, event: &Event) -> Result<(), ValidationError>;
}

/// Accepts non-empty JSON objects that carry every required top-level field.
#[derive(Debug, Clone, Default)]
pub struct JsonEventValidator {
    required_fields: Vec<String>,
}

impl JsonEventValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_required_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required_fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn require_field(mut self, field: impl Into<String>) -> Self {
        self.required_fields.push(field.into());
        self
    }
}

impl EventValidator for JsonEventValidator {
    fn validate(&self, event: &Event) -> Result<(), ValidationError> {
        if event.is_empty() {
            return Err(ValidationError::Empty);
        }

        let value: Value = serde_json::from_slice(event.as_bytes())
            .map_err(|e| ValidationError::NotJson(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(ValidationError::NotAnObject);
        };

        for field in &self.required_fields {
            match object.get(field) {
                None | Some(Value::Null) => {
                    return Err(ValidationError::MissingField(field.clone()))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}
