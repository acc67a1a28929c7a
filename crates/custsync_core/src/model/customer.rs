//! Customer domain model.
//!
//! # Invariants
//! - `local_id` is assigned by the local store and never reused.
//! - `email` is unique within the local store.
//! - Field equality (`name`, `email`) is the only drift criterion.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Identifier assigned by the local store.
pub type LocalId = i64;

/// Identifier assigned by the remote directory (e.g. `cus_123`).
pub type ExternalId = String;

/// Mutable customer fields shared by both sides of the sync.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerFields {
    pub name: String,
    pub email: String,
}

impl CustomerFields {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Validates field-level invariants before any persistence or publish.
    pub fn validate(&self) -> Result<(), CustomerValidationError> {
        if self.name.trim().is_empty() {
            return Err(CustomerValidationError::EmptyName);
        }
        if !EMAIL_RE.is_match(self.email.as_str()) {
            return Err(CustomerValidationError::InvalidEmail(self.email.clone()));
        }
        Ok(())
    }
}

/// Local-side customer entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub local_id: LocalId,
    pub name: String,
    pub email: String,
}

impl Customer {
    pub fn fields(&self) -> CustomerFields {
        CustomerFields::new(self.name.clone(), self.email.clone())
    }

    /// Returns whether this record already carries exactly `fields`.
    pub fn matches(&self, fields: &CustomerFields) -> bool {
        self.name == fields.name && self.email == fields.email
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerValidationError {
    EmptyName,
    InvalidEmail(String),
    /// Another local customer already owns this email.
    DuplicateEmail(String),
}

impl Display for CustomerValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "customer name must not be empty"),
            Self::InvalidEmail(value) => write!(f, "invalid customer email `{value}`"),
            Self::DuplicateEmail(value) => write!(f, "customer email already in use: `{value}`"),
        }
    }
}

impl Error for CustomerValidationError {}

#[cfg(test)]
mod tests {
    use super::{Customer, CustomerFields, CustomerValidationError};

    #[test]
    fn validate_accepts_plain_address() {
        CustomerFields::new("Ada Lovelace", "ada@x.com")
            .validate()
            .expect("valid fields");
    }

    #[test]
    fn validate_rejects_blank_name_and_bad_email() {
        assert_eq!(
            CustomerFields::new("  ", "ada@x.com").validate(),
            Err(CustomerValidationError::EmptyName)
        );
        assert!(matches!(
            CustomerFields::new("Ada", "not-an-email").validate(),
            Err(CustomerValidationError::InvalidEmail(_))
        ));
    }

    #[test]
    fn matches_compares_name_and_email_only() {
        let customer = Customer {
            local_id: 7,
            name: "Ada".to_string(),
            email: "ada@x.com".to_string(),
        };
        assert!(customer.matches(&CustomerFields::new("Ada", "ada@x.com")));
        assert!(!customer.matches(&CustomerFields::new("Ada", "ada@y.com")));
    }
}
