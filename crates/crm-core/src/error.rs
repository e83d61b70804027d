//! # Error Types
//!
//! Structured errors for the domain layer, built with `thiserror`.
//! Validation failures carry the offending field so the API layer can
//! report it back alongside the human-readable message.

use thiserror::Error;

/// Form validation failure for a single field.
///
/// The `Display` output is the message shown to the user; [`field`](Self::field)
/// names the input that was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A required text field was empty or whitespace.
    #[error("{label} is required")]
    Required {
        /// Field name as it appears in the request body.
        field: &'static str,
        /// Human-readable label used in the message.
        label: &'static str,
    },

    /// The email address is not `local@domain.tld` shaped.
    #[error("Invalid email address")]
    InvalidEmail {
        /// Field name.
        field: &'static str,
        /// The rejected input.
        value: String,
    },

    /// The value is not an absolute http(s) URL.
    #[error("Invalid URL")]
    InvalidUrl {
        /// Field name.
        field: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A monetary amount was negative.
    #[error("Value must be positive")]
    Negative {
        /// Field name.
        field: &'static str,
    },

    /// A number was NaN or infinite.
    #[error("{field} must be a finite number")]
    NotFinite {
        /// Field name.
        field: &'static str,
    },

    /// A number fell outside its inclusive range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        /// Field name.
        field: &'static str,
        /// Inclusive lower bound.
        min: i64,
        /// Inclusive upper bound.
        max: i64,
    },

    /// Currency code is not one of the supported currencies.
    #[error("unsupported currency \"{0}\" (expected one of USD, EUR, GBP)")]
    UnsupportedCurrency(String),

    /// A value is well-formed but not accepted in this position.
    #[error("{field} does not accept \"{value}\"")]
    NotAllowed {
        /// Field name.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl ValidationError {
    /// Name of the request field that failed validation.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Required { field, .. }
            | Self::InvalidEmail { field, .. }
            | Self::InvalidUrl { field, .. }
            | Self::Negative { field }
            | Self::NotFinite { field }
            | Self::OutOfRange { field, .. }
            | Self::NotAllowed { field, .. } => field,
            Self::UnsupportedCurrency(_) => "currency",
        }
    }
}

/// A string did not name a known enumeration value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: \"{value}\"")]
pub struct ParseError {
    /// The enumeration being parsed, e.g. `"role"`.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

impl ParseError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
