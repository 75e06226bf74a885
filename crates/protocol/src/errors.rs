//! Protocol errors module

use thiserror::Error;

/// Protocol-level errors
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },

    #[error("Invalid field {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

