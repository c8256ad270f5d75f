//! Field validation for user answers and replicated records.
//!
//! Every field that ends up in a sync record must be free of the wire
//! delimiter, otherwise the positional decode on the peer shifts fields.

use crate::sync::codec::DELIMITER;

pub const MAX_SUBJECT_BYTES: usize = 64;
pub const MAX_BODY_BYTES: usize = 1000;
pub const MAX_BOARD_BYTES: usize = 24;
pub const MAX_CHANNEL_NAME_BYTES: usize = 32;
pub const MAX_URL_BYTES: usize = 200;
pub const MAX_UNIQUE_ID_BYTES: usize = 64;

/// Why a field was rejected; rendered straight into the re-prompt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} is too long (max {max} bytes)")]
    TooLong { field: &'static str, max: usize },

    #[error("{field} cannot contain '|'")]
    Delimiter { field: &'static str },

    #[error("{field} cannot contain spaces")]
    Whitespace { field: &'static str },

    #[error("{field} contains control characters")]
    Control { field: &'static str },
}

impl From<FieldError> for crate::errors::BbsError {
    fn from(e: FieldError) -> Self {
        crate::errors::BbsError::Validation(e.to_string())
    }
}

fn check_text(field: &'static str, raw: &str, max: usize, allow_newlines: bool) -> Result<String, FieldError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(FieldError::Empty { field });
    }
    if value.len() > max {
        return Err(FieldError::TooLong { field, max });
    }
    if value.contains(DELIMITER) {
        return Err(FieldError::Delimiter { field });
    }
    if value
        .chars()
        .any(|c| c.is_control() && !(allow_newlines && (c == '\n' || c == '\r' || c == '\t')))
    {
        return Err(FieldError::Control { field });
    }
    Ok(value.to_string())
}

pub fn validate_subject(raw: &str) -> Result<String, FieldError> {
    check_text("Subject", raw, MAX_SUBJECT_BYTES, false)
}

pub fn validate_body(raw: &str) -> Result<String, FieldError> {
    check_text("Message", raw, MAX_BODY_BYTES, true)
}

pub fn validate_board_name(raw: &str) -> Result<String, FieldError> {
    check_text("Board", raw, MAX_BOARD_BYTES, false)
}

pub fn validate_channel_name(raw: &str) -> Result<String, FieldError> {
    check_text("Channel name", raw, MAX_CHANNEL_NAME_BYTES, false)
}

pub fn validate_channel_url(raw: &str) -> Result<String, FieldError> {
    let value = check_text("URL", raw, MAX_URL_BYTES, false)?;
    if value.chars().any(char::is_whitespace) {
        return Err(FieldError::Whitespace { field: "URL" });
    }
    Ok(value)
}

pub fn validate_node_id(raw: &str) -> Result<String, FieldError> {
    let value = check_text("Node id", raw, MAX_CHANNEL_NAME_BYTES, false)?;
    if value.chars().any(char::is_whitespace) {
        return Err(FieldError::Whitespace { field: "Node id" });
    }
    Ok(value)
}

pub fn validate_unique_id(raw: &str) -> Result<String, FieldError> {
    let value = check_text("Unique id", raw, MAX_UNIQUE_ID_BYTES, false)?;
    if value.chars().any(char::is_whitespace) {
        return Err(FieldError::Whitespace { field: "Unique id" });
    }
    Ok(value)
}

/// Display names come from the node directory and may hold anything the
/// radio owner typed; strip the delimiter instead of rejecting the sender.
pub fn sanitize_short_name(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != DELIMITER && !c.is_control())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        "????".to_string()
    } else {
        cleaned.to_string()
    }
}
