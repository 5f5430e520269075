use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("value is too short (min {min}, got {got})")]
    TooShort { min: usize, got: usize },
    #[error("value is too long (max {max}, got {got})")]
    TooLong { max: usize, got: usize },
    #[error("invalid characters")]
    InvalidCharacters,
    #[error("invalid format")]
    InvalidFormat,
}

pub const MESSAGE_CONTENT_MAX: usize = 2000;

/// Message bodies must be non-empty after trimming and at most 2000 chars.
pub fn validate_message_content(content: &str) -> Result<(), ValidationError> {
    let len = content.trim().chars().count();
    if len < 1 {
        return Err(ValidationError::TooShort { min: 1, got: len });
    }
    if len > MESSAGE_CONTENT_MAX {
        return Err(ValidationError::TooLong {
            max: MESSAGE_CONTENT_MAX,
            got: len,
        });
    }
    Ok(())
}

/// Identities are opaque account references, but a malformed one (empty,
/// oversized, control characters) is rejected before it reaches storage.
pub fn validate_identity(id: &str) -> Result<(), ValidationError> {
    let len = id.len();
    if len < 1 {
        return Err(ValidationError::TooShort { min: 1, got: len });
    }
    if len > 64 {
        return Err(ValidationError::TooLong { max: 64, got: len });
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidCharacters);
    }
    Ok(())
}

pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let len = name.chars().count();
    if len < 1 {
        return Err(ValidationError::TooShort { min: 1, got: len });
    }
    if len > 100 {
        return Err(ValidationError::TooLong { max: 100, got: len });
    }
    Ok(())
}
