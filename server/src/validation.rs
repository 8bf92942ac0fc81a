use crate::error::ApiError;

/// Maximum length for a user message
const MAX_MESSAGE_LENGTH: usize = 4000;

/// Validate an inbound chat message
pub fn validate_user_message(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::InvalidInput("Message cannot be empty".to_string()));
    }
    if text.len() > MAX_MESSAGE_LENGTH {
        return Err(ApiError::InvalidInput(format!(
            "Message too long (max {} characters)",
            MAX_MESSAGE_LENGTH
        )));
    }
    Ok(())
}
