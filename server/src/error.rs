use serde::Serialize;
use thiserror::Error;

/// API Error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

/// Error payload sent to the client over the socket
#[derive(Serialize)]
pub struct ErrorFrame {
    r#type: &'static str,
    error: String,
    code: u16,
}

impl ApiError {
    pub fn code(&self) -> u16 {
        match self {
            ApiError::InvalidInput(_) => 400,
            ApiError::InternalError(_) => 500,
        }
    }

    pub fn to_frame(&self) -> ErrorFrame {
        if let ApiError::InternalError(msg) = self {
            tracing::error!("internal error: {msg}");
        }
        ErrorFrame {
            r#type: "error",
            error: self.to_string(),
            code: self.code(),
        }
    }
}
