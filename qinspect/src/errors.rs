use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// Configuration rejected at startup
    #[error("Invalid configuration: {message}")]
    Config { message: String },

    /// Metric registration or label resolution failed
    #[error(transparent)]
    Metrics(#[from] prometheus::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config { message: message.into() }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config { .. } | Error::Metrics(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to clients
    pub fn user_message(&self) -> String {
        match self {
            Error::Config { message } => message.clone(),
            Error::Metrics(_) | Error::Other(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        tracing::error!("Internal service error: {:#}", self);
        (self.status_code(), self.user_message()).into_response()
    }
}
