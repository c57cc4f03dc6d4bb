//! Error types for jinja-axum

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use jinja_axum_core::TemplateError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Render context must be a map, got {0}")]
    InvalidContext(String),

    #[error("Cannot reverse url: {0}")]
    ReverseUrl(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<minijinja::Error> for Error {
    fn from(e: minijinja::Error) -> Self {
        Error::Template(TemplateError::Render(e))
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // every variant is a server-side fault
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        tracing::error!("{}", self);
        (status, status.canonical_reason().unwrap_or("Error")).into_response()
    }
}
