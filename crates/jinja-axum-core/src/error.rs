//! Error types for jinja-axum-core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Template not found: {0}")]
    NotFound(String),

    #[error("Invalid template name: {0}")]
    InvalidName(String),

    #[error("Callable has no usable name, pass one explicitly: {0}")]
    UnnamedCallable(String),

    #[error("Render error: {0}")]
    Render(#[from] minijinja::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type TemplateResult<T> = std::result::Result<T, TemplateError>;
