//! # jinja-axum core
//!
//! Template environment setup for jinja-axum: settings resolution, the
//! file-system loader with its bounded cache, and the filters every
//! environment is created with. Nothing in here knows about HTTP.

pub mod environment;
pub mod error;
pub mod escape;
pub mod filters;
pub mod loader;
pub mod options;

pub use environment::TemplateEnvironment;
pub use error::{TemplateError, TemplateResult};
pub use loader::{FileSystemLoader, TemplateLoader};
pub use options::{
    DEFAULT_CACHE_SIZE, EnvironmentConfig, TemplateOptions, TemplateSettings, XHTML_ESCAPE,
};

/// Re-exported so callers build contexts with the same engine version
pub use minijinja;
