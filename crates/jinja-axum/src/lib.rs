//! # jinja-axum
//!
//! Jinja-style templates for axum applications: the template environment is
//! configured from application settings, and `TemplateHandler` adds `render`,
//! `render_string` and a signed-cookie session to request handlers.

use std::sync::Arc;

use axum_extra::extract::cookie::Key;
use jinja_axum_core::TemplateEnvironment;

pub mod app;
pub mod config;
pub mod context;
pub mod error;
pub mod handler;
pub mod locale;
pub mod middleware;
pub mod render;
pub mod routes;
pub mod session;
pub mod static_files;
pub mod urls;

pub use app::Application;
pub use config::Settings;
pub use context::RenderContext;
pub use error::{Error, Result};
pub use handler::{CookieLookup, HandlerBase, RequestHandler, RequestInfo};
pub use locale::{Locale, Translations};
pub use middleware::CurrentUser;
pub use render::TemplateHandler;
pub use session::{SESSION_COOKIE, Session};

pub use jinja_axum_core::{TemplateOptions, TemplateSettings, minijinja};

/// Application state shared by every request
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// Set by `Application::init_templates`, read-only afterwards
    pub templates: Option<Arc<TemplateEnvironment>>,
    pub urls: Arc<urls::UrlRegistry>,
    pub static_urls: Arc<static_files::StaticUrls>,
    pub translations: Arc<Translations>,
    pub key: Key,
}
