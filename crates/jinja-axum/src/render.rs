use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Response;
use jinja_axum_core::TemplateEnvironment;
use serde::Serialize;

use crate::context::RenderContext;
use crate::handler::{HandlerBase, RequestHandler};
use crate::session::{SESSION_COOKIE, Session};
use crate::{AppState, Error, Result};

/// Request handler with template rendering and a cookie-backed session
///
/// Use it as an extractor in place of the base handler:
///
/// ```ignore
/// async fn index(handler: TemplateHandler) -> Result<Response> {
///     handler.render("index.html", context! { title => "Home" })
/// }
/// ```
pub struct TemplateHandler<H: HandlerBase = RequestHandler> {
    base: H,
    templates: Arc<TemplateEnvironment>,
    session: Option<Session>,
}

impl<H: HandlerBase> TemplateHandler<H> {
    /// Wrap `base`, failing if the application has no template environment
    pub fn initialize(base: H) -> Result<Self> {
        let templates = base.state().templates.clone().ok_or_else(|| {
            Error::Configuration(
                "Template environment not initialized, call Application::init_templates first"
                    .to_string(),
            )
        })?;
        Ok(Self {
            base,
            templates,
            session: None,
        })
    }

    pub fn base(&self) -> &H {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut H {
        &mut self.base
    }

    pub fn templates(&self) -> &TemplateEnvironment {
        &self.templates
    }

    /// Session of this request, read from the cookie on first access
    pub fn session(&mut self) -> &mut Session {
        let base = &self.base;
        self.session
            .get_or_insert_with(|| Session::from_cookie(base.signed_cookie(SESSION_COOKIE)))
    }

    /// Render template `name` and finish the response with it
    pub fn render<S: Serialize>(mut self, name: &str, kwargs: S) -> Result<Response> {
        let ctx = self.context(kwargs)?;
        let html = self.templates.render_template(name, ctx)?;
        Ok(self.finish(Some(html)))
    }

    /// Render `source` with the same context `render` would use
    pub fn render_string<S: Serialize>(&mut self, source: &str, kwargs: S) -> Result<String> {
        let ctx = self.context(kwargs)?;
        Ok(self.templates.render_source(source, ctx)?)
    }

    fn context<S: Serialize>(&mut self, kwargs: S) -> Result<minijinja::Value> {
        let base = &self.base;
        let session = self
            .session
            .get_or_insert_with(|| Session::from_cookie(base.signed_cookie(SESSION_COOKIE)));
        Ok(RenderContext::new(base, session).merge(kwargs)?.into_value())
    }

    /// Write the session cookie, then let the base handler finish
    pub fn finish(mut self, chunk: Option<String>) -> Response {
        match self.session().encode() {
            Ok(encoded) => self.base.set_signed_cookie(SESSION_COOKIE, encoded),
            Err(e) => tracing::error!("Failed to encode session: {}", e),
        }
        self.base.finish(chunk)
    }
}

impl<H> FromRequestParts<AppState> for TemplateHandler<H>
where
    H: HandlerBase + FromRequestParts<AppState, Rejection = Error>,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let base = H::from_request_parts(parts, state).await?;
        Self::initialize(base)
    }
}
