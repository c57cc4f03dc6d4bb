use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::routing::MethodRouter;
use axum_extra::extract::cookie::Key;
use jinja_axum_core::{TemplateEnvironment, TemplateOptions};
use sha2::{Digest, Sha512};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{CorsConfig, Settings};
use crate::locale::Translations;
use crate::middleware::current_user_middleware;
use crate::static_files::StaticUrls;
use crate::urls::UrlRegistry;
use crate::{AppState, Error, Result, routes};

/// Application under construction
///
/// Routes and the template environment are set up here; `build` freezes
/// everything into the shared `AppState` and returns the router.
pub struct Application {
    settings: Settings,
    router: Router<AppState>,
    urls: UrlRegistry,
    templates: Option<TemplateEnvironment>,
}

impl Application {
    pub fn new(mut settings: Settings) -> Self {
        settings.apply_debug_defaults();
        Self {
            settings,
            router: Router::new(),
            urls: UrlRegistry::new(),
            templates: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn route(&mut self, path: &str, method_router: MethodRouter<AppState>) -> &mut Self {
        self.router = std::mem::take(&mut self.router).route(path, method_router);
        self
    }

    /// Add a route that templates can build URLs for with `reverse_url(name, ..)`
    pub fn named_route(
        &mut self,
        name: &str,
        path: &str,
        method_router: MethodRouter<AppState>,
    ) -> &mut Self {
        self.urls.insert(name, path);
        self.route(path, method_router)
    }

    pub fn urls(&self) -> &UrlRegistry {
        &self.urls
    }

    /// Create the template environment from the settings plus `options`
    ///
    /// Returned mutably so filters, tests and globals can be registered before
    /// `build`. A second call replaces the first environment.
    pub fn init_templates(&mut self, options: Option<TemplateOptions>) -> &mut TemplateEnvironment {
        if self.templates.is_some() {
            warn!("Template environment already initialized, replacing it");
        }
        let env = TemplateEnvironment::from_settings(&self.settings.templates, options.as_ref());
        self.templates.insert(env)
    }

    pub fn templates_mut(&mut self) -> Option<&mut TemplateEnvironment> {
        self.templates.as_mut()
    }

    /// Freeze the application into a router
    pub fn build(self) -> Result<Router> {
        let key = signing_key(&self.settings)?;

        let translations = match &self.settings.translations_path {
            Some(path) => Translations::load_dir(path, &self.settings.default_locale)?,
            None => Translations::empty(&self.settings.default_locale),
        };

        if self.templates.is_none() {
            warn!("No template environment, TemplateHandler routes will fail");
        }

        let state = AppState {
            static_urls: Arc::new(StaticUrls::from_settings(&self.settings)),
            settings: Arc::new(self.settings),
            templates: self.templates.map(Arc::new),
            urls: Arc::new(self.urls),
            translations: Arc::new(translations),
            key,
        };

        let mut router = self.router.merge(routes::routes());
        if let Some(root) = state.static_urls.root() {
            let prefix = state.static_urls.prefix().trim_end_matches('/');
            info!("Serving {} under {}/", root.display(), prefix);
            router = if prefix.is_empty() {
                router.fallback_service(ServeDir::new(root))
            } else {
                router.nest_service(prefix, ServeDir::new(root))
            };
        }

        let cors = cors_layer(&state.settings.cors);
        Ok(router
            .layer(axum::middleware::from_fn_with_state(
                state.clone(),
                current_user_middleware,
            ))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(state))
    }
}

/// Signed-cookie key derived from `cookie_secret`
fn signing_key(settings: &Settings) -> Result<Key> {
    let secret = settings
        .cookie_secret
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Configuration("cookie_secret must be set".to_string()))?;
    let digest = Sha512::digest(secret.as_bytes());
    Ok(Key::from(digest.as_slice()))
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if config.allow_any_origin {
        return CorsLayer::permissive();
    }
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any)
}
