use jinja_axum_core::TemplateSettings;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Application settings
///
/// Everything in here except `cookie_secret` is visible to templates as
/// `settings`. Unknown keys land in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Host address
    pub host: String,

    /// Port number
    pub port: u16,

    /// Log level
    pub log_level: String,

    /// CORS configuration
    pub cors: CorsConfig,

    /// Template environment settings
    #[serde(flatten)]
    pub templates: TemplateSettings,

    /// Secret signed cookies are derived from
    #[serde(skip_serializing)]
    pub cookie_secret: Option<String>,

    /// Directory served under `static_url_prefix`
    pub static_path: Option<PathBuf>,

    /// URL prefix of static files
    pub static_url_prefix: String,

    /// Write the `_xsrf` cookie when a new token is issued
    pub xsrf_cookies: bool,

    /// Locale used when the browser asks for nothing we have
    pub default_locale: String,

    /// Directory of `<locale>.json` translation catalogs
    pub translations_path: Option<PathBuf>,

    /// Signed cookie holding the current user
    pub login_cookie: String,

    /// Where `CurrentUser` sends anonymous visitors
    pub login_url: Option<String>,

    /// Development mode
    pub debug: bool,

    /// Free-form application settings
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            cors: CorsConfig::default(),
            templates: TemplateSettings::default(),
            cookie_secret: None,
            static_path: None,
            static_url_prefix: "/static/".to_string(),
            xsrf_cookies: false,
            default_locale: "en_US".to_string(),
            translations_path: None,
            login_cookie: "user".to_string(),
            login_url: None,
            debug: false,
            extra: serde_json::Map::new(),
        }
    }
}

impl Settings {
    /// Convert to SocketAddr
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|e| anyhow::anyhow!("Invalid address {}: {}", addr, e))
    }

    /// Load from configuration file
    pub fn load_from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))
    }

    /// Debug mode turns on template reloading and turns off caching
    /// unless either was set explicitly
    pub fn apply_debug_defaults(&mut self) {
        if self.debug {
            self.templates.autoreload.get_or_insert(true);
            self.templates.compiled_template_cache.get_or_insert(false);
        }
    }

    /// Whether static file versions may be cached between requests
    pub fn static_hash_cache(&self) -> bool {
        !self.debug
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins
    pub allowed_origins: Vec<String>,

    /// Allow any origin
    pub allow_any_origin: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![],
            allow_any_origin: true, // Default to true for development
        }
    }
}
