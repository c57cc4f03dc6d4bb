use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Bound of the template cache when `compiled_template_cache` is on
pub const DEFAULT_CACHE_SIZE: usize = 50;

/// The only `autoescape` setting value that turns HTML escaping on
pub const XHTML_ESCAPE: &str = "xhtml_escape";

/// Template related application settings
///
/// `autoreload` and `compiled_template_cache` stay `None` unless set
/// explicitly so that debug mode can fill them in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    /// Directory templates are loaded from
    pub template_path: PathBuf,

    /// Re-read templates whose file changed
    pub autoreload: Option<bool>,

    /// Keep loaded templates in a bounded cache
    pub compiled_template_cache: Option<bool>,

    /// Escaping function name, `"xhtml_escape"` enables HTML escaping
    pub autoescape: Option<String>,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            template_path: PathBuf::from("templates"),
            autoreload: None,
            compiled_template_cache: None,
            autoescape: Some(XHTML_ESCAPE.to_string()),
        }
    }
}

/// Explicit overrides, every field that is set wins over the computed value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateOptions {
    pub template_path: Option<PathBuf>,
    pub auto_reload: Option<bool>,
    pub cache_size: Option<usize>,
    pub autoescape: Option<bool>,
    pub trim_blocks: Option<bool>,
    pub lstrip_blocks: Option<bool>,
    pub keep_trailing_newline: Option<bool>,
    pub strict_undefined: Option<bool>,
}

/// Resolved configuration of one template environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub template_path: PathBuf,
    pub auto_reload: bool,
    pub cache_size: usize,
    pub autoescape: bool,
    pub trim_blocks: bool,
    pub lstrip_blocks: bool,
    pub keep_trailing_newline: bool,
    pub strict_undefined: bool,
}

impl EnvironmentConfig {
    /// Compute defaults from settings, then apply the overrides
    pub fn resolve(settings: &TemplateSettings, options: Option<&TemplateOptions>) -> Self {
        let cache_size = if settings.compiled_template_cache.unwrap_or(true) {
            DEFAULT_CACHE_SIZE
        } else {
            0
        };

        let mut config = Self {
            template_path: settings.template_path.clone(),
            auto_reload: settings.autoreload.unwrap_or(false),
            cache_size,
            autoescape: settings.autoescape.as_deref() == Some(XHTML_ESCAPE),
            trim_blocks: false,
            lstrip_blocks: false,
            keep_trailing_newline: false,
            strict_undefined: false,
        };

        if let Some(options) = options {
            config.apply(options);
        }
        config
    }

    fn apply(&mut self, options: &TemplateOptions) {
        if let Some(path) = &options.template_path {
            self.template_path = path.clone();
        }
        if let Some(v) = options.auto_reload {
            self.auto_reload = v;
        }
        if let Some(v) = options.cache_size {
            self.cache_size = v;
        }
        if let Some(v) = options.autoescape {
            self.autoescape = v;
        }
        if let Some(v) = options.trim_blocks {
            self.trim_blocks = v;
        }
        if let Some(v) = options.lstrip_blocks {
            self.lstrip_blocks = v;
        }
        if let Some(v) = options.keep_trailing_newline {
            self.keep_trailing_newline = v;
        }
        if let Some(v) = options.strict_undefined {
            self.strict_undefined = v;
        }
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self::resolve(&TemplateSettings::default(), None)
    }
}
