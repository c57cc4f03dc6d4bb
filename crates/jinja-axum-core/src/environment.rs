//! The template environment shared by every request of an application

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

use minijinja::functions::Function;
use minijinja::value::{FunctionArgs, FunctionResult, Value, ValueKind};
use minijinja::{AutoEscape, Environment, ErrorKind, Output, State, UndefinedBehavior};
use serde::Serialize;

use crate::escape::xhtml_escape;
use crate::filters::{self, BUILTIN_FILTERS};
use crate::loader::{FileSystemLoader, TemplateLoader};
use crate::options::{EnvironmentConfig, TemplateOptions, TemplateSettings};
use crate::{TemplateError, TemplateResult};

/// A configured template environment
///
/// Filters, tests and globals can only be registered through `&mut self`,
/// so once the environment sits behind an `Arc` it is read-only.
///
/// Compiled templates stay in the shared environment between renders.
/// They are dropped together whenever the loader evicts a source or, with
/// `auto_reload`, sees a file change. With a cache size of 0 nothing is kept.
pub struct TemplateEnvironment {
    env: RwLock<Environment<'static>>,
    loader: Arc<TemplateLoader>,
    config: EnvironmentConfig,
    filters: BTreeSet<String>,
    tests: BTreeSet<String>,
    globals: BTreeSet<String>,
}

impl TemplateEnvironment {
    /// Build an environment from resolved configuration
    pub fn new(config: EnvironmentConfig) -> Self {
        let loader = Arc::new(TemplateLoader::new(
            FileSystemLoader::new(&config.template_path),
            config.cache_size,
            config.auto_reload,
        ));

        let mut env = Environment::new();
        let autoescape = config.autoescape;
        env.set_auto_escape_callback(move |_name| {
            if autoescape {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });
        if autoescape {
            env.set_formatter(xhtml_formatter);
        }
        env.set_trim_blocks(config.trim_blocks);
        env.set_lstrip_blocks(config.lstrip_blocks);
        env.set_keep_trailing_newline(config.keep_trailing_newline);
        if config.strict_undefined {
            env.set_undefined_behavior(UndefinedBehavior::Strict);
        }

        let source_loader = loader.clone();
        env.set_loader(move |name| match source_loader.get_source(name) {
            Ok(source) => Ok(source.map(|s| s.to_string())),
            Err(TemplateError::InvalidName(_)) => Ok(None),
            Err(e) => Err(minijinja::Error::new(
                ErrorKind::InvalidOperation,
                format!("failed to load template {}: {}", name, e),
            )),
        });

        filters::register_builtin_filters(&mut env);

        tracing::info!(
            "Template environment ready: path={}, autoescape={}, cache_size={}, auto_reload={}",
            config.template_path.display(),
            config.autoescape,
            config.cache_size,
            config.auto_reload
        );

        Self {
            env: RwLock::new(env),
            loader,
            config,
            filters: BUILTIN_FILTERS.iter().map(|s| s.to_string()).collect(),
            tests: BTreeSet::new(),
            globals: BTreeSet::new(),
        }
    }

    /// Build a fresh environment from application settings and overrides
    pub fn from_settings(settings: &TemplateSettings, options: Option<&TemplateOptions>) -> Self {
        Self::new(EnvironmentConfig::resolve(settings, options))
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn autoescape(&self) -> bool {
        self.config.autoescape
    }

    pub fn cache_size(&self) -> usize {
        self.config.cache_size
    }

    pub fn template_path(&self) -> &Path {
        self.loader.search_path()
    }

    pub fn loader(&self) -> &TemplateLoader {
        &self.loader
    }

    /// Register a filter, named after the function unless `name` is given
    pub fn template_filter<F, Rv, Args>(
        &mut self,
        name: Option<&str>,
        f: F,
    ) -> TemplateResult<&mut Self>
    where
        F: Function<Rv, Args>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        let name = registration_name::<F>(name)?;
        self.env_mut().add_filter(name.clone(), f);
        self.filters.insert(name);
        Ok(self)
    }

    /// Register a test, named after the function unless `name` is given
    pub fn template_test<F, Rv, Args>(
        &mut self,
        name: Option<&str>,
        f: F,
    ) -> TemplateResult<&mut Self>
    where
        F: Function<Rv, Args>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        let name = registration_name::<F>(name)?;
        self.env_mut().add_test(name.clone(), f);
        self.tests.insert(name);
        Ok(self)
    }

    /// Register a global function, named after the function unless `name` is given
    pub fn template_global<F, Rv, Args>(
        &mut self,
        name: Option<&str>,
        f: F,
    ) -> TemplateResult<&mut Self>
    where
        F: Function<Rv, Args>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        let name = registration_name::<F>(name)?;
        self.env_mut().add_function(name.clone(), f);
        self.globals.insert(name);
        Ok(self)
    }

    /// Register a plain global value
    pub fn add_global_value<T: Serialize>(&mut self, name: &str, value: T) -> &mut Self {
        self.env_mut()
            .add_global(name.to_string(), Value::from_serialize(&value));
        self.globals.insert(name.to_string());
        self
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains(name)
    }

    pub fn has_test(&self, name: &str) -> bool {
        self.tests.contains(name)
    }

    pub fn has_global(&self, name: &str) -> bool {
        self.globals.contains(name)
    }

    pub fn filter_names(&self) -> impl Iterator<Item = &str> {
        self.filters.iter().map(String::as_str)
    }

    /// Number of compiled templates currently kept
    pub fn compiled_len(&self) -> usize {
        self.env_ref().templates().count()
    }

    /// Render a template found through the loader
    pub fn render_template(&self, name: &str, ctx: Value) -> TemplateResult<String> {
        self.prepare();
        let result = if self.config.cache_size == 0 {
            let env = self.env_ref().clone();
            render_named(&env, name, ctx)
        } else {
            render_named(&self.env_ref(), name, ctx)
        };
        self.release_stale();
        result
    }

    /// Compile `source` as an inline template and render it
    pub fn render_source(&self, source: &str, ctx: Value) -> TemplateResult<String> {
        self.prepare();
        let result = if self.config.cache_size == 0 {
            let env = self.env_ref().clone();
            env.render_str(source, ctx)
        } else {
            self.env_ref().render_str(source, ctx)
        };
        self.release_stale();
        Ok(result?)
    }

    /// Drop compiled templates whose files changed since they were read
    fn prepare(&self) {
        if self.loader.any_modified() {
            tracing::debug!("Template files changed, dropping compiled templates");
            self.clear_compiled();
        }
    }

    fn release_stale(&self) {
        if self.loader.take_stale() {
            tracing::debug!("Template source evicted, dropping compiled templates");
            self.clear_compiled();
        }
    }

    fn clear_compiled(&self) {
        self.env
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear_templates();
    }

    fn env_ref(&self) -> RwLockReadGuard<'_, Environment<'static>> {
        self.env.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn env_mut(&mut self) -> &mut Environment<'static> {
        self.env.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

fn render_named(env: &Environment<'_>, name: &str, ctx: Value) -> TemplateResult<String> {
    let template = env.get_template(name).map_err(|e| match e.kind() {
        ErrorKind::TemplateNotFound => TemplateError::NotFound(name.to_string()),
        _ => TemplateError::Render(e),
    })?;
    Ok(template.render(ctx)?)
}

/// Autoescaped output goes through `xhtml_escape`
///
/// Safe values and contexts without autoescape keep the default behavior,
/// as do numbers, booleans and undefined or none values.
fn xhtml_formatter(
    out: &mut Output,
    state: &State,
    value: &Value,
) -> Result<(), minijinja::Error> {
    if value.is_safe() || !matches!(state.auto_escape(), AutoEscape::Html) {
        return minijinja::escape_formatter(out, state, value);
    }
    let escaped = match value.kind() {
        ValueKind::Undefined | ValueKind::None | ValueKind::Bool | ValueKind::Number => {
            return minijinja::escape_formatter(out, state, value);
        }
        ValueKind::String => xhtml_escape(value.as_str().unwrap_or_default()),
        _ => xhtml_escape(&value.to_string()),
    };
    out.write_str(&escaped)
        .map_err(|_| minijinja::Error::from(ErrorKind::WriteFailure))
}

impl std::fmt::Debug for TemplateEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEnvironment")
            .field("config", &self.config)
            .field("filters", &self.filters)
            .field("tests", &self.tests)
            .field("globals", &self.globals)
            .finish()
    }
}

/// Pick the registration name: the explicit one, else the function's own
fn registration_name<F>(name: Option<&str>) -> TemplateResult<String> {
    if let Some(name) = name {
        return Ok(name.to_string());
    }
    let full = std::any::type_name::<F>();
    let path = full.split('<').next().unwrap_or(full);
    let own = path.rsplit("::").next().unwrap_or(path);
    let usable = !own.is_empty() && own.chars().all(|c| c.is_alphanumeric() || c == '_');
    if usable {
        Ok(own.to_string())
    } else {
        Err(TemplateError::UnnamedCallable(full.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minijinja::context;
    use std::fs;

    fn shout(value: String) -> String {
        value.to_uppercase()
    }

    fn is_even(value: i64) -> bool {
        value % 2 == 0
    }

    fn site_name() -> String {
        "Example".to_string()
    }

    fn environment_in(dir: &Path, settings: TemplateSettings) -> TemplateEnvironment {
        let settings = TemplateSettings {
            template_path: dir.to_path_buf(),
            ..settings
        };
        TemplateEnvironment::from_settings(&settings, None)
    }

    #[test]
    fn test_builtin_filters_registered() {
        let env = TemplateEnvironment::new(EnvironmentConfig::default());
        for name in ["tojson", "xhtml_escape", "url_escape", "squeeze", "linkify"] {
            assert!(env.has_filter(name), "missing filter {}", name);
        }
    }

    #[test]
    fn test_registration_defaults_to_function_name() {
        let mut env = TemplateEnvironment::new(EnvironmentConfig::default());
        env.template_filter(None, shout).unwrap();
        env.template_test(None, is_even).unwrap();
        env.template_global(None, site_name).unwrap();

        assert!(env.has_filter("shout"));
        assert!(env.has_test("is_even"));
        assert!(env.has_global("site_name"));

        let out = env
            .render_source(
                "{{ 'hi'|shout }} {{ 'even' if 4 is is_even else 'odd' }} {{ site_name() }}",
                context! {},
            )
            .unwrap();
        assert_eq!(out, "HI even Example");
    }

    #[test]
    fn test_registration_with_explicit_name() {
        let mut env = TemplateEnvironment::new(EnvironmentConfig::default());
        env.template_filter(Some("loud"), shout).unwrap();
        assert!(env.has_filter("loud"));
        assert!(!env.has_filter("shout"));
    }

    #[test]
    fn test_closure_needs_explicit_name() {
        let mut env = TemplateEnvironment::new(EnvironmentConfig::default());
        let result = env.template_filter(None, |v: String| v.len());
        assert!(matches!(result, Err(TemplateError::UnnamedCallable(_))));

        env.template_filter(Some("length_of"), |v: String| v.len())
            .unwrap();
        assert!(env.has_filter("length_of"));
    }

    #[test]
    fn test_global_value() {
        let mut env = TemplateEnvironment::new(EnvironmentConfig::default());
        env.add_global_value("version", "1.2.3");
        let out = env.render_source("v{{ version }}", context! {}).unwrap();
        assert_eq!(out, "v1.2.3");
    }

    #[test]
    fn test_autoescape_follows_settings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("page.html"), "{{ v }}").unwrap();

        let on = environment_in(dir.path(), TemplateSettings::default());
        let off = environment_in(
            dir.path(),
            TemplateSettings {
                autoescape: None,
                ..Default::default()
            },
        );

        assert!(on.autoescape());
        assert!(!off.autoescape());
        assert_eq!(
            on.render_template("page.html", context! { v => "<i>" })
                .unwrap(),
            "&lt;i&gt;"
        );
        assert_eq!(
            off.render_template("page.html", context! { v => "<i>" })
                .unwrap(),
            "<i>"
        );
    }

    #[test]
    fn test_cache_size_follows_settings() {
        let cached = TemplateEnvironment::from_settings(&TemplateSettings::default(), None);
        let uncached = TemplateEnvironment::from_settings(
            &TemplateSettings {
                compiled_template_cache: Some(false),
                ..Default::default()
            },
            None,
        );
        assert_eq!(cached.cache_size(), 50);
        assert_eq!(cached.loader().capacity(), 50);
        assert_eq!(uncached.cache_size(), 0);
    }

    #[test]
    fn test_missing_template_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let env = environment_in(dir.path(), TemplateSettings::default());
        let err = env
            .render_template("missing.html", context! {})
            .unwrap_err();
        assert!(matches!(err, TemplateError::NotFound(name) if name == "missing.html"));
    }

    #[test]
    fn test_bad_template_path_fails_on_first_lookup() {
        let env = TemplateEnvironment::from_settings(
            &TemplateSettings {
                template_path: "/nonexistent/jinja-axum/templates".into(),
                ..Default::default()
            },
            None,
        );
        assert!(matches!(
            env.render_template("index.html", context! {}),
            Err(TemplateError::NotFound(_))
        ));
    }

    #[test]
    fn test_inheritance_goes_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("base.html"),
            "<title>{% block title %}{% endblock %}</title>",
        )
        .unwrap();
        fs::write(
            dir.path().join("child.html"),
            "{% extends 'base.html' %}{% block title %}{{ t }}{% endblock %}",
        )
        .unwrap();

        let env = environment_in(dir.path(), TemplateSettings::default());
        let out = env
            .render_template("child.html", context! { t => "Hi" })
            .unwrap();
        assert_eq!(out, "<title>Hi</title>");

        let out = env
            .render_source("{% include 'base.html' %}", context! {})
            .unwrap();
        assert_eq!(out, "<title></title>");
    }

    #[test]
    fn test_source_changes_seen_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "one").unwrap();
        let env = environment_in(
            dir.path(),
            TemplateSettings {
                compiled_template_cache: Some(false),
                ..Default::default()
            },
        );
        assert_eq!(env.render_template("a.html", context! {}).unwrap(), "one");
        fs::write(dir.path().join("a.html"), "two").unwrap();
        assert_eq!(env.render_template("a.html", context! {}).unwrap(), "two");
    }

    #[test]
    fn test_autoescape_uses_xhtml_escape() {
        let env = TemplateEnvironment::new(EnvironmentConfig::default());
        let out = env
            .render_source(
                "{{ path }} {{ html }} {{ safe }} {{ n }}",
                context! {
                    path => "/a/b",
                    html => "<a href='x'>&\"",
                    safe => Value::from_safe_string("<br/>".to_string()),
                    n => 3,
                },
            )
            .unwrap();
        assert_eq!(out, "/a/b &lt;a href=&#39;x&#39;&gt;&amp;&quot; <br/> 3");
    }

    #[test]
    fn test_compiled_templates_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("base.html"), "[{% block b %}{% endblock %}]").unwrap();
        fs::write(
            dir.path().join("a.html"),
            "{% extends 'base.html' %}{% block b %}{{ v }}{% endblock %}",
        )
        .unwrap();
        let env = environment_in(dir.path(), TemplateSettings::default());

        for v in 0..3 {
            let out = env.render_template("a.html", context! { v }).unwrap();
            assert_eq!(out, format!("[{}]", v));
        }
        // each file was read once, later renders reused the compiled templates
        assert_eq!(env.loader().lookups(), 2);
        assert_eq!(env.compiled_len(), 2);
    }

    #[test]
    fn test_eviction_drops_compiled_templates() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..3 {
            fs::write(dir.path().join(format!("t{}.html", i)), i.to_string()).unwrap();
        }
        let env = TemplateEnvironment::new(EnvironmentConfig {
            template_path: dir.path().to_path_buf(),
            cache_size: 2,
            ..Default::default()
        });

        env.render_template("t0.html", context! {}).unwrap();
        env.render_template("t1.html", context! {}).unwrap();
        assert_eq!(env.compiled_len(), 2);

        env.render_template("t2.html", context! {}).unwrap();
        assert_eq!(env.compiled_len(), 0);
        assert_eq!(env.loader().cached_len(), 2);

        assert_eq!(env.render_template("t0.html", context! {}).unwrap(), "0");
        assert_eq!(env.loader().lookups(), 4);
    }

    #[test]
    fn test_auto_reload_recompiles_changed_template() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.html");
        fs::write(&path, "one").unwrap();
        let env = environment_in(
            dir.path(),
            TemplateSettings {
                autoreload: Some(true),
                ..Default::default()
            },
        );
        assert_eq!(env.render_template("a.html", context! {}).unwrap(), "one");

        fs::write(&path, "two").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert_eq!(env.render_template("a.html", context! {}).unwrap(), "two");
    }

    #[test]
    fn test_nothing_compiled_is_kept_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.html"), "x").unwrap();
        let env = environment_in(
            dir.path(),
            TemplateSettings {
                compiled_template_cache: Some(false),
                ..Default::default()
            },
        );
        env.render_template("a.html", context! {}).unwrap();
        env.render_template("a.html", context! {}).unwrap();
        assert_eq!(env.compiled_len(), 0);
        assert_eq!(env.loader().lookups(), 2);
    }
}
