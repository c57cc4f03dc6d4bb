//! Filters every environment starts with

use minijinja::value::{Kwargs, Value};
use minijinja::{Environment, Error, ErrorKind};

use crate::escape::{self, LinkifyOptions};

pub const TOJSON: &str = "tojson";
pub const XHTML_ESCAPE: &str = "xhtml_escape";
pub const URL_ESCAPE: &str = "url_escape";
pub const SQUEEZE: &str = "squeeze";
pub const LINKIFY: &str = "linkify";

/// Names of the filters registered by [`register_builtin_filters`]
pub const BUILTIN_FILTERS: [&str; 5] = [TOJSON, XHTML_ESCAPE, URL_ESCAPE, SQUEEZE, LINKIFY];

pub(crate) fn register_builtin_filters(env: &mut Environment<'static>) {
    env.add_filter(TOJSON, tojson);
    env.add_filter(XHTML_ESCAPE, xhtml_escape);
    env.add_filter(URL_ESCAPE, url_escape);
    env.add_filter(SQUEEZE, squeeze);
    env.add_filter(LINKIFY, linkify);
}

/// `{{ value|tojson }}`, safe to embed in HTML and `<script>` blocks
pub fn tojson(value: Value, kwargs: Kwargs) -> Result<Value, Error> {
    let indent: Option<usize> = kwargs.get("indent")?;
    kwargs.assert_all_used()?;
    let json = escape::json_dumps(&value, indent).map_err(|e| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot serialize value to JSON: {}", e),
        )
    })?;
    Ok(Value::from_safe_string(json))
}

pub fn xhtml_escape(value: Value) -> Value {
    Value::from_safe_string(escape::xhtml_escape(&text_of(&value)))
}

/// Percent-encoded output carries no HTML special characters
pub fn url_escape(value: Value, kwargs: Kwargs) -> Result<Value, Error> {
    let plus: Option<bool> = kwargs.get("plus")?;
    kwargs.assert_all_used()?;
    Ok(Value::from_safe_string(escape::url_escape(
        &text_of(&value),
        plus.unwrap_or(true),
    )))
}

pub fn squeeze(value: Value) -> String {
    escape::squeeze(&text_of(&value))
}

/// Output is escaped by `linkify` itself and therefore marked safe
pub fn linkify(value: Value, kwargs: Kwargs) -> Result<Value, Error> {
    let defaults = LinkifyOptions::default();
    let options = LinkifyOptions {
        shorten: kwargs.get::<Option<bool>>("shorten")?.unwrap_or(defaults.shorten),
        extra_params: kwargs
            .get::<Option<String>>("extra_params")?
            .unwrap_or(defaults.extra_params),
        require_protocol: kwargs
            .get::<Option<bool>>("require_protocol")?
            .unwrap_or(defaults.require_protocol),
        permitted_protocols: kwargs
            .get::<Option<Vec<String>>>("permitted_protocols")?
            .unwrap_or(defaults.permitted_protocols),
    };
    kwargs.assert_all_used()?;
    Ok(Value::from_safe_string(escape::linkify(
        &text_of(&value),
        &options,
    )))
}

fn text_of(value: &Value) -> String {
    match value.as_str() {
        Some(s) => s.to_string(),
        None if value.is_undefined() || value.is_none() => String::new(),
        None => value.to_string(),
    }
}
