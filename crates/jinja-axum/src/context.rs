use std::collections::BTreeMap;
use std::fmt::{Display, Write};

use chrono::{DateTime, Local, TimeZone, Utc};
use jinja_axum_core::escape::xhtml_escape;
use minijinja::value::{Kwargs, Rest, Value, ValueKind};
use minijinja::ErrorKind;
use serde::Serialize;

use crate::handler::HandlerBase;
use crate::session::Session;
use crate::{Error, Result};

type FnResult = std::result::Result<Value, minijinja::Error>;

/// Names every render context starts with
pub const DEFAULT_NAMES: [&str; 13] = [
    "request",
    "session",
    "path_args",
    "path_kwargs",
    "settings",
    "reverse_url",
    "static_url",
    "xsrf_form_html",
    "datetime",
    "locale",
    "_",
    "handler",
    "current_user",
];

/// Per-render name → value map
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: BTreeMap<String, Value>,
}

impl RenderContext {
    /// Framework values for one render on `handler`
    pub fn new<H: HandlerBase>(handler: &H, session: &Session) -> Self {
        let state = handler.state();
        let mut values = BTreeMap::new();

        values.insert(
            "request".to_string(),
            Value::from_serialize(handler.request()),
        );
        values.insert("session".to_string(), Value::from_serialize(session));
        values.insert(
            "path_args".to_string(),
            Value::from_serialize(handler.path_args()),
        );
        values.insert(
            "path_kwargs".to_string(),
            Value::from_serialize(handler.path_kwargs()),
        );
        values.insert(
            "settings".to_string(),
            Value::from_serialize(&*state.settings),
        );

        let urls = state.urls.clone();
        values.insert(
            "reverse_url".to_string(),
            Value::from_function(move |name: String, args: Rest<Value>| -> FnResult {
                let args: Vec<String> = args.iter().map(|arg| arg.to_string()).collect();
                let url = urls.reverse(&name, &args).map_err(|e| {
                    minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())
                })?;
                Ok(Value::from_safe_string(xhtml_escape(&url)))
            }),
        );

        let static_urls = state.static_urls.clone();
        values.insert(
            "static_url".to_string(),
            Value::from_function(move |path: String, kwargs: Kwargs| -> FnResult {
                let include_version = kwargs.get::<Option<bool>>("include_version")?;
                kwargs.assert_all_used()?;
                let url = static_urls.static_url(&path, include_version.unwrap_or(true));
                Ok(Value::from_safe_string(xhtml_escape(&url)))
            }),
        );

        let form_html = handler.xsrf_form_html();
        values.insert(
            "xsrf_form_html".to_string(),
            Value::from_function(move || Value::from_safe_string(form_html.clone())),
        );

        values.insert(
            "datetime".to_string(),
            Value::from_iter([
                ("now", Value::from_function(now)),
                ("utcnow", Value::from_function(utcnow)),
                ("today", Value::from_function(today)),
            ]),
        );

        let locale = handler.locale().clone();
        values.insert(
            "locale".to_string(),
            Value::from_serialize(locale.describe()),
        );
        values.insert(
            "_".to_string(),
            Value::from_function(
                move |message: String, plural: Option<String>, count: Option<i64>| {
                    locale.translate(&message, plural.as_deref(), count)
                },
            ),
        );

        values.insert(
            "handler".to_string(),
            Value::from_serialize(HandlerView {
                path_args: handler.path_args(),
                path_kwargs: handler.path_kwargs(),
                locale: handler.locale().code(),
                current_user: handler.current_user(),
                xsrf_token: handler.xsrf_token(),
            }),
        );
        values.insert(
            "current_user".to_string(),
            Value::from_serialize(handler.current_user()),
        );

        Self { values }
    }

    /// Overlay caller values, which win over the defaults
    ///
    /// `kwargs` must serialize to a map; unit and `None` add nothing.
    pub fn merge<S: Serialize>(mut self, kwargs: S) -> Result<Self> {
        let kwargs = Value::from_serialize(&kwargs);
        match kwargs.kind() {
            ValueKind::Undefined | ValueKind::None => return Ok(self),
            ValueKind::Map => {}
            other => return Err(Error::InvalidContext(other.to_string())),
        }

        for key in kwargs.try_iter()? {
            let Some(name) = key.as_str() else {
                return Err(Error::InvalidContext(format!("map with key {}", key)));
            };
            let value = kwargs.get_item(&key)?;
            self.values.insert(name.to_string(), value);
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn into_value(self) -> Value {
        Value::from_iter(self.values)
    }
}

#[derive(Serialize)]
struct HandlerView<'a> {
    path_args: &'a [String],
    path_kwargs: &'a BTreeMap<String, String>,
    locale: &'a str,
    current_user: Option<&'a serde_json::Value>,
    xsrf_token: &'a str,
}

fn format_time<Tz>(
    time: DateTime<Tz>,
    format: Option<String>,
) -> std::result::Result<String, minijinja::Error>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let Some(format) = format else {
        return Ok(time.to_rfc3339());
    };
    let mut out = String::new();
    write!(out, "{}", time.format(&format)).map_err(|_| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("invalid datetime format {:?}", format),
        )
    })?;
    Ok(out)
}

fn now(format: Option<String>) -> std::result::Result<String, minijinja::Error> {
    format_time(Local::now(), format)
}

fn utcnow(format: Option<String>) -> std::result::Result<String, minijinja::Error> {
    format_time(Utc::now(), format)
}

fn today() -> String {
    Local::now().date_naive().to_string()
}
