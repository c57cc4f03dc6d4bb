//! Base request handler
//!
//! `HandlerBase` is the set of request capabilities the render layer builds
//! on. `RequestHandler` is the stock implementation, extracted from the
//! request parts of every route.

use std::collections::BTreeMap;

use axum::extract::{FromRequestParts, MatchedPath, Query, RawPathParams};
use axum::http::header::{ACCEPT_LANGUAGE, HOST};
use axum::http::request::Parts;
use axum::response::{Html, IntoResponse, Response};
use axum_extra::extract::cookie::{Cookie, CookieJar, SignedCookieJar};
use jinja_axum_core::escape::xhtml_escape;
use serde::Serialize;

use crate::locale::{Locale, parse_accept_language};
use crate::middleware::CurrentUser;
use crate::{AppState, Error};

/// Cookie carrying the XSRF token
pub const XSRF_COOKIE: &str = "_xsrf";

/// Result of reading a signed cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CookieLookup {
    /// No cookie with that name
    Missing,
    /// Present but the signature did not verify
    Invalid,
    Value(String),
}

impl CookieLookup {
    pub fn value(self) -> Option<String> {
        match self {
            CookieLookup::Value(value) => Some(value),
            _ => None,
        }
    }
}

/// What templates see as `request`
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestInfo {
    pub method: String,
    pub uri: String,
    pub path: String,
    pub query: Option<String>,
    pub host: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub arguments: BTreeMap<String, Vec<String>>,
    pub matched_path: Option<String>,
}

impl RequestInfo {
    pub fn from_parts(parts: &Parts) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &parts.headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let mut arguments: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(&parts.uri) {
            for (name, value) in pairs {
                arguments.entry(name).or_default().push(value);
            }
        }

        let host = parts
            .headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.host().map(str::to_string));

        Self {
            method: parts.method.to_string(),
            uri: parts.uri.to_string(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            host,
            headers,
            arguments,
            matched_path: parts
                .extensions
                .get::<MatchedPath>()
                .map(|p| p.as_str().to_string()),
        }
    }
}

/// Capabilities of a request handler that templates can be rendered on top of
pub trait HandlerBase: Send {
    fn state(&self) -> &AppState;

    fn request(&self) -> &RequestInfo;

    /// Path captures in route order
    fn path_args(&self) -> &[String];

    /// Path captures by name
    fn path_kwargs(&self) -> &BTreeMap<String, String>;

    fn locale(&self) -> &Locale;

    fn current_user(&self) -> Option<&serde_json::Value>;

    fn xsrf_token(&self) -> &str;

    /// Hidden form field carrying the XSRF token
    fn xsrf_form_html(&self) -> String {
        format!(
            r#"<input type="hidden" name="_xsrf" value="{}"/>"#,
            xhtml_escape(self.xsrf_token())
        )
    }

    fn signed_cookie(&self, name: &str) -> CookieLookup;

    fn set_signed_cookie(&mut self, name: &str, value: String);

    /// Turn the handler into the final response, `chunk` being the body
    fn finish(self, chunk: Option<String>) -> Response
    where
        Self: Sized;
}

/// Stock handler built from the request parts
pub struct RequestHandler {
    state: AppState,
    request: RequestInfo,
    path_args: Vec<String>,
    path_kwargs: BTreeMap<String, String>,
    locale: Locale,
    current_user: Option<serde_json::Value>,
    xsrf_token: String,
    cookies: CookieJar,
    signed: SignedCookieJar,
}

impl RequestHandler {
    pub async fn from_parts(parts: &mut Parts, state: &AppState) -> Self {
        let (path_args, path_kwargs) = match RawPathParams::from_request_parts(parts, state).await
        {
            Ok(params) => {
                let mut args = Vec::new();
                let mut kwargs = BTreeMap::new();
                for (name, value) in params.iter() {
                    args.push(value.to_string());
                    kwargs.insert(name.to_string(), value.to_string());
                }
                (args, kwargs)
            }
            Err(e) => {
                tracing::debug!("No path captures: {}", e);
                (Vec::new(), BTreeMap::new())
            }
        };

        let codes = parts
            .headers
            .get(ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
            .map(parse_accept_language)
            .unwrap_or_default();
        let locale = state.translations.get_closest(&codes);

        let mut cookies = CookieJar::from_headers(&parts.headers);
        let existing = cookies
            .get(XSRF_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|token| !token.is_empty());
        let xsrf_token = match existing {
            Some(token) => token,
            None => {
                let token = uuid::Uuid::new_v4().simple().to_string();
                if state.settings.xsrf_cookies {
                    cookies = cookies.add(Cookie::build((XSRF_COOKIE, token.clone())).path("/"));
                }
                token
            }
        };

        Self {
            state: state.clone(),
            request: RequestInfo::from_parts(parts),
            path_args,
            path_kwargs,
            locale,
            current_user: parts
                .extensions
                .get::<CurrentUser>()
                .map(|user| user.0.clone()),
            xsrf_token,
            cookies,
            signed: SignedCookieJar::from_headers(&parts.headers, state.key.clone()),
        }
    }

    /// Plain (unsigned) cookie jar of the request
    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn set_cookie(&mut self, cookie: Cookie<'static>) {
        self.cookies = self.cookies.clone().add(cookie);
    }
}

impl HandlerBase for RequestHandler {
    fn state(&self) -> &AppState {
        &self.state
    }

    fn request(&self) -> &RequestInfo {
        &self.request
    }

    fn path_args(&self) -> &[String] {
        &self.path_args
    }

    fn path_kwargs(&self) -> &BTreeMap<String, String> {
        &self.path_kwargs
    }

    fn locale(&self) -> &Locale {
        &self.locale
    }

    fn current_user(&self) -> Option<&serde_json::Value> {
        self.current_user.as_ref()
    }

    fn xsrf_token(&self) -> &str {
        &self.xsrf_token
    }

    fn signed_cookie(&self, name: &str) -> CookieLookup {
        match self.signed.get(name) {
            Some(cookie) => CookieLookup::Value(cookie.value().to_string()),
            // the signed jar hides cookies that fail verification
            None if self.cookies.get(name).is_some() => CookieLookup::Invalid,
            None => CookieLookup::Missing,
        }
    }

    fn set_signed_cookie(&mut self, name: &str, value: String) {
        let cookie = Cookie::build((name.to_string(), value))
            .path("/")
            .http_only(true);
        self.signed = self.signed.clone().add(cookie);
    }

    fn finish(self, chunk: Option<String>) -> Response {
        (self.cookies, self.signed, Html(chunk.unwrap_or_default())).into_response()
    }
}

impl FromRequestParts<AppState> for RequestHandler {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Error> {
        Ok(Self::from_parts(parts, state).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str) -> Parts {
        let (parts, _) = Request::builder()
            .uri(uri)
            .header("host", "example.com")
            .header("accept", "text/html")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_request_info() {
        let info = RequestInfo::from_parts(&parts("/search?q=rust&tag=a&tag=b"));
        assert_eq!(info.method, "GET");
        assert_eq!(info.path, "/search");
        assert_eq!(info.query.as_deref(), Some("q=rust&tag=a&tag=b"));
        assert_eq!(info.host.as_deref(), Some("example.com"));
        assert_eq!(info.headers["accept"], "text/html");
        assert_eq!(info.arguments["q"], vec!["rust"]);
        assert_eq!(info.arguments["tag"], vec!["a", "b"]);
        assert_eq!(info.matched_path, None);
    }

    #[test]
    fn test_cookie_lookup_value() {
        assert_eq!(
            CookieLookup::Value("x".to_string()).value(),
            Some("x".to_string())
        );
        assert_eq!(CookieLookup::Invalid.value(), None);
        assert_eq!(CookieLookup::Missing.value(), None);
    }
}
