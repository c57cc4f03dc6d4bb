//! Text helpers exposed to templates as filters
//!
//! These follow the usual web-framework escaping conventions so templates
//! ported from other Jinja hosts keep producing the same markup.

use once_cell::sync::Lazy;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

/// Everything but `[A-Za-z0-9_.~-]` is encoded
const QUOTE_PLUS: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~');

/// Same as [`QUOTE_PLUS`] but keeps path separators
const QUOTE: &AsciiSet = &QUOTE_PLUS.remove(b'/');

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\x00-\x20]+").unwrap());

static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r##"\b((?:([\w-]+):(/{1,3})|www[.])(?:(?:(?:[^\s&()]|&amp;|&quot;)*(?:[^!"#$%&'()*+,.:;<=>?@\[\]^`{|}~\s]))|(?:\((?:[^\s&()]|&amp;|&quot;)*\)))+)"##,
    )
    .unwrap()
});

/// Link text longer than this is clipped by `linkify(shorten=true)`
const SHORTEN_MAX_LEN: usize = 30;

/// Escape a string so it is valid within HTML or XML
pub fn xhtml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Percent-encode a value for use in a URL
///
/// With `plus` spaces become `+` and `/` is encoded (query values), without
/// it `/` is kept (path segments).
pub fn url_escape(value: &str, plus: bool) -> String {
    if plus {
        utf8_percent_encode(value, QUOTE_PLUS)
            .to_string()
            .replace("%20", "+")
    } else {
        utf8_percent_encode(value, QUOTE).to_string()
    }
}

/// Collapse runs of whitespace into a single space and trim the ends
pub fn squeeze(value: &str) -> String {
    WHITESPACE_RE.replace_all(value, " ").trim().to_string()
}

/// JSON encode `value` so the output can be embedded in HTML and `<script>`
pub fn json_dumps<T>(value: &T, indent: Option<usize>) -> serde_json::Result<String>
where
    T: Serialize + ?Sized,
{
    let raw = match indent {
        None => serde_json::to_string(value)?,
        Some(width) => {
            let indent = " ".repeat(width);
            let mut buf = Vec::new();
            let formatter = PrettyFormatter::with_indent(indent.as_bytes());
            let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
            value.serialize(&mut ser)?;
            // serde_json only ever writes valid UTF-8
            String::from_utf8_lossy(&buf).into_owned()
        }
    };
    Ok(html_safe_json(&raw))
}

/// Replace the characters that can break out of an HTML or script context
pub fn html_safe_json(json: &str) -> String {
    json.replace('<', "\\u003c")
        .replace('>', "\\u003e")
        .replace('&', "\\u0026")
        .replace('\'', "\\u0027")
}

/// Options of [`linkify`]
#[derive(Debug, Clone)]
pub struct LinkifyOptions {
    /// Clip long link texts
    pub shorten: bool,
    /// Extra attributes appended to every `<a>` tag
    pub extra_params: String,
    /// Only linkify URLs that carry a protocol
    pub require_protocol: bool,
    /// Protocols that may be linked
    pub permitted_protocols: Vec<String>,
}

impl Default for LinkifyOptions {
    fn default() -> Self {
        Self {
            shorten: false,
            extra_params: String::new(),
            require_protocol: false,
            permitted_protocols: vec!["http".to_string(), "https".to_string()],
        }
    }
}

/// Escape `text` and turn the URLs it contains into links
pub fn linkify(text: &str, options: &LinkifyOptions) -> String {
    let extra_params = if options.extra_params.trim().is_empty() {
        String::new()
    } else {
        format!(" {}", options.extra_params.trim())
    };

    let escaped = xhtml_escape(text);
    URL_RE
        .replace_all(&escaped, |caps: &Captures| {
            make_link(caps, options, &extra_params)
        })
        .into_owned()
}

fn make_link(caps: &Captures, options: &LinkifyOptions, extra_params: &str) -> String {
    let url = &caps[1];
    let proto = caps.get(2).map(|m| m.as_str());

    match proto {
        None if options.require_protocol => return url.to_string(),
        Some(p) if !options.permitted_protocols.iter().any(|allowed| allowed == p) => {
            return url.to_string();
        }
        _ => {}
    }

    let href = match proto {
        Some(_) => url.to_string(),
        None => format!("http://{}", url),
    };
    let mut params = extra_params.to_string();
    let mut text = url.to_string();

    if options.shorten && url.chars().count() > SHORTEN_MAX_LEN {
        let proto_len = match proto {
            Some(p) => p.len() + 1 + caps.get(3).map_or(0, |m| m.len()),
            None => 0,
        };
        if let Some(clipped) = shorten_url(url, proto_len) {
            text = clipped;
            params.push_str(&format!(" title=\"{}\"", href));
        }
    }

    format!("<a href=\"{}\"{}>{}</a>", href, params, text)
}

/// Returns the clipped link text, or `None` when clipping would not help
fn shorten_url(url: &str, proto_len: usize) -> Option<String> {
    let (head, rest) = url.split_at(proto_len);
    let parts: Vec<&str> = rest.split('/').collect();

    let mut clipped = url.to_string();
    if parts.len() > 1 {
        let first: String = parts[1].chars().take(8).collect();
        let first = first.split('?').next().unwrap_or("");
        let first = first.split('.').next().unwrap_or("");
        clipped = format!("{}{}/{}", head, parts[0], first);
    }

    if clipped.chars().count() > SHORTEN_MAX_LEN * 3 / 2 {
        clipped = clipped.chars().take(SHORTEN_MAX_LEN).collect();
    }

    if clipped == url {
        return None;
    }

    // do not cut an html entity in half
    if let Some(amp) = clipped.rfind('&') {
        if amp > SHORTEN_MAX_LEN - 5 {
            clipped.truncate(amp);
        }
    }
    clipped.push_str("...");

    if clipped.chars().count() >= url.chars().count() {
        None
    } else {
        Some(clipped)
    }
}
