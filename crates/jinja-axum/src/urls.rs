use std::collections::BTreeMap;

use jinja_axum_core::escape::url_escape;

use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Capture(String),
}

/// A route path such as `/users/{id}` split into literal and capture parts
#[derive(Debug, Clone)]
pub struct UrlPattern {
    path: String,
    segments: Vec<Segment>,
}

impl UrlPattern {
    pub fn parse(path: &str) -> Self {
        let mut segments = Vec::new();
        let mut rest = path;
        while let Some(start) = rest.find('{') {
            let Some(len) = rest[start..].find('}') else {
                break;
            };
            if start > 0 {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }
            let name = rest[start + 1..start + len].trim_start_matches('*');
            segments.push(Segment::Capture(name.to_string()));
            rest = &rest[start + len + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        Self {
            path: path.to_string(),
            segments,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn captures(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| matches!(s, Segment::Capture(_)))
            .count()
    }
}

/// Named routes, used to build URLs back from a name
#[derive(Debug, Clone, Default)]
pub struct UrlRegistry {
    routes: BTreeMap<String, UrlPattern>,
}

impl UrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, path: &str) {
        self.routes.insert(name.into(), UrlPattern::parse(path));
    }

    pub fn get(&self, name: &str) -> Option<&UrlPattern> {
        self.routes.get(name)
    }

    /// Fill the captures of route `name` with `args`, in order
    pub fn reverse(&self, name: &str, args: &[String]) -> Result<String> {
        let pattern = self
            .routes
            .get(name)
            .ok_or_else(|| Error::ReverseUrl(format!("{} not found in named urls", name)))?;

        if pattern.captures() != args.len() {
            return Err(Error::ReverseUrl(format!(
                "{} takes {} arguments, got {}",
                name,
                pattern.captures(),
                args.len()
            )));
        }

        let mut args = args.iter();
        let mut url = String::with_capacity(pattern.path.len());
        for segment in &pattern.segments {
            match segment {
                Segment::Literal(text) => url.push_str(text),
                Segment::Capture(_) => {
                    if let Some(arg) = args.next() {
                        url.push_str(&url_escape(arg, false));
                    }
                }
            }
        }
        Ok(url)
    }
}
