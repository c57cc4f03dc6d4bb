//! Locale negotiation and translation catalogs
//!
//! Catalogs are JSON files named after their locale (`fr_FR.json`) mapping a
//! message either to its translation or to `{"singular": .., "plural": ..}`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Languages written right to left
const RTL_LANGUAGES: [&str; 3] = ["ar", "fa", "he"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Simple(String),
    Plural { singular: String, plural: String },
}

pub type Catalog = HashMap<String, Message>;

/// All loaded catalogs plus the fallback locale
#[derive(Debug, Clone)]
pub struct Translations {
    catalogs: BTreeMap<String, Arc<Catalog>>,
    default_locale: String,
}

impl Translations {
    /// No catalogs, every message translates to itself
    pub fn empty(default_locale: impl Into<String>) -> Self {
        Self {
            catalogs: BTreeMap::new(),
            default_locale: default_locale.into(),
        }
    }

    pub fn insert(&mut self, code: impl Into<String>, catalog: Catalog) {
        self.catalogs.insert(code.into(), Arc::new(catalog));
    }

    /// Load every `*.json` catalog in `dir`
    pub fn load_dir(dir: &Path, default_locale: impl Into<String>) -> Result<Self> {
        let mut translations = Self::empty(default_locale);
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(code) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = std::fs::read_to_string(&path)?;
            let catalog: Catalog = serde_json::from_str(&content).map_err(|e| {
                Error::Configuration(format!(
                    "Invalid translation file {}: {}",
                    path.display(),
                    e
                ))
            })?;
            tracing::info!("Loaded {} translations for {}", catalog.len(), code);
            translations.insert(code.to_string(), catalog);
        }
        Ok(translations)
    }

    pub fn supported(&self) -> impl Iterator<Item = &str> {
        self.catalogs.keys().map(String::as_str)
    }

    /// Best match for `codes` (in preference order)
    ///
    /// Exact codes win, then a catalog sharing the language, then the default.
    pub fn get_closest<S: AsRef<str>>(&self, codes: &[S]) -> Locale {
        for code in codes {
            let normalized = normalize_code(code.as_ref());
            if self.catalogs.contains_key(&normalized) {
                return self.locale(&normalized);
            }
            let language = normalized.split('_').next().unwrap_or_default();
            if let Some(found) = self
                .catalogs
                .keys()
                .find(|c| c.as_str() == language || c.split('_').next() == Some(language))
            {
                return self.locale(found);
            }
        }
        self.locale(&self.default_locale)
    }

    /// The locale for `code`, translating nothing if there is no catalog
    pub fn locale(&self, code: &str) -> Locale {
        Locale {
            code: code.to_string(),
            catalog: self.catalogs.get(code).cloned().unwrap_or_default(),
        }
    }
}

/// `en-us` → `en_US`
fn normalize_code(code: &str) -> String {
    let code = code.trim().replace('-', "_");
    match code.split_once('_') {
        Some((language, region)) => {
            format!("{}_{}", language.to_lowercase(), region.to_uppercase())
        }
        None => code.to_lowercase(),
    }
}

/// Locale codes from an `Accept-Language` header, most preferred first
pub fn parse_accept_language(header: &str) -> Vec<String> {
    let mut weighted: Vec<(String, f32)> = header
        .split(',')
        .filter_map(|part| {
            let mut pieces = part.split(';');
            let code = pieces.next()?.trim();
            if code.is_empty() || code == "*" {
                return None;
            }
            let mut quality = 1.0;
            for param in pieces {
                if let Some(q) = param.trim().strip_prefix("q=") {
                    quality = q.trim().parse().unwrap_or(0.0);
                }
            }
            (quality > 0.0).then(|| (code.to_string(), quality))
        })
        .collect();
    // stable sort keeps header order among equal weights
    weighted.sort_by(|a, b| b.1.total_cmp(&a.1));
    weighted.into_iter().map(|(code, _)| code).collect()
}

/// A resolved locale and its catalog
#[derive(Debug, Clone, Serialize)]
pub struct Locale {
    code: String,
    #[serde(skip)]
    catalog: Arc<Catalog>,
}

impl Locale {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_rtl(&self) -> bool {
        let language = self.code.split('_').next().unwrap_or_default();
        RTL_LANGUAGES.contains(&language)
    }

    /// Translate `message`, choosing `plural` when `count` is not 1
    pub fn translate(&self, message: &str, plural: Option<&str>, count: Option<i64>) -> String {
        let wants_plural = matches!((plural, count), (Some(_), Some(n)) if n != 1);
        let key = match plural {
            Some(plural) if wants_plural => plural,
            _ => message,
        };

        match self.catalog.get(message).or_else(|| self.catalog.get(key)) {
            Some(Message::Simple(text)) if !wants_plural => text.clone(),
            Some(Message::Plural { singular, plural }) => {
                if wants_plural {
                    plural.clone()
                } else {
                    singular.clone()
                }
            }
            _ => key.to_string(),
        }
    }

    /// View of the locale handed to templates
    pub(crate) fn describe(&self) -> LocaleView<'_> {
        LocaleView {
            code: &self.code,
            rtl: self.is_rtl(),
        }
    }
}

#[derive(Serialize)]
pub(crate) struct LocaleView<'a> {
    code: &'a str,
    rtl: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translations() -> Translations {
        let mut t = Translations::empty("en_US");
        let mut fr = Catalog::new();
        fr.insert("Hello".into(), Message::Simple("Bonjour".into()));
        fr.insert(
            "%(n)s apple".into(),
            Message::Plural {
                singular: "%(n)s pomme".into(),
                plural: "%(n)s pommes".into(),
            },
        );
        t.insert("fr_FR", fr);
        t.insert("es_ES", Catalog::new());
        t
    }

    #[test]
    fn test_parse_accept_language() {
        assert_eq!(
            parse_accept_language("fr-CH, fr;q=0.9, en;q=0.8, de;q=0.7, *;q=0.5"),
            vec!["fr-CH", "fr", "en", "de"]
        );
        assert_eq!(parse_accept_language("en;q=0.5, es"), vec!["es", "en"]);
        assert_eq!(parse_accept_language("xx;q=0"), Vec::<String>::new());
        assert!(parse_accept_language("").is_empty());
    }

    #[test]
    fn test_get_closest() {
        let t = translations();
        assert_eq!(t.get_closest(&["fr-fr"]).code(), "fr_FR");
        assert_eq!(t.get_closest(&["fr-CA"]).code(), "fr_FR");
        assert_eq!(t.get_closest(&["de", "es"]).code(), "es_ES");
        assert_eq!(t.get_closest(&["de"]).code(), "en_US");
        assert_eq!(t.get_closest::<&str>(&[]).code(), "en_US");
    }

    #[test]
    fn test_translate() {
        let fr = translations().locale("fr_FR");
        assert_eq!(fr.translate("Hello", None, None), "Bonjour");
        assert_eq!(fr.translate("Bye", None, None), "Bye");
        assert_eq!(
            fr.translate("%(n)s apple", Some("%(n)s apples"), Some(1)),
            "%(n)s pomme"
        );
        assert_eq!(
            fr.translate("%(n)s apple", Some("%(n)s apples"), Some(3)),
            "%(n)s pommes"
        );

        let en = translations().locale("en_US");
        assert_eq!(
            en.translate("%(n)s apple", Some("%(n)s apples"), Some(3)),
            "%(n)s apples"
        );
    }

    #[test]
    fn test_rtl() {
        let t = Translations::empty("ar_AR");
        assert!(t.locale("ar_AR").is_rtl());
        assert!(!t.locale("en_US").is_rtl());
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("de_DE.json"), r#"{"Hello": "Hallo"}"#).unwrap();
        std::fs::write(dir.path().join("README.txt"), "ignored").unwrap();

        let t = Translations::load_dir(dir.path(), "en_US").unwrap();
        assert_eq!(t.supported().collect::<Vec<_>>(), vec!["de_DE"]);
        assert_eq!(t.locale("de_DE").translate("Hello", None, None), "Hallo");
    }
}
