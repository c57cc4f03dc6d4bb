use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::Result;
use crate::handler::CookieLookup;

/// Name of the signed cookie the session lives in
pub const SESSION_COOKIE: &str = "session";

/// Per-request key/value store persisted in a signed cookie
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session(Map<String, Value>);

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the session from a cookie lookup, starting empty on any failure
    pub fn from_cookie(lookup: CookieLookup) -> Self {
        match lookup {
            CookieLookup::Missing => {
                debug!("No session cookie, starting empty session");
                Self::default()
            }
            CookieLookup::Invalid => {
                warn!("Session cookie failed signature verification, starting empty session");
                Self::default()
            }
            CookieLookup::Value(raw) => match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(values) => {
                    debug!("Loaded session with {} keys", values.len());
                    Self(values)
                }
                Err(e) => {
                    warn!("Session cookie is not a JSON object ({}), starting empty session", e);
                    Self::default()
                }
            },
        }
    }

    /// JSON payload written back to the cookie
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl Deref for Session {
    type Target = Map<String, Value>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Session {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Map<String, Value>> for Session {
    fn from(values: Map<String, Value>) -> Self {
        Self(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_and_invalid_are_empty() {
        assert!(Session::from_cookie(CookieLookup::Missing).is_empty());
        assert!(Session::from_cookie(CookieLookup::Invalid).is_empty());
    }

    #[test]
    fn test_bad_payloads_are_empty() {
        for raw in ["not json", "[1, 2]", "\"text\"", ""] {
            let session = Session::from_cookie(CookieLookup::Value(raw.to_string()));
            assert!(session.is_empty(), "{raw:?} should give an empty session");
        }
    }

    #[test]
    fn test_encode_decode() {
        let mut session = Session::new();
        session.insert("user".to_string(), json!({"id": 7, "name": "ann"}));
        session.insert("count".to_string(), json!(3));

        let encoded = session.encode().unwrap();
        let decoded = Session::from_cookie(CookieLookup::Value(encoded));
        assert_eq!(decoded, session);
        assert_eq!(decoded["count"], 3);
    }
}
