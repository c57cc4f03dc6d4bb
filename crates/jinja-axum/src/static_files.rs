use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sha2::{Digest, Sha256};

use crate::config::Settings;

/// Length of the content hash appended as `?v=`
const VERSION_LEN: usize = 12;

/// Builds versioned URLs for files under `static_path`
#[derive(Debug)]
pub struct StaticUrls {
    prefix: String,
    root: Option<PathBuf>,
    cache_versions: bool,
    versions: Mutex<HashMap<String, Option<String>>>,
}

impl StaticUrls {
    pub fn new(prefix: impl Into<String>, root: Option<PathBuf>, cache_versions: bool) -> Self {
        Self {
            prefix: prefix.into(),
            root,
            cache_versions,
            versions: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.static_url_prefix.clone(),
            settings.static_path.clone(),
            settings.static_hash_cache(),
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// URL of a static file, with a content version unless `include_version` is off
    pub fn static_url(&self, path: &str, include_version: bool) -> String {
        let path = path.trim_start_matches('/');
        let url = format!("{}{}", self.prefix, path);
        if !include_version {
            return url;
        }
        match self.version(path) {
            Some(version) => format!("{}?v={}", url, version),
            None => url,
        }
    }

    fn version(&self, path: &str) -> Option<String> {
        if !self.cache_versions {
            return self.compute_version(path);
        }
        let mut versions = self
            .versions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        versions
            .entry(path.to_string())
            .or_insert_with(|| self.compute_version(path))
            .clone()
    }

    fn compute_version(&self, path: &str) -> Option<String> {
        let root = self.root.as_ref()?;
        if path.split('/').any(|piece| piece == "..") {
            return None;
        }
        match std::fs::read(root.join(path)) {
            Ok(content) => {
                let digest = format!("{:x}", Sha256::digest(&content));
                Some(digest[..VERSION_LEN].to_string())
            }
            Err(e) => {
                tracing::warn!("Could not open static file {}: {}", path, e);
                None
            }
        }
    }
}
