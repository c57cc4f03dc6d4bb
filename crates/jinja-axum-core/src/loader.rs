use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use crate::{TemplateError, TemplateResult};

/// Loads template sources from a directory
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    search_path: PathBuf,
}

impl FileSystemLoader {
    /// Create a new loader rooted at `search_path`
    pub fn new(search_path: impl AsRef<Path>) -> Self {
        Self {
            search_path: search_path.as_ref().to_path_buf(),
        }
    }

    pub fn search_path(&self) -> &Path {
        &self.search_path
    }

    /// Map a template name to a file below the search path
    ///
    /// Names are `/` separated and may not leave the search path.
    pub fn resolve(&self, name: &str) -> TemplateResult<PathBuf> {
        match safe_join(&self.search_path, name) {
            Some(path) if path != self.search_path => Ok(path),
            _ => Err(TemplateError::InvalidName(name.to_string())),
        }
    }

    /// Read a template, `None` if no such file exists
    pub fn load(&self, name: &str) -> TemplateResult<Option<LoadedSource>> {
        let path = self.resolve(name)?;
        let source = match std::fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = modified_time(&path);
        Ok(Some(LoadedSource {
            source: Arc::from(source),
            modified,
        }))
    }

    fn modified(&self, name: &str) -> Option<SystemTime> {
        self.resolve(name).ok().and_then(|path| modified_time(&path))
    }
}

/// Safely joins two paths (same rule as minijinja's internal `safe_join`,
/// which is not exported).
fn safe_join(base: &Path, template: &str) -> Option<PathBuf> {
    let mut rv = base.to_path_buf();
    for segment in template.split('/') {
        if segment.starts_with('.') || segment.contains('\\') {
            return None;
        }
        rv.push(segment);
    }
    Some(rv)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// A template source as read from disk
#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub source: Arc<str>,
    pub modified: Option<SystemTime>,
}

/// File system loader with a bounded, least recently used source cache
///
/// A capacity of 0 disables caching and every lookup reads the file.
/// With `auto_reload` a cached entry is dropped once its file changed.
///
/// Whenever an entry leaves the cache the loader is marked stale, so the
/// environment can drop the compiled templates built from it.
#[derive(Debug)]
pub struct TemplateLoader {
    fs: FileSystemLoader,
    capacity: usize,
    auto_reload: bool,
    cache: Mutex<SourceCache>,
    stale: AtomicBool,
    lookups: AtomicUsize,
}

#[derive(Debug, Default)]
struct SourceCache {
    entries: HashMap<String, LoadedSource>,
    order: VecDeque<String>,
}

impl SourceCache {
    fn touch(&mut self, name: &str) {
        if let Some(pos) = self.order.iter().position(|n| n == name) {
            if let Some(key) = self.order.remove(pos) {
                self.order.push_back(key);
            }
        }
    }

    fn remove(&mut self, name: &str) {
        self.entries.remove(name);
        self.order.retain(|n| n != name);
    }

    /// Insert `loaded`, returns true if another entry had to go
    fn insert(&mut self, name: &str, loaded: LoadedSource, capacity: usize) -> bool {
        self.remove(name);
        let mut evicted_any = false;
        while self.order.len() >= capacity {
            match self.order.pop_front() {
                Some(evicted) => {
                    tracing::debug!("Evicting template from cache: {}", evicted);
                    self.entries.remove(&evicted);
                    evicted_any = true;
                }
                None => break,
            }
        }
        self.entries.insert(name.to_string(), loaded);
        self.order.push_back(name.to_string());
        evicted_any
    }
}

impl TemplateLoader {
    pub fn new(fs: FileSystemLoader, capacity: usize, auto_reload: bool) -> Self {
        Self {
            fs,
            capacity,
            auto_reload,
            cache: Mutex::new(SourceCache::default()),
            stale: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn search_path(&self) -> &Path {
        self.fs.search_path()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of sources currently cached
    pub fn cached_len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Number of `get_source` calls served so far
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Look up a template source, consulting the cache first
    pub fn get_source(&self, name: &str) -> TemplateResult<Option<Arc<str>>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if self.capacity == 0 {
            return Ok(self.fs.load(name)?.map(|loaded| loaded.source));
        }

        if let Some(cached) = self.cached(name) {
            if !self.auto_reload || self.fs.modified(name) == cached.modified {
                tracing::debug!("Template cache hit: {}", name);
                return Ok(Some(cached.source));
            }
            tracing::debug!("Template changed on disk, reloading: {}", name);
        }

        match self.fs.load(name)? {
            Some(loaded) => {
                let source = loaded.source.clone();
                if self.lock().insert(name, loaded, self.capacity) {
                    self.mark_stale();
                }
                Ok(Some(source))
            }
            None => {
                self.lock().remove(name);
                Ok(None)
            }
        }
    }

    /// True if a cached source no longer matches its file's mtime
    ///
    /// Always false without `auto_reload`.
    pub fn any_modified(&self) -> bool {
        if !self.auto_reload {
            return false;
        }
        let cache = self.lock();
        cache
            .entries
            .iter()
            .any(|(name, loaded)| self.fs.modified(name) != loaded.modified)
    }

    /// Return and reset the stale mark
    pub fn take_stale(&self) -> bool {
        self.stale.swap(false, Ordering::AcqRel)
    }

    fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Drop every cached source
    pub fn clear(&self) {
        let mut cache = self.lock();
        cache.entries.clear();
        cache.order.clear();
        self.mark_stale();
    }

    fn cached(&self, name: &str) -> Option<LoadedSource> {
        let mut cache = self.lock();
        let hit = cache.entries.get(name).cloned();
        if hit.is_some() {
            cache.touch(name);
        }
        hit
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SourceCache> {
        // the cache holds no invariant a panicking holder could break
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_resolve_rejects_escaping_names() {
        let loader = FileSystemLoader::new("templates");
        assert_eq!(
            loader.resolve("pages/index.html").unwrap(),
            PathBuf::from("templates/pages/index.html")
        );
        assert!(loader.resolve("../secret.txt").is_err());
        assert!(loader.resolve("pages/../../secret.txt").is_err());
        assert!(loader.resolve("").is_err());
        assert!(loader.resolve("pages\\..\\secret.txt").is_err());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileSystemLoader::new(dir.path());
        assert!(loader.load("nope.html").unwrap().is_none());
    }

    #[test]
    fn test_cache_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            write(dir.path(), &format!("t{}.html", i), "x");
        }
        let loader = TemplateLoader::new(FileSystemLoader::new(dir.path()), 3, false);

        for i in 0..3 {
            loader.get_source(&format!("t{}.html", i)).unwrap().unwrap();
        }
        assert!(!loader.take_stale());

        for i in 3..5 {
            loader.get_source(&format!("t{}.html", i)).unwrap().unwrap();
        }
        assert_eq!(loader.cached_len(), 3);
        assert!(loader.take_stale());
        assert!(!loader.take_stale());
        assert_eq!(loader.lookups(), 5);
    }

    #[test]
    fn test_cache_serves_stale_source_without_reload() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.html", "one");
        let loader = TemplateLoader::new(FileSystemLoader::new(dir.path()), 50, false);

        assert_eq!(&*loader.get_source("a.html").unwrap().unwrap(), "one");
        write(dir.path(), "a.html", "two");
        assert_eq!(&*loader.get_source("a.html").unwrap().unwrap(), "one");

        loader.clear();
        assert_eq!(&*loader.get_source("a.html").unwrap().unwrap(), "two");
    }

    #[test]
    fn test_zero_capacity_always_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.html", "one");
        let loader = TemplateLoader::new(FileSystemLoader::new(dir.path()), 0, false);

        assert_eq!(&*loader.get_source("a.html").unwrap().unwrap(), "one");
        write(dir.path(), "a.html", "two");
        assert_eq!(&*loader.get_source("a.html").unwrap().unwrap(), "two");
        assert_eq!(loader.cached_len(), 0);
    }

    #[test]
    fn test_auto_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.html", "one");
        let loader = TemplateLoader::new(FileSystemLoader::new(dir.path()), 50, true);
        assert_eq!(&*loader.get_source("a.html").unwrap().unwrap(), "one");
        assert!(!loader.any_modified());

        let path = dir.path().join("a.html");
        fs::write(&path, "two").unwrap();
        let later = SystemTime::now() + std::time::Duration::from_secs(10);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        assert!(loader.any_modified());
        assert_eq!(&*loader.get_source("a.html").unwrap().unwrap(), "two");
    }
}
