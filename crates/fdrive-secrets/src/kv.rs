//! Local key-value persistence backing the key custody cache
//!
//! Shaped like browser local storage: string keys to string values, no
//! transactions, and a backend that may refuse to persist anything at all.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A device-local string store.
pub trait KvStore: Send + Sync {
    /// Read a value. `Ok(None)` when the key was never written.
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    /// Write a value, replacing any previous one.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    /// Short name for logs
    fn backend_name(&self) -> &'static str;
}

/// Process-memory store, used in tests and for `--no-cache`-style sessions.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory kv lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory kv lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Durable store: one JSON object `{key: value}` in a single file.
///
/// Writes go to a temp sibling and are renamed into place, so a crash never
/// leaves a half-written file behind.
#[derive(Debug)]
pub struct JsonFileKv {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileKv {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<HashMap<String, String>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading kv file: {}", self.path.display()))?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("parsing kv file: {}", self.path.display()))
    }

    fn store(&self, entries: &HashMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating kv dir: {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(entries).context("serializing kv file")?;

        let tmp_path = self.path.with_extension("tmp");
        std::fs::write(&tmp_path, &json)
            .with_context(|| format!("writing kv temp: {}", tmp_path.display()))?;
        restrict_permissions(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("renaming kv file: {}", self.path.display()))?;
        Ok(())
    }
}

impl KvStore for JsonFileKv {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("kv write lock poisoned"))?;
        // A corrupt file is replaced rather than blocking every write
        let mut entries = self.load().unwrap_or_default();
        entries.insert(key.to_string(), value.to_string());
        self.store(&entries)
    }

    fn backend_name(&self) -> &'static str {
        "json-file"
    }
}

/// Storage that is unavailable: reads find nothing, writes fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledKv;

impl KvStore for DisabledKv {
    fn get_item(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<()> {
        anyhow::bail!("local key storage is disabled")
    }

    fn backend_name(&self) -> &'static str {
        "disabled"
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .with_context(|| format!("setting permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_kv() {
        let kv = MemoryKv::new();
        assert_eq!(kv.get_item("a").unwrap(), None);
        kv.set_item("a", "1").unwrap();
        kv.set_item("a", "2").unwrap();
        assert_eq!(kv.get_item("a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_json_file_kv_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/keys.json");

        let kv = JsonFileKv::new(&path);
        kv.set_item("x", "hello").unwrap();
        kv.set_item("y", "world").unwrap();

        let reopened = JsonFileKv::new(&path);
        assert_eq!(reopened.get_item("x").unwrap().as_deref(), Some("hello"));
        assert_eq!(reopened.get_item("y").unwrap().as_deref(), Some("world"));
        assert!(!path.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_json_file_kv_is_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        JsonFileKv::new(&path).set_item("x", "1").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_json_file_kv_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.json");
        std::fs::write(&path, "{not json").unwrap();

        let kv = JsonFileKv::new(&path);
        assert!(kv.get_item("x").is_err());
        // Writing replaces the corrupt content
        kv.set_item("x", "1").unwrap();
        assert_eq!(kv.get_item("x").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_disabled_kv() {
        let kv = DisabledKv;
        assert!(kv.set_item("a", "1").is_err());
        assert_eq!(kv.get_item("a").unwrap(), None);
    }
}
