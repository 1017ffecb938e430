//! Device-local file key cache
//!
//! A convenience cache, never the source of truth: the backend cannot recover
//! a key, so a miss here is always recoverable through the share link fragment
//! or manual entry. Every storage failure degrades to "no cache".

use secrecy::ExposeSecret;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use fdrive_core::config::{expand_tilde, KeysConfig};
use fdrive_crypto::FileKey;

use crate::kv::{DisabledKv, JsonFileKv, KvStore, MemoryKv};

/// Reserved storage key holding the `{fileId: base64Key}` object
pub const STORAGE_KEY: &str = "file-drive-encryption-keys-v1";

#[derive(Clone)]
pub struct KeyCustody {
    kv: Arc<dyn KvStore>,
    /// Serializes the read-modify-write of the shared object across clones
    update_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for KeyCustody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCustody")
            .field("backend", &self.kv.backend_name())
            .finish()
    }
}

impl KeyCustody {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            update_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(DisabledKv))
    }

    /// JSON file cache at `keys.store_path`, or a disabled cache when
    /// `keys.enabled = false`.
    pub fn from_config(keys: &KeysConfig) -> Self {
        if keys.enabled {
            Self::new(Arc::new(JsonFileKv::new(expand_tilde(&keys.store_path))))
        } else {
            Self::disabled()
        }
    }

    /// Cache `key` for `file_id`. Last write wins; failures are logged only.
    pub fn put(&self, file_id: &str, key: &FileKey) {
        if file_id.is_empty() {
            return;
        }
        let Ok(_guard) = self.update_lock.lock() else {
            warn!(file_id, "key cache lock poisoned, not caching");
            return;
        };
        let mut store = self.read_store();
        store.insert(
            file_id.to_string(),
            Value::String(key.to_base64().expose_secret().to_string()),
        );

        let json = Value::Object(store).to_string();
        match self.kv.set_item(STORAGE_KEY, &json) {
            Ok(()) => debug!(file_id, backend = self.kv.backend_name(), "cached file key"),
            Err(e) => warn!(
                file_id,
                backend = self.kv.backend_name(),
                "could not cache file key: {e:#}"
            ),
        }
    }

    /// Look up the cached key for `file_id`. `None` on a miss, an unreadable
    /// cache, or a cached value that no longer decodes.
    pub fn get(&self, file_id: &str) -> Option<FileKey> {
        let store = self.read_store();
        let encoded = store.get(file_id)?.as_str()?;
        match FileKey::from_base64(encoded) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(file_id, "ignoring unusable cached key: {e}");
                None
            }
        }
    }

    pub fn contains(&self, file_id: &str) -> bool {
        self.get(file_id).is_some()
    }

    /// File ids with a cached key
    pub fn file_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .read_store()
            .into_iter()
            .filter(|(_, v)| v.is_string())
            .map(|(k, _)| k)
            .collect();
        ids.sort();
        ids
    }

    /// The whole cached object, or empty when absent, unreadable or not an object.
    fn read_store(&self) -> Map<String, Value> {
        let raw = match self.kv.get_item(STORAGE_KEY) {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) => return Map::new(),
            Err(e) => {
                debug!(backend = self.kv.backend_name(), "key cache unreadable: {e:#}");
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fdrive_crypto::generate_file_key;

    #[test]
    fn test_put_get() {
        let custody = KeyCustody::in_memory();
        let key = generate_file_key().unwrap();

        assert!(custody.get("file1").is_none());
        custody.put("file1", &key);
        assert_eq!(custody.get("file1").unwrap(), key);
    }

    #[test]
    fn test_last_write_wins() {
        let custody = KeyCustody::in_memory();
        let k1 = generate_file_key().unwrap();
        let k2 = generate_file_key().unwrap();
        custody.put("f", &k1);
        custody.put("f", &k2);
        assert_eq!(custody.get("f").unwrap(), k2);
    }

    #[test]
    fn test_concurrent_puts_keep_every_key() {
        let custody = KeyCustody::in_memory();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let custody = custody.clone();
                std::thread::spawn(move || {
                    custody.put(&format!("file{i}"), &generate_file_key().unwrap());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(custody.file_ids().len(), 16);
    }

    #[test]
    fn test_empty_id_ignored() {
        let custody = KeyCustody::in_memory();
        custody.put("", &generate_file_key().unwrap());
        assert!(custody.file_ids().is_empty());
    }

    #[test]
    fn test_disabled_degrades_to_no_cache() {
        let custody = KeyCustody::disabled();
        custody.put("f", &generate_file_key().unwrap());
        assert!(custody.get("f").is_none());
    }

    #[test]
    fn test_unparseable_store_is_empty() {
        let kv = Arc::new(MemoryKv::new());
        kv.set_item(STORAGE_KEY, "not json").unwrap();
        let custody = KeyCustody::new(kv.clone());
        assert!(custody.get("f").is_none());

        kv.set_item(STORAGE_KEY, "[1,2,3]").unwrap();
        assert!(custody.get("f").is_none());

        // Writing over garbage starts a fresh object
        let key = generate_file_key().unwrap();
        custody.put("f", &key);
        assert_eq!(custody.get("f").unwrap(), key);
    }

    #[test]
    fn test_stored_shape() {
        let kv = Arc::new(MemoryKv::new());
        let custody = KeyCustody::new(kv.clone());
        let key = generate_file_key().unwrap();
        custody.put("abc", &key);

        let raw = kv.get_item(STORAGE_KEY).unwrap().unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(
            parsed["abc"].as_str().unwrap(),
            key.to_base64().expose_secret()
        );
    }

    #[test]
    fn test_from_config_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let keys = KeysConfig {
            enabled: true,
            store_path: dir.path().join("keys.json"),
        };
        let key = generate_file_key().unwrap();
        KeyCustody::from_config(&keys).put("f", &key);

        // A fresh handle sees the durable value
        assert_eq!(KeyCustody::from_config(&keys).get("f").unwrap(), key);
    }

    #[test]
    fn test_from_config_disabled() {
        let keys = KeysConfig {
            enabled: false,
            ..Default::default()
        };
        let custody = KeyCustody::from_config(&keys);
        assert!(format!("{custody:?}").contains("disabled"));
    }
}
