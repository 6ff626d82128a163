use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::Deserialize;
use tracing::{debug, warn};

use niah_core::trial::sanitize_model_name;
use niah_core::{NiahError, NiahResult, ResultRecord, ResultStore, TrialKey};

const RESULT_SUFFIX: &str = "_results.json";

/// One JSON file per trial under `<root>/<model>/`.
///
/// Each model namespace is scanned once, the first time it is queried, and
/// the resulting key index is kept up to date by [`ResultStore::put`].
pub struct JsonDirStore {
    root: PathBuf,
    index: Mutex<HashMap<String, HashSet<TrialKey>>>,
}

/// The fields needed to identify a record; tolerant of older files.
#[derive(Deserialize)]
struct StoredKey {
    model: String,
    context_length: usize,
    depth_percent: f64,
    #[serde(default = "default_version")]
    version: u32,
}

fn default_version() -> u32 {
    1
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace_dir(&self, model: &str) -> PathBuf {
        self.root.join(sanitize_model_name(model))
    }

    pub fn record_path(&self, key: &TrialKey) -> PathBuf {
        self.namespace_dir(&key.model)
            .join(format!("{}{RESULT_SUFFIX}", key.file_stem()))
    }

    fn json_files(dir: &Path) -> NiahResult<Vec<PathBuf>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        Ok(files)
    }

    fn read_key(path: &Path) -> NiahResult<TrialKey> {
        let raw = std::fs::read_to_string(path)?;
        let k: StoredKey = serde_json::from_str(&raw)?;
        Ok(TrialKey::new(
            k.model,
            k.context_length,
            k.depth_percent,
            k.version,
        ))
    }

    fn scan_namespace(&self, namespace: &str) -> NiahResult<HashSet<TrialKey>> {
        let mut keys = HashSet::new();
        for path in Self::json_files(&self.root.join(namespace))? {
            match Self::read_key(&path) {
                Ok(k) => {
                    keys.insert(k);
                }
                Err(e) => warn!("skipping unreadable result {}: {e}", path.display()),
            }
        }
        debug!(namespace, records = keys.len(), "result namespace indexed");
        Ok(keys)
    }

    fn with_namespace<T>(
        &self,
        model: &str,
        f: impl FnOnce(&mut HashSet<TrialKey>) -> T,
    ) -> NiahResult<T> {
        let namespace = sanitize_model_name(model);
        let mut index = self
            .index
            .lock()
            .map_err(|_| NiahError::Storage("result index lock poisoned".into()))?;
        if !index.contains_key(&namespace) {
            let keys = self.scan_namespace(&namespace)?;
            index.insert(namespace.clone(), keys);
        }
        let keys = index
            .get_mut(&namespace)
            .ok_or_else(|| NiahError::Storage(format!("namespace {namespace} not indexed")))?;
        Ok(f(keys))
    }
}

impl ResultStore for JsonDirStore {
    fn exists(&self, key: &TrialKey) -> NiahResult<bool> {
        self.with_namespace(&key.model, |keys| keys.contains(key))
    }

    fn put(&self, record: &ResultRecord) -> NiahResult<()> {
        let key = record.key();
        let path = self.record_path(&key);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // A file shared by two keys (truncated depths) keeps only the last one.
        let replaced = path
            .exists()
            .then(|| Self::read_key(&path).ok())
            .flatten();
        std::fs::write(&path, serde_json::to_string(record)?)?;
        debug!("result written to {}", path.display());
        let model = key.model.clone();
        self.with_namespace(&model, |keys| {
            if let Some(old) = replaced {
                keys.remove(&old);
            }
            keys.insert(key);
        })
    }

    fn records(&self, model: &str) -> NiahResult<Vec<ResultRecord>> {
        let mut records = Vec::new();
        for path in Self::json_files(&self.namespace_dir(model))? {
            let raw = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<ResultRecord>(&raw) {
                Ok(r) if r.model == model => records.push(r),
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable result {}: {e}", path.display()),
            }
        }
        Ok(records)
    }
}
