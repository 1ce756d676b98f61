//! Two-tier deployment cache.
//!
//! Values live in an in-memory map and, when enabled, in JSON documents
//! under `<base_dir>/<network>/<deployment>/`. Reads consult memory first
//! and fall back to disk; writes go to both. Text entries such as migration
//! scaffolds are written through [`Cache::put_text`] and kept verbatim.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use deploy_core::{DeployError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

/// Location of a cache entry, relative to the network/deployment namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CachePath {
    segments: Vec<String>,
}

impl CachePath {
    /// Build a path from segments, e.g. `["migrations", "1_cool.rs"]`.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: segments.into_iter().map(Into::into).collect(),
        }
    }

    /// Extend the path by one segment.
    pub fn join(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    fn key(&self) -> String {
        self.segments.join("/")
    }

    /// Location relative to the namespace root. JSON entries get a `.json`
    /// suffix; text entries are stored under their exact name.
    fn relative(&self, text: bool) -> String {
        if text {
            self.key()
        } else {
            format!("{}.json", self.key())
        }
    }

    fn file(&self, root: &Path, text: bool) -> PathBuf {
        let mut path = root.to_path_buf();
        path.push(self.relative(text));
        path
    }
}

impl fmt::Display for CachePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl<const N: usize> From<[&str; N]> for CachePath {
    fn from(segments: [&str; N]) -> Self {
        Self::new(segments)
    }
}

/// Cache scoped to one network/deployment pair.
pub struct Cache {
    network: String,
    deployment: String,
    root: PathBuf,
    write_to_disk: bool,
    memory: RwLock<HashMap<String, Value>>,
}

impl Cache {
    /// Create a cache rooted at `<base_dir>/<network>/<deployment>`.
    ///
    /// Nothing is created on disk until the first write.
    pub fn new(
        network: impl Into<String>,
        deployment: impl Into<String>,
        base_dir: impl AsRef<Path>,
        write_to_disk: bool,
    ) -> Self {
        let network = network.into();
        let deployment = deployment.into();
        let root = base_dir.as_ref().join(&network).join(&deployment);
        Self {
            network,
            deployment,
            root,
            write_to_disk,
            memory: RwLock::new(HashMap::new()),
        }
    }

    /// Memory-only cache, for ephemeral runs.
    pub fn in_memory(network: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self::new(network, deployment, PathBuf::new(), false)
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    /// Directory holding this namespace's durable entries.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether writes reach the durable tier.
    pub fn writes_to_disk(&self) -> bool {
        self.write_to_disk
    }

    /// Durable file for the JSON entry at `path`.
    pub fn file_path(&self, path: &CachePath) -> PathBuf {
        path.file(&self.root, false)
    }

    /// Read and deserialize an entry. `Ok(None)` if absent from both tiers.
    pub async fn get<T: DeserializeOwned>(&self, path: &CachePath) -> Result<Option<T>> {
        match self.get_value(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Read an entry as raw JSON.
    pub async fn get_value(&self, path: &CachePath) -> Result<Option<Value>> {
        let key = path.relative(false);
        if let Some(value) = self.memory.read().await.get(&key) {
            return Ok(Some(value.clone()));
        }
        let Some(contents) = self.read_file(&path.file(&self.root, false)).await? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_str(&contents)?;
        self.memory.write().await.insert(key, value.clone());
        Ok(Some(value))
    }

    /// Read a text entry written by [`put_text`](Self::put_text).
    pub async fn get_text(&self, path: &CachePath) -> Result<Option<String>> {
        let key = path.relative(true);
        if let Some(Value::String(text)) = self.memory.read().await.get(&key) {
            return Ok(Some(text.clone()));
        }
        let Some(text) = self.read_file(&path.file(&self.root, true)).await? else {
            return Ok(None);
        };
        self.memory
            .write()
            .await
            .insert(key, Value::String(text.clone()));
        Ok(Some(text))
    }

    /// Write a JSON entry to both tiers. Returns the durable file path.
    pub async fn put<T: Serialize + ?Sized>(&self, path: &CachePath, value: &T) -> Result<PathBuf> {
        let value = serde_json::to_value(value)?;
        let file = path.file(&self.root, false);
        self.write_file(&file, &serde_json::to_string_pretty(&value)?)
            .await?;
        self.memory.write().await.insert(path.relative(false), value);
        Ok(file)
    }

    /// Write a text entry, stored on disk verbatim under its exact name.
    pub async fn put_text(&self, path: &CachePath, text: &str) -> Result<PathBuf> {
        let file = path.file(&self.root, true);
        self.write_file(&file, text).await?;
        self.memory
            .write()
            .await
            .insert(path.relative(true), Value::String(text.to_string()));
        Ok(file)
    }

    /// Remove a JSON entry from both tiers. Removing a missing entry is not an error.
    pub async fn delete(&self, path: &CachePath) -> Result<()> {
        self.memory.write().await.remove(&path.relative(false));
        if self.write_to_disk {
            let file = path.file(&self.root, false);
            match tokio::fs::remove_file(&file).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(cache_error(&file, err)),
            }
        }
        Ok(())
    }

    /// Returns true if the JSON entry exists in either tier.
    pub async fn contains(&self, path: &CachePath) -> Result<bool> {
        Ok(self.get_value(path).await?.is_some())
    }

    /// Names of the entries directly under `dir`, from both tiers, sorted.
    ///
    /// JSON entries are listed without their `.json` suffix.
    pub async fn list(&self, dir: &CachePath) -> Result<Vec<String>> {
        let mut names = BTreeSet::new();

        let prefix = format!("{}/", dir.key());
        for key in self.memory.read().await.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if !rest.contains('/') {
                    names.insert(strip_json(rest));
                }
            }
        }

        if self.write_to_disk {
            let mut dir_path = self.root.clone();
            for segment in dir.segments() {
                dir_path.push(segment);
            }
            match tokio::fs::read_dir(&dir_path).await {
                Ok(mut entries) => {
                    while let Some(entry) = entries
                        .next_entry()
                        .await
                        .map_err(|e| cache_error(&dir_path, e))?
                    {
                        let is_file = entry
                            .file_type()
                            .await
                            .map_err(|e| cache_error(&dir_path, e))?
                            .is_file();
                        if is_file {
                            names.insert(strip_json(&entry.file_name().to_string_lossy()));
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(cache_error(&dir_path, err)),
            }
        }

        Ok(names.into_iter().collect())
    }

    async fn read_file(&self, file: &Path) -> Result<Option<String>> {
        if !self.write_to_disk {
            return Ok(None);
        }
        match tokio::fs::read_to_string(file).await {
            Ok(contents) => {
                debug!(path = %file.display(), "Loaded cache entry from disk");
                Ok(Some(contents))
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(cache_error(file, err)),
        }
    }

    async fn write_file(&self, file: &Path, contents: &str) -> Result<()> {
        if !self.write_to_disk {
            return Ok(());
        }
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| cache_error(parent, e))?;
        }
        tokio::fs::write(file, contents)
            .await
            .map_err(|e| cache_error(file, e))?;
        debug!(path = %file.display(), "Wrote cache entry to disk");
        Ok(())
    }

    /// Drop the memory tier. Durable entries are re-read on next access.
    pub async fn clear_memory(&self) {
        self.memory.write().await.clear();
    }
}

fn strip_json(name: &str) -> String {
    name.strip_suffix(".json").unwrap_or(name).to_string()
}

fn cache_error(path: &Path, err: std::io::Error) -> DeployError {
    DeployError::Cache {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn disk_cache(dir: &tempfile::TempDir) -> Cache {
        Cache::new("test-network", "test-deployment", dir.path(), true)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(&dir);
        let path = CachePath::from(["aliases"]);

        cache.put(&path, &json!({"finn": "0x01"})).await.unwrap();

        let value: Value = cache.get(&path).await.unwrap().unwrap();
        assert_eq!(value["finn"], "0x01");
    }

    #[tokio::test]
    async fn test_survives_clear_memory() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(&dir);
        let path = CachePath::from(["artifacts", "1_cool"]);

        let file = cache.put(&path, &json!({"dog": "cool"})).await.unwrap();
        assert_eq!(
            file,
            dir.path().join("test-network/test-deployment/artifacts/1_cool.json")
        );

        cache.clear_memory().await;

        let value: Value = cache.get(&path).await.unwrap().unwrap();
        assert_eq!(value, json!({"dog": "cool"}));
    }

    #[tokio::test]
    async fn test_memory_only_cache_forgets() {
        let cache = Cache::in_memory("test-network", "test-deployment");
        let path = CachePath::from(["roots"]);

        cache.put(&path, &json!({"finn": "0x01"})).await.unwrap();
        assert!(cache.contains(&path).await.unwrap());

        cache.clear_memory().await;
        assert!(!cache.contains(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(&dir);

        let value: Option<Value> = cache.get(&CachePath::from(["nope"])).await.unwrap();
        assert!(value.is_none());
        // Reads never create the namespace directory.
        assert!(!cache.root().exists());
    }

    #[tokio::test]
    async fn test_text_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(&dir);
        let path = CachePath::from(["migrations", "1_cool.rs"]);

        let file = cache.put_text(&path, "fn main() {}\n").await.unwrap();
        assert_eq!(file, dir.path().join("test-network/test-deployment/migrations/1_cool.rs"));
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "fn main() {}\n");

        cache.clear_memory().await;
        assert_eq!(cache.get_text(&path).await.unwrap().as_deref(), Some("fn main() {}\n"));
        // Text and JSON entries at one path are distinct.
        assert!(!cache.contains(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_dotted_keys_round_trip_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(&dir);

        for id in ["1_upgrade-v3.1", "1_cool.rs"] {
            let path = CachePath::from(["artifacts", id]);
            let file = cache.put(&path, &json!({"dog": "cool"})).await.unwrap();
            assert_eq!(file.file_name().unwrap().to_string_lossy(), format!("{}.json", id));

            cache.clear_memory().await;
            let value: Value = cache.get(&path).await.unwrap().unwrap();
            assert_eq!(value, json!({"dog": "cool"}));
        }

        let names = cache.list(&CachePath::from(["artifacts"])).await.unwrap();
        assert_eq!(names, vec!["1_cool.rs".to_string(), "1_upgrade-v3.1".to_string()]);
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(&dir);
        let path = CachePath::from(["verify-args"]);

        cache.put(&path, &json!({})).await.unwrap();
        cache.delete(&path).await.unwrap();
        cache.clear_memory().await;

        assert!(!cache.contains(&path).await.unwrap());
        cache.delete(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_merges_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let cache = disk_cache(&dir);
        let migrations = CachePath::from(["migrations"]);

        cache.put_text(&migrations.join("1_cool.rs"), "a").await.unwrap();
        cache.clear_memory().await;
        cache.put_text(&migrations.join("2_neat.rs"), "b").await.unwrap();
        cache.put(&CachePath::from(["artifacts", "1_cool"]), &json!(null)).await.unwrap();

        let names = cache.list(&migrations).await.unwrap();
        assert_eq!(names, vec!["1_cool.rs".to_string(), "2_neat.rs".to_string()]);

        let artifacts = cache.list(&CachePath::from(["artifacts"])).await.unwrap();
        assert_eq!(artifacts, vec!["1_cool".to_string()]);
    }
}
