//! Durable session ownership map.
//!
//! Binds every session id to the principal that created it. The whole map is
//! small (hundreds of rows) and mutates only on lifecycle events, so every
//! mutation rewrites the full JSON object to a temp file in the same
//! directory and renames it over the live file. Atomic rename beats
//! fsync-per-entry bookkeeping at this size.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Durable `session_id -> principal` mapping.
pub struct OwnerStore {
    path: PathBuf,
    map: Mutex<HashMap<String, String>>,
}

impl OwnerStore {
    /// Load the store from `path`, creating the parent directory if needed.
    ///
    /// A missing file starts empty; a corrupt file is reset to empty with a
    /// warning rather than refusing to boot.
    pub async fn load(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating data directory {}", parent.display()))?;
        }

        let map = match async_fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, String>>(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    warn!(
                        "Ownership file {} is corrupt ({}); starting empty",
                        path.display(),
                        e
                    );
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", path.display()));
            }
        };

        debug!("Loaded {} ownership row(s) from {}", map.len(), path.display());
        Ok(Self {
            path,
            map: Mutex::new(map),
        })
    }

    /// Record `sid` as owned by `principal` and persist.
    pub async fn assign(&self, sid: &str, principal: &str) -> Result<()> {
        let mut map = self.map.lock().await;
        map.insert(sid.to_string(), principal.to_string());
        self.persist(&map).await
    }

    /// Remove the row for `sid` and persist. A missing row is not an error.
    pub async fn remove(&self, sid: &str) -> Result<()> {
        let mut map = self.map.lock().await;
        if map.remove(sid).is_none() {
            return Ok(());
        }
        self.persist(&map).await
    }

    /// Owner of `sid`, if recorded.
    pub async fn get(&self, sid: &str) -> Option<String> {
        self.map.lock().await.get(sid).cloned()
    }

    /// All session ids owned by `principal`.
    pub async fn list_by(&self, principal: &str) -> Vec<String> {
        let map = self.map.lock().await;
        let mut sids: Vec<String> = map
            .iter()
            .filter(|(_, owner)| owner.as_str() == principal)
            .map(|(sid, _)| sid.clone())
            .collect();
        sids.sort();
        sids
    }

    /// Number of sessions owned by `principal`.
    pub async fn count_by(&self, principal: &str) -> usize {
        self.map
            .lock()
            .await
            .values()
            .filter(|owner| owner.as_str() == principal)
            .count()
    }

    /// Every session id with an ownership row.
    pub async fn all_sids(&self) -> Vec<String> {
        self.map.lock().await.keys().cloned().collect()
    }

    /// Write the full map to a sibling temp file, then rename it over the
    /// live file.
    async fn persist(&self, map: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_vec_pretty(map).context("serializing ownership map")?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = async_fs::File::create(&tmp_path)
            .await
            .with_context(|| format!("creating {}", tmp_path.display()))?;
        tmp.write_all(&json).await?;
        tmp.flush().await?;
        drop(tmp);

        async_fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("renaming {} into place", tmp_path.display()))?;
        Ok(())
    }
}
