//! 远程 manifest - 用于增量同步
//!
//! manifest 记录上一次同步后每个对象的内容指纹与 header 指纹。
//! 同步过程中每个被重新访问的 key 都会从 manifest 中移除，
//! 结束时剩下的就是需要删除的过期对象。

use crate::error::ManifestError;
use crate::storage::ObjectStore;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 单个对象的远程记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub content_hash: String,
    pub headers_hash: String,
}

/// 本次同步结束后仍然存活的对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub key: String,
    pub path: PathBuf,
    pub content_hash: String,
    pub headers_hash: String,
    /// 内容与 header 都没有变化，未实际传输
    pub skipped: bool,
    pub size: u64,
}

impl UploadedObject {
    pub fn entry(&self) -> ManifestEntry {
        ManifestEntry {
            content_hash: self.content_hash.clone(),
            headers_hash: self.headers_hash.clone(),
        }
    }
}

/// 同步过程中被所有 worker 共享的 manifest
#[derive(Debug, Default)]
pub struct RemoteManifest {
    entries: RwLock<HashMap<String, ManifestEntry>>,
}

impl RemoteManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, ManifestEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// 共享读锁查询
    pub async fn get(&self, key: &str) -> Option<ManifestEntry> {
        self.entries.read().await.get(key).cloned()
    }

    /// 独占锁移除，标记为已访问
    ///
    /// 与 `get` 是两个独立的临界区。每个 key 只会被一个 worker 处理，所以中间的间隙无害。
    pub async fn consume(&self, key: &str) -> Option<ManifestEntry> {
        self.entries.write().await.remove(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// 剩余（未被访问）的 key，已排序
    pub async fn remaining_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn into_entries(self) -> HashMap<String, ManifestEntry> {
        self.entries.into_inner()
    }
}

/// 远程 manifest 获取结果
#[derive(Debug)]
pub enum ManifestFetch {
    Found(RemoteManifest),
    /// 首次同步，远程没有 manifest
    NotFound,
}

/// manifest 的读取与持久化
pub struct ManifestStore {
    store: Arc<dyn ObjectStore>,
    key: String,
}

impl ManifestStore {
    pub fn new(store: Arc<dyn ObjectStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 获取远程 manifest；读取或解析失败时必须中止同步
    pub async fn fetch(&self) -> Result<ManifestFetch, ManifestError> {
        let data = self
            .store
            .get(&self.key)
            .await
            .map_err(|e| ManifestError::Transfer {
                key: self.key.clone(),
                detail: format!("{:#}", e),
            })?;

        let Some(data) = data else {
            info!("远程 manifest {} 不存在", self.key);
            return Ok(ManifestFetch::NotFound);
        };

        let entries = Self::decode(&data).map_err(|source| ManifestError::Parse {
            key: self.key.clone(),
            source,
        })?;
        info!("已加载远程 manifest: {} 个对象", entries.len());
        Ok(ManifestFetch::Found(RemoteManifest::from_entries(entries)))
    }

    /// 用本次同步的结果覆盖远程 manifest
    pub async fn persist(&self, uploaded: &[UploadedObject]) -> Result<()> {
        let data = Self::encode(uploaded)?;
        let mut headers = crate::core::HeaderSet::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        headers.insert("Cache-Control".to_string(), "no-cache".to_string());

        self.store.put(&self.key, data, &headers).await?;
        debug!("已保存 manifest {}: {} 个对象", self.key, uploaded.len());
        Ok(())
    }

    /// key 有序输出，相同的对象集合总是得到相同的字节
    pub fn encode(uploaded: &[UploadedObject]) -> Result<Vec<u8>> {
        let map: BTreeMap<&str, ManifestEntry> = uploaded
            .iter()
            .map(|u| (u.key.as_str(), u.entry()))
            .collect();
        Ok(serde_json::to_vec_pretty(&map)?)
    }

    pub fn decode(data: &[u8]) -> Result<HashMap<String, ManifestEntry>, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mock::MockStore;
    use crate::storage::OperatorStorage;

    fn uploaded(key: &str, content: &str, headers: &str) -> UploadedObject {
        UploadedObject {
            key: key.to_string(),
            path: PathBuf::from(key),
            content_hash: content.to_string(),
            headers_hash: headers.to_string(),
            skipped: false,
            size: 0,
        }
    }

    #[tokio::test]
    async fn test_consume_removes_entry() {
        let manifest = RemoteManifest::from_entries(HashMap::from([(
            "a.js".to_string(),
            ManifestEntry {
                content_hash: "c1".to_string(),
                headers_hash: "h1".to_string(),
            },
        )]));

        assert!(manifest.get("a.js").await.is_some());
        assert!(manifest.consume("a.js").await.is_some());
        assert!(manifest.get("a.js").await.is_none());
        assert!(manifest.consume("a.js").await.is_none());
        assert!(manifest.is_empty().await);
    }

    #[tokio::test]
    async fn test_fetch_not_found_is_not_an_error() {
        let store = Arc::new(OperatorStorage::memory().unwrap());
        let manifests = ManifestStore::new(store, ".actioninfo");
        assert!(matches!(manifests.fetch().await, Ok(ManifestFetch::NotFound)));
    }

    #[tokio::test]
    async fn test_persist_then_fetch() {
        let store = Arc::new(OperatorStorage::memory().unwrap());
        let manifests = ManifestStore::new(store, ".actioninfo");

        manifests
            .persist(&[uploaded("a.js", "c1", "h1"), uploaded("c.js", "c3", "")])
            .await
            .unwrap();

        let Ok(ManifestFetch::Found(manifest)) = manifests.fetch().await else {
            panic!("manifest should exist");
        };
        assert_eq!(manifest.remaining_keys().await, vec!["a.js", "c.js"]);
        assert_eq!(
            manifest.get("c.js").await.unwrap(),
            ManifestEntry {
                content_hash: "c3".to_string(),
                headers_hash: String::new(),
            }
        );
    }

    #[tokio::test]
    async fn test_fetch_corrupt_manifest_is_fatal() {
        let store = Arc::new(MockStore::new());
        store.insert(".actioninfo", b"{not json");
        let manifests = ManifestStore::new(store, ".actioninfo");
        assert!(matches!(
            manifests.fetch().await,
            Err(ManifestError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn test_fetch_transfer_error_is_fatal() {
        let store = Arc::new(MockStore::new());
        store.fail_get();
        let manifests = ManifestStore::new(store, ".actioninfo");
        assert!(matches!(
            manifests.fetch().await,
            Err(ManifestError::Transfer { .. })
        ));
    }

    #[test]
    fn test_encode_is_order_independent() {
        let a = ManifestStore::encode(&[uploaded("b", "2", ""), uploaded("a", "1", "")]).unwrap();
        let b = ManifestStore::encode(&[uploaded("a", "1", ""), uploaded("b", "2", "")]).unwrap();
        assert_eq!(a, b);

        let decoded = ManifestStore::decode(&a).unwrap();
        assert_eq!(decoded["a"].content_hash, "1");
        assert_eq!(decoded["a"].headers_hash, "");
    }
}
