//! 过期对象清理

use crate::core::manifest::RemoteManifest;
use crate::error::SyncError;
use crate::storage::ObjectStore;
use std::sync::Arc;
use tracing::{error, info};

/// 删除结果
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    pub deleted: Vec<String>,
    pub errors: Vec<SyncError>,
}

pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// 删除 manifest 中未被访问的 key
    pub async fn delete_stale(&self, manifest: &RemoteManifest) -> DeleteOutcome {
        let stale = manifest.remaining_keys().await;
        if stale.is_empty() {
            info!("没有需要删除的过期对象");
            return DeleteOutcome::default();
        }
        info!("删除 {} 个过期对象", stale.len());
        self.delete_keys(stale).await
    }

    /// 全量模式：删除存储中的所有对象（包括 manifest）
    pub async fn delete_all(&self) -> DeleteOutcome {
        let keys: Vec<String> = match self.store.list(None).await {
            Ok(objects) => objects.into_iter().map(|o| o.key).collect(),
            Err(e) => {
                let err = SyncError::delete("*", format!("列出对象失败: {:#}", e));
                error!("{}", err);
                return DeleteOutcome {
                    deleted: Vec::new(),
                    errors: vec![err],
                };
            }
        };
        info!("全量模式，删除 {} 上的 {} 个对象", self.store.name(), keys.len());
        self.delete_keys(keys).await
    }

    async fn delete_keys(&self, keys: Vec<String>) -> DeleteOutcome {
        let failed = self.store.delete_batch(&keys).await;

        let mut outcome = DeleteOutcome::default();
        for (key, e) in failed {
            let err = SyncError::delete(&key, format!("{:#}", e));
            error!("{}", err);
            outcome.errors.push(err);
        }
        let failed_keys: Vec<&str> = outcome.errors.iter().map(|e| e.key.as_str()).collect();
        for key in keys {
            if !failed_keys.contains(&key.as_str()) {
                info!("[DELETE] objectKey: {}", key);
                outcome.deleted.push(key);
            }
        }
        outcome
    }
}
