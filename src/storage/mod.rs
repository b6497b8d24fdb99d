pub mod local;
#[cfg(test)]
pub mod mock;
pub mod operator;
pub mod s3;

use crate::config::{StorageConfig, StorageType};
use crate::core::HeaderSet;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use operator::OperatorStorage;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 远程对象信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
}

/// 对象存储抽象接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 上传对象，headers 作为传输选项
    async fn put(&self, key: &str, data: Vec<u8>, headers: &HeaderSet) -> Result<()>;

    /// 读取对象，不存在时返回 None
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// 读取对象的响应头，不存在时返回 None
    async fn head(&self, key: &str) -> Result<Option<HeaderSet>>;

    /// 删除对象（不存在不报错）
    async fn delete(&self, key: &str) -> Result<()>;

    /// 批量删除，返回每个失败的 key 及其错误
    async fn delete_batch(&self, keys: &[String]) -> Vec<(String, anyhow::Error)> {
        let mut failed = Vec::new();
        for key in keys {
            if let Err(e) = self.delete(key).await {
                failed.push((key.clone(), e));
            }
        }
        failed
    }

    /// 后端无法保存的 header 名（已排序），默认全部支持
    fn unsupported_headers(&self, _headers: &HeaderSet) -> Vec<String> {
        Vec::new()
    }

    /// 递归列出所有对象
    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub fn create_storage(config: &StorageConfig) -> Result<Arc<dyn ObjectStore>> {
    match config.typ {
        StorageType::S3 => {
            let bucket = config
                .bucket
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires bucket"))?;
            let access_key = config
                .access_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires access key"))?;
            let secret_key = config
                .secret_key
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("S3 storage requires secret key"))?;
            tracing::info!("初始化S3存储: bucket={}, region={}", bucket, config.region);
            Ok(Arc::new(OperatorStorage::s3(
                bucket,
                &config.region,
                access_key,
                secret_key,
                config.endpoint.as_deref(),
                config.prefix.as_deref(),
            )?))
        }
        StorageType::Fs => {
            let root = config
                .fs_root
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("fs storage requires root"))?;
            tracing::info!("初始化本地存储: {}", root);
            Ok(Arc::new(OperatorStorage::fs(root)?))
        }
    }
}
