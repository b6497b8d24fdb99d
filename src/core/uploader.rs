//! 并发上传 - 每条文件记录一个任务，网络传输数量受信号量限制

use crate::core::exclude::ExcludeMatcher;
use crate::core::manifest::{RemoteManifest, UploadedObject};
use crate::core::rules::{HeaderMatch, HeaderRuleMatcher};
use crate::core::scanner::{normalize_root, FileRecord};
use crate::error::SyncError;
use crate::storage::ObjectStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

/// 上传配置
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// 最大并发传输数
    pub max_concurrent_transfers: usize,
    /// 最大重试次数
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    pub retry_base_delay_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: 30,
            max_retries: 2,
            retry_base_delay_ms: 500,
        }
    }
}

/// 一次上传过程的汇总结果
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub uploaded: Vec<UploadedObject>,
    pub errors: Vec<SyncError>,
    pub scanned: u64,
    pub excluded: u64,
}

impl UploadOutcome {
    pub fn transferred(&self) -> impl Iterator<Item = &UploadedObject> {
        self.uploaded.iter().filter(|u| !u.skipped)
    }

    pub fn skipped(&self) -> impl Iterator<Item = &UploadedObject> {
        self.uploaded.iter().filter(|u| u.skipped)
    }
}

#[derive(Default)]
struct SharedResults {
    uploaded: Mutex<Vec<UploadedObject>>,
    errors: Mutex<Vec<SyncError>>,
    excluded: AtomicU64,
}

/// 单次重试等待的上限
pub const MAX_RETRY_DELAY_MS: u64 = 60_000;

/// 指数退避：`base * 2^attempt`，不超过 [`MAX_RETRY_DELAY_MS`]
pub fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let delay = base_ms.saturating_mul(2_u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(MAX_RETRY_DELAY_MS))
}

/// 从记录的目标路径中去掉同步根目录，得到对象 key
pub fn object_key(root: &str, remote_path: &str) -> String {
    let key = if root.is_empty() {
        remote_path
    } else {
        remote_path
            .strip_prefix(root)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(remote_path)
    };
    key.trim_start_matches('/').to_string()
}

/// 上传协调器
#[derive(Clone)]
pub struct UploadCoordinator {
    store: Arc<dyn ObjectStore>,
    headers: Arc<HeaderRuleMatcher>,
    exclude: Arc<ExcludeMatcher>,
    semaphore: Arc<Semaphore>,
    config: UploadConfig,
    /// 不允许被本地文件覆盖的 key（manifest）
    reserved_key: Option<Arc<str>>,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        headers: Arc<HeaderRuleMatcher>,
        exclude: Arc<ExcludeMatcher>,
        config: UploadConfig,
    ) -> Self {
        Self {
            store,
            headers,
            exclude,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_transfers.max(1))),
            config,
            reserved_key: None,
        }
    }

    pub fn with_reserved_key(mut self, key: &str) -> Self {
        self.reserved_key = Some(Arc::from(key));
        self
    }

    /// 处理所有记录，全部完成后一次性返回上传结果和错误
    ///
    /// `manifest` 为 None 时不做跳过判断（全量模式）。
    pub async fn run(
        &self,
        root: &str,
        mut records: mpsc::Receiver<FileRecord>,
        manifest: Option<Arc<RemoteManifest>>,
    ) -> UploadOutcome {
        let root: Arc<str> = Arc::from(normalize_root(root));
        let results = Arc::new(SharedResults::default());
        let mut handles = Vec::new();
        let mut scanned = 0u64;

        while let Some(record) = records.recv().await {
            scanned += 1;
            let this = self.clone();
            let root = root.clone();
            let manifest = manifest.clone();
            let results = results.clone();
            let remote_path = record.remote_path.clone();
            let path = record.path.clone();

            let handle = tokio::spawn(async move {
                this.process(&root, record, manifest.as_deref(), &results)
                    .await;
            });
            handles.push((remote_path, path, handle));
        }

        // 等待所有任务完成
        for (remote_path, path, handle) in handles {
            if let Err(e) = handle.await {
                error!("上传任务异常退出: {} - {}", remote_path, e);
                let key = object_key(&root, &remote_path);
                results
                    .errors
                    .lock()
                    .await
                    .push(SyncError::upload(&key, path, e));
            }
        }

        let uploaded = std::mem::take(&mut *results.uploaded.lock().await);
        let errors = std::mem::take(&mut *results.errors.lock().await);
        UploadOutcome {
            uploaded,
            errors,
            scanned,
            excluded: results.excluded.load(Ordering::Relaxed),
        }
    }

    async fn process(
        &self,
        root: &str,
        record: FileRecord,
        manifest: Option<&RemoteManifest>,
        results: &SharedResults,
    ) {
        let key = object_key(root, &record.remote_path);
        if key.is_empty() {
            warn!("无法从 {} 得到对象 key，已忽略", record.remote_path);
            return;
        }

        let resolved = self.headers.resolve(&key);
        if !resolved.skipped_invalid.is_empty() {
            debug!("{} 匹配时跳过了无效规则 {:?}", key, resolved.skipped_invalid);
        }

        if let Some(pattern) = self.exclude.matching_pattern(&key) {
            info!("[EXCLUDE] objectKey: {} (pattern: {})", key, pattern);
            results.excluded.fetch_add(1, Ordering::Relaxed);
            return;
        }
        if self.reserved_key.as_deref() == Some(key.as_str()) {
            warn!("[EXCLUDE] objectKey: {} 与 manifest 同名，不会上传", key);
            results.excluded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if let Some(skipped) = Self::check_unchanged(&record, &key, &resolved, manifest).await {
            info!("[SKIP] objectKey: {}", key);
            results.uploaded.lock().await.push(skipped);
            return;
        }

        match self.upload_with_retry(&key, &record, &resolved).await {
            Ok(()) => {
                info!("objectKey: {} filePath: {}", key, record.path.display());
                results.uploaded.lock().await.push(UploadedObject {
                    key,
                    path: record.path,
                    content_hash: record.content_hash,
                    headers_hash: resolved.fingerprint,
                    skipped: false,
                    size: record.size,
                });
            }
            Err(e) => {
                let err = SyncError::upload(&key, record.path, format!("{:#}", e));
                error!("{}", err);
                results.errors.lock().await.push(err);
            }
        }
    }

    /// 查找 manifest，命中即移除；内容和 header 指纹都未变化时返回跳过记录
    async fn check_unchanged(
        record: &FileRecord,
        key: &str,
        resolved: &HeaderMatch,
        manifest: Option<&RemoteManifest>,
    ) -> Option<UploadedObject> {
        let manifest = manifest?;
        let previous = manifest.get(key).await?;

        // 移除已访问的 key，剩下的就是需要删除的
        manifest.consume(key).await;

        let unchanged = record.valid_hash
            && record.content_hash == previous.content_hash
            && resolved.fingerprint == previous.headers_hash;
        if !unchanged {
            return None;
        }

        Some(UploadedObject {
            key: key.to_string(),
            path: record.path.clone(),
            content_hash: previous.content_hash,
            headers_hash: previous.headers_hash,
            skipped: true,
            size: record.size,
        })
    }

    /// 持有传输许可期间读取文件并上传，失败按指数退避重试
    async fn upload_with_retry(
        &self,
        key: &str,
        record: &FileRecord,
        resolved: &HeaderMatch,
    ) -> anyhow::Result<()> {
        let _permit = self.semaphore.acquire().await?;

        let data = tokio::fs::read(&record.path).await?;
        let max_retries = self.config.max_retries;
        let mut attempt = 0u32;

        loop {
            match self.store.put(key, data.clone(), &resolved.headers).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_retries => {
                    let delay = retry_delay(self.config.retry_base_delay_ms, attempt);
                    warn!(
                        "上传失败，{:?} 后重试 ({}/{}): {} - {}",
                        delay,
                        attempt + 1,
                        max_retries,
                        key,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
