use crate::core::exclude::ExcludeMatcher;
use crate::core::manifest::{ManifestFetch, ManifestStore, RemoteManifest, UploadedObject};
use crate::core::reconciler::Reconciler;
use crate::core::rules::{HeaderRule, HeaderRuleMatcher};
use crate::core::scanner::{FileRecord, FileScanner};
use crate::core::uploader::{UploadConfig, UploadCoordinator};
use crate::error::{ManifestError, SyncError};
use crate::storage::ObjectStore;
use serde::{Serialize, Serializer};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// 默认 manifest 对象 key
pub const DEFAULT_MANIFEST_KEY: &str = ".actioninfo";

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// 是否启用增量同步
    pub incremental: bool,
    /// 远程 manifest 的 key
    pub manifest_key: String,
    /// header 规则，按顺序匹配
    pub header_rules: Vec<HeaderRule>,
    /// 排除规则
    pub exclude: Vec<String>,
    pub upload: UploadConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            incremental: true,
            manifest_key: DEFAULT_MANIFEST_KEY.to_string(),
            header_rules: Vec::new(),
            exclude: Vec::new(),
            upload: UploadConfig::default(),
        }
    }
}

/// 同步状态
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Completed,
    Failed,
}

/// 同步报告
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub start_time: i64,
    pub end_time: i64,
    pub status: SyncStatus,
    pub incremental: bool,
    /// 是否找到了上一次的 manifest
    pub manifest_found: bool,
    pub files_scanned: u64,
    pub files_uploaded: u64,
    pub files_skipped: u64,
    pub files_excluded: u64,
    pub files_deleted: u64,
    pub files_failed: u64,
    pub bytes_transferred: u64,
    pub duration: u64,
    #[serde(serialize_with = "serialize_errors")]
    pub errors: Vec<SyncError>,
    pub warnings: Vec<String>,
    #[serde(skip)]
    pub uploaded: Vec<UploadedObject>,
    #[serde(skip)]
    pub deleted: Vec<String>,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.status == SyncStatus::Completed
    }
}

fn serialize_errors<S: Serializer>(errors: &[SyncError], s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(errors.iter().map(|e| e.to_string()))
}

/// 同步引擎
///
/// 一次同步：获取 manifest -> 上传 -> 删除过期对象 -> 保存 manifest。
/// 只有获取 manifest 失败会中止，其余错误汇总在报告里。
pub struct SyncEngine {
    store: Arc<dyn ObjectStore>,
    config: SyncConfig,
    headers: Arc<HeaderRuleMatcher>,
    exclude: Arc<ExcludeMatcher>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn ObjectStore>, config: SyncConfig) -> Self {
        let headers = Arc::new(HeaderRuleMatcher::new(&config.header_rules));
        let exclude = Arc::new(ExcludeMatcher::new(&config.exclude));
        Self {
            store,
            config,
            headers,
            exclude,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// 扫描本地目录并同步
    pub async fn sync_folder(&self, folder: &str) -> Result<SyncReport, ManifestError> {
        let records = FileScanner::default().scan(folder);
        self.run(folder, records).await
    }

    /// 规则中目标存储无法保存的 header，仍会参与 header 指纹
    fn unsupported_header_warnings(&self) -> Vec<String> {
        self.config
            .header_rules
            .iter()
            .enumerate()
            .filter_map(|(index, rule)| {
                let names = self.store.unsupported_headers(&rule.headers);
                (!names.is_empty()).then(|| {
                    format!(
                        "header 规则 #{} ({:?}) 中的 {} 不会被 {} 保存",
                        index,
                        rule.path,
                        names.join(", "),
                        self.store.name()
                    )
                })
            })
            .collect()
    }

    /// 运行一次同步
    pub async fn run(
        &self,
        root: &str,
        records: mpsc::Receiver<FileRecord>,
    ) -> Result<SyncReport, ManifestError> {
        let start_time = chrono::Utc::now().timestamp();
        info!(
            "开始同步: {} -> {} (incremental: {})",
            root,
            self.store.name(),
            self.config.incremental
        );

        let mut warnings: Vec<String> = self
            .headers
            .diagnostics()
            .iter()
            .map(|d| d.to_string())
            .collect();
        warnings.extend(self.unsupported_header_warnings());

        let manifests = ManifestStore::new(self.store.clone(), self.config.manifest_key.clone());
        let reconciler = Reconciler::new(self.store.clone());
        let mut errors = Vec::new();
        let mut deleted = Vec::new();

        // 获取 manifest，失败则中止
        let (manifest, manifest_found) = if self.config.incremental {
            match manifests.fetch().await {
                Ok(ManifestFetch::Found(m)) => (Some(Arc::new(m)), true),
                Ok(ManifestFetch::NotFound) => (Some(Arc::new(RemoteManifest::new())), false),
                Err(e) => {
                    error!("获取 manifest 失败，中止同步: {}", e);
                    return Err(e);
                }
            }
        } else {
            (None, false)
        };

        // 没有增量状态时先清空，保证远程与本地一致
        if !manifest_found {
            let outcome = reconciler.delete_all().await;
            deleted.extend(outcome.deleted);
            errors.extend(outcome.errors);
        }

        let coordinator = UploadCoordinator::new(
            self.store.clone(),
            self.headers.clone(),
            self.exclude.clone(),
            self.config.upload.clone(),
        )
        .with_reserved_key(&self.config.manifest_key);
        let upload = coordinator.run(root, records, manifest.clone()).await;

        if let Some(manifest) = &manifest {
            let outcome = reconciler.delete_stale(manifest).await;
            deleted.extend(outcome.deleted);
            errors.extend(outcome.errors);

            if let Err(e) = manifests.persist(&upload.uploaded).await {
                let err = SyncError::persist(manifests.key(), format!("{:#}", e));
                error!("{}", err);
                errors.push(err);
            }
        }

        let files_uploaded = upload.transferred().count() as u64;
        let files_skipped = upload.skipped().count() as u64;
        let bytes_transferred = upload.transferred().map(|u| u.size).sum();
        let files_failed = (upload.errors.len() + errors.len()) as u64;
        let mut all_errors = upload.errors;
        all_errors.extend(errors);

        let end_time = chrono::Utc::now().timestamp();
        let status = if all_errors.is_empty() {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };

        for w in &warnings {
            warn!("{}", w);
        }
        info!(
            "同步完成: 上传 {}, 跳过 {}, 排除 {}, 删除 {}, 失败 {}",
            files_uploaded,
            files_skipped,
            upload.excluded,
            deleted.len(),
            files_failed
        );

        Ok(SyncReport {
            start_time,
            end_time,
            status,
            incremental: self.config.incremental,
            manifest_found,
            files_scanned: upload.scanned,
            files_uploaded,
            files_skipped,
            files_excluded: upload.excluded,
            files_deleted: deleted.len() as u64,
            files_failed,
            bytes_transferred,
            duration: (end_time - start_time).max(0) as u64,
            errors: all_errors,
            warnings,
            uploaded: upload.uploaded,
            deleted,
        })
    }
}
