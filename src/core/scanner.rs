use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// 本地文件记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// 本地文件路径
    pub path: PathBuf,
    /// 目标路径（`/` 分隔，包含同步根目录）
    pub remote_path: String,
    /// 内容指纹
    pub content_hash: String,
    /// 指纹是否可信（读取失败时为 false）
    pub valid_hash: bool,
    pub size: u64,
}

/// 计算文件内容的 hash（使用 BLAKE3 快速哈希）
pub fn calculate_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    // 只取前 16 字节（32 个十六进制字符），足够检测变化
    hash.to_hex()[..32].to_string()
}

/// 规范化同步根目录：统一 `/` 分隔，去掉开头的 `./` 和结尾的 `/`
///
/// `.`、`./` 和空字符串都返回空字符串。
pub fn normalize_root(root: &str) -> String {
    let root = root.replace('\\', "/");
    let mut root = root.as_str();
    while let Some(rest) = root.strip_prefix("./") {
        root = rest;
    }
    let root = root.trim_end_matches('/');
    if root == "." {
        String::new()
    } else {
        root.to_string()
    }
}

/// 本地目录扫描器
pub struct FileScanner {
    channel_capacity: usize,
}

impl FileScanner {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// 在阻塞线程中遍历目录，按需产出文件记录
    pub fn scan(&self, root: &str) -> mpsc::Receiver<FileRecord> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let root = root.to_string();

        tokio::task::spawn_blocking(move || {
            let normalized = normalize_root(&root);
            let base = PathBuf::from(&root);
            let mut count = 0usize;

            for entry in WalkDir::new(&base).follow_links(true) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        warn!("遍历目录出错: {}", e);
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    continue;
                }

                let Some(record) = Self::build_record(&base, &normalized, entry.path()) else {
                    continue;
                };
                count += 1;
                if tx.blocking_send(record).is_err() {
                    debug!("接收端已关闭，停止扫描");
                    return;
                }
            }

            info!("扫描完成: {} 个文件 ({})", count, root);
        });

        rx
    }

    fn build_record(base: &Path, normalized_root: &str, path: &Path) -> Option<FileRecord> {
        let relative = path.strip_prefix(base).ok()?;
        let Some(relative) = relative.to_str() else {
            warn!("文件名不是合法的 UTF-8，已跳过: {}", path.display());
            return None;
        };
        let relative = relative.replace('\\', "/");
        if relative.is_empty() {
            return None;
        }

        let remote_path = if normalized_root.is_empty() {
            relative
        } else {
            format!("{}/{}", normalized_root, relative)
        };

        let (content_hash, valid_hash, size) = match std::fs::read(path) {
            Ok(data) => (calculate_hash(&data), true, data.len() as u64),
            Err(e) => {
                warn!("读取文件失败，无法计算 hash: {} - {}", path.display(), e);
                (String::new(), false, 0)
            }
        };

        Some(FileRecord {
            path: path.to_path_buf(),
            remote_path,
            content_hash,
            valid_hash,
            size,
        })
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new(64)
    }
}
