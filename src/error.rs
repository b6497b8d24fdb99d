//! 错误类型

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 启动配置错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("缺少必需的配置项: {0}")]
    Missing(&'static str),

    #[error("配置项 {name} 不是合法的布尔值: {value}")]
    InvalidBool { name: &'static str, value: String },

    #[error("配置项 {name} 不是合法的整数: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("配置项 {name} 不能超过 {max}: {value}")]
    TooLarge {
        name: &'static str,
        value: u64,
        max: u64,
    },

    #[error("配置项 {0} 必须大于 0")]
    Zero(&'static str),

    #[error("不支持的存储类型: {0}")]
    UnknownStorage(String),

    #[error("HEADERS 解析失败: {0}")]
    Headers(#[from] serde_json::Error),

    #[error("不应该上传根目录 /, 也许你是要配置 ./")]
    RootFolder,
}

/// 获取远程 manifest 时的致命错误，出现时必须中止本次同步
#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("读取 manifest {key} 失败: {detail}")]
    Transfer { key: String, detail: String },

    #[error("解析 manifest {key} 失败: {source}")]
    Parse {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// 出错的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Upload,
    Delete,
    Persist,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncPhase::Upload => write!(f, "upload"),
            SyncPhase::Delete => write!(f, "delete"),
            SyncPhase::Persist => write!(f, "persist"),
        }
    }
}

/// 单个对象的可恢复错误，汇总后返回给调用方
#[derive(Error, Debug, Clone)]
#[error("[FAILED] {phase} objectKey: {key}{} detail: {detail}", path_suffix(.path))]
pub struct SyncError {
    pub phase: SyncPhase,
    pub key: String,
    pub path: Option<PathBuf>,
    pub detail: String,
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" filePath: {}", p.display()))
        .unwrap_or_default()
}

impl SyncError {
    pub fn upload(key: &str, path: PathBuf, err: impl fmt::Display) -> Self {
        Self {
            phase: SyncPhase::Upload,
            key: key.to_string(),
            path: Some(path),
            detail: err.to_string(),
        }
    }

    pub fn delete(key: &str, err: impl fmt::Display) -> Self {
        Self {
            phase: SyncPhase::Delete,
            key: key.to_string(),
            path: None,
            detail: err.to_string(),
        }
    }

    pub fn persist(key: &str, err: impl fmt::Display) -> Self {
        Self {
            phase: SyncPhase::Persist,
            key: key.to_string(),
            path: None,
            detail: err.to_string(),
        }
    }
}
