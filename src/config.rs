//! 部署配置 - 启动时从环境变量读取一次，之后显式传给各组件

use crate::core::rules::{HeaderRule, DEFAULT_HEADER_RULES};
use crate::core::{SyncConfig, UploadConfig, DEFAULT_MANIFEST_KEY};
use crate::error::ConfigError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use std::str::FromStr;

/// 单个文件的最大重试次数
pub const MAX_UPLOAD_RETRIES: u32 = 10;

/// 存储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    S3,
    Fs,
}

impl FromStr for StorageType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "s3" => Ok(StorageType::S3),
            "fs" | "local" => Ok(StorageType::Fs),
            _ => Err(ConfigError::UnknownStorage(s.to_string())),
        }
    }
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub typ: StorageType,
    pub bucket: Option<String>,
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    pub prefix: Option<String>,
    pub fs_root: Option<String>,
}

/// 完整的部署配置
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub storage: StorageConfig,
    /// 本地待部署目录
    pub folder: String,
    pub sync: SyncConfig,
    pub log: LogConfig,
}

impl DeployConfig {
    /// 依次加载 `.env.local`、`.env`（不存在则忽略），再读取进程环境变量
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::from_filename(".env.local");
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// 通过 `lookup` 读取变量，测试时可以注入任意来源
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // 空字符串视为未设置（CI 中未填写的输入会以空值传入）
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let typ = match var("STORAGE") {
            Some(s) => s.parse()?,
            None => StorageType::S3,
        };
        let storage = StorageConfig {
            typ,
            bucket: var("BUCKET"),
            access_key: var("ACCESS_KEY_ID"),
            secret_key: var("ACCESS_KEY_SECRET"),
            region: var("REGION").unwrap_or_else(|| "auto".to_string()),
            endpoint: var("ENDPOINT"),
            prefix: var("PREFIX"),
            fs_root: var("FS_ROOT"),
        };
        match storage.typ {
            StorageType::S3 => {
                require("BUCKET", &storage.bucket)?;
                require("ACCESS_KEY_ID", &storage.access_key)?;
                require("ACCESS_KEY_SECRET", &storage.secret_key)?;
            }
            StorageType::Fs => require("FS_ROOT", &storage.fs_root)?,
        }

        let folder = var("FOLDER").ok_or(ConfigError::Missing("FOLDER"))?;
        check_folder(&folder)?;

        // HEADERS="" 表示不使用任何规则，未设置时使用默认规则
        let header_rules: Vec<HeaderRule> = match lookup("HEADERS") {
            None => serde_json::from_str(DEFAULT_HEADER_RULES)?,
            Some(raw) if raw.trim().is_empty() => Vec::new(),
            Some(raw) => serde_json::from_str(&raw)?,
        };

        let concurrency = parse_number("CONCURRENCY", var("CONCURRENCY"), 30usize)?;
        if concurrency == 0 {
            return Err(ConfigError::Zero("CONCURRENCY"));
        }

        let max_retries = parse_number("UPLOAD_RETRIES", var("UPLOAD_RETRIES"), 2u32)?;
        if max_retries > MAX_UPLOAD_RETRIES {
            return Err(ConfigError::TooLarge {
                name: "UPLOAD_RETRIES",
                value: max_retries.into(),
                max: MAX_UPLOAD_RETRIES.into(),
            });
        }

        let sync = SyncConfig {
            incremental: parse_bool("INCREMENTAL", var("INCREMENTAL"), true)?,
            manifest_key: var("MANIFEST_KEY").unwrap_or_else(|| DEFAULT_MANIFEST_KEY.to_string()),
            header_rules,
            exclude: var("EXCLUDE").map(|s| split_patterns(&s)).unwrap_or_default(),
            upload: UploadConfig {
                max_concurrent_transfers: concurrency,
                max_retries,
                retry_base_delay_ms: parse_number("RETRY_DELAY_MS", var("RETRY_DELAY_MS"), 500u64)?,
            },
        };

        let log = LogConfig {
            enabled: parse_bool("LOG_ENABLED", var("LOG_ENABLED"), true)?,
            level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            ansi: lookup("NO_COLOR").is_none(),
        };

        Ok(Self {
            storage,
            folder,
            sync,
            log,
        })
    }

    /// 命令行覆盖本地目录
    pub fn set_folder(&mut self, folder: &str) -> Result<(), ConfigError> {
        check_folder(folder)?;
        self.folder = folder.to_string();
        Ok(())
    }

    pub fn set_concurrency(&mut self, n: usize) -> Result<(), ConfigError> {
        if n == 0 {
            return Err(ConfigError::Zero("CONCURRENCY"));
        }
        self.sync.upload.max_concurrent_transfers = n;
        Ok(())
    }
}

fn require(name: &'static str, value: &Option<String>) -> Result<(), ConfigError> {
    match value {
        Some(_) => Ok(()),
        None => Err(ConfigError::Missing(name)),
    }
}

/// 拒绝文件系统根目录（`/`、`//`、`/.`、`/..`、`C:\` 等）
fn check_folder(folder: &str) -> Result<(), ConfigError> {
    let mut has_root = false;
    for component in Path::new(folder.trim()).components() {
        match component {
            Component::RootDir => has_root = true,
            Component::Prefix(_) | Component::CurDir | Component::ParentDir => {}
            Component::Normal(_) => return Ok(()),
        }
    }
    if has_root {
        return Err(ConfigError::RootFolder);
    }
    Ok(())
}

fn parse_bool(name: &'static str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool { name, value }),
    }
}

fn parse_number<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value }),
    }
}

/// 排除规则按换行或逗号分隔
pub fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(['\n', ','])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
