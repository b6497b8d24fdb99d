use super::ObjectInfo;
use super::ObjectStore;
use crate::core::HeaderSet;
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{Capability, Metakey, Operator};
use std::collections::HashMap;
use tracing::debug;

/// 以这些前缀开头的 header 作为用户元数据保存
const USER_METADATA_PREFIXES: [&str; 2] = ["x-amz-meta-", "x-oss-meta-"];

/// header 在写入时的去向
#[derive(Debug, PartialEq, Eq)]
enum HeaderTarget {
    CacheControl,
    ContentType,
    ContentDisposition,
    UserMetadata(String),
    Unsupported,
}

fn classify_header(capability: &Capability, name: &str) -> HeaderTarget {
    let lower = name.to_ascii_lowercase();
    match lower.as_str() {
        "cache-control" if capability.write_with_cache_control => HeaderTarget::CacheControl,
        "content-type" if capability.write_with_content_type => HeaderTarget::ContentType,
        "content-disposition" if capability.write_with_content_disposition => {
            HeaderTarget::ContentDisposition
        }
        _ => USER_METADATA_PREFIXES
            .iter()
            .find_map(|prefix| lower.strip_prefix(prefix))
            .filter(|meta| !meta.is_empty() && capability.write_with_user_metadata)
            .map(|meta| HeaderTarget::UserMetadata(meta.to_string()))
            .unwrap_or(HeaderTarget::Unsupported),
    }
}

/// 基于 opendal Operator 的对象存储
pub struct OperatorStorage {
    operator: Operator,
    name: String,
}

impl OperatorStorage {
    pub fn new(operator: Operator, name: String) -> Self {
        Self { operator, name }
    }

    /// 内存存储，进程退出即丢失
    pub fn memory() -> Result<Self> {
        let operator = Operator::new(opendal::services::Memory::default())?.finish();
        Ok(Self::new(operator, "memory://".to_string()))
    }

    /// 未指定 Content-Type 时按扩展名推断
    fn guess_content_type(key: &str) -> Option<String> {
        mime_guess::from_path(key)
            .first()
            .map(|mime| mime.essence_str().to_string())
    }
}

#[async_trait]
impl ObjectStore for OperatorStorage {
    async fn put(&self, key: &str, data: Vec<u8>, headers: &HeaderSet) -> Result<()> {
        let capability = self.operator.info().full_capability();
        let mut write = self.operator.write_with(key, data);
        let mut has_content_type = false;
        let mut user_metadata = HashMap::new();

        for (name, value) in headers {
            if name.eq_ignore_ascii_case("content-type") {
                has_content_type = true;
            }
            match classify_header(&capability, name) {
                HeaderTarget::CacheControl => write = write.cache_control(value),
                HeaderTarget::ContentType => write = write.content_type(value),
                HeaderTarget::ContentDisposition => write = write.content_disposition(value),
                HeaderTarget::UserMetadata(meta) => {
                    user_metadata.insert(meta, value.clone());
                }
                // 规则层面已在同步开始时告警
                HeaderTarget::Unsupported => {
                    debug!("{} 不支持 header {}，已忽略: {}", self.name, name, key)
                }
            }
        }

        if !user_metadata.is_empty() {
            write = write.user_metadata(user_metadata);
        }
        if !has_content_type && capability.write_with_content_type {
            if let Some(content_type) = Self::guess_content_type(key) {
                write = write.content_type(&content_type);
            }
        }

        write.await?;
        Ok(())
    }

    fn unsupported_headers(&self, headers: &HeaderSet) -> Vec<String> {
        let capability = self.operator.info().full_capability();
        let mut names: Vec<String> = headers
            .keys()
            .filter(|name| classify_header(&capability, name) == HeaderTarget::Unsupported)
            .cloned()
            .collect();
        names.sort();
        names
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.operator.read(key).await {
            Ok(data) => Ok(Some(data.to_vec())),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn head(&self, key: &str) -> Result<Option<HeaderSet>> {
        let meta = match self.operator.stat(key).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut headers = HeaderSet::new();
        headers.insert(
            "Content-Length".to_string(),
            meta.content_length().to_string(),
        );
        let optional = [
            ("Cache-Control", meta.cache_control()),
            ("Content-Type", meta.content_type()),
            ("Content-Disposition", meta.content_disposition()),
            ("ETag", meta.etag()),
        ];
        for (name, value) in optional {
            if let Some(value) = value {
                headers.insert(name.to_string(), value.to_string());
            }
        }
        Ok(Some(headers))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        // 删除不存在的对象不会报错
        self.operator.delete(key).await?;
        Ok(())
    }

    async fn list(&self, prefix: Option<&str>) -> Result<Vec<ObjectInfo>> {
        let mut objects = Vec::new();
        let path = prefix.unwrap_or("");

        let mut lister = self
            .operator
            .lister_with(path)
            .recursive(true)
            .metakey(Metakey::ContentLength | Metakey::Mode)
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let key = entry.path().trim_start_matches('/');
            let meta = entry.metadata();

            // 跳过根目录和目录占位
            if key.is_empty() || meta.is_dir() {
                continue;
            }

            objects.push(ObjectInfo {
                key: key.to_string(),
                size: meta.content_length(),
                etag: meta.etag().map(|s| s.trim_matches('"').to_string()),
            });
        }

        Ok(objects)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
