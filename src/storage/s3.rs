use super::{OperatorStorage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use opendal::{layers::TimeoutLayer, Operator};
use std::time::Duration;

impl OperatorStorage {
    /// S3 兼容存储，prefix 作为 bucket 内的根目录
    pub fn s3(
        bucket: &str,
        region: &str,
        access_key: &str,
        secret_key: &str,
        endpoint: Option<&str>,
        prefix: Option<&str>,
    ) -> Result<Self> {
        use opendal::services::S3;

        let mut builder = S3::default()
            .bucket(bucket)
            .region(region)
            .access_key_id(access_key)
            .secret_access_key(secret_key);

        if let Some(ep) = endpoint {
            builder = builder.endpoint(ep);
        }

        if let Some(p) = prefix {
            builder = builder.root(p);
        }

        // 添加超时层
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self::new(operator, Self::s3_name(bucket, prefix)))
    }

    fn s3_name(bucket: &str, prefix: Option<&str>) -> String {
        format!(
            "s3://{}{}",
            bucket,
            prefix
                .map(|p| p.trim_matches('/'))
                .filter(|p| !p.is_empty())
                .map(|p| format!("/{}", p))
                .unwrap_or_default()
        )
    }
}
