use super::{OperatorStorage, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use anyhow::Result;
use opendal::{layers::TimeoutLayer, Operator};
use std::path::PathBuf;
use std::time::Duration;

impl OperatorStorage {
    /// 本地目录作为部署目标（不支持的 header 会被忽略）
    pub fn fs(root: &str) -> Result<Self> {
        use opendal::services::Fs;

        let base_path = PathBuf::from(root);
        if !base_path.exists() {
            std::fs::create_dir_all(&base_path)?;
        }

        let operator = Operator::new(Fs::default().root(root))?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        Ok(Self::new(operator, format!("local:{}", root)))
    }
}
