use clap::Parser;
use sitesync::logging::init_logging;
use sitesync::storage::create_storage;
use sitesync::{DeployConfig, SyncEngine};
use std::process::ExitCode;
use tracing::{debug, error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 本地待部署目录（覆盖 FOLDER）
    #[arg(short, long, value_name = "DIR")]
    folder: Option<String>,

    /// 全量部署：清空远程后重新上传，不使用 manifest
    #[arg(long)]
    full: bool,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// 最大并发传输数（覆盖 CONCURRENCY）
    #[arg(short, long)]
    concurrency: Option<usize>,
}

fn load_config(args: &Args) -> Result<DeployConfig, sitesync::ConfigError> {
    let mut config = DeployConfig::from_env()?;
    if let Some(folder) = &args.folder {
        config.set_folder(folder)?;
    }
    if let Some(n) = args.concurrency {
        config.set_concurrency(n)?;
    }
    if args.full {
        config.sync.incremental = false;
    }
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("配置错误: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config.log);
    info!("sitesync v{}", env!("CARGO_PKG_VERSION"));

    let store = match create_storage(&config.storage) {
        Ok(s) => s,
        Err(e) => {
            error!("初始化存储失败: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    let engine = SyncEngine::new(store, config.sync.clone());
    let report = match engine.sync_folder(&config.folder).await {
        Ok(r) => r,
        Err(e) => {
            error!("同步中止: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Ok(json) = serde_json::to_string(&report) {
        debug!("同步报告: {}", json);
    }
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        for err in &report.errors {
            error!("{}", err);
        }
        error!("同步完成，但有 {} 个错误", report.errors.len());
        ExitCode::FAILURE
    }
}
