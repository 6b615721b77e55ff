//! # pagesplit 命令行入口
//!
//! 将网页分割为页眉、主体、页脚三张图片。
//!
//! ## 命令
//! - `segment <url>...`: 检测边界、截取整页并分割，可用 `--header-height` / `--footer-height` 跳过检测
//! - `check`: 检查 CDP 端点是否可用
//!
//! ## 退出码
//! - `0` 成功，`1` 其他错误，`2` 配置错误，`3` 导航失败，`4` 区域重叠，`5` 截图失败，`130` 被中断
//!
//! ## 环境变量
//! - `PAGESPLIT_CDP_ENDPOINT`: CDP 端点（默认: ws://localhost:9222）
//! - `PAGESPLIT_OUTPUT_DIR`: 输出目录（默认: output）
//! - `OPENAI_API_KEY`: 视觉判定后端的 API key
//! - `RUST_LOG` / `PAGESPLIT_LOG_LEVEL`: 日志级别

use clap::{Args, Parser, Subcommand};
use pagesplit::{
    cdp::{CdpBrowser, CdpBrowserImpl},
    config::Config,
    Overrides, Pipeline,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Debug, Parser)]
#[command(name = "pagesplit", version, about = "Split rendered web pages into header, body and footer")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = "PAGESPLIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Detect boundaries, capture and segment one or more URLs
    Segment(SegmentArgs),
    /// Verify the CDP endpoint answers
    Check,
}

#[derive(Debug, Args)]
struct SegmentArgs {
    #[arg(required = true)]
    urls: Vec<String>,

    /// Use this header height instead of detecting it
    #[arg(long)]
    header_height: Option<u32>,

    /// Use this footer height instead of detecting it
    #[arg(long)]
    footer_height: Option<u32>,

    /// Output root directory
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Skip region markup extraction
    #[arg(long)]
    no_markup: bool,
}

fn load_config(path: Option<&PathBuf>) -> pagesplit::Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(&path.to_string_lossy())?,
        None => Config::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

async fn segment(config: Config, args: SegmentArgs) -> anyhow::Result<u8> {
    let pipeline = Pipeline::from_config(config)?;
    let overrides = Overrides::new(args.header_height, args.footer_height);

    let results = tokio::select! {
        results = pipeline.run_batch(&args.urls, overrides) => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, closing open sessions");
            // Sessions of the dropped batch stay registered until closed
            if let Err(e) = pipeline.sessions().close_all().await {
                error!("Failed to close sessions: {}", e);
            }
            return Ok(EXIT_INTERRUPTED);
        }
    };

    let mut exit_code = 0u8;
    for result in &results {
        match result {
            Ok(report) => println!("{} -> {}", report.url, report.output_dir.display()),
            Err(failure) => {
                eprintln!("{}", failure);
                if exit_code == 0 {
                    exit_code = failure.exit_code() as u8;
                }
            }
        }
    }

    let failed = results.iter().filter(|r| r.is_err()).count();
    info!("{} of {} URLs segmented", results.len() - failed, results.len());
    Ok(exit_code)
}

async fn check(config: Config) -> anyhow::Result<u8> {
    let browser = CdpBrowserImpl::new(config.browser.cdp_endpoint.clone());
    let version = browser.get_version().await?;
    println!(
        "{} (protocol {}) at {}",
        version.product, version.protocol_version, config.browser.cdp_endpoint
    );
    Ok(0)
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let mut config = load_config(cli.config.as_ref())?;
    init_tracing(&config.log_level);
    info!("pagesplit v{}", pagesplit::VERSION);

    match cli.command {
        Command::Segment(args) => {
            if let Some(dir) = &args.output {
                config.output.dir = dir.clone();
            }
            if args.no_markup {
                config.output.extract_markup = false;
            }
            segment(config, args).await
        }
        Command::Check => check(config).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<pagesplit::Error>()
                .map(pagesplit::Error::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
