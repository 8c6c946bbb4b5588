use anyhow::{anyhow, Result};
use argh::FromArgs;
use dotenv::dotenv;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod fetcher;
mod tileset;

use commands::download_tileset;
use config::{option_or_env, SessionConfig, SessionOverrides, DEFAULT_TILESET_PATH};

#[derive(FromArgs)]
/// Downloads a 3D tileset and every tile and nested manifest it references, mirroring the remote layout on disk
struct Args {
    #[argh(option, short = 't')]
    /// path to the root tileset.json to start from (env TILESET_PATH, default tileset.json)
    tileset: Option<String>,

    #[argh(option, short = 'b')]
    /// base URL the tileset is served from (env TILESET_BASE_URL)
    base_url: Option<String>,

    #[argh(option, short = 'o')]
    /// directory to mirror the tileset into (env TILESET_OUTPUT_DIR, default downloaded_tiles)
    output: Option<String>,

    #[argh(option)]
    /// value of the origin header sent with every request
    origin: Option<String>,

    #[argh(option)]
    /// value of the referer header sent with every request
    referer: Option<String>,

    #[argh(option)]
    /// value of the host header sent with every request, defaults to the host of the base URL
    host: Option<String>,

    #[argh(option)]
    /// attempts per asset before giving up on it (default 3)
    max_attempts: Option<u32>,

    #[argh(option)]
    /// milliseconds to wait between attempts (default 1000)
    retry_delay_ms: Option<u64>,

    #[argh(option)]
    /// give up on a single request after this many seconds (no timeout by default)
    timeout_secs: Option<u64>,

    #[argh(option)]
    /// write logs to a daily rotated file in this directory instead of stdout
    log_dir: Option<String>,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    dotenv().ok();
    let args: Args = argh::from_env();

    let (non_blocking, _guard) = match &args.log_dir {
        Some(dir) => tracing_appender::non_blocking(tracing_appender::rolling::daily(
            dir,
            "tileset-mirror.log",
        )),
        None => tracing_appender::non_blocking(std::io::stdout()),
    };
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_span_events(FmtSpan::CLOSE)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let config = SessionConfig::new(SessionOverrides {
        base_url: args.base_url,
        output_root: args.output.map(PathBuf::from),
        origin: args.origin,
        host: args.host,
        referer: args.referer,
        max_attempts: args.max_attempts,
        retry_delay: args.retry_delay_ms.map(Duration::from_millis),
        timeout: args.timeout_secs.map(Duration::from_secs),
    })?;
    let tileset_path = PathBuf::from(option_or_env(
        args.tileset,
        "TILESET_PATH",
        DEFAULT_TILESET_PATH,
    ));

    info!(
        base_url = %config.base_url,
        output = %config.output_root.display(),
        tileset = %tileset_path.display(),
        "starting download"
    );
    let summary = download_tileset(&config, &tileset_path).await?;
    if summary.is_success() {
        info!(downloaded = summary.downloaded, "download complete");
        Ok(())
    } else {
        Err(anyhow!(
            "{} of {} assets failed to download",
            summary.failed,
            summary.downloaded + summary.skipped + summary.failed
        ))
    }
}
