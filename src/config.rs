use anyhow::{anyhow, Context, Result};
use reqwest::Url;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::fetcher::RetryPolicy;

pub static DEFAULT_BASE_URL: &str = "http://data1.mars3d.cn/3dtiles/qx-simiao";
pub static DEFAULT_ORIGIN: &str = "http://mars3d.cn";
pub static DEFAULT_REFERER: &str = "http://mars3d.cn/";
pub static DEFAULT_OUTPUT_DIR: &str = "downloaded_tiles";
pub static DEFAULT_TILESET_PATH: &str = "tileset.json";

/// Everything a download run needs, fixed for its whole duration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub base_url: String,
    pub origin: String,
    pub host: String,
    pub referer: String,
    pub output_root: PathBuf,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Default)]
pub struct SessionOverrides {
    pub base_url: Option<String>,
    pub output_root: Option<PathBuf>,
    pub origin: Option<String>,
    pub host: Option<String>,
    pub referer: Option<String>,
    pub max_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
}

/// Explicit value, then the environment variable, then the default.
pub fn option_or_env(value: Option<String>, var: &str, default: &str) -> String {
    value
        .or_else(|| env::var(var).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| default.to_string())
}

impl SessionConfig {
    pub fn new(overrides: SessionOverrides) -> Result<SessionConfig> {
        let base_url = option_or_env(overrides.base_url, "TILESET_BASE_URL", DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        let parsed = Url::parse(&base_url).with_context(|| format!("Invalid base URL {}", base_url))?;
        let host = match overrides.host {
            Some(host) => host,
            None => {
                let host = parsed
                    .host_str()
                    .ok_or_else(|| anyhow!("Base URL {} has no host", base_url))?;
                match parsed.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                }
            }
        };
        let output_root = overrides.output_root.unwrap_or_else(|| {
            PathBuf::from(option_or_env(None, "TILESET_OUTPUT_DIR", DEFAULT_OUTPUT_DIR))
        });
        let defaults = RetryPolicy::default();

        Ok(SessionConfig {
            base_url,
            origin: overrides
                .origin
                .unwrap_or_else(|| DEFAULT_ORIGIN.to_string()),
            host,
            referer: overrides
                .referer
                .unwrap_or_else(|| DEFAULT_REFERER.to_string()),
            output_root,
            retry: RetryPolicy {
                max_attempts: overrides.max_attempts.unwrap_or(defaults.max_attempts),
                backoff: overrides.retry_delay.unwrap_or(defaults.backoff),
            },
            timeout: overrides.timeout,
        })
    }
}
