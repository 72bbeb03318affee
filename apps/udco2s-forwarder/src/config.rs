use anyhow::{anyhow, bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub device: PathBuf,
    pub baud_rate: u32,
    pub start_command: Option<String>,
    pub lock_path: PathBuf,

    pub metrics_url: String,
    pub api_token: String,
    pub http_timeout: Duration,

    pub flush_threshold: usize,
    pub max_buffered_samples: usize,
    pub read_interval: Duration,
    pub metric_interval_secs: i64,
    pub source_tag: String,

    pub retry_initial: Duration,
    pub retry_max: Duration,

    pub http_bind: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let device = PathBuf::from(env_string("UDCO2S_DEVICE", Some("/dev/ttyACM0".to_string()))?);
        let baud_rate = u32::try_from(env_u64("UDCO2S_BAUD", Some(115_200))?)
            .context("invalid UDCO2S_BAUD")?;
        // An explicitly empty value disables the command, so this can't go through env_optional.
        let start_command = match env::var("UDCO2S_START_COMMAND") {
            Ok(value) => Some(value.trim().to_string()).filter(|v| !v.is_empty()),
            Err(_) => Some("STA".to_string()),
        };
        let lock_path = PathBuf::from(env_string(
            "UDCO2S_LOCK_PATH",
            Some("/tmp/udco2s.lock".to_string()),
        )?);

        let metrics_url = env_string("UDCO2S_METRICS_URL", None)?;
        Url::parse(&metrics_url).context("invalid UDCO2S_METRICS_URL")?;
        let api_token = env_string("UDCO2S_API_TOKEN", None)?;
        if api_token.is_empty() {
            bail!("UDCO2S_API_TOKEN must not be empty");
        }
        let http_timeout =
            Duration::from_millis(env_u64("UDCO2S_HTTP_TIMEOUT_MS", Some(10_000))?);

        let flush_threshold = env_u64("UDCO2S_FLUSH_THRESHOLD", Some(10))?.max(1) as usize;
        let max_buffered_samples = (env_u64("UDCO2S_MAX_BUFFERED_SAMPLES", Some(10_000))? as usize)
            .max(flush_threshold);
        let read_interval = Duration::from_millis(env_u64("UDCO2S_READ_INTERVAL_MS", Some(1000))?);
        let metric_interval_secs = env_i64("UDCO2S_METRIC_INTERVAL_SECS", Some(10))?;
        let source_tag = env_string("UDCO2S_SOURCE_TAG", Some("source=udco2s".to_string()))?;

        let retry_initial =
            Duration::from_millis(env_u64("UDCO2S_RETRY_INITIAL_MS", Some(1000))?.max(1));
        let retry_max = Duration::from_millis(env_u64("UDCO2S_RETRY_MAX_MS", Some(60_000))?)
            .max(retry_initial);

        let http_bind = env_optional("UDCO2S_HTTP_BIND");

        Ok(Self {
            device,
            baud_rate,
            start_command,
            lock_path,
            metrics_url,
            api_token,
            http_timeout,
            flush_threshold,
            max_buffered_samples,
            read_interval,
            metric_interval_secs,
            source_tag,
            retry_initial,
            retry_max,
            http_bind,
        })
    }

    pub fn apply_args(&mut self, args: &crate::cli::Args) {
        if let Some(device) = &args.device {
            self.device = device.clone();
        }
        if let Some(lock_path) = &args.lock_path {
            self.lock_path = lock_path.clone();
        }
        if let Some(bind) = args.http_bind.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            self.http_bind = Some(bind.to_string());
        }
    }
}

fn env_string(key: &str, default: Option<String>) -> Result<String> {
    match env::var(key) {
        Ok(value) => Ok(value.trim().to_string()),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_u64(key: &str, default: Option<u64>) -> Result<u64> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid {key}")),
        Err(_) => default.ok_or_else(|| anyhow!("missing env var {key}")),
    }
}

fn env_i64(key: &str, default: Option<u64>) -> Result<i64> {
    i64::try_from(env_u64(key, default)?).with_context(|| format!("invalid {key}"))
}

fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        device: PathBuf::from("/dev/null"),
        baud_rate: 115_200,
        start_command: None,
        lock_path: PathBuf::from("/tmp/udco2s-test.lock"),
        metrics_url: "http://127.0.0.1:9/graphite/metrics".to_string(),
        api_token: "test-token".to_string(),
        http_timeout: Duration::from_secs(2),
        flush_threshold: 10,
        max_buffered_samples: 100,
        read_interval: Duration::ZERO,
        metric_interval_secs: 10,
        source_tag: "source=udco2s".to_string(),
        retry_initial: Duration::from_millis(10),
        retry_max: Duration::from_millis(40),
        http_bind: None,
    }
}
