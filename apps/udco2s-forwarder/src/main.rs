use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::json;
use std::io::BufReader;
use tokio::net::TcpListener;
use udco2s_forwarder::agent::{spawn_agent_thread, AgentLoop};
use udco2s_forwarder::buffer::SampleBuffer;
use udco2s_forwarder::config::Config;
use udco2s_forwarder::flusher::{Flusher, RetryBackoff};
use udco2s_forwarder::lock::InstanceLock;
use udco2s_forwarder::metric::MetricTemplate;
use udco2s_forwarder::sink::HttpMetricSink;
use udco2s_forwarder::{cli, http, serial};

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,udco2s_forwarder=info".into());
    // stdout carries the sample JSON lines; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    init_tracing()?;

    let mut config = Config::from_env().inspect_err(|err| {
        tracing::error!(error = %format!("{err:#}"), "invalid configuration");
    })?;
    config.apply_args(&args);

    if args.check_config {
        println!("{}", serde_json::to_string_pretty(&config_summary(&config))?);
        return Ok(());
    }

    if let Err(err) = run(config).await {
        tracing::error!(error = %format!("{err:#}"), "udco2s-forwarder exiting");
        return Err(err);
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let lock = InstanceLock::acquire(&config.lock_path)?;
    tracing::info!(lock = %lock.path().display(), "instance lock acquired");

    let mut device = serial::open_device(&config.device, config.baud_rate)?;
    tracing::info!(
        device = %config.device.display(),
        baud = config.baud_rate,
        "serial device opened"
    );
    if let Some(command) = config.start_command.as_deref() {
        serial::send_start_command(&mut device, command)?;
        tracing::info!(command, "sent start command");
    }

    let sink = HttpMetricSink::new(config.metrics_url.clone(), &config.api_token, config.http_timeout)
        .context("failed to build metrics HTTP client")?;
    let flusher = Flusher::new(
        SampleBuffer::new(config.flush_threshold, config.max_buffered_samples),
        sink,
        MetricTemplate {
            interval_secs: config.metric_interval_secs,
            source_tag: config.source_tag.clone(),
        },
        RetryBackoff::new(config.retry_initial, config.retry_max),
        tokio::runtime::Handle::current(),
    );

    let http_handle = match config.http_bind.as_deref() {
        Some(bind) => {
            let listener = TcpListener::bind(bind)
                .await
                .with_context(|| format!("failed to bind status listener on {bind}"))?;
            let app = http::router(http::HttpState {
                flusher: flusher.clone(),
            });
            tracing::info!(bind, "status endpoint listening");
            Some(tokio::spawn(async move {
                axum::serve(listener, app).await.ok();
            }))
        }
        None => None,
    };

    let agent = AgentLoop::new(
        BufReader::new(device),
        std::io::stdout(),
        flusher.clone(),
        config.read_interval,
    );
    let agent_done = spawn_agent_thread(agent)?;
    tracing::info!(
        threshold = config.flush_threshold,
        url = %config.metrics_url,
        "forwarding readings"
    );

    let outcome = tokio::select! {
        res = agent_done => match res {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.context("serial reader stopped")),
            Err(_) => Err(anyhow!("serial reader thread exited without a result")),
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
            Ok(())
        }
    };

    if let Some(handle) = http_handle {
        handle.abort();
    }
    flusher.final_flush(config.http_timeout).await;
    drop(lock);

    outcome
}

fn config_summary(config: &Config) -> serde_json::Value {
    json!({
        "device": config.device.display().to_string(),
        "baud_rate": config.baud_rate,
        "start_command": config.start_command,
        "lock_path": config.lock_path.display().to_string(),
        "metrics_url": config.metrics_url,
        "api_token": "<redacted>",
        "http_timeout_ms": config.http_timeout.as_millis() as u64,
        "flush_threshold": config.flush_threshold,
        "max_buffered_samples": config.max_buffered_samples,
        "read_interval_ms": config.read_interval.as_millis() as u64,
        "metric_interval_secs": config.metric_interval_secs,
        "source_tag": config.source_tag,
        "retry_initial_ms": config.retry_initial.as_millis() as u64,
        "retry_max_ms": config.retry_max.as_millis() as u64,
        "http_bind": config.http_bind,
    })
}
