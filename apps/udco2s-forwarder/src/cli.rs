use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "udco2s-forwarder",
    version,
    about = "Forward UD-CO2S serial readings to a Graphite metrics endpoint"
)]
pub struct Args {
    /// Serial device path (overrides UDCO2S_DEVICE).
    #[arg(long)]
    pub device: Option<PathBuf>,
    /// Single-instance lock file (overrides UDCO2S_LOCK_PATH).
    #[arg(long)]
    pub lock_path: Option<PathBuf>,
    /// Bind address for the local status endpoint (overrides UDCO2S_HTTP_BIND).
    #[arg(long)]
    pub http_bind: Option<String>,
    /// Load and print the effective configuration, then exit.
    #[arg(long, default_value_t = false)]
    pub check_config: bool,
}
