//! Command-line and environment configuration for `srp-server`.

use clap::Parser;

#[derive(Debug, Parser)]
#[clap(name = "srp-server")]
#[clap(about = "Accepts agent tunnels and exposes intranet services to the public internet")]
pub struct Args {
    /// Port for the control HTTP API.
    #[arg(long, env = "SRP_HTTP_PORT", default_value_t = 8010)]
    pub http: u16,

    /// Port agents dial to establish their tunnel.
    #[arg(long, env = "SRP_DATA_PORT", default_value_t = 8011)]
    pub data: u16,

    /// Path to the embedded service registry database.
    #[arg(long, env = "SRP_SERVICE_DB", default_value = "service.db")]
    pub db: String,

    /// Enable logging.
    #[arg(long)]
    pub log: bool,

    /// Log level, e.g. "info", "debug", "srp_server=debug,srp_core=trace".
    #[arg(long, env = "SRP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
