//! Command-line and environment configuration for `srp-agent`.

use clap::Parser;

fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "srp-agent".to_string())
}

#[derive(Debug, Parser)]
#[clap(name = "srp-agent")]
#[clap(about = "Dials a server tunnel and exposes an intranet service to it")]
pub struct Args {
    /// `host:http_port` of the server's control API.
    #[arg(long, env = "SRP_SERVER")]
    pub server: String,

    /// Agent id to register under. Defaults to the local hostname.
    #[arg(long, env = "SRP_AGENT_NAME", default_value_t = default_name())]
    pub name: String,

    /// Free-text description sent at registration.
    #[arg(long, env = "SRP_AGENT_DESCRIPTION", default_value = "")]
    pub description: String,

    /// Enable logging.
    #[arg(long)]
    pub log: bool,

    /// Log level, e.g. "info", "debug", "srp_agent=debug,srp_core=trace".
    #[arg(long, env = "SRP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}
