use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "rps")]
#[command(about = "Remote provisioning server for AMT-class devices")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Emit logs as JSON lines
	#[arg(long, global = true, env = "RPS_LOG_JSON")]
	pub log_json: bool,

	/// Configuration file
	#[arg(short, long, global = true, env = "RPS_CONFIG", default_value = "rps.toml", value_name = "FILE")]
	pub config: PathBuf,

	/// Device listen address, overriding `[server].listen`
	#[arg(long, global = true, env = "RPS_LISTEN", value_name = "ADDR")]
	pub listen: Option<SocketAddr>,

	#[command(subcommand)]
	pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
	/// Accept device and Enterprise Assistant connections (default)
	Serve,

	/// Load the configuration, print the effective settings and exit
	CheckConfig,
}

impl Cli {
	pub fn command(&self) -> Commands {
		self.command.unwrap_or(Commands::Serve)
	}
}
