use anyhow::{Context, Result};
use clap::Parser;
use rps_cli::cli::{Cli, Commands};
use rps_cli::config::Config;
use rps_cli::logging;
use rps_cli::server::{self, AppState};
use tokio::net::TcpListener;
use tracing::error;

#[tokio::main]
async fn main() {
	let cli = Cli::parse();
	logging::init(cli.verbose, cli.log_json);

	if let Err(err) = run(cli).await {
		error!(target = "rps", error = %format_args!("{err:#}"), "exiting");
		std::process::exit(1);
	}
}

async fn run(cli: Cli) -> Result<()> {
	let mut config = Config::load(&cli.config)?;
	if let Some(listen) = cli.listen {
		config.server.listen = listen;
	}

	match cli.command() {
		Commands::CheckConfig => {
			println!("listen: {}", config.server.listen);
			println!("enterprise assistant path: {}", config.server.enterprise_assistant_path);
			println!("profiles: {}", config.profiles.len());
			println!("domains: {}", config.domains.len());
			println!("{:#?}", config.settings());
			Ok(())
		}
		Commands::Serve => {
			let state = AppState::from_config(&config)?;
			let listener = TcpListener::bind(config.server.listen)
				.await
				.with_context(|| format!("failed to bind {}", config.server.listen))?;
			server::serve(listener, state, &config.server.enterprise_assistant_path).await
		}
	}
}
