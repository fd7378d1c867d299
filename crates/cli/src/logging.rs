use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: u8, json: bool) {
	let default = match verbose {
		0 => "warn",
		1 => "info",
		_ => "debug",
	};
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
	let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
	let installed = if json { builder.json().try_init() } else { builder.try_init() };
	if let Err(err) = installed {
		eprintln!("logging already initialized: {err}");
	}
}
