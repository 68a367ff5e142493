use std::path::PathBuf;

use clap::Parser;
use messagebridge::{app, config, telemetry};
use tracing::info;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
	/// Use inline YAML configuration
	#[arg(short, long, value_name = "config", conflicts_with = "file")]
	config: Option<String>,

	/// Read configuration from a YAML file
	#[arg(short, long, value_name = "file")]
	file: Option<PathBuf>,

	/// Parse the configuration and exit
	#[arg(long)]
	validate_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();
	let contents = match (args.config, args.file) {
		(Some(inline), _) => Some(inline),
		(None, Some(file)) => Some(fs_err::tokio::read_to_string(&file).await?),
		(None, None) => None,
	};
	let config = config::parse_config(contents.as_deref())?;
	if args.validate_only {
		println!("configuration is valid");
		return Ok(());
	}

	telemetry::setup_logging(config.json_logs)?;
	info!(version = env!("CARGO_PKG_VERSION"), "starting messagebridge");
	app::serve(config).await
}
