use clap::{Arg, Command};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use minidfs::chunkserver::DfsChunkserver;
use minidfs::config::Config;
use minidfs::logging;
use minidfs::master::DfsMaster;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let matches = Command::new("miniDFS")
		.version("0.1.0")
		.about("Single-master distributed file system")
		.subcommand_required(true)
		.arg(
			Arg::new("config")
				.short('c')
				.long("config")
				.value_name("FILE")
				.help("Configuration file (TOML)"),
		)
		.subcommand(Command::new("master").about("Run the master"))
		.subcommand(Command::new("chunkserver").about("Run a chunkserver"))
		.subcommand(Command::new("format").about("Initialize the master's name system"))
		.get_matches();

	logging::init_tracing(matches.subcommand_name().unwrap_or("minidfs"));

	let config_path = matches.get_one::<String>("config").map(PathBuf::from);
	let config = Config::load(config_path.as_deref())?;

	match matches.subcommand() {
		Some(("format", _)) => {
			let master = DfsMaster::new(&config);
			master.format().await?;
		}
		Some(("master", _)) => {
			let master = Arc::new(DfsMaster::new(&config));
			master.boot().await?;
			let listener = tokio::net::TcpListener::bind((
				config.master_ip.as_str(),
				config.master_port,
			))
			.await?;
			master.serve(listener).await?;
		}
		Some(("chunkserver", _)) => {
			DfsChunkserver::run(config).await?;
		}
		_ => unreachable!("subcommand is required"),
	}

	Ok(())
}

// vim: ts=4
