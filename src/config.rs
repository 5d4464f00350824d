//! Configuration for the master, the chunkserver and the client
//!
//! All recognized options live in a single `Config` struct. Values follow
//! a priority chain:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (TOML, path given on the command line)
//! 3. Environment variables (`MINIDFS_*` prefix, highest priority)
//!
//! The key names in the config file are the historical ones of the wire
//! protocol's first implementation (`masterIP`, `BUFFER_SIZE`, ...), kept
//! so existing deployment configs stay valid.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{DfsError, Result};

/// Unified configuration for every miniDFS process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// IP the master serves on (and clients/chunkservers dial)
	#[serde(rename = "masterIP")]
	pub master_ip: String,

	/// Master RPC port
	#[serde(rename = "masterPort")]
	pub master_port: u16,

	/// IP a chunkserver advertises for its data service
	#[serde(rename = "serverIP")]
	pub server_ip: String,

	/// Chunkserver data-service port (0 picks an ephemeral port)
	#[serde(rename = "serverPort")]
	pub server_port: u16,

	/// Directory a chunkserver keeps its block files in
	#[serde(rename = "dataDir")]
	pub data_dir: PathBuf,

	/// Maximum payload of one block in bytes
	#[serde(rename = "blockSize")]
	pub block_size: u64,

	/// Most connections an accept loop admits before it stalls; the
	/// listen-backlog bound of the accept loops
	#[serde(rename = "maxConnections")]
	pub max_connections: u32,

	/// Buffer size for streaming block payloads
	#[serde(rename = "BUFFER_SIZE")]
	pub buffer_size: usize,

	/// Number of concurrently served requests per process
	#[serde(rename = "nThread")]
	pub n_thread: usize,

	/// Chunkserver heartbeat period, milliseconds
	#[serde(rename = "HEART_BEAT_INTERVAL")]
	pub heart_beat_interval: u64,

	/// Chunkserver block-report period, milliseconds
	#[serde(rename = "BLOCK_REPORT_INTERVAL")]
	pub block_report_interval: u64,

	/// Delay before a chunkserver starts polling for copy tasks, milliseconds
	#[serde(rename = "BLK_TASK_STARTUP_INTERVAL")]
	pub blk_task_startup_interval: u64,

	/// Path of the fsimage file on the master
	#[serde(rename = "nameSysFile")]
	pub name_sys_file: PathBuf,

	/// Path of the edit log on the master
	#[serde(rename = "editLogFile")]
	pub edit_log_file: PathBuf,

	/// Target number of replicas for every committed block
	#[serde(rename = "replicationFactor")]
	pub replication_factor: usize,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			master_ip: "127.0.0.1".to_string(),
			master_port: 12345,
			server_ip: "127.0.0.1".to_string(),
			server_port: 12400,
			data_dir: PathBuf::from("./data"),
			block_size: 2 << 20,
			max_connections: 128,
			buffer_size: 64 << 10,
			n_thread: 8,
			heart_beat_interval: 1000,
			block_report_interval: 5000,
			blk_task_startup_interval: 10_000,
			name_sys_file: PathBuf::from("./fsimage"),
			edit_log_file: PathBuf::from("./editlog"),
			replication_factor: 3,
		}
	}
}

impl Config {
	/// Load configuration: defaults, then the optional TOML file, then
	/// `MINIDFS_*` environment overrides.
	pub fn load(file: Option<&Path>) -> Result<Config> {
		let mut config = match file {
			Some(path) => {
				let text = std::fs::read_to_string(path).map_err(|e| DfsError::Config {
					message: format!("cannot read {}: {}", path.display(), e),
				})?;
				toml::from_str(&text).map_err(|e| DfsError::Config {
					message: format!("cannot parse {}: {}", path.display(), e),
				})?
			}
			None => Config::default(),
		};
		config.apply_env_overrides()?;
		config.validate()?;
		Ok(config)
	}

	fn apply_env_overrides(&mut self) -> Result<()> {
		override_string(&mut self.master_ip, "MINIDFS_MASTER_IP");
		override_parse(&mut self.master_port, "MINIDFS_MASTER_PORT")?;
		override_string(&mut self.server_ip, "MINIDFS_SERVER_IP");
		override_parse(&mut self.server_port, "MINIDFS_SERVER_PORT")?;
		override_path(&mut self.data_dir, "MINIDFS_DATA_DIR");
		override_parse(&mut self.block_size, "MINIDFS_BLOCK_SIZE")?;
		override_parse(&mut self.replication_factor, "MINIDFS_REPLICATION_FACTOR")?;
		override_path(&mut self.name_sys_file, "MINIDFS_NAME_SYS_FILE");
		override_path(&mut self.edit_log_file, "MINIDFS_EDIT_LOG_FILE");
		Ok(())
	}

	fn validate(&self) -> Result<()> {
		if self.replication_factor == 0 {
			return Err(DfsError::Config {
				message: "replicationFactor must be at least 1".to_string(),
			});
		}
		if self.block_size == 0 {
			return Err(DfsError::Config { message: "blockSize must be positive".to_string() });
		}
		if self.buffer_size == 0 {
			return Err(DfsError::Config { message: "BUFFER_SIZE must be positive".to_string() });
		}
		if self.n_thread == 0 {
			return Err(DfsError::Config { message: "nThread must be at least 1".to_string() });
		}
		Ok(())
	}
}

fn override_string(slot: &mut String, key: &str) {
	if let Ok(v) = env::var(key) {
		*slot = v;
	}
}

fn override_path(slot: &mut PathBuf, key: &str) {
	if let Ok(v) = env::var(key) {
		*slot = PathBuf::from(v);
	}
}

fn override_parse<T: std::str::FromStr>(slot: &mut T, key: &str) -> Result<()> {
	if let Ok(v) = env::var(key) {
		*slot = v.parse().map_err(|_| DfsError::Config {
			message: format!("{} has an invalid value: {}", key, v),
		})?;
	}
	Ok(())
}


// vim: ts=4
