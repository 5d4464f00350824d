//! Chunkserver agent: block data service, chain forwarding and the
//! master coordination loop
//!
//! The agent runs two long-lived activities. The data service accepts
//! block connections (bounded by `nThread` concurrent handlers) and
//! speaks the data-plane protocol: WRITE receives a block, streaming it
//! to a staging file and - when the chain continues - to the next hop in
//! parallel; READ streams a stored block back. The control loop talks to
//! the master: heartbeats, block reports, received-block notices and
//! copy-task polling.

pub mod store;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;

use crate::config::Config;
use crate::error::{DfsError, Result};
use crate::logging::*;
use crate::proto::codec;
use crate::proto::messages::{Block, BlockReport, BlockTasks, Endpoint, LocatedBlock};
use crate::proto::op::{self, Method};
use crate::proto::traits::ChunkserverProtocol;

use store::BlockStore;

pub struct DfsChunkserver {
	config: Config,
	/// the identity this server reports to the master
	endpoint: Endpoint,
	store: BlockStore,
	master: MasterProxy,
	/// authoritative on-disk inventory
	served: Mutex<HashSet<u64>>,
	/// recently received, pending notification to the master
	recved: Mutex<HashSet<u64>>,
}

impl DfsChunkserver {
	/// Bind the data service, scan the data directory and start both the
	/// data service and the control loop. A configured port of 0 binds
	/// an ephemeral port; the advertised endpoint carries the real one.
	pub async fn start(config: Config) -> Result<Arc<Self>> {
		tokio::fs::create_dir_all(&config.data_dir).await?;
		let store = BlockStore::new(&config.data_dir);
		let served = store.scan().await?;
		info!(blocks = served.len(), dir = %config.data_dir.display(), "data dir scanned");

		let listener =
			TcpListener::bind((config.server_ip.as_str(), config.server_port)).await?;
		let endpoint = Endpoint::new(config.server_ip.clone(), listener.local_addr()?.port());
		info!(%endpoint, "chunkserver data service listening");

		let master = MasterProxy::new(config.master_ip.clone(), config.master_port);
		let server = Arc::new(DfsChunkserver {
			config,
			endpoint,
			store,
			master,
			served: Mutex::new(served),
			recved: Mutex::new(HashSet::new()),
		});

		tokio::spawn(Arc::clone(&server).data_service(listener));
		tokio::spawn(Arc::clone(&server).control_loop());
		Ok(server)
	}

	/// Run as a foreground process (CLI entry point).
	pub async fn run(config: Config) -> Result<()> {
		let _server = Self::start(config).await?;
		std::future::pending::<()>().await;
		unreachable!()
	}

	pub fn endpoint(&self) -> &Endpoint {
		&self.endpoint
	}

	/// Snapshot of the served set, for inspection.
	pub async fn served_blocks(&self) -> HashSet<u64> {
		self.served.lock().await.clone()
	}

	// === Data service ===

	async fn data_service(self: Arc<Self>, listener: TcpListener) {
		// same two-tier admission as the master: `maxConnections` caps
		// accepted-but-unserved block connections, `nThread` caps the
		// transfers actually streaming
		let handlers = Arc::new(Semaphore::new(self.config.n_thread));
		let backlog = Arc::new(Semaphore::new(self.config.max_connections as usize));
		loop {
			let (stream, peer) = match listener.accept().await {
				Ok(conn) => conn,
				Err(e) => {
					warn!(error = %e, "accept failed");
					continue;
				}
			};
			let accepted = match Arc::clone(&backlog).acquire_owned().await {
				Ok(permit) => permit,
				Err(_) => return,
			};
			let workers = Arc::clone(&handlers);
			let server = Arc::clone(&self);
			tokio::spawn(async move {
				let _accepted = accepted;
				let Ok(_running) = workers.acquire_owned().await else { return };
				if let Err(e) = server.handle_block_request(stream).await {
					debug!(%peer, error = %e, "block request failed");
				}
			});
		}
	}

	async fn handle_block_request(&self, mut stream: TcpStream) -> Result<()> {
		let opcode = stream.read_u8().await?;
		match opcode {
			op::OP_WRITE => self.recv_block(&mut stream).await,
			op::OP_READ => self.send_block(&mut stream).await,
			other => {
				Err(DfsError::Protocol { message: format!("unknown data opcode {}", other) })
			}
		}
	}

	/// WRITE handler: the one-byte response is the number of replicas
	/// written by the chain rooted here; 0 reports local failure.
	async fn recv_block(&self, stream: &mut TcpStream) -> Result<()> {
		match self.recv_block_inner(stream).await {
			Ok(count) => {
				stream.write_u8(count).await?;
				Ok(())
			}
			Err(e) => {
				let _ = stream.write_u8(0).await;
				Err(e)
			}
		}
	}

	async fn recv_block_inner(&self, stream: &mut TcpStream) -> Result<u8> {
		let lb: LocatedBlock = codec::read_record16(stream).await?;
		let block_id = lb.block.id;
		debug!(block_id, chain = lb.endpoints.len(), "receiving block");

		// open the forward hop before any payload moves; failures here
		// degrade to a local-only write, never to a lost block
		let mut forward: Option<TcpStream> = None;
		if lb.endpoints.len() > 1 {
			let trimmed =
				LocatedBlock { block: lb.block, endpoints: lb.endpoints[1..].to_vec() };
			match send_write_header(&trimmed).await {
				Ok(next) => forward = Some(next),
				Err(e) => {
					warn!(block_id, error = %e, "cannot reach downstream chunkserver");
				}
			}
		}

		let data_len = codec::read_data_len(stream).await?;
		if let Some(next) = forward.as_mut() {
			if codec::write_data_len(next, data_len).await.is_err() {
				forward = None;
			}
		}

		let (mut file, staging) = self.store.create_staging(block_id).await?;
		let mut buf = vec![0u8; self.config.buffer_size];
		let mut left = data_len;
		while left > 0 {
			let want = left.min(buf.len() as u64) as usize;
			let n = match stream.read(&mut buf[..want]).await {
				Ok(0) => {
					self.store.discard_staging(&staging).await;
					return Err(DfsError::Protocol {
						message: format!("peer hung up {} bytes early", left),
					});
				}
				Ok(n) => n,
				Err(e) => {
					self.store.discard_staging(&staging).await;
					return Err(e.into());
				}
			};
			if let Err(e) = file.write_all(&buf[..n]).await {
				self.store.discard_staging(&staging).await;
				return Err(e.into());
			}
			if let Some(next) = forward.as_mut() {
				if next.write_all(&buf[..n]).await.is_err() {
					// finish the local write regardless; the master
					// repairs the short chain asynchronously
					warn!(block_id, "downstream write failed mid-stream");
					forward = None;
				}
			}
			left -= n as u64;
		}
		self.store.finalize(file, &staging, block_id).await?;

		{
			let mut served = self.served.lock().await;
			let mut recved = self.recved.lock().await;
			served.insert(block_id);
			recved.insert(block_id);
		}

		let downstream = match forward {
			Some(mut next) => next.read_u8().await.unwrap_or(0),
			None => 0,
		};
		info!(block_id, replicas = downstream + 1, "block stored");
		Ok(downstream + 1)
	}

	/// READ handler: status byte, then length and payload on success.
	async fn send_block(&self, stream: &mut TcpStream) -> Result<()> {
		let block: Block = codec::read_record16(stream).await?;

		let held = self.served.lock().await.contains(&block.id);
		let opened = if held { self.store.open_block(block.id).await.ok() } else { None };
		let Some((mut file, len)) = opened else {
			warn!(block_id = block.id, "read request for a block not stored here");
			stream.write_u8(op::FAILURE).await?;
			return Ok(());
		};

		stream.write_u8(op::SUCCESS).await?;
		codec::write_data_len(stream, len).await?;

		let mut buf = vec![0u8; self.config.buffer_size];
		let mut left = len;
		while left > 0 {
			let want = left.min(buf.len() as u64) as usize;
			let n = file.read(&mut buf[..want]).await?;
			if n == 0 {
				return Err(DfsError::Protocol {
					message: format!("block {} shrank while being read", block.id),
				});
			}
			stream.write_all(&buf[..n]).await?;
			left -= n as u64;
		}
		debug!(block_id = block.id, len, "block served");
		Ok(())
	}

	// === Control loop ===

	async fn control_loop(self: Arc<Self>) {
		let heart = Duration::from_millis(self.config.heart_beat_interval);
		let report = Duration::from_millis(self.config.block_report_interval);
		let task_delay = Duration::from_millis(self.config.blk_task_startup_interval);

		let startup = Instant::now();
		let mut last_heartbeat = startup;
		let mut last_report = startup;
		loop {
			let now = Instant::now();
			if now.duration_since(last_heartbeat) >= heart {
				if let Err(e) = self.master.heart_beat(self.endpoint.clone()).await {
					warn!(error = %e, "heartbeat failed");
				}
				last_heartbeat = now;
			}
			if now.duration_since(last_report) >= report {
				if let Err(e) = self.report_blocks().await {
					warn!(error = %e, "block report failed");
				}
				last_report = now;
			}
			if let Err(e) = self.flush_recved().await {
				warn!(error = %e, "received-blocks notice failed");
			}
			if now.duration_since(startup) >= task_delay {
				self.poll_block_tasks().await;
			}
			tokio::time::sleep_until(last_heartbeat + heart).await;
		}
	}

	/// Full inventory report; deletes the orphans the master returns.
	async fn report_blocks(&self) -> Result<()> {
		let snapshot: Vec<u64> = {
			let served = self.served.lock().await;
			served.iter().copied().collect()
		};
		let to_delete = self.master.blk_report(self.endpoint.clone(), snapshot).await?;
		for block_id in to_delete {
			{
				let mut served = self.served.lock().await;
				if !served.remove(&block_id) {
					continue;
				}
			}
			match self.store.remove_block(block_id).await {
				Ok(()) => info!(block_id, "orphan block deleted"),
				Err(e) => warn!(block_id, error = %e, "failed to delete orphan block"),
			}
		}
		Ok(())
	}

	/// Push the pending received-block set, clearing it on success.
	async fn flush_recved(&self) -> Result<()> {
		let snapshot: Vec<u64> = {
			let recved = self.recved.lock().await;
			if recved.is_empty() {
				return Ok(());
			}
			recved.iter().copied().collect()
		};
		self.master.recved_blks(self.endpoint.clone(), snapshot.clone()).await?;
		let mut recved = self.recved.lock().await;
		for block_id in snapshot {
			recved.remove(&block_id);
		}
		Ok(())
	}

	async fn poll_block_tasks(&self) {
		let tasks = match self.master.get_blk_task(self.endpoint.clone()).await {
			Ok(BlockTasks { tasks }) => tasks,
			Err(DfsError::NoBlockTask) => return,
			Err(e) => {
				warn!(error = %e, "task poll failed");
				return;
			}
		};
		for task in tasks {
			if task.op != op::COPY {
				warn!(op = task.op, "unknown block task ignored");
				continue;
			}
			let block_id = task.located.block.id;
			match self.replicate_block(&task.located).await {
				Ok(()) => info!(block_id, "block replicated"),
				Err(e) => warn!(block_id, error = %e, "replication failed"),
			}
		}
	}

	/// Source a local block into a write chain across the given
	/// destinations (COPY task execution).
	async fn replicate_block(&self, located: &LocatedBlock) -> Result<()> {
		let block_id = located.block.id;
		if !self.served.lock().await.contains(&block_id) {
			return Err(DfsError::Protocol {
				message: format!("asked to source block {} this server does not hold", block_id),
			});
		}
		if located.endpoints.is_empty() {
			return Ok(());
		}

		let mut stream = send_write_header(located).await?;
		let (mut file, len) = self.store.open_block(block_id).await?;
		codec::write_data_len(&mut stream, len).await?;

		let mut buf = vec![0u8; self.config.buffer_size];
		let mut left = len;
		while left > 0 {
			let want = left.min(buf.len() as u64) as usize;
			let n = file.read(&mut buf[..want]).await?;
			if n == 0 {
				return Err(DfsError::Protocol {
					message: format!("block {} shrank while being read", block_id),
				});
			}
			stream.write_all(&buf[..n]).await?;
			left -= n as u64;
		}

		let count = stream.read_u8().await?;
		if count as usize == located.endpoints.len() {
			Ok(())
		} else {
			Err(DfsError::Status { operation: "replicate", code: count })
		}
	}
}

/// Connect to the chain head named by `located` and send the WRITE
/// header. The returned stream is ready for the payload length.
async fn send_write_header(located: &LocatedBlock) -> Result<TcpStream> {
	let head = &located.endpoints[0];
	let mut stream = TcpStream::connect((head.ip.as_str(), head.port)).await?;
	stream.write_u8(op::OP_WRITE).await?;
	codec::write_record16(&mut stream, located).await?;
	Ok(stream)
}

/// Caller side of the chunkserver protocol: one connection per call.
pub struct MasterProxy {
	master_ip: String,
	master_port: u16,
}

impl MasterProxy {
	pub fn new(master_ip: String, master_port: u16) -> Self {
		MasterProxy { master_ip, master_port }
	}

	async fn call(&self, method: Method, payload: &[u8]) -> Result<(u8, Vec<u8>)> {
		codec::call(&self.master_ip, self.master_port, method as u8, payload).await
	}
}

#[async_trait]
impl ChunkserverProtocol for MasterProxy {
	async fn heart_beat(&self, endpoint: Endpoint) -> Result<()> {
		let payload = serde_json::to_vec(&endpoint)?;
		let (status, _) = self.call(Method::HeartBeat, &payload).await?;
		match status {
			op::SUCCESS => Ok(()),
			code => Err(DfsError::from_status(code, "heartBeat", "")),
		}
	}

	async fn blk_report(&self, endpoint: Endpoint, block_ids: Vec<u64>) -> Result<Vec<u64>> {
		let payload = serde_json::to_vec(&BlockReport { endpoint, block_ids })?;
		let (status, body) = self.call(Method::BlkReport, &payload).await?;
		match status {
			op::SUCCESS => {
				let ids: crate::proto::messages::BlockIds = serde_json::from_slice(&body)?;
				Ok(ids.block_ids)
			}
			code => Err(DfsError::from_status(code, "blkReport", "")),
		}
	}

	async fn get_blk_task(&self, endpoint: Endpoint) -> Result<BlockTasks> {
		let payload = serde_json::to_vec(&endpoint)?;
		let (status, body) = self.call(Method::GetBlkTask, &payload).await?;
		match status {
			op::SUCCESS => Ok(serde_json::from_slice(&body)?),
			code => Err(DfsError::from_status(code, "getBlkTask", "")),
		}
	}

	async fn recved_blks(&self, endpoint: Endpoint, block_ids: Vec<u64>) -> Result<()> {
		let payload = serde_json::to_vec(&BlockReport { endpoint, block_ids })?;
		let (status, _) = self.call(Method::RecvedBlks, &payload).await?;
		match status {
			op::SUCCESS => Ok(()),
			code => Err(DfsError::from_status(code, "recvedBlks", "")),
		}
	}
}

// vim: ts=4
