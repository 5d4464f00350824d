//! The master: namespace authority, durability, cluster control and the
//! write-pipeline state machine
//!
//! One `DfsMaster` value serves both capability sets of the wire
//! protocol. Shared state is split across four mutexes, always acquired
//! in the fixed order
//!
//! 1. `image`     - fsimage and edit log on disk
//! 2. `namespace` - in-memory name/dentry/inode/block tables
//! 3. `cluster`   - block locations, alive set, replication queue
//! 4. `creating`  - files and blocks of in-flight writes
//!
//! (any subset, in this order). The ID counters are atomics and may be
//! advanced without holding any lock.

pub mod cluster;
pub mod image;
pub mod namespace;
pub mod server;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::error::{DfsError, Result};
use crate::logging::*;
use crate::proto::messages::{
	Block, BlockTasks, Endpoint, Listing, LocatedBlock, LocatedBlocks,
};
use crate::proto::traits::{ChunkserverProtocol, ClientProtocol};
use crate::util;

use cluster::ClusterState;
use image::{EditRecord, FsImage, ImageStore};
use namespace::Namespace;

/// Status-checker period, milliseconds.
pub const STATUS_CHECK_INTERVAL: u64 = 7000;

/// Edit count that triggers an automatic checkpoint.
const MAX_EDIT_LOG_ENTRIES: u64 = 64;

/// Transient tables of the write pipeline
#[derive(Debug, Default)]
struct Creating {
	/// path -> ordered block IDs handed out for it
	files: HashMap<String, Vec<u64>>,
	/// block ID -> acked located block (chain truncated by the client)
	blocks: HashMap<u64, LocatedBlock>,
}

pub struct DfsMaster {
	image: Mutex<ImageStore>,
	namespace: Mutex<Namespace>,
	cluster: Mutex<ClusterState>,
	creating: Mutex<Creating>,

	/// next DfID to hand out; root 0 is never handed out
	next_dfid: AtomicU64,
	/// next BlockID to hand out; block IDs start at 1
	next_blkid: AtomicU64,
	/// edits appended since the last checkpoint
	edit_count: AtomicU64,
	safe_mode: AtomicBool,

	replication: usize,
	n_thread: usize,
	max_connections: usize,
}

impl DfsMaster {
	pub fn new(config: &Config) -> Self {
		Self::build(config, ClusterState::new(config.replication_factor))
	}

	/// Master with deterministic placement, for tests.
	pub fn new_with_seed(config: &Config, seed: u64) -> Self {
		Self::build(config, ClusterState::with_rng_seed(config.replication_factor, seed))
	}

	fn build(config: &Config, cluster: ClusterState) -> Self {
		DfsMaster {
			image: Mutex::new(ImageStore::new(&config.name_sys_file, &config.edit_log_file)),
			namespace: Mutex::new(Namespace::new()),
			cluster: Mutex::new(cluster),
			creating: Mutex::new(Creating::default()),
			next_dfid: AtomicU64::new(1),
			next_blkid: AtomicU64::new(1),
			edit_count: AtomicU64::new(0),
			safe_mode: AtomicBool::new(true),
			replication: config.replication_factor,
			n_thread: config.n_thread,
			max_connections: config.max_connections as usize,
		}
	}

	fn alloc_dfid(&self) -> u64 {
		self.next_dfid.fetch_add(1, Ordering::SeqCst)
	}

	fn alloc_blkid(&self) -> u64 {
		self.next_blkid.fetch_add(1, Ordering::SeqCst)
	}

	fn bump_dfid(&self, seen: u64) {
		self.next_dfid.fetch_max(seen + 1, Ordering::SeqCst);
	}

	fn bump_blkid(&self, seen: u64) {
		self.next_blkid.fetch_max(seen + 1, Ordering::SeqCst);
	}

	// === Lifecycle ===

	/// Format the name system: reset to a bare root, write a fresh empty
	/// edit log and dump an fsimage.
	pub async fn format(&self) -> Result<()> {
		let image = self.image.lock().await;
		let mut ns = self.namespace.lock().await;
		let mut cluster = self.cluster.lock().await;
		let mut creating = self.creating.lock().await;

		ns.reset();
		cluster.clear();
		creating.files.clear();
		creating.blocks.clear();
		self.next_dfid.store(1, Ordering::SeqCst);
		self.next_blkid.store(1, Ordering::SeqCst);
		self.edit_count.store(0, Ordering::SeqCst);

		image.reset_edits().await?;
		image.write_image(&image::capture(&ns, 1, 1)).await?;
		info!("name system formatted");
		Ok(())
	}

	/// Boot from disk: load the fsimage, replay the edit log, enter safe
	/// mode.
	pub async fn boot(&self) -> Result<()> {
		let image_store = self.image.lock().await;
		let mut ns = self.namespace.lock().await;
		let mut cluster = self.cluster.lock().await;

		let fsimage: FsImage = image_store.read_image().await?;
		let (restored, next_dfid, next_blkid) = image::restore(&fsimage);
		*ns = restored;
		self.next_dfid.store(next_dfid, Ordering::SeqCst);
		self.next_blkid.store(next_blkid, Ordering::SeqCst);
		cluster.clear();

		let records = image_store.replay_edits().await?;
		let replayed = records.len() as u64;
		for record in records {
			self.replay_record(&mut ns, record)?;
		}
		self.edit_count.store(replayed, Ordering::SeqCst);
		self.safe_mode.store(true, Ordering::SeqCst);
		info!(edits = replayed, "name system loaded, entering safe mode");
		Ok(())
	}

	fn replay_record(&self, ns: &mut Namespace, record: EditRecord) -> Result<()> {
		match record {
			EditRecord::Mkdir { path, dfid } => {
				self.bump_dfid(dfid);
				ns.apply_mkdir(&path, dfid)
			}
			EditRecord::Create { path, dfid, blocks } => {
				self.bump_dfid(dfid);
				for block in &blocks {
					self.bump_blkid(block.id);
				}
				ns.apply_create(&path, dfid, &blocks)
			}
			EditRecord::Remove { path, .. } => ns.apply_remove(&path).map(|_| ()),
		}
	}

	/// Snapshot the namespace to the fsimage and reset the edit log.
	pub async fn checkpoint(&self) -> Result<()> {
		let image = self.image.lock().await;
		let ns = self.namespace.lock().await;

		image.reset_edits().await?;
		let next_dfid = self.next_dfid.load(Ordering::SeqCst);
		let next_blkid = self.next_blkid.load(Ordering::SeqCst);
		image.write_image(&image::capture(&ns, next_dfid, next_blkid)).await?;
		self.edit_count.store(0, Ordering::SeqCst);
		info!("checkpoint written");
		Ok(())
	}

	// === Safe mode ===

	pub fn in_safe_mode(&self) -> bool {
		self.safe_mode.load(Ordering::SeqCst)
	}

	/// Safe to serve clients once every committed block has at least one
	/// alive reported holder.
	pub async fn is_safe(&self) -> bool {
		let ns = self.namespace.lock().await;
		let cluster = self.cluster.lock().await;
		cluster.all_blocks_located(&ns.block_ids())
	}

	/// Lazy safe-mode exit, polled on gated client requests.
	pub async fn leave_safe_mode_if_ready(&self) {
		if self.in_safe_mode() && self.is_safe().await {
			self.safe_mode.store(false, Ordering::SeqCst);
			info!("leaving safe mode");
		}
	}

	// === Periodic maintenance ===

	/// One status-checker tick: evict silent chunkservers and checkpoint
	/// when the edit log has grown past its threshold.
	pub async fn run_status_check(&self) {
		let dead = {
			let mut cluster = self.cluster.lock().await;
			cluster.sweep_dead()
		};
		for endpoint in &dead {
			warn!(%endpoint, "chunkserver evicted after missed liveness deadline");
		}
		if self.edit_count.load(Ordering::SeqCst) > MAX_EDIT_LOG_ENTRIES {
			if let Err(e) = self.checkpoint().await {
				error!(error = %e, "periodic checkpoint failed");
			}
		}
	}
}

#[async_trait]
impl ClientProtocol for DfsMaster {
	async fn get_block_locations(&self, path: &str) -> Result<LocatedBlocks> {
		let ns = self.namespace.lock().await;
		let cluster = self.cluster.lock().await;

		let blocks = ns.file_blocks(path)?;
		let blocks = blocks
			.into_iter()
			.map(|block| LocatedBlock {
				endpoints: cluster.locations(block.id).to_vec(),
				block,
			})
			.collect();
		Ok(LocatedBlocks { blocks })
	}

	async fn create(&self, path: &str) -> Result<LocatedBlock> {
		let ns = self.namespace.lock().await;
		let mut cluster = self.cluster.lock().await;
		let mut creating = self.creating.lock().await;

		ns.check_new_entry(path)?;
		if creating.files.contains_key(path) {
			return Err(DfsError::InCreating { path: path.to_string() });
		}

		let endpoints = cluster.allocate(self.replication)?;
		let block_id = self.alloc_blkid();
		creating.files.insert(path.to_string(), vec![block_id]);
		debug!(path, block_id, "file entered creating state");
		Ok(LocatedBlock { block: Block { id: block_id, len: 0 }, endpoints })
	}

	async fn add_block(&self, path: &str) -> Result<LocatedBlock> {
		let mut cluster = self.cluster.lock().await;
		let mut creating = self.creating.lock().await;

		let Some(block_ids) = creating.files.get_mut(path) else {
			return Err(DfsError::NoSuchFile { path: path.to_string() });
		};
		let endpoints = cluster.allocate(self.replication)?;
		let block_id = self.alloc_blkid();
		block_ids.push(block_id);
		debug!(path, block_id, "block appended to creating file");
		Ok(LocatedBlock { block: Block { id: block_id, len: 0 }, endpoints })
	}

	async fn block_ack(&self, located: LocatedBlock) -> Result<()> {
		let mut creating = self.creating.lock().await;
		debug!(block_id = located.block.id, replicas = located.endpoints.len(), "block acked");
		creating.blocks.insert(located.block.id, located);
		Ok(())
	}

	async fn complete(&self, path: &str) -> Result<()> {
		let image = self.image.lock().await;
		let mut ns = self.namespace.lock().await;
		let mut cluster = self.cluster.lock().await;
		let mut creating = self.creating.lock().await;

		let Some(block_ids) = creating.files.get(path) else {
			return Err(DfsError::NoSuchFile { path: path.to_string() });
		};
		ns.check_new_entry(path)?;

		// adopt the acked blocks in file order; never-acked ones are dropped
		let located: Vec<LocatedBlock> = block_ids
			.iter()
			.filter_map(|id| creating.blocks.get(id).cloned())
			.collect();
		let blocks: Vec<Block> = located.iter().map(|lb| lb.block).collect();

		// the edit record goes to disk before any table changes; a failed
		// append leaves memory untouched and replay stays exact
		let dfid = self.alloc_dfid();
		let record =
			EditRecord::Create { path: path.to_string(), dfid, blocks: blocks.clone() };
		image.append_edit(&record).await?;
		self.edit_count.fetch_add(1, Ordering::SeqCst);

		ns.apply_create(path, dfid, &blocks)?;
		for lb in &located {
			if lb.endpoints.len() < self.replication {
				cluster.enqueue_replication(lb.block.id, self.replication - lb.endpoints.len());
			}
		}
		if let Some(ids) = creating.files.remove(path) {
			for id in ids {
				creating.blocks.remove(&id);
			}
		}
		info!(path, dfid, blocks = blocks.len(), "file committed");
		Ok(())
	}

	async fn remove(&self, path: &str) -> Result<()> {
		let image = self.image.lock().await;
		let mut ns = self.namespace.lock().await;

		let dfid = ns
			.dfid(path)
			.ok_or_else(|| DfsError::NoSuchFile { path: path.to_string() })?;
		if ns.is_dir(dfid) {
			return Err(DfsError::IsDirectory { path: path.to_string() });
		}
		let parent = ns.dfid(&util::split_path(path)).unwrap_or(namespace::ROOT_DFID);

		let record = EditRecord::Remove { path: path.to_string(), parent };
		image.append_edit(&record).await?;
		self.edit_count.fetch_add(1, Ordering::SeqCst);

		let released = ns.apply_remove(path)?;
		info!(path, blocks = released.len(), "file removed");
		Ok(())
	}

	async fn exists(&self, path: &str) -> Result<bool> {
		let ns = self.namespace.lock().await;
		Ok(ns.contains(path))
	}

	async fn make_dir(&self, path: &str) -> Result<()> {
		let image = self.image.lock().await;
		let mut ns = self.namespace.lock().await;
		let creating = self.creating.lock().await;

		ns.check_new_entry(path)?;
		// a directory must not shadow a file some client is mid-writing
		if creating.files.contains_key(path) {
			return Err(DfsError::InCreating { path: path.to_string() });
		}

		let dfid = self.alloc_dfid();
		let record = EditRecord::Mkdir { path: path.to_string(), dfid };
		image.append_edit(&record).await?;
		self.edit_count.fetch_add(1, Ordering::SeqCst);

		ns.apply_mkdir(path, dfid)?;
		info!(path, dfid, "directory created");
		Ok(())
	}

	async fn list_dir(&self, path: &str) -> Result<Listing> {
		let ns = self.namespace.lock().await;
		ns.list_dir(path)
	}
}

#[async_trait]
impl ChunkserverProtocol for DfsMaster {
	async fn heart_beat(&self, endpoint: Endpoint) -> Result<()> {
		let mut cluster = self.cluster.lock().await;
		cluster.touch(&endpoint);
		Ok(())
	}

	async fn blk_report(&self, endpoint: Endpoint, block_ids: Vec<u64>) -> Result<Vec<u64>> {
		let ns = self.namespace.lock().await;
		let mut cluster = self.cluster.lock().await;
		let creating = self.creating.lock().await;

		cluster.touch(&endpoint);
		let in_flight: std::collections::HashSet<u64> =
			creating.files.values().flatten().copied().collect();

		let mut to_delete = Vec::new();
		for block_id in block_ids {
			if ns.has_block(block_id) {
				cluster.record_location(block_id, &endpoint);
			} else if in_flight.contains(&block_id) {
				// mid-write: the block becomes committed (or garbage) only
				// at complete, so it must survive reports until then
			} else {
				// not referenced by any inode: the reporter holds garbage
				to_delete.push(block_id);
			}
		}
		if !to_delete.is_empty() {
			debug!(%endpoint, orphans = to_delete.len(), "block report returned orphans");
		}
		Ok(to_delete)
	}

	async fn get_blk_task(&self, endpoint: Endpoint) -> Result<BlockTasks> {
		let ns = self.namespace.lock().await;
		let mut cluster = self.cluster.lock().await;

		let tasks = cluster.take_tasks(&endpoint, |id| ns.block(id));
		if tasks.is_empty() {
			return Err(DfsError::NoBlockTask);
		}
		info!(%endpoint, tasks = tasks.len(), "replication tasks dispatched");
		Ok(BlockTasks { tasks })
	}

	async fn recved_blks(&self, endpoint: Endpoint, block_ids: Vec<u64>) -> Result<()> {
		let ns = self.namespace.lock().await;
		let mut cluster = self.cluster.lock().await;

		cluster.touch(&endpoint);
		for block_id in block_ids {
			if ns.has_block(block_id) {
				cluster.record_location(block_id, &endpoint);
			} else {
				warn!(%endpoint, block_id, "received-block notice for unknown block");
			}
		}
		Ok(())
	}
}

// vim: ts=4
