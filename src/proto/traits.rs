//! The two capability sets the master serves
//!
//! The master implements both traits on one value; clients and
//! chunkservers implement the caller side through their RPC proxies.
//! Keeping them separate keeps the safe-mode gate honest: safe mode
//! refuses `ClientProtocol` calls while `ChunkserverProtocol` traffic
//! keeps flowing so the master can learn block locations.

use async_trait::async_trait;

use super::messages::{BlockTasks, Endpoint, Listing, LocatedBlock, LocatedBlocks};
use crate::error::Result;

/// Operations issued by DFS clients (method IDs 1..=14)
#[async_trait]
pub trait ClientProtocol: Send + Sync {
	/// Resolve a file into its located blocks, in file order.
	async fn get_block_locations(&self, path: &str) -> Result<LocatedBlocks>;

	/// Start creating a file: allocates the first block and its chain.
	/// The file gets its DfID only at `complete`.
	async fn create(&self, path: &str) -> Result<LocatedBlock>;

	/// Allocate the next block of a file that is mid-creation.
	async fn add_block(&self, path: &str) -> Result<LocatedBlock>;

	/// Record the successfully written chain prefix of one block.
	async fn block_ack(&self, located: LocatedBlock) -> Result<()>;

	/// Commit a file: assign its DfID, adopt every acked block, log the edit.
	async fn complete(&self, path: &str) -> Result<()>;

	/// Delete a file (directories are refused).
	async fn remove(&self, path: &str) -> Result<()>;

	/// Does the path name a committed entry?
	async fn exists(&self, path: &str) -> Result<bool>;

	/// Create a directory.
	async fn make_dir(&self, path: &str) -> Result<()>;

	/// List the entries of a directory.
	async fn list_dir(&self, path: &str) -> Result<Listing>;
}

/// Operations issued by chunkservers (method IDs 101..=104)
#[async_trait]
pub trait ChunkserverProtocol: Send + Sync {
	/// Liveness ping.
	async fn heart_beat(&self, endpoint: Endpoint) -> Result<()>;

	/// Full inventory report; returns the block IDs the reporter should
	/// delete from local disk.
	async fn blk_report(&self, endpoint: Endpoint, block_ids: Vec<u64>) -> Result<Vec<u64>>;

	/// Ask for pending replication work this chunkserver can source.
	/// Errs with `NoBlockTask` when the queue has nothing for it.
	async fn get_blk_task(&self, endpoint: Endpoint) -> Result<BlockTasks>;

	/// Incremental notification of freshly received blocks.
	async fn recved_blks(&self, endpoint: Endpoint, block_ids: Vec<u64>) -> Result<()>;
}

// vim: ts=4
