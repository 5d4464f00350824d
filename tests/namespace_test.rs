//! Namespace operation tests driven through the master's protocol
//! surface: directory creation, the create/complete pipeline states and
//! the validation rejections that must leave state untouched.

use std::path::Path;

use minidfs::config::Config;
use minidfs::error::DfsError;
use minidfs::master::DfsMaster;
use minidfs::proto::messages::{Block, Endpoint, LocatedBlock};
use minidfs::{ChunkserverProtocol, ClientProtocol};

// ============================================================================
// Helper Functions
// ============================================================================

fn test_config(dir: &Path) -> Config {
	Config {
		name_sys_file: dir.join("fsimage"),
		edit_log_file: dir.join("editlog"),
		replication_factor: 1,
		..Config::default()
	}
}

async fn fresh_master(dir: &Path) -> DfsMaster {
	let master = DfsMaster::new_with_seed(&test_config(dir), 7);
	master.format().await.expect("format should succeed");
	master
}

fn endpoint(port: u16) -> Endpoint {
	Endpoint::new("127.0.0.1", port)
}

/// Register one alive chunkserver so block placement can succeed.
async fn with_one_chunkserver(master: &DfsMaster) -> Endpoint {
	let ep = endpoint(7000);
	master.heart_beat(ep.clone()).await.unwrap();
	ep
}

/// Ack a block as fully written on the given chain.
async fn ack(master: &DfsMaster, mut located: LocatedBlock, len: u64) {
	located.block.len = len;
	master.block_ack(located).await.unwrap();
}

// ============================================================================
// Directories
// ============================================================================

#[tokio::test]
async fn format_then_mkdir_then_list() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;

	master.make_dir("/a").await.unwrap();
	master.make_dir("/a/b").await.unwrap();

	let listing = master.list_dir("/a").await.unwrap();
	assert_eq!(listing.entries.len(), 1);
	assert_eq!(listing.entries[0].name, "b");
	assert!(listing.entries[0].is_dir);
	assert_eq!(listing.entries[0].len, 0);
}

#[tokio::test]
async fn mkdir_requires_an_existing_parent() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;

	match master.make_dir("/no/such/parent").await {
		Err(DfsError::NoSuchFile { .. }) => {}
		other => panic!("expected NoSuchFile, got {:?}", other),
	}
	assert!(!master.exists("/no").await.unwrap());
}

#[tokio::test]
async fn mkdir_rejects_duplicates() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;

	master.make_dir("/a").await.unwrap();
	match master.make_dir("/a").await {
		Err(DfsError::AlreadyExists { .. }) => {}
		other => panic!("expected AlreadyExists, got {:?}", other),
	}
}

// ============================================================================
// Create / complete pipeline
// ============================================================================

#[tokio::test]
async fn create_write_complete_commits_the_file() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	let cs = with_one_chunkserver(&master).await;

	let located = master.create("/f").await.unwrap();
	assert_eq!(located.block.id, 1, "block IDs start at 1");
	assert_eq!(located.block.len, 0, "length is unknown until the ack");
	assert_eq!(located.endpoints, vec![cs.clone()]);

	// mid-creation the file is not committed yet
	assert!(!master.exists("/f").await.unwrap());

	ack(&master, located, 5).await;
	master.complete("/f").await.unwrap();

	assert!(master.exists("/f").await.unwrap());
	let resolved = master.get_block_locations("/f").await.unwrap();
	assert_eq!(resolved.blocks.len(), 1);
	assert_eq!(resolved.blocks[0].block.len, 5);
}

#[tokio::test]
async fn block_ids_increase_strictly_across_allocations() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	with_one_chunkserver(&master).await;

	let first = master.create("/f").await.unwrap();
	let second = master.add_block("/f").await.unwrap();
	let third = master.add_block("/f").await.unwrap();
	assert!(first.block.id < second.block.id);
	assert!(second.block.id < third.block.id);

	// allocations for another file keep climbing, IDs are never reused
	let other = master.create("/g").await.unwrap();
	assert!(third.block.id < other.block.id);
}

#[tokio::test]
async fn concurrent_create_of_the_same_path_is_refused() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	with_one_chunkserver(&master).await;

	let located = master.create("/g").await.unwrap();
	match master.create("/g").await {
		Err(DfsError::InCreating { .. }) => {}
		other => panic!("expected InCreating, got {:?}", other),
	}

	// the first client is unaffected by the refused second create
	ack(&master, located, 3).await;
	master.complete("/g").await.unwrap();
	assert!(master.exists("/g").await.unwrap());
}

#[tokio::test]
async fn create_rejects_committed_paths_and_missing_parents() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	with_one_chunkserver(&master).await;

	let located = master.create("/f").await.unwrap();
	ack(&master, located, 1).await;
	master.complete("/f").await.unwrap();

	match master.create("/f").await {
		Err(DfsError::AlreadyExists { .. }) => {}
		other => panic!("expected AlreadyExists, got {:?}", other),
	}
	match master.create("/missing/f").await {
		Err(DfsError::NoSuchFile { .. }) => {}
		other => panic!("expected NoSuchFile, got {:?}", other),
	}
}

#[tokio::test]
async fn create_fails_without_enough_chunkservers() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;

	// no chunkserver has ever reported in
	match master.create("/f").await {
		Err(DfsError::Exhausted { needed: 1, alive: 0 }) => {}
		other => panic!("expected Exhausted, got {:?}", other),
	}
	// the rejected create left no creating-state behind
	match master.complete("/f").await {
		Err(DfsError::NoSuchFile { .. }) => {}
		other => panic!("expected NoSuchFile, got {:?}", other),
	}
}

#[tokio::test]
async fn unacked_blocks_are_dropped_at_complete() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	with_one_chunkserver(&master).await;

	let first = master.create("/f").await.unwrap();
	let _second = master.add_block("/f").await.unwrap();
	ack(&master, first, 4).await;
	// the second block is never acked
	master.complete("/f").await.unwrap();

	let resolved = master.get_block_locations("/f").await.unwrap();
	assert_eq!(resolved.blocks.len(), 1, "only the acked block is committed");
	assert_eq!(resolved.blocks[0].block.len, 4);
}

#[tokio::test]
async fn add_block_requires_a_creating_file() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	with_one_chunkserver(&master).await;

	match master.add_block("/never-created").await {
		Err(DfsError::NoSuchFile { .. }) => {}
		other => panic!("expected NoSuchFile, got {:?}", other),
	}
}

// ============================================================================
// Remove
// ============================================================================

#[tokio::test]
async fn remove_deletes_files_but_not_directories() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	with_one_chunkserver(&master).await;

	master.make_dir("/d").await.unwrap();
	let located = master.create("/d/f").await.unwrap();
	ack(&master, located, 2).await;
	master.complete("/d/f").await.unwrap();

	master.remove("/d/f").await.unwrap();
	assert!(!master.exists("/d/f").await.unwrap());
	assert!(master.list_dir("/d").await.unwrap().entries.is_empty());

	match master.remove("/d").await {
		Err(DfsError::IsDirectory { .. }) => {}
		other => panic!("expected IsDirectory, got {:?}", other),
	}
	match master.remove("/gone").await {
		Err(DfsError::NoSuchFile { .. }) => {}
		other => panic!("expected NoSuchFile, got {:?}", other),
	}
}

#[tokio::test]
async fn removed_blocks_become_orphans_for_their_holders() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	let cs = with_one_chunkserver(&master).await;

	let located = master.create("/f").await.unwrap();
	let block_id = located.block.id;
	ack(&master, located, 2).await;
	master.complete("/f").await.unwrap();

	// holder reports the block while the file lives: nothing to delete
	let deleted = master.blk_report(cs.clone(), vec![block_id]).await.unwrap();
	assert!(deleted.is_empty());

	master.remove("/f").await.unwrap();
	let deleted = master.blk_report(cs, vec![block_id]).await.unwrap();
	assert_eq!(deleted, vec![block_id], "released blocks are reclaimed via block reports");
}

#[tokio::test]
async fn in_flight_blocks_survive_block_reports() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	let cs = with_one_chunkserver(&master).await;

	let located = master.create("/f").await.unwrap();
	let block_id = located.block.id;

	// the chain member stored the block and reports it before complete;
	// an acked block must keep being reported, so it is not an orphan
	let deleted = master.blk_report(cs.clone(), vec![block_id]).await.unwrap();
	assert!(deleted.is_empty(), "mid-write blocks must not be reclaimed");

	ack(&master, located, 5).await;
	master.complete("/f").await.unwrap();

	let deleted = master.blk_report(cs, vec![block_id]).await.unwrap();
	assert!(deleted.is_empty());
	let resolved = master.get_block_locations("/f").await.unwrap();
	assert_eq!(resolved.blocks[0].endpoints.len(), 1);
}

// ============================================================================
// getBlockLocations answers
// ============================================================================

#[tokio::test]
async fn locations_come_only_from_reports() {
	let dir = tempfile::tempdir().unwrap();
	let master = fresh_master(dir.path()).await;
	let cs = with_one_chunkserver(&master).await;

	let located = master.create("/f").await.unwrap();
	let block = Block { id: located.block.id, len: 9 };
	ack(&master, located, 9).await;
	master.complete("/f").await.unwrap();

	// the ack alone does not make a location; a report does
	let resolved = master.get_block_locations("/f").await.unwrap();
	assert!(resolved.blocks[0].endpoints.is_empty());

	master.recved_blks(cs.clone(), vec![block.id]).await.unwrap();
	let resolved = master.get_block_locations("/f").await.unwrap();
	assert_eq!(resolved.blocks[0].endpoints, vec![cs]);
}

// vim: ts=4
