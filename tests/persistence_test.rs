//! Durability tests: fsimage round trips, edit-log replay and the
//! counter high-water marks that keep restarted masters collision-free.

use std::path::Path;

use minidfs::config::Config;
use minidfs::master::DfsMaster;
use minidfs::proto::messages::{Endpoint, LocatedBlock};
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

fn endpoint() -> Endpoint {
	Endpoint::new("127.0.0.1", 7000)
}

async fn formatted_master(dir: &Path) -> DfsMaster {
	let master = DfsMaster::new_with_seed(&test_config(dir), 7);
	master.format().await.unwrap();
	master.heart_beat(endpoint()).await.unwrap();
	master
}

async fn rebooted_master(dir: &Path) -> DfsMaster {
	let master = DfsMaster::new_with_seed(&test_config(dir), 7);
	master.boot().await.unwrap();
	master
}

/// Write a whole file through the creating pipeline: one block of the
/// given length, fully acked, then completed.
async fn commit_file(master: &DfsMaster, path: &str, len: u64) -> u64 {
	let mut located = master.create(path).await.unwrap();
	located.block.len = len;
	let block_id = located.block.id;
	master.block_ack(located).await.unwrap();
	master.complete(path).await.unwrap();
	block_id
}

// ============================================================================
// fsimage round trip
// ============================================================================

#[tokio::test]
async fn checkpoint_and_reboot_reproduce_the_namespace() {
	let dir = tempfile::tempdir().unwrap();
	{
		let master = formatted_master(dir.path()).await;
		master.make_dir("/a").await.unwrap();
		master.make_dir("/a/b").await.unwrap();
		commit_file(&master, "/a/f", 42).await;
		master.checkpoint().await.unwrap();
	}

	let master = rebooted_master(dir.path()).await;
	assert!(master.exists("/a").await.unwrap());
	assert!(master.exists("/a/b").await.unwrap());
	assert!(master.exists("/a/f").await.unwrap());

	let listing = master.list_dir("/a").await.unwrap();
	assert_eq!(listing.entries.len(), 2);
	let file = listing.entries.iter().find(|e| e.name == "f").unwrap();
	assert!(!file.is_dir);
	assert_eq!(file.len, 42, "block lengths survive the image round trip");
}

#[tokio::test]
async fn reboot_enters_safe_mode_until_blocks_are_located() {
	let dir = tempfile::tempdir().unwrap();
	{
		let master = formatted_master(dir.path()).await;
		commit_file(&master, "/f", 5).await;
		master.checkpoint().await.unwrap();
	}

	let master = rebooted_master(dir.path()).await;
	assert!(master.in_safe_mode());
	assert!(!master.is_safe().await, "no location reported for the committed block yet");

	// a block report for the only block makes the cluster safe
	master.blk_report(endpoint(), vec![1]).await.unwrap();
	assert!(master.is_safe().await);
	master.leave_safe_mode_if_ready().await;
	assert!(!master.in_safe_mode());
}

// ============================================================================
// Edit-log replay
// ============================================================================

#[tokio::test]
async fn edits_since_the_last_image_replay_on_boot() {
	let dir = tempfile::tempdir().unwrap();
	{
		// no checkpoint after format: everything lives in the edit log
		let master = formatted_master(dir.path()).await;
		master.make_dir("/a").await.unwrap();

		let first = master.create("/a/x").await.unwrap();
		let second = master.add_block("/a/x").await.unwrap();
		for (located, len) in [(first, 10u64), (second, 3u64)] {
			let acked = LocatedBlock {
				block: minidfs::Block { id: located.block.id, len },
				endpoints: located.endpoints,
			};
			master.block_ack(acked).await.unwrap();
		}
		master.complete("/a/x").await.unwrap();
		master.remove("/a/x").await.unwrap();
	}

	let master = rebooted_master(dir.path()).await;
	assert!(!master.exists("/a/x").await.unwrap());
	assert!(master.exists("/a").await.unwrap());
	assert!(master.list_dir("/a").await.unwrap().entries.is_empty());
}

#[tokio::test]
async fn replay_after_checkpoint_matches_replay_from_scratch() {
	// state A: ops, checkpoint, more ops, restart
	let dir_a = tempfile::tempdir().unwrap();
	{
		let master = formatted_master(dir_a.path()).await;
		master.make_dir("/a").await.unwrap();
		commit_file(&master, "/a/one", 11).await;
		master.checkpoint().await.unwrap();
		commit_file(&master, "/a/two", 22).await;
		master.remove("/a/one").await.unwrap();
	}
	let master_a = rebooted_master(dir_a.path()).await;

	// state B: the same operation sequence, no checkpoint, restart
	let dir_b = tempfile::tempdir().unwrap();
	{
		let master = formatted_master(dir_b.path()).await;
		master.make_dir("/a").await.unwrap();
		commit_file(&master, "/a/one", 11).await;
		commit_file(&master, "/a/two", 22).await;
		master.remove("/a/one").await.unwrap();
	}
	let master_b = rebooted_master(dir_b.path()).await;

	for master in [&master_a, &master_b] {
		assert!(!master.exists("/a/one").await.unwrap());
		assert!(master.exists("/a/two").await.unwrap());
		let listing = master.list_dir("/a").await.unwrap();
		assert_eq!(listing.entries.len(), 1);
		assert_eq!(listing.entries[0].name, "two");
		assert_eq!(listing.entries[0].len, 22);
	}
}

#[tokio::test]
async fn replayed_counters_never_collide_with_old_ids() {
	let dir = tempfile::tempdir().unwrap();
	let old_block = {
		let master = formatted_master(dir.path()).await;
		master.make_dir("/a").await.unwrap();
		commit_file(&master, "/a/f", 8).await
	};

	let master = rebooted_master(dir.path()).await;
	master.heart_beat(endpoint()).await.unwrap();

	let located = master.create("/a/g").await.unwrap();
	assert!(
		located.block.id > old_block,
		"fresh allocation {} must exceed replayed high-water mark {}",
		located.block.id,
		old_block
	);
}

#[tokio::test]
async fn boot_without_an_image_fails() {
	let dir = tempfile::tempdir().unwrap();
	let master = DfsMaster::new_with_seed(&test_config(dir.path()), 7);
	assert!(master.boot().await.is_err(), "an unformatted master must refuse to boot");
}

// vim: ts=4
