//! Local block store of a chunkserver
//!
//! One file per block, named `blk_<decimal id>`, payload is the raw
//! block bytes and the length is the file size. Incoming blocks land in
//! a staging file first and are renamed into place only after the full
//! payload is on disk and fsynced, so the inventory scan never sees a
//! half-written block.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io;

/// Suffix of staging files; never parses as a block name.
const STAGING_SUFFIX: &str = ".MiNiDfS-TmP";

#[derive(Debug, Clone)]
pub struct BlockStore {
	data_dir: PathBuf,
}

impl BlockStore {
	pub fn new(data_dir: impl Into<PathBuf>) -> Self {
		BlockStore { data_dir: data_dir.into() }
	}

	pub fn data_dir(&self) -> &Path {
		&self.data_dir
	}

	/// Final on-disk location of a block.
	pub fn block_path(&self, block_id: u64) -> PathBuf {
		self.data_dir.join(format!("blk_{}", block_id))
	}

	fn staging_path(&self, block_id: u64) -> PathBuf {
		self.data_dir.join(format!("blk_{}{}", block_id, STAGING_SUFFIX))
	}

	/// Parse a block ID out of a stored filename. Only exact
	/// `blk_<decimal>` names count; anything else is not a block.
	pub fn parse_block_name(name: &str) -> Option<u64> {
		let digits = name.strip_prefix("blk_")?;
		if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
			return None;
		}
		digits.parse().ok()
	}

	/// Enumerate the data directory and collect the IDs of every stored
	/// block. Run once at startup to seed the served set.
	pub async fn scan(&self) -> io::Result<HashSet<u64>> {
		let mut served = HashSet::new();
		let mut entries = fs::read_dir(&self.data_dir).await?;
		while let Some(entry) = entries.next_entry().await? {
			if !entry.file_type().await?.is_file() {
				continue;
			}
			let name = entry.file_name();
			let Some(name) = name.to_str() else { continue };
			if let Some(block_id) = Self::parse_block_name(name) {
				served.insert(block_id);
			}
		}
		Ok(served)
	}

	/// Open a fresh staging file for an incoming block.
	pub async fn create_staging(&self, block_id: u64) -> io::Result<(File, PathBuf)> {
		let path = self.staging_path(block_id);
		let file = File::create(&path).await?;
		Ok((file, path))
	}

	/// Fsync a fully written staging file and rename it into place.
	pub async fn finalize(&self, file: File, staging: &Path, block_id: u64) -> io::Result<()> {
		file.sync_all().await?;
		drop(file);
		fs::rename(staging, self.block_path(block_id)).await
	}

	/// Drop a staging file after a failed transfer.
	pub async fn discard_staging(&self, staging: &Path) {
		let _ = fs::remove_file(staging).await;
	}

	/// Open a stored block for reading, returning its length.
	pub async fn open_block(&self, block_id: u64) -> io::Result<(File, u64)> {
		let file = File::open(self.block_path(block_id)).await?;
		let len = file.metadata().await?.len();
		Ok((file, len))
	}

	/// Delete a stored block (master declared it an orphan).
	pub async fn remove_block(&self, block_id: u64) -> io::Result<()> {
		fs::remove_file(self.block_path(block_id)).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn block_names_parse_strictly() {
		assert_eq!(BlockStore::parse_block_name("blk_1"), Some(1));
		assert_eq!(BlockStore::parse_block_name("blk_42017"), Some(42017));
		assert_eq!(BlockStore::parse_block_name("blk_"), None);
		assert_eq!(BlockStore::parse_block_name("blk_12x"), None);
		assert_eq!(BlockStore::parse_block_name("block_1"), None);
		assert_eq!(BlockStore::parse_block_name("blk_1.MiNiDfS-TmP"), None);
	}

	#[tokio::test]
	async fn scan_sees_only_finalized_blocks() {
		let dir = tempfile::tempdir().unwrap();
		let store = BlockStore::new(dir.path());

		fs::write(store.block_path(1), b"one").await.unwrap();
		fs::write(store.block_path(7), b"seven").await.unwrap();
		fs::write(dir.path().join("blk_9.MiNiDfS-TmP"), b"staging").await.unwrap();
		fs::write(dir.path().join("notes.txt"), b"noise").await.unwrap();

		let served = store.scan().await.unwrap();
		assert_eq!(served, HashSet::from([1, 7]));
	}

	#[tokio::test]
	async fn staged_blocks_appear_after_finalize() {
		let dir = tempfile::tempdir().unwrap();
		let store = BlockStore::new(dir.path());

		use tokio::io::AsyncWriteExt;
		let (mut file, staging) = store.create_staging(3).await.unwrap();
		file.write_all(b"payload").await.unwrap();

		assert!(store.scan().await.unwrap().is_empty());
		store.finalize(file, &staging, 3).await.unwrap();

		assert_eq!(store.scan().await.unwrap(), HashSet::from([3]));
		let (_, len) = store.open_block(3).await.unwrap();
		assert_eq!(len, 7);
	}

	#[tokio::test]
	async fn removed_blocks_disappear() {
		let dir = tempfile::tempdir().unwrap();
		let store = BlockStore::new(dir.path());
		fs::write(store.block_path(5), b"x").await.unwrap();

		store.remove_block(5).await.unwrap();
		assert!(store.scan().await.unwrap().is_empty());
		assert!(store.open_block(5).await.is_err());
	}
}

// vim: ts=4
