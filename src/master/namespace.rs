//! In-memory namespace store: name maps, directory entries, inodes and
//! block descriptors
//!
//! Pure data structure, no I/O and no locking; the master wraps it in a
//! mutex and the durability layer snapshots it. Cross-references between
//! tables are IDs, never pointers, so deletion is O(1) removal from each
//! map.
//!
//! Validation happens before mutation: every public operation checks its
//! preconditions first and leaves the store untouched on rejection. The
//! `apply_*` methods trust their caller (the master validates under its
//! namespace lock; edit-log replay trusts the log) but still verify
//! parent existence so a corrupt log cannot wreck the tables silently.

use std::collections::HashMap;

use crate::error::{DfsError, Result};
use crate::proto::messages::{Block, FileInfo, Listing};
use crate::util;

/// The root directory is pinned to DfID 0 and name "/".
pub const ROOT_DFID: u64 = 0;

#[derive(Debug)]
pub struct Namespace {
	/// name -> DfID; full paths only ("/data/f", never "f")
	ids: HashMap<String, u64>,
	/// DfID -> name; inverse of `ids`, kept in sync
	names: HashMap<u64, String>,
	/// directory DfID -> children DfIDs; defined exactly for directories
	dentries: HashMap<u64, Vec<u64>>,
	/// file DfID -> ordered block IDs; defined exactly for files
	inodes: HashMap<u64, Vec<u64>>,
	/// block ID -> descriptor
	blocks: HashMap<u64, Block>,
}

impl Default for Namespace {
	fn default() -> Self {
		Self::new()
	}
}

impl Namespace {
	/// An empty namespace holding only the root directory.
	pub fn new() -> Self {
		let mut ns = Namespace {
			ids: HashMap::new(),
			names: HashMap::new(),
			dentries: HashMap::new(),
			inodes: HashMap::new(),
			blocks: HashMap::new(),
		};
		ns.reset();
		ns
	}

	/// Drop everything except the root directory.
	pub fn reset(&mut self) {
		self.ids.clear();
		self.names.clear();
		self.dentries.clear();
		self.inodes.clear();
		self.blocks.clear();
		self.ids.insert("/".to_string(), ROOT_DFID);
		self.names.insert(ROOT_DFID, "/".to_string());
		self.dentries.insert(ROOT_DFID, Vec::new());
	}

	pub(crate) fn from_parts(
		ids: HashMap<String, u64>,
		names: HashMap<u64, String>,
		dentries: HashMap<u64, Vec<u64>>,
		inodes: HashMap<u64, Vec<u64>>,
		blocks: HashMap<u64, Block>,
	) -> Self {
		Namespace { ids, names, dentries, inodes, blocks }
	}

	// === Lookup ===

	pub fn dfid(&self, path: &str) -> Option<u64> {
		self.ids.get(path).copied()
	}

	pub fn name(&self, dfid: u64) -> Option<&str> {
		self.names.get(&dfid).map(String::as_str)
	}

	pub fn contains(&self, path: &str) -> bool {
		self.ids.contains_key(path)
	}

	pub fn is_dir(&self, dfid: u64) -> bool {
		self.dentries.contains_key(&dfid)
	}

	pub fn children(&self, dfid: u64) -> Option<&[u64]> {
		self.dentries.get(&dfid).map(Vec::as_slice)
	}

	pub fn blocks_of(&self, dfid: u64) -> Option<&[u64]> {
		self.inodes.get(&dfid).map(Vec::as_slice)
	}

	pub fn block(&self, block_id: u64) -> Option<Block> {
		self.blocks.get(&block_id).copied()
	}

	pub fn has_block(&self, block_id: u64) -> bool {
		self.blocks.contains_key(&block_id)
	}

	/// Every block ID any inode references.
	pub fn block_ids(&self) -> Vec<u64> {
		self.blocks.keys().copied().collect()
	}

	/// All (name, DfID) pairs, root included. Iteration order is unspecified.
	pub fn entries(&self) -> impl Iterator<Item = (&str, u64)> {
		self.ids.iter().map(|(name, id)| (name.as_str(), *id))
	}

	/// Resolve the parent directory of `path`, rejecting orphans.
	fn parent_dir(&self, path: &str) -> Result<u64> {
		let parent = util::split_path(path);
		match self.ids.get(&parent) {
			Some(&dfid) if self.is_dir(dfid) => Ok(dfid),
			_ => Err(DfsError::NoSuchFile { path: parent }),
		}
	}

	/// Summed block lengths of a file, 0 for directories.
	pub fn file_len(&self, dfid: u64) -> u64 {
		let Some(block_ids) = self.inodes.get(&dfid) else {
			return 0;
		};
		block_ids.iter().filter_map(|b| self.blocks.get(b)).map(|b| b.len).sum()
	}

	// === Queries ===

	/// Ordered block descriptors of a committed file.
	pub fn file_blocks(&self, path: &str) -> Result<Vec<Block>> {
		let dfid = self
			.dfid(path)
			.ok_or_else(|| DfsError::NoSuchFile { path: path.to_string() })?;
		let block_ids = self
			.inodes
			.get(&dfid)
			.ok_or_else(|| DfsError::NoSuchFile { path: path.to_string() })?;
		Ok(block_ids.iter().filter_map(|b| self.blocks.get(b)).copied().collect())
	}

	/// Listing of a directory: basename, kind and summed length per child.
	pub fn list_dir(&self, path: &str) -> Result<Listing> {
		let dfid = self
			.dfid(path)
			.ok_or_else(|| DfsError::NoSuchFile { path: path.to_string() })?;
		let children = self
			.dentries
			.get(&dfid)
			.ok_or_else(|| DfsError::NoSuchFile { path: path.to_string() })?;

		let mut entries = Vec::with_capacity(children.len());
		for &child in children {
			let Some(name) = self.names.get(&child) else { continue };
			entries.push(FileInfo {
				name: util::basename(name).to_string(),
				is_dir: self.is_dir(child),
				len: self.file_len(child),
			});
		}
		Ok(Listing { entries })
	}

	// === Validation (no mutation) ===

	/// Preconditions of `mkdir` and of the create->complete pipeline:
	/// the path is absent and its parent directory exists.
	pub fn check_new_entry(&self, path: &str) -> Result<u64> {
		if self.contains(path) {
			return Err(DfsError::AlreadyExists { path: path.to_string() });
		}
		self.parent_dir(path)
	}

	// === Mutation ===

	/// Insert a directory under an already-validated path.
	pub fn apply_mkdir(&mut self, path: &str, dfid: u64) -> Result<()> {
		let parent = self.parent_dir(path)?;
		self.ids.insert(path.to_string(), dfid);
		self.names.insert(dfid, path.to_string());
		self.dentries.entry(parent).or_default().push(dfid);
		self.dentries.insert(dfid, Vec::new());
		Ok(())
	}

	/// Insert a committed file with its block descriptors.
	pub fn apply_create(&mut self, path: &str, dfid: u64, blocks: &[Block]) -> Result<()> {
		let parent = self.parent_dir(path)?;
		self.ids.insert(path.to_string(), dfid);
		self.names.insert(dfid, path.to_string());
		self.dentries.entry(parent).or_default().push(dfid);
		let mut block_ids = Vec::with_capacity(blocks.len());
		for block in blocks {
			block_ids.push(block.id);
			self.blocks.insert(block.id, *block);
		}
		self.inodes.insert(dfid, block_ids);
		Ok(())
	}

	/// Remove a file, returning the block IDs it released. Directories
	/// are refused; recursive delete does not exist.
	pub fn apply_remove(&mut self, path: &str) -> Result<Vec<u64>> {
		let dfid = self
			.dfid(path)
			.ok_or_else(|| DfsError::NoSuchFile { path: path.to_string() })?;
		if self.is_dir(dfid) {
			return Err(DfsError::IsDirectory { path: path.to_string() });
		}
		let parent = self.parent_dir(path)?;

		self.ids.remove(path);
		self.names.remove(&dfid);
		if let Some(children) = self.dentries.get_mut(&parent) {
			children.retain(|&c| c != dfid);
		}

		let released = self.inodes.remove(&dfid).unwrap_or_default();
		for block_id in &released {
			self.blocks.remove(block_id);
		}
		Ok(released)
	}

	/// Structural integrity check backing the test suite: the name maps
	/// are mutual inverses, every dentry child resolves to
	/// `parent + "/" + basename`, and block references have no orphans
	/// in either direction.
	pub fn verify_invariants(&self) -> std::result::Result<(), String> {
		if self.ids.get("/") != Some(&ROOT_DFID) || self.names.get(&ROOT_DFID).map(String::as_str) != Some("/") {
			return Err("root is not pinned to DfID 0".to_string());
		}
		for (name, &dfid) in &self.ids {
			if self.names.get(&dfid) != Some(name) {
				return Err(format!("name maps disagree on {} <-> {}", name, dfid));
			}
		}
		for (&dfid, name) in &self.names {
			if self.ids.get(name) != Some(&dfid) {
				return Err(format!("name maps disagree on {} <-> {}", dfid, name));
			}
		}
		for (&dir, children) in &self.dentries {
			let dir_name = self.names.get(&dir).ok_or(format!("dentry for unnamed {}", dir))?;
			for child in children {
				let child_name =
					self.names.get(child).ok_or(format!("child {} has no name", child))?;
				let expected = if dir_name == "/" {
					format!("/{}", util::basename(child_name))
				} else {
					format!("{}/{}", dir_name, util::basename(child_name))
				};
				if child_name != &expected {
					return Err(format!("child {} of {} is named {}", child, dir_name, child_name));
				}
				if children.iter().filter(|&&c| c == *child).count() != 1 {
					return Err(format!("child {} listed more than once in {}", child, dir_name));
				}
			}
		}
		for (dfid, block_ids) in &self.inodes {
			for block_id in block_ids {
				if !self.blocks.contains_key(block_id) {
					return Err(format!("inode {} references unknown block {}", dfid, block_id));
				}
			}
		}
		for block_id in self.blocks.keys() {
			let referenced = self.inodes.values().any(|v| v.contains(block_id));
			if !referenced {
				return Err(format!("block {} is owned by no inode", block_id));
			}
		}
		Ok(())
	}
}


// vim: ts=4
