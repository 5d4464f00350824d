//! Durability layer: fsimage snapshots and the append-only edit log
//!
//! Two artefacts live on the master's disk:
//!
//! * **fsimage** - one structured record holding the counters plus an
//!   INODE and a DENTRY section. Written atomically (temp file, fsync,
//!   rename) by `format` and `checkpoint`, read once at boot.
//! * **editlog** - append-only records framed as
//!   `magic:u32 (little-endian) | length:varint | payload`, one record
//!   per committed namespace mutation since the last checkpoint.
//!
//! The payloads are serde_json; the framing keeps replay self-delimiting
//! without trusting the payload encoding.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use super::namespace::Namespace;
use crate::error::{DfsError, Result};
use crate::proto::messages::Block;

/// Fixed constant opening every edit-log record ("MDFS").
pub const EDIT_MAGIC: u32 = 0x4D44_4653;

/// One committed namespace mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum EditRecord {
	/// A file was completed with these block descriptors
	Create { path: String, dfid: u64, blocks: Vec<Block> },
	/// A directory was created
	Mkdir { path: String, dfid: u64 },
	/// A file was removed; released block IDs are recomputed on replay
	Remove { path: String, parent: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InodeRecord {
	pub name: String,
	pub id: u64,
	pub is_dir: bool,
	#[serde(default)]
	pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DentryRecord {
	pub id: u64,
	pub children: Vec<u64>,
}

/// Whole-namespace snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsImage {
	pub next_dfid: u64,
	pub next_blkid: u64,
	pub inodes: Vec<InodeRecord>,
	pub dentries: Vec<DentryRecord>,
}

/// Capture the namespace (plus counter high-water marks) as an image.
/// Sections are sorted by ID so identical states serialize identically.
pub fn capture(ns: &Namespace, next_dfid: u64, next_blkid: u64) -> FsImage {
	let mut inodes = Vec::new();
	let mut dentries = Vec::new();
	for (name, dfid) in ns.entries() {
		if ns.is_dir(dfid) {
			inodes.push(InodeRecord {
				name: name.to_string(),
				id: dfid,
				is_dir: true,
				blocks: Vec::new(),
			});
			dentries.push(DentryRecord {
				id: dfid,
				children: ns.children(dfid).unwrap_or_default().to_vec(),
			});
		} else {
			let blocks = ns
				.blocks_of(dfid)
				.unwrap_or_default()
				.iter()
				.filter_map(|&b| ns.block(b))
				.collect();
			inodes.push(InodeRecord { name: name.to_string(), id: dfid, is_dir: false, blocks });
		}
	}
	inodes.sort_by_key(|i| i.id);
	dentries.sort_by_key(|d| d.id);
	FsImage { next_dfid, next_blkid, inodes, dentries }
}

/// Rebuild a namespace from an image. Returns the store plus the
/// persisted counter values.
pub fn restore(image: &FsImage) -> (Namespace, u64, u64) {
	let mut ids = HashMap::new();
	let mut names = HashMap::new();
	let mut dentries: HashMap<u64, Vec<u64>> = HashMap::new();
	let mut inodes = HashMap::new();
	let mut blocks = HashMap::new();

	for inode in &image.inodes {
		ids.insert(inode.name.clone(), inode.id);
		names.insert(inode.id, inode.name.clone());
		if inode.is_dir {
			dentries.entry(inode.id).or_default();
		} else {
			let mut block_ids = Vec::with_capacity(inode.blocks.len());
			for block in &inode.blocks {
				block_ids.push(block.id);
				blocks.insert(block.id, *block);
			}
			inodes.insert(inode.id, block_ids);
		}
	}
	for dentry in &image.dentries {
		dentries.insert(dentry.id, dentry.children.clone());
	}

	let ns = Namespace::from_parts(ids, names, dentries, inodes, blocks);
	(ns, image.next_dfid, image.next_blkid)
}

/// Owner of the two on-disk artefacts. The master serializes access
/// through its image lock; the store itself carries only the paths.
#[derive(Debug)]
pub struct ImageStore {
	image_path: PathBuf,
	edit_path: PathBuf,
}

impl ImageStore {
	pub fn new(image_path: impl Into<PathBuf>, edit_path: impl Into<PathBuf>) -> Self {
		ImageStore { image_path: image_path.into(), edit_path: edit_path.into() }
	}

	pub fn image_path(&self) -> &Path {
		&self.image_path
	}

	/// Dump an image: write to a sibling temp file, fsync, rename over
	/// the final path so a crash never leaves a torn image.
	pub async fn write_image(&self, image: &FsImage) -> Result<()> {
		let tmp = self.image_path.with_extension("tmp");
		let bytes = serde_json::to_vec(image)?;

		let mut file = tokio::fs::File::create(&tmp).await?;
		file.write_all(&bytes).await?;
		file.sync_all().await?;
		drop(file);
		tokio::fs::rename(&tmp, &self.image_path).await?;
		Ok(())
	}

	pub async fn read_image(&self) -> Result<FsImage> {
		let bytes = tokio::fs::read(&self.image_path).await?;
		Ok(serde_json::from_slice(&bytes)?)
	}

	/// Truncate the edit log to empty (checkpoint and format).
	pub async fn reset_edits(&self) -> Result<()> {
		tokio::fs::File::create(&self.edit_path).await?;
		Ok(())
	}

	/// Append one framed record and fsync it. A failure here surfaces
	/// as `LogFailure` so the caller can refuse the whole mutation.
	pub async fn append_edit(&self, record: &EditRecord) -> Result<()> {
		let payload = serde_json::to_vec(record)?;
		let mut frame = Vec::with_capacity(payload.len() + 9);
		frame.extend_from_slice(&EDIT_MAGIC.to_le_bytes());
		encode_varint(payload.len() as u64, &mut frame);
		frame.extend_from_slice(&payload);

		let append = async {
			let mut file = tokio::fs::OpenOptions::new()
				.append(true)
				.create(true)
				.open(&self.edit_path)
				.await?;
			file.write_all(&frame).await?;
			file.sync_all().await?;
			Ok::<(), std::io::Error>(())
		};
		append.await.map_err(DfsError::LogFailure)
	}

	/// Read the whole edit log back as records, validating each frame.
	pub async fn replay_edits(&self) -> Result<Vec<EditRecord>> {
		let bytes = match tokio::fs::read(&self.edit_path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(e.into()),
		};

		let mut records = Vec::new();
		let mut pos = 0usize;
		while pos < bytes.len() {
			if pos + 4 > bytes.len() {
				return Err(DfsError::Protocol {
					message: "edit log ends mid-magic".to_string(),
				});
			}
			let magic =
				u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]);
			if magic != EDIT_MAGIC {
				return Err(DfsError::Protocol {
					message: format!("bad edit log magic {:#x} at offset {}", magic, pos),
				});
			}
			pos += 4;
			let len = decode_varint(&bytes, &mut pos).ok_or_else(|| DfsError::Protocol {
				message: "edit log ends mid-length".to_string(),
			})? as usize;
			if pos + len > bytes.len() {
				return Err(DfsError::Protocol {
					message: "edit log ends mid-record".to_string(),
				});
			}
			records.push(serde_json::from_slice(&bytes[pos..pos + len])?);
			pos += len;
		}
		Ok(records)
	}
}

fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
	loop {
		let byte = (value & 0x7f) as u8;
		value >>= 7;
		if value == 0 {
			out.push(byte);
			return;
		}
		out.push(byte | 0x80);
	}
}

fn decode_varint(bytes: &[u8], pos: &mut usize) -> Option<u64> {
	let mut value = 0u64;
	let mut shift = 0u32;
	loop {
		let byte = *bytes.get(*pos)?;
		*pos += 1;
		value |= u64::from(byte & 0x7f) << shift;
		if byte & 0x80 == 0 {
			return Some(value);
		}
		shift += 7;
		if shift >= 64 {
			return None;
		}
	}
}


// vim: ts=4
