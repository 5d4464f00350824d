//! Structured records carried inside control-plane frames
//!
//! These are the serde equivalents of the original wire schema: small
//! records whose field names are semantic, serialized as length-delimited
//! JSON inside the binary frame.

use serde::{Deserialize, Serialize};

/// A chunkserver's data-service endpoint. Identity is structural: two
/// endpoints are the same chunkserver iff ip and port match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
	pub ip: String,
	pub port: u16,
}

impl Endpoint {
	pub fn new(ip: impl Into<String>, port: u16) -> Self {
		Endpoint { ip: ip.into(), port }
	}
}

impl std::fmt::Display for Endpoint {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.ip, self.port)
	}
}

/// Block descriptor. `len` is authoritative only once the owning file has
/// been completed; during a write it is 0 until the client acks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	pub id: u64,
	pub len: u64,
}

/// A block descriptor plus the ordered chunkserver chain that holds (or
/// is about to receive) it. Element 0 is the head of the write chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedBlock {
	pub block: Block,
	pub endpoints: Vec<Endpoint>,
}

/// Reply of `getBlockLocations`: one located block per file block, in
/// file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatedBlocks {
	pub blocks: Vec<LocatedBlock>,
}

/// One entry of a directory listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
	pub name: String,
	pub is_dir: bool,
	pub len: u64,
}

/// Reply of `listDir`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
	pub entries: Vec<FileInfo>,
}

/// Request body of `blkReport` and `recvedBlks`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReport {
	pub endpoint: Endpoint,
	pub block_ids: Vec<u64>,
}

/// A bare list of block IDs (blocks to delete, in the blkReport reply)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIds {
	pub block_ids: Vec<u64>,
}

/// One replication order handed to a chunkserver: `op` is `COPY`, the
/// located block names the source descriptor and the destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTask {
	pub op: u8,
	pub located: LocatedBlock,
}

/// Reply of `getBlkTask`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockTasks {
	pub tasks: Vec<BlockTask>,
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashSet;

	#[test]
	fn endpoint_identity_is_structural() {
		let a = Endpoint::new("10.0.0.1", 7000);
		let b = Endpoint::new("10.0.0.1", 7000);
		let c = Endpoint::new("10.0.0.1", 7001);

		let mut set = HashSet::new();
		set.insert(a.clone());
		assert!(set.contains(&b));
		assert!(!set.contains(&c));
		assert_eq!(a, b);
		assert_ne!(b, c);
	}

	#[test]
	fn located_block_survives_serialization() {
		let lb = LocatedBlock {
			block: Block { id: 7, len: 4096 },
			endpoints: vec![Endpoint::new("127.0.0.1", 7000), Endpoint::new("127.0.0.1", 7001)],
		};
		let bytes = serde_json::to_vec(&lb).unwrap();
		let back: LocatedBlock = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(back, lb);
		// chain order matters: element 0 stays the head
		assert_eq!(back.endpoints[0].port, 7000);
	}
}

// vim: ts=4
