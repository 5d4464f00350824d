//! Remote file reader: resolves a file into located blocks and streams
//! them back, trying replicas in order

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{connect_chunkserver, DfsClient};
use crate::error::{DfsError, Result};
use crate::logging::*;
use crate::proto::codec;
use crate::proto::messages::{Block, Endpoint, LocatedBlocks};
use crate::proto::op;
use crate::proto::traits::ClientProtocol;

pub struct RemoteReader {
	located: LocatedBlocks,
}

impl RemoteReader {
	/// Resolve `path` into its located blocks.
	pub async fn open(client: &DfsClient, path: &str) -> Result<Self> {
		let located = client.get_block_locations(path).await?;
		Ok(RemoteReader { located })
	}

	/// Committed length of the file.
	pub fn file_len(&self) -> u64 {
		self.located.blocks.iter().map(|lb| lb.block.len).sum()
	}

	/// Read the whole file into memory, block by block.
	pub async fn read_to_vec(&self) -> Result<Vec<u8>> {
		let mut out = Vec::with_capacity(self.file_len() as usize);
		for lb in &self.located.blocks {
			let data = read_block(&lb.block, &lb.endpoints).await?;
			out.extend_from_slice(&data);
		}
		Ok(out)
	}
}

/// Fetch one block, trying each replica in chain order until one serves.
async fn read_block(block: &Block, endpoints: &[Endpoint]) -> Result<Vec<u8>> {
	for endpoint in endpoints {
		match read_block_from(block, endpoint).await {
			Ok(data) => return Ok(data),
			Err(e) => {
				warn!(block_id = block.id, %endpoint, error = %e, "replica read failed");
			}
		}
	}
	Err(DfsError::Protocol {
		message: format!("no replica of block {} could be read", block.id),
	})
}

async fn read_block_from(block: &Block, endpoint: &Endpoint) -> Result<Vec<u8>> {
	let mut stream = connect_chunkserver(endpoint).await?;
	stream.write_u8(op::OP_READ).await?;
	codec::write_record16(&mut stream, block).await?;

	let status = stream.read_u8().await?;
	if status != op::SUCCESS {
		return Err(DfsError::Status { operation: "read block", code: status });
	}
	let len = codec::read_data_len(&mut stream).await?;
	let mut data = vec![0u8; len as usize];
	stream.read_exact(&mut data).await?;
	Ok(data)
}

// vim: ts=4
