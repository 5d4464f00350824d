//! Remote file writer: buffers one block at a time and drives the
//! create / addBlock / chain-write / blockAck / complete sequence
//!
//! Each full block goes to the head of its allocated chain in one
//! connection. The head's one-byte reply says how many replicas the
//! chain actually wrote; the ack sent to the master carries the chain
//! truncated to that prefix, so the master knows the real replica set
//! and can queue repair for the rest.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{connect_chunkserver, DfsClient};
use crate::error::{DfsError, Result};
use crate::logging::*;
use crate::proto::codec;
use crate::proto::messages::LocatedBlock;
use crate::proto::op;
use crate::proto::traits::ClientProtocol;

pub struct RemoteWriter {
	client: DfsClient,
	path: String,
	block_size: usize,
	/// bytes of the block being assembled
	buf: Vec<u8>,
	/// chain allocated for the next flush
	current: LocatedBlock,
}

impl RemoteWriter {
	/// Open `path` for writing. The master allocates the first block and
	/// puts the path into its creating table.
	pub async fn create(client: DfsClient, path: &str, block_size: u64) -> Result<Self> {
		let current = client.create(path).await?;
		info!(path, block_id = current.block.id, "file opened for writing");
		Ok(RemoteWriter {
			client,
			path: path.to_string(),
			block_size: block_size as usize,
			buf: Vec::new(),
			current,
		})
	}

	/// Append bytes, flushing a block whenever one fills up.
	pub async fn write(&mut self, mut data: &[u8]) -> Result<()> {
		while !data.is_empty() {
			if self.buf.len() == self.block_size {
				self.flush_block().await?;
			}
			let room = self.block_size - self.buf.len();
			let take = room.min(data.len());
			self.buf.extend_from_slice(&data[..take]);
			data = &data[take..];
		}
		Ok(())
	}

	/// Flush the remaining partial block and commit the file.
	pub async fn close(mut self) -> Result<()> {
		if !self.buf.is_empty() {
			self.send_current_block().await?;
		}
		self.client.complete(&self.path).await?;
		info!(path = %self.path, "file completed");
		Ok(())
	}

	/// Ship the buffered block and ask the master for the next one.
	async fn flush_block(&mut self) -> Result<()> {
		self.send_current_block().await?;
		self.current = self.client.add_block(&self.path).await?;
		Ok(())
	}

	async fn send_current_block(&mut self) -> Result<()> {
		let payload = std::mem::take(&mut self.buf);
		let mut located = self.current.clone();
		located.block.len = payload.len() as u64;

		let succeeded = write_block_chain(&located, &payload).await?;
		if succeeded == 0 {
			return Err(DfsError::Status { operation: "chain write", code: op::FAILURE });
		}
		let acked_chain = located.endpoints[..succeeded.min(located.endpoints.len())].to_vec();
		debug!(
			block_id = located.block.id,
			replicas = acked_chain.len(),
			"block written, acking chain prefix"
		);
		self.client
			.block_ack(LocatedBlock { block: located.block, endpoints: acked_chain })
			.await
	}
}

/// Send one block payload down its chain. Returns the number of
/// replicas the chain reports as successfully written.
async fn write_block_chain(located: &LocatedBlock, payload: &[u8]) -> Result<usize> {
	let head = located.endpoints.first().ok_or_else(|| DfsError::Protocol {
		message: "located block carries an empty chain".to_string(),
	})?;

	let mut stream = connect_chunkserver(head).await?;
	stream.write_u8(op::OP_WRITE).await?;
	codec::write_record16(&mut stream, located).await?;
	codec::write_data_len(&mut stream, payload.len() as u64).await?;
	stream.write_all(payload).await?;
	stream.flush().await?;

	let count = stream.read_u8().await?;
	Ok(count as usize)
}

// vim: ts=4
