//! Client library: the master RPC proxy and the remote block
//! writer/reader built on top of it
//!
//! `DfsClient` is a thin caller-side implementation of the client
//! protocol - one TCP connection per call, mirroring the master's
//! one-shot dispatch. `RemoteWriter` and `RemoteReader` implement the
//! data paths: chain writes block by block, reads replica by replica.

pub mod reader;
pub mod writer;

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::error::{DfsError, Result};
use crate::logging::*;
use crate::proto::codec;
use crate::proto::messages::{Endpoint, Listing, LocatedBlock, LocatedBlocks};
use crate::proto::op::{self, Method};
use crate::proto::traits::ClientProtocol;

pub use reader::RemoteReader;
pub use writer::RemoteWriter;

/// Connect attempts against a chunkserver before a write/read fails.
const CONNECT_ATTEMPTS: u32 = 2;
/// Fixed back-off between those attempts.
const CONNECT_BACKOFF: Duration = Duration::from_millis(500);

/// Caller side of the client protocol.
#[derive(Debug, Clone)]
pub struct DfsClient {
	master_ip: String,
	master_port: u16,
}

impl DfsClient {
	pub fn new(master_ip: impl Into<String>, master_port: u16) -> Self {
		DfsClient { master_ip: master_ip.into(), master_port }
	}

	async fn call(&self, method: Method, payload: &[u8]) -> Result<(u8, Vec<u8>)> {
		codec::call(&self.master_ip, self.master_port, method as u8, payload).await
	}

	/// Path-argument call whose reply carries no payload.
	async fn simple_call(
		&self,
		method: Method,
		operation: &'static str,
		path: &str,
	) -> Result<()> {
		let (status, _) = self.call(method, path.as_bytes()).await?;
		match status {
			op::SUCCESS => Ok(()),
			code => Err(DfsError::from_status(code, operation, path)),
		}
	}

	/// Path-argument call answered by one JSON record.
	async fn record_call<T: serde::de::DeserializeOwned>(
		&self,
		method: Method,
		operation: &'static str,
		path: &str,
	) -> Result<T> {
		let (status, body) = self.call(method, path.as_bytes()).await?;
		match status {
			op::SUCCESS => Ok(serde_json::from_slice(&body)?),
			code => Err(DfsError::from_status(code, operation, path)),
		}
	}
}

#[async_trait]
impl ClientProtocol for DfsClient {
	async fn get_block_locations(&self, path: &str) -> Result<LocatedBlocks> {
		self.record_call(Method::GetBlockLocations, "getBlockLocations", path).await
	}

	async fn create(&self, path: &str) -> Result<LocatedBlock> {
		self.record_call(Method::Create, "create", path).await
	}

	async fn add_block(&self, path: &str) -> Result<LocatedBlock> {
		self.record_call(Method::AddBlock, "addBlock", path).await
	}

	async fn block_ack(&self, located: LocatedBlock) -> Result<()> {
		let payload = serde_json::to_vec(&located)?;
		let (status, _) = self.call(Method::BlockAck, &payload).await?;
		match status {
			op::SUCCESS => Ok(()),
			code => Err(DfsError::from_status(code, "blockAck", "")),
		}
	}

	async fn complete(&self, path: &str) -> Result<()> {
		self.simple_call(Method::Complete, "complete", path).await
	}

	async fn remove(&self, path: &str) -> Result<()> {
		self.simple_call(Method::Remove, "remove", path).await
	}

	async fn exists(&self, path: &str) -> Result<bool> {
		let (status, _) = self.call(Method::Exists, path.as_bytes()).await?;
		match status {
			op::EXIST => Ok(true),
			op::NOT_EXIST => Ok(false),
			code => Err(DfsError::from_status(code, "exists", path)),
		}
	}

	async fn make_dir(&self, path: &str) -> Result<()> {
		self.simple_call(Method::MakeDir, "makeDir", path).await
	}

	async fn list_dir(&self, path: &str) -> Result<Listing> {
		self.record_call(Method::ListDir, "listDir", path).await
	}
}

/// Dial a chunkserver with the client retry policy: two attempts with a
/// short fixed back-off, then give up on the write/read.
pub(crate) async fn connect_chunkserver(endpoint: &Endpoint) -> Result<TcpStream> {
	for attempt in 1..=CONNECT_ATTEMPTS {
		match TcpStream::connect((endpoint.ip.as_str(), endpoint.port)).await {
			Ok(stream) => return Ok(stream),
			Err(e) => {
				warn!(%endpoint, attempt, error = %e, "chunkserver connect failed");
				if attempt < CONNECT_ATTEMPTS {
					tokio::time::sleep(CONNECT_BACKOFF).await;
				}
			}
		}
	}
	Err(DfsError::ConnectFailed {
		endpoint: endpoint.to_string(),
		attempts: CONNECT_ATTEMPTS,
	})
}

// vim: ts=4
