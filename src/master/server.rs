//! TCP front end of the master: accept loop, method-ID dispatch and the
//! safe-mode gate
//!
//! One connection carries exactly one request and one response. The
//! handler reads the frame, routes by method ID over the two protocol
//! traits, writes the response and hangs up. An unknown method ID
//! terminates the connection without a response.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use super::DfsMaster;
use crate::error::{DfsError, Result};
use crate::logging::*;
use crate::proto::codec;
use crate::proto::messages::{BlockIds, BlockReport, Endpoint, LocatedBlock};
use crate::proto::op::{self, Method};
use crate::proto::traits::{ChunkserverProtocol, ClientProtocol};

impl DfsMaster {
	/// Serve RPCs on `listener` forever. Spawns the status-checker task
	/// and bounds concurrent request handlers by `nThread`.
	pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
		let checker = {
			let master = Arc::clone(&self);
			tokio::spawn(async move {
				loop {
					tokio::time::sleep(Duration::from_millis(super::STATUS_CHECK_INTERVAL)).await;
					master.run_status_check().await;
				}
			})
		};

		info!(addr = %listener.local_addr()?, "master listening");
		// two-tier admission, mirroring the original's listen backlog and
		// worker pool: `maxConnections` bounds accepted-but-unserved
		// connections, `nThread` bounds the handlers actually running
		let handlers = Arc::new(Semaphore::new(self.n_thread));
		let backlog = Arc::new(Semaphore::new(self.max_connections));
		loop {
			let (stream, peer) = match listener.accept().await {
				Ok(conn) => conn,
				Err(e) => {
					error!(error = %e, "accept failed");
					continue;
				}
			};
			let accepted = match Arc::clone(&backlog).acquire_owned().await {
				Ok(permit) => permit,
				Err(_) => break,
			};
			let workers = Arc::clone(&handlers);
			let master = Arc::clone(&self);
			tokio::spawn(async move {
				let _accepted = accepted;
				let Ok(_running) = workers.acquire_owned().await else { return };
				if let Err(e) = master.handle_connection(stream).await {
					debug!(%peer, error = %e, "request handling failed");
				}
			});
		}
		checker.abort();
		Ok(())
	}

	/// Serve one connection: exactly one request, one response, close.
	pub(crate) async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
		let (method_id, payload) = codec::read_request(&mut stream).await?;
		let method = Method::try_from(method_id).map_err(|id| DfsError::Protocol {
			message: format!("unknown method id {}", id),
		})?;

		if self.in_safe_mode() && method.is_client_facing() {
			// safe mode is polled lazily, on the client requests it gates
			self.leave_safe_mode_if_ready().await;
			if self.in_safe_mode() {
				codec::write_response(&mut stream, op::SAFE_MODE, b"").await?;
				debug!(?method, "refused in safe mode");
				return Ok(());
			}
		}

		let (status, body) = match self.dispatch(method, &payload).await {
			Ok(reply) => reply,
			Err(e) => {
				info!(?method, error = %e, "request rejected");
				(e.status_code(), Vec::new())
			}
		};
		codec::write_response(&mut stream, status, &body).await
	}

	async fn dispatch(&self, method: Method, payload: &[u8]) -> Result<(u8, Vec<u8>)> {
		match method {
			Method::GetBlockLocations => {
				let located = self.get_block_locations(&path_arg(payload)?).await?;
				Ok((op::SUCCESS, serde_json::to_vec(&located)?))
			}
			Method::Create => {
				let located = self.create(&path_arg(payload)?).await?;
				Ok((op::SUCCESS, serde_json::to_vec(&located)?))
			}
			Method::AddBlock => {
				let located = self.add_block(&path_arg(payload)?).await?;
				Ok((op::SUCCESS, serde_json::to_vec(&located)?))
			}
			Method::BlockAck => {
				let located: LocatedBlock = serde_json::from_slice(payload)?;
				self.block_ack(located).await?;
				Ok((op::SUCCESS, Vec::new()))
			}
			Method::Complete => {
				self.complete(&path_arg(payload)?).await?;
				Ok((op::SUCCESS, Vec::new()))
			}
			Method::Remove => {
				self.remove(&path_arg(payload)?).await?;
				Ok((op::SUCCESS, Vec::new()))
			}
			Method::Exists => {
				let found = self.exists(&path_arg(payload)?).await?;
				Ok((if found { op::EXIST } else { op::NOT_EXIST }, Vec::new()))
			}
			Method::MakeDir => {
				self.make_dir(&path_arg(payload)?).await?;
				Ok((op::SUCCESS, Vec::new()))
			}
			Method::ListDir => {
				let listing = self.list_dir(&path_arg(payload)?).await?;
				Ok((op::SUCCESS, serde_json::to_vec(&listing)?))
			}
			Method::HeartBeat => {
				let endpoint: Endpoint = serde_json::from_slice(payload)?;
				self.heart_beat(endpoint).await?;
				Ok((op::SUCCESS, Vec::new()))
			}
			Method::BlkReport => {
				let report: BlockReport = serde_json::from_slice(payload)?;
				let to_delete = self.blk_report(report.endpoint, report.block_ids).await?;
				Ok((op::SUCCESS, serde_json::to_vec(&BlockIds { block_ids: to_delete })?))
			}
			Method::GetBlkTask => {
				let endpoint: Endpoint = serde_json::from_slice(payload)?;
				let tasks = self.get_blk_task(endpoint).await?;
				Ok((op::SUCCESS, serde_json::to_vec(&tasks)?))
			}
			Method::RecvedBlks => {
				let report: BlockReport = serde_json::from_slice(payload)?;
				self.recved_blks(report.endpoint, report.block_ids).await?;
				Ok((op::SUCCESS, Vec::new()))
			}
		}
	}
}

fn path_arg(payload: &[u8]) -> Result<String> {
	String::from_utf8(payload.to_vec())
		.map_err(|_| DfsError::Protocol { message: "path is not valid UTF-8".to_string() })
}

// vim: ts=4
