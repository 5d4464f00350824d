//! Length-prefixed framing for control traffic and the data-plane
//! integer helpers
//!
//! Request: `len:u32 | method:u8 | payload` where `len` counts the whole
//! frame including itself. Response: `len:u32 | status:u8 | payload`.
//! Multi-byte integers are network byte order. The data plane sends a
//! 64-bit payload length as two big-endian `u32` halves, high half first.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DfsError, Result};

/// Frame header: length prefix plus one tag byte
const HEADER_LEN: u32 = 5;

/// Upper bound for one control frame. Control payloads are small
/// structured records; anything bigger is a corrupt or hostile peer.
const MAX_FRAME_LEN: u32 = 64 << 20;

/// Write one request frame.
pub async fn write_request<W>(w: &mut W, method: u8, payload: &[u8]) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	write_frame(w, method, payload).await
}

/// Read one request frame, returning the method ID byte and the payload.
pub async fn read_request<R>(r: &mut R) -> Result<(u8, Vec<u8>)>
where
	R: AsyncRead + Unpin,
{
	read_frame(r).await
}

/// Write one response frame.
pub async fn write_response<W>(w: &mut W, status: u8, payload: &[u8]) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	write_frame(w, status, payload).await
}

/// Read one response frame, returning the status byte and the payload.
pub async fn read_response<R>(r: &mut R) -> Result<(u8, Vec<u8>)>
where
	R: AsyncRead + Unpin,
{
	read_frame(r).await
}

async fn write_frame<W>(w: &mut W, tag: u8, payload: &[u8]) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let len = HEADER_LEN as usize + payload.len();
	if len > MAX_FRAME_LEN as usize {
		return Err(DfsError::Protocol { message: format!("frame too large: {} bytes", len) });
	}
	w.write_u32(len as u32).await?;
	w.write_u8(tag).await?;
	w.write_all(payload).await?;
	w.flush().await?;
	Ok(())
}

async fn read_frame<R>(r: &mut R) -> Result<(u8, Vec<u8>)>
where
	R: AsyncRead + Unpin,
{
	let len = r.read_u32().await?;
	if len < HEADER_LEN {
		return Err(DfsError::Protocol { message: format!("frame length {} too small", len) });
	}
	if len > MAX_FRAME_LEN {
		return Err(DfsError::Protocol { message: format!("frame length {} too large", len) });
	}
	let tag = r.read_u8().await?;
	let mut payload = vec![0u8; (len - HEADER_LEN) as usize];
	r.read_exact(&mut payload).await?;
	Ok((tag, payload))
}

/// Write a data-plane header record: `u16` length prefix, then the
/// record as JSON. Used for the located block of a WRITE and the block
/// descriptor of a READ.
pub async fn write_record16<W, T>(w: &mut W, record: &T) -> Result<()>
where
	W: AsyncWrite + Unpin,
	T: serde::Serialize,
{
	let bytes = serde_json::to_vec(record)?;
	if bytes.len() > u16::MAX as usize {
		return Err(DfsError::Protocol {
			message: format!("header record too large: {} bytes", bytes.len()),
		});
	}
	w.write_u16(bytes.len() as u16).await?;
	w.write_all(&bytes).await?;
	Ok(())
}

/// Read a header record written by [`write_record16`].
pub async fn read_record16<R, T>(r: &mut R) -> Result<T>
where
	R: AsyncRead + Unpin,
	T: serde::de::DeserializeOwned,
{
	let len = r.read_u16().await?;
	let mut bytes = vec![0u8; len as usize];
	r.read_exact(&mut bytes).await?;
	Ok(serde_json::from_slice(&bytes)?)
}

/// Write a data-plane payload length: two big-endian u32 halves, high first.
pub async fn write_data_len<W>(w: &mut W, len: u64) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	w.write_u32((len >> 32) as u32).await?;
	w.write_u32(len as u32).await?;
	Ok(())
}

/// Read a data-plane payload length written by [`write_data_len`].
pub async fn read_data_len<R>(r: &mut R) -> Result<u64>
where
	R: AsyncRead + Unpin,
{
	let high = r.read_u32().await? as u64;
	let low = r.read_u32().await? as u64;
	Ok((high << 32) | low)
}

/// One-shot RPC round trip: connect, send the request frame, read the
/// response frame, hang up. Every control call in the system uses this
/// shape.
pub async fn call(ip: &str, port: u16, method: u8, payload: &[u8]) -> Result<(u8, Vec<u8>)> {
	let mut stream = tokio::net::TcpStream::connect((ip, port)).await?;
	write_request(&mut stream, method, payload).await?;
	let reply = read_response(&mut stream).await?;
	Ok(reply)
}


// vim: ts=4
