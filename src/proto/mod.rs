//! Wire protocol: framing, opcodes, message records and the two
//! capability traits the master serves
//!
//! Every control message shares one frame shape: a `u32` length prefix
//! (network byte order, counting the whole frame), one tag byte (method
//! ID on requests, status on responses) and an opaque payload. Payloads
//! carrying a bare path are raw UTF-8; structured payloads are
//! length-delimited serde_json records.
//!
//! Bulk block payloads bypass this framing; see [`codec`] for the
//! data-plane helpers shared by clients and chunkservers.

pub mod codec;
pub mod messages;
pub mod op;
pub mod traits;

pub use messages::{
	Block, BlockIds, BlockReport, BlockTask, BlockTasks, Endpoint, FileInfo, Listing,
	LocatedBlock, LocatedBlocks,
};
pub use op::Method;
pub use traits::{ChunkserverProtocol, ClientProtocol};

// vim: ts=4
