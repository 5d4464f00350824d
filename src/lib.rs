//! # miniDFS - Single-Master Distributed File System
//!
//! miniDFS is a small distributed file system in the GFS/HDFS mould: one
//! master holds the whole namespace and block-location map in memory, a
//! fleet of chunkservers stores fixed-size blocks on local disk, and
//! clients stream block data straight to the chunkservers over a binary
//! chain-write protocol.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use minidfs::client::{DfsClient, RemoteWriter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), minidfs::DfsError> {
//!     let client = DfsClient::new("127.0.0.1", 12345);
//!     client.make_dir("/data").await?;
//!
//!     let mut writer = RemoteWriter::create(client.clone(), "/data/f", 2 << 20).await?;
//!     writer.write(b"hello").await?;
//!     writer.close().await?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]

pub mod chunkserver;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod master;
pub mod proto;
pub mod util;

// Re-export commonly used types
pub use config::Config;
pub use error::DfsError;
pub use master::DfsMaster;
pub use proto::messages::{Block, Endpoint, LocatedBlock};
pub use proto::traits::{ChunkserverProtocol, ClientProtocol};

// vim: ts=4
