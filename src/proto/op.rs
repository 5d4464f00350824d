//! Status bytes and RPC method IDs
//!
//! Both sets are closed: a byte outside them is a protocol error.

/// Operation succeeded
pub const SUCCESS: u8 = 0;
/// Generic failure (resource exhaustion, transport trouble, ...)
pub const FAILURE: u8 = 1;

// Client protocol statuses
pub const NO_SUCH_FILE: u8 = 20;
pub const FILE_ALREADY_EXISTED: u8 = 21;
pub const FILE_IN_CREATING: u8 = 22;
pub const EXIST: u8 = 23;
pub const NOT_EXIST: u8 = 24;
pub const SAFE_MODE: u8 = 30;

// Chunkserver protocol statuses
pub const COPY: u8 = 40;
pub const NO_BLK_TASK: u8 = 41;

// Data-plane opcodes
pub const OP_READ: u8 = 60;
pub const OP_WRITE: u8 = 61;

// Edit log record tags
pub const OP_CREATE: u8 = 80;
pub const OP_MKDIR: u8 = 81;
pub const OP_REMOVE: u8 = 82;

/// Edit-log append failed; the mutation was not applied
pub const OP_LOG_FAILURE: u8 = 90;

/// RPC method IDs, partitioned by origin: IDs `<= 100` come from clients,
/// the rest from chunkservers. Safe mode gates only the client range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Method {
	GetBlockLocations = 1,
	Create = 2,
	AddBlock = 3,
	BlockAck = 4,
	Complete = 5,
	Remove = 11,
	Exists = 12,
	MakeDir = 13,
	ListDir = 14,
	HeartBeat = 101,
	BlkReport = 102,
	GetBlkTask = 103,
	RecvedBlks = 104,
}

impl Method {
	/// True for methods issued by DFS clients (refused in safe mode).
	pub fn is_client_facing(self) -> bool {
		self as u8 <= 100
	}
}

impl TryFrom<u8> for Method {
	type Error = u8;

	fn try_from(id: u8) -> Result<Self, u8> {
		Ok(match id {
			1 => Method::GetBlockLocations,
			2 => Method::Create,
			3 => Method::AddBlock,
			4 => Method::BlockAck,
			5 => Method::Complete,
			11 => Method::Remove,
			12 => Method::Exists,
			13 => Method::MakeDir,
			14 => Method::ListDir,
			101 => Method::HeartBeat,
			102 => Method::BlkReport,
			103 => Method::GetBlkTask,
			104 => Method::RecvedBlks,
			other => return Err(other),
		})
	}
}


// vim: ts=4
