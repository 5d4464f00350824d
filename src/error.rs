//! Error types for miniDFS operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::proto::op;

/// Main error type for master, chunkserver and client operations
///
/// Every RPC handler maps its error onto one status byte of the wire
/// protocol via [`DfsError::status_code`]; errors never cross the RPC
/// boundary in any other form.
#[derive(Debug)]
pub enum DfsError {
	/// Path does not name a committed file/directory (or names the wrong kind)
	NoSuchFile { path: String },

	/// Path already names a committed file or directory
	AlreadyExists { path: String },

	/// Another client holds the path in the files-in-creation table
	InCreating { path: String },

	/// Remove was asked to delete a directory
	IsDirectory { path: String },

	/// Master is still gathering block locations; client may retry
	SafeMode,

	/// Replication queue had no task the calling chunkserver can source
	NoBlockTask,

	/// Fewer chunkservers alive than a placement needs
	Exhausted { needed: usize, alive: usize },

	/// Appending to the edit log failed; the namespace was left untouched
	LogFailure(io::Error),

	/// I/O error
	Io(io::Error),

	/// Message (de)serialization failed
	Codec(serde_json::Error),

	/// Frame-level protocol violation (bad length, unknown method, ...)
	Protocol { message: String },

	/// Remote peer answered with an unexpected status byte
	Status { operation: &'static str, code: u8 },

	/// TCP connect retries exhausted
	ConnectFailed { endpoint: String, attempts: u32 },

	/// Invalid configuration
	Config { message: String },
}

impl DfsError {
	/// Map this error onto the status byte it is reported as on the wire.
	pub fn status_code(&self) -> u8 {
		match self {
			DfsError::NoSuchFile { .. } => op::NO_SUCH_FILE,
			DfsError::AlreadyExists { .. } => op::FILE_ALREADY_EXISTED,
			DfsError::InCreating { .. } => op::FILE_IN_CREATING,
			DfsError::SafeMode => op::SAFE_MODE,
			DfsError::NoBlockTask => op::NO_BLK_TASK,
			DfsError::LogFailure(_) => op::OP_LOG_FAILURE,
			_ => op::FAILURE,
		}
	}

	/// Rebuild the error a non-success status byte stands for.
	///
	/// Used on the calling side of an RPC; `operation` and `path` only
	/// provide context for the message.
	pub fn from_status(code: u8, operation: &'static str, path: &str) -> Self {
		match code {
			op::NO_SUCH_FILE => DfsError::NoSuchFile { path: path.to_string() },
			op::FILE_ALREADY_EXISTED => DfsError::AlreadyExists { path: path.to_string() },
			op::FILE_IN_CREATING => DfsError::InCreating { path: path.to_string() },
			op::SAFE_MODE => DfsError::SafeMode,
			op::NO_BLK_TASK => DfsError::NoBlockTask,
			op::OP_LOG_FAILURE => {
				DfsError::LogFailure(io::Error::other("edit log append failed on master"))
			}
			_ => DfsError::Status { operation, code },
		}
	}
}

impl fmt::Display for DfsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DfsError::NoSuchFile { path } => write!(f, "No such file or directory: {}", path),
			DfsError::AlreadyExists { path } => write!(f, "File already exists: {}", path),
			DfsError::InCreating { path } => {
				write!(f, "File is being created by another client: {}", path)
			}
			DfsError::IsDirectory { path } => {
				write!(f, "Cannot remove a directory: {}", path)
			}
			DfsError::SafeMode => write!(f, "Master is in safe mode"),
			DfsError::NoBlockTask => write!(f, "No block task available"),
			DfsError::Exhausted { needed, alive } => {
				write!(f, "Placement needs {} chunkservers, only {} alive", needed, alive)
			}
			DfsError::LogFailure(e) => write!(f, "Edit log append failed: {}", e),
			DfsError::Io(e) => write!(f, "I/O error: {}", e),
			DfsError::Codec(e) => write!(f, "Serialization error: {}", e),
			DfsError::Protocol { message } => write!(f, "Protocol error: {}", message),
			DfsError::Status { operation, code } => {
				write!(f, "{} failed with status {}", operation, code)
			}
			DfsError::ConnectFailed { endpoint, attempts } => {
				write!(f, "Failed to connect to {} after {} attempts", endpoint, attempts)
			}
			DfsError::Config { message } => write!(f, "Invalid configuration: {}", message),
		}
	}
}

impl Error for DfsError {
	fn source(&self) -> Option<&(dyn Error + 'static)> {
		match self {
			DfsError::Io(e) | DfsError::LogFailure(e) => Some(e),
			DfsError::Codec(e) => Some(e),
			_ => None,
		}
	}
}

impl From<io::Error> for DfsError {
	fn from(e: io::Error) -> Self {
		DfsError::Io(e)
	}
}

impl From<serde_json::Error> for DfsError {
	fn from(e: serde_json::Error) -> Self {
		DfsError::Codec(e)
	}
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, DfsError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn status_codes_round_trip_through_the_wire() {
		let cases: Vec<(DfsError, u8)> = vec![
			(DfsError::NoSuchFile { path: "/x".into() }, op::NO_SUCH_FILE),
			(DfsError::AlreadyExists { path: "/x".into() }, op::FILE_ALREADY_EXISTED),
			(DfsError::InCreating { path: "/x".into() }, op::FILE_IN_CREATING),
			(DfsError::SafeMode, op::SAFE_MODE),
			(DfsError::NoBlockTask, op::NO_BLK_TASK),
		];
		for (err, code) in cases {
			assert_eq!(err.status_code(), code);
			let back = DfsError::from_status(code, "test", "/x");
			assert_eq!(back.status_code(), code, "status byte must survive the round trip");
		}
	}

	#[test]
	fn unmapped_errors_report_generic_failure() {
		let err = DfsError::Exhausted { needed: 3, alive: 1 };
		assert_eq!(err.status_code(), op::FAILURE);
		let err = DfsError::Protocol { message: "bad frame".into() };
		assert_eq!(err.status_code(), op::FAILURE);
	}
}

// vim: ts=4
