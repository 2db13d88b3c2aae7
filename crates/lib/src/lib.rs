//!
//! Trellis: a real-time collaborative document engine.
//! This library provides the replicated tree, its conflict rules, and the
//! client and server sides of a room.
//!
//! ## Core Concepts
//!
//! * **Documents (`crdt::Document`)**: A tree of conflict-free replicated nodes (objects, maps, lists and registers) rooted at `"root"`.
//! * **Ops (`crdt::Op`)**: The wire unit of every change. Each op names the node it touches and carries an id minted by the client that produced it.
//! * **Positions (`crdt::Pos`)**: Fractional-index strings ordering list children; a new position can always be made between two others.
//! * **Reconciler (`reconciler::apply_ops`)**: Applies ops to a document with deterministic conflict rules, distinguishing local, remote and acknowledged ops, and produces the reverse ops for undo.
//! * **History (`history::History`)**: Bounded undo and redo stacks of reversible batches.
//! * **Sessions (`session::ClientSession`)**: One replica of one room: presence, throttled outgoing buffers, offline ops and reconnect convergence. `session::SessionDriver` runs it against a transport.
//! * **Storage (`storage::RoomStorage`)**: The authoritative server copy of a room, behind a pluggable `storage::StorageDriver` that heals corrupt trees on load.

pub mod constants;
pub mod crdt;
pub mod history;
pub mod reconciler;
pub mod session;
pub mod storage;

/// Result type used throughout the Trellis library.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for the Trellis library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Structured CRDT errors from the crdt module
    #[error(transparent)]
    CRDT(crdt::CRDTError),

    /// Structured undo/redo errors from the history module
    #[error(transparent)]
    History(history::HistoryError),

    /// Structured client session errors from the session module
    #[error(transparent)]
    Session(session::SessionError),

    /// Structured storage driver errors from the storage module
    #[error(transparent)]
    Storage(storage::StorageError),
}

impl Error {
    /// Get the originating module for this error.
    pub fn module(&self) -> &'static str {
        match self {
            Error::CRDT(_) => "crdt",
            Error::History(_) => "history",
            Error::Session(_) => "session",
            Error::Storage(_) => "storage",
            Error::Io(_) => "io",
            Error::Serialize(_) => "serialize",
        }
    }

    /// Check if this error indicates a resource was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::CRDT(crdt_err) => crdt_err.is_not_found_error(),
            Error::Session(session_err) => session_err.is_not_found(),
            Error::Storage(storage_err) => storage_err.is_not_found(),
            _ => false,
        }
    }

    /// Check if this error was caused by calling the API the wrong way,
    /// as opposed to a failure of the environment.
    pub fn is_usage_error(&self) -> bool {
        match self {
            Error::CRDT(crdt_err) => crdt_err.is_usage_error(),
            Error::History(history_err) => history_err.is_usage_error(),
            Error::Session(session_err) => session_err.is_usage_error(),
            Error::Storage(storage_err) => storage_err.is_usage_error(),
            _ => false,
        }
    }

    /// Check if this error indicates a conflict (already exists).
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Storage(storage_err) => storage_err.is_conflict(),
            _ => false,
        }
    }

    /// Check if this error is I/O related.
    pub fn is_io_error(&self) -> bool {
        match self {
            Error::Io(_) | Error::Serialize(_) => true,
            Error::Storage(storage_err) => storage_err.is_io_error(),
            _ => false,
        }
    }

    /// Check if a persisted file could not be read back.
    pub fn is_format_error(&self) -> bool {
        match self {
            Error::Storage(storage_err) => storage_err.is_format_error(),
            _ => false,
        }
    }

    /// Check if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Session(session_err) => session_err.is_transient(),
            Error::Io(_) => true,
            _ => false,
        }
    }

    /// Check if this error is CRDT-related.
    pub fn is_crdt_error(&self) -> bool {
        matches!(self, Error::CRDT(_))
    }

    /// Check if this error is a CRDT type mismatch.
    pub fn is_crdt_type_error(&self) -> bool {
        match self {
            Error::CRDT(crdt_err) => crdt_err.is_type_error(),
            _ => false,
        }
    }

    /// Check if this error is a history failure.
    pub fn is_history_error(&self) -> bool {
        matches!(self, Error::History(_))
    }

    /// Check if this error is session-related.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Error::Session(_))
    }

    /// Check if this error is storage-related.
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}
