//! Port definitions (hexagonal architecture interfaces)
//!
//! Ports are the boundaries of the engine core. The engine depends on these
//! traits; their implementations live in adapter crates or in the host
//! application.
//!
//! ## Ports Overview
//!
//! - [`FsAdapter`] - local filesystem access in the platform's path encoding
//! - [`SyncEvents`] - upward callbacks to the remote-side coordinator
//! - [`NodeStore`] - durable key/value table backing the state cache
//! - [`RecordSealer`] - sealing of persisted node records

pub mod events;
pub mod fs;
pub mod sealer;
pub mod store;

pub use events::SyncEvents;
pub use fs::{DirHandle, FileHandle, FileInfo, FsAdapter, MkdirOutcome, OpenFailure, RenameOutcome};
pub use sealer::RecordSealer;
pub use store::NodeStore;
