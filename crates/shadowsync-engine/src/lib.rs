//! Shadowsync Engine - local-side synchronization core
//!
//! The [`SyncEngine`] observes a local root directory, maintains a shadow
//! tree of what it believes exists on disk, and emits semantic change events
//! (addition, change, local move) to the remote-side coordinator. It never
//! performs remote mutations itself.
//!
//! ## Data Flow
//!
//! ```text
//! OS watcher / scan ──→ DirNotifier (two queues) ──→ SyncEngine::proc_scan_q
//!                                                         │
//!                                        check_path ──→ shadow tree mutation
//!                                                         │
//!                                  SyncEvents callbacks + StateCache flush
//! ```
//!
//! ## Concurrency
//!
//! The engine is single-threaded cooperative: reconciliation, callbacks and
//! cache bookkeeping all run on the owning thread. The only `await` points
//! are between queue-drain iterations, when the state cache is flushed.

pub mod arena;
pub mod debris;
pub mod engine;
pub mod fs;
pub mod node;
pub mod notifier;
pub mod statecache;
pub mod watcher;

pub use arena::NodeArena;
pub use debris::{DebrisOutcome, DebrisVault};
pub use engine::{CheckOutcome, EngineStatus, QueueVerdict, SyncEngine};
pub use fs::StdFsAdapter;
pub use node::ShadowNode;
pub use notifier::{DirNotifier, NotifyEvent, NotifyQueue};
pub use watcher::RootWatcher;
