//! The synchronization layer: read-through access, reconciliation, the
//! command pipeline, the offline queue and undo/redo history.

pub mod accessor;
pub mod cache;
pub mod connectivity;
pub mod history;
pub mod locks;
pub mod offline;
pub mod pipeline;
pub mod reconcile;
pub mod supervisor;

pub use accessor::{DualSourceAccessor, ReadOptions};
pub use cache::{Cache, CacheEvent, CacheKey, Subscription};
pub use connectivity::{AlwaysOnline, ConnectivityPolicy, StaticConnectivity};
pub use history::{UndoRedoHistory, UndoRedoState};
pub use locks::KeyedLocks;
pub use offline::{OfflineQueue, OfflineSyncRecord, ReplayReport};
pub use pipeline::{CommandPipeline, Delivery, Submission};
pub use reconcile::{DiffEntry, Reconciliation, VersionPin};
pub use supervisor::TaskSupervisor;
