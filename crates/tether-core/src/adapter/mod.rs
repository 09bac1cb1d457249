//! Boundaries to the two external collaborators: the embedded local engine
//! and the remote collaboration service.

pub mod http;
pub mod local;
pub mod remote;

pub use local::{AppStore, BitStore, BoardStore, EventStore, LocalStore, StorageStore, TemplateStore};
pub use remote::{Method, RemoteAuthority, RemoteError};
