//! Data model shared by the adapters, the sync layer and the resource services.

pub mod bit;
pub mod command;
pub mod resource;

pub use bit::{Bit, BitRef, DownloadSample, ResolvedPack};
pub use command::{Batch, CommandEnvelope, CommandPayload, GenericCommand};
pub use resource::{
    App, AppBody, Board, BoardBody, BoardDraft, Event, EventBody, Feedback, Identified,
    ResourceKey, SemVer, SignedUrl, StorageItem, StorageListing, SyncedResource, Template,
    TemplateBody, VersionType,
};
