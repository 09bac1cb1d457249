//! Board mutation commands.
//!
//! The local engine understands a fixed set of command kinds. Each variant
//! carries a schema-versioned payload whose fields are opaque to the sync
//! layer: commands are stored, queued and forwarded, never interpreted here.
//! On the wire the kind is the `command_type` tag next to the payload fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload schema version written by this build.
pub const COMMAND_SCHEMA_VERSION: u32 = 1;

const fn current_schema_version() -> u32 {
    COMMAND_SCHEMA_VERSION
}

/// Versioned, schema-tagged command body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(default = "current_schema_version")]
    pub schema_version: u32,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl CommandPayload {
    #[must_use]
    pub fn new() -> Self {
        Self {
            schema_version: COMMAND_SCHEMA_VERSION,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

impl Default for CommandPayload {
    fn default() -> Self {
        Self::new()
    }
}

/// A single board mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command_type")]
pub enum GenericCommand {
    RemoveComment(CommandPayload),
    UpsertComment(CommandPayload),
    AddNode(CommandPayload),
    CopyPaste(CommandPayload),
    MoveNode(CommandPayload),
    RemoveNode(CommandPayload),
    UpdateNode(CommandPayload),
    DisconnectPin(CommandPayload),
    ConnectPin(CommandPayload),
    UpsertPin(CommandPayload),
    RemoveVariable(CommandPayload),
    UpsertVariable(CommandPayload),
    UpsertLayer(CommandPayload),
    RemoveLayer(CommandPayload),
}

/// An ordered sequence of commands applied atomically.
pub type Batch = Vec<GenericCommand>;

impl GenericCommand {
    /// The `command_type` tag.
    #[must_use]
    pub const fn command_type(&self) -> &'static str {
        match self {
            Self::RemoveComment(_) => "RemoveComment",
            Self::UpsertComment(_) => "UpsertComment",
            Self::AddNode(_) => "AddNode",
            Self::CopyPaste(_) => "CopyPaste",
            Self::MoveNode(_) => "MoveNode",
            Self::RemoveNode(_) => "RemoveNode",
            Self::UpdateNode(_) => "UpdateNode",
            Self::DisconnectPin(_) => "DisconnectPin",
            Self::ConnectPin(_) => "ConnectPin",
            Self::UpsertPin(_) => "UpsertPin",
            Self::RemoveVariable(_) => "RemoveVariable",
            Self::UpsertVariable(_) => "UpsertVariable",
            Self::UpsertLayer(_) => "UpsertLayer",
            Self::RemoveLayer(_) => "RemoveLayer",
        }
    }

    #[must_use]
    pub const fn payload(&self) -> &CommandPayload {
        match self {
            Self::RemoveComment(p)
            | Self::UpsertComment(p)
            | Self::AddNode(p)
            | Self::CopyPaste(p)
            | Self::MoveNode(p)
            | Self::RemoveNode(p)
            | Self::UpdateNode(p)
            | Self::DisconnectPin(p)
            | Self::ConnectPin(p)
            | Self::UpsertPin(p)
            | Self::RemoveVariable(p)
            | Self::UpsertVariable(p)
            | Self::UpsertLayer(p)
            | Self::RemoveLayer(p) => p,
        }
    }
}

/// Request body used by the remote for batch delivery and undo/redo.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct CommandEnvelope<'a> {
    pub commands: &'a [GenericCommand],
}

impl<'a> CommandEnvelope<'a> {
    #[must_use]
    pub const fn borrowed(commands: &'a [GenericCommand]) -> Self {
        Self { commands }
    }
}
