//! Canonical SQLite schema of the local state database.
//!
//! Nothing here is ever synchronized to the remote:
//! - `history_stacks` keeps the undo/redo batches of each board
//! - `offline_commands` keeps batches whose remote delivery failed
//! - `pack_cache` keeps resolved dependency packs by dependency tree hash
//! - `state_meta` tracks schema bookkeeping

/// Migration v1: history, offline queue and metadata.
pub const MIGRATION_V1_SQL: &str = r"
CREATE TABLE IF NOT EXISTS state_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    schema_version INTEGER NOT NULL,
    created_at_us INTEGER NOT NULL
);

INSERT OR IGNORE INTO state_meta (id, schema_version, created_at_us)
VALUES (1, 0, CAST(strftime('%s', 'now') AS INTEGER) * 1000000);

CREATE TABLE IF NOT EXISTS history_stacks (
    stack_key TEXT PRIMARY KEY,
    app_id TEXT NOT NULL,
    board_id TEXT NOT NULL,
    undo_json TEXT NOT NULL DEFAULT '[]',
    redo_json TEXT NOT NULL DEFAULT '[]',
    updated_at_us INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS offline_commands (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    command_id TEXT NOT NULL UNIQUE,
    queue_key TEXT NOT NULL,
    app_id TEXT NOT NULL,
    board_id TEXT NOT NULL,
    commands_json TEXT NOT NULL,
    created_at_us INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_offline_commands_queue
    ON offline_commands(queue_key, created_at_us, seq);
";

/// Migration v2: resolved dependency packs.
pub const MIGRATION_V2_SQL: &str = r"
CREATE TABLE IF NOT EXISTS pack_cache (
    dependency_tree_hash TEXT PRIMARY KEY,
    root_hash TEXT NOT NULL,
    pack_json TEXT NOT NULL,
    bit_count INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    cached_at_us INTEGER NOT NULL
);
";

/// Migration v3: re-key history and queue rows as `<app len>:<app>/<board>`.
///
/// `length()` counts characters, matching `ResourceKey::storage_key`.
pub const MIGRATION_V3_SQL: &str = r"
UPDATE history_stacks
    SET stack_key = length(app_id) || ':' || app_id || '/' || board_id;

UPDATE offline_commands
    SET queue_key = length(app_id) || ':' || app_id || '/' || board_id;
";

/// Indexes that must exist after migrating to the latest version.
pub const REQUIRED_INDEXES: &[&str] = &["idx_offline_commands_queue"];
