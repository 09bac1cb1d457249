//! Durable FIFO of batches whose remote delivery failed.
//!
//! Replay is opportunistic: the owning board's next read drains its queue,
//! oldest first. Records older than the expiry window are dropped without a
//! delivery attempt (and logged at `warn`, since that discards user edits).
//! The first failed delivery stops the pass; that record and everything after
//! it wait for the next read.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use super::locks::KeyedLocks;
use crate::adapter::remote::{Method, RemoteAuthority, RemoteError, paths, send_unit};
use crate::clock::Clock;
use crate::db::{StateDb, from_micros, to_micros};
use crate::error::{Result, StoreError, SyncError};
use crate::model::{Batch, CommandEnvelope, GenericCommand, ResourceKey};

/// Default age after which queued batches are dropped.
pub const DEFAULT_EXPIRY_DAYS: i64 = 7;

static NEXT_COMMAND_SEQ: AtomicU64 = AtomicU64::new(0);

/// A batch waiting for remote delivery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfflineSyncRecord {
    pub command_id: String,
    pub key: ResourceKey,
    pub commands: Batch,
    pub created_at: DateTime<Utc>,
}

/// Summary of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    /// Command ids delivered and removed, in delivery order.
    pub delivered: Vec<String>,
    /// Command ids dropped for age.
    pub expired: Vec<String>,
    /// Records still queued after the pass.
    pub remaining: usize,
    /// Why the pass stopped early, if it did.
    pub failure: Option<String>,
}

impl ReplayReport {
    /// `true` when the pass had nothing to do.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.delivered.is_empty() && self.expired.is_empty() && self.failure.is_none()
    }
}

/// POST one batch to the board endpoint.
pub async fn deliver_batch(
    remote: &dyn RemoteAuthority,
    key: &ResourceKey,
    commands: &[GenericCommand],
) -> std::result::Result<(), RemoteError> {
    let body = serde_json::to_value(CommandEnvelope::borrowed(commands))
        .map_err(|e| RemoteError::Decode(e.to_string()))?;
    send_unit(remote, Method::Post, &paths::board(&key.app_id, &key.board_id), Some(body)).await
}

#[derive(Clone)]
pub struct OfflineQueue {
    db: StateDb,
    clock: Arc<dyn Clock>,
    expiry: chrono::Duration,
    locks: KeyedLocks,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("db", &self.db)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, String, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_record(
    (command_id, app_id, board_id, commands_json, created_at_us): (String, String, String, String, i64),
) -> std::result::Result<OfflineSyncRecord, StoreError> {
    Ok(OfflineSyncRecord {
        command_id,
        key: ResourceKey::new(app_id, board_id),
        commands: serde_json::from_str(&commands_json)?,
        created_at: from_micros(created_at_us)?,
    })
}

const SELECT_COLUMNS: &str = "SELECT command_id, app_id, board_id, commands_json, created_at_us FROM offline_commands";

impl OfflineQueue {
    pub fn new(db: StateDb, clock: Arc<dyn Clock>, expiry: chrono::Duration, locks: KeyedLocks) -> Self {
        Self {
            db,
            clock,
            expiry,
            locks,
        }
    }

    /// Lock table shared with the command pipeline.
    #[must_use]
    pub const fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    #[must_use]
    pub const fn expiry(&self) -> chrono::Duration {
        self.expiry
    }

    fn next_command_id(key: &ResourceKey, created_at: DateTime<Utc>, commands_json: &str) -> String {
        let seq = NEXT_COMMAND_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new();
        hasher.update(key.storage_key().as_bytes());
        hasher.update(&to_micros(created_at).to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(commands_json.as_bytes());
        let hex = hasher.finalize().to_hex();
        format!("oc-{}", &hex[..16])
    }

    /// Persist `commands` for later delivery.
    pub fn push(&self, key: &ResourceKey, commands: &[GenericCommand]) -> Result<OfflineSyncRecord> {
        let created_at = self.clock.now();
        let commands_json = serde_json::to_string(commands)?;
        let command_id = Self::next_command_id(key, created_at, &commands_json);

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO offline_commands
                    (command_id, queue_key, app_id, board_id, commands_json, created_at_us)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    command_id,
                    key.storage_key(),
                    key.app_id,
                    key.board_id,
                    commands_json,
                    to_micros(created_at)
                ],
            )?;
            Ok(())
        })?;

        debug!(%key, %command_id, commands = commands.len(), "batch queued for later delivery");
        Ok(OfflineSyncRecord {
            command_id,
            key: key.clone(),
            commands: commands.to_vec(),
            created_at,
        })
    }

    /// Queued records for `key`, oldest first.
    pub fn pending(&self, key: &ResourceKey) -> Result<Vec<OfflineSyncRecord>> {
        let records = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE queue_key = ?1 ORDER BY created_at_us, seq"
            ))?;
            let rows = stmt
                .query_map([key.storage_key()], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(decode_record).collect()
        })?;
        Ok(records)
    }

    /// Every queued record, oldest first.
    pub fn all(&self) -> Result<Vec<OfflineSyncRecord>> {
        let records = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY created_at_us, seq"))?;
            let rows = stmt
                .query_map([], record_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter().map(decode_record).collect()
        })?;
        Ok(records)
    }

    pub fn get(&self, command_id: &str) -> Result<Option<OfflineSyncRecord>> {
        let row = self.db.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE command_id = ?1"),
                    [command_id],
                    record_from_row,
                )
                .optional()?)
        })?;
        Ok(row.map(decode_record).transpose()?)
    }

    pub fn pending_count(&self, key: &ResourceKey) -> Result<usize> {
        let count: i64 = self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM offline_commands WHERE queue_key = ?1",
                [key.storage_key()],
                |row| row.get(0),
            )?)
        })?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Delete one record. Returns `false` when it was already gone.
    pub fn remove(&self, command_id: &str) -> Result<bool> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM offline_commands WHERE command_id = ?1", [command_id])?)
        })?;
        Ok(removed > 0)
    }

    /// Strictly older than the expiry window. A record exactly at the
    /// boundary is still delivered.
    #[must_use]
    pub fn is_expired(&self, record: &OfflineSyncRecord, now: DateTime<Utc>) -> bool {
        now - record.created_at > self.expiry
    }

    fn drop_expired(&self, record: &OfflineSyncRecord, now: DateTime<Utc>) -> Result<()> {
        warn!(
            key = %record.key,
            command_id = %record.command_id,
            age_hours = (now - record.created_at).num_hours(),
            commands = record.commands.len(),
            "dropping expired offline batch without delivery"
        );
        self.remove(&record.command_id)?;
        Ok(())
    }

    /// Drop every record older than the expiry window, across all keys.
    pub fn prune_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut dropped = Vec::new();
        for record in self.all()? {
            if self.is_expired(&record, now) {
                self.drop_expired(&record, now)?;
                dropped.push(record.command_id);
            }
        }
        if !dropped.is_empty() {
            info!(count = dropped.len(), "pruned expired offline batches");
        }
        Ok(dropped)
    }

    /// Deliver the queue of `key` in order, stopping at the first failure.
    ///
    /// Only state database errors are returned; delivery failures end up in
    /// [`ReplayReport::failure`].
    pub async fn replay(&self, key: &ResourceKey, remote: &dyn RemoteAuthority) -> Result<ReplayReport> {
        let _guard = self.locks.lock(&key.storage_key()).await;
        let records = self.pending(key)?;
        let mut report = ReplayReport::default();

        for (index, record) in records.iter().enumerate() {
            let now = self.clock.now();
            if self.is_expired(record, now) {
                self.drop_expired(record, now)?;
                report.expired.push(record.command_id.clone());
                continue;
            }

            match deliver_batch(remote, key, &record.commands).await {
                Ok(()) => {
                    self.remove(&record.command_id)?;
                    debug!(%key, command_id = %record.command_id, "replayed offline batch");
                    report.delivered.push(record.command_id.clone());
                }
                Err(err) => {
                    let err = SyncError::Replay {
                        command_id: record.command_id.clone(),
                        reason: SyncError::from(err).to_string(),
                    };
                    warn!(%key, error = %err, "offline replay stopped");
                    report.failure = Some(err.to_string());
                    report.remaining = records.len() - index;
                    return Ok(report);
                }
            }
        }

        if !report.is_noop() {
            info!(
                %key,
                delivered = report.delivered.len(),
                expired = report.expired.len(),
                "offline queue drained"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommandPayload;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::Value;
    use std::sync::Mutex;

    struct FixedClock(Mutex<DateTime<Utc>>);

    impl FixedClock {
        fn advance(&self, by: chrono::Duration) {
            let mut now = self.0.lock().expect("lock");
            *now += by;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().expect("lock")
        }
    }

    /// Remote that records board deliveries and fails once `fail_from` is reached.
    #[derive(Default)]
    struct RecordingRemote {
        delivered: Mutex<Vec<Value>>,
        fail_from: Option<usize>,
    }

    #[async_trait]
    impl RemoteAuthority for RecordingRemote {
        async fn request(
            &self,
            _method: Method,
            _path: &str,
            body: Option<Value>,
        ) -> std::result::Result<Value, RemoteError> {
            let mut delivered = self.delivered.lock().expect("lock");
            if self.fail_from.is_some_and(|n| delivered.len() >= n) {
                return Err(RemoteError::Transport("connection reset".into()));
            }
            delivered.push(body.unwrap_or(Value::Null));
            Ok(Value::Null)
        }
    }

    fn cmd(n: i64) -> GenericCommand {
        GenericCommand::MoveNode(CommandPayload::new().with("n", n))
    }

    fn queue() -> (OfflineQueue, Arc<FixedClock>) {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).single().expect("ts");
        let clock = Arc::new(FixedClock(Mutex::new(start)));
        let db = StateDb::open_in_memory().expect("db");
        let q = OfflineQueue::new(
            db,
            clock.clone(),
            chrono::Duration::days(DEFAULT_EXPIRY_DAYS),
            KeyedLocks::new(),
        );
        (q, clock)
    }

    #[test]
    fn push_assigns_unique_ids_and_keeps_order() {
        let (q, _) = queue();
        let key = ResourceKey::new("app1", "board1");
        let a = q.push(&key, &[cmd(1)]).expect("push");
        let b = q.push(&key, &[cmd(2), cmd(3)]).expect("push");
        assert_ne!(a.command_id, b.command_id);
        assert!(a.command_id.starts_with("oc-"));

        let pending = q.pending(&key).expect("pending");
        assert_eq!(pending, vec![a.clone(), b]);
        assert_eq!(q.get(&a.command_id).expect("get"), Some(a));
        assert!(q.pending(&ResourceKey::new("app1", "other")).expect("pending").is_empty());
    }

    #[test]
    fn ids_sharing_an_underscore_split_keep_separate_queues() {
        let (q, _) = queue();
        let left = ResourceKey::new("a_b", "c");
        let right = ResourceKey::new("a", "b_c");
        let queued = q.push(&left, &[cmd(1)]).expect("push");

        assert_eq!(q.pending(&left).expect("pending"), vec![queued]);
        assert!(q.pending(&right).expect("pending").is_empty());
        assert_eq!(q.pending_count(&right).expect("len"), 0);
    }

    #[tokio::test]
    async fn replay_delivers_in_order_and_empties_queue() {
        let (q, _) = queue();
        let key = ResourceKey::new("app1", "board1");
        for n in 0..3 {
            q.push(&key, &[cmd(n)]).expect("push");
        }
        let remote = RecordingRemote::default();

        let report = q.replay(&key, &remote).await.expect("replay");
        assert_eq!(report.delivered.len(), 3);
        assert_eq!(report.remaining, 0);
        assert_eq!(q.pending_count(&key).expect("len"), 0);

        let delivered = remote.delivered.lock().expect("lock");
        let order: Vec<i64> = delivered
            .iter()
            .map(|body| body["commands"][0]["n"].as_i64().expect("n"))
            .collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failure_aborts_the_rest_of_the_pass() {
        let (q, _) = queue();
        let key = ResourceKey::new("app1", "board1");
        for n in 0..4 {
            q.push(&key, &[cmd(n)]).expect("push");
        }
        let remote = RecordingRemote {
            fail_from: Some(1),
            ..RecordingRemote::default()
        };

        let report = q.replay(&key, &remote).await.expect("replay");
        assert_eq!(report.delivered.len(), 1);
        assert_eq!(report.remaining, 3);
        assert!(report.failure.as_deref().is_some_and(|f| f.contains("rejected")));
        assert_eq!(q.pending_count(&key).expect("len"), 3);
    }

    #[tokio::test]
    async fn expired_records_are_dropped_without_delivery() {
        let (q, clock) = queue();
        let key = ResourceKey::new("app1", "board1");
        let old = q.push(&key, &[cmd(1)]).expect("push");
        clock.advance(chrono::Duration::days(8));
        let fresh = q.push(&key, &[cmd(2)]).expect("push");

        let remote = RecordingRemote::default();
        let report = q.replay(&key, &remote).await.expect("replay");
        assert_eq!(report.expired, vec![old.command_id]);
        assert_eq!(report.delivered, vec![fresh.command_id]);
        assert_eq!(remote.delivered.lock().expect("lock").len(), 1);
    }

    #[test]
    fn exactly_seven_days_is_not_yet_expired() {
        let (q, clock) = queue();
        let key = ResourceKey::new("app1", "board1");
        q.push(&key, &[cmd(1)]).expect("push");
        clock.advance(chrono::Duration::days(7));
        assert!(q.prune_expired(clock.now()).expect("prune").is_empty());

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(q.prune_expired(clock.now()).expect("prune").len(), 1);
        assert_eq!(q.all().expect("all").len(), 0);
    }
}
