//! Pack materialization and progress aggregation.
//!
//! One engine download runs per artifact of the resolved pack. Each streams
//! [`DownloadSample`]s; the aggregator keeps the latest sample per hash and,
//! on every tick, folds them into one [`DownloadStatus`] published on a
//! `watch` channel. Speed is measured against the totals of the previous
//! tick, so it reflects the last interval only.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::resolver::PackResolver;
use crate::adapter::BitStore;
use crate::error::{Result, SyncError};
use crate::model::{Bit, DownloadSample, ResolvedPack};
use crate::sync::TaskSupervisor;

/// Default aggregation period.
pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

const SAMPLE_CAPACITY: usize = 256;

/// Aggregated progress of one pack download.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadStatus {
    /// Hash of the root bit.
    pub parent: String,
    pub total_downloaded: u64,
    pub total_max: u64,
    pub bytes_per_second: f64,
    pub percent: f64,
    /// Every tracked artifact reached its size.
    pub complete: bool,
    /// Every per-artifact download has returned.
    pub finished: bool,
    /// Hashes whose download failed, with the reason.
    pub failures: Vec<(String, String)>,
}

impl DownloadStatus {
    fn pending(parent: &Bit) -> Self {
        Self {
            parent: parent.hash.clone(),
            total_downloaded: 0,
            total_max: 0,
            bytes_per_second: 0.0,
            percent: 0.0,
            complete: false,
            finished: false,
            failures: Vec::new(),
        }
    }
}

/// Folds per-artifact samples into totals, speed and percentage.
#[derive(Debug, Clone)]
pub struct DownloadAggregator {
    parent: String,
    latest: BTreeMap<String, DownloadSample>,
    baseline: u64,
    last_tick: Option<Instant>,
}

impl DownloadAggregator {
    #[must_use]
    pub fn new(parent: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            latest: BTreeMap::new(),
            baseline: 0,
            last_tick: None,
        }
    }

    /// Record the newest sample of one artifact.
    pub fn push(&mut self, sample: DownloadSample) {
        self.latest.insert(sample.hash.clone(), sample);
    }

    /// `(Σ downloaded, Σ max)` over tracked artifacts.
    #[must_use]
    pub fn totals(&self) -> (u64, u64) {
        self.latest
            .values()
            .fold((0, 0), |(d, m), s| (d + s.downloaded, m + s.max))
    }

    #[must_use]
    pub fn tracked(&self) -> usize {
        self.latest.len()
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        let (downloaded, max) = self.totals();
        max > 0 && downloaded >= max
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        let (downloaded, max) = self.totals();
        if max == 0 {
            return 0.0;
        }
        100.0 * downloaded as f64 / max as f64
    }

    /// Close one sampling interval at `now` and reset the speed baseline.
    /// The first tick only establishes the baseline and reports zero speed.
    #[allow(clippy::cast_precision_loss)]
    pub fn tick(&mut self, now: Instant) -> DownloadStatus {
        let (downloaded, max) = self.totals();
        let bytes_per_second = match self.last_tick {
            Some(last) => {
                let elapsed = now.saturating_duration_since(last).as_secs_f64();
                if elapsed > 0.0 {
                    downloaded.saturating_sub(self.baseline) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last_tick = Some(now);
        self.baseline = downloaded;

        DownloadStatus {
            parent: self.parent.clone(),
            total_downloaded: downloaded,
            total_max: max,
            bytes_per_second,
            percent: self.percent(),
            complete: self.is_complete(),
            finished: false,
            failures: Vec::new(),
        }
    }
}

/// Caller side of a running pack download.
#[derive(Debug)]
pub struct DownloadHandle {
    parent: Bit,
    pack: ResolvedPack,
    status: watch::Receiver<DownloadStatus>,
}

impl DownloadHandle {
    #[must_use]
    pub const fn parent(&self) -> &Bit {
        &self.parent
    }

    #[must_use]
    pub const fn pack(&self) -> &ResolvedPack {
        &self.pack
    }

    /// Latest published status.
    #[must_use]
    pub fn status(&self) -> DownloadStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every published status.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<DownloadStatus> {
        self.status.clone()
    }

    /// Wait until every artifact download returned.
    pub async fn wait(mut self) -> Result<DownloadStatus> {
        let status = self
            .status
            .wait_for(|s| s.finished)
            .await
            .map_err(|_| SyncError::Local(format!("download of {} aborted", self.parent.hash)))?
            .clone();
        if let Some((hash, reason)) = status.failures.first() {
            return Err(SyncError::Local(format!(
                "download of {hash} failed ({} of {} artifacts): {reason}",
                status.failures.len(),
                self.pack.len()
            )));
        }
        Ok(status)
    }
}

#[derive(Clone)]
pub struct DownloadOrchestrator {
    bits: Arc<dyn BitStore>,
    resolver: PackResolver,
    supervisor: TaskSupervisor,
    tick: Duration,
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("supervisor", &self.supervisor)
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

impl DownloadOrchestrator {
    pub fn new(
        bits: Arc<dyn BitStore>,
        resolver: PackResolver,
        supervisor: TaskSupervisor,
        tick: Duration,
    ) -> Self {
        Self {
            bits,
            resolver,
            supervisor,
            tick,
        }
    }

    #[must_use]
    pub const fn resolver(&self) -> &PackResolver {
        &self.resolver
    }

    /// Resolve `bit` and start one download per artifact of its pack.
    pub async fn download(&self, bit: &Bit) -> Result<DownloadHandle> {
        let pack = self.resolver.resolve(bit).await?;
        if pack.is_empty() {
            return Err(SyncError::NotFound {
                kind: "dependency pack",
                id: bit.hash.clone(),
            });
        }

        let (sample_tx, sample_rx) = mpsc::channel(SAMPLE_CAPACITY);
        let (outcome_tx, outcome_rx) = mpsc::channel(pack.len());
        let (status_tx, status_rx) = watch::channel(DownloadStatus::pending(bit));

        for artifact in pack.bits.iter().cloned() {
            let bits = Arc::clone(&self.bits);
            let samples = sample_tx.clone();
            let outcomes = outcome_tx.clone();
            self.supervisor.spawn("bit-download", async move {
                let result = bits.download_bit(&artifact, samples).await;
                let _ = outcomes.send((artifact.hash, result.map_err(|e| e.to_string()))).await;
            });
        }
        drop(sample_tx);
        drop(outcome_tx);

        info!(hash = %bit.hash, artifacts = pack.len(), size = pack.size_bytes(), "pack download started");
        self.supervisor.spawn(
            "download-aggregate",
            aggregate(
                DownloadAggregator::new(bit.hash.clone()),
                self.tick,
                sample_rx,
                outcome_rx,
                status_tx,
            ),
        );

        Ok(DownloadHandle {
            parent: bit.clone(),
            pack,
            status: status_rx,
        })
    }

    /// Restart every download the engine reports as unfinished. Bits that
    /// fail to restart are logged and skipped.
    pub async fn resume(&self) -> Result<Vec<DownloadHandle>> {
        let unfinished = self.bits.unfinished_downloads().await?;
        let mut handles = Vec::with_capacity(unfinished.len());
        for bit in unfinished {
            match self.download(&bit).await {
                Ok(handle) => handles.push(handle),
                Err(err) => warn!(hash = %bit.hash, error = %err, "could not resume download"),
            }
        }
        if !handles.is_empty() {
            info!(count = handles.len(), "resumed unfinished downloads");
        }
        Ok(handles)
    }
}

async fn aggregate(
    mut aggregator: DownloadAggregator,
    period: Duration,
    mut samples: mpsc::Receiver<DownloadSample>,
    mut outcomes: mpsc::Receiver<(String, std::result::Result<(), String>)>,
    status: watch::Sender<DownloadStatus>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures = Vec::new();
    let mut samples_open = true;

    loop {
        tokio::select! {
            sample = samples.recv(), if samples_open => match sample {
                Some(sample) => aggregator.push(sample),
                None => samples_open = false,
            },
            outcome = outcomes.recv() => match outcome {
                Some((hash, Ok(()))) => debug!(%hash, "artifact downloaded"),
                Some((hash, Err(reason))) => {
                    warn!(%hash, %reason, "artifact download failed");
                    failures.push((hash, reason));
                }
                None => break,
            },
            _ = interval.tick() => {
                status.send_replace(aggregator.tick(Instant::now()));
            }
        }
    }

    while let Ok(sample) = samples.try_recv() {
        aggregator.push(sample);
    }
    let mut last = aggregator.tick(Instant::now());
    last.finished = true;
    last.failures = failures;
    info!(
        parent = %last.parent,
        downloaded = last.total_downloaded,
        complete = last.complete,
        failed = last.failures.len(),
        "pack download finished"
    );
    status.send_replace(last);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(hash: &str, downloaded: u64, max: u64) -> DownloadSample {
        DownloadSample {
            hash: hash.to_string(),
            downloaded,
            max,
            path: format!("/bits/{hash}"),
        }
    }

    #[test]
    fn speed_is_measured_per_tick() {
        let t0 = Instant::now();
        let mut agg = DownloadAggregator::new("root");

        agg.push(sample("a", 0, 100));
        let first = agg.tick(t0);
        assert!(first.bytes_per_second.abs() < f64::EPSILON);
        assert!(!first.complete);

        agg.push(sample("a", 50, 100));
        let second = agg.tick(t0 + Duration::from_secs(1));
        assert!((second.bytes_per_second - 50.0).abs() < 1e-9);
        assert!((second.percent - 50.0).abs() < 1e-9);
        assert!(!second.complete);

        agg.push(sample("a", 100, 100));
        let third = agg.tick(t0 + Duration::from_secs(2));
        assert!((third.bytes_per_second - 50.0).abs() < 1e-9);
        assert!(third.complete);
    }

    #[test]
    fn totals_span_every_tracked_artifact() {
        let mut agg = DownloadAggregator::new("root");
        agg.push(sample("a", 10, 100));
        agg.push(sample("b", 100, 100));
        agg.push(sample("a", 40, 100));
        assert_eq!(agg.totals(), (140, 200));
        assert_eq!(agg.tracked(), 2);
        assert!(!agg.is_complete());
        assert!((agg.percent() - 70.0).abs() < 1e-9);
    }

    #[test]
    fn nothing_tracked_is_neither_complete_nor_progressing() {
        let agg = DownloadAggregator::new("root");
        assert!(!agg.is_complete());
        assert!(agg.percent().abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn aggregate_loop_publishes_and_finishes() {
        let (sample_tx, sample_rx) = mpsc::channel(8);
        let (outcome_tx, outcome_rx) = mpsc::channel(1);
        let (status_tx, mut status_rx) = watch::channel(DownloadStatus {
            parent: "root".into(),
            total_downloaded: 0,
            total_max: 0,
            bytes_per_second: 0.0,
            percent: 0.0,
            complete: false,
            finished: false,
            failures: Vec::new(),
        });
        let task = tokio::spawn(aggregate(
            DownloadAggregator::new("root"),
            DEFAULT_TICK,
            sample_rx,
            outcome_rx,
            status_tx,
        ));

        sample_tx.send(sample("a", 0, 100)).await.expect("send");
        tokio::time::sleep(Duration::from_millis(1500)).await;
        sample_tx.send(sample("a", 100, 100)).await.expect("send");
        drop(sample_tx);
        outcome_tx.send(("a".to_string(), Ok(()))).await.expect("send");
        drop(outcome_tx);

        let last = status_rx.wait_for(|s| s.finished).await.expect("status").clone();
        task.await.expect("aggregate task");
        assert!(last.complete);
        assert_eq!(last.total_downloaded, 100);
        assert!(last.failures.is_empty());
    }
}
