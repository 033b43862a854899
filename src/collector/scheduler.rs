//! Periodic collection cycle.
//!
//! One cycle samples every source of the [`CollectorContext`] concurrently,
//! each bounded by the probe timeout, stamps all readings with the timestamp
//! fixed at cycle start and commits them in one storage transaction. A
//! failing source only loses its own reading.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum_macros::{AsRefStr, Display};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::collector::{CollectorContext, Sample, SensorPlugin, SourceRole};
use crate::storage::{
    CycleReadings, DeleteSummary, StorageAdmin, StorageError, StorageWriter, WriteSummary,
};

/// Time allowed on top of the probe timeout for an in-flight cycle to commit
/// during shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Minimum spacing between two automatic retention runs.
pub const PRUNE_EVERY: Duration = Duration::from_secs(60 * 60);

/// Errors surfaced by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Cycle commit failed; the cycle's readings are lost.
    #[error("failed to persist cycle: {0}")]
    Storage(#[from] StorageError),

    /// Background task ended abnormally.
    #[error("scheduler task failed: {0}")]
    Task(String),
}

/// Lifecycle state observed through [`SchedulerHandle::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, Serialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Collecting,
    Stopped,
}

/// Outcome of one source in one cycle.
#[derive(Debug)]
enum SourceOutcome {
    Reading(Sample),
    Absent,
    Failed,
}

/// Counters of a completed cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    /// Sources that produced a reading.
    pub succeeded: usize,
    /// Sources unavailable or without a value this cycle.
    pub absent: usize,
    /// Sources that errored, timed out or panicked.
    pub failed: usize,
    pub written: WriteSummary,
}

impl CycleReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.absent + self.failed
    }
}

/// Runs collection cycles against a fixed context.
pub struct CollectionScheduler {
    context: Arc<CollectorContext>,
    writer: StorageWriter,
    interval: Duration,
    retention: Option<(StorageAdmin, u32)>,
    last_prune: Option<Instant>,
}

impl std::fmt::Debug for CollectionScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionScheduler")
            .field("sources", &self.context.len())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl CollectionScheduler {
    pub fn new(context: CollectorContext, writer: StorageWriter, interval: Duration) -> Self {
        Self {
            context: Arc::new(context),
            writer,
            interval,
            retention: None,
            last_prune: None,
        }
    }

    /// Prune rows older than `days` at most once per hour after a cycle.
    ///
    /// `days == 0` disables automatic pruning.
    pub fn with_retention(mut self, admin: StorageAdmin, days: u32) -> Self {
        self.retention = (days > 0).then_some((admin, days));
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle stamped with the current time.
    pub async fn run_cycle(&self) -> Result<CycleReport, SchedulerError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one cycle with every reading stamped `timestamp`.
    pub async fn run_cycle_at(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<CycleReport, SchedulerError> {
        let (readings, mut report) = self.collect(timestamp).await;
        report.written = self.writer.write_cycle(readings).await?;

        tracing::info!(
            ts = %timestamp,
            succeeded = report.succeeded,
            absent = report.absent,
            failed = report.failed,
            rows = report.written.total(),
            "Cycle completed"
        );
        Ok(report)
    }

    /// Sample every source concurrently; never short-circuits.
    async fn collect(&self, timestamp: DateTime<Utc>) -> (CycleReadings, CycleReport) {
        let sources = self.context.sources();
        let timeout = self.context.probe_timeout();

        let mut set = JoinSet::new();
        for (index, (_, plugin)) in sources.iter().enumerate() {
            let plugin = Arc::clone(plugin);
            set.spawn(async move { (index, sample_source(plugin, timeout).await) });
        }

        let mut outcomes: Vec<Option<SourceOutcome>> = sources.iter().map(|_| None).collect();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => tracing::error!(error = %e, "Sensor task panicked"),
            }
        }

        let mut readings = CycleReadings::new(timestamp);
        let mut report = CycleReport {
            timestamp,
            ..CycleReport::default()
        };

        // Fold in source order so rows are written deterministically.
        for ((role, plugin), outcome) in sources.iter().zip(outcomes) {
            match outcome.unwrap_or(SourceOutcome::Failed) {
                SourceOutcome::Reading(sample) => {
                    report.succeeded += 1;
                    match role {
                        SourceRole::Cpu => readings.set_cpu_temp(sample.celsius),
                        SourceRole::Gpu => readings.set_gpu_temp(sample.celsius),
                        SourceRole::Storage => {
                            readings.push_storage(plugin.name(), sample.label, sample.celsius)
                        }
                        SourceRole::External => {
                            let info = plugin.info();
                            readings.push_external(
                                plugin.name(),
                                &info.kind,
                                sample.celsius,
                                info.to_metadata(),
                            );
                        }
                    }
                }
                SourceOutcome::Absent => report.absent += 1,
                SourceOutcome::Failed => report.failed += 1,
            }
        }

        (readings, report)
    }

    /// Apply automatic retention if due.
    pub(crate) async fn maybe_prune(&mut self) -> Option<DeleteSummary> {
        let (admin, days) = self.retention.as_ref()?;
        if self.last_prune.is_some_and(|t| t.elapsed() < PRUNE_EVERY) {
            return None;
        }
        self.last_prune = Some(Instant::now());

        match admin.prune(*days).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(error = %e, retention_days = days, "Automatic pruning failed");
                None
            }
        }
    }

    /// Start the periodic loop on the current runtime.
    ///
    /// The first cycle runs immediately. Cycles never overlap: an overrunning
    /// cycle delays the next tick.
    pub fn spawn(self) -> SchedulerHandle {
        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_timeout = self.context.probe_timeout() + SHUTDOWN_GRACE;
        let handle = tokio::spawn(self.run(state_tx, shutdown_rx));
        SchedulerHandle {
            state_rx,
            shutdown_tx,
            shutdown_timeout,
            handle,
        }
    }

    async fn run(
        mut self,
        state_tx: watch::Sender<SchedulerState>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            interval = %humantime::format_duration(self.interval),
            sources = self.context.len(),
            "Collection scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {}
            }

            state_tx.send_replace(SchedulerState::Collecting);
            if let Err(e) = self.run_cycle().await {
                tracing::error!(error = %e, "Cycle failed, readings dropped");
            }
            self.maybe_prune().await;
            state_tx.send_replace(SchedulerState::Idle);
        }

        state_tx.send_replace(SchedulerState::Stopped);
        tracing::info!("Collection scheduler stopped");
    }
}

/// Read one source with availability check, timeout and logging.
async fn sample_source(plugin: Arc<dyn SensorPlugin>, timeout: Duration) -> SourceOutcome {
    let name = plugin.name().to_string();
    if !plugin.is_available() {
        tracing::debug!(sensor = %name, "Source not available");
        return SourceOutcome::Absent;
    }

    match tokio::time::timeout(timeout, plugin.read_temperature()).await {
        Ok(Ok(Some(sample))) => {
            tracing::debug!(sensor = %name, celsius = sample.celsius, "Reading taken");
            SourceOutcome::Reading(sample)
        }
        Ok(Ok(None)) => {
            tracing::debug!(sensor = %name, "No reading this cycle");
            SourceOutcome::Absent
        }
        Ok(Err(e)) => {
            tracing::warn!(sensor = %name, error = %e, "Sensor read failed");
            SourceOutcome::Failed
        }
        Err(_) => {
            tracing::warn!(sensor = %name, timeout = ?timeout, "Sensor read timed out");
            SourceOutcome::Failed
        }
    }
}

/// Handle to a spawned scheduler loop.
pub struct SchedulerHandle {
    state_rx: watch::Receiver<SchedulerState>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_timeout: Duration,
    handle: JoinHandle<()>,
}

impl std::fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl SchedulerHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    /// How long [`shutdown`](Self::shutdown) waits: the probe timeout plus
    /// [`SHUTDOWN_GRACE`], so a cycle in flight can still commit.
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Stop after the in-flight cycle.
    pub async fn shutdown(self) -> Result<(), SchedulerError> {
        let timeout = self.shutdown_timeout;
        self.shutdown_with_timeout(timeout).await
    }

    /// Stop after the in-flight cycle; abort the loop if `timeout` elapses.
    pub async fn shutdown_with_timeout(self, timeout: Duration) -> Result<(), SchedulerError> {
        let _ = self.shutdown_tx.send(true);
        let mut handle = self.handle;

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                tracing::info!("Collection scheduler shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(SchedulerError::Task(e.to_string())),
            Err(_) => {
                tracing::warn!("Collection scheduler shutdown timed out, aborting");
                handle.abort();
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{SensorError, SensorInfo};
    use crate::storage::{StorageBuilder, StorageHandles, external_key, storage_key};
    use chrono::Duration as ChronoDuration;
    use tempfile::{TempDir, tempdir};

    #[derive(Debug, Clone)]
    enum Behavior {
        Value(f64),
        Labeled(f64, &'static str),
        Fail,
        Hang,
        Absent,
        Unavailable,
    }

    #[derive(Debug)]
    struct FakeSensor {
        name: String,
        kind: &'static str,
        behavior: Behavior,
    }

    fn fake(name: &str, kind: &'static str, behavior: Behavior) -> Arc<dyn SensorPlugin> {
        Arc::new(FakeSensor {
            name: name.to_string(),
            kind,
            behavior,
        })
    }

    #[async_trait::async_trait]
    impl SensorPlugin for FakeSensor {
        fn name(&self) -> &str {
            &self.name
        }

        fn info(&self) -> SensorInfo {
            SensorInfo::new(self.kind).detail("fake", true)
        }

        fn is_available(&self) -> bool {
            !matches!(self.behavior, Behavior::Unavailable)
        }

        async fn read_temperature(&self) -> Result<Option<Sample>, SensorError> {
            match &self.behavior {
                Behavior::Value(c) => Ok(Some(Sample::new(*c))),
                Behavior::Labeled(c, label) => Ok(Some(Sample::new(*c).with_label(*label))),
                Behavior::Fail => Err(SensorError::Command("smartctl exited with 2".into())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Some(Sample::new(99.0)))
                }
                Behavior::Absent | Behavior::Unavailable => Ok(None),
            }
        }
    }

    const INTERVAL: Duration = Duration::from_secs(60);

    async fn setup() -> (StorageHandles, TempDir) {
        let dir = tempdir().unwrap();
        let handles = StorageBuilder::new(dir.path().join("scheduler.db"))
            .build()
            .await
            .unwrap();
        (handles, dir)
    }

    fn at(minutes_ago: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::minutes(minutes_ago)
    }

    #[tokio::test]
    async fn test_cycle_writes_exactly_successful_sources() {
        let (handles, _dir) = setup().await;
        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(45.678)))
            .gpu(fake("gpu", "GPU", Behavior::Fail))
            .storage(fake("/dev/nvme0n1", "storage", Behavior::Labeled(38.0, "Fake NVMe")))
            .storage(fake("/dev/sdb", "storage", Behavior::Unavailable))
            .external(fake("outdoor_temp", "DS18B20", Behavior::Value(4.5)))
            .external(fake("attic", "DHT22", Behavior::Absent))
            .build();
        let scheduler = CollectionScheduler::new(context, handles.writer.clone(), INTERVAL);

        let report = scheduler.run_cycle_at(at(1)).await.unwrap();
        assert_eq!(report.attempted(), 6);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.absent, 2);
        assert!(report.written.core);
        assert_eq!(report.written.storage, 1);
        assert_eq!(report.written.external, 1);

        let latest = handles.aggregator.latest().await.unwrap();
        let core = latest.core.unwrap();
        assert_eq!(core.cpu_temp, Some(45.68));
        assert_eq!(core.gpu_temp, None);
        assert_eq!(latest.storage_devices[0].device_name, "Fake NVMe");
        assert_eq!(latest.external_sensors[0].sensor_type, "DS18B20");
        assert_eq!(latest.external_sensors[0].metadata["fake"], true);

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_no_core_row_when_cpu_and_gpu_missing() {
        let (handles, _dir) = setup().await;
        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Fail))
            .storage(fake("/dev/sda", "storage", Behavior::Value(33.0)))
            .build();
        let scheduler = CollectionScheduler::new(context, handles.writer.clone(), INTERVAL);

        let report = scheduler.run_cycle_at(at(1)).await.unwrap();
        assert!(!report.written.core);
        assert_eq!(report.written.storage, 1);

        let latest = handles.aggregator.latest().await.unwrap();
        assert!(latest.core.is_none());
        assert_eq!(latest.storage_devices.len(), 1);

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_cycle_still_completes() {
        let (handles, _dir) = setup().await;
        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Unavailable))
            .build();
        let scheduler = CollectionScheduler::new(context, handles.writer.clone(), INTERVAL);

        let report = scheduler.run_cycle_at(at(1)).await.unwrap();
        assert_eq!(report.written.total(), 0);
        assert!(handles.aggregator.latest().await.unwrap().is_empty());

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_device_never_hides_others() {
        let (handles, _dir) = setup().await;
        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(41.0)))
            .storage(fake("/dev/nvme0n1", "storage", Behavior::Value(37.0)))
            .storage(fake("/dev/sda", "storage", Behavior::Fail))
            .build();
        let scheduler = CollectionScheduler::new(context, handles.writer.clone(), INTERVAL);

        for minutes_ago in [3, 2, 1] {
            scheduler.run_cycle_at(at(minutes_ago)).await.unwrap();
        }

        let records = handles.aggregator.range(1).await.unwrap();
        assert_eq!(records.len(), 3);
        for record in &records {
            assert!(record.contains_key(&storage_key("/dev/nvme0n1")));
            assert!(!record.contains_key(&storage_key("/dev/sda")));
        }
        assert!(records.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_removed_sensor_disappears_from_later_records() {
        let (handles, _dir) = setup().await;
        let with_outdoor = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(40.0)))
            .external(fake("outdoor_temp", "DS18B20", Behavior::Value(3.0)))
            .build();
        let without_outdoor = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(40.0)))
            .build();

        let first = CollectionScheduler::new(with_outdoor, handles.writer.clone(), INTERVAL);
        first.run_cycle_at(at(5)).await.unwrap();
        first.run_cycle_at(at(4)).await.unwrap();

        // Restart with the sensor removed from configuration.
        let second = CollectionScheduler::new(without_outdoor, handles.writer.clone(), INTERVAL);
        for minutes_ago in [3, 2, 1] {
            second.run_cycle_at(at(minutes_ago)).await.unwrap();
        }

        let records = handles.aggregator.range(1).await.unwrap();
        assert_eq!(records.len(), 5);
        let key = external_key("outdoor_temp");
        let present: Vec<bool> = records.iter().map(|r| r.contains_key(&key)).collect();
        assert_eq!(present, vec![true, true, false, false, false]);

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_hung_probe_is_bounded() {
        let (handles, _dir) = setup().await;
        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(42.0)))
            .gpu(fake("gpu", "GPU", Behavior::Hang))
            .storage(fake("/dev/nvme0n1", "storage", Behavior::Value(36.0)))
            .probe_timeout(Duration::from_millis(200))
            .build();
        let scheduler = CollectionScheduler::new(context, handles.writer.clone(), INTERVAL);

        let started = Instant::now();
        let report = scheduler.run_cycle_at(at(1)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.failed, 1);

        let records = handles.aggregator.range(1).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].cpu_temp, Some(42.0));
        assert_eq!(records[0].gpu_temp, None);
        assert!(records[0].contains_key(&storage_key("/dev/nvme0n1")));

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported() {
        let (handles, _dir) = setup().await;
        let writer = handles.writer.clone();
        handles.shutdown().await.unwrap();

        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(42.0)))
            .build();
        let scheduler = CollectionScheduler::new(context, writer, INTERVAL);
        let err = scheduler.run_cycle_at(at(1)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Storage(_)));
    }

    #[tokio::test]
    async fn test_retention_runs_at_most_hourly() {
        let (handles, _dir) = setup().await;
        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(40.0)))
            .build();
        let mut scheduler = CollectionScheduler::new(context, handles.writer.clone(), INTERVAL)
            .with_retention(handles.admin.clone(), 7);

        scheduler
            .run_cycle_at(Utc::now() - ChronoDuration::days(10))
            .await
            .unwrap();
        scheduler.run_cycle_at(at(1)).await.unwrap();

        let first = scheduler.maybe_prune().await.unwrap();
        assert_eq!(first.core, 1);
        assert!(scheduler.maybe_prune().await.is_none());

        let disabled = CollectionScheduler::new(
            CollectorContext::builder().build(),
            handles.writer.clone(),
            INTERVAL,
        )
        .with_retention(handles.admin.clone(), 0);
        assert!(disabled.retention.is_none());

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_and_shutdown() {
        let (handles, _dir) = setup().await;
        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(40.0)))
            .build();
        let scheduler = CollectionScheduler::new(context, handles.writer.clone(), INTERVAL);

        let handle = scheduler.spawn();
        let mut states = handle.subscribe();

        // The first tick fires immediately; wait for that cycle to finish.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if handles.aggregator.latest().await.unwrap().core.is_some()
                    && *states.borrow() == SchedulerState::Idle
                {
                    break;
                }
                let _ = tokio::time::timeout(Duration::from_millis(50), states.changed()).await;
            }
        })
        .await
        .unwrap();

        handle.shutdown().await.unwrap();
        assert_eq!(*states.borrow_and_update(), SchedulerState::Stopped);

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_cycle_in_flight() {
        let (handles, _dir) = setup().await;
        let context = CollectorContext::builder()
            .cpu(fake("cpu", "CPU", Behavior::Value(41.0)))
            .gpu(fake("gpu", "GPU", Behavior::Hang))
            .probe_timeout(Duration::from_millis(500))
            .build();
        let scheduler = CollectionScheduler::new(context, handles.writer.clone(), INTERVAL);

        let handle = scheduler.spawn();
        assert_eq!(handle.shutdown_timeout(), Duration::from_millis(500) + SHUTDOWN_GRACE);

        let mut states = handle.subscribe();
        tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| *s == SchedulerState::Collecting),
        )
        .await
        .unwrap()
        .unwrap();

        // The hung GPU keeps the cycle open until its read times out.
        handle.shutdown().await.unwrap();

        let core = handles.aggregator.latest().await.unwrap().core.unwrap();
        assert_eq!(core.cpu_temp, Some(41.0));
        assert_eq!(core.gpu_temp, None);

        handles.shutdown().await.unwrap();
    }
}
