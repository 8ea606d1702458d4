//! Long-running operation tracking
//!
//! A deploy, abort or template build runs on the server for minutes. The
//! tracker polls its status endpoint on an interval and publishes complete
//! snapshots to observers until a terminal status is seen.
//!
//! Status changes only through [`OperationHandle::apply`], which the poll
//! loop owning the handle calls. Transport failures never touch the status;
//! they travel on the separate [`PollError`] channel of the snapshot.

use crate::error::{Error, Result};
use crate::logs::LogCursor;
use crate::status::OperationStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One answer from the status endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_lines: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<u64>,
}

impl StatusReport {
    pub fn status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }

    pub fn with_logs(mut self, lines: Vec<String>, next_cursor: Option<u64>) -> Self {
        self.log_lines = Some(lines);
        self.next_cursor = next_cursor;
        self
    }
}

/// What a single poll asks the source for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub owner_id: String,
    /// Return log lines after this offset; `None` means from the start
    pub log_cursor: Option<u64>,
    pub include_logs: bool,
}

/// Remote status endpoint for one kind of operation
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn poll(&self, request: &PollRequest) -> Result<StatusReport>;
}

/// Polling policy, supplied when the tracker is built
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Time between polls while the operation is not terminal
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    /// Keep polling while the observer is hidden
    pub background_polling: bool,
    /// Age after which the last result is stale and the next observation
    /// forces a poll
    #[serde(rename = "stale_after_ms", with = "millis")]
    pub stale_after: Duration,
    /// Consecutive failed polls before giving up; `None` retries forever
    /// at `interval`
    pub max_retries: Option<u32>,
    /// Consecutive failed polls before the error counts as sustained
    pub error_threshold: u32,
    /// Ask for log lines with every poll
    pub fetch_logs: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            background_polling: false,
            stale_after: Duration::from_secs(30),
            max_retries: None,
            error_threshold: 3,
            fetch_logs: true,
        }
    }
}

impl TrackerConfig {
    /// Fast-changing build status
    pub fn build_status() -> Self {
        Self {
            interval: Duration::from_secs(10),
            stale_after: Duration::from_secs(30),
            background_polling: true,
            ..Default::default()
        }
    }

    /// Slow-changing range details
    pub fn range_details() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            stale_after: Duration::from_secs(2 * 60),
            fetch_logs: false,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::InvalidConfig("polling interval must be non-zero".into()));
        }
        if self.error_threshold == 0 {
            return Err(Error::InvalidConfig("error threshold must be at least 1".into()));
        }
        if self.max_retries == Some(0) {
            return Err(Error::InvalidConfig("max retries must be at least 1".into()));
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Result of folding one report into a handle
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    /// `(from, to)` when the status changed
    pub transition: Option<(OperationStatus, OperationStatus)>,
    /// Log lines not seen before
    pub new_lines: Vec<String>,
    /// The handle was already terminal and the report was dropped
    pub ignored: bool,
}

/// Client-side view of one server-owned operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationHandle {
    pub owner_id: String,
    pub status: OperationStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub last_polled_at: Option<DateTime<Utc>>,
    /// Status string as the server last spelled it
    #[serde(default)]
    pub reported_status: Option<String>,
    log: LogCursor,
}

impl OperationHandle {
    pub fn new(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            status: OperationStatus::Unknown,
            started_at: None,
            last_polled_at: None,
            reported_status: None,
            log: LogCursor::new(),
        }
    }

    /// Continue an operation whose log was already read up to `cursor`
    pub fn resume(owner_id: impl Into<String>, cursor: u64) -> Self {
        Self {
            log: LogCursor::resume_from(cursor),
            ..Self::new(owner_id)
        }
    }

    pub fn log_cursor(&self) -> Option<u64> {
        self.log.position()
    }

    /// Display text for the status, keeping server states outside the
    /// known vocabulary
    pub fn status_label(&self) -> String {
        match &self.reported_status {
            Some(raw) => OperationStatus::display_label(raw),
            None => self.status.display_name().to_string(),
        }
    }

    /// Log lines handed to observers so far
    pub fn lines_delivered(&self) -> u64 {
        self.log.delivered()
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// Fold a successful poll into the handle.
    ///
    /// `requested_from` is the log cursor the poll was issued with. Once
    /// terminal, the handle ignores every further report.
    pub fn apply(
        &mut self,
        report: StatusReport,
        requested_from: Option<u64>,
        now: DateTime<Utc>,
    ) -> Applied {
        if self.is_terminal() {
            return Applied {
                ignored: true,
                ..Default::default()
            };
        }

        let next = OperationStatus::parse(&report.status);
        if next == OperationStatus::Unknown {
            warn!(
                owner = %self.owner_id,
                reported = %report.status,
                "Unrecognized operation status, continuing to poll"
            );
        }

        let previous = self.status;
        self.status = next;
        self.reported_status = Some(report.status.trim().to_string());
        self.last_polled_at = Some(now);
        if next.is_running() && self.started_at.is_none() {
            self.started_at = Some(now);
        }

        let new_lines = if report.log_lines.is_some() || report.next_cursor.is_some() {
            self.log.merge(
                requested_from,
                report.log_lines.unwrap_or_default(),
                report.next_cursor,
            )
        } else {
            Vec::new()
        };

        Applied {
            transition: (previous != next).then_some((previous, next)),
            new_lines,
            ignored: false,
        }
    }
}

/// A failed poll, reported apart from the operation status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollError {
    pub message: String,
    /// Failure is worth retrying (network, timeout, 5xx)
    pub transport: bool,
    pub consecutive_failures: u32,
    /// Failures reached the configured threshold; worth a persistent banner
    pub sustained: bool,
}

/// Everything an observer sees, published as one value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub handle: OperationHandle,
    pub error: Option<PollError>,
    /// Successful polls applied so far
    pub polls: u64,
    pub gave_up: bool,
}

impl TrackerSnapshot {
    fn new(handle: OperationHandle) -> Self {
        Self {
            handle,
            error: None,
            polls: 0,
            gave_up: false,
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.handle.status
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_running()
    }

    pub fn is_terminal(&self) -> bool {
        self.handle.is_terminal()
    }

    pub fn is_error(&self) -> bool {
        self.handle.is_error()
    }

    /// Loop has stopped and nothing more will be published
    pub fn is_finished(&self) -> bool {
        self.is_terminal() || self.gave_up
    }
}

#[derive(Debug)]
enum Control {
    Visible(bool),
    Refresh,
}

/// Spawns poll loops against one status source
#[derive(Clone)]
pub struct OperationTracker {
    source: Arc<dyn StatusSource>,
    config: TrackerConfig,
}

impl OperationTracker {
    pub fn new(source: Arc<dyn StatusSource>, config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { source, config })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Start tracking the operation owned by `owner_id`
    pub fn track(&self, owner_id: impl Into<String>) -> TrackerHandle {
        self.spawn(OperationHandle::new(owner_id))
    }

    /// Tear down `previous` and start a fresh handle for the same owner,
    /// e.g. after a new deploy was triggered.
    pub fn restart(&self, previous: TrackerHandle) -> TrackerHandle {
        let owner_id = previous.owner_id().to_string();
        previous.cancel();
        self.track(owner_id)
    }

    /// Start a loop for an existing handle
    pub fn spawn(&self, handle: OperationHandle) -> TrackerHandle {
        let owner_id = handle.owner_id.clone();
        let cancel = CancellationToken::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(TrackerSnapshot::new(handle.clone()));
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        let poll_loop = PollLoop {
            source: Arc::clone(&self.source),
            config: self.config.clone(),
            snapshot: TrackerSnapshot::new(handle),
            snapshot_tx,
            log_tx,
            control_rx,
            cancel: cancel.clone(),
            visible: true,
            last_poll: None,
            failures: 0,
        };
        let task = tokio::spawn(poll_loop.run());

        TrackerHandle {
            owner_id,
            snapshots: snapshot_rx,
            logs: Some(log_rx),
            control: control_tx,
            cancel,
            task: Some(task),
        }
    }
}

/// Observer side of a running poll loop. Dropping it stops the loop.
pub struct TrackerHandle {
    owner_id: String,
    snapshots: watch::Receiver<TrackerSnapshot>,
    logs: Option<mpsc::UnboundedReceiver<String>>,
    control: mpsc::UnboundedSender<Control>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TrackerHandle {
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Latest fully applied snapshot
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Another receiver of snapshot updates
    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshots.clone()
    }

    /// Take the stream of new log lines. Only the first call gets it.
    pub fn take_logs(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.logs.take()
    }

    /// Wait for the next published snapshot. `None` once the loop ended.
    pub async fn changed(&mut self) -> Option<TrackerSnapshot> {
        self.snapshots.changed().await.ok()?;
        Some(self.snapshots.borrow_and_update().clone())
    }

    /// The observing surface was shown or hidden
    pub fn set_visible(&self, visible: bool) {
        let _ = self.control.send(Control::Visible(visible));
    }

    /// Poll now instead of waiting for the next tick
    pub fn refresh(&self) {
        let _ = self.control.send(Control::Refresh);
    }

    /// Stop polling. A poll still in flight is abandoned and its result
    /// never published.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolve once the operation reaches a terminal status
    pub async fn wait_terminal(&mut self) -> Result<TrackerSnapshot> {
        loop {
            {
                let snapshot = self.snapshots.borrow_and_update();
                if snapshot.is_terminal() {
                    return Ok(snapshot.clone());
                }
                if snapshot.gave_up {
                    let attempts = snapshot
                        .error
                        .as_ref()
                        .map_or(0, |e| e.consecutive_failures);
                    return Err(Error::GaveUp { attempts });
                }
            }

            if self.snapshots.changed().await.is_err() {
                let snapshot = self.snapshots.borrow();
                return if snapshot.is_terminal() {
                    Ok(snapshot.clone())
                } else {
                    Err(Error::Cancelled)
                };
            }
        }
    }

    /// Cancel and wait for the loop task to exit
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct PollLoop {
    source: Arc<dyn StatusSource>,
    config: TrackerConfig,
    snapshot: TrackerSnapshot,
    snapshot_tx: watch::Sender<TrackerSnapshot>,
    log_tx: mpsc::UnboundedSender<String>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    cancel: CancellationToken,
    visible: bool,
    last_poll: Option<Instant>,
    failures: u32,
}

impl PollLoop {
    async fn run(mut self) {
        let owner = self.snapshot.handle.owner_id.clone();
        info!(owner = %owner, "Operation tracking started");

        if self.snapshot.is_terminal() {
            debug!(owner = %owner, "Handle already terminal, nothing to poll");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                control = self.control_rx.recv() => match control {
                    Some(Control::Visible(visible)) => {
                        self.visible = visible;
                        if !visible || !self.is_stale() {
                            continue;
                        }
                        debug!(owner = %owner, "Observer returned to stale result, polling now");
                    }
                    Some(Control::Refresh) => {}
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.visible && !self.config.background_polling {
                        debug!(owner = %owner, "Observer hidden, skipping poll");
                        continue;
                    }
                }
            }

            ticker.reset();
            if !self.poll_once().await {
                break;
            }
        }

        info!(
            owner = %owner,
            status = %self.snapshot.status(),
            "Operation tracking stopped"
        );
    }

    fn is_stale(&self) -> bool {
        self.last_poll
            .map_or(true, |at| at.elapsed() >= self.config.stale_after)
    }

    /// Issue one poll. Returns false when the loop should stop.
    async fn poll_once(&mut self) -> bool {
        let request = PollRequest {
            owner_id: self.snapshot.handle.owner_id.clone(),
            log_cursor: self.snapshot.handle.log_cursor(),
            include_logs: self.config.fetch_logs,
        };
        debug!(owner = %request.owner_id, cursor = ?request.log_cursor, "Polling operation status");

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(owner = %request.owner_id, "Abandoning in-flight poll after cancellation");
                return false;
            }
            result = self.source.poll(&request) => result,
        };
        if self.cancel.is_cancelled() {
            return false;
        }
        self.last_poll = Some(Instant::now());

        match result {
            Ok(report) => self.on_report(report, request.log_cursor),
            Err(e) => self.on_failure(e),
        }
    }

    fn on_report(&mut self, report: StatusReport, requested_from: Option<u64>) -> bool {
        let applied = self
            .snapshot
            .handle
            .apply(report, requested_from, Utc::now());
        if let Some((from, to)) = applied.transition {
            info!(owner = %self.snapshot.handle.owner_id, %from, %to, "Operation status changed");
        }

        // Lines go out first so an observer woken by the snapshot finds
        // them already queued
        for line in applied.new_lines {
            if self.log_tx.send(line).is_err() {
                break;
            }
        }

        self.failures = 0;
        self.snapshot.error = None;
        self.snapshot.polls += 1;
        self.snapshot_tx.send_replace(self.snapshot.clone());

        !self.snapshot.is_terminal()
    }

    fn on_failure(&mut self, error: Error) -> bool {
        self.failures += 1;
        let sustained = self.failures >= self.config.error_threshold;
        warn!(
            owner = %self.snapshot.handle.owner_id,
            failures = self.failures,
            sustained,
            "Status poll failed: {}",
            error
        );

        self.snapshot.error = Some(PollError {
            message: error.to_string(),
            transport: error.is_transport(),
            consecutive_failures: self.failures,
            sustained,
        });

        let give_up = self
            .config
            .max_retries
            .is_some_and(|limit| self.failures >= limit);
        if give_up {
            warn!(
                owner = %self.snapshot.handle.owner_id,
                "Giving up after {} consecutive failures",
                self.failures
            );
            self.snapshot.gave_up = true;
        }

        self.snapshot_tx.send_replace(self.snapshot.clone());
        !give_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Replays a fixed script of answers, then repeats `fallback`
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<StatusReport>>>,
        fallback: StatusReport,
        requests: Mutex<Vec<PollRequest>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<StatusReport>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                fallback: StatusReport::status("DEPLOYING"),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<PollRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn poll(&self, request: &PollRequest) -> Result<StatusReport> {
            self.requests.lock().unwrap().push(request.clone());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(self.fallback.clone()))
        }
    }

    fn transport_error() -> Result<StatusReport> {
        Err(Error::Transport("connection reset".into()))
    }

    fn config() -> TrackerConfig {
        TrackerConfig {
            interval: Duration::from_secs(10),
            ..Default::default()
        }
    }

    #[test]
    fn test_handle_lifecycle() {
        let mut handle = OperationHandle::new("alice");
        let now = Utc::now();
        assert_eq!(handle.status, OperationStatus::Unknown);

        let applied = handle.apply(StatusReport::status("PENDING"), None, now);
        assert_eq!(
            applied.transition,
            Some((OperationStatus::Unknown, OperationStatus::Pending))
        );
        assert_eq!(handle.started_at, Some(now));

        handle.apply(StatusReport::status("DEPLOYING"), None, now);
        let repeat = handle.apply(StatusReport::status("DEPLOYING"), None, now);
        assert_eq!(repeat.transition, None);
        assert!(handle.is_running());

        handle.apply(StatusReport::status("FAILURE"), None, now);
        assert!(handle.is_terminal());
        assert!(handle.is_error());

        let late = handle.apply(StatusReport::status("SUCCESS"), None, now);
        assert!(late.ignored);
        assert_eq!(handle.status, OperationStatus::Failure);
    }

    #[test]
    fn test_unlisted_status_keeps_server_spelling() {
        let mut handle = OperationHandle::new("carol");
        assert_eq!(handle.status_label(), "Unknown");

        handle.apply(StatusReport::status("DESTROYED"), None, Utc::now());
        assert_eq!(handle.status, OperationStatus::Unknown);
        assert_eq!(handle.status_label(), "DESTROYED");

        handle.apply(StatusReport::status("deploying"), None, Utc::now());
        assert_eq!(handle.status_label(), "Deploying");
    }

    #[test]
    fn test_never_deployed_is_not_started() {
        let mut handle = OperationHandle::new("bob");
        handle.apply(StatusReport::status("NEVER DEPLOYED"), None, Utc::now());
        assert!(handle.started_at.is_none());
        assert!(!handle.is_running());
        assert!(!handle.is_terminal());
    }

    #[test]
    fn test_config_validation() {
        assert!(TrackerConfig::default().validate().is_ok());
        assert!(TrackerConfig::build_status().validate().is_ok());
        assert!(TrackerConfig::range_details().validate().is_ok());

        let zero = TrackerConfig {
            interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(Error::InvalidConfig(_))));

        let no_threshold = TrackerConfig {
            error_threshold: 0,
            ..Default::default()
        };
        assert!(no_threshold.validate().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_stops_at_terminal_status() {
        let source = ScriptedSource::new(vec![
            Ok(StatusReport::status("PENDING")),
            Ok(StatusReport::status("DEPLOYING")),
            Ok(StatusReport::status("SUCCESS")),
        ]);
        let tracker = OperationTracker::new(source.clone(), config()).unwrap();
        let mut handle = tracker.track("alice");

        let done = handle.wait_terminal().await.unwrap();
        assert_eq!(done.status(), OperationStatus::Success);
        assert_eq!(done.polls, 3);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(source.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_keeps_last_status() {
        let source = ScriptedSource::new(vec![
            Ok(StatusReport::status("DEPLOYING")),
            transport_error(),
            transport_error(),
            Ok(StatusReport::status("SUCCESS")),
        ]);
        let tracker = OperationTracker::new(
            source.clone(),
            TrackerConfig {
                error_threshold: 2,
                ..config()
            },
        )
        .unwrap();
        let mut handle = tracker.track("alice");

        let first = handle.changed().await.unwrap();
        assert_eq!(first.status(), OperationStatus::Deploying);
        assert!(first.error.is_none());

        let blip = handle.changed().await.unwrap();
        assert_eq!(blip.status(), OperationStatus::Deploying);
        let error = blip.error.unwrap();
        assert_eq!(error.consecutive_failures, 1);
        assert!(error.transport);
        assert!(!error.sustained);

        let sustained = handle.changed().await.unwrap();
        assert_eq!(sustained.status(), OperationStatus::Deploying);
        assert!(sustained.error.unwrap().sustained);

        let recovered = handle.changed().await.unwrap();
        assert_eq!(recovered.status(), OperationStatus::Success);
        assert!(recovered.error.is_none());
        assert_eq!(source.requests().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_status_keeps_polling() {
        let source = ScriptedSource::new(vec![
            Ok(StatusReport::status("REBALANCING")),
            Ok(StatusReport::status("SUCCESS")),
        ]);
        let tracker = OperationTracker::new(source.clone(), config()).unwrap();
        let mut handle = tracker.track("alice");

        let unknown = handle.changed().await.unwrap();
        assert_eq!(unknown.status(), OperationStatus::Unknown);
        assert!(!unknown.is_finished());

        let done = handle.wait_terminal().await.unwrap();
        assert_eq!(done.status(), OperationStatus::Success);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_cursor_resumes_between_polls() {
        let source = ScriptedSource::new(vec![
            Ok(StatusReport::status("DEPLOYING")
                .with_logs(vec!["a".into(), "b".into()], Some(42))),
            Ok(StatusReport::status("DEPLOYING").with_logs(vec!["c".into()], Some(43))),
            Ok(StatusReport::status("SUCCESS").with_logs(Vec::new(), Some(43))),
        ]);
        let tracker = OperationTracker::new(source.clone(), config()).unwrap();
        let mut handle = tracker.spawn(OperationHandle::resume("alice", 40));
        let mut logs = handle.take_logs().unwrap();

        let done = handle.wait_terminal().await.unwrap();
        assert_eq!(done.handle.log_cursor(), Some(43));

        let cursors: Vec<_> = source.requests().iter().map(|r| r.log_cursor).collect();
        assert_eq!(cursors, vec![Some(40), Some(42), Some(43)]);

        let mut received = Vec::new();
        while let Ok(line) = logs.try_recv() {
            received.push(line);
        }
        assert_eq!(received, vec!["a", "b", "c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_retries() {
        let source = ScriptedSource::new(vec![
            transport_error(),
            transport_error(),
            transport_error(),
            Ok(StatusReport::status("SUCCESS")),
        ]);
        let tracker = OperationTracker::new(
            source.clone(),
            TrackerConfig {
                max_retries: Some(3),
                ..config()
            },
        )
        .unwrap();
        let mut handle = tracker.track("alice");

        let result = handle.wait_terminal().await;
        assert!(matches!(result, Err(Error::GaveUp { attempts: 3 })));
        assert_eq!(handle.snapshot().status(), OperationStatus::Unknown);
        assert_eq!(source.requests().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_observer_pauses_polling() {
        let source = ScriptedSource::new(Vec::new());
        let tracker = OperationTracker::new(
            source.clone(),
            TrackerConfig {
                background_polling: false,
                stale_after: Duration::from_secs(30),
                ..config()
            },
        )
        .unwrap();
        let mut handle = tracker.track("alice");
        handle.changed().await.unwrap();

        handle.set_visible(false);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.requests().len(), 1);

        handle.set_visible(true);
        let refreshed = handle.changed().await.unwrap();
        assert_eq!(refreshed.polls, 2);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_visible_again_before_stale_does_not_poll() {
        let source = ScriptedSource::new(Vec::new());
        let tracker = OperationTracker::new(
            source.clone(),
            TrackerConfig {
                background_polling: false,
                stale_after: Duration::from_secs(30),
                ..config()
            },
        )
        .unwrap();
        let mut handle = tracker.track("alice");
        handle.changed().await.unwrap();

        handle.set_visible(false);
        tokio::time::sleep(Duration::from_secs(5)).await;
        handle.set_visible(true);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(source.requests().len(), 1);
        assert_eq!(handle.snapshot().polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_polls_immediately() {
        let source = ScriptedSource::new(Vec::new());
        let tracker = OperationTracker::new(source.clone(), config()).unwrap();
        let mut handle = tracker.track("alice");
        handle.changed().await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        let asked_at = Instant::now();
        handle.refresh();
        let refreshed = handle.changed().await.unwrap();

        assert_eq!(refreshed.polls, 2);
        assert_eq!(source.requests().len(), 2);
        assert!(asked_at.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_polling_continues_when_hidden() {
        let source = ScriptedSource::new(Vec::new());
        let tracker = OperationTracker::new(
            source.clone(),
            TrackerConfig {
                background_polling: true,
                ..config()
            },
        )
        .unwrap();
        let mut handle = tracker.track("alice");
        handle.changed().await.unwrap();

        handle.set_visible(false);
        handle.changed().await.unwrap();
        handle.changed().await.unwrap();
        assert_eq!(source.requests().len(), 3);
    }

    /// Blocks every poll until released
    struct GatedSource {
        started: Notify,
        release: Notify,
    }

    #[async_trait]
    impl StatusSource for GatedSource {
        async fn poll(&self, _request: &PollRequest) -> Result<StatusReport> {
            self.started.notify_one();
            self.release.notified().await;
            Ok(StatusReport::status("SUCCESS"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_result_discarded_after_cancel() {
        let source = Arc::new(GatedSource {
            started: Notify::new(),
            release: Notify::new(),
        });
        let tracker = OperationTracker::new(source.clone(), config()).unwrap();
        let mut handle = tracker.track("alice");

        source.started.notified().await;
        handle.cancel();
        source.release.notify_one();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let snapshot = handle.snapshot();
        assert_eq!(snapshot.status(), OperationStatus::Unknown);
        assert_eq!(snapshot.polls, 0);
        assert!(matches!(handle.wait_terminal().await, Err(Error::Cancelled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_creates_fresh_handle() {
        let source = ScriptedSource::new(vec![
            Ok(StatusReport::status("ERROR")),
            Ok(StatusReport::status("DEPLOYING")),
        ]);
        let tracker = OperationTracker::new(source.clone(), config()).unwrap();
        let mut handle = tracker.track("alice");
        let failed = handle.wait_terminal().await.unwrap();
        assert!(failed.is_error());

        let mut handle = tracker.restart(handle);
        let fresh = handle.changed().await.unwrap();
        assert_eq!(fresh.status(), OperationStatus::Deploying);
        assert_eq!(fresh.polls, 1);
    }
}
