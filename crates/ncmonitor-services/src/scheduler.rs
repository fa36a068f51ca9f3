use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use ncmonitor_core::{
    FailureKind, ServerConfig, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REQUEST_TIMEOUT_SECS,
};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::MetricsClient;
use crate::store::SnapshotStore;

/// Shortest period the poll timer runs at; smaller intervals are raised to it
const MIN_TICK_PERIOD: Duration = Duration::from_millis(10);

/// Progress reported by a running scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum PollEvent {
    CycleStarted {
        cycle: u64,
        servers: usize,
    },
    ServerPolled {
        cycle: u64,
        server: String,
        failure: Option<FailureKind>,
    },
    CycleFinished {
        cycle: u64,
        succeeded: usize,
        failed: usize,
    },
    Stopped {
        cycles: u64,
    },
}

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub cycle: u64,
    pub succeeded: usize,
    pub failed: usize,
    /// Cancellation interrupted the cycle; unfinished polls were discarded
    pub cancelled: bool,
}

/// Polls every configured server on a fixed interval and records the
/// results in a [`SnapshotStore`].
pub struct PollScheduler {
    client: MetricsClient,
    store: SnapshotStore,
    servers: Arc<Vec<ServerConfig>>,
    interval: Duration,
    timeout: Duration,
}

impl PollScheduler {
    pub fn new(client: MetricsClient, store: SnapshotStore, servers: Vec<ServerConfig>) -> Self {
        Self {
            client,
            store,
            servers: Arc::new(servers),
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn servers(&self) -> &[ServerConfig] {
        &self.servers
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Poll every server once, concurrently.
    ///
    /// A poll that completes after `cancel` fires is dropped without
    /// touching the store.
    #[instrument(skip(self, cancel, events), fields(servers = self.servers.len()))]
    pub async fn run_cycle(
        &self,
        cycle: u64,
        cancel: &CancellationToken,
        events: &UnboundedSender<PollEvent>,
    ) -> CycleSummary {
        let _ = events.send(PollEvent::CycleStarted {
            cycle,
            servers: self.servers.len(),
        });

        let polls = self
            .servers
            .iter()
            .map(|server| self.poll_server(server, cycle, cancel, events));
        let outcomes = join_all(polls).await;

        let mut summary = CycleSummary {
            cycle,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                Some(true) => summary.succeeded += 1,
                Some(false) => summary.failed += 1,
                None => summary.cancelled = true,
            }
        }

        if summary.cancelled {
            debug!("Cycle {} interrupted by cancellation", cycle);
            return summary;
        }

        debug!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Cycle {} finished",
            cycle
        );
        let _ = events.send(PollEvent::CycleFinished {
            cycle,
            succeeded: summary.succeeded,
            failed: summary.failed,
        });
        summary
    }

    /// Returns `None` when cancelled, otherwise whether the poll succeeded
    async fn poll_server(
        &self,
        server: &ServerConfig,
        cycle: u64,
        cancel: &CancellationToken,
        events: &UnboundedSender<PollEvent>,
    ) -> Option<bool> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = self.client.fetch(server, self.timeout) => result,
        };

        if cancel.is_cancelled() {
            debug!("Discarding result for '{}' after cancellation", server.name);
            return None;
        }

        let failure = result.failure_kind();
        self.store.record(&server.name, result);
        let _ = events.send(PollEvent::ServerPolled {
            cycle,
            server: server.name.clone(),
            failure,
        });
        Some(failure.is_none())
    }

    /// Start the poll loop on the tokio runtime.
    ///
    /// The first cycle runs immediately. Events stop after
    /// [`PollEvent::Stopped`].
    pub fn spawn(self) -> (SchedulerHandle, UnboundedReceiver<PollEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let refresh = Arc::new(Notify::new());
        let (interval_tx, interval_rx) = watch::channel(self.interval);

        let task = tokio::spawn(self.run(cancel.clone(), refresh.clone(), interval_rx, events_tx));

        let handle = SchedulerHandle {
            cancel,
            refresh,
            interval_tx,
            task: Some(task),
        };
        (handle, events_rx)
    }

    async fn run(
        self,
        cancel: CancellationToken,
        refresh: Arc<Notify>,
        mut interval_rx: watch::Receiver<Duration>,
        events: UnboundedSender<PollEvent>,
    ) -> u64 {
        let period = tick_period(*interval_rx.borrow_and_update());
        info!(
            servers = self.servers.len(),
            interval_secs = period.as_secs(),
            "Poll scheduler started"
        );

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut interval_open = true;
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                changed = interval_rx.changed(), if interval_open => {
                    if changed.is_err() {
                        interval_open = false;
                        continue;
                    }
                    let period = tick_period(*interval_rx.borrow_and_update());
                    info!(interval_secs = period.as_secs(), "Poll interval changed, fetching now");
                    ticker = delayed_ticker(period);
                }
                _ = refresh.notified() => {
                    debug!("Manual refresh requested");
                    ticker.reset();
                }
                _ = ticker.tick() => {}
            }

            cycles += 1;
            let summary = self.run_cycle(cycles, &cancel, &events).await;
            if summary.failed > 0 && summary.succeeded == 0 {
                warn!("Cycle {}: all {} servers failed", cycles, summary.failed);
            }
        }

        info!(cycles, "Poll scheduler stopped");
        let _ = events.send(PollEvent::Stopped { cycles });
        cycles
    }
}

fn tick_period(period: Duration) -> Duration {
    period.max(MIN_TICK_PERIOD)
}

/// Ticker whose first tick is one full `period` away
fn delayed_ticker(period: Duration) -> Interval {
    let period = tick_period(period);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Control side of a spawned [`PollScheduler`].
///
/// Dropping the handle cancels the loop without waiting for it.
pub struct SchedulerHandle {
    cancel: CancellationToken,
    refresh: Arc<Notify>,
    interval_tx: watch::Sender<Duration>,
    task: Option<JoinHandle<u64>>,
}

impl SchedulerHandle {
    /// Run a cycle now and restart the interval from it
    pub fn refresh_now(&self) {
        self.refresh.notify_one();
    }

    /// Change the poll interval; a cycle runs now and then every new interval
    pub fn set_interval(&self, interval: Duration) {
        self.interval_tx.send_replace(interval);
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the loop and wait for it to exit.
    ///
    /// Once this returns no poll started by the scheduler writes to the
    /// store. Returns the number of cycles that were started.
    pub async fn shutdown(mut self) -> u64 {
        self.cancel.cancel();
        let Some(task) = self.task.take() else {
            return 0;
        };
        match task.await {
            Ok(cycles) => cycles,
            Err(e) => {
                error!("Poll scheduler task failed: {}", e);
                0
            }
        }
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FIXTURE: &str = include_str!("../../ncmonitor-core/fixtures/serverinfo.json");
    const INFO_PATH: &str = "/ocs/v2.php/apps/serverinfo/api/v1/info";

    fn server(mock_server: &MockServer, name: &str) -> ServerConfig {
        ServerConfig {
            name: name.to_string(),
            base_url: format!("{}/{}", mock_server.uri(), name),
            token: "secret".to_string(),
            path: PathBuf::from(format!("ncmonitor_{}.txt", name)),
        }
    }

    async fn mixed_backend() -> MockServer {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(format!("/good{}", INFO_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_string(FIXTURE))
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/bad{}", INFO_PATH)))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        mock_server
    }

    fn scheduler(mock_server: &MockServer, store: &SnapshotStore) -> PollScheduler {
        PollScheduler::new(
            MetricsClient::new(),
            store.clone(),
            vec![server(mock_server, "good"), server(mock_server, "bad")],
        )
        .with_timeout(Duration::from_secs(5))
    }

    async fn next_finished(rx: &mut UnboundedReceiver<PollEvent>) -> (u64, usize, usize) {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for a cycle")
                .expect("event channel closed");
            if let PollEvent::CycleFinished {
                cycle,
                succeeded,
                failed,
            } = event
            {
                return (cycle, succeeded, failed);
            }
        }
    }

    #[tokio::test]
    async fn test_failing_server_does_not_affect_healthy_one() {
        let mock_server = mixed_backend().await;
        let store = SnapshotStore::new();
        let scheduler = scheduler(&mock_server, &store);
        let cancel = CancellationToken::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        for cycle in 1..=3 {
            let summary = scheduler.run_cycle(cycle, &cancel, &tx).await;
            assert_eq!(summary.succeeded, 1);
            assert_eq!(summary.failed, 1);
            assert!(!summary.cancelled);
        }

        let good = store.get("good").unwrap();
        assert!(good.latest.is_ok());
        assert_eq!(good.consecutive_failures, 0);

        let bad = store.get("bad").unwrap();
        assert_eq!(bad.latest.failure_kind(), Some(FailureKind::AuthRejected));
        assert_eq!(bad.consecutive_failures, 3);
        assert!(bad.last_success.is_none());
    }

    #[tokio::test]
    async fn test_cycle_events() {
        let mock_server = mixed_backend().await;
        let store = SnapshotStore::new();
        let scheduler = scheduler(&mock_server, &store);
        let (tx, mut rx) = mpsc::unbounded_channel();

        scheduler.run_cycle(7, &CancellationToken::new(), &tx).await;
        drop(tx);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(events.len(), 4);
        assert_eq!(events[0], PollEvent::CycleStarted { cycle: 7, servers: 2 });
        assert!(events.contains(&PollEvent::ServerPolled {
            cycle: 7,
            server: "bad".to_string(),
            failure: Some(FailureKind::AuthRejected),
        }));
        assert!(events.contains(&PollEvent::ServerPolled {
            cycle: 7,
            server: "good".to_string(),
            failure: None,
        }));
        assert_eq!(
            events[3],
            PollEvent::CycleFinished {
                cycle: 7,
                succeeded: 1,
                failed: 1
            }
        );
    }

    #[tokio::test]
    async fn test_spawned_scheduler_polls_immediately_and_stops() {
        let mock_server = mixed_backend().await;
        let store = SnapshotStore::new();
        let (handle, mut rx) = scheduler(&mock_server, &store)
            .with_interval(Duration::from_secs(3600))
            .spawn();

        assert_eq!(next_finished(&mut rx).await, (1, 1, 1));
        assert!(store.latest("good").unwrap().is_ok());
        assert!(!store.latest("bad").unwrap().is_ok());

        assert_eq!(handle.shutdown().await, 1);

        let mut stopped = false;
        while let Some(event) = rx.recv().await {
            if event == (PollEvent::Stopped { cycles: 1 }) {
                stopped = true;
            }
        }
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_refresh_now_runs_another_cycle() {
        let mock_server = mixed_backend().await;
        let store = SnapshotStore::new();
        let (handle, mut rx) = scheduler(&mock_server, &store)
            .with_interval(Duration::from_secs(3600))
            .spawn();

        assert_eq!(next_finished(&mut rx).await.0, 1);
        handle.refresh_now();
        assert_eq!(next_finished(&mut rx).await.0, 2);
        assert_eq!(store.get("bad").unwrap().consecutive_failures, 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_set_interval_fetches_now_then_uses_new_period() {
        let mock_server = mixed_backend().await;
        let store = SnapshotStore::new();
        let (handle, mut rx) = scheduler(&mock_server, &store)
            .with_interval(Duration::from_secs(3600))
            .spawn();

        assert_eq!(next_finished(&mut rx).await.0, 1);

        // A long new period still fetches right away
        handle.set_interval(Duration::from_secs(1800));
        assert_eq!(handle.interval(), Duration::from_secs(1800));
        let second = tokio::time::timeout(Duration::from_secs(3), next_finished(&mut rx))
            .await
            .expect("interval change should start a cycle at once");
        assert_eq!(second.0, 2);

        // Then nothing until the new period elapses
        assert!(
            tokio::time::timeout(Duration::from_millis(300), next_finished(&mut rx))
                .await
                .is_err()
        );

        handle.set_interval(Duration::from_millis(100));
        assert_eq!(next_finished(&mut rx).await.0, 3);
        assert_eq!(next_finished(&mut rx).await.0, 4);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_zero_interval_keeps_polling() {
        let mock_server = mixed_backend().await;
        let store = SnapshotStore::new();
        let (handle, mut rx) = scheduler(&mock_server, &store)
            .with_interval(Duration::ZERO)
            .spawn();

        assert_eq!(next_finished(&mut rx).await.0, 1);
        assert_eq!(next_finished(&mut rx).await.0, 2);
        assert!(store.latest("good").unwrap().is_ok());

        handle.set_interval(Duration::ZERO);
        next_finished(&mut rx).await;
        assert!(handle.is_running());

        assert!(handle.shutdown().await >= 3);

        let mut stopped = false;
        while let Some(event) = rx.recv().await {
            if matches!(event, PollEvent::Stopped { .. }) {
                stopped = true;
            }
        }
        assert!(stopped);
    }

    #[tokio::test]
    async fn test_shutdown_discards_in_flight_polls() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/slow{}", INFO_PATH)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(FIXTURE)
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&mock_server)
            .await;

        let store = SnapshotStore::new();
        let (handle, mut rx) = PollScheduler::new(
            MetricsClient::new(),
            store.clone(),
            vec![server(&mock_server, "slow")],
        )
        .with_timeout(Duration::from_secs(60))
        .spawn();

        let started = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(started, PollEvent::CycleStarted { cycle: 1, servers: 1 });
        assert!(handle.is_running());

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown should not wait for the request");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(store.is_empty());
    }
}
