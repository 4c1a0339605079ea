use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::error::Elapsed;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError};
use crate::lifecycle::{shutdown_pair, ShutdownSignal, ShutdownTrigger};
use crate::snapshot::{PolledState, StreamStatus, SystemHealth};

#[async_trait]
pub trait PollSource: Send + Sync + 'static {
    type Output: Clone + Send + Sync + 'static;

    fn name(&self) -> &'static str;
    async fn fetch(&self) -> Result<Self::Output, ApiError>;
}

pub struct StreamStatusSource(pub ApiClient);

pub struct SystemHealthSource(pub ApiClient);

#[async_trait]
impl PollSource for StreamStatusSource {
    type Output = StreamStatus;

    fn name(&self) -> &'static str {
        "stream_status"
    }

    async fn fetch(&self) -> Result<StreamStatus, ApiError> {
        self.0.stream_status().await
    }
}

#[async_trait]
impl PollSource for SystemHealthSource {
    type Output = SystemHealth;

    fn name(&self) -> &'static str {
        "system_health"
    }

    async fn fetch(&self) -> Result<SystemHealth, ApiError> {
        self.0.system_health().await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub interval: Duration,
    pub request_timeout: Duration,
}

impl PollerConfig {
    pub fn new(interval: Duration, request_timeout: Duration) -> Self {
        Self {
            interval,
            request_timeout: request_timeout.min(interval),
        }
    }
}

/// Owning handle for one polling loop.
#[derive(Debug)]
pub struct PollerHandle<T> {
    state: watch::Receiver<PolledState<T>>,
    refresh: mpsc::Sender<()>,
    shutdown: ShutdownTrigger,
    task: JoinHandle<()>,
}

impl<T: Clone> PollerHandle<T> {
    pub fn state(&self) -> watch::Receiver<PolledState<T>> {
        self.state.clone()
    }

    pub fn current(&self) -> PolledState<T> {
        self.state.borrow().clone()
    }

    /// Requests one immediate out-of-band poll. The interval schedule is not
    /// touched; a refresh already queued absorbs this one.
    pub fn refresh(&self) {
        let _ = self.refresh.try_send(());
    }

    pub fn dispose(&self) {
        self.shutdown.trigger();
    }

    pub async fn join(self) {
        self.shutdown.trigger();
        if let Err(err) = self.task.await {
            warn!(error = %err, "poller task ended abnormally");
        }
    }
}

/// Polls `source` once immediately, then every `config.interval`.
pub fn spawn_poller<S: PollSource>(source: S, config: PollerConfig) -> PollerHandle<S::Output> {
    let (state_tx, state_rx) = watch::channel(PolledState::default());
    let (refresh_tx, refresh_rx) = mpsc::channel(1);
    let (trigger, signal) = shutdown_pair();

    let poller = Poller {
        source: Arc::new(source),
        config,
        state: state_tx,
        refresh: refresh_rx,
        shutdown: signal,
        in_flight: FuturesUnordered::new(),
        issued: 0,
        applied: None,
    };
    let task = tokio::spawn(poller.run());

    PollerHandle {
        state: state_rx,
        refresh: refresh_tx,
        shutdown: trigger,
        task,
    }
}

type Request<T> = BoxFuture<'static, (u64, Result<Result<T, ApiError>, Elapsed>)>;

struct Poller<S: PollSource> {
    source: Arc<S>,
    config: PollerConfig,
    state: watch::Sender<PolledState<S::Output>>,
    refresh: mpsc::Receiver<()>,
    shutdown: ShutdownSignal,
    in_flight: FuturesUnordered<Request<S::Output>>,
    issued: u64,
    applied: Option<u64>,
}

impl<S: PollSource> Poller<S> {
    async fn run(mut self) {
        let period = self.config.interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        self.issue();

        // Requests run alongside the ticker; a slow one never delays a tick.
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => break,
                Some((seq, result)) = self.in_flight.next() => self.apply(seq, result),
                Some(()) = self.refresh.recv() => self.issue(),
                _ = ticker.tick() => self.issue(),
            }
        }
        // Dropping the pending requests cancels them; none can land after teardown.
        self.in_flight.clear();
        debug!(resource = self.source.name(), "poller stopped");
    }

    fn issue(&mut self) {
        let seq = self.issued;
        self.issued += 1;
        let source = self.source.clone();
        let request_timeout = self.config.request_timeout;
        self.in_flight.push(
            async move { (seq, timeout(request_timeout, source.fetch()).await) }.boxed(),
        );
    }

    fn apply(&mut self, seq: u64, result: Result<Result<S::Output, ApiError>, Elapsed>) {
        if self.shutdown.is_triggered() {
            return;
        }
        // A request overtaken by a newer finished one is stale.
        if self.applied.is_some_and(|applied| seq < applied) {
            return;
        }
        self.applied = Some(seq);

        let name = self.source.name();
        match result {
            Ok(Ok(snapshot)) => {
                self.state.send_modify(|state| state.record_ok(snapshot));
            }
            Ok(Err(err)) => {
                warn!(resource = name, error = %err, "poll failed");
                self.state.send_modify(|state| state.record_err(err.to_string()));
            }
            Err(_) => {
                warn!(resource = name, "poll timed out");
                self.state
                    .send_modify(|state| state.record_err(ApiError::Timeout.to_string()));
            }
        }
    }
}
