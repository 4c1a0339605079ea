use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::lifecycle::{shutdown_pair, OneShotTimer, ShutdownSignal, ShutdownTrigger};
use crate::media::{
    DegradedTransport, MediaSession, MediaSessionState, RenderSink, RenderTarget,
    SessionNegotiator,
};

/// State of one negotiation episode. Every method returns the new state only
/// when a transition happened; late or duplicate outcomes are no-ops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    state: MediaSessionState,
    torn_down: bool,
}

impl Default for Episode {
    fn default() -> Self {
        Self::new()
    }
}

impl Episode {
    pub fn new() -> Self {
        Self {
            state: MediaSessionState::Negotiating,
            torn_down: false,
        }
    }

    pub fn state(&self) -> MediaSessionState {
        self.state
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn on_negotiated(&mut self) -> Option<MediaSessionState> {
        self.leave_negotiating(MediaSessionState::LiveNegotiated)
    }

    pub fn on_failed(&mut self) -> Option<MediaSessionState> {
        self.leave_negotiating(MediaSessionState::LiveDegraded)
    }

    pub fn on_deadline(&mut self) -> Option<MediaSessionState> {
        self.leave_negotiating(MediaSessionState::LiveDegraded)
    }

    /// The active media path went away after the episode settled.
    pub fn on_media_lost(&mut self) -> Option<MediaSessionState> {
        if self.torn_down {
            return None;
        }
        match self.state {
            MediaSessionState::LiveNegotiated | MediaSessionState::LiveDegraded => {
                self.state = MediaSessionState::Disconnected;
                Some(self.state)
            }
            _ => None,
        }
    }

    pub fn teardown(&mut self) {
        self.torn_down = true;
    }

    fn leave_negotiating(&mut self, next: MediaSessionState) -> Option<MediaSessionState> {
        if self.torn_down || self.state != MediaSessionState::Negotiating {
            return None;
        }
        self.state = next;
        Some(next)
    }
}

/// Owning handle for a running player. Dropping it tears the player down.
#[derive(Debug)]
pub struct PlayerHandle {
    state: watch::Receiver<MediaSessionState>,
    render: watch::Receiver<RenderTarget>,
    shutdown: ShutdownTrigger,
    task: JoinHandle<()>,
}

impl PlayerHandle {
    pub fn state(&self) -> watch::Receiver<MediaSessionState> {
        self.state.clone()
    }

    pub fn render(&self) -> watch::Receiver<RenderTarget> {
        self.render.clone()
    }

    pub fn current(&self) -> MediaSessionState {
        *self.state.borrow()
    }

    /// Idempotent.
    pub fn dispose(&self) {
        self.shutdown.trigger();
    }

    pub async fn join(self) {
        self.shutdown.trigger();
        if let Err(err) = self.task.await {
            warn!(error = %err, "player task ended abnormally");
        }
    }
}

/// Starts a negotiation episode: a negotiator attempt raced against the
/// fallback deadline, then whichever media path won until teardown.
pub fn spawn_player<N, F>(negotiator: N, fallback: F, deadline: Duration) -> PlayerHandle
where
    N: SessionNegotiator + 'static,
    F: DegradedTransport + 'static,
{
    let (state_tx, state_rx) = watch::channel(MediaSessionState::Negotiating);
    let (render_tx, render_rx) = watch::channel(RenderTarget::None);
    let (trigger, signal) = shutdown_pair();

    let player = Player {
        negotiator,
        fallback,
        deadline,
        episode: Episode::new(),
        state: state_tx,
        render: Arc::new(render_tx),
        shutdown: signal,
    };
    let task = tokio::spawn(player.run());

    PlayerHandle {
        state: state_rx,
        render: render_rx,
        shutdown: trigger,
        task,
    }
}

struct Player<N, F> {
    negotiator: N,
    fallback: F,
    deadline: Duration,
    episode: Episode,
    state: watch::Sender<MediaSessionState>,
    render: RenderSink,
    shutdown: ShutdownSignal,
}

enum Outcome<S> {
    TornDown,
    Expired,
    Negotiated(S),
    Failed(String),
}

impl<N, F> Player<N, F>
where
    N: SessionNegotiator,
    F: DegradedTransport,
{
    async fn run(mut self) {
        let outcome = self.negotiate().await;

        match outcome {
            Outcome::TornDown => {}
            Outcome::Expired => {
                let next = self.episode.on_deadline();
                self.publish(next);
                info!(
                    deadline_ms = self.deadline.as_millis() as u64,
                    "negotiation deadline expired, falling back"
                );
                self.run_degraded().await;
            }
            Outcome::Failed(reason) => {
                let next = self.episode.on_failed();
                self.publish(next);
                info!(%reason, "negotiation failed, falling back");
                self.run_degraded().await;
            }
            Outcome::Negotiated(session) => {
                let next = self.episode.on_negotiated();
                self.publish(next);
                info!("live session negotiated");
                self.run_negotiated(session).await;
            }
        }

        self.episode.teardown();
        debug!(state = ?self.episode.state(), "player stopped");
    }

    async fn negotiate(&mut self) -> Outcome<N::Session> {
        let mut deadline = OneShotTimer::new();
        deadline.arm(self.deadline);

        // The negotiation future is dropped on every branch but the last,
        // which cancels the attempt and releases its peer session.
        let attempt = self.negotiator.negotiate(self.render.clone());
        tokio::pin!(attempt);

        tokio::select! {
            biased;
            _ = self.shutdown.wait() => {
                deadline.cancel();
                self.episode.teardown();
                Outcome::TornDown
            }
            _ = deadline.fired() => Outcome::Expired,
            result = &mut attempt => {
                deadline.cancel();
                match result {
                    Ok(session) => Outcome::Negotiated(session),
                    Err(err) => Outcome::Failed(err.to_string()),
                }
            }
        }
    }

    async fn run_negotiated(&mut self, mut session: N::Session) {
        let lost = tokio::select! {
            biased;
            _ = self.shutdown.wait() => false,
            _ = session.closed() => true,
        };

        if lost {
            let next = self.episode.on_media_lost();
            self.publish(next);
            warn!("negotiated session lost");
            self.shutdown.wait().await;
        }
        self.episode.teardown();
        session.close().await;
    }

    async fn run_degraded(&mut self) {
        let result = tokio::select! {
            biased;
            _ = self.shutdown.wait() => return,
            result = self.fallback.pull(self.render.clone()) => result,
        };

        if let Err(err) = result {
            warn!(error = %err, "fallback stream lost");
        }
        let next = self.episode.on_media_lost();
        self.publish(next);
        self.shutdown.wait().await;
    }

    fn publish(&self, next: Option<MediaSessionState>) {
        if self.shutdown.is_triggered() {
            return;
        }
        if let Some(state) = next {
            debug!(?state, "media session state");
            self.state.send_replace(state);
        }
    }
}
