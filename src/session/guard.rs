use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::store::SessionStore;
use super::update::UserId;

/// Default "still working" interval
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(5);

/// Shortest heartbeat accepted; the ticker cannot run on a zero period
const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// How a guarded call ended
#[derive(Debug, PartialEq, Eq)]
pub enum FlightOutcome<T> {
    Completed(T),
    /// The user (or a restart) cancelled the flight
    Cancelled,
    /// The guard-level deadline elapsed
    TimedOut,
}

/// Per-user single-flight controller for slow external calls.
///
/// The flight slot lives in the session store, so "processing" and the
/// cancellation handle are one value: present together or absent together.
#[derive(Clone)]
pub struct TaskGuard {
    store: Arc<SessionStore>,
    heartbeat: Duration,
    deadline: Option<Duration>,
}

impl TaskGuard {
    pub fn new(store: Arc<SessionStore>, heartbeat: Duration) -> Self {
        Self {
            store,
            heartbeat: heartbeat.max(MIN_HEARTBEAT),
            deadline: None,
        }
    }

    /// Cancel flights automatically once `deadline` has elapsed
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Claim the user's flight slot. `None` means something is already running
    /// and the caller must not start anything.
    pub fn try_start(&self, user: UserId) -> Option<Flight> {
        let (ticket, token) = self.store.begin_flight(user)?;
        tracing::info!(user_id = user, ticket, "flight started");
        Some(Flight {
            user,
            ticket,
            token,
            store: self.store.clone(),
            heartbeat: self.heartbeat,
            deadline: self.deadline,
        })
    }

    /// Request cancellation of the user's flight, if there is one.
    ///
    /// The slot stays registered until the flight itself finishes, so a
    /// `try_start` racing with the cancel still sees the user as busy.
    pub fn cancel_if_running(&self, user: UserId) -> bool {
        let Some(token) = self.store.flight_token(user) else {
            return false;
        };
        if !token.is_cancelled() {
            token.cancel();
            tracing::info!(user_id = user, "cancel signal sent");
        }
        true
    }

    /// Drop the user's flight slot unconditionally
    pub fn finish(&self, user: UserId) {
        if self.store.end_flight(user, None) {
            tracing::debug!(user_id = user, "flight slot released");
        }
    }

    pub fn is_running(&self, user: UserId) -> bool {
        self.store.is_processing(user)
    }
}

/// One claimed flight. Dropping it releases the slot, whichever way the
/// wrapped call ended.
pub struct Flight {
    user: UserId,
    ticket: u64,
    token: CancellationToken,
    store: Arc<SessionStore>,
    heartbeat: Duration,
    deadline: Option<Duration>,
}

impl Flight {
    pub fn user(&self) -> UserId {
        self.user
    }

    /// Token to hand to the external call
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Drive `call` to completion while `heartbeat` ticks, racing both
    /// against cancellation and the optional deadline.
    ///
    /// The heartbeat runs on a child of the flight token and is joined before
    /// this returns, so it never outlives the call.
    pub async fn run<T, Fut, H, HFut>(&self, call: Fut, heartbeat: H) -> FlightOutcome<T>
    where
        Fut: Future<Output = T>,
        H: FnMut() -> HFut,
        HFut: Future<Output = ()>,
    {
        let beat_stop = self.token.child_token();
        let token = self.token.clone();
        let deadline = self.deadline;

        let guarded = async {
            let expiry = async {
                match deadline {
                    Some(d) => tokio::time::sleep(d).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => FlightOutcome::Cancelled,
                _ = expiry => {
                    token.cancel();
                    FlightOutcome::TimedOut
                }
                out = call => FlightOutcome::Completed(out),
            };
            beat_stop.cancel();
            outcome
        };

        let (outcome, ()) = tokio::join!(
            guarded,
            heartbeat_loop(beat_stop.clone(), self.heartbeat, heartbeat)
        );
        match &outcome {
            FlightOutcome::Completed(_) => {}
            FlightOutcome::Cancelled => tracing::info!(user_id = self.user, "flight cancelled"),
            FlightOutcome::TimedOut => tracing::warn!(user_id = self.user, "flight deadline elapsed"),
        }
        outcome
    }

    /// Run the flight as a background task and hand its outcome to `on_done`.
    ///
    /// The slot is released after `on_done` returns, so the user stays busy
    /// until the result has been delivered.
    pub fn spawn<T, Fut, H, HFut, D, DFut>(self, call: Fut, heartbeat: H, on_done: D) -> JoinHandle<()>
    where
        T: Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        H: FnMut() -> HFut + Send + 'static,
        HFut: Future<Output = ()> + Send + 'static,
        D: FnOnce(FlightOutcome<T>) -> DFut + Send + 'static,
        DFut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let outcome = self.run(call, heartbeat).await;
            on_done(outcome).await;
            drop(self);
        })
    }
}

impl Drop for Flight {
    fn drop(&mut self) {
        if self.store.end_flight(self.user, Some(self.ticket)) {
            tracing::info!(user_id = self.user, ticket = self.ticket, "flight finished");
        }
    }
}

async fn heartbeat_loop<H, HFut>(stop: CancellationToken, every: Duration, mut beat: H)
where
    H: FnMut() -> HFut,
    HFut: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => break,
                    _ = beat() => {}
                }
            }
        }
    }
}
