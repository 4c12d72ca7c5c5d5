use super::Context;
use crate::error::{Error, WaitError};
use crate::metrics::ClientMetrics;

use tokio::time::Instant;

use std::future::Future;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The state refresh functions report for entities that answered with 404, so delete
/// operations can target it like any other state.
pub const DELETED: &str = "DELETED";

/// The result of one refresh: the refreshed object and the state it is in
pub type Refreshed<T> = Result<(T, String), Error>;

/// Polls `refresh` until it reports one of the `target` states. While the state is one of
/// `pending` the waiter keeps polling; any other state, a refresh error, cancellation and
/// running out of time all end the wait with an error.
pub struct StateChangeConf<F> {
    pending: Vec<String>,
    target: Vec<String>,
    refresh: F,
    timeout: Duration,
    delay: Duration,
    poll_interval: Duration,
    metrics: Option<ClientMetrics>,
}

fn owned(states: &[&str]) -> Vec<String> {
    states.iter().map(|state| (*state).to_owned()).collect()
}

impl<F> StateChangeConf<F> {
    pub fn new(pending: &[&str], target: &[&str], refresh: F) -> StateChangeConf<F> {
        StateChangeConf {
            pending: owned(pending),
            target: owned(target),
            refresh,
            timeout: DEFAULT_TIMEOUT,
            delay: Duration::from_secs(0),
            poll_interval: DEFAULT_POLL_INTERVAL,
            metrics: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Defers the first refresh
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn metrics(mut self, metrics: ClientMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl<F, Fut, T> StateChangeConf<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Refreshed<T>>,
{
    pub async fn wait_for_state(mut self, ctx: &Context) -> Result<T, Error> {
        let start = Instant::now();
        let mut last_state = String::new();

        if self.delay > Duration::from_secs(0) && ctx.sleep(self.delay).await.is_err() {
            return Err(WaitError::Cancelled { last_state }.into());
        }

        loop {
            if let Some(metrics) = self.metrics.as_ref() {
                metrics.waiter_poll();
            }
            let (object, state) = (self.refresh)().await?;
            if self.target.contains(&state) {
                log::debug!("Reached target state '{}'", state);
                return Ok(object);
            }
            if !self.pending.contains(&state) {
                return Err(WaitError::UnexpectedState {
                    state,
                    expected: self.target.clone(),
                }
                .into());
            }
            if state != last_state {
                log::debug!("Waiting for state '{}', currently '{}'", self.target.join(", "), state);
            }
            last_state = state;

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                return Err(WaitError::Timeout {
                    timeout: self.timeout,
                    last_state,
                    target: self.target.clone(),
                }
                .into());
            }
            let pause = std::cmp::min(self.poll_interval, self.timeout - elapsed);
            if ctx.sleep(pause).await.is_err() {
                return Err(WaitError::Cancelled { last_state }.into());
            }
        }
    }
}
