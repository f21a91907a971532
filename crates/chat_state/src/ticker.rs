//! Tick sources that pace a thinking pipeline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// A source of "advance now" signals.
#[async_trait]
pub trait Ticker: Send {
    /// Wait for the next tick. Returns `false` once the source is exhausted.
    ///
    /// Must be cancel-safe: it is polled inside `select!`.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticker. The first tick fires one period after creation.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        // interval_at panics on a zero period
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Drives any number of [`ManualTicker`]s by hand.
#[derive(Clone)]
pub struct TickSource {
    sender: broadcast::Sender<()>,
}

impl Default for TickSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    /// A ticker that fires on every later call to [`TickSource::tick`].
    pub fn ticker(&self) -> ManualTicker {
        ManualTicker {
            receiver: self.sender.subscribe(),
        }
    }

    /// Fire one tick. Returns the number of tickers that will see it.
    pub fn tick(&self) -> usize {
        self.sender.send(()).unwrap_or(0)
    }
}

/// Ticker stepped explicitly through a [`TickSource`].
pub struct ManualTicker {
    receiver: broadcast::Receiver<()>,
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        match self.receiver.recv().await {
            Ok(()) => true,
            // Collapsed ticks still count as one.
            Err(broadcast::error::RecvError::Lagged(_)) => true,
            Err(broadcast::error::RecvError::Closed) => false,
        }
    }
}
