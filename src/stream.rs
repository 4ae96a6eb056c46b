//! Stream rate control for visualization consumers.
//!
//! Dashboards repaint at fixed cadences; devices emit whenever they feel
//! like it. [`ThrottleExt::throttle`] bridges the two with latest-wins
//! semantics — when several frames arrive within one interval only the most
//! recent is delivered, matching the pipeline's freshest-data-first
//! backpressure policy. [`DeliveryRate`] expresses a consumer's ceiling.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use serde::{Deserialize, Serialize};
use tokio::time::{Interval, interval};

/// Delivery rate for a frame subscription.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeliveryRate {
    /// Every extracted frame, as fast as it arrives
    Native,
    /// At most `hz` frames per second, latest frame wins within an interval
    Max(u32),
}

impl DeliveryRate {
    /// Throttle interval implied by this rate, if any. `Max(0)` degrades to
    /// unthrottled rather than dividing by zero.
    pub fn throttle_interval(self) -> Option<Duration> {
        match self {
            DeliveryRate::Native | DeliveryRate::Max(0) => None,
            DeliveryRate::Max(hz) => Some(Duration::from_secs_f64(1.0 / hz as f64)),
        }
    }
}

/// Extension trait to add latest-wins throttling to any stream.
pub trait ThrottleExt: Stream {
    /// Emit at most once per `duration`, delivering only the most recent
    /// item observed during each interval.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// A stream combinator that bounds emission rate with latest-wins
    /// semantics.
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
    }
}

impl<S: Stream> Throttle<S> {
    /// Create a new throttled stream.
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Delay missed ticks instead of bursting to catch up
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Self { stream, interval, pending: None }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        ready!(this.interval.poll_tick(cx));

        // Drain whatever is available, keeping only the latest item
        loop {
            match this.stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    *this.pending = Some(item);
                }
                Poll::Ready(None) => {
                    return Poll::Ready(this.pending.take());
                }
                Poll::Pending => {
                    return Poll::Ready(this.pending.take());
                }
            }
        }
    }
}
