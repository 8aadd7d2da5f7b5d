//! Rate-limiting stream combinator with latest-wins semantics.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, ready};
use pin_project_lite::pin_project;
use tokio::time::{Interval, interval};

/// Extension trait adding throttling to any `Stream`.
pub trait ThrottleExt: Stream {
    /// Emit at most once per `duration`.
    ///
    /// If several items arrive within one interval, only the latest is
    /// emitted; the rest are discarded. Matches the bridge's
    /// freshness-over-completeness policy.
    fn throttle(self, duration: Duration) -> Throttle<Self>
    where
        Self: Sized,
    {
        Throttle::new(self, duration)
    }
}

impl<T: Stream> ThrottleExt for T {}

pin_project! {
    /// Stream combinator bounding the emission rate. See [`ThrottleExt`].
    pub struct Throttle<S: Stream> {
        #[pin]
        stream: S,
        interval: Interval,
        pending: Option<S::Item>,
        done: bool,
    }
}

impl<S: Stream> Throttle<S> {
    pub fn new(stream: S, duration: Duration) -> Self {
        let mut interval = interval(duration);
        // Delay rather than burst after a stall.
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        Self { stream, interval, pending: None, done: false }
    }
}

impl<S: Stream> Stream for Throttle<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if *this.done {
                return Poll::Ready(this.pending.take());
            }

            // Drain everything currently available, keeping the latest.
            loop {
                match this.stream.as_mut().poll_next(cx) {
                    Poll::Ready(Some(item)) => *this.pending = Some(item),
                    Poll::Ready(None) => {
                        *this.done = true;
                        break;
                    }
                    Poll::Pending => break,
                }
            }

            if *this.done {
                // Flush the held item without waiting for the next tick.
                return Poll::Ready(this.pending.take());
            }

            if this.pending.is_none() {
                // Nothing buffered; sleep until the source wakes us.
                return Poll::Pending;
            }

            ready!(this.interval.poll_tick(cx));
            if let Some(item) = this.pending.take() {
                return Poll::Ready(Some(item));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio_stream::wrappers::WatchStream;

    #[tokio::test]
    async fn emits_latest_of_a_burst() {
        let burst = futures::stream::iter(1..=100);
        let mut throttled = burst.throttle(Duration::from_millis(5));

        // First tick of a fresh interval fires immediately; the whole burst
        // is already available, so only the last item comes out.
        assert_eq!(throttled.next().await, Some(100));
        assert_eq!(throttled.next().await, None);
    }

    #[tokio::test]
    async fn paces_a_live_source() {
        let (tx, rx) = tokio::sync::watch::channel(0u64);
        let mut throttled = WatchStream::new(rx).throttle(Duration::from_millis(10));

        // Initial value flows through.
        assert_eq!(throttled.next().await, Some(0));

        let writer = tokio::spawn(async move {
            for i in 1..=20u64 {
                tx.send(i).unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            tx
        });

        // Far fewer than 20 emissions within the window, and the values
        // observed are monotonically increasing (latest-wins, no replay).
        let mut seen = Vec::new();
        while let Ok(Some(v)) =
            tokio::time::timeout(Duration::from_millis(50), throttled.next()).await
        {
            seen.push(v);
            if v == 20 {
                break;
            }
        }
        let tx = writer.await.unwrap();
        drop(tx);

        assert!(!seen.is_empty());
        assert!(seen.len() <= 10, "expected throttled emissions, got {}", seen.len());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
