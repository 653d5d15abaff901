//! Combine-latest over two independent streams.
//!
//! Used to join reactive history views (for example the PM2.5 and PM10
//! windows of a dashboard) into one stream of pairs.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::stream::{Fuse, FusedStream, Stream, StreamExt};

/// Stream returned by [`combine_latest`].
#[must_use = "streams do nothing unless polled"]
pub struct CombineLatest<A: Stream, B: Stream> {
    a: Fuse<A>,
    b: Fuse<B>,
    latest_a: Option<A::Item>,
    latest_b: Option<B::Item>,
}

impl<A: Stream + Unpin, B: Stream + Unpin> Unpin for CombineLatest<A, B> {}

/// Pair the latest values of `a` and `b`.
///
/// Emits once both sides have produced a value, then again whenever either
/// side produces a new one. Ends when both inputs end, or as soon as one input
/// ends without ever having produced a value.
pub fn combine_latest<A, B>(a: A, b: B) -> CombineLatest<A, B>
where
    A: Stream + Unpin,
    B: Stream + Unpin,
    A::Item: Clone,
    B::Item: Clone,
{
    CombineLatest {
        a: a.fuse(),
        b: b.fuse(),
        latest_a: None,
        latest_b: None,
    }
}

impl<A, B> Stream for CombineLatest<A, B>
where
    A: Stream + Unpin,
    B: Stream + Unpin,
    A::Item: Clone,
    B::Item: Clone,
{
    type Item = (A::Item, B::Item);

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let mut updated = false;

        if let Poll::Ready(Some(value)) = this.a.poll_next_unpin(cx) {
            this.latest_a = Some(value);
            updated = true;
        }
        if let Poll::Ready(Some(value)) = this.b.poll_next_unpin(cx) {
            this.latest_b = Some(value);
            updated = true;
        }

        if updated && let (Some(a), Some(b)) = (&this.latest_a, &this.latest_b) {
            return Poll::Ready(Some((a.clone(), b.clone())));
        }

        let a_done = this.a.is_terminated();
        let b_done = this.b.is_terminated();
        if (a_done && b_done)
            || (a_done && this.latest_a.is_none())
            || (b_done && this.latest_b.is_none())
        {
            return Poll::Ready(None);
        }

        if updated {
            // A side yielded without registering a waker; poll again.
            cx.waker().wake_by_ref();
        }
        Poll::Pending
    }
}

impl<A, B> FusedStream for CombineLatest<A, B>
where
    A: Stream + Unpin,
    B: Stream + Unpin,
    A::Item: Clone,
    B::Item: Clone,
{
    fn is_terminated(&self) -> bool {
        let a_done = self.a.is_terminated();
        let b_done = self.b.is_terminated();
        (a_done && b_done)
            || (a_done && self.latest_a.is_none())
            || (b_done && self.latest_b.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use futures::stream;

    #[tokio::test]
    async fn test_waits_for_both_sides() {
        let (tx_a, rx_a) = mpsc::unbounded::<i32>();
        let (tx_b, rx_b) = mpsc::unbounded::<&str>();
        let mut combined = combine_latest(rx_a, rx_b);

        tx_a.unbounded_send(1).unwrap();
        tx_a.unbounded_send(2).unwrap();
        tx_b.unbounded_send("x").unwrap();

        assert_eq!(combined.next().await, Some((1, "x")));
        assert_eq!(combined.next().await, Some((2, "x")));

        tx_b.unbounded_send("y").unwrap();
        assert_eq!(combined.next().await, Some((2, "y")));

        tx_a.unbounded_send(3).unwrap();
        assert_eq!(combined.next().await, Some((3, "y")));

        drop(tx_a);
        drop(tx_b);
        assert_eq!(combined.next().await, None);
    }

    #[tokio::test]
    async fn test_continues_after_one_side_ends() {
        let a = stream::iter(vec![1]);
        let (tx_b, rx_b) = mpsc::unbounded::<char>();
        let mut combined = combine_latest(a, rx_b);

        tx_b.unbounded_send('a').unwrap();
        assert_eq!(combined.next().await, Some((1, 'a')));

        tx_b.unbounded_send('b').unwrap();
        assert_eq!(combined.next().await, Some((1, 'b')));

        drop(tx_b);
        assert_eq!(combined.next().await, None);
        assert!(combined.is_terminated());
    }

    #[tokio::test]
    async fn test_ends_when_side_ends_empty() {
        let a = stream::iter(Vec::<i32>::new());
        let (_tx_b, rx_b) = mpsc::unbounded::<i32>();
        let mut combined = combine_latest(a, rx_b);
        assert_eq!(combined.next().await, None);
    }
}
