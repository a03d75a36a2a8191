//! Completion timestamping for outstanding receives.
//!
//! Draining a `FuturesUnordered` hands completions back in resolution order,
//! but the caller may observe them a little later. Wrapping each receive in
//! [`Stamped`] captures the instant the inner future actually resolved.

use pin_project_lite::pin_project;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::Instant;

pin_project! {
    /// A future tagged with a connection id that records when it resolved.
    pub struct Stamped<F> {
        id: usize,
        #[pin]
        inner: F,
    }
}

impl<F> Stamped<F> {
    pub fn new(id: usize, inner: F) -> Self {
        Self { id, inner }
    }
}

/// Output of a [`Stamped`] future.
#[derive(Debug)]
pub struct StampedOutput<T> {
    pub id: usize,
    pub at: Instant,
    pub value: T,
}

impl<F: Future> Future for Stamped<F> {
    type Output = StampedOutput<F::Output>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.inner.poll(cx) {
            Poll::Ready(value) => Poll::Ready(StampedOutput {
                id: *this.id,
                at: Instant::now(),
                value,
            }),
            Poll::Pending => Poll::Pending,
        }
    }
}
