use std::{
    convert::Infallible,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    future::{self, Either},
    Sink, Stream,
};

use super::{
    subject_impl::{lock, Registration, Shared, SubjectImpl, Terminal},
    Publisher,
};
use crate::SendError;

/// A subject whose consumers see either values or a clean end of sequence.
///
/// Every value passed to [`Subject::send`] reaches exactly one consumer: the
/// one that has been waiting longest, or else the next one to ask. All clones
/// share the same state.
pub struct Subject<Output> {
    inner: Shared<Output, Infallible>,
}

impl<Output> Clone for Subject<Output> {
    fn clone(&self) -> Self {
        Subject {
            inner: self.inner.clone(),
        }
    }
}

impl<Output> Default for Subject<Output> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Output> Subject<Output> {
    pub fn new() -> Self {
        Subject {
            inner: SubjectImpl::shared(),
        }
    }

    /// Deliver `value` to a consumer. Never waits; a no-op once finished.
    pub fn send(&self, value: Output) {
        if self.try_send(value).is_err() {
            log::debug!("Subject finished, value dropped");
        }
    }

    /// Like [`Subject::send`], but hands the value back once finished.
    pub fn try_send(&self, value: Output) -> Result<(), SendError<Output>> {
        lock(&self.inner).send(value)
    }

    /// End the sequence for every current and future consumer.
    pub fn finish(&self) {
        if lock(&self.inner).terminate(Terminal::Finished) {
            log::debug!("Subject finished");
        }
    }

    pub fn is_terminated(&self) -> bool {
        lock(&self.inner).is_terminated()
    }

    /// Number of consumers currently suspended in `next()`.
    pub fn waiting_consumers(&self) -> usize {
        lock(&self.inner).waiting_consumers()
    }
}

impl<O> Publisher for Subject<O> {
    type Output = O;

    type Failure = Infallible;

    type Stream = SubjectStream<O>;

    fn receive(&self) -> Self::Stream {
        SubjectStream {
            registration: Registration::new(self.inner.clone()),
        }
    }
}

impl<Output> Sink<Output> for Subject<Output> {
    type Error = SendError<Output>;

    fn start_send(self: Pin<&mut Self>, item: Output) -> Result<(), Self::Error> {
        self.try_send(item)
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.finish();

        Poll::Ready(Ok(()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Consumer side of a [`Subject`], created by [`Publisher::receive`].
pub struct SubjectStream<Output> {
    registration: Registration<Output, Infallible>,
}

impl<Output> SubjectStream<Output> {
    /// Wait for the next value, or `None` once the subject is finished.
    ///
    /// Dropping the returned future while it waits withdraws this consumer.
    pub async fn next(&mut self) -> Option<Output> {
        self.registration.next().await.map(unwrap_infallible)
    }

    /// Like [`SubjectStream::next`], but resolves to `None` as soon as
    /// `cancel` completes.
    pub async fn next_until<C>(&mut self, cancel: C) -> Option<Output>
    where
        C: Future,
    {
        futures::pin_mut!(cancel);

        match future::select(self.registration.next(), cancel).await {
            Either::Left((item, _)) => item.map(unwrap_infallible),
            Either::Right(_) => {
                log::debug!("next() cancelled");
                None
            }
        }
    }
}

impl<Output> Stream for SubjectStream<Output> {
    type Item = Output;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.registration
            .poll_recv(cx)
            .map(|item| item.map(unwrap_infallible))
    }
}

fn unwrap_infallible<Output>(result: Result<Output, Infallible>) -> Output {
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}
