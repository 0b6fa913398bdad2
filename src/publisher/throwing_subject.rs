use std::{
    error::Error,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    future::{self, Either},
    Stream,
};

use super::{
    subject_impl::{lock, Registration, Shared, SubjectImpl, Terminal},
    Publisher,
};
use crate::SendError;

/// A subject that terminates with a failure instead of a clean end.
///
/// Once [`ThrowingSubject::fail`] has been called, every consumer, past or
/// future, receives that failure on every `next()`.
pub struct ThrowingSubject<Output, Failure> {
    inner: Shared<Output, Failure>,
}

impl<Output, Failure> Clone for ThrowingSubject<Output, Failure> {
    fn clone(&self) -> Self {
        ThrowingSubject {
            inner: self.inner.clone(),
        }
    }
}

impl<Output, Failure> Default for ThrowingSubject<Output, Failure> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Output, Failure> ThrowingSubject<Output, Failure> {
    pub fn new() -> Self {
        ThrowingSubject {
            inner: SubjectImpl::shared(),
        }
    }

    /// Deliver `value` to a consumer. Never waits; a no-op once failed.
    pub fn send(&self, value: Output) {
        if self.try_send(value).is_err() {
            log::debug!("ThrowingSubject failed, value dropped");
        }
    }

    pub fn try_send(&self, value: Output) -> Result<(), SendError<Output>> {
        lock(&self.inner).send(value)
    }

    /// Terminate with `failure`. Only the first failure is kept.
    pub fn fail(&self, failure: Failure)
    where
        Failure: Error,
    {
        log::debug!("ThrowingSubject fail: {}", failure);

        if !lock(&self.inner).terminate(Terminal::Failed(failure)) {
            log::debug!("ThrowingSubject already terminated, failure ignored");
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

impl<O, F> Publisher for ThrowingSubject<O, F>
where
    F: Error + Clone,
{
    type Output = O;

    type Failure = F;

    type Stream = ThrowingSubjectStream<O, F>;

    fn receive(&self) -> Self::Stream {
        ThrowingSubjectStream {
            registration: Registration::new(self.inner.clone()),
        }
    }
}

/// Consumer side of a [`ThrowingSubject`], created by [`Publisher::receive`].
pub struct ThrowingSubjectStream<Output, Failure> {
    registration: Registration<Output, Failure>,
}

impl<Output, Failure> ThrowingSubjectStream<Output, Failure>
where
    Failure: Clone,
{
    /// Wait for the next value. Raises the subject's failure once it has
    /// failed; `Ok(None)` only when cancelled.
    pub async fn next(&mut self) -> Result<Option<Output>, Failure> {
        self.registration.next().await.transpose()
    }

    /// Like [`ThrowingSubjectStream::next`], but resolves to `Ok(None)` as
    /// soon as `cancel` completes.
    pub async fn next_until<C>(&mut self, cancel: C) -> Result<Option<Output>, Failure>
    where
        C: Future,
    {
        futures::pin_mut!(cancel);

        match future::select(self.registration.next(), cancel).await {
            Either::Left((item, _)) => item.transpose(),
            Either::Right(_) => {
                log::debug!("next() cancelled");
                Ok(None)
            }
        }
    }
}

impl<Output, Failure> Stream for ThrowingSubjectStream<Output, Failure>
where
    Failure: Clone,
{
    type Item = Result<Output, Failure>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.registration.poll_recv(cx)
    }
}
