use std::{
    collections::{HashMap, VecDeque},
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use crate::SendError;

/// Terminal state of a subject. Leaves `Active` at most once.
pub(crate) enum Terminal<Failure> {
    Active,
    Finished,
    Failed(Failure),
}

struct Waiter {
    id: u64,
    waker: Waker,
    /// Waiting inside a `Next` future, whose drop withdraws it. Only these
    /// waiters are handed values directly; a `Stream::poll_next` waiter
    /// cannot observe its step being dropped, so it is only woken.
    exclusive: bool,
}

/// State shared by every handle and consumer stream of one subject.
pub(crate) struct SubjectImpl<Output, Failure> {
    terminal: Terminal<Failure>,
    /// Values sent while no consumer was waiting.
    pending: VecDeque<Output>,
    /// Suspended consumers, earliest first.
    waiting: VecDeque<Waiter>,
    /// Values handed to a consumer that has not yet been polled to claim them.
    handoffs: HashMap<u64, Output>,
    next_id: u64,
}

pub(crate) type Shared<Output, Failure> = Arc<Mutex<SubjectImpl<Output, Failure>>>;

/// Every mutation leaves the state consistent before anything that could
/// panic runs, so a poisoned lock is still safe to use.
pub(crate) fn lock<Output, Failure>(
    shared: &Shared<Output, Failure>,
) -> MutexGuard<'_, SubjectImpl<Output, Failure>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<Output, Failure> SubjectImpl<Output, Failure> {
    pub(crate) fn new() -> Self {
        SubjectImpl {
            terminal: Terminal::Active,
            pending: VecDeque::new(),
            waiting: VecDeque::new(),
            handoffs: HashMap::new(),
            next_id: 0,
        }
    }

    pub(crate) fn shared() -> Shared<Output, Failure> {
        Arc::new(Mutex::new(Self::new()))
    }

    fn register(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn is_terminated(&self) -> bool {
        !matches!(self.terminal, Terminal::Active)
    }

    pub(crate) fn waiting_consumers(&self) -> usize {
        self.waiting.len()
    }

    /// Hand `value` to the earliest waiting consumer, or queue it for the next
    /// `next()` call when nobody is waiting.
    pub(crate) fn send(&mut self, value: Output) -> Result<(), SendError<Output>> {
        match self.terminal {
            Terminal::Active => {}
            Terminal::Finished => return Err(SendError::Finished(value)),
            Terminal::Failed(_) => return Err(SendError::Failed(value)),
        }

        self.offer(value, false);

        Ok(())
    }

    /// Hand `value` to the earliest exclusive waiter. Otherwise queue it and
    /// wake every stream waiter; the first to poll claims it and the rest
    /// wait again.
    fn offer(&mut self, value: Output, requeue: bool) {
        match self.waiting.iter().position(|waiter| waiter.exclusive) {
            Some(index) => {
                if let Some(waiter) = self.waiting.remove(index) {
                    log::trace!("hand off value to consumer {}", waiter.id);
                    self.handoffs.insert(waiter.id, value);
                    waiter.waker.wake();
                }
            }
            None => {
                log::trace!("no consumer waiting in next(), queue value");
                if requeue {
                    self.pending.push_front(value);
                } else {
                    self.pending.push_back(value);
                }

                for waiter in self.waiting.drain(..) {
                    waiter.waker.wake();
                }
            }
        }
    }

    /// Enter `terminal` if still active and resume every waiting consumer in
    /// the order they started waiting. Returns false if already terminated.
    pub(crate) fn terminate(&mut self, terminal: Terminal<Failure>) -> bool {
        if self.is_terminated() {
            return false;
        }

        self.terminal = terminal;

        for waiter in self.waiting.drain(..) {
            waiter.waker.wake();
        }

        true
    }

    fn try_recv(
        &mut self,
        id: u64,
        waker: &Waker,
        exclusive: bool,
    ) -> Poll<Option<Result<Output, Failure>>>
    where
        Failure: Clone,
    {
        let value = self
            .handoffs
            .remove(&id)
            .or_else(|| self.pending.pop_front());

        let ready = match (value, &self.terminal) {
            (Some(value), _) => Some(Ok(value)),
            (None, Terminal::Finished) => None,
            (None, Terminal::Failed(failure)) => Some(Err(failure.clone())),
            (None, Terminal::Active) => {
                match self.waiting.iter_mut().find(|waiter| waiter.id == id) {
                    Some(waiter) => {
                        waiter.waker.clone_from(waker);
                        waiter.exclusive = exclusive;
                    }
                    None => self.waiting.push_back(Waiter {
                        id,
                        waker: waker.clone(),
                        exclusive,
                    }),
                }

                return Poll::Pending;
            }
        };

        self.waiting.retain(|waiter| waiter.id != id);

        Poll::Ready(ready)
    }

    /// Withdraw consumer `id`. A value already handed to it is re-offered so
    /// it is never lost.
    fn abandon(&mut self, id: u64) {
        let before = self.waiting.len();
        self.waiting.retain(|waiter| waiter.id != id);

        if self.waiting.len() != before {
            log::debug!("consumer {} cancelled while waiting", id);
        }

        if let Some(value) = self.handoffs.remove(&id) {
            log::debug!("consumer {} cancelled before claiming its value", id);
            self.offer(value, true);
        }
    }
}

/// One consumer's identity within a subject.
///
/// Dropping it withdraws the consumer from the waiting queue.
pub(crate) struct Registration<Output, Failure> {
    inner: Shared<Output, Failure>,
    id: u64,
}

impl<Output, Failure> Registration<Output, Failure> {
    pub(crate) fn new(inner: Shared<Output, Failure>) -> Self {
        let id = lock(&inner).register();

        Registration { inner, id }
    }

    /// Poll on behalf of `Stream::poll_next`.
    pub(crate) fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Option<Result<Output, Failure>>>
    where
        Failure: Clone,
    {
        lock(&self.inner).try_recv(self.id, cx.waker(), false)
    }

    pub(crate) fn next(&mut self) -> Next<'_, Output, Failure> {
        Next {
            registration: self,
            done: false,
        }
    }

    fn abandon(&self) {
        lock(&self.inner).abandon(self.id);
    }
}

impl<Output, Failure> Drop for Registration<Output, Failure> {
    fn drop(&mut self) {
        self.abandon();
    }
}

/// Future for a single `next()` step.
///
/// Dropping it before completion is cancellation.
pub(crate) struct Next<'a, Output, Failure> {
    registration: &'a mut Registration<Output, Failure>,
    done: bool,
}

impl<'a, Output, Failure> Future for Next<'a, Output, Failure>
where
    Failure: Clone,
{
    type Output = Option<Result<Output, Failure>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let registration = &self.registration;
        let poll = lock(&registration.inner).try_recv(registration.id, cx.waker(), true);

        if poll.is_ready() {
            self.done = true;
        }

        poll
    }
}

impl<'a, Output, Failure> Drop for Next<'a, Output, Failure> {
    fn drop(&mut self) {
        if !self.done {
            self.registration.abandon();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;
    use futures::task::noop_waker;

    #[test]
    fn test_handoff_goes_to_earliest_waiter() {
        let mut subject = SubjectImpl::<i32, Infallible>::new();
        let waker = noop_waker();

        let first = subject.register();
        let second = subject.register();

        assert!(subject.try_recv(first, &waker, true).is_pending());
        assert!(subject.try_recv(second, &waker, true).is_pending());
        assert_eq!(subject.waiting_consumers(), 2);

        subject.send(7).unwrap();

        assert_eq!(subject.waiting_consumers(), 1);
        assert!(subject.pending.is_empty());
        assert!(subject.try_recv(second, &waker, true).is_pending());
        assert!(matches!(subject.try_recv(first, &waker, true), Poll::Ready(Some(Ok(7)))));
    }

    #[test]
    fn test_repolling_keeps_queue_position() {
        let mut subject = SubjectImpl::<i32, Infallible>::new();
        let waker = noop_waker();

        let first = subject.register();
        let second = subject.register();

        assert!(subject.try_recv(first, &waker, true).is_pending());
        assert!(subject.try_recv(second, &waker, true).is_pending());
        assert!(subject.try_recv(first, &waker, true).is_pending());
        assert_eq!(subject.waiting_consumers(), 2);

        subject.send(1).unwrap();

        assert!(matches!(subject.try_recv(first, &waker, true), Poll::Ready(Some(Ok(1)))));
    }

    #[test]
    fn test_abandoned_handoff_is_reoffered() {
        let mut subject = SubjectImpl::<&str, Infallible>::new();
        let waker = noop_waker();

        let first = subject.register();
        let second = subject.register();

        assert!(subject.try_recv(first, &waker, true).is_pending());
        assert!(subject.try_recv(second, &waker, true).is_pending());

        subject.send("x").unwrap();
        subject.abandon(first);

        assert_eq!(subject.waiting_consumers(), 0);
        assert!(matches!(subject.try_recv(second, &waker, true), Poll::Ready(Some(Ok("x")))));
    }

    #[test]
    fn test_abandoned_handoff_returns_to_head_of_queue() {
        let mut subject = SubjectImpl::<&str, Infallible>::new();
        let waker = noop_waker();

        let first = subject.register();
        let other = subject.register();

        assert!(subject.try_recv(first, &waker, true).is_pending());
        subject.send("a").unwrap();
        subject.send("b").unwrap();
        subject.abandon(first);

        assert!(matches!(subject.try_recv(other, &waker, true), Poll::Ready(Some(Ok("a")))));
        assert!(matches!(subject.try_recv(other, &waker, true), Poll::Ready(Some(Ok("b")))));
    }

    #[test]
    fn test_terminate_is_one_way() {
        let mut subject = SubjectImpl::<i32, String>::new();
        let waker = noop_waker();
        let id = subject.register();

        assert!(subject.terminate(Terminal::Failed("first".to_string())));
        assert!(!subject.terminate(Terminal::Failed("second".to_string())));
        assert!(!subject.terminate(Terminal::Finished));

        assert_eq!(subject.send(1), Err(SendError::Failed(1)));

        match subject.try_recv(id, &waker, true) {
            Poll::Ready(Some(Err(failure))) => assert_eq!(failure, "first"),
            _ => panic!("expected the first failure"),
        }
    }

    #[test]
    fn test_pending_values_drain_before_finish() {
        let mut subject = SubjectImpl::<i32, Infallible>::new();
        let waker = noop_waker();
        let id = subject.register();

        subject.send(1).unwrap();
        subject.terminate(Terminal::Finished);

        assert!(matches!(subject.try_recv(id, &waker, true), Poll::Ready(Some(Ok(1)))));
        assert!(matches!(subject.try_recv(id, &waker, true), Poll::Ready(None)));
        assert!(matches!(subject.try_recv(id, &waker, true), Poll::Ready(None)));
    }

    #[test]
    fn test_stream_waiter_is_not_handed_values() {
        let mut subject = SubjectImpl::<&str, Infallible>::new();
        let waker = noop_waker();

        let stale = subject.register();
        let live = subject.register();

        assert!(subject.try_recv(stale, &waker, false).is_pending());
        assert!(subject.try_recv(live, &waker, true).is_pending());

        subject.send("x").unwrap();

        assert!(subject.handoffs.get(&stale).is_none());
        assert_eq!(subject.waiting_consumers(), 1);
        assert!(matches!(subject.try_recv(live, &waker, true), Poll::Ready(Some(Ok("x")))));
    }

    #[test]
    fn test_stream_waiters_woken_and_released_on_send() {
        let mut subject = SubjectImpl::<&str, Infallible>::new();
        let waker = noop_waker();

        let stale = subject.register();
        let live = subject.register();

        assert!(subject.try_recv(stale, &waker, false).is_pending());
        assert!(subject.try_recv(live, &waker, false).is_pending());

        subject.send("x").unwrap();

        assert_eq!(subject.waiting_consumers(), 0);
        assert!(matches!(subject.try_recv(live, &waker, false), Poll::Ready(Some(Ok("x")))));
        assert!(subject.try_recv(stale, &waker, false).is_pending());
    }
}
