use std::{
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

/// The channel was closed with reads or writes outstanding.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SlotClosed;

/// A single-slot synchronous channel.
///
/// [`send`][Slot::send] completes only once the value has been taken by a
/// reader, so a sender that awaits its own write is paced by the consumer.
/// [`close`][Slot::close] fails every pending and future operation.
pub(crate) struct Slot<T> {
    state: Arc<Mutex<State<T>>>,
}

struct State<T> {
    value: Option<T>,
    closed: bool,
    read_wakers: Vec<Waker>,
    write_waker: Option<Waker>,
}

impl<T> Slot<T> {
    pub fn new() -> Slot<T> {
        Slot {
            state: Arc::new(Mutex::new(State {
                value: None,
                closed: false,
                read_wakers: Vec::new(),
                write_waker: None,
            })),
        }
    }

    /// Hand `value` to the next reader, waiting until it is consumed.
    pub async fn send(&self, value: T) -> Result<(), SlotClosed> {
        let mut value = Some(value);
        std::future::poll_fn(move |cx| self.poll_send(cx, &mut value)).await
    }

    fn poll_send(&self, cx: &mut Context<'_>, value: &mut Option<T>) -> Poll<Result<(), SlotClosed>> {
        let mut state = self.state.lock();
        if state.closed {
            return Poll::Ready(Err(SlotClosed));
        }
        match value.take() {
            Some(v) => {
                // an unconsumed deliver() may still occupy the slot
                if state.value.is_some() {
                    *value = Some(v);
                    state.write_waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
                state.value = Some(v);
                for waker in state.read_wakers.drain(..) {
                    waker.wake();
                }
                state.write_waker = Some(cx.waker().clone());
                Poll::Pending
            }
            // value already placed; resolve once a reader took it
            None => match state.value.is_none() {
                true => Poll::Ready(Ok(())),
                false => {
                    state.write_waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            },
        }
    }

    pub fn poll_recv(&self, cx: &mut Context<'_>) -> Poll<Result<T, SlotClosed>> {
        let mut state = self.state.lock();
        if let Some(value) = state.value.take() {
            if let Some(waker) = state.write_waker.take() {
                waker.wake();
            }
            return Poll::Ready(Ok(value));
        }
        if state.closed {
            return Poll::Ready(Err(SlotClosed));
        }
        if !state.read_wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.read_wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    pub async fn recv(&self) -> Result<T, SlotClosed> {
        std::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Place a value without waiting for it to be consumed.
    ///
    /// Used for the terminal `ErrorResponse` forward, where the dispatcher
    /// must keep reading toward EOF instead of parking on a reader that may
    /// never come.
    pub fn deliver(&self, value: T) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.value = Some(value);
        for waker in state.read_wakers.drain(..) {
            waker.wake();
        }
    }

    /// Reject every pending read and write, and all that follow.
    ///
    /// A value already handed over but not yet consumed is dropped.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.value = None;
        for waker in state.read_wakers.drain(..) {
            waker.wake();
        }
        if let Some(waker) = state.write_waker.take() {
            waker.wake();
        }
    }
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        Slot { state: self.state.clone() }
    }
}

impl<T> std::fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Slot")
            .field("occupied", &state.value.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}
