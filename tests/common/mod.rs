//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

// ============================================================================
// Timer
// ============================================================================

#[derive(Default)]
struct DelayState {
    done: bool,
    waker: Option<Waker>,
}

/// Completes after `duration`, waking the awaiting frame from a timer thread.
pub struct Delay {
    duration: Duration,
    state: Option<Arc<Mutex<DelayState>>>,
}

impl Delay {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: None,
        }
    }

    pub fn millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }
}

impl Future for Delay {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let duration = self.duration;
        let state = self.state.get_or_insert_with(|| {
            let state = Arc::new(Mutex::new(DelayState::default()));
            let timer = state.clone();
            thread::spawn(move || {
                thread::sleep(duration);
                let waker = {
                    let mut timer = timer.lock();
                    timer.done = true;
                    timer.waker.take()
                };
                if let Some(waker) = waker {
                    waker.wake();
                }
            });
            state
        });

        let mut state = state.lock();
        if state.done {
            Poll::Ready(())
        } else {
            state.waker = Some(cx.waker().clone());
            Poll::Pending
        }
    }
}

/// Wait `ms` milliseconds when `delayed` is set, otherwise continue at once.
pub async fn pause(delayed: bool, ms: u64) {
    if delayed {
        Delay::millis(ms).await;
    }
}

// ============================================================================
// Release tracking
// ============================================================================

/// Counts how many [`Guard`]s were dropped.
#[derive(Clone, Default)]
pub struct DropCounter(Arc<AtomicUsize>);

impl DropCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&self) -> Guard {
        Guard {
            counter: self.clone(),
        }
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Guard {
    counter: DropCounter,
}

impl Drop for Guard {
    fn drop(&mut self) {
        self.counter.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records labels in the order their [`Mark`]s are dropped.
#[derive(Clone, Default)]
pub struct ReleaseOrder(Arc<Mutex<Vec<&'static str>>>);

impl ReleaseOrder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, label: &'static str) -> Mark {
        Mark {
            label,
            order: self.clone(),
        }
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}

pub struct Mark {
    label: &'static str,
    order: ReleaseOrder,
}

impl Drop for Mark {
    fn drop(&mut self) {
        self.order.0.lock().push(self.label);
    }
}
