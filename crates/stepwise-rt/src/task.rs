// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Completion source and task handle.
//!
//! A `CompletionSource` is the producer side: the machine that owns it
//! completes it exactly once. `Task` is the consumer side returned to the
//! caller. Both share one slot guarded by a mutex plus a condvar for
//! blocking joins.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};

use crate::{lock, Fault, Value};

struct Inner {
    outcome: Option<Result<Value, Fault>>,
    wakers: Vec<Waker>,
}

struct Shared {
    inner: Mutex<Inner>,
    done: Condvar,
}

/// Producer side of a [`Task`].
pub struct CompletionSource {
    shared: Arc<Shared>,
}

impl CompletionSource {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    outcome: None,
                    wakers: Vec::new(),
                }),
                done: Condvar::new(),
            }),
        }
    }

    /// Handle observing this source.
    pub fn task(&self) -> Task {
        Task {
            shared: self.shared.clone(),
        }
    }

    pub fn set_result(&self, value: Value) -> bool {
        self.complete(Ok(value))
    }

    pub fn set_fault(&self, fault: Fault) -> bool {
        self.complete(Err(fault))
    }

    /// Store the outcome and wake every registered continuation.
    /// Returns false if the source was already completed.
    pub fn complete(&self, outcome: Result<Value, Fault>) -> bool {
        let wakers = {
            let mut inner = lock(&self.shared.inner);
            if inner.outcome.is_some() {
                return false;
            }
            inner.outcome = Some(outcome);
            std::mem::take(&mut inner.wakers)
        };
        self.shared.done.notify_all();
        // Wake outside the lock: a continuation may inspect this task.
        for waker in wakers {
            waker.wake();
        }
        true
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.shared.inner).outcome.is_some()
    }
}

impl Default for CompletionSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an operation that completes with a value or a fault.
#[derive(Clone)]
pub struct Task {
    shared: Arc<Shared>,
}

impl Task {
    /// Already-completed task.
    pub fn ready(value: Value) -> Self {
        let source = CompletionSource::new();
        source.set_result(value);
        source.task()
    }

    /// Already-failed task.
    pub fn failed(fault: Fault) -> Self {
        let source = CompletionSource::new();
        source.set_fault(fault);
        source.task()
    }

    pub fn is_complete(&self) -> bool {
        lock(&self.shared.inner).outcome.is_some()
    }

    /// The outcome, if completed. Observing does not consume it.
    pub fn outcome(&self) -> Option<Result<Value, Fault>> {
        lock(&self.shared.inner).outcome.clone()
    }

    /// Register `waker` to run on completion. Runs it immediately if the
    /// task has already completed.
    pub fn on_complete(&self, waker: Waker) {
        {
            let mut inner = lock(&self.shared.inner);
            if inner.outcome.is_none() {
                inner.wakers.push(waker);
                return;
            }
        }
        waker.wake();
    }

    /// Block the calling thread until the task completes.
    pub fn wait(&self) -> Result<Value, Fault> {
        let mut inner = lock(&self.shared.inner);
        loop {
            if let Some(outcome) = &inner.outcome {
                return outcome.clone();
            }
            inner = self
                .shared
                .done
                .wait(inner)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }

    pub fn ptr_eq(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Future for Task {
    type Output = Result<Value, Fault>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = lock(&self.shared.inner);
        match &inner.outcome {
            Some(outcome) => Poll::Ready(outcome.clone()),
            None => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountWaker(AtomicUsize);

    impl Wake for CountWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn completes_once() {
        let source = CompletionSource::new();
        let task = source.task();
        assert!(!task.is_complete());
        assert!(source.set_result(Value::Int(1)));
        assert!(!source.set_fault(Fault::new("late", "ignored")));
        assert_eq!(task.outcome(), Some(Ok(Value::Int(1))));
    }

    #[test]
    fn wakes_registered_continuations() {
        let source = CompletionSource::new();
        let count = Arc::new(CountWaker(AtomicUsize::new(0)));
        source.task().on_complete(Waker::from(count.clone()));
        assert_eq!(count.0.load(Ordering::SeqCst), 0);
        source.set_result(Value::Unit);
        assert_eq!(count.0.load(Ordering::SeqCst), 1);

        // Late registration runs immediately.
        source.task().on_complete(Waker::from(count.clone()));
        assert_eq!(count.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wait_across_threads() {
        let source = CompletionSource::new();
        let task = source.task();
        let handle = std::thread::spawn(move || task.wait());
        source.set_fault(Fault::new("io", "closed"));
        let outcome = handle.join().unwrap();
        assert_eq!(outcome, Err(Fault::new("io", "closed")));
    }
}
