//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use derive_new::new;
use tokio::sync::mpsc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio::{task, time};
use tracing::error;

/// A handle which can be used to manipulate the task created by the
/// [`Task::spawn`] and [`Task::spawn_blocking`] functions.
///
/// By default, dropping this handle cancels the task (unless [`Task::detach`]
/// is used).
#[derive(Debug)]
pub struct Task<T> {
    join_handle: task::JoinHandle<T>,
    detached: bool,
}

/// A handle which can be used to manipulate the interval task created by the
/// [`IntervalTask::new`] function.
///
/// Dropping this handle cancels the interval task.
#[derive(Debug)]
pub struct IntervalTask {
    inner: IntervalTaskInner,
}

#[derive(Debug, new)]
struct IntervalTaskInner {
    task: Task<()>,
    control: UnboundedSender<Message>,
    next: Arc<Mutex<Instant>>,
}

#[derive(Debug)]
enum Message {
    Reset(Option<Duration>),
}

// ===== impl Task =====

impl<T> Task<T> {
    /// Spawns a new asynchronous task, returning a handle for it.
    pub fn spawn<Fut>(future: Fut) -> Task<T>
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn(future),
            detached: false,
        }
    }

    /// Runs the provided closure on a thread where blocking is acceptable.
    pub fn spawn_blocking<F>(f: F) -> Task<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        Task {
            join_handle: task::spawn_blocking(f),
            detached: false,
        }
    }

    /// Detach the task, meaning it will no longer be canceled if its handle is
    /// dropped.
    pub fn detach(&mut self) {
        self.detached = true;
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, task::JoinError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        Pin::new(&mut self.join_handle).poll(cx)
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        if !self.detached {
            self.join_handle.abort();
        }
    }
}

// ===== impl IntervalTask =====

impl IntervalTask {
    /// Spawns a new task that will call the provided async closure whenever the
    /// specified interval timer ticks.
    ///
    /// Returns a handler that can be used to manipulate the interval task.
    pub fn new<F, Fut>(
        interval: Duration,
        tick_on_start: bool,
        mut cb: F,
    ) -> IntervalTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let next = Instant::now() + interval;
        let next = Arc::new(Mutex::new(next));
        let next_child = next.clone();

        let task = Task::spawn(async move {
            let mut interval_fut = if tick_on_start {
                time::interval(interval)
            } else {
                let start = Instant::now() + interval;
                time::interval_at(start, interval)
            };

            loop {
                tokio::select! {
                    // Interval timer has ticked.
                    _ = interval_fut.tick() => {
                        let next = Instant::now() + interval;
                        (cb)().await;
                        *next_child.lock().unwrap() = next;
                    }
                    message = control_rx.recv() => {
                        match message {
                            // Interval timer has been updated.
                            Some(Message::Reset(None)) => {
                                let next = Instant::now() + interval;
                                interval_fut = time::interval(interval);
                                *next_child.lock().unwrap() = next;
                            },
                            Some(Message::Reset(Some(new_interval))) => {
                                let next = Instant::now() + new_interval;
                                interval_fut = time::interval(new_interval);
                                *next_child.lock().unwrap() = next;
                            },
                            // Interval timer has been aborted.
                            None => break,
                        }
                    }
                }
            }
        });

        IntervalTask {
            inner: IntervalTaskInner::new(task, control_tx, next),
        }
    }

    /// Resets the interval.
    ///
    /// If a new interval value isn't specified, the last value will be reused.
    pub fn reset(&mut self, interval: Option<Duration>) {
        if self.inner.control.send(Message::Reset(interval)).is_err() {
            error!("failed to reset interval");
        }
    }

    /// Returns the remaining time before the next interval tick.
    pub fn remaining(&self) -> Duration {
        let next = self.inner.next.lock().unwrap();
        next.saturating_duration_since(Instant::now())
    }

    /// Requests cooperative shutdown of the interval task and waits for it to
    /// finish.
    ///
    /// An in-flight tick is always allowed to run to completion. If the task
    /// hasn't finished once the grace period expires, it is forcibly canceled.
    pub async fn stop(self, grace: Duration) {
        let IntervalTaskInner { task, control, .. } = self.inner;

        // Closing the control channel makes the task exit after the current
        // tick, if any.
        drop(control);

        if time::timeout(grace, task).await.is_err() {
            error!("interval task didn't stop in time, canceling it");
        }
    }
}
