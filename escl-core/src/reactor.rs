//! The event reactor (spec.md §4.4): a thread-isolated, single-threaded
//! cooperative loop that owns every other core component.
//!
//! spec.md's reactor is hand-rolled (poll set, deferred calls, one-shot
//! timers, an eventfd-style cross-thread wakeup) because the original
//! predates async Rust. The idiomatic mapping this crate uses — see
//! SPEC_FULL.md §2 for the full justification — is a dedicated OS thread
//! running a single-threaded (`current_thread`) Tokio runtime:
//!
//! - every query, device job, and discovery publisher runs as a task
//!   spawned onto that one runtime, so at most one callback ever executes
//!   at a time, exactly as spec.md §4.4 requires;
//! - a deferred call is just `handle.spawn(...)`; canceling one before it
//!   starts is `JoinHandle::abort()` (or dropping the handle before the
//!   task is polled for the first time, which Tokio guarantees never
//!   starts the task's body at all);
//! - a timer is `tokio::time::sleep`;
//! - the cross-thread wakeup *is* the runtime's own cross-thread task
//!   queue — posting work from another thread via `Handle::spawn` plays
//!   the role spec.md assigns to the eventfd.

use std::sync::mpsc as std_mpsc;
use tokio::sync::oneshot;

/// Owns the reactor's dedicated thread and Tokio runtime. Dropping it
/// signals the thread to exit and joins it, mirroring spec.md §4.4's
/// "stop callbacks run in reverse order at exit" via the runtime's own
/// drop-glue for outstanding tasks.
pub struct Reactor {
    handle: tokio::runtime::Handle,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Reactor {
    /// Spawns the reactor thread and blocks until its runtime is ready.
    pub fn start() -> Self {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name("escl-reactor".to_owned())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("failed to build reactor runtime");
                let _ = ready_tx.send(rt.handle().clone());
                rt.block_on(async move {
                    let _ = shutdown_rx.await;
                });
            })
            .expect("failed to spawn reactor thread");

        let handle = ready_rx
            .recv()
            .expect("reactor thread exited before signaling readiness");

        Reactor {
            handle,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    /// A cloneable handle for spawning work onto the reactor thread from
    /// any thread — the "post a deferred call" primitive of spec.md §4.4.
    pub fn handle(&self) -> tokio::runtime::Handle {
        self.handle.clone()
    }
}

impl Drop for Reactor {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(t) = self.thread.take() {
            let _ = t.join();
        }
    }
}
