// SPDX-License-Identifier: MPL-2.0

//! Sleeping synchronization for lifecycle waits.

use std::sync::{Condvar, Mutex};

// # Explanation on the wakeup ordering
//
// ```
// [the waker]             [the waiter]
// cond = true;
// wake_all();
//                         wait_until(|| cond);
// ```
//
// A waker must make the condition observable before calling `wake_all()`.
// `wake_all()` acquires the internal mutex, which a waiter holds between its
// condition check and the park, so a wakeup cannot fall into that window and
// get lost.

/// A wait queue.
///
/// One may wait on a wait queue to put its executing thread to sleep until
/// another thread invokes [`wake_all`]. The ledgers of this crate only ever
/// spin; this type is the one place a thread sleeps, used by device
/// unregistration to wait for the last open handle to close.
///
/// [`wake_all`]: WaitQueue::wake_all
pub struct WaitQueue {
    lock: Mutex<()>,
    condvar: Condvar,
}

impl WaitQueue {
    /// Creates a new, empty wait queue.
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
            condvar: Condvar::new(),
        }
    }

    /// Waits until some condition is met.
    ///
    /// This method takes a closure that tests a user-given condition and
    /// only returns once the closure returns `Some(_)`. A waker thread
    /// should first make the condition `Some(_)`, then invoke [`wake_all`];
    /// this ordering ensures that waiters do not lose the notification.
    ///
    /// [`wake_all`]: WaitQueue::wake_all
    pub fn wait_until<F, R>(&self, mut cond: F) -> R
    where
        F: FnMut() -> Option<R>,
    {
        let mut guard = self.lock.lock().unwrap_or_else(|err| err.into_inner());
        loop {
            if let Some(res) = cond() {
                return res;
            }
            guard = self
                .condvar
                .wait(guard)
                .unwrap_or_else(|err| err.into_inner());
        }
    }

    /// Wakes up all waiting threads.
    pub fn wake_all(&self) {
        // Taking the lock orders this wakeup after a concurrent waiter's
        // condition check; see the comment at the top of this file.
        drop(self.lock.lock().unwrap_or_else(|err| err.into_inner()));
        self.condvar.notify_all();
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
