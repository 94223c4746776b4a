//! The request future registry (`spec.md` §4.4, Properties P2/P3).
//!
//! Sync ids are allocated and inserted under the same lock, so a
//! `DuplicateSync` rejection structurally cannot happen here. There is no
//! window between allocating a sync and registering it in which a racing
//! caller could observe the same value (see DESIGN.md).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use iproto_errors::{Cancelled, ConnectionClosed, Error, ProtocolError, Timeout};
use tokio::sync::oneshot;

type Completion = Result<rmpv::Value, Error>;

struct Pending {
    sender: oneshot::Sender<Completion>,
    deadline: Instant,
}

enum State {
    Active(HashMap<u64, Pending>),
    ShutDown,
}

/// Reason broadcast to every pending completion on [`RequestRegistry::shutdown`].
#[derive(Debug, Clone)]
pub enum ShutdownReason {
    ConnectionClosed,
    Protocol(String),
}

impl ShutdownReason {
    fn to_error(&self) -> Error {
        match self {
            ShutdownReason::ConnectionClosed => ConnectionClosed.build(),
            ShutdownReason::Protocol(message) => ProtocolError {
                message: message.clone(),
            }
            .build(),
        }
    }
}

pub struct RequestRegistry {
    next_sync: AtomicU64,
    state: Mutex<State>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        RequestRegistry {
            next_sync: AtomicU64::new(1),
            state: Mutex::new(State::Active(HashMap::new())),
        }
    }

    /// Allocates a fresh sync id and registers a pending completion for it
    /// with the given deadline. Fails with `ConnectionClosed` if the
    /// registry has already been shut down.
    pub fn register(&self, deadline: Instant) -> Result<(u64, oneshot::Receiver<Completion>), Error> {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        match &mut *state {
            State::ShutDown => ConnectionClosed.fail(),
            State::Active(pending) => {
                let sync = self.next_sync.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = oneshot::channel();
                pending.insert(sync, Pending { sender, deadline });
                log::trace!("registered pending request sync={sync}");
                Ok((sync, receiver))
            }
        }
    }

    /// Delivers a successful response body to `sync`. A no-op if `sync` is
    /// unknown (e.g. the request already timed out).
    pub fn complete(&self, sync: u64, body: rmpv::Value) {
        self.resolve(sync, Ok(body));
    }

    /// Delivers a failure to `sync`. A no-op if `sync` is unknown.
    pub fn fail(&self, sync: u64, error: Error) {
        self.resolve(sync, Err(error));
    }

    fn resolve(&self, sync: u64, result: Completion) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        if let State::Active(pending) = &mut *state {
            if let Some(entry) = pending.remove(&sync) {
                log::trace!("resolved pending request sync={sync}");
                let _ = entry.sender.send(result);
            } else {
                log::trace!("late delivery for unknown/already-resolved sync={sync}, dropped");
            }
        }
    }

    /// Removes `sync` and delivers `Cancelled` to it. A no-op if `sync` is
    /// unknown. Any response later arriving for this sync is silently
    /// dropped by [`RequestRegistry::complete`]/[`RequestRegistry::fail`]
    /// (`spec.md` §5: "Cancellation").
    pub fn cancel(&self, sync: u64) {
        self.resolve(sync, Err(Cancelled.build()));
    }

    /// Removes and fails with `Timeout` every entry whose deadline has
    /// elapsed as of `now`.
    pub fn tick(&self, now: Instant) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        if let State::Active(pending) = &mut *state {
            let expired: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(sync, _)| *sync)
                .collect();
            for sync in expired {
                if let Some(entry) = pending.remove(&sync) {
                    log::debug!("request timed out sync={sync}");
                    let _ = entry.sender.send(Err(Timeout.build()));
                }
            }
        }
    }

    /// Removes every pending entry, delivering `reason` to each, and
    /// refuses all future registrations.
    pub fn shutdown(&self, reason: ShutdownReason) {
        let mut state = self.state.lock().expect("registry mutex poisoned");
        if let State::Active(pending) = std::mem::replace(&mut *state, State::ShutDown) {
            log::debug!("registry shutdown: failing {} pending request(s)", pending.len());
            for (_, entry) in pending {
                let _ = entry.sender.send(Err(reason.to_error()));
            }
        }
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        match &*self.state.lock().unwrap() {
            State::Active(pending) => pending.len(),
            State::ShutDown => 0,
        }
    }
}

impl Default for RequestRegistry {
    fn default() -> Self {
        Self::new()
    }
}
