//! ConnectionSession: the connection-lifecycle state machine shared by both
//! roles.
//!
//! A session owns:
//!
//! - the current [`ConnectionState`];
//! - at most one role worker (the client's outbound connector *or* the
//!   server's accept loop), tagged with a ticket;
//! - at most one [`DataPump`];
//! - the sending half of the observer's event channel.
//!
//! # Locking
//!
//! Two mutexes, always taken in this order when both are needed:
//!
//! 1. `pump_gate` – serializes every cancel-then-replace of the pump.  It is
//!    held while the old reader thread is joined.
//! 2. `slots` – the state, worker slot, and pump slot.  Held only for swaps,
//!    never across I/O or a thread join.
//!
//! The pump's reader thread reports a lost connection by taking `slots`, so
//! joining it while holding `slots` would deadlock; joining under
//! `pump_gate` instead keeps "at most one pump" without that hazard.
//!
//! # Worker tickets
//!
//! Every installed worker gets a fresh ticket.  A worker can only release the
//! slot while it still holds the matching ticket, so a connector that was
//! cancelled by `stop()`, `start()`, or a newer `connect()` can neither report
//! a failure nor promote a connection afterwards.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};

use crate::domain::state::ConnectionState;
use crate::event::{event_channel, EventReceiver, EventSender, LinkEvent, TOAST_CONNECTION_LOST};
use crate::transport::Connection;

pub mod pump;

use pump::DataPump;

/// A role worker thread (outbound connector or accept loop).
pub trait Worker: Send + Sync + 'static {
    /// Asks the worker to wind down by closing its socket.  Does not block.
    fn cancel(&self);

    /// Blocks until the worker thread has exited.
    fn join(self: Box<Self>);

    /// `true` once the worker thread has exited.
    fn is_finished(&self) -> bool;
}

/// What happens to the role worker during [`ConnectionSession::reset`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPolicy {
    /// Leave the worker running.
    Keep,
    /// Cancel the worker and let it finish on its own.
    Cancel,
    /// Cancel the worker and wait for its thread to exit.
    CancelAndJoin,
}

/// Which states accept a newly established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Promotion {
    /// A connection produced by the outbound connector holding `ticket`;
    /// only valid while the session is still `Connecting` and that connector
    /// still owns the worker slot.
    Outbound { ticket: u64 },
    /// A connection produced by `accept`; valid while `Listening` or
    /// `Connecting`.  `None` and `Connected` reject it.
    Inbound,
}

impl Promotion {
    fn accepts(self, slots: &Slots) -> bool {
        match self {
            Promotion::Outbound { ticket } => {
                slots.state == ConnectionState::Connecting
                    && slots.worker.as_ref().is_some_and(|slot| slot.ticket == ticket)
            }
            Promotion::Inbound => matches!(
                slots.state,
                ConnectionState::Listening | ConnectionState::Connecting
            ),
        }
    }
}

struct WorkerSlot {
    ticket: u64,
    worker: Box<dyn Worker>,
}

#[derive(Default)]
struct Slots {
    state: ConnectionState,
    worker: Option<WorkerSlot>,
    pump: Option<DataPump>,
}

/// The connection-lifecycle state machine.
pub struct ConnectionSession {
    role: &'static str,
    slots: Mutex<Slots>,
    pump_gate: Mutex<()>,
    next_ticket: AtomicU64,
    events: EventSender,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ConnectionSession {
    /// Creates a session in the `None` state and returns it together with the
    /// observer's event receiver.  `role` only labels log lines.
    pub fn new(role: &'static str) -> (Arc<Self>, EventReceiver) {
        let (events, rx) = event_channel();
        let session = Arc::new(Self {
            role,
            slots: Mutex::new(Slots::default()),
            pump_gate: Mutex::new(()),
            next_ticket: AtomicU64::new(1),
            events,
        });
        (session, rx)
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn events(&self) -> &EventSender {
        &self.events
    }

    /// Snapshot of the current state.  It may be stale by the time the caller
    /// acts on it.
    pub fn state(&self) -> ConnectionState {
        lock(&self.slots).state
    }

    /// Stores `state` and emits `StateChanged(state)`, even if unchanged.
    pub fn set_state(&self, state: ConnectionState) {
        let mut slots = lock(&self.slots);
        self.set_state_locked(&mut slots, state);
    }

    /// Moves from `expected` to `next` only if the state is still `expected`.
    /// Returns `true` if the transition happened.
    pub fn compare_and_set_state(&self, expected: ConnectionState, next: ConnectionState) -> bool {
        let mut slots = lock(&self.slots);
        if slots.state != expected {
            return false;
        }
        self.set_state_locked(&mut slots, next);
        true
    }

    fn set_state_locked(&self, slots: &mut Slots, state: ConnectionState) {
        debug!("[{}] state {} -> {}", self.role, slots.state, state);
        slots.state = state;
        self.events.state_changed(state);
    }

    /// `true` if a worker is installed and its thread is still running.
    pub fn has_live_worker(&self) -> bool {
        lock(&self.slots)
            .worker
            .as_ref()
            .is_some_and(|slot| !slot.worker.is_finished())
    }

    /// `true` if a pump is installed.
    pub fn has_pump(&self) -> bool {
        lock(&self.slots).pump.is_some()
    }

    /// Installs a new worker under the session lock.
    ///
    /// `spawn` receives the worker's ticket and starts its thread.  Because
    /// the lock is held until the worker is installed (and `state` stored, if
    /// given), the new thread cannot observe the session before that.  Any
    /// previously installed worker is cancelled.
    ///
    /// # Errors
    ///
    /// Propagates the error from `spawn`; nothing is installed in that case.
    pub fn install_worker<F>(&self, state: Option<ConnectionState>, spawn: F) -> io::Result<u64>
    where
        F: FnOnce(u64) -> io::Result<Box<dyn Worker>>,
    {
        let mut slots = lock(&self.slots);
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst);
        let worker = spawn(ticket)?;
        if let Some(previous) = slots.worker.replace(WorkerSlot { ticket, worker }) {
            previous.worker.cancel();
        }
        if let Some(state) = state {
            self.set_state_locked(&mut slots, state);
        }
        Ok(ticket)
    }

    /// Removes the worker holding `ticket`.  Returns `false` if that worker
    /// was already cancelled or replaced.
    pub fn release_worker(&self, ticket: u64) -> bool {
        let mut slots = lock(&self.slots);
        Self::take_worker_if(&mut slots, ticket)
    }

    /// Removes the worker holding `ticket`, posts `notice`, and moves to
    /// `next`.  Does nothing if the worker was already cancelled or replaced.
    pub fn worker_failed(&self, ticket: u64, notice: &str, next: ConnectionState) -> bool {
        let mut slots = lock(&self.slots);
        if !Self::take_worker_if(&mut slots, ticket) {
            debug!("[{}] worker {ticket} superseded; failure not reported", self.role);
            return false;
        }
        self.events.toast(notice);
        self.set_state_locked(&mut slots, next);
        true
    }

    fn take_worker_if(slots: &mut Slots, ticket: u64) -> bool {
        if slots.worker.as_ref().is_some_and(|slot| slot.ticket == ticket) {
            slots.worker = None;
            true
        } else {
            false
        }
    }

    /// Cancels the pump (and, per `policy`, the worker) and, if `next` is
    /// given, moves to that state.
    ///
    /// The new state is stored and emitted before any thread is joined.  From
    /// that point on, cancelled workers and the old pump are suppressed, so
    /// nothing they do afterwards reaches the observer.
    pub fn reset(&self, next: Option<ConnectionState>, policy: WorkerPolicy) {
        let gate = lock(&self.pump_gate);
        let (worker, pump) = {
            let mut slots = lock(&self.slots);
            let worker = match policy {
                WorkerPolicy::Keep => None,
                WorkerPolicy::Cancel | WorkerPolicy::CancelAndJoin => slots.worker.take(),
            };
            let pump = slots.pump.take();
            if let Some(pump) = &pump {
                pump.request_stop();
            }
            if let Some(next) = next {
                self.set_state_locked(&mut slots, next);
            }
            (worker, pump)
        };

        if let Some(slot) = &worker {
            slot.worker.cancel();
        }
        if let Some(pump) = pump {
            pump.cancel();
        }
        drop(gate);

        if let (Some(slot), WorkerPolicy::CancelAndJoin) = (worker, policy) {
            slot.worker.join();
        }
    }

    /// Cancels every worker, waits for their threads, and forces `None`.
    /// Safe to call repeatedly and from any thread.
    pub fn shutdown(&self) {
        self.reset(Some(ConnectionState::None), WorkerPolicy::CancelAndJoin);
    }

    /// Hands an established connection to a new [`DataPump`].
    ///
    /// Under the session lock the state is checked with `promotion`; any
    /// previous pump is then cancelled and joined, the state re-checked, the
    /// new pump installed, `PeerConnected(name)` posted, and the session moved
    /// to `Connected`.
    ///
    /// # Errors
    ///
    /// Returns the connection unchanged if the state rejects it, or if an
    /// outbound connector no longer owns the worker slot.  The caller owns it
    /// again and must close it.
    ///
    /// A successful outbound promotion leaves the connector in its slot, so a
    /// later `shutdown()` still joins its thread.
    pub fn promote(
        self: &Arc<Self>,
        conn: Arc<dyn Connection>,
        promotion: Promotion,
    ) -> Result<(), Arc<dyn Connection>> {
        let _gate = lock(&self.pump_gate);

        let previous = {
            let mut slots = lock(&self.slots);
            if !promotion.accepts(&slots) {
                debug!(
                    "[{}] rejecting {} while {}",
                    self.role,
                    conn.peer(),
                    slots.state
                );
                return Err(conn);
            }
            let previous = slots.pump.take();
            if let Some(pump) = &previous {
                pump.request_stop();
            }
            previous
        };
        if let Some(pump) = previous {
            pump.cancel();
        }

        let mut slots = lock(&self.slots);
        if !promotion.accepts(&slots) {
            debug!("[{}] state moved to {} during promotion", self.role, slots.state);
            return Err(conn);
        }

        info!(
            "[{}] connected to {} [{}]",
            self.role,
            conn.peer(),
            conn.security()
        );
        self.events
            .emit(LinkEvent::PeerConnected(conn.peer().display_name().to_string()));
        self.set_state_locked(&mut slots, ConnectionState::Connected);

        match DataPump::spawn(Arc::clone(self), Arc::clone(&conn)) {
            Ok(pump) => slots.pump = Some(pump),
            Err(e) => {
                error!("[{}] failed to start data pump: {e}", self.role);
                if let Err(e) = conn.close() {
                    debug!("[{}] closing {}: {e}", self.role, conn.peer());
                }
                self.events.toast(TOAST_CONNECTION_LOST);
                self.set_state_locked(&mut slots, ConnectionState::Disconnecting);
            }
        }
        Ok(())
    }

    /// Reports that the pump owning `stop` lost its connection.  Ignored if
    /// that pump has already been asked to stop.
    pub(crate) fn connection_lost(&self, stop: &AtomicBool) -> bool {
        let mut slots = lock(&self.slots);
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        self.events.toast(TOAST_CONNECTION_LOST);
        self.set_state_locked(&mut slots, ConnectionState::Disconnecting);
        true
    }

    /// Writes `bytes` to the peer if `Connected`; otherwise drops them
    /// silently.  Write failures are logged, never reported.
    pub fn send_data(&self, bytes: &[u8]) {
        let writer = {
            let slots = lock(&self.slots);
            if slots.state != ConnectionState::Connected {
                debug!(
                    "[{}] dropping {} bytes while {}",
                    self.role,
                    bytes.len(),
                    slots.state
                );
                return;
            }
            slots.pump.as_ref().map(DataPump::writer)
        };
        if let Some(writer) = writer {
            writer.write(bytes);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
