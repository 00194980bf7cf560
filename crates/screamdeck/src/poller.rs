//! Background key poller.
//!
//! The native library reports key *levels*: one byte per key, non-zero while
//! held. The poller turns those into press/release *edges* by diffing each
//! fresh snapshot against the last known one, so a key held across many
//! reads yields exactly one press and, later, one release.
//!
//! ```text
//!            spawn            cancel()           loop exits
//!   Idle ───────────► Running ────────► Stopping ──────────► Stopped
//! ```
//!
//! Each session runs one poller on a dedicated OS thread, since key reads
//! block inside the native library. Cancellation is cooperative: the flag is
//! checked once per read, and each read is bounded by the configured
//! timeout.

use crate::config::{ReadLengthPolicy, SessionConfig};
use crate::driver::{DeckDriver, RawHandle};
use screamdeck_core::{DeviceTypeInfo, KeyEvent, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, trace, warn};

/// Lifecycle of a key poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PollerState {
    /// Constructed, loop not entered yet.
    Idle = 0,
    /// Reading key state.
    Running = 1,
    /// Cancellation requested, current read still in flight.
    Stopping = 2,
    /// Loop exited; the device is no longer touched.
    Stopped = 3,
}

impl PollerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Idle,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
            Self::Stopped => "Stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(PollerState::Idle as u8))
    }

    fn get(&self) -> PollerState {
        PollerState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: PollerState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move to `to` only from `from`. Keeps `Stopped` from being overwritten
    /// by a late `Running` or `Stopping`.
    fn advance(&self, from: PollerState, to: PollerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Cancellation flag shared between a session and its poller.
#[derive(Debug, Clone, Default)]
struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Edge detector over consecutive key-state snapshots.
///
/// # Examples
///
/// ```
/// use screamdeck::poller::KeyStateTracker;
///
/// let mut tracker = KeyStateTracker::new(5, 3);
/// assert!(tracker.diff(&[0; 15]).is_empty());
///
/// let mut pressed = [0u8; 15];
/// pressed[2] = 1;
/// let events = tracker.diff(&pressed);
/// assert_eq!(events.len(), 1);
/// assert_eq!((events[0].index, events[0].x, events[0].y, events[0].down), (2, 2, 0, true));
///
/// // Still held: no new edge.
/// assert!(tracker.diff(&pressed).is_empty());
/// ```
#[derive(Debug, Clone)]
pub struct KeyStateTracker {
    columns: u32,
    last: Vec<u8>,
}

impl KeyStateTracker {
    /// Tracker for a `columns` × `rows` panel with every key released.
    pub fn new(columns: u32, rows: u32) -> Self {
        Self {
            columns,
            last: vec![0; columns as usize * rows as usize],
        }
    }

    pub fn for_panel(info: &DeviceTypeInfo) -> Self {
        Self::new(info.columns, info.rows)
    }

    /// Snapshot length this tracker expects.
    pub fn key_count(&self) -> usize {
        self.last.len()
    }

    /// Last known level of every key.
    pub fn last(&self) -> &[u8] {
        &self.last
    }

    /// Fold `snapshot` into the known state, calling `emit` once per changed
    /// key in ascending index order.
    ///
    /// Bytes past [`key_count`](Self::key_count) are ignored; a shorter
    /// snapshot only updates the keys it covers.
    pub fn apply(&mut self, snapshot: &[u8], mut emit: impl FnMut(KeyEvent)) {
        for (index, (known, &fresh)) in self.last.iter_mut().zip(snapshot).enumerate() {
            if *known != fresh {
                *known = fresh;
                emit(KeyEvent::new(index, self.columns, fresh > 0));
            }
        }
    }

    /// [`apply`](Self::apply), collecting the events.
    pub fn diff(&mut self, snapshot: &[u8]) -> Vec<KeyEvent> {
        let mut events = Vec::new();
        self.apply(snapshot, |event| events.push(event));
        events
    }
}

/// An open native device: the driver plus the handle it issued.
///
/// Shared between a session and its poller; the session frees the handle
/// only once it holds the last reference.
pub(crate) struct NativeDevice {
    pub(crate) driver: Arc<dyn DeckDriver>,
    pub(crate) handle: RawHandle,
}

impl fmt::Debug for NativeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDevice")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Marks the poller stopped and fires the exit notification when the poller
/// thread's closure ends, including by unwinding.
struct ExitGuard {
    state: Arc<StateCell>,
    exited: Option<oneshot::Sender<()>>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.state.set(PollerState::Stopped);
        if let Some(tx) = self.exited.take() {
            let _ = tx.send(());
        }
    }
}

/// Owner side of a running poller thread.
#[derive(Debug)]
pub(crate) struct KeyPoller {
    cancel: CancelSignal,
    state: Arc<StateCell>,
    thread: Option<JoinHandle<()>>,
    exited: Option<oneshot::Receiver<()>>,
}

impl KeyPoller {
    /// Start polling `device` on a new thread.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the thread cannot be spawned.
    pub(crate) fn spawn(
        device: Arc<NativeDevice>,
        info: &DeviceTypeInfo,
        serial_number: &str,
        config: &SessionConfig,
        events: broadcast::Sender<KeyEvent>,
    ) -> Result<Self> {
        let cancel = CancelSignal::default();
        let state = Arc::new(StateCell::new());
        let (exited_tx, exited_rx) = oneshot::channel();

        let worker = PollLoop {
            device,
            tracker: KeyStateTracker::for_panel(info),
            cancel: cancel.clone(),
            state: Arc::clone(&state),
            timeout_ms: config.read_timeout_ms,
            read_length: config.read_length,
            events,
        };
        let guard = ExitGuard {
            state: Arc::clone(&state),
            exited: Some(exited_tx),
        };

        let thread = std::thread::Builder::new()
            .name(format!("screamdeck-keys-{serial_number}"))
            .spawn(move || {
                let _guard = guard;
                worker.run();
            })?;

        Ok(Self {
            cancel,
            state,
            thread: Some(thread),
            exited: Some(exited_rx),
        })
    }

    pub(crate) fn state(&self) -> PollerState {
        self.state.get()
    }

    /// Request the loop to exit after its current read.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
        if !self.state.advance(PollerState::Running, PollerState::Stopping) {
            self.state.advance(PollerState::Idle, PollerState::Stopping);
        }
    }

    /// Cancel and block until the poller thread has exited.
    pub(crate) fn stop(mut self) {
        self.cancel();
        self.join_thread();
    }

    /// Cancel and wait for the loop to exit without blocking the calling
    /// thread. The thread itself is reaped by [`stop`](Self::stop).
    ///
    /// Cancel-safe: dropping the future leaves the poller to be stopped by
    /// its owner.
    pub(crate) async fn wait_stopped(&mut self) {
        self.cancel();
        if let Some(exited) = self.exited.as_mut() {
            // An error means the guard was dropped without sending, which
            // still means the loop is over.
            let _ = exited.await;
            self.exited = None;
        }
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Key poller thread panicked");
        }
    }
}

impl Drop for KeyPoller {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.cancel();
            self.join_thread();
        }
    }
}

/// State moved onto the poller thread.
struct PollLoop {
    device: Arc<NativeDevice>,
    tracker: KeyStateTracker,
    cancel: CancelSignal,
    state: Arc<StateCell>,
    timeout_ms: u32,
    read_length: ReadLengthPolicy,
    events: broadcast::Sender<KeyEvent>,
}

impl PollLoop {
    fn run(mut self) {
        self.state.advance(PollerState::Idle, PollerState::Running);
        debug!(keys = self.tracker.key_count(), "Key poller started");

        let mut buffer = vec![0u8; self.tracker.key_count()];
        let mut failed_reads = 0u32;

        while !self.cancel.is_cancelled() {
            let bytes_read =
                self.device
                    .driver
                    .read_key_timeout(&self.device.handle, &mut buffer, self.timeout_ms);

            if bytes_read < 0 {
                failed_reads += 1;
                if failed_reads == 1 {
                    warn!(code = bytes_read, "Key read failed");
                }
                // A failing read usually returns at once; wait out the
                // timeout so a broken device does not spin this thread.
                std::thread::sleep(Duration::from_millis(u64::from(self.timeout_ms)));
                continue;
            }
            if failed_reads > 0 {
                debug!(failed_reads, "Key reads recovered");
                failed_reads = 0;
            }

            if !self.read_length.accepts(bytes_read, buffer.len()) {
                if bytes_read != 0 {
                    trace!(bytes_read, expected = buffer.len(), "Discarding key read");
                }
                continue;
            }

            let events = &self.events;
            self.tracker.apply(&buffer, |event| {
                trace!(index = event.index, down = event.down, "Key event");
                // No subscribers is fine; events are simply not observed.
                let _ = events.send(event);
            });
        }

        debug!("Key poller stopped");
    }
}
