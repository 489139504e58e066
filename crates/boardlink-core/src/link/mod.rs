//! Board link facade
//!
//! A [`Link`] owns one board connection: a dedicated worker thread that keeps
//! the device open and moves lines in both directions, plus the shared state
//! callers use to send and observe.
//!
//! Two locks guard the shared state:
//! - the write lock holds the device's write handle, so queued writes (from
//!   the worker) and direct writes (from any caller) never interleave;
//! - the bookkeeping lock holds the session, the outbound queue and the
//!   counters.
//!
//! Neither lock is ever taken while the other is held.

mod handler;
mod worker;

pub use handler::LinkHandler;

use serde::Serialize;
use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, info, trace, warn};

use crate::config::LinkConfig;
use crate::protocol::{
    frame, ChannelOpener, ControlCommand, LinkChannel, LinkError, LinkSession, OutboundQueue,
    PeerIdentity, SerialOpener, SessionState,
};

/// Consecutive write attempts without progress before giving up
const WRITE_RETRY_LIMIT: u32 = 100;

/// Pause between those attempts
const WRITE_RETRY_PAUSE: Duration = Duration::from_millis(1);

/// Poll interval while `setup`/`terminate` wait
const WAIT_POLL: Duration = Duration::from_millis(5);

/// Lock a mutex, recovering the data if a holder panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why a frame could not be written
pub(crate) enum WriteFailure {
    /// Transmit buffer stayed full for the whole retry window
    Busy,
    /// The device reported an error
    Io(io::Error),
}

/// Write a whole frame, retrying briefly while the transmit buffer is full.
///
/// Short writes continue where they stopped; only attempts that move no bytes
/// count towards the limit.
pub(crate) fn write_frame(channel: &mut dyn LinkChannel, data: &[u8]) -> Result<(), WriteFailure> {
    let mut written = 0;
    let mut stalls = 0;
    while written < data.len() {
        match channel.write(&data[written..]) {
            Ok(n) if n > 0 => {
                written += n;
                stalls = 0;
                continue;
            }
            Ok(_) => {}
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) => {}
            Err(e) => return Err(WriteFailure::Io(e)),
        }
        stalls += 1;
        if stalls > WRITE_RETRY_LIMIT {
            return Err(WriteFailure::Busy);
        }
        thread::sleep(WRITE_RETRY_PAUSE);
    }
    Ok(())
}

/// Receive-side counters
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RxStats {
    pub received: u64,
    pub corrupt: u64,
    pub overflowed: u64,
}

/// State behind the bookkeeping lock
pub(crate) struct LinkBook {
    pub session: LinkSession,
    pub queue: OutboundQueue,
    pub rx: RxStats,
    pub direct_sent: u64,
    /// Set by a failed direct write; the worker closes the link on its next pass
    pub write_failed: bool,
    /// Set when the worker has exited; nothing is queued after that
    pub stopped: bool,
}

/// State shared between a [`Link`] and its worker
pub(crate) struct Shared {
    pub config: LinkConfig,
    pub handler: Arc<dyn LinkHandler>,
    pub opener: Box<dyn ChannelOpener>,
    pub writer: Mutex<Option<Box<dyn LinkChannel>>>,
    pub book: Mutex<LinkBook>,
    pub stop: AtomicBool,
    pub running: AtomicBool,
}

impl Shared {
    fn new(config: LinkConfig, handler: Arc<dyn LinkHandler>, opener: Box<dyn ChannelOpener>) -> Self {
        let session = LinkSession::new(
            config.board,
            &config.primary_path,
            config.alternate_path.as_deref(),
            config.max_open_failures,
            config.timeouts(),
        );
        let queue = OutboundQueue::new(config.confirm_timeout(), config.max_retries);
        Self {
            config,
            handler,
            opener,
            writer: Mutex::new(None),
            book: Mutex::new(LinkBook {
                session,
                queue,
                rx: RxStats::default(),
                direct_sent: 0,
                write_failed: false,
                stopped: false,
            }),
            stop: AtomicBool::new(false),
            running: AtomicBool::new(false),
        }
    }

    pub fn enqueue(&self, payload: &str, needs_confirm: bool) -> Result<usize, LinkError> {
        let mut book = lock(&self.book);
        if book.stopped {
            return Err(LinkError::Stopped);
        }
        book.queue.enqueue(payload, needs_confirm, Instant::now())
    }

    /// Write a frame now, bypassing the queue. Returns true if it went out.
    pub fn write_direct(&self, payload: &str) -> bool {
        if payload.starts_with('#') {
            return false;
        }
        if let Err(e) = frame::check_payload(payload, false) {
            warn!(board = self.config.board, "Direct message not sent: {}", e);
            return false;
        }
        let frame = frame::encode(payload);
        let result = {
            let mut writer = lock(&self.writer);
            let Some(channel) = writer.as_mut() else {
                return false;
            };
            write_frame(channel.as_mut(), frame.as_bytes())
        };
        match result {
            Ok(()) => {
                trace!(target: "boardlink::traffic", board = self.config.board, "Txd {}", frame.trim_end());
                let mut book = lock(&self.book);
                book.direct_sent += 1;
                book.session.note_outbound(Instant::now());
                true
            }
            Err(WriteFailure::Busy) => {
                warn!(board = self.config.board, "Board not accepting data, skipped: {}", frame.trim_end());
                false
            }
            Err(WriteFailure::Io(e)) => {
                warn!(board = self.config.board, "Direct write failed: {}", e);
                lock(&self.book).write_failed = true;
                false
            }
        }
    }
}

/// Cumulative link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkCounters {
    /// Frames written, queued and direct
    pub sent: u64,
    /// Resends after a confirmation timeout
    pub retried: u64,
    /// Messages dropped after exhausting their retries
    pub dropped: u64,
    /// Confirmations that did not match the pending message
    pub mismatched: u64,
    /// Lines received with a valid checksum
    pub received: u64,
    /// Lines discarded for a bad checksum
    pub corrupt: u64,
    /// Lines discarded for exceeding the length limit
    pub overflowed: u64,
}

/// Snapshot of a link for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    /// Link instance number
    pub board: u32,
    /// Connection state
    pub state: SessionState,
    /// Device path of the current or next open
    pub active_path: String,
    /// Messages waiting in the outbound queue
    pub queue_len: usize,
    /// Identity reported by the board
    pub peer: Option<PeerIdentity>,
    /// Cumulative counters
    pub counters: LinkCounters,
}

/// Reliable command channel to one board
pub struct Link {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Link {
    /// Start a link on a serial device.
    ///
    /// Waits up to `connect_wait_ms` for the device to open; if it does not,
    /// the link keeps trying in the background.
    pub fn setup(config: LinkConfig, handler: Arc<dyn LinkHandler>) -> Result<Self, LinkError> {
        let opener = SerialOpener::new(config.read_timeout());
        Self::setup_with_opener(config, handler, Box::new(opener))
    }

    /// Start a link on channels produced by `opener`
    pub fn setup_with_opener(
        config: LinkConfig,
        handler: Arc<dyn LinkHandler>,
        opener: Box<dyn ChannelOpener>,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        let board = config.board;
        let connect_wait = config.connect_wait();
        let provisioning = config.provision.clone();
        let shared = Arc::new(Shared::new(config, handler, opener));

        if let Some(provision) = provisioning {
            for payload in provision.payloads() {
                shared.enqueue(&payload, true)?;
            }
        }

        shared.running.store(true, Ordering::Release);
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("boardlink-{}", board))
            .spawn(move || worker::run(worker_shared))
            .map_err(|e| {
                shared.running.store(false, Ordering::Release);
                LinkError::WorkerSpawn(e.to_string())
            })?;

        let link = Self {
            shared,
            worker: Some(worker),
        };

        let deadline = Instant::now() + connect_wait;
        while Instant::now() < deadline && !link.state().is_connected() && link.is_running() {
            thread::sleep(WAIT_POLL);
        }
        if !link.state().is_connected() {
            warn!(board, path = %link.active_path(), "Board not connected yet");
        }
        Ok(link)
    }

    /// Send a payload.
    ///
    /// `direct = false` queues it for confirmed, in-order delivery and returns
    /// at once. `direct = true` writes it immediately without confirmation;
    /// false is returned if the board is not connected or not accepting data.
    /// Payloads must be a single line that fits the board's receive buffer,
    /// and nothing is accepted once the worker has stopped.
    pub fn send(&self, payload: &str, direct: bool) -> bool {
        if direct {
            return self.shared.write_direct(payload);
        }
        match self.shared.enqueue(payload, true) {
            Ok(_) => true,
            Err(e) => {
                warn!(board = self.board(), "Message not queued: {}", e);
                false
            }
        }
    }

    /// Queue a payload, choosing whether the board must confirm it.
    /// Returns the queue length after insertion, or [`LinkError::Stopped`]
    /// once the worker has exited.
    pub fn enqueue(&self, payload: &str, needs_confirm: bool) -> Result<usize, LinkError> {
        self.shared.enqueue(payload, needs_confirm)
    }

    /// Send the shutdown messages, let the queue drain briefly, then stop and
    /// join the worker. Called automatically on drop.
    pub fn terminate(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.is_running() {
            for cmd in ControlCommand::shutdown() {
                if let Err(e) = self.shared.enqueue(cmd.payload(), true) {
                    warn!(board = self.board(), "Shutdown message not queued: {}", e);
                }
            }
            let deadline = Instant::now() + self.shared.config.drain_timeout();
            while Instant::now() < deadline
                && self.queue_len() > 0
                && self.state().is_connected()
                && self.is_running()
            {
                thread::sleep(WAIT_POLL);
            }
        }
        self.shared.stop.store(true, Ordering::Release);
        if worker.join().is_err() {
            error!(board = self.board(), "Link worker panicked");
        }
        info!(board = self.board(), "Link terminated");
    }

    /// Link instance number
    pub fn board(&self) -> u32 {
        self.shared.config.board
    }

    /// Configuration the link runs with
    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// True while the worker thread is alive
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Current connection state
    pub fn state(&self) -> SessionState {
        lock(&self.shared.book).session.state()
    }

    /// Device path of the current or next open
    pub fn active_path(&self) -> String {
        lock(&self.shared.book).session.active_path().to_string()
    }

    /// Identity reported by the board, once received
    pub fn peer(&self) -> Option<PeerIdentity> {
        lock(&self.shared.book).session.peer().cloned()
    }

    /// Messages waiting in the outbound queue
    pub fn queue_len(&self) -> usize {
        lock(&self.shared.book).queue.len()
    }

    /// Counter snapshot
    pub fn counters(&self) -> LinkCounters {
        let book = lock(&self.shared.book);
        counters_of(&book)
    }

    /// Full monitoring snapshot, taken under one lock
    pub fn status(&self) -> LinkStatus {
        let book = lock(&self.shared.book);
        LinkStatus {
            board: self.shared.config.board,
            state: book.session.state(),
            active_path: book.session.active_path().to_string(),
            queue_len: book.queue.len(),
            peer: book.session.peer().cloned(),
            counters: counters_of(&book),
        }
    }
}

fn counters_of(book: &LinkBook) -> LinkCounters {
    let q = book.queue.stats();
    LinkCounters {
        sent: q.sent + book.direct_sent,
        retried: q.retried,
        dropped: q.dropped,
        mismatched: q.mismatched,
        received: book.rx.received,
        corrupt: book.rx.corrupt,
        overflowed: book.rx.overflowed,
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.terminate();
    }
}
