//! Link session state machine
//!
//! Tracks one board connection through
//! `Disconnected -> Opening -> ConnectedUnverified -> ConnectedActive`.
//! Every failure or timeout drops straight back to `Disconnected`. The session
//! holds no I/O handle itself; the service loop owns the reader and the write
//! lock owns the writer, and both follow the transitions recorded here.
//!
//! All methods take the current time explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::router::PeerIdentity;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No device open
    Disconnected,
    /// Open in progress
    Opening,
    /// Device open, nothing received yet
    ConnectedUnverified,
    /// Device open and the board is talking
    ConnectedActive,
}

impl SessionState {
    /// True for both connected states
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            SessionState::ConnectedUnverified | SessionState::ConnectedActive
        )
    }
}

/// Why a connection was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Nothing received within the unverified bound after opening
    Unverified,
    /// Inbound silence beyond the idle bound
    Silence,
    /// Writing to the device failed
    WriteError,
    /// Reading from the device failed
    ReadError,
    /// Link shut down by its owner
    Stopped,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::Unverified => "no response after connect",
            CloseReason::Silence => "board went silent",
            CloseReason::WriteError => "write error",
            CloseReason::ReadError => "read error",
            CloseReason::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Result of a failed open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenFailure {
    /// Try again later on `next_path`
    Retry {
        /// Path for the next attempt
        next_path: String,
        /// Consecutive failures so far
        failures: u32,
    },
    /// Failure bound exceeded; the system must stop. Reported only once.
    GiveUp {
        /// Consecutive failures so far
        failures: u32,
    },
    /// Bound already exceeded and reported earlier
    Exhausted,
}

/// Timing bounds of a session
#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// Max time in `ConnectedUnverified` before a valid line arrives
    pub unverified: Duration,
    /// Max inbound silence in `ConnectedActive`
    pub idle: Duration,
    /// Tick-to-tick gap treated as a host clock discontinuity
    pub clock_jump: Duration,
    /// Send a keepalive after this long without any write
    pub keepalive: Duration,
}

/// Connection bookkeeping for one board
#[derive(Debug)]
pub struct LinkSession {
    board: u32,
    state: SessionState,
    primary: String,
    alternate: Option<String>,
    active_path: String,
    open_failures: u32,
    max_open_failures: u32,
    stop_signalled: bool,
    ever_connected: bool,
    just_connected: bool,
    reconnect: bool,
    connected_at: Option<Instant>,
    last_rx: Option<Instant>,
    last_tx: Option<Instant>,
    last_tick: Option<Instant>,
    timeouts: SessionTimeouts,
    peer: Option<PeerIdentity>,
}

impl LinkSession {
    /// New session in `Disconnected`; `alternate` is ignored when empty
    pub fn new(
        board: u32,
        primary: &str,
        alternate: Option<&str>,
        max_open_failures: u32,
        timeouts: SessionTimeouts,
    ) -> Self {
        Self {
            board,
            state: SessionState::Disconnected,
            primary: primary.to_string(),
            alternate: alternate.filter(|a| !a.is_empty()).map(str::to_string),
            active_path: primary.to_string(),
            open_failures: 0,
            max_open_failures,
            stop_signalled: false,
            ever_connected: false,
            just_connected: false,
            reconnect: false,
            connected_at: None,
            last_rx: None,
            last_tx: None,
            last_tick: None,
            timeouts,
            peer: None,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Device path of the current or next open
    pub fn active_path(&self) -> &str {
        &self.active_path
    }

    /// Consecutive failed opens since the last success
    pub fn open_failures(&self) -> u32 {
        self.open_failures
    }

    /// Identity reported by the board, kept across reconnects
    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    /// Record the board's identity
    pub fn set_peer(&mut self, peer: PeerIdentity) {
        self.peer = Some(peer);
    }

    /// Enter `Opening` and return the path to open
    pub fn begin_open(&mut self) -> &str {
        self.state = SessionState::Opening;
        &self.active_path
    }

    /// Device opened. Returns true if this is a re-open after an earlier connection.
    pub fn open_succeeded(&mut self, now: Instant) -> bool {
        let reconnect = self.ever_connected;
        self.reconnect = reconnect;
        self.state = SessionState::ConnectedUnverified;
        self.ever_connected = true;
        self.just_connected = true;
        self.open_failures = 0;
        self.connected_at = Some(now);
        self.last_tick = Some(now);
        info!(board = self.board, path = %self.active_path, reconnect, "Board device open");
        reconnect
    }

    /// Device failed to open; switches to the other path if one is configured
    pub fn open_failed(&mut self) -> OpenFailure {
        self.state = SessionState::Disconnected;
        self.open_failures += 1;
        if let Some(alt) = &self.alternate {
            self.active_path = if self.active_path == self.primary {
                alt.clone()
            } else {
                self.primary.clone()
            };
        }
        if self.open_failures > self.max_open_failures {
            if self.stop_signalled {
                return OpenFailure::Exhausted;
            }
            self.stop_signalled = true;
            return OpenFailure::GiveUp {
                failures: self.open_failures,
            };
        }
        OpenFailure::Retry {
            next_path: self.active_path.clone(),
            failures: self.open_failures,
        }
    }

    /// Returns `Some(reconnect)` once after each successful open
    pub fn take_just_connected(&mut self) -> Option<bool> {
        if !self.just_connected {
            return None;
        }
        self.just_connected = false;
        Some(self.reconnect)
    }

    /// A line arrived. `parsed` is true if its checksum verified.
    pub fn note_inbound(&mut self, now: Instant, parsed: bool) {
        self.last_rx = Some(now);
        if parsed && self.state == SessionState::ConnectedUnverified {
            self.state = SessionState::ConnectedActive;
            info!(board = self.board, "Board link verified");
        }
    }

    /// Something was written to the board
    pub fn note_outbound(&mut self, now: Instant) {
        self.last_tx = Some(now);
    }

    /// True if a keepalive should be sent now
    pub fn keepalive_due(&self, now: Instant) -> bool {
        if !self.state.is_connected() {
            return false;
        }
        match self.last_tx {
            Some(t) => now.saturating_duration_since(t) > self.timeouts.keepalive,
            None => true,
        }
    }

    /// Periodic timeout check; returns the reason if the link must close.
    ///
    /// A gap since the previous tick larger than the clock-jump bound is
    /// treated as a host clock discontinuity: the timers restart instead of
    /// closing the connection.
    pub fn tick(&mut self, now: Instant) -> Option<CloseReason> {
        let previous = self.last_tick.replace(now);
        if !self.state.is_connected() {
            return None;
        }
        if let Some(prev) = previous {
            let gap = now.saturating_duration_since(prev);
            if gap > self.timeouts.clock_jump {
                warn!(
                    board = self.board,
                    gap_ms = gap.as_millis() as u64,
                    "Time glitch detected, keeping connection"
                );
                self.last_rx = Some(now);
                if self.state == SessionState::ConnectedUnverified {
                    self.connected_at = Some(now);
                }
                return None;
            }
        }
        match self.state {
            SessionState::ConnectedUnverified => {
                let since = self.connected_at?;
                (now.saturating_duration_since(since) > self.timeouts.unverified)
                    .then_some(CloseReason::Unverified)
            }
            SessionState::ConnectedActive => {
                let since = self.last_rx?;
                (now.saturating_duration_since(since) > self.timeouts.idle)
                    .then_some(CloseReason::Silence)
            }
            _ => None,
        }
    }

    /// Return to `Disconnected`, forgetting all connection timers
    pub fn close(&mut self, reason: CloseReason) -> SessionState {
        let previous = self.state;
        self.state = SessionState::Disconnected;
        self.just_connected = false;
        self.connected_at = None;
        self.last_rx = None;
        self.last_tx = None;
        self.last_tick = None;
        if previous.is_connected() {
            info!(board = self.board, %reason, "Board link closed");
        }
        previous
    }
}
