//! Link configuration
//!
//! One `LinkConfig` per attached board, usually loaded from a JSON file:
//!
//! ```json
//! {
//!   "board": 0,
//!   "primary_path": "/dev/ttyACM0",
//!   "alternate_path": "/dev/ttyACM1",
//!   "confirm_timeout_ms": 40,
//!   "max_retries": 3
//! }
//! ```
//!
//! Every field is optional and falls back to the board firmware's defaults.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{BoardPort, LinkError, Provisioning, SessionTimeouts, DEFAULT_BAUD_RATE};

/// Confirmation timeouts below this are treated as unset
const MIN_CONFIRM_TIMEOUT_MS: u64 = 10;

/// Used instead of an unset confirmation timeout
const FALLBACK_CONFIRM_TIMEOUT_MS: u64 = 20;

/// Settings of one board link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Link instance number, used in logs and as registry key
    pub board: u32,

    /// Device opened first
    pub primary_path: String,

    /// Device tried after a failed open
    pub alternate_path: Option<String>,

    /// Line rate
    pub baud_rate: u32,

    /// Time to wait for a confirmation before resending
    pub confirm_timeout_ms: u64,

    /// Resends of an unconfirmed message before it is dropped
    pub max_retries: u32,

    /// Consecutive failed opens tolerated before the system is stopped
    pub max_open_failures: u32,

    /// Pause after a failed open
    pub open_retry_delay_ms: u64,

    /// Close if no valid line arrives this long after opening
    pub unverified_timeout_ms: u64,

    /// Close if an active board is silent this long
    pub idle_timeout_ms: u64,

    /// Loop gap treated as a host clock jump rather than silence
    pub clock_jump_ms: u64,

    /// Send a keepalive when nothing was written for this long
    pub keepalive_interval_ms: u64,

    /// Blocking read timeout of the worker
    pub read_timeout_ms: u64,

    /// Longest inbound line accepted
    pub max_line_len: usize,

    /// Route lines without a checksum tag instead of discarding them
    pub accept_unchecked: bool,

    /// How long `setup` waits for the first open
    pub connect_wait_ms: u64,

    /// How long `terminate` waits for the queue to drain
    pub drain_timeout_ms: u64,

    /// Optional one-time board provisioning
    pub provision: Option<Provisioning>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            board: 0,
            primary_path: "/dev/ttyACM0".to_string(),
            alternate_path: Some("/dev/ttyACM1".to_string()),
            baud_rate: DEFAULT_BAUD_RATE,
            confirm_timeout_ms: 40,
            max_retries: 3,
            max_open_failures: 10,
            open_retry_delay_ms: 300,
            unverified_timeout_ms: 20_000,
            idle_timeout_ms: 10_000,
            clock_jump_ms: 2_000,
            keepalive_interval_ms: 900,
            read_timeout_ms: 2,
            max_line_len: 512,
            accept_unchecked: false,
            connect_wait_ms: 10_000,
            drain_timeout_ms: 1_000,
            provision: None,
        }
    }
}

impl LinkConfig {
    /// Default settings for the given device
    pub fn for_device(board: u32, primary_path: &str) -> Self {
        Self {
            board,
            primary_path: primary_path.to_string(),
            alternate_path: None,
            ..Self::default()
        }
    }

    /// Parse from JSON text and validate
    pub fn from_json_str(text: &str) -> Result<Self, LinkError> {
        let config: LinkConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file and validate
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LinkError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Take the device paths from discovered boards.
    ///
    /// The first board becomes the primary path. A second board becomes the
    /// alternate; with only one, the configured alternate is kept unless it
    /// names the same device, in which case the old primary takes its place.
    /// Returns false, changing nothing, if `ports` is empty.
    pub fn use_board_ports(&mut self, ports: &[BoardPort]) -> bool {
        let Some(first) = ports.first() else {
            return false;
        };
        let previous = std::mem::replace(&mut self.primary_path, first.path.clone());
        if let Some(second) = ports.get(1) {
            self.alternate_path = Some(second.path.clone());
        } else if self.alternate_path.as_deref() == Some(first.path.as_str()) {
            self.alternate_path = (previous != first.path).then_some(previous);
        }
        true
    }

    /// Check that the settings can drive a link
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.primary_path.trim().is_empty() {
            return Err(LinkError::InvalidConfig(
                "primary_path must not be empty".to_string(),
            ));
        }
        if self.baud_rate == 0 {
            return Err(LinkError::InvalidConfig(
                "baud_rate must be positive".to_string(),
            ));
        }
        if self.max_line_len == 0 {
            return Err(LinkError::InvalidConfig(
                "max_line_len must be positive".to_string(),
            ));
        }
        if self.idle_timeout_ms <= self.clock_jump_ms {
            return Err(LinkError::InvalidConfig(format!(
                "idle_timeout_ms ({}) must exceed clock_jump_ms ({})",
                self.idle_timeout_ms, self.clock_jump_ms
            )));
        }
        Ok(())
    }

    /// Confirmation timeout; implausibly small values fall back to 20 ms
    pub fn confirm_timeout(&self) -> Duration {
        let ms = if self.confirm_timeout_ms < MIN_CONFIRM_TIMEOUT_MS {
            FALLBACK_CONFIRM_TIMEOUT_MS
        } else {
            self.confirm_timeout_ms
        };
        Duration::from_millis(ms)
    }

    /// Pause after a failed open
    pub fn open_retry_delay(&self) -> Duration {
        Duration::from_millis(self.open_retry_delay_ms)
    }

    /// Blocking read timeout, at least 1 ms
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms.max(1))
    }

    /// How long `setup` waits for the first open
    pub fn connect_wait(&self) -> Duration {
        Duration::from_millis(self.connect_wait_ms)
    }

    /// How long `terminate` waits for the queue to drain
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Session timing bounds
    pub fn timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            unverified: Duration::from_millis(self.unverified_timeout_ms),
            idle: Duration::from_millis(self.idle_timeout_ms),
            clock_jump: Duration::from_millis(self.clock_jump_ms),
            keepalive: Duration::from_millis(self.keepalive_interval_ms),
        }
    }
}
