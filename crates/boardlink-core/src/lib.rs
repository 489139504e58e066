//! # Boardlink Core Library
//!
//! Host-side link engine for motor-controller boards attached over a USB
//! serial port.
//!
//! This library provides:
//! - The checksummed text-line frame format spoken by the board
//! - A confirm/retry outbound queue with at most one message in flight
//! - A connection session with alternate device paths, silence detection
//!   and host clock-jump tolerance
//! - A per-board worker thread and the [`Link`](link::Link) facade
//! - A registry for systems with several boards
//!
//! ## Example
//!
//! ```rust,no_run
//! use boardlink_core::prelude::*;
//! use std::sync::Arc;
//!
//! let config = LinkConfig::for_device(0, "/dev/ttyACM0");
//! let handler = Arc::new(|body: &str, _at: chrono::DateTime<chrono::Utc>| {
//!     println!("board: {}", body);
//!     true
//! });
//! let mut link = Link::setup(config, handler)?;
//!
//! link.send("motv 3.0 3.0", false);
//! link.terminate();
//! # Ok::<(), LinkError>(())
//! ```

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod link;
pub mod protocol;
pub mod registry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::LinkConfig;
    pub use crate::link::{Link, LinkCounters, LinkHandler, LinkStatus};
    pub use crate::protocol::{
        find_board_ports, BoardPort, ChannelOpener, DiagnosticKind, LinkChannel, LinkError,
        PeerIdentity, Provisioning, SessionState,
    };
    pub use crate::registry::BoardLinks;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
