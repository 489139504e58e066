//! Board line protocol
//!
//! Implements the checksummed text-line protocol spoken by the motor
//! controller board, the confirm/retry outbound queue and the connection
//! state machine that the link worker drives.

pub mod assembler;
pub mod commands;
mod error;
pub mod frame;
pub mod queue;
pub mod router;
pub mod serial;
pub mod session;
pub mod stream;

pub use assembler::{Assembled, LineAssembler};
pub use commands::{ControlCommand, Provisioning};
pub use error::LinkError;
pub use frame::Decoded;
pub use queue::{ConfirmOutcome, MessageState, OutboundMessage, OutboundQueue, QueueAction, QueueStats};
pub use router::{classify, DiagnosticKind, PeerIdentity, Route};
pub use serial::{find_board_ports, BoardPort};
pub use session::{CloseReason, LinkSession, OpenFailure, SessionState, SessionTimeouts};
pub use stream::{ChannelOpener, LinkChannel, SerialChannel, SerialOpener};

/// Default line rate of the board's USB serial port
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Marker in front of a payload asking the board to confirm it
pub const CONFIRM_MARKER: char = '!';

/// Longest frame the board accepts (its receive buffer holds 200 bytes)
pub const MAX_FRAME_LEN: usize = 199;
