//! Callbacks from a link to the subsystem that owns it

use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

use crate::protocol::{DiagnosticKind, PeerIdentity};

/// Receives what a link hears from its board.
///
/// Called from the link's worker thread with no link lock held, so handlers
/// may call back into the [`Link`](super::Link) (e.g. to `send`).
pub trait LinkHandler: Send + Sync {
    /// Interpret one checksummed, non-confirmation line body.
    ///
    /// Returns true if the line was used. Unused lines are only logged.
    fn decode(&self, body: &str, at: DateTime<Utc>) -> bool;

    /// Diagnostic output from the board (`#`, `%` or digit-led lines)
    fn diagnostic(&self, kind: DiagnosticKind, text: &str, _at: DateTime<Utc>) {
        match kind {
            DiagnosticKind::Info => info!(target: "boardlink::board", "{}", text),
            DiagnosticKind::Log | DiagnosticKind::Numeric => {
                debug!(target: "boardlink::board", "{}", text)
            }
        }
    }

    /// The board reported its identity
    fn identified(&self, _peer: &PeerIdentity) {}

    /// A device was just opened; returns payloads to queue (e.g. subscriptions).
    ///
    /// `reconnect` is true when an earlier connection was lost; the queue is
    /// empty at that point, so anything the subsystem relies on must be
    /// requested again.
    fn on_connected(&self, _reconnect: bool) -> Vec<String> {
        Vec::new()
    }

    /// The board could not be opened within the failure bound. The whole
    /// system is expected to shut down.
    fn system_stop(&self, reason: &str) {
        error!("System stop requested: {}", reason);
    }
}

impl<F> LinkHandler for F
where
    F: Fn(&str, DateTime<Utc>) -> bool + Send + Sync,
{
    fn decode(&self, body: &str, at: DateTime<Utc>) -> bool {
        self(body, at)
    }
}
