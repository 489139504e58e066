//! Outbound reliable queue
//!
//! Messages go out strictly in enqueue order, and only the head of the queue
//! is ever on the wire. A confirmable head stays in place until the board
//! echoes it back, or until it has timed out `max_retries` times after its
//! first write, at which point it is dropped and counted.

use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::frame::{self, FRAME_START};
use super::{LinkError, CONFIRM_MARKER};

/// Lifecycle of a queued message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MessageState {
    /// Waiting to be written
    Queued,
    /// Written, waiting for the board's confirmation
    SentAwaitingConfirm,
}

/// One message waiting in the outbound queue
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    /// Payload without marker, newline-terminated
    payload: String,
    /// Encoded wire frame
    frame: String,
    needs_confirm: bool,
    state: MessageState,
    queued_at: Instant,
    sent_at: Option<Instant>,
    retries: u32,
}

impl OutboundMessage {
    fn new(payload: &str, needs_confirm: bool, now: Instant) -> Self {
        let mut payload = payload.to_string();
        if !payload.ends_with('\n') {
            payload.push('\n');
        }
        let frame = if needs_confirm {
            frame::encode(&format!("{}{}", CONFIRM_MARKER, payload))
        } else {
            frame::encode(&payload)
        };
        Self {
            payload,
            frame,
            needs_confirm,
            state: MessageState::Queued,
            queued_at: now,
            sent_at: None,
            retries: 0,
        }
    }

    /// Payload text, newline-terminated
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Encoded frame as written to the wire
    pub fn frame(&self) -> &str {
        &self.frame
    }

    /// Whether the board is expected to echo this message
    pub fn needs_confirm(&self) -> bool {
        self.needs_confirm
    }

    /// Current state
    pub fn state(&self) -> MessageState {
        self.state
    }

    /// Time the message entered the queue
    pub fn queued_at(&self) -> Instant {
        self.queued_at
    }

    /// Time of the latest write, if written
    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    /// Number of resends so far
    pub fn retries(&self) -> u32 {
        self.retries
    }

    fn matches_echo(&self, echo: &str) -> bool {
        let echo = echo.strip_prefix(CONFIRM_MARKER).unwrap_or(echo);
        echo.trim_end() == self.payload.trim_end()
    }
}

/// What the service loop should do with the queue head on this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueAction {
    /// Nothing queued
    Idle,
    /// Write this frame, then call [`OutboundQueue::mark_sent`]
    SendNow(String),
    /// Head is in flight and still within its confirmation timeout
    Wait,
    /// Head timed out and was reset for a resend on the next tick
    RetryNow,
    /// Head exhausted its retries and was removed
    DropHead,
}

/// Result of matching a confirmation line against the queue head
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Head confirmed and removed
    Matched,
    /// Head in flight, but the echo names a different message
    Mismatch,
    /// No message is waiting for a confirmation
    Unexpected,
}

/// Cumulative queue statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Frames written from the queue (including resends)
    pub sent: u64,
    /// Resends after a confirmation timeout
    pub retried: u64,
    /// Messages given up after the last retry
    pub dropped: u64,
    /// Confirmations that did not match the head
    pub mismatched: u64,
}

/// Ordered outbound queue with at most one unconfirmed message in flight
#[derive(Debug)]
pub struct OutboundQueue {
    messages: VecDeque<OutboundMessage>,
    confirm_timeout: Duration,
    max_retries: u32,
    stats: QueueStats,
}

impl OutboundQueue {
    /// Create an empty queue
    pub fn new(confirm_timeout: Duration, max_retries: u32) -> Self {
        Self {
            messages: VecDeque::new(),
            confirm_timeout,
            max_retries,
            stats: QueueStats::default(),
        }
    }

    /// Append a message, returning the new queue length
    pub fn enqueue(
        &mut self,
        payload: &str,
        needs_confirm: bool,
        now: Instant,
    ) -> Result<usize, LinkError> {
        frame::check_payload(payload, needs_confirm)?;
        let msg = OutboundMessage::new(payload, needs_confirm, now);
        trace!(
            target: "boardlink::traffic",
            "Qu {} {}",
            self.messages.len() + 1,
            msg.frame.trim_end()
        );
        self.messages.push_back(msg);
        Ok(self.messages.len())
    }

    /// Decide what to do with the head at time `now`
    pub fn service_head(&mut self, now: Instant) -> QueueAction {
        let timeout = self.confirm_timeout;
        let max_retries = self.max_retries;
        let queued = self.messages.len();
        let Some(head) = self.messages.front_mut() else {
            return QueueAction::Idle;
        };
        let sent_at = match (head.state, head.sent_at) {
            (MessageState::Queued, _) | (_, None) => {
                return QueueAction::SendNow(head.frame.clone());
            }
            (MessageState::SentAwaitingConfirm, Some(at)) => at,
        };
        let elapsed = now.saturating_duration_since(sent_at);
        if elapsed <= timeout {
            return QueueAction::Wait;
        }
        if head.retries < max_retries {
            head.retries += 1;
            head.state = MessageState::Queued;
            self.stats.retried += 1;
            debug!(
                retries = head.retries,
                queued,
                elapsed_ms = elapsed.as_millis() as u64,
                "Message retry: {}",
                head.payload.trim_end()
            );
            QueueAction::RetryNow
        } else {
            if let Some(dropped) = self.messages.pop_front() {
                warn!(
                    retries = dropped.retries,
                    "Message dropped without confirmation: {}",
                    dropped.payload.trim_end()
                );
            }
            self.stats.dropped += 1;
            QueueAction::DropHead
        }
    }

    /// Record that the head frame has been written at `now`.
    ///
    /// A confirmable head starts waiting for its echo; any other head is done.
    pub fn mark_sent(&mut self, now: Instant) {
        let Some(head) = self.messages.front_mut() else {
            return;
        };
        self.stats.sent += 1;
        trace!(target: "boardlink::traffic", "Tx {}", head.frame.trim_end());
        if head.needs_confirm {
            head.state = MessageState::SentAwaitingConfirm;
            head.sent_at = Some(now);
        } else {
            self.messages.pop_front();
        }
    }

    /// Match a confirmation echo against the head.
    ///
    /// `echo` is the confirmation body after the `confirm ` prefix. A mismatch
    /// is only counted; the head then converges through the timeout path.
    pub fn confirm(&mut self, echo: &str) -> ConfirmOutcome {
        let Some(head) = self.messages.front() else {
            return ConfirmOutcome::Unexpected;
        };
        if head.state != MessageState::SentAwaitingConfirm {
            return ConfirmOutcome::Unexpected;
        }
        if head.matches_echo(echo) {
            self.messages.pop_front();
            ConfirmOutcome::Matched
        } else {
            debug!(
                "Confirm mismatch: '{}' != '{}'",
                echo.trim_end(),
                head.payload.trim_end()
            );
            self.stats.mismatched += 1;
            ConfirmOutcome::Mismatch
        }
    }

    /// Drop every pending message, returning how many were discarded
    pub fn clear(&mut self) -> usize {
        let n = self.messages.len();
        self.messages.clear();
        n
    }

    /// Number of pending messages (the in-flight head included)
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages awaiting confirmation (never more than one)
    pub fn in_flight(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.state == MessageState::SentAwaitingConfirm)
            .count()
    }

    /// Current head, if any
    pub fn head(&self) -> Option<&OutboundMessage> {
        self.messages.front()
    }

    /// Cumulative statistics
    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Confirmation timeout in use
    pub fn confirm_timeout(&self) -> Duration {
        self.confirm_timeout
    }
}

/// True if a raw frame carries the confirmation marker right after its tag
pub fn is_confirmable_frame(frame: &str) -> bool {
    let b = frame.as_bytes();
    b.len() > 3 && b[0] == FRAME_START && b[3] == CONFIRM_MARKER as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_FRAME_LEN;
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_millis(40);

    fn queue(max_retries: u32) -> OutboundQueue {
        OutboundQueue::new(TIMEOUT, max_retries)
    }

    #[test]
    fn test_confirmable_frame_carries_marker() {
        let t0 = Instant::now();
        let mut q = queue(3);
        q.enqueue("motv 3.0 3.0", true, t0).unwrap();
        let head = q.head().unwrap();
        assert_eq!(head.frame(), ";50!motv 3.0 3.0\n");
        assert_eq!(head.payload(), "motv 3.0 3.0\n");
        assert!(is_confirmable_frame(head.frame()));
    }

    #[test]
    fn test_fifo_order() {
        let t0 = Instant::now();
        let mut q = queue(3);
        let payloads: Vec<String> = (0..10).map(|i| format!("cmd {}", i)).collect();
        for p in &payloads {
            q.enqueue(p, true, t0).unwrap();
        }
        let mut written = Vec::new();
        let mut now = t0;
        while let QueueAction::SendNow(frame) = q.service_head(now) {
            written.push(frame);
            q.mark_sent(now);
            let echo = q.head().unwrap().payload().to_string();
            assert_eq!(q.confirm(&format!("!{}", echo)), ConfirmOutcome::Matched);
            now += Duration::from_millis(1);
        }
        let expected: Vec<String> = payloads.iter().map(|p| frame::encode(&format!("!{}", p))).collect();
        assert_eq!(written, expected);
        assert!(q.is_empty());
    }

    #[test]
    fn test_only_head_in_flight() {
        let t0 = Instant::now();
        let mut q = queue(2);
        for i in 0..5 {
            q.enqueue(&format!("m {}", i), true, t0).unwrap();
        }
        let mut now = t0;
        for _ in 0..200 {
            if let QueueAction::SendNow(_) = q.service_head(now) {
                q.mark_sent(now);
            }
            assert!(q.in_flight() <= 1);
            now += Duration::from_millis(7);
        }
        assert!(q.is_empty());
        assert_eq!(q.stats().dropped, 5);
    }

    #[test]
    fn test_retry_then_drop() {
        let t0 = Instant::now();
        let mut q = queue(3);
        q.enqueue("sub enc 10", true, t0).unwrap();

        let mut now = t0;
        let mut writes = Vec::new();
        loop {
            match q.service_head(now) {
                QueueAction::SendNow(_) => {
                    writes.push(now);
                    q.mark_sent(now);
                }
                QueueAction::DropHead => break,
                QueueAction::Idle => panic!("queue emptied without a drop"),
                _ => {}
            }
            now += Duration::from_millis(5);
        }

        assert_eq!(writes.len(), 4);
        for pair in writes.windows(2) {
            assert!(pair[1] - pair[0] >= TIMEOUT);
        }
        let stats = q.stats();
        assert_eq!(stats.retried, 3);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.sent, 4);
        assert!(q.is_empty());
    }

    #[test]
    fn test_confirm_with_and_without_marker() {
        let t0 = Instant::now();
        let mut q = queue(3);
        q.enqueue("motv 3.0 3.0", true, t0).unwrap();
        q.enqueue("motv 0 0", true, t0).unwrap();
        assert!(matches!(q.service_head(t0), QueueAction::SendNow(_)));
        q.mark_sent(t0);
        assert_eq!(q.confirm("!motv 3.0 3.0\r\n"), ConfirmOutcome::Matched);
        assert!(matches!(q.service_head(t0), QueueAction::SendNow(_)));
        q.mark_sent(t0);
        assert_eq!(q.confirm("motv 0 0"), ConfirmOutcome::Matched);
        assert!(q.is_empty());
        assert_eq!(q.stats().mismatched, 0);
    }

    #[test]
    fn test_mismatch_leaves_head() {
        let t0 = Instant::now();
        let mut q = queue(1);
        q.enqueue("motv 3.0 3.0", true, t0).unwrap();
        q.service_head(t0);
        q.mark_sent(t0);
        assert_eq!(q.confirm("!motv 1.0 1.0"), ConfirmOutcome::Mismatch);
        assert_eq!(q.len(), 1);
        assert_eq!(q.stats().mismatched, 1);
        assert_eq!(q.service_head(t0 + TIMEOUT * 2), QueueAction::RetryNow);
    }

    #[test]
    fn test_confirm_without_pending_head() {
        let mut q = queue(3);
        assert_eq!(q.confirm("!alive"), ConfirmOutcome::Unexpected);
        q.enqueue("alive", true, Instant::now()).unwrap();
        assert_eq!(q.confirm("!alive"), ConfirmOutcome::Unexpected);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_unconfirmed_message_leaves_on_write() {
        let t0 = Instant::now();
        let mut q = queue(3);
        q.enqueue("sub hbt 50", false, t0).unwrap();
        assert_eq!(
            q.service_head(t0),
            QueueAction::SendNow(";22sub hbt 50\n".to_string())
        );
        q.mark_sent(t0);
        assert!(q.is_empty());
        assert_eq!(q.in_flight(), 0);
    }

    #[test]
    fn test_rejects_oversized_payload() {
        let mut q = queue(3);
        let long = "x".repeat(MAX_FRAME_LEN);
        assert!(matches!(
            q.enqueue(&long, true, Instant::now()),
            Err(LinkError::MessageTooLong { .. })
        ));
        assert!(matches!(
            q.enqueue("a\nb", true, Instant::now()),
            Err(LinkError::InvalidPayload(_))
        ));
        assert!(q.is_empty());
    }

    #[test]
    fn test_clear() {
        let mut q = queue(3);
        q.enqueue("a", true, Instant::now()).unwrap();
        q.enqueue("b", false, Instant::now()).unwrap();
        assert_eq!(q.clear(), 2);
        assert_eq!(q.service_head(Instant::now()), QueueAction::Idle);
    }
}
