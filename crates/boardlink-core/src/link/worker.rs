//! Link service loop
//!
//! One thread per board. Each pass: honour a stop request, (re)open the
//! device when disconnected, run the session timers, fire the handshake after
//! a fresh open, read whatever bytes arrived within the read timeout, then
//! service the head of the outbound queue and the keepalive.
//!
//! The reader handle lives only here. Writes go through the shared write
//! lock, and the bookkeeping lock is never held while writing or while a
//! handler callback runs.

use chrono::{DateTime, Utc};
use std::io::{ErrorKind, Read};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use super::{lock, write_frame, Shared, WriteFailure};
use crate::protocol::{
    classify, frame, Assembled, CloseReason, ControlCommand, Decoded, LineAssembler, LinkChannel,
    OpenFailure, QueueAction, Route,
};

/// Bytes taken from the device per read
const READ_CHUNK: usize = 64;

/// Open failures reported at warn level before going quiet
const LOUD_OPEN_FAILURES: u32 = 5;

/// Granularity of interruptible pauses
const PAUSE_SLICE: Duration = Duration::from_millis(10);

enum Step {
    Continue,
    Exit,
}

/// Entry point of the worker thread
pub(crate) fn run(shared: Arc<Shared>) {
    let board = shared.config.board;
    debug!(board, "Link worker started");
    let mut worker = Worker::new(shared);
    worker.run();
    let abandoned = {
        let mut book = lock(&worker.shared.book);
        book.stopped = true;
        book.queue.clear()
    };
    if abandoned > 0 {
        debug!(board, abandoned, "Queued messages abandoned");
    }
    worker.shared.running.store(false, Ordering::Release);
    debug!(board, "Link worker stopped");
}

struct Worker {
    shared: Arc<Shared>,
    reader: Option<Box<dyn LinkChannel>>,
    assembler: LineAssembler,
}

impl Worker {
    fn new(shared: Arc<Shared>) -> Self {
        let assembler = LineAssembler::new(shared.config.max_line_len);
        Self {
            shared,
            reader: None,
            assembler,
        }
    }

    fn board(&self) -> u32 {
        self.shared.config.board
    }

    fn run(&mut self) {
        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                self.close(CloseReason::Stopped);
                break;
            }
            if self.reader.is_none() {
                match self.open() {
                    Step::Continue => continue,
                    Step::Exit => break,
                }
            }
            if let Some(reason) = self.check_timers(Instant::now()) {
                self.close(reason);
                continue;
            }
            self.handshake_if_new();
            if !self.read_input() {
                continue;
            }
            self.service_queue();
            self.keepalive();
        }
    }

    fn open(&mut self) -> Step {
        let config = &self.shared.config;
        let path = lock(&self.shared.book).session.begin_open().to_string();
        let opened = self
            .shared
            .opener
            .open(&path, config.baud_rate)
            .and_then(|mut channel| {
                channel.set_timeout(config.read_timeout())?;
                channel.clear_input_buffer()?;
                let reader = channel.try_clone()?;
                Ok((channel, reader))
            });

        match opened {
            Ok((writer, reader)) => {
                *lock(&self.shared.writer) = Some(writer);
                self.reader = Some(reader);
                self.assembler.reset();
                lock(&self.shared.book).session.open_succeeded(Instant::now());
                Step::Continue
            }
            Err(e) => {
                let outcome = lock(&self.shared.book).session.open_failed();
                match outcome {
                    OpenFailure::Retry {
                        next_path,
                        failures,
                    } => {
                        if failures <= LOUD_OPEN_FAILURES {
                            warn!(board = self.board(), %path, failures, "Open failed: {}", e);
                        } else {
                            debug!(board = self.board(), %path, failures, "Open failed: {}", e);
                        }
                        trace!(board = self.board(), %next_path, "Next open attempt");
                        self.pause(config.open_retry_delay());
                        Step::Continue
                    }
                    OpenFailure::GiveUp { failures } => {
                        let reason = format!(
                            "board {} could not be opened after {} attempts (last {}: {})",
                            self.board(),
                            failures,
                            path,
                            e
                        );
                        error!(board = self.board(), failures, "Giving up on board device");
                        self.shared.handler.system_stop(&reason);
                        Step::Exit
                    }
                    OpenFailure::Exhausted => Step::Exit,
                }
            }
        }
    }

    /// Sleep up to `total`, waking early on a stop request
    fn pause(&self, total: Duration) {
        let deadline = Instant::now() + total;
        while !self.shared.stop.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(PAUSE_SLICE.min(deadline - now));
        }
    }

    fn check_timers(&self, now: Instant) -> Option<CloseReason> {
        let mut book = lock(&self.shared.book);
        if std::mem::take(&mut book.write_failed) {
            return Some(CloseReason::WriteError);
        }
        book.session.tick(now)
    }

    fn handshake_if_new(&self) {
        let just = lock(&self.shared.book).session.take_just_connected();
        let Some(reconnect) = just else {
            return;
        };
        for cmd in ControlCommand::handshake() {
            self.shared.write_direct(cmd.payload());
        }
        if reconnect {
            info!(board = self.board(), "Board reconnected, re-initialising");
        }
        for payload in self.shared.handler.on_connected(reconnect) {
            if let Err(e) = self.shared.enqueue(&payload, true) {
                warn!(board = self.board(), "Connect message not queued: {}", e);
            }
        }
    }

    /// Returns false if the link was closed by a read error
    fn read_input(&mut self) -> bool {
        let Some(reader) = self.reader.as_mut() else {
            return false;
        };
        let mut buf = [0u8; READ_CHUNK];
        match reader.read(&mut buf) {
            Ok(0) => {
                thread::sleep(self.shared.config.read_timeout());
                true
            }
            Ok(n) => {
                let now = Utc::now();
                let done: Vec<Assembled> = buf[..n]
                    .iter()
                    .filter_map(|&b| self.assembler.push(b, now))
                    .collect();
                for item in done {
                    self.handle_assembled(item);
                }
                true
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                true
            }
            Err(e) => {
                warn!(board = self.board(), "Read failed: {}", e);
                self.close(CloseReason::ReadError);
                false
            }
        }
    }

    fn handle_assembled(&self, item: Assembled) {
        match item {
            Assembled::Line { text, at } => self.handle_line(&text, at),
            Assembled::Overflow { discarded } => {
                warn!(board = self.board(), discarded, "Inbound line too long, discarded");
                lock(&self.shared.book).rx.overflowed += 1;
            }
        }
    }

    fn handle_line(&self, text: &str, at: DateTime<Utc>) {
        trace!(target: "boardlink::traffic", board = self.board(), "Rx {}", text.trim_end());
        let now = Instant::now();
        let body = match frame::decode(text) {
            Decoded::Valid(body) => body,
            Decoded::Unchecked(body) if self.shared.config.accept_unchecked => body,
            Decoded::Unchecked(body) => {
                lock(&self.shared.book).session.note_inbound(now, false);
                debug!(board = self.board(), "Untagged line ignored: {}", body);
                return;
            }
            Decoded::Corrupt { expected, actual } => {
                {
                    let mut book = lock(&self.shared.book);
                    book.rx.corrupt += 1;
                    book.session.note_inbound(now, false);
                }
                warn!(
                    board = self.board(),
                    expected,
                    actual,
                    "Line discarded (checksum error): {}",
                    text.trim_end()
                );
                return;
            }
            Decoded::Malformed => {
                {
                    let mut book = lock(&self.shared.book);
                    book.rx.corrupt += 1;
                    book.session.note_inbound(now, false);
                }
                warn!(board = self.board(), "Line discarded (bad checksum tag): {}", text.trim_end());
                return;
            }
        };
        {
            let mut book = lock(&self.shared.book);
            book.rx.received += 1;
            book.session.note_inbound(now, true);
        }
        self.route(body, at);
    }

    fn route(&self, body: &str, at: DateTime<Utc>) {
        match classify(body) {
            Route::Confirm(echo) => {
                let outcome = lock(&self.shared.book).queue.confirm(echo);
                trace!(board = self.board(), ?outcome, "Confirmation: {}", echo);
            }
            Route::Identify(peer) => {
                info!(board = self.board(), name = %peer.name, "Board identified");
                lock(&self.shared.book).session.set_peer(peer.clone());
                self.shared.handler.identified(&peer);
                self.decode(body, at);
            }
            Route::Diagnostic { kind, text } => self.shared.handler.diagnostic(kind, text, at),
            Route::Telemetry(body) => self.decode(body, at),
        }
    }

    fn decode(&self, body: &str, at: DateTime<Utc>) {
        if !self.shared.handler.decode(body, at) {
            debug!(board = self.board(), "Unused board message: {}", body);
        }
    }

    fn service_queue(&mut self) {
        let action = lock(&self.shared.book).queue.service_head(Instant::now());
        let QueueAction::SendNow(frame) = action else {
            return;
        };
        let result = {
            let mut writer = lock(&self.shared.writer);
            match writer.as_mut() {
                Some(channel) => write_frame(channel.as_mut(), frame.as_bytes()),
                None => return,
            }
        };
        match result {
            Ok(()) => {
                let now = Instant::now();
                let mut book = lock(&self.shared.book);
                book.queue.mark_sent(now);
                book.session.note_outbound(now);
            }
            Err(WriteFailure::Busy) => {
                debug!(board = self.board(), "Write buffer full, queued message waits");
            }
            Err(WriteFailure::Io(e)) => {
                warn!(board = self.board(), "Write failed: {}", e);
                self.close(CloseReason::WriteError);
            }
        }
    }

    fn keepalive(&self) {
        let due = lock(&self.shared.book).session.keepalive_due(Instant::now());
        if due {
            self.shared.write_direct(ControlCommand::Alive.payload());
        }
    }

    /// Release the device, drop pending messages and return to `Disconnected`
    fn close(&mut self, reason: CloseReason) {
        drop(lock(&self.shared.writer).take());
        self.reader = None;
        self.assembler.reset();
        let discarded = {
            let mut book = lock(&self.shared.book);
            book.write_failed = false;
            book.session.close(reason);
            book.queue.clear()
        };
        if discarded > 0 {
            debug!(board = self.board(), discarded, %reason, "Outbound queue cleared");
        }
    }
}
