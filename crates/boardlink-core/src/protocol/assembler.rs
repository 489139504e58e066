//! Inbound line assembly
//!
//! Collects received bytes into newline-terminated lines. The buffer is
//! bounded: a line longer than the limit is reported once and the rest of it,
//! up to the next newline, is skipped.

use chrono::{DateTime, Utc};

/// Outcome of feeding one byte
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    /// A complete line (terminator stripped) and the arrival time of its first byte
    Line {
        /// Line text, lossily decoded as UTF-8
        text: String,
        /// Time the first byte of the line arrived
        at: DateTime<Utc>,
    },
    /// The line in progress exceeded the limit and was discarded
    Overflow {
        /// Bytes thrown away
        discarded: usize,
    },
}

/// Bounded accumulator for the line currently being received
#[derive(Debug)]
pub struct LineAssembler {
    buf: Vec<u8>,
    max_len: usize,
    started_at: Option<DateTime<Utc>>,
    skipping: bool,
}

impl LineAssembler {
    /// Create an assembler that accepts lines of up to `max_len` bytes
    pub fn new(max_len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(max_len.min(256)),
            max_len,
            started_at: None,
            skipping: false,
        }
    }

    /// Feed one byte received at `now`
    pub fn push(&mut self, byte: u8, now: DateTime<Utc>) -> Option<Assembled> {
        if byte == b'\n' {
            if self.skipping {
                self.skipping = false;
                return None;
            }
            return self.finish();
        }
        if self.skipping {
            return None;
        }
        if self.buf.is_empty() && byte == b'\r' {
            return None;
        }
        if self.buf.len() >= self.max_len {
            let discarded = self.buf.len() + 1;
            self.reset();
            self.skipping = true;
            return Some(Assembled::Overflow { discarded });
        }
        if self.buf.is_empty() {
            self.started_at = Some(now);
        }
        self.buf.push(byte);
        None
    }

    /// Drop any partial line, e.g. after the port was closed
    pub fn reset(&mut self) {
        self.buf.clear();
        self.started_at = None;
        self.skipping = false;
    }

    /// Bytes held for the line in progress
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn finish(&mut self) -> Option<Assembled> {
        if self.buf.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        let at = self.started_at.take().unwrap_or_else(Utc::now);
        self.buf.clear();
        Some(Assembled::Line { text, at })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(asm: &mut LineAssembler, bytes: &[u8]) -> Vec<Assembled> {
        let now = Utc::now();
        bytes.iter().filter_map(|&b| asm.push(b, now)).collect()
    }

    fn lines(out: &[Assembled]) -> Vec<&str> {
        out.iter()
            .filter_map(|a| match a {
                Assembled::Line { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_splits_lines() {
        let mut asm = LineAssembler::new(64);
        let out = feed(&mut asm, b";21ok\n;78enc 1 2\r\n");
        assert_eq!(lines(&out), vec![";21ok", ";78enc 1 2\r"]);
        assert_eq!(asm.pending(), 0);
    }

    #[test]
    fn test_skips_empty_lines() {
        let mut asm = LineAssembler::new(64);
        let out = feed(&mut asm, b"\r\n\n\r\n;21ok\n");
        assert_eq!(lines(&out), vec![";21ok"]);
    }

    #[test]
    fn test_partial_line_is_held() {
        let mut asm = LineAssembler::new(64);
        assert!(feed(&mut asm, b";21o").is_empty());
        assert_eq!(asm.pending(), 4);
        let out = feed(&mut asm, b"k\n");
        assert_eq!(lines(&out), vec![";21ok"]);
    }

    #[test]
    fn test_overflow_skips_rest_of_line() {
        let mut asm = LineAssembler::new(8);
        let out = feed(&mut asm, b"0123456789abcdef\n;21ok\n");
        assert_eq!(out[0], Assembled::Overflow { discarded: 9 });
        assert_eq!(lines(&out), vec![";21ok"]);
    }

    #[test]
    fn test_line_time_is_first_byte() {
        let mut asm = LineAssembler::new(64);
        let t0 = Utc::now();
        let t1 = t0 + chrono::Duration::milliseconds(5);
        asm.push(b';', t0);
        asm.push(b'x', t1);
        match asm.push(b'\n', t1) {
            Some(Assembled::Line { at, .. }) => assert_eq!(at, t0),
            other => panic!("unexpected {:?}", other),
        }
    }
}
