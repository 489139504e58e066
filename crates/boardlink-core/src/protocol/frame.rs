//! Line frame encoding/decoding
//!
//! Every line on the wire is tagged with a two-digit checksum:
//!
//! ```text
//! ;NN<payload>\n
//! ```
//!
//! `NN` is the sum of the payload's printable bytes (everything at or above
//! the space character) up to and including the first newline, modulo 99,
//! plus one. Control bytes (`\r`, `\n`, ...) are left out of the sum.

use super::{LinkError, MAX_FRAME_LEN};

/// Leading character of a checksum-tagged line
pub const FRAME_START: u8 = b';';

/// Modulus of the line checksum
const CHECKSUM_MODULUS: u32 = 99;

/// Result of decoding one received line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<'a> {
    /// Checksum present and correct; carries the body without the tag and line ending
    Valid(&'a str),
    /// Checksum present but wrong
    Corrupt {
        /// Value recomputed from the body
        expected: u8,
        /// Value found in the tag
        actual: u8,
    },
    /// Starts with `;` but the two checksum digits are missing
    Malformed,
    /// No checksum tag at all (hand-typed or interactive output)
    Unchecked(&'a str),
}

impl Decoded<'_> {
    /// True for a line whose checksum verified
    pub fn is_valid(&self) -> bool {
        matches!(self, Decoded::Valid(_))
    }
}

/// Compute the checksum of `text`.
///
/// Returns the checksum value (1..=99) and whether a newline was found. Only
/// bytes up to and including the first newline are considered.
pub fn checksum(text: &str) -> (u8, bool) {
    let mut sum: u32 = 0;
    let mut got_newline = false;
    for &b in text.as_bytes() {
        if b >= b' ' {
            sum += u32::from(b);
        }
        if b == b'\n' {
            got_newline = true;
            break;
        }
    }
    ((sum % CHECKSUM_MODULUS) as u8 + 1, got_newline)
}

/// Encode a payload into a wire frame.
///
/// A missing newline is appended. Anything after the first newline is not
/// part of the line and is cut off.
pub fn encode(payload: &str) -> String {
    let line = match payload.find('\n') {
        Some(pos) => &payload[..=pos],
        None => payload,
    };
    let (sum, got_newline) = checksum(line);
    let mut frame = String::with_capacity(line.len() + 4);
    frame.push(FRAME_START as char);
    frame.push_str(&format!("{:02}", sum));
    frame.push_str(line);
    if !got_newline {
        frame.push('\n');
    }
    frame
}

/// Length of the frame `encode` would produce for `payload`
pub fn encoded_len(payload: &str) -> usize {
    let line_len = payload.find('\n').map(|p| p + 1).unwrap_or(payload.len() + 1);
    line_len + 3
}

/// True if `payload` fits in the board's receive buffer once framed
pub fn fits(payload: &str) -> bool {
    encoded_len(payload) <= MAX_FRAME_LEN
}

/// Check that `payload` is a single line whose frame fits the board's
/// receive buffer. `marked` adds the confirmation marker to the length.
///
/// Returns the length of the resulting frame.
pub fn check_payload(payload: &str, marked: bool) -> Result<usize, LinkError> {
    if payload.trim_end_matches(['\r', '\n']).contains(['\r', '\n']) {
        return Err(LinkError::InvalidPayload(
            "payload spans more than one line".to_string(),
        ));
    }
    let len = encoded_len(payload) + usize::from(marked);
    if len > MAX_FRAME_LEN {
        return Err(LinkError::MessageTooLong {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(len)
}

/// Decode one received line (with or without its line ending)
pub fn decode(line: &str) -> Decoded<'_> {
    let bytes = line.as_bytes();
    if bytes.first() != Some(&FRAME_START) {
        return Decoded::Unchecked(trim_line_end(line));
    }
    if bytes.len() < 3 || !bytes[1].is_ascii_digit() || !bytes[2].is_ascii_digit() {
        return Decoded::Malformed;
    }
    let actual = (bytes[1] - b'0') * 10 + (bytes[2] - b'0');
    let body = &line[3..];
    let sum: u32 = body
        .bytes()
        .filter(|&b| b >= b' ')
        .map(u32::from)
        .sum();
    let expected = (sum % CHECKSUM_MODULUS) as u8 + 1;
    if expected == actual {
        Decoded::Valid(trim_line_end(body))
    } else {
        Decoded::Corrupt { expected, actual }
    }
}

fn trim_line_end(s: &str) -> &str {
    s.trim_end_matches(['\r', '\n'])
}
