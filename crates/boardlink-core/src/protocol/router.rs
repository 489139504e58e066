//! Inbound line classification
//!
//! Decides where a checksummed line goes: the outbound queue (confirmations),
//! the link itself (identification), the diagnostic sink, or the owning
//! subsystem's decoder.

use serde::{Deserialize, Serialize};

/// Body prefix of a confirmation line
pub const CONFIRM_PREFIX: &str = "confirm";

/// Offset of the echoed payload inside a confirmation body (`confirm `)
pub const CONFIRM_ECHO_OFFSET: usize = CONFIRM_PREFIX.len() + 1;

/// Body prefix of the board's identification line
pub const IDENTIFY_PREFIX: &str = "dname ";

/// Kinds of diagnostic lines sent by the board
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// `#` free text (help, warnings)
    Info,
    /// `%` structured log
    Log,
    /// Line starting with a digit (raw log rows)
    Numeric,
}

/// Board identity reported in a `dname` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerIdentity {
    /// Board personality, e.g. `robobot`
    pub kind: Option<String>,
    /// Robot name
    pub name: String,
}

impl PeerIdentity {
    fn parse(rest: &str) -> Option<Self> {
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }
        match rest.split_once(' ') {
            Some((kind, name)) => Some(Self {
                kind: Some(kind.to_string()),
                name: name.trim().to_string(),
            }),
            None => Some(Self {
                kind: None,
                name: rest.to_string(),
            }),
        }
    }
}

/// Destination of one inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route<'a> {
    /// Confirmation; carries the echoed payload
    Confirm(&'a str),
    /// Board identification
    Identify(PeerIdentity),
    /// Diagnostic output for the log sink
    Diagnostic {
        /// Marker class
        kind: DiagnosticKind,
        /// Full line body
        text: &'a str,
    },
    /// Anything else: handed to the subsystem decoder
    Telemetry(&'a str),
}

/// Classify a checksummed line body
pub fn classify(body: &str) -> Route<'_> {
    if body.starts_with(CONFIRM_PREFIX) {
        return Route::Confirm(body.get(CONFIRM_ECHO_OFFSET..).unwrap_or(""));
    }
    if let Some(rest) = body.strip_prefix(IDENTIFY_PREFIX) {
        if let Some(id) = PeerIdentity::parse(rest) {
            return Route::Identify(id);
        }
    }
    let kind = match body.as_bytes().first() {
        Some(b'#') => Some(DiagnosticKind::Info),
        Some(b'%') => Some(DiagnosticKind::Log),
        Some(b) if b.is_ascii_digit() => Some(DiagnosticKind::Numeric),
        _ => None,
    };
    match kind {
        Some(kind) => Route::Diagnostic { kind, text: body },
        None => Route::Telemetry(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_confirm_echo_offset() {
        assert_eq!(
            classify("confirm !motv 3.0 3.0"),
            Route::Confirm("!motv 3.0 3.0")
        );
        assert_eq!(classify("confirm"), Route::Confirm(""));
    }

    #[test]
    fn test_identification() {
        assert_eq!(
            classify("dname robobot bent"),
            Route::Identify(PeerIdentity {
                kind: Some("robobot".to_string()),
                name: "bent".to_string(),
            })
        );
        assert_eq!(
            classify("dname bent"),
            Route::Identify(PeerIdentity {
                kind: None,
                name: "bent".to_string(),
            })
        );
        assert_eq!(classify("dname "), Route::Telemetry("dname "));
    }

    #[test]
    fn test_diagnostics() {
        assert_eq!(
            classify("# hello"),
            Route::Diagnostic {
                kind: DiagnosticKind::Info,
                text: "# hello"
            }
        );
        assert!(matches!(
            classify("% time log"),
            Route::Diagnostic {
                kind: DiagnosticKind::Log,
                ..
            }
        ));
        assert!(matches!(
            classify("12.5 3 4"),
            Route::Diagnostic {
                kind: DiagnosticKind::Numeric,
                ..
            }
        ));
    }

    #[test]
    fn test_telemetry() {
        assert_eq!(classify("enc 1 2"), Route::Telemetry("enc 1 2"));
        assert_eq!(classify(""), Route::Telemetry(""));
    }
}
