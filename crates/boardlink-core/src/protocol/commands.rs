//! Link control commands
//!
//! The messages the link itself sends to the board, independent of what the
//! robot subsystems send through it.

use serde::{Deserialize, Serialize};

/// Control messages issued by the link engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Ask the board to identify itself (answered by a `dname` line)
    Identify,

    /// Cancel all subscriptions left over from an earlier session
    Leave,

    /// Keep the board's host-timeout from firing
    Alive,

    /// Tell the board display that the host has stopped
    DisplayStopped,

    /// Save board settings to flash
    SaveToFlash,
}

impl ControlCommand {
    /// Payload text, newline-terminated
    pub fn payload(&self) -> &'static str {
        match self {
            ControlCommand::Identify => "hbti\n",
            ControlCommand::Leave => "leave\n",
            ControlCommand::Alive => "alive\n",
            ControlCommand::DisplayStopped => "disp stopped\n",
            ControlCommand::SaveToFlash => "eew\n",
        }
    }

    /// Sent when a connection has just been opened
    pub fn handshake() -> [ControlCommand; 2] {
        [ControlCommand::Identify, ControlCommand::Leave]
    }

    /// Queued by `terminate` before the worker is stopped
    pub fn shutdown() -> [ControlCommand; 2] {
        [ControlCommand::Leave, ControlCommand::DisplayStopped]
    }
}

/// One-time board provisioning, queued by `setup` when configured
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Provisioning {
    /// Robot index to store on the board
    pub index: Option<u32>,
    /// Hardware revision to store on the board
    pub hardware: Option<u32>,
    /// Encoder A/B channels are swapped on all motors
    pub encoder_reversed: bool,
    /// Board personality, e.g. `robobot`
    pub robot_type: Option<String>,
}

impl Provisioning {
    /// Payloads in the order the board expects them, ending with a flash save
    pub fn payloads(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(index) = self.index {
            out.push(format!("setidx {}\n", index));
        }
        if let Some(hw) = self.hardware {
            out.push(format!("sethw {}\n", hw));
        }
        out.push(format!("motr {}\n", u8::from(self.encoder_reversed)));
        if let Some(kind) = &self.robot_type {
            out.push(format!("setid {}\n", kind));
        }
        out.push(ControlCommand::SaveToFlash.payload().to_string());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_handshake_order() {
        let payloads: Vec<&str> = ControlCommand::handshake()
            .iter()
            .map(|c| c.payload())
            .collect();
        assert_eq!(payloads, vec!["hbti\n", "leave\n"]);
    }

    #[test]
    fn test_provisioning_payloads() {
        let p = Provisioning {
            index: Some(7),
            hardware: Some(6),
            encoder_reversed: true,
            robot_type: Some("robobot".to_string()),
        };
        assert_eq!(
            p.payloads(),
            vec!["setidx 7\n", "sethw 6\n", "motr 1\n", "setid robobot\n", "eew\n"]
        );
    }

    #[test]
    fn test_provisioning_minimal() {
        let p = Provisioning::default();
        assert_eq!(p.payloads(), vec!["motr 0\n", "eew\n"]);
    }
}
