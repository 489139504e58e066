//! Serial port handling
//!
//! Finding attached boards, and the fixed line settings the board firmware
//! expects (8N1, no flow control, DTR asserted).

use serde::Serialize;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::time::Duration;
use tracing::{debug, warn};

use super::LinkError;

/// USB vendor id of the board's microcontroller (PJRC Teensy)
pub const BOARD_USB_VID: u16 = 0x16C0;

/// USB serial device hosting a board
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardPort {
    /// Device path, e.g. `/dev/ttyACM0`
    pub path: String,

    /// USB serial number; tells boards apart when several are attached
    pub serial_number: Option<String>,

    /// USB product string
    pub product: Option<String>,
}

impl BoardPort {
    /// The board behind `info`, if it is one
    fn from_info(info: SerialPortInfo) -> Option<Self> {
        match info.port_type {
            SerialPortType::UsbPort(usb) if usb.vid == BOARD_USB_VID => Some(Self {
                path: info.port_name,
                serial_number: usb.serial_number,
                product: usb.product,
            }),
            _ => None,
        }
    }
}

/// Trailing number of a device path (`/dev/ttyACM12` is 12)
fn device_index(path: &str) -> Option<u32> {
    let stem = path.trim_end_matches(|c: char| c.is_ascii_digit());
    path[stem.len()..].parse().ok()
}

/// Order boards by device number, so `ttyACM2` comes before `ttyACM10`
fn sort_boards(boards: &mut [BoardPort]) {
    boards.sort_by(|a, b| {
        (device_index(&a.path), &a.path).cmp(&(device_index(&b.path), &b.path))
    });
}

/// Boards currently attached, lowest device number first
pub fn find_board_ports() -> Vec<BoardPort> {
    let ports = match serialport::available_ports() {
        Ok(ports) => ports,
        Err(e) => {
            warn!("Serial port enumeration failed: {}", e);
            return Vec::new();
        }
    };
    let mut boards: Vec<BoardPort> = ports.into_iter().filter_map(BoardPort::from_info).collect();
    sort_boards(&mut boards);
    debug!(found = boards.len(), "Board ports enumerated");
    boards
}

/// Open a serial device; reads block for at most `read_timeout`
pub fn open_port(
    name: &str,
    baud_rate: u32,
    read_timeout: Duration,
) -> Result<Box<dyn SerialPort>, LinkError> {
    Ok(serialport::new(name, baud_rate)
        .timeout(read_timeout)
        .open()?)
}

/// Apply 8N1 without flow control and raise DTR/RTS
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), LinkError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    // the board only transmits while DTR is asserted
    if let Err(e) = port.write_data_terminal_ready(true) {
        warn!("Failed to set DTR high: {} (continuing)", e);
    }
    if let Err(e) = port.write_request_to_send(true) {
        warn!("Failed to set RTS high: {} (continuing)", e);
    }
    Ok(())
}

/// Discard stale input left from before the port was opened
pub fn clear_input(port: &mut dyn SerialPort) -> Result<(), LinkError> {
    Ok(port.clear(serialport::ClearBuffer::Input)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn board(path: &str) -> BoardPort {
        BoardPort {
            path: path.to_string(),
            serial_number: None,
            product: None,
        }
    }

    #[test]
    fn test_device_index() {
        assert_eq!(device_index("/dev/ttyACM0"), Some(0));
        assert_eq!(device_index("/dev/ttyACM12"), Some(12));
        assert_eq!(device_index("COM3"), Some(3));
        assert_eq!(device_index("/dev/teensy"), None);
    }

    #[test]
    fn test_boards_sorted_numerically() {
        let mut boards: Vec<BoardPort> = ["/dev/ttyACM10", "/dev/ttyACM2", "/dev/ttyACM0"]
            .into_iter()
            .map(board)
            .collect();
        sort_boards(&mut boards);
        let paths: Vec<&str> = boards.iter().map(|b| b.path.as_str()).collect();
        assert_eq!(paths, vec!["/dev/ttyACM0", "/dev/ttyACM2", "/dev/ttyACM10"]);
    }

    #[test]
    fn test_non_usb_ports_are_not_boards() {
        let info = SerialPortInfo {
            port_name: "/dev/ttyS0".to_string(),
            port_type: SerialPortType::Unknown,
        };
        assert_eq!(BoardPort::from_info(info), None);
    }

    #[test]
    fn test_find_board_ports_does_not_panic() {
        for port in find_board_ports() {
            assert!(!port.path.is_empty());
        }
    }
}
