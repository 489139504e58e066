//! Byte transport abstraction
//!
//! The link only needs a readable/writable byte stream that can be split into
//! a reader (owned by the worker) and a writer (shared behind the write
//! lock). Serial ports are the production transport; tests plug in a scripted
//! board through the same traits.

use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;

use super::serial::{clear_input, configure_port, open_port};
use super::LinkError;

/// A byte stream to one board
pub trait LinkChannel: Read + Write + Send {
    /// Set the read/write timeout
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard bytes received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;

    /// Open a second handle on the same stream
    fn try_clone(&self) -> io::Result<Box<dyn LinkChannel>>;
}

/// Opens channels by device path
pub trait ChannelOpener: Send + Sync {
    /// Open `path` at `baud_rate`
    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn LinkChannel>, LinkError>;
}

/// Serial port wrapper implementing [`LinkChannel`]
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    /// Wrap an opened and configured port
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl LinkChannel for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }

    fn try_clone(&self) -> io::Result<Box<dyn LinkChannel>> {
        let port = self.port.try_clone().map_err(io::Error::other)?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}

/// Opens serial devices with the board's fixed line settings
#[derive(Debug, Clone)]
pub struct SerialOpener {
    read_timeout: Duration,
}

impl SerialOpener {
    /// `read_timeout` bounds each blocking read of the worker
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl ChannelOpener for SerialOpener {
    fn open(&self, path: &str, baud_rate: u32) -> Result<Box<dyn LinkChannel>, LinkError> {
        let mut port = open_port(path, baud_rate, self.read_timeout)?;
        configure_port(port.as_mut())?;
        clear_input(port.as_mut())?;
        Ok(Box::new(SerialChannel::new(port)))
    }
}
