//! Byte-level transports: serial port and UDP socket.
//!
//! A [`Transport`] is a blocking channel with a bounded read: `read`
//! returns `Ok(0)` when the configured timeout expires with no data, so
//! the loops above it can observe their stop signal at a bounded cadence.
//! Every other failure is fatal and surfaces as
//! [`LinkError::Transport`](crate::LinkError::Transport).

use std::io::{Read, Write};
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serialport::{SerialPort, SerialPortType};
use tracing::debug;

use crate::error::LinkError;

/// Timeout configured on every transport; bounds each blocking read.
pub const READ_TIMEOUT: Duration = Duration::from_millis(250);

/// A byte-oriented channel to the flight controller.
pub trait Transport: Send {
    /// Read available bytes, blocking at most the configured timeout.
    ///
    /// Returns `Ok(0)` when the timeout expired with nothing to read.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Write the whole buffer.
    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkError>;
}

/// A transport shared between the reader loop and command senders.
///
/// Reads happen only inside the reader loop; outbound sends serialize on
/// this lock. The short read timeout keeps lock hold times bounded.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Wrap a transport for shared use.
pub fn shared(transport: Box<dyn Transport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

fn is_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
    )
}

// ---------------------------------------------------------------------------
// Serial
// ---------------------------------------------------------------------------

/// Serial-port transport (8N1, configurable baud).
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `port_name` at `baud`.
    pub fn open(port_name: &str, baud: u32) -> Result<Self, LinkError> {
        let port = serialport::new(port_name, baud)
            .timeout(READ_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .open()
            .map_err(|e| LinkError::Transport(format!("open {port_name}: {e}")))?;
        debug!(port = port_name, baud, "serial port open");
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(LinkError::Transport(format!("serial read: {e}"))),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkError> {
        self.port
            .write_all(buf)
            .map_err(|e| LinkError::Transport(format!("serial write: {e}")))
    }
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

/// Listen-side UDP transport.
///
/// Binds locally and learns the autopilot's address from its first
/// datagram; outbound traffic goes back to that address. Writes before the
/// first inbound datagram fail; the connection-verification step
/// guarantees an inbound frame before any command is accepted.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpTransport {
    /// Bind to `host:port` and wait for the autopilot to talk first.
    pub fn bind(host: &str, port: u16) -> Result<Self, LinkError> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(|e| LinkError::Config(format!("bad bind address {host}:{port}: {e}")))?
            .next()
            .ok_or_else(|| LinkError::Config(format!("bad bind address {host}:{port}")))?;
        let socket = UdpSocket::bind(addr)
            .map_err(|e| LinkError::Transport(format!("bind {addr}: {e}")))?;
        socket
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|e| LinkError::Transport(format!("set timeout: {e}")))?;
        debug!(%addr, "udp socket bound");
        Ok(Self { socket, peer: None })
    }
}

impl Transport for UdpTransport {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        match self.socket.recv_from(buf) {
            Ok((n, from)) => {
                if self.peer != Some(from) {
                    debug!(peer = %from, "autopilot address learned");
                    self.peer = Some(from);
                }
                Ok(n)
            }
            Err(e) if is_timeout(&e) => Ok(0),
            Err(e) => Err(LinkError::Transport(format!("udp recv: {e}"))),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<(), LinkError> {
        let peer = self
            .peer
            .ok_or_else(|| LinkError::Transport("autopilot address not yet known".to_string()))?;
        self.socket
            .send_to(buf, peer)
            .map_err(|e| LinkError::Transport(format!("udp send: {e}")))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Port enumeration
// ---------------------------------------------------------------------------

/// One selectable serial device.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// OS device path (`/dev/ttyUSB0`, `COM3`, …).
    pub device: String,
    /// Human-readable description, when the OS provides one.
    pub description: String,
}

/// List the serial ports currently present on the system.
pub fn list_ports() -> Result<Vec<PortInfo>, LinkError> {
    let ports = serialport::available_ports()
        .map_err(|e| LinkError::Transport(format!("port scan: {e}")))?;
    Ok(ports
        .into_iter()
        .map(|p| {
            let description = match p.port_type {
                SerialPortType::UsbPort(info) => info.product.unwrap_or_default(),
                SerialPortType::PciPort => "PCI device".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth device".to_string(),
                SerialPortType::Unknown => String::new(),
            };
            PortInfo {
                device: p.port_name,
                description,
            }
        })
        .collect())
}
