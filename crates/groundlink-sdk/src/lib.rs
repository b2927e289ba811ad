#![deny(missing_docs)]

//! # GroundLink SDK
//!
//! The telemetry link manager: connects a ground-control application to a
//! flight controller over a serial port or UDP socket, decodes the inbound
//! byte stream into typed, timestamped messages, tracks per-message
//! arrival rates, keeps the link alive, and carries outbound commands.
//!
//! # Typical usage
//!
//! ```rust,no_run
//! use groundlink_sdk::{LinkDescriptor, LinkEvent, LinkSession};
//!
//! # async fn run() -> Result<(), groundlink_sdk::LinkError> {
//! let session = LinkSession::new();
//! let mut events = session.subscribe();
//!
//! session
//!     .connect(LinkDescriptor::UdpMavlink {
//!         bind_host: "0.0.0.0".to_string(),
//!         bind_port: 14550,
//!     })
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let LinkEvent::Message(message) = event {
//!         println!("{} at {:.1} Hz", message.id, session.message_rate(message.id));
//!     }
//! }
//!
//! session.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod commands;
pub mod error;
pub mod session;
pub mod stats;
pub mod transport;

pub use adapter::{CommandEncoder, PeerIdentity, ProtocolAdapter, ProtocolKind};
pub use commands::{CommandAck, ACK_TIMEOUT, PID_FRAME_SPACING};
pub use error::LinkError;
pub use session::{
    ConnectionInfo, DecodedMessage, LinkDescriptor, LinkEvent, LinkSession, LinkState,
    HEARTBEAT_INTERVAL, READ_DEADLINE, VERIFY_TIMEOUT,
};
pub use stats::MessageStats;
pub use transport::{list_ports, PortInfo, SerialTransport, Transport, UdpTransport};
