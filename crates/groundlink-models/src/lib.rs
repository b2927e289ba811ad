#![deny(missing_docs)]

//! # GroundLink Models
//!
//! Wire-level data types and codecs for the GroundLink telemetry link.
//!
//! Two incompatible protocols are supported:
//!
//! ```text
//! MicroLink (homebrew FC)          MAVLink (standard autopilots)
//! ├── selected-message data frames ├── self-identifying v1/v2 frames
//! ├── additive 8-bit checksum      ├── CRC-16/MCRF4XX + CRC_EXTRA
//! └── fixed build-time schema      └── built-in dialect dictionary
//! ```
//!
//! ## Module layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`value`] | Field type tags and decoded scalar values |
//! | [`catalog`] | Message schemas and catalog entries |
//! | [`microlink`] | MicroLink framing, checksum, static schema table |
//! | [`mavlink`] | MAVLink framing, CRC, dialect dictionary, encoder |
//! | [`command`] | High-level command intents, flight modes, PID gains |
//! | [`error`] | [`ProtocolError`](error::ProtocolError) |

pub mod catalog;
pub mod command;
pub mod error;
pub mod mavlink;
pub mod microlink;
pub mod value;

// Re-export all public types at crate root for convenience.
// Downstream crates can use `groundlink_models::FieldValue` directly.
pub use catalog::*;
pub use command::*;
pub use error::*;
pub use value::*;
