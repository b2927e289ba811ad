//! Protocol adapters: one read/select surface over both wire formats.
//!
//! The reader loop is written once against [`ProtocolAdapter`]; which
//! variant is active is a construction-time choice, not a subclassing
//! hierarchy. The outbound half lives in [`CommandEncoder`] so command
//! senders and the heartbeat loop can share it (behind the writer lock)
//! while the reader loop exclusively owns the decode state.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use groundlink_models::command::CommandIntent;
use groundlink_models::mavlink::{
    self, FrameEncoder, FrameParser, MAV_TYPE_GCS, MSG_HEARTBEAT,
};
use groundlink_models::microlink::{self, FrameDecoder};
use groundlink_models::value::{FieldMap, FieldValue};
use groundlink_models::MessageSchema;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::LinkError;
use crate::transport::SharedTransport;

/// Which wire protocol a session speaks.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProtocolKind {
    /// The homebrew FC's selected-message protocol.
    MicroLink,
    /// Standard MAVLink.
    Mavlink,
}

/// The autopilot's identity, learned from its heartbeat.
///
/// Shared between the reader loop (which learns it) and the command
/// encoder (which targets it); atomics keep the pair lock-free.
#[derive(Debug, Default)]
pub struct PeerIdentity {
    system: AtomicU8,
    component: AtomicU8,
}

impl PeerIdentity {
    /// Current `(system_id, component_id)` of the autopilot.
    pub fn get(&self) -> (u8, u8) {
        (
            self.system.load(Ordering::Relaxed),
            self.component.load(Ordering::Relaxed),
        )
    }

    fn set(&self, system: u8, component: u8) {
        self.system.store(system, Ordering::Relaxed);
        self.component.store(component, Ordering::Relaxed);
    }
}

fn lock<'a>(
    transport: &'a SharedTransport,
) -> std::sync::MutexGuard<'a, Box<dyn crate::transport::Transport>> {
    transport
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ProtocolAdapter
// ---------------------------------------------------------------------------

/// Inbound decode surface over the active protocol.
pub enum ProtocolAdapter {
    /// Selected-message decoding for the homebrew FC.
    MicroLink(MicroLinkAdapter),
    /// Self-describing frame decoding for MAVLink.
    Mavlink(MavlinkAdapter),
}

impl ProtocolAdapter {
    /// Build the adapter and its paired command encoder for `kind`.
    pub fn build(kind: ProtocolKind, transport: SharedTransport) -> (Self, CommandEncoder) {
        match kind {
            ProtocolKind::MicroLink => (
                ProtocolAdapter::MicroLink(MicroLinkAdapter {
                    transport,
                    decoder: FrameDecoder::new(),
                    selected: None,
                }),
                CommandEncoder::MicroLink,
            ),
            ProtocolKind::Mavlink => {
                let peer = Arc::new(PeerIdentity::default());
                (
                    ProtocolAdapter::Mavlink(MavlinkAdapter {
                        transport,
                        parser: FrameParser::new(),
                        pending: Vec::new(),
                        peer: Arc::clone(&peer),
                    }),
                    CommandEncoder::Mavlink {
                        encoder: FrameEncoder::gcs(),
                        peer,
                    },
                )
            }
        }
    }

    /// The active protocol.
    pub fn protocol(&self) -> ProtocolKind {
        match self {
            ProtocolAdapter::MicroLink(_) => ProtocolKind::MicroLink,
            ProtocolAdapter::Mavlink(_) => ProtocolKind::Mavlink,
        }
    }

    /// Declare which message the next reads will decode.
    ///
    /// MicroLink writes the select frame to the FC; MAVLink frames are
    /// self-identifying, so this is a no-op there.
    pub fn select(&mut self, id: u32) -> Result<(), LinkError> {
        match self {
            ProtocolAdapter::MicroLink(adapter) => adapter.select(id),
            ProtocolAdapter::Mavlink(_) => Ok(()),
        }
    }

    /// Read until one verified frame decodes or `deadline` passes.
    ///
    /// `Ok(None)` is a missed cycle, not a failure; corrupt frames are
    /// skipped silently. `Err` is a fatal transport failure.
    pub fn read_frame(
        &mut self,
        deadline: Instant,
    ) -> Result<Option<(u32, FieldMap)>, LinkError> {
        match self {
            ProtocolAdapter::MicroLink(adapter) => adapter.read_frame(deadline),
            ProtocolAdapter::Mavlink(adapter) => adapter.read_frame(deadline),
        }
    }
}

/// MicroLink decode state: the buffered decoder plus the active selection.
pub struct MicroLinkAdapter {
    transport: SharedTransport,
    decoder: FrameDecoder,
    selected: Option<&'static MessageSchema>,
}

impl MicroLinkAdapter {
    fn select(&mut self, id: u32) -> Result<(), LinkError> {
        let narrow =
            u8::try_from(id).map_err(|_| groundlink_models::ProtocolError::UnknownMessage(id))?;
        let schema = microlink::schema(narrow)
            .ok_or(groundlink_models::ProtocolError::UnknownMessage(id))?;
        lock(&self.transport).write_all(&microlink::encode_select(narrow))?;
        self.selected = Some(schema);
        trace!(id, "message selected");
        Ok(())
    }

    fn read_frame(&mut self, deadline: Instant) -> Result<Option<(u32, FieldMap)>, LinkError> {
        let Some(schema) = self.selected else {
            return Err(LinkError::Config("no message selected".to_string()));
        };
        loop {
            if let Some(fields) = self.decoder.try_decode(schema) {
                return Ok(Some((schema.id, fields)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            let mut buf = [0u8; 512];
            let n = lock(&self.transport).read(&mut buf)?;
            if n > 0 {
                self.decoder.push_bytes(&buf[..n]);
            }
        }
    }
}

/// MAVLink decode state: the streaming parser, unparsed backlog, and the
/// peer identity it keeps current from inbound heartbeats.
pub struct MavlinkAdapter {
    transport: SharedTransport,
    parser: FrameParser,
    pending: Vec<u8>,
    peer: Arc<PeerIdentity>,
}

impl MavlinkAdapter {
    fn read_frame(&mut self, deadline: Instant) -> Result<Option<(u32, FieldMap)>, LinkError> {
        loop {
            while !self.pending.is_empty() {
                let (consumed, frame) = self.parser.push_bytes(&self.pending);
                self.pending.drain(..consumed);
                if let Some(frame) = frame {
                    self.learn_peer(&frame);
                    return Ok(Some((frame.id, frame.decode())));
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            let mut buf = [0u8; 1024];
            let n = lock(&self.transport).read(&mut buf)?;
            if n > 0 {
                self.pending.extend_from_slice(&buf[..n]);
            }
        }
    }

    /// Record the autopilot's ids from any non-GCS heartbeat.
    fn learn_peer(&self, frame: &mavlink::MavFrame) {
        if frame.id != MSG_HEARTBEAT {
            return;
        }
        if frame.field("type") == Some(FieldValue::U8(MAV_TYPE_GCS)) {
            return;
        }
        let (system, component) = self.peer.get();
        if (system, component) != (frame.system_id, frame.component_id) {
            debug!(
                system = frame.system_id,
                component = frame.component_id,
                "autopilot identity learned"
            );
            self.peer.set(frame.system_id, frame.component_id);
        }
    }
}

// ---------------------------------------------------------------------------
// CommandEncoder
// ---------------------------------------------------------------------------

/// Outbound encode surface over the active protocol.
///
/// Stateless except for the MAVLink sequence counter and the learned peer
/// identity; shared behind the writer lock by command senders and the
/// heartbeat loop.
pub enum CommandEncoder {
    /// Homebrew FC command frames.
    MicroLink,
    /// MAVLink 1 outbound frames with the GCS identity.
    Mavlink {
        /// Frame encoder carrying the rolling sequence number.
        encoder: FrameEncoder,
        /// The autopilot to target.
        peer: Arc<PeerIdentity>,
    },
}

impl CommandEncoder {
    /// Translate `intent` into wire bytes.
    pub fn encode(&mut self, intent: &CommandIntent) -> Result<Vec<u8>, LinkError> {
        match self {
            CommandEncoder::MicroLink => Self::encode_microlink(intent),
            CommandEncoder::Mavlink { encoder, peer } => {
                let (system, component) = peer.get();
                Self::encode_mavlink(encoder, system, component, intent)
            }
        }
    }

    fn encode_microlink(intent: &CommandIntent) -> Result<Vec<u8>, LinkError> {
        match intent {
            CommandIntent::PidGains { loop_id, gains } => {
                Ok(microlink::encode_command(*loop_id, &gain_bytes(gains))?)
            }
            CommandIntent::Raw { msg_id, data } => {
                let narrow = u8::try_from(*msg_id)
                    .map_err(|_| groundlink_models::ProtocolError::UnknownMessage(*msg_id))?;
                Ok(microlink::encode_command(narrow, data)?)
            }
            CommandIntent::Heartbeat => Err(LinkError::Unsupported("keepalive")),
            CommandIntent::SetMode { .. } => Err(LinkError::Unsupported("flight modes")),
            CommandIntent::ArmDisarm { .. } => Err(LinkError::Unsupported("arming")),
            CommandIntent::ReturnToLaunch => Err(LinkError::Unsupported("return to launch")),
        }
    }

    fn encode_mavlink(
        encoder: &mut FrameEncoder,
        system: u8,
        component: u8,
        intent: &CommandIntent,
    ) -> Result<Vec<u8>, LinkError> {
        let bytes = match intent {
            CommandIntent::Heartbeat => {
                encoder.encode(MSG_HEARTBEAT, &mavlink::heartbeat_gcs_payload())?
            }
            CommandIntent::SetMode { custom_mode } => encoder.encode(
                mavlink::MSG_SET_MODE,
                &mavlink::set_mode_payload(system, *custom_mode),
            )?,
            CommandIntent::ArmDisarm { arm } => {
                let param1 = if *arm { 1.0 } else { 0.0 };
                let param2 = if *arm { mavlink::FORCE_ARM_MAGIC } else { 0.0 };
                encoder.encode(
                    mavlink::MSG_COMMAND_LONG,
                    &mavlink::command_long_payload(
                        system,
                        component,
                        mavlink::MAV_CMD_COMPONENT_ARM_DISARM,
                        [param1, param2, 0.0, 0.0, 0.0, 0.0, 0.0],
                    ),
                )?
            }
            CommandIntent::ReturnToLaunch => encoder.encode(
                mavlink::MSG_COMMAND_LONG,
                &mavlink::command_long_payload(
                    system,
                    component,
                    mavlink::MAV_CMD_NAV_RETURN_TO_LAUNCH,
                    [0.0; 7],
                ),
            )?,
            CommandIntent::PidGains { loop_id, gains } => {
                encoder.encode(u32::from(*loop_id), &gain_bytes(gains))?
            }
            CommandIntent::Raw { msg_id, data } => encoder.encode(*msg_id, data)?,
        };
        Ok(bytes)
    }
}

fn gain_bytes(gains: &[f32; 9]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(36);
    for g in gains {
        bytes.extend_from_slice(&g.to_le_bytes());
    }
    bytes
}
