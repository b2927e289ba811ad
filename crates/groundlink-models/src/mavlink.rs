//! MAVLink framing, CRC, dialect dictionary, and outbound encoder.
//!
//! The parser accepts both MAVLink 1 (`0xFE`) and MAVLink 2 (`0xFD`)
//! frames from a byte stream and verifies them with CRC-16/MCRF4XX seeded
//! with the per-message `CRC_EXTRA` byte. Payloads decode against a
//! built-in dictionary of common-dialect messages into ordered field maps;
//! ids absent from the dictionary surface as a single raw `payload` field
//! so unrecognized telemetry never halts ingestion.
//!
//! Outbound traffic is encoded as MAVLink 1 frames stamped with this
//! client's ground-station identity.

use crate::catalog::MessageSchema;
use crate::error::ProtocolError;
use crate::value::{FieldMap, FieldType, FieldValue};

/// MAVLink 1 start byte.
pub const STX_V1: u8 = 0xFE;
/// MAVLink 2 start byte.
pub const STX_V2: u8 = 0xFD;
/// Largest possible frame (MAVLink 2, full payload, signature).
pub const MAX_FRAME_SIZE: usize = 280;
/// Largest payload either framing can carry.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

/// System id used by ground-control stations.
pub const GCS_SYSTEM_ID: u8 = 255;
/// Component id used by this client.
pub const GCS_COMPONENT_ID: u8 = 0;

/// `MAV_TYPE_GCS`: heartbeat `type` announcing a ground station.
pub const MAV_TYPE_GCS: u8 = 6;
/// `MAV_AUTOPILOT_INVALID`: heartbeat `autopilot` for non-autopilot peers.
pub const MAV_AUTOPILOT_INVALID: u8 = 8;
/// `MAV_STATE_ACTIVE`: heartbeat `system_status`.
pub const MAV_STATE_ACTIVE: u8 = 4;
/// `MAV_MODE_FLAG_CUSTOM_MODE_ENABLED`: base mode bit for custom modes.
pub const MAV_MODE_FLAG_CUSTOM_MODE_ENABLED: u8 = 1;
/// The wire protocol minor version stamped into heartbeats.
pub const MAVLINK_VERSION: u8 = 3;

/// `MAV_CMD_NAV_RETURN_TO_LAUNCH`.
pub const MAV_CMD_NAV_RETURN_TO_LAUNCH: u16 = 20;
/// `MAV_CMD_COMPONENT_ARM_DISARM`.
pub const MAV_CMD_COMPONENT_ARM_DISARM: u16 = 400;
/// Magic `param2` value that forces arming through safety checks.
pub const FORCE_ARM_MAGIC: f32 = 21196.0;

/// HEARTBEAT message id.
pub const MSG_HEARTBEAT: u32 = 0;
/// SET_MODE message id.
pub const MSG_SET_MODE: u32 = 11;
/// COMMAND_LONG message id.
pub const MSG_COMMAND_LONG: u32 = 76;
/// COMMAND_ACK message id.
pub const MSG_COMMAND_ACK: u32 = 77;

// ---------------------------------------------------------------------------
// Dialect dictionary
// ---------------------------------------------------------------------------

/// One dictionary row: a common-dialect message with its CRC_EXTRA seed.
///
/// Field lists are in *wire order* (fields sorted by type size, per the
/// MAVLink serialization rules), not XML declaration order.
#[derive(Debug, Clone, Copy)]
pub struct DialectEntry {
    /// The message schema (id, name, ordered fields).
    pub schema: MessageSchema,
    /// CRC_EXTRA byte folded into the frame checksum.
    pub crc_extra: u8,
}

macro_rules! entry {
    ($id:expr, $name:expr, $crc:expr, [$(($f:expr, $t:ident)),* $(,)?]) => {
        DialectEntry {
            schema: MessageSchema {
                id: $id,
                name: $name,
                fields: &[$(($f, FieldType::$t)),*],
            },
            crc_extra: $crc,
        }
    };
}

static DIALECT: &[DialectEntry] = &[
    entry!(0, "HEARTBEAT", 50, [
        ("custom_mode", U32),
        ("type", U8),
        ("autopilot", U8),
        ("base_mode", U8),
        ("system_status", U8),
        ("mavlink_version", U8),
    ]),
    entry!(1, "SYS_STATUS", 124, [
        ("onboard_control_sensors_present", U32),
        ("onboard_control_sensors_enabled", U32),
        ("onboard_control_sensors_health", U32),
        ("load", U16),
        ("voltage_battery", U16),
        ("current_battery", I16),
        ("drop_rate_comm", U16),
        ("errors_comm", U16),
        ("errors_count1", U16),
        ("errors_count2", U16),
        ("errors_count3", U16),
        ("errors_count4", U16),
        ("battery_remaining", I8),
    ]),
    entry!(11, "SET_MODE", 89, [
        ("custom_mode", U32),
        ("target_system", U8),
        ("base_mode", U8),
    ]),
    entry!(24, "GPS_RAW_INT", 24, [
        ("time_usec", U64),
        ("lat", I32),
        ("lon", I32),
        ("alt", I32),
        ("eph", U16),
        ("epv", U16),
        ("vel", U16),
        ("cog", U16),
        ("fix_type", U8),
        ("satellites_visible", U8),
    ]),
    entry!(30, "ATTITUDE", 39, [
        ("time_boot_ms", U32),
        ("roll", F32),
        ("pitch", F32),
        ("yaw", F32),
        ("rollspeed", F32),
        ("pitchspeed", F32),
        ("yawspeed", F32),
    ]),
    entry!(31, "ATTITUDE_QUATERNION", 246, [
        ("time_boot_ms", U32),
        ("q1", F32),
        ("q2", F32),
        ("q3", F32),
        ("q4", F32),
        ("rollspeed", F32),
        ("pitchspeed", F32),
        ("yawspeed", F32),
    ]),
    entry!(32, "LOCAL_POSITION_NED", 185, [
        ("time_boot_ms", U32),
        ("x", F32),
        ("y", F32),
        ("z", F32),
        ("vx", F32),
        ("vy", F32),
        ("vz", F32),
    ]),
    entry!(33, "GLOBAL_POSITION_INT", 104, [
        ("time_boot_ms", U32),
        ("lat", I32),
        ("lon", I32),
        ("alt", I32),
        ("relative_alt", I32),
        ("vx", I16),
        ("vy", I16),
        ("vz", I16),
        ("hdg", U16),
    ]),
    entry!(36, "SERVO_OUTPUT_RAW", 222, [
        ("time_usec", U32),
        ("servo1_raw", U16),
        ("servo2_raw", U16),
        ("servo3_raw", U16),
        ("servo4_raw", U16),
        ("servo5_raw", U16),
        ("servo6_raw", U16),
        ("servo7_raw", U16),
        ("servo8_raw", U16),
        ("port", U8),
    ]),
    entry!(74, "VFR_HUD", 20, [
        ("airspeed", F32),
        ("groundspeed", F32),
        ("alt", F32),
        ("climb", F32),
        ("heading", I16),
        ("throttle", U16),
    ]),
    entry!(76, "COMMAND_LONG", 152, [
        ("param1", F32),
        ("param2", F32),
        ("param3", F32),
        ("param4", F32),
        ("param5", F32),
        ("param6", F32),
        ("param7", F32),
        ("command", U16),
        ("target_system", U8),
        ("target_component", U8),
        ("confirmation", U8),
    ]),
    entry!(77, "COMMAND_ACK", 143, [
        ("command", U16),
        ("result", U8),
    ]),
    entry!(105, "HIGHRES_IMU", 93, [
        ("time_usec", U64),
        ("xacc", F32),
        ("yacc", F32),
        ("zacc", F32),
        ("xgyro", F32),
        ("ygyro", F32),
        ("zgyro", F32),
        ("xmag", F32),
        ("ymag", F32),
        ("zmag", F32),
        ("abs_pressure", F32),
        ("diff_pressure", F32),
        ("pressure_alt", F32),
        ("temperature", F32),
        ("fields_updated", U16),
    ]),
    entry!(141, "ALTITUDE", 47, [
        ("time_usec", U64),
        ("altitude_monotonic", F32),
        ("altitude_amsl", F32),
        ("altitude_local", F32),
        ("altitude_relative", F32),
        ("altitude_terrain", F32),
        ("bottom_clearance", F32),
    ]),
];

/// Look up the dictionary row for a message id.
pub fn dialect_entry(id: u32) -> Option<&'static DialectEntry> {
    DIALECT.iter().find(|e| e.schema.id == id)
}

/// Schema for a message id: the dictionary's if listed, generic otherwise.
pub fn schema_for(id: u32) -> MessageSchema {
    dialect_entry(id)
        .map(|e| e.schema)
        .unwrap_or_else(|| MessageSchema::generic(id))
}

// ---------------------------------------------------------------------------
// CRC-16/MCRF4XX
// ---------------------------------------------------------------------------

const CRC_INIT: u16 = 0xFFFF;

#[inline]
fn crc_accumulate(byte: u8, mut crc: u16) -> u16 {
    let tmp = u16::from(byte ^ (crc as u8));
    let tmp = tmp ^ (tmp << 4);
    crc = (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4);
    crc
}

fn crc16(data: &[u8], crc_extra: u8) -> u16 {
    let mut crc = CRC_INIT;
    for &byte in data {
        crc = crc_accumulate(byte, crc);
    }
    crc_accumulate(crc_extra, crc)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// One verified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MavFrame {
    /// Message id (24-bit under MAVLink 2).
    pub id: u32,
    /// Sender system id.
    pub system_id: u8,
    /// Sender component id.
    pub component_id: u8,
    /// Raw payload bytes, possibly truncated under MAVLink 2.
    pub payload: Vec<u8>,
}

impl MavFrame {
    /// Decode the payload into an ordered field map.
    ///
    /// Listed ids decode against the dictionary, zero-extending payloads
    /// that MAVLink 2 truncated. Unlisted ids produce the generic single
    /// `payload` field.
    pub fn decode(&self) -> FieldMap {
        let schema = schema_for(self.id);
        if schema.is_generic() {
            return vec![("payload", FieldValue::Bytes(self.payload.clone()))];
        }
        let want = schema.payload_len();
        let mut payload = self.payload.clone();
        if payload.len() < want {
            payload.resize(want, 0);
        }
        let mut fields = Vec::with_capacity(schema.fields.len());
        let mut offset = 0;
        for (name, ty) in schema.fields {
            // In range by construction: the payload was padded to the schema size.
            let value = ty.decode(&payload[offset..]).expect("padded payload covers schema");
            offset += ty.wire_size();
            fields.push((*name, value));
        }
        fields
    }

    /// Field value lookup by name, for the handful of fields the session
    /// itself inspects (heartbeat type, ack command/result).
    pub fn field(&self, name: &str) -> Option<crate::value::FieldValue> {
        self.decode()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}

#[derive(Clone, Copy)]
enum ParserState {
    WaitingForStart,
    ReadingHeader,
    ReadingPayload { expected_len: usize },
}

/// Streaming MAVLink frame parser.
///
/// Feed bytes one at a time with [`push_byte`](Self::push_byte); a frame is
/// returned when its checksum verifies (or, for ids with no dictionary
/// entry, when it is structurally complete). CRC failures are counted and
/// otherwise dropped silently, matching best-effort semantics on a lossy
/// link.
pub struct FrameParser {
    buffer: [u8; MAX_FRAME_SIZE],
    pos: usize,
    state: ParserState,
    crc_failures: u64,
}

impl FrameParser {
    /// Create a parser waiting for a start byte.
    pub fn new() -> Self {
        Self {
            buffer: [0u8; MAX_FRAME_SIZE],
            pos: 0,
            state: ParserState::WaitingForStart,
            crc_failures: 0,
        }
    }

    /// Number of frames dropped for checksum mismatch since creation.
    pub fn crc_failures(&self) -> u64 {
        self.crc_failures
    }

    fn reset(&mut self) {
        self.pos = 0;
        self.state = ParserState::WaitingForStart;
    }

    /// Feed one byte; returns a frame when one completes and verifies.
    pub fn push_byte(&mut self, byte: u8) -> Option<MavFrame> {
        match self.state {
            ParserState::WaitingForStart => {
                if byte == STX_V1 || byte == STX_V2 {
                    self.buffer[0] = byte;
                    self.pos = 1;
                    self.state = ParserState::ReadingHeader;
                }
                None
            }
            ParserState::ReadingHeader => {
                self.buffer[self.pos] = byte;
                self.pos += 1;

                let header_size = if self.buffer[0] == STX_V2 { 10 } else { 6 };
                if self.pos >= header_size {
                    let payload_len = self.buffer[1] as usize;
                    let expected_len = header_size + payload_len + 2;
                    if expected_len > MAX_FRAME_SIZE {
                        self.reset();
                    } else {
                        self.state = ParserState::ReadingPayload { expected_len };
                    }
                }
                None
            }
            ParserState::ReadingPayload { expected_len } => {
                self.buffer[self.pos] = byte;
                self.pos += 1;

                if self.pos >= expected_len {
                    let frame = self.finish_frame();
                    self.reset();
                    frame
                } else {
                    None
                }
            }
        }
    }

    /// Feed a chunk of bytes, returning the first completed frame and the
    /// number of bytes consumed to produce it.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> (usize, Option<MavFrame>) {
        for (i, b) in bytes.iter().enumerate() {
            if let Some(frame) = self.push_byte(*b) {
                return (i + 1, Some(frame));
            }
        }
        (bytes.len(), None)
    }

    fn finish_frame(&mut self) -> Option<MavFrame> {
        let is_v2 = self.buffer[0] == STX_V2;
        let payload_len = self.buffer[1] as usize;

        let (id, system_id, component_id, payload_start) = if is_v2 {
            let id = u32::from(self.buffer[7])
                | (u32::from(self.buffer[8]) << 8)
                | (u32::from(self.buffer[9]) << 16);
            (id, self.buffer[5], self.buffer[6], 10)
        } else {
            (u32::from(self.buffer[5]), self.buffer[3], self.buffer[4], 6)
        };

        let payload = self.buffer[payload_start..payload_start + payload_len].to_vec();

        if let Some(entry) = dialect_entry(id) {
            let crc_data_end = payload_start + payload_len;
            let calculated = crc16(&self.buffer[1..crc_data_end], entry.crc_extra);
            let received = u16::from(self.buffer[crc_data_end])
                | (u16::from(self.buffer[crc_data_end + 1]) << 8);
            if calculated != received {
                self.crc_failures += 1;
                return None;
            }
        }
        // Ids outside the dictionary cannot be CRC-checked (no CRC_EXTRA);
        // they pass on structural validity alone.

        Some(MavFrame {
            id,
            system_id,
            component_id,
            payload,
        })
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Encoder
// ---------------------------------------------------------------------------

/// Outbound MAVLink 1 frame encoder.
///
/// Carries this client's identity and the rolling sequence counter; one
/// encoder instance lives for the life of a session.
#[derive(Debug)]
pub struct FrameEncoder {
    system_id: u8,
    component_id: u8,
    sequence: u8,
}

impl FrameEncoder {
    /// Encoder stamping frames with the given identity.
    pub fn new(system_id: u8, component_id: u8) -> Self {
        Self {
            system_id,
            component_id,
            sequence: 0,
        }
    }

    /// Encoder with the fixed ground-station identity (255, 0).
    pub fn gcs() -> Self {
        Self::new(GCS_SYSTEM_ID, GCS_COMPONENT_ID)
    }

    /// Encode one MAVLink 1 frame for `msg_id` around `payload`.
    ///
    /// Uses the dictionary CRC_EXTRA when the id is listed and `0`
    /// otherwise (user-range ids such as the PID gain frames).
    pub fn encode(&mut self, msg_id: u32, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        if msg_id > u32::from(u8::MAX) {
            // MAVLink 1 framing carries one id byte.
            return Err(ProtocolError::UnknownMessage(msg_id));
        }

        let crc_extra = dialect_entry(msg_id).map_or(0, |e| e.crc_extra);
        let mut frame = Vec::with_capacity(payload.len() + 8);
        frame.push(STX_V1);
        frame.push(payload.len() as u8);
        frame.push(self.sequence);
        frame.push(self.system_id);
        frame.push(self.component_id);
        frame.push(msg_id as u8);
        frame.extend_from_slice(payload);
        let crc = crc16(&frame[1..], crc_extra);
        frame.extend_from_slice(&crc.to_le_bytes());
        self.sequence = self.sequence.wrapping_add(1);
        Ok(frame)
    }
}

// ---------------------------------------------------------------------------
// Payload builders
// ---------------------------------------------------------------------------

/// HEARTBEAT payload announcing this client as an active ground station
/// with empty capability flags.
pub fn heartbeat_gcs_payload() -> Vec<u8> {
    let mut p = Vec::with_capacity(9);
    p.extend_from_slice(&0u32.to_le_bytes()); // custom_mode
    p.push(MAV_TYPE_GCS);
    p.push(MAV_AUTOPILOT_INVALID);
    p.push(0); // base_mode
    p.push(MAV_STATE_ACTIVE);
    p.push(MAVLINK_VERSION);
    p
}

/// SET_MODE payload requesting a custom flight mode.
pub fn set_mode_payload(target_system: u8, custom_mode: u32) -> Vec<u8> {
    let mut p = Vec::with_capacity(6);
    p.extend_from_slice(&custom_mode.to_le_bytes());
    p.push(target_system);
    p.push(MAV_MODE_FLAG_CUSTOM_MODE_ENABLED);
    p
}

/// COMMAND_LONG payload for `command` with up to seven float parameters.
pub fn command_long_payload(
    target_system: u8,
    target_component: u8,
    command: u16,
    params: [f32; 7],
) -> Vec<u8> {
    let mut p = Vec::with_capacity(33);
    for param in params {
        p.extend_from_slice(&param.to_le_bytes());
    }
    p.extend_from_slice(&command.to_le_bytes());
    p.push(target_system);
    p.push(target_component);
    p.push(0); // confirmation
    p
}
