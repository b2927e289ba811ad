//! MicroLink, the homebrew flight controller's compact binary protocol.
//!
//! MicroLink uses a *selected-message* model: the ground side sends a select
//! command naming one message id, and the FC then streams data frames for
//! that message only, until re-selected. Data frames therefore carry no
//! message id of their own; the decoder trusts the selection state and
//! validates only framing, length and checksum.
//!
//! Wire format, both directions:
//!
//! ```text
//! FC → GCS data frame:    0xB5 | len | payload[len]          | ck
//! GCS → FC command frame: 0xB5 | len | msg_id | data[len-1]  | ck
//! ```
//!
//! `ck` is the low byte of the sum of every byte after the sync marker
//! (length included). All field values are little-endian per the fixed
//! schema table below.

use crate::catalog::MessageSchema;
use crate::error::ProtocolError;
use crate::value::{FieldMap, FieldType};

/// Frame sync marker.
pub const SYNC: u8 = 0xB5;

/// Reserved command id: select which message the FC streams.
pub const SELECT_ID: u8 = 0;

/// Raw IMU sample stream.
pub const MSG_RAW_IMU: u8 = 26;
/// Fused attitude estimate.
pub const MSG_ATTITUDE: u8 = 30;
/// Servo/motor output values.
pub const MSG_SERVO_OUTPUT: u8 = 36;
/// Outbound-only: angle-loop PID gains (9 × f32).
pub const MSG_PID_GAINS_ANGLE: u8 = 250;
/// Outbound-only: rate-loop PID gains (9 × f32).
pub const MSG_PID_GAINS_RATE: u8 = 251;

/// Message polled during connection verification. The IMU stream is the
/// FC's highest-rate output, so it answers fastest on a live link.
pub const LIVENESS_ID: u8 = MSG_RAW_IMU;

/// Largest payload a one-byte length field can describe.
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

// ---------------------------------------------------------------------------
// Schema table
// ---------------------------------------------------------------------------

const RAW_IMU: MessageSchema = MessageSchema {
    id: MSG_RAW_IMU as u32,
    name: "RAW_IMU",
    fields: &[
        ("time_ms", FieldType::U32),
        ("acc_x", FieldType::F32),
        ("acc_y", FieldType::F32),
        ("acc_z", FieldType::F32),
        ("gyro_x", FieldType::F32),
        ("gyro_y", FieldType::F32),
        ("gyro_z", FieldType::F32),
    ],
};

const ATTITUDE: MessageSchema = MessageSchema {
    id: MSG_ATTITUDE as u32,
    name: "ATTITUDE",
    fields: &[
        ("time_ms", FieldType::U32),
        ("roll", FieldType::F32),
        ("pitch", FieldType::F32),
        ("yaw", FieldType::F32),
        ("rollspeed", FieldType::F32),
        ("pitchspeed", FieldType::F32),
        ("yawspeed", FieldType::F32),
    ],
};

const SERVO_OUTPUT: MessageSchema = MessageSchema {
    id: MSG_SERVO_OUTPUT as u32,
    name: "SERVO_OUTPUT",
    fields: &[
        ("time_ms", FieldType::U32),
        ("servo1_raw", FieldType::U16),
        ("servo2_raw", FieldType::U16),
        ("servo3_raw", FieldType::U16),
        ("servo4_raw", FieldType::U16),
    ],
};

const CATALOG: &[MessageSchema] = &[RAW_IMU, ATTITUDE, SERVO_OUTPUT];

/// The FC's full inbound message catalog, in id order.
pub fn catalog() -> &'static [MessageSchema] {
    CATALOG
}

/// Look up the schema for a streamable message id.
pub fn schema(id: u8) -> Option<&'static MessageSchema> {
    CATALOG.iter().find(|s| s.id == u32::from(id))
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Encode a GCS → FC command frame carrying `data` for `msg_id`.
pub fn encode_command(msg_id: u8, data: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let len = data.len() + 1;
    if len > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD,
        });
    }
    let mut frame = Vec::with_capacity(len + 3);
    frame.push(SYNC);
    frame.push(len as u8);
    frame.push(msg_id);
    frame.extend_from_slice(data);
    let ck = checksum(&frame[1..]);
    frame.push(ck);
    Ok(frame)
}

/// Encode the select command telling the FC to stream `target`.
pub fn encode_select(target: u8) -> Vec<u8> {
    encode_command(SELECT_ID, &[target]).expect("one-byte select payload fits")
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Streaming decoder for FC → GCS data frames.
///
/// Bytes arrive in arbitrary chunks from the transport; the decoder buffers
/// them and yields at most one frame per [`try_decode`](Self::try_decode)
/// call. Corrupt or mis-sized frames are skipped silently; the select/read
/// rhythm is expected to miss the occasional cycle.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw transport bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Discard any buffered bytes (used when the selection changes).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Try to decode one data frame for the currently selected `schema`.
    ///
    /// Returns `None` when no complete, valid frame for that schema is
    /// buffered yet. Frames whose checksum fails, or whose payload length
    /// does not match the schema (stale frames from a previous selection),
    /// are dropped and scanning continues.
    pub fn try_decode(&mut self, schema: &MessageSchema) -> Option<FieldMap> {
        let want = schema.payload_len();
        loop {
            // Scan to the next sync marker.
            let start = self.buf.iter().position(|b| *b == SYNC)?;
            self.buf.drain(..start);

            if self.buf.len() < 2 {
                return None;
            }
            let len = self.buf[1] as usize;
            let total = 2 + len + 1;
            if self.buf.len() < total {
                return None;
            }

            let ck = self.buf[total - 1];
            if checksum(&self.buf[1..total - 1]) != ck {
                // Resync one byte past this marker and keep scanning.
                self.buf.drain(..1);
                continue;
            }
            if len != want {
                // A verified frame from a previous selection; drop it whole.
                self.buf.drain(..total);
                continue;
            }

            let fields = decode_fields(schema, &self.buf[2..2 + len]);
            self.buf.drain(..total);
            return fields;
        }
    }
}

fn decode_fields(schema: &MessageSchema, payload: &[u8]) -> Option<FieldMap> {
    let mut fields = Vec::with_capacity(schema.fields.len());
    let mut offset = 0;
    for (name, ty) in schema.fields {
        let value = ty.decode(&payload[offset..])?;
        offset += ty.wire_size();
        fields.push((*name, value));
    }
    Some(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::FieldValue;

    /// Build a valid FC → GCS data frame around `payload`.
    fn data_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![SYNC, payload.len() as u8];
        frame.extend_from_slice(payload);
        frame.push(checksum(&frame[1..]));
        frame
    }

    fn attitude_payload(roll: f32) -> Vec<u8> {
        let mut p = Vec::new();
        p.extend_from_slice(&1000u32.to_le_bytes());
        p.extend_from_slice(&roll.to_le_bytes());
        for v in [0.1f32, 0.2, 0.0, 0.0, 0.0] {
            p.extend_from_slice(&v.to_le_bytes());
        }
        p
    }

    #[test]
    fn catalog_is_id_ordered() {
        let ids: Vec<u32> = catalog().iter().map(|s| s.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn select_frame_layout() {
        let frame = encode_select(MSG_ATTITUDE);
        assert_eq!(frame[0], SYNC);
        assert_eq!(frame[1], 2); // id byte + target byte
        assert_eq!(frame[2], SELECT_ID);
        assert_eq!(frame[3], MSG_ATTITUDE);
        assert_eq!(frame[4], checksum(&frame[1..4]));
    }

    #[test]
    fn command_frame_round_trips_checksum() {
        let frame = encode_command(MSG_PID_GAINS_ANGLE, &[1, 2, 3]).unwrap();
        assert_eq!(frame.len(), 3 + 4);
        assert_eq!(*frame.last().unwrap(), checksum(&frame[1..frame.len() - 1]));
    }

    #[test]
    fn oversize_command_rejected() {
        let data = vec![0u8; 300];
        assert!(matches!(
            encode_command(1, &data),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn decodes_fields_in_schema_order() {
        let mut dec = FrameDecoder::new();
        dec.push_bytes(&data_frame(&attitude_payload(0.5)));
        let fields = dec.try_decode(&ATTITUDE).unwrap();
        let names: Vec<_> = fields.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            ["time_ms", "roll", "pitch", "yaw", "rollspeed", "pitchspeed", "yawspeed"]
        );
        assert_eq!(fields[0].1, FieldValue::U32(1000));
        assert_eq!(fields[1].1, FieldValue::F32(0.5));
    }

    #[test]
    fn corrupt_checksum_yields_nothing() {
        let mut frame = data_frame(&attitude_payload(0.5));
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let mut dec = FrameDecoder::new();
        dec.push_bytes(&frame);
        assert!(dec.try_decode(&ATTITUDE).is_none());
    }

    #[test]
    fn wrong_length_frame_skipped() {
        // A valid SERVO_OUTPUT frame is not a valid ATTITUDE frame.
        let servo_payload = [0u8; 12];
        let mut dec = FrameDecoder::new();
        dec.push_bytes(&data_frame(&servo_payload));
        assert!(dec.try_decode(&ATTITUDE).is_none());
    }

    #[test]
    fn resyncs_past_garbage() {
        let mut bytes = vec![0x00, 0x17, 0xB5, 0x03]; // noise, including a fake sync
        bytes.extend_from_slice(&data_frame(&attitude_payload(1.0)));
        let mut dec = FrameDecoder::new();
        dec.push_bytes(&bytes);
        let fields = dec.try_decode(&ATTITUDE).unwrap();
        assert_eq!(fields[1].1, FieldValue::F32(1.0));
    }

    #[test]
    fn partial_frame_waits_for_more_bytes() {
        let frame = data_frame(&attitude_payload(2.0));
        let (head, tail) = frame.split_at(10);
        let mut dec = FrameDecoder::new();
        dec.push_bytes(head);
        assert!(dec.try_decode(&ATTITUDE).is_none());
        dec.push_bytes(tail);
        assert!(dec.try_decode(&ATTITUDE).is_some());
    }

    #[test]
    fn back_to_back_frames_decode_one_per_call() {
        let mut bytes = data_frame(&attitude_payload(1.0));
        bytes.extend_from_slice(&data_frame(&attitude_payload(2.0)));
        let mut dec = FrameDecoder::new();
        dec.push_bytes(&bytes);
        assert_eq!(dec.try_decode(&ATTITUDE).unwrap()[1].1, FieldValue::F32(1.0));
        assert_eq!(dec.try_decode(&ATTITUDE).unwrap()[1].1, FieldValue::F32(2.0));
        assert!(dec.try_decode(&ATTITUDE).is_none());
    }
}
