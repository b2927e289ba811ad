//! In-memory flight-controller simulators implementing [`Transport`].
//!
//! Each simulator plays the device side of its protocol well enough to
//! drive a full session: verification, telemetry streaming, command
//! handling. Reads pace themselves with short sleeps, standing in for the
//! real transport's read timeout.
#![allow(dead_code)] // each test binary uses its own subset

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::{Duration, Instant};

use groundlink_models::mavlink::{FrameEncoder, MSG_COMMAND_LONG, MSG_HEARTBEAT};
use groundlink_models::microlink;
use groundlink_sdk::{LinkError, Transport};

/// Everything a simulator saw the ground station write, with timestamps.
pub type WriteLog = Arc<Mutex<Vec<(Instant, Vec<u8>)>>>;

/// Extract the frames in a write log whose MicroLink command id matches.
pub fn microlink_writes_for(log: &WriteLog, msg_id: u8) -> Vec<(Instant, Vec<u8>)> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(_, f)| f.len() > 2 && f[0] == microlink::SYNC && f[2] == msg_id)
        .cloned()
        .collect()
}

/// Extract the frames in a write log whose MAVLink 1 message id matches.
pub fn mavlink_writes_for(log: &WriteLog, msg_id: u8) -> Vec<(Instant, Vec<u8>)> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|(_, f)| f.len() > 5 && f[0] == 0xFE && f[5] == msg_id)
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// MicroLink simulator
// ---------------------------------------------------------------------------

fn microlink_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// A valid MicroLink data frame with an all-zero payload of `len` bytes.
pub fn microlink_data_frame(len: usize) -> Vec<u8> {
    let mut frame = vec![microlink::SYNC, len as u8];
    frame.extend(std::iter::repeat(0u8).take(len));
    let ck = microlink_checksum(&frame[1..]);
    frame.push(ck);
    frame
}

/// Homebrew FC: honors select commands and streams the selected message.
pub struct MicroLinkSim {
    selected: Option<u8>,
    period: Duration,
    silent: bool,
    pub writes: WriteLog,
}

impl MicroLinkSim {
    pub fn new(period: Duration) -> Self {
        Self {
            selected: None,
            period,
            silent: false,
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An FC that never answers, whatever is selected.
    pub fn silent() -> Self {
        let mut sim = Self::new(Duration::from_millis(20));
        sim.silent = true;
        sim
    }
}

impl Transport for MicroLinkSim {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        sleep(self.period);
        if self.silent {
            return Ok(0);
        }
        let Some(selected) = self.selected else {
            return Ok(0);
        };
        let Some(schema) = microlink::schema(selected) else {
            return Ok(0);
        };
        let frame = microlink_data_frame(schema.payload_len());
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.writes.lock().unwrap().push((Instant::now(), bytes.to_vec()));
        // Select command: 0xB5 | len=2 | id=0 | target | ck
        if bytes.len() == 5 && bytes[0] == microlink::SYNC && bytes[2] == microlink::SELECT_ID {
            self.selected = Some(bytes[3]);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MAVLink simulator
// ---------------------------------------------------------------------------

/// A v1 heartbeat as a PX4 quadrotor (system 1, component 1) sends it.
fn autopilot_heartbeat(encoder: &mut FrameEncoder) -> Vec<u8> {
    let mut payload = Vec::with_capacity(9);
    payload.extend_from_slice(&0u32.to_le_bytes());
    payload.push(2); // MAV_TYPE_QUADROTOR
    payload.push(12); // MAV_AUTOPILOT_PX4
    payload.push(0);
    payload.push(4); // MAV_STATE_ACTIVE
    payload.push(3);
    encoder.encode(MSG_HEARTBEAT, &payload).unwrap()
}

fn attitude_frame(encoder: &mut FrameEncoder, roll: f32) -> Vec<u8> {
    let mut payload = Vec::with_capacity(28);
    payload.extend_from_slice(&1000u32.to_le_bytes());
    payload.extend_from_slice(&roll.to_le_bytes());
    for v in [0.0f32; 5] {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    encoder.encode(30, &payload).unwrap()
}

/// MAVLink autopilot simulator.
///
/// Streams a heartbeat (plus optional extra telemetry) per read period,
/// optionally acknowledges COMMAND_LONG frames, and can be told to fail
/// its transport after a number of reads.
pub struct MavlinkSim {
    period: Duration,
    silent: bool,
    ack_commands: bool,
    stream_attitude: bool,
    stream_unknown_id: Option<u8>,
    fail_after_reads: Option<usize>,
    reads: usize,
    outbox: VecDeque<Vec<u8>>,
    encoder: FrameEncoder,
    pub writes: WriteLog,
}

impl MavlinkSim {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            silent: false,
            ack_commands: false,
            stream_attitude: false,
            stream_unknown_id: None,
            fail_after_reads: None,
            reads: 0,
            outbox: VecDeque::new(),
            encoder: FrameEncoder::new(1, 1),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An autopilot that never sends anything.
    pub fn silent() -> Self {
        let mut sim = Self::new(Duration::from_millis(20));
        sim.silent = true;
        sim
    }

    pub fn with_acks(mut self) -> Self {
        self.ack_commands = true;
        self
    }

    pub fn with_attitude_stream(mut self) -> Self {
        self.stream_attitude = true;
        self
    }

    pub fn with_unknown_stream(mut self, id: u8) -> Self {
        self.stream_unknown_id = Some(id);
        self
    }

    pub fn failing_after(mut self, reads: usize) -> Self {
        self.fail_after_reads = Some(reads);
        self
    }
}

impl Transport for MavlinkSim {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if let Some(limit) = self.fail_after_reads {
            if self.reads >= limit {
                return Err(LinkError::Transport("simulated device unplugged".to_string()));
            }
        }
        self.reads += 1;

        // Queued replies (acks) jump the telemetry stream.
        if let Some(frame) = self.outbox.pop_front() {
            buf[..frame.len()].copy_from_slice(&frame);
            return Ok(frame.len());
        }

        sleep(self.period);
        if self.silent {
            return Ok(0);
        }
        let mut bytes = autopilot_heartbeat(&mut self.encoder);
        if self.stream_attitude {
            bytes.extend_from_slice(&attitude_frame(&mut self.encoder, 0.25));
        }
        if let Some(id) = self.stream_unknown_id {
            bytes.extend_from_slice(&self.encoder.encode(u32::from(id), &[1, 2, 3, 4]).unwrap());
        }
        buf[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.writes.lock().unwrap().push((Instant::now(), bytes.to_vec()));
        // Acknowledge COMMAND_LONG: echo the command id with result 0.
        if self.ack_commands && bytes.len() > 5 && bytes[0] == 0xFE {
            if u32::from(bytes[5]) == MSG_COMMAND_LONG {
                let payload = &bytes[6..bytes.len() - 2];
                let command = u16::from_le_bytes([payload[28], payload[29]]);
                let mut ack = Vec::with_capacity(3);
                ack.extend_from_slice(&command.to_le_bytes());
                ack.push(0); // MAV_RESULT_ACCEPTED
                self.outbox.push_back(self.encoder.encode(77, &ack).unwrap());
            }
        }
        Ok(())
    }
}
