//! The outbound command interface of [`LinkSession`].
//!
//! Every method fails with a configuration error when no session is
//! connected, and none of them can crash the reader or heartbeat loops:
//! sends serialize on the writer lock and never touch the decode state.
//!
//! Acknowledged commands (arm/disarm, return-to-launch) wait up to
//! [`ACK_TIMEOUT`] for a `COMMAND_ACK` and report
//! [`LinkError::AckTimeout`] when none arrives; they are never retried
//! automatically. Acks are matched by message type only, not correlated to
//! the specific command instance.

use std::time::Duration;

use groundlink_models::command::{
    CommandIntent, FlightMode, PidGains, CUSTOM_MODE_AUTO_LAND, CUSTOM_MODE_AUTO_TAKEOFF,
    CUSTOM_MODE_GUIDED, PID_LOOP_ANGLE, PID_LOOP_RATE,
};
use groundlink_models::mavlink::MSG_COMMAND_ACK;
use groundlink_models::value::FieldValue;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::LinkError;
use crate::session::{LinkEvent, LinkSession};

/// Bound on waiting for a command acknowledgment.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(3);
/// Minimum spacing between the two PID gain frames; the FC applies one
/// gain set per control cycle and drops back-to-back writes.
pub const PID_FRAME_SPACING: Duration = Duration::from_millis(100);
/// Settling delay after a mode-change request before a follow-up command.
const MODE_CHANGE_SETTLE: Duration = Duration::from_millis(100);

/// Result of a vehicle command that expects an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandAck {
    /// The command id being acknowledged.
    pub command: u16,
    /// `MAV_RESULT` code: `0` accepted, `2` denied, `4` failed, ….
    pub result: u8,
}

impl LinkSession {
    /// Send both PID gain frames: the angle loop first, then, after the
    /// mandatory spacing, the rate loop.
    pub async fn send_pid_gains(&self, gains: &PidGains) -> Result<(), LinkError> {
        self.send_intent(&CommandIntent::PidGains {
            loop_id: PID_LOOP_ANGLE,
            gains: gains.angle.flatten(),
        })?;
        tokio::time::sleep(PID_FRAME_SPACING).await;
        self.send_intent(&CommandIntent::PidGains {
            loop_id: PID_LOOP_RATE,
            gains: gains.rate.flatten(),
        })?;
        info!("pid gains sent");
        Ok(())
    }

    /// Arm or disarm the vehicle and wait for its acknowledgment.
    ///
    /// Arming first requests the guided mode so the autopilot accepts the
    /// command, and carries the force-arm override code.
    pub async fn arm_disarm(&self, arm: bool) -> Result<CommandAck, LinkError> {
        let mut events = self.subscribe();
        if arm {
            self.send_intent(&CommandIntent::SetMode {
                custom_mode: CUSTOM_MODE_GUIDED,
            })?;
            tokio::time::sleep(MODE_CHANGE_SETTLE).await;
        }
        self.send_intent(&CommandIntent::ArmDisarm { arm })?;
        info!(arm, "arm command sent");
        wait_for_ack(&mut events).await
    }

    /// Switch to the automatic-takeoff profile.
    ///
    /// The climb target comes from the autopilot's takeoff parameters;
    /// `altitude` is recorded for the operator's log only.
    pub async fn takeoff(&self, altitude: f32) -> Result<(), LinkError> {
        self.send_intent(&CommandIntent::SetMode {
            custom_mode: CUSTOM_MODE_AUTO_TAKEOFF,
        })?;
        info!(altitude, "takeoff mode requested");
        Ok(())
    }

    /// Switch to the automatic-landing profile.
    pub async fn land(&self) -> Result<(), LinkError> {
        self.send_intent(&CommandIntent::SetMode {
            custom_mode: CUSTOM_MODE_AUTO_LAND,
        })?;
        info!("land mode requested");
        Ok(())
    }

    /// Command a return to the launch point and wait for the
    /// acknowledgment.
    pub async fn return_to_launch(&self) -> Result<CommandAck, LinkError> {
        let mut events = self.subscribe();
        self.send_intent(&CommandIntent::ReturnToLaunch)?;
        info!("return-to-launch sent");
        wait_for_ack(&mut events).await
    }

    /// Request a flight mode.
    ///
    /// Mode names are validated by [`FlightMode::parse`] before any bytes
    /// are sent.
    pub async fn set_flight_mode(&self, mode: FlightMode) -> Result<(), LinkError> {
        self.send_intent(&CommandIntent::SetMode {
            custom_mode: mode.custom_mode(),
        })?;
        info!(%mode, "flight mode requested");
        Ok(())
    }

    /// Send an application-defined frame as-is.
    pub async fn send_raw(&self, msg_id: u32, data: Vec<u8>) -> Result<(), LinkError> {
        self.send_intent(&CommandIntent::Raw { msg_id, data })
    }

    /// Send an application-defined frame of little-endian packed floats.
    pub async fn send_raw_floats(&self, msg_id: u32, values: &[f32]) -> Result<(), LinkError> {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        self.send_intent(&CommandIntent::Raw { msg_id, data })
    }
}

/// Wait for the next `COMMAND_ACK`, bounded by [`ACK_TIMEOUT`].
async fn wait_for_ack(
    events: &mut tokio::sync::broadcast::Receiver<LinkEvent>,
) -> Result<CommandAck, LinkError> {
    let deadline = Instant::now() + ACK_TIMEOUT;
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Err(_) => {
                warn!("no command acknowledgment within {ACK_TIMEOUT:?}");
                return Err(LinkError::AckTimeout(ACK_TIMEOUT));
            }
            Ok(Err(RecvError::Closed)) => return Err(LinkError::not_connected()),
            Ok(Err(RecvError::Lagged(_))) => continue,
            Ok(Ok(event)) => event,
        };
        if let LinkEvent::Message(message) = event {
            if message.id != MSG_COMMAND_ACK {
                continue;
            }
            let command = match message.field("command") {
                Some(FieldValue::U16(c)) => *c,
                _ => 0,
            };
            let result = match message.field("result") {
                Some(FieldValue::U8(r)) => *r,
                _ => 0,
            };
            info!(command, result, "command acknowledged");
            return Ok(CommandAck { command, result });
        }
    }
}
