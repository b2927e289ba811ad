//! High-level command intents, flight modes, and PID gain structures.
//!
//! A [`CommandIntent`] is the protocol-neutral description of one outbound
//! action; the per-protocol adapters translate intents into wire frames.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Message id for the angle-loop PID gain frame.
pub const PID_LOOP_ANGLE: u8 = 250;
/// Message id for the rate-loop PID gain frame.
pub const PID_LOOP_RATE: u8 = 251;

// ---------------------------------------------------------------------------
// FlightMode
// ---------------------------------------------------------------------------

/// PX4 main flight modes addressable by name.
///
/// The discriminant is the autopilot's custom-mode number sent in SET_MODE.
/// Parsing is strict: an unrecognized name fails before any bytes are sent.
///
/// # Examples
///
/// ```
/// use groundlink_models::FlightMode;
///
/// let mode: FlightMode = "POSCTL".parse().unwrap();
/// assert_eq!(mode.custom_mode(), 6);
/// assert!("WARP".parse::<FlightMode>().is_err());
/// ```
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[strum(serialize_all = "UPPERCASE")]
pub enum FlightMode {
    /// Direct manual control.
    Manual = 1,
    /// Attitude stabilization.
    Stabilized = 2,
    /// Acrobatic (rate) control.
    Acro = 3,
    /// Rate control with attitude recovery.
    Rattitude = 4,
    /// Altitude hold.
    Altctl = 5,
    /// Position hold.
    Posctl = 6,
    /// Circle the current position.
    Loiter = 7,
    /// Fly the uploaded mission.
    Mission = 8,
    /// Return to the launch point.
    Rtl = 9,
    /// Automatic takeoff.
    Takeoff = 10,
    /// Automatic landing.
    Land = 11,
    /// Return to a ground-station-defined point.
    Rtgs = 12,
    /// Follow a moving target.
    Followme = 13,
    /// External (offboard) control.
    Offboard = 14,
}

impl FlightMode {
    /// The autopilot custom-mode number for this mode.
    pub fn custom_mode(self) -> u32 {
        self as u32
    }

    /// Parse a mode name, mapping failure to [`ProtocolError::UnknownMode`].
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        Self::from_str(name).map_err(|_| ProtocolError::UnknownMode(name.to_string()))
    }
}

/// Custom mode for the autopilot's automatic-takeoff profile
/// (`AUTO` main mode, `TAKEOFF` sub-mode).
pub const CUSTOM_MODE_AUTO_TAKEOFF: u32 = (2 << 24) | (4 << 16);
/// Custom mode for the autopilot's automatic-landing profile
/// (`AUTO` main mode, `LAND` sub-mode).
pub const CUSTOM_MODE_AUTO_LAND: u32 = (6 << 24) | (4 << 16);
/// Custom mode requested before arming so the vehicle accepts the command.
pub const CUSTOM_MODE_GUIDED: u32 = 4;

// ---------------------------------------------------------------------------
// PID gains
// ---------------------------------------------------------------------------

/// Proportional/integral/derivative gains for one axis.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct AxisGains {
    /// Proportional gain.
    pub p: f32,
    /// Integral gain.
    pub i: f32,
    /// Derivative gain.
    pub d: f32,
}

/// Gains for one control loop across the three body axes.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct LoopGains {
    /// Roll axis.
    pub roll: AxisGains,
    /// Pitch axis.
    pub pitch: AxisGains,
    /// Yaw axis.
    pub yaw: AxisGains,
}

impl LoopGains {
    /// Flatten to the fixed wire order: roll/pitch/yaw × P/I/D.
    pub fn flatten(&self) -> [f32; 9] {
        [
            self.roll.p, self.roll.i, self.roll.d,
            self.pitch.p, self.pitch.i, self.pitch.d,
            self.yaw.p, self.yaw.i, self.yaw.d,
        ]
    }
}

/// Full PID gain set: an outer angle loop and an inner rate loop.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct PidGains {
    /// Outer (attitude angle) loop.
    pub angle: LoopGains,
    /// Inner (body rate) loop.
    pub rate: LoopGains,
}

// ---------------------------------------------------------------------------
// CommandIntent
// ---------------------------------------------------------------------------

/// Protocol-neutral description of one outbound action.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandIntent {
    /// Periodic ground-station keepalive.
    Heartbeat,
    /// Request a flight mode by custom-mode number.
    SetMode {
        /// Autopilot custom-mode value.
        custom_mode: u32,
    },
    /// Arm or disarm the vehicle.
    ArmDisarm {
        /// `true` to arm (with force override), `false` to disarm.
        arm: bool,
    },
    /// Fly back to the launch point.
    ReturnToLaunch,
    /// One 9-gain PID frame for the angle or rate loop.
    PidGains {
        /// [`PID_LOOP_ANGLE`] or [`PID_LOOP_RATE`].
        loop_id: u8,
        /// Roll/pitch/yaw × P/I/D, in wire order.
        gains: [f32; 9],
    },
    /// Application-defined frame sent as-is.
    Raw {
        /// Destination message id.
        msg_id: u32,
        /// Pre-encoded payload bytes.
        data: Vec<u8>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn mode_names_round_trip() {
        for mode in FlightMode::iter() {
            let name = mode.to_string();
            assert_eq!(FlightMode::parse(&name).unwrap(), mode);
        }
    }

    #[test]
    fn mode_numbers_match_autopilot_table() {
        assert_eq!(FlightMode::Manual.custom_mode(), 1);
        assert_eq!(FlightMode::Posctl.custom_mode(), 6);
        assert_eq!(FlightMode::Offboard.custom_mode(), 14);
    }

    #[test]
    fn unknown_mode_rejected() {
        assert!(matches!(
            FlightMode::parse("HOVERBOARD"),
            Err(ProtocolError::UnknownMode(_))
        ));
        // Parsing is case-sensitive, matching the autopilot's mode names.
        assert!(FlightMode::parse("manual").is_err());
    }

    #[test]
    fn gain_flattening_order() {
        let gains = LoopGains {
            roll: AxisGains { p: 1.0, i: 2.0, d: 3.0 },
            pitch: AxisGains { p: 4.0, i: 5.0, d: 6.0 },
            yaw: AxisGains { p: 7.0, i: 8.0, d: 9.0 },
        };
        assert_eq!(gains.flatten(), [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn auto_mode_constants() {
        assert_eq!(CUSTOM_MODE_AUTO_TAKEOFF, 0x0204_0000);
        assert_eq!(CUSTOM_MODE_AUTO_LAND, 0x0604_0000);
    }
}
