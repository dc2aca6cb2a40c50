use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bounds every published command must respect
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandLimits {
    pub max_linear_velocity: f64,  // m/s
    pub max_angular_velocity: f64, // rad/s
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            max_linear_velocity: 0.5,
            max_angular_velocity: 1.0,
        }
    }
}

/// Differential drive command: forward velocity and turn rate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriveCommand {
    pub v: f64,     // Linear velocity (m/s)
    pub omega: f64, // Angular velocity (rad/s)
}

impl DriveCommand {
    pub fn new(v: f64, omega: f64) -> Self {
        Self { v, omega }
    }

    /// The canonical stop command
    pub fn zero() -> Self {
        Self { v: 0.0, omega: 0.0 }
    }

    pub fn is_zero(&self) -> bool {
        self.v == 0.0 && self.omega == 0.0
    }

    /// Clamp both axes into `[-max, max]`. Non-finite components collapse to zero.
    pub fn clamped(&self, limits: &CommandLimits) -> Self {
        fn clamp_axis(value: f64, max: f64) -> f64 {
            if value.is_finite() {
                value.clamp(-max, max)
            } else {
                0.0
            }
        }

        Self {
            v: clamp_axis(self.v, limits.max_linear_velocity),
            omega: clamp_axis(self.omega, limits.max_angular_velocity),
        }
    }

    pub fn within(&self, limits: &CommandLimits) -> bool {
        self.v.abs() <= limits.max_linear_velocity && self.omega.abs() <= limits.max_angular_velocity
    }
}

/// Command as it crosses the actuation boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriveCommandStamped {
    pub v: f64,
    pub omega: f64,
    pub vehicle: String,
    pub command_id: String,
    pub timestamp: u64, // Unix milliseconds
}

impl DriveCommandStamped {
    pub fn new(command: DriveCommand, vehicle: &str) -> Self {
        Self {
            v: command.v,
            omega: command.omega,
            vehicle: vehicle.to_string(),
            command_id: uuid::Uuid::new_v4().to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or_default(),
        }
    }

    pub fn command(&self) -> DriveCommand {
        DriveCommand::new(self.v, self.omega)
    }
}
