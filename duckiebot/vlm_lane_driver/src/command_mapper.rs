use crate::response_parser::TrajectoryStep;
use lane_pilot_lib::{CommandLimits, DriveCommand, MapperConfig};

/// Heading change requested by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HardLeft,  // LL, 45 degrees
    Left,      // L, 20 degrees
    Forward,   // F
    Right,     // R, 20 degrees
    HardRight, // RR, 45 degrees
    Stop,      // S
    Unknown,
}

impl Direction {
    /// Every string maps to a direction; unseen symbols become `Unknown`.
    pub fn from_symbol(symbol: &str) -> Self {
        match symbol {
            "LL" => Direction::HardLeft,
            "L" => Direction::Left,
            "F" => Direction::Forward,
            "R" => Direction::Right,
            "RR" => Direction::HardRight,
            "S" => Direction::Stop,
            _ => Direction::Unknown,
        }
    }

    /// Fraction of the maximum angular speed. Left turns are negative.
    pub fn turn_factor(&self) -> f64 {
        match self {
            Direction::HardLeft => -0.5,
            Direction::Left => -0.2,
            Direction::Forward => 0.0,
            Direction::Right => 0.2,
            Direction::HardRight => 0.5,
            Direction::Stop | Direction::Unknown => 0.0,
        }
    }
}

/// Turns a symbolic trajectory step into a bounded drive command
#[derive(Debug, Clone)]
pub struct CommandMapper {
    config: MapperConfig,
    limits: CommandLimits,
}

impl CommandMapper {
    pub fn new(config: MapperConfig, limits: CommandLimits) -> Self {
        Self { config, limits }
    }

    pub fn linear_velocity(&self, velocity: f64) -> f64 {
        velocity * self.config.velocity_gain * self.config.base_forward_speed
    }

    pub fn angular_velocity(&self, direction: &str) -> f64 {
        Direction::from_symbol(direction).turn_factor() * self.config.max_angular_speed
    }

    pub fn map(&self, step: &TrajectoryStep) -> DriveCommand {
        DriveCommand::new(
            self.linear_velocity(step.velocity),
            self.angular_velocity(&step.direction),
        )
        .clamped(&self.limits)
    }
}
