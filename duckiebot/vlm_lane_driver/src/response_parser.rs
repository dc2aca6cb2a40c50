/// Steps the model is asked for: now, +0.2s, +0.4s
pub const TRAJECTORY_STEPS: usize = 3;

/// Direction used when nothing in the response parses
pub const STOP_SYMBOL: &str = "S";

/// One `(velocity, direction)` pair from the model's answer
#[derive(Debug, Clone, PartialEq)]
pub struct TrajectoryStep {
    pub velocity: f64,
    pub direction: String,
}

impl TrajectoryStep {
    pub fn new(velocity: f64, direction: impl Into<String>) -> Self {
        Self {
            velocity,
            direction: direction.into(),
        }
    }

    /// Safe default: standing still
    pub fn stop() -> Self {
        Self::new(0.0, STOP_SYMBOL)
    }
}

/// Up to three parsed steps. Only the first one drives the vehicle.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Trajectory {
    steps: Vec<TrajectoryStep>,
}

impl Trajectory {
    pub fn steps(&self) -> &[TrajectoryStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Parse a single `"<velocity> <direction> ..."` line.
///
/// Lines with fewer than two tokens, or whose first token is not a number,
/// yield `None`. `nan` and `inf` are numbers here; the mapper's clamp zeroes them.
fn parse_line(line: &str) -> Option<TrajectoryStep> {
    let mut tokens = line.split_whitespace();
    let first = tokens.next()?;
    let second = tokens.next()?;

    let velocity = first.parse::<f64>().ok()?;
    Some(TrajectoryStep::new(velocity, second))
}

/// Collect the trajectory from freeform model text.
///
/// Scanning starts at the first line that parses; prose before it is
/// ignored. Later parseable lines fill the remaining steps.
pub fn parse_trajectory(text: &str) -> Trajectory {
    let steps = text
        .lines()
        .filter_map(parse_line)
        .take(TRAJECTORY_STEPS)
        .collect();
    Trajectory { steps }
}

/// First successfully parsed `(velocity, direction)` pair, or `(0.0, "S")`.
pub fn parse_response(text: &str) -> TrajectoryStep {
    text.lines()
        .find_map(parse_line)
        .unwrap_or_else(TrajectoryStep::stop)
}
