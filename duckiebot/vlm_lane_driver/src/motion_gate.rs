use crate::sink::CommandSink;
use eyre::Result;
use lane_pilot_lib::{ControlEvent, DriveCommand, MotionState};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{info, warn};

/// Run/stop state machine deciding which commands reach the actuator.
///
/// The state lives only in the watch channel, which the inference worker
/// subscribes to. Every transition and every publication happens under the
/// `publishing` lock, so a frame result can never slip out between a "stop"
/// transition and its zero command.
pub struct MotionGate {
    state: watch::Sender<MotionState>,
    publishing: Mutex<()>,
}

impl Default for MotionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(MotionState::Stopped);
        Self {
            state,
            publishing: Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.publishing.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> MotionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MotionState> {
        self.state.subscribe()
    }

    /// Apply a control event. "stop" and "go" set the state and publish the
    /// zero command right away; other tokens change nothing.
    ///
    /// Returns the new state when the event was recognized.
    pub fn handle_event(
        &self,
        event: &ControlEvent,
        sink: &mut dyn CommandSink,
    ) -> Result<Option<MotionState>> {
        let next = match event {
            ControlEvent::Stop => MotionState::Stopped,
            ControlEvent::Go => MotionState::Running,
            ControlEvent::Other(token) => {
                info!("Ignoring control event {:?}", token);
                return Ok(None);
            }
        };

        let _publishing = self.lock();
        let previous = self.state.send_replace(next);
        info!("Control event '{}': {} -> {}", event, previous, next);

        sink.publish(&DriveCommand::zero())?;
        Ok(Some(next))
    }

    /// Publish a frame-derived command if the gate is running.
    ///
    /// Returns whether the command went out.
    pub fn admit(&self, command: DriveCommand, sink: &mut dyn CommandSink) -> Result<bool> {
        let _publishing = self.lock();
        if self.state() != MotionState::Running {
            return Ok(false);
        }

        sink.publish(&command)?;
        Ok(true)
    }

    /// Force the stopped state and send the zero command, for shutdown.
    pub fn shutdown(&self, sink: &mut dyn CommandSink) -> Result<()> {
        let _publishing = self.lock();
        let previous = self.state.send_replace(MotionState::Stopped);
        if previous != MotionState::Stopped {
            warn!("Shutting down while {}, stopping motors", previous);
        }

        sink.publish(&DriveCommand::zero())
    }
}
