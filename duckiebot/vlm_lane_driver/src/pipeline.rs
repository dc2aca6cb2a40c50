use crate::command_mapper::CommandMapper;
use crate::model_client::{is_error_sentinel, VisionModel};
use crate::prompt::PromptBuilder;
use crate::response_parser::{parse_response, parse_trajectory, Trajectory};
use eyre::Result;
use lane_pilot_lib::{CameraFrame, DriveCommand, FrameEncoder, GateConfig, MotionState, PilotConfig};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What one frame turned into
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Gate was stopped and inference is skipped while stopped
    Skipped,
    /// Frame could not be encoded; no command for this cycle
    EncodeFailed(String),
    /// Gate stopped while the model call was outstanding
    Cancelled,
    Decided {
        response: String,
        trajectory: Trajectory,
        command: DriveCommand,
    },
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub frame_id: u64,
    pub outcome: CycleOutcome,
    pub elapsed: Duration,
}

/// Frame -> prompt -> model -> parse -> command
pub struct Pipeline<M> {
    encoder: FrameEncoder,
    prompt: PromptBuilder,
    model: M,
    mapper: CommandMapper,
    policy: GateConfig,
}

impl<M: VisionModel> Pipeline<M> {
    pub fn new(config: &PilotConfig, model: M) -> Self {
        Self {
            encoder: FrameEncoder::new(&config.encoder),
            prompt: PromptBuilder::new(),
            model,
            mapper: CommandMapper::new(config.mapper.clone(), config.limits),
            policy: config.gate.clone(),
        }
    }

    pub async fn run_cycle(
        &self,
        frame: &CameraFrame,
        gate: &mut watch::Receiver<MotionState>,
    ) -> CycleOutcome {
        let started_running = *gate.borrow_and_update() == MotionState::Running;
        if !started_running && self.policy.skip_inference_when_stopped {
            debug!("Frame {} skipped: gate is stopped", frame.frame_id);
            return CycleOutcome::Skipped;
        }

        let encoded = match self.encoder.encode(frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Frame {} could not be encoded: {:#}", frame.frame_id, e);
                return CycleOutcome::EncodeFailed(e.to_string());
            }
        };

        let conversation = self.prompt.build(&encoded);

        let response = if started_running && self.policy.cancel_on_stop {
            tokio::select! {
                response = self.model.complete(&conversation) => response,
                _ = wait_for_stop(gate) => {
                    info!("Frame {}: model call abandoned, gate stopped", frame.frame_id);
                    return CycleOutcome::Cancelled;
                }
            }
        } else {
            self.model.complete(&conversation).await
        };

        if is_error_sentinel(&response) {
            warn!("Frame {}: {}", frame.frame_id, response);
        } else {
            info!("Frame {} model response: {:?}", frame.frame_id, response);
        }

        let step = parse_response(&response);
        let trajectory = parse_trajectory(&response);
        if trajectory.is_empty() {
            debug!("Frame {}: no usable line in response, stopping", frame.frame_id);
        }
        let command = self.mapper.map(&step);

        debug!(
            "Frame {}: parsed ({}, {}) from {} step(s) -> v={:.3}, omega={:.3}",
            frame.frame_id,
            step.velocity,
            step.direction,
            trajectory.steps().len(),
            command.v,
            command.omega
        );

        CycleOutcome::Decided {
            response,
            trajectory,
            command,
        }
    }
}

/// What happened to a frame offered to the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameAdmission {
    Queued,
    /// A cycle is still in flight; the frame is discarded
    Dropped,
    /// The worker is gone
    Closed,
}

/// Hand a frame to the worker unless a cycle is already in flight.
///
/// `decode` runs only after the in-flight slot is claimed, so dropped frames
/// cost nothing. Anything but `Queued` releases the slot again.
pub fn offer_frame<F>(
    in_flight: &AtomicBool,
    frames: &mpsc::Sender<CameraFrame>,
    decode: F,
) -> Result<FrameAdmission>
where
    F: FnOnce() -> Result<CameraFrame>,
{
    if in_flight
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Ok(FrameAdmission::Dropped);
    }

    let frame = match decode() {
        Ok(frame) => frame,
        Err(e) => {
            in_flight.store(false, Ordering::Release);
            return Err(e);
        }
    };

    match frames.try_send(frame) {
        Ok(()) => Ok(FrameAdmission::Queued),
        Err(TrySendError::Full(_)) => {
            in_flight.store(false, Ordering::Release);
            Ok(FrameAdmission::Dropped)
        }
        Err(TrySendError::Closed(_)) => {
            in_flight.store(false, Ordering::Release);
            Ok(FrameAdmission::Closed)
        }
    }
}

/// Resolve once the gate reports STOPPED. Never resolves if the gate is gone.
async fn wait_for_stop(gate: &mut watch::Receiver<MotionState>) {
    loop {
        if *gate.borrow_and_update() == MotionState::Stopped {
            return;
        }
        if gate.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Process frames one at a time until the frame channel closes.
///
/// `in_flight` is raised by the sender before a frame is queued and cleared
/// here once its report is out, which keeps the effective queue depth at one.
pub async fn run_worker<M: VisionModel>(
    pipeline: Pipeline<M>,
    mut gate: watch::Receiver<MotionState>,
    mut frames: mpsc::Receiver<CameraFrame>,
    reports: mpsc::Sender<CycleReport>,
    in_flight: Arc<AtomicBool>,
) {
    while let Some(frame) = frames.recv().await {
        let start = Instant::now();
        let outcome = pipeline.run_cycle(&frame, &mut gate).await;
        let report = CycleReport {
            frame_id: frame.frame_id,
            outcome,
            elapsed: start.elapsed(),
        };

        let sent = reports.send(report).await;
        in_flight.store(false, Ordering::Release);
        if sent.is_err() {
            debug!("Report receiver closed, worker exiting");
            break;
        }
    }

    debug!("Frame channel closed, worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_client::error_sentinel;
    use async_trait::async_trait;
    use lane_pilot_lib::{Conversation, FrameEncoding};
    use std::sync::atomic::AtomicUsize;

    /// Answers every call with the same text, optionally after a delay
    struct ScriptedModel {
        answer: String,
        delay: Duration,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedModel {
        fn new(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                delay: Duration::ZERO,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn slow(answer: &str, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(answer)
            }
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        async fn complete(&self, conversation: &Conversation) -> String {
            assert_eq!(conversation.len(), 3);
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.answer.clone()
        }
    }

    fn frame(id: u64) -> CameraFrame {
        CameraFrame::new(id, 8, 8, FrameEncoding::Rgb8, vec![128; 8 * 8 * 3])
    }

    fn config(skip_when_stopped: bool) -> PilotConfig {
        let mut config = PilotConfig::default();
        config.gate.skip_inference_when_stopped = skip_when_stopped;
        config
    }

    fn assert_command(outcome: &CycleOutcome, v: f64, omega: f64) {
        match outcome {
            CycleOutcome::Decided { command, .. } => {
                assert!((command.v - v).abs() < 1e-9, "{:?}", command);
                assert!((command.omega - omega).abs() < 1e-9, "{:?}", command);
            }
            other => panic!("expected a decision, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_running_cycle_maps_first_step() {
        let (tx, mut rx) = watch::channel(MotionState::Running);
        let pipeline = Pipeline::new(&config(true), ScriptedModel::new("0.2 LL\n0.2 L\n0.2 L"));

        let outcome = pipeline.run_cycle(&frame(1), &mut rx).await;
        assert_command(&outcome, 0.415, -0.5);

        if let CycleOutcome::Decided { trajectory, .. } = outcome {
            assert_eq!(trajectory.steps().len(), 3);
        }
        drop(tx);
    }

    #[tokio::test]
    async fn test_stopped_gate_skips_model() {
        let (_tx, mut rx) = watch::channel(MotionState::Stopped);
        let model = ScriptedModel::new("0.2 F");
        let calls = model.calls.clone();
        let pipeline = Pipeline::new(&config(true), model);

        assert_eq!(pipeline.run_cycle(&frame(1), &mut rx).await, CycleOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_runs_while_stopped_when_skip_disabled() {
        let (_tx, mut rx) = watch::channel(MotionState::Stopped);
        let model = ScriptedModel::new("0.2 R");
        let calls = model.calls.clone();
        let pipeline = Pipeline::new(&config(false), model);

        let outcome = pipeline.run_cycle(&frame(1), &mut rx).await;
        assert_command(&outcome, 0.415, 0.2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_model_failure_degrades_to_stop() {
        let (_tx, mut rx) = watch::channel(MotionState::Running);
        let sentinel = error_sentinel("connection refused");
        let pipeline = Pipeline::new(&config(true), ScriptedModel::new(&sentinel));

        let outcome = pipeline.run_cycle(&frame(1), &mut rx).await;
        assert_command(&outcome, 0.0, 0.0);
    }

    #[tokio::test]
    async fn test_bad_frame_produces_no_command() {
        let (_tx, mut rx) = watch::channel(MotionState::Running);
        let model = ScriptedModel::new("0.2 F");
        let calls = model.calls.clone();
        let pipeline = Pipeline::new(&config(true), model);

        let broken = CameraFrame::new(3, 8, 8, FrameEncoding::Rgb8, vec![0; 10]);
        let outcome = pipeline.run_cycle(&broken, &mut rx).await;

        assert!(matches!(outcome, CycleOutcome::EncodeFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_cancels_outstanding_call() {
        let (tx, mut rx) = watch::channel(MotionState::Running);
        let pipeline = Pipeline::new(
            &config(true),
            ScriptedModel::slow("0.2 F", Duration::from_secs(5)),
        );

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            tx.send_replace(MotionState::Stopped);
            tx
        });

        let outcome = pipeline.run_cycle(&frame(1), &mut rx).await;
        assert_eq!(outcome, CycleOutcome::Cancelled);
        stopper.await.unwrap();
    }

    /// Wait until the worker has released the in-flight slot.
    async fn slot_released(in_flight: &AtomicBool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while in_flight.load(Ordering::Acquire) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("in-flight slot never released");
    }

    #[tokio::test]
    async fn test_frames_dropped_while_cycle_outstanding() {
        let (_gate_tx, gate_rx) = watch::channel(MotionState::Running);
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (report_tx, mut report_rx) = mpsc::channel(1);
        let in_flight = Arc::new(AtomicBool::new(false));

        let model = ScriptedModel::slow("0.2 L", Duration::from_millis(300));
        let calls = model.calls.clone();
        let pipeline = Pipeline::new(&config(true), model);
        let worker = tokio::spawn(run_worker(
            pipeline,
            gate_rx,
            frame_rx,
            report_tx,
            in_flight.clone(),
        ));

        let first = offer_frame(&in_flight, &frame_tx, || Ok(frame(1))).unwrap();
        assert_eq!(first, FrameAdmission::Queued);

        // Let the worker pick the frame up and start the model call
        tokio::time::sleep(Duration::from_millis(50)).await;
        for id in 2..5 {
            let decoded = AtomicBool::new(false);
            let admission = offer_frame(&in_flight, &frame_tx, || {
                decoded.store(true, Ordering::SeqCst);
                Ok(frame(id))
            })
            .unwrap();
            assert_eq!(admission, FrameAdmission::Dropped);
            assert!(!decoded.load(Ordering::SeqCst));
        }

        let report = report_rx.recv().await.unwrap();
        assert_eq!(report.frame_id, 1);
        assert_command(&report.outcome, 0.415, -0.2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        drop(frame_tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_frame_accepted_after_report_consumed() {
        let (_gate_tx, gate_rx) = watch::channel(MotionState::Running);
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (report_tx, mut report_rx) = mpsc::channel(1);
        let in_flight = Arc::new(AtomicBool::new(false));

        let model = ScriptedModel::slow("0.2 F", Duration::from_millis(50));
        let calls = model.calls.clone();
        let pipeline = Pipeline::new(&config(true), model);
        let worker = tokio::spawn(run_worker(
            pipeline,
            gate_rx,
            frame_rx,
            report_tx,
            in_flight.clone(),
        ));

        assert_eq!(
            offer_frame(&in_flight, &frame_tx, || Ok(frame(1))).unwrap(),
            FrameAdmission::Queued
        );
        assert_eq!(report_rx.recv().await.unwrap().frame_id, 1);

        slot_released(&in_flight).await;
        assert_eq!(
            offer_frame(&in_flight, &frame_tx, || Ok(frame(2))).unwrap(),
            FrameAdmission::Queued
        );
        assert_eq!(report_rx.recv().await.unwrap().frame_id, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(frame_tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_decode_failure_releases_slot() {
        let (frame_tx, mut frame_rx) = mpsc::channel(1);
        let in_flight = AtomicBool::new(false);

        let result = offer_frame(&in_flight, &frame_tx, || Err(eyre::eyre!("bad frame")));
        assert!(result.is_err());
        assert!(!in_flight.load(Ordering::Acquire));

        assert_eq!(
            offer_frame(&in_flight, &frame_tx, || Ok(frame(7))).unwrap(),
            FrameAdmission::Queued
        );
        assert_eq!(frame_rx.recv().await.unwrap().frame_id, 7);
    }

    #[tokio::test]
    async fn test_closed_worker_is_reported() {
        let (frame_tx, frame_rx) = mpsc::channel(1);
        drop(frame_rx);
        let in_flight = AtomicBool::new(false);

        assert_eq!(
            offer_frame(&in_flight, &frame_tx, || Ok(frame(1))).unwrap(),
            FrameAdmission::Closed
        );
        assert!(!in_flight.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_worker_reports_and_clears_in_flight() {
        let (_gate_tx, gate_rx) = watch::channel(MotionState::Running);
        let (frame_tx, frame_rx) = mpsc::channel(1);
        let (report_tx, mut report_rx) = mpsc::channel(1);
        let in_flight = Arc::new(AtomicBool::new(true));

        let pipeline = Pipeline::new(&config(true), ScriptedModel::new("0.2 F"));
        let worker = tokio::spawn(run_worker(
            pipeline,
            gate_rx,
            frame_rx,
            report_tx,
            in_flight.clone(),
        ));

        frame_tx.send(frame(42)).await.unwrap();
        let report = report_rx.recv().await.unwrap();
        assert_eq!(report.frame_id, 42);
        assert_command(&report.outcome, 0.415, 0.0);

        drop(frame_tx);
        worker.await.unwrap();
        assert!(!in_flight.load(Ordering::Acquire));
    }
}
