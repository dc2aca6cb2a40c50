use dora_node_api::{dora_core::config::DataId, DoraNode, Event, Parameter};
use eyre::Result;
use lane_pilot_lib::{init_tracing, CameraFrame, ControlEvent, PilotConfig};
use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

mod command_mapper;
mod inputs;
mod model_client;
mod motion_gate;
mod pipeline;
mod prompt;
mod response_parser;
mod sink;

use inputs::FrameParams;
use model_client::ChatCompletionsClient;
use motion_gate::MotionGate;
use pipeline::{offer_frame, run_worker, CycleOutcome, CycleReport, FrameAdmission, Pipeline};
use sink::{CommandSink, DoraCommandSink};

const IMAGE_INPUT: &str = "image";
const ACTION_INPUT: &str = "action";
const COMMAND_OUTPUT: &str = "car_cmd";

#[derive(Debug, Default)]
struct NodeStats {
    frames_received: u64,
    frames_dropped: u64,
    cycles_completed: u64,
    cycles_cancelled: u64,
    commands_suppressed: u64,
}

fn integer_param(parameters: &BTreeMap<String, Parameter>, key: &str) -> Option<u32> {
    match parameters.get(key) {
        Some(Parameter::Integer(i)) => u32::try_from(*i).ok(),
        _ => None,
    }
}

fn string_param<'a>(parameters: &'a BTreeMap<String, Parameter>, key: &str) -> Option<&'a str> {
    match parameters.get(key) {
        Some(Parameter::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn handle_report(report: CycleReport, gate: &MotionGate, sink: &mut dyn CommandSink, stats: &mut NodeStats) {
    match report.outcome {
        CycleOutcome::Decided { command, .. } => {
            stats.cycles_completed += 1;
            match gate.admit(command, sink) {
                Ok(true) => debug!(
                    "Frame {} command sent after {:.2}s",
                    report.frame_id,
                    report.elapsed.as_secs_f64()
                ),
                Ok(false) => {
                    stats.commands_suppressed += 1;
                    debug!("Frame {} command suppressed: gate is stopped", report.frame_id);
                }
                Err(e) => warn!("Failed to publish command for frame {}: {}", report.frame_id, e),
            }
        }
        CycleOutcome::Cancelled => stats.cycles_cancelled += 1,
        CycleOutcome::Skipped | CycleOutcome::EncodeFailed(_) => {}
    }
}

// Single-threaded so the worker task logs through the thread-local subscriber
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let _guard = init_tracing();

    info!("Starting VLM lane driver node");

    let config = PilotConfig::from_env()?;
    info!("Lane driver configuration:");
    info!("  Vehicle: {}", config.vehicle_name);
    info!(
        "  Mapper: base_forward_speed={} m/s, gain={}, max_angular_speed={} rad/s",
        config.mapper.base_forward_speed, config.mapper.velocity_gain, config.mapper.max_angular_speed
    );
    info!(
        "  Limits: |v| <= {} m/s, |omega| <= {} rad/s",
        config.limits.max_linear_velocity, config.limits.max_angular_velocity
    );
    info!(
        "  Model: {} at {} (timeout {}ms, retries {})",
        config.model.model, config.model.endpoint, config.model.timeout_ms, config.model.max_retries
    );
    info!(
        "  Gate: skip_inference_when_stopped={}, cancel_on_stop={}",
        config.gate.skip_inference_when_stopped, config.gate.cancel_on_stop
    );

    let model = ChatCompletionsClient::from_config(&config.model)?;
    let pipeline = Pipeline::new(&config, model);
    let gate = MotionGate::new();

    let (node, mut events) = DoraNode::init_from_env()?;
    let mut sink = DoraCommandSink::new(
        node,
        DataId::from(COMMAND_OUTPUT.to_owned()),
        &config.vehicle_name,
    );

    // Bridge dora's blocking event stream into the async loop
    let (dora_tx, dora_rx) = flume::unbounded();
    std::thread::spawn(move || {
        while let Some(event) = events.recv() {
            if dora_tx.send(event).is_err() {
                break;
            }
        }
    });

    let (frame_tx, frame_rx) = mpsc::channel::<CameraFrame>(1);
    let (report_tx, mut report_rx) = mpsc::channel::<CycleReport>(1);
    let in_flight = Arc::new(AtomicBool::new(false));
    let worker = tokio::spawn(run_worker(
        pipeline,
        gate.subscribe(),
        frame_rx,
        report_tx,
        in_flight.clone(),
    ));

    info!("Waiting for '{}' frames and '{}' events, gate is {}", IMAGE_INPUT, ACTION_INPUT, gate.state());

    let mut stats = NodeStats::default();
    let mut next_frame_id: u64 = 0;

    loop {
        tokio::select! {
            Some(report) = report_rx.recv() => {
                handle_report(report, &gate, &mut sink, &mut stats);
            }
            event = dora_rx.recv_async() => {
                let Ok(event) = event else {
                    info!("Event stream ended");
                    break;
                };

                match event {
                    Event::Input { id, metadata, data } => match id.as_str() {
                        IMAGE_INPUT => {
                            stats.frames_received += 1;
                            next_frame_id += 1;

                            let params = FrameParams {
                                width: integer_param(&metadata.parameters, "width"),
                                height: integer_param(&metadata.parameters, "height"),
                                encoding: string_param(&metadata.parameters, "encoding"),
                            };
                            let frame_id = next_frame_id;

                            match offer_frame(&in_flight, &frame_tx, || {
                                inputs::camera_frame(frame_id, params, data.0.as_ref())
                            }) {
                                Ok(FrameAdmission::Queued) => {}
                                Ok(FrameAdmission::Dropped) => {
                                    stats.frames_dropped += 1;
                                    debug!("Frame {} dropped: previous cycle still running", frame_id);
                                }
                                Ok(FrameAdmission::Closed) => {
                                    error!("Inference worker is gone, shutting down");
                                    break;
                                }
                                Err(e) => warn!("Ignoring frame {}: {}", frame_id, e),
                            }
                        }
                        ACTION_INPUT => match inputs::control_token(data.0.as_ref()) {
                            Some(token) => {
                                let event = ControlEvent::parse(&token);
                                if let Err(e) = gate.handle_event(&event, &mut sink) {
                                    warn!("Failed to publish command for '{}': {}", event, e);
                                }
                            }
                            None => warn!("Unreadable control event on '{}'", ACTION_INPUT),
                        },
                        other => {
                            warn!("Unexpected input: {}", other);
                        }
                    },
                    Event::InputClosed { id } => {
                        info!("Input {} closed", id);
                        if id.as_str() == IMAGE_INPUT {
                            break;
                        }
                    }
                    Event::Stop(_) => {
                        info!("Received stop event");
                        break;
                    }
                    other => {
                        debug!("Unexpected event: {:?}", other);
                    }
                }
            }
        }
    }

    info!("Stopping motors...");
    drop(frame_tx);
    worker.abort();
    if let Err(e) = gate.shutdown(&mut sink) {
        error!("Failed to send final stop command: {}", e);
    }
    tokio::time::sleep(Duration::from_millis(config.gate.shutdown_grace_ms)).await;
    info!("Motors stopped.");

    info!("Final statistics:");
    info!("   Frames received: {}", stats.frames_received);
    info!("   Frames dropped: {}", stats.frames_dropped);
    info!("   Cycles completed: {}", stats.cycles_completed);
    info!("   Cycles cancelled: {}", stats.cycles_cancelled);
    info!("   Commands suppressed: {}", stats.commands_suppressed);
    info!("   Commands published: {}", sink.published());

    Ok(())
}
