use std::{
    sync::{Arc, RwLock},
    thread,
};

use crossbeam_channel::{Receiver, never, select};

use crate::{
    history::{HistorySession, HistorySink},
    lock::{LockController, Transition},
    similarity::EnrolledIdentity,
    types::{FrameBatch, LockStatus},
};

/// Operator input, applied between frames.
#[derive(Clone, Debug)]
pub enum ControlSignal {
    Release,
    Switch(EnrolledIdentity),
    Shutdown,
}

/// Latest controller status, readable from any thread.
#[derive(Clone, Debug, Default)]
pub struct StatusHandle {
    inner: Arc<RwLock<LockStatus>>,
}

impl StatusHandle {
    pub fn latest(&self) -> LockStatus {
        match self.inner.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn publish(&self, status: LockStatus) {
        match self.inner.write() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct TrackerReport {
    pub frames: u64,
    pub sessions: Vec<HistorySession>,
    pub rejected_switches: u64,
    pub unpersisted_lines: usize,
}

pub fn start_tracker<S: HistorySink + 'static>(
    controller: LockController<S>,
    frame_rx: Receiver<FrameBatch>,
    control_rx: Receiver<ControlSignal>,
    status: StatusHandle,
) -> thread::JoinHandle<TrackerReport> {
    log::info!("starting tracker for target '{}'", controller.target().name());
    thread::spawn(move || run_tracker_loop(controller, frame_rx, control_rx, status))
}

/// Drives the controller until the frame source closes or a shutdown arrives.
pub fn run_tracker_loop<S: HistorySink>(
    mut controller: LockController<S>,
    frame_rx: Receiver<FrameBatch>,
    control_rx: Receiver<ControlSignal>,
    status: StatusHandle,
) -> TrackerReport {
    let mut report = TrackerReport::default();
    let mut controls_open = true;
    status.publish(controller.status());

    loop {
        // Pending controls always win over the next frame.
        let mut stop = false;
        while let Ok(signal) = control_rx.try_recv() {
            if apply_control(&mut controller, signal, &mut report) {
                stop = true;
                break;
            }
        }
        if stop {
            break;
        }

        let controls = if controls_open {
            control_rx.clone()
        } else {
            never()
        };
        select! {
            recv(frame_rx) -> msg => match msg {
                Ok(batch) => {
                    process_batch(&mut controller, &batch, &mut report);
                }
                Err(_) => break,
            },
            recv(controls) -> msg => match msg {
                Ok(signal) => {
                    if apply_control(&mut controller, signal, &mut report) {
                        break;
                    }
                }
                Err(_) => controls_open = false,
            },
        }
        status.publish(controller.status());
    }

    let now = controller.last_timestamp().unwrap_or_default();
    if let Some(session) = controller.shutdown(now) {
        report.sessions.push(session);
    }
    report.unpersisted_lines = controller.recorder().pending_len();
    status.publish(controller.status());
    log::info!(
        "tracker stopped after {} frames, {} session(s)",
        report.frames,
        report.sessions.len()
    );
    report
}

fn process_batch<S: HistorySink>(
    controller: &mut LockController<S>,
    batch: &FrameBatch,
    report: &mut TrackerReport,
) {
    let outcome = controller.process_frame(&batch.detections, batch.timestamp);
    report.frames += 1;

    for event in &outcome.events {
        log::info!(
            "action #{} {}: {} ({:.3})",
            event.sequence,
            event.kind.label(),
            event.description,
            event.magnitude
        );
    }
    if let Some(Transition::Released { reason, .. }) = &outcome.transition {
        log::debug!("lock released by {reason:?} at {:.3}", batch.timestamp);
    }
    if let Some(session) = outcome.closed_session {
        report.sessions.push(session);
    }
}

/// Returns true when the loop should stop.
fn apply_control<S: HistorySink>(
    controller: &mut LockController<S>,
    signal: ControlSignal,
    report: &mut TrackerReport,
) -> bool {
    let now = controller.last_timestamp().unwrap_or_default();
    match signal {
        ControlSignal::Release => {
            match controller.release(now) {
                Some(session) => {
                    log::info!("manually released lock");
                    report.sessions.push(session);
                }
                None => log::info!("release ignored: not locked"),
            }
            false
        }
        ControlSignal::Switch(identity) => {
            if let Err(err) = controller.request_switch(identity) {
                log::warn!("{err}");
                report.rejected_switches += 1;
            }
            false
        }
        ControlSignal::Shutdown => true,
    }
}
