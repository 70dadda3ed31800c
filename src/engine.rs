// src/engine.rs
//
// One thread polls the source and assembles windows; a second runs the
// signal chain. Windows cross between them as owned snapshots through a
// bounded queue, so the acquisition side never waits on FFT work for longer
// than the configured overflow policy allows.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::dsp::{
    idle_wait, FaultTracker, SampleFrontend, SampleSource, SignalChain, SourcePoll, StopToken,
    Window,
};
use crate::error::{AcquisitionError, SessionError};
use crate::queue::{BoundedQueue, PushOutcome};
use crate::types::{ControlOutput, SessionReport, Termination};

struct AcquisitionSummary {
    termination: Termination,
    samples_ingested: u64,
    windows_emitted: u64,
    transient_faults: u64,
}

struct WorkerSummary {
    windows_processed: u64,
    warmup_windows: u64,
}

/// Handle to a running session.
pub struct EngineHandle {
    stop: StopToken,
    outputs: Arc<BoundedQueue<ControlOutput>>,
    handoff: Arc<BoundedQueue<Window>>,
    acquisition: Option<JoinHandle<AcquisitionSummary>>,
    worker: Option<JoinHandle<WorkerSummary>>,
}

/// Validates `config` against the channel layout, then starts the
/// acquisition and signal-chain threads. Nothing is read from `source` if
/// validation fails.
pub fn spawn<S>(config: &PipelineConfig, source: S) -> Result<EngineHandle, SessionError>
where
    S: SampleSource + Send + 'static,
{
    let geometry = config.validate()?;
    let outputs = Arc::new(BoundedQueue::new(
        config.outbound_queue_capacity,
        config.overflow_policy,
    ));
    let handoff = Arc::new(BoundedQueue::new(
        config.handoff_queue_capacity,
        config.handoff_policy(),
    ));
    let mut chain = SignalChain::new(config, geometry, Arc::clone(&outputs))?;
    let frontend = SampleFrontend::new(config, geometry);
    let stop = StopToken::new();
    info!(
        "session starting: {} Hz, window {} samples, offset {} samples, overlap {}",
        config.sampling_rate_hz,
        geometry.window_samples,
        geometry.offset_samples,
        geometry.overlap_samples()
    );

    let worker = {
        let handoff = Arc::clone(&handoff);
        let outputs = Arc::clone(&outputs);
        thread::Builder::new()
            .name("signal-chain".into())
            .spawn(move || {
                while let Some(window) = handoff.pop_blocking() {
                    chain.process(&window);
                }
                outputs.close();
                debug!("signal chain drained");
                WorkerSummary {
                    windows_processed: chain.windows_processed(),
                    warmup_windows: chain.warmup_windows(),
                }
            })
            .map_err(|err| SessionError::Spawn("signal-chain", err))?
    };

    let acquisition = {
        let handoff = Arc::clone(&handoff);
        let stop = stop.clone();
        let settings = LoopSettings {
            channel_count: config.channel_count(),
            max_consecutive_failures: config.max_consecutive_failures,
            idle: Duration::from_millis(config.idle_poll_ms),
        };
        thread::Builder::new()
            .name("acquisition".into())
            .spawn(move || run_acquisition(source, frontend, &handoff, &stop, settings))
    };
    let acquisition = match acquisition {
        Ok(handle) => handle,
        Err(err) => {
            handoff.close();
            let _ = worker.join();
            return Err(SessionError::Spawn("acquisition", err));
        }
    };

    Ok(EngineHandle {
        stop,
        outputs,
        handoff,
        acquisition: Some(acquisition),
        worker: Some(worker),
    })
}

struct LoopSettings {
    channel_count: usize,
    max_consecutive_failures: u32,
    idle: Duration,
}

fn run_acquisition<S: SampleSource>(
    mut source: S,
    mut frontend: SampleFrontend,
    handoff: &BoundedQueue<Window>,
    stop: &StopToken,
    settings: LoopSettings,
) -> AcquisitionSummary {
    let mut faults = FaultTracker::new(settings.max_consecutive_failures);
    let mut lost_windows = 0u64;

    let termination = loop {
        if stop.is_stopped() {
            break Termination::Stopped;
        }
        let fatal = match source.next_sample(settings.channel_count) {
            Ok(SourcePoll::Sample(sample)) => match frontend.ingest(sample) {
                Ok(window) => {
                    faults.success();
                    if let Some(window) = window {
                        if !matches!(handoff.push(window), PushOutcome::Accepted) {
                            lost_windows += 1;
                            if lost_windows == 1 || lost_windows % 100 == 0 {
                                warn!("signal chain is behind; {lost_windows} window(s) dropped");
                            }
                        }
                    }
                    None
                }
                Err(err) => faults.transient(&err.to_string()),
            },
            Ok(SourcePoll::NoDataYet) => {
                idle_wait(settings.idle);
                None
            }
            Ok(SourcePoll::Exhausted) => break Termination::SourceExhausted,
            Err(AcquisitionError::Transient(reason)) => faults.transient(&reason),
            Err(AcquisitionError::Fatal(reason)) => Some(reason),
        };
        if let Some(reason) = fatal {
            error!("acquisition failed, shutting session down: {reason}");
            break Termination::Fatal(reason);
        }
    };

    if let Err(err) = source.release() {
        warn!("releasing the source failed: {err}");
    }
    handoff.close();
    info!("acquisition ended: {termination:?}");

    AcquisitionSummary {
        termination,
        samples_ingested: frontend.assembler().samples_seen(),
        windows_emitted: frontend.assembler().windows_emitted(),
        transient_faults: faults.total(),
    }
}

impl EngineHandle {
    /// Asks the acquisition loop to stop after its current iteration.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Outbound control queue; read it with `pop_timeout` or `try_pop`. It
    /// is closed once every processed window has been published.
    pub fn outputs(&self) -> Arc<BoundedQueue<ControlOutput>> {
        Arc::clone(&self.outputs)
    }

    /// Waits for both threads. Does not stop the session by itself; call
    /// [`EngineHandle::stop`] first for an endless source.
    pub fn join(mut self) -> Result<SessionReport, SessionError> {
        let acquisition = self
            .acquisition
            .take()
            .map(JoinHandle::join)
            .transpose()
            .map_err(|_| SessionError::ThreadPanicked("acquisition"))?;
        let worker = self
            .worker
            .take()
            .map(JoinHandle::join)
            .transpose()
            .map_err(|_| SessionError::ThreadPanicked("signal-chain"))?;
        let (Some(acquisition), Some(worker)) = (acquisition, worker) else {
            return Err(SessionError::ThreadPanicked("engine"));
        };
        let report = SessionReport {
            termination: acquisition.termination,
            samples_ingested: acquisition.samples_ingested,
            windows_emitted: acquisition.windows_emitted,
            windows_processed: worker.windows_processed,
            warmup_windows: worker.warmup_windows,
            transient_faults: acquisition.transient_faults,
            handoff: self.handoff.metrics(),
            outbound: self.outputs.metrics(),
        };
        info!("session report: {report:?}");
        Ok(report)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if self.acquisition.is_none() && self.worker.is_none() {
            return;
        }
        self.stop.stop();
        // A blocked producer must not keep the worker waiting.
        if let Some(handle) = self.acquisition.take() {
            let _ = handle.join();
        }
        self.handoff.close();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}
