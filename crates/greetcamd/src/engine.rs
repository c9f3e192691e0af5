use crate::actions::{EventLog, GreetingAction};
use crate::config::Config;
use crate::source::{DetectionSource, SourceError};
use greetcam_core::{DailyStats, FrameReport, Greeter, GreetingEvent, StatsError, StatsStore};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("stats store error: {0}")]
    Stats(#[from] StatsError),
    #[error("detection source error: {0}")]
    Source(#[from] SourceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Latest view of the main loop, published after every frame.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub frames_processed: u64,
    pub live_faces: usize,
    pub next_face_id: u64,
    pub greetings_decided: u64,
    pub action_failures: u64,
    pub stats_write_failures: u64,
    pub today: DailyStats,
}

/// Handle to the engine thread.
pub struct EngineHandle {
    status: watch::Receiver<StatusSnapshot>,
    done: oneshot::Receiver<Result<(), EngineError>>,
    stop: Arc<AtomicBool>,
}

impl EngineHandle {
    pub fn status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    /// Ask the loop to finish after the frame it is on. The loop only sees the
    /// request between frames, so a source blocked on input delays it.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for the main loop to end (input exhausted, stop request or fatal
    /// error). Must not be called again once it has returned.
    pub async fn wait(&mut self) -> Result<(), EngineError> {
        (&mut self.done)
            .await
            .map_err(|_| EngineError::ChannelClosed)?
    }
}

/// The frame loop: detections in, greetings out.
///
/// Owns the tracker (through the greeter) and the stats store; nothing else
/// mutates them.
pub struct Engine {
    source: Box<dyn DetectionSource + Send>,
    greeter: Greeter,
    stats: StatsStore,
    actions: Vec<Box<dyn GreetingAction>>,
    event_log: Option<EventLog>,
    status: watch::Sender<StatusSnapshot>,
    stop: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(
        config: &Config,
        source: Box<dyn DetectionSource + Send>,
        actions: Vec<Box<dyn GreetingAction>>,
        event_log: Option<EventLog>,
    ) -> Result<(Self, watch::Receiver<StatusSnapshot>), EngineError> {
        let stats = StatsStore::open(&config.stats_dir, chrono::Local::now().date_naive())?;
        let greeter = Greeter::for_store(config.tracker_config(), config.policy_config(), &stats);
        tracing::info!(
            first_face_id = greeter.tracker().next_id(),
            today_total = stats.current().total_greetings,
            actions = ?actions.iter().map(|a| a.name().to_string()).collect::<Vec<_>>(),
            "engine ready"
        );

        let (status, status_rx) = watch::channel(StatusSnapshot {
            frames_processed: 0,
            live_faces: 0,
            next_face_id: greeter.tracker().next_id(),
            greetings_decided: 0,
            action_failures: 0,
            stats_write_failures: 0,
            today: stats.current().clone(),
        });

        Ok((
            Self {
                source,
                greeter,
                stats,
                actions,
                event_log,
                status,
                stop: Arc::new(AtomicBool::new(false)),
            },
            status_rx,
        ))
    }

    /// Run until the source is exhausted, a stop is requested or the source
    /// fails. Unsaved stats are flushed on every exit path.
    pub fn run(mut self) -> Result<(), EngineError> {
        tracing::info!("engine loop started");
        let result = self.process_frames();

        if let Err(e) = self.stats.flush() {
            tracing::warn!(error = %e, "final stats flush failed");
        }
        tracing::info!(
            frames = self.greeter.tracker().frame_index(),
            "engine loop finished"
        );
        result
    }

    fn process_frames(&mut self) -> Result<(), EngineError> {
        while !self.stop.load(Ordering::SeqCst) {
            let Some(frame) = self.source.next_frame()? else {
                tracing::info!("detection input finished");
                return Ok(());
            };
            let report = self.greeter.process_frame(&mut self.stats, &frame);
            if !report.new_faces.is_empty() || !report.evicted.is_empty() {
                tracing::debug!(
                    frame = report.frame,
                    new = ?report.new_faces,
                    evicted = ?report.evicted,
                    live = report.live_faces,
                    "identities changed"
                );
            }
            let failures: u64 = report.events.iter().map(|e| self.dispatch(e)).sum();
            self.publish(&report, failures);
        }
        tracing::info!("engine stop requested");
        Ok(())
    }

    /// Start every side effect for one greeting. Failures are logged and
    /// counted, never retried: the decision has already been made.
    fn dispatch(&mut self, event: &GreetingEvent) -> u64 {
        let mut failures = 0;
        for action in &self.actions {
            if let Err(e) = action.start(event) {
                tracing::warn!(
                    error = %e,
                    action = action.name(),
                    face_id = event.face_id,
                    "greeting action failed to start"
                );
                failures += 1;
            }
        }
        if let Some(log) = self.event_log.as_mut() {
            if let Err(e) = log.write_event(event) {
                tracing::warn!(
                    error = %e,
                    path = %log.path().display(),
                    "failed to append greeting event"
                );
            }
        }
        failures
    }

    fn publish(&self, report: &FrameReport, action_failures: u64) {
        let stats = &self.stats;
        let next_face_id = self.greeter.tracker().next_id();
        self.status.send_modify(|s| {
            s.frames_processed += 1;
            s.live_faces = report.live_faces;
            s.next_face_id = next_face_id;
            s.greetings_decided += report.events.len() as u64;
            s.action_failures += action_failures;
            s.stats_write_failures += report.stats_errors.len() as u64;
            if !report.events.is_empty() || s.today.date != stats.current().date {
                s.today = stats.current().clone();
            }
        });
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the stats store synchronously so startup fails fast if the stats
/// directory is unusable.
pub fn spawn_engine(
    config: &Config,
    source: Box<dyn DetectionSource + Send>,
    actions: Vec<Box<dyn GreetingAction>>,
    event_log: Option<EventLog>,
) -> Result<EngineHandle, EngineError> {
    let (engine, status) = Engine::new(config, source, actions, event_log)?;
    let stop = Arc::clone(&engine.stop);
    let (done_tx, done) = oneshot::channel();

    std::thread::Builder::new()
        .name("greetcam-engine".into())
        .spawn(move || {
            let result = engine.run();
            if let Err(e) = &result {
                tracing::error!(error = %e, "engine stopped");
            }
            let _ = done_tx.send(result);
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { status, done, stop })
}
