//! Capture lifecycle: wires transport, ingest, history, sink and renderer
//! together and owns the two worker threads.
//!
//! ```text
//!   Idle ──start()──► Running ──stop() / stale / closed / key──► Stopped
//! ```
//!
//! The ingest thread owns the sink. The render thread owns the surface and
//! hands it back on exit so `stop()` can close it.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::capture::history::SharedHistory;
use crate::capture::ingest::{IngestCounters, IngestLoop, IngestOutcome, IngestStats};
use crate::capture::record::LineParser;
use crate::capture::sink::SampleSink;
use crate::capture::transport::Transport;
use crate::core::config::Config;
use crate::core::errors::{LhmError, Result};
use crate::daemon::signals::StopSignal;
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::render::frame::{PlotSurface, Renderer};

/// How often `wait()` re-checks whether the pipeline stopped on its own.
const WAIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Running,
    Stopped,
}

/// Final report of one capture session.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureSummary {
    pub outcome: Option<IngestOutcome>,
    pub output: PathBuf,
    pub duration_ms: u64,
    pub history_len: usize,
    pub counters: IngestCounters,
}

type RenderHandle = JoinHandle<Box<dyn PlotSurface>>;

pub struct Controller {
    state: ControllerState,
    history: SharedHistory,
    stop: StopSignal,
    stats: Arc<IngestStats>,
    renderer: Renderer,
    render_interval: Duration,
    sink_path: PathBuf,
    activity: ActivityLoggerHandle,
    ingest: Option<IngestLoop>,
    ingest_thread: Option<JoinHandle<IngestOutcome>>,
    render_thread: Option<RenderHandle>,
    outcome: Option<IngestOutcome>,
    started_at: Option<Instant>,
    duration: Duration,
}

impl Controller {
    /// Build an idle controller writing accepted samples to `sink_path`.
    pub fn new(config: &Config, sink_path: impl Into<PathBuf>) -> Result<Self> {
        config.validate()?;
        let sink_path = sink_path.into();
        let stop = StopSignal::new();
        let history = SharedHistory::new(config.capture.max_len);
        let renderer = Renderer::from_config(config.layout.clone(), &config.render)?;
        let ingest = IngestLoop::new(
            LineParser::new(config.layout.clone()),
            history.clone(),
            SampleSink::new(&sink_path, config.layout.clone()),
            stop.clone(),
            Duration::from_millis(config.capture.conn_timeout_ms),
        );

        Ok(Self {
            state: ControllerState::Idle,
            history,
            stop,
            stats: ingest.stats(),
            renderer,
            render_interval: Duration::from_millis(config.render.interval_ms),
            sink_path,
            activity: ActivityLoggerHandle::disabled(),
            ingest: Some(ingest),
            ingest_thread: None,
            render_thread: None,
            outcome: None,
            started_at: None,
            duration: Duration::ZERO,
        })
    }

    #[must_use]
    pub fn with_activity(mut self, activity: ActivityLoggerHandle) -> Self {
        self.ingest = self
            .ingest
            .take()
            .map(|ingest| ingest.with_activity(activity.clone()));
        self.activity = activity;
        self
    }

    /// `Stopped` as soon as the ingest task has ended, even before
    /// [`wait`](Self::wait) or [`stop`](Self::stop) joins the render task and
    /// closes the surface.
    pub fn state(&self) -> ControllerState {
        let ingest_done = self
            .ingest_thread
            .as_ref()
            .is_some_and(JoinHandle::is_finished);
        if self.state == ControllerState::Running && ingest_done {
            ControllerState::Stopped
        } else {
            self.state
        }
    }

    /// Cloneable trigger for manual stop (keyboard, OS signals).
    pub fn stop_handle(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn history(&self) -> SharedHistory {
        self.history.clone()
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        Arc::clone(&self.stats)
    }

    pub fn sink_path(&self) -> &Path {
        &self.sink_path
    }

    /// Spawn the ingest and render threads. Only valid from `Idle`.
    pub fn start(
        &mut self,
        mut transport: Box<dyn Transport>,
        surface: Box<dyn PlotSurface>,
    ) -> Result<()> {
        let Some(ingest) = self.ingest.take() else {
            return Err(LhmError::Runtime {
                details: format!("controller cannot start from state {:?}", self.state),
            });
        };

        let source = transport.describe();
        let ingest_thread = thread::Builder::new()
            .name("lhm-ingest".to_string())
            .spawn(move || ingest.run(transport.as_mut()))
            .map_err(|e| LhmError::Runtime {
                details: format!("failed to spawn ingest thread: {e}"),
            })?;

        let render = RenderTask {
            renderer: self.renderer.clone(),
            history: self.history.clone(),
            stats: Arc::clone(&self.stats),
            stop: self.stop.clone(),
            interval: self.render_interval,
        };
        let render_thread = match thread::Builder::new()
            .name("lhm-render".to_string())
            .spawn(move || render.run(surface))
        {
            Ok(handle) => handle,
            Err(e) => {
                self.stop.request_stop();
                let _ = ingest_thread.join();
                self.state = ControllerState::Stopped;
                return Err(LhmError::Runtime {
                    details: format!("failed to spawn render thread: {e}"),
                });
            }
        };

        eprintln!(
            "[LHM-INGEST] capture started: {source} -> {}",
            self.sink_path.display()
        );
        self.ingest_thread = Some(ingest_thread);
        self.render_thread = Some(render_thread);
        self.started_at = Some(Instant::now());
        self.state = ControllerState::Running;
        Ok(())
    }

    /// Block until the pipeline stops on its own or a stop is requested, then
    /// tear it down.
    pub fn wait(&mut self) -> Option<IngestOutcome> {
        while self.state == ControllerState::Running
            && !self.stop.is_stop_requested()
            && !self
                .ingest_thread
                .as_ref()
                .is_none_or(JoinHandle::is_finished)
        {
            thread::sleep(WAIT_POLL);
        }
        self.stop()
    }

    /// Stop both tasks, close the surface and release the sink.
    ///
    /// Idempotent: later calls return the outcome recorded by the first.
    /// Stopping an idle controller records no outcome.
    pub fn stop(&mut self) -> Option<IngestOutcome> {
        match self.state {
            ControllerState::Stopped => return self.outcome,
            ControllerState::Idle => {
                self.ingest = None;
                self.state = ControllerState::Stopped;
                return None;
            }
            ControllerState::Running => {}
        }

        self.stop.request_stop();

        if let Some(handle) = self.ingest_thread.take() {
            match handle.join() {
                Ok(outcome) => self.outcome = Some(outcome),
                Err(_) => {
                    eprintln!("[LHM-INGEST] ingest thread panicked");
                    self.activity.send(ActivityEvent::Error {
                        code: "LHM-3900".to_string(),
                        message: "ingest thread panicked".to_string(),
                    });
                }
            }
        }

        if let Some(handle) = self.render_thread.take() {
            match handle.join() {
                Ok(mut surface) => {
                    if let Err(e) = surface.close() {
                        eprintln!("[LHM-RENDER] surface close failed: {e}");
                    }
                }
                Err(_) => eprintln!("[LHM-RENDER] render thread panicked"),
            }
        }

        self.duration = self.started_at.map_or(Duration::ZERO, |t| t.elapsed());
        self.state = ControllerState::Stopped;

        let counters = self.stats.counters();
        let reason = self.outcome.map_or("failed", IngestOutcome::as_str);
        eprintln!(
            "[LHM-INGEST] capture stopped ({reason}): {} accepted, {} duplicate, {} malformed, {} undecodable",
            counters.accepted, counters.duplicates, counters.malformed, counters.decode_failures
        );
        self.activity.send(ActivityEvent::CaptureStopped {
            reason: reason.to_string(),
            accepted: counters.accepted,
            duration_ms: duration_ms(self.duration),
        });
        self.outcome
    }

    pub fn summary(&self) -> CaptureSummary {
        CaptureSummary {
            outcome: self.outcome,
            output: self.sink_path.clone(),
            duration_ms: duration_ms(self.duration),
            history_len: self.history.len(),
            counters: self.stats.counters(),
        }
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        if self.state == ControllerState::Running {
            self.stop();
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Periodic snapshot → frame → draw loop.
struct RenderTask {
    renderer: Renderer,
    history: SharedHistory,
    stats: Arc<IngestStats>,
    stop: StopSignal,
    interval: Duration,
}

impl RenderTask {
    fn run(self, mut surface: Box<dyn PlotSurface>) -> Box<dyn PlotSurface> {
        let mut draw_failures = 0u64;
        while !self.stop.is_stop_requested() {
            let frame = self
                .renderer
                .frame(&self.history.snapshot())
                .with_counters(self.stats.counters());
            if let Err(e) = surface.draw(&frame) {
                draw_failures += 1;
                if draw_failures == 1 {
                    eprintln!("[LHM-RENDER] draw failed: {e}");
                }
            }
            if surface.stop_requested() {
                self.stop.request_stop();
                break;
            }
            thread::sleep(self.interval);
        }
        surface
    }
}
