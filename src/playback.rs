// Timeline playback.
// A frame-driven clock advances a normalized progress value; the derived cutoff time filters
// the event set during replay. The host owns the real frame clock (requestAnimationFrame) and
// calls back with a frame handle; handles that were cancelled are ignored, so no frame can
// mutate state after a pause or teardown.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{EpochMillis, SeismicEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PlaybackPhase {
    #[default]
    Idle,
    Running,
}

/// Progress in [0, 1] plus the clock bookkeeping a tick needs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct PlaybackState {
    pub progress: f64,
    pub phase: PlaybackPhase,
    /// Timestamp of the previous frame; `None` until the first frame after a (re)start.
    pub last_frame_ms: Option<f64>,
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.phase == PlaybackPhase::Running
    }
}

/// One scheduler step: `(state, now) -> (next state, schedule another frame?)`.
///
/// Progress grows by `elapsed / duration_ms`, clamped to 1. Reaching 1 stops playback.
pub fn step(state: PlaybackState, now_ms: f64, duration_ms: f64) -> (PlaybackState, bool) {
    if state.phase != PlaybackPhase::Running {
        return (state, false);
    }
    let last = state.last_frame_ms.unwrap_or(now_ms);
    // A clock that runs backwards never rewinds progress.
    let elapsed = (now_ms - last).max(0.0);
    let progress = (state.progress + elapsed / duration_ms).min(1.0);

    if progress >= 1.0 {
        let done = PlaybackState {
            progress: 1.0,
            phase: PlaybackPhase::Idle,
            last_frame_ms: None,
        };
        return (done, false);
    }

    let next = PlaybackState {
        progress,
        phase: PlaybackPhase::Running,
        last_frame_ms: Some(now_ms),
    };
    (next, true)
}

/// Earliest and latest origin time of an event set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub min: EpochMillis,
    pub max: EpochMillis,
}

impl TimeSpan {
    pub fn of(events: &[SeismicEvent]) -> Option<Self> {
        let min = events.iter().map(|e| e.time).min()?;
        let max = events.iter().map(|e| e.time).max()?;
        Some(TimeSpan { min, max })
    }

    /// `min + progress * (max - min)`; a single-instant span always yields that instant.
    pub fn cutoff(&self, progress: f64) -> f64 {
        if self.min == self.max {
            return self.max.as_f64();
        }
        let p = if progress.is_nan() { 0.0 } else { progress.clamp(0.0, 1.0) };
        let min = self.min.as_f64();
        let max = self.max.as_f64();
        (min + p * (max - min)).clamp(min, max)
    }
}

/// Opaque id of a scheduled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameHandle(pub u64);

/// Host-provided frame scheduling.
pub trait FrameDriver {
    fn request_frame(&mut self) -> FrameHandle;
    fn cancel_frame(&mut self, handle: FrameHandle);
}

/// Frame driver that only hands out ids; the JS host maps them onto real animation frames.
#[derive(Debug, Clone, Default)]
pub struct FrameTokens {
    next: u64,
    pub requested: Option<FrameHandle>,
    pub cancelled: Vec<FrameHandle>,
}

impl FrameDriver for FrameTokens {
    fn request_frame(&mut self) -> FrameHandle {
        self.next += 1;
        let handle = FrameHandle(self.next);
        self.requested = Some(handle);
        handle
    }

    fn cancel_frame(&mut self, handle: FrameHandle) {
        if self.requested == Some(handle) {
            self.requested = None;
        }
        self.cancelled.push(handle);
    }
}

/// Playback state machine (`Idle` <-> `Running`) bound to the current event span.
#[derive(Debug, Clone)]
pub struct PlaybackEngine {
    state: PlaybackState,
    duration_ms: f64,
    span: Option<TimeSpan>,
    /// Set once play is pressed; cleared when a refresh invalidates the replay.
    engaged: bool,
    pending: Option<FrameHandle>,
}

impl PlaybackEngine {
    pub fn new(duration_ms: f64) -> Self {
        PlaybackEngine {
            state: PlaybackState::default(),
            duration_ms,
            span: None,
            engaged: false,
            pending: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn progress(&self) -> f64 {
        self.state.progress
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    pub fn span(&self) -> Option<TimeSpan> {
        self.span
    }

    pub fn pending_frame(&self) -> Option<FrameHandle> {
        self.pending
    }

    pub fn cutoff(&self) -> Option<f64> {
        self.span.map(|span| span.cutoff(self.state.progress))
    }

    /// A new event list always restarts the scrub position.
    pub fn reset_for(&mut self, events: &[SeismicEvent], driver: &mut dyn FrameDriver) {
        self.span = TimeSpan::of(events);
        self.state.progress = 0.0;
        self.state.last_frame_ms = None;

        if self.span.is_none() && self.is_playing() {
            debug!("event set emptied during playback, stopping");
            self.stop(driver);
        }
        if !self.is_playing() {
            self.engaged = false;
        }
    }

    /// `Idle -> Running`. Replays from the start once the end was reached.
    pub fn play(&mut self, driver: &mut dyn FrameDriver) -> bool {
        if self.is_playing() {
            return true;
        }
        if self.span.is_none() {
            debug!("play requested with no events");
            return false;
        }
        if self.state.progress >= 1.0 {
            self.state.progress = 0.0;
        }
        self.state.phase = PlaybackPhase::Running;
        self.state.last_frame_ms = None;
        self.engaged = true;
        self.pending = Some(driver.request_frame());
        true
    }

    /// `Running -> Idle`, freezing the visible set at the current cutoff.
    pub fn pause(&mut self, driver: &mut dyn FrameDriver) {
        if self.is_playing() {
            self.stop(driver);
        }
    }

    pub fn toggle(&mut self, driver: &mut dyn FrameDriver) -> PlaybackPhase {
        if self.is_playing() {
            self.pause(driver);
        } else {
            self.play(driver);
        }
        self.state.phase
    }

    /// Frame callback. Returns whether another frame was scheduled.
    pub fn on_frame(&mut self, driver: &mut dyn FrameDriver, handle: FrameHandle, now_ms: f64) -> bool {
        if self.pending != Some(handle) {
            debug!(frame = handle.0, "ignoring stale frame");
            return false;
        }
        self.pending = None;

        let (next, keep_going) = step(self.state, now_ms, self.duration_ms);
        self.state = next;
        if keep_going {
            self.pending = Some(driver.request_frame());
        } else {
            debug!(progress = self.state.progress, "playback reached the end");
        }
        keep_going
    }

    /// Cancel any outstanding frame; nothing fires afterwards.
    pub fn teardown(&mut self, driver: &mut dyn FrameDriver) {
        self.stop(driver);
        self.engaged = false;
    }

    /// Filter for the map: cutoff while replay is engaged, everything otherwise.
    pub fn visible(&self, events: &[SeismicEvent]) -> Vec<SeismicEvent> {
        match (self.engaged, self.cutoff()) {
            (true, Some(cutoff)) => events
                .iter()
                .filter(|e| e.time.as_f64() <= cutoff)
                .cloned()
                .collect(),
            _ => events.to_vec(),
        }
    }

    fn stop(&mut self, driver: &mut dyn FrameDriver) {
        if let Some(handle) = self.pending.take() {
            driver.cancel_frame(handle);
        }
        self.state.phase = PlaybackPhase::Idle;
        self.state.last_frame_ms = None;
    }
}
