// Geolocation acquisition cascade.
// A finite-state machine over named stages: permission probe, precise single-shot fix,
// continuous watch, network lookup. It does no IO itself: every transition returns the
// commands the host must perform (platform calls, timers) and the host reports results
// back tagged with the run id. The first resolution of a run is written to a one-shot
// cell; anything arriving later for that run, or for an older run, is discarded.

use std::cell::OnceCell;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::GeolocationError;
use crate::types::{GeolocationSettings, Notice, UserLocation};

/// Named cascade stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    PermissionProbe,
    PreciseFix,
    WatchFix,
    NetworkLookup,
}

/// Identity of one cascade run. Results tagged with another run are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub u64);

/// What the platform offers. Probed once by the host at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub geolocation: bool,
    pub permissions: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            geolocation: true,
            permissions: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    Granted,
    Prompt,
    Denied,
    /// The query itself failed or is not implemented.
    Unknown,
}

/// Host work requested by a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum CascadeCommand {
    QueryPermission {
        run: RunId,
    },
    RequestFix {
        run: RunId,
        high_accuracy: bool,
        timeout_ms: u64,
        maximum_age_ms: u64,
    },
    StartWatch {
        run: RunId,
        high_accuracy: bool,
    },
    ClearWatch {
        run: RunId,
    },
    FetchNetworkLocation {
        run: RunId,
    },
    ArmDeadline {
        run: RunId,
        stage: Stage,
        after_ms: u64,
    },
    CancelDeadline {
        run: RunId,
        stage: Stage,
    },
}

/// Result reported by the host for a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal")]
pub enum Signal {
    Permission { state: PermissionState },
    FixAcquired { lat: f64, lng: f64 },
    FixFailed { denied: bool, message: String },
    WatchFix { lat: f64, lng: f64 },
    WatchFailed { denied: bool, message: String },
    NetworkResponse { body: serde_json::Value },
    NetworkFailed { message: String },
    DeadlineElapsed { stage: Stage },
}

impl Signal {
    /// The stage a signal can belong to.
    fn stage(&self) -> Stage {
        match self {
            Signal::Permission { .. } => Stage::PermissionProbe,
            Signal::FixAcquired { .. } | Signal::FixFailed { .. } => Stage::PreciseFix,
            Signal::WatchFix { .. } | Signal::WatchFailed { .. } => Stage::WatchFix,
            Signal::NetworkResponse { .. } | Signal::NetworkFailed { .. } => Stage::NetworkLookup,
            Signal::DeadlineElapsed { stage } => *stage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeInput {
    pub run: RunId,
    #[serde(flatten)]
    pub signal: Signal,
}

/// The single outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CascadeOutcome {
    Located { location: UserLocation },
    Failed { error: GeolocationError },
}

/// Everything a transition produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub commands: Vec<CascadeCommand>,
    pub notices: Vec<Notice>,
    /// Set on the one transition that resolved the run.
    pub outcome: Option<CascadeOutcome>,
}

impl Transition {
    fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.notices.is_empty() && self.outcome.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CascadeStatus {
    NeverRun,
    InFlight { run: RunId, stage: Stage },
    Finished { run: RunId },
}

#[derive(Debug)]
struct Run {
    id: RunId,
    stage: Stage,
    watching: bool,
    deadline: Option<Stage>,
    result: OnceCell<CascadeOutcome>,
}

impl Run {
    fn is_resolved(&self) -> bool {
        self.result.get().is_some()
    }
}

/// Sequential fallback chain that acquires the user's location at most once per run.
#[derive(Debug)]
pub struct GeolocationCascade {
    settings: GeolocationSettings,
    capabilities: Capabilities,
    run: Option<Run>,
    next_run: u64,
    auto_started: bool,
    location: Option<UserLocation>,
}

impl GeolocationCascade {
    pub fn new(settings: GeolocationSettings, capabilities: Capabilities) -> Self {
        GeolocationCascade {
            settings,
            capabilities,
            run: None,
            next_run: 0,
            auto_started: false,
            location: None,
        }
    }

    /// Last acquired location, kept across later failed runs.
    pub fn location(&self) -> Option<UserLocation> {
        self.location
    }

    pub fn outcome(&self) -> Option<&CascadeOutcome> {
        self.run.as_ref().and_then(|run| run.result.get())
    }

    pub fn status(&self) -> CascadeStatus {
        match &self.run {
            None => CascadeStatus::NeverRun,
            Some(run) if run.is_resolved() => CascadeStatus::Finished { run: run.id },
            Some(run) => CascadeStatus::InFlight {
                run: run.id,
                stage: run.stage,
            },
        }
    }

    pub fn in_flight(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.is_resolved())
    }

    /// Startup trigger. Runs the cascade only the first time it is called.
    pub fn auto_start(&mut self) -> Transition {
        if self.auto_started {
            return Transition::default();
        }
        self.auto_started = true;
        self.start()
    }

    /// Manual "locate me". Re-enters the first stage unless a run is already in flight.
    pub fn request(&mut self) -> Transition {
        self.auto_started = true;
        self.start()
    }

    /// Feed a host result back. Signals for other runs or other stages are discarded.
    pub fn handle(&mut self, input: CascadeInput) -> Transition {
        let Some(run) = self.run.as_ref() else {
            debug!(run = input.run.0, "signal with no cascade run, discarded");
            return Transition::default();
        };
        if run.id != input.run || run.is_resolved() || run.stage != input.signal.stage() {
            debug!(
                run = input.run.0,
                stage = ?input.signal.stage(),
                "stale geolocation signal discarded"
            );
            return Transition::default();
        }

        let mut out = Transition::default();
        match input.signal {
            Signal::Permission { state } => {
                self.disarm(&mut out);
                if state == PermissionState::Denied {
                    self.fail(&mut out, GeolocationError::Denied);
                } else {
                    self.enter(&mut out, Stage::PreciseFix);
                }
            }
            Signal::FixAcquired { lat, lng } | Signal::WatchFix { lat, lng } => {
                self.disarm(&mut out);
                self.clear_watch(&mut out);
                self.succeed(&mut out, UserLocation { lat, lng, approximate: false });
            }
            Signal::FixFailed { denied, message } | Signal::WatchFailed { denied, message } => {
                self.disarm(&mut out);
                self.clear_watch(&mut out);
                debug!(%message, denied, "device location attempt failed");
                let error = match (denied, self.run.as_ref()) {
                    (true, _) => GeolocationError::Denied,
                    (false, Some(run)) => GeolocationError::StageFailed { stage: run.stage, message },
                    (false, None) => return out,
                };
                self.settle(&mut out, error);
            }
            Signal::NetworkResponse { body } => {
                self.disarm(&mut out);
                match network_location(&body) {
                    Some(location) => self.succeed(&mut out, location),
                    None => {
                        debug!("network lookup returned no usable coordinates");
                        self.fail(&mut out, GeolocationError::Exhausted);
                    }
                }
            }
            Signal::NetworkFailed { message } => {
                self.disarm(&mut out);
                debug!(%message, "network lookup failed");
                self.fail(&mut out, GeolocationError::Exhausted);
            }
            Signal::DeadlineElapsed { stage } => {
                if let Some(run) = self.run.as_mut() {
                    run.deadline = None;
                }
                self.clear_watch(&mut out);
                self.settle(&mut out, GeolocationError::Timeout { stage });
            }
        }
        out
    }

    /// Teardown: stop the watch and timers of an in-flight run and drop it.
    pub fn cancel(&mut self) -> Transition {
        let mut out = Transition::default();
        if !self.in_flight() {
            return out;
        }
        self.disarm(&mut out);
        self.clear_watch(&mut out);
        if let Some(run) = self.run.take() {
            info!(run = run.id.0, "geolocation cascade cancelled");
        }
        out
    }

    fn start(&mut self) -> Transition {
        if self.in_flight() {
            debug!("geolocation already in flight, ignoring request");
            return Transition::default();
        }
        self.next_run += 1;
        let id = RunId(self.next_run);
        info!(run = id.0, "starting geolocation cascade");
        self.run = Some(Run {
            id,
            stage: Stage::PermissionProbe,
            watching: false,
            deadline: None,
            result: OnceCell::new(),
        });

        let mut out = Transition::default();
        if !self.capabilities.geolocation {
            self.fail(
                &mut out,
                GeolocationError::Unavailable("Geolocation is not supported in this browser".to_string()),
            );
        } else if self.capabilities.permissions {
            self.enter(&mut out, Stage::PermissionProbe);
        } else {
            self.enter(&mut out, Stage::PreciseFix);
        }
        debug_assert!(!out.is_empty());
        out
    }

    fn enter(&mut self, out: &mut Transition, stage: Stage) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.stage = stage;
        let id = run.id;
        debug!(run = id.0, ?stage, "entering geolocation stage");

        let after_ms = match stage {
            Stage::PermissionProbe => {
                out.commands.push(CascadeCommand::QueryPermission { run: id });
                self.settings.permission_deadline_ms
            }
            Stage::PreciseFix => {
                out.commands.push(CascadeCommand::RequestFix {
                    run: id,
                    high_accuracy: true,
                    timeout_ms: self.settings.fix_timeout_ms,
                    maximum_age_ms: 0,
                });
                self.settings.fix_deadline_ms
            }
            Stage::WatchFix => {
                run.watching = true;
                out.commands.push(CascadeCommand::StartWatch {
                    run: id,
                    high_accuracy: true,
                });
                self.settings.watch_deadline_ms
            }
            Stage::NetworkLookup => {
                out.commands.push(CascadeCommand::FetchNetworkLocation { run: id });
                self.settings.network_deadline_ms
            }
        };
        run.deadline = Some(stage);
        out.commands.push(CascadeCommand::ArmDeadline {
            run: id,
            stage,
            after_ms,
        });
    }

    /// Move to the stage after the current one, or give up.
    fn advance(&mut self, out: &mut Transition) {
        let Some(stage) = self.run.as_ref().map(|run| run.stage) else {
            return;
        };
        match stage {
            Stage::PermissionProbe => self.enter(out, Stage::PreciseFix),
            Stage::PreciseFix => self.enter(out, Stage::WatchFix),
            Stage::WatchFix => self.enter(out, Stage::NetworkLookup),
            Stage::NetworkLookup => self.fail(out, GeolocationError::Exhausted),
        }
    }

    /// Terminal errors end the run; anything else moves on to the next stage.
    fn settle(&mut self, out: &mut Transition, error: GeolocationError) {
        if error.is_terminal() {
            self.fail(out, error);
        } else {
            warn!(%error, "geolocation stage gave up");
            self.advance(out);
        }
    }

    fn disarm(&mut self, out: &mut Transition) {
        if let Some(run) = self.run.as_mut() {
            if let Some(stage) = run.deadline.take() {
                out.commands.push(CascadeCommand::CancelDeadline { run: run.id, stage });
            }
        }
    }

    fn clear_watch(&mut self, out: &mut Transition) {
        if let Some(run) = self.run.as_mut() {
            if run.watching {
                run.watching = false;
                out.commands.push(CascadeCommand::ClearWatch { run: run.id });
            }
        }
    }

    fn succeed(&mut self, out: &mut Transition, location: UserLocation) {
        if !self.resolve(out, CascadeOutcome::Located { location }) {
            return;
        }
        self.location = Some(location);
        info!(approximate = location.approximate, "user location acquired");
        let notice = if location.approximate {
            Notice::info(
                "Approximate location used",
                "Based on your network location (lower accuracy)",
            )
        } else {
            Notice::info("Location detected", "Centering near your position")
        };
        out.notices.push(notice);
    }

    fn fail(&mut self, out: &mut Transition, error: GeolocationError) {
        let title = match &error {
            GeolocationError::Denied => "Permission blocked",
            GeolocationError::Unavailable(_) => "Location unavailable",
            _ => "Location error",
        };
        let description = error.to_string();
        if !self.resolve(out, CascadeOutcome::Failed { error }) {
            return;
        }
        warn!(%description, "geolocation cascade failed");
        out.notices.push(Notice::error(title, description));
    }

    /// Write the run's one-shot result. Returns false if it was already resolved.
    fn resolve(&mut self, out: &mut Transition, outcome: CascadeOutcome) -> bool {
        let Some(run) = self.run.as_ref() else {
            return false;
        };
        if run.result.set(outcome.clone()).is_err() {
            debug!(run = run.id.0, "run already resolved, result discarded");
            return false;
        }
        out.outcome = Some(outcome);
        true
    }
}

/// Coordinates from an IP-geolocation response (`latitude` / `longitude` numbers).
pub fn network_location(body: &serde_json::Value) -> Option<UserLocation> {
    let lat = body.get("latitude")?.as_f64()?;
    let lng = body.get("longitude")?.as_f64()?;
    let valid = lat.is_finite() && lng.is_finite() && lat.abs() <= 90.0 && lng.abs() <= 180.0;
    valid.then_some(UserLocation {
        lat,
        lng,
        approximate: true,
    })
}
