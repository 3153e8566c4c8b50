// quakescope_core: QuakeScope Rust/WASM engine.
// Layer reconciliation, timeline replay, and the geolocation cascade live here;
// JS is plumbing that draws the ops, runs timers and performs the network calls.

mod cluster;
mod error;
mod feed;
mod geo;
mod geolocation;
mod layers;
mod playback;
mod stats;
mod style;
mod summary;
mod surface;
mod types;
mod viewer;

use serde::Serialize;
use wasm_bindgen::prelude::*;

pub use cluster::{group_by_proximity, project, Grouping, WorldPixel};
pub use error::{DataFetchError, GeolocationError, ViewerError};
pub use feed::{iso_timestamp, parse_feed, EventFeed, FilterCriteria, TimeRange};
pub use geo::{effective_magnitude, estimate_impact, haversine_km, nearest_event, ImpactLevel, NearestEvent};
pub use geolocation::{
    network_location, Capabilities, CascadeCommand, CascadeInput, CascadeOutcome, CascadeStatus,
    GeolocationCascade, PermissionState, RunId, Signal, Stage, Transition,
};
pub use layers::{
    derive_layers, heat_intensity, Cluster, ClusterGroup, GradientStop, HeatPoint, HeatmapLayer,
    HeatmapOptions, HoverPhase, LayerManager, LayerSet, LayerSettings, PointMarker, PointStyle,
    RenderInputs, RenderTarget, UserMarker,
};
pub use playback::{step, FrameDriver, FrameHandle, FrameTokens, PlaybackEngine, PlaybackPhase, PlaybackState, TimeSpan};
pub use stats::{DepthDistribution, EventStats, MagnitudeDistribution};
pub use style::{classify, MagnitudeBand, MagnitudeStyle};
pub use summary::{clean_summary, local_summary, ShakingIntensity, SummaryCache, SummaryInput};
pub use surface::{HeadlessSurface, MapSurface, OpBatch, SurfaceOp};
pub use types::*;
pub use viewer::Viewer;

/// Initialize panic hook for better error messages in browser console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// Everything the host must do after one call: draw `ops`, run `commands`,
/// schedule or cancel animation frames by handle.
#[derive(Debug, Default, Serialize)]
struct HostBatch {
    ops: Vec<SurfaceOp>,
    commands: Vec<CascadeCommand>,
    request_frame: Option<FrameHandle>,
    cancel_frames: Vec<FrameHandle>,
}

/// Main viewer interface exposed to JavaScript.
/// Each call returns one JSON `HostBatch` to minimize JS↔WASM crossings.
#[wasm_bindgen]
pub struct QuakeScope {
    viewer: Viewer,
    frames: FrameTokens,
    zoom: f64,
    notices: Vec<Notice>,
    selection: Vec<SelectionChange>,
    on_notice: Option<js_sys::Function>,
    on_selection: Option<js_sys::Function>,
}

#[wasm_bindgen]
impl QuakeScope {
    /// `config_json` is a `ViewerConfig`, `capabilities_json` a `Capabilities`; `{}` takes defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: &str, capabilities_json: &str) -> Result<QuakeScope, JsValue> {
        let config = ViewerConfig::from_json(config_json).map_err(to_js)?;
        let capabilities: Capabilities = serde_json::from_str(capabilities_json)
            .map_err(|e| JsValue::from_str(&format!("Invalid capabilities: {}", e)))?;
        let zoom = config.initial_zoom;
        let viewer = Viewer::new(config, capabilities).map_err(to_js)?;

        Ok(QuakeScope {
            viewer,
            frames: FrameTokens::default(),
            zoom,
            notices: Vec::new(),
            selection: Vec::new(),
            on_notice: None,
            on_selection: None,
        })
    }

    /// Called with one JSON `Notice` per status message.
    pub fn set_notice_callback(&mut self, callback: js_sys::Function) {
        self.on_notice = Some(callback);
        self.deliver();
    }

    /// Called with one JSON `SelectionChange` per selection change.
    pub fn set_selection_callback(&mut self, callback: js_sys::Function) {
        self.on_selection = Some(callback);
        self.deliver();
    }

    /// Notices not yet delivered because no callback was registered.
    pub fn take_notices(&mut self) -> Result<String, JsValue> {
        let notices = std::mem::take(&mut self.notices);
        serde_json::to_string(&notices).map_err(json_err)
    }

    pub fn take_selection_changes(&mut self) -> Result<String, JsValue> {
        let changes = std::mem::take(&mut self.selection);
        serde_json::to_string(&changes).map_err(json_err)
    }

    pub fn refresh_interval_ms(&self) -> f64 {
        self.viewer.config().refresh_interval_ms as f64
    }

    /// URL to fetch for the current filters. Marks the feed as loading.
    pub fn query_url(&mut self, now_ms: f64) -> String {
        self.viewer.query_url(epoch(now_ms))
    }

    pub fn is_loading(&self) -> bool {
        self.viewer.feed().is_loading()
    }

    /// Successful HTTP response body (GeoJSON). Re-renders the map.
    pub fn apply_feed(&mut self, body: &str, now_ms: f64) -> Result<String, JsValue> {
        let mut batch = HostBatch::default();
        self.viewer
            .apply_fetch(Ok(body), epoch(now_ms), &mut self.frames, &mut self.notices);
        self.render_into(&mut batch, now_ms);
        self.finish(batch)
    }

    /// Non-2xx response. The last good event list stays on the map.
    pub fn fetch_failed(&mut self, status: u16, status_text: &str, now_ms: f64) -> Result<String, JsValue> {
        let error = DataFetchError::Http {
            status,
            status_text: status_text.to_string(),
        };
        self.fetch_error(error, now_ms)
    }

    /// The request itself failed (offline, CORS, abort).
    pub fn network_failed(&mut self, message: &str, now_ms: f64) -> Result<String, JsValue> {
        self.fetch_error(DataFetchError::Network(message.to_string()), now_ms)
    }

    /// Replace the filters with a JSON `FilterCriteria`. Returns true when the host must re-fetch.
    pub fn set_filters(&mut self, filters_json: &str) -> Result<bool, JsValue> {
        let filters: FilterCriteria = serde_json::from_str(filters_json).map_err(json_err)?;
        Ok(self.viewer.set_filters(filters))
    }

    pub fn reset_filters(&mut self) -> bool {
        self.viewer.reset_filters()
    }

    pub fn filters(&self) -> Result<String, JsValue> {
        serde_json::to_string(self.viewer.filters()).map_err(json_err)
    }

    pub fn render(&mut self, now_ms: f64) -> Result<String, JsValue> {
        let mut batch = HostBatch::default();
        self.render_into(&mut batch, now_ms);
        self.finish(batch)
    }

    /// The map finished a zoom. Heatmap radius and clusters follow it.
    pub fn set_zoom(&mut self, zoom: f64) -> Result<String, JsValue> {
        self.zoom = zoom;
        let mut surface = OpBatch::new(zoom);
        self.viewer.on_zoom(&mut surface);
        self.finish(HostBatch {
            ops: surface.take(),
            ..HostBatch::default()
        })
    }

    pub fn toggle_playback(&mut self, now_ms: f64) -> Result<String, JsValue> {
        let mut batch = HostBatch::default();
        self.viewer.toggle_playback(&mut self.frames, &mut self.notices);
        self.render_into(&mut batch, now_ms);
        self.finish(batch)
    }

    pub fn is_playing(&self) -> bool {
        self.viewer.playback().is_playing()
    }

    pub fn playback_progress(&self) -> f64 {
        self.viewer.playback().progress()
    }

    /// Animation frame callback for `handle`, with the frame timestamp and wall clock.
    pub fn frame(&mut self, handle: f64, frame_ms: f64, now_ms: f64) -> Result<String, JsValue> {
        let mut batch = HostBatch::default();
        let handle = FrameHandle(handle as u64);
        if self.viewer.playback().pending_frame() == Some(handle) {
            self.viewer.tick(&mut self.frames, handle, frame_ms);
            self.render_into(&mut batch, now_ms);
        }
        self.finish(batch)
    }

    pub fn hover(&mut self, event_id: &str, entered: bool) -> Result<String, JsValue> {
        let phase = if entered { HoverPhase::Enter } else { HoverPhase::Leave };
        let mut surface = OpBatch::new(self.zoom);
        self.viewer.on_hover(&mut surface, &EventId::new(event_id), phase);
        self.finish(HostBatch {
            ops: surface.take(),
            ..HostBatch::default()
        })
    }

    /// Click on a point or cluster member. The details panel hears about it through the selection callback.
    pub fn click(&mut self, event_id: &str) -> bool {
        let selected = self.viewer.on_click(&EventId::new(event_id), &mut self.selection);
        self.deliver();
        selected
    }

    pub fn cluster_click(&mut self, index: usize) -> Result<String, JsValue> {
        let mut surface = OpBatch::new(self.zoom);
        self.viewer.on_cluster_click(&mut surface, index);
        self.finish(HostBatch {
            ops: surface.take(),
            ..HostBatch::default()
        })
    }

    pub fn close_details(&mut self) {
        self.viewer.close_details(&mut self.selection);
        self.deliver();
    }

    /// Start the location cascade. `manual` is the "locate me" button; otherwise this
    /// is the startup trigger, which only runs once.
    pub fn locate(&mut self, manual: bool) -> Result<String, JsValue> {
        let commands = self.viewer.locate(manual, &mut self.notices);
        self.finish(HostBatch {
            commands,
            ..HostBatch::default()
        })
    }

    /// Result of a cascade command, as a JSON `CascadeInput`. Re-renders so the
    /// user marker appears as soon as a location resolves.
    pub fn geolocation_signal(&mut self, input_json: &str, now_ms: f64) -> Result<String, JsValue> {
        let input: CascadeInput = serde_json::from_str(input_json).map_err(json_err)?;
        let mut batch = HostBatch {
            commands: self.viewer.geolocation_signal(input, &mut self.notices),
            ..HostBatch::default()
        };
        self.render_into(&mut batch, now_ms);
        self.finish(batch)
    }

    pub fn user_location(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.viewer.user_location()).map_err(json_err)
    }

    /// JSON `NearestEvent` or `null`.
    pub fn nearest(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.viewer.nearest()).map_err(json_err)
    }

    pub fn stats(&self) -> Result<String, JsValue> {
        serde_json::to_string(&self.viewer.stats()).map_err(json_err)
    }

    /// Magnitude legend rows: band, label, color, radius.
    pub fn legend() -> Result<String, JsValue> {
        let rows: Vec<serde_json::Value> = MagnitudeBand::ALL
            .iter()
            .map(|band| {
                serde_json::json!({
                    "band": band,
                    "label": band.label(),
                    "color": band.color(),
                    "radius_px": band.radius_px(),
                })
            })
            .collect();
        serde_json::to_string(&rows).map_err(json_err)
    }

    pub fn summary(&mut self, event_id: &str, regenerate: bool) -> Option<String> {
        self.viewer.summary(&EventId::new(event_id), regenerate)
    }

    /// Cache externally generated summary text (cleaned and capped first).
    pub fn store_summary(&mut self, event_id: &str, raw_text: &str) -> String {
        let text = clean_summary(raw_text);
        self.viewer.store_summary(EventId::new(event_id), text.clone());
        text
    }

    /// Unmount. Returns the ops and commands that release everything the viewer holds.
    pub fn teardown(&mut self) -> Result<String, JsValue> {
        let mut surface = OpBatch::new(self.zoom);
        let commands = self.viewer.teardown(&mut surface, &mut self.frames, &mut self.selection);
        self.finish(HostBatch {
            ops: surface.take(),
            commands,
            ..HostBatch::default()
        })
    }
}

impl QuakeScope {
    fn render_into(&mut self, batch: &mut HostBatch, now_ms: f64) {
        let mut surface = OpBatch::new(self.zoom);
        self.viewer.render(&mut surface, epoch(now_ms), &mut self.selection);
        batch.ops.extend(surface.take());
    }

    fn fetch_error(&mut self, error: DataFetchError, now_ms: f64) -> Result<String, JsValue> {
        self.viewer
            .apply_fetch(Err(error), epoch(now_ms), &mut self.frames, &mut self.notices);
        self.finish(HostBatch::default())
    }

    /// Attach frame bookkeeping, deliver queued callbacks, serialize.
    fn finish(&mut self, mut batch: HostBatch) -> Result<String, JsValue> {
        batch.request_frame = self.frames.requested.take();
        batch.cancel_frames = std::mem::take(&mut self.frames.cancelled);
        self.deliver();
        serde_json::to_string(&batch).map_err(json_err)
    }

    /// Push queued notices and selection changes to their callbacks, if registered.
    fn deliver(&mut self) {
        if let Some(callback) = self.on_notice.as_ref() {
            for notice in self.notices.drain(..) {
                call_with_json(callback, &notice);
            }
        }
        if let Some(callback) = self.on_selection.as_ref() {
            for change in self.selection.drain(..) {
                call_with_json(callback, &change);
            }
        }
    }
}

fn call_with_json<T: Serialize>(callback: &js_sys::Function, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => {
            if let Err(err) = callback.call1(&JsValue::NULL, &JsValue::from_str(&json)) {
                tracing::warn!(?err, "host callback threw");
            }
        }
        Err(err) => tracing::warn!(error = %err, "callback payload not serializable"),
    }
}

fn epoch(ms: f64) -> EpochMillis {
    EpochMillis::from_millis(ms as i64)
}

fn to_js(err: ViewerError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn json_err(err: serde_json::Error) -> JsValue {
    to_js(ViewerError::from(err))
}
