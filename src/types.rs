// Strong typing over strings. Newtypes for event ids and epoch timestamps.
// Everything crossing the JS boundary derives serde.

use serde::{Deserialize, Serialize};

use crate::error::ViewerError;

/// Event origin time in epoch milliseconds. Newtype for type safety.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct EpochMillis(i64);

impl EpochMillis {
    pub fn from_millis(ms: i64) -> Self {
        EpochMillis(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64
    }
}

/// Stable identity of a seismic event (the feed's feature id).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct EventId(String);

impl EventId {
    pub fn new(id: impl Into<String>) -> Self {
        EventId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Geographic coordinate in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        LatLng { lat, lng }
    }
}

/// Event hypocenter. Depth is always stored as a non-negative kilometre value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinates {
    pub longitude: f64,
    pub latitude: f64,
    pub depth_km: f64,
}

impl Coordinates {
    /// Build from wire order `[lng, lat, depth]`; negative wire depths are normalized.
    pub fn new(longitude: f64, latitude: f64, depth: f64) -> Self {
        let depth_km = if depth.is_finite() { depth.abs() } else { 0.0 };
        Coordinates {
            longitude,
            latitude,
            depth_km,
        }
    }

    pub fn position(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }
}

/// A single seismic occurrence. Immutable once built by the feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeismicEvent {
    pub id: EventId,
    pub magnitude: f64,
    pub coordinates: Coordinates,
    pub time: EpochMillis,
    pub place: String,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

impl SeismicEvent {
    pub fn position(&self) -> LatLng {
        self.coordinates.position()
    }

    pub fn depth_km(&self) -> f64 {
        self.coordinates.depth_km
    }
}

/// Display flags. Clusters and discrete points are exclusive; the heatmap overlays either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DisplayMode {
    #[serde(default)]
    pub show_heatmap: bool,
    #[serde(default)]
    pub show_clusters: bool,
}

/// The user's location. `approximate` marks network/IP derived fixes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub lat: f64,
    pub lng: f64,
    pub approximate: bool,
}

impl UserLocation {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lng)
    }
}

/// Severity of a human-readable status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Status string for the notification component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub level: NoticeLevel,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Notice {
            title: title.into(),
            description: description.into(),
            level: NoticeLevel::Info,
        }
    }

    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Notice {
            title: title.into(),
            description: description.into(),
            level: NoticeLevel::Error,
        }
    }
}

/// Receives status notices (toasts).
pub trait NoticeSink {
    fn notify(&mut self, notice: Notice);
}

impl NoticeSink for Vec<Notice> {
    fn notify(&mut self, notice: Notice) {
        self.push(notice);
    }
}

/// Receives selection changes for the details panel.
pub trait SelectionSink {
    fn selected(&mut self, event: &SeismicEvent);
    fn deselected(&mut self);
}

/// Selection change, for hosts that collect notifications in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SelectionChange {
    Selected { event: SeismicEvent },
    Deselected,
}

impl SelectionSink for Vec<SelectionChange> {
    fn selected(&mut self, event: &SeismicEvent) {
        self.push(SelectionChange::Selected {
            event: event.clone(),
        });
    }

    fn deselected(&mut self) {
        self.push(SelectionChange::Deselected);
    }
}

/// Viewer configuration passed from JS.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Wall-clock length of a full replay (milliseconds).
    #[serde(default = "default_playback_duration")]
    pub playback_duration_ms: f64,
    /// Pixel radius used to group nearby markers in cluster mode.
    #[serde(default = "default_cluster_radius")]
    pub cluster_radius_px: f64,
    /// Events newer than this get the pulsing treatment (milliseconds).
    #[serde(default = "default_recent_window")]
    pub recent_window_ms: i64,
    #[serde(default = "default_initial_zoom")]
    pub initial_zoom: f64,
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f64,
    #[serde(default)]
    pub geolocation: GeolocationSettings,
    #[serde(default = "default_summary_capacity")]
    pub summary_cache_capacity: usize,
    /// How often the host should re-fetch the feed (milliseconds).
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_ms: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        ViewerConfig {
            playback_duration_ms: default_playback_duration(),
            cluster_radius_px: default_cluster_radius(),
            recent_window_ms: default_recent_window(),
            initial_zoom: default_initial_zoom(),
            max_zoom: default_max_zoom(),
            geolocation: GeolocationSettings::default(),
            summary_cache_capacity: default_summary_capacity(),
            refresh_interval_ms: default_refresh_interval(),
        }
    }
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> Result<Self, ViewerError> {
        let config: ViewerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ViewerError> {
        if !(self.playback_duration_ms > 0.0) {
            return Err(ViewerError::InvalidConfig(
                "playback_duration_ms must be positive".to_string(),
            ));
        }
        if !(self.cluster_radius_px > 0.0) {
            return Err(ViewerError::InvalidConfig(
                "cluster_radius_px must be positive".to_string(),
            ));
        }
        if self.summary_cache_capacity == 0 {
            return Err(ViewerError::InvalidConfig(
                "summary_cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.max_zoom < self.initial_zoom {
            return Err(ViewerError::InvalidConfig(format!(
                "max_zoom {} is below initial_zoom {}",
                self.max_zoom, self.initial_zoom
            )));
        }
        Ok(())
    }
}

/// Per-stage bounds of the geolocation cascade (milliseconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeolocationSettings {
    #[serde(default = "default_permission_deadline")]
    pub permission_deadline_ms: u64,
    /// Timeout handed to the platform for the single-shot fix.
    #[serde(default = "default_fix_timeout")]
    pub fix_timeout_ms: u64,
    /// Caller-side deadline for the single-shot fix.
    #[serde(default = "default_fix_deadline")]
    pub fix_deadline_ms: u64,
    #[serde(default = "default_watch_deadline")]
    pub watch_deadline_ms: u64,
    #[serde(default = "default_network_deadline")]
    pub network_deadline_ms: u64,
}

impl Default for GeolocationSettings {
    fn default() -> Self {
        GeolocationSettings {
            permission_deadline_ms: default_permission_deadline(),
            fix_timeout_ms: default_fix_timeout(),
            fix_deadline_ms: default_fix_deadline(),
            watch_deadline_ms: default_watch_deadline(),
            network_deadline_ms: default_network_deadline(),
        }
    }
}

fn default_playback_duration() -> f64 {
    30_000.0
}

fn default_cluster_radius() -> f64 {
    50.0
}

fn default_recent_window() -> i64 {
    3_600_000 // 1h
}

fn default_initial_zoom() -> f64 {
    2.0
}

fn default_max_zoom() -> f64 {
    18.0
}

fn default_summary_capacity() -> usize {
    64
}

fn default_refresh_interval() -> u64 {
    300_000 // 5min
}

fn default_permission_deadline() -> u64 {
    3_000
}

fn default_fix_timeout() -> u64 {
    20_000
}

fn default_fix_deadline() -> u64 {
    23_000
}

fn default_watch_deadline() -> u64 {
    20_000
}

fn default_network_deadline() -> u64 {
    8_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_depth_is_normalized() {
        let coords = Coordinates::new(-122.4, 37.7, -12.5);
        assert_eq!(coords.depth_km, 12.5);
        assert_eq!(coords.position(), LatLng::new(37.7, -122.4));
    }

    #[test]
    fn non_finite_depth_becomes_zero() {
        assert_eq!(Coordinates::new(0.0, 0.0, f64::NAN).depth_km, 0.0);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = ViewerConfig::from_json("{}").unwrap();
        assert_eq!(config.playback_duration_ms, 30_000.0);
        assert_eq!(config.cluster_radius_px, 50.0);
        assert_eq!(config.geolocation.fix_deadline_ms, 23_000);
        assert_eq!(config.summary_cache_capacity, 64);
    }

    #[test]
    fn rejects_zero_duration() {
        let err = ViewerConfig::from_json(r#"{"playback_duration_ms":0}"#).unwrap_err();
        assert!(matches!(err, ViewerError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_garbage_json() {
        let err = ViewerConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, ViewerError::Serialization(_)));
    }
}
