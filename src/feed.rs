// Event ingestion: filter criteria, the USGS FDSN query, GeoJSON decoding.
// The host performs the HTTP request; this module builds the URL and turns the body
// into validated events. A failed fetch never replaces the last good list.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DataFetchError;
use crate::types::{Coordinates, DisplayMode, EpochMillis, EventId, Notice, NoticeSink, SeismicEvent};

const USGS_QUERY: &str = "https://earthquake.usgs.gov/fdsnws/event/1/query";
const QUERY_LIMIT: usize = 1000;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeRange {
    PastHour,
    #[default]
    PastDay,
    PastWeek,
    PastMonth,
}

impl TimeRange {
    pub fn span_ms(&self) -> i64 {
        match self {
            TimeRange::PastHour => HOUR_MS,
            TimeRange::PastDay => DAY_MS,
            TimeRange::PastWeek => 7 * DAY_MS,
            TimeRange::PastMonth => 30 * DAY_MS,
        }
    }
}

/// User filters. Ranges are inclusive `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterCriteria {
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default = "default_magnitude_range")]
    pub magnitude_range: [f64; 2],
    #[serde(default = "default_depth_range")]
    pub depth_range: [f64; 2],
    #[serde(default)]
    pub show_heatmap: bool,
    #[serde(default)]
    pub show_clusters: bool,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        FilterCriteria {
            time_range: TimeRange::default(),
            magnitude_range: default_magnitude_range(),
            depth_range: default_depth_range(),
            show_heatmap: false,
            show_clusters: false,
        }
    }
}

fn default_magnitude_range() -> [f64; 2] {
    [0.0, 10.0]
}

fn default_depth_range() -> [f64; 2] {
    [0.0, 700.0]
}

impl FilterCriteria {
    pub fn reset(&mut self) {
        *self = FilterCriteria::default();
    }

    pub fn display_mode(&self) -> DisplayMode {
        DisplayMode {
            show_heatmap: self.show_heatmap,
            show_clusters: self.show_clusters,
        }
    }

    /// True when only the display toggles differ, so no re-fetch is needed.
    pub fn same_query(&self, other: &FilterCriteria) -> bool {
        self.time_range == other.time_range
            && self.magnitude_range == other.magnitude_range
            && self.depth_range == other.depth_range
    }

    /// FDSN event query for this filter, ending at `now`.
    pub fn query_url(&self, now: EpochMillis) -> String {
        let end = now.as_millis();
        let start = end.saturating_sub(self.time_range.span_ms());
        let min_magnitude = self.magnitude_range[0].max(0.0);
        format!(
            "{USGS_QUERY}?format=geojson&starttime={}&endtime={}&minmagnitude={}&maxmagnitude={}&mindepth={}&maxdepth={}&orderby=time&limit={QUERY_LIMIT}",
            iso_timestamp(EpochMillis::from_millis(start)),
            iso_timestamp(now),
            min_magnitude,
            self.magnitude_range[1],
            self.depth_range[0],
            self.depth_range[1],
        )
    }
}

/// `YYYY-MM-DDTHH:MM:SS` in UTC, second precision. Out-of-range instants clamp to the epoch.
pub fn iso_timestamp(time: EpochMillis) -> String {
    DateTime::<Utc>::from_timestamp_millis(time.as_millis())
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

// Wire format. Only the fields the viewer uses are read. The collection must
// parse; individual features are decoded one at a time so a bad one is skipped.

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    features: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    id: String,
    #[serde(default)]
    properties: Option<Properties>,
    #[serde(default)]
    geometry: Option<Geometry>,
}

#[derive(Debug, Default, Deserialize)]
struct Properties {
    mag: Option<f64>,
    place: Option<String>,
    time: Option<f64>,
    url: Option<String>,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    #[serde(default)]
    coordinates: Vec<Option<f64>>,
}

/// Decode a GeoJSON FeatureCollection. `now` stands in for missing origin times.
///
/// Only a body that is not a FeatureCollection fails. Features without an id or a
/// position are dropped with a warning.
pub fn parse_feed(json: &str, now: EpochMillis) -> Result<Vec<SeismicEvent>, DataFetchError> {
    let collection: FeatureCollection = serde_json::from_str(json)?;
    let total = collection.features.len();
    let events: Vec<SeismicEvent> = collection
        .features
        .into_iter()
        .enumerate()
        .filter_map(|(index, raw)| {
            let decoded = serde_json::from_value::<Feature>(raw)
                .map_err(|e| e.to_string())
                .and_then(|feature| into_event(feature, now));
            match decoded {
                Ok(event) => Some(event),
                Err(reason) => {
                    warn!(index, %reason, "skipping feature");
                    None
                }
            }
        })
        .collect();
    if events.len() < total {
        debug!(kept = events.len(), total, "feed had unusable features");
    }
    Ok(events)
}

fn into_event(feature: Feature, now: EpochMillis) -> Result<SeismicEvent, String> {
    let coords = feature.geometry.map(|g| g.coordinates).unwrap_or_default();
    let (Some(Some(longitude)), Some(Some(latitude))) = (coords.first(), coords.get(1)) else {
        return Err(format!("feature {} has no position", feature.id));
    };
    let depth = coords.get(2).copied().flatten().unwrap_or(0.0);

    let props = feature.properties.unwrap_or_default();
    let magnitude = props.mag.unwrap_or(0.0);
    let place = props
        .place
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "Unknown location".to_string());
    let time = props
        .time
        .filter(|t| t.is_finite())
        .map_or(now, |t| EpochMillis::from_millis(t as i64));
    let title = props
        .title
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| format!("M {magnitude} - {place}"));

    Ok(SeismicEvent {
        id: EventId::new(feature.id),
        magnitude,
        coordinates: Coordinates::new(*longitude, *latitude, depth),
        time,
        place,
        url: props.url.unwrap_or_default(),
        title,
    })
}

/// Holds the last good event list across refreshes.
#[derive(Debug, Default)]
pub struct EventFeed {
    events: Vec<SeismicEvent>,
    generation: u64,
    last_error: Option<DataFetchError>,
    loading: bool,
}

impl EventFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[SeismicEvent] {
        &self.events
    }

    /// Bumped on every successful fetch, even one that returns the same events.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn last_error(&self) -> Option<&DataFetchError> {
        self.last_error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn begin_fetch(&mut self) {
        self.loading = true;
        self.last_error = None;
    }

    /// Apply a fetch outcome. Returns true when the event list was replaced.
    pub fn apply(
        &mut self,
        outcome: Result<&str, DataFetchError>,
        now: EpochMillis,
        notices: &mut dyn NoticeSink,
    ) -> bool {
        self.loading = false;
        match outcome.and_then(|body| parse_feed(body, now)) {
            Ok(events) => {
                info!(count = events.len(), "event feed refreshed");
                notices.notify(Notice::info(
                    "Real-time Data Updated",
                    format!("Loaded {} recent earthquakes", events.len()),
                ));
                self.events = events;
                self.generation += 1;
                self.last_error = None;
                true
            }
            Err(err) => {
                warn!(error = %err, kept = self.events.len(), "event feed fetch failed");
                notices.notify(Notice::error("Error", err.to_string()));
                self.last_error = Some(err);
                false
            }
        }
    }

    pub fn clear(&mut self) {
        debug!("event feed cleared");
        *self = EventFeed::default();
    }
}
