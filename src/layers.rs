// Layer reconciliation.
// The wanted layer set is a pure function of (events, display mode, user location, zoom, now).
// LayerManager diffs it against what is on the surface and mutates the surface:
// every removal lands before any addition, so stale and fresh layers are never shown together.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::cluster::group_by_proximity;
use crate::style::{classify, MagnitudeBand};
use crate::surface::MapSurface;
use crate::types::{
    DisplayMode, EpochMillis, EventId, LatLng, SeismicEvent, SelectionSink, UserLocation,
    ViewerConfig,
};

/// Hover enlarges a marker by this factor.
const HOVER_SCALE: f64 = 1.5;
/// Zoom levels gained when a cluster is clicked.
const CLUSTER_ZOOM_STEP: f64 = 2.0;
/// First recenter on the user never zooms out past this.
const USER_FOCUS_MIN_ZOOM: f64 = 5.0;

/// Stroke and fill of a discrete marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointStyle {
    pub radius_px: f64,
    pub color: String,
    pub weight: f64,
    pub opacity: f64,
    pub fill_opacity: f64,
    pub class_name: String,
}

impl PointStyle {
    fn resting(magnitude: f64, pulsing: bool) -> Self {
        let style = classify(magnitude);
        let class_name = if pulsing {
            format!("earthquake-marker {} pulse-glow", style.class_name)
        } else {
            format!("earthquake-marker {}", style.class_name)
        };
        PointStyle {
            radius_px: style.radius_px,
            color: style.color.to_string(),
            weight: 2.0,
            opacity: 0.8,
            fill_opacity: 0.6,
            class_name,
        }
    }

    fn hovered(&self) -> Self {
        PointStyle {
            radius_px: self.radius_px * HOVER_SCALE,
            weight: 3.0,
            opacity: 1.0,
            fill_opacity: 0.8,
            ..self.clone()
        }
    }
}

/// One event drawn as a marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointMarker {
    pub id: EventId,
    pub position: LatLng,
    pub band: MagnitudeBand,
    /// Origin time within the recent window.
    pub pulsing: bool,
    pub style: PointStyle,
}

/// Markers that sit within the cluster radius of each other at the current zoom.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub center: LatLng,
    pub members: Vec<PointMarker>,
}

impl Cluster {
    pub fn count(&self) -> usize {
        self.members.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterGroup {
    pub radius_px: f64,
    pub zoom: f64,
    pub clusters: Vec<Cluster>,
}

impl ClusterGroup {
    pub fn member_count(&self) -> usize {
        self.clusters.iter().map(Cluster::count).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeatPoint {
    pub lat: f64,
    pub lng: f64,
    pub intensity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientStop {
    pub stop: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapOptions {
    pub radius: f64,
    pub blur: f64,
    pub max_zoom: f64,
    pub min_opacity: f64,
    pub gradient: Vec<GradientStop>,
}

impl HeatmapOptions {
    /// Radius and blur follow the zoom level.
    pub fn for_zoom(zoom: f64) -> Self {
        let radius = (zoom * 3.0 + 12.0).clamp(18.0, 45.0);
        let gradient = [
            (0.2, "#0ea5e9"),
            (0.4, "#22c55e"),
            (0.6, "#eab308"),
            (0.8, "#f97316"),
            (1.0, "#ef4444"),
        ]
        .into_iter()
        .map(|(stop, color)| GradientStop {
            stop,
            color: color.to_string(),
        })
        .collect();

        HeatmapOptions {
            radius,
            blur: (radius * 0.8).round(),
            max_zoom: 18.0,
            min_opacity: 0.3,
            gradient,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapLayer {
    pub points: Vec<HeatPoint>,
    pub options: HeatmapOptions,
}

/// Heat contribution of one event: `clamp(magnitude / 8, 0.1, 1.0)`.
pub fn heat_intensity(magnitude: f64) -> f64 {
    if magnitude.is_nan() {
        return 0.1;
    }
    (magnitude / 8.0).clamp(0.1, 1.0)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMarker {
    pub position: LatLng,
    pub approximate: bool,
    pub radius_px: f64,
    pub color: String,
}

impl UserMarker {
    fn at(location: &UserLocation) -> Self {
        UserMarker {
            position: location.position(),
            approximate: location.approximate,
            radius_px: 7.0,
            color: "#38bdf8".to_string(),
        }
    }
}

/// Grouping layer. Exactly one variant is live; switching rebuilds it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RenderTarget {
    Points(Vec<PointMarker>),
    Clusters(ClusterGroup),
}

impl RenderTarget {
    pub fn primitive_count(&self) -> usize {
        match self {
            RenderTarget::Points(points) => points.len(),
            RenderTarget::Clusters(group) => group.member_count(),
        }
    }

    fn contains(&self, id: &EventId) -> bool {
        match self {
            RenderTarget::Points(points) => points.iter().any(|p| &p.id == id),
            RenderTarget::Clusters(group) => group
                .clusters
                .iter()
                .any(|c| c.members.iter().any(|m| &m.id == id)),
        }
    }

    fn point(&self, id: &EventId) -> Option<&PointMarker> {
        match self {
            RenderTarget::Points(points) => points.iter().find(|p| &p.id == id),
            RenderTarget::Clusters(_) => None,
        }
    }
}

/// Everything that should be on the map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSet {
    pub target: RenderTarget,
    pub heatmap: Option<HeatmapLayer>,
    pub user: Option<UserMarker>,
}

/// Inputs the layer set is derived from.
#[derive(Debug, Clone, Copy)]
pub struct RenderInputs<'a> {
    pub events: &'a [SeismicEvent],
    pub mode: DisplayMode,
    pub user_location: Option<UserLocation>,
    pub zoom: f64,
    pub now: EpochMillis,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerSettings {
    pub cluster_radius_px: f64,
    pub recent_window_ms: i64,
    pub max_zoom: f64,
}

impl Default for LayerSettings {
    fn default() -> Self {
        LayerSettings::from(&ViewerConfig::default())
    }
}

impl From<&ViewerConfig> for LayerSettings {
    fn from(config: &ViewerConfig) -> Self {
        LayerSettings {
            cluster_radius_px: config.cluster_radius_px,
            recent_window_ms: config.recent_window_ms,
            max_zoom: config.max_zoom,
        }
    }
}

/// Pure derivation of the wanted layer set. Never fails; odd magnitudes style as minor.
pub fn derive_layers(inputs: &RenderInputs<'_>, settings: &LayerSettings) -> LayerSet {
    let mut seen = HashSet::new();
    let events: Vec<&SeismicEvent> = inputs
        .events
        .iter()
        .filter(|e| seen.insert(&e.id))
        .collect();

    let markers: Vec<PointMarker> = events
        .iter()
        .map(|event| {
            let pulsing =
                inputs.now.as_millis().saturating_sub(event.time.as_millis()) < settings.recent_window_ms;
            PointMarker {
                id: event.id.clone(),
                position: event.position(),
                band: classify(event.magnitude).band,
                pulsing,
                style: PointStyle::resting(event.magnitude, pulsing),
            }
        })
        .collect();

    let target = if inputs.mode.show_clusters {
        let positions: Vec<LatLng> = markers.iter().map(|m| m.position).collect();
        let clusters = group_by_proximity(&positions, inputs.zoom, settings.cluster_radius_px)
            .into_iter()
            .map(|grouping| Cluster {
                center: grouping.center,
                members: grouping
                    .members
                    .iter()
                    .map(|&idx| markers[idx].clone())
                    .collect(),
            })
            .collect();
        RenderTarget::Clusters(ClusterGroup {
            radius_px: settings.cluster_radius_px,
            zoom: inputs.zoom,
            clusters,
        })
    } else {
        RenderTarget::Points(markers)
    };

    let heatmap = inputs.mode.show_heatmap.then(|| HeatmapLayer {
        points: events
            .iter()
            .map(|e| HeatPoint {
                lat: e.coordinates.latitude,
                lng: e.coordinates.longitude,
                intensity: heat_intensity(e.magnitude),
            })
            .collect(),
        options: HeatmapOptions::for_zoom(inputs.zoom),
    });

    LayerSet {
        target,
        heatmap,
        user: inputs.user_location.as_ref().map(UserMarker::at),
    }
}

/// Hover transition reported by the host for a marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HoverPhase {
    Enter,
    Leave,
}

/// Owns the layers on the map surface. The only writer of the surface.
pub struct LayerManager {
    settings: LayerSettings,
    events: Vec<SeismicEvent>,
    mode: DisplayMode,
    user_location: Option<UserLocation>,
    now: EpochMillis,
    current: Option<LayerSet>,
    hovered: Option<EventId>,
    selected: Option<EventId>,
    centered_on_user: bool,
}

impl LayerManager {
    pub fn new(settings: LayerSettings) -> Self {
        LayerManager {
            settings,
            events: Vec::new(),
            mode: DisplayMode::default(),
            user_location: None,
            now: EpochMillis::default(),
            current: None,
            hovered: None,
            selected: None,
            centered_on_user: false,
        }
    }

    /// What is currently on the surface.
    pub fn layers(&self) -> Option<&LayerSet> {
        self.current.as_ref()
    }

    pub fn selected(&self) -> Option<&EventId> {
        self.selected.as_ref()
    }

    pub fn hovered(&self) -> Option<&EventId> {
        self.hovered.as_ref()
    }

    /// Reconcile the surface with a new (events, mode, location) tuple.
    pub fn render(
        &mut self,
        surface: &mut dyn MapSurface,
        events: &[SeismicEvent],
        mode: DisplayMode,
        user_location: Option<UserLocation>,
        now: EpochMillis,
        selection: &mut dyn SelectionSink,
    ) {
        self.events = events.to_vec();
        self.mode = mode;
        self.user_location = user_location;
        self.now = now;
        self.reconcile(surface);

        if let Some(id) = self.selected.clone() {
            let still_shown = self
                .current
                .as_ref()
                .is_some_and(|layers| layers.target.contains(&id));
            if !still_shown {
                debug!(event_id = %id, "selected event left the visible set");
                self.selected = None;
                selection.deselected();
            }
        }
    }

    /// Heatmap radius and cluster grouping depend on zoom; re-derive both.
    pub fn on_zoom_changed(&mut self, surface: &mut dyn MapSurface) {
        if self.current.is_none() {
            return;
        }
        self.reconcile(surface);
    }

    pub fn on_hover(&mut self, surface: &mut dyn MapSurface, id: &EventId, phase: HoverPhase) {
        let Some(layers) = self.current.as_ref() else {
            return;
        };
        let Some(marker) = layers.target.point(id) else {
            return;
        };

        match phase {
            HoverPhase::Enter => {
                if self.hovered.as_ref() == Some(id) {
                    return;
                }
                if let Some(previous) = self.hovered.take() {
                    if let Some(prev_marker) = layers.target.point(&previous) {
                        surface.restyle_point(&previous, &prev_marker.style);
                    }
                }
                surface.restyle_point(id, &marker.style.hovered());
                self.hovered = Some(id.clone());
            }
            HoverPhase::Leave => {
                if self.hovered.as_ref() != Some(id) {
                    return;
                }
                surface.restyle_point(id, &marker.style);
                self.hovered = None;
            }
        }
    }

    /// Click on a point or on a cluster member. Selection is exclusive.
    pub fn on_click(&mut self, id: &EventId, selection: &mut dyn SelectionSink) -> bool {
        let shown = self
            .current
            .as_ref()
            .is_some_and(|layers| layers.target.contains(id));
        let Some(event) = self.events.iter().find(|e| &e.id == id).filter(|_| shown) else {
            debug!(event_id = %id, "click on unknown event ignored");
            return false;
        };
        if self.selected.as_ref().is_some_and(|prior| prior != id) {
            selection.deselected();
        }
        self.selected = Some(id.clone());
        selection.selected(event);
        true
    }

    /// Click on a cluster bubble zooms towards it.
    pub fn on_cluster_click(&mut self, surface: &mut dyn MapSurface, index: usize) -> bool {
        let Some(LayerSet {
            target: RenderTarget::Clusters(group),
            ..
        }) = self.current.as_ref()
        else {
            return false;
        };
        let Some(cluster) = group.clusters.get(index) else {
            return false;
        };
        let zoom = (surface.zoom() + CLUSTER_ZOOM_STEP).min(self.settings.max_zoom);
        surface.fly_to(cluster.center, zoom);
        true
    }

    pub fn clear_selection(&mut self, selection: &mut dyn SelectionSink) {
        if self.selected.take().is_some() {
            selection.deselected();
        }
    }

    /// Remove everything this manager put on the surface and drop the selection.
    pub fn teardown(&mut self, surface: &mut dyn MapSurface, selection: &mut dyn SelectionSink) {
        if let Some(layers) = self.current.take() {
            remove_target(surface, &layers.target);
            if layers.heatmap.is_some() {
                surface.remove_heatmap();
            }
            if layers.user.is_some() {
                surface.remove_user_marker();
            }
        }
        self.hovered = None;
        self.events.clear();
        self.clear_selection(selection);
    }

    fn reconcile(&mut self, surface: &mut dyn MapSurface) {
        let inputs = RenderInputs {
            events: &self.events,
            mode: self.mode,
            user_location: self.user_location,
            zoom: surface.zoom(),
            now: self.now,
        };
        let wanted = derive_layers(&inputs, &self.settings);
        let previous = self.current.take();

        let (old_target, old_heatmap, old_user) = match previous {
            Some(layers) => (Some(layers.target), layers.heatmap, layers.user),
            None => (None, None, None),
        };

        let target_changed = old_target.as_ref() != Some(&wanted.target);
        let heat_points_changed = match (&old_heatmap, &wanted.heatmap) {
            (Some(old), Some(new)) => old.points != new.points,
            (None, None) => false,
            _ => true,
        };
        let user_changed = old_user != wanted.user;

        // Removals first.
        if target_changed {
            if let Some(old) = &old_target {
                remove_target(surface, old);
            }
            self.hovered = None;
        }
        if heat_points_changed && old_heatmap.is_some() {
            surface.remove_heatmap();
        }
        if user_changed && old_user.is_some() {
            surface.remove_user_marker();
        }

        // Then additions.
        if target_changed {
            add_target(surface, &wanted.target);
            debug!(
                primitives = wanted.target.primitive_count(),
                clusters = self.mode.show_clusters,
                "rebuilt grouping layer"
            );
        }
        match (&old_heatmap, &wanted.heatmap) {
            (_, Some(new)) if heat_points_changed => surface.add_heatmap(new),
            (Some(old), Some(new)) if old.options != new.options => {
                surface.set_heatmap_options(&new.options)
            }
            _ => {}
        }
        if user_changed {
            if let Some(marker) = &wanted.user {
                surface.add_user_marker(marker);
                if !self.centered_on_user {
                    let zoom = surface.zoom().max(USER_FOCUS_MIN_ZOOM);
                    info!(lat = marker.position.lat, lng = marker.position.lng, "centering on user location");
                    surface.fly_to(marker.position, zoom);
                    self.centered_on_user = true;
                }
            }
        }

        self.current = Some(wanted);
    }
}

fn remove_target(surface: &mut dyn MapSurface, target: &RenderTarget) {
    match target {
        RenderTarget::Points(points) => {
            for point in points {
                surface.remove_point(&point.id);
            }
        }
        RenderTarget::Clusters(_) => surface.remove_cluster_group(),
    }
}

fn add_target(surface: &mut dyn MapSurface, target: &RenderTarget) {
    match target {
        RenderTarget::Points(points) => {
            for point in points {
                surface.add_point(point);
            }
        }
        RenderTarget::Clusters(group) => surface.add_cluster_group(group),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{HeadlessSurface, OpBatch, SurfaceOp};
    use crate::types::{Coordinates, SelectionChange};
    use proptest::prelude::*;

    const NOW: i64 = 10_000_000;

    fn event(id: &str, mag: f64, time: i64, lat: f64, lng: f64) -> SeismicEvent {
        SeismicEvent {
            id: EventId::new(id),
            magnitude: mag,
            coordinates: Coordinates::new(lng, lat, -10.0),
            time: EpochMillis::from_millis(time),
            place: format!("near {id}"),
            url: String::new(),
            title: String::new(),
        }
    }

    fn scenario_events() -> Vec<SeismicEvent> {
        vec![
            event("a", 2.9, 1000, 35.0, 139.0),
            event("b", 5.5, 2000, -33.9, 18.4),
            event("c", 6.8, 3000, 61.2, -149.9),
        ]
    }

    fn points_mode() -> DisplayMode {
        DisplayMode {
            show_heatmap: false,
            show_clusters: false,
        }
    }

    fn clusters_mode() -> DisplayMode {
        DisplayMode {
            show_heatmap: false,
            show_clusters: true,
        }
    }

    fn render(
        manager: &mut LayerManager,
        surface: &mut HeadlessSurface,
        events: &[SeismicEvent],
        mode: DisplayMode,
        user: Option<UserLocation>,
    ) -> Vec<SelectionChange> {
        let mut changes = Vec::new();
        manager.render(surface, events, mode, user, EpochMillis::from_millis(NOW), &mut changes);
        changes
    }

    #[test]
    fn point_mode_yields_one_marker_per_event() {
        let events = scenario_events();
        let inputs = RenderInputs {
            events: &events,
            mode: points_mode(),
            user_location: None,
            zoom: 2.0,
            now: EpochMillis::from_millis(NOW),
        };
        let layers = derive_layers(&inputs, &LayerSettings::default());
        let RenderTarget::Points(points) = &layers.target else {
            panic!("expected point mode");
        };
        let bands: Vec<MagnitudeBand> = points.iter().map(|p| p.band).collect();
        assert_eq!(
            bands,
            vec![MagnitudeBand::Minor, MagnitudeBand::Moderate, MagnitudeBand::Severe]
        );
        assert!(layers.heatmap.is_none());
        assert!(layers.user.is_none());
    }

    #[test]
    fn empty_events_yield_empty_layers() {
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);
        render(&mut manager, &mut surface, &[], points_mode(), None);
        assert_eq!(surface.event_primitive_count(), 0);
        assert!(surface.violations.is_empty());
    }

    #[test]
    fn recent_events_pulse() {
        let events = vec![
            event("fresh", 4.0, NOW - 60_000, 0.0, 0.0),
            event("stale", 4.0, NOW - 7_200_000, 1.0, 1.0),
        ];
        let inputs = RenderInputs {
            events: &events,
            mode: points_mode(),
            user_location: None,
            zoom: 2.0,
            now: EpochMillis::from_millis(NOW),
        };
        let layers = derive_layers(&inputs, &LayerSettings::default());
        let RenderTarget::Points(points) = layers.target else {
            panic!("expected point mode");
        };
        assert!(points[0].pulsing && points[0].style.class_name.contains("pulse-glow"));
        assert!(!points[1].pulsing);
    }

    #[test]
    fn toggling_clusters_leaves_no_artifacts() {
        let events = scenario_events();
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);

        render(&mut manager, &mut surface, &events, points_mode(), None);
        let original = surface.points.len();
        assert_eq!(original, 3);

        render(&mut manager, &mut surface, &events, clusters_mode(), None);
        assert!(surface.points.is_empty());
        assert_eq!(surface.event_primitive_count(), 3);

        render(&mut manager, &mut surface, &events, points_mode(), None);
        assert!(surface.cluster_group.is_none());
        assert_eq!(surface.points.len(), original);
        assert!(surface.violations.is_empty(), "{:?}", surface.violations);
    }

    #[test]
    fn new_event_list_removes_before_adding() {
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut batch = OpBatch::new(2.0);
        let mut changes = Vec::new();
        let now = EpochMillis::from_millis(NOW);
        manager.render(&mut batch, &scenario_events(), points_mode(), None, now, &mut changes);
        batch.take();

        let refreshed = vec![event("d", 4.1, 4000, 10.0, 10.0)];
        manager.render(&mut batch, &refreshed, points_mode(), None, now, &mut changes);
        let ops = batch.take();
        let first_add = ops
            .iter()
            .position(|op| matches!(op, SurfaceOp::AddPoint { .. }))
            .unwrap();
        let last_remove = ops
            .iter()
            .rposition(|op| matches!(op, SurfaceOp::RemovePoint { .. }))
            .unwrap();
        assert!(last_remove < first_add);
    }

    #[test]
    fn rerender_with_same_inputs_is_a_no_op() {
        let events = scenario_events();
        let mode = DisplayMode {
            show_heatmap: true,
            show_clusters: false,
        };
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut batch = OpBatch::new(3.0);
        let mut changes = Vec::new();
        let now = EpochMillis::from_millis(NOW);
        manager.render(&mut batch, &events, mode, None, now, &mut changes);
        assert!(!batch.take().is_empty());
        manager.render(&mut batch, &events, mode, None, now, &mut changes);
        assert!(batch.is_empty());
    }

    #[test]
    fn heatmap_tracks_zoom() {
        let events = scenario_events();
        let mode = DisplayMode {
            show_heatmap: true,
            show_clusters: false,
        };
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);
        render(&mut manager, &mut surface, &events, mode, None);
        assert_eq!(surface.heatmap.as_ref().unwrap().options.radius, 18.0);

        surface.zoom = 8.0;
        manager.on_zoom_changed(&mut surface);
        let options = &surface.heatmap.as_ref().unwrap().options;
        assert_eq!(options.radius, 36.0);
        assert_eq!(options.blur, 29.0);

        surface.zoom = 15.0;
        manager.on_zoom_changed(&mut surface);
        assert_eq!(surface.heatmap.as_ref().unwrap().options.radius, 45.0);
        assert!(surface.violations.is_empty());
    }

    #[test]
    fn heat_intensity_is_clamped() {
        assert_eq!(heat_intensity(0.0), 0.1);
        assert_eq!(heat_intensity(4.0), 0.5);
        assert_eq!(heat_intensity(9.5), 1.0);
        assert_eq!(heat_intensity(f64::NAN), 0.1);
    }

    #[test]
    fn hover_enlarges_and_reverts() {
        let events = scenario_events();
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);
        render(&mut manager, &mut surface, &events, points_mode(), None);

        let id = EventId::new("b");
        manager.on_hover(&mut surface, &id, HoverPhase::Enter);
        let hovered = &surface.points[&id].style;
        assert_eq!(hovered.radius_px, 18.0);
        assert_eq!(hovered.opacity, 1.0);

        manager.on_hover(&mut surface, &id, HoverPhase::Leave);
        let resting = &surface.points[&id].style;
        assert_eq!(resting.radius_px, 12.0);
        assert_eq!(resting.opacity, 0.8);
        assert!(manager.hovered().is_none());
    }

    #[test]
    fn selection_is_exclusive() {
        let events = scenario_events();
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);
        render(&mut manager, &mut surface, &events, points_mode(), None);

        let mut changes = Vec::new();
        assert!(manager.on_click(&EventId::new("a"), &mut changes));
        assert!(manager.on_click(&EventId::new("c"), &mut changes));
        assert_eq!(manager.selected(), Some(&EventId::new("c")));
        assert_eq!(changes.len(), 3);
        assert!(matches!(&changes[0], SelectionChange::Selected { event } if event.id.as_str() == "a"));
        assert_eq!(changes[1], SelectionChange::Deselected);
        assert!(matches!(&changes[2], SelectionChange::Selected { event } if event.id.as_str() == "c"));

        // Clicking the selected event again does not deselect it.
        assert!(manager.on_click(&EventId::new("c"), &mut changes));
        assert_eq!(changes.len(), 4);
        assert!(!changes[3..].contains(&SelectionChange::Deselected));
        assert!(!manager.on_click(&EventId::new("zzz"), &mut changes));
        assert_eq!(changes.len(), 4);
    }

    #[test]
    fn cluster_members_are_selectable() {
        let events = scenario_events();
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);
        render(&mut manager, &mut surface, &events, clusters_mode(), None);

        let mut changes = Vec::new();
        assert!(manager.on_click(&EventId::new("b"), &mut changes));
        assert!(matches!(&changes[0], SelectionChange::Selected { event } if event.id.as_str() == "b"));
    }

    #[test]
    fn selection_dropped_when_event_disappears() {
        let events = scenario_events();
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);
        render(&mut manager, &mut surface, &events, points_mode(), None);
        let mut changes = Vec::new();
        manager.on_click(&EventId::new("c"), &mut changes);

        let changes = render(&mut manager, &mut surface, &events[..2], points_mode(), None);
        assert_eq!(changes, vec![SelectionChange::Deselected]);
        assert!(manager.selected().is_none());
    }

    #[test]
    fn cluster_click_zooms_in() {
        let events = vec![
            event("a", 3.0, 0, 35.0, 139.0),
            event("b", 3.0, 0, 35.01, 139.01),
        ];
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(17.5);
        render(&mut manager, &mut surface, &events, clusters_mode(), None);
        assert!(manager.on_cluster_click(&mut surface, 0));
        assert_eq!(surface.flights.last().unwrap().1, 18.0);
        assert!(!manager.on_cluster_click(&mut surface, 99));
    }

    #[test]
    fn user_location_recenters_only_once() {
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);
        let here = UserLocation {
            lat: 40.0,
            lng: -74.0,
            approximate: false,
        };
        render(&mut manager, &mut surface, &[], points_mode(), Some(here));
        assert_eq!(surface.flights.len(), 1);
        assert_eq!(surface.flights[0].1, 5.0);

        let moved = UserLocation {
            lat: 41.0,
            ..here
        };
        render(&mut manager, &mut surface, &[], points_mode(), Some(moved));
        assert_eq!(surface.flights.len(), 1);
        assert_eq!(surface.user_marker.as_ref().unwrap().position.lat, 41.0);

        render(&mut manager, &mut surface, &[], points_mode(), None);
        assert!(surface.user_marker.is_none());
        assert!(surface.violations.is_empty());
    }

    #[test]
    fn teardown_clears_surface() {
        let mut manager = LayerManager::new(LayerSettings::default());
        let mut surface = HeadlessSurface::new(2.0);
        let mode = DisplayMode {
            show_heatmap: true,
            show_clusters: true,
        };
        render(&mut manager, &mut surface, &scenario_events(), mode, None);
        let mut changes = Vec::new();
        assert!(manager.on_click(&EventId::new("a"), &mut changes));
        changes.clear();

        manager.teardown(&mut surface, &mut changes);
        assert_eq!(surface.event_primitive_count(), 0);
        assert!(surface.heatmap.is_none());
        assert!(surface.violations.is_empty());
        assert!(manager.selected().is_none());
        assert_eq!(changes, vec![SelectionChange::Deselected]);

        manager.teardown(&mut surface, &mut changes);
        assert_eq!(changes.len(), 1);
    }

    fn arb_events() -> impl Strategy<Value = Vec<SeismicEvent>> {
        prop::collection::vec(
            (0.0f64..9.5, 0i64..NOW, -80.0f64..80.0, -179.0f64..179.0),
            0..30,
        )
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, (mag, t, lat, lng))| event(&format!("ev{i}"), mag, t, lat, lng))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn derivation_is_idempotent(
            events in arb_events(),
            heat in any::<bool>(),
            clusters in any::<bool>(),
            zoom in 1.0f64..18.0,
        ) {
            let inputs = RenderInputs {
                events: &events,
                mode: DisplayMode { show_heatmap: heat, show_clusters: clusters },
                user_location: None,
                zoom,
                now: EpochMillis::from_millis(NOW),
            };
            let settings = LayerSettings::default();
            prop_assert_eq!(derive_layers(&inputs, &settings), derive_layers(&inputs, &settings));
        }

        #[test]
        fn mode_switches_never_leave_ghosts(
            events in arb_events(),
            modes in prop::collection::vec((any::<bool>(), any::<bool>()), 1..6),
        ) {
            let mut manager = LayerManager::new(LayerSettings::default());
            let mut surface = HeadlessSurface::new(3.0);
            for (heat, clusters) in modes {
                let mode = DisplayMode { show_heatmap: heat, show_clusters: clusters };
                render(&mut manager, &mut surface, &events, mode, None);
                prop_assert_eq!(surface.event_primitive_count(), events.len());
                prop_assert_eq!(surface.heatmap.is_some(), heat);
            }
            prop_assert!(surface.violations.is_empty());
        }
    }
}
