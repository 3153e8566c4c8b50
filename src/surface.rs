// The map surface seam. The core decides what should be drawn; the host draws it.
// Hover and click subscriptions are routed back by event id through the LayerManager.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::layers::{ClusterGroup, HeatmapLayer, HeatmapOptions, PointMarker, PointStyle, UserMarker};
use crate::types::{EventId, LatLng};

/// Imperative primitives offered by the hosting map.
pub trait MapSurface {
    fn zoom(&self) -> f64;
    fn add_point(&mut self, marker: &PointMarker);
    fn restyle_point(&mut self, id: &EventId, style: &PointStyle);
    fn remove_point(&mut self, id: &EventId);
    fn add_cluster_group(&mut self, group: &ClusterGroup);
    fn remove_cluster_group(&mut self);
    fn add_heatmap(&mut self, layer: &HeatmapLayer);
    fn set_heatmap_options(&mut self, options: &HeatmapOptions);
    fn remove_heatmap(&mut self);
    fn add_user_marker(&mut self, marker: &UserMarker);
    fn remove_user_marker(&mut self);
    fn fly_to(&mut self, target: LatLng, zoom: f64);
}

/// One surface mutation, serialized for the JS host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum SurfaceOp {
    AddPoint { marker: PointMarker },
    RestylePoint { id: EventId, style: PointStyle },
    RemovePoint { id: EventId },
    AddClusterGroup { group: ClusterGroup },
    RemoveClusterGroup,
    AddHeatmap { layer: HeatmapLayer },
    SetHeatmapOptions { options: HeatmapOptions },
    RemoveHeatmap,
    AddUserMarker { marker: UserMarker },
    RemoveUserMarker,
    FlyTo { target: LatLng, zoom: f64 },
}

/// Records mutations into a batch (one JS↔WASM crossing per render).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpBatch {
    pub zoom: f64,
    pub ops: Vec<SurfaceOp>,
}

impl OpBatch {
    pub fn new(zoom: f64) -> Self {
        OpBatch {
            zoom,
            ops: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn take(&mut self) -> Vec<SurfaceOp> {
        std::mem::take(&mut self.ops)
    }
}

impl MapSurface for OpBatch {
    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn add_point(&mut self, marker: &PointMarker) {
        self.ops.push(SurfaceOp::AddPoint {
            marker: marker.clone(),
        });
    }

    fn restyle_point(&mut self, id: &EventId, style: &PointStyle) {
        self.ops.push(SurfaceOp::RestylePoint {
            id: id.clone(),
            style: style.clone(),
        });
    }

    fn remove_point(&mut self, id: &EventId) {
        self.ops.push(SurfaceOp::RemovePoint { id: id.clone() });
    }

    fn add_cluster_group(&mut self, group: &ClusterGroup) {
        self.ops.push(SurfaceOp::AddClusterGroup {
            group: group.clone(),
        });
    }

    fn remove_cluster_group(&mut self) {
        self.ops.push(SurfaceOp::RemoveClusterGroup);
    }

    fn add_heatmap(&mut self, layer: &HeatmapLayer) {
        self.ops.push(SurfaceOp::AddHeatmap {
            layer: layer.clone(),
        });
    }

    fn set_heatmap_options(&mut self, options: &HeatmapOptions) {
        self.ops.push(SurfaceOp::SetHeatmapOptions {
            options: options.clone(),
        });
    }

    fn remove_heatmap(&mut self) {
        self.ops.push(SurfaceOp::RemoveHeatmap);
    }

    fn add_user_marker(&mut self, marker: &UserMarker) {
        self.ops.push(SurfaceOp::AddUserMarker {
            marker: marker.clone(),
        });
    }

    fn remove_user_marker(&mut self) {
        self.ops.push(SurfaceOp::RemoveUserMarker);
    }

    fn fly_to(&mut self, target: LatLng, zoom: f64) {
        self.ops.push(SurfaceOp::FlyTo { target, zoom });
    }
}

/// In-memory surface that mirrors what a real map would show.
/// Inconsistent mutations (duplicate adds, removals of absent layers, points and
/// clusters visible together) are recorded in `violations` instead of panicking.
#[derive(Debug, Clone, Default)]
pub struct HeadlessSurface {
    pub zoom: f64,
    pub points: BTreeMap<EventId, PointMarker>,
    pub cluster_group: Option<ClusterGroup>,
    pub heatmap: Option<HeatmapLayer>,
    pub user_marker: Option<UserMarker>,
    pub flights: Vec<(LatLng, f64)>,
    pub violations: Vec<String>,
}

impl HeadlessSurface {
    pub fn new(zoom: f64) -> Self {
        HeadlessSurface {
            zoom,
            ..Default::default()
        }
    }

    /// Number of discrete event primitives currently drawn, clustered or not.
    pub fn event_primitive_count(&self) -> usize {
        self.points.len()
            + self
                .cluster_group
                .as_ref()
                .map_or(0, |group| group.member_count())
    }

    /// Replay a recorded batch.
    pub fn apply(&mut self, ops: &[SurfaceOp]) {
        for op in ops {
            match op {
                SurfaceOp::AddPoint { marker } => self.add_point(marker),
                SurfaceOp::RestylePoint { id, style } => self.restyle_point(id, style),
                SurfaceOp::RemovePoint { id } => self.remove_point(id),
                SurfaceOp::AddClusterGroup { group } => self.add_cluster_group(group),
                SurfaceOp::RemoveClusterGroup => self.remove_cluster_group(),
                SurfaceOp::AddHeatmap { layer } => self.add_heatmap(layer),
                SurfaceOp::SetHeatmapOptions { options } => self.set_heatmap_options(options),
                SurfaceOp::RemoveHeatmap => self.remove_heatmap(),
                SurfaceOp::AddUserMarker { marker } => self.add_user_marker(marker),
                SurfaceOp::RemoveUserMarker => self.remove_user_marker(),
                SurfaceOp::FlyTo { target, zoom } => self.fly_to(*target, *zoom),
            }
        }
    }
}

impl MapSurface for HeadlessSurface {
    fn zoom(&self) -> f64 {
        self.zoom
    }

    fn add_point(&mut self, marker: &PointMarker) {
        if self.cluster_group.is_some() {
            self.violations
                .push(format!("point {} added while clusters are shown", marker.id));
        }
        if self.points.insert(marker.id.clone(), marker.clone()).is_some() {
            self.violations.push(format!("duplicate point {}", marker.id));
        }
    }

    fn restyle_point(&mut self, id: &EventId, style: &PointStyle) {
        match self.points.get_mut(id) {
            Some(marker) => marker.style = style.clone(),
            None => self.violations.push(format!("restyle of absent point {id}")),
        }
    }

    fn remove_point(&mut self, id: &EventId) {
        if self.points.remove(id).is_none() {
            self.violations.push(format!("removal of absent point {id}"));
        }
    }

    fn add_cluster_group(&mut self, group: &ClusterGroup) {
        if !self.points.is_empty() {
            self.violations
                .push("cluster group added while points are shown".to_string());
        }
        if self.cluster_group.replace(group.clone()).is_some() {
            self.violations.push("duplicate cluster group".to_string());
        }
    }

    fn remove_cluster_group(&mut self) {
        if self.cluster_group.take().is_none() {
            self.violations
                .push("removal of absent cluster group".to_string());
        }
    }

    fn add_heatmap(&mut self, layer: &HeatmapLayer) {
        if self.heatmap.replace(layer.clone()).is_some() {
            self.violations.push("duplicate heatmap".to_string());
        }
    }

    fn set_heatmap_options(&mut self, options: &HeatmapOptions) {
        match self.heatmap.as_mut() {
            Some(layer) => layer.options = options.clone(),
            None => self
                .violations
                .push("options set on absent heatmap".to_string()),
        }
    }

    fn remove_heatmap(&mut self) {
        if self.heatmap.take().is_none() {
            self.violations.push("removal of absent heatmap".to_string());
        }
    }

    fn add_user_marker(&mut self, marker: &UserMarker) {
        if self.user_marker.replace(marker.clone()).is_some() {
            self.violations.push("duplicate user marker".to_string());
        }
    }

    fn remove_user_marker(&mut self) {
        if self.user_marker.take().is_none() {
            self.violations
                .push("removal of absent user marker".to_string());
        }
    }

    fn fly_to(&mut self, target: LatLng, zoom: f64) {
        self.zoom = zoom;
        self.flights.push((target, zoom));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_records_in_order() {
        let mut batch = OpBatch::new(4.0);
        batch.remove_heatmap();
        batch.fly_to(LatLng::new(1.0, 2.0), 5.0);
        assert_eq!(batch.zoom(), 4.0);
        assert_eq!(batch.ops.len(), 2);
        assert_eq!(batch.ops[0], SurfaceOp::RemoveHeatmap);
        assert!(batch.take().len() == 2 && batch.is_empty());
    }

    #[test]
    fn ops_serialize_with_tag() {
        let json = serde_json::to_string(&SurfaceOp::RemoveClusterGroup).unwrap();
        assert_eq!(json, r#"{"op":"RemoveClusterGroup"}"#);
    }

    #[test]
    fn headless_flags_inconsistent_mutations() {
        let mut surface = HeadlessSurface::new(2.0);
        surface.remove_heatmap();
        surface.remove_point(&EventId::new("ghost"));
        assert_eq!(surface.violations.len(), 2);
    }
}
