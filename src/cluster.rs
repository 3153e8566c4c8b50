// Proximity clustering in screen space.
// Points are projected to Web Mercator pixels at the current zoom and grouped greedily
// around seeds, in input order, so the same input always yields the same grouping.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::LatLng;

/// Web Mercator latitude limit.
const MAX_LATITUDE: f64 = 85.051_128_779_806_6;
const TILE_SIZE: f64 = 256.0;

/// Pixel position in the world plane at some zoom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldPixel {
    pub x: f64,
    pub y: f64,
}

pub fn project(position: LatLng, zoom: f64) -> WorldPixel {
    let size = TILE_SIZE * 2f64.powf(zoom);
    let lat = position.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let x = (position.lng + 180.0) / 360.0 * size;
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0 * size;
    WorldPixel { x, y }
}

/// Indices into the input slice that belong together.
#[derive(Debug, Clone, PartialEq)]
pub struct Grouping {
    pub center: LatLng,
    pub members: Vec<usize>,
}

/// Group positions that lie within `radius_px` of a seed at `zoom`.
pub fn group_by_proximity(positions: &[LatLng], zoom: f64, radius_px: f64) -> Vec<Grouping> {
    if positions.is_empty() {
        return Vec::new();
    }
    let radius = radius_px.max(f64::EPSILON);
    let projected: Vec<WorldPixel> = positions.iter().map(|p| project(*p, zoom)).collect();

    let cell_of = |p: &WorldPixel| ((p.x / radius).floor() as i64, (p.y / radius).floor() as i64);
    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (idx, p) in projected.iter().enumerate() {
        grid.entry(cell_of(p)).or_default().push(idx);
    }

    let mut assigned = vec![false; positions.len()];
    let mut groups = Vec::new();

    for seed in 0..positions.len() {
        if assigned[seed] {
            continue;
        }
        let origin = projected[seed];
        let (cx, cy) = cell_of(&origin);

        assigned[seed] = true;
        let mut members = vec![seed];
        for dx in -1..=1 {
            for dy in -1..=1 {
                let Some(bucket) = grid.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &idx in bucket {
                    if assigned[idx] {
                        continue;
                    }
                    let p = projected[idx];
                    let dist = ((p.x - origin.x).powi(2) + (p.y - origin.y).powi(2)).sqrt();
                    if dist <= radius {
                        members.push(idx);
                    }
                }
            }
        }
        members.sort_unstable();
        for &idx in &members {
            assigned[idx] = true;
        }

        let count = members.len() as f64;
        let (lat_sum, lng_sum) = members.iter().fold((0.0, 0.0), |(lat, lng), &idx| {
            (lat + positions[idx].lat, lng + positions[idx].lng)
        });
        groups.push(Grouping {
            center: LatLng::new(lat_sum / count, lng_sum / count),
            members,
        });
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_maps_origin_to_world_center() {
        let p = project(LatLng::new(0.0, 0.0), 0.0);
        assert!((p.x - 128.0).abs() < 1e-9);
        assert!((p.y - 128.0).abs() < 1e-9);
    }

    #[test]
    fn nearby_points_share_a_group() {
        let positions = vec![
            LatLng::new(35.0, 139.0),
            LatLng::new(35.01, 139.01),
            LatLng::new(-33.9, 18.4),
        ];
        let groups = group_by_proximity(&positions, 2.0, 50.0);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].members, vec![0, 1]);
        assert_eq!(groups[1].members, vec![2]);
    }

    #[test]
    fn zooming_in_splits_groups() {
        let positions = vec![LatLng::new(35.0, 139.0), LatLng::new(35.5, 139.5)];
        assert_eq!(group_by_proximity(&positions, 2.0, 50.0).len(), 1);
        assert_eq!(group_by_proximity(&positions, 12.0, 50.0).len(), 2);
    }

    #[test]
    fn every_point_is_grouped_once() {
        let positions: Vec<LatLng> = (0..40)
            .map(|i| LatLng::new(f64::from(i % 7) * 3.0, f64::from(i) * 2.5 - 50.0))
            .collect();
        let groups = group_by_proximity(&positions, 3.0, 50.0);
        let mut seen: Vec<usize> = groups.iter().flat_map(|g| g.members.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..40).collect::<Vec<_>>());
    }

    #[test]
    fn empty_input_yields_no_groups() {
        assert!(group_by_proximity(&[], 5.0, 50.0).is_empty());
    }
}
