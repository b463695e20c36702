//! World geometry and the spatial query seam.
//!
//! The simulation never inspects level geometry directly. Line-of-sight queries
//! and obstacle overlap tests go through [`SpatialQuery`], so a host can plug in
//! whatever collision backend it already has. [`StaticGeometry`] is the built-in
//! implementation: a flat list of axis-aligned boxes, which is all the default
//! map needs.

use shared::Vec3;

/// Axis-aligned box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: Vec3::new(min.x.min(max.x), min.y.min(max.y), min.z.min(max.z)),
            max: Vec3::new(min.x.max(max.x), min.y.max(max.y), min.z.max(max.z)),
        }
    }

    /// Builds a box from its center and half extents.
    pub fn from_center(center: Vec3, half: Vec3) -> Self {
        Self::new(center - half, center + half)
    }

    /// Full-height box spanning the playable floor band.
    pub fn floor_rect(min_x: f32, min_z: f32, max_x: f32, max_z: f32) -> Self {
        Self::new(Vec3::new(min_x, -1.0, min_z), Vec3::new(max_x, 3.0, max_z))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
            && point.z >= self.min.z
            && point.z <= self.max.z
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        let closest = Vec3::new(
            center.x.clamp(self.min.x, self.max.x),
            center.y.clamp(self.min.y, self.max.y),
            center.z.clamp(self.min.z, self.max.z),
        );
        closest.distance(center) <= radius
    }

    /// Slab test for the segment `from -> to`.
    pub fn intersects_segment(&self, from: Vec3, to: Vec3) -> bool {
        let dir = to - from;
        let mut t_min = 0.0_f32;
        let mut t_max = 1.0_f32;

        for (origin, delta, lo, hi) in [
            (from.x, dir.x, self.min.x, self.max.x),
            (from.y, dir.y, self.min.y, self.max.y),
            (from.z, dir.z, self.min.z, self.max.z),
        ] {
            if delta.abs() < 1e-6 {
                if origin < lo || origin > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / delta;
            let mut t1 = (lo - origin) * inv;
            let mut t2 = (hi - origin) * inv;
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
            }
            t_min = t_min.max(t1);
            t_max = t_max.min(t2);
            if t_min > t_max {
                return false;
            }
        }
        true
    }

    /// Pushes a body of the given radius out of this box along the axis of
    /// shallowest penetration on the ground plane. Returns the corrected
    /// position, or `None` when the body does not overlap the box.
    pub fn push_out(&self, position: Vec3, radius: f32) -> Option<Vec3> {
        let left = position.x - radius;
        let right = position.x + radius;
        let back = position.z - radius;
        let front = position.z + radius;

        let overlapping = !(right <= self.min.x
            || left >= self.max.x
            || front <= self.min.z
            || back >= self.max.z);
        if !overlapping {
            return None;
        }

        let overlap_x = (right.min(self.max.x) - left.max(self.min.x)).abs();
        let overlap_z = (front.min(self.max.z) - back.max(self.min.z)).abs();
        let center = self.center();
        let mut corrected = position;

        if overlap_x < overlap_z {
            corrected.x = if position.x < center.x {
                self.min.x - radius
            } else {
                self.max.x + radius
            };
        } else {
            corrected.z = if position.z < center.z {
                self.min.z - radius
            } else {
                self.max.z + radius
            };
        }
        Some(corrected)
    }
}

/// Spatial queries the simulation needs from the world.
pub trait SpatialQuery: Send + Sync {
    /// True when static geometry blocks sight between the two points.
    fn ray_blocked(&self, from: Vec3, to: Vec3) -> bool;

    /// True when a sphere at `point` overlaps static geometry.
    fn overlaps_obstacle(&self, point: Vec3, radius: f32) -> bool;
}

/// Box-list geometry.
#[derive(Debug, Clone, Default)]
pub struct StaticGeometry {
    obstacles: Vec<Aabb>,
}

impl StaticGeometry {
    pub fn new(obstacles: Vec<Aabb>) -> Self {
        Self { obstacles }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn obstacles(&self) -> &[Aabb] {
        &self.obstacles
    }
}

impl SpatialQuery for StaticGeometry {
    fn ray_blocked(&self, from: Vec3, to: Vec3) -> bool {
        self.obstacles
            .iter()
            .any(|obstacle| obstacle.intersects_segment(from, to))
    }

    fn overlaps_obstacle(&self, point: Vec3, radius: f32) -> bool {
        self.obstacles
            .iter()
            .any(|obstacle| obstacle.intersects_sphere(point, radius))
    }
}
