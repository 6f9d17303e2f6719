//! Static obstacle capability consumed by the steering engine.
//!
//! The core never performs collision queries itself; hosts provide an [`ObstacleQuery`]
//! that yields the fences and boundaries near a point.

use glam::{Vec2, Vec3};

use crate::{direction_of, flatten};

/// Tag attached to an obstacle by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObstacleKind {
    Fence,
    Boundary,
    /// Anything else; ignored by fence avoidance.
    Other,
}

impl ObstacleKind {
    /// Whether agents steer away from this obstacle.
    #[must_use]
    pub const fn is_avoided(self) -> bool {
        matches!(self, Self::Fence | Self::Boundary)
    }
}

/// A static obstacle that can report its closest point to a query position.
pub trait Obstacle: Send + Sync {
    fn kind(&self) -> ObstacleKind;

    /// Closest point on the obstacle to `point`.
    fn closest_point(&self, point: Vec3) -> Vec3;

    /// Ground-plane unit direction leading away from the obstacle at `point`, paired with
    /// the signed distance avoidance falls off from. A negative distance means `point`
    /// has crossed to the forbidden side. `None` when no side is defined.
    fn clearance(&self, point: Vec3) -> Option<(Vec3, f32)> {
        let away = flatten(point - self.closest_point(point));
        direction_of(away).map(|dir| (dir, away.length()))
    }
}

/// Spatial query returning obstacles near a point.
pub trait ObstacleQuery: Send + Sync {
    /// Visit every obstacle that may lie within `radius` of `point`.
    fn visit_near(&self, point: Vec3, radius: f32, visitor: &mut dyn FnMut(&dyn Obstacle));
}

/// Query that never reports an obstacle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObstacles;

impl ObstacleQuery for NoObstacles {
    fn visit_near(&self, _point: Vec3, _radius: f32, _visitor: &mut dyn FnMut(&dyn Obstacle)) {}
}

/// Straight fence between two ground-plane points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FenceSegment {
    pub start: Vec3,
    pub end: Vec3,
}

impl FenceSegment {
    #[must_use]
    pub const fn new(start: Vec3, end: Vec3) -> Self {
        Self { start, end }
    }
}

impl Obstacle for FenceSegment {
    fn kind(&self) -> ObstacleKind {
        ObstacleKind::Fence
    }

    fn closest_point(&self, point: Vec3) -> Vec3 {
        let segment = self.end - self.start;
        let len_sq = segment.length_squared();
        if len_sq <= f32::EPSILON {
            return self.start;
        }
        let t = ((point - self.start).dot(segment) / len_sq).clamp(0.0, 1.0);
        self.start + segment * t
    }
}

/// Rectangular pen whose perimeter bounds the flock on the ground plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PenBoundary {
    /// Minimum `(x, z)` corner.
    pub min: Vec2,
    /// Maximum `(x, z)` corner.
    pub max: Vec2,
}

impl PenBoundary {
    #[must_use]
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Square pen of the given half extent centred on the origin.
    #[must_use]
    pub fn centred(half_extent: f32) -> Self {
        let half = half_extent.abs();
        Self::new(Vec2::splat(-half), Vec2::splat(half))
    }

    #[must_use]
    pub fn contains(&self, point: Vec3) -> bool {
        (self.min.x..=self.max.x).contains(&point.x) && (self.min.y..=self.max.y).contains(&point.z)
    }
}

impl Obstacle for PenBoundary {
    fn kind(&self) -> ObstacleKind {
        ObstacleKind::Boundary
    }

    fn closest_point(&self, point: Vec3) -> Vec3 {
        let clamped = Vec2::new(point.x, point.z).clamp(self.min, self.max);
        if !self.contains(point) {
            return Vec3::new(clamped.x, point.y, clamped.y);
        }
        // Inside: project onto the nearest wall.
        let to_min_x = point.x - self.min.x;
        let to_max_x = self.max.x - point.x;
        let to_min_z = point.z - self.min.y;
        let to_max_z = self.max.y - point.z;
        let nearest = to_min_x.min(to_max_x).min(to_min_z).min(to_max_z);
        if nearest == to_min_x {
            Vec3::new(self.min.x, point.y, point.z)
        } else if nearest == to_max_x {
            Vec3::new(self.max.x, point.y, point.z)
        } else if nearest == to_min_z {
            Vec3::new(point.x, point.y, self.min.y)
        } else {
            Vec3::new(point.x, point.y, self.max.y)
        }
    }

    /// Always points into the pen; outside, the distance is the negated penetration depth.
    fn clearance(&self, point: Vec3) -> Option<(Vec3, f32)> {
        if !self.contains(point) {
            let depth = flatten(self.closest_point(point) - point);
            return direction_of(depth).map(|inward| (inward, -depth.length()));
        }
        [
            (point.x - self.min.x, Vec3::X),
            (self.max.x - point.x, Vec3::NEG_X),
            (point.z - self.min.y, Vec3::Z),
            (self.max.y - point.z, Vec3::NEG_Z),
        ]
        .into_iter()
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(distance, inward)| (inward, distance))
    }
}

/// List-backed obstacle query that tests every obstacle against the radius.
#[derive(Default)]
pub struct StaticObstacles {
    obstacles: Vec<Box<dyn Obstacle>>,
}

impl std::fmt::Debug for StaticObstacles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticObstacles")
            .field("obstacle_count", &self.obstacles.len())
            .finish()
    }
}

impl StaticObstacles {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an obstacle, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, obstacle: impl Obstacle + 'static) -> Self {
        self.push(obstacle);
        self
    }

    pub fn push(&mut self, obstacle: impl Obstacle + 'static) {
        self.obstacles.push(Box::new(obstacle));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }
}

impl ObstacleQuery for StaticObstacles {
    fn visit_near(&self, point: Vec3, radius: f32, visitor: &mut dyn FnMut(&dyn Obstacle)) {
        for obstacle in &self.obstacles {
            let distance = obstacle.clearance(point).map_or(0.0, |(_, d)| d);
            if distance <= radius {
                visitor(obstacle.as_ref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_closest_point_clamps_to_segment() {
        let fence = FenceSegment::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(fence.closest_point(Vec3::new(4.0, 0.0, 3.0)), Vec3::new(4.0, 0.0, 0.0));
        assert_eq!(fence.closest_point(Vec3::new(-5.0, 0.0, 1.0)), Vec3::ZERO);
        assert_eq!(
            fence.closest_point(Vec3::new(15.0, 0.0, -1.0)),
            Vec3::new(10.0, 0.0, 0.0)
        );
    }

    #[test]
    fn degenerate_fence_collapses_to_a_post() {
        let post = FenceSegment::new(Vec3::ONE, Vec3::ONE);
        assert_eq!(post.closest_point(Vec3::new(5.0, 1.0, 5.0)), Vec3::ONE);
    }

    #[test]
    fn pen_projects_inside_points_onto_nearest_wall() {
        let pen = PenBoundary::centred(10.0);
        assert_eq!(
            pen.closest_point(Vec3::new(8.0, 0.0, 1.0)),
            Vec3::new(10.0, 0.0, 1.0)
        );
        assert_eq!(
            pen.closest_point(Vec3::new(0.0, 0.0, -9.5)),
            Vec3::new(0.0, 0.0, -10.0)
        );
        assert_eq!(
            pen.closest_point(Vec3::new(14.0, 0.0, 2.0)),
            Vec3::new(10.0, 0.0, 2.0)
        );
    }

    #[test]
    fn pen_clearance_points_inward_on_both_sides_of_the_wall() {
        let pen = PenBoundary::centred(10.0);
        let (inward, distance) = pen.clearance(Vec3::new(8.0, 0.0, 1.0)).expect("inside");
        assert_eq!(inward, Vec3::NEG_X);
        assert_eq!(distance, 2.0);

        let (inward, distance) = pen.clearance(Vec3::new(10.0, 0.0, 0.0)).expect("on wall");
        assert_eq!(inward, Vec3::NEG_X);
        assert_eq!(distance, 0.0);

        let (inward, distance) = pen.clearance(Vec3::new(14.0, 0.0, 2.0)).expect("outside");
        assert_eq!(inward, Vec3::NEG_X);
        assert_eq!(distance, -4.0);

        let (inward, distance) = pen.clearance(Vec3::new(13.0, 0.0, -14.0)).expect("corner");
        assert!((inward - Vec3::new(-3.0, 0.0, 4.0) / 5.0).length() < 1e-6);
        assert!((distance + 5.0).abs() < 1e-6);
    }

    #[test]
    fn escaped_agents_still_see_the_pen() {
        let obstacles = StaticObstacles::new().with(PenBoundary::centred(5.0));
        let mut seen = 0;
        obstacles.visit_near(Vec3::new(70.0, 0.0, 0.0), 2.0, &mut |obstacle| {
            assert_eq!(obstacle.kind(), ObstacleKind::Boundary);
            seen += 1;
        });
        assert_eq!(seen, 1);
    }

    #[test]
    fn fence_clearance_points_away_from_the_segment() {
        let fence = FenceSegment::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 0.0, 0.0));
        let (away, distance) = fence.clearance(Vec3::new(4.0, 0.0, -3.0)).expect("clear");
        assert_eq!(away, Vec3::NEG_Z);
        assert_eq!(distance, 3.0);
        assert!(fence.clearance(Vec3::new(4.0, 0.0, 0.0)).is_none());
    }

    #[test]
    fn static_query_filters_by_radius() {
        let obstacles = StaticObstacles::new()
            .with(FenceSegment::new(Vec3::new(-5.0, 0.0, 1.0), Vec3::new(5.0, 0.0, 1.0)))
            .with(FenceSegment::new(Vec3::new(-5.0, 0.0, 9.0), Vec3::new(5.0, 0.0, 9.0)));
        assert_eq!(obstacles.len(), 2);
        let mut seen = 0;
        obstacles.visit_near(Vec3::ZERO, 2.0, &mut |obstacle| {
            assert_eq!(obstacle.kind(), ObstacleKind::Fence);
            seen += 1;
        });
        assert_eq!(seen, 1);
    }
}
