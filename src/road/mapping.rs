use crate::math::{rot90, Point2d, Vector2d};
use cgmath::InnerSpace;
use serde::{Deserialize, Serialize};

/// The default lateral distance between lane centres, in m.
pub const DEFAULT_LANE_WIDTH: f64 = 3.5; // m

/// Maps positions along a road segment onto world coordinates.
///
/// The segment's centre line is a polyline; lanes are laid out across it
/// from left to right, relative to the direction of travel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoadMapping {
    /// The vertices of the centre line.
    points: Vec<Point2d>,
    /// The width of each lane in m.
    lane_width: f64,
}

impl Default for RoadMapping {
    fn default() -> Self {
        Self::straight(Point2d::new(0.0, 0.0), 0.0, 1.0)
    }
}

impl RoadMapping {
    /// Creates a mapping along a polyline. Polylines with fewer than two
    /// distinct points are extended along the x axis.
    pub fn new(mut points: Vec<Point2d>, lane_width: f64) -> Self {
        points.dedup();
        match points.len() {
            0 => points = vec![Point2d::new(0.0, 0.0), Point2d::new(1.0, 0.0)],
            1 => points.push(points[0] + Vector2d::new(1.0, 0.0)),
            _ => {}
        }
        Self { points, lane_width }
    }

    /// Creates a straight mapping of the given length.
    ///
    /// # Parameters
    /// * `start` - The start of the centre line
    /// * `heading` - The direction of travel, in radians anticlockwise from the x axis
    /// * `length` - The length in m
    pub fn straight(start: Point2d, heading: f64, length: f64) -> Self {
        let dir = Vector2d::new(heading.cos(), heading.sin());
        Self::new(vec![start, start + length.max(1.0) * dir], DEFAULT_LANE_WIDTH)
    }

    /// Sets the lane width.
    pub fn with_lane_width(mut self, lane_width: f64) -> Self {
        self.lane_width = lane_width;
        self
    }

    /// The width of each lane in m.
    pub fn lane_width(&self) -> f64 {
        self.lane_width
    }

    /// The vertices of the centre line.
    pub fn points(&self) -> &[Point2d] {
        &self.points
    }

    /// The length of the centre line in m.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| (w[1] - w[0]).magnitude())
            .sum()
    }

    /// The same centre line, travelled in the opposite direction.
    pub fn reversed(&self) -> Self {
        let mut points = self.points.clone();
        points.reverse();
        Self {
            points,
            lane_width: self.lane_width,
        }
    }

    /// The centre line shifted sideways by `lateral` metres (right is positive).
    pub fn offset(&self, lateral: f64) -> Self {
        let n = self.points.len();
        let points = (0..n)
            .map(|i| {
                let prev = self.points[i.saturating_sub(1)];
                let next = self.points[usize::min(i + 1, n - 1)];
                let dir = match (next - prev).magnitude() {
                    len if len > 0.0 => (next - prev) / len,
                    _ => Vector2d::new(1.0, 0.0),
                };
                self.points[i] - lateral * rot90(dir)
            })
            .collect();
        Self {
            points,
            lane_width: self.lane_width,
        }
    }

    /// Samples the centre line at a distance `s` along it, returning the point
    /// and unit tangent. Points beyond either end are extrapolated.
    fn sample(&self, s: f64) -> (Point2d, Vector2d) {
        let origin = self.points.first().copied().unwrap_or(Point2d::new(0.0, 0.0));
        let mut last = (origin, Vector2d::new(1.0, 0.0), 0.0);
        let mut start = 0.0;
        for w in self.points.windows(2) {
            let seg = w[1] - w[0];
            let len = seg.magnitude();
            if len <= 0.0 {
                continue;
            }
            let dir = seg / len;
            if s <= start + len {
                return (w[0] + (s - start) * dir, dir);
            }
            last = (w[0], dir, start);
            start += len;
        }
        let (point, dir, start) = last;
        (point + (s - start) * dir, dir)
    }

    /// Computes the world coordinates of a point on the segment.
    ///
    /// # Parameters
    /// * `s` - The distance along the centre line in m
    /// * `lane` - The lane index, 0 being the leftmost lane
    /// * `lanes` - The number of lanes in the segment
    /// * `lateral` - An additional offset from the lane centre (right is positive)
    pub fn world_coords(&self, s: f64, lane: usize, lanes: usize, lateral: f64) -> Point2d {
        let (point, dir) = self.sample(s);
        let offset = (lane as f64 + 0.5 - 0.5 * lanes as f64) * self.lane_width + lateral;
        point - offset * rot90(dir)
    }
}
