//! Detection Zones
//!
//! A zone is a quadrilateral given as four points in top-left, top-right,
//! bottom-right, bottom-left order. A point crosses the zone when it lies
//! strictly inside the horizontal span between the first and third corners
//! and strictly within `tolerance` pixels of the crossing line, which runs at
//! the height of the first corner.

/// Pixel position in frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// One quadrilateral detection zone.
#[derive(Debug, Clone, PartialEq)]
pub struct Zone {
    points: [Point; 4],
}

impl Zone {
    pub fn new(points: [Point; 4]) -> Self {
        Self { points }
    }

    /// Builds a zone from `[[x, y]; 4]` as stored in the config file.
    pub fn from_coords(coords: &[[i32; 2]; 4]) -> Self {
        Self::new(coords.map(|[x, y]| Point::new(x, y)))
    }

    /// Height of the nominal crossing line.
    pub fn line_y(&self) -> i32 {
        self.points[0].y
    }

    /// Open horizontal span `(left, right)`.
    pub fn span(&self) -> (i32, i32) {
        (self.points[0].x, self.points[2].x)
    }

    /// Whether `p` is on the crossing line within `tolerance` pixels.
    pub fn is_crossed_by(&self, p: Point, tolerance: f32) -> bool {
        let (left, right) = self.span();
        let dy = (p.y - self.line_y()).abs() as f32;
        dy < tolerance && left < p.x && p.x < right
    }
}

/// Every configured zone plus the shared vertical tolerance.
#[derive(Debug, Clone)]
pub struct ZoneSet {
    zones: Vec<Zone>,
    tolerance: f32,
}

impl ZoneSet {
    pub fn new(zones: Vec<Zone>, tolerance: f32) -> Self {
        Self {
            zones,
            tolerance: tolerance.max(0.0),
        }
    }

    pub fn from_conf(conf: &crate::module::util::conf::Extract) -> Self {
        Self::new(
            conf.zones.iter().map(Zone::from_coords).collect(),
            conf.tolerance,
        )
    }

    /// A point crossing any zone satisfies the predicate.
    pub fn is_crossed_by(&self, p: Point) -> bool {
        self.zones.iter().any(|z| z.is_crossed_by(p, self.tolerance))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone() -> Zone {
        Zone::from_coords(&[[13, 322], [221, 231], [853, 566], [932, 278]])
    }

    #[test]
    fn inside_band_and_span_crosses() {
        let z = zone();
        assert!(z.is_crossed_by(Point::new(400, 322), 10.0));
        assert!(z.is_crossed_by(Point::new(400, 313), 10.0));
        assert!(z.is_crossed_by(Point::new(400, 331), 10.0));
        assert!(z.is_crossed_by(Point::new(14, 322), 10.0));
        assert!(z.is_crossed_by(Point::new(852, 322), 10.0));
    }

    #[test]
    fn boundary_is_exclusive() {
        let z = zone();
        // exactly `tolerance` away from the line
        assert!(!z.is_crossed_by(Point::new(400, 332), 10.0));
        assert!(!z.is_crossed_by(Point::new(400, 312), 10.0));
        // exactly on the span edges
        assert!(!z.is_crossed_by(Point::new(13, 322), 10.0));
        assert!(!z.is_crossed_by(Point::new(853, 322), 10.0));
        // outside the span
        assert!(!z.is_crossed_by(Point::new(5, 322), 10.0));
        assert!(!z.is_crossed_by(Point::new(900, 322), 10.0));
    }

    #[test]
    fn zero_tolerance_never_crosses() {
        let z = zone();
        assert!(!z.is_crossed_by(Point::new(400, 322), 0.0));
    }

    #[test]
    fn any_zone_satisfies_the_set() {
        let set = ZoneSet::new(
            vec![
                zone(),
                Zone::from_coords(&[[0, 100], [50, 100], [200, 150], [0, 150]]),
            ],
            5.0,
        );
        assert!(set.is_crossed_by(Point::new(100, 102)));
        assert!(set.is_crossed_by(Point::new(500, 320)));
        assert!(!set.is_crossed_by(Point::new(100, 200)));
    }

    #[test]
    fn negative_tolerance_is_clamped() {
        let set = ZoneSet::new(vec![zone()], -3.0);
        assert!(!set.is_crossed_by(Point::new(400, 322)));
    }
}
