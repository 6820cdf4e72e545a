//! `polygon(...)` clip regions.
//!
//! Coordinates keep their units until a panel box is known; percentages
//! are resolved against the box at the moment of use. Bare numbers are
//! read as percentages because the panel masks are authored in a 0-100
//! view box.

use crate::error::{LayoutError, LayoutResult};
use crate::geometry::{Point, Rect, Size};

/// Default tolerance, in percent of the box side, for treating a polygon as
/// the plain panel rectangle.
pub const RECT_TOLERANCE_PERCENT: f64 = 0.5;

/// One polygon coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    /// Percentage of the box side.
    Percent(f64),
    /// Absolute CSS pixels.
    Px(f64),
}

impl Length {
    /// Parse `12%`, `12px` or a bare `12` (percent).
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        let token = token.trim();
        let (number, make): (&str, fn(f64) -> Self) = if let Some(n) = token.strip_suffix('%') {
            (n, Self::Percent)
        } else if let Some(n) = token.strip_suffix("px") {
            (n, Self::Px)
        } else {
            (token, Self::Percent)
        };
        let value: f64 = number.trim().parse().ok()?;
        value.is_finite().then(|| make(value))
    }

    /// Resolve against a box side of `extent` pixels.
    #[must_use]
    pub fn resolve(self, extent: f64) -> f64 {
        match self {
            Self::Percent(p) => extent * p / 100.0,
            Self::Px(px) => px,
        }
    }
}

/// A polygon vertex.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipPoint {
    /// Horizontal coordinate.
    pub x: Length,
    /// Vertical coordinate.
    pub y: Length,
}

/// A panel's true boundary as an ordered polygon.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRegion {
    points: Vec<ClipPoint>,
}

impl ClipRegion {
    /// Build from vertices.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ClipPath`] for fewer than three vertices.
    pub fn new(points: Vec<ClipPoint>) -> LayoutResult<Self> {
        if points.len() < 3 {
            return Err(LayoutError::ClipPath(format!(
                "polygon needs at least 3 points, got {}",
                points.len()
            )));
        }
        Ok(Self { points })
    }

    /// Parse a `clip-path` value.
    ///
    /// Returns `Ok(None)` for `none`. An optional leading fill rule
    /// (`nonzero,` / `evenodd,`) is accepted and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError::ClipPath`] for anything other than a
    /// well-formed `polygon(...)`.
    pub fn parse(value: &str) -> LayoutResult<Option<Self>> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("none") || trimmed.is_empty() {
            return Ok(None);
        }
        let invalid = || LayoutError::ClipPath(trimmed.to_string());
        let lower = trimmed.to_ascii_lowercase();
        let body = lower
            .strip_prefix("polygon")
            .map(str::trim_start)
            .and_then(|b| b.strip_prefix('('))
            .and_then(|b| b.trim_end().strip_suffix(')'))
            .ok_or_else(invalid)?;

        let mut points = Vec::new();
        for (i, pair) in body.split(',').enumerate() {
            let pair = pair.trim();
            if i == 0 && (pair == "nonzero" || pair == "evenodd") {
                continue;
            }
            let mut coords = pair.split_whitespace();
            let (Some(x), Some(y), None) = (coords.next(), coords.next(), coords.next()) else {
                return Err(invalid());
            };
            points.push(ClipPoint {
                x: Length::parse(x).ok_or_else(invalid)?,
                y: Length::parse(y).ok_or_else(invalid)?,
            });
        }
        Self::new(points).map(Some)
    }

    /// Vertices as declared.
    #[must_use]
    pub fn points(&self) -> &[ClipPoint] {
        &self.points
    }

    /// Absolute vertices for a panel occupying `frame`.
    #[must_use]
    pub fn resolve(&self, frame: Rect) -> Vec<Point> {
        self.points
            .iter()
            .map(|p| Point::new(frame.x + p.x.resolve(frame.width), frame.y + p.y.resolve(frame.height)))
            .collect()
    }

    /// True when the polygon is the box itself within `tolerance_percent`.
    ///
    /// Every vertex must sit on a box edge and the polygon must cover the
    /// box, so a vertex that cuts a corner off (for example `100% 97%`)
    /// makes the region non-rectangular.
    #[must_use]
    pub fn is_rectangular(&self, size: Size, tolerance_percent: f64) -> bool {
        if size.is_empty() {
            return true;
        }
        let pts = self.resolve(Rect::from_size(size));
        let tol_x = size.width * tolerance_percent / 100.0;
        let tol_y = size.height * tolerance_percent / 100.0;
        let on_edge = pts.iter().all(|p| {
            p.x.abs() <= tol_x
                || (p.x - size.width).abs() <= tol_x
                || p.y.abs() <= tol_y
                || (p.y - size.height).abs() <= tol_y
        });
        if !on_edge {
            return false;
        }
        let coverage = polygon_area(&pts) / (size.width * size.height);
        coverage >= 1.0 - 2.0 * tolerance_percent / 100.0
    }
}

/// Absolute area of a simple polygon (shoelace).
#[must_use]
pub fn polygon_area(points: &[Point]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        twice += a.x * b.y - b.x * a.y;
    }
    (twice / 2.0).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(s: &str) -> ClipRegion {
        ClipRegion::parse(s).expect("parse").expect("some")
    }

    #[test]
    fn test_parse_units() {
        let r = region("polygon(0% 0%, 100px 0, 94% 100%)");
        assert_eq!(r.points()[1].x, Length::Px(100.0));
        assert_eq!(r.points()[1].y, Length::Percent(0.0));
        assert_eq!(r.points()[2].x, Length::Percent(94.0));
    }

    #[test]
    fn test_unitless_reads_as_percent() {
        let r = region("polygon(0 0, 100 0, 94 100, 0 100)");
        let pts = r.resolve(Rect::new(0.0, 0.0, 200.0, 50.0));
        assert!((pts[2].x - 188.0).abs() < 1e-9);
        assert!((pts[2].y - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_percent_resolved_late() {
        let r = region("polygon(0% 0%, 100% 0%, 100% 97%, 0% 100%)");
        let small = r.resolve(Rect::new(10.0, 10.0, 100.0, 100.0));
        let large = r.resolve(Rect::new(0.0, 0.0, 1000.0, 1000.0));
        assert!((small[2].y - 107.0).abs() < 1e-9);
        assert!((large[2].y - 970.0).abs() < 1e-9);
    }

    #[test]
    fn test_none_and_invalid() {
        assert!(ClipRegion::parse("none").expect("none").is_none());
        assert!(ClipRegion::parse("circle(50%)").is_err());
        assert!(ClipRegion::parse("polygon(0 0, 1 1)").is_err());
        assert!(ClipRegion::parse("polygon(0 0 0, 1 1, 2 2)").is_err());
        assert!(ClipRegion::parse("polygon(evenodd, 0 0, 100% 0, 0 100%)").is_ok());
    }

    #[test]
    fn test_rectangular_classification() {
        let size = Size::new(400.0, 300.0);
        assert!(region("polygon(0 0, 100% 0, 100% 100%, 0 100%)").is_rectangular(size, RECT_TOLERANCE_PERCENT));
        assert!(region("polygon(0.2% 0, 100% 0, 100% 99.8%, 0 100%)").is_rectangular(size, RECT_TOLERANCE_PERCENT));
        assert!(!region("polygon(0 0, 100 0, 100 97, 0 100)").is_rectangular(size, RECT_TOLERANCE_PERCENT));
        assert!(!region("polygon(6% 0%, 100% 0%, 100% 100%, 0% 100%)").is_rectangular(size, RECT_TOLERANCE_PERCENT));
        assert!(!region("polygon(50% 0, 100% 50%, 50% 100%, 0 50%)").is_rectangular(size, RECT_TOLERANCE_PERCENT));
    }

    #[test]
    fn test_polygon_area() {
        let square = [
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!((polygon_area(&square) - 100.0).abs() < 1e-9);
    }
}
