//! The drawing surface that shapes draw into.
//!
//! This is the boundary to the vector-drawing backend: shapes trace
//! skeleton paths through a pen, request stroking with a circular nib,
//! and place anchor points. The geometry is kept as [`kurbo::BezPath`]s
//! so that downstream tooling can realize it into font contours.

use font_types::Pen;
use kurbo::{flatten, Affine, BezPath, Cap, Join, PathEl, Point, Rect, Shape as _, Stroke};

const STROKE_TOLERANCE: f64 = 0.25;
const FLATTEN_TOLERANCE: f64 = 0.1;

/// The attachment type of an anchor point.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AnchorKind {
    Mark,
    Base,
    Basemark,
    Entry,
    Exit,
    Ligature,
}

/// A named, typed point on a glyph.
#[derive(Clone, Debug, PartialEq)]
pub struct AnchorPoint {
    pub name: String,
    pub kind: AnchorKind,
    pub x: f64,
    pub y: f64,
}

impl AnchorPoint {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A glyph under construction.
///
/// Mirrors the subset of a font editor's glyph interface that shapes
/// need: a pen, stroking, anchor points, affine transforms, and
/// bounding-box queries.
#[derive(Clone, Debug, Default)]
pub struct GlyphBuilder {
    /// Finished, stroked contours.
    outline: BezPath,
    /// Skeleton subpaths traced since the last stroke call.
    skeleton: Vec<BezPath>,
    current: BezPath,
    pub anchor_points: Vec<AnchorPoint>,
}

impl GlyphBuilder {
    pub fn new() -> GlyphBuilder {
        GlyphBuilder::default()
    }

    pub fn move_to(&mut self, p: Point) {
        self.flush_current();
        self.current.move_to(p);
    }

    pub fn line_to(&mut self, p: Point) {
        self.current.line_to(p);
    }

    pub fn curve_to(&mut self, p1: Point, p2: Point, p3: Point) {
        self.current.curve_to(p1, p2, p3);
    }

    pub fn end_path(&mut self) {
        self.flush_current();
    }

    fn flush_current(&mut self) {
        if !self.current.elements().is_empty() {
            self.skeleton.push(std::mem::take(&mut self.current));
        }
    }

    pub fn add_anchor_point(&mut self, name: impl Into<String>, kind: AnchorKind, x: f64, y: f64) {
        self.anchor_points.push(AnchorPoint {
            name: name.into(),
            kind,
            x,
            y,
        });
    }

    /// Replaces all anchor points with the given name and kind with a
    /// single new one.
    pub fn replace_anchor(&mut self, name: &str, kind: AnchorKind, x: f64, y: f64) {
        self.anchor_points
            .retain(|a| !(a.name == name && a.kind == kind));
        self.add_anchor_point(name, kind, x, y);
    }

    /// Returns the single anchor point with the given name and kind, if
    /// there is exactly one.
    pub fn anchor(&self, name: &str, kind: AnchorKind) -> Option<Point> {
        let mut found = None;
        for a in &self.anchor_points {
            if a.name == name && a.kind == kind {
                if found.is_some() {
                    return None;
                }
                found = Some(a.point());
            }
        }
        found
    }

    /// Strokes the pending skeleton with a circular nib of diameter
    /// `width` and adds the result to the outline.
    ///
    /// A degenerate subpath (a single point) becomes a full dot.
    pub fn stroke(&mut self, width: f64) {
        self.flush_current();
        let style = Stroke::new(width).with_caps(Cap::Round).with_join(Join::Round);
        for path in self.skeleton.drain(..) {
            if path_is_degenerate(&path) {
                if let Some(PathEl::MoveTo(p)) = path.elements().first() {
                    let dot = kurbo::Circle::new(*p, width / 2.0).to_path(STROKE_TOLERANCE);
                    self.outline.extend(dot);
                }
            } else {
                let stroked = kurbo::stroke(path, &style, &Default::default(), STROKE_TOLERANCE);
                self.outline.extend(stroked);
            }
        }
    }

    /// Applies an affine transform to contours, pending skeleton, and
    /// anchor points.
    pub fn transform(&mut self, affine: Affine) {
        self.outline = affine * &self.outline;
        for path in &mut self.skeleton {
            *path = affine * &*path;
        }
        self.current = affine * &self.current;
        for anchor in &mut self.anchor_points {
            let p = affine * Point::new(anchor.x, anchor.y);
            anchor.x = p.x;
            anchor.y = p.y;
        }
    }

    /// The backend may remove overlapping contours here; the kurbo
    /// surface keeps them, which does not affect metrics.
    pub fn remove_overlap(&mut self) {}

    pub fn is_empty(&self) -> bool {
        self.outline.elements().is_empty()
            && self.skeleton.is_empty()
            && self.current.elements().is_empty()
    }

    pub fn outline(&self) -> &BezPath {
        &self.outline
    }

    /// Appends another builder's contours and anchor points.
    pub fn merge(&mut self, other: GlyphBuilder) {
        self.outline.extend(other.outline);
        self.skeleton.extend(other.skeleton);
        self.anchor_points.extend(other.anchor_points);
    }

    /// The exact bounding box of the stroked contours.
    pub fn bounding_box(&self) -> Option<Rect> {
        if self.outline.elements().is_empty() {
            return None;
        }
        Some(self.outline.bounding_box())
    }

    /// The horizontal extent of the contours within the band
    /// `y_min..=y_max`, or `None` if no contour enters the band.
    pub fn x_bounds_at_y(&self, y_min: f64, y_max: f64) -> Option<(f64, f64)> {
        let mut bounds: Option<(f64, f64)> = None;
        let mut start = Point::ZERO;
        let mut last = Point::ZERO;
        let mut include = |x: f64| {
            bounds = Some(match bounds {
                None => (x, x),
                Some((lo, hi)) => (lo.min(x), hi.max(x)),
            });
        };
        flatten(&self.outline, FLATTEN_TOLERANCE, |el| match el {
            PathEl::MoveTo(p) => {
                start = p;
                last = p;
            }
            PathEl::LineTo(p) => {
                for x in segment_xs_in_band(last, p, y_min, y_max) {
                    include(x);
                }
                last = p;
            }
            PathEl::ClosePath => {
                for x in segment_xs_in_band(last, start, y_min, y_max) {
                    include(x);
                }
                last = start;
            }
            // flatten only emits moves, lines, and closes
            _ => unreachable!(),
        });
        bounds
    }
}

fn path_is_degenerate(path: &BezPath) -> bool {
    let mut point: Option<Point> = None;
    for el in path.elements() {
        let end = match el {
            PathEl::MoveTo(p) | PathEl::LineTo(p) => *p,
            PathEl::QuadTo(p1, p2) => {
                if Some(*p1) != point {
                    return false;
                }
                *p2
            }
            PathEl::CurveTo(p1, p2, p3) => {
                if Some(*p1) != point || Some(*p2) != point {
                    return false;
                }
                *p3
            }
            PathEl::ClosePath => continue,
        };
        if let Some(p) = point {
            if p != end {
                return false;
            }
        }
        point = Some(end);
    }
    true
}

/// The x coordinates where the clipped portion of a line segment enters
/// and leaves the band `y_min..=y_max`.
fn segment_xs_in_band(a: Point, b: Point, y_min: f64, y_max: f64) -> Vec<f64> {
    let mut xs = Vec::new();
    let (lo, hi) = (y_min.min(y_max), y_min.max(y_max));
    let mut push_if_in_band = |p: Point| {
        if p.y >= lo && p.y <= hi {
            xs.push(p.x);
        }
    };
    push_if_in_band(a);
    push_if_in_band(b);
    if (a.y - b.y).abs() > f64::EPSILON {
        for y in [lo, hi] {
            let t = (y - a.y) / (b.y - a.y);
            if (0.0..=1.0).contains(&t) {
                xs.push(a.x + t * (b.x - a.x));
            }
        }
    }
    xs
}

impl Pen for GlyphBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        GlyphBuilder::move_to(self, Point::new(x as f64, y as f64));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        GlyphBuilder::line_to(self, Point::new(x as f64, y as f64));
    }

    fn quad_to(&mut self, cx0: f32, cy0: f32, x: f32, y: f32) {
        self.current
            .quad_to(Point::new(cx0 as f64, cy0 as f64), Point::new(x as f64, y as f64));
    }

    fn curve_to(&mut self, cx0: f32, cy0: f32, cx1: f32, cy1: f32, x: f32, y: f32) {
        GlyphBuilder::curve_to(
            self,
            Point::new(cx0 as f64, cy0 as f64),
            Point::new(cx1 as f64, cy1 as f64),
            Point::new(x as f64, y as f64),
        );
    }

    fn close(&mut self) {
        self.current.close_path();
        self.flush_current();
    }
}

/// A finished glyph: the drawn geometry plus the metrics the marker
/// phases read back.
#[derive(Clone, Debug)]
pub struct Glyph {
    pub name: String,
    pub outline: BezPath,
    pub anchor_points: Vec<AnchorPoint>,
    pub bounding_box: Option<Rect>,
    /// The bounding box to use for repositioning, if it overrides the
    /// real one (ignoring swashes and optical corrections).
    pub effective_bounding_box: Option<Rect>,
    pub advance: f64,
    builder: GlyphBuilder,
}

impl Glyph {
    pub fn new(name: String, builder: GlyphBuilder, effective_bounding_box: Option<Rect>) -> Glyph {
        let bounding_box = builder.bounding_box();
        Glyph {
            name,
            outline: builder.outline.clone(),
            anchor_points: builder.anchor_points.clone(),
            bounding_box,
            effective_bounding_box,
            advance: 0.0,
            builder,
        }
    }

    /// The bounding box, or the zero rectangle for an empty glyph.
    pub fn bbox(&self) -> Rect {
        self.bounding_box.unwrap_or(Rect::ZERO)
    }

    pub fn anchor(&self, name: &str, kind: AnchorKind) -> Option<Point> {
        self.builder.anchor(name, kind)
    }

    pub fn x_bounds_at_y(&self, y_min: f64, y_max: f64) -> Option<(f64, f64)> {
        self.builder.x_bounds_at_y(y_min, y_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::close;

    #[test]
    fn stroke_expands_bounds() {
        let mut glyph = GlyphBuilder::new();
        glyph.move_to(Point::new(0.0, 0.0));
        glyph.line_to(Point::new(100.0, 0.0));
        glyph.stroke(70.0);
        let bbox = glyph.bounding_box().unwrap();
        assert!(bbox.min_y() <= -34.0 && bbox.max_y() >= 34.0);
        assert!(bbox.min_x() <= -34.0 && bbox.max_x() >= 134.0);
    }

    #[test]
    fn dot_strokes_to_a_disk() {
        let mut glyph = GlyphBuilder::new();
        glyph.move_to(Point::new(0.0, 0.0));
        glyph.line_to(Point::new(0.0, 0.0));
        glyph.stroke(70.0);
        let bbox = glyph.bounding_box().unwrap();
        assert!(close(bbox.width(), 70.0));
        assert!(close(bbox.height(), 70.0));
    }

    #[test]
    fn transform_moves_anchors() {
        let mut glyph = GlyphBuilder::new();
        glyph.add_anchor_point("cursive", AnchorKind::Entry, 10.0, 0.0);
        glyph.transform(Affine::rotate((90.0f64).to_radians()));
        let p = glyph.anchor("cursive", AnchorKind::Entry).unwrap();
        assert!(close(p.x, 0.0));
        assert!(close(p.y, 10.0));
    }

    #[test]
    fn x_bounds_clip_to_band() {
        let mut glyph = GlyphBuilder::new();
        glyph.move_to(Point::new(0.0, 0.0));
        glyph.line_to(Point::new(0.0, 500.0));
        glyph.stroke(70.0);
        let (lo, hi) = glyph.x_bounds_at_y(100.0, 200.0).unwrap();
        assert!(close(lo, -35.0));
        assert!(close(hi, 35.0));
        assert!(glyph.x_bounds_at_y(1000.0, 1100.0).is_none());
    }
}
