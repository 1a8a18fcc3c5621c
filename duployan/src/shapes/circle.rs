//! Full ellipses.

use kurbo::{Affine, Point, Rect};

use crate::anchors;
use crate::context::Context;
use crate::geometry::{normalize, rect_deg, scale_angle};
use crate::glyphs::{AnchorKind, GlyphBuilder};
use crate::shapes::{DrawArgs, Shape};
use crate::util::{GroupKey, JoiningType, RADIUS};

use super::curve::Curve;
use super::markers::Dot;

/// The role of a circle in an orienting sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CircleRole {
    /// The one and only circle in the sequence.
    Independent,
    /// The circle at one end of the sequence that participates in the
    /// main topographical phases.
    Leader,
    /// A circle that is ignored for the main topographical phases and
    /// is later contextualized based on the leader.
    Dependent,
}

/// An ellipse.
#[derive(Clone, Debug, PartialEq)]
pub struct Circle {
    /// The angle tangent to this circle at its entry point.
    pub angle_in: f64,
    /// The angle tangent to this circle at its exit point.
    pub angle_out: f64,
    /// Whether this circle turns clockwise.
    pub clockwise: bool,
    /// Whether this represents a reversed circle character (U+1BC42
    /// DUPLOYAN LETTER SLOAN OW).
    pub reversed: bool,
    /// Whether to force this to stay a circle when contextualized,
    /// even where a curve would normally be more appropriate.
    pub pinned: bool,
    /// How much to stretch in one axis, as a proportion of the other.
    pub stretch: f64,
    /// Whether to stretch along the axis perpendicular to the entry
    /// angle, as opposed to parallel.
    pub long: bool,
    pub role: CircleRole,
}

impl Circle {
    pub fn new(angle_in: f64, angle_out: f64, clockwise: bool) -> Circle {
        Circle {
            angle_in,
            angle_out,
            clockwise,
            reversed: false,
            pinned: false,
            stretch: 0.0,
            long: false,
            role: CircleRole::Independent,
        }
    }

    pub fn reversed_circle(angle_in: f64, angle_out: f64, clockwise: bool) -> Circle {
        Circle {
            reversed: true,
            ..Circle::new(angle_in, angle_out, clockwise)
        }
    }

    pub fn name(&self, _size: f64, joining_type: JoiningType) -> String {
        if joining_type != JoiningType::Orienting {
            return String::new();
        }
        let mut angle_in = self.angle_in;
        let mut angle_out = self.angle_out;
        let mut clockwise = self.clockwise;
        if angle_in == angle_out && angle_in >= 180.0 {
            angle_in = normalize(angle_in + 180.0);
            angle_out = angle_in;
            clockwise = !clockwise;
        }
        format!(
            "{}{}{}{}{}",
            angle_in as i64,
            if clockwise { 'n' } else { 'p' },
            angle_out as i64,
            if self.reversed && self.angle_in != self.angle_out {
                "r"
            } else {
                ""
            },
            if self.role != CircleRole::Independent && self.angle_in != self.angle_out {
                ".circle"
            } else {
                ""
            },
        )
    }

    pub fn group(&self) -> GroupKey {
        let (mut angle_in, mut angle_out) = (self.angle_in, self.angle_out);
        if self.clockwise {
            angle_in = normalize(angle_in + 180.0);
            angle_out = normalize(angle_out + 180.0);
        }
        GroupKey::new("circle")
            .with_f(angle_in)
            .with_f(angle_out)
            .with_f(self.stretch)
            .with(self.long)
    }

    pub fn hub_priority(&self, size: f64) -> i8 {
        if size >= 6.0 {
            0
        } else {
            1
        }
    }

    fn pre_stretch_values(&self) -> (f64, f64, f64, f64, f64) {
        let mut scale_x = 1.0 + self.stretch;
        let mut scale_y = 1.0;
        if self.long {
            std::mem::swap(&mut scale_x, &mut scale_y);
        }
        let theta = self.angle_in;
        let (pre_stretch_angle_in, pre_stretch_angle_out) = if self.stretch != 0.0 {
            (
                normalize(scale_angle(self.angle_in - theta, 1.0 / scale_x, 1.0 / scale_y) + theta),
                normalize(scale_angle(self.angle_out - theta, 1.0 / scale_x, 1.0 / scale_y) + theta),
            )
        } else {
            (self.angle_in, self.angle_out)
        };
        (pre_stretch_angle_in, pre_stretch_angle_out, theta, scale_x, scale_y)
    }

    pub fn draw(&self, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<Rect> {
        if (args.diphthong_1 || args.diphthong_2) && self.angle_in == self.angle_out {
            let mut curve = Curve::new(self.angle_in, self.angle_out, self.clockwise);
            curve.stretch = self.stretch;
            curve.long = true;
            curve.reversed_circle = if self.reversed { 1.0 } else { 0.0 };
            return curve.draw(glyph, args);
        }
        let (mut pre_stretch_angle_in, mut pre_stretch_angle_out, stretch_axis_angle, scale_x, scale_y) =
            self.pre_stretch_values();
        let cw_sign = if self.clockwise { 1.0 } else { -1.0 };
        if args.diphthong_1 {
            pre_stretch_angle_out = normalize(pre_stretch_angle_out + 90.0 * cw_sign);
        }
        if args.diphthong_2 {
            pre_stretch_angle_in = normalize(pre_stretch_angle_in - 90.0 * cw_sign);
        }
        if self.clockwise && pre_stretch_angle_out > pre_stretch_angle_in {
            pre_stretch_angle_out -= 360.0;
        } else if !self.clockwise && pre_stretch_angle_out < pre_stretch_angle_in {
            pre_stretch_angle_out += 360.0;
        }
        let a1 = (if self.clockwise { 90.0 } else { -90.0 }) + pre_stretch_angle_in;
        let a2 = (if self.clockwise { 90.0 } else { -90.0 }) + pre_stretch_angle_out;
        let r = (RADIUS * args.size).floor();
        let cp = r * (4.0 / 3.0) * (std::f64::consts::PI / 8.0).tan();
        let mut entry = rect_deg(r, a1);
        if args.diphthong_2 {
            glyph.move_to(entry);
            let entry_delta = rect_deg(r, normalize(a1 + 90.0 * cw_sign));
            entry = Point::new(entry.x + entry_delta.x, entry.y + entry_delta.y);
            glyph.line_to(entry);
            glyph.end_path();
        }
        glyph.move_to(Point::new(0.0, r));
        glyph.curve_to(Point::new(cp, r), Point::new(r, cp), Point::new(r, 0.0));
        glyph.curve_to(Point::new(r, -cp), Point::new(cp, -r), Point::new(0.0, -r));
        glyph.curve_to(Point::new(-cp, -r), Point::new(-r, -cp), Point::new(-r, 0.0));
        glyph.curve_to(Point::new(-r, cp), Point::new(-cp, r), Point::new(0.0, r));
        glyph.end_path();
        let mut exit = rect_deg(r, a2);
        if args.diphthong_1 {
            glyph.move_to(exit);
            let exit_delta = rect_deg(r, normalize(a2 - 90.0 * cw_sign));
            exit = Point::new(exit.x + exit_delta.x, exit.y + exit_delta.y);
            glyph.line_to(exit);
            glyph.end_path();
        }
        if args.joining_type != JoiningType::NonJoining {
            glyph.add_anchor_point(anchors::PARENT_EDGE, AnchorKind::Mark, 0.0, 0.0);
            glyph.add_anchor_point(anchors::CONTINUING_OVERLAP, AnchorKind::Entry, 0.0, 0.0);
            glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, entry.x, entry.y);
            glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, exit.x, exit.y);
            glyph.add_anchor_point(anchors::POST_HUB_CONTINUING_OVERLAP, AnchorKind::Entry, 0.0, 0.0);
            if self.hub_priority(args.size) != -1 {
                glyph.add_anchor_point(anchors::POST_HUB_CURSIVE, AnchorKind::Entry, entry.x, entry.y);
            }
            if self.hub_priority(args.size) != 0 {
                glyph.add_anchor_point(anchors::PRE_HUB_CURSIVE, AnchorKind::Exit, exit.x, exit.y);
            }
            glyph.add_anchor_point(anchors::SECANT, AnchorKind::Base, 0.0, 0.0);
        }
        glyph.add_anchor_point(anchors::RELATIVE_1, AnchorKind::Base, 0.0, 0.0);
        if self.stretch != 0.0 {
            let theta = stretch_axis_angle.to_radians();
            glyph.transform(
                Affine::rotate(theta)
                    * Affine::scale_non_uniform(scale_x, scale_y)
                    * Affine::rotate(-theta),
            );
            let p = rect_deg(
                scale_x * r
                    + args.stroke_width / 2.0
                    + args.stroke_gap
                    + Dot::SCALAR * args.light_line / 2.0,
                self.angle_in,
            );
            glyph.add_anchor_point(anchors::RELATIVE_2, AnchorKind::Base, p.x, p.y);
        } else {
            let p = rect_deg(
                r + args.stroke_width / 2.0 + args.stroke_gap + Dot::SCALAR * args.light_line / 2.0,
                (a1 + a2) / 2.0,
            );
            glyph.add_anchor_point(anchors::RELATIVE_2, AnchorKind::Base, p.x, p.y);
        }
        glyph.stroke(args.stroke_width);
        if args.diphthong_1 || args.diphthong_2 {
            glyph.remove_overlap();
        }
        let bbox = glyph.bounding_box().unwrap_or_default();
        let x_center = (bbox.min_x() + bbox.max_x()) / 2.0;
        match args.anchor {
            None => {
                glyph.add_anchor_point(
                    anchors::ABOVE,
                    AnchorKind::Base,
                    x_center,
                    bbox.max_y() + args.stroke_gap,
                );
                glyph.add_anchor_point(
                    anchors::BELOW,
                    AnchorKind::Base,
                    x_center,
                    bbox.min_y() - args.stroke_gap,
                );
            }
            Some(anchors::ABOVE) => {
                glyph.add_anchor_point(
                    anchors::ABOVE,
                    AnchorKind::Mark,
                    x_center,
                    bbox.min_y() + args.stroke_width / 2.0,
                );
            }
            Some(anchors::BELOW) => {
                glyph.add_anchor_point(
                    anchors::BELOW,
                    AnchorKind::Mark,
                    x_center,
                    bbox.max_y() - args.stroke_width / 2.0,
                );
            }
            Some(anchor) => {
                glyph.add_anchor_point(anchor, AnchorKind::Mark, 0.0, 0.0);
            }
        }
        None
    }

    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Shape {
        let mut angle_in = match (context_in.angle, context_out.angle) {
            (Some(a), _) => a,
            (None, Some(out)) => out,
            (None, None) => 0.0,
        };
        let mut angle_out = context_out.angle.unwrap_or(angle_in);
        let is_reversed = self.reversed && self.role != CircleRole::Leader;
        let clockwise_from_adjacent_curve = if context_in.clockwise.is_some() {
            context_in.clockwise
        } else if context_in.angle == context_out.angle {
            None
        } else {
            context_out.clockwise
        };

        let flop = |clockwise: &mut bool, angle_in: &mut f64, angle_out: &mut f64| {
            if self.role == CircleRole::Leader {
                *clockwise = self.clockwise;
            } else if (context_in.ignorable_for_topography
                && (context_in.clockwise == Some(*clockwise)) != context_in.diphthong_start)
                || (context_out.ignorable_for_topography
                    && (context_out.clockwise == Some(*clockwise)) != context_out.diphthong_end)
            {
                *clockwise = !*clockwise;
            }
            if context_in.ignorable_for_topography && context_out.is_none() {
                *angle_out = if context_in.diphthong_start {
                    *angle_in
                } else {
                    normalize(*angle_in + 180.0)
                };
            } else if context_out.ignorable_for_topography && context_in.is_none() {
                *angle_in = if context_out.diphthong_end {
                    *angle_out
                } else {
                    normalize(*angle_out + 180.0)
                };
            }
            if context_in.diphthong_start {
                *angle_in = normalize(*angle_in - 180.0);
                if context_out.is_none() {
                    *angle_out = normalize(*angle_out - 180.0);
                }
            } else if context_out.diphthong_end {
                *angle_in = normalize(*angle_in - 180.0);
                *angle_out = normalize(*angle_out - 180.0);
            }
        };

        if angle_in == angle_out {
            let mut clockwise = match clockwise_from_adjacent_curve {
                Some(c) => c != is_reversed,
                None => self.clockwise,
            };
            flop(&mut clockwise, &mut angle_in, &mut angle_out);
            return Shape::Circle(Circle {
                angle_in,
                angle_out,
                clockwise,
                ..self.clone()
            });
        }
        let da = (angle_out - angle_in).abs();
        let clockwise_ignoring_curvature = (da >= 180.0) != (angle_out > angle_in);
        let forms_loop_next_to_curve =
            Some(context_in.has_clockwise_loop_to(context_out)) == clockwise_from_adjacent_curve;
        let clockwise_ignoring_reversal = match clockwise_from_adjacent_curve {
            Some(c) if forms_loop_next_to_curve => c,
            _ => clockwise_ignoring_curvature,
        };
        let mut clockwise = clockwise_ignoring_reversal != is_reversed;
        flop(&mut clockwise, &mut angle_in, &mut angle_out);
        if angle_in == angle_out {
            let clockwise = match clockwise_from_adjacent_curve {
                Some(c) => c != is_reversed,
                None => self.clockwise,
            };
            return Shape::Circle(Circle {
                angle_in,
                angle_out,
                clockwise,
                ..self.clone()
            });
        }
        if self.role != CircleRole::Independent
            && (self.pinned || !is_reversed)
            && (clockwise != context_in.has_clockwise_loop_to(context_out)
                || self.role == CircleRole::Leader
                || context_in.diphthong_start
                || context_out.diphthong_end)
        {
            return Shape::Circle(Circle {
                angle_in,
                angle_out: if self.role == CircleRole::Leader {
                    angle_in
                } else {
                    angle_out
                },
                clockwise,
                ..self.clone()
            });
        }
        let mut curve = Curve::new(angle_in, angle_out, clockwise);
        curve.stretch = self.stretch;
        curve.long = true;
        if clockwise_ignoring_reversal == clockwise_ignoring_curvature {
            if is_reversed {
                if da != 180.0
                    && (self.role != CircleRole::Dependent
                        || Curve::new(angle_in, normalize(angle_out + 180.0), clockwise)
                            .da()
                            .abs()
                            == 270.0)
                {
                    curve.angle_out = normalize(angle_out + 180.0);
                    curve.reversed_circle = 1.0;
                    Shape::Curve(curve)
                } else {
                    Shape::Circle(Circle {
                        angle_in,
                        angle_out: normalize(angle_out + 180.0),
                        clockwise,
                        ..self.clone()
                    })
                }
            } else {
                Shape::Curve(curve)
            }
        } else if is_reversed {
            if da != 180.0
                && (self.role != CircleRole::Dependent
                    || Curve::new(angle_in, angle_out, clockwise).da().abs() == 270.0)
            {
                curve.reversed_circle = 1.0;
                Shape::Curve(curve)
            } else {
                Shape::Circle(Circle {
                    angle_in,
                    angle_out: normalize(angle_out + 180.0),
                    clockwise,
                    ..self.clone()
                })
            }
        } else if da != 180.0 && !forms_loop_next_to_curve {
            Shape::Circle(Circle {
                angle_in,
                angle_out,
                clockwise,
                ..self.clone()
            })
        } else {
            Shape::Curve(curve)
        }
    }

    pub fn context_in(&self) -> Context {
        Context::with_clockwise(self.angle_in, self.clockwise)
    }

    pub fn context_out(&self) -> Context {
        Context::with_clockwise(self.angle_out, self.clockwise)
    }

    /// The same circle drawn in the opposite direction.
    pub fn as_reversed(&self) -> Circle {
        Circle {
            angle_in: normalize(self.angle_out + 180.0),
            angle_out: normalize(self.angle_in + 180.0),
            clockwise: !self.clockwise,
            reversed: !self.reversed,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::close;

    #[test]
    fn isolated_circle_stays_a_circle() {
        let circle = Circle::new(0.0, 0.0, false);
        match circle.contextualize(&Context::NONE, &Context::NONE) {
            Shape::Circle(c) => assert_eq!(c.angle_in, c.angle_out),
            other => panic!("expected a circle, got {other:?}"),
        }
    }

    #[test]
    fn equal_contexts_stay_circular() {
        let circle = Circle::new(0.0, 0.0, false);
        let contextualized = circle.contextualize(
            &Context::with_clockwise(90.0, true),
            &Context::with_clockwise(90.0, false),
        );
        match contextualized {
            Shape::Circle(c) => {
                assert!(close(c.angle_in, 90.0));
                assert!(close(c.angle_out, 90.0));
                // Clockwise follows the entry curve.
                assert!(c.clockwise);
            }
            other => panic!("expected a circle, got {other:?}"),
        }
    }

    #[test]
    fn unequal_contexts_degrade_to_long_curve() {
        // Two adjacent circles expose straight-ish contexts at
        // different angles; the second degrades to a stretched curve.
        let circle = Circle::new(0.0, 0.0, false);
        match circle.contextualize(&Context::new(0.0), &Context::new(180.0)) {
            Shape::Curve(curve) => {
                assert!(curve.long);
                assert!(close(curve.angle_in, 0.0));
                assert!(close(curve.angle_out, 180.0));
            }
            other => panic!("expected a curve, got {other:?}"),
        }
    }

    #[test]
    fn group_ignores_chirality() {
        let a = Circle::new(0.0, 0.0, false);
        let b = Circle::new(180.0, 180.0, true);
        assert_eq!(a.group(), b.group());
    }

    #[test]
    fn reversal_round_trips() {
        let circle = Circle::reversed_circle(90.0, 270.0, true);
        let twice = circle.as_reversed().as_reversed();
        assert!(close(normalize(twice.angle_in), 90.0));
        assert!(close(normalize(twice.angle_out), 270.0));
        assert_eq!(twice.clockwise, circle.clockwise);
        assert_eq!(twice.reversed, circle.reversed);
    }
}
