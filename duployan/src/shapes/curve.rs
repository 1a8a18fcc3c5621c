//! Elliptical arcs.

use kurbo::{Affine, Point, Rect};

use crate::anchors;
use crate::context::Context;
use crate::geometry::{in_degree_range, normalize, rect_deg, scale_angle};
use crate::glyphs::{AnchorKind, GlyphBuilder};
use crate::shapes::{DrawArgs, Instruction, Shape};
use crate::util::{CURVE_OFFSET, GroupElt, GroupKey, JoiningType, RADIUS};

use super::complex::Complex;
use super::markers::Dot;

/// The axis along which a [`Curve`] is stretched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StretchAxis {
    /// The y axis.
    Absolute,
    /// The curve's entry angle.
    AngleIn,
    /// The curve's exit angle.
    AngleOut,
}

/// An arc of an ellipse.
#[derive(Clone, Debug, PartialEq)]
pub struct Curve {
    /// The angle tangent to this curve at its entry point.
    pub angle_in: f64,
    /// The angle tangent to this curve at its exit point.
    pub angle_out: f64,
    /// Whether this curve turns clockwise.
    pub clockwise: bool,
    /// How much to stretch this curve in one axis, as a proportion of
    /// the other axis. Must be greater than -1.
    pub stretch: f64,
    /// Whether to stretch along the axis perpendicular to
    /// `stretch_axis`.
    pub long: bool,
    pub stretch_axis: StretchAxis,
    /// Whether this curve represents a hook character. A hook is
    /// contextualized with an angle against its leader and has no
    /// angle against the following letter in medial position.
    pub hook: bool,
    /// For a curve standing in for a reversed circle character, a
    /// positive scalar applied to the size of the exit swash;
    /// otherwise 0. Values below 1 truncate the swash to the nominal
    /// radius.
    pub reversed_circle: f64,
    /// The angle from the ellipse's center to the point where this
    /// curve overlaps a parent glyph. Only semiellipses may override
    /// it.
    pub overlap_angle: Option<f64>,
    /// Whether this curve represents a secondary curve character.
    pub secondary: bool,
    /// Whether cursive endpoints may be repositioned at all. Meant for
    /// curve letters, not for curves inside compounds or
    /// contextualized circles.
    pub may_reposition_cursive_endpoints: bool,
    /// How far along the curve the entry point sits; 1 is the start of
    /// the curve, 0 the end.
    pub entry_position: f64,
    /// How far along the curve the exit point sits; 1 is the end of
    /// the curve, 0 the start.
    pub exit_position: f64,
    /// Whether the exit is extended for a more gradual inflection.
    pub smooth_1: bool,
    /// Whether the entry is extended for a more gradual inflection.
    pub smooth_2: bool,
    /// Whether the last contextualization would have flipped this
    /// curve's chirality given both neighbors.
    pub would_flip: bool,
}

impl Curve {
    pub fn new(angle_in: f64, angle_out: f64, clockwise: bool) -> Curve {
        Curve {
            angle_in,
            angle_out,
            clockwise,
            stretch: 0.0,
            long: false,
            stretch_axis: StretchAxis::AngleIn,
            hook: false,
            reversed_circle: 0.0,
            overlap_angle: None,
            secondary: clockwise,
            may_reposition_cursive_endpoints: false,
            entry_position: 1.0,
            exit_position: 1.0,
            smooth_1: false,
            smooth_2: false,
            would_flip: false,
        }
    }

    pub fn with_overlap_angle(mut self, overlap_angle: Option<f64>) -> Curve {
        if let Some(a) = overlap_angle {
            assert!(
                (self.angle_out - self.angle_in).abs() == 180.0,
                "only a semicircle may have an overlap angle"
            );
            self.overlap_angle = Some(normalize(a) % 180.0);
        } else {
            self.overlap_angle = None;
        }
        self
    }

    pub fn name(&self, _size: f64, joining_type: JoiningType) -> String {
        let mut name = if let Some(overlap_angle) = self.overlap_angle {
            format!("{}", overlap_angle as i64)
        } else if joining_type == JoiningType::Orienting {
            format!(
                "{}{}{}{}{}",
                self.angle_in as i64,
                if self.clockwise { 'n' } else { 'p' },
                self.angle_out as i64,
                if self.reversed_circle != 0.0 { "r" } else { "" },
                if self.entry_position != 1.0 || self.exit_position != 1.0 {
                    ".ee"
                } else {
                    ""
                },
            )
        } else {
            String::new()
        };
        if self.smooth_1 || self.smooth_2 {
            if !name.is_empty() {
                name.push('.');
            }
            name.push('s');
            if self.smooth_1 {
                name.push('1');
            }
            if self.smooth_2 {
                name.push('2');
            }
        }
        name
    }

    pub fn group(&self) -> GroupKey {
        let (long, stretch_axis) = if self.stretch != 0.0 {
            let mut axis = self.stretch_axis;
            match axis {
                StretchAxis::AngleOut => {
                    let a = normalize(self.angle_out) % 180.0;
                    if a == 0.0 {
                        axis = StretchAxis::Absolute;
                    } else if a == normalize(self.angle_in) % 180.0 {
                        axis = StretchAxis::AngleIn;
                    }
                }
                StretchAxis::AngleIn if normalize(self.angle_in) % 180.0 == 0.0 => {
                    axis = StretchAxis::Absolute;
                }
                _ => {}
            }
            (self.long, axis)
        } else {
            (false, StretchAxis::AngleIn)
        };
        GroupKey::new("curve")
            .with_f(self.angle_in)
            .with_f(self.angle_out)
            .with(self.clockwise)
            .with_f(self.stretch)
            .with(long)
            .with(match stretch_axis {
                StretchAxis::Absolute => "abs",
                StretchAxis::AngleIn => "in",
                StretchAxis::AngleOut => "out",
            })
            .with_f(self.reversed_circle)
            .with(GroupElt::opt_f(self.overlap_angle))
            .with_f(self.entry_position)
            .with_f(self.exit_position)
            .with(self.smooth_1)
            .with(self.smooth_2)
    }

    pub fn hub_priority(&self, size: f64) -> i8 {
        if size >= 6.0 {
            0
        } else {
            1
        }
    }

    /// Pre-stretch equivalents of `angles`, plus the stretch rotation
    /// and the x and y scale factors.
    ///
    /// Stretching changes angles, so drawing starts from angles that
    /// will be stretched into the specified ones.
    fn pre_stretch(&self, angles: &[f64]) -> (Vec<f64>, f64, f64, f64) {
        let mut scale_x = 1.0;
        let mut scale_y = 1.0 + self.stretch;
        if self.long {
            std::mem::swap(&mut scale_x, &mut scale_y);
        }
        let theta = match self.stretch_axis {
            StretchAxis::Absolute => 0.0,
            StretchAxis::AngleIn => self.angle_in,
            StretchAxis::AngleOut => self.angle_out,
        };
        let pre_stretch_angles = if self.stretch != 0.0 {
            angles
                .iter()
                .map(|&angle| {
                    normalize(scale_angle(angle - theta, 1.0 / scale_x, 1.0 / scale_y) + theta)
                })
                .collect()
        } else {
            angles.to_vec()
        };
        (pre_stretch_angles, theta, scale_x, scale_y)
    }

    /// The perpendicular angles at the entry and exit, unwrapped so
    /// that tracing from the first to the second follows the curve's
    /// chirality.
    pub fn normalized_angles(&self, angle_in: Option<f64>, angle_out: Option<f64>) -> (f64, f64) {
        let angle_in = angle_in.unwrap_or(self.angle_in);
        let mut angle_out = angle_out.unwrap_or(self.angle_out);
        if self.clockwise && angle_out > angle_in {
            angle_out -= 360.0;
        } else if !self.clockwise && angle_out < angle_in {
            angle_out += 360.0;
        }
        let offset = if self.clockwise { 90.0 } else { -90.0 };
        (offset + angle_in, offset + angle_out)
    }

    fn normalized_angles_and_da(
        &self,
        angle_in: Option<f64>,
        angle_out: Option<f64>,
        final_circle_diphthong: bool,
        initial_circle_diphthong: bool,
    ) -> (f64, f64, f64) {
        let (mut a1, mut a2) = self.normalized_angles(angle_in, angle_out);
        if final_circle_diphthong {
            a2 = a1;
        } else if initial_circle_diphthong {
            a1 = a2;
        }
        let da = a2 - a1;
        (a1, a2, if da == 0.0 { 360.0 } else { da })
    }

    /// The difference between the exit and entry angles; a difference
    /// of 0 is interpreted as a full turn.
    pub fn da(&self) -> f64 {
        self.normalized_angles_and_da(None, None, false, false).2
    }

    fn angle_to_overlap_point(&self, a1: f64, a2: f64, is_entry: bool) -> f64 {
        let overlap_angle = self.overlap_angle.expect("only semiellipses have overlap angles");
        let mut angle_to_overlap_point = overlap_angle;
        let offset = if self.clockwise { 90.0 } else { -90.0 };
        let angle_at_overlap_point = angle_to_overlap_point - offset;
        if !in_degree_range(
            normalize(angle_at_overlap_point),
            self.angle_in,
            self.angle_out,
            self.clockwise,
        ) || (is_entry
            && in_degree_range(
                normalize(angle_at_overlap_point + 180.0),
                self.angle_in,
                self.angle_out,
                self.clockwise,
            )
            && in_degree_range(
                normalize(angle_at_overlap_point + 180.0),
                self.angle_in - 90.0,
                self.angle_in + 90.0,
                false,
            ))
        {
            angle_to_overlap_point += 180.0;
        }
        let exclusivity_zone = 30.0;
        let endpoint = if is_entry { a1 } else { a2 };
        if in_degree_range(
            angle_to_overlap_point,
            normalize(endpoint - exclusivity_zone),
            normalize(endpoint + exclusivity_zone),
            false,
        ) {
            let mut delta = (angle_to_overlap_point
                - overlap_angle
                - if is_entry { 180.0 } else { 0.0 })
            .abs()
                - exclusivity_zone;
            if is_entry != self.clockwise {
                delta = -delta;
            }
            angle_to_overlap_point += delta;
        }
        normalize(angle_to_overlap_point)
    }

    pub fn draw(&self, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<Rect> {
        let final_abs_da = self.da().abs();
        let smooth_delta = 45.0;
        let cw_sign = if self.clockwise { 1.0 } else { -1.0 };
        let offset_1 = if args.diphthong_1 {
            90.0
        } else if self.smooth_1 {
            smooth_delta
        } else if args.diphthong_2 && final_abs_da < 180.0 {
            -final_abs_da / 2.0
        } else {
            0.0
        };
        let offset_2 = if args.diphthong_2 {
            90.0
        } else if self.smooth_2 {
            smooth_delta
        } else if args.diphthong_1 && final_abs_da < 180.0 {
            -final_abs_da / 2.0
        } else {
            0.0
        };
        let offset_angle_in = normalize(self.angle_in - offset_2 * cw_sign);
        let offset_angle_out = normalize(self.angle_out + offset_1 * cw_sign);
        let (pre_stretch_angles, stretch_axis_angle, scale_x, scale_y) =
            self.pre_stretch(&[self.angle_in, self.angle_out, offset_angle_in, offset_angle_out]);
        let [ps_angle_in, ps_angle_out, ps_offset_angle_in, ps_offset_angle_out] =
            [pre_stretch_angles[0], pre_stretch_angles[1], pre_stretch_angles[2], pre_stretch_angles[3]];
        let exit_delta_scalar = if offset_1 != 90.0 {
            (ps_angle_out - cw_sign * ps_offset_angle_out).to_radians().tan().abs()
        } else if final_abs_da < 180.0 {
            (final_abs_da / 2.0).to_radians().sin()
        } else {
            1.0
        };
        let entry_delta_scalar = if offset_2 != 90.0 {
            (ps_angle_in + cw_sign * ps_offset_angle_in).to_radians().tan().abs()
        } else if final_abs_da < 180.0 {
            (final_abs_da / 2.0).to_radians().sin()
        } else {
            1.0
        };
        let (a1, a2, da) = self.normalized_angles_and_da(
            Some(ps_offset_angle_in),
            Some(ps_offset_angle_out),
            args.final_circle_diphthong,
            args.initial_circle_diphthong,
        );
        let r = (RADIUS * args.size).floor();
        let beziers_needed = (da.abs() / 90.0).ceil() as usize;
        let bezier_arc = da / beziers_needed as f64;
        let cp = r * (4.0 / 3.0)
            * (std::f64::consts::PI / (2.0 * beziers_needed as f64 * 360.0 / da)).tan();
        let cp_distance = cp.hypot(r);
        let cp_angle = (cp / cp_distance).asin();
        let p0 = rect_deg(r, a1);
        let mut entry;
        if args.diphthong_2 {
            let entry_delta = rect_deg(entry_delta_scalar * r, normalize(a1 + 90.0 * cw_sign));
            entry = Point::new(p0.x + entry_delta.x, p0.y + entry_delta.y);
            glyph.move_to(entry);
            glyph.line_to(p0);
        } else if self.smooth_2 {
            let entry_delta = rect_deg(-entry_delta_scalar * r, ps_offset_angle_in);
            entry = Point::new(p0.x + entry_delta.x, p0.y + entry_delta.y);
            glyph.move_to(entry);
            glyph.line_to(p0);
        } else {
            entry = p0;
            glyph.move_to(entry);
        }
        let mut p3 = p0;
        for i in 1..=beziers_needed {
            let theta0 = a1 + (i - 1) as f64 * bezier_arc;
            let p1 = rect_deg(cp_distance, theta0 + cp_angle.to_degrees());
            let theta3 = if i == beziers_needed {
                a2
            } else {
                a1 + i as f64 * bezier_arc
            };
            p3 = rect_deg(r, theta3);
            let p2 = rect_deg(cp_distance, theta3 - cp_angle.to_degrees());
            glyph.curve_to(p1, p2, p3);
        }
        let mut exit;
        if self.reversed_circle != 0.0 && !args.diphthong_1 && !args.diphthong_2 {
            let swash_angle = (360.0 - da.abs()) / 2.0;
            let mut swash_length = (self.reversed_circle * swash_angle.to_radians().sin() * r
                / (90.0 - swash_angle).to_radians().sin())
            .abs();
            if self.reversed_circle < 1.0 {
                swash_length = swash_length.min(r);
            }
            let minimum_safe_da = 240.0;
            let maximum_safe_swash_length = (std::f64::consts::SQRT_2 - 1.0) * RADIUS;
            if da.abs() < minimum_safe_da
                && swash_length >= maximum_safe_swash_length
                && args.joining_type == JoiningType::Orienting
            {
                let new_da = (da.abs() + 10.0).min(minimum_safe_da);
                let widened = Curve {
                    angle_out: normalize(self.angle_in + new_da * -cw_sign),
                    ..self.clone()
                };
                let rv = widened.draw(glyph, args);
                glyph.replace_anchor(anchors::CURSIVE, AnchorKind::Exit, p3.x, p3.y);
                glyph.replace_anchor(anchors::PRE_HUB_CURSIVE, AnchorKind::Exit, p3.x, p3.y);
                return rv;
            }
            let swash_vector = rect_deg(swash_length, ps_angle_out);
            let swash_endpoint = Point::new(p3.x + swash_vector.x, p3.y + swash_vector.y);
            glyph.line_to(swash_endpoint);
            let exit_vector = rect_deg(r.min(swash_length), ps_angle_out);
            exit = Point::new(p3.x + exit_vector.x, p3.y + exit_vector.y);
        } else {
            if self.entry_position != 1.0 {
                entry = rect_deg(r, a2 - da * self.entry_position);
            }
            if self.exit_position != 1.0 {
                exit = rect_deg(r, a1 + da * self.exit_position);
            } else {
                exit = p3;
            }
        }
        if args.diphthong_1 {
            let exit_delta = rect_deg(exit_delta_scalar * r, normalize(a2 - 90.0 * cw_sign));
            exit = Point::new(exit.x + exit_delta.x, exit.y + exit_delta.y);
            glyph.line_to(exit);
        } else if self.smooth_1 {
            let exit_delta = rect_deg(exit_delta_scalar * r, ps_offset_angle_out);
            exit = Point::new(exit.x + exit_delta.x, exit.y + exit_delta.y);
            glyph.line_to(exit);
        }
        glyph.end_path();
        let relative_mark_angle = (a1 + a2) / 2.0;
        if args.anchor.is_none() && args.joining_type != JoiningType::NonJoining {
            let max_tree_width = self.max_tree_width();
            let child_interval = da / (max_tree_width + 2) as f64;
            if self.overlap_angle.is_none() {
                for child in 0..2 {
                    for child_index in 0..max_tree_width {
                        let p = rect_deg(r, a1 + child_interval * (child_index + 2) as f64);
                        glyph.add_anchor_point(
                            anchors::CHILD_EDGES[child][child_index],
                            AnchorKind::Base,
                            p.x,
                            p.y,
                        );
                    }
                }
            } else {
                let overlap_exit_angle = self.angle_to_overlap_point(a1, a2, false);
                for child in 0..2 {
                    let p = rect_deg(r, overlap_exit_angle);
                    glyph.add_anchor_point(anchors::CHILD_EDGES[child][0], AnchorKind::Base, p.x, p.y);
                }
            }
            let overlap_entry_angle = if self.overlap_angle.is_none() {
                a1 + child_interval
            } else {
                self.angle_to_overlap_point(a1, a2, true)
            };
            let overlap_entry = rect_deg(r, overlap_entry_angle);
            glyph.add_anchor_point(anchors::PARENT_EDGE, AnchorKind::Mark, overlap_entry.x, overlap_entry.y);
            glyph.add_anchor_point(
                anchors::CONTINUING_OVERLAP,
                AnchorKind::Entry,
                overlap_entry.x,
                overlap_entry.y,
            );
            let overlap_exit = rect_deg(
                r,
                if self.overlap_angle.is_none() {
                    a1 + child_interval * (max_tree_width + 1) as f64
                } else {
                    self.angle_to_overlap_point(a1, a2, false)
                },
            );
            glyph.add_anchor_point(
                anchors::CONTINUING_OVERLAP,
                AnchorKind::Exit,
                overlap_exit.x,
                overlap_exit.y,
            );
            glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, entry.x, entry.y);
            glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, exit.x, exit.y);
            glyph.add_anchor_point(
                anchors::POST_HUB_CONTINUING_OVERLAP,
                AnchorKind::Entry,
                overlap_entry.x,
                overlap_entry.y,
            );
            if self.hub_priority(args.size) != -1 {
                let p = rect_deg(r, a1);
                glyph.add_anchor_point(anchors::POST_HUB_CURSIVE, AnchorKind::Entry, p.x, p.y);
            }
            if self.hub_priority(args.size) != 0 {
                glyph.add_anchor_point(anchors::PRE_HUB_CURSIVE, AnchorKind::Exit, exit.x, exit.y);
            }
            let secant_point = if da.abs() > 180.0 {
                Point::ZERO
            } else {
                rect_deg(r, a1 + child_interval * (max_tree_width + 1) as f64)
            };
            glyph.add_anchor_point(anchors::SECANT, AnchorKind::Base, secant_point.x, secant_point.y);
        }
        let middle = rect_deg(r, relative_mark_angle);
        glyph.add_anchor_point(anchors::MIDDLE, AnchorKind::Base, middle.x, middle.y);
        if args.anchor.is_none() {
            if self.stretch != 0.0 {
                let theta = stretch_axis_angle.to_radians();
                glyph.add_anchor_point(anchors::RELATIVE_1, AnchorKind::Base, 0.0, 0.0);
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
                let p1 = if da.abs() > 180.0 {
                    Point::ZERO
                } else {
                    rect_deg(
                        args.stroke_width.min(
                            r - (args.stroke_width / 2.0
                                + args.stroke_gap
                                + Dot::SCALAR * args.light_line / 2.0),
                        ),
                        relative_mark_angle,
                    )
                };
                glyph.add_anchor_point(anchors::RELATIVE_1, AnchorKind::Base, p1.x, p1.y);
                let p2 = rect_deg(
                    r + args.stroke_width / 2.0
                        + args.stroke_gap
                        + Dot::SCALAR * args.light_line / 2.0,
                    relative_mark_angle,
                );
                glyph.add_anchor_point(anchors::RELATIVE_2, AnchorKind::Base, p2.x, p2.y);
            }
        }
        glyph.stroke(args.stroke_width);
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
                let p = rect_deg(r, relative_mark_angle);
                glyph.add_anchor_point(anchor, AnchorKind::Mark, p.x, p.y);
            }
        }
        None
    }

    pub fn can_be_child(&self) -> bool {
        let (a1, a2) = self.normalized_angles(None, None);
        (a2 - a1).abs() <= 180.0
    }

    pub fn max_tree_width(&self) -> usize {
        1
    }

    pub fn max_double_marks(&self, size: f64, mark_anchors: &[&str]) -> usize {
        if mark_anchors.contains(&anchors::MIDDLE) {
            return 0;
        }
        let (a1, a2) = self.normalized_angles(None, None);
        (((a1 - a2).abs() / 360.0 * size) as usize).min(3)
    }

    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Shape {
        if self.hook && !context_in.is_none() && !context_out.is_none() {
            let unhooked = Curve {
                hook: false,
                ..self.as_reversed()
            };
            let rv = unhooked.contextualize(&context_out.reversed(), &context_in.reversed());
            let Shape::Curve(rv) = rv else {
                unreachable!("a hookless curve contextualizes to a curve");
            };
            let rv = Curve { hook: true, ..rv }.as_reversed();
            if rv.context_in().angle == context_in.angle {
                if rv.entry_position == 1.0 {
                    let half_turn = Curve::new(
                        normalize(rv.angle_in + 90.0 * if rv.clockwise { 1.0 } else { -1.0 }),
                        rv.angle_in,
                        rv.clockwise,
                    );
                    return Shape::Complex(Complex::new(vec![
                        Instruction::component(0.5, Shape::Curve(half_turn)),
                        Instruction::component(1.0, Shape::Curve(rv)),
                    ]));
                }
                return Shape::Curve(Curve {
                    entry_position: 0.0,
                    ..rv
                });
            }
            return Shape::Curve(rv);
        }
        let da = self.angle_out - self.angle_in;
        let angle_in = match (context_in.angle, context_out.angle) {
            (Some(a), _) => a,
            (None, Some(out)) => normalize(out - da),
            (None, None) => self.angle_in,
        };
        let angle_out = context_out.angle.unwrap_or_else(|| normalize(angle_in + da));
        let mut flips = 0usize;
        let mut candidate_angle_in = angle_in;
        if self.hook {
            candidate_angle_in = normalize(candidate_angle_in + 180.0);
        }
        let mut candidate_angle_out = normalize(candidate_angle_in + da);
        let mut candidate_clockwise = self.clockwise;
        let flip = |candidate_clockwise: &mut bool,
                    candidate_angle_in: &mut f64,
                    candidate_angle_out: &mut f64| {
            *candidate_clockwise = !*candidate_clockwise;
            if context_in.is_none() {
                *candidate_angle_in = normalize(2.0 * *candidate_angle_out - *candidate_angle_in);
            } else {
                *candidate_angle_out = normalize(2.0 * *candidate_angle_in - *candidate_angle_out);
            }
        };
        if candidate_clockwise != context_in.is_none() {
            flip(&mut candidate_clockwise, &mut candidate_angle_in, &mut candidate_angle_out);
        }
        let clockwise_from_adjacent_curve = if !context_in.is_none() {
            context_in.clockwise
        } else {
            context_out.clockwise
        };
        if self.secondary
            != matches!(clockwise_from_adjacent_curve, Some(c) if c != candidate_clockwise)
        {
            flip(&mut candidate_clockwise, &mut candidate_angle_in, &mut candidate_angle_out);
        }
        if !context_in.is_none() && !context_out.is_none() {
            if self.hook {
                std::mem::swap(&mut candidate_angle_in, &mut candidate_angle_out);
                candidate_clockwise = !candidate_clockwise;
            }
            let context_clockwises = (context_in.clockwise, context_out.clockwise);
            let mut curve_offset = match context_clockwises {
                (None, None) | (Some(true), Some(false)) | (Some(false), Some(true)) => 0.0,
                _ => CURVE_OFFSET,
            };
            if context_clockwises.0 == Some(false) || context_clockwises.1 == Some(false) {
                curve_offset = -curve_offset;
            }
            let (a1, a2) = self.normalized_angles(None, None);
            let slight_overlap_offset =
                (a1 - a2).abs() / 3.0 * if candidate_clockwise { 1.0 } else { -1.0 };
            let sign = |x: f64| if x.is_sign_negative() { -1.0 } else { 1.0 };
            if !((slight_overlap_offset.abs() + curve_offset.abs() >= (a1 - a2).abs()
                && sign(slight_overlap_offset) != sign(curve_offset))
                || in_degree_range(
                    normalize(angle_out + 180.0),
                    normalize(candidate_angle_out + slight_overlap_offset),
                    normalize(candidate_angle_in + curve_offset),
                    candidate_clockwise,
                ))
            {
                flip(&mut candidate_clockwise, &mut candidate_angle_in, &mut candidate_angle_out);
                flips += 1;
            }
            if context_out.clockwise == context_in.clockwise
                && context_in.clockwise == Some(candidate_clockwise)
                && (in_degree_range(
                    angle_out,
                    normalize(angle_in + 180.0),
                    normalize(angle_in + 180.0 + curve_offset),
                    !candidate_clockwise,
                ) || in_degree_range(
                    normalize(angle_out - curve_offset),
                    normalize(angle_in + 180.0),
                    normalize(angle_in + 180.0 + curve_offset),
                    !candidate_clockwise,
                ))
            {
                flip(&mut candidate_clockwise, &mut candidate_angle_in, &mut candidate_angle_out);
                flips += 1;
            }
            if self.hook {
                std::mem::swap(&mut candidate_angle_in, &mut candidate_angle_out);
                candidate_clockwise = !candidate_clockwise;
            }
        }
        if context_in.diphthong_start || context_out.diphthong_end {
            candidate_angle_in = normalize(candidate_angle_in - 180.0);
            candidate_angle_out = normalize(candidate_angle_out - 180.0);
        }
        let would_flip = flips % 2 == 1 && !context_in.is_none() && !context_out.is_none();
        if would_flip {
            flip(&mut candidate_clockwise, &mut candidate_angle_in, &mut candidate_angle_out);
        }
        Shape::Curve(Curve {
            angle_in: candidate_angle_in,
            angle_out: candidate_angle_out,
            clockwise: candidate_clockwise,
            // TODO: Track the precise output angle instead of assuming
            // that the exit should be halfway along the curve.
            exit_position: if would_flip && self.may_reposition_cursive_endpoints {
                0.5
            } else {
                self.exit_position
            },
            would_flip,
            ..self.clone()
        })
    }

    pub fn context_in(&self) -> Context {
        Context::with_clockwise(self.angle_in, self.clockwise)
    }

    pub fn context_out(&self) -> Context {
        Context::with_clockwise(self.angle_out, self.clockwise)
    }

    pub fn calculate_diacritic_angles(&self) -> Vec<(&'static str, f64)> {
        let halfway_angle = normalize((self.angle_in + self.angle_out) / 2.0) % 180.0;
        vec![
            (anchors::RELATIVE_1, halfway_angle),
            (anchors::RELATIVE_2, halfway_angle),
            (anchors::MIDDLE, (halfway_angle + 90.0) % 180.0),
            (anchors::SECANT, normalize(self.angle_out) % 180.0),
        ]
    }

    /// The same arc drawn in the opposite direction.
    pub fn as_reversed(&self) -> Curve {
        Curve {
            angle_in: normalize(self.angle_out + 180.0),
            angle_out: normalize(self.angle_in + 180.0),
            clockwise: !self.clockwise,
            stretch_axis: match self.stretch_axis {
                StretchAxis::AngleIn => StretchAxis::AngleOut,
                StretchAxis::AngleOut => StretchAxis::AngleIn,
                StretchAxis::Absolute => StretchAxis::Absolute,
            },
            entry_position: self.exit_position,
            exit_position: self.entry_position,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::close;

    #[test]
    fn reversal_round_trips() {
        let curve = Curve::new(0.0, 180.0, false);
        let double_reversed = curve.as_reversed().as_reversed();
        assert!(close(normalize(double_reversed.angle_in), 0.0));
        assert!(close(normalize(double_reversed.angle_out), 180.0));
        assert_eq!(double_reversed.clockwise, curve.clockwise);
    }

    #[test]
    fn da_treats_zero_as_full_turn() {
        assert_eq!(Curve::new(90.0, 90.0, false).da(), 360.0);
        assert_eq!(Curve::new(0.0, 180.0, false).da(), 180.0);
        assert_eq!(Curve::new(0.0, 180.0, true).da(), -180.0);
    }

    #[test]
    fn no_context_is_identity() {
        let curve = Curve::new(90.0, 270.0, true);
        match curve.contextualize(&Context::NONE, &Context::NONE) {
            Shape::Curve(c) => {
                assert!(close(c.angle_in, 90.0));
                assert!(close(c.angle_out, 270.0));
                assert!(!c.would_flip);
            }
            other => panic!("expected a curve, got {other:?}"),
        }
    }

    #[test]
    fn entry_context_carries_angle() {
        let curve = Curve::new(0.0, 180.0, false);
        match curve.contextualize(&Context::new(90.0), &Context::NONE) {
            Shape::Curve(c) => {
                assert!(close(c.angle_in, 90.0));
                assert_eq!(c.context_in().angle, Some(90.0));
            }
            other => panic!("expected a curve, got {other:?}"),
        }
    }

    #[test]
    fn group_normalizes_unstretched_axis() {
        let mut a = Curve::new(0.0, 180.0, false);
        a.long = true;
        let b = Curve::new(0.0, 180.0, false);
        assert_eq!(a.group(), b.group());
    }

    #[test]
    fn drawn_semicircle_has_cursive_anchors() {
        let curve = Curve::new(90.0, 270.0, false);
        let mut glyph = GlyphBuilder::new();
        curve.draw(&mut glyph, &DrawArgs::plain(2.0));
        let entry = glyph.anchor(anchors::CURSIVE, AnchorKind::Entry).unwrap();
        let exit = glyph.anchor(anchors::CURSIVE, AnchorKind::Exit).unwrap();
        // Entry and exit are diametrically opposite on a semicircle.
        assert!(close(entry.distance(exit), 2.0 * RADIUS * 2.0));
    }
}
