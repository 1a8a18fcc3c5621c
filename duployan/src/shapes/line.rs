//! Straight strokes.

use kurbo::Affine;

use crate::anchors;
use crate::context::Context;
use crate::geometry::normalize;
use crate::glyphs::{AnchorKind, GlyphBuilder};
use crate::shapes::{Component, ContextFn, DrawArgs, Instruction, Shape};
use crate::util::{EPSILON, GroupElt, GroupKey, JoiningType, LINE_FACTOR};

use super::complex::Complex;
use super::markers::Dot;

/// A line segment.
#[derive(Clone, Debug, PartialEq)]
pub struct Line {
    /// The angle from the entry of the stroke to the exit.
    pub angle: f64,
    /// Whether this shape is minor in the sense of [`Context`].
    pub minor: bool,
    /// Whether the size refers to the y offset between entry and exit
    /// as opposed to the stroke length.
    pub stretchy: bool,
    /// How far along the stroke the secant overlap point is, as a
    /// proportion of the full length, or `None` if this is not a
    /// secant.
    pub secant: Option<f64>,
    /// The offset applied to a curved base's angle when rotating this
    /// shape as a diacritic. Added for clockwise bases, subtracted for
    /// counterclockwise ones.
    pub secant_curvature_offset: f64,
    /// How many evenly spaced dots to draw along the length, or `None`
    /// for a continuous stroke.
    pub dots: Option<usize>,
    /// The angle before any subantiparallel perturbation, or `None` if
    /// `angle` is original. Kept for length computation and identity;
    /// contexts use the current angle.
    pub original_angle: Option<f64>,
}

impl Default for Line {
    fn default() -> Self {
        Line {
            angle: 0.0,
            minor: false,
            stretchy: false,
            secant: None,
            secant_curvature_offset: 45.0,
            dots: None,
            original_angle: None,
        }
    }
}

impl Line {
    pub fn new(angle: f64) -> Line {
        Line {
            angle,
            ..Default::default()
        }
    }

    pub fn stretchy(angle: f64) -> Line {
        Line {
            angle,
            stretchy: true,
            ..Default::default()
        }
    }

    pub fn dotted(angle: f64, dots: usize) -> Line {
        Line {
            angle,
            dots: Some(dots),
            ..Default::default()
        }
    }

    pub fn name(&self, _size: f64, joining_type: JoiningType) -> String {
        if self.dots.is_some() || (!self.stretchy && joining_type == JoiningType::Orienting) {
            let mut s = format!("{}", self.angle as i64);
            if self.dots.is_some() {
                s.push_str(".dotted");
            }
            s
        } else {
            String::new()
        }
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new("line")
            .with_f(self.angle)
            .with(self.stretchy)
            .with(GroupElt::opt_f(self.secant))
            .with_f(self.secant_curvature_offset)
            .with(GroupElt::Opt(
                self.dots.map(|d| Box::new(GroupElt::Int(d as i64))),
            ))
            .with(GroupElt::opt_f(
                self.original_angle.filter(|&a| a != self.angle),
            ))
    }

    pub fn hub_priority(&self, size: f64) -> i8 {
        if self.dots.is_some() {
            0
        } else if self.secant.is_some() {
            -1
        } else if normalize(self.angle) % 180.0 == 0.0 {
            2
        } else if size >= 1.0 {
            0
        } else {
            -1
        }
    }

    /// The length of the stroke. A stretchy line's size refers to its
    /// vertical extent, so its length is derived trigonometrically.
    pub fn length(&self, size: f64) -> f64 {
        let denominator = if self.stretchy {
            let angle = self.original_angle.unwrap_or(self.angle);
            let d = angle.to_radians().sin().abs();
            if d < EPSILON {
                1.0
            } else {
                d
            }
        } else {
            1.0
        };
        (LINE_FACTOR * size / denominator).floor()
    }

    pub fn max_tree_width(&self, size: f64) -> usize {
        if size == 2.0 && self.secant.is_none() {
            2
        } else {
            1
        }
    }

    pub fn can_be_child(&self) -> bool {
        self.secant.is_none() && self.dots.is_none()
    }

    pub fn max_double_marks(&self, size: f64, mark_anchors: &[&str]) -> usize {
        if self.secant.is_some()
            || mark_anchors
                .iter()
                .any(|a| [anchors::RELATIVE_1, anchors::RELATIVE_2, anchors::MIDDLE].contains(a))
        {
            return 0;
        }
        ((self.length(size) / (250.0 * 0.45)) as usize).saturating_sub(1)
    }

    pub fn is_shadable(&self) -> bool {
        self.dots.is_none()
    }

    pub fn draw(&self, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<kurbo::Rect> {
        let end_y = 0.0;
        let mut length = self.length(args.size);
        glyph.move_to((0.0, 0.0).into());
        if let Some(dots) = self.dots {
            let dot_interval = length / (dots - 1) as f64;
            glyph.line_to((0.0, 0.0).into());
            for dot_index in 1..dots {
                glyph.end_path();
                glyph.move_to((dot_interval * dot_index as f64, 0.0).into());
                glyph.line_to((dot_interval * dot_index as f64, 0.0).into());
            }
        } else {
            glyph.line_to((length, 0.0).into());
        }
        if let Some(anchor) = args.anchor {
            if args.joining_type == JoiningType::Orienting
                || normalize(self.angle) % 180.0 == 0.0
                || ![anchors::ABOVE, anchors::BELOW].contains(&anchor)
            {
                length *= self.secant.unwrap_or(0.5);
            } else if (anchor == anchors::ABOVE) == (self.angle < 180.0) {
                length = 0.0;
            }
            glyph.add_anchor_point(anchor, AnchorKind::Mark, length, end_y);
        } else if let Some(secant) = self.secant {
            glyph.add_anchor_point(
                anchors::CONTINUING_OVERLAP,
                AnchorKind::Exit,
                length * secant,
                end_y,
            );
            glyph.add_anchor_point(
                anchors::PRE_HUB_CONTINUING_OVERLAP,
                AnchorKind::Exit,
                length * secant,
                end_y,
            );
        } else {
            if args.joining_type != JoiningType::NonJoining {
                let max_tree_width = self.max_tree_width(args.size);
                let child_interval = length / (max_tree_width + 2) as f64;
                for child in 0..2 {
                    for child_index in 0..max_tree_width {
                        glyph.add_anchor_point(
                            anchors::CHILD_EDGES[child][child_index],
                            AnchorKind::Base,
                            child_interval * (child_index + 2) as f64,
                            0.0,
                        );
                    }
                }
                glyph.add_anchor_point(anchors::PARENT_EDGE, AnchorKind::Mark, child_interval, 0.0);
                glyph.add_anchor_point(
                    anchors::CONTINUING_OVERLAP,
                    AnchorKind::Entry,
                    child_interval,
                    0.0,
                );
                glyph.add_anchor_point(
                    anchors::CONTINUING_OVERLAP,
                    AnchorKind::Exit,
                    child_interval * (max_tree_width + 1) as f64,
                    0.0,
                );
                glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, 0.0, 0.0);
                glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, length, end_y);
                glyph.add_anchor_point(
                    anchors::POST_HUB_CONTINUING_OVERLAP,
                    AnchorKind::Entry,
                    child_interval,
                    0.0,
                );
                if self.hub_priority(args.size) != -1 {
                    glyph.add_anchor_point(anchors::POST_HUB_CURSIVE, AnchorKind::Entry, 0.0, 0.0);
                }
                if self.hub_priority(args.size) != 0 {
                    glyph.add_anchor_point(anchors::PRE_HUB_CURSIVE, AnchorKind::Exit, length, end_y);
                }
                glyph.add_anchor_point(
                    anchors::SECANT,
                    AnchorKind::Base,
                    child_interval * (max_tree_width + 1) as f64,
                    0.0,
                );
            }
            if args.size == 2.0 && 0.0 < self.angle && self.angle <= 45.0 {
                // Special case for U+1BC18 DUPLOYAN LETTER RH
                glyph.add_anchor_point(
                    anchors::RELATIVE_1,
                    AnchorKind::Base,
                    length / 2.0 - (args.light_line + args.stroke_gap),
                    -(args.stroke_width + Dot::SCALAR * args.light_line) / 2.0,
                );
                glyph.add_anchor_point(
                    anchors::RELATIVE_2,
                    AnchorKind::Base,
                    length / 2.0 + args.light_line + args.stroke_gap,
                    -(args.stroke_width + Dot::SCALAR * args.light_line) / 2.0,
                );
            } else {
                glyph.add_anchor_point(
                    anchors::RELATIVE_1,
                    AnchorKind::Base,
                    length / 2.0,
                    (args.stroke_width + Dot::SCALAR * args.light_line) / 2.0,
                );
                glyph.add_anchor_point(
                    anchors::RELATIVE_2,
                    AnchorKind::Base,
                    length / 2.0,
                    -(args.stroke_width + Dot::SCALAR * args.light_line) / 2.0,
                );
            }
            glyph.add_anchor_point(anchors::MIDDLE, AnchorKind::Base, length / 2.0, 0.0);
        }
        glyph.transform(Affine::rotate(self.angle.to_radians()));
        glyph.stroke(args.stroke_width);
        if args.anchor.is_none() || self.secant.is_some() {
            let bbox = glyph.bounding_box().unwrap_or_default();
            let x_center = (bbox.min_x() + bbox.max_x()) / 2.0;
            glyph.add_anchor_point(
                anchors::ABOVE,
                AnchorKind::Base,
                x_center,
                bbox.max_y() + args.stroke_width / 2.0 + 2.0 * args.stroke_gap + args.light_line / 2.0,
            );
            glyph.add_anchor_point(
                anchors::BELOW,
                AnchorKind::Base,
                x_center,
                bbox.min_y() - (args.stroke_width / 2.0 + 2.0 * args.stroke_gap + args.light_line / 2.0),
            );
            if let Some(secant) = self.secant {
                if normalize(self.angle) % 90.0 == 0.0 {
                    let y_offset = 2.0 * LINE_FACTOR * (2.0 * secant - 1.0);
                    let dy = if normalize(self.guideline_angle()) % 180.0 == 90.0 {
                        y_offset + args.stroke_width / 2.0
                    } else {
                        -y_offset - LINE_FACTOR + args.stroke_width / 2.0
                    };
                    glyph.transform(Affine::translate((0.0, dy)));
                }
            }
        }
        None
    }

    pub fn fixed_y(&self) -> bool {
        self.secant.is_some() && normalize(self.angle) % 90.0 == 0.0
    }

    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Shape {
        if self.secant.is_some() {
            if !context_out.is_none() {
                return Shape::Line(self.rotate_diacritic(context_out));
            }
        } else if self.stretchy {
            if *context_out == Context::new(self.angle) {
                let tick_angle = if 90.0 < self.angle && self.angle <= 270.0 {
                    normalize(self.angle + 90.0)
                } else {
                    normalize(self.angle - 90.0)
                };
                return Shape::Complex(Complex::new(vec![
                    Instruction::component(1.0, Shape::Line(self.clone())),
                    Instruction::Component(Component {
                        scale: 0.2,
                        shape: Shape::Line(Line::new(tick_angle)),
                        skip_drawing: false,
                        tick: true,
                    }),
                    Instruction::Context(ContextFn::set_angle(self.angle)),
                ]));
            }
        } else if let Some(angle) = context_in.angle {
            return Shape::Line(Line {
                angle,
                ..self.clone()
            });
        }
        Shape::Line(self.clone())
    }

    pub fn context_in(&self) -> Context {
        Context {
            angle: Some(self.angle),
            minor: self.minor,
            ..Context::NONE
        }
    }

    pub fn context_out(&self) -> Context {
        self.context_in()
    }

    /// Rotates this shape, as a diacritic, to sit against a base whose
    /// context is `context`, keeping at least a minimum separation
    /// between the two angles.
    pub fn rotate_diacritic(&self, context: &Context) -> Line {
        let mut angle = context.angle.expect("diacritic context must have an angle");
        if self.secant.is_some() {
            let minimum_da = match context.clockwise {
                None => 30.0,
                Some(clockwise) => {
                    angle -= self.secant_curvature_offset * if clockwise { 1.0 } else { -1.0 };
                    if context.ignorable_for_topography {
                        0.0
                    } else {
                        45.0
                    }
                }
            };
            let mut da = normalize(self.angle) % 180.0 - normalize(angle) % 180.0;
            if da > 90.0 {
                da -= 180.0;
            } else if da < -90.0 {
                da += 180.0;
            }
            if da.abs() >= minimum_da {
                return self.clone();
            }
            let mut new_da = if da > 0.0 {
                minimum_da - da
            } else {
                -minimum_da - da
            };
            let ltr = 90.0 < normalize(self.angle) % 180.0;
            let rtl = normalize(self.angle) % 180.0 < 90.0;
            let new_ltr = 90.0 < normalize(self.angle + new_da) % 180.0;
            let new_rtl = normalize(self.angle + new_da) % 180.0 < 90.0;
            if ltr != new_ltr && rtl != new_rtl {
                new_da = if da > 0.0 { -minimum_da } else { minimum_da };
            }
            angle = normalize(self.angle + new_da);
        }
        Line {
            angle: normalize(angle),
            ..self.clone()
        }
    }

    pub fn calculate_diacritic_angles(&self) -> Vec<(&'static str, f64)> {
        let angle = normalize(self.angle) % 180.0;
        vec![
            (anchors::RELATIVE_1, angle),
            (anchors::RELATIVE_2, angle),
            (anchors::MIDDLE, (angle + 90.0) % 180.0),
            (anchors::SECANT, angle),
        ]
    }

    /// The same line with the opposite angle.
    pub fn as_reversed(&self) -> Line {
        Line {
            angle: normalize(self.angle + 180.0),
            ..self.clone()
        }
    }

    /// The angle of the dotted guideline a secant is displayed on.
    pub fn guideline_angle(&self) -> f64 {
        if (45.0..135.0).contains(&(normalize(self.angle + 90.0) % 180.0)) {
            270.0
        } else {
            0.0
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertical_line_length() {
        assert_eq!(Line::new(90.0).length(1.0), 500.0);
        assert_eq!(Line::stretchy(90.0).length(1.0), 500.0);
        // A stretchy diagonal keeps its vertical extent.
        let length = Line::stretchy(60.0).length(1.0);
        assert!((length - 500.0 / (60.0f64).to_radians().sin()).abs() <= 1.0);
    }

    #[test]
    fn nonstretchy_line_adopts_incoming_angle() {
        let line = Line::new(90.0);
        let contextualized = line.contextualize(&Context::new(45.0), &Context::NONE);
        match contextualized {
            Shape::Line(l) => assert_eq!(l.angle, 45.0),
            other => panic!("expected a line, got {other:?}"),
        }
    }

    #[test]
    fn stretchy_line_grows_terminal_tick_before_parallel() {
        let line = Line::stretchy(90.0);
        let contextualized = line.contextualize(&Context::NONE, &Context::new(90.0));
        assert!(matches!(contextualized, Shape::Complex(_)));
    }

    #[test]
    fn no_context_is_identity() {
        let line = Line::stretchy(270.0);
        let contextualized = line.contextualize(&Context::NONE, &Context::NONE);
        assert_eq!(contextualized, Shape::Line(line));
    }

    #[test]
    fn secant_rotates_against_base() {
        let secant = Line {
            angle: 30.0,
            secant: Some(0.5),
            ..Default::default()
        };
        // Against a parallel straight base, the secant must rotate away.
        let rotated = secant.rotate_diacritic(&Context::new(30.0));
        let mut da = normalize(rotated.angle) % 180.0 - 30.0;
        if da > 90.0 {
            da -= 180.0;
        } else if da < -90.0 {
            da += 180.0;
        }
        assert!(da.abs() >= 30.0 - EPSILON, "angle {} too close", rotated.angle);
    }

    #[test]
    fn guideline_angles() {
        assert_eq!(
            Line {
                angle: 90.0,
                secant: Some(0.5),
                ..Default::default()
            }
            .guideline_angle(),
            0.0
        );
        assert_eq!(
            Line {
                angle: 0.0,
                secant: Some(0.5),
                ..Default::default()
            }
            .guideline_angle(),
            270.0
        );
    }
}
