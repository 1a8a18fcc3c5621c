//! Shapes built out of other shapes.

use indexmap::IndexMap;
use kurbo::{Affine, Point, Rect};

use crate::anchors;
use crate::context::Context;
use crate::geometry::normalize;
use crate::glyphs::{AnchorKind, GlyphBuilder};
use crate::shapes::{Component, DrawArgs, Instruction, Shape};
use crate::util::{GroupElt, GroupKey, JoiningType};

/// The anchor points collected from component shapes, keyed by anchor
/// name and kind. An anchor point is singular if no other point in the
/// same component shares its key.
pub type SingularAnchorPoints = IndexMap<(String, AnchorKind), Vec<Point>>;

/// A shape built out of other shapes.
///
/// The components are drawn in order and connected end to end by their
/// cursive anchor points. A context instruction modifies the entry
/// context seen by the following component.
#[derive(Clone, Debug, PartialEq)]
pub struct Complex {
    pub instructions: Vec<Instruction>,
    /// Degrees to rotate the finished glyph counterclockwise, as the
    /// final step of drawing.
    pub rotation: f64,
}

impl Complex {
    pub fn new(instructions: Vec<Instruction>) -> Complex {
        Complex {
            instructions,
            rotation: 0.0,
        }
    }

    pub fn rotated(instructions: Vec<Instruction>, rotation: f64) -> Complex {
        Complex {
            instructions,
            rotation,
        }
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.instructions.iter().filter_map(|op| match op {
            Instruction::Component(c) => Some(c),
            Instruction::Context(_) => None,
        })
    }

    pub fn has_tick(&self) -> bool {
        self.components().any(|c| c.tick)
    }

    pub fn name(&self, size: f64, joining_type: JoiningType) -> String {
        if self.rotation != 0.0 {
            return format!("{}", self.rotation as i64);
        }
        if self.has_tick() {
            return "tick".to_string();
        }
        if joining_type != JoiningType::Orienting {
            return String::new();
        }
        let mut components = self.components();
        let mut op = components.next().expect("a complex must have a component");
        if matches!(&op.shape, Shape::Circle(_))
            || matches!(&op.shape, Shape::Curve(c) if c.reversed_circle != 0.0)
        {
            op = components.next().expect("a complex must have a second component");
        }
        op.shape.name(size, joining_type)
    }

    pub fn group(&self) -> GroupKey {
        let mut key = GroupKey::new("complex");
        for op in &self.instructions {
            key = match op {
                Instruction::Context(f) => key.nested(f.group()),
                Instruction::Component(c) => key.nested(
                    GroupKey::new("op")
                        .with_f(c.scale)
                        .nested(c.shape.group())
                        .with(c.skip_drawing)
                        .with(c.tick),
                ),
            };
        }
        key.with(GroupElt::f(self.rotation))
    }

    /// The index of the main component, if exactly one component
    /// determines how phases should treat this shape.
    pub fn base_index(&self) -> Option<usize> {
        let mut base_index = None;
        for (i, op) in self.instructions.iter().enumerate() {
            if let Instruction::Component(c) = op {
                if c.tick {
                    break;
                }
                if base_index.is_none() {
                    base_index = Some(i);
                } else {
                    return None;
                }
            }
        }
        base_index
    }

    pub fn base_shape(&self) -> Option<&Shape> {
        self.base_index().map(|i| match &self.instructions[i] {
            Instruction::Component(c) => &c.shape,
            Instruction::Context(_) => unreachable!(),
        })
    }

    pub fn can_take_secant(&self) -> bool {
        self.base_shape().is_some_and(|shape| shape.can_take_secant())
    }

    pub fn hub_priority(&self, size: f64) -> i8 {
        let first = self
            .components()
            .find(|c| !c.shape.invisible())
            .expect("a complex must have a visible component");
        first.shape.hub_priority(first.scale * size)
    }

    /// Draws the components into `glyph`, connecting them end to end,
    /// and collects each component's singular anchor points.
    ///
    /// A tick component freezes the effective bounding box first: ticks
    /// and anything after them are optical details that repositioning
    /// should ignore.
    pub fn draw_to_proxy(
        &self,
        glyph: &mut GlyphBuilder,
        args: &DrawArgs,
    ) -> (Option<Rect>, SingularAnchorPoints) {
        let mut singular_anchor_points = SingularAnchorPoints::default();
        let mut effective_bounding_box = None;
        for op in &self.instructions {
            let Instruction::Component(component) = op else {
                continue;
            };
            if component.tick && effective_bounding_box.is_none() {
                effective_bounding_box = Some(glyph.bounding_box().unwrap_or(Rect::ZERO));
            }
            let mut proxy = GlyphBuilder::new();
            component.shape.draw(
                &mut proxy,
                &DrawArgs {
                    stroke_width: if component.tick {
                        args.light_line
                    } else {
                        args.stroke_width
                    },
                    light_line: args.light_line,
                    stroke_gap: args.stroke_gap,
                    size: component.scale * if component.tick { 1.0 } else { args.size },
                    anchor: None,
                    joining_type: JoiningType::Joining,
                    initial_circle_diphthong: false,
                    final_circle_diphthong: false,
                    diphthong_1: false,
                    diphthong_2: false,
                },
            );
            let this_entry = proxy
                .anchor(anchors::CURSIVE, AnchorKind::Entry)
                .expect("every component must have exactly one cursive entry point");
            if let Some(exits) =
                singular_anchor_points.get(&(anchors::CURSIVE.to_string(), AnchorKind::Exit))
            {
                let last = *exits.last().unwrap();
                proxy.transform(Affine::translate((last.x - this_entry.x, last.y - this_entry.y)));
            }
            collect_singular_anchor_points(
                &mut singular_anchor_points,
                &proxy,
                effective_bounding_box.is_some(),
            );
            if !component.skip_drawing {
                glyph.merge(proxy);
            }
        }
        (effective_bounding_box, singular_anchor_points)
    }

    /// Whether the cursive entry point is based on the first singular
    /// cursive entry point, as opposed to the last.
    pub fn enter_on_first_path(&self) -> bool {
        true
    }

    pub fn draw(&self, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<Rect> {
        let (effective_bounding_box, singular_anchor_points) = self.draw_to_proxy(glyph, args);
        self.finish_draw(glyph, args, effective_bounding_box, singular_anchor_points, self.enter_on_first_path())
    }

    /// The common tail of drawing: cursive anchors, propagated singular
    /// anchors, rotation, and mark positioning.
    pub fn finish_draw(
        &self,
        glyph: &mut GlyphBuilder,
        args: &DrawArgs,
        effective_bounding_box: Option<Rect>,
        singular_anchor_points: SingularAnchorPoints,
        enter_on_first_path: bool,
    ) -> Option<Rect> {
        glyph.remove_overlap();
        if args.anchor.is_none() && args.joining_type != JoiningType::NonJoining {
            let entries = &singular_anchor_points[&(anchors::CURSIVE.to_string(), AnchorKind::Entry)];
            let entry = if enter_on_first_path {
                entries[0]
            } else {
                *entries.last().unwrap()
            };
            let exit = *singular_anchor_points[&(anchors::CURSIVE.to_string(), AnchorKind::Exit)]
                .last()
                .unwrap();
            glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, entry.x, entry.y);
            glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, exit.x, exit.y);
            if self.hub_priority(args.size) != -1 {
                glyph.add_anchor_point(anchors::POST_HUB_CURSIVE, AnchorKind::Entry, entry.x, entry.y);
            }
            if self.hub_priority(args.size) != 0 {
                glyph.add_anchor_point(anchors::PRE_HUB_CURSIVE, AnchorKind::Exit, exit.x, exit.y);
            }
        }
        if args.anchor.is_none() {
            let child_edge_anchors: Vec<&str> = anchors::CHILD_EDGES.iter().flatten().copied().collect();
            for ((name, kind), points) in &singular_anchor_points {
                let name = name.as_str();
                let in_special = [
                    anchors::MIDDLE,
                    anchors::PRE_HUB_CONTINUING_OVERLAP,
                    anchors::POST_HUB_CONTINUING_OVERLAP,
                    anchors::PRE_HUB_CURSIVE,
                    anchors::POST_HUB_CURSIVE,
                ]
                .contains(&name);
                let keep_as_mark = if in_special {
                    points.len() == 1
                } else {
                    anchors::ALL_MARK.contains(&name)
                        && ![anchors::ABOVE, anchors::BELOW].contains(&name)
                };
                let keep = keep_as_mark
                    || (self.can_be_child(args.size)
                        && (name == anchors::PARENT_EDGE
                            || ([anchors::CONTINUING_OVERLAP, anchors::POST_HUB_CONTINUING_OVERLAP]
                                .contains(&name)
                                && *kind == AnchorKind::Entry)))
                    || (self.max_tree_width(args.size) > 0
                        && (name == anchors::CONTINUING_OVERLAP && *kind == AnchorKind::Exit
                            || child_edge_anchors.contains(&name)));
                if keep {
                    let p = points.last().unwrap();
                    glyph.add_anchor_point(name, *kind, p.x, p.y);
                }
            }
        }
        glyph.transform(Affine::rotate(self.rotation.to_radians()));
        let bbox = glyph.bounding_box().unwrap_or_default();
        let x_center = (bbox.min_x() + bbox.max_x()) / 2.0;
        let y_center = (bbox.min_y() + bbox.max_y()) / 2.0;
        match args.anchor {
            Some(anchors::MIDDLE) => {
                glyph.add_anchor_point(anchors::MIDDLE, AnchorKind::Mark, x_center, y_center);
            }
            Some(anchors::ABOVE) => {
                glyph.add_anchor_point(
                    anchors::ABOVE,
                    AnchorKind::Mark,
                    x_center,
                    bbox.min_y() + args.stroke_width / 2.0,
                );
                glyph.add_anchor_point(
                    anchors::mkmk(anchors::ABOVE),
                    AnchorKind::Basemark,
                    x_center,
                    bbox.max_y() + args.stroke_width / 2.0 + args.stroke_gap + args.light_line / 2.0,
                );
            }
            Some(anchors::BELOW) => {
                glyph.add_anchor_point(
                    anchors::BELOW,
                    AnchorKind::Mark,
                    x_center,
                    bbox.max_y() - args.stroke_width / 2.0,
                );
                glyph.add_anchor_point(
                    anchors::mkmk(anchors::BELOW),
                    AnchorKind::Basemark,
                    x_center,
                    bbox.min_y() - (args.stroke_width / 2.0 + args.stroke_gap + args.light_line / 2.0),
                );
            }
            _ => {}
        }
        effective_bounding_box
    }

    pub fn fixed_y(&self) -> bool {
        self.components()
            .next()
            .is_some_and(|c| c.shape.invisible())
    }

    pub fn can_be_child(&self, size: f64) -> bool {
        let Some(base_index) = self.base_index() else {
            return false;
        };
        let Instruction::Component(base_op) = &self.instructions[base_index] else {
            unreachable!();
        };
        base_op.shape.can_be_child(base_op.scale * size)
    }

    pub fn max_tree_width(&self, size: f64) -> usize {
        for op in self.instructions.iter().rev() {
            if let Instruction::Component(c) = op {
                if !c.tick {
                    return c.shape.max_tree_width(c.scale * size);
                }
            }
        }
        0
    }

    pub fn max_double_marks(&self, size: f64, mark_anchors: &[&str]) -> usize {
        let bases: Vec<&Component> = self.components().filter(|c| !c.tick).collect();
        if bases.len() != 1 {
            return 0;
        }
        bases[0]
            .shape
            .max_double_marks(bases[0].scale * size, mark_anchors)
    }

    pub fn is_shadable(&self) -> bool {
        self.components().all(|c| c.shape.is_shadable())
    }

    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Complex {
        let mut instructions = Vec::with_capacity(self.instructions.len());
        let initial = context_in.is_none();
        let mut context_in = *context_in;
        let mut context_out = *context_out;
        let mut forced_context: Option<Context> = None;
        for (i, op) in self.instructions.iter().enumerate() {
            match op {
                Instruction::Context(f) => {
                    let mut fc = f.apply(if initial { &context_out } else { &context_in });
                    fc.ignorable_for_topography = false;
                    forced_context = Some(fc);
                    instructions.push(op.clone());
                }
                Instruction::Component(c) => {
                    let mut component = c.shape.contextualize(&context_in, &context_out);
                    assert!(
                        matches!(component, Shape::Circle(_) | Shape::Curve(_) | Shape::Line(_)),
                        "complex components contextualize to circles, curves, or lines",
                    );
                    if i > 0 && initial {
                        component = component.as_reversed();
                    }
                    if let Some(fc) = forced_context {
                        component = apply_forced_context(component, &fc, initial);
                    }
                    if initial {
                        context_out = component.context_in();
                    } else {
                        context_in = component.context_out();
                    }
                    if let Some(fc) = forced_context.take() {
                        if cfg!(debug_assertions) {
                            let mut actual = if initial {
                                component.context_out()
                            } else {
                                component.context_in()
                            };
                            if fc.clockwise.is_none() {
                                actual.clockwise = None;
                            }
                            debug_assert_eq!(actual, fc);
                        }
                    }
                    instructions.push(Instruction::Component(Component {
                        shape: component,
                        ..c.clone()
                    }));
                }
            }
        }
        if initial {
            instructions.reverse();
        }
        Complex {
            instructions,
            rotation: self.rotation,
        }
    }

    pub fn context_in(&self) -> Context {
        self.components()
            .next()
            .expect("a complex must have a component")
            .shape
            .context_in()
    }

    pub fn context_out(&self) -> Context {
        self.instructions
            .iter()
            .rev()
            .find_map(|op| match op {
                Instruction::Component(c) => Some(c),
                Instruction::Context(_) => None,
            })
            .expect("a complex must have a component")
            .shape
            .context_out()
    }

    pub fn calculate_diacritic_angles(&self) -> Vec<(&'static str, f64)> {
        self.base_shape()
            .map(|shape| shape.calculate_diacritic_angles())
            .unwrap_or_default()
    }

    /// Rotates this shape as a diacritic against a base context.
    pub fn rotate_diacritic(&self, context: &Context) -> Complex {
        Complex {
            instructions: self.instructions.clone(),
            rotation: context.angle.expect("diacritic context must have an angle"),
        }
    }
}

fn collect_singular_anchor_points(
    singular_anchor_points: &mut SingularAnchorPoints,
    proxy: &GlyphBuilder,
    past_effective_bounding_box: bool,
) {
    let mut counts: IndexMap<(String, AnchorKind), (Point, usize)> = IndexMap::new();
    for anchor in &proxy.anchor_points {
        let entry = counts
            .entry((anchor.name.clone(), anchor.kind))
            .or_insert((anchor.point(), 0));
        entry.0 = anchor.point();
        entry.1 += 1;
    }
    for ((name, kind), (point, count)) in counts {
        if count == 1 && !(past_effective_bounding_box && name != anchors::CURSIVE) {
            singular_anchor_points.entry((name, kind)).or_default().push(point);
        }
    }
}

/// Rewrites a contextualized component so its free end matches a
/// context function's output.
fn apply_forced_context(component: Shape, forced_context: &Context, initial: bool) -> Shape {
    match component {
        Shape::Line(line) => {
            if !forced_context.is_none() {
                let angle = forced_context.angle.expect("forced context must have an angle");
                Shape::Line(crate::shapes::line::Line { angle, ..line })
            } else {
                Shape::Line(line)
            }
        }
        curvy => {
            let mut curvy = curvy;
            if let Some(forced_clockwise) = forced_context.clockwise {
                if forced_clockwise != curvy.clockwise().expect("component must be curved") {
                    curvy = curvy.as_reversed();
                }
            }
            let (angle_in, angle_out, clockwise) = match &curvy {
                Shape::Curve(c) => (c.angle_in, c.angle_out, c.clockwise),
                Shape::Circle(c) => (c.angle_in, c.angle_out, c.clockwise),
                _ => unreachable!(),
            };
            if !forced_context.is_none() {
                let forced_angle = forced_context.angle.expect("forced context must have an angle");
                let free_angle = if initial { angle_out } else { angle_in };
                if forced_angle != free_angle {
                    let mut unwrapped_angle_out = angle_out;
                    if clockwise && unwrapped_angle_out > angle_in {
                        unwrapped_angle_out -= 360.0;
                    } else if !clockwise && unwrapped_angle_out < angle_in {
                        unwrapped_angle_out += 360.0;
                    }
                    let da = unwrapped_angle_out - angle_in;
                    let (new_in, new_out) = if initial {
                        (normalize(forced_angle - da), forced_angle)
                    } else {
                        (forced_angle, normalize(forced_angle + da))
                    };
                    curvy = match curvy {
                        Shape::Curve(c) => Shape::Curve(crate::shapes::curve::Curve {
                            angle_in: new_in,
                            angle_out: new_out,
                            ..c
                        }),
                        Shape::Circle(c) => Shape::Circle(crate::shapes::circle::Circle {
                            angle_in: new_in,
                            angle_out: new_out,
                            ..c
                        }),
                        _ => unreachable!(),
                    };
                }
            }
            curvy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::curve::Curve;
    use crate::shapes::line::Line;

    fn two_curve_complex() -> Complex {
        Complex::new(vec![
            Instruction::component(1.0, Shape::Curve(Curve::new(0.0, 90.0, false))),
            Instruction::component(1.0, Shape::Curve(Curve::new(90.0, 180.0, false))),
        ])
    }

    #[test]
    fn context_threads_through_components() {
        let complex = two_curve_complex();
        assert_eq!(complex.context_in().angle, Some(0.0));
        assert_eq!(complex.context_out().angle, Some(180.0));
    }

    #[test]
    fn base_index_ignores_ticks() {
        let complex = Complex::new(vec![
            Instruction::component(1.0, Shape::Line(Line::new(90.0))),
            Instruction::Component(Component {
                scale: 0.2,
                shape: Shape::Line(Line::new(0.0)),
                skip_drawing: false,
                tick: true,
            }),
        ]);
        assert_eq!(complex.base_index(), Some(0));
        assert!(complex.has_tick());
    }

    #[test]
    fn drawn_complex_chains_cursive_points() {
        let complex = two_curve_complex();
        let mut glyph = GlyphBuilder::new();
        complex.draw(&mut glyph, &DrawArgs::plain(2.0));
        assert!(glyph.anchor(anchors::CURSIVE, AnchorKind::Entry).is_some());
        assert!(glyph.anchor(anchors::CURSIVE, AnchorKind::Exit).is_some());
    }

    #[test]
    fn group_distinguishes_instruction_lists() {
        let a = two_curve_complex();
        let b = Complex::new(vec![Instruction::component(
            1.0,
            Shape::Curve(Curve::new(0.0, 90.0, false)),
        )]);
        assert_ne!(a.group(), b.group());
        assert_eq!(a.group(), two_curve_complex().group());
    }
}
