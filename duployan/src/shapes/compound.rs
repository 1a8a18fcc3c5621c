//! Compound letters with bespoke contextualization.

use kurbo::{Affine, Point, Rect};

use crate::anchors;
use crate::context::Context;
use crate::geometry::{in_degree_range, normalize, rect_deg};
use crate::glyphs::{AnchorKind, GlyphBuilder};
use crate::shapes::{Component, ContextFn, DrawArgs, Instruction, Shape};
use crate::util::{EPSILON, GroupKey, JoiningType};

use super::circle::{Circle, CircleRole};
use super::complex::{Complex, SingularAnchorPoints};
use super::curve::{Curve, StretchAxis};

/// U+1BC5B DUPLOYAN LETTER OU: a circle with a small inner curve whose
/// geometry branches on position in the orienting sequence.
#[derive(Clone, Debug, PartialEq)]
pub struct Ou {
    pub base: Complex,
    pub role: CircleRole,
    pub initial: bool,
    pub angled_against_next: bool,
    pub isolated: bool,
}

impl Ou {
    pub fn new(instructions: Vec<Instruction>) -> Ou {
        Ou {
            base: Complex::new(instructions),
            role: CircleRole::Independent,
            initial: false,
            angled_against_next: false,
            isolated: true,
        }
    }

    fn circle_op(&self) -> &Component {
        match &self.base.instructions[0] {
            Instruction::Component(c) => c,
            Instruction::Context(_) => panic!("an ou must start with its circle component"),
        }
    }

    fn circle_angles(&self) -> (f64, f64, bool) {
        match &self.circle_op().shape {
            Shape::Circle(c) => (c.angle_in, c.angle_out, c.clockwise),
            Shape::Curve(c) => (c.angle_in, c.angle_out, c.clockwise),
            other => panic!("an ou's first component must be circular, not {other:?}"),
        }
    }

    fn circle_is_reversed(&self) -> bool {
        match &self.circle_op().shape {
            Shape::Circle(c) => c.reversed,
            Shape::Curve(c) => c.reversed_circle != 0.0,
            _ => false,
        }
    }

    pub fn name(&self, size: f64, joining_type: JoiningType) -> String {
        if self.role == CircleRole::Independent && self.isolated {
            return String::new();
        }
        let mut rv = match &self.circle_op().shape {
            Shape::Circle(c) => format!(
                "{}{}{}",
                c.angle_in as i64,
                if c.clockwise { 'n' } else { 'p' },
                c.angle_out as i64,
            ),
            shape => shape.name(size, joining_type),
        };
        if self.role == CircleRole::Leader && !self.isolated {
            rv.push_str(".cusp");
        }
        if self.initial {
            rv.push_str(".init");
        }
        if self.isolated {
            rv.push_str(".isol");
        }
        rv
    }

    pub fn group(&self) -> GroupKey {
        let (angle_in, _, _) = self.circle_angles();
        GroupKey::new("ou")
            .nested(self.base.group())
            .with_f(angle_in)
            .with(match self.role {
                CircleRole::Independent => "ind",
                CircleRole::Leader => "lead",
                CircleRole::Dependent => "dep",
            })
            .with(self.initial)
            .with(self.isolated)
            .with(self.angled_against_next && self.circle_is_reversed())
    }

    pub fn draw(&self, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<Rect> {
        if self.base.instructions.len() != 1 {
            return self.base.draw(glyph, args);
        }
        let inner_curve_da = 125.0;
        let outer_rewind_da = -35.0;
        let angle_against_next = 90.0;
        let circle_op = self.circle_op().clone();
        let inner_curve_size = 5.0 / 9.0 * circle_op.scale;
        let inner_curve_stretch = 0.3;
        let (mut angle_in, mut angle_out, mut clockwise) = self.circle_angles();
        let clockwise_sign = if clockwise { -1.0 } else { 1.0 };
        let component = |scale: f64, shape: Shape| {
            Instruction::Component(Component {
                scale,
                shape,
                skip_drawing: false,
                tick: false,
            })
        };
        let replace = |shape: Shape| {
            Instruction::Component(Component {
                shape,
                ..circle_op.clone()
            })
        };
        let stretched = |mut curve: Curve| {
            curve.stretch = inner_curve_stretch;
            curve.long = true;
            curve
        };
        let instructions: Vec<Instruction> = if self.role == CircleRole::Leader {
            if self.isolated {
                let intermediate_angle = normalize(angle_out + clockwise_sign * inner_curve_da);
                vec![
                    component(
                        inner_curve_size,
                        Shape::Curve(Curve::new(angle_out, intermediate_angle, clockwise)),
                    ),
                    replace(Shape::Circle(Circle::new(intermediate_angle, angle_out, clockwise))),
                ]
            } else if self.initial {
                let intermediate_angle = normalize(angle_out + clockwise_sign * inner_curve_da);
                vec![
                    component(
                        inner_curve_size,
                        Shape::Curve(Curve::new(angle_out, intermediate_angle, clockwise)),
                    ),
                    replace(Shape::Curve(Curve::new(intermediate_angle, angle_out, clockwise))),
                ]
            } else {
                let intermediate_angle = normalize(angle_in - clockwise_sign * inner_curve_da);
                vec![
                    replace(Shape::Curve(Curve::new(angle_in, intermediate_angle, clockwise))),
                    component(
                        inner_curve_size,
                        Shape::Curve(Curve::new(intermediate_angle, angle_in, clockwise)),
                    ),
                ]
            }
        } else if self.initial {
            vec![
                component(
                    inner_curve_size,
                    Shape::Curve(stretched(Curve::new(
                        angle_out - clockwise_sign * inner_curve_da,
                        angle_out,
                        clockwise,
                    ))),
                ),
                replace(Shape::Circle(Circle::new(angle_out, angle_out, clockwise))),
            ]
        } else if self.angled_against_next && self.circle_is_reversed() {
            angle_out = normalize(angle_out - clockwise_sign * angle_against_next);
            let intermediate_angle = normalize(angle_out - clockwise_sign * inner_curve_da);
            let mut inner = stretched(Curve::new(intermediate_angle, angle_out, clockwise));
            inner.stretch_axis = StretchAxis::AngleOut;
            vec![
                replace(Shape::Circle(Circle::new(angle_in, intermediate_angle, clockwise))),
                component(inner_curve_size, Shape::Curve(inner)),
            ]
        } else if angle_in != angle_out {
            let outer: Shape = if self.role == CircleRole::Independent {
                Shape::Curve(Curve::new(angle_in, angle_out, clockwise))
            } else {
                Shape::Circle(Circle::new(angle_in, angle_out, clockwise))
            };
            let mut inner = Curve::new(
                angle_out,
                normalize(angle_out + clockwise_sign * inner_curve_da),
                clockwise,
            );
            if self.role != CircleRole::Independent {
                inner.stretch = inner_curve_stretch;
            }
            inner.long = true;
            inner.stretch_axis = StretchAxis::AngleOut;
            vec![replace(outer), component(inner_curve_size, Shape::Curve(inner))]
        } else if self.isolated {
            let intermediate_angle = normalize(270.0 - clockwise_sign * inner_curve_da - 180.0);
            angle_in = normalize(intermediate_angle - clockwise_sign * outer_rewind_da - 180.0);
            clockwise = !clockwise;
            vec![
                component(
                    inner_curve_size,
                    Shape::Curve(stretched(Curve::new(
                        intermediate_angle + clockwise_sign * inner_curve_da,
                        intermediate_angle,
                        clockwise,
                    ))),
                ),
                replace(Shape::Circle(Circle::new(intermediate_angle, angle_in, clockwise))),
            ]
        } else {
            let mut inner = stretched(Curve::new(
                angle_in,
                normalize(angle_in + clockwise_sign * inner_curve_da),
                clockwise,
            ));
            inner.stretch_axis = StretchAxis::AngleOut;
            vec![
                replace(Shape::Circle(Circle::new(angle_in, angle_in, clockwise))),
                component(inner_curve_size, Shape::Curve(inner)),
            ]
        };
        Ou {
            base: Complex::new(instructions),
            ..self.clone()
        }
        .draw(glyph, args)
    }

    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Shape {
        let contextualized = Ou {
            base: self.base.contextualize(context_in, context_out),
            ..self.clone()
        };
        let (_, _, new_clockwise) = contextualized.circle_angles();
        if self.role == CircleRole::Leader {
            if let Shape::Circle(original_circle) = &self.circle_op().shape {
                if original_circle.clockwise != new_clockwise {
                    let rereversed = Ou {
                        base: Complex::new(vec![Instruction::Component(Component {
                            shape: Shape::Circle(Circle {
                                reversed: !original_circle.reversed,
                                ..original_circle.clone()
                            }),
                            ..self.circle_op().clone()
                        })]),
                        role: CircleRole::Independent,
                        ..self.clone()
                    };
                    let Shape::Ou(recontextualized) = rereversed.contextualize(context_in, context_out)
                    else {
                        unreachable!("an ou contextualizes to an ou");
                    };
                    return Shape::Ou(Ou {
                        role: CircleRole::Leader,
                        ..recontextualized
                    });
                }
            }
        }
        let (_, circle_angle_out, _) = contextualized.circle_angles();
        Shape::Ou(Ou {
            initial: context_in.is_none(),
            angled_against_next: context_out.angle.is_some()
                && context_in.angle.is_some()
                && context_in.angle != context_out.angle
                && context_out.angle != Some(circle_angle_out),
            isolated: false,
            ..contextualized
        })
    }

    pub fn context_in(&self) -> Context {
        if self.initial {
            let rv = self.base.context_out();
            let angle = rv.angle.expect("an ou has an exit angle");
            Context {
                angle: Some(normalize(angle + 180.0)),
                ou: true,
                ..rv
            }
        } else {
            self.base.context_in()
        }
    }

    pub fn context_out(&self) -> Context {
        if self.isolated {
            self.base.context_out()
        } else {
            let rv = self.context_in();
            let angle = rv.angle.expect("an ou has an entry angle");
            Context {
                angle: Some(normalize(angle + 180.0)),
                ou: true,
                ..rv
            }
        }
    }

    /// Drawn in the opposite direction; the outer circle looks the
    /// same.
    pub fn as_reversed(&self) -> Ou {
        Ou {
            base: Complex::new(
                self.base
                    .instructions
                    .iter()
                    .map(|op| match op {
                        Instruction::Component(c) => Instruction::Component(Component {
                            shape: c.shape.as_reversed(),
                            ..c.clone()
                        }),
                        Instruction::Context(f) => Instruction::Context(f.clone()),
                    })
                    .collect(),
            ),
            ..self.clone()
        }
    }
}

/// A circled circle in the style of U+1BC5C DUPLOYAN LETTER WA.
///
/// The components cross at a shared point rather than chaining
/// cursively, except in initial position.
#[derive(Clone, Debug, PartialEq)]
pub struct Wa {
    pub base: Complex,
    pub initial: bool,
}

impl Wa {
    pub fn new(instructions: Vec<Instruction>) -> Wa {
        Wa {
            base: Complex::new(instructions),
            initial: false,
        }
    }

    fn components(&self) -> Vec<&Component> {
        self.base.components().collect()
    }

    pub fn draw(&self, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<Rect> {
        if self.initial {
            return self.base.draw(glyph, args);
        }
        let mut singular_anchor_points = SingularAnchorPoints::default();
        let mut last_crossing_point: Option<Point> = None;
        for component in self.components() {
            let mut proxy = GlyphBuilder::new();
            component.shape.draw(
                &mut proxy,
                &DrawArgs {
                    stroke_width: if component.tick {
                        args.light_line
                    } else {
                        args.stroke_width
                    },
                    size: component.scale * if component.tick { 1.0 } else { args.size },
                    anchor: None,
                    joining_type: JoiningType::Joining,
                    initial_circle_diphthong: false,
                    final_circle_diphthong: false,
                    diphthong_1: false,
                    diphthong_2: false,
                    ..*args
                },
            );
            let this_crossing_point = crossing_point(&proxy, &component.shape);
            if let Some(last) = last_crossing_point {
                proxy.transform(Affine::translate((
                    last.x - this_crossing_point.x,
                    last.y - this_crossing_point.y,
                )));
            }
            last_crossing_point = Some(this_crossing_point);
            collect_singular(&mut singular_anchor_points, &proxy);
            if !component.skip_drawing {
                glyph.merge(proxy);
            }
        }
        self.base
            .finish_draw(glyph, args, None, singular_anchor_points, false)
    }

    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Shape {
        let context_in = Context {
            ignorable_for_topography: false,
            ..*context_in
        };
        let context_out = Context {
            ignorable_for_topography: false,
            ..*context_out
        };
        let original: Vec<Component> = self.components().into_iter().cloned().collect();
        if context_in.is_none() && !context_out.is_none() {
            let context_out_angle = context_out.angle.expect("context must have an angle");
            let outer_circle_op = original.first().unwrap();
            let inner_circle_op = original.last().unwrap();
            let Shape::Circle(inner_circle) = &inner_circle_op.shape else {
                panic!("a wa's last component must be a circle");
            };
            let inner_curve = inner_circle
                .contextualize(&outer_circle_op.shape.context_out(), &context_out);
            let minimum_da = 180.0;
            let instructions: Vec<Instruction> = match &inner_curve {
                Shape::Curve(curve)
                    if curve.clockwise == inner_circle.clockwise
                        && normalize(curve.da()) >= minimum_da =>
                {
                    original[..original.len() - 1]
                        .iter()
                        .map(|op| Instruction::Component(op.clone()))
                        .chain([Instruction::Component(Component {
                            shape: inner_curve.clone(),
                            ..inner_circle_op.clone()
                        })])
                        .collect()
                }
                _ => {
                    let rewound = normalize(context_out_angle - minimum_da);
                    original[..original.len() - 1]
                        .iter()
                        .map(|op| {
                            Instruction::Component(Component {
                                shape: with_circle_angles(&op.shape, rewound, rewound),
                                ..op.clone()
                            })
                        })
                        .chain([Instruction::Component(Component {
                            shape: Shape::Curve(Curve::new(
                                rewound,
                                context_out_angle,
                                inner_circle.clockwise,
                            )),
                            ..inner_circle_op.clone()
                        })])
                        .collect()
                }
            };
            return Shape::Wa(Wa {
                base: Complex::new(instructions),
                initial: true,
            });
        }
        if !context_in.is_none() && !context_out.is_none() {
            let has_reversed_circle = original
                .iter()
                .any(|op| matches!(&op.shape, Shape::Circle(c) if c.reversed));
            if context_in.angle != context_out.angle && has_reversed_circle {
                let context_out_angle = context_out.angle.expect("context must have an angle");
                let outer_circle_op = &original[0];
                let Shape::Circle(outer_circle) = &outer_circle_op.shape else {
                    panic!("a wa's first component must be a circle");
                };
                let inner_circle_op = original.last().unwrap();
                let tracer = inner_circle_op.shape.contextualize(&context_in, &context_out);
                let tracer_clockwise = tracer.clockwise().expect("a contextualized circle is curved");
                let clockwise_sign = if tracer_clockwise { -1.0 } else { 1.0 };
                let mut new_outer_angle_out = normalize(outer_circle.angle_in + clockwise_sign * 270.0);
                let mut new_inner_circle = Curve::new(
                    new_outer_angle_out,
                    context_out_angle,
                    tracer_clockwise,
                );
                new_inner_circle.stretch = outer_circle.stretch;
                let new_new_outer_angle_out = normalize(context_out_angle - 180.0);
                if normalize((new_inner_circle.angle_out - new_inner_circle.angle_in) * clockwise_sign)
                    < 180.0
                    && normalize((new_new_outer_angle_out - outer_circle.angle_in) * clockwise_sign)
                        >= 180.0
                {
                    new_outer_angle_out = new_new_outer_angle_out;
                    new_inner_circle.angle_in = new_outer_angle_out;
                }
                let Shape::Circle(inner_circle) = &inner_circle_op.shape else {
                    panic!("a wa's last component must be a circle");
                };
                assert!(
                    outer_circle.stretch == 0.0 && inner_circle.stretch == 0.0,
                    "stretched reversed wa is not supported",
                );
                let mut outer_curve = Curve::new(
                    outer_circle.angle_in,
                    new_outer_angle_out,
                    tracer_clockwise,
                );
                outer_curve.stretch = outer_circle.stretch;
                outer_curve.reversed_circle =
                    (outer_circle_op.scale - inner_circle_op.scale) / outer_circle_op.scale;
                return Shape::Complex(Complex::new(
                    [Instruction::Component(Component {
                        shape: Shape::Curve(outer_curve),
                        ..outer_circle_op.clone()
                    })]
                    .into_iter()
                    .chain(original[1..original.len() - 1].iter().map(|op| {
                        Instruction::Component(Component {
                            shape: with_circle_angles_and_clockwise(
                                &op.shape,
                                new_outer_angle_out,
                                new_outer_angle_out,
                                tracer_clockwise,
                            ),
                            ..op.clone()
                        })
                    }))
                    .chain([Instruction::Component(Component {
                        shape: Shape::Curve(new_inner_circle),
                        ..inner_circle_op.clone()
                    })])
                    .collect(),
                ));
            }
            let inner_circle = original
                .last()
                .unwrap()
                .shape
                .contextualize(&context_in, &context_out);
            let (inner_angle_in, inner_clockwise) = match &inner_circle {
                Shape::Circle(c) => (c.angle_in, c.clockwise),
                Shape::Curve(c) => (c.angle_in, c.clockwise),
                other => panic!("unexpected contextualized circle {other:?}"),
            };
            return Shape::Complex(Complex::new(
                original[..original.len() - 1]
                    .iter()
                    .map(|op| {
                        Instruction::Component(Component {
                            shape: with_circle_angles_and_clockwise(
                                &op.shape,
                                inner_angle_in,
                                inner_angle_in,
                                inner_clockwise,
                            ),
                            ..op.clone()
                        })
                    })
                    .chain([Instruction::Component(Component {
                        shape: inner_circle,
                        ..original.last().unwrap().clone()
                    })])
                    .collect(),
            ));
        }
        Shape::Wa(Wa {
            base: Complex::new(
                original
                    .iter()
                    .map(|op| {
                        Instruction::Component(Component {
                            shape: op.shape.contextualize(&context_in, &context_out),
                            ..op.clone()
                        })
                    })
                    .collect(),
            ),
            initial: self.initial,
        })
    }

    pub fn as_reversed(&self) -> Wa {
        Wa {
            base: Complex::new(
                self.base
                    .instructions
                    .iter()
                    .map(|op| match op {
                        Instruction::Component(c) => Instruction::Component(Component {
                            shape: c.shape.as_reversed(),
                            ..c.clone()
                        }),
                        Instruction::Context(f) => Instruction::Context(f.clone()),
                    })
                    .collect(),
            ),
            initial: self.initial,
        }
    }
}

/// A circled sequence of curves in the style of U+1BC5E DUPLOYAN
/// LETTER WI.
#[derive(Clone, Debug, PartialEq)]
pub struct Wi {
    pub base: Complex,
}

impl Wi {
    const CURVE_BIAS: f64 = 50.0;

    pub fn new(instructions: Vec<Instruction>) -> Wi {
        Wi {
            base: Complex::new(instructions),
        }
    }

    fn has_only_one_curve(&self) -> bool {
        self.base.components().count() == 2
    }

    fn first_curve_index(&self) -> usize {
        self.base
            .instructions
            .iter()
            .position(|op| {
                matches!(op, Instruction::Component(c) if !matches!(c.shape, Shape::Circle(_)))
            })
            .expect("a wi must contain a curve")
    }

    /// In some initial or medial contexts a single-curve wi would look
    /// like a wa; biasing the curve's exit angle disambiguates it.
    fn contextualize_with_curve_bias(&self, context_out: &Context) -> Option<Complex> {
        let mut bias = Self::CURVE_BIAS;
        let context_out_angle = context_out.angle?;
        if !self.has_only_one_curve() {
            return None;
        }
        let first_curve_index = self.first_curve_index();
        let Instruction::Component(curve_op) = &self.base.instructions[first_curve_index] else {
            unreachable!();
        };
        let Shape::Curve(curve) = &curve_op.shape else {
            panic!("a wi's non-circle component must be a curve");
        };
        let clockwise_sign = if curve.clockwise { -1.0 } else { 1.0 };
        if in_degree_range(
            context_out_angle,
            normalize(curve.angle_out - bias * clockwise_sign),
            normalize(curve.angle_out + bias * clockwise_sign),
            curve.clockwise,
        ) {
            if in_degree_range(
                context_out_angle,
                normalize(curve.angle_out + bias / 2.0 * clockwise_sign),
                normalize(curve.angle_out + bias * clockwise_sign),
                curve.clockwise,
            ) {
                bias = -bias;
            }
            let biased = Curve {
                angle_out: normalize(curve.angle_out + bias * clockwise_sign),
                ..curve.clone()
            };
            return Some(Complex::new(vec![
                self.base.instructions[first_curve_index - 1].clone(),
                Instruction::Component(Component {
                    shape: Shape::Curve(biased),
                    ..curve_op.clone()
                }),
            ]));
        }
        None
    }

    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Shape {
        if self.first_curve_index() == 1 {
            return Shape::Wi(Wi {
                base: self.base.contextualize(context_in, context_out),
            });
        }
        let curve_path = self.contextualize_with_curve_bias(context_out);
        if context_in.is_none() && !context_out.is_none() {
            return match curve_path {
                None => Shape::Wi(self.clone()),
                Some(curve_path) => Shape::Wi(Wi {
                    base: Complex::new(
                        [self.base.instructions[0].clone()]
                            .into_iter()
                            .chain(curve_path.instructions)
                            .collect(),
                    ),
                }),
            };
        }
        let curve_path = curve_path.unwrap_or_else(|| {
            Complex::new(self.base.instructions[self.first_curve_index() - 1..].to_vec())
                .contextualize(context_in, context_out)
        });
        let Instruction::Component(circle_op) = &self.base.instructions[0] else {
            panic!("a wi must start with its circle component");
        };
        let Shape::Circle(circle) = &circle_op.shape else {
            panic!("a wi must start with its circle component");
        };
        let Instruction::Component(curve_op) = &curve_path.instructions[1] else {
            panic!("a contextualized wi curve path must have a curve component");
        };
        let Shape::Curve(curve) = &curve_op.shape else {
            panic!("a contextualized wi curve path must have a curve component");
        };
        let circle_path = Circle {
            angle_in: curve.angle_in,
            angle_out: curve.angle_in,
            clockwise: curve.clockwise,
            ..circle.clone()
        };
        Shape::Wi(Wi {
            base: Complex::new(
                [Instruction::Component(Component {
                    shape: Shape::Circle(circle_path),
                    ..circle_op.clone()
                })]
                .into_iter()
                .chain(curve_path.instructions)
                .collect(),
            ),
        })
    }

    /// Drawn in the opposite direction; the outer circle looks the
    /// same.
    pub fn as_reversed(&self) -> Wi {
        let mut first_context_fn = true;
        Wi {
            base: Complex::new(
                self.base
                    .instructions
                    .iter()
                    .map(|op| match op {
                        Instruction::Context(f) => {
                            if first_context_fn {
                                first_context_fn = false;
                                Instruction::Context(ContextFn::FlipClockwiseAfter(Box::new(
                                    f.clone(),
                                )))
                            } else {
                                Instruction::Context(f.clone())
                            }
                        }
                        Instruction::Component(c) => Instruction::Component(Component {
                            shape: match &c.shape {
                                Shape::Circle(circle) => Shape::Circle(Circle {
                                    angle_in: normalize(circle.angle_in + 180.0),
                                    angle_out: normalize(circle.angle_out + 180.0),
                                    clockwise: !circle.clockwise,
                                    ..circle.clone()
                                }),
                                Shape::Curve(curve) => Shape::Curve(Curve {
                                    angle_in: normalize(curve.angle_in + 180.0),
                                    angle_out: normalize(curve.angle_out + 180.0),
                                    clockwise: !curve.clockwise,
                                    ..curve.clone()
                                }),
                                other => other.clone(),
                            },
                            ..c.clone()
                        }),
                    })
                    .collect(),
            ),
        }
    }
}

/// U+1BC7C DUPLOYAN AFFIX ATTACHED TANGENT HOOK.
#[derive(Clone, Debug, PartialEq)]
pub struct TangentHook {
    pub base: Complex,
    pub initial: bool,
}

impl TangentHook {
    /// The context override for a non-initial tangent hook.
    pub fn override_noninitial(c: &Context) -> Context {
        let angle = c.angle.expect("a tangent hook needs an angled context");
        let steep = 90.0 < angle && angle < 315.0;
        Context::with_clockwise(
            normalize(if steep { angle - 90.0 } else { angle + 90.0 }),
            !steep,
        )
    }

    /// The context override for an initial tangent hook.
    pub fn override_initial(c: &Context) -> Context {
        let angle = c.angle.expect("a tangent hook needs an angled context");
        let steep = 90.0 < angle && angle < 315.0;
        Context::with_clockwise(
            normalize(if steep { angle - 90.0 } else { angle + 90.0 }),
            steep,
        )
    }

    pub fn new(instructions: Vec<Instruction>) -> TangentHook {
        Self::with_initial(instructions, false)
    }

    fn with_initial(instructions: Vec<Instruction>, initial: bool) -> TangentHook {
        let rest = instructions
            .into_iter()
            .skip_while(|op| matches!(op, Instruction::Context(_)));
        let override_fn = if initial {
            ContextFn::TangentHookInitial
        } else {
            ContextFn::TangentHookNoninitial
        };
        TangentHook {
            base: Complex::new(
                [Instruction::Context(override_fn)].into_iter().chain(rest).collect(),
            ),
            initial,
        }
    }

    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Shape {
        let base = if context_in.is_none() && !context_out.is_none() && !self.initial {
            let get_curve = |i: usize| -> (&Component, &Curve) {
                let Instruction::Component(op) = &self.base.instructions[i] else {
                    panic!("a tangent hook's instruction {i} must be a component");
                };
                let Shape::Curve(curve) = &op.shape else {
                    panic!("a tangent hook's instruction {i} must be a curve");
                };
                (op, curve)
            };
            let (op_1, curve_1) = get_curve(1);
            let (op_3, curve_3) = get_curve(3);
            let rebuilt = vec![
                Instruction::Component(Component {
                    shape: Shape::Curve(Curve {
                        angle_in: curve_1.angle_in,
                        angle_out: normalize(curve_1.angle_out + 180.0),
                        clockwise: !curve_1.clockwise,
                        ..curve_1.clone()
                    }),
                    ..op_1.clone()
                }),
                self.base.instructions[2].clone(),
                Instruction::Component(Component {
                    shape: Shape::Curve(Curve {
                        angle_in: curve_3.angle_out,
                        angle_out: normalize(curve_3.angle_out + 180.0),
                        clockwise: !curve_3.clockwise,
                        ..curve_3.clone()
                    }),
                    ..op_3.clone()
                }),
            ];
            TangentHook::with_initial(rebuilt, true)
        } else {
            self.clone()
        };
        Shape::TangentHook(TangentHook {
            base: base.base.contextualize(context_in, context_out),
            initial: base.initial,
        })
    }
}

/// A separate affix: a pseudo-cursive mark-like letter positioned above
/// or below the baseline with entry and exit at its bounding box edges.
#[derive(Clone, Debug, PartialEq)]
pub struct SeparateAffix {
    pub base: Complex,
    pub low: bool,
    /// "Tight" swaps the entry and exit sides. The representative code
    /// chart glyphs do not match the primary sources here.
    pub tight: bool,
}

impl SeparateAffix {
    pub fn new(instructions: Vec<Instruction>) -> SeparateAffix {
        SeparateAffix {
            base: Complex::new(instructions),
            low: false,
            tight: false,
        }
    }

    pub fn group(&self) -> GroupKey {
        GroupKey::new("separate_affix")
            .nested(self.base.group())
            .with(self.low)
            .with(self.tight)
    }

    pub fn draw(&self, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<Rect> {
        let effective_bounding_box = self.base.draw(glyph, args);
        glyph.anchor_points.clear();
        let bbox = glyph.bounding_box().unwrap_or_default();
        let cursive_y = if self.low {
            bbox.max_y() + 200.0
        } else {
            bbox.min_y() - 200.0
        };
        let (entry_x, exit_x) = if self.tight {
            (bbox.max_x(), bbox.min_x())
        } else {
            (bbox.min_x(), bbox.max_x())
        };
        glyph.transform(Affine::translate((0.0, -cursive_y)));
        glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, entry_x, 0.0);
        glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, exit_x, 0.0);
        effective_bounding_box
    }
}

/// Post-processes a drawn X shape: it joins pseudo-cursively at its
/// geometric center.
pub fn recenter_x_shape(glyph: &mut GlyphBuilder) {
    glyph
        .anchor_points
        .retain(|a| a.name != anchors::CURSIVE);
    let bbox = glyph.bounding_box().unwrap_or_default();
    let x_avg = (bbox.min_x() + bbox.max_x()) / 2.0;
    let y_avg = (bbox.min_y() + bbox.max_y()) / 2.0;
    glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, x_avg, y_avg);
    glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, x_avg, y_avg);
    glyph.add_anchor_point(anchors::POST_HUB_CURSIVE, AnchorKind::Entry, x_avg, y_avg);
}

/// U+1BC56 DUPLOYAN LETTER ROMANIAN U contextualizes like a plain
/// circle when it has neighbors on both sides.
pub fn romanian_u_contextualize(
    base: &Complex,
    context_in: &Context,
    context_out: &Context,
) -> Shape {
    if context_in.is_none() || context_out.is_none() {
        Shape::RomanianU(base.contextualize(context_in, context_out))
    } else {
        Circle::new(0.0, 0.0, false).contextualize(context_in, context_out)
    }
}

/// Draws a Romanian U, whose first relative anchor tracks the cursive
/// exit.
pub fn romanian_u_draw(base: &Complex, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<Rect> {
    let (effective_bounding_box, mut singular_anchor_points) = base.draw_to_proxy(glyph, args);
    let exits = singular_anchor_points
        .get(&(anchors::CURSIVE.to_string(), AnchorKind::Exit))
        .cloned()
        .unwrap_or_default();
    singular_anchor_points.insert((anchors::RELATIVE_1.to_string(), AnchorKind::Base), exits);
    base.finish_draw(
        glyph,
        args,
        effective_bounding_box,
        singular_anchor_points,
        base.enter_on_first_path(),
    )
}

fn collect_singular(singular_anchor_points: &mut SingularAnchorPoints, proxy: &GlyphBuilder) {
    let mut counts: indexmap::IndexMap<(String, AnchorKind), (Point, usize)> =
        indexmap::IndexMap::new();
    for anchor in &proxy.anchor_points {
        let entry = counts
            .entry((anchor.name.clone(), anchor.kind))
            .or_insert((anchor.point(), 0));
        entry.0 = anchor.point();
        entry.1 += 1;
    }
    for ((name, kind), (point, count)) in counts {
        if count == 1 {
            singular_anchor_points.entry((name, kind)).or_default().push(point);
        }
    }
}

/// The point where rays extending from a drawn circle or curve's entry
/// and exit would cross.
fn crossing_point(proxy: &GlyphBuilder, component: &Shape) -> Point {
    let entry = proxy
        .anchor(anchors::CURSIVE, AnchorKind::Entry)
        .expect("component must have a cursive entry point");
    let (angle_in, angle_out) = match component {
        Shape::Circle(c) => (c.angle_in, c.angle_out),
        Shape::Curve(c) => (c.angle_in, c.angle_out),
        other => panic!("crossing points only exist for circles and curves, not {other:?}"),
    };
    if angle_in == angle_out {
        return entry;
    }
    let exit = proxy
        .anchor(anchors::CURSIVE, AnchorKind::Exit)
        .expect("component must have a cursive exit point");
    if matches!(component, Shape::Circle(_)) {
        let rel1 = proxy
            .anchor(anchors::RELATIVE_1, AnchorKind::Base)
            .expect("a drawn circle must have a first relative anchor");
        let rel2 = proxy
            .anchor(anchors::RELATIVE_2, AnchorKind::Base)
            .expect("a drawn circle must have a second relative anchor");
        let r = (entry.y - rel1.y).hypot(entry.x - rel1.x);
        let theta = (rel2.y - rel1.y).atan2(rel2.x - rel1.x);
        return rect_deg(r, theta.to_degrees());
    }
    let (asx, asy) = (entry.x, entry.y);
    let (bsx, bsy) = (exit.x, exit.y);
    let adx = angle_in.to_radians().cos();
    let ady = angle_in.to_radians().sin();
    let bdx = angle_out.to_radians().cos();
    let bdy = angle_out.to_radians().sin();
    let dx = bsx - asx;
    let dy = bsy - asy;
    let det = bdx * ady - bdy * adx;
    if det.abs() < EPSILON {
        return Point::ZERO;
    }
    let u = (dy * bdx - dx * bdy) / det;
    Point::new(asx + adx * u, asy + ady * u)
}

fn with_circle_angles(shape: &Shape, angle_in: f64, angle_out: f64) -> Shape {
    match shape {
        Shape::Circle(c) => Shape::Circle(Circle {
            angle_in,
            angle_out,
            ..c.clone()
        }),
        Shape::Curve(c) => Shape::Curve(Curve {
            angle_in,
            angle_out,
            ..c.clone()
        }),
        other => panic!("expected a circular shape, got {other:?}"),
    }
}

fn with_circle_angles_and_clockwise(
    shape: &Shape,
    angle_in: f64,
    angle_out: f64,
    clockwise: bool,
) -> Shape {
    match shape {
        Shape::Circle(c) => Shape::Circle(Circle {
            angle_in,
            angle_out,
            clockwise,
            ..c.clone()
        }),
        Shape::Curve(c) => Shape::Curve(Curve {
            angle_in,
            angle_out,
            clockwise,
            ..c.clone()
        }),
        other => panic!("expected a circular shape, got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic_ou() -> Ou {
        Ou::new(vec![Instruction::component(
            2.0,
            Shape::Circle(Circle::new(0.0, 0.0, false)),
        )])
    }

    #[test]
    fn ou_contexts_are_cusps() {
        let ou = Ou {
            initial: true,
            isolated: false,
            ..basic_ou()
        };
        let context_in = ou.context_in();
        let context_out = ou.context_out();
        assert!(context_in.ou);
        assert!(context_out.ou);
        assert_eq!(
            context_in.angle.map(|a| normalize(a + 180.0)),
            context_out.angle
        );
    }

    #[test]
    fn contextualized_ou_tracks_position() {
        let ou = basic_ou();
        match ou.contextualize(&Context::NONE, &Context::new(270.0)) {
            Shape::Ou(contextualized) => {
                assert!(contextualized.initial);
                assert!(!contextualized.isolated);
            }
            other => panic!("expected an ou, got {other:?}"),
        }
    }

    #[test]
    fn tangent_hook_overrides() {
        let c = TangentHook::override_noninitial(&Context::new(180.0));
        assert_eq!(c.angle, Some(90.0));
        assert_eq!(c.clockwise, Some(false));
        let c = TangentHook::override_noninitial(&Context::new(0.0));
        assert_eq!(c.angle, Some(90.0));
        assert_eq!(c.clockwise, Some(true));
        let c = TangentHook::override_initial(&Context::new(180.0));
        assert_eq!(c.clockwise, Some(true));
    }

    #[test]
    fn separate_affix_repositions_cursive_points() {
        use crate::shapes::line::Line;
        let affix = SeparateAffix::new(vec![Instruction::component(
            0.5,
            Shape::Line(Line::new(0.0)),
        )]);
        let mut glyph = GlyphBuilder::new();
        affix.draw(&mut glyph, &DrawArgs::plain(1.0));
        let entry = glyph.anchor(anchors::CURSIVE, AnchorKind::Entry).unwrap();
        let exit = glyph.anchor(anchors::CURSIVE, AnchorKind::Exit).unwrap();
        assert_eq!(entry.y, 0.0);
        assert_eq!(exit.y, 0.0);
        assert!(entry.x < exit.x);
        // High affixes hang above the baseline.
        assert!(glyph.bounding_box().unwrap().min_y() > 0.0);
    }
}
