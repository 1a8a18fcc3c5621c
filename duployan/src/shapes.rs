//! The shape algebra.
//!
//! Shapes are a closed family: every operation dispatches on the
//! variant in one place, so adding a variant forces every operation to
//! consider it.

use kurbo::Rect;

use crate::anchors;
use crate::context::Context;
use crate::glyphs::{AnchorKind, GlyphBuilder};
use crate::util::{FloatKey, GlyphClass, GroupKey, JoiningType};

pub mod circle;
pub mod complex;
pub mod compound;
pub mod curve;
pub mod line;
pub mod markers;

pub use circle::{Circle, CircleRole};
pub use complex::Complex;
pub use compound::{Ou, SeparateAffix, TangentHook, Wa, Wi};
pub use curve::{Curve, StretchAxis};
pub use line::Line;
pub use markers::{ContextMarker, Digit, DigitKind, DigitStatus, Dot, Edge, Hub, Space, WidthNumber};

/// Everything a shape needs to know to draw itself.
#[derive(Clone, Copy, Debug)]
pub struct DrawArgs<'a> {
    /// The diameter of the circular nib the skeleton is stroked with.
    pub stroke_width: f64,
    /// The width of a light line, for ticks and dotted guidelines.
    pub light_line: f64,
    /// The minimum distance between two different strokes.
    pub stroke_gap: f64,
    pub size: f64,
    /// The anchor to generate mark anchor points for, if drawing a
    /// mark.
    pub anchor: Option<&'a str>,
    pub joining_type: JoiningType,
    pub initial_circle_diphthong: bool,
    pub final_circle_diphthong: bool,
    pub diphthong_1: bool,
    pub diphthong_2: bool,
}

impl<'a> DrawArgs<'a> {
    /// A plain joining letter at the given size, with the regular
    /// stroke style. Only used in tests.
    pub fn plain(size: f64) -> DrawArgs<'static> {
        DrawArgs {
            stroke_width: crate::util::REGULAR_STROKE_WIDTH,
            light_line: crate::util::REGULAR_LIGHT_LINE,
            stroke_gap: crate::util::MINIMUM_STROKE_GAP,
            size,
            anchor: None,
            joining_type: JoiningType::Joining,
            initial_circle_diphthong: false,
            final_circle_diphthong: false,
            diphthong_1: false,
            diphthong_2: false,
        }
    }
}

/// A modification of the entry context seen by the component that
/// follows it in a [`Complex`].
#[derive(Clone, Debug, PartialEq)]
pub enum ContextFn {
    /// Clones the context with a fixed angle.
    SetAngle(FloatKey),
    /// The tangent-hook override for initial position.
    TangentHookInitial,
    /// The tangent-hook override for non-initial position.
    TangentHookNoninitial,
    /// Applies the inner function, then flips the turning sense.
    FlipClockwiseAfter(Box<ContextFn>),
}

impl ContextFn {
    pub fn set_angle(angle: f64) -> ContextFn {
        ContextFn::SetAngle(FloatKey(angle))
    }

    pub fn apply(&self, c: &Context) -> Context {
        match self {
            ContextFn::SetAngle(angle) => c.clone_with_angle(angle.0),
            ContextFn::TangentHookInitial => TangentHook::override_initial(c),
            ContextFn::TangentHookNoninitial => TangentHook::override_noninitial(c),
            ContextFn::FlipClockwiseAfter(inner) => {
                let applied = inner.apply(c);
                Context {
                    clockwise: applied.clockwise.map(|clockwise| !clockwise),
                    ..applied
                }
            }
        }
    }

    pub fn group(&self) -> GroupKey {
        match self {
            ContextFn::SetAngle(angle) => GroupKey::new("set_angle").with_f(angle.0),
            ContextFn::TangentHookInitial => GroupKey::new("tangent_hook_initial"),
            ContextFn::TangentHookNoninitial => GroupKey::new("tangent_hook_noninitial"),
            ContextFn::FlipClockwiseAfter(inner) => {
                GroupKey::new("flip_clockwise_after").nested(inner.group())
            }
        }
    }
}

/// One step of a [`Complex`]: a component shape or a context function.
#[derive(Clone, Debug, PartialEq)]
pub enum Instruction {
    Component(Component),
    Context(ContextFn),
}

impl Instruction {
    pub fn component(scale: f64, shape: Shape) -> Instruction {
        Instruction::Component(Component {
            scale,
            shape,
            skip_drawing: false,
            tick: false,
        })
    }
}

/// A shape to include in a [`Complex`].
#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    /// The scalar for the component's size, or its absolute size if
    /// `tick`.
    pub scale: f64,
    pub shape: Shape,
    /// Whether to skip drawing the contours. Anchor points are never
    /// skipped.
    pub skip_drawing: bool,
    /// A tick is drawn with the light line, with an absolute size, and
    /// is excluded from the effective bounding box.
    pub tick: bool,
}

/// The closed family of shapes.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    // Invisible markers.
    ContextMarker(ContextMarker),
    /// A marker representing nothing; simulates glyph deletion.
    Dummy,
    /// The start of a cursively joined sequence.
    Start,
    Hub(Hub),
    /// The end of a cursively joined sequence.
    End,
    /// The carry digit 1 of the width-marker addition.
    Carry,
    EntryWidthDigit(Digit),
    LeftBoundDigit(Digit),
    RightBoundDigit(Digit),
    AnchorWidthDigit(Digit),
    WidthNumber(WidthNumber),
    MarkAnchorSelector { anchor: &'static str },
    GlyphClassSelector(GlyphClass),
    /// A marker inserted after an initial secant.
    InitialSecantMarker,
    /// A marker for a valid U+1BC9D DUPLOYAN THICK LETTER SELECTOR.
    ValidDtls,
    ChildEdge(Edge),
    /// A continuing edge in an overlap tree. `from_character` is true
    /// for a real U+1BCA1 (possibly promoted from U+1BCA0), false for
    /// the marker inserted after an initial secant.
    ContinuingOverlap { from_character: bool },
    ParentEdge(Edge),
    /// A marker for a character that can only be the root of an
    /// overlap tree.
    RootOnlyParentEdge,
    Space(Space),
    /// An invisible combining mark.
    InvisibleMark,
    // Drawable shapes.
    Notdef,
    /// The test-support glyph marking exact rendered bounds.
    Bound,
    Dot(Dot),
    Line(Line),
    Curve(Curve),
    Circle(Circle),
    Complex(Complex),
    /// A sequence of cochiral curves acting as one letter.
    ComplexCurve(Complex),
    /// U+003D EQUALS SIGN.
    EqualsSign(Complex),
    /// A symbol that might overlap but is not cursively joining.
    Grammalogue(Complex),
    /// An invalid U+1BC9D, drawn as a dotted-square error glyph.
    InvalidDtls(Complex),
    /// An invalid overlap control (U+1BCA0 or U+1BCA1).
    InvalidOverlap { continuing: bool, base: Complex },
    /// An invalid step character (U+1BCA2 or U+1BCA3).
    InvalidStep { angle: f64, base: Complex },
    RomanianU(Complex),
    Ou(Ou),
    SeparateAffix(SeparateAffix),
    Wa(Wa),
    Wi(Wi),
    TangentHook(TangentHook),
    /// U+1BC01 DUPLOYAN LETTER X, joining pseudo-cursively at its
    /// center.
    XShape(Complex),
}

impl Shape {
    /// A short tag identifying the variant, used in glyph names and
    /// group keys.
    pub fn variant_name(&self) -> &'static str {
        match self {
            Shape::ContextMarker(_) => "ContextMarker",
            Shape::Dummy => "Dummy",
            Shape::Start => "Start",
            Shape::Hub(_) => "Hub",
            Shape::End => "End",
            Shape::Carry => "Carry",
            Shape::EntryWidthDigit(_) => "EntryWidthDigit",
            Shape::LeftBoundDigit(_) => "LeftBoundDigit",
            Shape::RightBoundDigit(_) => "RightBoundDigit",
            Shape::AnchorWidthDigit(_) => "AnchorWidthDigit",
            Shape::WidthNumber(_) => "WidthNumber",
            Shape::MarkAnchorSelector { .. } => "MarkAnchorSelector",
            Shape::GlyphClassSelector(_) => "GlyphClassSelector",
            Shape::InitialSecantMarker => "InitialSecantMarker",
            Shape::ValidDtls => "ValidDtls",
            Shape::ChildEdge(_) => "ChildEdge",
            Shape::ContinuingOverlap { .. } => "ContinuingOverlap",
            Shape::ParentEdge(_) => "ParentEdge",
            Shape::RootOnlyParentEdge => "RootOnlyParentEdge",
            Shape::Space(_) => "Space",
            Shape::InvisibleMark => "InvisibleMark",
            Shape::Notdef => "Notdef",
            Shape::Bound => "Bound",
            Shape::Dot(_) => "Dot",
            Shape::Line(_) => "Line",
            Shape::Curve(_) => "Curve",
            Shape::Circle(_) => "Circle",
            Shape::Complex(_) => "Complex",
            Shape::ComplexCurve(_) => "ComplexCurve",
            Shape::EqualsSign(_) => "EqualsSign",
            Shape::Grammalogue(_) => "Grammalogue",
            Shape::InvalidDtls(_) => "InvalidDtls",
            Shape::InvalidOverlap { .. } => "InvalidOverlap",
            Shape::InvalidStep { .. } => "InvalidStep",
            Shape::RomanianU(_) => "RomanianU",
            Shape::Ou(_) => "Ou",
            Shape::SeparateAffix(_) => "SeparateAffix",
            Shape::Wa(_) => "Wa",
            Shape::Wi(_) => "Wi",
            Shape::TangentHook(_) => "TangentHook",
            Shape::XShape(_) => "XShape",
        }
    }

    /// The piece of a glyph name derived from this shape.
    pub fn name(&self, size: f64, joining_type: JoiningType) -> String {
        match self {
            Shape::ContextMarker(cm) => cm.name(),
            Shape::Dummy => String::new(),
            Shape::Start => "START".to_string(),
            Shape::Hub(hub) => hub.name(),
            Shape::End => "END".to_string(),
            Shape::Carry => "c".to_string(),
            Shape::EntryWidthDigit(digit) => digit.name("idx"),
            Shape::LeftBoundDigit(digit) => digit.name("ldx"),
            Shape::RightBoundDigit(digit) => digit.name("rdx"),
            Shape::AnchorWidthDigit(digit) => digit.name("adx"),
            Shape::WidthNumber(wn) => wn.name(),
            Shape::MarkAnchorSelector { anchor } => format!("anchor.{anchor}"),
            Shape::GlyphClassSelector(gc) => format!("gc.{}", gc.name()),
            Shape::InitialSecantMarker => "SECANT".to_string(),
            Shape::ValidDtls => String::new(),
            Shape::ChildEdge(edge) => edge.child_name(),
            Shape::ContinuingOverlap { .. } => String::new(),
            Shape::ParentEdge(edge) => edge.parent_name(),
            Shape::RootOnlyParentEdge => "pe".to_string(),
            Shape::Space(space) => space.name(size),
            Shape::InvisibleMark => String::new(),
            Shape::Notdef => "notdef".to_string(),
            Shape::Bound => String::new(),
            Shape::Dot(dot) => format!("{}", dot.size_exponent as i64),
            Shape::Line(line) => line.name(size, joining_type),
            Shape::Curve(curve) => curve.name(size, joining_type),
            Shape::Circle(circle) => circle.name(size, joining_type),
            Shape::Ou(ou) => ou.name(size, joining_type),
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::EqualsSign(base)
            | Shape::Grammalogue(base)
            | Shape::InvalidDtls(base)
            | Shape::InvalidOverlap { base, .. }
            | Shape::InvalidStep { base, .. }
            | Shape::RomanianU(base)
            | Shape::XShape(base) => base.name(size, joining_type),
            Shape::SeparateAffix(affix) => affix.base.name(size, joining_type),
            Shape::Wa(wa) => wa.base.name(size, joining_type),
            Shape::Wi(wi) => wi.base.name(size, joining_type),
            Shape::TangentHook(th) => th.base.name(size, joining_type),
        }
    }

    /// Whether [`Shape::name`] already identifies which variant this
    /// is, so the glyph name need not repeat it.
    pub fn name_implies_type(&self) -> bool {
        matches!(
            self,
            Shape::ContextMarker(_)
                | Shape::Dummy
                | Shape::Start
                | Shape::Hub(_)
                | Shape::End
                | Shape::Carry
                | Shape::EntryWidthDigit(_)
                | Shape::LeftBoundDigit(_)
                | Shape::RightBoundDigit(_)
                | Shape::AnchorWidthDigit(_)
                | Shape::WidthNumber(_)
                | Shape::MarkAnchorSelector { .. }
                | Shape::GlyphClassSelector(_)
                | Shape::InitialSecantMarker
                | Shape::ValidDtls
                | Shape::ParentEdge(_)
                | Shape::RootOnlyParentEdge
                | Shape::Notdef
        )
    }

    /// The identity used for deduplication.
    pub fn group(&self) -> GroupKey {
        let tag = GroupKey::new(self.variant_name());
        match self {
            Shape::ContextMarker(cm) => cm.group(),
            Shape::Hub(hub) => tag.with(hub.priority as i64).with(hub.initial_secant),
            Shape::EntryWidthDigit(digit)
            | Shape::LeftBoundDigit(digit)
            | Shape::RightBoundDigit(digit)
            | Shape::AnchorWidthDigit(digit) => tag
                .with(digit.place as i64)
                .with(digit.digit)
                .with(match digit.status {
                    DigitStatus::Normal => "normal",
                    DigitStatus::AlmostDone => "almost_done",
                    DigitStatus::Done => "done",
                }),
            Shape::WidthNumber(wn) => tag.with(wn.name()),
            Shape::MarkAnchorSelector { anchor } => tag.with(*anchor),
            Shape::GlyphClassSelector(gc) => tag.with(gc.name()),
            Shape::ChildEdge(edge) => tag.with(edge.child_name()),
            Shape::ContinuingOverlap { from_character } => tag.with(*from_character),
            Shape::ParentEdge(edge) => tag.with(edge.parent_name()),
            Shape::Space(space) => space.group(),
            Shape::Dot(dot) => dot.group(),
            Shape::Line(line) => line.group(),
            Shape::Curve(curve) => curve.group(),
            Shape::Circle(circle) => circle.group(),
            Shape::Ou(ou) => ou.group(),
            Shape::SeparateAffix(affix) => affix.group(),
            Shape::InvalidOverlap { continuing, base } => {
                tag.with(*continuing).nested(base.group())
            }
            Shape::InvalidStep { angle, base } => tag.with_f(*angle).nested(base.group()),
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::EqualsSign(base)
            | Shape::Grammalogue(base)
            | Shape::InvalidDtls(base)
            | Shape::RomanianU(base)
            | Shape::XShape(base) => tag.nested(base.group()),
            Shape::Wa(wa) => tag.nested(wa.base.group()).with(wa.initial),
            Shape::Wi(wi) => tag.nested(wi.base.group()),
            Shape::TangentHook(th) => tag.nested(th.base.group()).with(th.initial),
            Shape::Dummy
            | Shape::Start
            | Shape::End
            | Shape::Carry
            | Shape::InitialSecantMarker
            | Shape::ValidDtls
            | Shape::RootOnlyParentEdge
            | Shape::InvisibleMark
            | Shape::Notdef
            | Shape::Bound => tag,
        }
    }

    /// Whether this shape has no contour points.
    pub fn invisible(&self) -> bool {
        matches!(
            self,
            Shape::ContextMarker(_)
                | Shape::Dummy
                | Shape::Start
                | Shape::Hub(_)
                | Shape::End
                | Shape::Carry
                | Shape::EntryWidthDigit(_)
                | Shape::LeftBoundDigit(_)
                | Shape::RightBoundDigit(_)
                | Shape::AnchorWidthDigit(_)
                | Shape::WidthNumber(_)
                | Shape::MarkAnchorSelector { .. }
                | Shape::GlyphClassSelector(_)
                | Shape::InitialSecantMarker
                | Shape::ValidDtls
                | Shape::ChildEdge(_)
                | Shape::ContinuingOverlap { .. }
                | Shape::ParentEdge(_)
                | Shape::RootOnlyParentEdge
                | Shape::Space(_)
                | Shape::InvisibleMark
        )
    }

    pub fn can_take_secant(&self) -> bool {
        match self {
            Shape::Line(_) | Shape::Curve(_) | Shape::Circle(_) => true,
            Shape::Grammalogue(_) | Shape::SeparateAffix(_) => false,
            Shape::Complex(base) | Shape::ComplexCurve(base) => base.can_take_secant(),
            _ => false,
        }
    }

    /// This shape's hub priority: -1 never sits on the baseline; 0, 1,
    /// 2 are decreasing prominence.
    pub fn hub_priority(&self, size: f64) -> i8 {
        match self {
            Shape::Space(space) => space.hub_priority(),
            Shape::Dot(_) => 2,
            Shape::Line(line) => line.hub_priority(size),
            Shape::Curve(curve) => curve.hub_priority(size),
            Shape::Circle(circle) => circle.hub_priority(size),
            Shape::XShape(_) => 1,
            Shape::SeparateAffix(_) => -1,
            Shape::Ou(ou) => ou.base.hub_priority(size),
            Shape::Wa(wa) => wa.base.hub_priority(size),
            Shape::Wi(wi) => wi.base.hub_priority(size),
            Shape::TangentHook(th) => th.base.hub_priority(size),
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::EqualsSign(base)
            | Shape::Grammalogue(base)
            | Shape::InvalidDtls(base)
            | Shape::InvalidOverlap { base, .. }
            | Shape::InvalidStep { base, .. }
            | Shape::RomanianU(base) => base.hub_priority(size),
            _ if self.invisible() => 0,
            _ => -1,
        }
    }

    /// Draws this shape, adding contours and anchor points.
    ///
    /// Returns the effective bounding box if it overrides the real
    /// bounding box.
    pub fn draw(&self, glyph: &mut GlyphBuilder, args: &DrawArgs) -> Option<Rect> {
        match self {
            Shape::Start => {
                glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, 0.0, 0.0);
                None
            }
            Shape::Hub(hub) => {
                hub.draw(glyph);
                None
            }
            Shape::RightBoundDigit(digit) => {
                if digit.place == 0 && digit.status == DigitStatus::Done {
                    glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, 0.0, 0.0);
                }
                None
            }
            Shape::ChildEdge(edge) => {
                edge.draw_child(glyph);
                None
            }
            Shape::ParentEdge(edge) => {
                edge.draw_parent(glyph);
                None
            }
            Shape::Space(space) => {
                if args.joining_type != JoiningType::NonJoining {
                    glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, 0.0, 0.0);
                    let exit_x = args.size
                        + if space.margins {
                            2.0 * crate::util::DEFAULT_SIDE_BEARING + args.stroke_width
                        } else {
                            0.0
                        };
                    glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, exit_x, 0.0);
                    if space.hub_priority() != -1 {
                        glyph.add_anchor_point(anchors::POST_HUB_CURSIVE, AnchorKind::Entry, 0.0, 0.0);
                    }
                    if space.hub_priority() != 0 {
                        glyph.add_anchor_point(anchors::PRE_HUB_CURSIVE, AnchorKind::Exit, exit_x, 0.0);
                    }
                    glyph.transform(kurbo::Affine::rotate(space.angle.to_radians()));
                }
                None
            }
            Shape::Notdef => {
                let stroke_width = 51.0;
                let half = stroke_width / 2.0;
                glyph.move_to((half, half).into());
                glyph.line_to((half, 663.0 + half).into());
                glyph.line_to((360.0 + half, 663.0 + half).into());
                glyph.line_to((360.0 + half, half).into());
                glyph.line_to((half * 1.9, half).into());
                glyph.end_path();
                glyph.stroke(stroke_width);
                None
            }
            Shape::Bound => {
                let stroke_width = 75.0;
                let half = stroke_width / 2.0;
                glyph.move_to((half, half).into());
                glyph.line_to((half, half).into());
                glyph.end_path();
                glyph.move_to((half, crate::util::CAP_HEIGHT - half).into());
                glyph.line_to((half, crate::util::CAP_HEIGHT - half).into());
                glyph.end_path();
                glyph.stroke(stroke_width);
                None
            }
            Shape::Dot(dot) => {
                glyph.move_to((0.0, 0.0).into());
                glyph.line_to((0.0, 0.0).into());
                glyph.stroke(args.stroke_width * Dot::SCALAR.powf(dot.size_exponent));
                let bbox = glyph.bounding_box().unwrap_or_default();
                let x_center = (bbox.min_x() + bbox.max_x()) / 2.0;
                match args.anchor {
                    None => {
                        if args.joining_type != JoiningType::NonJoining {
                            glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Entry, 0.0, 0.0);
                            glyph.add_anchor_point(anchors::CURSIVE, AnchorKind::Exit, 0.0, 0.0);
                            glyph.add_anchor_point(anchors::POST_HUB_CURSIVE, AnchorKind::Entry, 0.0, 0.0);
                            glyph.add_anchor_point(anchors::PRE_HUB_CURSIVE, AnchorKind::Exit, 0.0, 0.0);
                        }
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
            Shape::Line(line) => line.draw(glyph, args),
            Shape::Curve(curve) => curve.draw(glyph, args),
            Shape::Circle(circle) => circle.draw(glyph, args),
            Shape::Ou(ou) => ou.draw(glyph, args),
            Shape::Wa(wa) => wa.draw(glyph, args),
            Shape::Wi(wi) => wi.base.draw(glyph, args),
            Shape::TangentHook(th) => th.base.draw(glyph, args),
            Shape::SeparateAffix(affix) => affix.draw(glyph, args),
            Shape::RomanianU(base) => compound::romanian_u_draw(base, glyph, args),
            Shape::XShape(base) => {
                let effective_bounding_box = base.draw(glyph, args);
                compound::recenter_x_shape(glyph);
                effective_bounding_box
            }
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::EqualsSign(base)
            | Shape::Grammalogue(base)
            | Shape::InvalidDtls(base)
            | Shape::InvalidOverlap { base, .. }
            | Shape::InvalidStep { base, .. } => base.draw(glyph, args),
            _ => {
                assert!(self.invisible(), "{} must implement draw", self.variant_name());
                None
            }
        }
    }

    /// Whether the drawn glyph has a fixed y position that must not be
    /// adjusted to the schema's vertical bounds.
    pub fn fixed_y(&self) -> bool {
        match self {
            Shape::Line(line) => line.fixed_y(),
            Shape::SeparateAffix(_) => true,
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::EqualsSign(base)
            | Shape::Grammalogue(base)
            | Shape::InvalidDtls(base)
            | Shape::InvalidOverlap { base, .. }
            | Shape::InvalidStep { base, .. }
            | Shape::RomanianU(base)
            | Shape::XShape(base) => base.fixed_y(),
            _ => false,
        }
    }

    pub fn can_be_child(&self, size: f64) -> bool {
        match self {
            Shape::Line(line) => line.can_be_child(),
            Shape::Curve(curve) => curve.can_be_child(),
            Shape::Circle(_) => true,
            Shape::Ou(_) => true,
            Shape::SeparateAffix(_) => false,
            Shape::Grammalogue(base) => grammalogue_base(base)
                .map(|op| op.shape.can_be_child(op.scale * size))
                .unwrap_or(false),
            Shape::Complex(base) | Shape::ComplexCurve(base) => base.can_be_child(size),
            _ => false,
        }
    }

    /// The maximum width of a shorthand overlap sequence following a
    /// character with this shape.
    pub fn max_tree_width(&self, size: f64) -> usize {
        match self {
            Shape::Line(line) => line.max_tree_width(size),
            Shape::Curve(curve) => curve.max_tree_width(),
            Shape::Circle(_) => 0,
            Shape::SeparateAffix(_) => 0,
            Shape::Ou(ou) => ou.base.max_tree_width(size),
            Shape::Wa(wa) => wa.base.max_tree_width(size),
            Shape::Wi(wi) => wi.base.max_tree_width(size),
            Shape::Grammalogue(base) => grammalogue_base(base)
                .map(|op| op.shape.max_tree_width(op.scale * size))
                .unwrap_or(0),
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::EqualsSign(base)
            | Shape::InvalidDtls(base)
            | Shape::InvalidOverlap { base, .. }
            | Shape::InvalidStep { base, .. }
            | Shape::RomanianU(base)
            | Shape::XShape(base) => base.max_tree_width(size),
            _ => 0,
        }
    }

    /// The maximum number of consecutive U+1BC9E DUPLOYAN DOUBLE MARK
    /// supported after this shape's glyph.
    pub fn max_double_marks(&self, size: f64, mark_anchors: &[&str]) -> usize {
        match self {
            Shape::Line(line) => line.max_double_marks(size, mark_anchors),
            Shape::Curve(curve) => curve.max_double_marks(size, mark_anchors),
            Shape::Ou(_) | Shape::SeparateAffix(_) => 0,
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::RomanianU(base)
            | Shape::XShape(base) => base.max_double_marks(size, mark_anchors),
            _ => 0,
        }
    }

    /// Whether this shape joins pseudo-cursively: the entry and exit
    /// coincide and a positioning shim is needed.
    pub fn is_pseudo_cursive(&self, size: f64) -> bool {
        match self {
            Shape::Dot(_) => true,
            Shape::Space(space) => size != 0.0 && space.hub_priority() == -1,
            Shape::XShape(_) => true,
            Shape::SeparateAffix(_) => true,
            Shape::EqualsSign(_) => true,
            Shape::Ou(ou) => ou.isolated && ou.base.instructions.len() == 1,
            _ => false,
        }
    }

    /// Whether this shape may be followed by U+1BC9D DUPLOYAN THICK
    /// LETTER SELECTOR.
    pub fn is_shadable(&self) -> bool {
        match self {
            Shape::Dot(_) => true,
            Shape::Line(line) => line.is_shadable(),
            Shape::Curve(_) | Shape::Circle(_) => true,
            Shape::SeparateAffix(_) => false,
            Shape::Ou(ou) => ou.base.is_shadable(),
            Shape::Wa(wa) => wa.base.is_shadable(),
            Shape::Wi(wi) => wi.base.is_shadable(),
            Shape::TangentHook(th) => th.base.is_shadable(),
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::RomanianU(base)
            | Shape::XShape(base) => base.is_shadable(),
            _ => false,
        }
    }

    /// The shape this shape becomes between two contexts.
    pub fn contextualize(&self, context_in: &Context, context_out: &Context) -> Shape {
        match self {
            Shape::Line(line) => line.contextualize(context_in, context_out),
            Shape::Curve(curve) => curve.contextualize(context_in, context_out),
            Shape::Circle(circle) => circle.contextualize(context_in, context_out),
            Shape::Complex(base) => Shape::Complex(base.contextualize(context_in, context_out)),
            Shape::ComplexCurve(base) => {
                Shape::ComplexCurve(base.contextualize(context_in, context_out))
            }
            Shape::XShape(base) => Shape::XShape(base.contextualize(context_in, context_out)),
            Shape::RomanianU(base) => {
                compound::romanian_u_contextualize(base, context_in, context_out)
            }
            Shape::Ou(ou) => ou.contextualize(context_in, context_out),
            Shape::Wa(wa) => wa.contextualize(context_in, context_out),
            Shape::Wi(wi) => wi.contextualize(context_in, context_out),
            Shape::TangentHook(th) => th.contextualize(context_in, context_out),
            Shape::InvalidStep { angle, .. } => Shape::Space(Space::with_margins(*angle)),
            other => panic!("{} cannot be contextualized", other.variant_name()),
        }
    }

    /// The entry context this shape exposes to its preceding neighbor.
    pub fn context_in(&self) -> Context {
        match self {
            Shape::Line(line) => line.context_in(),
            Shape::Curve(curve) => curve.context_in(),
            Shape::Circle(circle) => circle.context_in(),
            Shape::Ou(ou) => ou.context_in(),
            Shape::Wa(wa) => wa.base.context_in(),
            Shape::Wi(wi) => wi.base.context_in(),
            Shape::TangentHook(th) => th.base.context_in(),
            Shape::Complex(base) | Shape::ComplexCurve(base) => base.context_in(),
            Shape::InvalidDtls(base)
            | Shape::InvalidOverlap { base, .. }
            | Shape::InvalidStep { base, .. } => base.context_in(),
            _ => Context::NONE,
        }
    }

    /// The exit context this shape exposes to its following neighbor.
    pub fn context_out(&self) -> Context {
        match self {
            Shape::Line(line) => line.context_out(),
            Shape::Curve(curve) => curve.context_out(),
            Shape::Circle(circle) => circle.context_out(),
            Shape::Ou(ou) => ou.context_out(),
            Shape::Wa(wa) => wa.base.context_out(),
            Shape::Wi(wi) => wi.base.context_out(),
            Shape::TangentHook(th) => th.base.context_out(),
            Shape::Complex(base) | Shape::ComplexCurve(base) => base.context_out(),
            Shape::InvalidDtls(base)
            | Shape::InvalidOverlap { base, .. }
            | Shape::InvalidStep { base, .. } => base.context_out(),
            _ => Context::NONE,
        }
    }

    /// The baseline rotation for marks attached at each anchor.
    pub fn calculate_diacritic_angles(&self) -> Vec<(&'static str, f64)> {
        match self {
            Shape::Line(line) => line.calculate_diacritic_angles(),
            Shape::Curve(curve) => curve.calculate_diacritic_angles(),
            Shape::Complex(base) | Shape::ComplexCurve(base) => base.calculate_diacritic_angles(),
            _ => Vec::new(),
        }
    }

    /// The GDEF class any schema with this shape is guaranteed to
    /// have, if the shape alone determines it.
    pub fn guaranteed_glyph_class(&self) -> Option<GlyphClass> {
        match self {
            Shape::ContextMarker(_)
            | Shape::Dummy
            | Shape::Start
            | Shape::Hub(_)
            | Shape::Carry
            | Shape::WidthNumber(_)
            | Shape::MarkAnchorSelector { .. }
            | Shape::GlyphClassSelector(_)
            | Shape::InitialSecantMarker
            | Shape::ValidDtls
            | Shape::ChildEdge(_)
            | Shape::ContinuingOverlap { .. }
            | Shape::ParentEdge(_)
            | Shape::RootOnlyParentEdge
            | Shape::InvisibleMark => Some(GlyphClass::Mark),
            Shape::EntryWidthDigit(_) => Some(GlyphClass::Mark),
            Shape::LeftBoundDigit(digit)
            | Shape::RightBoundDigit(digit)
            | Shape::AnchorWidthDigit(digit) => Some(digit.glyph_class()),
            Shape::End | Shape::Notdef | Shape::Bound => Some(GlyphClass::Blocker),
            Shape::InvalidDtls(_) | Shape::InvalidOverlap { .. } => Some(GlyphClass::Blocker),
            _ => None,
        }
    }

    /// Rotates this shape, as a diacritic, against a base context.
    pub fn rotate_diacritic(&self, context: &Context) -> Shape {
        match self {
            Shape::Line(line) => Shape::Line(line.rotate_diacritic(context)),
            Shape::Complex(base) => Shape::Complex(base.rotate_diacritic(context)),
            other => panic!("{} cannot be rotated as a diacritic", other.variant_name()),
        }
    }

    /// The same shape drawn in the opposite direction.
    pub fn as_reversed(&self) -> Shape {
        match self {
            Shape::Line(line) => Shape::Line(line.as_reversed()),
            Shape::Curve(curve) => Shape::Curve(curve.as_reversed()),
            Shape::Circle(circle) => Shape::Circle(circle.as_reversed()),
            Shape::Ou(ou) => Shape::Ou(ou.as_reversed()),
            Shape::Wa(wa) => Shape::Wa(wa.as_reversed()),
            Shape::Wi(wi) => Shape::Wi(wi.as_reversed()),
            other => panic!("{} cannot be reversed", other.variant_name()),
        }
    }

    /// The turning sense, if this is a curved shape.
    pub fn clockwise(&self) -> Option<bool> {
        match self {
            Shape::Curve(curve) => Some(curve.clockwise),
            Shape::Circle(circle) => Some(circle.clockwise),
            _ => None,
        }
    }

    /// The underlying [`Complex`], if this is a compound shape.
    pub fn as_complex(&self) -> Option<&Complex> {
        match self {
            Shape::Complex(base)
            | Shape::ComplexCurve(base)
            | Shape::EqualsSign(base)
            | Shape::Grammalogue(base)
            | Shape::InvalidDtls(base)
            | Shape::InvalidOverlap { base, .. }
            | Shape::InvalidStep { base, .. }
            | Shape::RomanianU(base)
            | Shape::XShape(base) => Some(base),
            Shape::Ou(ou) => Some(&ou.base),
            Shape::SeparateAffix(affix) => Some(&affix.base),
            Shape::Wa(wa) => Some(&wa.base),
            Shape::Wi(wi) => Some(&wi.base),
            Shape::TangentHook(th) => Some(&th.base),
            _ => None,
        }
    }
}

fn grammalogue_base(base: &Complex) -> Option<&Component> {
    base.components().last()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invisible_shapes_have_no_contours() {
        let shapes = [
            Shape::Start,
            Shape::End,
            Shape::Carry,
            Shape::Dummy,
            Shape::Hub(Hub::new(1)),
            Shape::ValidDtls,
            Shape::EntryWidthDigit(Digit::new(0, 3)),
        ];
        for shape in shapes {
            assert!(shape.invisible(), "{} should be invisible", shape.variant_name());
            let mut glyph = GlyphBuilder::new();
            shape.draw(&mut glyph, &DrawArgs::plain(1.0));
            assert!(glyph.bounding_box().is_none());
        }
    }

    #[test]
    fn marker_names_imply_their_types() {
        assert!(Shape::Start.name_implies_type());
        assert!(Shape::Hub(Hub::new(2)).name_implies_type());
        assert!(!Shape::Line(Line::new(0.0)).name_implies_type());
        assert!(!Shape::ChildEdge(Edge::new(vec![(1, 0)])).name_implies_type());
    }

    #[test]
    fn space_advances_by_its_size() {
        let space = Shape::Space(Space::new(0.0));
        let mut glyph = GlyphBuilder::new();
        space.draw(
            &mut glyph,
            &DrawArgs {
                joining_type: JoiningType::Joining,
                size: 300.0,
                ..DrawArgs::plain(300.0)
            },
        );
        let exit = glyph.anchor(anchors::CURSIVE, AnchorKind::Exit).unwrap();
        assert_eq!(exit.x, 300.0);
    }

    #[test]
    fn digits_of_done_status_block() {
        let done = Shape::LeftBoundDigit(Digit::with_status(2, 1, DigitStatus::Done));
        assert_eq!(done.guaranteed_glyph_class(), Some(GlyphClass::Blocker));
        let normal = Shape::LeftBoundDigit(Digit::new(2, 1));
        assert_eq!(normal.guaranteed_glyph_class(), Some(GlyphClass::Mark));
    }
}
