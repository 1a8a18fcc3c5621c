//! Schemas: the bundled description of a glyph before it is drawn.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use crate::context::Context;
use crate::glyphs::Glyph;
use crate::shapes::{Line, Shape};
use crate::util::{
    GlyphClass, GroupElt, GroupKey, Ignorability, JoiningType, DEFAULT_SIDE_BEARING,
    MAX_DOUBLE_MARKS, MAX_GLYPH_NAME_LENGTH,
};

/// A reference-counted schema handle.
///
/// Identity is by pointer, matching how schemas are tracked through the
/// phase pipeline: two clones with equal attributes are still distinct
/// schemas until sifting merges them.
#[derive(Clone)]
pub struct SchemaRef(Rc<Schema>);

impl SchemaRef {
    pub fn downgrade(&self) -> Weak<Schema> {
        Rc::downgrade(&self.0)
    }
}

impl Deref for SchemaRef {
    type Target = Schema;

    fn deref(&self) -> &Schema {
        &self.0
    }
}

impl PartialEq for SchemaRef {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for SchemaRef {}

impl Hash for SchemaRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Rc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Debug for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Schema({})", self.0.debug_name())
    }
}

impl fmt::Display for SchemaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.debug_name())
    }
}

/// The unit that becomes a glyph.
#[derive(Debug)]
pub struct Schema {
    /// The code point this schema is mapped from, if any.
    pub cmap: Option<u32>,
    /// The code point sequence this schema represents; more than one
    /// for a ligature.
    pub cps: Vec<u32>,
    pub shape: Shape,
    pub size: f64,
    pub joining_type: JoiningType,
    pub side_bearing: f64,
    pub y_min: Option<f64>,
    pub y_max: Option<f64>,
    /// Whether this schema is a child in an overlap tree.
    pub child: bool,
    /// Whether this schema may start an orienting sequence, if that is
    /// not implied by its joining type.
    pub can_lead_orienting_sequence: Option<bool>,
    /// Whether this schema is ignored when deciding the topography of
    /// an orienting sequence.
    pub ignored_for_topography: bool,
    /// The anchor this glyph attaches to, as a mark.
    pub anchor: Option<&'static str>,
    /// Whether this mark contributes no width. `None` means unset.
    pub widthless: Option<bool>,
    pub marks: Vec<SchemaRef>,
    pub ignorability: Ignorability,
    pub encirclable: bool,
    pub shading_allowed: bool,
    pub context_in: Context,
    pub context_out: Context,
    pub diphthong_1: bool,
    pub diphthong_2: bool,
    /// The base angle this mark was rotated to, if it has been rotated
    /// as a diacritic.
    pub base_angle: Option<f64>,
    /// The variant of the shape before any contextualization.
    pub original_shape: &'static str,
    /// The index of the phase that introduced this schema.
    pub phase_index: usize,
    /// A cap on the overlap tree width after this schema, overriding
    /// the shape's own limit.
    pub maximum_tree_width: Option<usize>,
    pub glyph_class: GlyphClass,
    canonical: RefCell<Option<SchemaRef>>,
    lookalike_group: RefCell<Vec<Weak<Schema>>>,
    glyph: RefCell<Option<Rc<Glyph>>>,
    glyph_name: RefCell<Option<String>>,
}

/// A buildable description of a schema; [`Schema::to_def`] plus the
/// setters give clone-with-overrides.
#[derive(Clone, Debug)]
pub struct SchemaDef {
    cmap: Option<u32>,
    cps: Vec<u32>,
    shape: Shape,
    size: f64,
    joining_type: JoiningType,
    side_bearing: f64,
    y_min: Option<f64>,
    y_max: Option<f64>,
    child: bool,
    can_lead_orienting_sequence: Option<bool>,
    ignored_for_topography: bool,
    anchor: Option<&'static str>,
    widthless: Option<bool>,
    marks: Vec<SchemaRef>,
    ignorability: Ignorability,
    encirclable: bool,
    shading_allowed: bool,
    context_in: Context,
    context_out: Context,
    diphthong_1: bool,
    diphthong_2: bool,
    base_angle: Option<f64>,
    original_shape: Option<&'static str>,
    maximum_tree_width: Option<usize>,
}

impl SchemaDef {
    pub fn new(cmap: Option<u32>, shape: Shape, size: f64) -> SchemaDef {
        SchemaDef {
            cmap,
            cps: cmap.into_iter().collect(),
            shape,
            size,
            joining_type: JoiningType::Joining,
            side_bearing: DEFAULT_SIDE_BEARING,
            y_min: Some(0.0),
            y_max: None,
            child: false,
            can_lead_orienting_sequence: None,
            ignored_for_topography: false,
            anchor: None,
            widthless: None,
            marks: Vec::new(),
            ignorability: Ignorability::DefaultNo,
            encirclable: false,
            shading_allowed: true,
            context_in: Context::NONE,
            context_out: Context::NONE,
            diphthong_1: false,
            diphthong_2: false,
            base_angle: None,
            original_shape: None,
            maximum_tree_width: None,
        }
    }

    pub fn cmap(mut self, cmap: Option<u32>) -> Self {
        self.cmap = cmap;
        self
    }

    pub fn cps(mut self, cps: Vec<u32>) -> Self {
        self.cps = cps;
        self
    }

    pub fn shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    pub fn size(mut self, size: f64) -> Self {
        self.size = size;
        self
    }

    pub fn joining_type(mut self, joining_type: JoiningType) -> Self {
        self.joining_type = joining_type;
        self
    }

    pub fn side_bearing(mut self, side_bearing: f64) -> Self {
        self.side_bearing = side_bearing;
        self
    }

    pub fn y_min(mut self, y_min: Option<f64>) -> Self {
        self.y_min = y_min;
        self
    }

    pub fn y_max(mut self, y_max: Option<f64>) -> Self {
        self.y_max = y_max;
        self
    }

    pub fn child(mut self, child: bool) -> Self {
        self.child = child;
        self
    }

    pub fn can_lead_orienting_sequence(mut self, value: Option<bool>) -> Self {
        self.can_lead_orienting_sequence = value;
        self
    }

    pub fn ignored_for_topography(mut self, value: bool) -> Self {
        self.ignored_for_topography = value;
        self
    }

    pub fn anchor(mut self, anchor: Option<&'static str>) -> Self {
        self.anchor = anchor;
        self
    }

    pub fn widthless(mut self, widthless: Option<bool>) -> Self {
        self.widthless = widthless;
        self
    }

    pub fn marks(mut self, marks: Vec<SchemaRef>) -> Self {
        self.marks = marks;
        self
    }

    pub fn ignorability(mut self, ignorability: Ignorability) -> Self {
        self.ignorability = ignorability;
        self
    }

    pub fn encirclable(mut self, encirclable: bool) -> Self {
        self.encirclable = encirclable;
        self
    }

    pub fn shading_allowed(mut self, shading_allowed: bool) -> Self {
        self.shading_allowed = shading_allowed;
        self
    }

    pub fn context_in(mut self, context_in: Context) -> Self {
        self.context_in = context_in;
        self
    }

    pub fn context_out(mut self, context_out: Context) -> Self {
        self.context_out = context_out;
        self
    }

    pub fn diphthong_1(mut self, diphthong_1: bool) -> Self {
        self.diphthong_1 = diphthong_1;
        self
    }

    pub fn diphthong_2(mut self, diphthong_2: bool) -> Self {
        self.diphthong_2 = diphthong_2;
        self
    }

    pub fn base_angle(mut self, base_angle: Option<f64>) -> Self {
        self.base_angle = base_angle;
        self
    }

    pub fn maximum_tree_width(mut self, maximum_tree_width: Option<usize>) -> Self {
        self.maximum_tree_width = maximum_tree_width;
        self
    }

    /// Builds the schema, tagging it with the phase that created it.
    pub fn build(self, phase_index: usize) -> SchemaRef {
        assert!(
            self.marks.is_empty() || self.anchor.is_none(),
            "a schema cannot have both marks and an anchor",
        );
        assert!(
            self.widthless != Some(true) || self.anchor.is_some(),
            "a widthless schema must have an anchor",
        );
        let glyph_class = self.shape.guaranteed_glyph_class().unwrap_or({
            if self.anchor.is_some() || self.child {
                GlyphClass::Mark
            } else if self.joining_type == JoiningType::NonJoining {
                GlyphClass::Blocker
            } else {
                GlyphClass::Joiner
            }
        });
        let original_shape = self.original_shape.unwrap_or(self.shape.variant_name());
        SchemaRef(Rc::new(Schema {
            cmap: self.cmap,
            cps: self.cps,
            shape: self.shape,
            size: self.size,
            joining_type: self.joining_type,
            side_bearing: self.side_bearing,
            y_min: self.y_min,
            y_max: self.y_max,
            child: self.child,
            can_lead_orienting_sequence: self.can_lead_orienting_sequence,
            ignored_for_topography: self.ignored_for_topography,
            anchor: self.anchor,
            widthless: self.widthless,
            marks: self.marks,
            ignorability: self.ignorability,
            encirclable: self.encirclable,
            shading_allowed: self.shading_allowed,
            context_in: self.context_in,
            context_out: self.context_out,
            diphthong_1: self.diphthong_1,
            diphthong_2: self.diphthong_2,
            base_angle: self.base_angle,
            original_shape,
            phase_index,
            maximum_tree_width: self.maximum_tree_width,
            glyph_class,
            canonical: RefCell::new(None),
            lookalike_group: RefCell::new(Vec::new()),
            glyph: RefCell::new(None),
            glyph_name: RefCell::new(None),
        }))
    }
}

impl Schema {
    /// Starts a clone-with-overrides of this schema.
    pub fn to_def(&self) -> SchemaDef {
        SchemaDef {
            cmap: self.cmap,
            cps: self.cps.clone(),
            shape: self.shape.clone(),
            size: self.size,
            joining_type: self.joining_type,
            side_bearing: self.side_bearing,
            y_min: self.y_min,
            y_max: self.y_max,
            child: self.child,
            can_lead_orienting_sequence: self.can_lead_orienting_sequence,
            ignored_for_topography: self.ignored_for_topography,
            anchor: self.anchor,
            widthless: self.widthless,
            marks: self.marks.clone(),
            ignorability: self.ignorability,
            encirclable: self.encirclable,
            shading_allowed: self.shading_allowed,
            context_in: self.context_in,
            context_out: self.context_out,
            diphthong_1: self.diphthong_1,
            diphthong_2: self.diphthong_2,
            base_angle: self.base_angle,
            original_shape: Some(self.original_shape),
            maximum_tree_width: self.maximum_tree_width,
        }
    }

    fn debug_name(&self) -> String {
        match self.cmap {
            Some(cp) => format!("U+{cp:04X}"),
            None => format!("{}", self.shape.variant_name()),
        }
    }

    pub fn hub_priority(&self) -> i8 {
        if self.anchor.is_some() {
            -1
        } else {
            self.shape.hub_priority(self.size)
        }
    }

    pub fn pseudo_cursive(&self) -> bool {
        self.glyph_class == GlyphClass::Joiner && self.shape.is_pseudo_cursive(self.size)
    }

    pub fn is_secant(&self) -> bool {
        matches!(&self.shape, Shape::Line(Line { secant: Some(_), .. }))
    }

    pub fn can_take_secant(&self) -> bool {
        self.shape.can_take_secant()
    }

    pub fn max_tree_width(&self) -> usize {
        self.maximum_tree_width
            .unwrap_or_else(|| self.shape.max_tree_width(self.size))
    }

    pub fn max_double_marks(&self) -> usize {
        if self.ignored_for_topography || self.glyph_class != GlyphClass::Joiner {
            return 0;
        }
        let mark_anchors: Vec<&str> = self.marks.iter().filter_map(|m| m.anchor).collect();
        self.shape
            .max_double_marks(self.size, &mark_anchors)
            .min(MAX_DOUBLE_MARKS)
    }

    pub fn can_be_child(&self) -> bool {
        self.shape.can_be_child(self.size)
    }

    pub fn can_be_ignored_for_topography(&self) -> bool {
        match &self.shape {
            Shape::Circle(_) | Shape::Ou(_) => true,
            Shape::Curve(curve) => !curve.hook && curve.reversed_circle == 0.0,
            _ => false,
        }
    }

    pub fn can_lead_orienting_sequence(&self) -> bool {
        self.can_lead_orienting_sequence
            .unwrap_or(self.joining_type == JoiningType::Orienting)
    }

    pub fn can_become_part_of_diphthong(&self) -> bool {
        self.joining_type == JoiningType::Orienting
            && self.glyph_class == GlyphClass::Joiner
            && !self.diphthong_1
            && !self.diphthong_2
            && match &self.shape {
                Shape::Circle(_) => true,
                Shape::Curve(curve) => !curve.hook,
                _ => false,
            }
    }

    /// Whether this schema is the primary, unreversed variant of its
    /// letter.
    pub fn is_primary(&self) -> bool {
        match &self.shape {
            Shape::Curve(curve) => curve.reversed_circle == 0.0,
            Shape::Circle(circle) => !circle.reversed,
            _ => true,
        }
    }

    /// Whether this schema may end up in the shaped glyph stream and
    /// therefore needs width markers.
    pub fn might_need_width_markers(&self) -> bool {
        if self.widthless == Some(true) {
            return false;
        }
        match self.glyph_class {
            GlyphClass::Joiner => true,
            GlyphClass::Mark => !self.shape.invisible(),
            GlyphClass::Blocker => false,
        }
    }

    /// The entry context this schema exposes, including schema-level
    /// state the shape alone does not know.
    pub fn path_context_in(&self) -> Context {
        let mut c = self.shape.context_in();
        if !c.is_none() {
            c.ignorable_for_topography = self.ignored_for_topography;
            c.diphthong_start = self.diphthong_1;
            c.diphthong_end = self.diphthong_2;
        }
        c
    }

    /// The exit context this schema exposes.
    pub fn path_context_out(&self) -> Context {
        let mut c = self.shape.context_out();
        if !c.is_none() {
            c.ignorable_for_topography = self.ignored_for_topography;
            c.diphthong_start = self.diphthong_1;
            c.diphthong_end = self.diphthong_2;
        }
        c
    }

    /// Returns the schema this schema becomes between two contexts.
    pub fn contextualize(
        &self,
        context_in: Context,
        context_out: Context,
        ignore_dependent_schemas: bool,
        phase_index: usize,
    ) -> SchemaRef {
        let shape = self.shape.contextualize(&context_in, &context_out);
        let ignored = ignore_dependent_schemas && self.ignored_for_topography;
        self.to_def()
            .cmap(None)
            .shape(shape)
            .ignored_for_topography(ignored)
            .context_in(context_in)
            .context_out(context_out)
            .build(phase_index)
    }

    /// Returns a clone of this mark schema rotated against a base
    /// context.
    pub fn rotate_diacritic(&self, context: &Context, phase_index: usize) -> SchemaRef {
        self.to_def()
            .cmap(None)
            .shape(self.shape.rotate_diacritic(context))
            .base_angle(context.angle)
            .build(phase_index)
    }

    pub fn diacritic_angles(&self) -> Vec<(&'static str, f64)> {
        self.shape.calculate_diacritic_angles()
    }

    /// The script tags this schema is relevant to.
    pub fn scripts(&self) -> Vec<font_types::Tag> {
        let only_duployan = !self.cps.is_empty()
            && self.cps.iter().all(|&cp| {
                (0x1BC00..=0x1BC9F).contains(&cp) || (0x1BCA0..=0x1BCAF).contains(&cp)
            });
        if only_duployan {
            vec![crate::fea::SCRIPT_DUPLOYAN]
        } else {
            vec![crate::fea::SCRIPT_DEFAULT, crate::fea::SCRIPT_DUPLOYAN]
        }
    }

    /// The deduplication identity: schemas with equal groups are
    /// interchangeable as glyph definitions.
    pub fn group(&self) -> GroupKey {
        let context_in = Context {
            diphthong_start: false,
            diphthong_end: false,
            ..self.context_in
        };
        let context_out = Context {
            diphthong_start: false,
            diphthong_end: false,
            ..self.context_out
        };
        let mut key = GroupKey::new("schema")
            .with(match self.ignorability {
                Ignorability::DefaultNo => "default_no",
                Ignorability::DefaultYes => "default_yes",
                Ignorability::OverriddenNo => "overridden_no",
            })
            .with(self.shape.variant_name())
            .nested(self.shape.group())
            .with_f(self.size)
            .with(match self.joining_type {
                JoiningType::Orienting => "orienting",
                JoiningType::Joining => "joining",
                JoiningType::NonJoining => "non_joining",
            })
            .with_f(self.side_bearing)
            .with(GroupElt::opt_f(self.y_min))
            .with(GroupElt::opt_f(self.y_max))
            .with(self.child)
            .with(GroupElt::Opt(
                self.anchor.map(|a| Box::new(GroupElt::Str(a.into()))),
            ))
            .with(GroupElt::Opt(
                self.widthless.map(|w| Box::new(GroupElt::Bool(w))),
            ))
            .with(self.glyph_class.name())
            .with(context_in.is_none())
            .with(context_out.is_none())
            .with(self.diphthong_1)
            .with(self.diphthong_2)
            .with(self.ignored_for_topography);
        for mark in &self.marks {
            key = key.nested(mark.group());
        }
        key
    }

    /// Orders schemas for canonical selection within a group.
    pub fn sort_key(&self) -> (bool, usize, bool, bool, usize) {
        (
            self.cps.is_empty(),
            self.phase_index,
            self.cmap.is_none(),
            self.original_shape != self.shape.variant_name(),
            self.name_stem().len(),
        )
    }

    /// The glyph name before truncation and disambiguation.
    fn name_stem(&self) -> String {
        let mut name = if !self.cps.is_empty() {
            self.cps.iter().map(|&cp| agl_name(cp)).collect::<Vec<_>>().join("_")
        } else if self.shape.name_implies_type() {
            String::new()
        } else {
            format!("dupl.{}", self.shape.variant_name())
        };
        let shape_name = self.shape.name(self.size, self.joining_type);
        if !shape_name.is_empty() {
            if !name.is_empty() {
                name.push('.');
            }
            name.push_str(&shape_name);
        }
        if let Some(anchor) = self.anchor {
            name.push('.');
            name.push_str(anchor);
        }
        if self.widthless == Some(true) {
            name.push_str(".w");
        }
        if self.diphthong_1 {
            name.push_str(".d1");
        }
        if self.diphthong_2 {
            name.push_str(".d2");
        }
        if self.child {
            name.push_str(".sub");
        }
        if self.ignored_for_topography {
            name.push_str(".dep");
        }
        if self.shape.name_implies_type() && self.cps.is_empty() {
            name.insert(0, '_');
        }
        name
    }

    /// Derives this schema's stable glyph name, registering it so that
    /// later collisions get hex disambiguators.
    pub fn assign_name(&self, registry: &mut NameRegistry) -> String {
        if let Some(name) = self.glyph_name.borrow().clone() {
            return name;
        }
        let mut name = self.name_stem();
        if name.len() > MAX_GLYPH_NAME_LENGTH {
            let truncated = match name[..MAX_GLYPH_NAME_LENGTH].rfind('.') {
                Some(i) => name[..i].to_string(),
                None => name[..MAX_GLYPH_NAME_LENGTH].to_string(),
            };
            name = truncated;
        }
        let count = registry.counts.entry(name.clone()).or_insert(0);
        if *count > 0 {
            let n = *count;
            *count += 1;
            name = format!("{name}._{n:X}");
        } else {
            *count = 1;
        }
        if !self.cps.is_empty() {
            debug_assert_eq!(
                decode_glyph_name(&name),
                Some(self.cps.clone()),
                "glyph name {name} does not round-trip",
            );
        }
        *self.glyph_name.borrow_mut() = Some(name.clone());
        name
    }

    pub fn glyph_name(&self) -> Option<String> {
        self.glyph_name.borrow().clone()
    }

    pub fn set_glyph(&self, glyph: Rc<Glyph>) {
        *self.glyph.borrow_mut() = Some(glyph);
    }

    pub fn glyph(&self) -> Option<Rc<Glyph>> {
        self.glyph.borrow().clone()
    }

    pub fn set_canonical(&self, canonical: SchemaRef) {
        *self.canonical.borrow_mut() = Some(canonical);
    }

    /// The canonical schema of this schema's group, or `None` if this
    /// schema is itself canonical.
    pub fn canonical(&self) -> Option<SchemaRef> {
        self.canonical.borrow().clone()
    }

    pub fn set_lookalike_group(&self, group: &[SchemaRef]) {
        *self.lookalike_group.borrow_mut() = group.iter().map(SchemaRef::downgrade).collect();
    }

    pub fn lookalike_group(&self) -> Vec<SchemaRef> {
        let group: Vec<SchemaRef> = self
            .lookalike_group
            .borrow()
            .iter()
            .filter_map(|weak| weak.upgrade().map(SchemaRef))
            .collect();
        group
    }

    /// Whether this schema's lookalike group has been assigned; before
    /// sifting, a schema is its own group.
    pub fn has_lookalike_group(&self) -> bool {
        !self.lookalike_group.borrow().is_empty()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.debug_name())
    }
}

/// Keeps glyph names unique.
#[derive(Debug, Default)]
pub struct NameRegistry {
    counts: IndexMap<String, u32>,
}

impl NameRegistry {
    pub fn new() -> NameRegistry {
        NameRegistry::default()
    }
}

/// The Adobe Glyph List name for a code point, falling back to the
/// uniXXXX and uXXXXX conventions.
pub fn agl_name(cp: u32) -> String {
    for (agl_cp, name) in AGL_NAMES {
        if *agl_cp == cp {
            return (*name).to_string();
        }
    }
    if cp <= 0xFFFF {
        format!("uni{cp:04X}")
    } else {
        format!("u{cp:05X}")
    }
}

/// Decodes a glyph name back to its code point sequence, reversing
/// [`agl_name`].
pub fn decode_glyph_name(name: &str) -> Option<Vec<u32>> {
    let base = name.split('.').next()?;
    let mut cps = Vec::new();
    for part in base.split('_') {
        if let Some(hex) = part.strip_prefix("uni") {
            if hex.len() % 4 != 0 {
                return None;
            }
            for i in (0..hex.len()).step_by(4) {
                cps.push(u32::from_str_radix(&hex[i..i + 4], 16).ok()?);
            }
        } else if let Some(hex) = part.strip_prefix('u') {
            cps.push(u32::from_str_radix(hex, 16).ok()?);
        } else if let Some(&(cp, _)) = AGL_NAMES.iter().find(|(_, n)| *n == part) {
            cps.push(cp);
        } else {
            return None;
        }
    }
    Some(cps)
}

/// The slice of the Adobe Glyph List this font needs.
const AGL_NAMES: &[(u32, &str)] = &[
    (0x0020, "space"),
    (0x002E, "period"),
    (0x0030, "zero"),
    (0x0031, "one"),
    (0x0032, "two"),
    (0x0033, "three"),
    (0x0034, "four"),
    (0x0035, "five"),
    (0x0036, "six"),
    (0x0037, "seven"),
    (0x0038, "eight"),
    (0x0039, "nine"),
    (0x003D, "equal"),
    (0x2044, "fraction"),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{Circle, Dot, Space};

    fn line_schema(cp: u32, angle: f64) -> SchemaRef {
        SchemaDef::new(Some(cp), Shape::Line(Line::stretchy(angle)), 1.0)
            .joining_type(JoiningType::Joining)
            .build(0)
    }

    #[test]
    fn glyph_class_derivation() {
        let joiner = line_schema(0x1BC02, 270.0);
        assert_eq!(joiner.glyph_class, GlyphClass::Joiner);
        let blocker = SchemaDef::new(Some(0x2E3C), Shape::Dot(Dot::new()), 1.0)
            .joining_type(JoiningType::NonJoining)
            .build(0);
        assert_eq!(blocker.glyph_class, GlyphClass::Blocker);
        let mark = SchemaDef::new(None, Shape::Dot(Dot::new()), 1.0)
            .anchor(Some(crate::anchors::ABOVE))
            .build(0);
        assert_eq!(mark.glyph_class, GlyphClass::Mark);
    }

    #[test]
    #[should_panic(expected = "widthless")]
    fn widthless_requires_anchor() {
        let _ = SchemaDef::new(None, Shape::Dot(Dot::new()), 1.0)
            .widthless(Some(true))
            .build(0);
    }

    #[test]
    fn group_is_stable_and_merges_equal_clones() {
        let a = line_schema(0x1BC02, 270.0);
        let clone = a.to_def().build(3);
        assert_eq!(a.group(), a.group());
        // Phase of origin does not affect the group.
        assert_eq!(a.group(), clone.group());
        let b = line_schema(0x1BC03, 0.0);
        assert_ne!(a.group(), b.group());
    }

    #[test]
    fn names_round_trip_through_agl() {
        let mut registry = NameRegistry::new();
        let schema = line_schema(0x1BC02, 270.0);
        let name = schema.assign_name(&mut registry);
        assert_eq!(decode_glyph_name(&name), Some(vec![0x1BC02]));
        let ligature = SchemaDef::new(None, Shape::Line(Line::new(0.0)), 1.0)
            .cps(vec![0x1BC9E, 0x1BC9E])
            .build(0);
        let name = ligature.assign_name(&mut registry);
        assert!(name.starts_with("uni1BC9E_uni1BC9E"));
        assert_eq!(decode_glyph_name(&name), Some(vec![0x1BC9E, 0x1BC9E]));
    }

    #[test]
    fn colliding_names_get_disambiguated() {
        let mut registry = NameRegistry::new();
        let a = SchemaDef::new(None, Shape::Space(Space::new(90.0)), 0.0).build(0);
        let b = SchemaDef::new(None, Shape::Space(Space::new(90.0)), 0.0).build(0);
        let name_a = a.assign_name(&mut registry);
        let name_b = b.assign_name(&mut registry);
        assert_ne!(name_a, name_b);
        assert!(name_b.starts_with(&name_a));
    }

    #[test]
    fn sort_key_prefers_encoded_and_older_schemas() {
        let encoded = line_schema(0x1BC02, 270.0);
        let derived = encoded.to_def().cmap(None).cps(vec![]).build(7);
        assert!(encoded.sort_key() < derived.sort_key());
    }

    #[test]
    fn contextualized_circle_records_contexts() {
        let circle = SchemaDef::new(Some(0x1BC41), Shape::Circle(Circle::new(0.0, 0.0, false)), 2.0)
            .joining_type(JoiningType::Orienting)
            .build(0);
        let contextualized = circle.contextualize(Context::new(0.0), Context::NONE, true, 5);
        assert_eq!(contextualized.context_in, Context::new(0.0));
        assert_eq!(contextualized.phase_index, 5);
        assert!(contextualized.cmap.is_none());
    }
}
