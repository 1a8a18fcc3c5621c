//! The marker phases.
//!
//! After sifting, the canonical glyphs exist and their geometry is
//! known. These phases introduce invisible marker glyphs and
//! positioning rules that compute each glyph's advance width, side
//! bearings, and anchor offsets at shaping time, in base
//! [`WIDTH_MARKER_RADIX`] with [`WIDTH_MARKER_PLACES`] digits.

use indexmap::{IndexMap, IndexSet};

use crate::anchors;
use crate::fea::{c, flags, s, Lookup, Rule, Target};
use crate::glyphs::AnchorKind;
use crate::phases::{
    number_token as num, phase, PhaseCx, PhaseDef, CONTINUING_OVERLAP_OR_HUB_CLASS, HUB_CLASS,
};
use crate::schema::{SchemaDef, SchemaRef};
use crate::shapes::{Circle, Digit, DigitKind, DigitStatus, Hub, Shape, Space, WidthNumber};
use crate::sifting::Grouper;
use crate::util::{
    GlyphClass, DEFAULT_SIDE_BEARING, MAX_HUB_PRIORITY, MINIMUM_STROKE_GAP, WIDTH_MARKER_PLACES,
    WIDTH_MARKER_RADIX,
};

fn snapshot(set: &IndexSet<SchemaRef>) -> Vec<SchemaRef> {
    set.iter().cloned().collect()
}

fn find_shape(
    schemas: &IndexSet<SchemaRef>,
    predicate: impl Fn(&Shape) -> bool,
) -> Option<SchemaRef> {
    schemas.iter().find(|s| predicate(&s.shape)).cloned()
}

fn digit_shape(kind: DigitKind, place: usize, digit: i64) -> Shape {
    let d = Digit::new(place, digit);
    match kind {
        DigitKind::Entry => Shape::EntryWidthDigit(d),
        DigitKind::LeftBound => Shape::LeftBoundDigit(d),
        DigitKind::RightBound => Shape::RightBoundDigit(d),
        DigitKind::AnchorWidth => Shape::AnchorWidthDigit(d),
    }
}

fn as_digit(shape: &Shape) -> Option<(DigitKind, Digit)> {
    match shape {
        Shape::EntryWidthDigit(d) => Some((DigitKind::Entry, *d)),
        Shape::LeftBoundDigit(d) => Some((DigitKind::LeftBound, *d)),
        Shape::RightBoundDigit(d) => Some((DigitKind::RightBound, *d)),
        Shape::AnchorWidthDigit(d) => Some((DigitKind::AnchorWidth, *d)),
        _ => None,
    }
}

fn lookalikes(schema: &SchemaRef) -> Vec<SchemaRef> {
    if schema.has_lookalike_group() {
        schema.lookalike_group()
    } else {
        vec![schema.clone()]
    }
}

fn round_with_base(number: f64, base: f64, minimum: f64) -> f64 {
    (base * (number / base).round()).max(minimum)
}

/// Emits a sized space shim between every real-cursive exit and every
/// pseudo-cursive entry, so the two glyphs abut with the minimum
/// stroke gap.
pub fn add_shims_for_pseudo_cursive(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut marker_lookup = Lookup::new(b"dist", b"dflt");
    let mut deduplicate_marker_lookup =
        Lookup::new(b"dist", b"dflt").with_mark_filtering_set("root_parent_edge");
    let mut space_lookup = Lookup::new(b"dist", b"dflt")
        .with_flags(flags::IGNORE_MARKS)
        .reversed();
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![marker_lookup, deduplicate_marker_lookup, space_lookup];
    }
    let mut pseudo_cursive_schemas: IndexMap<SchemaRef, String> = IndexMap::new();
    struct PseudoCursiveInfo {
        is_space: bool,
        left_bound: f64,
        right_bound: f64,
        bottom_bound: f64,
        top_bound: f64,
        rounding_base: f64,
    }
    let mut pseudo_cursive_info: IndexMap<String, PseudoCursiveInfo> = IndexMap::new();
    let mut exit_schemas: Vec<(SchemaRef, f64, f64)> = Vec::new();
    let mut entry_schemas: Vec<(SchemaRef, f64, f64)> = Vec::new();
    for schema in snapshot(&cx.new_schemas) {
        let Some(glyph) = schema.glyph() else {
            continue;
        };
        if schema.glyph_class != GlyphClass::Joiner {
            if schema.glyph_class == GlyphClass::Mark {
                if schema.shape.invisible() {
                    if matches!(&schema.shape, Shape::ParentEdge(edge) if edge.lineage.is_empty()) {
                        cx.class_push("pseudo_cursive_or_root_parent_edge", schema.clone());
                        cx.class_push("root_parent_edge", schema.clone());
                    }
                } else {
                    cx.class_push("diacritic", schema.clone());
                }
            }
            continue;
        }
        if schema.pseudo_cursive() {
            cx.class_push("pseudo_cursive_or_root_parent_edge", schema.clone());
            let bbox = glyph.bbox();
            let entry = glyph.anchor(anchors::CURSIVE, AnchorKind::Entry);
            let exit = glyph.anchor(anchors::CURSIVE, AnchorKind::Exit);
            let entry_y = entry.map_or(0.0, |p| p.y);
            let is_space = bbox.min_x() == bbox.max_x();
            let (entry_x, exit_x) = if is_space {
                (0.0, 0.0)
            } else {
                (entry.map_or(0.0, |p| p.x), exit.map_or(0.0, |p| p.x))
            };
            let bottom_bound = bbox.min_y() - MINIMUM_STROKE_GAP - entry_y;
            let top_bound = bbox.max_y() + MINIMUM_STROKE_GAP - entry_y;
            let class_name = format!(
                "pseudo_cursive_{}_{}_{}",
                is_space,
                num(bottom_bound),
                num(top_bound),
            );
            cx.class_push(&class_name, schema.clone());
            pseudo_cursive_schemas.insert(schema.clone(), class_name.clone());
            pseudo_cursive_info.entry(class_name).or_insert(PseudoCursiveInfo {
                is_space,
                left_bound: entry_x - bbox.min_x(),
                right_bound: bbox.max_x() - exit_x,
                bottom_bound,
                top_bound,
                rounding_base: if matches!(schema.shape, Shape::SeparateAffix(_)) {
                    200.0
                } else {
                    6.0
                },
            });
        }
        if schema.context_in.is_none() || schema.context_out.is_none() {
            let looks_like_valid_exit = lookalikes(&schema)
                .iter()
                .any(|s| s.context_out.is_none() && !schema.diphthong_1);
            let looks_like_valid_entry = lookalikes(&schema)
                .iter()
                .any(|s| s.context_in.is_none() && !schema.diphthong_2);
            if looks_like_valid_exit || looks_like_valid_entry {
                for anchor in &glyph.anchor_points {
                    if anchor.name == anchors::CURSIVE {
                        if looks_like_valid_exit && anchor.kind == AnchorKind::Exit {
                            exit_schemas.push((schema.clone(), anchor.x, anchor.y));
                        } else if looks_like_valid_entry && anchor.kind == AnchorKind::Entry {
                            entry_schemas.push((schema.clone(), anchor.x, anchor.y));
                        }
                    }
                }
            }
        }
    }
    let mut shims: IndexMap<(i64, i64), SchemaRef> = IndexMap::new();
    let mut get_shim = |cx: &PhaseCx, width: f64, height: f64| -> SchemaRef {
        shims
            .entry((width as i64, height as i64))
            .or_insert_with(|| {
                let angle = if width != 0.0 {
                    crate::geometry::normalize((height / width).atan().to_degrees())
                } else {
                    0.0
                };
                cx.new_schema(
                    SchemaDef::new(None, Shape::Space(Space::new(angle)), width.hypot(height))
                        .side_bearing(width),
                )
            })
            .clone()
    };
    let marker = get_shim(cx, 0.0, 0.0);
    cx.add_rule(
        &mut marker_lookup,
        Rule::sub(vec![c("diacritic")], vec![c("diacritic"), s(&marker)]),
    );
    cx.add_rule(
        &mut deduplicate_marker_lookup,
        Rule::contextual(vec![], vec![s(&marker)], vec![s(&marker)], vec![]),
    );
    cx.add_rule(
        &mut deduplicate_marker_lookup,
        Rule::chain(
            vec![c("pseudo_cursive_or_root_parent_edge")],
            vec![s(&marker)],
            vec![],
            vec![None],
        ),
    );
    cx.add_rule(&mut deduplicate_marker_lookup, Rule::sub(vec![s(&marker)], vec![]));
    for (pseudo_cursive_index, (pseudo_cursive_class_name, info)) in
        pseudo_cursive_info.iter().enumerate()
    {
        cx.add_rule(
            &mut marker_lookup,
            Rule::sub(
                vec![c(pseudo_cursive_class_name.clone())],
                vec![s(&marker), c(pseudo_cursive_class_name.clone()), s(&marker)],
            ),
        );
        let mut exit_classes: IndexMap<String, SchemaRef> = IndexMap::new();
        let mut exit_classes_with_pseudo_cursive: IndexSet<String> = IndexSet::new();
        let mut exit_classes_with_true_cursive: IndexSet<String> = IndexSet::new();
        let mut entry_classes: IndexMap<String, SchemaRef> = IndexMap::new();
        for is_exit in [true, false] {
            let (prefix, e_schemas, pseudo_cursive_x_bound) = if is_exit {
                ("exit", &exit_schemas, info.left_bound)
            } else {
                ("entry", &entry_schemas, info.right_bound)
            };
            for (e_schema, x, y) in e_schemas {
                let glyph = e_schema.glyph().expect("cursive schemas have drawn glyphs");
                let bounds = glyph.x_bounds_at_y(y + info.bottom_bound, y + info.top_bound);
                let distance_to_edge = match bounds {
                    None => 0.0,
                    Some((lo, hi)) => {
                        if is_exit {
                            hi - x
                        } else {
                            x - lo
                        }
                    }
                };
                let mut shim_width = distance_to_edge + DEFAULT_SIDE_BEARING + pseudo_cursive_x_bound;
                if info.is_space && is_exit && matches!(e_schema.shape, Shape::Space(_)) {
                    // Margins do not collapse between spaces.
                    shim_width += DEFAULT_SIDE_BEARING;
                }
                let exit_is_pseudo_cursive = is_exit && pseudo_cursive_schemas.contains_key(e_schema);
                let shim_width = round_with_base(shim_width, info.rounding_base, MINIMUM_STROKE_GAP);
                let e_class = format!("{prefix}_shim_{pseudo_cursive_index}_{}", num(shim_width));
                cx.class_push(&e_class, e_schema.clone());
                let shim = get_shim(cx, shim_width, 0.0);
                if is_exit {
                    exit_classes.entry(e_class.clone()).or_insert(shim);
                    if exit_is_pseudo_cursive {
                        exit_classes_with_pseudo_cursive.insert(e_class);
                    } else {
                        exit_classes_with_true_cursive.insert(e_class);
                    }
                } else {
                    entry_classes.entry(e_class).or_insert(shim);
                }
            }
        }
        for (exit_class, shim) in &exit_classes {
            if exit_classes_with_pseudo_cursive.contains(exit_class) {
                cx.add_rule(
                    &mut space_lookup,
                    Rule::contextual(
                        vec![c(exit_class.clone()), s(&marker)],
                        vec![s(&marker)],
                        vec![c(pseudo_cursive_class_name.clone())],
                        vec![s(shim)],
                    ),
                );
            }
            if exit_classes_with_true_cursive.contains(exit_class) {
                cx.add_rule(
                    &mut space_lookup,
                    Rule::contextual(
                        vec![c(exit_class.clone())],
                        vec![s(&marker)],
                        vec![c(pseudo_cursive_class_name.clone())],
                        vec![s(shim)],
                    ),
                );
            }
        }
        for (entry_class, shim) in &entry_classes {
            cx.add_rule(
                &mut space_lookup,
                Rule::contextual(
                    vec![c(pseudo_cursive_class_name.clone())],
                    vec![s(&marker)],
                    vec![c(entry_class.clone())],
                    vec![s(shim)],
                ),
            );
        }
    }
    vec![marker_lookup, deduplicate_marker_lookup, space_lookup]
}

/// For each encirclable base, picks a circle variant stretched to fit
/// an expanded bounding box, and centers the enclosed glyph.
pub fn shrink_wrap_enclosing_circle(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt")
        .with_mark_filtering_set("all")
        .reversed();
    let mut dist_lookup = Lookup::new(b"abvm", b"dflt").with_mark_filtering_set("all");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup, dist_lookup];
    }
    let mut circle_schema: Option<SchemaRef> = None;
    let mut punctuation: IndexMap<String, (f64, bool, f64, f64)> = IndexMap::new();
    for schema in snapshot(&cx.schemas) {
        let Some(glyph) = schema.glyph() else {
            continue;
        };
        if schema.widthless == Some(true)
            && schema.anchor == Some(anchors::MIDDLE)
            && matches!(schema.shape, Shape::Circle(_))
        {
            if circle_schema.is_none() {
                circle_schema = Some(schema.clone());
            }
            cx.class_push("i", schema.clone());
            cx.class_push("all", schema.clone());
        } else if schema.encirclable {
            let bbox = glyph.bbox();
            // This must stay consistent with how the glyph emitter pads
            // encirclable glyphs.
            let mut dx = bbox.width() + 3.0 * cx.stroke.stroke_gap + cx.stroke.light_line;
            let mut dy = bbox.height() + 3.0 * cx.stroke.stroke_gap + cx.stroke.light_line;
            if dx > dy {
                dy = dy.max(dx * 0.75);
            } else if dx < dy {
                dx = dx.max(dy * 0.75);
            }
            let stretch = ((dx.max(dy) / dx.min(dy) - 1.0) * 100.0).round() / 100.0;
            let long = dx < dy;
            let size = ((dx.min(dy) / 100.0) * 100.0).round() / 100.0;
            let side_bearing =
                ((dx + 2.0 * DEFAULT_SIDE_BEARING - glyph.advance) / 4.0).round() * 2.0;
            let class_name = format!(
                "c_{}_{}_{}_{}",
                num(stretch),
                long,
                num(size),
                num(side_bearing),
            );
            cx.class_push(&class_name, schema);
            punctuation.insert(class_name, (stretch, long, size, side_bearing));
        }
    }
    let Some(circle_schema) = circle_schema else {
        return vec![lookup, dist_lookup];
    };
    let Shape::Circle(circle) = &circle_schema.shape else {
        unreachable!();
    };
    let mut new_circle_schemas: IndexMap<(i64, bool, i64), SchemaRef> = IndexMap::new();
    for (class_name, (stretch, long, size, side_bearing)) in punctuation {
        let key = ((stretch * 100.0) as i64, long, (size * 100.0) as i64);
        let new_circle_schema = new_circle_schemas
            .entry(key)
            .or_insert_with(|| {
                cx.new_schema(
                    circle_schema
                        .to_def()
                        .cmap(None)
                        .shape(Shape::Circle(Circle {
                            stretch,
                            long,
                            ..circle.clone()
                        }))
                        .size(size),
                )
            })
            .clone();
        cx.add_rule(
            &mut lookup,
            Rule::contextual(
                vec![c(class_name.clone())],
                vec![c("i")],
                vec![],
                vec![s(&new_circle_schema)],
            ),
        );
        cx.class_push("o", new_circle_schema.clone());
        cx.class_push("all", new_circle_schema.clone());
        cx.add_rule(
            &mut dist_lookup,
            Rule::pos(
                vec![],
                vec![c(class_name)],
                vec![s(&new_circle_schema)],
                Some(vec![Some(side_bearing)]),
                Some(vec![Some(2.0 * side_bearing)]),
            ),
        );
    }
    vec![lookup, dist_lookup]
}

/// The central construction: each emittable schema is replaced by the
/// sequence `[Start, selectors, hub, schema, width digits, End]`.
pub fn add_width_markers(cx: &mut PhaseCx) -> Vec<Lookup> {
    const LOOKUPS_PER_POSITION: usize = 6;
    let mut lookups: Vec<Lookup> = (0..LOOKUPS_PER_POSITION)
        .map(|_| Lookup::new(b"dist", b"dflt"))
        .collect();
    let mut digit_expansion_lookup = Lookup::new(b"dist", b"dflt");
    let mut width_markers: IndexMap<(DigitKind, usize, i64), SchemaRef> = IndexMap::new();
    let start = find_shape(&cx.schemas, |shape| matches!(shape, Shape::Start)).unwrap_or_else(|| {
        let start = cx.new_schema(SchemaDef::new(None, Shape::Start, 0.0));
        cx.class_push(CONTINUING_OVERLAP_OR_HUB_CLASS, start.clone());
        start
    });
    let mut hubs: IndexMap<i8, Vec<SchemaRef>> = IndexMap::new();
    hubs.insert(-1, Vec::new());
    for hub_priority in 0..=MAX_HUB_PRIORITY {
        let hub = find_shape(
            &cx.schemas,
            |shape| matches!(shape, Shape::Hub(hub) if hub.priority == hub_priority),
        )
        .unwrap_or_else(|| {
            let hub = cx.new_schema(
                SchemaDef::new(None, Shape::Hub(Hub::new(hub_priority)), 0.0).side_bearing(0.0),
            );
            cx.class_push(HUB_CLASS, hub.clone());
            cx.class_push(CONTINUING_OVERLAP_OR_HUB_CLASS, hub.clone());
            hub
        });
        hubs.insert(hub_priority, vec![hub]);
    }
    let end = cx.new_schema(SchemaDef::new(None, Shape::End, 0.0).side_bearing(0.0));
    let mut mark_anchor_selectors: IndexMap<&'static str, SchemaRef> = IndexMap::new();
    let mut glyph_class_selectors: IndexMap<GlyphClass, SchemaRef> = IndexMap::new();
    let mut width_number_schemas: IndexMap<WidthNumber, SchemaRef> = IndexMap::new();
    let mut width_number_counter: IndexMap<WidthNumber, usize> = IndexMap::new();
    let minimum_optimizable_width_number_count = 2;
    let mut anchor_grouper: Grouper<&'static str> = Grouper::new(vec![anchors::ALL_MARK.to_vec()]);
    struct PendingRule {
        schema: SchemaRef,
        glyph_class_selector: SchemaRef,
        mark_anchor_selector: Option<SchemaRef>,
        hub_priority: i8,
        widths: Vec<WidthNumber>,
    }
    let mut schemas_needing_width_markers: Vec<(SchemaRef, IndexMap<String, f64>, IndexMap<String, f64>, f64)> =
        Vec::new();
    for schema in snapshot(&cx.new_schemas) {
        if !cx.original_schemas.contains(&schema) {
            continue;
        }
        if schema.glyph().is_none() {
            match &schema.shape {
                Shape::MarkAnchorSelector { anchor } => {
                    mark_anchor_selectors.insert(anchor, schema.clone());
                }
                Shape::GlyphClassSelector(glyph_class) => {
                    glyph_class_selectors.insert(*glyph_class, schema.clone());
                }
                _ => {}
            }
            if !matches!(schema.shape, Shape::Space(_)) {
                // Not a shim created for pseudo-cursive joining.
                continue;
            }
        }
        let has_mark_anchor = schema.glyph().is_some_and(|glyph| {
            glyph
                .anchor_points
                .iter()
                .any(|a| anchors::ALL_MARK.contains(&a.name.as_str()))
        });
        if !schema.might_need_width_markers()
            || (schema.glyph_class == GlyphClass::Mark && !has_mark_anchor)
        {
            continue;
        }
        let mut entry_xs: IndexMap<String, f64> = IndexMap::new();
        let mut exit_xs: IndexMap<String, f64> = IndexMap::new();
        let mut last_anchor_class_name = None;
        match schema.glyph() {
            None => {
                entry_xs.insert(anchors::CURSIVE.to_string(), 0.0);
                exit_xs.insert(anchors::CURSIVE.to_string(), schema.size);
            }
            Some(glyph) => {
                let mut should_check_anchor_x = false;
                for anchor in &glyph.anchor_points {
                    match anchor.kind {
                        AnchorKind::Entry | AnchorKind::Mark => {
                            entry_xs.insert(anchor.name.clone(), anchor.x);
                            last_anchor_class_name = Some(anchor.name.clone());
                        }
                        AnchorKind::Base | AnchorKind::Basemark | AnchorKind::Exit => {
                            exit_xs.insert(anchor.name.clone(), anchor.x);
                            should_check_anchor_x |=
                                matches!(anchor.kind, AnchorKind::Base | AnchorKind::Basemark);
                        }
                        AnchorKind::Ligature => {}
                    }
                }
                if should_check_anchor_x {
                    // Anchors whose x positions diverge on some glyph
                    // cannot share one anchor-width digit sequence.
                    for group in anchor_grouper.groups().to_vec() {
                        let mut by_x: IndexMap<Option<crate::util::FloatKey>, Vec<&'static str>> =
                            IndexMap::new();
                        by_x.insert(None, group.clone());
                        for anchor in &glyph.anchor_points {
                            let base_name: Option<&'static str> = group
                                .iter()
                                .copied()
                                .find(|&a| {
                                    anchor.kind == AnchorKind::Base && anchor.name == a
                                        || anchor.kind == AnchorKind::Basemark
                                            && anchor.name == anchors::mkmk(a)
                                });
                            if let Some(base_name) = base_name {
                                by_x.entry(Some(crate::util::FloatKey(anchor.x)))
                                    .or_default()
                                    .push(base_name);
                                if let Some(unplaced) = by_x.get_mut(&None) {
                                    unplaced.retain(|&a| a != base_name);
                                }
                            }
                        }
                        if by_x.get(&None).is_some_and(Vec::is_empty) {
                            by_x.shift_remove(&None);
                        }
                        if by_x.len() > 1 {
                            anchor_grouper.remove(&group);
                            for anchor_group in by_x.into_values() {
                                if anchor_group.len() > 1 {
                                    anchor_grouper.add(anchor_group);
                                }
                            }
                        }
                    }
                }
            }
        }
        if entry_xs.is_empty() && exit_xs.is_empty() {
            // This glyph never appears in the final glyph buffer.
            continue;
        }
        entry_xs.entry(anchors::CURSIVE.to_string()).or_insert(0.0);
        if !exit_xs.contains_key(anchors::CURSIVE) {
            let fallback = exit_xs.get(anchors::CONTINUING_OVERLAP).copied().unwrap_or(0.0);
            exit_xs.insert(anchors::CURSIVE.to_string(), fallback);
        }
        let cursive_entry = entry_xs[anchors::CURSIVE];
        entry_xs
            .entry(anchors::CONTINUING_OVERLAP.to_string())
            .or_insert(cursive_entry);
        let cursive_exit = exit_xs[anchors::CURSIVE];
        exit_xs
            .entry(anchors::CONTINUING_OVERLAP.to_string())
            .or_insert(cursive_exit);
        let start_x = if schema.glyph_class == GlyphClass::Joiner {
            entry_xs[anchors::CURSIVE]
        } else {
            entry_xs[&last_anchor_class_name.expect("marks have anchor points")]
        };
        schemas_needing_width_markers.push((schema, entry_xs, exit_xs, start_x));
    }
    let canonical_mark_anchors: Vec<&'static str>;
    let mut canonical_mark_anchor_mapping: IndexMap<&'static str, &'static str> = IndexMap::new();
    if cx.original_schemas.len() == cx.schemas.len() {
        let anchor_groups = anchor_grouper.groups();
        canonical_mark_anchors = anchors::ALL_MARK
            .into_iter()
            .filter(|a| {
                !anchor_groups.iter().any(|group| group.contains(a))
                    || anchor_groups.iter().any(|group| group[0] == *a)
            })
            .collect();
        for group in anchor_groups {
            for anchor in &group[1..] {
                canonical_mark_anchor_mapping.insert(anchor, group[0]);
            }
        }
        for anchor in &canonical_mark_anchors {
            cx.declare_class(&format!("global..canonical_anchor_{anchor}"));
        }
    } else {
        canonical_mark_anchors = anchors::ALL_MARK
            .into_iter()
            .filter(|a| cx.has_class(&format!("global..canonical_anchor_{a}")))
            .collect();
    }
    let mut pending_rules: Vec<PendingRule> = Vec::new();
    let schema_count = schemas_needing_width_markers.len().max(1);
    for (rule_count, (schema, entry_xs, exit_xs, start_x)) in
        schemas_needing_width_markers.iter().enumerate()
    {
        let (mut x_min, mut x_max) = match schema.glyph() {
            None => (0.0, 0.0),
            Some(glyph) => {
                let bbox = glyph.bbox();
                (bbox.min_x(), bbox.max_x())
            }
        };
        if x_min == 0.0 && x_max == 0.0 {
            x_min = entry_xs[anchors::CURSIVE];
            x_max = exit_xs[anchors::CURSIVE];
        }
        let mark_anchor_selector = if schema.glyph_class == GlyphClass::Mark {
            let glyph = schema.glyph().expect("marks have drawn glyphs");
            let mut only_anchor_class_name: Option<&'static str> = None;
            for anchor in &glyph.anchor_points {
                if anchor.kind == AnchorKind::Mark {
                    if let Some(known) = anchors::ALL_MARK
                        .into_iter()
                        .find(|a| *a == anchor.name.as_str())
                    {
                        assert!(
                            only_anchor_class_name.is_none(),
                            "{schema} has multiple anchors: {only_anchor_class_name:?} and {known}",
                        );
                        only_anchor_class_name = Some(known);
                    }
                }
            }
            let anchor = only_anchor_class_name.expect("a mark must have a mark anchor");
            let anchor = canonical_mark_anchor_mapping.get(anchor).copied().unwrap_or(anchor);
            Some(
                mark_anchor_selectors
                    .entry(anchor)
                    .or_insert_with(|| {
                        cx.new_schema(SchemaDef::new(None, Shape::MarkAnchorSelector { anchor }, 0.0))
                    })
                    .clone(),
            )
        } else {
            None
        };
        let glyph_class_selector = glyph_class_selectors
            .entry(schema.glyph_class)
            .or_insert_with(|| {
                cx.new_schema(SchemaDef::new(
                    None,
                    Shape::GlyphClassSelector(schema.glyph_class),
                    0.0,
                ))
            })
            .clone();
        let mut width_configs: Vec<(f64, DigitKind)> = vec![
            (
                entry_xs[anchors::CURSIVE] - entry_xs[anchors::CONTINUING_OVERLAP],
                DigitKind::Entry,
            ),
            (x_min - start_x, DigitKind::LeftBound),
            (x_max - start_x, DigitKind::RightBound),
        ];
        for anchor in &canonical_mark_anchors {
            width_configs.push((
                exit_xs.get(*anchor).map_or(0.0, |x| x - start_x),
                DigitKind::AnchorWidth,
            ));
        }
        for anchor in anchors::ALL_CURSIVE {
            width_configs.push((
                if schema.glyph_class == GlyphClass::Joiner {
                    exit_xs.get(anchor).map_or(0.0, |x| x - start_x)
                } else {
                    0.0
                },
                DigitKind::AnchorWidth,
            ));
        }
        let mut widths = Vec::with_capacity(width_configs.len());
        for (width, digit_kind) in width_configs {
            let limit = WIDTH_MARKER_RADIX.pow(WIDTH_MARKER_PLACES as u32) / 2;
            assert!(
                (-(limit as f64)..limit as f64).contains(&width),
                "glyph {schema} is too wide: {width} units",
            );
            let width_number = WidthNumber {
                digit_kind,
                width: width.round() as i64,
            };
            let count = width_number_counter.entry(width_number).or_insert(0);
            *count += 1;
            if *count == minimum_optimizable_width_number_count {
                let width_number_schema = width_number_schemas
                    .entry(width_number)
                    .or_insert_with(|| {
                        cx.new_schema(SchemaDef::new(None, Shape::WidthNumber(width_number), 0.0))
                    })
                    .clone();
                let digits = width_number
                    .to_digit_values()
                    .into_iter()
                    .enumerate()
                    .map(|(place, digit)| {
                        s(width_markers
                            .entry((digit_kind, place, digit))
                            .or_insert_with(|| {
                                cx.new_schema(SchemaDef::new(
                                    None,
                                    digit_shape(digit_kind, place, digit),
                                    0.0,
                                ))
                            }))
                    })
                    .collect();
                cx.add_rule(
                    &mut digit_expansion_lookup,
                    Rule::sub(vec![s(&width_number_schema)], digits),
                );
            }
            widths.push(width_number);
        }
        pending_rules.push(PendingRule {
            schema: schema.clone(),
            glyph_class_selector,
            mark_anchor_selector,
            hub_priority: schema.hub_priority(),
            widths,
        });
    }
    for (rule_count, pending) in pending_rules.into_iter().enumerate() {
        let mut final_widths: Vec<Target> = Vec::new();
        for width_number in &pending.widths {
            if width_number_counter[width_number] >= minimum_optimizable_width_number_count {
                final_widths.push(s(&width_number_schemas[width_number]));
            } else {
                for (place, digit) in width_number.to_digit_values().into_iter().enumerate() {
                    final_widths.push(s(width_markers
                        .entry((width_number.digit_kind, place, digit))
                        .or_insert_with(|| {
                            cx.new_schema(SchemaDef::new(
                                None,
                                digit_shape(width_number.digit_kind, place, digit),
                                0.0,
                            ))
                        })));
                }
            }
        }
        let mut outputs = vec![s(&start), s(&pending.glyph_class_selector)];
        if let Some(mark_anchor_selector) = &pending.mark_anchor_selector {
            outputs.push(s(mark_anchor_selector));
        }
        for hub in &hubs[&pending.hub_priority] {
            outputs.push(s(hub));
        }
        outputs.push(s(&pending.schema));
        outputs.extend(final_widths);
        outputs.push(s(&end));
        let lookup_index = rule_count * LOOKUPS_PER_POSITION / schema_count;
        let rule = Rule::sub(vec![s(&pending.schema)], outputs);
        cx.add_rule(&mut lookups[lookup_index], rule);
    }
    lookups.push(digit_expansion_lookup);
    lookups
}

/// Each visible mark without an exit gets an End marker.
pub fn add_end_markers_for_marks(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt");
    let end = find_shape(&cx.new_schemas, |shape| matches!(shape, Shape::End))
        .expect("an end marker must exist by now");
    for schema in snapshot(&cx.new_schemas) {
        if let Some(glyph) = schema.glyph() {
            if schema.glyph_class == GlyphClass::Mark
                && !schema.ignored_for_topography
                && !schema.shape.invisible()
                && !glyph
                    .anchor_points
                    .iter()
                    .any(|a| anchors::ALL_MARK.contains(&a.name.as_str()))
            {
                cx.add_rule(&mut lookup, Rule::sub(vec![s(&schema)], vec![s(&schema), s(&end)]));
            }
        }
    }
    vec![lookup]
}

/// Two adjacent End markers collapse to one.
pub fn remove_false_end_markers(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES | flags::IGNORE_MARKS)
        .reversed();
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    let dummy = cx.new_schema(SchemaDef::new(None, Shape::Dummy, 0.0));
    let end = find_shape(&cx.new_schemas, |shape| matches!(shape, Shape::End))
        .expect("an end marker must exist by now");
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![], vec![s(&end)], vec![s(&end)], vec![s(&dummy)]),
    );
    vec![lookup]
}

/// Entry width digits are zeroed except after a continuing overlap.
pub fn clear_entry_width_markers(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES)
        .with_mark_filtering_set("all");
    let mut zeros: Vec<Option<SchemaRef>> = vec![None; WIDTH_MARKER_PLACES];
    if !cx.has_named_lookup("zero") {
        cx.insert_named_lookup("zero", Lookup::named());
    }
    let mut continuing_overlap = None;
    for schema in snapshot(&cx.schemas) {
        match &schema.shape {
            Shape::EntryWidthDigit(digit) => {
                let place = digit.place;
                cx.class_push("all", schema.clone());
                cx.class_push("idx", schema.clone());
                if digit.digit == 0 {
                    zeros[place] = Some(schema);
                }
            }
            Shape::ContinuingOverlap { .. } => {
                cx.class_push("all", schema.clone());
                continuing_overlap = Some(schema);
            }
            _ => {}
        }
    }
    for schema in snapshot(&cx.new_schemas) {
        if let Shape::EntryWidthDigit(digit) = &schema.shape {
            if digit.digit != 0 {
                let zero = zeros[digit.place].clone().expect("zero digits must exist");
                cx.add_named_rule("zero", Rule::sub(vec![s(&schema)], vec![s(&zero)]));
            }
        }
    }
    let continuing_overlap = continuing_overlap.expect("a continuing overlap must exist");
    cx.add_rule(
        &mut lookup,
        Rule::chain(
            vec![s(&continuing_overlap)],
            vec![c("idx"); WIDTH_MARKER_PLACES],
            vec![],
            vec![None; WIDTH_MARKER_PLACES],
        ),
    );
    cx.add_rule(
        &mut lookup,
        Rule::chain(
            vec![],
            vec![c("idx"); WIDTH_MARKER_PLACES],
            vec![],
            vec![Some("zero".to_string()); WIDTH_MARKER_PLACES],
        ),
    );
    vec![lookup]
}

struct DigitFamily {
    letter: char,
    kind: DigitKind,
    originals: Vec<SchemaRef>,
    by_index: IndexMap<i64, SchemaRef>,
}

/// The arithmetic core: for every (augend digit, addend digit,
/// carry-in) at one place, a rule replaces the addend with the sum
/// digit and possibly emits a Carry marker.
///
/// GSUB cannot add two digits directly, so each (place, carry-in,
/// addend) triple gets a subsidiary lookup that selects the sum rule;
/// the outer rule chains into it through a mark filtering set matching
/// only the relevant sub-context.
pub fn sum_width_markers(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt").with_mark_filtering_set("all");
    let mut carry_schema = None;
    let mut continuing_overlap = None;
    let mut entry = DigitFamily {
        letter: 'i',
        kind: DigitKind::Entry,
        originals: Vec::new(),
        by_index: IndexMap::new(),
    };
    let mut left = DigitFamily {
        letter: 'l',
        kind: DigitKind::LeftBound,
        originals: Vec::new(),
        by_index: IndexMap::new(),
    };
    let mut right = DigitFamily {
        letter: 'r',
        kind: DigitKind::RightBound,
        originals: Vec::new(),
        by_index: IndexMap::new(),
    };
    let mut anchor = DigitFamily {
        letter: 'a',
        kind: DigitKind::AnchorWidth,
        originals: Vec::new(),
        by_index: IndexMap::new(),
    };
    let mut mark_anchor_selectors: IndexMap<&'static str, SchemaRef> = IndexMap::new();
    let mut glyph_class_selectors: IndexMap<GlyphClass, SchemaRef> = IndexMap::new();
    let canonical_anchors: Vec<&'static str> = anchors::all()
        .filter(|a| {
            !anchors::ALL_MARK.contains(a) || cx.has_class(&format!("global..canonical_anchor_{a}"))
        })
        .collect();
    let canonical_anchor_count = canonical_anchors.len();
    for schema in snapshot(&cx.schemas) {
        match &schema.shape {
            Shape::ContinuingOverlap { .. } => {
                cx.class_push("all", schema.clone());
                continuing_overlap = Some(schema);
            }
            Shape::Carry => carry_schema = Some(schema),
            Shape::MarkAnchorSelector { anchor } => {
                mark_anchor_selectors.insert(anchor, schema);
            }
            Shape::GlyphClassSelector(glyph_class) => {
                glyph_class_selectors.insert(*glyph_class, schema);
            }
            shape => {
                if let Some((kind, digit)) = as_digit(shape) {
                    let family = match kind {
                        DigitKind::Entry => &mut entry,
                        DigitKind::LeftBound => &mut left,
                        DigitKind::RightBound => &mut right,
                        DigitKind::AnchorWidth => &mut anchor,
                    };
                    family
                        .by_index
                        .insert(digit.place as i64 * WIDTH_MARKER_RADIX + digit.digit, schema.clone());
                    family.originals.push(schema.clone());
                    if cx.new_schemas.contains(&schema) {
                        cx.class_push("all", schema.clone());
                        cx.class_push(&format!("{}dx_{}", family.letter, digit.place), schema.clone());
                        if matches!(kind, DigitKind::Entry | DigitKind::AnchorWidth) {
                            cx.class_push(&format!("iadx_{}", digit.place), schema.clone());
                        }
                    }
                }
            }
        }
    }
    let carry_schema = carry_schema.unwrap_or_else(|| {
        let carry = cx.new_schema(SchemaDef::new(None, Shape::Carry, 0.0));
        cx.class_push("all", carry.clone());
        carry
    });
    let continuing_overlap = continuing_overlap.expect("a continuing overlap must exist");
    // Carry-in 0 has no marker glyph; `None` stands in for it.
    let carry_schemas: [Option<SchemaRef>; 2] = [None, Some(carry_schema)];
    struct AddendConfig {
        continuing_overlap_is_relevant: bool,
        augend_skip_backtrack: usize,
        addend_skip_backtrack: usize,
        addend: DigitKind,
    }
    let blocks: [(DigitKind, Vec<AddendConfig>); 2] = [
        (DigitKind::Entry, {
            let mut configs: Vec<AddendConfig> = (0..canonical_anchor_count)
                .map(|i| AddendConfig {
                    continuing_overlap_is_relevant: false,
                    augend_skip_backtrack: 0,
                    addend_skip_backtrack: i,
                    addend: DigitKind::AnchorWidth,
                })
                .collect();
            configs.push(AddendConfig {
                continuing_overlap_is_relevant: false,
                augend_skip_backtrack: 0,
                addend_skip_backtrack: 0,
                addend: DigitKind::LeftBound,
            });
            configs.push(AddendConfig {
                continuing_overlap_is_relevant: false,
                augend_skip_backtrack: 0,
                addend_skip_backtrack: 0,
                addend: DigitKind::RightBound,
            });
            configs
        }),
        (DigitKind::AnchorWidth, {
            let mut configs: Vec<AddendConfig> = (0..canonical_anchor_count)
                .rev()
                .map(|i| AddendConfig {
                    continuing_overlap_is_relevant: true,
                    augend_skip_backtrack: i,
                    addend_skip_backtrack: 0,
                    addend: DigitKind::Entry,
                })
                .collect();
            configs.extend((0..canonical_anchor_count).map(|i| AddendConfig {
                continuing_overlap_is_relevant: false,
                augend_skip_backtrack: i,
                addend_skip_backtrack: canonical_anchor_count - 1 - i,
                addend: DigitKind::AnchorWidth,
            }));
            configs
        }),
    ];
    for (augend_kind, configs) in blocks {
        let (augend_letter, original_augend_schemas) = match augend_kind {
            DigitKind::Entry => ('i', entry.originals.clone()),
            DigitKind::AnchorWidth => ('a', anchor.originals.clone()),
            _ => unreachable!(),
        };
        for augend_schema in &original_augend_schemas {
            let augend_is_new = cx.new_schemas.contains(augend_schema);
            let (_, augend_digit) = as_digit(&augend_schema.shape).unwrap();
            let place = augend_digit.place;
            let augend = augend_digit.digit;
            for config in &configs {
                let addend_family = match config.addend {
                    DigitKind::Entry => &mut entry,
                    DigitKind::LeftBound => &mut left,
                    DigitKind::RightBound => &mut right,
                    DigitKind::AnchorWidth => &mut anchor,
                };
                let addend_letter = addend_family.letter;
                let original_addend_schemas = addend_family.originals.clone();
                for carry_in_schema in &carry_schemas {
                    let carry_in = i64::from(carry_in_schema.is_some());
                    let carry_in_is_new = carry_in_schema
                        .as_ref()
                        .is_some_and(|carry| cx.new_schemas.contains(carry));
                    for addend_schema in &original_addend_schemas {
                        let (_, addend_digit) = as_digit(&addend_schema.shape).unwrap();
                        if place != addend_digit.place {
                            continue;
                        }
                        if !(carry_in_is_new
                            || augend_is_new
                            || cx.new_schemas.contains(addend_schema))
                        {
                            continue;
                        }
                        let addend = addend_digit.digit;
                        let sum = carry_in + augend + addend;
                        let carry_out = sum.div_euclid(WIDTH_MARKER_RADIX);
                        let sum_digit = sum.rem_euclid(WIDTH_MARKER_RADIX);
                        let context_in_lookup_name = format!("e{place}_c{carry_in}_{addend_letter}{addend}");
                        if config.continuing_overlap_is_relevant {
                            cx.class_push(&context_in_lookup_name, continuing_overlap.clone());
                        }
                        cx.class_extend(
                            &context_in_lookup_name,
                            cx.class(&format!("{augend_letter}dx_{place}")),
                        );
                        if !((carry_out != 0 && place != WIDTH_MARKER_PLACES - 1)
                            || sum_digit != addend)
                        {
                            continue;
                        }
                        let sum_index = place as i64 * WIDTH_MARKER_RADIX + sum_digit;
                        let sum_digit_schema = match addend_family.by_index.get(&sum_index) {
                            Some(schema) => schema.clone(),
                            None => {
                                let schema = cx.new_schema(SchemaDef::new(
                                    None,
                                    digit_shape(config.addend, place, sum_digit),
                                    0.0,
                                ));
                                addend_family.by_index.insert(sum_index, schema.clone());
                                cx.class_push(&format!("{addend_letter}dx_{place}"), schema.clone());
                                cx.class_push("all", schema.clone());
                                schema
                            }
                        };
                        let mut outputs = vec![s(&sum_digit_schema)];
                        if carry_out != 0 && place != WIDTH_MARKER_PLACES - 1 {
                            outputs.push(s(carry_schemas[1].as_ref().unwrap()));
                        }
                        let sum_lookup_name = sum_digit.to_string();
                        if !cx.has_named_lookup(&sum_lookup_name) {
                            cx.insert_named_lookup(&sum_lookup_name, Lookup::named());
                        }
                        if !cx.has_named_lookup(&context_in_lookup_name) {
                            cx.class_push(&context_in_lookup_name, addend_schema.clone());
                            cx.insert_named_lookup(
                                &context_in_lookup_name,
                                Lookup::named()
                                    .with_flags(flags::IGNORE_LIGATURES)
                                    .with_mark_filtering_set(context_in_lookup_name.clone()),
                            );
                        }
                        let contexts_in: Vec<Target> = match carry_in_schema {
                            Some(carry) => vec![s(carry)],
                            None => vec![],
                        };
                        cx.add_rule(
                            &mut lookup,
                            Rule::chain(
                                contexts_in,
                                vec![s(addend_schema)],
                                vec![],
                                vec![Some(context_in_lookup_name.clone())],
                            ),
                        );
                        cx.class_extend(
                            &context_in_lookup_name,
                            cx.class(&format!("idx_{place}")),
                        );
                        if config.addend_skip_backtrack != 0 {
                            cx.class_extend(
                                &context_in_lookup_name,
                                cx.class(&format!("{addend_letter}dx_{place}")),
                            );
                        }
                        let mut context_in_lookup_context_in: Vec<Target> = Vec::new();
                        if augend_letter == 'i' && addend_letter == 'a' {
                            let selector = glyph_class_selectors
                                .entry(GlyphClass::Joiner)
                                .or_insert_with(|| {
                                    let schema = cx.new_schema(SchemaDef::new(
                                        None,
                                        Shape::GlyphClassSelector(GlyphClass::Joiner),
                                        0.0,
                                    ));
                                    cx.class_push("all", schema.clone());
                                    schema
                                })
                                .clone();
                            cx.class_push(&context_in_lookup_name, selector.clone());
                            context_in_lookup_context_in.push(s(&selector));
                        }
                        context_in_lookup_context_in.push(s(augend_schema));
                        context_in_lookup_context_in.extend(
                            std::iter::repeat(c(format!("iadx_{place}")))
                                .take(config.augend_skip_backtrack),
                        );
                        if augend_letter == 'a' && addend_letter == 'a' {
                            let selector = glyph_class_selectors
                                .entry(GlyphClass::Mark)
                                .or_insert_with(|| {
                                    let schema = cx.new_schema(SchemaDef::new(
                                        None,
                                        Shape::GlyphClassSelector(GlyphClass::Mark),
                                        0.0,
                                    ));
                                    cx.class_push("all", schema.clone());
                                    schema
                                })
                                .clone();
                            cx.class_push(&context_in_lookup_name, selector.clone());
                            context_in_lookup_context_in.push(s(&selector));
                            context_in_lookup_context_in.push(c(format!("iadx_{place}")));
                        } else if config.augend_skip_backtrack == 1 {
                            context_in_lookup_context_in.push(s(&continuing_overlap));
                        } else if augend_letter == 'a'
                            && addend_letter == 'i'
                            && config.augend_skip_backtrack != 0
                        {
                            let anchor_name = canonical_anchors
                                [canonical_anchors.len() - config.augend_skip_backtrack - 1];
                            let selector = mark_anchor_selectors
                                .entry(anchor_name)
                                .or_insert_with(|| {
                                    let schema = cx.new_schema(SchemaDef::new(
                                        None,
                                        Shape::MarkAnchorSelector { anchor: anchor_name },
                                        0.0,
                                    ));
                                    cx.class_push("all", schema.clone());
                                    schema
                                })
                                .clone();
                            cx.class_push(&context_in_lookup_name, selector.clone());
                            context_in_lookup_context_in.push(s(&selector));
                        }
                        context_in_lookup_context_in.extend(
                            std::iter::repeat(c(format!("iadx_{place}")))
                                .take(config.addend_skip_backtrack),
                        );
                        cx.add_named_rule(
                            &context_in_lookup_name,
                            Rule::chain(
                                context_in_lookup_context_in,
                                vec![s(addend_schema)],
                                vec![],
                                vec![Some(sum_lookup_name.clone())],
                            ),
                        );
                        cx.add_named_rule(
                            &sum_lookup_name,
                            Rule::sub(vec![s(addend_schema)], outputs),
                        );
                    }
                }
            }
        }
    }
    vec![lookup]
}

/// A reverse-chain min/max per place: the more extreme bound digit
/// wins between two successive candidates.
pub fn calculate_bound_extrema(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut left_lookup = Lookup::new(b"dist", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES)
        .with_mark_filtering_set("ldx");
    if !cx.has_named_lookup("ldx_copy") {
        cx.insert_named_lookup(
            "ldx_copy",
            Lookup::named()
                .with_flags(flags::IGNORE_LIGATURES)
                .with_mark_filtering_set("ldx"),
        );
    }
    let mut right_lookup = Lookup::new(b"dist", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES)
        .with_mark_filtering_set("rdx");
    if !cx.has_named_lookup("rdx_copy") {
        cx.insert_named_lookup(
            "rdx_copy",
            Lookup::named()
                .with_flags(flags::IGNORE_LIGATURES)
                .with_mark_filtering_set("rdx"),
        );
    }
    let mut left_digit_schemas: IndexMap<i64, SchemaRef> = IndexMap::new();
    let mut right_digit_schemas: IndexMap<i64, SchemaRef> = IndexMap::new();
    for schema in snapshot(&cx.schemas) {
        match &schema.shape {
            Shape::LeftBoundDigit(digit) => {
                left_digit_schemas
                    .insert(digit.place as i64 * WIDTH_MARKER_RADIX + digit.digit, schema.clone());
                if cx.new_schemas.contains(&schema) {
                    cx.class_push("ldx", schema);
                }
            }
            Shape::RightBoundDigit(digit) => {
                right_digit_schemas
                    .insert(digit.place as i64 * WIDTH_MARKER_RADIX + digit.digit, schema.clone());
                if cx.new_schemas.contains(&schema) {
                    cx.class_push("rdx", schema);
                }
            }
            _ => {}
        }
    }
    for place in (0..WIDTH_MARKER_PLACES).rev() {
        for i in 0..WIDTH_MARKER_RADIX {
            let left_schema_i = left_digit_schemas.get(&(place as i64 * WIDTH_MARKER_RADIX + i));
            let right_schema_i = right_digit_schemas.get(&(place as i64 * WIDTH_MARKER_RADIX + i));
            let i_signed = if place != WIDTH_MARKER_PLACES - 1 || i < WIDTH_MARKER_RADIX / 2 {
                i
            } else {
                i - WIDTH_MARKER_RADIX
            };
            if left_schema_i.is_none() && right_schema_i.is_none() {
                continue;
            }
            for j in 0..WIDTH_MARKER_RADIX {
                if i == j {
                    continue;
                }
                let j_signed = if place != WIDTH_MARKER_PLACES - 1 || j < WIDTH_MARKER_RADIX / 2 {
                    j
                } else {
                    j - WIDTH_MARKER_RADIX
                };
                struct Extremum<'a> {
                    schema_i: Option<&'a SchemaRef>,
                    digit_schemas: &'a IndexMap<i64, SchemaRef>,
                    marker_class: &'static str,
                    copy_lookup_name: &'static str,
                    keep: bool,
                }
                let sides = [
                    Extremum {
                        schema_i: left_schema_i,
                        digit_schemas: &left_digit_schemas,
                        marker_class: "ldx",
                        copy_lookup_name: "ldx_copy",
                        keep: i_signed > j_signed,
                    },
                    Extremum {
                        schema_i: right_schema_i,
                        digit_schemas: &right_digit_schemas,
                        marker_class: "rdx",
                        copy_lookup_name: "rdx_copy",
                        keep: i_signed < j_signed,
                    },
                ];
                let mut rules = Vec::new();
                for side in sides {
                    let Some(schema_i) = side.schema_i else {
                        continue;
                    };
                    let Some(schema_j) =
                        side.digit_schemas.get(&(place as i64 * WIDTH_MARKER_RADIX + j))
                    else {
                        continue;
                    };
                    let (_, digit_i) = as_digit(&schema_i.shape).unwrap();
                    let (_, digit_j) = as_digit(&schema_j.shape).unwrap();
                    let place_j = digit_j.place;
                    let mut contexts_in = vec![s(schema_i)];
                    contexts_in.extend(
                        std::iter::repeat(c(side.marker_class))
                            .take(WIDTH_MARKER_PLACES - digit_i.place - 1),
                    );
                    let mut inputs: Vec<Target> =
                        std::iter::repeat(c(side.marker_class)).take(place_j).collect();
                    inputs.push(s(schema_j));
                    let lookups = vec![
                        if side.keep {
                            None
                        } else {
                            Some(side.copy_lookup_name.to_string())
                        };
                        place_j + 1
                    ];
                    let mut copy_contexts_in = vec![s(schema_i)];
                    copy_contexts_in.extend(
                        std::iter::repeat(c(side.marker_class)).take(WIDTH_MARKER_PLACES - 1),
                    );
                    rules.push((
                        side.marker_class == "ldx",
                        Rule::chain(contexts_in, inputs, vec![], lookups),
                        side.copy_lookup_name,
                        Rule::contextual(copy_contexts_in, vec![s(schema_j)], vec![], vec![s(schema_i)]),
                    ));
                }
                for (is_left, chain_rule, copy_lookup_name, copy_rule) in rules {
                    let lookup = if is_left {
                        &mut left_lookup
                    } else {
                        &mut right_lookup
                    };
                    cx.add_rule(lookup, chain_rule);
                    cx.add_named_rule(copy_lookup_name, copy_rule);
                }
            }
        }
    }
    vec![left_lookup, right_lookup]
}

/// Two adjacent Start markers collapse to one.
pub fn remove_false_start_markers(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES)
        .with_mark_filtering_set("all")
        .reversed();
    let dummy = find_shape(&cx.new_schemas, |shape| matches!(shape, Shape::Dummy))
        .expect("a dummy must exist by now");
    let start = find_shape(&cx.new_schemas, |shape| matches!(shape, Shape::Start))
        .expect("a start marker must exist by now");
    cx.class_push("all", start.clone());
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![s(&start)], vec![s(&start)], vec![], vec![s(&dummy)]),
    );
    vec![lookup]
}

/// Hubs after initial secants switch to the secant flavor, which
/// attaches through the continuing-overlap anchors.
pub fn mark_hubs_after_initial_secants(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt")
        .with_mark_filtering_set("all")
        .reversed();
    let mut hubs = Vec::new();
    for schema in snapshot(&cx.new_schemas) {
        match &schema.shape {
            Shape::Hub(hub) if !hub.initial_secant => {
                hubs.push((schema.clone(), *hub));
                cx.class_push("all", schema);
            }
            Shape::Line(line)
                if line.secant.is_some() && schema.glyph_class == GlyphClass::Joiner =>
            {
                cx.class_push("secant", schema);
            }
            _ => {}
        }
    }
    for (hub_schema, hub) in hubs {
        let initial_secant_hub = cx.new_schema(hub_schema.to_def().shape(Shape::Hub(Hub {
            initial_secant: true,
            ..hub
        })));
        cx.class_push(HUB_CLASS, initial_secant_hub.clone());
        cx.class_push(CONTINUING_OVERLAP_OR_HUB_CLASS, initial_secant_hub.clone());
        cx.add_rule(
            &mut lookup,
            Rule::contextual(
                vec![c("secant")],
                vec![s(&hub_schema)],
                vec![],
                vec![s(&initial_secant_hub)],
            ),
        );
    }
    vec![lookup]
}

/// Reduces the `Start … Hub … Hub … glyph` chain to the single hub
/// with the highest priority.
pub fn find_real_hub(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES)
        .with_mark_filtering_set("all");
    let mut dummy = None;
    let mut continuing_overlap = None;
    let mut hubs: IndexMap<i8, Vec<SchemaRef>> = IndexMap::new();
    for schema in snapshot(&cx.new_schemas) {
        match &schema.shape {
            Shape::Dummy => dummy = Some(schema),
            Shape::Hub(hub) => {
                hubs.entry(hub.priority).or_default().push(schema.clone());
                cx.class_push("all", schema);
            }
            Shape::InitialSecantMarker => cx.class_push("all", schema),
            Shape::ContinuingOverlap { .. } => {
                continuing_overlap = Some(schema.clone());
                cx.class_push("all", schema);
            }
            _ => {}
        }
    }
    let dummy = dummy.expect("a dummy must exist by now");
    let continuing_overlap = continuing_overlap.expect("a continuing overlap must exist");
    hubs.sort_keys();
    for (priority_a, hubs_a) in &hubs {
        for (priority_b, hubs_b) in &hubs {
            for hub_a in hubs_a {
                let Shape::Hub(hub_a_shape) = &hub_a.shape else {
                    unreachable!();
                };
                if !hub_a_shape.initial_secant {
                    cx.add_rule(
                        &mut lookup,
                        Rule::contextual(
                            vec![s(&continuing_overlap)],
                            vec![s(hub_a)],
                            vec![],
                            vec![s(&dummy)],
                        ),
                    );
                }
                for hub_b in hubs_b {
                    let Shape::Hub(hub_b_shape) = &hub_b.shape else {
                        unreachable!();
                    };
                    if hub_b_shape.initial_secant {
                        continue;
                    }
                    if priority_a <= priority_b {
                        cx.add_rule(
                            &mut lookup,
                            Rule::contextual(vec![s(hub_a)], vec![s(hub_b)], vec![], vec![s(&dummy)]),
                        );
                    } else {
                        cx.add_rule(
                            &mut lookup,
                            Rule::contextual(vec![], vec![s(hub_a)], vec![s(hub_b)], vec![s(&dummy)]),
                        );
                    }
                }
            }
        }
    }
    vec![lookup]
}

/// Materializes a zero-valued, done-status left-bound chain right
/// after every Start marker, ready to accept max-bound updates.
pub fn expand_start_markers(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt");
    let start = find_shape(&cx.new_schemas, |shape| matches!(shape, Shape::Start))
        .expect("a start marker must exist by now");
    let mut outputs = Vec::new();
    for place in 0..WIDTH_MARKER_PLACES {
        outputs.push(s(&cx.new_schema(SchemaDef::new(
            None,
            Shape::LeftBoundDigit(Digit::with_status(place, 0, DigitStatus::Done)),
            0.0,
        ))));
    }
    outputs.push(s(&start));
    cx.add_rule(&mut lookup, Rule::sub(vec![s(&start)], outputs));
    vec![lookup]
}

/// Freezes bound and anchor digits that have no more candidates to
/// absorb before the End marker.
pub fn mark_maximum_bounds(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut left_lookup = Lookup::new(b"dist", b"dflt")
        .with_mark_filtering_set("ldx")
        .reversed();
    let mut right_lookup = Lookup::new(b"dist", b"dflt")
        .with_mark_filtering_set("rdx")
        .reversed();
    let mut anchor_lookup = Lookup::new(b"dist", b"dflt")
        .with_mark_filtering_set("adx")
        .reversed();
    let end = find_shape(&cx.schemas, |shape| matches!(shape, Shape::End))
        .expect("an end marker must exist by now");
    let mut new_digits: Vec<(DigitKind, SchemaRef)> = Vec::new();
    for schema in snapshot(&cx.new_schemas) {
        match &schema.shape {
            Shape::LeftBoundDigit(_) => {
                cx.class_push("ldx", schema.clone());
                new_digits.push((DigitKind::LeftBound, schema));
            }
            Shape::RightBoundDigit(_) => {
                cx.class_push("rdx", schema.clone());
                new_digits.push((DigitKind::RightBound, schema));
            }
            Shape::AnchorWidthDigit(_) => {
                cx.class_push("adx", schema.clone());
                new_digits.push((DigitKind::AnchorWidth, schema));
            }
            _ => {}
        }
    }
    for (kind, schema) in new_digits {
        let (_, digit) = as_digit(&schema.shape).unwrap();
        if digit.status != DigitStatus::Normal {
            continue;
        }
        let (lookup, class_name, status) = match kind {
            DigitKind::LeftBound => (&mut left_lookup, "ldx", DigitStatus::AlmostDone),
            DigitKind::RightBound => (&mut right_lookup, "rdx", DigitStatus::Done),
            DigitKind::AnchorWidth => (&mut anchor_lookup, "adx", DigitStatus::Done),
            DigitKind::Entry => unreachable!(),
        };
        let mut contexts_out: Vec<Target> = std::iter::repeat(c(class_name))
            .take(WIDTH_MARKER_PLACES - digit.place - 1)
            .collect();
        contexts_out.push(s(&end));
        let output = cx.new_schema(SchemaDef::new(
            None,
            digit_shape_with_status(kind, digit.place, digit.digit, status),
            0.0,
        ));
        cx.add_rule(
            lookup,
            Rule::contextual(vec![], vec![s(&schema)], contexts_out, vec![s(&output)]),
        );
    }
    vec![left_lookup, right_lookup, anchor_lookup]
}

fn digit_shape_with_status(kind: DigitKind, place: usize, digit: i64, status: DigitStatus) -> Shape {
    let d = Digit::with_status(place, digit, status);
    match kind {
        DigitKind::Entry => Shape::EntryWidthDigit(d),
        DigitKind::LeftBound => Shape::LeftBoundDigit(d),
        DigitKind::RightBound => Shape::RightBoundDigit(d),
        DigitKind::AnchorWidth => Shape::AnchorWidthDigit(d),
    }
}

/// Copies the settled maximum left bound into the zero chain after the
/// Start marker.
pub fn copy_maximum_left_bound_to_start(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES)
        .with_mark_filtering_set("almost_done");
    let mut new_left_totals = Vec::new();
    let mut new_left_start_totals: Vec<Option<SchemaRef>> = vec![None; WIDTH_MARKER_PLACES];
    for schema in snapshot(&cx.new_schemas) {
        if let Shape::LeftBoundDigit(digit) = &schema.shape {
            let place = digit.place;
            match digit.status {
                DigitStatus::AlmostDone => {
                    new_left_totals.push(schema.clone());
                    cx.class_push("almost_done", schema.clone());
                    cx.class_push("all", schema);
                }
                DigitStatus::Done if digit.digit == 0 => {
                    new_left_start_totals[place] = Some(schema);
                }
                _ => {}
            }
        }
    }
    for total in new_left_totals {
        let Shape::LeftBoundDigit(total_digit) = &total.shape else {
            unreachable!();
        };
        let done = if total_digit.digit == 0 {
            new_left_start_totals[total_digit.place]
                .clone()
                .expect("the zero chain must exist")
        } else {
            cx.new_schema(SchemaDef::new(
                None,
                Shape::LeftBoundDigit(Digit::with_status(
                    total_digit.place,
                    total_digit.digit,
                    DigitStatus::Done,
                )),
                0.0,
            ))
        };
        cx.class_push("all", done.clone());
        if total_digit.digit != 0 {
            let input = new_left_start_totals[total_digit.place]
                .clone()
                .expect("the zero chain must exist");
            if !cx.class_contains("all", &input) {
                cx.class_push("all", input.clone());
            }
            let mut contexts_out: Vec<Target> = std::iter::repeat(c("all"))
                .take(WIDTH_MARKER_PLACES - 1)
                .collect();
            contexts_out.push(s(&total));
            cx.add_rule(
                &mut lookup,
                Rule::contextual(vec![], vec![s(&input)], contexts_out, vec![s(&done)]),
            );
        }
    }
    vec![lookup]
}

/// Converts every done digit into its actual x advance, with signed
/// interpretation at the top place.
pub fn dist(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"dist", b"dflt");
    for schema in snapshot(&cx.new_schemas) {
        let Some((kind, digit)) = as_digit(&schema.shape) else {
            continue;
        };
        if kind == DigitKind::Entry || digit.status != DigitStatus::Done {
            continue;
        }
        let place = digit.place;
        let mut digit_value = digit.digit;
        if kind == DigitKind::LeftBound {
            digit_value = WIDTH_MARKER_RADIX - 1 - digit_value;
            if place == 0 {
                digit_value += 1;
            }
        }
        if place == WIDTH_MARKER_PLACES - 1 && digit_value >= WIDTH_MARKER_RADIX / 2 {
            digit_value -= WIDTH_MARKER_RADIX;
        }
        let mut x_advance = (digit_value * WIDTH_MARKER_RADIX.pow(place as u32)) as f64;
        if kind == DigitKind::AnchorWidth {
            x_advance = -x_advance;
        } else if place == 0 {
            x_advance += DEFAULT_SIDE_BEARING;
        }
        if x_advance != 0.0 {
            cx.add_rule(
                &mut lookup,
                Rule::pos(vec![], vec![s(&schema)], vec![], None, Some(vec![Some(x_advance)])),
            );
        }
    }
    vec![lookup]
}

pub fn phase_list() -> Vec<PhaseDef> {
    vec![
        phase!(add_shims_for_pseudo_cursive),
        phase!(shrink_wrap_enclosing_circle),
        phase!(add_width_markers),
        phase!(add_end_markers_for_marks),
        phase!(remove_false_end_markers),
        phase!(clear_entry_width_markers),
        phase!(sum_width_markers),
        phase!(calculate_bound_extrema),
        phase!(remove_false_start_markers),
        phase!(mark_hubs_after_initial_secants),
        phase!(find_real_hub),
        phase!(mark_maximum_bounds),
        phase!(expand_start_markers),
        phase!(copy_maximum_left_bound_to_start),
        phase!(dist),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding_respects_base_and_minimum() {
        assert_eq!(round_with_base(100.0, 6.0, MINIMUM_STROKE_GAP), 102.0);
        assert_eq!(round_with_base(10.0, 6.0, MINIMUM_STROKE_GAP), MINIMUM_STROKE_GAP);
        assert_eq!(round_with_base(350.0, 200.0, MINIMUM_STROKE_GAP), 400.0);
    }

    #[test]
    fn digit_shapes_round_trip() {
        for kind in [
            DigitKind::Entry,
            DigitKind::LeftBound,
            DigitKind::RightBound,
            DigitKind::AnchorWidth,
        ] {
            let shape = digit_shape(kind, 3, 2);
            let (decoded_kind, digit) = as_digit(&shape).unwrap();
            assert_eq!(decoded_kind, kind);
            assert_eq!((digit.place, digit.digit), (3, 2));
        }
    }

    #[test]
    fn signed_digit_arithmetic_matches_dist() {
        // The top place reinterprets large digits as negative.
        let number = WidthNumber {
            digit_kind: DigitKind::AnchorWidth,
            width: -85,
        };
        let digits = number.to_digit_values();
        let mut total = 0i64;
        for (place, digit) in digits.iter().enumerate() {
            let mut digit = *digit;
            if place == WIDTH_MARKER_PLACES - 1 && digit >= WIDTH_MARKER_RADIX / 2 {
                digit -= WIDTH_MARKER_RADIX;
            }
            total += digit * WIDTH_MARKER_RADIX.pow(place as u32);
        }
        assert_eq!(total, -85);
    }
}
