//! The main substitution phases.
//!
//! These run before sifting. They validate the input, build overlap
//! trees, contextualize letters against their neighbors, ligate
//! diphthongs, rotate diacritics, and shade.

use indexmap::{IndexMap, IndexSet};

use crate::context::Context;
use crate::fea::{c, flags, s, Lookup, Rule, Target};
use crate::geometry::{in_degree_range, normalize};
use crate::phases::{
    phase, PhaseCx, PhaseDef, CHILD_EDGE_CLASSES, CONTINUING_OVERLAP_CLASS,
    CONTINUING_OVERLAP_OR_HUB_CLASS, INTER_EDGE_CLASSES, PARENT_EDGE_CLASS,
};
use crate::schema::{SchemaDef, SchemaRef};
use crate::shapes::{
    Circle, CircleRole, Complex, Component, Curve, Edge, Instruction, Line, Ou, Shape, Space,
};
use crate::util::{
    FloatKey, GlyphClass, Ignorability, JoiningType, CAP_HEIGHT, EPSILON, MAX_DOUBLE_MARKS,
    MAX_TREE_DEPTH, MAX_TREE_WIDTH, SMALL_DIGIT_FACTOR, SUBSCRIPT_DEPTH, SUPERSCRIPT_HEIGHT,
};

use crate::phases::number_token as num;

fn bool_key(b: bool) -> &'static str {
    if b {
        "T"
    } else {
        "F"
    }
}

fn snapshot(set: &IndexSet<SchemaRef>) -> Vec<SchemaRef> {
    set.iter().cloned().collect()
}

fn index_products(count: usize, width: usize) -> Vec<Vec<usize>> {
    let mut result = vec![Vec::new()];
    for _ in 0..width {
        let mut next = Vec::new();
        for prefix in &result {
            for i in 0..count {
                let mut p = prefix.clone();
                p.push(i);
                next.push(p);
            }
        }
        result = next;
    }
    result
}

/// Enumerates the flattened forms of all overlap trees up to a maximum
/// depth, as rule target sequences.
fn make_trees(
    node: &Target,
    edge: Option<&Target>,
    maximum_depth: usize,
    top_widths: Option<&[usize]>,
    prefix_depth: Option<usize>,
) -> Vec<Vec<Target>> {
    if maximum_depth == 0 {
        return Vec::new();
    }
    let mut trees = Vec::new();
    match prefix_depth {
        None => {
            let subtrees = make_trees(node, edge, maximum_depth - 1, None, None);
            let widths: Vec<usize> = match top_widths {
                Some(widths) => widths.to_vec(),
                None => (0..=MAX_TREE_WIDTH).collect(),
            };
            for width in widths {
                for index_set in index_products(subtrees.len(), width) {
                    let mut tree: Vec<Target> = if top_widths.is_none() {
                        let mut t = vec![node.clone()];
                        if let Some(edge) = edge {
                            t.extend(std::iter::repeat(edge.clone()).take(width));
                        }
                        t
                    } else {
                        Vec::new()
                    };
                    for i in index_set {
                        tree.extend(subtrees[i].iter().cloned());
                    }
                    trees.push(tree);
                }
            }
        }
        Some(1) => trees.push(Vec::new()),
        Some(depth) => {
            let shallow_subtrees = make_trees(node, edge, maximum_depth.saturating_sub(2), None, None);
            let deep_subtrees = make_trees(node, edge, maximum_depth - 1, None, Some(depth - 1));
            let widths: Vec<usize> = match top_widths {
                Some(widths) => widths.to_vec(),
                None => (1..=MAX_TREE_WIDTH).collect(),
            };
            for width in widths {
                for shallow_index_set in index_products(shallow_subtrees.len(), width.saturating_sub(1))
                {
                    for deep_subtree in &deep_subtrees {
                        let edge_counts: Vec<usize> = if depth == 2 {
                            vec![width]
                        } else {
                            (width..=MAX_TREE_WIDTH).collect()
                        };
                        for edge_count in edge_counts {
                            let mut tree: Vec<Target> = if top_widths.is_none() {
                                let mut t = vec![node.clone()];
                                if let Some(edge) = edge {
                                    t.extend(std::iter::repeat(edge.clone()).take(edge_count));
                                }
                                t
                            } else {
                                Vec::new()
                            };
                            for &i in &shallow_index_set {
                                tree.extend(shallow_subtrees[i].iter().cloned());
                            }
                            tree.extend(deep_subtree.iter().cloned());
                            trees.push(tree);
                        }
                    }
                }
            }
        }
    }
    trees
}

pub fn create_diagonal_fractions(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup_numr = Lookup::new(b"numr", b"dflt");
    let mut lookup_dnom = Lookup::new(b"dnom", b"dflt");
    let mut lookup_rlig = Lookup::new(b"rlig", b"dflt");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup_numr, lookup_dnom, lookup_rlig];
    }
    let mut slash = None;
    for schema in snapshot(&cx.new_schemas) {
        match schema.cmap {
            Some(cmap) if (0x30..=0x39).contains(&cmap) => {
                cx.class_push("digit", schema.clone());
                cx.class_push("digit_or_slash", schema.clone());
                let dnom = cx.new_schema(
                    schema
                        .to_def()
                        .cmap(None)
                        .y_max(Some(SMALL_DIGIT_FACTOR * CAP_HEIGHT)),
                );
                let numr = cx.new_schema(
                    schema
                        .to_def()
                        .cmap(None)
                        .y_min(Some((1.0 - SMALL_DIGIT_FACTOR) * CAP_HEIGHT)),
                );
                cx.class_push("dnom", dnom.clone());
                cx.class_push("numr", numr);
                cx.class_push("dnom_or_slash", dnom);
            }
            Some(0x2044) => {
                slash = Some(schema.clone());
                cx.class_push("digit_or_slash", schema.clone());
            }
            _ => {}
        }
    }
    let slash = slash.expect("the schema table must include U+2044 FRACTION SLASH");
    let valid_slash = cx.new_schema(slash.to_def().cmap(None).side_bearing(-250.0));
    cx.class_push("dnom_or_slash", valid_slash.clone());
    cx.add_rule(&mut lookup_numr, Rule::sub(vec![c("digit")], vec![c("numr")]));
    cx.add_rule(&mut lookup_dnom, Rule::sub(vec![c("digit")], vec![c("dnom")]));
    cx.add_rule(
        &mut lookup_rlig,
        Rule::contextual(vec![c("numr")], vec![s(&slash)], vec![], vec![s(&valid_slash)]),
    );
    cx.add_rule(
        &mut lookup_rlig,
        Rule::contextual(vec![c("dnom_or_slash")], vec![c("numr")], vec![], vec![c("dnom")]),
    );
    cx.add_rule(
        &mut lookup_rlig,
        Rule::contextual(vec![c("digit_or_slash")], vec![c("dnom")], vec![], vec![c("digit")]),
    );
    vec![lookup_numr, lookup_dnom, lookup_rlig]
}

/// For characters the shaper would drop as default ignorables, add a
/// recursive "double then merge" pair of rules so they always reach
/// the font.
pub fn dont_ignore_default_ignorables(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup_1 = Lookup::new(b"abvm", b"dflt");
    let mut lookup_2 = Lookup::new(b"abvm", b"dflt");
    for schema in snapshot(&cx.schemas) {
        if schema.ignorability == Ignorability::OverriddenNo {
            cx.add_rule(&mut lookup_1, Rule::sub(vec![s(&schema)], vec![s(&schema), s(&schema)]));
            cx.add_rule(&mut lookup_2, Rule::sub(vec![s(&schema), s(&schema)], vec![s(&schema)]));
        }
    }
    vec![lookup_1, lookup_2]
}

/// A circle vowel followed by three combining grapheme joiners ligates
/// into a reversed variant.
pub fn reversed_circle_kludge(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt");
    let Some(cgj) = cx.schemas.iter().find(|s| s.cmap == Some(0x034F)).cloned() else {
        return vec![lookup];
    };
    for schema in snapshot(&cx.new_schemas) {
        if matches!(
            schema.cmap,
            Some(0x1BC44 | 0x1BC53 | 0x1BC5A..=0x1BC60)
        ) {
            let reversed_shape = match &schema.shape {
                Shape::Curve(curve) => Shape::Curve(Curve {
                    angle_out: normalize(2.0 * curve.angle_in - curve.angle_out),
                    clockwise: !curve.clockwise,
                    secondary: !curve.clockwise,
                    ..curve.clone()
                }),
                other => other.as_reversed(),
            };
            let mut cps = schema.cps.clone();
            cps.extend([0x034F, 0x034F, 0x034F]);
            let output = cx.new_schema(
                schema.to_def().cmap(None).cps(cps).shape(reversed_shape),
            );
            cx.add_rule(
                &mut lookup,
                Rule::sub(
                    vec![s(&schema), s(&cgj), s(&cgj), s(&cgj)],
                    vec![s(&output)],
                ),
            );
        }
    }
    vec![lookup]
}

/// A thick letter selector after a shadable shape becomes valid; any
/// other stays an invalid DTLS drawn as an error glyph.
pub fn validate_shading(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt")
        .with_mark_filtering_set("independent_mark")
        .reversed();
    if cx.new_schemas.len() == cx.schemas.len() {
        let invalid_dtls = cx
            .schemas
            .iter()
            .find(|s| matches!(s.shape, Shape::InvalidDtls(_)))
            .cloned()
            .expect("the schema table must include U+1BC9D");
        let valid_dtls =
            cx.new_schema(invalid_dtls.to_def().cmap(None).shape(Shape::ValidDtls));
        for schema in snapshot(&cx.new_schemas) {
            if schema.anchor.is_some() {
                if schema.cmap.is_some() {
                    cx.class_push("independent_mark", schema.clone());
                }
            } else if schema.shading_allowed && schema.shape.is_shadable() {
                cx.class_push("c", schema.clone());
            }
        }
        cx.add_rule(
            &mut lookup,
            Rule::contextual(vec![c("c")], vec![s(&invalid_dtls)], vec![], vec![s(&valid_dtls)]),
        );
    }
    vec![lookup]
}

/// Classifies each schema by how many double marks it tolerates, and
/// turns any trailing excess into a dotted guideline.
pub fn validate_double_marks(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt").with_mark_filtering_set("double_mark");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    let double_mark = cx
        .original_schemas
        .iter()
        .find(|s| s.cps == [0x1BC9E])
        .cloned()
        .expect("the schema table must include U+1BC9E");
    cx.class_push("double_mark", double_mark.clone());
    let mut new_maximums = IndexSet::new();
    for schema in snapshot(&cx.new_schemas) {
        let maximum = schema.max_double_marks();
        new_maximums.insert(maximum);
        cx.class_push(&maximum.to_string(), schema);
    }
    let mut maximums: Vec<usize> = new_maximums.into_iter().collect();
    maximums.sort_unstable_by(|a, b| b.cmp(a));
    for maximum in maximums {
        for i in 0..maximum {
            let mut contexts_in = vec![c(maximum.to_string())];
            contexts_in.extend(std::iter::repeat(s(&double_mark)).take(i));
            cx.add_rule(
                &mut lookup,
                Rule::chain(contexts_in, vec![s(&double_mark)], vec![], vec![None]),
            );
        }
    }
    let guideline = cx.new_schema(
        SchemaDef::new(None, Shape::Line(Line::dotted(0.0, 7)), 1.5)
            .joining_type(JoiningType::NonJoining)
            .maximum_tree_width(Some(MAX_TREE_WIDTH)),
    );
    cx.add_rule(
        &mut lookup,
        Rule::sub(vec![s(&double_mark)], vec![s(&guideline), s(&double_mark)]),
    );
    vec![lookup]
}

/// Splits each precomposed schema into its base plus its marks.
pub fn decompose(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"abvm", b"dflt");
    for schema in snapshot(&cx.schemas) {
        if !schema.marks.is_empty() && cx.new_schemas.contains(&schema) {
            let base = cx.new_schema(schema.to_def().cmap(None).marks(Vec::new()));
            let mut outputs = vec![s(&base)];
            outputs.extend(schema.marks.iter().map(s));
            cx.add_rule(&mut lookup, Rule::sub(vec![s(&schema)], outputs));
        }
    }
    vec![lookup]
}

/// A non-initial secant retargets to the secant anchor of its base;
/// an initial secant stays a secant and gets a marker after it.
pub fn expand_secants(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_flags(flags::IGNORE_MARKS);
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    let continuing_overlap = cx
        .schemas
        .iter()
        .find(|s| matches!(s.shape, Shape::InvalidOverlap { continuing: true, .. }))
        .cloned()
        .expect("the schema table must include U+1BCA1");
    cx.insert_named_lookup("non_initial_secant", Lookup::named());
    for schema in snapshot(&cx.new_schemas) {
        if schema.is_secant() {
            let Shape::Line(line) = &schema.shape else {
                unreachable!("secants are lines");
            };
            let retargeted = cx.new_schema(
                schema
                    .to_def()
                    .cmap(None)
                    .shape(Shape::Line(Line {
                        secant_curvature_offset: -line.secant_curvature_offset,
                        ..line.clone()
                    }))
                    .anchor(Some(crate::anchors::SECANT))
                    .widthless(Some(false)),
            );
            cx.add_named_rule(
                "non_initial_secant",
                Rule::sub(vec![s(&schema)], vec![s(&retargeted)]),
            );
            cx.class_push("secant", schema.clone());
        } else if schema.can_take_secant() {
            cx.class_push("base", schema.clone());
        }
    }
    cx.add_rule(
        &mut lookup,
        Rule::chain(
            vec![c("base")],
            vec![c("secant")],
            vec![],
            vec![Some("non_initial_secant".to_string())],
        ),
    );
    let initial_secant_marker = cx.new_schema(
        SchemaDef::new(None, Shape::InitialSecantMarker, 0.0).side_bearing(0.0),
    );
    cx.add_rule(
        &mut lookup,
        Rule::sub(
            vec![c("secant")],
            vec![c("secant"), s(&continuing_overlap), s(&initial_secant_marker)],
        ),
    );
    vec![lookup]
}

/// Each overlap control becomes a valid edge if the preceding base
/// admits more children; otherwise it stays invalid.
pub fn validate_overlap_controls(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_mark_filtering_set("overlap");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    let mut letter_overlap = None;
    let mut continuing_overlap = None;
    let mut new_classes: IndexMap<usize, String> = IndexMap::new();
    let mut global_max_tree_width = 0;
    for schema in snapshot(&cx.new_schemas) {
        match &schema.shape {
            Shape::InvalidOverlap { continuing: true, .. } => {
                continuing_overlap = Some(schema.clone());
            }
            Shape::InvalidOverlap { .. } => letter_overlap = Some(schema.clone()),
            _ => {
                let max_tree_width = schema.max_tree_width();
                if schema.anchor.is_none() && max_tree_width != 0 {
                    global_max_tree_width = global_max_tree_width.max(max_tree_width);
                    cx.class_push("base", schema.clone());
                    let new_class = format!("base_{max_tree_width}");
                    cx.class_push(&new_class, schema.clone());
                    new_classes.insert(max_tree_width, new_class);
                }
            }
        }
    }
    assert_eq!(global_max_tree_width, MAX_TREE_WIDTH);
    let letter_overlap = letter_overlap.expect("the schema table must include U+1BCA0");
    let continuing_overlap = continuing_overlap.expect("the schema table must include U+1BCA1");
    cx.class_push("invalid", letter_overlap.clone());
    cx.class_push("invalid", continuing_overlap.clone());
    let valid_letter_overlap = cx.new_schema(
        letter_overlap
            .to_def()
            .cmap(None)
            .shape(Shape::ChildEdge(Edge::new(vec![(1, 0)])))
            .side_bearing(0.0),
    );
    let valid_continuing_overlap = cx.new_schema(
        continuing_overlap
            .to_def()
            .cmap(None)
            .shape(Shape::ContinuingOverlap { from_character: true })
            .side_bearing(0.0),
    );
    cx.class_push("valid", valid_letter_overlap.clone());
    cx.class_push("valid", valid_continuing_overlap.clone());
    cx.class_push("overlap", valid_letter_overlap.clone());
    cx.class_push("overlap", valid_continuing_overlap.clone());
    cx.add_rule(
        &mut lookup,
        Rule::chain(vec![c("invalid")], vec![c("invalid")], vec![], vec![None]),
    );
    cx.insert_named_lookup("validate", Lookup::named());
    cx.add_named_rule("validate", Rule::sub(vec![c("invalid")], vec![c("valid")]));
    cx.add_rule(
        &mut lookup,
        Rule::chain(
            vec![c("valid")],
            vec![c("invalid")],
            vec![],
            vec![Some("validate".to_string())],
        ),
    );
    for i in 0..global_max_tree_width.saturating_sub(2) {
        let mut contexts_out: Vec<Target> =
            std::iter::repeat(s(&letter_overlap)).take(i).collect();
        contexts_out.push(s(&continuing_overlap));
        contexts_out.push(c("invalid"));
        cx.add_rule(
            &mut lookup,
            Rule::chain(vec![], vec![s(&letter_overlap)], contexts_out, vec![None]),
        );
    }
    if global_max_tree_width > 1 {
        cx.add_rule(
            &mut lookup,
            Rule::chain(vec![], vec![s(&continuing_overlap)], vec![c("invalid")], vec![None]),
        );
    }
    for (max_tree_width, new_class) in &new_classes {
        cx.add_rule(
            &mut lookup,
            Rule::chain(
                vec![c(new_class.clone())],
                vec![c("invalid")],
                std::iter::repeat(c("invalid")).take(*max_tree_width).collect(),
                vec![None],
            ),
        );
    }
    cx.class_push("base", valid_letter_overlap.clone());
    cx.class_push("base", valid_continuing_overlap.clone());
    cx.add_rule(
        &mut lookup,
        Rule::chain(
            vec![c("base")],
            vec![c("invalid")],
            vec![],
            vec![Some("validate".to_string())],
        ),
    );
    cx.class_push(CHILD_EDGE_CLASSES[0], valid_letter_overlap.clone());
    cx.class_push(INTER_EDGE_CLASSES[0][0], valid_letter_overlap);
    cx.class_push(CONTINUING_OVERLAP_CLASS, valid_continuing_overlap.clone());
    cx.class_push(CONTINUING_OVERLAP_OR_HUB_CLASS, valid_continuing_overlap);
    vec![lookup]
}

/// Every joiner gains a parent edge (or a root-only parent edge if it
/// cannot be a child).
pub fn add_parent_edges(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"blwm", b"dflt");
    let root_parent_edge = cx.new_schema(
        SchemaDef::new(None, Shape::ParentEdge(Edge::new(vec![])), 0.0)
            .joining_type(JoiningType::NonJoining)
            .side_bearing(0.0),
    );
    let root_only_parent_edge = cx.new_schema(
        SchemaDef::new(None, Shape::RootOnlyParentEdge, 0.0)
            .joining_type(JoiningType::NonJoining)
            .side_bearing(0.0),
    );
    for child_index in 0..MAX_TREE_WIDTH {
        if !cx.class_contains(CHILD_EDGE_CLASSES[child_index], &root_parent_edge) {
            cx.class_push(CHILD_EDGE_CLASSES[child_index], root_parent_edge.clone());
        }
        for layer_index in 0..MAX_TREE_DEPTH {
            if !cx.class_contains(INTER_EDGE_CLASSES[layer_index][child_index], &root_parent_edge) {
                cx.class_push(
                    INTER_EDGE_CLASSES[layer_index][child_index],
                    root_parent_edge.clone(),
                );
            }
        }
    }
    for schema in snapshot(&cx.new_schemas) {
        if schema.glyph_class == GlyphClass::Joiner {
            let class = if schema.can_be_child() { "root" } else { "root_only" };
            cx.class_push(class, schema);
        }
    }
    cx.add_rule(
        &mut lookup,
        Rule::sub(vec![c("root")], vec![s(&root_parent_edge), c("root")]),
    );
    cx.add_rule(
        &mut lookup,
        Rule::sub(
            vec![c("root_only")],
            vec![s(&root_only_parent_edge), s(&root_parent_edge), c("root_only")],
        ),
    );
    vec![lookup]
}

/// A global, reverse check of the tree structure: edges whose
/// structural context is malformed become invalid again.
pub fn invalidate_overlap_controls(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES)
        .with_mark_filtering_set("all")
        .reversed();
    let mut node = None;
    let mut valid_letter_overlap = None;
    let mut valid_continuing_overlap = None;
    let mut invalid_letter_overlap = None;
    let mut invalid_continuing_overlap = None;
    for schema in snapshot(&cx.new_schemas) {
        match &schema.shape {
            Shape::ParentEdge(_) => {
                node = Some(schema.clone());
                cx.class_push("all", schema);
            }
            Shape::RootOnlyParentEdge => cx.class_push("all", schema),
            Shape::ChildEdge(_) => {
                valid_letter_overlap = Some(schema.clone());
                cx.class_push("all", schema);
            }
            Shape::ContinuingOverlap { .. } => {
                valid_continuing_overlap = Some(schema.clone());
                cx.class_push("all", schema);
            }
            Shape::InvalidOverlap { continuing: true, .. } => {
                invalid_continuing_overlap = Some(schema.clone());
            }
            Shape::InvalidOverlap { .. } => invalid_letter_overlap = Some(schema.clone()),
            _ => {}
        }
    }
    let (Some(node), Some(valid_letter_overlap), Some(valid_continuing_overlap)) =
        (node, valid_letter_overlap, valid_continuing_overlap)
    else {
        return vec![lookup];
    };
    let invalid_letter_overlap = invalid_letter_overlap.expect("U+1BCA0 must be seeded");
    let invalid_continuing_overlap = invalid_continuing_overlap.expect("U+1BCA1 must be seeded");
    cx.class_push("valid", valid_letter_overlap.clone());
    cx.class_push("valid", valid_continuing_overlap.clone());
    cx.class_push("invalid", invalid_letter_overlap.clone());
    cx.class_push("invalid", invalid_continuing_overlap);
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![], vec![c("valid")], vec![c("invalid")], vec![c("invalid")]),
    );
    let node_target = s(&node);
    let valid_target = c("valid");
    for older_sibling_count in (0..MAX_TREE_WIDTH).rev() {
        // A continuing overlap not at the top level must be licensed by
        // an ancestral continuing overlap.
        for subtrees in make_trees(
            &node_target,
            Some(&valid_target),
            MAX_TREE_DEPTH,
            Some(&[older_sibling_count]),
            None,
        ) {
            for older_sibling_count_of_continuing_overlap in 0..MAX_TREE_WIDTH {
                let mut contexts_out = subtrees.clone();
                contexts_out.push(node_target.clone());
                contexts_out.extend(
                    std::iter::repeat(s(&valid_letter_overlap))
                        .take(older_sibling_count_of_continuing_overlap),
                );
                contexts_out.push(s(&valid_continuing_overlap));
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        std::iter::repeat(s(&valid_letter_overlap))
                            .take(older_sibling_count)
                            .collect(),
                        vec![s(&valid_letter_overlap)],
                        contexts_out,
                        vec![s(&invalid_letter_overlap)],
                    ),
                );
            }
        }
        // Trees are capped at the maximum depth.
        let widths: Vec<usize> = (0..=older_sibling_count).collect();
        for subtrees in make_trees(
            &node_target,
            Some(&s(&valid_letter_overlap)),
            MAX_TREE_DEPTH,
            Some(&widths),
            None,
        ) {
            for deep_subtree in make_trees(
                &node_target,
                Some(&valid_target),
                MAX_TREE_DEPTH,
                None,
                Some(MAX_TREE_DEPTH),
            ) {
                let mut contexts_out = subtrees.clone();
                contexts_out.extend(deep_subtree.iter().cloned());
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        std::iter::repeat(s(&valid_letter_overlap))
                            .take(older_sibling_count)
                            .collect(),
                        vec![c("valid")],
                        contexts_out,
                        vec![c("invalid")],
                    ),
                );
            }
        }
        // Anything valid must be explicitly kept valid: there may not
        // be enough context to tell an invalid overlap is invalid.
        for subtrees in make_trees(
            &node_target,
            Some(&valid_target),
            MAX_TREE_DEPTH,
            Some(&[older_sibling_count + 1]),
            None,
        ) {
            let contexts_in = if older_sibling_count != 0 {
                std::iter::repeat(s(&valid_letter_overlap))
                    .take(older_sibling_count)
                    .collect()
            } else {
                vec![node_target.clone()]
            };
            cx.add_rule(
                &mut lookup,
                Rule::contextual(contexts_in, vec![c("valid")], subtrees, vec![c("valid")]),
            );
        }
    }
    // If an overlap gets here without being kept valid, it is invalid.
    // FIXME: This should be just one rule, without context, but
    // `add_rule` does not consider preceding rules in the same lookup
    // when deciding possible output schemas.
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![], vec![c("valid")], vec![c("valid")], vec![c("valid")]),
    );
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![node_target], vec![c("valid")], vec![], vec![c("invalid")]),
    );
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![c("valid")], vec![c("valid")], vec![], vec![c("invalid")]),
    );
    vec![lookup]
}

/// Initial secants get a dotted guideline and a leading zero-width
/// non-joiner.
pub fn add_secant_guidelines(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"abvs", b"dflt");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    let invalid_continuing_overlap = cx
        .schemas
        .iter()
        .find(|s| matches!(s.shape, Shape::InvalidOverlap { continuing: true, .. }))
        .cloned()
        .expect("U+1BCA1 must be seeded");
    let valid_continuing_overlap = cx
        .schemas
        .iter()
        .find(|s| matches!(s.shape, Shape::ContinuingOverlap { .. }))
        .cloned()
        .expect("a valid continuing overlap must exist by now");
    let dtls = cx
        .schemas
        .iter()
        .find(|s| matches!(s.shape, Shape::ValidDtls))
        .cloned()
        .expect("a valid DTLS must exist by now");
    let initial_secant_marker = cx
        .schemas
        .iter()
        .find(|s| matches!(s.shape, Shape::InitialSecantMarker))
        .cloned()
        .expect("an initial secant marker must exist by now");
    cx.insert_named_lookup("prepend_zwnj", Lookup::named());
    let zwnj = cx.new_schema(
        SchemaDef::new(None, Shape::Space(Space::with_margins(0.0)), 0.0)
            .joining_type(JoiningType::NonJoining)
            .side_bearing(0.0),
    );
    for schema in snapshot(&cx.new_schemas) {
        let Shape::Line(line) = &schema.shape else {
            continue;
        };
        if line.secant.is_some()
            && schema.glyph_class == GlyphClass::Joiner
            && cx.original_schemas.contains(&schema)
        {
            cx.class_push("secant", schema.clone());
            let guideline_angle = line.guideline_angle();
            let lookup_name = format!("add_guideline_{}", num(guideline_angle));
            let lookup_name_and_dtls = format!("{lookup_name}_and_dtls");
            if !cx.has_named_lookup(&lookup_name) {
                let guideline = cx.new_schema(
                    SchemaDef::new(None, Shape::Line(Line::dotted(guideline_angle, 7)), 1.5)
                        .maximum_tree_width(Some(MAX_TREE_WIDTH)),
                );
                cx.insert_named_lookup(&lookup_name_and_dtls, Lookup::named());
                cx.insert_named_lookup(&lookup_name, Lookup::named());
                cx.add_named_rule(
                    &lookup_name_and_dtls,
                    Rule::sub(
                        vec![s(&invalid_continuing_overlap)],
                        vec![s(&dtls), s(&valid_continuing_overlap), s(&guideline)],
                    ),
                );
                cx.add_named_rule(
                    &lookup_name,
                    Rule::sub(
                        vec![s(&invalid_continuing_overlap)],
                        vec![s(&valid_continuing_overlap), s(&guideline)],
                    ),
                );
            }
            cx.add_rule(
                &mut lookup,
                Rule::chain(
                    vec![s(&schema)],
                    vec![s(&invalid_continuing_overlap)],
                    vec![s(&initial_secant_marker), s(&dtls)],
                    vec![Some(lookup_name_and_dtls)],
                ),
            );
            cx.add_rule(
                &mut lookup,
                Rule::chain(
                    vec![s(&schema)],
                    vec![s(&invalid_continuing_overlap)],
                    vec![],
                    vec![Some(lookup_name)],
                ),
            );
        }
    }
    cx.add_named_rule("prepend_zwnj", Rule::sub(vec![c("secant")], vec![s(&zwnj), c("secant")]));
    cx.add_rule(
        &mut lookup,
        Rule::chain(vec![], vec![c("secant")], vec![], vec![Some("prepend_zwnj".to_string())]),
    );
    vec![lookup]
}

/// After n−1 overlaps on a base that supports n children, fill the
/// remainder with parent-edge/placeholder pairs.
pub fn add_placeholders_for_missing_children(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"blwm", b"dflt").with_mark_filtering_set("valid_final_overlap");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    let mut valid_letter_overlap = None;
    let mut base_classes: IndexMap<usize, String> = IndexMap::new();
    for schema in snapshot(&cx.new_schemas) {
        match &schema.shape {
            Shape::ChildEdge(_) => {
                valid_letter_overlap = Some(schema.clone());
                cx.class_push("valid_final_overlap", schema);
            }
            Shape::ContinuingOverlap { .. } => cx.class_push("valid_final_overlap", schema),
            _ => {
                let max_tree_width = schema.max_tree_width();
                if schema.glyph_class == GlyphClass::Joiner && max_tree_width > 1 {
                    let new_class = format!("base_{max_tree_width}");
                    cx.class_push(&new_class, schema);
                    base_classes.insert(max_tree_width, new_class);
                }
            }
        }
    }
    let valid_letter_overlap = valid_letter_overlap.expect("a valid letter overlap must exist");
    let root_parent_edge = cx
        .schemas
        .iter()
        .find(|s| matches!(s.shape, Shape::ParentEdge(_)))
        .cloned()
        .expect("a root parent edge must exist");
    let placeholder = cx.new_schema(
        SchemaDef::new(None, Shape::Space(Space::new(0.0)), 0.0)
            .joining_type(JoiningType::Joining)
            .side_bearing(0.0)
            .child(true),
    );
    for (max_tree_width, base_class) in &base_classes {
        let mut inputs: Vec<Target> = std::iter::repeat(s(&valid_letter_overlap))
            .take(max_tree_width - 1)
            .collect();
        inputs.push(c("valid_final_overlap"));
        let input_count = inputs.len();
        cx.add_rule(
            &mut lookup,
            Rule::chain(
                vec![c(base_class.clone())],
                inputs,
                vec![],
                vec![None; input_count],
            ),
        );
        for sibling_count in (1..*max_tree_width).rev() {
            let mut backtrack = vec![c(base_class.clone())];
            backtrack.extend(std::iter::repeat(s(&valid_letter_overlap)).take(sibling_count - 1));
            let input_1 = if sibling_count > 1 {
                c("valid_final_overlap")
            } else {
                s(&valid_letter_overlap)
            };
            let mut outputs = vec![s(&valid_letter_overlap), input_1.clone()];
            for _ in 0..sibling_count {
                outputs.push(s(&root_parent_edge));
                outputs.push(s(&placeholder));
            }
            cx.add_rule(
                &mut lookup,
                Rule::contextual(backtrack, vec![input_1], vec![], outputs),
            );
        }
    }
    vec![lookup]
}

/// Assigns each edge its (layer, index) position so later lookups can
/// target specific tree positions.
pub fn categorize_edges(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"blwm", b"dflt")
        .with_flags(flags::IGNORE_LIGATURES)
        .with_mark_filtering_set("all");
    let old_groups: IndexSet<crate::util::GroupKey> = cx
        .class("all")
        .iter()
        .map(|s| s.shape.group())
        .collect();
    let mut child_edges: IndexMap<Vec<(usize, usize)>, SchemaRef> = IndexMap::new();
    let mut parent_edges: IndexMap<Vec<(usize, usize)>, SchemaRef> = IndexMap::new();
    let mut default_child_edge = None;
    let mut default_parent_edge = None;
    for schema in snapshot(&cx.schemas) {
        match &schema.shape {
            Shape::ChildEdge(edge) => {
                child_edges.insert(edge.lineage.clone(), schema.clone());
                if edge.lineage.len() == 1 && edge.lineage[0].0 == 1 {
                    default_child_edge = Some(schema.clone());
                }
            }
            Shape::ParentEdge(edge) => {
                parent_edges.insert(edge.lineage.clone(), schema.clone());
                if edge.lineage.is_empty() {
                    default_parent_edge = Some(schema.clone());
                }
            }
            _ => {}
        }
    }
    let (Some(default_child_edge), Some(default_parent_edge)) =
        (default_child_edge, default_parent_edge)
    else {
        return vec![lookup];
    };
    for schema in snapshot(&cx.new_schemas) {
        if matches!(schema.shape, Shape::ChildEdge(_) | Shape::ParentEdge(_)) {
            cx.class_push("all", schema);
        }
    }
    let get_child_edge = |cx: &PhaseCx,
                          child_edges: &mut IndexMap<Vec<(usize, usize)>, SchemaRef>,
                          lineage: Vec<(usize, usize)>| {
        child_edges
            .entry(lineage.clone())
            .or_insert_with(|| {
                cx.new_schema(
                    default_child_edge
                        .to_def()
                        .cmap(None)
                        .shape(Shape::ChildEdge(Edge::new(lineage))),
                )
            })
            .clone()
    };
    let get_parent_edge = |cx: &PhaseCx,
                           parent_edges: &mut IndexMap<Vec<(usize, usize)>, SchemaRef>,
                           lineage: Vec<(usize, usize)>| {
        parent_edges
            .entry(lineage.clone())
            .or_insert_with(|| {
                cx.new_schema(
                    default_parent_edge
                        .to_def()
                        .cmap(None)
                        .shape(Shape::ParentEdge(Edge::new(lineage))),
                )
            })
            .clone()
    };
    for edge in snapshot(&cx.new_schemas) {
        if old_groups.contains(&edge.shape.group()) {
            continue;
        }
        match &edge.shape {
            Shape::ChildEdge(child_edge) => {
                let mut lineage = child_edge.lineage.clone();
                let last = lineage.last_mut().unwrap();
                *last = (last.0 + 1, 0);
                if lineage.last().unwrap().0 <= MAX_TREE_WIDTH {
                    let new_child_edge = get_child_edge(cx, &mut child_edges, lineage.clone());
                    cx.class_push(
                        CHILD_EDGE_CLASSES[lineage.last().unwrap().0 - 1],
                        new_child_edge.clone(),
                    );
                    cx.class_push(
                        INTER_EDGE_CLASSES[lineage.len() - 1][lineage.last().unwrap().0 - 1],
                        new_child_edge.clone(),
                    );
                    cx.add_rule(
                        &mut lookup,
                        Rule::contextual(
                            vec![s(&edge)],
                            vec![s(&default_child_edge)],
                            vec![],
                            vec![s(&new_child_edge)],
                        ),
                    );
                }
                let mut lineage = child_edge.lineage.clone();
                let last_index = lineage.last().unwrap().0;
                *lineage.last_mut().unwrap() = (1, last_index);
                let new_parent_edge = get_parent_edge(cx, &mut parent_edges, lineage.clone());
                cx.class_push(PARENT_EDGE_CLASS, new_parent_edge.clone());
                cx.class_push(
                    INTER_EDGE_CLASSES[lineage.len() - 1][lineage.last().unwrap().0 - 1],
                    new_parent_edge.clone(),
                );
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![s(&edge)],
                        vec![s(&default_parent_edge)],
                        vec![],
                        vec![s(&new_parent_edge)],
                    ),
                );
            }
            Shape::ParentEdge(parent_edge) if !parent_edge.lineage.is_empty() => {
                let mut lineage = parent_edge.lineage.clone();
                if lineage.len() < MAX_TREE_DEPTH - 1 {
                    lineage.push((1, lineage.last().unwrap().0));
                    let new_child_edge = get_child_edge(cx, &mut child_edges, lineage.clone());
                    cx.class_push(
                        CHILD_EDGE_CLASSES[lineage.last().unwrap().0 - 1],
                        new_child_edge.clone(),
                    );
                    cx.class_push(
                        INTER_EDGE_CLASSES[lineage.len() - 1][lineage.last().unwrap().0 - 1],
                        new_child_edge.clone(),
                    );
                    cx.add_rule(
                        &mut lookup,
                        Rule::contextual(
                            vec![s(&edge)],
                            vec![s(&default_child_edge)],
                            vec![],
                            vec![s(&new_child_edge)],
                        ),
                    );
                }
                let mut lineage = parent_edge.lineage.clone();
                while lineage.last().is_some_and(|last| last.0 == last.1) {
                    lineage.pop();
                }
                if !lineage.is_empty() {
                    let last = lineage.last_mut().unwrap();
                    *last = (last.0 + 1, last.1);
                    if lineage.last().unwrap().0 <= MAX_TREE_WIDTH {
                        let new_parent_edge = get_parent_edge(cx, &mut parent_edges, lineage.clone());
                        cx.class_push(PARENT_EDGE_CLASS, new_parent_edge.clone());
                        cx.class_push(
                            INTER_EDGE_CLASSES[lineage.len() - 1][lineage.last().unwrap().0 - 1],
                            new_parent_edge.clone(),
                        );
                        cx.add_rule(
                            &mut lookup,
                            Rule::contextual(
                                vec![s(&edge)],
                                vec![s(&default_parent_edge)],
                                vec![],
                                vec![s(&new_parent_edge)],
                            ),
                        );
                    }
                }
            }
            _ => {}
        }
    }
    vec![lookup]
}

/// Grammalogues are separated from neighboring cursive text with
/// zero-width non-joiners, both as tree roots and as children.
pub fn disjoin_grammalogues(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_mark_filtering_set("all");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    let mut grammalogues = Vec::new();
    let mut continuing_overlap = None;
    let mut root_parent_edge = None;
    for schema in snapshot(&cx.new_schemas) {
        match &schema.shape {
            Shape::EqualsSign(_) | Shape::Grammalogue(_) => grammalogues.push(schema.clone()),
            Shape::ContinuingOverlap { .. } => {
                continuing_overlap = Some(schema.clone());
                cx.class_push("all", schema);
            }
            Shape::ParentEdge(edge) if edge.lineage.is_empty() => {
                root_parent_edge = Some(schema.clone());
                cx.class_push("all", schema);
            }
            _ if schema.glyph_class == GlyphClass::Joiner => cx.class_push("joiner", schema),
            _ => {}
        }
    }
    let continuing_overlap = continuing_overlap.expect("a continuing overlap must exist");
    let root_parent_edge = root_parent_edge.expect("a root parent edge must exist");
    let zwnj = cx.new_schema(
        SchemaDef::new(None, Shape::Space(Space::with_margins(0.0)), 0.0)
            .joining_type(JoiningType::NonJoining)
            .side_bearing(0.0),
    );
    for root in &grammalogues {
        if root.max_tree_width() == 0 {
            continue;
        }
        cx.add_rule(&mut lookup, Rule::sub(vec![s(root)], vec![s(&zwnj), s(root)]));
        let widths: Vec<usize> = (0..=root.max_tree_width()).collect();
        let trees = make_trees(&c("joiner"), None, MAX_TREE_DEPTH, Some(&widths), None);
        if !trees.is_empty() {
            if !cx.has_named_lookup("prepend_zwnj") {
                cx.insert_named_lookup("prepend_zwnj", Lookup::named());
                cx.add_named_rule(
                    "prepend_zwnj",
                    Rule::sub(vec![s(&root_parent_edge)], vec![s(&zwnj), s(&root_parent_edge)]),
                );
            }
            for tree in trees {
                let mut contexts_in = vec![s(root)];
                contexts_in.extend(tree);
                cx.add_rule(
                    &mut lookup,
                    Rule::chain(
                        contexts_in,
                        vec![s(&root_parent_edge)],
                        vec![],
                        vec![Some("prepend_zwnj".to_string())],
                    ),
                );
            }
        }
    }
    for child in &grammalogues {
        if !child.can_be_child() {
            continue;
        }
        cx.add_rule(
            &mut lookup,
            Rule::contextual(
                vec![s(&continuing_overlap), s(&root_parent_edge)],
                vec![s(child)],
                vec![],
                vec![s(child), s(&zwnj)],
            ),
        );
        cx.add_rule(
            &mut lookup,
            Rule::contextual(
                vec![s(&root_parent_edge)],
                vec![s(child)],
                vec![],
                vec![s(&zwnj), s(child), s(&zwnj)],
            ),
        );
        cx.add_rule(&mut lookup, Rule::sub(vec![s(child)], vec![s(child), s(&zwnj)]));
    }
    vec![lookup]
}

/// A final letter overlap at the tail of a tree is promoted to a
/// continuing overlap.
pub fn promote_final_letter_overlap_to_continuing_overlap(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt");
    let mut continuing_overlap = None;
    let mut root_parent_edge = None;
    for schema in snapshot(&cx.new_schemas) {
        match &schema.shape {
            Shape::ChildEdge(edge) => {
                cx.class_push("overlap", schema.clone());
                if edge.lineage[..edge.lineage.len() - 1]
                    .iter()
                    .all(|x| x.0 == x.1)
                {
                    cx.class_push("final_letter_overlap", schema);
                }
            }
            Shape::ContinuingOverlap { .. } => {
                continuing_overlap = Some(schema.clone());
                cx.class_push("overlap", schema);
            }
            Shape::ParentEdge(edge) if edge.lineage.is_empty() => {
                root_parent_edge = Some(schema.clone());
                cx.class_push("secant_or_root_parent_edge", schema);
            }
            Shape::Line(line)
                if line.secant.is_some() && schema.glyph_class == GlyphClass::Mark =>
            {
                cx.class_push("secant_or_root_parent_edge", schema);
            }
            _ => {}
        }
    }
    let Some(continuing_overlap) = continuing_overlap else {
        return vec![lookup];
    };
    let root_parent_edge = root_parent_edge.expect("a root parent edge must exist");
    cx.add_rule(
        &mut lookup,
        Rule::chain(vec![], vec![c("final_letter_overlap")], vec![c("overlap")], vec![None]),
    );
    if !cx.has_named_lookup("promote") {
        cx.insert_named_lookup("promote", Lookup::named());
    }
    cx.add_named_rule(
        "promote",
        Rule::sub(vec![c("final_letter_overlap")], vec![s(&continuing_overlap)]),
    );
    for overlap in cx.class("final_letter_overlap") {
        let overlap_name = overlap.shape.name(overlap.size, overlap.joining_type);
        let overlap_class = format!("fo_{overlap_name}");
        let parent_class = format!("parent_for_{overlap_name}");
        cx.class_push(&overlap_class, overlap.clone());
        let Shape::ChildEdge(overlap_edge) = &overlap.shape else {
            unreachable!("final letter overlaps are child edges");
        };
        for parent_edge in snapshot(&cx.new_schemas) {
            let Shape::ParentEdge(edge) = &parent_edge.shape else {
                continue;
            };
            if !edge.lineage.is_empty()
                && overlap_edge.lineage[..overlap_edge.lineage.len() - 1]
                    == edge.lineage[..edge.lineage.len() - 1]
                && overlap_edge.lineage.last().unwrap().0 == edge.lineage.last().unwrap().0
                && edge.lineage.last().unwrap().0 == edge.lineage.last().unwrap().1
            {
                cx.class_push(&overlap_class, parent_edge.clone());
                cx.class_push(&parent_class, parent_edge.clone());
            }
        }
        cx.add_named_rule(
            "promote",
            Rule::sub(vec![c(parent_class.clone())], vec![s(&root_parent_edge)]),
        );
        let promote_and_parent = format!("promote_{overlap_name}_and_parent");
        cx.insert_named_lookup(
            &promote_and_parent,
            Lookup::named()
                .with_flags(flags::IGNORE_LIGATURES)
                .with_mark_filtering_set(overlap_class.clone()),
        );
        cx.add_named_rule(
            &promote_and_parent,
            Rule::chain(
                vec![],
                vec![s(&overlap), c(parent_class)],
                vec![],
                vec![Some("promote".to_string()), Some("promote".to_string())],
            ),
        );
        let check_and_promote = format!("check_and_promote_{overlap_name}");
        cx.insert_named_lookup(
            &check_and_promote,
            Lookup::named()
                .with_flags(flags::IGNORE_LIGATURES)
                .with_mark_filtering_set("secant_or_root_parent_edge"),
        );
        cx.add_named_rule(
            &check_and_promote,
            Rule::chain(
                vec![],
                vec![s(&overlap)],
                vec![c("secant_or_root_parent_edge")],
                vec![None],
            ),
        );
        cx.add_named_rule(
            &check_and_promote,
            Rule::chain(vec![], vec![s(&overlap)], vec![], vec![Some(promote_and_parent)]),
        );
        cx.add_rule(
            &mut lookup,
            Rule::chain(vec![], vec![s(&overlap)], vec![], vec![Some(check_and_promote)]),
        );
    }
    vec![lookup]
}

/// Moves overlap points for several specific Chinook Jargon shape
/// pairs.
pub fn reposition_chinook_jargon_overlap_points(cx: &mut PhaseCx) -> Vec<Lookup> {
    // TODO: This should be a general thing, not limited to specific
    // Chinook Jargon abbreviations and a few similar patterns.
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_mark_filtering_set("all")
        .reversed();
    let mut line_classes: IndexMap<String, (f64, usize)> = IndexMap::new();
    for schema in snapshot(&cx.schemas) {
        if schema.glyph_class == GlyphClass::Mark {
            match &schema.shape {
                Shape::ChildEdge(_) => {
                    cx.class_push("all", schema.clone());
                    cx.class_push("overlap", schema.clone());
                    cx.class_push("letter_overlap", schema);
                }
                Shape::ContinuingOverlap { .. } => {
                    cx.class_push("all", schema.clone());
                    cx.class_push("overlap", schema.clone());
                    cx.class_push("continuing_overlap", schema);
                }
                shape if !shape.invisible() => cx.class_push("all", schema),
                _ => {}
            }
        } else if schema.glyph_class == GlyphClass::Joiner {
            if schema.max_tree_width() == 0 {
                continue;
            }
            match &schema.shape {
                Shape::Line(line)
                    if (schema.size == 1.0 || schema.cps == [0x1BC07])
                        && line.secant.is_none()
                        && line.dots.is_none() =>
                {
                    let angle = normalize(line.angle) % 180.0;
                    let max_tree_width = schema.max_tree_width();
                    let line_class = format!("line_{}_{max_tree_width}", num(angle));
                    cx.class_push("line", schema.clone());
                    cx.class_push(&line_class, schema);
                    line_classes.insert(line_class, (angle, max_tree_width));
                }
                Shape::Curve(curve)
                    if (schema.cps == [0x1BC1B] || schema.cps == [0x1BC1C])
                        && schema.size == 6.0
                        && schema.joining_type == JoiningType::Joining
                        && ((curve.angle_in == 90.0 && curve.angle_out == 270.0)
                            || (curve.angle_in == 270.0 && curve.angle_out == 90.0)) =>
                {
                    cx.class_push("curve", schema);
                }
                _ => {}
            }
        }
    }
    if cx.original_schemas.len() == cx.schemas.len() {
        for width in 1..=MAX_TREE_WIDTH {
            let mut contexts_in = vec![c("line")];
            contexts_in.extend(std::iter::repeat(c("letter_overlap")).take(width - 1));
            contexts_in.push(c("overlap"));
            cx.add_rule(
                &mut lookup,
                Rule::contextual(contexts_in, vec![c("curve")], vec![c("overlap")], vec![c("curve")]),
            );
        }
    }
    for curve in cx.class("curve") {
        if !cx.new_schemas.contains(&curve) {
            continue;
        }
        let Shape::Curve(curve_shape) = &curve.shape else {
            unreachable!();
        };
        for (line_class, (angle, _)) in line_classes.clone() {
            let curve_output = cx.new_schema(curve.to_def().cmap(None).shape(Shape::Curve(
                curve_shape.clone().with_overlap_angle(Some(angle)),
            )));
            for width in 1..=curve.max_tree_width() {
                let mut contexts_out: Vec<Target> =
                    std::iter::repeat(c("overlap")).take(width).collect();
                contexts_out.push(c(line_class.clone()));
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(vec![], vec![s(&curve)], contexts_out, vec![s(&curve_output)]),
                );
            }
            if angle == 90.0 {
                for curve_0 in cx.class("curve") {
                    if cx.new_schemas.contains(&curve_0)
                        && curve_0.cps == [0x1BC1C]
                        && curve.cps == [0x1BC1B]
                    {
                        let Shape::Curve(curve_0_shape) = &curve_0.shape else {
                            unreachable!();
                        };
                        let curve_0_output = cx.new_schema(
                            curve_0.to_def().cmap(None).shape(Shape::Curve(
                                curve_0_shape.clone().with_overlap_angle(Some(angle)),
                            )),
                        );
                        for width in 1..=curve_0.max_tree_width() {
                            let mut contexts_out: Vec<Target> =
                                std::iter::repeat(c("overlap")).take(width).collect();
                            contexts_out.push(s(&curve_output));
                            cx.add_rule(
                                &mut lookup,
                                Rule::contextual(
                                    vec![],
                                    vec![s(&curve_0)],
                                    contexts_out,
                                    vec![s(&curve_0_output)],
                                ),
                            );
                        }
                    }
                }
            }
        }
    }
    for curve_child in cx.class("curve") {
        if !cx.new_schemas.contains(&curve_child) {
            continue;
        }
        let Shape::Curve(curve_shape) = &curve_child.shape else {
            unreachable!();
        };
        for (line_class, (angle, max_tree_width)) in line_classes.clone() {
            let output = cx.new_schema(curve_child.to_def().cmap(None).shape(Shape::Curve(
                curve_shape.clone().with_overlap_angle(Some(angle)),
            )));
            for width in 1..=max_tree_width {
                let mut contexts_in = vec![c(line_class.clone())];
                contexts_in.extend(std::iter::repeat(c("letter_overlap")).take(width - 1));
                contexts_in.push(c("overlap"));
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(contexts_in, vec![s(&curve_child)], vec![], vec![s(&output)]),
                );
            }
        }
    }
    vec![lookup]
}

/// Each joiner that can be a child gets a mark-class clone used for
/// attachment inside trees.
pub fn make_mark_variants_of_children(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"blwm", b"dflt");
    let old_child_count = cx.class_len("child");
    for schema in snapshot(&cx.new_schemas) {
        if matches!(&schema.shape, Shape::ParentEdge(edge) if !edge.lineage.is_empty()) {
            cx.class_push("all", schema);
        } else if schema.glyph_class == GlyphClass::Joiner && schema.can_be_child() {
            cx.class_push("child_to_be", schema);
        }
    }
    for (i, child_to_be) in cx.class("child_to_be").into_iter().enumerate() {
        if i < old_child_count {
            continue;
        }
        let child = cx.new_schema(child_to_be.to_def().cmap(None).child(true));
        cx.class_push("child", child.clone());
        cx.class_push(PARENT_EDGE_CLASS, child.clone());
        for child_index in 0..MAX_TREE_WIDTH {
            cx.class_push(CHILD_EDGE_CLASSES[child_index], child.clone());
        }
    }
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![c("all")], vec![c("child_to_be")], vec![], vec![c("child")]),
    );
    vec![lookup]
}

fn find_overlong_sequences(deltas: &[f64], overlong: &mut Vec<Vec<f64>>, sequence: &mut Vec<f64>) {
    let delta_so_far: f64 = sequence.iter().sum();
    for &delta in deltas {
        sequence.push(delta);
        if (delta_so_far + delta).abs() >= 360.0 {
            overlong.push(sequence.clone());
        } else {
            find_overlong_sequences(deltas, overlong, sequence);
        }
        sequence.pop();
    }
}

/// A run of same-size primary curves accumulating a full turn gets a
/// dotted circle prepended so it cannot be misread as a circle letter.
pub fn interrupt_overlong_primary_curve_sequences(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_flags(flags::IGNORE_MARKS);
    let dotted_circle = cx
        .schemas
        .iter()
        .find(|s| s.cmap == Some(0x25CC))
        .cloned()
        .expect("the schema table must include U+25CC");
    let mut deltas_by_size: IndexMap<FloatKey, Vec<f64>> = IndexMap::new();
    let mut new_deltas_by_size: IndexMap<FloatKey, Vec<f64>> = IndexMap::new();
    for schema in snapshot(&cx.schemas) {
        if schema.glyph_class == GlyphClass::Mark {
            continue;
        }
        if schema.joining_type == JoiningType::Orienting {
            if let Shape::Curve(curve) = &schema.shape {
                if curve.hook {
                    continue;
                }
                let delta = curve.da().abs();
                if delta == 360.0 {
                    continue;
                }
                let class_name = format!("{}_{}", num(schema.size), num(delta));
                if curve.secondary {
                    cx.class_push(&format!("secondary_{class_name}"), schema.clone());
                } else {
                    let deltas = deltas_by_size.entry(FloatKey(schema.size)).or_default();
                    if !deltas.contains(&delta) {
                        deltas.push(delta);
                    }
                    if !cx.has_class(&class_name) {
                        new_deltas_by_size
                            .entry(FloatKey(schema.size))
                            .or_default()
                            .push(delta);
                    }
                    cx.class_push(&class_name, schema.clone());
                }
                continue;
            }
        }
        if schema.joining_type != JoiningType::NonJoining
            && !matches!(schema.shape, Shape::Space(_))
            && !schema.is_secant()
            && !schema.pseudo_cursive()
        {
            cx.class_push("c", schema);
        }
    }
    let mut overlong_class_sequences: Vec<Vec<String>> = Vec::new();
    for (size, deltas) in &deltas_by_size {
        let mut overlong_sequences = Vec::new();
        find_overlong_sequences(deltas, &mut overlong_sequences, &mut Vec::new());
        for sequence in overlong_sequences {
            let is_new = sequence.iter().any(|d| {
                new_deltas_by_size
                    .get(size)
                    .is_some_and(|new| new.contains(d))
            });
            if is_new {
                overlong_class_sequences.push(
                    sequence
                        .iter()
                        .map(|d| format!("{}_{}", num(size.0), num(*d)))
                        .collect(),
                );
            }
        }
    }
    if !overlong_class_sequences.is_empty() && !cx.has_named_lookup("prepend_dotted_circle") {
        cx.insert_named_lookup("prepend_dotted_circle", Lookup::named());
    }
    for sequence in overlong_class_sequences {
        let last = sequence.last().unwrap().clone();
        let head: Vec<Target> = sequence[..sequence.len() - 1].iter().map(c).collect();
        cx.add_named_rule(
            "prepend_dotted_circle",
            Rule::sub(vec![c(last.clone())], vec![s(&dotted_circle), c(last.clone())]),
        );
        cx.add_rule(
            &mut lookup,
            Rule::chain(
                head.clone(),
                vec![c(last.clone())],
                vec![],
                vec![Some("prepend_dotted_circle".to_string())],
            ),
        );
        let secondary_first = format!("secondary_{}", sequence[0]);
        let secondary_last = format!("secondary_{last}");
        let middle: Vec<Target> = sequence[1..sequence.len() - 1].iter().map(c).collect();
        if cx.has_class(&secondary_first) {
            cx.add_named_rule(
                "prepend_dotted_circle",
                Rule::sub(vec![c(last.clone())], vec![s(&dotted_circle), c(last.clone())]),
            );
            let mut contexts_in = vec![c("c"), c(secondary_first.clone())];
            contexts_in.extend(middle.iter().cloned());
            cx.add_rule(
                &mut lookup,
                Rule::chain(
                    contexts_in,
                    vec![c(last.clone())],
                    vec![],
                    vec![Some("prepend_dotted_circle".to_string())],
                ),
            );
        }
        if cx.has_class(&secondary_last) {
            let mut contexts_in = vec![c("c")];
            contexts_in.extend(sequence[..sequence.len() - 1].iter().map(c));
            cx.add_rule(
                &mut lookup,
                Rule::chain(contexts_in, vec![c(secondary_last.clone())], vec![], vec![None]),
            );
            cx.add_named_rule(
                "prepend_dotted_circle",
                Rule::sub(
                    vec![c(secondary_last.clone())],
                    vec![s(&dotted_circle), c(secondary_last.clone())],
                ),
            );
            cx.add_rule(
                &mut lookup,
                Rule::chain(
                    head.clone(),
                    vec![c(secondary_last)],
                    vec![c("c")],
                    vec![Some("prepend_dotted_circle".to_string())],
                ),
            );
        }
        if cx.has_class(&secondary_first) {
            let mut contexts_in = vec![c(secondary_first.clone())];
            contexts_in.extend(middle.iter().cloned());
            cx.add_rule(
                &mut lookup,
                Rule::chain(
                    contexts_in.clone(),
                    vec![c(last.clone())],
                    vec![c("c")],
                    vec![None],
                ),
            );
            cx.add_named_rule(
                "prepend_dotted_circle",
                Rule::sub(vec![c(last.clone())], vec![s(&dotted_circle), c(last.clone())]),
            );
            cx.add_rule(
                &mut lookup,
                Rule::chain(
                    contexts_in,
                    vec![c(last)],
                    vec![],
                    vec![Some("prepend_dotted_circle".to_string())],
                ),
            );
        }
    }
    vec![lookup]
}

/// A stenographic period after a cursive space becomes a joining
/// variant followed by a zero-width non-joiner.
pub fn reposition_stenographic_period(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    let mut period = None;
    for schema in snapshot(&cx.new_schemas) {
        if (matches!(schema.shape, Shape::InvalidStep { .. })
            || matches!(schema.shape, Shape::Space(_))
                && schema.joining_type == JoiningType::Joining)
            && schema.glyph_class != GlyphClass::Mark
        {
            cx.class_push("c", schema);
        } else if schema.cmap == Some(0x2E3C) {
            period = Some(schema);
        }
    }
    let Some(period) = period else {
        return vec![lookup];
    };
    let zwnj = cx.new_schema(
        SchemaDef::new(None, Shape::Space(Space::with_margins(0.0)), 0.0)
            .joining_type(JoiningType::NonJoining)
            .side_bearing(0.0),
    );
    let joining_period =
        cx.new_schema(period.to_def().cmap(None).joining_type(JoiningType::Joining));
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![c("c")], vec![s(&period)], vec![], vec![s(&joining_period), s(&zwnj)]),
    );
    vec![lookup]
}

/// U+1BCA2 and U+1BCA3 become real steps after a joining glyph.
pub fn join_with_next_step(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_flags(flags::IGNORE_MARKS)
        .reversed();
    let old_input_count = cx.class_len("i");
    for schema in snapshot(&cx.new_schemas) {
        if let Shape::InvalidStep { angle, .. } = &schema.shape {
            let angle = *angle;
            cx.class_push("i", schema.clone());
            if angle == 90.0 {
                cx.class_push("i_up", schema.clone());
            } else if angle == 270.0 {
                cx.class_push("i_down", schema.clone());
            } else {
                panic!("unsupported step angle: {angle}");
            }
        }
        if let Shape::Space(space) = &schema.shape {
            if schema.hub_priority() == 0 {
                if space.angle == 90.0 {
                    cx.class_push("c_up", schema.clone());
                    continue;
                } else if space.angle == 270.0 {
                    cx.class_push("c_down", schema.clone());
                    continue;
                }
            }
        }
        if schema.glyph_class == GlyphClass::Joiner {
            cx.class_push("c", schema);
        }
    }
    let new_context = !cx.has_class("o");
    for (i, target_schema) in cx.class("i").into_iter().enumerate() {
        if new_context || i >= old_input_count {
            let contextualized =
                target_schema.contextualize(Context::NONE, Context::NONE, true, cx.phase_index);
            let output_schema = cx.new_schema(
                contextualized
                    .to_def()
                    .size(800.0)
                    .joining_type(JoiningType::Joining)
                    .side_bearing(0.0),
            );
            cx.class_push("o", output_schema.clone());
            if cx.class_contains("i_up", &target_schema) {
                cx.class_push("o_up", output_schema.clone());
            }
            if cx.class_contains("i_down", &target_schema) {
                cx.class_push("o_down", output_schema);
            }
        }
    }
    if new_context {
        cx.add_rule(
            &mut lookup,
            Rule::contextual(vec![], vec![c("i")], vec![c("c")], vec![c("o")]),
        );
        cx.add_rule(
            &mut lookup,
            Rule::contextual(vec![], vec![c("i_up")], vec![c("c_up")], vec![c("o_up")]),
        );
        cx.add_rule(
            &mut lookup,
            Rule::contextual(vec![], vec![c("i_down")], vec![c("c_down")], vec![c("o_down")]),
        );
    }
    vec![lookup]
}

fn axis_alignment(x: f64) -> f64 {
    (normalize(x) % 90.0 - 45.0).abs()
}

/// A line within 20° of anti-parallel to another line is perturbed by
/// 46.5° so the two cannot be confused.
pub fn separate_subantiparallel_lines(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_flags(flags::IGNORE_MARKS);
    let mut lines_by_angle: IndexMap<FloatKey, Vec<SchemaRef>> = IndexMap::new();
    for schema in snapshot(&cx.new_schemas) {
        if schema.glyph_class != GlyphClass::Joiner {
            continue;
        }
        let is_plain_line = match &schema.shape {
            Shape::Line(line) => {
                line.dots.is_none() && line.secant.is_none() && line.original_angle.is_none()
            }
            Shape::Complex(_) => schema.original_shape == "Line",
            _ => false,
        };
        if is_plain_line {
            let angle = schema
                .path_context_in()
                .angle
                .expect("a line must have an angle");
            lines_by_angle.entry(FloatKey(angle)).or_default().push(schema.clone());
        } else if schema.joining_type == JoiningType::Orienting {
            let (clockwise, is_loop) = match &schema.shape {
                Shape::Circle(circle) => (circle.clockwise, false),
                Shape::Curve(curve) => (
                    curve.clockwise,
                    !(schema.diphthong_1
                        || schema.diphthong_2
                        || curve.reversed_circle != 0.0
                        || schema.original_shape == "Curve"),
                ),
                shape => {
                    let Some(complex) = shape.as_complex() else {
                        continue;
                    };
                    let Some(first_curve) = complex
                        .components()
                        .find(|op| matches!(op.shape, Shape::Circle(_) | Shape::Curve(_)))
                    else {
                        continue;
                    };
                    let clockwise = first_curve.shape.clockwise().unwrap();
                    let is_loop = matches!(shape, Shape::Ou(_))
                        || !matches!(shape, Shape::Wi(_)) && schema.is_primary();
                    (clockwise, is_loop)
                }
            };
            cx.class_push(&format!("clockwise_{}_i", bool_key(clockwise)), schema.clone());
            cx.class_push(&format!("clockwise_{}_o", bool_key(clockwise)), schema.clone());
            if matches!(schema.shape, Shape::Wa(_) | Shape::Wi(_)) {
                cx.class_push(&format!("clockwise_{}_i", bool_key(!clockwise)), schema.clone());
            }
            if is_loop {
                cx.class_push("loop", schema);
            }
        }
    }
    let closeness_threshold = 20.0;
    for (&a1_key, lines_1) in &lines_by_angle {
        for (&a2_key, lines_2) in &lines_by_angle {
            let (a1, a2) = (a1_key.0, a2_key.0);
            if axis_alignment(a1) < axis_alignment(a2)
                && in_degree_range(
                    a1,
                    normalize(a2 + 180.0 - (closeness_threshold - EPSILON)),
                    normalize(a2 + 180.0 + closeness_threshold - EPSILON),
                    false,
                )
            {
                let key = format!("{}_{}", num(a1), num(a2));
                cx.class_extend(&format!("i_{key}"), lines_1.iter().cloned());
                cx.class_extend(&format!("c_{key}"), lines_2.iter().cloned());
                for line_1 in lines_1 {
                    let new_angle = normalize(
                        a2 + 180.0 + 46.5 * if normalize(a2 + 180.0) > a1 { -1.0 } else { 1.0 },
                    );
                    let new_shape = match &line_1.shape {
                        Shape::Line(line) => Shape::Line(Line {
                            angle: new_angle,
                            original_angle: Some(line.angle),
                            ..line.clone()
                        }),
                        Shape::Complex(complex) => {
                            let mut instructions = complex.instructions.clone();
                            let Instruction::Component(line_op) = &instructions[0] else {
                                panic!("a complex line must start with its line");
                            };
                            let line_op = line_op.clone();
                            let Shape::Line(line) = &line_op.shape else {
                                panic!("a complex line must start with its line");
                            };
                            let Instruction::Component(tick_op) = &instructions[1] else {
                                panic!("a complex line's second component must be its tick");
                            };
                            let tick_op = tick_op.clone();
                            let Shape::Line(tick) = &tick_op.shape else {
                                panic!("a complex line's second component must be its tick");
                            };
                            let new_line = Line {
                                angle: new_angle,
                                original_angle: Some(line.angle),
                                ..line.clone()
                            };
                            let new_tick = Line {
                                angle: normalize(tick.angle + new_angle - line.angle),
                                ..tick.clone()
                            };
                            instructions[0] = Instruction::Component(Component {
                                shape: Shape::Line(new_line),
                                ..line_op
                            });
                            instructions[1] = Instruction::Component(Component {
                                shape: Shape::Line(new_tick),
                                ..tick_op
                            });
                            Shape::Complex(Complex {
                                instructions,
                                rotation: complex.rotation,
                            })
                        }
                        _ => unreachable!(),
                    };
                    let output = cx.new_schema(line_1.to_def().cmap(None).shape(new_shape));
                    cx.class_push(&format!("o_{key}"), output);
                }
                let clockwise_from_a1_to_a2 =
                    Context::new(a1).has_clockwise_loop_to(&Context::new(a2));
                let same = bool_key(clockwise_from_a1_to_a2);
                let other = bool_key(!clockwise_from_a1_to_a2);
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![c(format!("clockwise_{other}_i"))],
                        vec![c(format!("i_{key}"))],
                        vec![c(format!("c_{key}"))],
                        vec![c(format!("o_{key}"))],
                    ),
                );
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![],
                        vec![c(format!("i_{key}"))],
                        vec![c(format!("c_{key}")), c(format!("clockwise_{other}_o"))],
                        vec![c(format!("o_{key}"))],
                    ),
                );
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![c(format!("c_{key}"))],
                        vec![c(format!("i_{key}"))],
                        vec![c(format!("clockwise_{same}_o"))],
                        vec![c(format!("o_{key}"))],
                    ),
                );
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![c(format!("clockwise_{same}_i")), c(format!("c_{key}"))],
                        vec![c(format!("i_{key}"))],
                        vec![],
                        vec![c(format!("o_{key}"))],
                    ),
                );
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![],
                        vec![c(format!("i_{key}"))],
                        vec![c("loop"), c(format!("c_{key}"))],
                        vec![c(format!("o_{key}"))],
                    ),
                );
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![c(format!("c_{key}")), c("loop")],
                        vec![c(format!("i_{key}"))],
                        vec![],
                        vec![c(format!("o_{key}"))],
                    ),
                );
            }
        }
    }
    vec![lookup]
}

/// The second separation pass, rerun after contextualization.
pub fn separate_subantiparallel_lines_again(cx: &mut PhaseCx) -> Vec<Lookup> {
    separate_subantiparallel_lines(cx)
}

/// Pins reversed circles that precede primary semicircles so diphthong
/// ligation keeps them circular.
pub fn prepare_for_secondary_diphthong_ligature(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_flags(flags::IGNORE_MARKS)
        .reversed();
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    for schema in snapshot(&cx.new_schemas) {
        if matches!(schema.shape, Shape::Ou(_)) || !schema.can_become_part_of_diphthong() {
            continue;
        }
        match &schema.shape {
            Shape::Curve(_) => {
                if schema.is_primary() {
                    cx.class_push("primary_semicircle", schema);
                }
            }
            Shape::Circle(circle) => {
                if circle.reversed {
                    cx.class_push("reversed_circle", schema.clone());
                    let pinned = cx.new_schema(schema.to_def().cmap(None).shape(Shape::Circle(
                        Circle {
                            pinned: true,
                            ..circle.clone()
                        },
                    )));
                    cx.class_push("pinned_circle", pinned);
                }
            }
            _ => unreachable!("diphthong letters are circles or curves"),
        }
    }
    cx.add_rule(
        &mut lookup,
        Rule::contextual(
            vec![],
            vec![c("reversed_circle")],
            vec![c("primary_semicircle")],
            vec![c("pinned_circle")],
        ),
    );
    vec![lookup]
}

/// Captures each schema's exit context as a marker glyph and uses it
/// to contextualize the next schema's entry.
pub fn join_with_previous(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup_1 = Lookup::new(b"rclt", b"dflt");
    let mut lookup_2 = Lookup::new(b"rclt", b"dflt")
        .with_mark_filtering_set("all")
        .reversed();
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup_1, lookup_2];
    }
    let mut context_markers: IndexMap<Context, SchemaRef> = IndexMap::new();
    let mut contexts_in: Vec<SchemaRef> = Vec::new();
    for schema in snapshot(&cx.original_schemas) {
        if schema.glyph_class == GlyphClass::Joiner && !schema.is_secant() {
            if schema.joining_type == JoiningType::Orienting && schema.context_in.is_none() {
                cx.class_push("i", schema.clone());
            }
            let mut context_in = schema.path_context_out();
            if !context_in.is_none() {
                if context_in.ignorable_for_topography {
                    context_in = context_in.clone_with_angle(0.0);
                }
                let marker = context_markers
                    .entry(context_in)
                    .or_insert_with(|| {
                        cx.new_schema(SchemaDef::new(
                            None,
                            Shape::ContextMarker(crate::shapes::ContextMarker {
                                is_context_in: false,
                                context: context_in,
                            }),
                            0.0,
                        ))
                    })
                    .clone();
                cx.class_push("all", marker.clone());
                cx.class_push("i2", schema.clone());
                cx.class_push("o2", marker.clone());
                if !contexts_in.contains(&marker) {
                    contexts_in.push(marker);
                }
            }
        }
    }
    cx.class_extend("all", cx.class(CONTINUING_OVERLAP_CLASS));
    cx.add_rule(&mut lookup_1, Rule::sub(vec![c("i2")], vec![c("i2"), c("o2")]));
    for (j, context_in_marker) in contexts_in.iter().enumerate() {
        let Shape::ContextMarker(marker) = &context_in_marker.shape else {
            unreachable!();
        };
        let output_class = format!("o_{j}");
        for target_schema in cx.class("i") {
            let output = target_schema.contextualize(
                marker.context,
                target_schema.context_out,
                true,
                cx.phase_index,
            );
            cx.class_push(&output_class, output);
        }
        cx.add_rule(
            &mut lookup_2,
            Rule::contextual(
                vec![s(context_in_marker)],
                vec![c("i")],
                vec![],
                vec![c(output_class)],
            ),
        );
    }
    vec![lookup_1, lookup_2]
}

/// The last orienting glyph of an initial sequence is treated as
/// normal, not ignored.
pub fn unignore_last_orienting_glyph_in_initial_sequence(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_mark_filtering_set("i");
    for schema in snapshot(&cx.new_schemas) {
        if schema.ignored_for_topography {
            cx.class_push("i", schema.clone());
            let shape = match &schema.shape {
                Shape::Ou(ou) => Shape::Ou(Ou {
                    role: CircleRole::Leader,
                    initial: true,
                    isolated: false,
                    ..ou.clone()
                }),
                other => other.clone(),
            };
            let output = cx.new_schema(
                schema.to_def().shape(shape).ignored_for_topography(false),
            );
            cx.class_push("o", output);
        } else if schema.glyph_class == GlyphClass::Joiner
            && !matches!(schema.shape, Shape::Space(_))
            && !schema.is_secant()
            && !schema.pseudo_cursive()
        {
            if schema.joining_type == JoiningType::Orienting
                && schema.can_be_ignored_for_topography()
            {
                cx.class_push("first", schema);
            } else {
                cx.class_push("c", schema.clone());
                if schema.can_lead_orienting_sequence()
                    && !matches!(schema.shape, Shape::Line(_))
                {
                    cx.class_push("fixed_form", schema);
                }
            }
        }
    }
    cx.insert_named_lookup(
        "check_previous",
        Lookup::named().with_flags(flags::IGNORE_MARKS),
    );
    cx.add_named_rule(
        "check_previous",
        Rule::chain(vec![c("c"), c("first")], vec![c("i")], vec![], vec![None]),
    );
    cx.add_named_rule(
        "check_previous",
        Rule::chain(vec![c("c")], vec![c("i")], vec![], vec![None]),
    );
    cx.add_named_rule(
        "check_previous",
        Rule::chain(vec![], vec![c("i")], vec![c("fixed_form")], vec![None]),
    );
    cx.add_named_rule("check_previous", Rule::sub(vec![c("i")], vec![c("o")]));
    cx.add_rule(
        &mut lookup,
        Rule::chain(vec![], vec![c("i")], vec![c("c")], vec![Some("check_previous".to_string())]),
    );
    vec![lookup]
}

/// Conversely, the first orienting glyph of an initial string becomes
/// topography-ignored.
pub fn ignore_first_orienting_glyph_in_initial_sequence(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_flags(flags::IGNORE_MARKS)
        .reversed();
    for schema in snapshot(&cx.new_schemas) {
        if schema.glyph_class != GlyphClass::Joiner
            || schema.is_secant()
            || schema.pseudo_cursive()
            || schema.shape.invisible()
        {
            continue;
        }
        cx.class_push("joiner", schema.clone());
        if !(schema.can_lead_orienting_sequence() && schema.can_be_ignored_for_topography()) {
            continue;
        }
        cx.class_push("c", schema.clone());
        if schema.joining_type != JoiningType::Orienting {
            continue;
        }
        let circle_shape = match &schema.shape {
            Shape::Ou(ou) => {
                let Instruction::Component(op) = &ou.base.instructions[0] else {
                    panic!("an ou must start with its circle component");
                };
                op.shape.clone()
            }
            other => other.clone(),
        };
        let dependent_shape = match &circle_shape {
            Shape::Circle(circle) => {
                let da = circle.angle_out - circle.angle_in;
                Shape::Circle(Circle {
                    angle_in: 0.0,
                    angle_out: normalize(if circle.clockwise { da } else { -da }),
                    clockwise: true,
                    role: CircleRole::Dependent,
                    ..circle.clone()
                })
            }
            Shape::Curve(curve) => {
                let da = curve.angle_out - curve.angle_in;
                Shape::Curve(Curve {
                    angle_in: 0.0,
                    angle_out: normalize(if curve.clockwise { da } else { -da }),
                    clockwise: true,
                    ..curve.clone()
                })
            }
            other => panic!("an orienting leader must be circular, not {other:?}"),
        };
        let new_shape = match &schema.shape {
            Shape::Ou(ou) => {
                let Instruction::Component(op) = &ou.base.instructions[0] else {
                    unreachable!();
                };
                Shape::Ou(Ou {
                    base: Complex::new(vec![Instruction::Component(Component {
                        shape: dependent_shape,
                        ..op.clone()
                    })]),
                    ..ou.clone()
                })
            }
            _ => dependent_shape,
        };
        cx.class_push("i", schema.clone());
        let output = cx.new_schema(
            schema
                .to_def()
                .cmap(None)
                .shape(new_shape)
                .ignored_for_topography(true)
                .context_in(Context::NONE)
                .context_out(Context::NONE),
        );
        cx.class_push("o", output);
    }
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![c("joiner")], vec![c("i")], vec![], vec![c("i")]),
    );
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![], vec![c("i")], vec![c("c")], vec![c("o")]),
    );
    vec![lookup]
}

/// The one non-dependent circle (or ou) in an orienting sequence
/// becomes the leader.
pub fn tag_main_glyph_in_orienting_sequence(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_mark_filtering_set("dependent");
    if cx.original_schemas.len() != cx.schemas.len() {
        return vec![lookup];
    }
    for schema in snapshot(&cx.new_schemas) {
        if schema.ignored_for_topography {
            cx.class_push("dependent", schema);
            continue;
        }
        if schema.joining_type != JoiningType::Orienting
            || schema.glyph_class != GlyphClass::Joiner
        {
            continue;
        }
        let leader_shape = match &schema.shape {
            Shape::Circle(circle) if circle.role == CircleRole::Independent => {
                Some(Shape::Circle(Circle {
                    role: CircleRole::Leader,
                    ..circle.clone()
                }))
            }
            Shape::Ou(ou) if ou.role == CircleRole::Independent => Some(Shape::Ou(Ou {
                role: CircleRole::Leader,
                ..ou.clone()
            })),
            _ => None,
        };
        if let Some(leader_shape) = leader_shape {
            cx.class_push("i", schema.clone());
            let output = cx.new_schema(schema.to_def().cmap(None).shape(leader_shape));
            cx.class_push("o", output);
        }
    }
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![c("dependent")], vec![c("i")], vec![], vec![c("o")]),
    );
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![], vec![c("i")], vec![c("dependent")], vec![c("o")]),
    );
    vec![lookup]
}

/// Contextualizes each orienting letter against the entry context of
/// the letter after it.
pub fn join_with_next(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut pre_lookup = Lookup::new(b"rclt", b"dflt")
        .with_mark_filtering_set(CONTINUING_OVERLAP_CLASS)
        .reversed();
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_mark_filtering_set(CONTINUING_OVERLAP_CLASS)
        .reversed();
    let mut post_lookup = Lookup::new(b"rclt", b"dflt")
        .with_mark_filtering_set("continuing_overlap_after_secant")
        .reversed();
    let old_input_count = cx.class_len("i");
    let mut continuing_overlap = None;
    let mut continuing_overlap_after_secant = None;
    if old_input_count == 0 {
        for schema in snapshot(&cx.original_schemas) {
            if schema.glyph_class == GlyphClass::Joiner
                && schema.joining_type == JoiningType::Orienting
                && schema.context_out.is_none()
            {
                cx.class_push("i", schema.clone());
                if schema.is_secant() {
                    cx.class_push("secant_i", schema.clone());
                    cx.class_push("secant_o", schema.clone());
                }
            }
        }
        let overlap = cx
            .class(CONTINUING_OVERLAP_CLASS)
            .first()
            .cloned()
            .expect("a continuing overlap must exist");
        let after_secant = cx.new_schema(SchemaDef::new(
            None,
            Shape::ContinuingOverlap { from_character: false },
            0.0,
        ));
        cx.class_push("continuing_overlap_after_secant", after_secant.clone());
        cx.add_rule(
            &mut pre_lookup,
            Rule::contextual(vec![c("secant_i")], vec![s(&overlap)], vec![], vec![s(&after_secant)]),
        );
        continuing_overlap = Some(overlap);
        continuing_overlap_after_secant = Some(after_secant);
    }
    let mut contexts_out: Vec<Context> = Vec::new();
    let mut new_contexts_out: IndexSet<Context> = IndexSet::new();
    for schema in snapshot(&cx.new_schemas) {
        let is_curvy = matches!(schema.shape, Shape::Curve(_) | Shape::Circle(_))
            || schema
                .shape
                .as_complex()
                .is_some_and(|complex| !complex.has_tick());
        if schema.glyph_class == GlyphClass::Joiner
            && (old_input_count == 0 || !is_curvy)
            && !schema.is_secant()
        {
            let context_out = schema.shape.context_in();
            if !context_out.is_none() {
                if !contexts_out.contains(&context_out) {
                    contexts_out.push(context_out);
                }
                let class_name = format!("c_{context_out}");
                if !cx.class_contains(&class_name, &schema) {
                    if cx.class_len(&class_name) == 0 {
                        new_contexts_out.insert(context_out);
                    }
                    cx.class_push(&class_name, schema.clone());
                }
            }
        }
    }
    for context_out in contexts_out {
        let output_class_name = format!("o_{context_out}");
        let new_context = new_contexts_out.contains(&context_out);
        for (i, target_schema) in cx.class("i").into_iter().enumerate() {
            if new_context || i >= old_input_count {
                let output_schema = target_schema.contextualize(
                    target_schema.context_in,
                    context_out,
                    true,
                    cx.phase_index,
                );
                cx.class_push(&output_class_name, output_schema.clone());
                if output_schema.is_secant() {
                    cx.class_push("secant_o", output_schema);
                }
            }
        }
        if new_context {
            cx.add_rule(
                &mut lookup,
                Rule::contextual(
                    vec![],
                    vec![c("i")],
                    vec![c(format!("c_{context_out}"))],
                    vec![c(output_class_name)],
                ),
            );
        }
    }
    if old_input_count == 0 {
        let continuing_overlap = continuing_overlap.unwrap();
        let continuing_overlap_after_secant = continuing_overlap_after_secant.unwrap();
        // FIXME: This rule should not need to be contextual, but some
        // layout compilers reject an empty coverage otherwise.
        cx.add_rule(
            &mut post_lookup,
            Rule::contextual(
                vec![c("secant_o")],
                vec![s(&continuing_overlap_after_secant)],
                vec![],
                vec![s(&continuing_overlap)],
            ),
        );
    }
    vec![pre_lookup, lookup, post_lookup]
}

/// A trailing dependent circle adopts the entry context of a following
/// non-orienting glyph.
pub fn join_circle_with_adjacent_nonorienting_glyph(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_mark_filtering_set("ignored_for_topography")
        .reversed();
    let mut contexts_out: Vec<Context> = Vec::new();
    for schema in snapshot(&cx.new_schemas) {
        if schema.ignored_for_topography {
            if schema.context_out.is_none() && matches!(schema.shape, Shape::Circle(_)) {
                cx.class_push("i", schema.clone());
            }
            cx.class_push("ignored_for_topography", schema);
            continue;
        }
        let qualifies = match &schema.shape {
            Shape::Line(line) => !schema.can_lead_orienting_sequence() || line.secant.is_none(),
            _ => !schema.can_lead_orienting_sequence() || schema.original_shape == "Line",
        };
        if schema.glyph_class == GlyphClass::Joiner && qualifies {
            let context_out = schema.shape.context_in();
            if let Some(angle) = context_out.angle {
                let context_out = Context::new(angle);
                if !contexts_out.contains(&context_out) {
                    contexts_out.push(context_out);
                }
                cx.class_push(&format!("c_{context_out}"), schema);
            }
        }
    }
    for context_out in contexts_out {
        let output_class_name = format!("o_{context_out}");
        for circle in cx.class("i") {
            let output = cx.new_schema(circle.to_def().cmap(None).context_out(context_out));
            cx.class_push(&output_class_name, output);
        }
        cx.add_rule(
            &mut lookup,
            Rule::contextual(
                vec![],
                vec![c("i")],
                vec![c(format!("c_{context_out}"))],
                vec![c(output_class_name)],
            ),
        );
    }
    vec![lookup]
}

/// Adjacent topography-ignored circle and curve letters merge into a
/// diphthong ligature.
pub fn ligate_diphthongs(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_mark_filtering_set("ignored_for_topography")
        .reversed();
    let mut diphthong_1_classes: IndexSet<(String, bool, bool, String)> = IndexSet::new();
    let mut diphthong_2_classes: IndexSet<(String, bool, bool, String)> = IndexSet::new();
    for schema in snapshot(&cx.new_schemas) {
        if schema.ignored_for_topography {
            cx.class_push("ignored_for_topography", schema.clone());
        }
        if !schema.can_become_part_of_diphthong() {
            continue;
        }
        let is_circle_letter = match &schema.shape {
            Shape::Circle(_) => true,
            Shape::Curve(curve) => curve.reversed_circle != 0.0,
            _ => unreachable!("diphthong letters are circles or curves"),
        };
        let is_ignored = schema.ignored_for_topography;
        if is_ignored && !schema.is_primary() {
            continue;
        }
        let key = format!("{}_{}", bool_key(is_circle_letter), bool_key(is_ignored));
        let input_class_name = format!("i1_{key}");
        cx.class_push(&input_class_name, schema.clone());
        let output_class_name = format!("o1_{key}");
        let output_schema = cx.new_schema(schema.to_def().cmap(None).diphthong_1(true));
        cx.class_push(&output_class_name, output_schema.clone());
        diphthong_1_classes.insert((
            input_class_name,
            is_circle_letter,
            is_ignored,
            output_class_name,
        ));
        if output_schema.ignored_for_topography {
            cx.class_push("ignored_for_topography", output_schema);
        }
        let input_class_name = format!("i2_{key}");
        cx.class_push(&input_class_name, schema.clone());
        let output_class_name = format!("o2_{key}");
        let output_schema = cx.new_schema(schema.to_def().cmap(None).diphthong_2(true));
        cx.class_push(&output_class_name, output_schema.clone());
        diphthong_2_classes.insert((
            input_class_name,
            is_circle_letter,
            is_ignored,
            output_class_name,
        ));
        if output_schema.ignored_for_topography {
            cx.class_push("ignored_for_topography", output_schema);
        }
    }
    for (input_1, is_circle_1, is_ignored_1, output_1) in &diphthong_1_classes {
        for (input_2, is_circle_2, is_ignored_2, output_2) in &diphthong_2_classes {
            if is_circle_1 != is_circle_2 && (*is_ignored_1 || *is_ignored_2) {
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![c(input_1.clone())],
                        vec![c(input_2.clone())],
                        vec![],
                        vec![c(output_2.clone())],
                    ),
                );
                cx.add_rule(
                    &mut lookup,
                    Rule::contextual(
                        vec![],
                        vec![c(input_1.clone())],
                        vec![c(output_2.clone())],
                        vec![c(output_1.clone())],
                    ),
                );
            }
        }
    }
    vec![lookup]
}

/// Curves whose contextualization would flip get an explicit early
/// exit instead.
pub fn thwart_what_would_flip(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_mark_filtering_set("all");
    for schema in snapshot(&cx.new_schemas) {
        if let Shape::Curve(curve) = &schema.shape {
            if curve.would_flip {
                cx.class_push("i", schema.clone());
                let output = cx.new_schema(schema.to_def().shape(Shape::Curve(Curve {
                    exit_position: 0.5,
                    would_flip: false,
                    may_reposition_cursive_endpoints: true,
                    ..curve.clone()
                })));
                cx.class_push("o", output);
                continue;
            }
        }
        if matches!(&schema.shape, Shape::ParentEdge(edge) if edge.lineage.is_empty()) {
            cx.class_push("root_parent_edge", schema.clone());
            cx.class_push("all", schema);
        } else if schema.ignored_for_topography
            && (schema.context_in.angle.is_none() || schema.context_in.ignorable_for_topography)
        {
            cx.class_push("tail", schema.clone());
            cx.class_push("all", schema);
        }
    }
    cx.add_rule(
        &mut lookup,
        Rule::chain(vec![], vec![c("i")], vec![c("root_parent_edge"), c("tail")], vec![None]),
    );
    cx.add_rule(
        &mut lookup,
        Rule::contextual(vec![], vec![c("i")], vec![c("root_parent_edge")], vec![c("o")]),
    );
    vec![lookup]
}

fn can_be_unignored(cx: &PhaseCx, schema: &SchemaRef) -> bool {
    if !schema.can_lead_orienting_sequence() {
        return false;
    }
    match &schema.shape {
        Shape::Circle(circle) => {
            normalize(circle.angle_out - circle.angle_in) % 180.0 == 0.0
                || schema.phase_index
                    < cx.pipeline_index("join_circle_with_adjacent_nonorienting_glyph")
        }
        _ => schema.can_be_ignored_for_topography(),
    }
}

/// Re-contextualizes ignored schemas of non-initial orienting
/// sequences from their preceding leader.
pub fn unignore_noninitial_orienting_sequences(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt").with_mark_filtering_set("i");
    let mut contexts_in: Vec<Context> = Vec::new();
    let mut new_contexts_in: IndexSet<Context> = IndexSet::new();
    let old_input_count = cx.class_len("i");
    for schema in snapshot(&cx.new_schemas) {
        if schema.ignored_for_topography
            && (schema.context_in.angle.is_none() || schema.context_in.ignorable_for_topography)
        {
            cx.class_push("i", schema);
        } else if schema.glyph_class == GlyphClass::Joiner && can_be_unignored(cx, &schema) {
            let mut context_in = schema.path_context_out();
            context_in.diphthong_start = false;
            context_in.diphthong_end = false;
            if !contexts_in.contains(&context_in) {
                contexts_in.push(context_in);
            }
            let class_name = format!("c_{context_in}");
            if !cx.class_contains(&class_name, &schema) {
                if cx.class_len(&class_name) == 0 {
                    new_contexts_in.insert(context_in);
                }
                cx.class_push(&class_name, schema);
            }
        }
    }
    for context_in in contexts_in {
        let output_class_name = format!("o_{context_in}");
        let new_context = new_contexts_in.contains(&context_in);
        for (i, target_schema) in cx.class("i").into_iter().enumerate() {
            if new_context || i >= old_input_count {
                let output_schema = target_schema.contextualize(
                    context_in,
                    target_schema.context_out,
                    false,
                    cx.phase_index,
                );
                cx.class_push(&output_class_name, output_schema);
            }
        }
        if new_context {
            cx.add_rule(
                &mut lookup,
                Rule::contextual(
                    vec![c(format!("c_{context_in}"))],
                    vec![c("i")],
                    vec![],
                    vec![c(output_class_name)],
                ),
            );
        }
    }
    vec![lookup]
}

/// Re-contextualizes ignored schemas of initial orienting sequences
/// from their following leader.
pub fn unignore_initial_orienting_sequences(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rclt", b"dflt")
        .with_mark_filtering_set("i")
        .reversed();
    let mut contexts_out: Vec<Context> = Vec::new();
    let mut new_contexts_out: IndexSet<Context> = IndexSet::new();
    let old_input_count = cx.class_len("i");
    for schema in snapshot(&cx.new_schemas) {
        if schema.ignored_for_topography
            && (schema.context_out.angle.is_none() || schema.context_out.ignorable_for_topography)
        {
            cx.class_push("i", schema);
        } else if schema.glyph_class == GlyphClass::Joiner && can_be_unignored(cx, &schema) {
            let mut context_out = schema.path_context_in();
            context_out.diphthong_start = false;
            context_out.diphthong_end = false;
            if !contexts_out.contains(&context_out) {
                contexts_out.push(context_out);
            }
            let class_name = format!("c_{context_out}");
            if !cx.class_contains(&class_name, &schema) {
                if cx.class_len(&class_name) == 0 {
                    new_contexts_out.insert(context_out);
                }
                cx.class_push(&class_name, schema);
            }
        }
    }
    for context_out in contexts_out {
        let output_class_name = format!("o_{context_out}");
        let new_context = new_contexts_out.contains(&context_out);
        for (i, target_schema) in cx.class("i").into_iter().enumerate() {
            if new_context || i >= old_input_count {
                let output_schema = target_schema.contextualize(
                    target_schema.context_in,
                    context_out,
                    false,
                    cx.phase_index,
                );
                cx.class_push(&output_class_name, output_schema);
            }
        }
        if new_context {
            cx.add_rule(
                &mut lookup,
                Rule::contextual(
                    vec![],
                    vec![c("i")],
                    vec![c(format!("c_{context_out}"))],
                    vec![c(output_class_name)],
                ),
            );
        }
    }
    vec![lookup]
}

/// Sequences of U+1BC9E combine into one ligature whose shape repeats
/// the double mark laterally.
pub fn join_double_marks(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt").with_mark_filtering_set("all");
    for schema in snapshot(&cx.new_schemas) {
        if schema.cps != [0x1BC9E] {
            continue;
        }
        let Shape::Line(line) = &schema.shape else {
            unreachable!("the double mark is a line");
        };
        cx.class_push("all", schema.clone());
        for i in 2..=MAX_DOUBLE_MARKS {
            let mut instructions = Vec::new();
            for _ in 0..i {
                instructions.push(Instruction::component(1.0, Shape::Line(line.clone())));
                instructions.push(Instruction::component(
                    500.0,
                    Shape::Space(Space::new(normalize(line.angle + 180.0))),
                ));
                instructions.push(Instruction::component(
                    250.0,
                    Shape::Space(Space::new(normalize(line.angle - 90.0))),
                ));
            }
            let output = cx.new_schema(
                schema
                    .to_def()
                    .cmap(None)
                    .cps(schema.cps.repeat(i))
                    .shape(Shape::Complex(Complex::new(instructions))),
            );
            cx.add_rule(
                &mut lookup,
                Rule::sub(std::iter::repeat(s(&schema)).take(i).collect(), vec![s(&output)]),
            );
        }
    }
    vec![lookup]
}

/// Each mark schema gets clones rotated for every discovered
/// base-anchor context.
pub fn rotate_diacritics(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt").with_mark_filtering_set("all");
    let mut base_anchors_and_contexts: Vec<(&'static str, Context)> = Vec::new();
    let mut new_base_anchors_and_contexts: IndexSet<(&'static str, Context)> = IndexSet::new();
    for schema in snapshot(&cx.new_schemas) {
        if schema.anchor.is_some() {
            if schema.base_angle.is_none() && schema.joining_type == JoiningType::Orienting {
                cx.class_push("all", schema.clone());
                cx.class_push(&format!("i_{}", schema.anchor.unwrap()), schema);
            }
        } else if !schema.ignored_for_topography {
            for (base_anchor, base_angle) in schema.diacritic_angles() {
                let exit_context = schema.path_context_out();
                let base_context = Context {
                    angle: Some(base_angle),
                    clockwise: exit_context.clockwise,
                    ignorable_for_topography: exit_context.ignorable_for_topography,
                    ..Context::NONE
                };
                let base_anchor_and_context = (base_anchor, base_context);
                if !base_anchors_and_contexts.contains(&base_anchor_and_context) {
                    base_anchors_and_contexts.push(base_anchor_and_context);
                }
                let class_name = format!("c_{base_anchor}_{base_context}");
                if !cx.class_contains(&class_name, &schema) {
                    if cx.class_len(&class_name) == 0 {
                        new_base_anchors_and_contexts.insert(base_anchor_and_context);
                    }
                    cx.class_push(&class_name, schema.clone());
                    if schema.glyph_class == GlyphClass::Mark {
                        cx.class_push("all", schema.clone());
                    }
                }
            }
        }
    }
    for (anchor, context) in base_anchors_and_contexts {
        if !new_base_anchors_and_contexts.contains(&(anchor, context)) {
            continue;
        }
        let output_class_name = format!("o_{anchor}_{context}");
        for target_schema in cx.class(&format!("i_{anchor}")) {
            if target_schema.anchor == Some(anchor) {
                let output_schema = target_schema.rotate_diacritic(&context, cx.phase_index);
                cx.class_push(&output_class_name, output_schema);
            }
        }
        cx.add_rule(
            &mut lookup,
            Rule::contextual(
                vec![c(format!("c_{anchor}_{context}"))],
                vec![c(format!("i_{anchor}"))],
                vec![],
                vec![c(output_class_name)],
            ),
        );
    }
    vec![lookup]
}

/// A schema followed by a validated thick letter selector becomes a
/// shaded variant.
pub fn shade(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt").with_mark_filtering_set("independent_mark");
    let dtls = cx
        .schemas
        .iter()
        .find(|s| matches!(s.shape, Shape::ValidDtls))
        .cloned()
        .expect("a valid DTLS must exist by now");
    cx.class_push("independent_mark", dtls.clone());
    for schema in snapshot(&cx.new_schemas) {
        if schema.anchor.is_some() && !schema.is_secant() {
            if schema.cmap.is_some() {
                cx.class_push("independent_mark", schema);
            }
        } else if cx.original_schemas.contains(&schema)
            && !schema.ignored_for_topography
            && schema.shading_allowed
            && schema.shape.is_shadable()
        {
            cx.class_push("i", schema.clone());
            let mut cps = schema.cps.clone();
            cps.extend(&dtls.cps);
            let output = cx.new_schema(schema.to_def().cmap(None).cps(cps));
            cx.class_push("o", output);
            if schema.glyph_class == GlyphClass::Mark {
                cx.class_push("independent_mark", schema);
            }
        }
    }
    cx.add_rule(&mut lookup, Rule::sub(vec![c("i"), s(&dtls)], vec![c("o")]));
    vec![lookup]
}

pub fn create_superscripts_and_subscripts(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup_sups = Lookup::new(b"sups", b"dflt");
    let mut lookup_subs = Lookup::new(b"subs", b"dflt");
    for schema in snapshot(&cx.new_schemas) {
        if matches!(schema.cmap, Some(cmap) if (0x30..=0x39).contains(&cmap)) {
            cx.class_push("i", schema.clone());
            let sups = cx.new_schema(
                schema
                    .to_def()
                    .cmap(None)
                    .y_min(Some(SUPERSCRIPT_HEIGHT - SMALL_DIGIT_FACTOR * CAP_HEIGHT))
                    .y_max(Some(SUPERSCRIPT_HEIGHT)),
            );
            cx.class_push("o_sups", sups);
            let subs = cx.new_schema(
                schema
                    .to_def()
                    .cmap(None)
                    .y_min(Some(SUBSCRIPT_DEPTH))
                    .y_max(Some(SUBSCRIPT_DEPTH + SMALL_DIGIT_FACTOR * CAP_HEIGHT)),
            );
            cx.class_push("o_subs", subs);
        }
    }
    cx.add_rule(&mut lookup_sups, Rule::sub(vec![c("i")], vec![c("o_sups")]));
    cx.add_rule(&mut lookup_subs, Rule::sub(vec![c("i")], vec![c("o_subs")]));
    vec![lookup_sups, lookup_subs]
}

/// Every visible mark gets a widthless clone for post-base
/// positioning.
pub fn make_widthless_variants_of_marks(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt");
    let first_iteration = !cx.has_class("i");
    for schema in snapshot(&cx.new_schemas) {
        if schema.glyph_class == GlyphClass::Mark {
            if schema.anchor.is_some() && schema.widthless.is_none() && !schema.shape.invisible() {
                cx.class_push("i", schema.clone());
                let widthless = cx.new_schema(schema.to_def().cmap(None).widthless(Some(true)));
                cx.class_push("o", widthless.clone());
                cx.class_push("c", widthless);
            }
        } else if schema.joining_type == JoiningType::NonJoining {
            cx.class_push("c", schema);
        }
    }
    if first_iteration {
        cx.add_rule(
            &mut lookup,
            Rule::contextual(vec![c("c")], vec![c("i")], vec![], vec![c("o")]),
        );
    }
    vec![lookup]
}

/// Builds the global mark-to-mark classes the tree phases filter with.
pub fn classify_marks_for_trees(cx: &mut PhaseCx) -> Vec<Lookup> {
    for schema in snapshot(&cx.schemas) {
        for anchor in crate::anchors::ALL_MARK {
            if schema.glyph_class == GlyphClass::Mark
                && (schema.child || schema.anchor == Some(anchor) || schema.is_secant())
            {
                cx.class_push(&format!("global..{}", crate::anchors::mkmk(anchor)), schema.clone());
            }
        }
    }
    Vec::new()
}

pub fn phase_list() -> Vec<PhaseDef> {
    vec![
        phase!(create_diagonal_fractions),
        phase!(dont_ignore_default_ignorables),
        phase!(reversed_circle_kludge),
        phase!(validate_shading),
        phase!(validate_double_marks),
        phase!(decompose),
        phase!(expand_secants),
        phase!(validate_overlap_controls),
        phase!(add_parent_edges),
        phase!(invalidate_overlap_controls),
        phase!(add_secant_guidelines),
        phase!(add_placeholders_for_missing_children),
        phase!(categorize_edges),
        phase!(disjoin_grammalogues),
        phase!(promote_final_letter_overlap_to_continuing_overlap),
        phase!(reposition_chinook_jargon_overlap_points),
        phase!(make_mark_variants_of_children),
        phase!(interrupt_overlong_primary_curve_sequences),
        phase!(reposition_stenographic_period),
        phase!(join_with_next_step),
        phase!(separate_subantiparallel_lines),
        phase!(prepare_for_secondary_diphthong_ligature),
        phase!(join_with_previous),
        phase!(unignore_last_orienting_glyph_in_initial_sequence),
        phase!(ignore_first_orienting_glyph_in_initial_sequence),
        phase!(tag_main_glyph_in_orienting_sequence),
        phase!(join_with_next),
        phase!(join_circle_with_adjacent_nonorienting_glyph),
        phase!(ligate_diphthongs),
        phase!(thwart_what_would_flip),
        phase!(unignore_noninitial_orienting_sequences),
        phase!(unignore_initial_orienting_sequences),
        phase!(join_double_marks),
        phase!(separate_subantiparallel_lines_again),
        phase!(rotate_diacritics),
        phase!(shade),
        phase!(create_superscripts_and_subscripts),
        phase!(make_widthless_variants_of_marks),
        phase!(classify_marks_for_trees),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tree_enumeration_is_bounded() {
        let node = c("node");
        let edge = c("edge");
        let depth_1 = make_trees(&node, Some(&edge), 1, None, None);
        // At depth 1 the only tree is a lone node.
        assert_eq!(depth_1, vec![vec![node.clone()]]);
        let depth_2 = make_trees(&node, Some(&edge), 2, None, None);
        // Width 0, 1, or 2, each child being a lone node.
        assert_eq!(depth_2.len(), 3);
        assert!(depth_2.iter().all(|t| t[0] == node));
        let depth_3 = make_trees(&node, Some(&edge), 3, None, None);
        assert!(depth_3.len() > depth_2.len());
        // Top widths restrict the root's children and drop the root
        // itself from the flattened form.
        let only_width_1 = make_trees(&node, Some(&edge), 2, Some(&[1]), None);
        assert_eq!(only_width_1, vec![vec![node.clone()]]);
    }

    #[test]
    fn overlong_sequence_search_stops_at_a_full_turn() {
        let mut overlong = Vec::new();
        find_overlong_sequences(&[90.0, 180.0], &mut overlong, &mut Vec::new());
        assert!(overlong.iter().all(|s| s.iter().sum::<f64>() >= 360.0));
        assert!(overlong.contains(&vec![180.0, 180.0]));
        assert!(overlong.contains(&vec![90.0, 90.0, 90.0, 90.0]));
        assert!(!overlong.contains(&vec![90.0, 90.0]));
    }

    #[test]
    fn number_tokens_are_class_name_safe() {
        assert_eq!(num(90.0), "90");
        assert_eq!(num(46.5), "46n5");
        assert_eq!(num(-35.0), "n35");
    }
}
