//! The phase system.
//!
//! A phase is a function that generates a sequence of lookups from the
//! current schema set. A phase runs iteratively until its output is
//! stable: the output schemas of one iteration may be the input
//! schemas of the next. The first iteration fixes how many anonymous
//! lookups the phase generates; later iterations may only add rules to
//! them (and may freely create new named lookups).
//!
//! Classes and named lookups are namespaced per phase, so two phases
//! can use the same short name without conflict; a name starting with
//! `global..` bypasses namespacing.

use font_types::Tag;
use indexmap::{IndexMap, IndexSet};
use log::{debug, trace};

use crate::fea::{self, flags, Lookup, Rule, Target, SUBSET_FEATURES};
use crate::schema::{SchemaDef, SchemaRef};
use crate::util::{FreezableList, GlyphClass, MAX_TREE_WIDTH};

pub mod main;
pub mod marker;
pub mod middle;

/// The name of the glyph class containing all parent edges and all
/// children, used to connect them while ignoring other marks.
pub const PARENT_EDGE_CLASS: &str = "global..pe";

/// Classes connecting children with child edges, by child index.
pub const CHILD_EDGE_CLASSES: [&str; MAX_TREE_WIDTH] = ["global..ce1", "global..ce2"];

/// Classes connecting child edges with parent edges, by layer and
/// child index.
pub const INTER_EDGE_CLASSES: [[&str; MAX_TREE_WIDTH]; crate::util::MAX_TREE_DEPTH] = [
    ["global..edge0_1", "global..edge0_2"],
    ["global..edge1_1", "global..edge1_2"],
    ["global..edge2_1", "global..edge2_2"],
];

/// The class of all valid continuing overlaps.
pub const CONTINUING_OVERLAP_CLASS: &str = "global..cont";

/// The class of all hubs.
pub const HUB_CLASS: &str = "global..hub";

/// The union of [`CONTINUING_OVERLAP_CLASS`] and [`HUB_CLASS`].
pub const CONTINUING_OVERLAP_OR_HUB_CLASS: &str = "global..cont_or_hub";

/// The full name of a phase-scoped class or named lookup.
pub fn qualify(prefix: &str, name: &str) -> String {
    if name.starts_with("global..") {
        name.to_string()
    } else {
        format!("{prefix}..{name}")
    }
}

/// Formats a number as a token usable inside a class name.
pub(crate) fn number_token(x: f64) -> String {
    let mut s = format!("{x}");
    if let Some(stripped) = s.strip_suffix(".0") {
        s = stripped.to_string();
    }
    s.replace(['.', '-'], "n")
}

pub type ClassMap = IndexMap<String, FreezableList<SchemaRef>>;

/// The stroke-style configuration phases may consult.
#[derive(Clone, Copy, Debug)]
pub struct StrokeStyle {
    pub stroke_width: f64,
    pub light_line: f64,
    pub stroke_gap: f64,
}

impl StrokeStyle {
    pub fn regular() -> StrokeStyle {
        StrokeStyle {
            stroke_width: crate::util::REGULAR_STROKE_WIDTH,
            light_line: crate::util::REGULAR_LIGHT_LINE,
            stroke_gap: crate::util::MINIMUM_STROKE_GAP,
        }
    }

    pub fn bold() -> StrokeStyle {
        StrokeStyle {
            stroke_width: crate::util::BOLD_STROKE_WIDTH,
            light_line: crate::util::BOLD_LIGHT_LINE,
            stroke_gap: 75.0,
        }
    }
}

/// A phase: a named pass over the schema set.
#[derive(Clone, Copy)]
pub struct PhaseDef {
    pub name: &'static str,
    pub run: fn(&mut PhaseCx) -> Vec<Lookup>,
}

/// Declares a [`PhaseDef`] from a function of the same name.
macro_rules! phase {
    ($name:ident) => {
        crate::phases::PhaseDef {
            name: stringify!($name),
            run: $name,
        }
    };
}
pub(crate) use phase;

/// Everything one phase iteration can see and mutate.
pub struct PhaseCx<'a> {
    pub phase_name: &'static str,
    /// The index of this phase in the whole pipeline; schemas created
    /// now are tagged with it.
    pub phase_index: usize,
    pub stroke: StrokeStyle,
    /// All the schemas that existed before this phase was ever run.
    pub original_schemas: IndexSet<SchemaRef>,
    /// All the schemas that are inputs to the current iteration.
    pub schemas: IndexSet<SchemaRef>,
    /// The schemas not seen by previous iterations of this phase.
    pub new_schemas: IndexSet<SchemaRef>,
    pipeline_indices: &'a IndexMap<&'static str, usize>,
    classes: &'a mut ClassMap,
    named_lookups: &'a mut IndexMap<String, Lookup>,
    autochthonous_schemas: &'a IndexSet<SchemaRef>,
    output_schemas: &'a mut IndexSet<SchemaRef>,
}

impl PhaseCx<'_> {
    /// Creates a schema, tagged with this phase's index.
    pub fn new_schema(&self, def: SchemaDef) -> SchemaRef {
        def.build(self.phase_index)
    }

    /// The pipeline index of a phase, for schema age comparisons.
    pub fn pipeline_index(&self, phase_name: &str) -> usize {
        self.pipeline_indices[phase_name]
    }

    fn full_class_name(&self, name: &str) -> String {
        qualify(self.phase_name, name)
    }

    /// The contents of a class. The returned handles are cheap clones.
    pub fn class(&self, name: &str) -> Vec<SchemaRef> {
        let full = self.full_class_name(name);
        self.classes
            .get(&full)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn class_len(&self, name: &str) -> usize {
        let full = self.full_class_name(name);
        self.classes.get(&full).map_or(0, FreezableList::len)
    }

    /// Whether the class has ever been touched.
    pub fn has_class(&self, name: &str) -> bool {
        let full = self.full_class_name(name);
        self.classes.contains_key(&full)
    }

    pub fn class_push(&mut self, name: &str, schema: SchemaRef) {
        let full = self.full_class_name(name);
        self.classes.entry(full).or_default().push(schema);
    }

    pub fn class_extend(&mut self, name: &str, schemas: impl IntoIterator<Item = SchemaRef>) {
        let full = self.full_class_name(name);
        self.classes.entry(full).or_default().extend(schemas);
    }

    /// Touches a class without adding anything, so `has_class` sees it.
    pub fn declare_class(&mut self, name: &str) {
        let full = self.full_class_name(name);
        self.classes.entry(full).or_default();
    }

    pub fn class_contains(&self, name: &str, schema: &SchemaRef) -> bool {
        let full = self.full_class_name(name);
        self.classes
            .get(&full)
            .is_some_and(|list| list.iter().any(|s| s == schema))
    }

    pub fn insert_named_lookup(&mut self, name: &str, lookup: Lookup) {
        assert!(
            lookup.feature.is_none(),
            "named lookups must not have a feature",
        );
        let full = self.full_class_name(name);
        self.named_lookups.insert(full, lookup);
    }

    pub fn has_named_lookup(&self, name: &str) -> bool {
        self.named_lookups.contains_key(&self.full_class_name(name))
    }

    /// Adds a rule to a named lookup, applying the same policies as
    /// [`PhaseCx::add_rule`].
    pub fn add_named_rule(&mut self, name: &str, rule: Rule) {
        let full = self.full_class_name(name);
        let mut lookup = self
            .named_lookups
            .shift_remove(&full)
            .unwrap_or_else(|| panic!("no named lookup '{name}'"));
        self.add_rule(&mut lookup, rule);
        self.named_lookups.insert(full, lookup);
    }

    fn resolve_class(&self, name: &str) -> Vec<SchemaRef> {
        self.class(name)
    }

    fn freeze_class(&mut self, name: &str) {
        let full = self.full_class_name(name);
        self.classes.entry(full).or_default().freeze();
    }

    /// Adds a rule to a lookup, subject to the phase system's
    /// policies:
    ///
    /// - A rule whose input consists only of schemas created in this
    ///   phase is refused: it would re-match the phase's own output and
    ///   never terminate.
    /// - A rule already covered by an earlier rule with equal inputs
    ///   and weakly extended contexts is dropped.
    /// - A required non-contextual single-input rule removes its
    ///   guaranteed-substituted input schemas from the possible output
    ///   set.
    /// - Every output schema, including those reached through named
    ///   lookups, is registered as a possible output; classes and
    ///   named lookups this touches are frozen.
    pub fn add_rule(&mut self, lookup: &mut Lookup, rule: Rule) {
        #[cfg(debug_assertions)]
        self.check_ignored_schemas(lookup, &rule);
        let scripts = rule.scripts(&|name| self.resolve_class(name));
        if scripts.is_empty() {
            // Disjoint script sets mean the rule can never apply. But
            // if a class in the rule is empty, the phase is probably
            // still populating its classes, so keep waiting.
            let pieces: Vec<&Target> = rule
                .contexts_in
                .iter()
                .chain(&rule.inputs)
                .chain(&rule.contexts_out)
                .collect();
            let has_empty_class = pieces.iter().any(
                |t| matches!(t, Target::Class(name) if self.class_len(name) == 0),
            );
            if !has_empty_class {
                for piece in pieces {
                    if let Target::Class(name) = piece {
                        let name = name.clone();
                        self.freeze_class(&name);
                    }
                }
                return;
            }
        }
        for input in &rule.inputs {
            match input {
                Target::Class(name) => {
                    let members = self.class(name);
                    if members
                        .iter()
                        .all(|s| self.autochthonous_schemas.contains(s))
                    {
                        let name = name.clone();
                        self.freeze_class(&name);
                        return;
                    }
                }
                Target::Schema(schema) => {
                    if self.autochthonous_schemas.contains(schema) {
                        return;
                    }
                }
            }
        }
        if lookup.rules.iter().any(Rule::is_contextual) {
            for previous_rule in &lookup.rules {
                if previous_rule.inputs == rule.inputs
                    && is_suffix(&previous_rule.contexts_in, &rule.contexts_in)
                    && is_prefix(&previous_rule.contexts_out, &rule.contexts_out)
                    && (previous_rule.contexts_in != rule.contexts_in
                        || previous_rule.contexts_out != rule.contexts_out)
                {
                    return;
                }
            }
        }
        self.remove_unconditionally_substituted_schemas(lookup, &rule);
        lookup.append(rule.clone());
        let mut registered = IndexSet::new();
        self.register_output_schemas(&rule, &mut registered);
    }

    #[cfg(debug_assertions)]
    fn check_ignored_schemas(&self, lookup: &Lookup, rule: &Rule) {
        if let Some(set) = &lookup.mark_filtering_set {
            for mark in self.class(set) {
                assert_eq!(
                    mark.glyph_class,
                    GlyphClass::Mark,
                    "{mark:?} appears in mark filtering set {set} but is not a mark",
                );
            }
        }
        let ignored = |schema: &SchemaRef| -> bool {
            match schema.glyph_class {
                GlyphClass::Joiner => lookup.flags & flags::IGNORE_LIGATURES != 0,
                GlyphClass::Mark => {
                    lookup.flags & flags::IGNORE_MARKS != 0
                        || lookup
                            .mark_filtering_set
                            .as_ref()
                            .is_some_and(|set| !self.class(set).contains(schema))
                }
                GlyphClass::Blocker => false,
            }
        };
        let check = |targets: &[Target]| {
            for target in targets {
                match target {
                    Target::Schema(schema) => {
                        assert!(
                            !ignored(schema),
                            "{schema:?} appears in a substitution where it is ignored",
                        );
                    }
                    Target::Class(name) => {
                        for schema in self.class(name) {
                            assert!(
                                !ignored(&schema),
                                "at least one glyph in @{name} ({schema:?}) appears in a substitution where it is ignored",
                            );
                        }
                    }
                }
            }
        };
        check(&rule.contexts_in);
        if lookup.feature.is_none() {
            // The first input of a named lookup is immune to its
            // lookup flags: it matches whatever the referencing rule
            // targeted.
            check(&rule.inputs[1.min(rule.inputs.len())..]);
        } else {
            check(&rule.inputs);
        }
        check(&rule.contexts_out);
    }

    fn remove_unconditionally_substituted_schemas(&mut self, lookup: &Lookup, rule: &Rule) {
        if !(lookup.required
            && rule.contexts_in.is_empty()
            && rule.contexts_out.is_empty()
            && rule.inputs.len() == 1)
        {
            return;
        }
        let mut unconditionally_substituted: IndexSet<SchemaRef> = match &rule.inputs[0] {
            Target::Class(name) => self.class(name).into_iter().collect(),
            Target::Schema(schema) => [schema.clone()].into_iter().collect(),
        };
        for previous_rule in &lookup.rules {
            for previous_input in &previous_rule.inputs {
                match previous_input {
                    Target::Class(name) => {
                        for schema in self.class(name) {
                            unconditionally_substituted.shift_remove(&schema);
                        }
                    }
                    Target::Schema(schema) => {
                        unconditionally_substituted.shift_remove(schema);
                    }
                }
            }
        }
        for schema in unconditionally_substituted {
            self.output_schemas.shift_remove(&schema);
        }
    }

    fn register_output_schemas(&mut self, rule: &Rule, registered: &mut IndexSet<String>) -> bool {
        if let Some(outputs) = &rule.outputs {
            let mut froze = false;
            for output in outputs {
                match output {
                    Target::Class(name) => {
                        let mut must_freeze = false;
                        for schema in self.class(name) {
                            if !self.output_schemas.contains(&schema) {
                                must_freeze = true;
                                self.output_schemas.insert(schema);
                            }
                        }
                        if must_freeze {
                            let name = name.clone();
                            self.freeze_class(&name);
                            froze = true;
                        }
                    }
                    Target::Schema(schema) => {
                        self.output_schemas.insert(schema.clone());
                    }
                }
            }
            froze
        } else if let Some(lookups) = &rule.lookups {
            for named_lookup in lookups.iter().flatten() {
                if registered.insert(named_lookup.clone()) {
                    let full = self.full_class_name(named_lookup);
                    let rules: Vec<Rule> = self
                        .named_lookups
                        .get(&full)
                        .unwrap_or_else(|| panic!("no named lookup '{named_lookup}'"))
                        .rules
                        .iter()
                        .cloned()
                        .collect();
                    let mut froze = false;
                    for named_lookup_rule in rules {
                        if self.register_output_schemas(&named_lookup_rule, registered) {
                            froze = true;
                        }
                    }
                    if froze {
                        self.named_lookups.get_mut(&full).unwrap().freeze();
                    }
                }
            }
            false
        } else {
            false
        }
    }
}

fn is_prefix(maybe_prefix: &[Target], full: &[Target]) -> bool {
    maybe_prefix.len() <= full.len() && maybe_prefix.iter().zip(full).all(|(a, b)| a == b)
}

fn is_suffix(maybe_suffix: &[Target], full: &[Target]) -> bool {
    maybe_suffix.len() <= full.len()
        && maybe_suffix
            .iter()
            .rev()
            .zip(full.iter().rev())
            .all(|(a, b)| a == b)
}

/// The result of running a sequence of phases.
pub struct PhaseRunOutput {
    /// Every schema input to or output from any phase.
    pub all_schemas: IndexSet<SchemaRef>,
    /// The output schemas of the last phase.
    pub output_schemas: IndexSet<SchemaRef>,
    /// Each anonymous lookup paired with the name of the phase that
    /// generated it, in pipeline order.
    pub lookups_with_phases: Vec<(Lookup, &'static str)>,
    /// Named lookups by fully qualified name, with generating phase.
    pub named_lookups_with_phases: IndexMap<String, (Lookup, &'static str)>,
}

/// Runs a sequence of phases to their fixed points.
#[allow(clippy::too_many_arguments)]
pub fn run_phases(
    stroke: StrokeStyle,
    unjoined: bool,
    all_input_schemas: IndexSet<SchemaRef>,
    phases: &[PhaseDef],
    start_phase_index: usize,
    all_classes: &mut ClassMap,
    pipeline_indices: &IndexMap<&'static str, usize>,
) -> PhaseRunOutput {
    let mut previous_feature: Option<Tag> = None;
    let mut all_schemas = all_input_schemas.clone();
    let mut all_input_schemas = all_input_schemas;
    let mut lookups_with_phases: Vec<(Lookup, &'static str)> = Vec::new();
    let mut named_lookups_with_phases: IndexMap<String, (Lookup, &'static str)> = IndexMap::new();
    for (offset, phase) in phases.iter().enumerate() {
        let phase_index = start_phase_index + offset;
        debug!("running phase {} ({})", phase.name, phase_index);
        let mut all_output_schemas: IndexSet<SchemaRef> = IndexSet::new();
        let mut autochthonous_schemas: IndexSet<SchemaRef> = IndexSet::new();
        let original_input_schemas = all_input_schemas.clone();
        let mut new_input_schemas = all_input_schemas.clone();
        let mut output_schemas = all_input_schemas.clone();
        let mut named_lookups: IndexMap<String, Lookup> = IndexMap::new();
        let mut lookups: Option<Vec<Lookup>> = None;
        while !new_input_schemas.is_empty() {
            let mut cx = PhaseCx {
                phase_name: phase.name,
                phase_index,
                stroke,
                original_schemas: original_input_schemas.clone(),
                schemas: all_input_schemas.clone(),
                new_schemas: new_input_schemas.clone(),
                pipeline_indices,
                classes: &mut *all_classes,
                named_lookups: &mut named_lookups,
                autochthonous_schemas: &autochthonous_schemas,
                output_schemas: &mut output_schemas,
            };
            let output_lookups = (phase.run)(&mut cx);
            let in_subset = |f: Tag| SUBSET_FEATURES.iter().any(|s| Tag::new(*s) == f);
            if unjoined
                && output_lookups
                    .iter()
                    .any(|lookup| lookup.feature.is_some_and(|f| !in_subset(f)))
            {
                assert!(
                    output_lookups
                        .iter()
                        .all(|lookup| lookup.feature.is_some_and(|f| !in_subset(f))),
                    "mix of subset and non-subset features in phase {}",
                    phase.name,
                );
                lookups = None;
                break;
            }
            let might_have_feedback = lookup_feedback(&output_lookups);
            match &mut lookups {
                None => {
                    for lookup in &output_lookups {
                        let feature = lookup.feature.expect("phase lookups must have features");
                        let feature_index = fea::shape_plan_stage(feature)
                            .unwrap_or_else(|| panic!("feature '{feature}' has no shape plan stage"));
                        if let Some(previous) = previous_feature {
                            let previous_index = fea::shape_plan_stage(previous).unwrap();
                            assert!(
                                previous_index <= feature_index,
                                "feature '{previous}' must not follow feature '{feature}'",
                            );
                        }
                        previous_feature = Some(feature);
                    }
                    lookups = Some(output_lookups);
                }
                Some(existing) => {
                    assert_eq!(
                        existing.len(),
                        output_lookups.len(),
                        "incompatible lookup counts for phase {}",
                        phase.name,
                    );
                    for (lookup, new_lookup) in existing.iter_mut().zip(output_lookups) {
                        lookup.extend(new_lookup);
                    }
                }
            }
            for output_schema in &output_schemas {
                all_output_schemas.insert(output_schema.clone());
            }
            new_input_schemas = IndexSet::new();
            if might_have_feedback {
                for output_schema in &output_schemas {
                    if !all_input_schemas.contains(output_schema) {
                        all_input_schemas.insert(output_schema.clone());
                        autochthonous_schemas.insert(output_schema.clone());
                        new_input_schemas.insert(output_schema.clone());
                    }
                }
            }
            trace!(
                "phase {}: {} new schemas for next iteration",
                phase.name,
                new_input_schemas.len(),
            );
        }
        let Some(lookups) = lookups else {
            continue;
        };
        all_input_schemas = all_output_schemas;
        all_schemas.extend(all_input_schemas.iter().cloned());
        lookups_with_phases.extend(lookups.into_iter().map(|lookup| (lookup, phase.name)));
        named_lookups_with_phases
            .extend(named_lookups.into_iter().map(|(k, v)| (k, (v, phase.name))));
    }
    PhaseRunOutput {
        all_schemas,
        output_schemas: all_input_schemas,
        lookups_with_phases,
        named_lookups_with_phases,
    }
}

/// Whether a phase iteration's lookups can feed new schemas back into
/// the next iteration.
fn lookup_feedback(lookups: &[Lookup]) -> bool {
    match lookups {
        [] => false,
        [lookup] => lookup.rules.iter().any(|rule| {
            if lookup.reverse {
                !rule.contexts_out.is_empty()
            } else {
                !rule.contexts_in.is_empty()
            }
        }),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fea::s;
    use crate::schema::SchemaDef;
    use crate::shapes::{Line, Shape};
    use crate::util::JoiningType;

    fn schema(cp: u32) -> SchemaRef {
        SchemaDef::new(Some(cp), Shape::Line(Line::stretchy(270.0)), 1.0)
            .joining_type(JoiningType::Joining)
            .build(0)
    }

    fn with_cx(f: impl FnOnce(&mut PhaseCx)) {
        let mut classes = ClassMap::new();
        let mut named_lookups = IndexMap::new();
        let autochthonous = IndexSet::new();
        let mut output_schemas = IndexSet::new();
        let pipeline_indices = IndexMap::new();
        let mut cx = PhaseCx {
            phase_name: "test_phase",
            phase_index: 0,
            stroke: StrokeStyle::regular(),
            original_schemas: IndexSet::new(),
            schemas: IndexSet::new(),
            new_schemas: IndexSet::new(),
            pipeline_indices: &pipeline_indices,
            classes: &mut classes,
            named_lookups: &mut named_lookups,
            autochthonous_schemas: &autochthonous,
            output_schemas: &mut output_schemas,
        };
        f(&mut cx);
    }

    #[test]
    fn qualification() {
        assert_eq!(qualify("p", "x"), "p..x");
        assert_eq!(qualify("p", "global..x"), "global..x");
    }

    #[test]
    fn duplicate_weakly_extended_rules_are_dropped() {
        with_cx(|cx| {
            let a = schema(0x1BC02);
            let b = schema(0x1BC03);
            let out = schema(0x1BC04);
            let mut lookup = Lookup::new(b"rclt", b"dflt");
            cx.add_rule(
                &mut lookup,
                Rule::contextual(vec![s(&b)], vec![s(&a)], vec![], vec![s(&out)]),
            );
            assert_eq!(lookup.rules.len(), 1);
            // Same input, longer backtrack ending the same way: covered
            // by the previous rule.
            cx.add_rule(
                &mut lookup,
                Rule::contextual(vec![s(&out), s(&b)], vec![s(&a)], vec![], vec![s(&out)]),
            );
            assert_eq!(lookup.rules.len(), 1);
            // A different backtrack tail is genuinely new.
            cx.add_rule(
                &mut lookup,
                Rule::contextual(vec![s(&out)], vec![s(&a)], vec![], vec![s(&out)]),
            );
            assert_eq!(lookup.rules.len(), 2);
        });
    }

    #[test]
    fn output_schemas_are_registered_through_named_lookups() {
        with_cx(|cx| {
            let a = schema(0x1BC02);
            let b = schema(0x1BC03);
            cx.insert_named_lookup("inner", Lookup::named());
            cx.add_named_rule("inner", Rule::sub(vec![s(&a)], vec![s(&b)]));
            let mut lookup = Lookup::new(b"rclt", b"dflt");
            cx.add_rule(
                &mut lookup,
                Rule::chain(vec![], vec![s(&a)], vec![], vec![Some("inner".to_string())]),
            );
            assert!(cx.output_schemas.contains(&b));
        });
    }

    #[test]
    fn required_single_substitution_removes_input_from_outputs() {
        with_cx(|cx| {
            let a = schema(0x1BC02);
            let b = schema(0x1BC03);
            cx.output_schemas.insert(a.clone());
            cx.output_schemas.insert(b.clone());
            let mut lookup = Lookup::new(b"rclt", b"dflt");
            cx.add_rule(&mut lookup, Rule::sub(vec![s(&a)], vec![s(&b)]));
            // `a` is unconditionally substituted and can never reach
            // the output.
            assert!(!cx.output_schemas.contains(&a));
            assert!(cx.output_schemas.contains(&b));
        });
    }

    #[test]
    fn frozen_class_membership_is_stable() {
        with_cx(|cx| {
            let a = schema(0x1BC02);
            let b = schema(0x1BC03);
            cx.class_push("o", a.clone());
            let mut lookup = Lookup::new(b"rclt", b"dflt");
            cx.add_rule(
                &mut lookup,
                Rule::contextual(vec![s(&b)], vec![s(&b)], vec![], vec![crate::fea::c("o")]),
            );
            // Registering the class as an output freezes it.
            let full = qualify("test_phase", "o");
            assert!(cx.classes[&full].is_frozen());
        });
    }
}
