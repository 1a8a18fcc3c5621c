//! OpenType Layout rules and their feature-file AST form.
//!
//! The compiler's output is an in-memory tree of FEA-style statements;
//! serializing it into a font is the downstream layout compiler's job.

use std::fmt::Write as _;

use font_types::Tag;
use indexmap::{IndexMap, IndexSet};

use crate::schema::SchemaRef;
use crate::util::FreezableList;

pub const SCRIPT_DUPLOYAN: Tag = Tag::new(b"dupl");
pub const SCRIPT_DEFAULT: Tag = Tag::new(b"DFLT");
pub const LANGUAGE_DEFAULT: Tag = Tag::new(b"dflt");

pub const KNOWN_SCRIPTS: [Tag; 2] = [SCRIPT_DEFAULT, SCRIPT_DUPLOYAN];

pub const KNOWN_FEATURES: [&[u8; 4]; 15] = [
    b"abvm", b"abvs", b"blwm", b"blws", b"curs", b"dist", b"dnom", b"frac", b"mark", b"mkmk",
    b"numr", b"rclt", b"rlig", b"subs", b"sups",
];

/// Features every shaper applies for these scripts, regardless of user
/// settings. Lookups in required features unlock the removal of
/// unconditionally substituted schemas.
pub const REQUIRED_FEATURES: [&[u8; 4]; 8] = [
    b"abvm", b"blwm", b"curs", b"dist", b"mark", b"mkmk", b"rclt", b"rlig",
];

/// The features kept when building an unjoined font.
pub const SUBSET_FEATURES: [&[u8; 4]; 5] = [b"dnom", b"frac", b"numr", b"subs", b"sups"];

/// The shaper's stages, in order, for each known script. A phase's
/// feature may never sit in an earlier stage than the feature of the
/// phase before it.
pub const SHAPE_PLAN_STAGES: [&[&[u8; 4]]; 2] = [
    &[b"frac", b"numr", b"dnom"],
    &[
        b"rclt", b"rlig", b"abvs", b"blws", b"curs", b"dist", b"abvm", b"blwm", b"mark", b"mkmk",
        b"subs", b"sups",
    ],
];

/// The stage a feature belongs to, if known.
pub fn shape_plan_stage(feature: Tag) -> Option<usize> {
    SHAPE_PLAN_STAGES
        .iter()
        .position(|stage| stage.iter().any(|f| Tag::new(*f) == feature))
}

/// Lookup flag bits.
pub mod flags {
    pub const IGNORE_LIGATURES: u16 = 0x0004;
    pub const IGNORE_MARKS: u16 = 0x0008;
    pub const USE_MARK_FILTERING_SET: u16 = 0x0010;
}

/// One position in a rule: a concrete schema or a named class.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Schema(SchemaRef),
    Class(String),
}

impl From<&SchemaRef> for Target {
    fn from(schema: &SchemaRef) -> Target {
        Target::Schema(schema.clone())
    }
}

impl From<SchemaRef> for Target {
    fn from(schema: SchemaRef) -> Target {
        Target::Schema(schema)
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Target {
        Target::Class(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Target {
        Target::Class(name)
    }
}

/// Shorthand for a schema target.
pub fn s(schema: &SchemaRef) -> Target {
    Target::Schema(schema.clone())
}

/// Shorthand for a class target.
pub fn c(name: impl Into<String>) -> Target {
    Target::Class(name.into())
}

/// A contextual substitution or single-adjustment positioning rule.
///
/// Exactly one of `outputs`, `lookups`, or the positioning fields is
/// set.
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub contexts_in: Vec<Target>,
    pub inputs: Vec<Target>,
    pub contexts_out: Vec<Target>,
    pub outputs: Option<Vec<Target>>,
    /// One named lookup (or `None`) per input position.
    pub lookups: Option<Vec<Option<String>>>,
    pub x_placements: Option<Vec<Option<f64>>>,
    pub x_advances: Option<Vec<Option<f64>>>,
}

impl Rule {
    /// A non-contextual substitution.
    pub fn sub(inputs: Vec<Target>, outputs: Vec<Target>) -> Rule {
        Rule::contextual(Vec::new(), inputs, Vec::new(), outputs)
    }

    pub fn contextual(
        contexts_in: Vec<Target>,
        inputs: Vec<Target>,
        contexts_out: Vec<Target>,
        outputs: Vec<Target>,
    ) -> Rule {
        Rule {
            contexts_in,
            inputs,
            contexts_out,
            outputs: Some(outputs),
            lookups: None,
            x_placements: None,
            x_advances: None,
        }
    }

    /// A chaining contextual rule that applies named lookups at input
    /// positions.
    pub fn chain(
        contexts_in: Vec<Target>,
        inputs: Vec<Target>,
        contexts_out: Vec<Target>,
        lookups: Vec<Option<String>>,
    ) -> Rule {
        assert_eq!(
            lookups.len(),
            inputs.len(),
            "there must be one lookup (or None) per input glyph",
        );
        Rule {
            contexts_in,
            inputs,
            contexts_out,
            outputs: None,
            lookups: Some(lookups),
            x_placements: None,
            x_advances: None,
        }
    }

    /// A single-adjustment positioning rule.
    pub fn pos(
        contexts_in: Vec<Target>,
        inputs: Vec<Target>,
        contexts_out: Vec<Target>,
        x_placements: Option<Vec<Option<f64>>>,
        x_advances: Option<Vec<Option<f64>>>,
    ) -> Rule {
        if let Some(x_placements) = &x_placements {
            assert_eq!(x_placements.len(), inputs.len());
        }
        if let Some(x_advances) = &x_advances {
            assert_eq!(x_advances.len(), inputs.len());
        }
        assert!(x_placements.is_some() || x_advances.is_some());
        Rule {
            contexts_in,
            inputs,
            contexts_out,
            outputs: None,
            lookups: None,
            x_placements,
            x_advances,
        }
    }

    pub fn is_contextual(&self) -> bool {
        !self.contexts_in.is_empty() || !self.contexts_out.is_empty()
    }

    /// Whether this rule can only appear in a multiple substitution
    /// lookup.
    pub fn is_multiple(&self) -> bool {
        self.inputs.len() == 1
            && self
                .outputs
                .as_ref()
                .is_some_and(|outputs| outputs.len() != 1)
    }

    /// The minimal set of script tags relevant to this rule.
    pub fn scripts(&self, resolve_class: &dyn Fn(&str) -> Vec<SchemaRef>) -> IndexSet<Tag> {
        let target_scripts = |targets: &[Target]| -> IndexSet<Tag> {
            let mut scripts: IndexSet<Tag> = KNOWN_SCRIPTS.into_iter().collect();
            for target in targets {
                let these: IndexSet<Tag> = match target {
                    Target::Schema(schema) => schema.scripts().into_iter().collect(),
                    Target::Class(name) => {
                        let mut set = IndexSet::new();
                        for schema in resolve_class(name) {
                            set.extend(schema.scripts());
                        }
                        set
                    }
                };
                scripts.retain(|tag| these.contains(tag));
            }
            scripts
        };
        let mut scripts = target_scripts(&self.contexts_in);
        let inputs = target_scripts(&self.inputs);
        scripts.retain(|tag| inputs.contains(tag));
        let outs = target_scripts(&self.contexts_out);
        scripts.retain(|tag| outs.contains(tag));
        scripts
    }
}

/// An OpenType Layout lookup: either anonymous (tied to a feature and
/// language) or named.
#[derive(Clone, Debug)]
pub struct Lookup {
    pub feature: Option<Tag>,
    pub language: Option<Tag>,
    pub flags: u16,
    pub mark_filtering_set: Option<String>,
    pub required: bool,
    pub reverse: bool,
    pub rules: FreezableList<Rule>,
}

impl Lookup {
    pub fn new(feature: &[u8; 4], language: &[u8; 4]) -> Lookup {
        assert!(
            KNOWN_FEATURES.contains(&feature),
            "unknown feature '{}'",
            Tag::new(feature),
        );
        Lookup {
            feature: Some(Tag::new(feature)),
            language: Some(Tag::new(language)),
            flags: 0,
            mark_filtering_set: None,
            required: REQUIRED_FEATURES.contains(&feature),
            reverse: false,
            rules: FreezableList::new(),
        }
    }

    pub fn named() -> Lookup {
        Lookup {
            feature: None,
            language: None,
            flags: 0,
            mark_filtering_set: None,
            required: false,
            reverse: false,
            rules: FreezableList::new(),
        }
    }

    pub fn with_flags(mut self, extra: u16) -> Lookup {
        assert_eq!(
            extra & flags::USE_MARK_FILTERING_SET,
            0,
            "UseMarkFilteringSet is added automatically",
        );
        self.flags |= extra;
        self
    }

    pub fn with_mark_filtering_set(mut self, name: impl Into<String>) -> Lookup {
        assert_eq!(
            self.flags & flags::IGNORE_MARKS,
            0,
            "UseMarkFilteringSet is not useful with IgnoreMarks",
        );
        self.mark_filtering_set = Some(name.into());
        self.flags |= flags::USE_MARK_FILTERING_SET;
        self
    }

    pub fn reversed(mut self) -> Lookup {
        self.reverse = true;
        self
    }

    pub fn append(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn freeze(&mut self) {
        self.rules.freeze();
    }

    /// Merges another iteration's rules into this lookup.
    pub fn extend(&mut self, other: Lookup) {
        assert_eq!(self.feature, other.feature, "incompatible features");
        assert_eq!(self.language, other.language, "incompatible languages");
        assert_eq!(self.required, other.required, "incompatible required values");
        assert_eq!(self.reverse, other.reverse, "incompatible reverse values");
        self.rules.extend(other.rules.iter().cloned());
    }
}

/// FEA-style AST nodes, mirroring the statements the layout compiler
/// consumes.
pub mod ast {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    pub enum GlyphRef {
        Glyph(String),
        Class(String),
    }

    impl GlyphRef {
        pub fn as_fea(&self) -> String {
            match self {
                GlyphRef::Glyph(name) => name.clone(),
                GlyphRef::Class(name) => format!("@{name}"),
            }
        }
    }

    fn seq_fea(seq: &[GlyphRef]) -> String {
        seq.iter().map(GlyphRef::as_fea).collect::<Vec<_>>().join(" ")
    }

    fn marked_seq_fea(seq: &[GlyphRef]) -> String {
        seq.iter()
            .map(|g| format!("{}'", g.as_fea()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct ValueRecord {
        pub x_placement: Option<f64>,
        pub x_advance: Option<f64>,
    }

    impl ValueRecord {
        pub fn as_fea(&self) -> String {
            format!(
                "<{} 0 {} 0>",
                self.x_placement.unwrap_or(0.0) as i64,
                self.x_advance.unwrap_or(0.0) as i64,
            )
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum Statement {
        GlyphClassDefinition {
            name: String,
            glyphs: Vec<String>,
        },
        LookupFlag {
            flags: u16,
            mark_filtering_set: Option<String>,
        },
        Script(Tag),
        Language(Tag),
        LookupReference(String),
        SingleSubst {
            contexts_in: Vec<GlyphRef>,
            input: GlyphRef,
            contexts_out: Vec<GlyphRef>,
            output: GlyphRef,
            contextual: bool,
        },
        MultipleSubst {
            contexts_in: Vec<GlyphRef>,
            input: GlyphRef,
            contexts_out: Vec<GlyphRef>,
            outputs: Vec<GlyphRef>,
            contextual: bool,
        },
        LigatureSubst {
            contexts_in: Vec<GlyphRef>,
            inputs: Vec<GlyphRef>,
            contexts_out: Vec<GlyphRef>,
            output: String,
            contextual: bool,
        },
        ChainContextSubst {
            contexts_in: Vec<GlyphRef>,
            inputs: Vec<GlyphRef>,
            contexts_out: Vec<GlyphRef>,
            lookups: Vec<Option<String>>,
        },
        ReverseChainSingleSubst {
            contexts_in: Vec<GlyphRef>,
            contexts_out: Vec<GlyphRef>,
            input: GlyphRef,
            output: GlyphRef,
        },
        SinglePos {
            contexts_in: Vec<GlyphRef>,
            input: GlyphRef,
            contexts_out: Vec<GlyphRef>,
            value: ValueRecord,
            contextual: bool,
        },
        /// Cursive attachment for one glyph.
        CursivePos {
            glyph: String,
            anchor: String,
            entry: Option<(f64, f64)>,
            exit: Option<(f64, f64)>,
        },
        MarkClass {
            glyph: String,
            class: String,
            anchor: (f64, f64),
        },
        MarkBasePos {
            base: String,
            anchor_class: String,
            anchor: (f64, f64),
            kind: MarkAttachmentKind,
        },
        GdefGlyphClasses {
            bases: Vec<String>,
            ligatures: Vec<String>,
            marks: Vec<String>,
        },
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum MarkAttachmentKind {
        Base,
        Ligature,
        Mark,
    }

    impl Statement {
        pub fn as_fea(&self) -> String {
            match self {
                Statement::GlyphClassDefinition { name, glyphs } => {
                    format!("@{name} = [{}];", glyphs.join(" "))
                }
                Statement::LookupFlag {
                    flags,
                    mark_filtering_set,
                } => match mark_filtering_set {
                    Some(set) => format!("lookupflag {flags} UseMarkFilteringSet @{set};"),
                    None => format!("lookupflag {flags};"),
                },
                Statement::Script(tag) => format!("script {tag};"),
                Statement::Language(tag) => format!("language {tag};"),
                Statement::LookupReference(name) => format!("lookup {name};"),
                Statement::SingleSubst {
                    contexts_in,
                    input,
                    contexts_out,
                    output,
                    contextual,
                } => {
                    if *contextual {
                        format!(
                            "sub {} {}' {} by {};",
                            seq_fea(contexts_in),
                            input.as_fea(),
                            seq_fea(contexts_out),
                            output.as_fea(),
                        )
                    } else {
                        format!("sub {} by {};", input.as_fea(), output.as_fea())
                    }
                }
                Statement::MultipleSubst {
                    contexts_in,
                    input,
                    contexts_out,
                    outputs,
                    contextual,
                } => {
                    if *contextual {
                        format!(
                            "sub {} {}' {} by {};",
                            seq_fea(contexts_in),
                            input.as_fea(),
                            seq_fea(contexts_out),
                            seq_fea(outputs),
                        )
                    } else {
                        format!("sub {} by {};", input.as_fea(), seq_fea(outputs))
                    }
                }
                Statement::LigatureSubst {
                    contexts_in,
                    inputs,
                    contexts_out,
                    output,
                    contextual,
                } => {
                    if *contextual {
                        format!(
                            "sub {} {} {} by {output};",
                            seq_fea(contexts_in),
                            marked_seq_fea(inputs),
                            seq_fea(contexts_out),
                        )
                    } else {
                        format!("sub {} by {output};", seq_fea(inputs))
                    }
                }
                Statement::ChainContextSubst {
                    contexts_in,
                    inputs,
                    contexts_out,
                    lookups,
                } => {
                    let mut out = String::from("sub ");
                    if !contexts_in.is_empty() {
                        let _ = write!(out, "{} ", seq_fea(contexts_in));
                    }
                    for (input, lookup) in inputs.iter().zip(lookups) {
                        match lookup {
                            Some(lookup) => {
                                let _ = write!(out, "{}' lookup {lookup} ", input.as_fea());
                            }
                            None => {
                                let _ = write!(out, "{}' ", input.as_fea());
                            }
                        }
                    }
                    if !contexts_out.is_empty() {
                        let _ = write!(out, "{} ", seq_fea(contexts_out));
                    }
                    out.pop();
                    out.push(';');
                    out
                }
                Statement::ReverseChainSingleSubst {
                    contexts_in,
                    contexts_out,
                    input,
                    output,
                } => format!(
                    "rsub {} {}' {} by {};",
                    seq_fea(contexts_in),
                    input.as_fea(),
                    seq_fea(contexts_out),
                    output.as_fea(),
                ),
                Statement::SinglePos {
                    contexts_in,
                    input,
                    contexts_out,
                    value,
                    contextual,
                } => {
                    if *contextual {
                        format!(
                            "pos {} {}' {} {};",
                            seq_fea(contexts_in),
                            input.as_fea(),
                            seq_fea(contexts_out),
                            value.as_fea(),
                        )
                    } else {
                        format!("pos {} {};", input.as_fea(), value.as_fea())
                    }
                }
                Statement::CursivePos {
                    glyph,
                    anchor,
                    entry,
                    exit,
                } => {
                    let fmt_anchor = |p: &Option<(f64, f64)>| match p {
                        Some((x, y)) => format!("<anchor {} {}>", *x as i64, *y as i64),
                        None => "<anchor NULL>".to_string(),
                    };
                    format!(
                        "pos cursive {glyph} {} {}; # {anchor}",
                        fmt_anchor(entry),
                        fmt_anchor(exit),
                    )
                }
                Statement::MarkClass {
                    glyph,
                    class,
                    anchor,
                } => format!(
                    "markClass {glyph} <anchor {} {}> @{class};",
                    anchor.0 as i64, anchor.1 as i64,
                ),
                Statement::MarkBasePos {
                    base,
                    anchor_class,
                    anchor,
                    kind,
                } => format!(
                    "pos {} {base} <anchor {} {}> mark @{anchor_class};",
                    match kind {
                        MarkAttachmentKind::Base => "base",
                        MarkAttachmentKind::Ligature => "ligature",
                        MarkAttachmentKind::Mark => "mark",
                    },
                    anchor.0 as i64,
                    anchor.1 as i64,
                ),
                Statement::GdefGlyphClasses {
                    bases,
                    ligatures,
                    marks,
                } => format!(
                    "table GDEF {{ GlyphClassDef [{}], [{}], [{}], ; }} GDEF;",
                    bases.join(" "),
                    ligatures.join(" "),
                    marks.join(" "),
                ),
            }
        }
    }

    #[derive(Clone, Debug, Default)]
    pub struct LookupBlock {
        pub name: String,
        pub statements: Vec<Statement>,
    }

    #[derive(Clone, Debug)]
    pub struct FeatureBlock {
        pub tag: Tag,
        pub statements: Vec<Statement>,
    }

    /// The whole layout output: classes, lookup blocks, feature
    /// blocks, attachment statements, and GDEF classes.
    #[derive(Clone, Debug, Default)]
    pub struct FeatureFile {
        pub class_definitions: Vec<Statement>,
        pub lookups: Vec<LookupBlock>,
        pub features: Vec<FeatureBlock>,
        pub attachments: Vec<Statement>,
        pub gdef: Vec<Statement>,
    }
}

/// Resolves the short class and lookup names a phase used into the
/// globally unique names of the final feature file.
pub struct NameResolver<'a> {
    pub prefix: &'a str,
}

impl NameResolver<'_> {
    pub fn resolve(&self, name: &str) -> String {
        crate::phases::qualify(self.prefix, name)
    }
}

impl Rule {
    fn glyph_to_ast(target: &Target, resolver: &NameResolver) -> ast::GlyphRef {
        match target {
            Target::Schema(schema) => ast::GlyphRef::Glyph(
                schema
                    .glyph_name()
                    .expect("schemas in emitted rules must have names"),
            ),
            Target::Class(name) => ast::GlyphRef::Class(resolver.resolve(name)),
        }
    }

    fn glyphs_to_ast(targets: &[Target], resolver: &NameResolver) -> Vec<ast::GlyphRef> {
        targets.iter().map(|t| Self::glyph_to_ast(t, resolver)).collect()
    }

    /// Converts this rule to AST statements.
    ///
    /// One rule usually becomes one statement, but a ligature
    /// substitution whose output is a class desugars by unrolling the
    /// parallel input class, which FEA cannot express directly.
    pub fn to_asts(
        &self,
        resolver: &NameResolver,
        class_contents: &IndexMap<String, Vec<String>>,
        in_contextual_lookup: bool,
        in_multiple_lookup: bool,
        in_reverse_lookup: bool,
    ) -> Vec<ast::Statement> {
        let contexts_in = Self::glyphs_to_ast(&self.contexts_in, resolver);
        let contexts_out = Self::glyphs_to_ast(&self.contexts_out, resolver);
        let inputs = Self::glyphs_to_ast(&self.inputs, resolver);
        if let Some(lookups) = &self.lookups {
            assert!(
                !in_reverse_lookup,
                "reverse chaining contextual substitutions do not support lookup references",
            );
            return vec![ast::Statement::ChainContextSubst {
                contexts_in,
                inputs,
                contexts_out,
                lookups: lookups
                    .iter()
                    .map(|l| l.as_ref().map(|l| resolver.resolve(l)))
                    .collect(),
            }];
        }
        if self.x_placements.is_some() || self.x_advances.is_some() {
            assert!(!in_reverse_lookup, "there is no reverse positioning lookup type");
            assert_eq!(self.inputs.len(), 1, "only single adjustment positioning is supported");
            return vec![ast::Statement::SinglePos {
                contexts_in,
                input: inputs.into_iter().next().unwrap(),
                contexts_out,
                value: ast::ValueRecord {
                    x_placement: self.x_placements.as_ref().and_then(|x| x[0]),
                    x_advance: self.x_advances.as_ref().and_then(|x| x[0]),
                },
                contextual: in_contextual_lookup,
            }];
        }
        let outputs = self.outputs.as_ref().expect("a substitution rule must have outputs");
        if self.inputs.len() == 1 {
            let output_refs = Self::glyphs_to_ast(outputs, resolver);
            if outputs.len() == 1 && !in_multiple_lookup {
                let output = output_refs.into_iter().next().unwrap();
                let input = inputs.into_iter().next().unwrap();
                if in_reverse_lookup {
                    return vec![ast::Statement::ReverseChainSingleSubst {
                        contexts_in,
                        contexts_out,
                        input,
                        output,
                    }];
                }
                return vec![ast::Statement::SingleSubst {
                    contexts_in,
                    input,
                    contexts_out,
                    output,
                    contextual: in_contextual_lookup,
                }];
            }
            assert!(
                !in_reverse_lookup,
                "reverse chaining contextual substitutions only support single substitutions",
            );
            return vec![ast::Statement::MultipleSubst {
                contexts_in,
                input: inputs.into_iter().next().unwrap(),
                contexts_out,
                outputs: output_refs,
                contextual: in_contextual_lookup,
            }];
        }
        assert!(
            !in_reverse_lookup,
            "reverse chaining contextual substitutions only support single substitutions",
        );
        match &outputs[0] {
            Target::Class(output_class) => {
                // FEA has no ligature substitution with a class output;
                // unroll the parallel input class.
                let mut input_class = None;
                let mut input_class_index = 0;
                for (i, input) in self.inputs.iter().enumerate() {
                    if let Target::Class(name) = input {
                        assert!(
                            input_class.is_none(),
                            "a ligature substitution with a class output may only have one class input",
                        );
                        input_class = Some(name.clone());
                        input_class_index = i;
                    }
                }
                let input_class = input_class
                    .expect("a ligature substitution with a class output must have a class input");
                let input_glyphs = &class_contents[&resolver.resolve(&input_class)];
                let output_glyphs = &class_contents[&resolver.resolve(output_class)];
                assert_eq!(
                    input_glyphs.len(),
                    output_glyphs.len(),
                    "parallel glyph classes must have the same length",
                );
                input_glyphs
                    .iter()
                    .zip(output_glyphs)
                    .map(|(input_glyph, output_glyph)| ast::Statement::LigatureSubst {
                        contexts_in: contexts_in.clone(),
                        inputs: inputs
                            .iter()
                            .enumerate()
                            .map(|(i, g)| {
                                if i == input_class_index {
                                    ast::GlyphRef::Glyph(input_glyph.clone())
                                } else {
                                    g.clone()
                                }
                            })
                            .collect(),
                        contexts_out: contexts_out.clone(),
                        output: output_glyph.clone(),
                        contextual: in_contextual_lookup,
                    })
                    .collect()
            }
            Target::Schema(output) => {
                assert_eq!(outputs.len(), 1, "a ligature substitution has one output");
                vec![ast::Statement::LigatureSubst {
                    contexts_in,
                    inputs,
                    contexts_out,
                    output: output.glyph_name().expect("output schema must have a name"),
                    contextual: in_contextual_lookup,
                }]
            }
        }
    }
}

impl Lookup {
    /// Converts this lookup to a lookup block, plus a feature block if
    /// it is anonymous.
    pub fn to_asts(
        &self,
        resolver: &NameResolver,
        class_contents: &IndexMap<String, Vec<String>>,
        name: &str,
    ) -> (ast::LookupBlock, Option<ast::FeatureBlock>) {
        let contextual = self.rules.iter().any(Rule::is_contextual);
        let multiple = self.rules.iter().any(Rule::is_multiple);
        let mut lookup_block = ast::LookupBlock {
            name: name.to_string(),
            statements: vec![ast::Statement::LookupFlag {
                flags: self.flags,
                mark_filtering_set: self
                    .mark_filtering_set
                    .as_ref()
                    .map(|set| resolver.resolve(set)),
            }],
        };
        let mut seen = IndexSet::new();
        for rule in &self.rules {
            for statement in rule.to_asts(resolver, class_contents, contextual, multiple, self.reverse)
            {
                if seen.insert(statement.as_fea()) {
                    lookup_block.statements.push(statement);
                }
            }
        }
        let feature_block = self.feature.map(|feature| {
            let mut statements = Vec::new();
            for script in KNOWN_SCRIPTS {
                statements.push(ast::Statement::Script(script));
                statements.push(ast::Statement::Language(self.language.unwrap()));
                statements.push(ast::Statement::LookupReference(name.to_string()));
            }
            ast::FeatureBlock {
                tag: feature,
                statements,
            }
        });
        (lookup_block, feature_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDef;
    use crate::shapes::{Line, Shape};

    fn schema(cp: u32) -> SchemaRef {
        let s = SchemaDef::new(Some(cp), Shape::Line(Line::stretchy(270.0)), 1.0).build(0);
        let mut registry = crate::schema::NameRegistry::new();
        s.assign_name(&mut registry);
        s
    }

    #[test]
    fn rule_arity_is_exclusive() {
        let a = schema(0x1BC02);
        let rule = Rule::sub(vec![s(&a)], vec![s(&a)]);
        assert!(rule.outputs.is_some());
        assert!(rule.lookups.is_none());
        assert!(rule.x_advances.is_none());
        let rule = Rule::chain(vec![], vec![s(&a)], vec![], vec![None]);
        assert!(rule.outputs.is_none());
        assert!(rule.lookups.is_some());
    }

    #[test]
    fn mark_filtering_set_adds_flag() {
        let lookup = Lookup::new(b"rclt", b"dflt").with_mark_filtering_set("overlap");
        assert_ne!(lookup.flags & flags::USE_MARK_FILTERING_SET, 0);
    }

    #[test]
    #[should_panic(expected = "IgnoreMarks")]
    fn mark_filtering_set_conflicts_with_ignore_marks() {
        let _ = Lookup::new(b"rclt", b"dflt")
            .with_flags(flags::IGNORE_MARKS)
            .with_mark_filtering_set("overlap");
    }

    #[test]
    #[should_panic(expected = "unknown feature")]
    fn unknown_features_are_rejected() {
        let _ = Lookup::new(b"zzzz", b"dflt");
    }

    #[test]
    fn required_features() {
        assert!(Lookup::new(b"rclt", b"dflt").required);
        assert!(!Lookup::new(b"sups", b"dflt").required);
    }

    #[test]
    fn single_substitution_ast() {
        let a = schema(0x1BC02);
        let b = schema(0x1BC03);
        let rule = Rule::sub(vec![s(&a)], vec![s(&b)]);
        let resolver = NameResolver { prefix: "t" };
        let asts = rule.to_asts(&resolver, &IndexMap::new(), false, false, false);
        assert_eq!(asts.len(), 1);
        assert_eq!(asts[0].as_fea(), "sub uni1BC02 by uni1BC03;");
    }

    #[test]
    fn duplicate_statements_collapse() {
        let a = schema(0x1BC02);
        let b = schema(0x1BC03);
        let mut lookup = Lookup::new(b"rclt", b"dflt");
        lookup.append(Rule::sub(vec![s(&a)], vec![s(&b)]));
        lookup.append(Rule::sub(vec![s(&a)], vec![s(&b)]));
        let resolver = NameResolver { prefix: "t" };
        let (block, feature) = lookup.to_asts(&resolver, &IndexMap::new(), "lookup_0");
        // One lookupflag statement plus one deduplicated substitution.
        assert_eq!(block.statements.len(), 2);
        assert!(feature.is_some());
    }
}
