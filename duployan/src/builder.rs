//! The build entry point.
//!
//! `Builder` owns the whole compilation: it seeds the schema table,
//! runs the main, middle, and marker phase lists to their fixed
//! points, sifts lookalikes, draws the canonical glyphs, and assembles
//! the layout output.

use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use kurbo::Affine;
use log::{debug, info};

use crate::anchors;
use crate::error::Error;
use crate::fea::{ast, Lookup, NameResolver, Target};
use crate::glyphs::{AnchorKind, Glyph, GlyphBuilder};
use crate::phases::{self, run_phases, ClassMap, StrokeStyle};
use crate::schema::{NameRegistry, SchemaDef, SchemaRef};
use crate::shapes::{
    Circle, Complex, ContextFn, Curve, Dot, DrawArgs, Instruction, Line, Ou, SeparateAffix, Shape,
    Space, TangentHook, Wa, Wi,
};
use crate::sifting;
use crate::util::{
    GlyphClass, Ignorability, JoiningType, CAP_HEIGHT, EPSILON, SHADING_FACTOR,
};

/// A drawn glyph paired with the schema it came from.
#[derive(Clone, Debug)]
pub struct GlyphEntry {
    pub schema: SchemaRef,
    pub glyph: Rc<Glyph>,
}

/// The output of a build: the glyph inventory plus the layout rule
/// tree, ready for downstream serialization.
#[derive(Debug, Default)]
pub struct Compilation {
    pub glyphs: Vec<GlyphEntry>,
    pub feature_file: ast::FeatureFile,
}

/// Compiles the built-in schema table into glyphs and layout rules.
pub struct Builder {
    stroke: StrokeStyle,
    unjoined: bool,
    schemas: Vec<SchemaRef>,
}

impl Builder {
    pub fn new(bold: bool, unjoined: bool) -> Builder {
        Builder {
            stroke: if bold {
                StrokeStyle::bold()
            } else {
                StrokeStyle::regular()
            },
            unjoined,
            schemas: seed_schemas(),
        }
    }

    /// Runs the whole pipeline.
    pub fn build(self) -> Result<Compilation, Error> {
        self.check_duplicate_code_points()?;
        let mut registry = NameRegistry::new();
        let mut all_classes = ClassMap::new();
        let main_phases = phases::main::phase_list();
        let middle_phases = phases::middle::phase_list();
        let marker_phases = phases::marker::phase_list();
        let pipeline_indices: IndexMap<&'static str, usize> = main_phases
            .iter()
            .chain(&middle_phases)
            .chain(&marker_phases)
            .enumerate()
            .map(|(i, phase)| (phase.name, i + 1))
            .collect();
        let seed: IndexSet<SchemaRef> = self.schemas.iter().cloned().collect();
        info!("running {} main phases", main_phases.len());
        let main_output = run_phases(
            self.stroke,
            self.unjoined,
            seed,
            &main_phases,
            1,
            &mut all_classes,
            &pipeline_indices,
        );
        info!("running the middle phase");
        let middle_output = run_phases(
            self.stroke,
            self.unjoined,
            main_output.output_schemas.clone(),
            &middle_phases,
            1 + main_phases.len(),
            &mut all_classes,
            &pipeline_indices,
        );
        // Sifting: within each group the canonical schema survives and
        // gets the drawn glyph; the others alias it.
        let mut grouper = sifting::group_schemas(middle_output.output_schemas.iter());
        sifting::sift(&mut grouper);
        for schema in &middle_output.output_schemas {
            let canonical = schema.canonical().unwrap_or_else(|| schema.clone());
            if canonical.glyph().is_none() {
                let glyph = self.draw_schema(&canonical, &mut registry);
                canonical.set_glyph(glyph);
            }
            if schema.canonical().is_some() {
                // An alias renders identically to its canonical schema
                // but still needs its own glyph so rules can match it.
                let glyph = canonical.glyph().unwrap();
                let mut alias_glyph = (*glyph).clone();
                alias_glyph.name = schema.assign_name(&mut registry);
                schema.set_glyph(Rc::new(alias_glyph));
            }
        }
        info!("running {} marker phases", marker_phases.len());
        let marker_output = run_phases(
            self.stroke,
            self.unjoined,
            middle_output.output_schemas.clone(),
            &marker_phases,
            1 + main_phases.len() + middle_phases.len(),
            &mut all_classes,
            &pipeline_indices,
        );
        let lookups_with_phases: Vec<(Lookup, &'static str)> = main_output
            .lookups_with_phases
            .into_iter()
            .chain(middle_output.lookups_with_phases)
            .chain(marker_output.lookups_with_phases)
            .collect();
        let named_lookups_with_phases: IndexMap<String, (Lookup, &'static str)> = main_output
            .named_lookups_with_phases
            .into_iter()
            .chain(middle_output.named_lookups_with_phases)
            .chain(marker_output.named_lookups_with_phases)
            .collect();
        // Everything a rule or class can reference needs a glyph and a
        // name, including the invisible markers the marker phases
        // introduced.
        let mut inventory = IndexSet::new();
        inventory.insert(
            SchemaDef::new(None, Shape::Notdef, 1.0)
                .joining_type(JoiningType::NonJoining)
                .build(0),
        );
        inventory.extend(self.schemas.iter().cloned());
        for (lookup, _) in &lookups_with_phases {
            collect_rule_schemas(lookup, &mut inventory);
        }
        for (lookup, _) in named_lookups_with_phases.values() {
            collect_rule_schemas(lookup, &mut inventory);
        }
        for class in all_classes.values() {
            inventory.extend(class.iter().cloned());
        }
        inventory.extend(marker_output.output_schemas.iter().cloned());
        for schema in &inventory {
            if schema.glyph().is_none() {
                let glyph = self.draw_schema(schema, &mut registry);
                schema.set_glyph(glyph);
            } else if schema.glyph_name().is_none() {
                schema.assign_name(&mut registry);
            }
        }
        debug!("inventory has {} glyphs", inventory.len());
        let feature_file = complete_layout(
            &all_classes,
            &lookups_with_phases,
            &named_lookups_with_phases,
            &inventory,
        );
        let glyphs = inventory
            .into_iter()
            .map(|schema| GlyphEntry {
                glyph: schema.glyph().unwrap(),
                schema,
            })
            .collect();
        Ok(Compilation {
            glyphs,
            feature_file,
        })
    }

    fn check_duplicate_code_points(&self) -> Result<(), Error> {
        let mut seen = IndexSet::new();
        let mut duplicates = Vec::new();
        for schema in &self.schemas {
            if let Some(cmap) = schema.cmap {
                if !seen.insert(cmap) {
                    duplicates.push(cmap);
                }
            }
        }
        if duplicates.is_empty() {
            Ok(())
        } else {
            Err(Error::DuplicateCodePoints(duplicates))
        }
    }

    /// Draws one schema per the glyph emitter contract: contours and
    /// anchors from the shape, the cursive entry (or left sidebearing
    /// origin) at x = 0, the visible glyph on the baseline unless the
    /// shape fixes its own y, and the right side bearing from the
    /// schema.
    fn draw_schema(&self, schema: &SchemaRef, registry: &mut NameRegistry) -> Rc<Glyph> {
        let name = schema.assign_name(registry);
        let mut builder = GlyphBuilder::new();
        let shaded = schema.cps.last() == Some(&0x1BC9D) && schema.cps.len() > 1;
        let stroke_width = if shaded {
            SHADING_FACTOR * self.stroke.light_line
        } else {
            self.stroke.light_line
        };
        let is_circle = matches!(schema.shape, Shape::Circle(_));
        let effective_bounding_box = schema.shape.draw(
            &mut builder,
            &DrawArgs {
                stroke_width,
                light_line: self.stroke.light_line,
                stroke_gap: self.stroke.stroke_gap,
                size: schema.size,
                anchor: schema.anchor,
                joining_type: schema.joining_type,
                initial_circle_diphthong: is_circle && schema.diphthong_1 && !schema.diphthong_2,
                final_circle_diphthong: is_circle && schema.diphthong_2 && !schema.diphthong_1,
                diphthong_1: schema.diphthong_1,
                diphthong_2: schema.diphthong_2,
            },
        );
        let entry = builder.anchor(anchors::CURSIVE, AnchorKind::Entry);
        let exit = builder.anchor(anchors::CURSIVE, AnchorKind::Exit);
        let bbox = builder.bounding_box();
        // Horizontal normalization.
        let x_origin = match (schema.glyph_class, entry) {
            (GlyphClass::Joiner, Some(entry)) => entry.x,
            _ => bbox.map_or(0.0, |b| b.min_x()) - schema.side_bearing,
        };
        if x_origin != 0.0 {
            builder.transform(Affine::translate((-x_origin, 0.0)));
        }
        // Vertical normalization.
        if !schema.shape.fixed_y() && schema.glyph_class != GlyphClass::Mark {
            if let (Some(y_min), Some(y_max), Some(bbox)) = (schema.y_min, schema.y_max, bbox) {
                if bbox.height() > EPSILON {
                    let scale = (y_max - y_min) / bbox.height();
                    if (scale - 1.0).abs() > EPSILON {
                        builder.transform(Affine::scale(scale));
                    }
                    let new_bbox = builder.bounding_box().unwrap();
                    builder.transform(Affine::translate((0.0, y_min - new_bbox.min_y())));
                }
            } else if let (Some(entry), Some(exit)) = (entry, exit) {
                let dy = -entry.y.min(exit.y).min(0.0);
                if dy != 0.0 {
                    builder.transform(Affine::translate((0.0, dy)));
                }
            } else if let (Some(y_min), Some(bbox)) = (schema.y_min, bbox) {
                let dy = y_min - bbox.min_y();
                if dy != 0.0 {
                    builder.transform(Affine::translate((0.0, dy)));
                }
            }
        }
        let mut glyph = Glyph::new(name, builder, effective_bounding_box);
        glyph.advance = if schema.glyph_class == GlyphClass::Mark {
            0.0
        } else {
            let right = glyph.bbox().max_x().max(
                glyph
                    .anchor(anchors::CURSIVE, AnchorKind::Exit)
                    .map_or(0.0, |p| p.x),
            );
            right + schema.side_bearing
        };
        Rc::new(glyph)
    }
}

fn collect_targets(targets: &[Target], inventory: &mut IndexSet<SchemaRef>) {
    for target in targets {
        if let Target::Schema(schema) = target {
            inventory.insert(schema.clone());
        }
    }
}

fn collect_rule_schemas(lookup: &Lookup, inventory: &mut IndexSet<SchemaRef>) {
    for rule in &lookup.rules {
        collect_targets(&rule.contexts_in, inventory);
        collect_targets(&rule.inputs, inventory);
        collect_targets(&rule.contexts_out, inventory);
        if let Some(outputs) = &rule.outputs {
            collect_targets(outputs, inventory);
        }
    }
}

/// Assembles the feature-file AST: class definitions, lookup and
/// feature blocks, attachment statements, and GDEF classes.
fn complete_layout(
    all_classes: &ClassMap,
    lookups_with_phases: &[(Lookup, &'static str)],
    named_lookups_with_phases: &IndexMap<String, (Lookup, &'static str)>,
    inventory: &IndexSet<SchemaRef>,
) -> ast::FeatureFile {
    let mut feature_file = ast::FeatureFile::default();
    let mut class_contents: IndexMap<String, Vec<String>> = IndexMap::new();
    for (name, class) in all_classes {
        let glyphs: Vec<String> = class
            .iter()
            .filter_map(|schema| schema.glyph_name())
            .collect();
        class_contents.insert(name.clone(), glyphs.clone());
        feature_file
            .class_definitions
            .push(ast::Statement::GlyphClassDefinition {
                name: name.clone(),
                glyphs,
            });
    }
    for (name, (lookup, phase)) in named_lookups_with_phases {
        let resolver = NameResolver { prefix: phase };
        let (block, feature) = lookup.to_asts(&resolver, &class_contents, name);
        assert!(feature.is_none(), "named lookups have no feature block");
        feature_file.lookups.push(block);
    }
    for (i, (lookup, phase)) in lookups_with_phases.iter().enumerate() {
        let resolver = NameResolver { prefix: phase };
        let (block, feature) = lookup.to_asts(&resolver, &class_contents, &format!("lookup_{i}"));
        feature_file.lookups.push(block);
        feature_file
            .features
            .push(feature.expect("anonymous lookups have feature blocks"));
    }
    let mut bases = Vec::new();
    let mut ligatures = Vec::new();
    let mut marks = Vec::new();
    for schema in inventory {
        let Some(glyph) = schema.glyph() else {
            continue;
        };
        match schema.glyph_class {
            GlyphClass::Blocker => bases.push(glyph.name.clone()),
            GlyphClass::Joiner => ligatures.push(glyph.name.clone()),
            GlyphClass::Mark => marks.push(glyph.name.clone()),
        }
        let mut cursive_anchors: IndexMap<String, (Option<(f64, f64)>, Option<(f64, f64)>)> =
            IndexMap::new();
        for anchor in &glyph.anchor_points {
            match anchor.kind {
                AnchorKind::Entry => {
                    cursive_anchors.entry(anchor.name.clone()).or_default().0 =
                        Some((anchor.x, anchor.y));
                }
                AnchorKind::Exit => {
                    cursive_anchors.entry(anchor.name.clone()).or_default().1 =
                        Some((anchor.x, anchor.y));
                }
                AnchorKind::Mark => feature_file.attachments.push(ast::Statement::MarkClass {
                    glyph: glyph.name.clone(),
                    class: anchor.name.clone(),
                    anchor: (anchor.x, anchor.y),
                }),
                AnchorKind::Base => feature_file.attachments.push(ast::Statement::MarkBasePos {
                    base: glyph.name.clone(),
                    anchor_class: anchor.name.clone(),
                    anchor: (anchor.x, anchor.y),
                    kind: ast::MarkAttachmentKind::Base,
                }),
                AnchorKind::Basemark => {
                    feature_file.attachments.push(ast::Statement::MarkBasePos {
                        base: glyph.name.clone(),
                        anchor_class: anchor.name.clone(),
                        anchor: (anchor.x, anchor.y),
                        kind: ast::MarkAttachmentKind::Mark,
                    })
                }
                AnchorKind::Ligature => {
                    feature_file.attachments.push(ast::Statement::MarkBasePos {
                        base: glyph.name.clone(),
                        anchor_class: anchor.name.clone(),
                        anchor: (anchor.x, anchor.y),
                        kind: ast::MarkAttachmentKind::Ligature,
                    })
                }
            }
        }
        for (anchor, (entry, exit)) in cursive_anchors {
            feature_file.attachments.push(ast::Statement::CursivePos {
                glyph: glyph.name.clone(),
                anchor,
                entry,
                exit,
            });
        }
    }
    feature_file.gdef.push(ast::Statement::GdefGlyphClasses {
        bases,
        ligatures,
        marks,
    });
    feature_file
}

fn schema(cmap: u32, shape: Shape, size: f64) -> SchemaDef {
    SchemaDef::new(Some(cmap), shape, size)
}

fn curve(angle_in: f64, angle_out: f64, clockwise: bool) -> Curve {
    Curve::new(angle_in, angle_out, clockwise)
}

fn orienting_curve(angle_in: f64, angle_out: f64, clockwise: bool) -> Curve {
    Curve {
        may_reposition_cursive_endpoints: true,
        ..Curve::new(angle_in, angle_out, clockwise)
    }
}

fn secant(angle: f64) -> Line {
    Line {
        angle,
        secant: Some(0.5),
        ..Line::default()
    }
}

fn digit_arc(digit: u32) -> Shape {
    // Stylized digits: arcs of distinct sweeps, enough to give every
    // digit its own group and plausible metrics.
    let sweep = 150.0 + 20.0 * digit as f64;
    Shape::Curve(curve(90.0, crate::geometry::normalize(90.0 + sweep), false))
}

/// The built-in schema table.
fn seed_schemas() -> Vec<SchemaRef> {
    let mut schemas: Vec<SchemaDef> = Vec::new();
    // Format controls and common characters.
    schemas.push(
        schema(0x0020, Shape::Space(Space::new(0.0)), 260.0)
            .joining_type(JoiningType::NonJoining)
            .side_bearing(0.0),
    );
    schemas.push(
        schema(0x034F, Shape::Space(Space::new(0.0)), 0.0)
            .joining_type(JoiningType::NonJoining)
            .side_bearing(0.0)
            .ignorability(Ignorability::DefaultYes),
    );
    schemas.push(
        schema(0x200C, Shape::Space(Space::with_margins(0.0)), 0.0)
            .joining_type(JoiningType::NonJoining)
            .side_bearing(0.0)
            .ignorability(Ignorability::DefaultYes),
    );
    for digit in 0..10 {
        schemas.push(
            schema(0x30 + digit, digit_arc(digit), 2.5)
                .joining_type(JoiningType::NonJoining)
                .y_min(Some(0.0))
                .y_max(Some(CAP_HEIGHT)),
        );
    }
    schemas.push(
        schema(
            0x003D,
            Shape::EqualsSign(Complex::new(vec![
                Instruction::component(1.0, Shape::Line(Line::new(0.0))),
                Instruction::component(250.0, Shape::Space(Space::new(120.0))),
                Instruction::component(1.0, Shape::Line(Line::new(0.0))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Joining)
        .shading_allowed(false),
    );
    schemas.push(
        schema(0x2044, Shape::Line(Line::new(60.0)), 1.5)
            .joining_type(JoiningType::NonJoining)
            .y_min(Some(0.0))
            .y_max(Some(CAP_HEIGHT)),
    );
    schemas.push(
        schema(0x25CC, Shape::Circle(Circle::new(0.0, 0.0, false)), 2.0)
            .joining_type(JoiningType::NonJoining),
    );
    schemas.push(
        schema(0x20DD, Shape::Circle(Circle::new(0.0, 0.0, false)), 2.0)
            .anchor(Some(anchors::MIDDLE)),
    );
    schemas.push(
        schema(0x2E3C, Shape::Dot(Dot::new()), 1.0)
            .joining_type(JoiningType::NonJoining)
            .encirclable(true),
    );
    // Letters: dots and lines.
    schemas.push(schema(0x1BC00, Shape::Dot(Dot::new()), 1.0));
    schemas.push(
        schema(
            0x1BC01,
            Shape::XShape(Complex::new(vec![
                Instruction::component(0.6, Shape::Curve(curve(130.0, 30.0, true))),
                Instruction::component(0.6, Shape::Curve(curve(50.0, 150.0, false))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Joining),
    );
    let line_letters: [(u32, f64, f64); 10] = [
        (0x1BC02, 270.0, 1.0), // P
        (0x1BC03, 0.0, 1.0),   // T
        (0x1BC04, 315.0, 1.0), // F
        (0x1BC05, 225.0, 1.0), // K
        (0x1BC06, 45.0, 1.0),  // L
        (0x1BC07, 270.0, 2.0), // B
        (0x1BC08, 0.0, 2.0),   // D
        (0x1BC09, 315.0, 2.0), // V
        (0x1BC0A, 225.0, 2.0), // G
        (0x1BC0B, 45.0, 2.0),  // R
    ];
    for (cp, angle, size) in line_letters {
        schemas.push(schema(cp, Shape::Line(Line::stretchy(angle)), size));
    }
    schemas.push(schema(0x1BC18, Shape::Line(Line::stretchy(30.0)), 2.0)); // RH
    // Letters: the deep consonant curves.
    schemas.push(schema(0x1BC19, Shape::Curve(curve(180.0, 0.0, true)), 6.0)); // M
    schemas.push(schema(0x1BC1A, Shape::Curve(curve(0.0, 180.0, false)), 6.0)); // N
    schemas.push(schema(0x1BC1B, Shape::Curve(curve(90.0, 270.0, true)), 6.0)); // J
    schemas.push(schema(0x1BC1C, Shape::Curve(curve(270.0, 90.0, false)), 6.0)); // S
    // Letters: orienting vowels.
    schemas.push(
        schema(0x1BC41, Shape::Circle(Circle::new(0.0, 0.0, false)), 2.0)
            .joining_type(JoiningType::Orienting)
            .encirclable(true),
    );
    schemas.push(
        schema(0x1BC42, Shape::Circle(Circle::reversed_circle(0.0, 0.0, true)), 2.0)
            .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(0x1BC44, Shape::Circle(Circle::new(0.0, 0.0, false)), 3.0)
            .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(0x1BC46, Shape::Curve(orienting_curve(0.0, 180.0, true)), 1.0)
            .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(0x1BC47, Shape::Curve(orienting_curve(0.0, 180.0, false)), 1.0)
            .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(
            0x1BC48,
            Shape::Curve(Curve {
                hook: true,
                ..orienting_curve(180.0, 0.0, false)
            }),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(
            0x1BC4A,
            Shape::Curve(Curve {
                secondary: true,
                ..orienting_curve(0.0, 180.0, true)
            }),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    // A circle vowel with a precomposed dot, to exercise
    // decomposition.
    let circle_dot_mark = SchemaDef::new(None, Shape::Dot(Dot::with_size_exponent(0.0)), 1.0)
        .anchor(Some(anchors::RELATIVE_1))
        .build(0);
    schemas.push(
        schema(0x1BC53, Shape::Circle(Circle::new(0.0, 0.0, false)), 2.0)
            .joining_type(JoiningType::Orienting)
            .marks(vec![circle_dot_mark.clone()]),
    );
    schemas.push(
        schema(
            0x1BC56,
            Shape::RomanianU(Complex::new(vec![
                Instruction::component(2.0, Shape::Circle(Circle::new(0.0, 0.0, false))),
                Instruction::component(1.0, Shape::Curve(curve(0.0, 120.0, false))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(0x1BC5A, Shape::Circle(Circle::new(0.0, 0.0, true)), 2.0)
            .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(
            0x1BC5B,
            Shape::Ou(Ou::new(vec![Instruction::component(
                2.0,
                Shape::Circle(Circle::new(0.0, 0.0, false)),
            )])),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(
            0x1BC5C,
            Shape::Wa(Wa::new(vec![
                Instruction::component(2.0, Shape::Circle(Circle::new(180.0, 180.0, false))),
                Instruction::component(1.0, Shape::Circle(Circle::new(180.0, 180.0, false))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(
            0x1BC5D,
            Shape::Wa(Wa::new(vec![
                Instruction::component(2.0, Shape::Circle(Circle::new(180.0, 180.0, false))),
                Instruction::component(1.2, Shape::Circle(Circle::new(180.0, 180.0, false))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(
            0x1BC5E,
            Shape::Wi(Wi::new(vec![
                Instruction::component(2.0, Shape::Circle(Circle::new(0.0, 0.0, false))),
                Instruction::component(1.0, Shape::Curve(curve(0.0, 180.0, false))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(
            0x1BC5F,
            Shape::Wi(Wi::new(vec![
                Instruction::component(2.0, Shape::Circle(Circle::new(0.0, 0.0, false))),
                Instruction::component(1.0, Shape::Curve(curve(0.0, 90.0, false))),
                Instruction::component(1.0, Shape::Curve(curve(90.0, 180.0, false))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    schemas.push(
        schema(
            0x1BC60,
            Shape::Wa(Wa::new(vec![
                Instruction::component(2.0, Shape::Circle(Circle::reversed_circle(180.0, 180.0, false))),
                Instruction::component(1.0, Shape::Circle(Circle::new(180.0, 180.0, false))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    // Secants.
    for (i, cp) in (0x1BC70..=0x1BC77).enumerate() {
        schemas.push(
            schema(cp, Shape::Line(secant(crate::geometry::normalize(240.0 + 15.0 * i as f64))), 1.0)
                .joining_type(JoiningType::Orienting),
        );
    }
    schemas.push(
        schema(
            0x1BC7C,
            Shape::TangentHook(TangentHook::new(vec![
                Instruction::component(1.0, Shape::Curve(curve(225.0, 315.0, false))),
                Instruction::Context(ContextFn::set_angle(315.0)),
                Instruction::component(1.0, Shape::Curve(curve(315.0, 45.0, true))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Orienting),
    );
    // Separate affixes.
    schemas.push(
        schema(
            0x1BC78,
            Shape::SeparateAffix(SeparateAffix::new(vec![Instruction::component(
                0.5,
                Shape::Curve(curve(0.0, 90.0, false)),
            )])),
            1.0,
        )
        .joining_type(JoiningType::Joining),
    );
    schemas.push(
        schema(
            0x1BC79,
            Shape::SeparateAffix(SeparateAffix {
                low: true,
                ..SeparateAffix::new(vec![Instruction::component(
                    0.5,
                    Shape::Curve(curve(0.0, 90.0, true)),
                )])
            }),
            1.0,
        )
        .joining_type(JoiningType::Joining),
    );
    schemas.push(
        schema(
            0x1BC7A,
            Shape::SeparateAffix(SeparateAffix {
                tight: true,
                ..SeparateAffix::new(vec![Instruction::component(
                    0.5,
                    Shape::Curve(curve(90.0, 180.0, false)),
                )])
            }),
            1.0,
        )
        .joining_type(JoiningType::Joining),
    );
    // A grammalogue: a circle with a cross.
    schemas.push(
        schema(
            0x1BC9C,
            Shape::Grammalogue(Complex::new(vec![
                Instruction::component(2.0, Shape::Circle(Circle::new(90.0, 90.0, false))),
                Instruction::component(2.0, Shape::Line(Line::new(270.0))),
                Instruction::component(2.0, Shape::Line(Line::new(0.0))),
            ])),
            1.0,
        )
        .joining_type(JoiningType::Joining)
        .shading_allowed(false),
    );
    // The double mark.
    schemas.push(
        schema(0x1BC9E, Shape::Line(Line::new(315.0)), 1.0)
            .anchor(Some(anchors::MIDDLE))
            .joining_type(JoiningType::Orienting),
    );
    // Format controls drawn as error glyphs when invalid.
    schemas.push(
        schema(
            0x1BC9D,
            Shape::InvalidDtls(Complex::new(vec![
                Instruction::component(1.0, Shape::Line(Line::dotted(0.0, 4))),
                Instruction::component(1.0, Shape::Line(Line::dotted(90.0, 4))),
                Instruction::component(1.0, Shape::Line(Line::dotted(180.0, 4))),
                Instruction::component(1.0, Shape::Line(Line::dotted(270.0, 4))),
            ])),
            0.5,
        )
        .joining_type(JoiningType::NonJoining)
        .ignorability(Ignorability::OverriddenNo)
        .shading_allowed(false),
    );
    for (cp, continuing) in [(0x1BCA0, false), (0x1BCA1, true)] {
        schemas.push(
            schema(
                cp,
                Shape::InvalidOverlap {
                    continuing,
                    base: Complex::new(vec![Instruction::component(
                        1.0,
                        Shape::Line(Line::dotted(270.0, if continuing { 5 } else { 3 })),
                    )]),
                },
                0.5,
            )
            .joining_type(JoiningType::NonJoining)
            .ignorability(Ignorability::OverriddenNo)
            .shading_allowed(false),
        );
    }
    for (cp, angle) in [(0x1BCA2, 270.0), (0x1BCA3, 90.0)] {
        schemas.push(
            schema(
                cp,
                Shape::InvalidStep {
                    angle,
                    base: Complex::new(vec![Instruction::component(
                        1.0,
                        Shape::Line(Line::dotted(angle, 3)),
                    )]),
                },
                0.5,
            )
            .joining_type(JoiningType::NonJoining)
            .ignorability(Ignorability::OverriddenNo)
            .shading_allowed(false),
        );
    }
    let mut built: Vec<SchemaRef> = schemas.into_iter().map(|def| def.build(0)).collect();
    built.push(circle_dot_mark);
    built
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn build() -> Compilation {
        let _ = env_logger::builder().is_test(true).try_init();
        Builder::new(false, false).build().expect("build must succeed")
    }

    fn find_glyph<'a>(compilation: &'a Compilation, cp: u32) -> &'a GlyphEntry {
        compilation
            .glyphs
            .iter()
            .find(|entry| entry.schema.cmap == Some(cp))
            .unwrap_or_else(|| panic!("U+{cp:04X} must have a glyph"))
    }

    #[test]
    fn duplicate_code_points_fail_the_build() {
        let mut builder = Builder::new(false, false);
        builder.schemas.push(
            SchemaDef::new(Some(0x1BC02), Shape::Line(Line::stretchy(270.0)), 1.0).build(0),
        );
        match builder.build() {
            Err(Error::DuplicateCodePoints(cps)) => assert_eq!(cps, vec![0x1BC02]),
            other => panic!("expected a duplicate code point error, got {other:?}"),
        }
    }

    #[test]
    fn p_sits_on_the_baseline() {
        let compilation = build();
        let entry = find_glyph(&compilation, 0x1BC02);
        let glyph = &entry.glyph;
        let cursive_entry = glyph.anchor(anchors::CURSIVE, AnchorKind::Entry).unwrap();
        let cursive_exit = glyph.anchor(anchors::CURSIVE, AnchorKind::Exit).unwrap();
        assert!((cursive_entry.x - 0.0).abs() < 0.5);
        assert!((cursive_entry.y - 500.0).abs() < 0.5);
        assert!((cursive_exit.x - 0.0).abs() < 0.5);
        assert!((cursive_exit.y - 0.0).abs() < 0.5);
        assert_eq!(entry.schema.glyph_class, GlyphClass::Joiner);
        assert_eq!(entry.schema.glyph_name().as_deref(), Some("uni1BC02"));
    }

    #[test]
    fn shaded_variants_exist_for_shadable_letters() {
        let compilation = build();
        // The shade phase pairs each shadable letter with DTLS.
        let shaded = compilation
            .glyphs
            .iter()
            .find(|entry| entry.schema.cps == [0x1BC02, 0x1BC9D]);
        assert!(shaded.is_some(), "p must have a shaded variant");
    }

    #[test]
    fn double_mark_ligatures_are_built() {
        let compilation = build();
        let triple = compilation
            .glyphs
            .iter()
            .find(|entry| entry.schema.cps == [0x1BC9E, 0x1BC9E, 0x1BC9E])
            .expect("the triple double mark ligature must exist");
        assert!(matches!(triple.schema.shape, Shape::Complex(_)));
    }

    #[test]
    fn overlap_controls_produce_valid_edges() {
        let compilation = build();
        assert!(compilation
            .glyphs
            .iter()
            .any(|entry| matches!(entry.schema.shape, Shape::ChildEdge(_))));
        assert!(compilation
            .glyphs
            .iter()
            .any(|entry| matches!(entry.schema.shape, Shape::ContinuingOverlap { .. })));
        assert!(compilation
            .glyphs
            .iter()
            .any(|entry| matches!(entry.schema.shape, Shape::ParentEdge(_))));
    }

    #[test]
    fn width_markers_cover_all_places() {
        let compilation = build();
        for place in 0..crate::util::WIDTH_MARKER_PLACES {
            assert!(
                compilation.glyphs.iter().any(|entry| matches!(
                    &entry.schema.shape,
                    Shape::LeftBoundDigit(digit) if digit.place == place
                )),
                "left bound digits must cover place {place}",
            );
        }
        assert!(compilation
            .glyphs
            .iter()
            .any(|entry| matches!(entry.schema.shape, Shape::Carry)));
        assert!(compilation
            .glyphs
            .iter()
            .any(|entry| matches!(entry.schema.shape, Shape::Start)));
        assert!(compilation
            .glyphs
            .iter()
            .any(|entry| matches!(entry.schema.shape, Shape::End)));
    }

    #[test]
    fn dist_feature_carries_advances() {
        let compilation = build();
        let dist_features: Vec<_> = compilation
            .feature_file
            .features
            .iter()
            .filter(|f| f.tag == font_types::Tag::new(b"dist"))
            .collect();
        assert!(!dist_features.is_empty(), "dist lookups must be emitted");
    }

    #[test]
    fn layout_output_has_gdef_classes() {
        let compilation = build();
        let [ast::Statement::GdefGlyphClasses {
            bases,
            ligatures,
            marks,
        }] = &compilation.feature_file.gdef[..]
        else {
            panic!("exactly one GDEF statement must be emitted");
        };
        assert!(!bases.is_empty());
        assert!(!ligatures.is_empty());
        assert!(!marks.is_empty());
    }

    #[test]
    fn glyph_names_are_unique() {
        let compilation = build();
        let mut names = IndexSet::new();
        for entry in &compilation.glyphs {
            assert!(
                names.insert(entry.glyph.name.clone()),
                "duplicate glyph name {}",
                entry.glyph.name,
            );
        }
    }

    #[test]
    fn rerunning_the_pipeline_is_deterministic() {
        let first = build();
        let second = build();
        let names = |compilation: &Compilation| -> Vec<String> {
            compilation
                .glyphs
                .iter()
                .map(|entry| entry.glyph.name.clone())
                .collect()
        };
        assert_eq!(names(&first), names(&second));
        let fea = |compilation: &Compilation| -> Vec<String> {
            compilation
                .feature_file
                .lookups
                .iter()
                .flat_map(|block| block.statements.iter().map(ast::Statement::as_fea))
                .collect()
        };
        assert_eq!(fea(&first), fea(&second));
    }
}
