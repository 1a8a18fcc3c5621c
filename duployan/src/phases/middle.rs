//! The phase between the main phases and the marker phases.

use crate::fea::{s, Lookup, Rule};
use crate::phases::{phase, PhaseCx, PhaseDef};
use crate::sifting;

/// Collapses lookalike schemas onto one representative per group, so
/// that only the representatives get drawn glyphs and width markers.
pub fn merge_lookalikes(cx: &mut PhaseCx) -> Vec<Lookup> {
    let mut lookup = Lookup::new(b"rlig", b"dflt");
    let grouper = sifting::group_schemas(cx.new_schemas.clone().iter());
    for group in grouper.groups() {
        let mut group = group.clone();
        group.sort_by_key(|schema| schema.sort_key());
        let lookalike_schema = &group[0];
        if !lookalike_schema.might_need_width_markers() {
            continue;
        }
        lookalike_schema.set_lookalike_group(&group);
        for schema in &group[1..] {
            cx.add_rule(&mut lookup, Rule::sub(vec![s(schema)], vec![s(lookalike_schema)]));
            schema.set_lookalike_group(&group);
        }
    }
    vec![lookup]
}

pub fn phase_list() -> Vec<PhaseDef> {
    vec![phase!(merge_lookalikes)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phases::run_phases;
    use crate::phases::{ClassMap, StrokeStyle};
    use crate::schema::SchemaDef;
    use crate::shapes::{Line, Shape};
    use crate::util::JoiningType;
    use indexmap::{IndexMap, IndexSet};

    #[test]
    fn lookalikes_merge_onto_the_canonical_schema() {
        let encoded = SchemaDef::new(Some(0x1BC02), Shape::Line(Line::stretchy(270.0)), 1.0)
            .joining_type(JoiningType::Joining)
            .build(0);
        let derived = encoded.to_def().cmap(None).cps(vec![]).build(3);
        let schemas: IndexSet<_> = [encoded.clone(), derived.clone()].into_iter().collect();
        let mut classes = ClassMap::new();
        let output = run_phases(
            StrokeStyle::regular(),
            false,
            schemas,
            &phase_list(),
            10,
            &mut classes,
            &IndexMap::new(),
        );
        assert_eq!(output.lookups_with_phases.len(), 1);
        let lookup = &output.lookups_with_phases[0].0;
        assert_eq!(lookup.rules.len(), 1);
        assert_eq!(encoded.lookalike_group().len(), 2);
        // The derived schema is unconditionally substituted away.
        assert!(output.output_schemas.contains(&encoded));
        assert!(!output.output_schemas.contains(&derived));
    }
}
