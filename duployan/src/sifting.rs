//! Equivalence-class discovery for lookalike schemas.

use indexmap::IndexMap;

use crate::schema::SchemaRef;
use crate::util::GroupKey;

/// A collection of disjoint groups of equivalent items.
#[derive(Clone, Debug, Default)]
pub struct Grouper<T> {
    groups: Vec<Vec<T>>,
}

impl<T: PartialEq + Clone> Grouper<T> {
    pub fn new(groups: Vec<Vec<T>>) -> Grouper<T> {
        Grouper { groups }
    }

    pub fn groups(&self) -> &[Vec<T>] {
        &self.groups
    }

    pub fn remove(&mut self, group: &[T]) {
        let index = self
            .groups
            .iter()
            .position(|g| g.as_slice() == group)
            .expect("group to remove must be present");
        self.groups.remove(index);
    }

    pub fn add(&mut self, group: Vec<T>) {
        self.groups.push(group);
    }
}

/// Groups schemas by their [`group`](crate::schema::Schema::group)
/// identity. Schemas in one group render identically and are
/// interchangeable as glyph definitions.
pub fn group_schemas<'a>(schemas: impl IntoIterator<Item = &'a SchemaRef>) -> Grouper<SchemaRef> {
    let mut by_group: IndexMap<GroupKey, Vec<SchemaRef>> = IndexMap::new();
    for schema in schemas {
        by_group.entry(schema.group()).or_default().push(schema.clone());
    }
    Grouper::new(by_group.into_values().collect())
}

/// Sorts each group so the canonical schema comes first, and records
/// the canonical choice on every alias.
///
/// Sifting preserves semantics: by construction all schemas in a group
/// share shape, size, joining type, marks, and context state.
pub fn sift(grouper: &mut Grouper<SchemaRef>) {
    for group in &mut grouper.groups {
        group.sort_by_key(|schema| schema.sort_key());
        let canonical = group[0].clone();
        for schema in group.iter().skip(1) {
            schema.set_canonical(canonical.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDef;
    use crate::shapes::{Line, Shape};
    use crate::util::JoiningType;

    fn line_schema(cmap: Option<u32>, phase_index: usize) -> SchemaRef {
        SchemaDef::new(cmap, Shape::Line(Line::stretchy(270.0)), 1.0)
            .joining_type(JoiningType::Joining)
            .build(phase_index)
    }

    #[test]
    fn equal_schemas_group_together() {
        let a = line_schema(Some(0x1BC02), 0);
        let b = line_schema(None, 4);
        let c = SchemaDef::new(Some(0x1BC03), Shape::Line(Line::stretchy(0.0)), 1.0).build(0);
        let grouper = group_schemas([&a, &b, &c]);
        assert_eq!(grouper.groups().len(), 2);
    }

    #[test]
    fn sifting_prefers_encoded_schemas() {
        let derived = line_schema(None, 4);
        let encoded = line_schema(Some(0x1BC02), 0);
        let mut grouper = group_schemas([&derived, &encoded]);
        sift(&mut grouper);
        assert!(encoded.canonical().is_none());
        assert_eq!(derived.canonical(), Some(encoded.clone()));
    }

    #[test]
    fn sifting_twice_is_a_no_op() {
        let derived = line_schema(None, 4);
        let encoded = line_schema(Some(0x1BC02), 0);
        let mut grouper = group_schemas([&derived, &encoded]);
        sift(&mut grouper);
        let first = derived.canonical();
        sift(&mut grouper);
        assert_eq!(derived.canonical(), first);
        assert!(encoded.canonical().is_none());
    }
}
