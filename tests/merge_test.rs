//! populate and populate_template: hydrating templates from incoming data.

mod common;

use std::cell::RefCell;

use rstest::rstest;

use common::{element, leaf, repeat_instance, repeat_template, survey_template, text_of};
use formtree::application::XmlAnswerResolver;
use formtree::domain::{
    AnswerResolver, AnswerValue, CoercionError, DataType, FormInstance, Selection, TreeError,
    TreeReference,
};

/// Incoming data: `/data/{name=<name>, row*/cell=<cells>}`
fn saved(name: Option<&str>, cells: &[&str]) -> FormInstance {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    if let Some(name) = name {
        leaf(&mut instance, data, "name", Some(AnswerValue::text(name)));
    }
    for (m, cell) in cells.iter().enumerate() {
        let row = repeat_instance(&mut instance, data, "row", m as i32);
        leaf(&mut instance, row, "cell", Some(AnswerValue::text(*cell)));
    }
    instance
}

/// Counts resolver calls and delegates to the XML resolver.
#[derive(Default)]
struct CountingResolver {
    calls: RefCell<Vec<(String, DataType)>>,
}

impl AnswerResolver for CountingResolver {
    fn resolve(
        &self,
        text: &str,
        data_type: DataType,
        reference: Option<&TreeReference>,
    ) -> Result<Option<AnswerValue>, CoercionError> {
        self.calls.borrow_mut().push((text.to_string(), data_type));
        XmlAnswerResolver.resolve(text, data_type, reference)
    }
}

// ============================================================
// populate
// ============================================================

#[test]
fn given_template_and_saved_name_when_populated_then_name_answered() {
    // Arrange
    let mut template = survey_template();
    let incoming = saved(Some("Alice"), &[]);

    // Act
    template.populate_from(&incoming, &XmlAnswerResolver).unwrap();

    // Assert
    let data = template.child(template.root(), "data", 0).unwrap();
    let name = template.child(data, "name", 0).unwrap();
    assert_eq!(
        template.node(name).unwrap().value(),
        Some(&AnswerValue::text("Alice"))
    );
}

#[test]
fn given_two_saved_rows_when_populated_then_two_instances_with_multiplicities_0_and_1() {
    // Arrange
    let mut template = survey_template();
    let incoming = saved(Some("Alice"), &["first", "second"]);

    // Act
    template.populate_from(&incoming, &XmlAnswerResolver).unwrap();

    // Assert
    let data = template.child(template.root(), "data", 0).unwrap();
    let rows = template.children_named(data, "row");
    assert_eq!(rows.len(), 2);
    let multiplicities: Vec<i32> = rows
        .iter()
        .map(|&r| template.node(r).unwrap().multiplicity())
        .collect();
    assert_eq!(multiplicities, vec![0, 1]);
    let cells: Vec<Option<String>> = rows
        .iter()
        .map(|&r| text_of(&template, template.child(r, "cell", 0).unwrap()))
        .collect();
    assert_eq!(cells, vec![Some("first".into()), Some("second".into())]);
    assert!(template.template_child(data, "row").is_some(), "template survives");
    assert_eq!(
        template.get_ref(rows[1]).unwrap().to_string(),
        "/data[1]/row[2]"
    );
}

#[test]
fn given_default_repeat_instances_when_populated_then_replaced_by_incoming_count() {
    let mut template = survey_template();
    let data = template.child(template.root(), "data", 0).unwrap();
    for m in 0..3 {
        let row = repeat_instance(&mut template, data, "row", m);
        leaf(&mut template, row, "cell", Some(AnswerValue::text("default")));
    }
    let incoming = saved(None, &["only"]);

    template.populate_from(&incoming, &XmlAnswerResolver).unwrap();

    let rows = template.children_named(data, "row");
    assert_eq!(rows.len(), 1);
    assert_eq!(
        text_of(&template, template.child(rows[0], "cell", 0).unwrap()),
        Some("only".into())
    );
}

#[test]
fn given_missing_non_repeat_child_when_populated_then_marked_not_relevant() {
    let mut template = survey_template();
    let incoming = saved(None, &[]);

    template.populate_from(&incoming, &XmlAnswerResolver).unwrap();

    let data = template.child(template.root(), "data", 0).unwrap();
    let name = template.child(data, "name", 0).unwrap();
    let node = template.node(name).unwrap();
    assert!(!node.own_relevant());
    assert!(!node.is_relevant());
}

#[test]
fn given_repeat_without_template_when_populated_then_consistency_error() {
    // Arrange: a repeat instance with no template to restore it from
    let mut template = FormInstance::new();
    let root = template.root();
    let data = element(&mut template, root, "data", 0);
    let row = repeat_instance(&mut template, data, "row", 0);
    leaf(&mut template, row, "cell", None);
    let incoming = saved(None, &["x"]);

    // Act
    let result = template.populate_from(&incoming, &XmlAnswerResolver);

    // Assert
    match result {
        Err(TreeError::Consistency { message }) => {
            assert!(message.contains("data"), "{}", message);
            assert!(message.contains("row"), "{}", message);
        }
        other => panic!("expected consistency error, got {:?}", other),
    }
}

#[test]
fn given_typed_bind_and_text_answer_when_populated_then_resolved_to_type() {
    // Arrange
    let mut template = FormInstance::new();
    let root = template.root();
    let data = element(&mut template, root, "data", 0);
    let age = leaf(&mut template, data, "age", None);
    template.set_data_type(age, DataType::Integer).unwrap();
    let mut incoming = FormInstance::new();
    let incoming_root = incoming.root();
    let incoming_data = element(&mut incoming, incoming_root, "data", 0);
    leaf(&mut incoming, incoming_data, "age", Some(AnswerValue::uncast("41")));
    let resolver = CountingResolver::default();

    // Act
    template.populate_from(&incoming, &resolver).unwrap();

    // Assert
    assert_eq!(template.node(age).unwrap().value(), Some(&AnswerValue::Integer(41)));
    assert_eq!(*resolver.calls.borrow(), vec![("41".to_string(), DataType::Integer)]);
}

#[test]
fn given_incoming_attributes_when_populated_then_copied_onto_template() {
    let mut template = survey_template();
    let mut incoming = saved(Some("Alice"), &[]);
    let incoming_data = incoming.child(incoming.root(), "data", 0).unwrap();
    incoming
        .set_attribute(incoming_data, None, "version", Some("7"))
        .unwrap();

    template.populate_from(&incoming, &XmlAnswerResolver).unwrap();

    let data = template.child(template.root(), "data", 0).unwrap();
    assert_eq!(template.attribute_value(data, None, "version"), Some("7".into()));
}

// ============================================================
// populate_template
// ============================================================

/// Destination `/item/{label: text, count: <count_type>, tag: choice}`.
fn destination(count_type: DataType) -> FormInstance {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let item = element(&mut instance, root, "item", 0);
    let label = leaf(&mut instance, item, "label", None);
    instance.set_data_type(label, DataType::Text).unwrap();
    let count = leaf(&mut instance, item, "count", None);
    instance.set_data_type(count, count_type).unwrap();
    let tag = leaf(&mut instance, item, "tag", None);
    instance.set_data_type(tag, DataType::Choice).unwrap();
    instance
}

/// Itemset row `/item/{label, count, tag}` with the given values.
fn itemset_row(count: AnswerValue, tag: AnswerValue) -> FormInstance {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let item = element(&mut instance, root, "item", 0);
    leaf(&mut instance, item, "label", Some(AnswerValue::text("Apples")));
    leaf(&mut instance, item, "count", Some(count));
    leaf(&mut instance, item, "tag", Some(tag));
    instance
}

#[test]
fn given_matching_and_selection_values_when_populate_template_then_only_selection_retyped() {
    // Arrange
    let mut target = destination(DataType::Integer);
    let incoming = itemset_row(
        AnswerValue::Integer(3),
        AnswerValue::SelectOne(Selection {
            value: "fruit".into(),
            index: Some(4),
        }),
    );
    let registry = FormInstance::new();
    let resolver = CountingResolver::default();
    let (t, s) = (target.root(), incoming.root());

    // Act
    target.populate_template(t, &incoming, s, &registry, &resolver).unwrap();

    // Assert
    let item = target.child(target.root(), "item", 0).unwrap();
    let value = |name: &str| {
        target.node(target.child(item, name, 0).unwrap()).unwrap().value().cloned()
    };
    assert_eq!(value("label"), Some(AnswerValue::text("Apples")));
    assert_eq!(value("count"), Some(AnswerValue::Integer(3)));
    assert_eq!(value("tag"), Some(AnswerValue::SelectOne(Selection::new("fruit"))));
    assert_eq!(*resolver.calls.borrow(), vec![("fruit".to_string(), DataType::Choice)]);
}

#[rstest]
#[case(AnswerValue::text("12"), AnswerValue::Integer(12))]
#[case(AnswerValue::Long(5), AnswerValue::Integer(5))]
#[case(AnswerValue::Decimal(2.0), AnswerValue::Integer(2))]
fn given_other_value_kind_when_populate_template_then_reparsed_as_declared_type(
    #[case] incoming_count: AnswerValue,
    #[case] expected: AnswerValue,
) {
    let mut target = destination(DataType::Integer);
    let incoming = itemset_row(incoming_count, AnswerValue::text("x"));
    let (t, s) = (target.root(), incoming.root());

    target
        .populate_template(t, &incoming, s, &FormInstance::new(), &XmlAnswerResolver)
        .unwrap();

    let item = target.child(target.root(), "item", 0).unwrap();
    let count = target.child(item, "count", 0).unwrap();
    assert_eq!(target.node(count).unwrap().value(), Some(&expected));
}

#[test]
fn given_unparseable_text_when_populate_template_then_type_coercion_error() {
    let mut target = destination(DataType::Integer);
    let incoming = itemset_row(AnswerValue::text("three"), AnswerValue::text("x"));
    let (t, s) = (target.root(), incoming.root());

    let result = target.populate_template(t, &incoming, s, &FormInstance::new(), &XmlAnswerResolver);

    assert!(matches!(
        result,
        Err(TreeError::TypeCoercion(CoercionError::Unparseable {
            data_type: DataType::Integer,
            ..
        }))
    ));
}

#[test]
fn given_bind_type_without_itemset_form_when_populate_template_then_unsupported_type() {
    let mut target = destination(DataType::GeoShape);
    let incoming = itemset_row(AnswerValue::text("1 2; 3 4"), AnswerValue::text("x"));
    let (t, s) = (target.root(), incoming.root());

    let result = target.populate_template(t, &incoming, s, &FormInstance::new(), &XmlAnswerResolver);

    assert_eq!(
        result,
        Err(TreeError::TypeCoercion(CoercionError::UnsupportedType(DataType::GeoShape)))
    );
}

#[test]
fn given_registry_template_when_populate_template_then_repeats_copied_from_registry() {
    // Arrange: the main instance declares `row` with an extra `note` child
    let mut main = FormInstance::new();
    let main_root = main.root();
    let main_data = element(&mut main, main_root, "data", 0);
    let main_row = repeat_template(&mut main, main_data, "row");
    leaf(&mut main, main_row, "cell", None);
    leaf(&mut main, main_row, "note", Some(AnswerValue::text("from main")));
    let registry = main.extract(main_data).unwrap();

    let mut target = survey_template();
    let incoming = saved(Some("Bob"), &["a", "b"]);
    let (t, s) = (target.root(), incoming.root());

    // Act
    target
        .populate_template(t, &incoming, s, &registry, &XmlAnswerResolver)
        .unwrap();

    // Assert
    let data = target.child(target.root(), "data", 0).unwrap();
    let rows = target.children_named(data, "row");
    assert_eq!(rows.len(), 2);
    for (m, &row) in rows.iter().enumerate() {
        assert_eq!(target.node(row).unwrap().multiplicity(), m as i32);
        let note = target.child(row, "note", 0).unwrap();
        assert_eq!(text_of(&target, note), Some("from main".into()));
    }
    let name = target.child(data, "name", 0).unwrap();
    assert_eq!(text_of(&target, name), Some("Bob".into()));
}

#[test]
fn given_empty_registry_when_populate_template_then_local_template_used() {
    let mut target = survey_template();
    let incoming = saved(None, &["a"]);
    let (t, s) = (target.root(), incoming.root());

    target
        .populate_template(t, &incoming, s, &FormInstance::new(), &XmlAnswerResolver)
        .unwrap();

    let data = target.child(target.root(), "data", 0).unwrap();
    let rows = target.children_named(data, "row");
    assert_eq!(rows.len(), 1);
    let cell = target.child(rows[0], "cell", 0).unwrap();
    assert_eq!(text_of(&target, cell), Some("a".into()));
    let name = target.child(data, "name", 0).unwrap();
    assert!(target.node(name).unwrap().is_relevant(), "missing rows leave siblings untouched");
}

#[test]
fn given_default_repeat_instance_when_populate_template_then_replaced_without_collision() {
    // Arrange
    let mut target = survey_template();
    let data = target.child(target.root(), "data", 0).unwrap();
    let default_row = repeat_instance(&mut target, data, "row", 0);
    leaf(&mut target, default_row, "cell", Some(AnswerValue::text("default")));
    let incoming = saved(None, &["a", "b"]);
    let (t, s) = (target.root(), incoming.root());

    // Act
    target
        .populate_template(t, &incoming, s, &FormInstance::new(), &XmlAnswerResolver)
        .unwrap();

    // Assert
    assert!(target.node(default_row).is_none());
    let rows = target.children_named(data, "row");
    let multiplicities: Vec<i32> = rows
        .iter()
        .map(|&r| target.node(r).unwrap().multiplicity())
        .collect();
    assert_eq!(multiplicities, vec![0, 1]);
    let cells: Vec<Option<String>> = rows
        .iter()
        .map(|&r| text_of(&target, target.child(r, "cell", 0).unwrap()))
        .collect();
    assert_eq!(cells, vec![Some("a".into()), Some("b".into())]);
}
