//! Structural operations: attaching, ordering, removing, values and attributes.

mod common;

use rstest::rstest;

use common::{element, leaf, repeat_instance, repeat_template};
use formtree::domain::{
    AnswerValue, FormInstance, NodeId, StructuralError, TreeError, INDEX_ATTRIBUTE, INDEX_UNBOUND,
};

// ============================================================
// add_child
// ============================================================

#[test]
fn given_valued_leaf_when_add_child_then_structural_error() {
    // Arrange
    let mut instance = FormInstance::new();
    let root = instance.root();
    let name = leaf(&mut instance, root, "name", Some(AnswerValue::text("Alice")));
    let child = instance.create_element("first", 0);

    // Act
    let result = instance.add_child(name, child);

    // Assert
    assert!(matches!(
        result,
        Err(TreeError::Structural(StructuralError::ChildOnValuedNode { .. }))
    ));
    assert!(instance.is_leaf(name));
}

#[test]
fn given_unbound_multiplicity_when_add_child_then_structural_error() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let child = instance.create_element("row", INDEX_UNBOUND);

    let result = instance.add_child(root, child);

    assert_eq!(
        result,
        Err(TreeError::Structural(StructuralError::UnboundChild("row".into())))
    );
}

#[rstest]
#[case::attribute_sentinel(INDEX_ATTRIBUTE)]
#[case::below_sentinels(-3)]
#[case::most_negative(i32::MIN)]
fn given_sentinel_multiplicity_when_add_child_then_invalid_multiplicity(#[case] multiplicity: i32) {
    // Arrange
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let child = instance.create_element("e", multiplicity);

    // Act
    let result = instance.add_child(data, child);

    // Assert
    assert_eq!(
        result,
        Err(TreeError::Structural(StructuralError::InvalidMultiplicity {
            child: "e".into(),
            multiplicity,
        }))
    );
    assert!(!instance.is_attached(child));
    assert!(instance.children(data).is_empty());
}

#[test]
fn given_largest_multiplicity_when_add_child_then_appended_after_siblings() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let first = repeat_instance(&mut instance, data, "row", 0);
    let last = instance.create_element("row", i32::MAX);

    instance.add_child(data, last).unwrap();

    assert_eq!(instance.children(data), &[first, last]);
    assert_eq!(instance.get_ref(last).unwrap().to_string(), "/data[1]/row[2147483648]");
}

#[test]
fn given_attached_element_when_set_to_attribute_sentinel_then_rejected() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);

    let result = instance.set_multiplicity(data, INDEX_ATTRIBUTE);

    assert!(matches!(
        result,
        Err(TreeError::Structural(StructuralError::InvalidMultiplicity { .. }))
    ));
    assert_eq!(instance.get_ref(data).unwrap().to_string(), "/data[1]");
}

#[test]
fn given_existing_name_and_multiplicity_when_add_child_then_duplicate_rejected() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    element(&mut instance, root, "data", 0);
    let twin = instance.create_element("data", 0);

    let result = instance.add_child(root, twin);

    assert!(matches!(
        result,
        Err(TreeError::Structural(StructuralError::DuplicateChild { multiplicity: 0, .. }))
    ));
}

#[test]
fn given_attached_node_when_added_again_then_already_attached() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let group = element(&mut instance, data, "group", 0);

    let result = instance.add_child(root, group);

    assert!(matches!(
        result,
        Err(TreeError::Structural(StructuralError::AlreadyAttached(_)))
    ));
}

#[test]
fn given_ancestor_when_added_below_descendant_then_cycle_rejected() {
    let mut instance = FormInstance::new();
    let data = instance.create_element("data", 0);
    let group = instance.create_element("group", 0);
    instance.add_child(data, group).unwrap();

    let result = instance.add_child(group, data);

    assert!(matches!(
        result,
        Err(TreeError::Structural(StructuralError::Cycle(_)))
    ));
}

#[test]
fn given_repeat_instances_added_out_of_order_when_listing_then_sorted_after_template() {
    // Arrange
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let first = repeat_instance(&mut instance, data, "row", 0);
    let second = repeat_instance(&mut instance, data, "row", 1);

    // Act: the template arrives last but belongs in front of instance 0
    let template = repeat_template(&mut instance, data, "row");

    // Assert
    assert_eq!(instance.children(data), &[template, first, second]);
    assert_eq!(instance.children_named(data, "row"), vec![first, second]);
    assert_eq!(instance.child_count_named(data, "row"), 2);
    assert_eq!(instance.template_child(data, "row"), Some(template));
}

// ============================================================
// Values
// ============================================================

#[test]
fn given_node_with_children_when_set_value_then_value_on_parent_error() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    leaf(&mut instance, data, "name", None);

    let result = instance.set_value(data, Some(AnswerValue::text("x")));

    assert_eq!(
        result,
        Err(TreeError::Structural(StructuralError::ValueOnParent("data".into())))
    );
    assert!(!instance.node(data).unwrap().has_value());
}

#[test]
fn given_any_sequence_of_mutations_then_value_and_children_never_coexist() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let a = leaf(&mut instance, data, "a", Some(AnswerValue::Integer(1)));
    let rejected = instance.create_element("b", 0);
    let _ = instance.add_child(a, rejected);
    instance.discard(rejected);
    let _ = instance.set_value(data, Some(AnswerValue::Integer(2)));
    instance.set_value(a, None).unwrap();
    let b = instance.create_element("b", 0);
    instance.add_child(a, b).unwrap();

    for (_, node) in instance.iter_subtree(root) {
        assert!(!(node.has_value() && node.has_children()));
    }
}

// ============================================================
// Removal
// ============================================================

#[test]
fn given_subtree_when_removed_then_all_handles_stale() {
    // Arrange
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let group = element(&mut instance, data, "group", 0);
    let inner = leaf(&mut instance, group, "inner", Some(AnswerValue::text("x")));
    instance.set_attribute(group, None, "id", Some("g")).unwrap();
    let attribute = instance.attribute(group, None, "id").unwrap();
    let before = instance.len();

    // Act
    let removed = instance.remove_child(data, group);

    // Assert
    assert!(removed);
    assert!(!instance.contains(group));
    assert!(!instance.contains(inner));
    assert!(!instance.contains(attribute));
    assert_eq!(instance.len(), before - 3);
    assert!(instance.children(data).is_empty());
}

#[test]
fn given_template_and_instances_when_remove_children_named_then_template_kept() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let template = repeat_template(&mut instance, data, "row");
    repeat_instance(&mut instance, data, "row", 0);
    repeat_instance(&mut instance, data, "row", 1);

    let removed = instance.remove_children_named(data, "row");

    assert_eq!(removed, 2);
    assert_eq!(instance.children(data), &[template]);
}

#[test]
fn given_unknown_child_when_removed_then_false() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);

    assert!(!instance.remove_child_named(data, "missing", 0));
    assert!(!instance.remove_child_at(data, 3));
}

#[test]
fn given_detached_node_when_discarded_then_freed_but_attached_refused() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let loose = instance.create_element("loose", 0);

    assert!(instance.discard(loose));
    assert!(!instance.contains(loose));
    assert!(!instance.discard(data));
    assert!(!instance.discard(root));
}

// ============================================================
// Attributes
// ============================================================

#[rstest]
#[case(None, true)]
#[case(Some(""), true)]
#[case(Some("urn:other"), false)]
fn given_attribute_without_namespace_when_looked_up_then_namespace_filter_applies(
    #[case] namespace: Option<&str>,
    #[case] found: bool,
) {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    instance.set_attribute(data, None, "id", Some("form-1")).unwrap();

    assert_eq!(instance.attribute(data, namespace, "id").is_some(), found);
}

#[test]
fn given_existing_attribute_when_set_then_updated_in_place() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    instance.set_attribute(data, None, "version", Some("1")).unwrap();

    instance.set_attribute(data, None, "version", Some("2")).unwrap();

    assert_eq!(instance.attributes(data).len(), 1);
    assert_eq!(instance.attribute_value(data, None, "version"), Some("2".into()));
}

#[test]
fn given_existing_attribute_when_set_to_none_then_removed() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    instance.set_attribute(data, None, "version", Some("1")).unwrap();
    let attribute = instance.attribute(data, None, "version").unwrap();

    instance.set_attribute(data, None, "version", None).unwrap();

    assert!(instance.attributes(data).is_empty());
    assert!(!instance.contains(attribute));
}

#[test]
fn given_missing_attribute_when_set_to_none_then_nothing_created() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);

    instance.set_attribute(data, None, "version", None).unwrap();

    assert!(instance.attributes(data).is_empty());
}

#[test]
fn given_attribute_node_then_leaf_with_attribute_sentinel_outside_children() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    instance.set_attribute(data, None, "id", Some("x")).unwrap();
    let attribute = instance.attribute(data, None, "id").unwrap();

    let node = instance.node(attribute).unwrap();
    assert!(node.is_attribute());
    assert!(node.is_leaf());
    assert!(instance.children(data).is_empty());
    assert!(matches!(
        instance.add_child(root, attribute),
        Err(TreeError::Structural(StructuralError::AttributeAsChild(_)))
    ));
}

#[test]
fn given_bind_attribute_when_set_then_kept_apart_from_xml_attributes() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let name = leaf(&mut instance, root, "name", None);

    instance
        .set_bind_attribute(name, Some("urn:ext"), "hint", Some("first name"))
        .unwrap();

    assert!(instance.attributes(name).is_empty());
    assert_eq!(
        instance.bind_attribute_value(name, Some("urn:ext"), "hint"),
        Some("first name".into())
    );
    assert_eq!(instance.bind_attribute_value(name, None, "hint"), Some("first name".into()));
}

// ============================================================
// Traversal
// ============================================================

#[test]
fn given_tree_when_visited_then_preorder_and_postorder_orders() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let a = element(&mut instance, data, "a", 0);
    let b = leaf(&mut instance, a, "b", None);
    let c = leaf(&mut instance, data, "c", None);

    let mut visited = Vec::new();
    instance.accept(root, &mut |_: &FormInstance, id: NodeId| visited.push(id));
    let pre: Vec<_> = instance.iter_subtree(root).map(|(id, _)| id).collect();
    let post: Vec<_> = instance.iter_postorder(root).map(|(id, _)| id).collect();

    assert_eq!(visited, vec![root, data, a, b, c]);
    assert_eq!(pre, visited);
    assert_eq!(post, vec![b, a, c, data, root]);
    assert_eq!(instance.depth(root), 4);
}

#[test]
fn given_multiplicity_uniqueness_when_repeats_added_then_no_two_share_multiplicity() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    repeat_template(&mut instance, data, "row");
    for m in 0..4 {
        repeat_instance(&mut instance, data, "row", m);
    }
    let duplicate = instance.create_element("row", 2);
    assert!(instance.add_child(data, duplicate).is_err());

    let multiplicities: Vec<i32> = instance
        .children_named(data, "row")
        .iter()
        .map(|&id| instance.node(id).unwrap().multiplicity())
        .collect();
    assert_eq!(multiplicities, vec![0, 1, 2, 3]);
}
