//! Reference building, caching and resolution against an instance.

mod common;

use rstest::rstest;

use common::{element, leaf, repeat_instance, repeat_template};
use formtree::domain::{FormInstance, NodeId, TreeReference, INDEX_UNBOUND};

struct Rows {
    instance: FormInstance,
    data: NodeId,
    template: NodeId,
    rows: Vec<NodeId>,
}

/// `/data/row[@template], row[1..=3]/{cell}`, each row with an `@id`
fn rows() -> Rows {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let template = repeat_template(&mut instance, data, "row");
    leaf(&mut instance, template, "cell", None);
    let rows = (0..3)
        .map(|m| {
            let row = repeat_instance(&mut instance, data, "row", m);
            instance
                .set_attribute(row, None, "id", Some(format!("r{}", m).as_str()))
                .unwrap();
            leaf(&mut instance, row, "cell", None);
            row
        })
        .collect();
    Rows {
        instance,
        data,
        template,
        rows,
    }
}

#[test]
fn given_nodes_when_referenced_then_paths_use_one_based_positions() {
    let Rows {
        instance,
        template,
        rows,
        ..
    } = rows();
    let cell = instance.child(rows[2], "cell", 0).unwrap();
    let id = instance.attribute(rows[1], None, "id").unwrap();

    assert_eq!(instance.get_ref(instance.root()).unwrap().to_string(), "/");
    assert_eq!(instance.get_ref(template).unwrap().to_string(), "/data[1]/row[@template]");
    assert_eq!(instance.get_ref(cell).unwrap().to_string(), "/data[1]/row[3]/cell[1]");
    assert_eq!(instance.get_ref(id).unwrap().to_string(), "/data[1]/row[2]/@id");
}

#[test]
fn given_detached_node_when_referenced_then_relative_path() {
    let mut instance = FormInstance::new();
    let loose = instance.create_element("loose", 0);
    let inner = leaf(&mut instance, loose, "inner", None);

    let reference = instance.get_ref(inner).unwrap();

    assert!(!reference.is_absolute());
    assert_eq!(reference.to_string(), "loose[1]/inner[1]");
}

#[test]
fn given_cached_reference_when_ancestor_renamed_then_subtree_recomputed() {
    // Arrange
    let Rows {
        mut instance,
        data,
        rows,
        ..
    } = rows();
    let cell = instance.child(rows[0], "cell", 0).unwrap();
    instance.get_ref(cell);
    assert!(instance.has_cached_ref(cell));

    // Act
    instance.set_name(data, Some("survey")).unwrap();

    // Assert
    assert!(!instance.has_cached_ref(cell));
    assert_eq!(instance.get_ref(cell).unwrap().to_string(), "/survey[1]/row[1]/cell[1]");
}

#[test]
fn given_cached_reference_when_reindexed_then_recomputed() {
    let Rows {
        mut instance, rows, ..
    } = rows();
    let cell = instance.child(rows[2], "cell", 0).unwrap();
    instance.get_ref(cell);

    instance.set_multiplicity(rows[2], 7).unwrap();

    assert_eq!(instance.get_ref(cell).unwrap().to_string(), "/data[1]/row[8]/cell[1]");
}

#[test]
fn given_cached_reference_when_reparented_then_recomputed() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    let loose = instance.create_element("moved", 0);
    let inner = leaf(&mut instance, loose, "inner", None);
    assert_eq!(instance.get_ref(inner).unwrap().to_string(), "moved[1]/inner[1]");

    instance.add_child(data, loose).unwrap();

    assert_eq!(instance.get_ref(inner).unwrap().to_string(), "/data[1]/moved[1]/inner[1]");
}

#[test]
fn given_instance_name_change_when_referenced_then_instance_prefix_appears() {
    let Rows {
        mut instance, data, ..
    } = rows();
    instance.get_ref(data);

    instance.set_instance_name(instance.root(), Some("rows")).unwrap();

    assert_eq!(instance.get_ref(data).unwrap().to_string(), "instance('rows')/data[1]");
}

#[rstest]
#[case("/data[1]/row[2]", Some(1))]
#[case("/data/row", Some(0))]
#[case("/data[1]/row[9]", None)]
#[case("data[1]/row[1]", None)]
#[case("instance('other')/data[1]/row[1]", None)]
fn given_reference_when_resolved_then_expected_row(
    #[case] text: &str,
    #[case] expected: Option<usize>,
) {
    let Rows {
        instance, rows, ..
    } = rows();
    let reference = TreeReference::parse(text).unwrap();

    assert_eq!(instance.resolve(&reference), expected.map(|i| rows[i]));
}

#[test]
fn given_attribute_reference_when_resolved_then_attribute_node() {
    let Rows {
        instance, rows, ..
    } = rows();
    let reference = TreeReference::parse("/data[1]/row[3]/@id").unwrap();

    let resolved = instance.resolve(&reference).unwrap();

    assert_eq!(Some(resolved), instance.attribute(rows[2], None, "id"));
}

#[test]
fn given_node_reference_when_resolved_then_round_trips_to_same_node() {
    let Rows {
        instance, ..
    } = rows();

    for (id, _) in instance.iter_subtree(instance.root()) {
        let reference = instance.get_ref(id).unwrap();
        assert_eq!(instance.resolve(&reference), Some(id), "{}", reference);
    }
}

#[test]
fn given_concrete_row_reference_when_template_requested_then_template_node() {
    let Rows {
        instance, template, ..
    } = rows();
    let reference = TreeReference::parse("/data[1]/row[3]/cell[1]").unwrap();

    let found = instance.template_for(&reference).unwrap();

    assert_eq!(instance.parent(found), Some(template));
    assert_eq!(
        instance.template_for(&reference.parent_ref().unwrap()),
        Some(template)
    );
}

#[test]
fn given_leaves_when_listed_then_document_order_references() {
    let Rows {
        instance, data, ..
    } = rows();

    let leaves: Vec<String> = instance
        .leaf_refs(data)
        .iter()
        .map(ToString::to_string)
        .collect();

    assert_eq!(
        leaves,
        vec![
            "/data[1]/row[@template]/cell[1]",
            "/data[1]/row[1]/cell[1]",
            "/data[1]/row[2]/cell[1]",
            "/data[1]/row[3]/cell[1]",
        ]
    );
    assert!(TreeReference::parse("/data/row")
        .unwrap()
        .steps()
        .iter()
        .all(|s| s.multiplicity == INDEX_UNBOUND));
}
