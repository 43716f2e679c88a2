//! Printable views of an instance subtree.

use itertools::Itertools;
use termtree::Tree;
use tracing::instrument;

use crate::domain::{FormInstance, NodeId, TreeNode};

pub trait TreeNodeConvert {
    fn to_tree_string(&self, id: NodeId) -> Tree<String>;
}

impl TreeNodeConvert for FormInstance {
    #[instrument(level = "debug", skip(self))]
    fn to_tree_string(&self, id: NodeId) -> Tree<String> {
        let Some(node) = self.node(id) else {
            return Tree::new("<stale node>".to_string());
        };
        let mut tree = Tree::new(node_label(self, node));
        for &child in node.children() {
            tree.push(self.to_tree_string(child));
        }
        tree
    }
}

/// `name[mult] @attr=value = answer (markers)`
pub fn node_label(instance: &FormInstance, node: &TreeNode) -> String {
    let mut label = match node.name() {
        None => match instance.instance_name() {
            Some(name) => format!("instance('{}')", name),
            None => "/".to_string(),
        },
        Some(name) if node.is_template() => format!("{}[@template]", name),
        Some(name) => format!("{}[{}]", name, i64::from(node.multiplicity()) + 1),
    };
    let attributes = node
        .attributes()
        .iter()
        .filter_map(|&a| instance.node(a))
        .map(|a| {
            format!(
                "@{}={}",
                a.name().unwrap_or(""),
                a.value().map(|v| v.to_xml_text()).unwrap_or_default()
            )
        })
        .join(" ");
    if !attributes.is_empty() {
        label.push(' ');
        label.push_str(&attributes);
    }
    if let Some(value) = node.value() {
        label.push_str(&format!(" = {:?}", value.to_xml_text()));
    }
    let markers = state_markers(node);
    if !markers.is_empty() {
        label.push_str(&format!(" ({})", markers));
    }
    label
}

/// Comma-separated list of the non-default states of a node.
pub fn state_markers(node: &TreeNode) -> String {
    let mut markers = Vec::new();
    if node.is_repeatable() {
        markers.push("repeat");
    }
    if node.is_required() {
        markers.push("required");
    }
    if !node.is_relevant() {
        markers.push("not relevant");
    }
    if !node.is_enabled() {
        markers.push("disabled");
    }
    markers.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AnswerValue, INDEX_TEMPLATE};

    #[test]
    fn given_small_instance_when_rendered_then_labels_carry_position_value_and_state() {
        // Arrange
        let mut instance = FormInstance::new();
        let root = instance.root();
        let data = instance.create_element("data", 0);
        instance.add_child(root, data).unwrap();
        instance.set_attribute(data, None, "id", Some("survey")).unwrap();
        let name = instance.create_element("name", 0);
        instance.add_child(data, name).unwrap();
        instance.set_value(name, Some(AnswerValue::text("Alice"))).unwrap();
        let row = instance.create_element("row", INDEX_TEMPLATE);
        instance.set_repeatable(row, true).unwrap();
        instance.add_child(data, row).unwrap();
        instance.set_relevant(name, false, false).unwrap();

        // Act
        let rendered = instance.to_tree_string(root).to_string();

        // Assert
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "/");
        assert!(lines[1].ends_with("data[1] @id=survey"), "{}", lines[1]);
        assert!(lines[2].ends_with("name[1] = \"Alice\" (not relevant)"), "{}", lines[2]);
        assert!(lines[3].ends_with("row[@template] (repeat)"), "{}", lines[3]);
    }

    #[test]
    fn given_named_instance_when_labelled_then_instance_function_shown() {
        let instance = FormInstance::named("lookup");
        let root = instance.node(instance.root()).unwrap();

        assert_eq!(node_label(&instance, root), "instance('lookup')");
    }

    #[test]
    fn given_largest_multiplicity_when_labelled_then_one_based_position() {
        let mut instance = FormInstance::new();
        let root = instance.root();
        let row = instance.create_element("row", i32::MAX);
        instance.add_child(root, row).unwrap();

        let label = node_label(&instance, instance.node(row).unwrap());

        assert_eq!(label, "row[2147483648]");
    }
}
