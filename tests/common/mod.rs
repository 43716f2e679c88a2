//! Builders shared by the integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use formtree::domain::{
    AnswerValue, ChangeEvent, FormInstance, NodeId, DEFAULT_MULTIPLICITY, INDEX_TEMPLATE,
};

/// Attaches a new element below `parent`.
pub fn element(instance: &mut FormInstance, parent: NodeId, name: &str, multiplicity: i32) -> NodeId {
    let id = instance.create_element(name, multiplicity);
    instance.add_child(parent, id).unwrap();
    id
}

/// Attaches a new leaf holding `value` below `parent`.
pub fn leaf(instance: &mut FormInstance, parent: NodeId, name: &str, value: Option<AnswerValue>) -> NodeId {
    let id = element(instance, parent, name, DEFAULT_MULTIPLICITY);
    instance.set_value(id, value).unwrap();
    id
}

/// Attaches a repeatable template below `parent`.
pub fn repeat_template(instance: &mut FormInstance, parent: NodeId, name: &str) -> NodeId {
    let id = instance.create_element(name, INDEX_TEMPLATE);
    instance.set_repeatable(id, true).unwrap();
    instance.add_child(parent, id).unwrap();
    id
}

/// Attaches a repeatable instance below `parent`.
pub fn repeat_instance(instance: &mut FormInstance, parent: NodeId, name: &str, multiplicity: i32) -> NodeId {
    let id = instance.create_element(name, multiplicity);
    instance.set_repeatable(id, true).unwrap();
    instance.add_child(parent, id).unwrap();
    id
}

/// Text value of a leaf, if any.
pub fn text_of(instance: &FormInstance, id: NodeId) -> Option<String> {
    instance
        .node(id)
        .and_then(|n| n.value())
        .map(AnswerValue::to_xml_text)
}

/// Records every event of the instance.
pub fn record_events(instance: &mut FormInstance) -> Rc<RefCell<Vec<ChangeEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = log.clone();
    instance.events_mut().subscribe(move |event| sink.borrow_mut().push(*event));
    log
}

/// `/data` with a `name` leaf and a `row` repeat template holding a `cell` leaf.
pub fn survey_template() -> FormInstance {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let data = element(&mut instance, root, "data", 0);
    leaf(&mut instance, data, "name", None);
    let row = repeat_template(&mut instance, data, "row");
    leaf(&mut instance, row, "cell", None);
    instance
}
