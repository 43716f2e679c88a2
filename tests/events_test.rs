//! Observer channel: delivery order, scoping and unsubscription.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{element, leaf, record_events};
use formtree::domain::{AnswerValue, ChangeEvent, ChangeKind, FormInstance};

#[test]
fn given_two_listeners_when_event_fires_then_delivered_in_subscription_order() {
    // Arrange
    let mut instance = FormInstance::new();
    let root = instance.root();
    let name = leaf(&mut instance, root, "name", None);
    let order = Rc::new(RefCell::new(Vec::new()));
    for label in ["first", "second"] {
        let sink = order.clone();
        instance
            .events_mut()
            .subscribe(move |_| sink.borrow_mut().push(label));
    }

    // Act
    instance.set_answer(name, Some(AnswerValue::text("Bob"))).unwrap();

    // Assert
    assert_eq!(*order.borrow(), vec!["first", "second"]);
}

#[test]
fn given_unsubscribed_listener_when_event_fires_then_not_called() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let name = leaf(&mut instance, root, "name", None);
    let calls = Rc::new(RefCell::new(0));
    let sink = calls.clone();
    let id = instance
        .events_mut()
        .subscribe(move |_| *sink.borrow_mut() += 1);

    assert!(instance.events_mut().unsubscribe(id));
    assert!(!instance.events_mut().unsubscribe(id));
    instance.set_answer(name, Some(AnswerValue::text("Bob"))).unwrap();

    assert_eq!(*calls.borrow(), 0);
    assert!(instance.events().is_empty());
}

#[test]
fn given_node_subscription_when_other_node_changes_then_silent() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let first = leaf(&mut instance, root, "first", None);
    let second = leaf(&mut instance, root, "second", None);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    instance
        .events_mut()
        .subscribe_node(first, move |e| sink.borrow_mut().push(*e));

    instance.set_answer(second, Some(AnswerValue::Integer(2))).unwrap();
    instance.set_answer(first, Some(AnswerValue::Integer(1))).unwrap();

    assert_eq!(
        *seen.borrow(),
        vec![ChangeEvent { node: first, kind: ChangeKind::Data }]
    );
}

#[test]
fn given_node_subscription_when_node_removed_then_subscription_dropped() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let group = element(&mut instance, root, "group", 0);
    let inner = leaf(&mut instance, group, "inner", None);
    instance.events_mut().subscribe_node(inner, |_| {});
    instance.events_mut().subscribe(|_| {});
    assert_eq!(instance.events().len(), 2);

    instance.remove_child(root, group);

    assert_eq!(instance.events().len(), 1);
}

#[test]
fn given_empty_answer_when_cleared_again_then_no_data_event() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let name = leaf(&mut instance, root, "name", None);
    let events = record_events(&mut instance);

    assert!(!instance.set_answer(name, None).unwrap());
    assert!(instance.set_answer(name, Some(AnswerValue::text("x"))).unwrap());
    assert!(instance.set_answer(name, None).unwrap());

    assert_eq!(events.borrow().len(), 2);
    assert!(events.borrow().iter().all(|e| e.kind == ChangeKind::Data));
}

#[test]
fn given_plain_set_value_then_no_event() {
    let mut instance = FormInstance::new();
    let root = instance.root();
    let name = leaf(&mut instance, root, "name", None);
    let events = record_events(&mut instance);

    instance.set_value(name, Some(AnswerValue::text("quiet"))).unwrap();

    assert!(events.borrow().is_empty());
}
