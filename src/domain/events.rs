//! Change notifications.
//!
//! The instance owns one channel; nodes never hold listeners. Events are
//! delivered synchronously, in subscription order.

use std::fmt;

use crate::domain::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Data,
    Required,
    Relevant,
    Enabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub node: NodeId,
    pub kind: ChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn FnMut(&ChangeEvent)>;

struct Subscription {
    id: SubscriptionId,
    node: Option<NodeId>,
    listener: Listener,
}

#[derive(Default)]
pub struct EventChannel {
    next_id: u64,
    subscriptions: Vec<Subscription>,
}

impl EventChannel {
    /// Receives every event of the instance.
    pub fn subscribe(&mut self, listener: impl FnMut(&ChangeEvent) + 'static) -> SubscriptionId {
        self.register(None, Box::new(listener))
    }

    /// Receives events of a single node; dropped automatically when the node
    /// is removed from the instance.
    pub fn subscribe_node(
        &mut self,
        node: NodeId,
        listener: impl FnMut(&ChangeEvent) + 'static,
    ) -> SubscriptionId {
        self.register(Some(node), Box::new(listener))
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn register(&mut self, node: Option<NodeId>, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, node, listener });
        id
    }

    pub(crate) fn emit(&mut self, event: ChangeEvent) {
        for subscription in &mut self.subscriptions {
            if subscription.node.map_or(true, |n| n == event.node) {
                (subscription.listener)(&event);
            }
        }
    }

    pub(crate) fn forget_node(&mut self, node: NodeId) {
        self.subscriptions.retain(|s| s.node != Some(node));
    }
}

impl fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventChannel")
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}
