//! Arena-backed form instance.
//!
//! Every node of one instance lives in a single generational arena; children
//! and attributes are handle lists and `parent` is a non-owning handle. A node
//! exclusively owns its children and attributes: removing it frees them.

use generational_arena::Arena;
use itertools::Itertools;
use tracing::{debug, instrument, trace};

use crate::domain::error::{StructuralError, TreeError, TreeResult};
use crate::domain::events::{ChangeEvent, ChangeKind, EventChannel};
use crate::domain::flags::NodeFlags;
use crate::domain::node::{NodeExtension, NodeId, OwnedNode, TreeNode};
use crate::domain::propagation::PropagationMode;
use crate::domain::reference::{
    is_structural_multiplicity, Step, TreeReference, INDEX_TEMPLATE, INDEX_UNBOUND,
};
use crate::domain::value::{AnswerValue, Constraint, DataType};

/// Which attribute list of a node an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AttributeSet {
    Xml,
    Bind,
}

/// Pre-order visitor over a subtree.
pub trait TreeVisitor {
    fn visit(&mut self, instance: &FormInstance, id: NodeId);
}

impl<F> TreeVisitor for F
where
    F: FnMut(&FormInstance, NodeId),
{
    fn visit(&mut self, instance: &FormInstance, id: NodeId) {
        self(instance, id)
    }
}

/// One form instance: a hidden nameless root plus the element tree below it.
#[derive(Debug)]
pub struct FormInstance {
    arena: Arena<TreeNode>,
    root: NodeId,
    pub(crate) events: EventChannel,
    pub(crate) propagation: PropagationMode,
    pub(crate) last_cascade_visits: usize,
}

impl Default for FormInstance {
    fn default() -> Self {
        Self::new()
    }
}

impl FormInstance {
    /// Primary instance.
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = NodeId(arena.insert(TreeNode::element(None, 0)));
        Self {
            arena,
            root,
            events: EventChannel::default(),
            propagation: PropagationMode::default(),
            last_cascade_visits: 0,
        }
    }

    /// Named secondary instance; every node added below inherits the name.
    pub fn named(instance_name: &str) -> Self {
        let mut instance = Self::new();
        if let Some(root) = instance.arena.get_mut(instance.root.0) {
            root.instance_name = Some(instance_name.to_string());
        }
        instance
    }

    /// Builds an instance around a decoded or extracted subtree. A nameless
    /// top node becomes the hidden root itself; a named one is attached below
    /// a fresh hidden root.
    pub fn from_owned(owned: OwnedNode) -> Self {
        let mut instance = Self::new();
        if owned.node.name.is_none() {
            let instance_name = owned.node.instance_name.clone();
            let old_root = instance.root;
            instance.arena.remove(old_root.0);
            instance.root = instance.adopt_under(owned, None);
            if let Some(root) = instance.arena.get_mut(instance.root.0) {
                root.instance_name = instance_name;
            }
        } else {
            if let Some(root) = instance.arena.get_mut(instance.root.0) {
                root.instance_name = owned.node.instance_name.clone();
            }
            let top = instance.adopt_under(owned, None);
            let root = instance.root;
            if let Some(node) = instance.arena.get_mut(top.0) {
                node.parent = Some(root);
            }
            if let Some(node) = instance.arena.get_mut(root.0) {
                node.children.push(top);
            }
        }
        instance
    }

    pub fn with_propagation(mut self, mode: PropagationMode) -> Self {
        self.propagation = mode;
        self
    }

    pub fn propagation(&self) -> PropagationMode {
        self.propagation
    }

    pub fn set_propagation(&mut self, mode: PropagationMode) {
        self.propagation = mode;
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.node(self.root).and_then(TreeNode::instance_name)
    }

    /// Number of live nodes, attributes included.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.child_count(self.root) == 0
    }

    pub fn events(&self) -> &EventChannel {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventChannel {
        &mut self.events
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.arena.get(id.0)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.arena.contains(id.0)
    }

    pub(crate) fn get(&self, id: NodeId) -> TreeResult<&TreeNode> {
        self.arena.get(id.0).ok_or(TreeError::NodeNotFound)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> TreeResult<&mut TreeNode> {
        self.arena.get_mut(id.0).ok_or(TreeError::NodeNotFound)
    }

    pub(crate) fn emit(&mut self, node: NodeId, kind: ChangeKind) {
        self.events.emit(ChangeEvent { node, kind });
    }

    // ------------------------------------------------------------
    // Node creation and structural mutation
    // ------------------------------------------------------------

    /// Creates a detached element; attach it with [`add_child`](Self::add_child).
    pub fn create_element(&mut self, name: &str, multiplicity: i32) -> NodeId {
        NodeId(self.arena.insert(TreeNode::element(Some(name), multiplicity)))
    }

    /// Attaches a detached `child` below `parent`.
    ///
    /// The child is placed after its same-named predecessor (a template goes
    /// before instance 0) and inherits the parent's effective relevant and
    /// enabled state and its instance name.
    #[instrument(level = "trace", skip(self))]
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) -> TreeResult<()> {
        let p = self.get(parent)?;
        let c = self.get(child)?;
        if p.is_attribute() {
            return Err(StructuralError::AttributeHasNoChildren(p.label()).into());
        }
        if p.value.is_some() {
            return Err(StructuralError::ChildOnValuedNode {
                parent: p.label(),
                child: c.label(),
            }
            .into());
        }
        if c.is_attribute() {
            return Err(StructuralError::AttributeAsChild(c.label()).into());
        }
        if c.multiplicity == INDEX_UNBOUND {
            return Err(StructuralError::UnboundChild(c.label()).into());
        }
        if !is_structural_multiplicity(c.multiplicity) {
            return Err(StructuralError::InvalidMultiplicity {
                child: c.label(),
                multiplicity: c.multiplicity,
            }
            .into());
        }
        if self.is_attached(child) {
            return Err(StructuralError::AlreadyAttached(c.label()).into());
        }
        if self.ancestors(parent).any(|a| a == child) || parent == child {
            return Err(StructuralError::Cycle(c.label()).into());
        }
        if let Some(name) = c.name.as_deref() {
            if self.child(parent, name, c.multiplicity).is_some() {
                return Err(StructuralError::DuplicateChild {
                    parent: p.label(),
                    child: name.to_string(),
                    multiplicity: c.multiplicity,
                }
                .into());
            }
        }
        self.attach_child(parent, child)
    }

    pub(crate) fn attach_child(&mut self, parent: NodeId, child: NodeId) -> TreeResult<()> {
        let (name, multiplicity) = {
            let c = self.get(child)?;
            (c.name.clone(), c.multiplicity)
        };
        let position = self.insertion_point(parent, name.as_deref(), multiplicity)?;
        self.insert_child_at(parent, position, child)
    }

    fn insertion_point(&self, parent: NodeId, name: Option<&str>, multiplicity: i32) -> TreeResult<usize> {
        let p = self.get(parent)?;
        let end = p.children.len();
        let Some(name) = name else {
            return Ok(end);
        };
        let position_of = |m: i32| {
            p.children.iter().position(|&c| {
                self.node(c)
                    .is_some_and(|n| n.name.as_deref() == Some(name) && n.multiplicity == m)
            })
        };
        Ok(if multiplicity == INDEX_TEMPLATE {
            position_of(0).unwrap_or(end)
        } else {
            let anchor = if multiplicity == 0 {
                Some(INDEX_TEMPLATE)
            } else {
                multiplicity.checked_sub(1)
            };
            anchor.and_then(position_of).map_or(end, |i| i + 1)
        })
    }

    /// Inserts at an explicit position, bypassing ordering and duplicate checks.
    pub(crate) fn insert_child_at(&mut self, parent: NodeId, index: usize, child: NodeId) -> TreeResult<()> {
        let (relevant, enabled, instance_name) = {
            let p = self.get(parent)?;
            (p.is_relevant(), p.is_enabled(), p.instance_name.clone())
        };
        self.get(child)?;
        let p = self.get_mut(parent)?;
        let index = index.min(p.children.len());
        p.children.insert(index, child);
        self.get_mut(child)?.parent = Some(parent);
        self.invalidate_refs(child);
        self.set_relevant(child, relevant, true)?;
        self.set_enabled(child, enabled, true)?;
        self.set_instance_name(child, instance_name.as_deref())?;
        Ok(())
    }

    /// Moves an attached child to another position among its siblings.
    pub(crate) fn move_child(&mut self, parent: NodeId, from: usize, to: usize) -> TreeResult<()> {
        let p = self.get_mut(parent)?;
        if from < p.children.len() && to < p.children.len() && from != to {
            let child = p.children.remove(from);
            p.children.insert(to, child);
        }
        Ok(())
    }

    /// True when the node is listed by its parent (as child or attribute).
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.node(id)
            .and_then(|n| n.parent)
            .and_then(|p| self.node(p))
            .is_some_and(|p| {
                p.children.contains(&id)
                    || p.attributes.contains(&id)
                    || p.bind_attributes.contains(&id)
            })
    }

    /// Ancestors from the direct parent upwards.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(id).and_then(|n| n.parent), move |p| {
            self.node(*p).and_then(|n| n.parent)
        })
    }

    /// Removes and frees `child` with its whole subtree.
    #[instrument(level = "trace", skip(self))]
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let Some(p) = self.arena.get_mut(parent.0) else {
            return false;
        };
        let Some(position) = p.children.iter().position(|&c| c == child) else {
            return false;
        };
        p.children.remove(position);
        self.free_subtree(child);
        true
    }

    pub fn remove_child_at(&mut self, parent: NodeId, index: usize) -> bool {
        match self.child_at(parent, index) {
            Some(child) => self.remove_child(parent, child),
            None => false,
        }
    }

    pub fn remove_child_named(&mut self, parent: NodeId, name: &str, multiplicity: i32) -> bool {
        match self.child(parent, name, multiplicity) {
            Some(child) => self.remove_child(parent, child),
            None => false,
        }
    }

    /// Removes every non-template child called `name`; returns how many went.
    pub fn remove_children_named(&mut self, parent: NodeId, name: &str) -> usize {
        self.children_named(parent, name)
            .into_iter()
            .filter(|&child| self.remove_child(parent, child))
            .count()
    }

    /// Frees a node that is not attached anywhere (e.g. an unused copy).
    pub fn discard(&mut self, id: NodeId) -> bool {
        if !self.contains(id) || self.is_attached(id) || id == self.root {
            return false;
        }
        self.free_subtree(id);
        true
    }

    fn free_subtree(&mut self, id: NodeId) {
        let doomed: Vec<NodeId> = self
            .iter_postorder(id)
            .flat_map(|(nid, node)| {
                node.attributes
                    .iter()
                    .chain(&node.bind_attributes)
                    .copied()
                    .chain(std::iter::once(nid))
                    .collect::<Vec<_>>()
            })
            .collect();
        trace!("free_subtree: releasing {} nodes", doomed.len());
        for nid in doomed {
            self.arena.remove(nid.0);
            self.events.forget_node(nid);
        }
    }

    // ------------------------------------------------------------
    // Child queries
    // ------------------------------------------------------------

    pub fn children(&self, parent: NodeId) -> &[NodeId] {
        self.node(parent).map_or(&[], |n| n.children.as_slice())
    }

    pub fn child(&self, parent: NodeId, name: &str, multiplicity: i32) -> Option<NodeId> {
        self.children(parent).iter().copied().find(|&c| {
            self.node(c)
                .is_some_and(|n| n.name.as_deref() == Some(name) && n.multiplicity == multiplicity)
        })
    }

    /// Same-named children in order, templates excluded.
    pub fn children_named(&self, parent: NodeId, name: &str) -> Vec<NodeId> {
        self.children(parent)
            .iter()
            .copied()
            .filter(|&c| {
                self.node(c)
                    .is_some_and(|n| n.name.as_deref() == Some(name) && !n.is_template())
            })
            .collect()
    }

    pub fn template_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.child(parent, name, INDEX_TEMPLATE)
    }

    pub fn child_at(&self, parent: NodeId, index: usize) -> Option<NodeId> {
        self.children(parent).get(index).copied()
    }

    pub fn child_count(&self, parent: NodeId) -> usize {
        self.children(parent).len()
    }

    /// Number of non-template children called `name`.
    pub fn child_count_named(&self, parent: NodeId, name: &str) -> usize {
        self.children_named(parent, name).len()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(TreeNode::is_leaf)
    }

    // ------------------------------------------------------------
    // Scalar mutation
    // ------------------------------------------------------------

    pub fn set_name(&mut self, id: NodeId, name: Option<&str>) -> TreeResult<()> {
        self.get_mut(id)?.name = name.map(str::to_string);
        self.invalidate_refs(id);
        Ok(())
    }

    /// Fails for an attached element when `multiplicity` is a sentinel other
    /// than the template one.
    pub fn set_multiplicity(&mut self, id: NodeId, multiplicity: i32) -> TreeResult<()> {
        let node = self.get(id)?;
        if node.parent.is_some() && !node.is_attribute() && !is_structural_multiplicity(multiplicity) {
            return Err(StructuralError::InvalidMultiplicity {
                child: node.label(),
                multiplicity,
            }
            .into());
        }
        self.get_mut(id)?.multiplicity = multiplicity;
        self.invalidate_refs(id);
        Ok(())
    }

    /// Sets the instance name of the node and everything below it.
    pub fn set_instance_name(&mut self, id: NodeId, instance_name: Option<&str>) -> TreeResult<()> {
        self.get(id)?;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.arena.get_mut(current.0) {
                if node.instance_name.as_deref() != instance_name {
                    node.instance_name = instance_name.map(str::to_string);
                    node.ref_cache.take();
                }
                stack.extend(node.attributes.iter().chain(&node.bind_attributes).chain(&node.children));
            }
        }
        Ok(())
    }

    pub fn set_data_type(&mut self, id: NodeId, data_type: DataType) -> TreeResult<()> {
        self.get_mut(id)?.data_type = data_type;
        Ok(())
    }

    pub fn set_repeatable(&mut self, id: NodeId, repeatable: bool) -> TreeResult<()> {
        self.get_mut(id)?.flags.set(NodeFlags::REPEATABLE, repeatable);
        Ok(())
    }

    pub fn set_constraint(&mut self, id: NodeId, constraint: Option<Constraint>) -> TreeResult<()> {
        self.get_mut(id)?.constraint = constraint;
        Ok(())
    }

    pub fn set_preload(&mut self, id: NodeId, handler: Option<&str>, params: Option<&str>) -> TreeResult<()> {
        let node = self.get_mut(id)?;
        node.preload_handler = handler.map(str::to_string);
        node.preload_params = params.map(str::to_string);
        Ok(())
    }

    pub fn set_namespace(&mut self, id: NodeId, namespace: Option<&str>, prefix: Option<&str>) -> TreeResult<()> {
        let node = self.get_mut(id)?;
        node.namespace = namespace.map(str::to_string);
        node.namespace_prefix = prefix.map(str::to_string);
        Ok(())
    }

    pub fn set_extension(&mut self, id: NodeId, extension: Option<Box<dyn NodeExtension>>) -> TreeResult<()> {
        self.get_mut(id)?.extension = extension;
        Ok(())
    }

    /// Stores a value on a leaf. Fails when the node has children.
    pub fn set_value(&mut self, id: NodeId, value: Option<AnswerValue>) -> TreeResult<()> {
        let node = self.get_mut(id)?;
        if !node.children.is_empty() {
            return Err(StructuralError::ValueOnParent(node.label()).into());
        }
        node.value = value;
        Ok(())
    }

    /// Like [`set_value`](Self::set_value) but also fires a data-changed
    /// event. A no-op (returning `false`) only when old and new are both empty.
    pub fn set_answer(&mut self, id: NodeId, value: Option<AnswerValue>) -> TreeResult<bool> {
        if self.get(id)?.value.is_none() && value.is_none() {
            return Ok(false);
        }
        self.set_value(id, value)?;
        self.emit(id, ChangeKind::Data);
        Ok(true)
    }

    // ------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------

    pub fn attributes(&self, id: NodeId) -> &[NodeId] {
        self.attribute_ids(id, AttributeSet::Xml)
    }

    pub fn bind_attributes(&self, id: NodeId) -> &[NodeId] {
        self.attribute_ids(id, AttributeSet::Bind)
    }

    /// First attribute called `name`; a `None` namespace matches any namespace.
    pub fn attribute(&self, id: NodeId, namespace: Option<&str>, name: &str) -> Option<NodeId> {
        self.find_attribute(id, AttributeSet::Xml, namespace, name)
    }

    pub fn attribute_value(&self, id: NodeId, namespace: Option<&str>, name: &str) -> Option<String> {
        self.attribute(id, namespace, name)
            .and_then(|a| self.node(a))
            .and_then(|a| a.value.as_ref())
            .map(AnswerValue::to_xml_text)
    }

    /// Updates, creates or (with `None`) removes an attribute.
    pub fn set_attribute(
        &mut self,
        id: NodeId,
        namespace: Option<&str>,
        name: &str,
        value: Option<&str>,
    ) -> TreeResult<()> {
        self.set_attribute_in(id, AttributeSet::Xml, namespace, name, value)
    }

    pub fn bind_attribute(&self, id: NodeId, namespace: Option<&str>, name: &str) -> Option<NodeId> {
        self.find_attribute(id, AttributeSet::Bind, namespace, name)
    }

    pub fn bind_attribute_value(&self, id: NodeId, namespace: Option<&str>, name: &str) -> Option<String> {
        self.bind_attribute(id, namespace, name)
            .and_then(|a| self.node(a))
            .and_then(|a| a.value.as_ref())
            .map(AnswerValue::to_xml_text)
    }

    pub fn set_bind_attribute(
        &mut self,
        id: NodeId,
        namespace: Option<&str>,
        name: &str,
        value: Option<&str>,
    ) -> TreeResult<()> {
        self.set_attribute_in(id, AttributeSet::Bind, namespace, name, value)
    }

    pub(crate) fn attribute_ids(&self, id: NodeId, set: AttributeSet) -> &[NodeId] {
        self.node(id).map_or(&[], |n| match set {
            AttributeSet::Xml => n.attributes.as_slice(),
            AttributeSet::Bind => n.bind_attributes.as_slice(),
        })
    }

    fn find_attribute(&self, id: NodeId, set: AttributeSet, namespace: Option<&str>, name: &str) -> Option<NodeId> {
        self.attribute_ids(id, set).iter().copied().find(|&a| {
            self.node(a).is_some_and(|attr| {
                attr.name.as_deref() == Some(name)
                    && namespace.map_or(true, |ns| attr.namespace.as_deref().unwrap_or("") == ns)
            })
        })
    }

    fn set_attribute_in(
        &mut self,
        id: NodeId,
        set: AttributeSet,
        namespace: Option<&str>,
        name: &str,
        value: Option<&str>,
    ) -> TreeResult<()> {
        self.get(id)?;
        if let Some(existing) = self.find_attribute(id, set, namespace, name) {
            match value {
                Some(v) => self.get_mut(existing)?.value = Some(AnswerValue::uncast(v)),
                None => {
                    let owner = self.get_mut(id)?;
                    match set {
                        AttributeSet::Xml => owner.attributes.retain(|&a| a != existing),
                        AttributeSet::Bind => owner.bind_attributes.retain(|&a| a != existing),
                    }
                    self.free_subtree(existing);
                }
            }
            return Ok(());
        }
        let Some(value) = value else {
            return Ok(());
        };
        let (relevant, instance_name) = {
            let owner = self.get(id)?;
            (owner.is_relevant(), owner.instance_name.clone())
        };
        let mut attr = TreeNode::attribute(namespace, name);
        attr.value = Some(AnswerValue::uncast(value));
        attr.parent = Some(id);
        attr.instance_name = instance_name;
        if set == AttributeSet::Xml {
            attr.flags.set(NodeFlags::RELEVANT_INHERITED, relevant);
        }
        let attr_id = NodeId(self.arena.insert(attr));
        let owner = self.get_mut(id)?;
        match set {
            AttributeSet::Xml => owner.attributes.push(attr_id),
            AttributeSet::Bind => owner.bind_attributes.push(attr_id),
        }
        Ok(())
    }

    // ------------------------------------------------------------
    // Copies
    // ------------------------------------------------------------

    /// Arena-free deep copy of a subtree.
    pub fn to_owned_subtree(&self, id: NodeId, include_templates: bool) -> Option<OwnedNode> {
        let node = self.node(id)?;
        let copy_list = |ids: &[NodeId]| -> Vec<TreeNode> {
            ids.iter()
                .filter_map(|&a| self.node(a))
                .map(TreeNode::detached_copy)
                .collect()
        };
        Some(OwnedNode {
            node: node.detached_copy(),
            attributes: copy_list(&node.attributes),
            bind_attributes: copy_list(&node.bind_attributes),
            children: node
                .children
                .iter()
                .filter(|&&c| include_templates || self.node(c).is_some_and(|n| !n.is_template()))
                .filter_map(|&c| self.to_owned_subtree(c, include_templates))
                .collect(),
        })
    }

    /// Places an owned subtree into this arena as a detached node.
    pub fn adopt(&mut self, owned: OwnedNode) -> NodeId {
        self.adopt_under(owned, None)
    }

    fn adopt_under(&mut self, owned: OwnedNode, parent: Option<NodeId>) -> NodeId {
        let OwnedNode {
            mut node,
            attributes,
            bind_attributes,
            children,
        } = owned;
        node.parent = parent;
        node.children.clear();
        node.attributes.clear();
        node.bind_attributes.clear();
        node.ref_cache.take();
        let id = NodeId(self.arena.insert(node));

        let mut insert_attributes = |arena: &mut Arena<TreeNode>, list: Vec<TreeNode>| -> Vec<NodeId> {
            list.into_iter()
                .map(|mut attr| {
                    attr.parent = Some(id);
                    attr.ref_cache.take();
                    NodeId(arena.insert(attr))
                })
                .collect()
        };
        let attribute_ids = insert_attributes(&mut self.arena, attributes);
        let bind_ids = insert_attributes(&mut self.arena, bind_attributes);
        let child_ids: Vec<NodeId> = children
            .into_iter()
            .map(|child| self.adopt_under(child, Some(id)))
            .collect();

        if let Some(node) = self.arena.get_mut(id.0) {
            node.attributes = attribute_ids;
            node.bind_attributes = bind_ids;
            node.children = child_ids;
        }
        id
    }

    /// Copies scalars, flags, metadata and both attribute lists. The copy
    /// knows the source's parent but is not listed by it and has no children.
    pub fn shallow_copy(&mut self, id: NodeId) -> TreeResult<NodeId> {
        let mut owned = self.to_owned_subtree_shallow(id)?;
        owned.children.clear();
        let parent = self.get(id)?.parent;
        let copy = self.adopt(owned);
        self.get_mut(copy)?.parent = parent;
        Ok(copy)
    }

    fn to_owned_subtree_shallow(&self, id: NodeId) -> TreeResult<OwnedNode> {
        let node = self.get(id)?;
        let mut owned = OwnedNode::new(node.detached_copy());
        owned.attributes = node
            .attributes
            .iter()
            .filter_map(|&a| self.node(a))
            .map(TreeNode::detached_copy)
            .collect();
        owned.bind_attributes = node
            .bind_attributes
            .iter()
            .filter_map(|&a| self.node(a))
            .map(TreeNode::detached_copy)
            .collect();
        Ok(owned)
    }

    /// Shallow copy plus recursive copies of the children, optionally
    /// skipping repeat templates.
    pub fn deep_copy(&mut self, id: NodeId, include_templates: bool) -> TreeResult<NodeId> {
        let owned = self
            .to_owned_subtree(id, include_templates)
            .ok_or(TreeError::NodeNotFound)?;
        let parent = self.get(id)?.parent;
        let copy = self.adopt(owned);
        self.get_mut(copy)?.parent = parent;
        Ok(copy)
    }

    /// Deep copy used to instantiate a repeat: nested templates are dropped
    /// and every element multiplicity becomes the default. The caller assigns
    /// the real multiplicities.
    pub fn deep_copy_for_repeat(&mut self, id: NodeId) -> TreeResult<NodeId> {
        let mut owned = self.to_owned_subtree(id, false).ok_or(TreeError::NodeNotFound)?;
        owned.reset_multiplicities();
        let parent = self.get(id)?.parent;
        let copy = self.adopt(owned);
        self.get_mut(copy)?.parent = parent;
        Ok(copy)
    }

    /// Deep-copies a subtree of another instance into this arena, detached.
    pub fn import(&mut self, other: &FormInstance, id: NodeId, include_templates: bool) -> TreeResult<NodeId> {
        let owned = other
            .to_owned_subtree(id, include_templates)
            .ok_or(TreeError::NodeNotFound)?;
        Ok(self.adopt(owned))
    }

    /// New instance holding a deep copy of `id` below its hidden root.
    pub fn extract(&self, id: NodeId) -> TreeResult<FormInstance> {
        let owned = self.to_owned_subtree(id, true).ok_or(TreeError::NodeNotFound)?;
        let mut extracted = FormInstance::from_owned(owned);
        extracted.propagation = self.propagation;
        Ok(extracted)
    }

    // ------------------------------------------------------------
    // References
    // ------------------------------------------------------------

    /// The node's reference, built once and cached until an identity change.
    pub fn get_ref(&self, id: NodeId) -> Option<TreeReference> {
        let node = self.node(id)?;
        if let Some(cached) = node.ref_cache.borrow().as_ref() {
            return Some(cached.clone());
        }
        let reference = self.build_ref(id)?;
        *node.ref_cache.borrow_mut() = Some(reference.clone());
        Some(reference)
    }

    /// True when the node currently holds a cached reference.
    pub fn has_cached_ref(&self, id: NodeId) -> bool {
        self.node(id).is_some_and(|n| n.ref_cache.borrow().is_some())
    }

    fn build_ref(&self, id: NodeId) -> Option<TreeReference> {
        let node = self.node(id)?;
        let mut steps = Vec::new();
        let mut anchored = false;
        let mut current = Some(id);
        while let Some(cur) = current {
            let n = self.node(cur)?;
            match &n.name {
                None => {
                    anchored = true;
                    break;
                }
                Some(name) => steps.push(Step::new(name.clone(), n.multiplicity)),
            }
            current = n.parent;
        }
        let mut reference = if anchored {
            TreeReference::root_ref()
        } else {
            TreeReference::self_ref()
        };
        for step in steps.into_iter().rev() {
            reference.push_step(step.name, step.multiplicity);
        }
        Some(reference.with_instance(node.instance_name.as_deref()))
    }

    /// Drops cached references of the node and everything below it.
    pub(crate) fn invalidate_refs(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.arena.get(current.0) {
                node.ref_cache.take();
                stack.extend(node.attributes.iter().chain(&node.bind_attributes).chain(&node.children));
            }
        }
    }

    /// Finds the node an absolute reference names. An unbound step picks the
    /// first non-template child of that name.
    pub fn resolve(&self, reference: &TreeReference) -> Option<NodeId> {
        if !reference.is_absolute() || reference.instance_name() != self.instance_name() {
            return None;
        }
        reference.steps().iter().try_fold(self.root, |current, step| {
            if step.is_attribute() {
                self.attribute(current, None, &step.name)
            } else if step.multiplicity == INDEX_UNBOUND {
                self.children_named(current, &step.name).first().copied()
            } else {
                self.child(current, &step.name, step.multiplicity)
            }
        })
    }

    /// Finds the repeat template for a reference: at every step the template
    /// of that name is preferred over a concrete instance.
    pub fn template_for(&self, reference: &TreeReference) -> Option<NodeId> {
        if !reference.is_absolute() {
            return None;
        }
        reference.steps().iter().try_fold(self.root, |current, step| {
            if step.is_attribute() {
                return self.attribute(current, None, &step.name);
            }
            self.template_child(current, &step.name).or_else(|| {
                self.child(current, &step.name, step.multiplicity.max(0))
            })
        })
    }

    // ------------------------------------------------------------
    // Traversal
    // ------------------------------------------------------------

    /// Visits `id`, then its children recursively (attributes are not visited).
    pub fn accept(&self, id: NodeId, visitor: &mut dyn TreeVisitor) {
        if !self.contains(id) {
            return;
        }
        visitor.visit(self, id);
        for &child in self.children(id) {
            self.accept(child, visitor);
        }
    }

    pub fn iter_subtree(&self, id: NodeId) -> SubtreeIterator<'_> {
        SubtreeIterator::new(self, id)
    }

    pub fn iter_postorder(&self, id: NodeId) -> PostOrderIterator<'_> {
        PostOrderIterator::new(self, id)
    }

    pub fn depth(&self, id: NodeId) -> usize {
        match self.node(id) {
            Some(node) => {
                1 + node
                    .children
                    .iter()
                    .map(|&child| self.depth(child))
                    .max()
                    .unwrap_or(0)
            }
            None => 0,
        }
    }

    /// References of all leaves below `id`, in document order.
    pub fn leaf_refs(&self, id: NodeId) -> Vec<TreeReference> {
        self.iter_subtree(id)
            .filter(|(_, node)| node.is_leaf())
            .filter_map(|(nid, _)| self.get_ref(nid))
            .collect()
    }

    /// Distinct child names in first-seen order.
    pub(crate) fn child_names(&self, parent: NodeId) -> Vec<String> {
        self.children(parent)
            .iter()
            .filter_map(|&c| self.node(c).and_then(|n| n.name.clone()))
            .unique()
            .collect()
    }

    pub(crate) fn log_summary(&self) {
        debug!(
            "instance: {} nodes, root children: {}",
            self.len(),
            self.child_count(self.root)
        );
    }
}

/// Pre-order iterator (node before its children, children left to right).
pub struct SubtreeIterator<'a> {
    instance: &'a FormInstance,
    stack: Vec<NodeId>,
}

impl<'a> SubtreeIterator<'a> {
    fn new(instance: &'a FormInstance, start: NodeId) -> Self {
        let mut stack = Vec::new();
        if instance.contains(start) {
            stack.push(start);
        }
        Self { instance, stack }
    }
}

impl<'a> Iterator for SubtreeIterator<'a> {
    type Item = (NodeId, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current) = self.stack.pop() {
            if let Some(node) = self.instance.node(current) {
                // Push children in reverse order for left-to-right traversal
                for &child in node.children.iter().rev() {
                    self.stack.push(child);
                }
                return Some((current, node));
            }
        }
        None
    }
}

/// Post-order iterator (children before their parent).
pub struct PostOrderIterator<'a> {
    instance: &'a FormInstance,
    stack: Vec<(NodeId, bool)>,
}

impl<'a> PostOrderIterator<'a> {
    fn new(instance: &'a FormInstance, start: NodeId) -> Self {
        let mut stack = Vec::new();
        if instance.contains(start) {
            stack.push((start, false));
        }
        Self { instance, stack }
    }
}

impl<'a> Iterator for PostOrderIterator<'a> {
    type Item = (NodeId, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((current, visited)) = self.stack.pop() {
            if let Some(node) = self.instance.node(current) {
                if !visited {
                    self.stack.push((current, true));
                    for &child in node.children.iter().rev() {
                        self.stack.push((child, false));
                    }
                } else {
                    return Some((current, node));
                }
            }
        }
        None
    }
}
