//! Tree node payload stored in the instance arena.

use std::cell::RefCell;
use std::fmt;

use generational_arena::Index;

use crate::domain::flags::NodeFlags;
use crate::domain::reference::{TreeReference, DEFAULT_MULTIPLICITY, INDEX_ATTRIBUTE};
use crate::domain::value::{AnswerValue, Constraint, DataType};

/// Handle to a node inside one [`FormInstance`](crate::domain::FormInstance).
///
/// Handles are generational: once a node is removed its handle never
/// resolves again, even if the slot is reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) Index);

/// A node kind beyond the plain element, carrying its own payload.
///
/// The snapshot codec writes nodes that carry an extension through the tagged
/// path and decodes them through a registry keyed by [`type_tag`](Self::type_tag).
pub trait NodeExtension: fmt::Debug {
    fn type_tag(&self) -> &str;
    fn encode_payload(&self) -> Vec<u8>;
    fn clone_box(&self) -> Box<dyn NodeExtension>;
}

impl Clone for Box<dyn NodeExtension> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// One element or attribute of a form instance.
///
/// Structural links (`parent`, `children`, attribute lists) are arena handles
/// and only change through [`FormInstance`](crate::domain::FormInstance).
#[derive(Debug)]
pub struct TreeNode {
    pub(crate) name: Option<String>,
    pub(crate) multiplicity: i32,
    pub(crate) parent: Option<NodeId>,
    pub(crate) value: Option<AnswerValue>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) attributes: Vec<NodeId>,
    pub(crate) bind_attributes: Vec<NodeId>,
    pub(crate) flags: NodeFlags,
    pub(crate) data_type: DataType,
    pub(crate) constraint: Option<Constraint>,
    pub(crate) preload_handler: Option<String>,
    pub(crate) preload_params: Option<String>,
    pub(crate) namespace: Option<String>,
    pub(crate) namespace_prefix: Option<String>,
    pub(crate) instance_name: Option<String>,
    pub(crate) extension: Option<Box<dyn NodeExtension>>,
    /// Lazily built reference; cleared whenever this node or an ancestor is
    /// renamed, re-indexed or re-parented. Single-threaded access only.
    pub(crate) ref_cache: RefCell<Option<TreeReference>>,
}

impl TreeNode {
    pub(crate) fn element(name: Option<&str>, multiplicity: i32) -> Self {
        Self {
            name: name.map(str::to_string),
            multiplicity,
            parent: None,
            value: None,
            children: Vec::new(),
            attributes: Vec::new(),
            bind_attributes: Vec::new(),
            flags: NodeFlags::default(),
            data_type: DataType::Null,
            constraint: None,
            preload_handler: None,
            preload_params: None,
            namespace: None,
            namespace_prefix: None,
            instance_name: None,
            extension: None,
            ref_cache: RefCell::new(None),
        }
    }

    pub(crate) fn attribute(namespace: Option<&str>, name: &str) -> Self {
        let mut node = Self::element(Some(name), INDEX_ATTRIBUTE);
        node.namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        node.flags.insert(NodeFlags::ATTRIBUTE);
        node
    }

    /// Copy of every scalar field with no structural links and an empty cache.
    pub(crate) fn detached_copy(&self) -> Self {
        Self {
            name: self.name.clone(),
            multiplicity: self.multiplicity,
            parent: None,
            value: self.value.clone(),
            children: Vec::new(),
            attributes: Vec::new(),
            bind_attributes: Vec::new(),
            flags: self.flags,
            data_type: self.data_type,
            constraint: self.constraint.clone(),
            preload_handler: self.preload_handler.clone(),
            preload_params: self.preload_params.clone(),
            namespace: self.namespace.clone(),
            namespace_prefix: self.namespace_prefix.clone(),
            instance_name: self.instance_name.clone(),
            extension: self.extension.clone(),
            ref_cache: RefCell::new(None),
        }
    }

    /// Compares everything that survives a copy or a snapshot round trip.
    /// `namespace_prefix` is left out since snapshots do not carry it.
    pub(crate) fn same_content(&self, other: &TreeNode) -> bool {
        self.name == other.name
            && self.multiplicity == other.multiplicity
            && self.value == other.value
            && self.flags == other.flags
            && self.data_type == other.data_type
            && self.constraint == other.constraint
            && self.preload_handler == other.preload_handler
            && self.preload_params == other.preload_params
            && self.namespace == other.namespace
            && self.instance_name == other.instance_name
            && match (&self.extension, &other.extension) {
                (None, None) => true,
                (Some(a), Some(b)) => {
                    a.type_tag() == b.type_tag() && a.encode_payload() == b.encode_payload()
                }
                _ => false,
            }
    }

    pub(crate) fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| "<root>".to_string())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn multiplicity(&self) -> i32 {
        self.multiplicity
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn value(&self) -> Option<&AnswerValue> {
        self.value.as_ref()
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn attributes(&self) -> &[NodeId] {
        &self.attributes
    }

    pub fn bind_attributes(&self) -> &[NodeId] {
        &self.bind_attributes
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn is_relevant(&self) -> bool {
        self.flags.is_relevant()
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.is_enabled()
    }

    pub fn is_required(&self) -> bool {
        self.flags.is_required()
    }

    pub fn is_repeatable(&self) -> bool {
        self.flags.is_repeatable()
    }

    pub fn is_attribute(&self) -> bool {
        self.flags.is_attribute()
    }

    pub fn is_template(&self) -> bool {
        self.multiplicity == crate::domain::reference::INDEX_TEMPLATE
    }

    pub fn own_relevant(&self) -> bool {
        self.flags.contains(NodeFlags::RELEVANT)
    }

    pub fn inherited_relevant(&self) -> bool {
        self.flags.contains(NodeFlags::RELEVANT_INHERITED)
    }

    pub fn own_enabled(&self) -> bool {
        self.flags.contains(NodeFlags::ENABLED)
    }

    pub fn inherited_enabled(&self) -> bool {
        self.flags.contains(NodeFlags::ENABLED_INHERITED)
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn constraint(&self) -> Option<&Constraint> {
        self.constraint.as_ref()
    }

    pub fn preload_handler(&self) -> Option<&str> {
        self.preload_handler.as_deref()
    }

    pub fn preload_params(&self) -> Option<&str> {
        self.preload_params.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn namespace_prefix(&self) -> Option<&str> {
        self.namespace_prefix.as_deref()
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance_name.as_deref()
    }

    pub fn extension(&self) -> Option<&dyn NodeExtension> {
        self.extension.as_deref()
    }
}

/// An arena-free copy of a subtree.
///
/// Used to move nodes between instances and as the intermediate form of
/// snapshot decoding.
#[derive(Debug)]
pub struct OwnedNode {
    pub(crate) node: TreeNode,
    pub(crate) attributes: Vec<TreeNode>,
    pub(crate) bind_attributes: Vec<TreeNode>,
    pub(crate) children: Vec<OwnedNode>,
}

impl OwnedNode {
    pub(crate) fn new(node: TreeNode) -> Self {
        Self {
            node,
            attributes: Vec::new(),
            bind_attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn node(&self) -> &TreeNode {
        &self.node
    }

    pub fn children(&self) -> &[OwnedNode] {
        &self.children
    }

    pub(crate) fn reset_multiplicities(&mut self) {
        self.node.multiplicity = DEFAULT_MULTIPLICITY;
        for child in &mut self.children {
            child.reset_multiplicities();
        }
    }
}

impl PartialEq for OwnedNode {
    fn eq(&self, other: &Self) -> bool {
        self.node.same_content(&other.node)
            && self.attributes.len() == other.attributes.len()
            && self
                .attributes
                .iter()
                .zip(&other.attributes)
                .all(|(a, b)| a.same_content(b))
            && self.bind_attributes.len() == other.bind_attributes.len()
            && self
                .bind_attributes
                .iter()
                .zip(&other.bind_attributes)
                .all(|(a, b)| a.same_content(b))
            && self.children == other.children
    }
}
