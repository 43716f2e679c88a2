//! Attribute-keyed shortcut for predicate filters over repeat children.
//!
//! Lookups like `row[@id = 'r17']` inside a large repeat would otherwise
//! evaluate the predicate once per child. When a predicate is a plain
//! equality between an attribute and a string literal, the matching children
//! are read from an index built once per (parent, name).

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::domain::instance::FormInstance;
use crate::domain::node::NodeId;
use crate::domain::reference::{TreeReference, INDEX_UNBOUND};

/// A predicate expression as handed over by the expression evaluator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `@attribute = 'literal'` (either operand order).
    AttributeEquals { attribute: String, literal: String },
    /// Anything else; left for the general evaluator.
    Expression(String),
}

fn equality_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(
                r#"^\s*(?:@(?P<a1>[\w.:-]+)\s*=\s*(?:'(?P<l1>[^']*)'|"(?P<d1>[^"]*)")|(?:'(?P<l2>[^']*)'|"(?P<d2>[^"]*)")\s*=\s*@(?P<a2>[\w.:-]+))\s*$"#,
            )
            .ok()
        })
        .as_ref()
}

impl Predicate {
    pub fn attribute_equals(attribute: impl Into<String>, literal: impl Into<String>) -> Self {
        Predicate::AttributeEquals {
            attribute: attribute.into(),
            literal: literal.into(),
        }
    }

    /// Classifies a textual predicate.
    pub fn parse(expression: &str) -> Self {
        let Some(caps) = equality_pattern().and_then(|p| p.captures(expression)) else {
            return Predicate::Expression(expression.to_string());
        };
        let pick = |names: [&str; 2]| {
            names
                .iter()
                .find_map(|n| caps.name(n))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default()
        };
        Predicate::AttributeEquals {
            attribute: pick(["a1", "a2"]),
            literal: ["l1", "d1", "l2", "d2"]
                .iter()
                .find_map(|n| caps.name(n))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::AttributeEquals { attribute, literal } => {
                write!(f, "@{} = '{}'", attribute, literal)
            }
            Predicate::Expression(text) => f.write_str(text),
        }
    }
}

/// attribute name -> attribute value -> matching child references
type AttributeIndex = HashMap<String, HashMap<String, Vec<TreeReference>>>;

/// Per-evaluation cache of attribute indexes, keyed by (parent, child name).
///
/// The cache is only valid while the instance is not mutated; drop it after
/// each evaluation pass.
#[derive(Debug, Default)]
pub struct AttributeHints {
    indexes: HashMap<(NodeId, String), AttributeIndex>,
}

impl AttributeHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }
}

impl FormInstance {
    /// Answers the first `@attr = 'literal'` predicate over the children of
    /// `parent` called `name` from an attribute index, and removes that
    /// predicate from `predicates`.
    ///
    /// Returns `None` (leaving `predicates` untouched) when the multiplicity
    /// is bound, no predicate has the simple form, there are no such
    /// children, or the first child does not carry the attribute.
    pub fn try_batch_child_fetch(
        &self,
        parent: NodeId,
        name: &str,
        multiplicity: i32,
        predicates: &mut Vec<Predicate>,
        hints: &mut AttributeHints,
    ) -> Option<Vec<TreeReference>> {
        if multiplicity != INDEX_UNBOUND {
            return None;
        }
        let position = predicates
            .iter()
            .position(|p| matches!(p, Predicate::AttributeEquals { .. }))?;
        let Predicate::AttributeEquals { attribute, literal } = &predicates[position] else {
            return None;
        };

        let key = (parent, name.to_string());
        if !hints.indexes.contains_key(&key) {
            let children = self.children_named(parent, name);
            let first = *children.first()?;
            let index = self.build_attribute_index(first, &children);
            debug!(
                "try_batch_child_fetch: indexed {} '{}' children on {} attributes",
                children.len(),
                name,
                index.len()
            );
            hints.indexes.insert(key.clone(), index);
        }

        let by_value = hints.indexes.get(&key)?.get(attribute)?;
        let matches = by_value.get(literal).cloned().unwrap_or_default();
        predicates.remove(position);
        Some(matches)
    }

    fn build_attribute_index(&self, first: NodeId, children: &[NodeId]) -> AttributeIndex {
        let mut index = AttributeIndex::new();
        let attribute_names: Vec<String> = self
            .attributes(first)
            .iter()
            .filter_map(|&a| self.node(a).and_then(|n| n.name.clone()))
            .collect();
        for attribute in attribute_names {
            let by_value = index.entry(attribute.clone()).or_default();
            for &child in children {
                let Some(value) = self.attribute_value(child, None, &attribute) else {
                    continue;
                };
                if let Some(reference) = self.get_ref(child) {
                    by_value.entry(value).or_default().push(reference);
                }
            }
        }
        index
    }
}
