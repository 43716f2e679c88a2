//! Hydrating a structural template with saved or external answer data.
//!
//! Both algorithms walk the live tree (`self`) and the incoming tree in
//! parallel. The live tree's shape is authoritative: child ordering and
//! repeat templates come from it, answers and repeat counts from the data.

use tracing::{debug, instrument, trace};

use crate::domain::error::{CoercionError, TreeError, TreeResult};
use crate::domain::instance::FormInstance;
use crate::domain::node::{NodeId, OwnedNode};
use crate::domain::reference::TreeReference;
use crate::domain::value::{AnswerValue, DataType};

/// Converts answer text into a typed value for a node of a declared type.
///
/// `Ok(None)` means the text denotes no answer (e.g. blank input for a
/// numeric bind).
pub trait AnswerResolver {
    fn resolve(
        &self,
        text: &str,
        data_type: DataType,
        reference: Option<&TreeReference>,
    ) -> Result<Option<AnswerValue>, CoercionError>;
}

/// Source of repeat templates, looked up by reference.
pub trait TemplateRegistry {
    /// A detached copy of the repeat template addressed by `reference`,
    /// nested templates excluded.
    fn repeat_template(&self, reference: &TreeReference) -> Option<OwnedNode>;
}

impl TemplateRegistry for FormInstance {
    fn repeat_template(&self, reference: &TreeReference) -> Option<OwnedNode> {
        let template = self.template_for(reference)?;
        self.to_owned_subtree(template, false)
    }
}

impl FormInstance {
    /// Fills `target` from `source` of `incoming`.
    ///
    /// Default repeat instances of `target` are dropped and one copy of each
    /// repeat template is inserted per incoming instance. Non-repeat children
    /// without incoming data become non-relevant. Leaf values are copied for
    /// text/untyped binds and resolved from text otherwise. Finally every
    /// incoming attribute is copied over.
    ///
    /// Fails with [`TreeError::Consistency`] when the child names of `target`
    /// cannot be brought back into their original order, e.g. a repeat
    /// without a template or two non-repeat siblings sharing a name.
    #[instrument(level = "debug", skip(self, incoming, resolver))]
    pub fn populate(
        &mut self,
        target: NodeId,
        incoming: &FormInstance,
        source: NodeId,
        resolver: &dyn AnswerResolver,
    ) -> TreeResult<()> {
        self.get(target)?;
        incoming.get(source)?;
        self.populate_node(target, incoming, source, resolver)?;
        debug!("populate: done, instance holds {} nodes", self.len());
        Ok(())
    }

    /// Populates the whole instance from another instance, root to root.
    pub fn populate_from(&mut self, incoming: &FormInstance, resolver: &dyn AnswerResolver) -> TreeResult<()> {
        let (target, source) = (self.root(), incoming.root());
        self.populate(target, incoming, source, resolver)
    }

    fn populate_node(
        &mut self,
        target: NodeId,
        incoming: &FormInstance,
        source: NodeId,
        resolver: &dyn AnswerResolver,
    ) -> TreeResult<()> {
        if self.is_leaf(target) {
            let value = incoming.get(source)?.value.clone();
            let value = match value {
                None => None,
                Some(value) => self.typed_for_populate(target, value, resolver)?,
            };
            self.set_value(target, value)?;
        } else {
            let names = self.child_names(target);
            self.drop_default_repeats(target)?;
            self.restore_order(target, &names)?;

            let mut i = 0;
            while let Some(child) = self.child_at(target, i) {
                let (name, repeatable) = {
                    let node = self.get(child)?;
                    (node.name.clone().unwrap_or_default(), node.is_repeatable())
                };
                let incoming_children = incoming.children_named(source, &name);
                if repeatable {
                    for (k, &row) in incoming_children.iter().enumerate() {
                        let copy = self.deep_copy(child, true)?;
                        self.set_multiplicity(copy, k as i32)?;
                        self.insert_child_at(target, i + k + 1, copy)?;
                        self.populate_node(copy, incoming, row, resolver)?;
                    }
                    trace!("populate: {} instances of '{}'", incoming_children.len(), name);
                    i += incoming_children.len();
                } else if let Some(&first) = incoming_children.first() {
                    self.populate_node(child, incoming, first, resolver)?;
                } else {
                    self.set_relevant(child, false, false)?;
                }
                i += 1;
            }
        }
        self.copy_attributes(target, incoming, source)
    }

    fn typed_for_populate(
        &self,
        target: NodeId,
        value: AnswerValue,
        resolver: &dyn AnswerResolver,
    ) -> TreeResult<Option<AnswerValue>> {
        let data_type = self.get(target)?.data_type;
        if data_type.is_textual() || data_type.value_kind() == Some(value.kind()) {
            return Ok(Some(value));
        }
        let reference = self.get_ref(target);
        Ok(resolver.resolve(&value.to_xml_text(), data_type, reference.as_ref())?)
    }

    /// Fills a destination template from an itemset row.
    ///
    /// Leaves take the incoming value as-is when it already has the variant
    /// the declared type calls for (selections are always re-typed);
    /// otherwise the value goes through its text form and `resolver`.
    /// Repeat templates come from `registry`, falling back to the local
    /// template when the registry has none. Incoming rows that lack a
    /// non-repeat child leave that child untouched.
    ///
    /// Default repeat instances already in `target` are removed first:
    /// the copies are numbered from 0, so a kept default instance would
    /// collide with the first copy's multiplicity.
    #[instrument(level = "debug", skip(self, incoming, registry, resolver))]
    pub fn populate_template(
        &mut self,
        target: NodeId,
        incoming: &FormInstance,
        source: NodeId,
        registry: &dyn TemplateRegistry,
        resolver: &dyn AnswerResolver,
    ) -> TreeResult<()> {
        self.get(target)?;
        incoming.get(source)?;
        self.populate_template_node(target, incoming, source, registry, resolver)
    }

    fn populate_template_node(
        &mut self,
        target: NodeId,
        incoming: &FormInstance,
        source: NodeId,
        registry: &dyn TemplateRegistry,
        resolver: &dyn AnswerResolver,
    ) -> TreeResult<()> {
        if self.is_leaf(target) {
            let value = match incoming.get(source)?.value.clone() {
                None => None,
                Some(value) => self.typed_for_template(target, value, resolver)?,
            };
            return self.set_value(target, value);
        }

        self.drop_default_repeats(target)?;
        let mut i = 0;
        while let Some(child) = self.child_at(target, i) {
            let (name, repeatable) = {
                let node = self.get(child)?;
                (node.name.clone().unwrap_or_default(), node.is_repeatable())
            };
            let incoming_children = incoming.children_named(source, &name);
            if repeatable {
                for (k, &row) in incoming_children.iter().enumerate() {
                    let copy = self.repeat_copy(child, registry)?;
                    self.set_multiplicity(copy, k as i32)?;
                    self.insert_child_at(target, i + k + 1, copy)?;
                    self.populate_template_node(copy, incoming, row, registry, resolver)?;
                }
                i += incoming_children.len();
            } else if let Some(&first) = incoming_children.first() {
                self.populate_template_node(child, incoming, first, registry, resolver)?;
            }
            i += 1;
        }
        Ok(())
    }

    fn typed_for_template(
        &self,
        target: NodeId,
        value: AnswerValue,
        resolver: &dyn AnswerResolver,
    ) -> TreeResult<Option<AnswerValue>> {
        let data_type = self.get(target)?.data_type;
        let kind = data_type
            .value_kind()
            .ok_or(CoercionError::UnsupportedType(data_type))?;
        if kind == value.kind() && !value.is_selection() {
            return Ok(Some(value));
        }
        let reference = self.get_ref(target);
        Ok(resolver.resolve(&value.to_xml_text(), data_type, reference.as_ref())?)
    }

    fn repeat_copy(&mut self, local_template: NodeId, registry: &dyn TemplateRegistry) -> TreeResult<NodeId> {
        let from_registry = self
            .get_ref(local_template)
            .and_then(|reference| registry.repeat_template(&reference));
        match from_registry {
            Some(owned) => Ok(self.adopt(owned)),
            None => self.deep_copy(local_template, false),
        }
    }

    /// Removes repeat instances, keeping templates.
    fn drop_default_repeats(&mut self, parent: NodeId) -> TreeResult<()> {
        let defaults: Vec<NodeId> = self
            .children(parent)
            .iter()
            .copied()
            .filter(|&c| self.node(c).is_some_and(|n| n.is_repeatable() && !n.is_template()))
            .collect();
        for child in defaults {
            self.remove_child(parent, child);
        }
        Ok(())
    }

    /// Moves children back into the recorded name order and checks that
    /// exactly one child per recorded name is left.
    fn restore_order(&mut self, parent: NodeId, names: &[String]) -> TreeResult<()> {
        for (i, name) in names.iter().enumerate() {
            let Some(child) = self
                .child(parent, name, 0)
                .or_else(|| self.template_child(parent, name))
            else {
                continue;
            };
            if let Some(j) = self.children(parent).iter().position(|&c| c == child) {
                if j != i && i < self.child_count(parent) {
                    self.move_child(parent, j, i)?;
                }
            }
        }

        let actual: Vec<String> = self
            .children(parent)
            .iter()
            .filter_map(|&c| self.node(c).and_then(|n| n.name.clone()))
            .collect();
        if actual != names {
            let label = self.get(parent)?.label();
            return Err(TreeError::Consistency {
                message: format!(
                    "children of '{}' are [{}] but the template declares [{}]",
                    label,
                    actual.join(", "),
                    names.join(", ")
                ),
            });
        }
        Ok(())
    }

    fn copy_attributes(&mut self, target: NodeId, incoming: &FormInstance, source: NodeId) -> TreeResult<()> {
        let attributes: Vec<(Option<String>, String, Option<String>)> = incoming
            .attributes(source)
            .iter()
            .filter_map(|&a| incoming.node(a))
            .filter_map(|a| {
                let name = a.name.clone()?;
                Some((
                    a.namespace.clone(),
                    name,
                    a.value.as_ref().map(AnswerValue::to_xml_text),
                ))
            })
            .collect();
        for (namespace, name, value) in attributes {
            self.set_attribute(
                target,
                Some(namespace.as_deref().unwrap_or("")),
                &name,
                value.as_deref(),
            )?;
        }
        Ok(())
    }
}
