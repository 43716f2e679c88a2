//! Binary snapshot codec.
//!
//! Layout of one node, depth first:
//!
//! 1. name (`""` for the nameless root), multiplicity, flags word, nullable
//!    tagged value
//! 2. children: presence flag, count, then one child entry per child
//! 3. data type code, instance name, constraint, preload handler, preload
//!    params, namespace (all nullable); the namespace prefix is not stored
//! 4. bind attributes, then XML attributes (name, namespace, value each)
//!
//! A child entry starts with a boolean: `true` means a plain node follows,
//! `false` means an extension tag and payload precede the node body. A
//! snapshot file is the magic bytes, the format version, and the instance
//! root written as a child entry.

pub mod error;
pub mod registry;
pub mod wire;

use std::collections::HashSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::{debug, instrument};

use crate::domain::{
    is_structural_multiplicity, AnswerValue, Constraint, DataType, FormInstance, GeoPoint,
    NodeFlags, OwnedNode, Selection, TreeNode,
};

pub use error::{CodecError, CodecResult};
pub use registry::{ExtensionDecoder, ExtensionRegistry};
pub use wire::{CodecLimits, WireReader, WireWriter};

pub const MAGIC: &[u8; 4] = b"FTRE";
pub const FORMAT_VERSION: i64 = 1;

mod tag {
    pub const TEXT: i64 = 0;
    pub const INTEGER: i64 = 1;
    pub const LONG: i64 = 2;
    pub const DECIMAL: i64 = 3;
    pub const BOOLEAN: i64 = 4;
    pub const DATE: i64 = 5;
    pub const TIME: i64 = 6;
    pub const DATE_TIME: i64 = 7;
    pub const SELECT_ONE: i64 = 8;
    pub const SELECT_MULTI: i64 = 9;
    pub const GEO_POINT: i64 = 10;
    pub const UNCAST: i64 = 11;
}

/// Encodes and decodes instance snapshots.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCodec {
    registry: ExtensionRegistry,
    limits: CodecLimits,
}

impl SnapshotCodec {
    pub fn new(registry: ExtensionRegistry, limits: CodecLimits) -> Self {
        Self { registry, limits }
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ExtensionRegistry {
        &mut self.registry
    }

    pub fn limits(&self) -> CodecLimits {
        self.limits
    }

    /// Whole-instance snapshot with header.
    #[instrument(level = "debug", skip_all)]
    pub fn encode_instance(&self, instance: &FormInstance) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_raw(MAGIC);
        writer.write_numeric(FORMAT_VERSION);
        if let Some(root) = instance.to_owned_subtree(instance.root(), true) {
            write_child_entry(&mut writer, &root);
        }
        debug!("encode_instance: {} nodes -> {} bytes", instance.len(), writer.len());
        writer.into_bytes()
    }

    #[instrument(level = "debug", skip_all)]
    pub fn decode_instance(&self, bytes: &[u8]) -> CodecResult<FormInstance> {
        let mut reader = WireReader::new(bytes, self.limits);
        if reader.read_raw(MAGIC.len()).map_err(|_| CodecError::BadMagic)? != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = reader.read_numeric()?;
        if version != FORMAT_VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let root = self.read_child_entry(&mut reader)?;
        if root.node.name.is_some() && !is_structural_multiplicity(root.node.multiplicity) {
            return Err(CodecError::invalid("multiplicity", root.node.multiplicity));
        }
        if reader.remaining() > 0 {
            return Err(CodecError::TrailingBytes(reader.remaining()));
        }
        let instance = FormInstance::from_owned(root);
        debug!("decode_instance: {} bytes -> {} nodes", bytes.len(), instance.len());
        Ok(instance)
    }

    /// Bare node body of a detached subtree, no header.
    pub fn encode_node(&self, node: &OwnedNode) -> Vec<u8> {
        let mut writer = WireWriter::new();
        write_node(&mut writer, node);
        writer.into_bytes()
    }

    pub fn decode_node(&self, bytes: &[u8]) -> CodecResult<OwnedNode> {
        let mut reader = WireReader::new(bytes, self.limits);
        let node = self.read_node(&mut reader)?;
        if reader.remaining() > 0 {
            return Err(CodecError::TrailingBytes(reader.remaining()));
        }
        Ok(node)
    }

    fn read_child_entry(&self, reader: &mut WireReader<'_>) -> CodecResult<OwnedNode> {
        if reader.read_bool()? {
            return self.read_node(reader);
        }
        let type_tag = reader.read_string()?;
        let payload = reader.read_bytes()?;
        let extension = self.registry.decode(&type_tag, &payload)?;
        let mut node = self.read_node(reader)?;
        node.node.extension = Some(extension);
        Ok(node)
    }

    fn read_node(&self, reader: &mut WireReader<'_>) -> CodecResult<OwnedNode> {
        reader.descend()?;
        let name = reader.read_string()?;
        let multiplicity = reader.read_i32("multiplicity")?;
        let bits = reader.read_numeric()?;
        let flags = u32::try_from(bits)
            .ok()
            .and_then(NodeFlags::from_bits)
            .ok_or_else(|| CodecError::invalid("flags", bits))?;
        let value = read_nullable_value(reader)?;

        let mut children = Vec::new();
        if reader.read_bool()? {
            let count = reader.read_len()?;
            children.reserve(count.min(1024));
            for _ in 0..count {
                children.push(self.read_child_entry(reader)?);
            }
        }
        check_shape(&name, value.is_some(), &children)?;

        let code = reader.read_i32("data type")?;
        let data_type =
            DataType::from_code(code).ok_or_else(|| CodecError::invalid("data type", code))?;
        let instance_name = reader.read_nullable_string()?;
        let constraint = if reader.read_bool()? {
            let expression = reader.read_string()?;
            let message = reader.read_nullable_string()?;
            Some(Constraint {
                expression,
                message,
            })
        } else {
            None
        };
        let preload_handler = reader.read_nullable_string()?;
        let preload_params = reader.read_nullable_string()?;
        let namespace = reader.read_nullable_string()?;

        let mut node = TreeNode::element((!name.is_empty()).then_some(name.as_str()), multiplicity);
        node.flags = flags;
        node.value = value;
        node.data_type = data_type;
        node.instance_name = instance_name;
        node.constraint = constraint;
        node.preload_handler = preload_handler;
        node.preload_params = preload_params;
        node.namespace = namespace;

        let bind_attributes = read_attributes(reader, &node, false)?;
        let attributes = read_attributes(reader, &node, true)?;
        reader.ascend();

        Ok(OwnedNode {
            node,
            attributes,
            bind_attributes,
            children,
        })
    }
}

/// Rejects bodies no sequence of tree mutations could have produced: a value
/// next to children, attribute or sentinel children, and repeated
/// (name, multiplicity) siblings.
fn check_shape(name: &str, has_value: bool, children: &[OwnedNode]) -> CodecResult<()> {
    if has_value && !children.is_empty() {
        return Err(CodecError::invalid("node", format!("'{}' holds a value and children", name)));
    }
    let mut seen = HashSet::new();
    for child in children {
        let node = &child.node;
        if node.is_attribute() {
            return Err(CodecError::invalid("child", format!("attribute '{}'", node.label())));
        }
        if !is_structural_multiplicity(node.multiplicity) {
            return Err(CodecError::invalid("multiplicity", node.multiplicity));
        }
        if let Some(child_name) = node.name.as_deref() {
            if !seen.insert((child_name, node.multiplicity)) {
                return Err(CodecError::invalid(
                    "child",
                    format!("'{}' repeats {} at multiplicity {}", name, child_name, node.multiplicity),
                ));
            }
        }
    }
    Ok(())
}

fn write_child_entry(writer: &mut WireWriter, node: &OwnedNode) {
    match &node.node.extension {
        None => writer.write_bool(true),
        Some(extension) => {
            writer.write_bool(false);
            writer.write_string(extension.type_tag());
            writer.write_bytes(&extension.encode_payload());
        }
    }
    write_node(writer, node);
}

fn write_node(writer: &mut WireWriter, owned: &OwnedNode) {
    let node = &owned.node;
    writer.write_string(node.name.as_deref().unwrap_or(""));
    writer.write_numeric(i64::from(node.multiplicity));
    writer.write_numeric(i64::from(node.flags.bits()));
    write_nullable_value(writer, node.value.as_ref());

    writer.write_bool(!owned.children.is_empty());
    if !owned.children.is_empty() {
        writer.write_len(owned.children.len());
        for child in &owned.children {
            write_child_entry(writer, child);
        }
    }

    writer.write_numeric(i64::from(node.data_type.code()));
    writer.write_nullable_string(node.instance_name.as_deref());
    writer.write_bool(node.constraint.is_some());
    if let Some(constraint) = &node.constraint {
        writer.write_string(&constraint.expression);
        writer.write_nullable_string(constraint.message.as_deref());
    }
    writer.write_nullable_string(node.preload_handler.as_deref());
    writer.write_nullable_string(node.preload_params.as_deref());
    writer.write_nullable_string(node.namespace.as_deref());

    write_attributes(writer, &owned.bind_attributes);
    write_attributes(writer, &owned.attributes);
}

fn write_attributes(writer: &mut WireWriter, attributes: &[TreeNode]) {
    writer.write_len(attributes.len());
    for attribute in attributes {
        writer.write_string(attribute.name.as_deref().unwrap_or(""));
        writer.write_nullable_string(attribute.namespace.as_deref());
        write_nullable_value(writer, attribute.value.as_ref());
    }
}

/// Attribute flags are not stored: XML attributes inherit the owner's
/// relevance, bind attributes keep the defaults.
fn read_attributes(reader: &mut WireReader<'_>, owner: &TreeNode, xml: bool) -> CodecResult<Vec<TreeNode>> {
    let count = reader.read_len()?;
    let mut attributes = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        let name = reader.read_string()?;
        if name.is_empty() {
            return Err(CodecError::invalid("attribute name", "<empty>"));
        }
        let namespace = reader.read_nullable_string()?;
        let mut attribute = TreeNode::attribute(namespace.as_deref(), &name);
        attribute.value = read_nullable_value(reader)?;
        attribute.instance_name = owner.instance_name.clone();
        if xml {
            attribute
                .flags
                .set(NodeFlags::RELEVANT_INHERITED, owner.flags.is_relevant());
        }
        attributes.push(attribute);
    }
    Ok(attributes)
}

fn write_nullable_value(writer: &mut WireWriter, value: Option<&AnswerValue>) {
    writer.write_bool(value.is_some());
    let Some(value) = value else {
        return;
    };
    match value {
        AnswerValue::Text(s) => {
            writer.write_numeric(tag::TEXT);
            writer.write_string(s);
        }
        AnswerValue::Integer(n) => {
            writer.write_numeric(tag::INTEGER);
            writer.write_numeric(i64::from(*n));
        }
        AnswerValue::Long(n) => {
            writer.write_numeric(tag::LONG);
            writer.write_numeric(*n);
        }
        AnswerValue::Decimal(d) => {
            writer.write_numeric(tag::DECIMAL);
            writer.write_f64(*d);
        }
        AnswerValue::Boolean(b) => {
            writer.write_numeric(tag::BOOLEAN);
            writer.write_bool(*b);
        }
        AnswerValue::Date(d) => {
            writer.write_numeric(tag::DATE);
            write_date(writer, d);
        }
        AnswerValue::Time(t) => {
            writer.write_numeric(tag::TIME);
            write_time(writer, t);
        }
        AnswerValue::DateTime(dt) => {
            writer.write_numeric(tag::DATE_TIME);
            write_date(writer, &dt.date());
            write_time(writer, &dt.time());
        }
        AnswerValue::SelectOne(selection) => {
            writer.write_numeric(tag::SELECT_ONE);
            write_selection(writer, selection);
        }
        AnswerValue::SelectMulti(items) => {
            writer.write_numeric(tag::SELECT_MULTI);
            writer.write_len(items.len());
            for selection in items {
                write_selection(writer, selection);
            }
        }
        AnswerValue::GeoPoint(p) => {
            writer.write_numeric(tag::GEO_POINT);
            for coordinate in [p.latitude, p.longitude, p.altitude, p.accuracy] {
                writer.write_f64(coordinate);
            }
        }
        AnswerValue::Uncast(s) => {
            writer.write_numeric(tag::UNCAST);
            writer.write_string(s);
        }
    }
}

fn read_nullable_value(reader: &mut WireReader<'_>) -> CodecResult<Option<AnswerValue>> {
    if !reader.read_bool()? {
        return Ok(None);
    }
    let value = match reader.read_numeric()? {
        tag::TEXT => AnswerValue::Text(reader.read_string()?),
        tag::INTEGER => AnswerValue::Integer(reader.read_i32("integer value")?),
        tag::LONG => AnswerValue::Long(reader.read_numeric()?),
        tag::DECIMAL => AnswerValue::Decimal(reader.read_f64()?),
        tag::BOOLEAN => AnswerValue::Boolean(reader.read_bool()?),
        tag::DATE => AnswerValue::Date(read_date(reader)?),
        tag::TIME => AnswerValue::Time(read_time(reader)?),
        tag::DATE_TIME => {
            let date = read_date(reader)?;
            let time = read_time(reader)?;
            AnswerValue::DateTime(NaiveDateTime::new(date, time))
        }
        tag::SELECT_ONE => AnswerValue::SelectOne(read_selection(reader)?),
        tag::SELECT_MULTI => {
            let count = reader.read_len()?;
            let mut items = Vec::with_capacity(count.min(64));
            for _ in 0..count {
                items.push(read_selection(reader)?);
            }
            AnswerValue::SelectMulti(items)
        }
        tag::GEO_POINT => AnswerValue::GeoPoint(GeoPoint {
            latitude: reader.read_f64()?,
            longitude: reader.read_f64()?,
            altitude: reader.read_f64()?,
            accuracy: reader.read_f64()?,
        }),
        tag::UNCAST => AnswerValue::Uncast(reader.read_string()?),
        unknown => return Err(CodecError::UnknownValueTag(unknown)),
    };
    Ok(Some(value))
}

fn write_date(writer: &mut WireWriter, date: &NaiveDate) {
    writer.write_numeric(i64::from(date.num_days_from_ce()));
}

fn read_date(reader: &mut WireReader<'_>) -> CodecResult<NaiveDate> {
    let days = reader.read_i32("date")?;
    NaiveDate::from_num_days_from_ce_opt(days).ok_or_else(|| CodecError::invalid("date", days))
}

fn write_time(writer: &mut WireWriter, time: &NaiveTime) {
    writer.write_numeric(i64::from(time.num_seconds_from_midnight()));
    writer.write_numeric(i64::from(time.nanosecond()));
}

fn read_time(reader: &mut WireReader<'_>) -> CodecResult<NaiveTime> {
    let seconds = reader.read_numeric()?;
    let nanos = reader.read_numeric()?;
    u32::try_from(seconds)
        .ok()
        .zip(u32::try_from(nanos).ok())
        .and_then(|(s, n)| NaiveTime::from_num_seconds_from_midnight_opt(s, n))
        .ok_or_else(|| CodecError::invalid("time", format!("{}s {}ns", seconds, nanos)))
}

fn write_selection(writer: &mut WireWriter, selection: &Selection) {
    writer.write_string(&selection.value);
    writer.write_bool(selection.index.is_some());
    if let Some(index) = selection.index {
        writer.write_numeric(i64::from(index));
    }
}

fn read_selection(reader: &mut WireReader<'_>) -> CodecResult<Selection> {
    let value = reader.read_string()?;
    let index = if reader.read_bool()? {
        Some(reader.read_i32("selection index")?)
    } else {
        None
    };
    Ok(Selection { value, index })
}
