//! Domain-level errors (no external dependencies)

use thiserror::Error;

use crate::domain::value::DataType;

/// Mutations that would break the tree's structural invariants.
///
/// These are programmer errors, not user-recoverable conditions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("cannot add child '{child}' to node '{parent}' which holds a value")]
    ChildOnValuedNode { parent: String, child: String },

    #[error("cannot set value on a node with children: {0}")]
    ValueOnParent(String),

    #[error("cannot add child '{0}' with an unbound multiplicity")]
    UnboundChild(String),

    #[error("cannot attach '{child}' with multiplicity {multiplicity}: only positions >= 0 and the template sentinel are structural")]
    InvalidMultiplicity { child: String, multiplicity: i32 },

    #[error("node '{parent}' already has a child '{child}' at multiplicity {multiplicity}")]
    DuplicateChild {
        parent: String,
        child: String,
        multiplicity: i32,
    },

    #[error("node '{0}' is already attached to a parent")]
    AlreadyAttached(String),

    #[error("node '{0}' is an attribute and cannot hold children")]
    AttributeHasNoChildren(String),

    #[error("attribute '{0}' cannot be added as a structural child")]
    AttributeAsChild(String),

    #[error("cannot attach '{0}' beneath its own descendant")]
    Cycle(String),
}

/// Failure to turn incoming answer data into the declared type of a node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoercionError {
    #[error("data type {0:?} is not supported inside an itemset")]
    UnsupportedType(DataType),

    #[error("cannot read '{text}' as {data_type:?}: {reason}")]
    Unparseable {
        text: String,
        data_type: DataType,
        reason: String,
    },
}

/// Errors raised by tree mutations and merge algorithms.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("{0}")]
    Structural(#[from] StructuralError),

    #[error("{0}")]
    TypeCoercion(#[from] CoercionError),

    #[error("sanity check failed: {message}")]
    Consistency { message: String },

    #[error("node handle is stale or belongs to another instance")]
    NodeNotFound,
}

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// A textual reference that could not be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid reference '{input}': {reason}")]
pub struct ReferenceParseError {
    pub input: String,
    pub reason: String,
}
