//! Domain layer: the form-instance tree and its algorithms
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod error;
pub mod events;
pub mod flags;
pub mod instance;
pub mod merge;
pub mod node;
pub mod predicate;
pub mod propagation;
pub mod reference;
pub mod value;

pub use error::{CoercionError, ReferenceParseError, StructuralError, TreeError, TreeResult};
pub use events::{ChangeEvent, ChangeKind, EventChannel, SubscriptionId};
pub use flags::NodeFlags;
pub use instance::{FormInstance, PostOrderIterator, SubtreeIterator, TreeVisitor};
pub use merge::{AnswerResolver, TemplateRegistry};
pub use node::{NodeExtension, NodeId, OwnedNode, TreeNode};
pub use predicate::{AttributeHints, Predicate};
pub use propagation::PropagationMode;
pub use reference::{
    is_structural_multiplicity, ReferenceContext, Step, TreeReference, DEFAULT_MULTIPLICITY,
    INDEX_ATTRIBUTE, INDEX_TEMPLATE, INDEX_UNBOUND, REF_ABSOLUTE,
};
pub use value::{AnswerValue, Constraint, DataType, GeoPoint, Selection, ValueKind};
