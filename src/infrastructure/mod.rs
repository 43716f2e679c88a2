//! Infrastructure layer: snapshot codec, I/O implementations and DI container
//!
//! This layer implements I/O boundary traits and wires up services.

pub mod codec;
pub mod di;
pub mod error;
pub mod traits;

pub use codec::{CodecError, CodecLimits, ExtensionRegistry, SnapshotCodec};
pub use error::{InfraError, InfraResult};
