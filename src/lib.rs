//! formtree: hierarchical form-instance trees
//!
//! The domain layer holds the arena-backed instance tree with its
//! relevant/enabled propagation, reference cache, observer channel and the
//! populate merges. The infrastructure layer adds the binary snapshot codec,
//! the application layer snapshot services, and the CLI sits on top.

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod infrastructure;
pub mod tree_traits;
pub mod util;
