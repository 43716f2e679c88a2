//! Snapshot service
//!
//! Saves and loads instance snapshots, restores saved answers into a fresh
//! template, and verifies that a snapshot re-encodes byte for byte.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::application::{ApplicationError, ApplicationResult, IoResultExt, XmlAnswerResolver};
use crate::domain::{AnswerResolver, FormInstance, PropagationMode};
use crate::infrastructure::traits::FileSystem;
use crate::infrastructure::SnapshotCodec;

/// Size facts about a verified snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSummary {
    pub path: PathBuf,
    pub bytes: usize,
    pub nodes: usize,
}

/// Service for reading and writing instance snapshots.
pub struct SnapshotService {
    fs: Arc<dyn FileSystem>,
    codec: SnapshotCodec,
    propagation: PropagationMode,
    resolver: Box<dyn AnswerResolver + Send + Sync>,
}

impl SnapshotService {
    /// Create a new snapshot service using the XML text resolver.
    pub fn new(fs: Arc<dyn FileSystem>, codec: SnapshotCodec, propagation: PropagationMode) -> Self {
        Self {
            fs,
            codec,
            propagation,
            resolver: Box::new(XmlAnswerResolver),
        }
    }

    /// Replace the resolver used by [`restore`](Self::restore).
    pub fn with_resolver(mut self, resolver: Box<dyn AnswerResolver + Send + Sync>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn codec(&self) -> &SnapshotCodec {
        &self.codec
    }

    /// Write an instance snapshot, creating parent directories.
    ///
    /// Returns the number of bytes written.
    pub fn save(&self, instance: &FormInstance, path: &Path) -> ApplicationResult<usize> {
        let bytes = self.codec.encode_instance(instance);
        self.fs
            .ensure_parent(path)
            .with_path_context("create parent directory", path)?;
        self.fs
            .write(path, &bytes)
            .with_path_context("write snapshot", path)?;
        info!("saved {} bytes to {}", bytes.len(), path.display());
        Ok(bytes.len())
    }

    /// Read and decode a snapshot.
    pub fn load(&self, path: &Path) -> ApplicationResult<FormInstance> {
        debug!("load: path={}", path.display());
        let bytes = self.read(path)?;
        let mut instance = self.codec.decode_instance(&bytes)?;
        instance.set_propagation(self.propagation);
        instance.log_summary();
        Ok(instance)
    }

    /// Load a template snapshot and populate it with the answers of a data
    /// snapshot.
    pub fn restore(&self, template: &Path, data: &Path) -> ApplicationResult<FormInstance> {
        debug!(
            "restore: template={} data={}",
            template.display(),
            data.display()
        );
        let mut instance = self.load(template)?;
        let saved = self.load(data)?;
        instance.populate_from(&saved, self.resolver.as_ref())?;
        info!(
            "restored {} into {} ({} nodes)",
            data.display(),
            template.display(),
            instance.len()
        );
        Ok(instance)
    }

    /// Decode, re-encode and compare against the original bytes.
    pub fn verify(&self, path: &Path) -> ApplicationResult<SnapshotSummary> {
        let original = self.read(path)?;
        let instance = self.codec.decode_instance(&original)?;
        let encoded = self.codec.encode_instance(&instance);
        if encoded != original {
            let offset = original
                .iter()
                .zip(&encoded)
                .position(|(a, b)| a != b)
                .unwrap_or_else(|| original.len().min(encoded.len()));
            return Err(ApplicationError::VerifyMismatch {
                path: path.to_path_buf(),
                offset,
            });
        }
        Ok(SnapshotSummary {
            path: path.to_path_buf(),
            bytes: original.len(),
            nodes: instance.len(),
        })
    }

    fn read(&self, path: &Path) -> ApplicationResult<Vec<u8>> {
        if !self.fs.is_file(path) {
            return Err(ApplicationError::OperationFailed {
                context: format!("read snapshot: {}", path.display()),
                source: "file not found".into(),
            });
        }
        self.fs.read(path).with_path_context("read snapshot", path)
    }
}
