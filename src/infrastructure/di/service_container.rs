//! Service container for dependency injection
//!
//! Wires up all services with their dependencies.

use std::sync::Arc;

use crate::application::services::SnapshotService;
use crate::config::Settings;
use crate::infrastructure::codec::{ExtensionRegistry, SnapshotCodec};
use crate::infrastructure::traits::{FileSystem, RealFileSystem};

/// Container holding all application services.
pub struct ServiceContainer {
    /// Application settings
    pub settings: Arc<Settings>,

    /// Filesystem abstraction
    pub fs: Arc<dyn FileSystem>,

    pub snapshots: SnapshotService,
}

impl ServiceContainer {
    /// Create a new service container with real implementations.
    pub fn new(settings: Settings) -> Self {
        Self::with_deps(settings, Arc::new(RealFileSystem), ExtensionRegistry::new())
    }

    /// Create a service container with custom dependencies (for testing).
    pub fn with_deps(
        settings: Settings,
        fs: Arc<dyn FileSystem>,
        registry: ExtensionRegistry,
    ) -> Self {
        let settings = Arc::new(settings);
        let codec = SnapshotCodec::new(registry, settings.codec.limits());
        let snapshots = SnapshotService::new(fs.clone(), codec, settings.propagation.mode);

        Self {
            settings,
            fs,
            snapshots,
        }
    }
}
