//! Configuration management with layered loading
//!
//! Precedence (lowest to highest):
//! 1. Compiled defaults
//! 2. Global config: `$XDG_CONFIG_HOME/formtree/formtree.toml`
//! 3. Local config: `./.formtree.toml`, or the file given with `--config`
//! 4. Environment variables: `FORMTREE_*` prefix

use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::application::ApplicationError;
use crate::domain::PropagationMode;
use crate::infrastructure::CodecLimits;

/// Relevant/enabled cascade settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PropagationConfig {
    pub mode: PropagationMode,
}

/// Snapshot decoding limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CodecConfig {
    /// Deepest node nesting accepted when decoding
    pub max_depth: usize,
    /// Largest child/attribute/string length accepted when decoding
    pub max_collection_len: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        let limits = CodecLimits::default();
        Self {
            max_depth: limits.max_depth,
            max_collection_len: limits.max_collection_len,
        }
    }
}

impl CodecConfig {
    pub fn limits(&self) -> CodecLimits {
        CodecLimits {
            max_depth: self.max_depth,
            max_collection_len: self.max_collection_len,
        }
    }
}

/// Snapshot file settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotConfig {
    /// File extension of written snapshots
    pub extension: String,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            extension: "ftree".into(),
        }
    }
}

/// Raw settings for intermediate parsing (`None` means "not specified, inherit").
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSettings {
    pub propagation: RawPropagationConfig,
    pub codec: RawCodecConfig,
    pub snapshot: RawSnapshotConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawPropagationConfig {
    pub mode: Option<PropagationMode>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawCodecConfig {
    pub max_depth: Option<usize>,
    pub max_collection_len: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RawSnapshotConfig {
    pub extension: Option<String>,
}

/// Unified configuration for formtree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Settings {
    pub propagation: PropagationConfig,
    pub codec: CodecConfig,
    pub snapshot: SnapshotConfig,
}

/// Get the XDG config directory for formtree.
pub fn global_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "formtree").map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    global_config_dir().map(|dir| dir.join("formtree.toml"))
}

/// Get the path to the local config file in a directory.
pub fn local_config_path(dir: &Path) -> PathBuf {
    dir.join(".formtree.toml")
}

/// Load a TOML file into RawSettings for manual merging.
fn load_raw_settings(path: &Path) -> Result<RawSettings, ApplicationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ApplicationError::Config {
        message: format!("read {}: {}", path.display(), e),
    })?;
    toml::from_str(&content).map_err(|e| ApplicationError::Config {
        message: format!("parse {}: {}", path.display(), e),
    })
}

impl Settings {
    /// Merge overlay config onto self (base): overlay wins where specified.
    fn merge_with(&self, overlay: &RawSettings) -> Self {
        Self {
            propagation: PropagationConfig {
                mode: overlay.propagation.mode.unwrap_or(self.propagation.mode),
            },
            codec: CodecConfig {
                max_depth: overlay.codec.max_depth.unwrap_or(self.codec.max_depth),
                max_collection_len: overlay
                    .codec
                    .max_collection_len
                    .unwrap_or(self.codec.max_collection_len),
            },
            snapshot: SnapshotConfig {
                extension: overlay
                    .snapshot
                    .extension
                    .clone()
                    .unwrap_or_else(|| self.snapshot.extension.clone()),
            },
        }
    }

    /// Load settings with layered precedence.
    ///
    /// # Arguments
    /// * `local` - Explicit local config file; defaults to `./.formtree.toml`
    pub fn load(local: Option<&Path>) -> Result<Self, ApplicationError> {
        // 1. Start with defaults
        let mut current = Self::default();

        // 2. Global config
        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                current = current.merge_with(&load_raw_settings(&global_path)?);
            }
        }

        // 3. Local config (an explicit path must exist)
        match local {
            Some(path) => {
                if !path.exists() {
                    return Err(ApplicationError::Config {
                        message: format!("config file not found: {}", path.display()),
                    });
                }
                current = current.merge_with(&load_raw_settings(path)?);
            }
            None => {
                let path = local_config_path(Path::new("."));
                if path.exists() {
                    current = current.merge_with(&load_raw_settings(&path)?);
                }
            }
        }

        // 4. Environment variables
        current = Self::apply_env_overrides(current)?;
        current.validate()?;
        Ok(current)
    }

    /// Defaults overlaid with a single file; no global config, no environment.
    pub fn load_file(path: &Path) -> Result<Self, ApplicationError> {
        let settings = Self::default().merge_with(&load_raw_settings(path)?);
        settings.validate()?;
        Ok(settings)
    }

    /// Apply FORMTREE_* environment variables as explicit overrides.
    fn apply_env_overrides(mut settings: Self) -> Result<Self, ApplicationError> {
        // Use config crate just for env var parsing
        let config = Config::builder()
            .add_source(Environment::with_prefix("FORMTREE").separator("__"))
            .build()
            .map_err(config_err)?;

        if let Ok(val) = config.get_string("propagation.mode") {
            settings.propagation.mode = val
                .parse()
                .map_err(|message| ApplicationError::Config { message })?;
        }
        if let Ok(val) = config.get::<usize>("codec.max_depth") {
            settings.codec.max_depth = val;
        }
        if let Ok(val) = config.get::<usize>("codec.max_collection_len") {
            settings.codec.max_collection_len = val;
        }
        if let Ok(val) = config.get_string("snapshot.extension") {
            settings.snapshot.extension = val;
        }

        Ok(settings)
    }

    fn validate(&self) -> Result<(), ApplicationError> {
        if self.codec.max_depth == 0 {
            return Err(ApplicationError::Config {
                message: "codec.max_depth must be at least 1".into(),
            });
        }
        if self.snapshot.extension.is_empty() || self.snapshot.extension.contains('.') {
            return Err(ApplicationError::Config {
                message: format!(
                    "snapshot.extension must be a bare extension, got '{}'",
                    self.snapshot.extension
                ),
            });
        }
        Ok(())
    }

    /// Path with the configured snapshot extension.
    pub fn snapshot_path(&self, path: &Path) -> PathBuf {
        path.with_extension(&self.snapshot.extension)
    }

    /// Show the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ApplicationError> {
        toml::to_string_pretty(self).map_err(|e| ApplicationError::Config {
            message: format!("serialize config: {e}"),
        })
    }

    /// Generate a template config file.
    pub fn template() -> String {
        r#"# formtree configuration
#
# Locations (by precedence, lowest to highest):
#   Global: ~/.config/formtree/formtree.toml
#   Local:  ./.formtree.toml (or --config <file>)
#   Env:    FORMTREE_* environment variables, "__" between section and key
#           e.g. FORMTREE_PROPAGATION__MODE=full-walk

[propagation]
# How relevant/enabled flips cascade: "short-circuit" stops below nodes whose
# effective state did not change, "full-walk" visits every descendant.
# mode = "short-circuit"

[codec]
# Deepest node nesting accepted when decoding a snapshot
# max_depth = 256

# Largest child count, attribute count or string length accepted
# max_collection_len = 1000000

[snapshot]
# Extension of written snapshot files
# extension = "ftree"
"#
        .to_string()
    }
}

fn config_err(e: ConfigError) -> ApplicationError {
    ApplicationError::Config {
        message: e.to_string(),
    }
}
