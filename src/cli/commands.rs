//! Command dispatch: loads settings, wires services and renders results.

use std::io;
use std::path::{Path, PathBuf};

use clap::CommandFactory;
use clap_complete::{generate, Shell};
use tracing::{debug, instrument};

use crate::cli::args::{Cli, Commands, ConfigCommands};
use crate::cli::error::{CliError, CliResult};
use crate::cli::output;
use crate::config::{global_config_path, local_config_path, Settings};
use crate::domain::FormInstance;
use crate::infrastructure::di::ServiceContainer;
use crate::infrastructure::InfraError;
use crate::tree_traits::{state_markers, TreeNodeConvert};

pub fn execute_command(cli: &Cli) -> CliResult<()> {
    let Some(command) = &cli.command else {
        return Err(CliError::Usage(
            "no command given, see 'formtree --help'".into(),
        ));
    };

    // Completions must work without a readable config
    if let Commands::Completion { shell } = command {
        print_completions(*shell);
        return Ok(());
    }

    let container = build_container(cli)?;
    match command {
        Commands::Show { snapshot } => cmd_show(&container, snapshot),
        Commands::Refs { snapshot, leaves } => cmd_refs(&container, snapshot, *leaves),
        Commands::Restore {
            template,
            data,
            output,
        } => cmd_restore(&container, template, data, output.as_deref()),
        Commands::Verify { snapshots } => cmd_verify(&container, snapshots),
        Commands::Config { command } => cmd_config(&container, command, cli.config.as_deref()),
        Commands::Completion { .. } => Ok(()),
    }
}

fn build_container(cli: &Cli) -> CliResult<ServiceContainer> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(mode) = cli.propagation {
        settings.propagation.mode = mode;
    }
    debug!("settings: {:?}", settings);
    Ok(ServiceContainer::new(settings))
}

fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}

#[instrument(skip(container))]
fn cmd_show(container: &ServiceContainer, snapshot: &Path) -> CliResult<()> {
    let instance = container.snapshots.load(snapshot)?;
    output::header(&snapshot.display());
    output::info(&instance.to_tree_string(instance.root()));
    Ok(())
}

#[instrument(skip(container))]
fn cmd_refs(container: &ServiceContainer, snapshot: &Path, leaves: bool) -> CliResult<()> {
    let instance = container.snapshots.load(snapshot)?;
    for line in reference_lines(&instance, leaves) {
        output::info(&line);
    }
    Ok(())
}

/// One line per node (attributes included): reference, then dimmed state markers.
fn reference_lines(instance: &FormInstance, leaves_only: bool) -> Vec<String> {
    let mut lines = Vec::new();
    for (id, node) in instance.iter_subtree(instance.root()) {
        let targets = std::iter::once(id).chain(node.attributes().iter().copied());
        for target in targets {
            let Some(node) = instance.node(target) else {
                continue;
            };
            if leaves_only && !node.is_leaf() {
                continue;
            }
            let Some(reference) = instance.get_ref(target) else {
                continue;
            };
            let markers = state_markers(node);
            if markers.is_empty() {
                lines.push(reference.to_string());
            } else {
                lines.push(format!("{}  {}", reference, output::dim(&markers)));
            }
        }
    }
    lines
}

#[instrument(skip(container))]
fn cmd_restore(
    container: &ServiceContainer,
    template: &Path,
    data: &Path,
    out: Option<&Path>,
) -> CliResult<()> {
    let instance = container.snapshots.restore(template, data)?;
    match out {
        Some(path) => {
            let path = output_path(&container.settings, path);
            let bytes = container.snapshots.save(&instance, &path)?;
            output::action("Restored", &format!("{} ({} bytes)", path.display(), bytes));
        }
        None => output::info(&instance.to_tree_string(instance.root())),
    }
    Ok(())
}

/// Appends the configured snapshot extension when the path has none.
fn output_path(settings: &Settings, path: &Path) -> PathBuf {
    match path.extension() {
        Some(_) => path.to_path_buf(),
        None => settings.snapshot_path(path),
    }
}

#[instrument(skip(container))]
fn cmd_verify(container: &ServiceContainer, snapshots: &[PathBuf]) -> CliResult<()> {
    let mut first_error = None;
    for path in snapshots {
        match container.snapshots.verify(path) {
            Ok(summary) => output::success(&format!(
                "{} ({} bytes, {} nodes)",
                summary.path.display(),
                summary.bytes,
                summary.nodes
            )),
            Err(e) => {
                output::failure(&format!("{}: {}", path.display(), e));
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn cmd_config(
    container: &ServiceContainer,
    command: &ConfigCommands,
    explicit: Option<&Path>,
) -> CliResult<()> {
    match command {
        ConfigCommands::Show => {
            output::info(&container.settings.to_toml()?);
            Ok(())
        }
        ConfigCommands::Template { output: None } => {
            output::info(&Settings::template());
            Ok(())
        }
        ConfigCommands::Template { output: Some(path) } => {
            if container.fs.exists(path) {
                return Err(CliError::Usage(format!(
                    "{} already exists, not overwriting",
                    path.display()
                )));
            }
            container
                .fs
                .ensure_parent(path)
                .map_err(|e| InfraError::io(format!("create parent of {}", path.display()), e))?;
            container
                .fs
                .write(path, Settings::template().as_bytes())
                .map_err(|e| InfraError::io(format!("write {}", path.display()), e))?;
            output::action("Created", &path.display());
            Ok(())
        }
        ConfigCommands::Path => {
            let local = explicit
                .map(Path::to_path_buf)
                .unwrap_or_else(|| local_config_path(Path::new(".")));
            output::header("Config paths");
            match global_config_path() {
                Some(global) => output::detail(&format!(
                    "global: {} {}",
                    global.display(),
                    presence(container.fs.exists(&global))
                )),
                None => output::detail(&"global: (no home directory)"),
            }
            output::detail(&format!(
                "local:  {} {}",
                local.display(),
                presence(container.fs.exists(&local))
            ));
            Ok(())
        }
    }
}

fn presence(exists: bool) -> String {
    if exists {
        output::dim("(exists)")
    } else {
        output::dim("(not found)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_MULTIPLICITY;

    #[test]
    fn given_node_with_attribute_when_listing_refs_then_attribute_follows_owner() {
        // Arrange
        let mut instance = FormInstance::new();
        let root = instance.root();
        let data = instance.create_element("data", DEFAULT_MULTIPLICITY);
        instance.add_child(root, data).unwrap();
        instance.set_attribute(data, None, "id", Some("f1")).unwrap();

        // Act
        let lines = reference_lines(&instance, false);

        // Assert
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "/data[1]");
        assert_eq!(lines[2], "/data[1]/@id");
    }

    #[test]
    fn given_path_without_extension_when_output_then_configured_extension() {
        let settings = Settings::default();
        assert_eq!(
            output_path(&settings, Path::new("out/restored")),
            PathBuf::from("out/restored.ftree")
        );
        assert_eq!(
            output_path(&settings, Path::new("out/restored.bin")),
            PathBuf::from("out/restored.bin")
        );
    }
}
