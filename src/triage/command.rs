//! Builds the one-shot shipper invocation for a triage directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use crate::config::ShipperSettings;
use crate::triage::discovery::{Decompressor, DiscoveryError, FileDiscovery};
use crate::triage::estimate::{count_group, EstimateError};
use crate::triage::taxonomy::SourceTaxonomy;

#[derive(Error, Debug)]
pub enum PlanError {
    #[error("The module \"{module}\" cannot be found in {}", .modules_dir.display())]
    UnsupportedModule { module: String, modules_dir: PathBuf },

    #[error("Unable to list shipper modules in {}: {source}", .path.display())]
    ModulesDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Estimate(#[from] EstimateError),
}

pub type PlanResult<T> = Result<T, PlanError>;

/// Executable plus the fixed connection, index and registry flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl BaseInvocation {
    /// The Filebeat preset: configuration file, output host and index, template and lifecycle
    /// settings, and the per-run registry path.
    pub fn filebeat(
        shipper_dir: &Path,
        settings: &ShipperSettings,
        url: &str,
        index: &str,
        registry_path: &Path,
    ) -> Self {
        let args = vec![
            "-e".to_string(),
            "-c".to_string(),
            shipper_dir.join(&settings.config_file).display().to_string(),
            "-E".to_string(),
            format!("output.elasticsearch.hosts=[\"{}\"]", url),
            "-E".to_string(),
            format!("output.elasticsearch.index='{}'", index),
            "-E".to_string(),
            format!("setup.template.name='{}'", index),
            "-E".to_string(),
            format!("setup.template.pattern='{}'", index),
            "-E".to_string(),
            "setup.ilm.enabled=false".to_string(),
            "-E".to_string(),
            format!("filebeat.registry.path='{}'", registry_path.display()),
        ];

        Self {
            program: shipper_dir.join(&settings.binary),
            args,
        }
    }
}

/// Files found for one (module, file type) pair and the lines they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredGroup {
    pub module: String,
    pub file_type: String,
    pub files: Vec<PathBuf>,
    pub expected: u64,
}

/// A complete shipper invocation, run exactly once.
#[derive(Debug, Clone)]
pub struct ShipmentPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub groups: Vec<DiscoveredGroup>,
    pub total_expected: u64,
}

impl ShipmentPlan {
    /// The command line as a single string, for logging.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Formats paths as a single-quoted flow list, e.g. `['/a/syslog', '/a/syslog.1']`.
pub fn format_path_list(paths: &[PathBuf]) -> String {
    let quoted: Vec<String> = paths
        .iter()
        .map(|p| format!("'{}'", p.display().to_string().replace('\'', "''")))
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// Finds the entry of the shipper's modules directory that provides `module`.
fn find_module_definition(module: &str, entries: &[String]) -> Option<String> {
    entries.iter().find(|entry| entry.contains(module)).cloned()
}

fn list_modules_dir(modules_dir: &Path) -> PlanResult<Vec<String>> {
    let to_err = |source| PlanError::ModulesDirectory {
        path: modules_dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(modules_dir).map_err(to_err)? {
        let entry = entry.map_err(to_err)?;
        entries.push(entry.file_name().to_string_lossy().into_owned());
    }
    entries.sort();
    Ok(entries)
}

/// Translates a taxonomy into a shipment plan for one triage directory.
pub struct CommandBuilder<'a, D: Decompressor> {
    settings: &'a ShipperSettings,
    discovery: &'a FileDiscovery<D>,
}

impl<'a, D: Decompressor> CommandBuilder<'a, D> {
    pub fn new(settings: &'a ShipperSettings, discovery: &'a FileDiscovery<D>) -> Self {
        Self {
            settings,
            discovery,
        }
    }

    /// Appends the module flag, one path override per file type and the one-shot flag to `base`.
    ///
    /// Every module must be provided by the shipper, otherwise nothing is discovered and
    /// [`PlanError::UnsupportedModule`] is returned.
    pub fn build(
        &self,
        triage_dir: &Path,
        shipper_dir: &Path,
        base: BaseInvocation,
        taxonomy: &SourceTaxonomy,
    ) -> PlanResult<ShipmentPlan> {
        let BaseInvocation { program, mut args } = base;

        let module_names = taxonomy.module_names();
        info!("Modules found: {:?}", module_names);
        // Filebeat needs the active modules declared before any module override
        args.push(format!("-modules={}", module_names.join(",")));

        let modules_dir = shipper_dir.join(&self.settings.modules_directory);
        let available = list_modules_dir(&modules_dir)?;
        for module in taxonomy.modules() {
            match find_module_definition(&module.name, &available) {
                Some(definition) => info!("Configuration file found: {}", definition),
                None => {
                    return Err(PlanError::UnsupportedModule {
                        module: module.name.clone(),
                        modules_dir,
                    });
                }
            }
        }

        let mut groups = Vec::new();
        let mut total_expected = 0u64;

        for module in taxonomy.modules() {
            let file_types: Vec<&str> = module.file_types.iter().map(|f| f.name.as_str()).collect();
            info!("Log types found for {}: {:?}", module.name, file_types);

            for file_type in &module.file_types {
                let files = self
                    .discovery
                    .discover_fragments(triage_dir, &file_type.fragments)?;
                info!(
                    "Path list of log files found for {}.{}: {:?}",
                    module.name, file_type.name, files
                );

                let expected = count_group(&files)?;
                total_expected += expected;

                args.push("-M".to_string());
                args.push(format!(
                    "{}.{}.{}={}",
                    module.name,
                    file_type.name,
                    self.settings.paths_setting,
                    format_path_list(&files)
                ));

                groups.push(DiscoveredGroup {
                    module: module.name.clone(),
                    file_type: file_type.name.clone(),
                    files,
                    expected,
                });
            }
        }

        args.push("--once".to_string());
        debug!("Expected documents for {}: {}", triage_dir.display(), total_expected);

        Ok(ShipmentPlan {
            program,
            args,
            groups,
            total_expected,
        })
    }
}
