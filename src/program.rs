use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Error};
use console::Term;
use log::{error, info, trace, warn};
use thiserror::Error;

use crate::cli::Cli;
use crate::config::AppConfig;
use crate::triage::backend::{CountBackend, ElasticBackend, IndexStatus};
use crate::triage::command::{BaseInvocation, CommandBuilder};
use crate::triage::discovery::{Decompressor, FileDiscovery};
use crate::triage::reconcile::{ReconciliationReport, Reconciler};
use crate::triage::shipper::{ProcessShipper, ShipperRunner};
use crate::triage::state::StateDirectoryManager;
use crate::triage::taxonomy::{self, SourceTaxonomy};
use crate::triage::TriageDirectory;

/// The name of the cargo package.
const NAME: &str = env!("CARGO_PKG_NAME");

/// The version of the cargo package.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The authors who created the package.
const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");

#[derive(Error, Debug)]
pub(crate) enum SetupError {
    #[error(
        "Filebeat directory not found, please ensure a directory containing \"{hint}\" exists in the current working directory or use the '-p' option"
    )]
    ShipperNotFound { hint: String },

    #[error("The Filebeat directory {} does not exist", .0.display())]
    InvalidShipperDirectory(PathBuf),
}

/// Returns the first directory under `search` whose name contains `hint`.
pub(crate) fn find_shipper_dir(search: &Path, hint: &str) -> Option<PathBuf> {
    let mut names: Vec<PathBuf> = fs::read_dir(search)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            path.file_name()
                .map(|name| name.to_string_lossy().contains(hint))
                .unwrap_or(false)
        })
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Everything one shipping run needs, scoped to a single invocation.
pub(crate) struct RunContext<'a, B, S, D>
where
    B: CountBackend + ?Sized,
    S: ShipperRunner + ?Sized,
    D: Decompressor,
{
    pub config: &'a AppConfig,
    pub taxonomy: &'a SourceTaxonomy,
    pub shipper_dir: &'a Path,
    pub url: &'a str,
    pub index: &'a str,
    pub backend: &'a B,
    pub shipper: &'a S,
    pub discovery: &'a FileDiscovery<D>,
}

impl<'a, B, S, D> RunContext<'a, B, S, D>
where
    B: CountBackend + ?Sized,
    S: ShipperRunner + ?Sized,
    D: Decompressor,
{
    /// Resets the registry, plans the shipment and reconciles it for one triage directory.
    pub fn ship(&self, triage: &TriageDirectory) -> Result<ReconciliationReport, Error> {
        info!("Processing triage output {}", triage.path().display());

        let state = StateDirectoryManager::new(self.shipper_dir, &self.config.shipper.data_directory);
        let registry_path = state.prepare(&triage.run_id())?;

        let base = BaseInvocation::filebeat(
            self.shipper_dir,
            &self.config.shipper,
            self.url,
            self.index,
            &registry_path,
        );
        let builder = CommandBuilder::new(&self.config.shipper, self.discovery);
        let plan = builder.build(triage.path(), self.shipper_dir, base, self.taxonomy)?;
        for group in &plan.groups {
            info!(
                "{}.{}: {} file(s), {} line(s) expected",
                group.module,
                group.file_type,
                group.files.len(),
                group.expected
            );
        }

        match self.backend.ensure_index(self.index) {
            Ok(IndexStatus::Existing) | Ok(IndexStatus::Created) => {}
            Ok(IndexStatus::Rejected(reason)) => error!("Index creation rejected: {}", reason),
            Err(e) => warn!("Unable to create index {}: {}", self.index, e),
        }

        let settle = Duration::from_secs(self.config.reconcile.settle_secs);
        let reconciler = Reconciler::new(self.backend, self.shipper, settle);
        let report = reconciler
            .reconcile(triage.path(), self.index, &plan)
            .with_context(|| format!("Unable to count documents in {}", self.index))?;
        report.log_summary();
        Ok(report)
    }
}

/// Handles the flow of a shipping session from argument validation to the final summary.
pub(crate) struct Program {
    cli: Cli,
    config: AppConfig,
}

impl Program {
    pub(crate) fn new(cli: Cli, config: AppConfig) -> Self {
        Self { cli, config }
    }

    fn resolve_shipper_dir(&self) -> Result<PathBuf, Error> {
        let configured = self
            .cli
            .path
            .as_ref()
            .or(self.config.paths.shipper_directory.as_ref());

        let dir = match configured {
            Some(dir) if dir.is_dir() => dir.clone(),
            Some(dir) => return Err(SetupError::InvalidShipperDirectory(dir.clone()).into()),
            None => find_shipper_dir(Path::new("."), &self.config.shipper.discovery_hint).ok_or_else(|| {
                SetupError::ShipperNotFound {
                    hint: self.config.shipper.discovery_hint.clone(),
                }
            })?,
        };

        let dir = std::path::absolute(&dir)
            .with_context(|| format!("Unable to resolve {}", dir.display()))?;
        info!("Filebeat directory set to {}", dir.display());
        Ok(dir)
    }

    /// Runs every triage directory in order. The first fatal error ends the session.
    pub(crate) fn run(&self) -> Result<(), Error> {
        Term::stdout().set_title("triage shipper");
        trace!("Starting triage shipper...");
        trace!("Program Name: {}", NAME);
        trace!("Program Version: {}", VERSION);
        trace!("Program Authors: {}", AUTHORS);

        info!("Loading configuration file for {}...", self.cli.system);
        let taxonomy = taxonomy::resolve(&self.cli.system, &self.config.paths.taxonomy_directory)?;
        if taxonomy.is_empty() {
            warn!("The configuration file for {} defines no modules", self.cli.system);
        }

        let triage_dirs = self
            .cli
            .dirs
            .iter()
            .map(|dir| TriageDirectory::resolve(dir))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Number of triage outputs to upload: {}", triage_dirs.len());
        for dir in &triage_dirs {
            info!("  {}", dir.path().display());
        }

        let shipper_dir = self.resolve_shipper_dir()?;
        let backend = ElasticBackend::new(&self.cli.url, &self.config.backend)?;
        info!("Connection established");
        let discovery = FileDiscovery::new();

        let context = RunContext {
            config: &self.config,
            taxonomy: &taxonomy,
            shipper_dir: &shipper_dir,
            url: &self.cli.url,
            index: &self.cli.index,
            backend: &backend,
            shipper: &ProcessShipper,
            discovery: &discovery,
        };

        let mut reports = Vec::with_capacity(triage_dirs.len());
        for triage in &triage_dirs {
            reports.push(context.ship(triage)?);
        }

        let expected: u64 = reports.iter().map(|r| r.expected).sum();
        let uploaded: i64 = reports.iter().map(|r| r.uploaded).sum();
        info!(
            "Finished {} triage output(s): {} logs expected, {} uploaded",
            reports.len(),
            expected,
            uploaded
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::backend::BackendResult;
    use crate::triage::command::ShipmentPlan;
    use crate::triage::shipper::ShipperResult;
    use std::cell::{Cell, RefCell};
    use std::fs::{create_dir_all, write};
    use tempfile::tempdir;

    /// A backend whose count grows by the number of lines the fake shipper "uploads".
    struct GrowingBackend {
        count: Cell<u64>,
        created: Cell<bool>,
    }

    impl CountBackend for GrowingBackend {
        fn ensure_index(&self, _index: &str) -> BackendResult<IndexStatus> {
            self.created.set(true);
            Ok(IndexStatus::Created)
        }

        fn count(&self, _index: &str) -> BackendResult<u64> {
            Ok(self.count.get())
        }
    }

    struct UploadingShipper<'a> {
        backend: &'a GrowingBackend,
        uploaded: u64,
        plans: RefCell<Vec<Vec<String>>>,
    }

    impl ShipperRunner for UploadingShipper<'_> {
        fn run(&self, plan: &ShipmentPlan) -> ShipperResult<()> {
            self.plans.borrow_mut().push(plan.args.clone());
            self.backend.count.set(self.backend.count.get() + self.uploaded);
            Ok(())
        }
    }

    #[test]
    fn test_find_shipper_dir_by_hint() {
        let dir = tempdir().unwrap();
        create_dir_all(dir.path().join("filebeat-7.15.1-linux-x86_64")).unwrap();
        write(dir.path().join("filebeat.tar.gz"), "").unwrap();
        create_dir_all(dir.path().join("config")).unwrap();

        assert_eq!(
            find_shipper_dir(dir.path(), "filebeat"),
            Some(dir.path().join("filebeat-7.15.1-linux-x86_64"))
        );
        assert_eq!(find_shipper_dir(dir.path(), "logstash"), None);
    }

    #[test]
    fn test_ship_scenario_end_to_end() {
        let shipper_dir = tempdir().unwrap();
        create_dir_all(shipper_dir.path().join("modules.d")).unwrap();
        write(shipper_dir.path().join("modules.d/system.yml.disabled"), "").unwrap();

        let root = tempdir().unwrap();
        let capture = root.path().join("ubuntu-triage");
        create_dir_all(capture.join("var/log")).unwrap();
        write(capture.join("var/log/syslog"), "a\nb\nc\n").unwrap();
        write(capture.join("var/log/auth.log"), "x\ny\n").unwrap();

        let taxonomy: SourceTaxonomy = serde_json::from_str(
            r#"{"system": {"syslog": ["var/log/syslog"], "auth": ["var/log/auth.log"]}}"#,
        )
        .unwrap();

        let mut config = AppConfig::default();
        config.reconcile.settle_secs = 0;

        let backend = GrowingBackend {
            count: Cell::new(100),
            created: Cell::new(false),
        };
        let shipper = UploadingShipper {
            backend: &backend,
            uploaded: 4,
            plans: RefCell::new(Vec::new()),
        };
        let discovery = FileDiscovery::new();

        let context = RunContext {
            config: &config,
            taxonomy: &taxonomy,
            shipper_dir: shipper_dir.path(),
            url: "http://localhost:9200",
            index: "triage",
            backend: &backend,
            shipper: &shipper,
            discovery: &discovery,
        };

        let triage = TriageDirectory::resolve(&capture).unwrap();
        let report = context.ship(&triage).unwrap();

        assert!(backend.created.get());
        assert_eq!(report.expected, 5);
        assert_eq!((report.pre_run, report.post_run), (100, 104));
        assert_eq!((report.uploaded, report.failed), (4, 1));
        assert!(shipper_dir.path().join("data/ubuntu-triage").is_dir());

        let plans = shipper.plans.borrow();
        assert_eq!(plans.len(), 1);
        assert!(plans[0].contains(&"-modules=system".to_string()));
        assert_eq!(plans[0].last().unwrap(), "--once");
    }

    #[test]
    fn test_unsupported_module_aborts_before_shipping() {
        let shipper_dir = tempdir().unwrap();
        create_dir_all(shipper_dir.path().join("modules.d")).unwrap();

        let capture = tempdir().unwrap();
        let taxonomy: SourceTaxonomy =
            serde_json::from_str(r#"{"system": {"syslog": ["var/log/syslog"]}}"#).unwrap();
        let config = AppConfig::default();
        let backend = GrowingBackend {
            count: Cell::new(0),
            created: Cell::new(false),
        };
        let shipper = UploadingShipper {
            backend: &backend,
            uploaded: 0,
            plans: RefCell::new(Vec::new()),
        };
        let discovery = FileDiscovery::new();

        let context = RunContext {
            config: &config,
            taxonomy: &taxonomy,
            shipper_dir: shipper_dir.path(),
            url: "http://localhost:9200",
            index: "triage",
            backend: &backend,
            shipper: &shipper,
            discovery: &discovery,
        };

        let triage = TriageDirectory::resolve(capture.path()).unwrap();
        assert!(context.ship(&triage).is_err());
        assert!(shipper.plans.borrow().is_empty());
        assert!(!backend.created.get());
    }

    #[test]
    fn test_unknown_system_fails_before_touching_triage_dirs() {
        let settings_dir = tempdir().unwrap();
        let mut config = AppConfig::default();
        config.paths.taxonomy_directory = settings_dir.path().join("config");

        let cli = Cli {
            system: "plan9".to_string(),
            url: "http://localhost:9200".to_string(),
            index: "triage".to_string(),
            path: None,
            settings: PathBuf::from("unused.toml"),
            log_level: None,
            dirs: vec![PathBuf::from("/definitely/not/here")],
        };

        let err = Program::new(cli, config).run().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<taxonomy::TaxonomyError>(),
            Some(taxonomy::TaxonomyError::NotFound { .. })
        ));
    }
}
