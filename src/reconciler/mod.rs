//! Host resource reconciler
//!
//! Drives the host from whatever state it is in to the state a
//! [`TargetConfiguration`] describes, and tears down everything it
//! provisioned. The host itself is the only state: every operation
//! rebuilds its resource list from the layout and configuration, and
//! every resource re-checks the host before acting.
//!
//! | Operation   | Executor   | On error                          |
//! |-------------|------------|-----------------------------------|
//! | `install`   | `converge` | abort, `InstallationFailed` etc.  |
//! | `configure` | `converge` | abort, nothing written on render  |
//! | `upgrade`   | `converge` | abort, service left stopped       |
//! | `remove`    | `teardown` | log and continue                  |
//!
//! Start, stop and restart talk to systemd directly and never fail.

pub mod render;

#[cfg(test)]
pub(crate) mod simulated;
#[cfg(test)]
mod tests;

use anyhow::Result;
use declarative::{
    ApplyContext, BoxedResource, CommandRunner, ExecuteSummary, HostFs, ProgressCallback,
    converge, teardown,
};
use hostkit::ErrorKind;
use hostkit::pip::PackageSpec;
use hostkit::systemd::Systemd;
use serde::Serialize;

use crate::config::{HostLayout, TargetConfiguration};
use crate::resource::{
    DirPolicy, Directory, ManagedFile, Owner, PythonPackage, ServiceAccount, ServiceUnit,
    UnitFile, UnitIndex, VirtualEnv,
};

// ============================================================================
// Results
// ============================================================================

/// Outcome of one reconciliation operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// The host changed
    Applied,
    /// The host already matched
    NoOp,
    /// A fatal error stopped the operation
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorDetail {
    /// `None` when the failure did not come from a host tool wrapper
    pub kind: Option<ErrorKind>,
    pub message: String,
    /// Resource whose apply failed
    pub resource: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub status: Status,
    pub error: Option<ErrorDetail>,
    pub summary: ExecuteSummary,
    /// Non-fatal failures, already logged
    pub warnings: Vec<String>,
}

impl ReconciliationResult {
    fn from_summary(summary: ExecuteSummary) -> Self {
        let status = if summary.total_changes() > 0 {
            Status::Applied
        } else {
            Status::NoOp
        };
        let warnings = summary
            .failures
            .iter()
            .map(|(id, error)| format!("{id}: {error}"))
            .collect();
        Self {
            status,
            error: None,
            summary,
            warnings,
        }
    }

    fn failed(detail: ErrorDetail, summary: ExecuteSummary) -> Self {
        let mut result = Self::from_summary(summary);
        result.status = Status::Failed;
        result.error = Some(detail);
        result
    }

    fn with_warning(mut self, warning: String) -> Self {
        self.warnings.push(warning);
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.summary.merge(&other.summary);
        self.warnings.extend(other.warnings);
        if other.status == Status::Failed {
            self.status = Status::Failed;
            self.error = other.error;
        } else if other.status == Status::Applied && self.status == Status::NoOp {
            self.status = Status::Applied;
        }
        self
    }

    pub fn is_success(&self) -> bool {
        self.status != Status::Failed
    }

    /// Error kind of a failed operation
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().and_then(|e| e.kind)
    }
}

/// Typed kind of the first host tool error in the chain
pub fn error_kind(error: &anyhow::Error) -> Option<ErrorKind> {
    error
        .chain()
        .find_map(|e| e.downcast_ref::<hostkit::Error>())
        .map(hostkit::Error::kind)
}

fn detail(error: &anyhow::Error, resource: Option<String>) -> ErrorDetail {
    ErrorDetail {
        kind: error_kind(error),
        message: format!("{error:#}"),
        resource,
    }
}

// ============================================================================
// Reconciler
// ============================================================================

pub struct Reconciler<'a> {
    layout: &'a HostLayout,
    runner: &'a dyn CommandRunner,
    fs: &'a dyn HostFs,
    verbose: bool,
}

impl<'a> Reconciler<'a> {
    pub fn new(layout: &'a HostLayout, runner: &'a dyn CommandRunner, fs: &'a dyn HostFs) -> Self {
        Self {
            layout,
            runner,
            fs,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn ctx(&self) -> ApplyContext<'a> {
        ApplyContext::new(self.runner, self.fs).verbose(self.verbose)
    }

    fn owner(&self) -> Owner {
        Owner::new(&self.layout.user, &self.layout.group)
    }

    // ------------------------------------------------------------------------
    // Resource lists
    // ------------------------------------------------------------------------

    fn cache_dir(&self) -> Directory {
        Directory::new(
            &self.layout.cache_dir,
            self.layout.cache_mode.0,
            DirPolicy::Recreate,
        )
        .owned_by(self.owner())
    }

    fn log_dir(&self) -> Directory {
        let policy = if self.layout.wipe_log_on_install {
            DirPolicy::Recreate
        } else {
            DirPolicy::Preserve
        };
        Directory::new(&self.layout.log_dir, self.layout.log_mode.0, policy)
            .owned_by(self.owner())
    }

    fn account(&self) -> ServiceAccount {
        let layout = self.layout;
        let account = ServiceAccount::new(self.owner(), &layout.scheduler_group);
        if layout.accounting.enabled {
            account.registered_as(&layout.accounting.account, &layout.accounting.admin_level)
        } else {
            account
        }
    }

    fn environment_file(&self, target: &TargetConfiguration) -> ManagedFile {
        let content =
            render::environment_file(&target.settings(self.layout), &self.layout.env_prefix);
        ManagedFile::new(
            &self.layout.environment_file,
            content,
            self.layout.environment_mode.0,
        )
    }

    fn unit_files(&self, target: &TargetConfiguration) -> Result<Vec<UnitFile>> {
        let units = render::render_units(self.layout, target, self.fs)?;
        let mut files = vec![UnitFile::new(self.layout.service_unit_path(), units.service)];
        if let Some(timer) = units.timer {
            files.push(UnitFile::new(self.layout.timer_unit_path(), timer));
        }
        Ok(files)
    }

    fn enabled_units(&self) -> Vec<ServiceUnit> {
        let mut units = vec![ServiceUnit::new(&self.layout.service_name)];
        if self.layout.use_timer {
            units.push(ServiceUnit::new(&self.layout.timer_name));
        }
        units
    }

    /// Everything Install converges, in order
    ///
    /// The service account comes before the directories it owns.
    pub fn install_plan(&self, target: &TargetConfiguration) -> Result<Vec<BoxedResource>> {
        let layout = self.layout;
        let unit_files = self.unit_files(target)?;

        let mut plan: Vec<BoxedResource> = vec![
            Box::new(VirtualEnv::new(&layout.venv_dir, &layout.python)),
            Box::new(PythonPackage::new(&layout.venv_dir, PackageSpec::latest("pip"))),
            Box::new(PythonPackage::new(
                &layout.venv_dir,
                target.package_spec(layout),
            )),
            Box::new(
                ManagedFile::new(layout.prolog_path(), render::PROLOG_SCRIPT, 0o755).kind("script"),
            ),
            Box::new(
                ManagedFile::new(layout.epilog_path(), render::EPILOG_SCRIPT, 0o755).kind("script"),
            ),
            Box::new(self.account()),
            Box::new(self.cache_dir()),
            Box::new(self.log_dir()),
        ];
        for file in unit_files {
            plan.push(Box::new(file));
        }
        for unit in self.enabled_units() {
            plan.push(Box::new(unit));
        }
        Ok(plan)
    }

    /// Everything Configure converges, in order
    pub fn configure_plan(&self, target: &TargetConfiguration) -> Result<Vec<BoxedResource>> {
        let unit_files = self.unit_files(target)?;

        let mut plan: Vec<BoxedResource> = vec![Box::new(self.environment_file(target))];
        for file in unit_files {
            plan.push(Box::new(file));
        }
        plan.push(Box::new(self.cache_dir()));
        Ok(plan)
    }

    /// The full target state: Install plus the environment file
    ///
    /// The cache directory is left out: it is emptied on every pass, so
    /// its contents are not drift.
    pub fn desired_state(&self, target: &TargetConfiguration) -> Result<Vec<BoxedResource>> {
        let cache = self.layout.cache_dir.to_string_lossy().to_string();
        let mut plan: Vec<BoxedResource> = self
            .install_plan(target)?
            .into_iter()
            .filter(|r| r.id() != cache)
            .collect();
        plan.push(Box::new(self.environment_file(target)));
        Ok(plan)
    }

    /// Managed files with their desired content, for content diffs
    pub fn managed_files(&self, target: &TargetConfiguration) -> Result<Vec<ManagedFile>> {
        let mut files = vec![self.environment_file(target)];
        files.extend(self.unit_files(target)?.iter().map(|u| u.file().clone()));
        Ok(files)
    }

    /// Everything Remove tears down, in order
    ///
    /// Both units are listed whatever `use_timer` says, so flipping it
    /// never orphans a unit.
    fn removal_plan(&self) -> Vec<BoxedResource> {
        let layout = self.layout;
        vec![
            Box::new(ServiceUnit::new(&layout.timer_name)),
            Box::new(ServiceUnit::new(&layout.service_name)),
            Box::new(UnitFile::new(layout.timer_unit_path(), "")),
            Box::new(UnitFile::new(layout.service_unit_path(), "")),
            Box::new(UnitIndex),
            Box::new(ManagedFile::new(&layout.environment_file, "", 0o644)),
            Box::new(self.log_dir()),
            Box::new(self.cache_dir()),
            Box::new(VirtualEnv::new(&layout.venv_dir, &layout.python)),
            Box::new(self.account()),
        ]
    }

    fn run_converge<P: ProgressCallback>(
        &self,
        plan: Result<Vec<BoxedResource>>,
        progress: &mut P,
    ) -> ReconciliationResult {
        let plan = match plan {
            Ok(plan) => plan,
            Err(e) => {
                log::error!("{e:#}");
                return ReconciliationResult::failed(detail(&e, None), ExecuteSummary::default());
            }
        };

        match converge(&plan, &self.ctx(), progress) {
            Ok(summary) => ReconciliationResult::from_summary(summary),
            Err(e) => ReconciliationResult::failed(detail(&e.error, Some(e.resource_id)), e.summary),
        }
    }

    // ------------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------------

    /// Bring a host in any state up to the installed target
    pub fn install<P: ProgressCallback>(
        &self,
        target: &TargetConfiguration,
        progress: &mut P,
    ) -> ReconciliationResult {
        log::info!("Installing {}", self.layout.package_name);
        self.run_converge(self.install_plan(target), progress)
    }

    /// Rewrite the environment file and unit files, then clear the cache
    ///
    /// Never restarts anything.
    pub fn configure<P: ProgressCallback>(
        &self,
        target: &TargetConfiguration,
        progress: &mut P,
    ) -> ReconciliationResult {
        log::info!("Configuring {}", self.layout.package_name);
        self.run_converge(self.configure_plan(target), progress)
    }

    /// Start the primary unit (the timer when one is used)
    pub fn start(&self) -> ReconciliationResult {
        let systemd = Systemd::new(self.runner);
        let unit = self.layout.primary_unit();
        let mut summary = ExecuteSummary::default();

        if systemd.is_active(unit).unwrap_or(false) {
            log::debug!("{unit} already active");
            summary.no_change += 1;
            return ReconciliationResult::from_summary(summary);
        }
        match systemd.start(unit) {
            Ok(()) => {
                log::info!("Started {unit}");
                summary.modified += 1;
                ReconciliationResult::from_summary(summary)
            }
            Err(e) => ReconciliationResult::from_summary(summary).with_warning(supervisor_warning(&e)),
        }
    }

    /// Stop the timer (if used) and the service
    pub fn stop(&self) -> ReconciliationResult {
        let systemd = Systemd::new(self.runner);
        let mut units = Vec::new();
        if self.layout.use_timer {
            units.push(self.layout.timer_name.as_str());
        }
        units.push(self.layout.service_name.as_str());

        let mut summary = ExecuteSummary::default();
        let mut warnings = Vec::new();
        for unit in units {
            let was_active = systemd.is_active(unit).unwrap_or(false);
            match systemd.stop(unit) {
                Ok(()) if was_active => {
                    log::info!("Stopped {unit}");
                    summary.modified += 1;
                }
                Ok(()) => summary.no_change += 1,
                Err(e) if e.is_absent_unit() => {
                    log::debug!("{e}");
                    summary.no_change += 1;
                }
                Err(e) => {
                    warnings.push(supervisor_warning(&e));
                    summary.no_change += 1;
                }
            }
        }

        let mut result = ReconciliationResult::from_summary(summary);
        result.warnings.extend(warnings);
        result
    }

    /// Stop then start; never a native restart or reload
    pub fn restart(&self) -> ReconciliationResult {
        self.stop().merge(self.start())
    }

    /// Stop, install exactly `version`, clear the cache, start
    ///
    /// A failed install leaves the service stopped.
    pub fn upgrade<P: ProgressCallback>(
        &self,
        target: &TargetConfiguration,
        version: &str,
        progress: &mut P,
    ) -> ReconciliationResult {
        let version = version.trim();
        if version.is_empty() {
            let detail = ErrorDetail {
                kind: Some(ErrorKind::UpgradeFailed),
                message: "upgrade needs an exact version".to_string(),
                resource: None,
            };
            return ReconciliationResult::failed(detail, ExecuteSummary::default());
        }

        log::info!("Upgrading {} to {version}", self.layout.package_name);
        let stopped = self.stop();

        let spec = PackageSpec::pinned(&self.layout.package_name, version)
            .with_index(target.package_index_url.clone());
        let plan: Vec<BoxedResource> = vec![
            Box::new(PythonPackage::new(&self.layout.venv_dir, spec)),
            Box::new(self.cache_dir()),
        ];

        let converged = match converge(&plan, &self.ctx(), progress) {
            Ok(summary) => ReconciliationResult::from_summary(summary),
            Err(e) => {
                let failure = hostkit::Error::UpgradeFailed {
                    version: version.to_string(),
                    message: format!("{:#}", e.error),
                };
                log::error!("{failure}; {} left stopped", self.layout.primary_unit());
                let detail = ErrorDetail {
                    kind: Some(failure.kind()),
                    message: failure.to_string(),
                    resource: Some(e.resource_id),
                };
                return stopped.merge(ReconciliationResult::failed(detail, e.summary));
            }
        };

        stopped.merge(converged).merge(self.start())
    }

    /// Tear down everything the charm provisioned, from any prior state
    pub fn remove<P: ProgressCallback>(&self, progress: &mut P) -> ReconciliationResult {
        log::info!("Removing {}", self.layout.package_name);
        let summary = teardown(&self.removal_plan(), &self.ctx(), progress);
        ReconciliationResult::from_summary(summary)
    }
}

fn supervisor_warning(error: &hostkit::Error) -> String {
    log::warn!("{error}");
    error.to_string()
}
