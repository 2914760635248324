//! Lifecycle event handling
//!
//! Each event maps to one reconciler operation plus the stored-state
//! bookkeeping that decides what later events do:
//!
//! | Event            | Operation            | State change                 |
//! |------------------|----------------------|------------------------------|
//! | `install`        | Install              | `installed = true`           |
//! | `start`          | Start (if installed) | `init-started = true`        |
//! | `config-changed` | Configure (+Restart) | none                         |
//! | `upgrade`        | Upgrade(version)     | `agent-version = version`    |
//! | `remove`         | Remove               | state file deleted           |

use anyhow::{Result, bail};
use declarative::{
    ApplyContext, CommandRunner, HostFs, ProgressCallback, ResourceDiff, compute_diffs,
};
use std::fmt;

use crate::config::CharmConfig;
use crate::reconciler::{ReconciliationResult, Reconciler};
use crate::relations::{self, LogForwardingDescriptor, PrologEpilogData};
use crate::state::StoredState;

/// Status the unit reports after an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadStatus {
    Active(String),
    Blocked(String),
    Maintenance(String),
}

impl WorkloadStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }
}

impl fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active(msg) => write!(f, "active: {msg}"),
            Self::Blocked(msg) => write!(f, "blocked: {msg}"),
            Self::Maintenance(msg) => write!(f, "maintenance: {msg}"),
        }
    }
}

/// What one event did
#[derive(Debug)]
pub struct EventOutcome {
    /// `None` when the event was skipped
    pub result: Option<ReconciliationResult>,
    /// `None` when the event leaves the reported status alone
    pub status: Option<WorkloadStatus>,
}

impl EventOutcome {
    fn skipped() -> Self {
        Self {
            result: None,
            status: None,
        }
    }

    /// Whether the event should make the process exit non-zero
    pub fn failed(&self) -> bool {
        self.status.as_ref().is_some_and(WorkloadStatus::is_blocked)
            || self.result.as_ref().is_some_and(|r| !r.is_success())
    }
}

/// Which relation payload to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    PrologEpilog,
    LogForwarding,
}

/// Drift between the host and the installed target
#[derive(Debug)]
pub struct DriftReport {
    pub state: StoredState,
    pub diffs: Vec<ResourceDiff>,
    /// Path, content on disk, content that would be written
    pub files: Vec<(String, Option<String>, String)>,
    /// Log file and the opening line of its last record
    pub last_records: Vec<(String, String)>,
}

pub struct Charm<'a> {
    config: &'a CharmConfig,
    runner: &'a dyn CommandRunner,
    fs: &'a dyn HostFs,
    verbose: bool,
}

impl<'a> Charm<'a> {
    pub fn new(config: &'a CharmConfig, runner: &'a dyn CommandRunner, fs: &'a dyn HostFs) -> Self {
        Self {
            config,
            runner,
            fs,
            verbose: false,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn reconciler(&self) -> Reconciler<'a> {
        Reconciler::new(&self.config.layout, self.runner, self.fs).verbose(self.verbose)
    }

    fn load_state(&self) -> Result<StoredState> {
        StoredState::load(&self.config.layout.state_dir)
    }

    fn save_state(&self, state: &mut StoredState) -> Result<()> {
        state.save(&self.config.layout.state_dir)
    }

    fn package(&self) -> &str {
        &self.config.layout.package_name
    }

    pub fn install<P: ProgressCallback>(&self, progress: &mut P) -> Result<EventOutcome> {
        let result = self.reconciler().install(&self.config.target, progress);
        if !result.is_success() {
            return Ok(EventOutcome {
                result: Some(result),
                status: Some(WorkloadStatus::Blocked("Installation error".to_string())),
            });
        }

        log::debug!("{} installed", self.package());
        let mut state = self.load_state()?;
        state.installed = true;
        if state.agent_version.is_none() {
            state.agent_version = self.config.target.package_version.clone();
        }
        self.save_state(&mut state)?;

        Ok(EventOutcome {
            result: Some(result),
            status: Some(WorkloadStatus::Active(format!("{} installed", self.package()))),
        })
    }

    pub fn start(&self) -> Result<EventOutcome> {
        let mut state = self.load_state()?;
        if !state.installed {
            log::info!("{} is not installed yet; not starting", self.package());
            return Ok(EventOutcome::skipped());
        }

        let result = self.reconciler().start();
        state.init_started = true;
        self.save_state(&mut state)?;

        Ok(EventOutcome {
            result: Some(result),
            status: Some(WorkloadStatus::Active(format!("{} started", self.package()))),
        })
    }

    pub fn stop(&self) -> EventOutcome {
        EventOutcome {
            result: Some(self.reconciler().stop()),
            status: Some(WorkloadStatus::Maintenance(format!("{} stopped", self.package()))),
        }
    }

    pub fn restart(&self) -> EventOutcome {
        EventOutcome {
            result: Some(self.reconciler().restart()),
            status: Some(WorkloadStatus::Active(format!("{} started", self.package()))),
        }
    }

    /// Rewrite configuration; restart only once the agent has been started
    pub fn config_changed<P: ProgressCallback>(&self, progress: &mut P) -> Result<EventOutcome> {
        let mut result = self.reconciler().configure(&self.config.target, progress);
        if !result.is_success() {
            return Ok(EventOutcome {
                result: Some(result),
                status: Some(WorkloadStatus::Blocked("Configuration error".to_string())),
            });
        }

        if self.load_state()?.init_started {
            let restarted = self.reconciler().restart();
            result.summary.merge(&restarted.summary);
            result.warnings.extend(restarted.warnings);
        } else {
            log::debug!("Start has not run yet; not restarting");
        }

        Ok(EventOutcome {
            result: Some(result),
            status: None,
        })
    }

    pub fn upgrade<P: ProgressCallback>(
        &self,
        version: &str,
        progress: &mut P,
    ) -> Result<EventOutcome> {
        let result = self
            .reconciler()
            .upgrade(&self.config.target, version, progress);
        if !result.is_success() {
            let version = version.trim();
            let message = if version.is_empty() {
                "Upgrade needs a version".to_string()
            } else {
                format!("Upgrade to {version} failed")
            };
            return Ok(EventOutcome {
                result: Some(result),
                status: Some(WorkloadStatus::Blocked(message)),
            });
        }

        let mut state = self.load_state()?;
        state.agent_version = Some(version.trim().to_string());
        self.save_state(&mut state)?;

        Ok(EventOutcome {
            result: Some(result),
            status: Some(WorkloadStatus::Active(format!(
                "{} {} running",
                self.package(),
                version.trim()
            ))),
        })
    }

    pub fn remove<P: ProgressCallback>(&self, progress: &mut P) -> Result<EventOutcome> {
        let result = self.reconciler().remove(progress);
        StoredState::delete(&self.config.layout.state_dir)?;
        Ok(EventOutcome {
            result: Some(result),
            status: Some(WorkloadStatus::Maintenance(format!("{} removed", self.package()))),
        })
    }

    /// Compare the host with what Install and Configure would produce
    pub fn drift(&self, with_contents: bool) -> Result<DriftReport> {
        let reconciler = self.reconciler();
        let plan = reconciler.desired_state(&self.config.target)?;
        let ctx = ApplyContext::new(self.runner, self.fs).verbose(self.verbose);
        let diffs = compute_diffs(&plan, &ctx);

        let mut files = Vec::new();
        if with_contents {
            for file in reconciler.managed_files(&self.config.target)? {
                let current = file.read_current(&ctx)?;
                if current.as_deref() != Some(file.content.as_str()) {
                    files.push((file.path.display().to_string(), current, file.content));
                }
            }
        }

        Ok(DriftReport {
            state: self.load_state()?,
            diffs,
            files,
            last_records: self.last_log_records(),
        })
    }

    fn last_log_records(&self) -> Vec<(String, String)> {
        let Ok(mut logs) = self.fs.read_dir(&self.config.layout.log_dir) else {
            return Vec::new();
        };
        logs.retain(|p| p.extension().is_some_and(|ext| ext == "log"));
        logs.sort();

        logs.iter()
            .filter_map(|path| {
                let content = self.fs.read_to_string(path).ok()?;
                let line = relations::last_record_start(&content)?;
                Some((path.display().to_string(), line.to_string()))
            })
            .collect()
    }

    /// JSON payload for a relation
    pub fn relation_data(&self, kind: RelationKind) -> Result<String> {
        let layout = &self.config.layout;
        let json = match kind {
            RelationKind::PrologEpilog => {
                serde_json::to_string_pretty(&PrologEpilogData::from_layout(layout))?
            }
            RelationKind::LogForwarding => {
                serde_json::to_string_pretty(&LogForwardingDescriptor::for_log_dir(&layout.log_dir))?
            }
        };
        Ok(json)
    }
}

/// Warning text when not running as root
pub fn privilege_warning() -> Option<String> {
    if unsafe { libc::geteuid() } == 0 {
        return None;
    }
    Some("not running as root; account, unit and package steps will likely fail".to_string())
}

/// Turn a failed outcome into an error for the process exit code
pub fn ensure_success(event: &str, outcome: &EventOutcome) -> Result<()> {
    if outcome.failed() {
        match &outcome.status {
            Some(status) => bail!("{event} failed ({status})"),
            None => bail!("{event} failed"),
        }
    }
    Ok(())
}
