//! Supervisor resources - unit files on disk and unit enablement

use anyhow::Result;
use hostkit::systemd::Systemd;
use std::path::Path;

use super::ManagedFile;
use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};

/// A systemd unit file; apply reloads the unit index whenever it changes
#[derive(Debug, Clone)]
pub struct UnitFile {
    file: ManagedFile,
}

impl UnitFile {
    pub fn new(path: impl AsRef<Path>, content: impl Into<String>) -> Self {
        Self {
            file: ManagedFile::new(path, content, 0o644).kind("unit_file"),
        }
    }

    pub fn file(&self) -> &ManagedFile {
        &self.file
    }

    fn reload(ctx: &ApplyContext) {
        if let Err(e) = Systemd::new(ctx.runner).daemon_reload() {
            log::warn!("{e}");
        }
    }
}

impl Resource for UnitFile {
    fn id(&self) -> String {
        self.file.id()
    }

    fn description(&self) -> String {
        format!("Unit file {}", self.file.path.display())
    }

    fn resource_type(&self) -> &'static str {
        "unit_file"
    }

    fn current_state(&self, ctx: &ApplyContext) -> Result<ResourceState> {
        self.file.current_state(ctx)
    }

    fn desired_state(&self) -> ResourceState {
        self.file.desired_state()
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let result = self.file.apply(ctx)?;
        if result.is_change() {
            Self::reload(ctx);
        }
        Ok(result)
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        self.file.remove(ctx)
    }
}

/// The supervisor's unit index
///
/// Removing it always reloads, so units deleted by hand drop out of the
/// supervisor's cache too. Reload failures are logged only.
#[derive(Debug, Clone, Default)]
pub struct UnitIndex;

impl Resource for UnitIndex {
    fn id(&self) -> String {
        "daemon-reload".to_string()
    }

    fn description(&self) -> String {
        "Reload the unit index".to_string()
    }

    fn resource_type(&self) -> &'static str {
        "unit_index"
    }

    fn current_state(&self, _ctx: &ApplyContext) -> Result<ResourceState> {
        Ok(self.desired_state())
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present("loaded")
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        UnitFile::reload(ctx);
        Ok(ApplyResult::NoChange)
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        UnitFile::reload(ctx);
        Ok(ApplyResult::NoChange)
    }
}

/// Enablement of one supervisor unit
///
/// Supervisor failures never abort a pass: a failed enable is reported as
/// [`ApplyResult::Failed`], and removal tolerates units that were never
/// registered.
#[derive(Debug, Clone)]
pub struct ServiceUnit {
    pub name: String,
}

impl ServiceUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Resource for ServiceUnit {
    fn id(&self) -> String {
        self.name.clone()
    }

    fn description(&self) -> String {
        format!("Enable {}", self.name)
    }

    fn resource_type(&self) -> &'static str {
        "service_unit"
    }

    fn current_state(&self, ctx: &ApplyContext) -> Result<ResourceState> {
        if Systemd::new(ctx.runner).is_enabled(&self.name)? {
            Ok(self.desired_state())
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present("enabled")
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let systemd = Systemd::new(ctx.runner);
        if systemd.is_enabled(&self.name).unwrap_or(false) {
            return Ok(ApplyResult::NoChange);
        }
        match systemd.enable(&self.name) {
            Ok(()) => Ok(ApplyResult::Created),
            Err(e) => Ok(ApplyResult::Failed {
                error: e.to_string(),
            }),
        }
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let systemd = Systemd::new(ctx.runner);
        let was_enabled = systemd.is_enabled(&self.name).unwrap_or(false);
        let was_active = systemd.is_active(&self.name).unwrap_or(false);

        for step in [systemd.stop(&self.name), systemd.disable(&self.name)] {
            match step {
                Ok(()) => {}
                Err(e) if e.is_absent_unit() => log::debug!("{e}"),
                Err(e) => log::warn!("{e}"),
            }
        }

        Ok(if was_enabled || was_active {
            ApplyResult::Removed
        } else {
            ApplyResult::NoChange
        })
    }
}
