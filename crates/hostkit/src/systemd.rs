//! systemd control surface.
//!
//! Only the verbs a unit's lifecycle needs: enable, disable, start, stop,
//! daemon-reload and two queries. Restarts are composed by the caller.

use crate::error::{Error, Result};
use crate::runner;
use declarative::CommandRunner;

/// Wrapper around `systemctl`.
pub struct Systemd<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Systemd<'a> {
    /// Create a wrapper that runs systemctl through `runner`.
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    fn systemctl(&self, action: &str, unit: Option<&str>) -> Result<()> {
        let mut args = vec![action];
        args.extend(unit);
        let output = runner::run(self.runner, "systemctl", &args).map_err(|e| {
            Error::SupervisorCommandFailed {
                action: action.to_string(),
                unit: unit.unwrap_or_default().to_string(),
                stderr: e.to_string(),
            }
        })?;

        if !output.success {
            return Err(Error::SupervisorCommandFailed {
                action: action.to_string(),
                unit: unit.unwrap_or_default().to_string(),
                stderr: runner::failure_text(&output),
            });
        }
        Ok(())
    }

    /// Register a unit for auto-start.
    pub fn enable(&self, unit: &str) -> Result<()> {
        self.systemctl("enable", Some(unit))
    }

    /// Unregister a unit from auto-start.
    pub fn disable(&self, unit: &str) -> Result<()> {
        self.systemctl("disable", Some(unit))
    }

    /// Start a unit.
    pub fn start(&self, unit: &str) -> Result<()> {
        self.systemctl("start", Some(unit))
    }

    /// Stop a unit.
    pub fn stop(&self, unit: &str) -> Result<()> {
        self.systemctl("stop", Some(unit))
    }

    /// Re-read unit files from disk.
    pub fn daemon_reload(&self) -> Result<()> {
        self.systemctl("daemon-reload", None)
    }

    /// Whether the unit is enabled.
    pub fn is_enabled(&self, unit: &str) -> Result<bool> {
        let output = runner::run(self.runner, "systemctl", &["is-enabled", unit])?;
        Ok(output.success && output.stdout_str().trim() == "enabled")
    }

    /// Whether the unit is currently active.
    pub fn is_active(&self, unit: &str) -> Result<bool> {
        let output = runner::run(self.runner, "systemctl", &["is-active", unit])?;
        Ok(output.success && output.stdout_str().trim() == "active")
    }
}
