//! Python virtual environments and pip.
//!
//! Success is decided by exit code only. pip's output text is kept for
//! error messages and never scanned for a success phrase.

use crate::error::{Error, Result};
use crate::runner;
use declarative::CommandRunner;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A requirement to install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    /// Distribution name, optionally with extras (`license-manager[agent]`)
    pub name: String,
    /// Exact version, `None` for latest
    pub version: Option<String>,
    /// Extra package index to search
    pub index_url: Option<String>,
}

impl PackageSpec {
    /// Latest available version of `name`.
    pub fn latest(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            index_url: None,
        }
    }

    /// Exactly `version` of `name`.
    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
            index_url: None,
        }
    }

    /// Search an extra index as well.
    pub fn with_index(mut self, index_url: Option<String>) -> Self {
        self.index_url = index_url;
        self
    }

    /// The pip requirement string (`name` or `name==version`).
    pub fn requirement(&self) -> String {
        match &self.version {
            Some(version) => format!("{}=={version}", self.name),
            None => self.name.clone(),
        }
    }

    /// Name without extras, as `pip show` expects it.
    pub fn distribution(&self) -> &str {
        self.name.split('[').next().unwrap_or(&self.name).trim()
    }
}

/// Interpreter path inside a virtual environment.
pub fn venv_python(venv: &Path) -> PathBuf {
    venv.join("bin").join("python3")
}

/// Create a virtual environment at `dir` with the host interpreter.
///
/// Running this over an existing environment repairs it without
/// deleting installed packages.
pub fn create_venv(runner: &dyn CommandRunner, python: &str, dir: &Path) -> Result<()> {
    let dir_str = dir.to_string_lossy();
    let args = ["-m", "venv", dir_str.as_ref()];
    let output = runner::run(runner, python, &args).map_err(|e| Error::InstallationFailed {
        package: "virtualenv".to_string(),
        message: e.to_string(),
    })?;
    if !output.success {
        return Err(Error::InstallationFailed {
            package: "virtualenv".to_string(),
            message: runner::failure_text(&output),
        });
    }
    Ok(())
}

/// pip inside one virtual environment.
pub struct Pip<'a> {
    runner: &'a dyn CommandRunner,
    python: PathBuf,
}

impl<'a> Pip<'a> {
    /// pip of the environment at `venv`.
    pub fn for_venv(runner: &'a dyn CommandRunner, venv: &Path) -> Self {
        Self {
            runner,
            python: venv_python(venv),
        }
    }

    fn pip(&self, args: &[&str]) -> Result<declarative::CommandOutput> {
        let python = self.python.to_string_lossy();
        let mut argv = vec!["-m", "pip"];
        argv.extend_from_slice(args);
        runner::run(self.runner, &python, &argv)
    }

    /// Install `spec`; with `upgrade`, also replace an older install.
    pub fn install(&self, spec: &PackageSpec, upgrade: bool) -> Result<()> {
        let requirement = spec.requirement();
        let mut args = vec!["install"];
        if upgrade {
            args.push("--upgrade");
        }
        if let Some(index) = &spec.index_url {
            args.push("--extra-index-url");
            args.push(index);
        }
        args.push(&requirement);

        let output = self.pip(&args).map_err(|e| Error::InstallationFailed {
            package: requirement.clone(),
            message: e.to_string(),
        })?;
        if !output.success {
            return Err(Error::InstallationFailed {
                package: requirement,
                message: runner::failure_text(&output),
            });
        }
        log::debug!("pip installed {requirement}");
        Ok(())
    }

    /// Installed version of a distribution, `None` if not installed.
    pub fn installed_version(&self, distribution: &str) -> Result<Option<String>> {
        let output = self.pip(&["show", distribution])?;
        if !output.success {
            return Ok(None);
        }
        Ok(parse_show_version(&output.stdout_str()))
    }
}

fn parse_show_version(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Version:"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
