//! Python runtime resources - the virtual environment and packages in it

use anyhow::Result;
use hostkit::pip::{self, PackageSpec, Pip};
use std::path::{Path, PathBuf};

use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};

/// An isolated Python environment
///
/// An existing environment with a working interpreter is never recreated;
/// wiping it is the job of [`Resource::remove`].
#[derive(Debug, Clone)]
pub struct VirtualEnv {
    pub dir: PathBuf,
    /// Host interpreter used to create it
    pub python: String,
}

impl VirtualEnv {
    pub fn new(dir: impl AsRef<Path>, python: impl Into<String>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            python: python.into(),
        }
    }

    fn is_valid(&self, ctx: &ApplyContext) -> bool {
        ctx.fs.exists(&pip::venv_python(&self.dir))
    }
}

impl Resource for VirtualEnv {
    fn id(&self) -> String {
        self.dir.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("Virtual environment {}", self.dir.display())
    }

    fn resource_type(&self) -> &'static str {
        "virtualenv"
    }

    fn current_state(&self, ctx: &ApplyContext) -> Result<ResourceState> {
        if self.is_valid(ctx) {
            Ok(self.desired_state())
        } else if ctx.fs.is_dir(&self.dir) {
            Ok(ResourceState::Modified {
                from: "no interpreter".to_string(),
                to: "valid environment".to_string(),
            })
        } else {
            Ok(ResourceState::Absent)
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::Present { details: None }
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        if self.is_valid(ctx) {
            return Ok(ApplyResult::NoChange);
        }
        let existed = ctx.fs.is_dir(&self.dir);
        pip::create_venv(ctx.runner, &self.python, &self.dir)?;
        Ok(if existed {
            ApplyResult::Modified
        } else {
            ApplyResult::Created
        })
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        Ok(if ctx.fs.remove_dir_all(&self.dir)? {
            ApplyResult::Removed
        } else {
            ApplyResult::NoChange
        })
    }
}

/// A package installed into a virtual environment
///
/// Unpinned specs are upgraded in place on every apply; pinned specs are
/// installed only when the exact version is not already there.
#[derive(Debug, Clone)]
pub struct PythonPackage {
    pub venv: PathBuf,
    pub spec: PackageSpec,
}

impl PythonPackage {
    pub fn new(venv: impl AsRef<Path>, spec: PackageSpec) -> Self {
        Self {
            venv: venv.as_ref().to_path_buf(),
            spec,
        }
    }

    fn installed(&self, ctx: &ApplyContext) -> Result<Option<String>> {
        if !ctx.fs.exists(&pip::venv_python(&self.venv)) {
            return Ok(None);
        }
        Ok(Pip::for_venv(ctx.runner, &self.venv).installed_version(self.spec.distribution())?)
    }
}

impl Resource for PythonPackage {
    fn id(&self) -> String {
        self.spec.distribution().to_string()
    }

    fn description(&self) -> String {
        format!("Python package {}", self.spec.requirement())
    }

    fn resource_type(&self) -> &'static str {
        "python_package"
    }

    fn current_state(&self, ctx: &ApplyContext) -> Result<ResourceState> {
        match (self.installed(ctx)?, &self.spec.version) {
            (None, _) => Ok(ResourceState::Absent),
            (Some(installed), Some(wanted)) if &installed != wanted => {
                Ok(ResourceState::Modified {
                    from: installed,
                    to: wanted.clone(),
                })
            }
            (Some(_), _) => Ok(self.desired_state()),
        }
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present(self.spec.version.as_deref().unwrap_or("latest"))
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let before = self.installed(ctx)?;
        if let (Some(installed), Some(wanted)) = (&before, &self.spec.version) {
            if installed == wanted {
                return Ok(ApplyResult::NoChange);
            }
        }

        let pip = Pip::for_venv(ctx.runner, &self.venv);
        pip.install(&self.spec, self.spec.version.is_none())?;
        let after = pip.installed_version(self.spec.distribution())?;

        Ok(match before {
            None => ApplyResult::Created,
            Some(before) if Some(&before) == after.as_ref() => ApplyResult::NoChange,
            Some(_) => ApplyResult::Modified,
        })
    }

    /// Packages go away with their environment
    fn remove(&self, _ctx: &ApplyContext) -> Result<ApplyResult> {
        Ok(ApplyResult::Skipped {
            reason: "removed with the virtual environment".to_string(),
        })
    }
}
