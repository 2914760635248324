//! Directory resource - owned directories, optionally emptied on every pass

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use super::Owner;
use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};

/// What to do with a directory that already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirPolicy {
    /// Keep existing contents
    Preserve,
    /// Delete and recreate whenever it has contents
    Recreate,
}

/// A directory with an owner and permission bits
#[derive(Debug, Clone)]
pub struct Directory {
    pub path: PathBuf,
    pub owner: Option<Owner>,
    pub mode: u32,
    pub policy: DirPolicy,
}

impl Directory {
    pub fn new(path: impl AsRef<Path>, mode: u32, policy: DirPolicy) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            owner: None,
            mode,
            policy,
        }
    }

    pub fn owned_by(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    fn has_entries(&self, ctx: &ApplyContext) -> Result<bool> {
        let entries = ctx
            .fs
            .read_dir(&self.path)
            .with_context(|| format!("Failed to list {}", self.path.display()))?;
        Ok(!entries.is_empty())
    }

    fn chown(&self, ctx: &ApplyContext) -> Result<()> {
        let Some(owner) = &self.owner else {
            return Ok(());
        };
        let spec = owner.spec();
        let path = self.path.to_string_lossy();
        let output = ctx.runner.run("chown", &[&spec, &path])?;
        if !output.success {
            anyhow::bail!(
                "chown {spec} {} failed: {}",
                self.path.display(),
                output.stderr_str().trim()
            );
        }
        Ok(())
    }
}

impl Resource for Directory {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        match self.policy {
            DirPolicy::Preserve => format!("Directory {}", self.path.display()),
            DirPolicy::Recreate => format!("Empty directory {}", self.path.display()),
        }
    }

    fn resource_type(&self) -> &'static str {
        "directory"
    }

    fn current_state(&self, ctx: &ApplyContext) -> Result<ResourceState> {
        if !ctx.fs.is_dir(&self.path) {
            return Ok(ResourceState::Absent);
        }

        let mode = ctx.fs.mode(&self.path)?;
        if mode != self.mode {
            return Ok(ResourceState::Modified {
                from: format!("mode {mode:04o}"),
                to: format!("mode {:04o}", self.mode),
            });
        }
        if self.policy == DirPolicy::Recreate && self.has_entries(ctx)? {
            return Ok(ResourceState::Modified {
                from: "has contents".to_string(),
                to: "empty".to_string(),
            });
        }
        Ok(self.desired_state())
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present(format!("mode {:04o}", self.mode))
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let existed = ctx.fs.is_dir(&self.path);
        let mut changed = false;

        if existed && self.policy == DirPolicy::Recreate && self.has_entries(ctx)? {
            ctx.fs
                .remove_dir_all(&self.path)
                .with_context(|| format!("Failed to clear {}", self.path.display()))?;
            changed = true;
        }
        if !ctx.fs.is_dir(&self.path) {
            ctx.fs
                .create_dir_all(&self.path)
                .with_context(|| format!("Failed to create {}", self.path.display()))?;
        }

        self.chown(ctx)?;

        if ctx.fs.mode(&self.path)? != self.mode {
            ctx.fs
                .set_mode(&self.path, self.mode)
                .with_context(|| format!("Failed to chmod {}", self.path.display()))?;
            changed = true;
        }

        Ok(match (existed, changed) {
            (false, _) => ApplyResult::Created,
            (true, true) => ApplyResult::Modified,
            (true, false) => ApplyResult::NoChange,
        })
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let removed = ctx
            .fs
            .remove_dir_all(&self.path)
            .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        Ok(if removed {
            ApplyResult::Removed
        } else {
            ApplyResult::NoChange
        })
    }
}
