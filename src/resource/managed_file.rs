//! Managed file resource - whole-file content with fixed permissions

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};

/// A file whose entire content the charm owns
///
/// The file is rewritten in full whenever its content differs; there are
/// no partial updates.
#[derive(Debug, Clone)]
pub struct ManagedFile {
    pub path: PathBuf,
    pub content: String,
    pub mode: u32,
    /// Resource type reported for grouping ("file", "script", ...)
    pub kind: &'static str,
}

impl ManagedFile {
    pub fn new(path: impl AsRef<Path>, content: impl Into<String>, mode: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            content: content.into(),
            mode,
            kind: "file",
        }
    }

    pub fn kind(mut self, kind: &'static str) -> Self {
        self.kind = kind;
        self
    }

    /// Current content, `None` if the file does not exist
    pub fn read_current(&self, ctx: &ApplyContext) -> Result<Option<String>> {
        if !ctx.fs.exists(&self.path) {
            return Ok(None);
        }
        let content = ctx
            .fs
            .read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        Ok(Some(content))
    }
}

impl Resource for ManagedFile {
    fn id(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn description(&self) -> String {
        format!("{} {}", capitalize(self.kind), self.path.display())
    }

    fn resource_type(&self) -> &'static str {
        self.kind
    }

    fn current_state(&self, ctx: &ApplyContext) -> Result<ResourceState> {
        let Some(current) = self.read_current(ctx)? else {
            return Ok(ResourceState::Absent);
        };
        if current != self.content {
            return Ok(ResourceState::Modified {
                from: format!("{} bytes", current.len()),
                to: format!("{} bytes", self.content.len()),
            });
        }
        let mode = ctx.fs.mode(&self.path)?;
        if mode != self.mode {
            return Ok(ResourceState::Modified {
                from: format!("mode {mode:04o}"),
                to: format!("mode {:04o}", self.mode),
            });
        }
        Ok(self.desired_state())
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present(format!("{} bytes, mode {:04o}", self.content.len(), self.mode))
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let current = self.read_current(ctx)?;
        let mut changed = false;

        if current.as_deref() != Some(self.content.as_str()) {
            ctx.fs
                .write(&self.path, self.content.as_bytes())
                .with_context(|| format!("Failed to write {}", self.path.display()))?;
            changed = true;
        }
        if ctx.fs.mode(&self.path)? != self.mode {
            ctx.fs
                .set_mode(&self.path, self.mode)
                .with_context(|| format!("Failed to chmod {}", self.path.display()))?;
            changed = true;
        }

        Ok(match (current.is_some(), changed) {
            (false, _) => ApplyResult::Created,
            (true, true) => ApplyResult::Modified,
            (true, false) => ApplyResult::NoChange,
        })
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let removed = ctx
            .fs
            .remove_file(&self.path)
            .with_context(|| format!("Failed to remove {}", self.path.display()))?;
        Ok(if removed {
            ApplyResult::Removed
        } else {
            ApplyResult::NoChange
        })
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
