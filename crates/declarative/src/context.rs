//! Apply context and provider traits
//!
//! These traits allow the declarative crate to be used without
//! depending on specific implementations of process spawning,
//! filesystem access, progress reporting, etc.

use crate::types::{ApplyResult, CommandOutput};
use anyhow::Result;
use std::io;
use std::path::{Path, PathBuf};

/// Provider for running external programs
///
/// Implement this trait to run commands on the host. A non-zero exit is
/// reported through [`CommandOutput::success`]; `Err` is reserved for
/// failing to run the program at all.
pub trait CommandRunner: Send + Sync {
    /// Run a command and capture its output
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput>;
}

/// Provider for filesystem queries and mutations
///
/// Every precondition check a resource makes ("does this path exist?")
/// goes through this trait. The `remove_*` methods report whether
/// anything was there, and treat an absent path as success.
pub trait HostFs: Send + Sync {
    /// Whether anything exists at the path
    fn exists(&self, path: &Path) -> bool;

    /// Whether a directory exists at the path
    fn is_dir(&self, path: &Path) -> bool;

    /// Read a file as UTF-8 text
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Write a file, creating parent directories as needed
    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    /// Create a directory and all of its parents
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Set unix permission bits
    fn set_mode(&self, path: &Path, mode: u32) -> io::Result<()>;

    /// Get unix permission bits
    fn mode(&self, path: &Path) -> io::Result<u32>;

    /// List the entries of a directory
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Remove a file; `Ok(false)` if it did not exist
    fn remove_file(&self, path: &Path) -> io::Result<bool>;

    /// Remove a directory tree; `Ok(false)` if it did not exist
    fn remove_dir_all(&self, path: &Path) -> io::Result<bool>;
}

/// Progress callback for execution operations
///
/// Implement this trait to receive progress updates during execution.
pub trait ProgressCallback {
    /// Called when starting a batch of resources
    fn on_batch_start(&mut self, count: usize, teardown: bool);

    /// Called when starting to apply a single resource
    fn on_resource_start(&mut self, id: &str, description: &str);

    /// Called when a resource application completes
    fn on_resource_complete(&mut self, id: &str, result: &ApplyResult);

    /// Called when a batch completes
    fn on_batch_complete(&mut self);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_batch_start(&mut self, _count: usize, _teardown: bool) {}
    fn on_resource_start(&mut self, _id: &str, _description: &str) {}
    fn on_resource_complete(&mut self, _id: &str, _result: &ApplyResult) {}
    fn on_batch_complete(&mut self) {}
}

/// Context passed to resource operations
pub struct ApplyContext<'a> {
    /// Whether to output verbose information
    pub verbose: bool,
    /// Runner for external programs
    pub runner: &'a dyn CommandRunner,
    /// Filesystem access
    pub fs: &'a dyn HostFs,
}

impl<'a> ApplyContext<'a> {
    /// Create a new apply context
    pub fn new(runner: &'a dyn CommandRunner, fs: &'a dyn HostFs) -> Self {
        Self {
            verbose: false,
            runner,
            fs,
        }
    }

    /// Same context with verbose output toggled
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}
