//! # Declarative
//!
//! A framework for declarative host resource management.
//!
//! This crate provides the core abstractions for declaring desired state,
//! detecting current state, converging a host to match it, and tearing
//! down whatever was provisioned.
//!
//! ## Core Concepts
//!
//! - **Resource**: Something on the host the caller owns (a directory, a file,
//!   a supervisor unit, an OS account, an installed package)
//! - **ResourceState**: The current or desired state of a resource
//! - **converge**: Applies resources in order and stops at the first hard failure
//! - **teardown**: Removes resources in order and never stops early
//!
//! Both `apply` and `remove` must be idempotent: applying twice leaves the
//! same host state as applying once, and removing something already absent
//! is a no-op rather than an error.
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{ApplyContext, ApplyResult, Resource, ResourceState, converge, NoProgress};
//!
//! #[derive(Debug)]
//! struct Marker { path: std::path::PathBuf }
//!
//! impl Resource for Marker {
//!     fn id(&self) -> String { self.path.display().to_string() }
//!     fn description(&self) -> String { format!("Marker file {}", self.path.display()) }
//!     fn resource_type(&self) -> &'static str { "marker" }
//!
//!     fn current_state(&self, ctx: &ApplyContext) -> anyhow::Result<ResourceState> {
//!         if ctx.fs.exists(&self.path) {
//!             Ok(ResourceState::Present { details: None })
//!         } else {
//!             Ok(ResourceState::Absent)
//!         }
//!     }
//!
//!     fn desired_state(&self) -> ResourceState {
//!         ResourceState::Present { details: None }
//!     }
//!
//!     fn apply(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
//!         if ctx.fs.exists(&self.path) {
//!             return Ok(ApplyResult::NoChange);
//!         }
//!         ctx.fs.write(&self.path, b"")?;
//!         Ok(ApplyResult::Created)
//!     }
//!
//!     fn remove(&self, ctx: &ApplyContext) -> anyhow::Result<ApplyResult> {
//!         if ctx.fs.remove_file(&self.path)? {
//!             Ok(ApplyResult::Removed)
//!         } else {
//!             Ok(ApplyResult::NoChange)
//!         }
//!     }
//! }
//! ```
//!
//! ## Provider Traits
//!
//! The crate uses traits for dependency injection:
//!
//! - [`CommandRunner`]: Runs external programs (real processes or a test recorder)
//! - [`HostFs`]: Queries and mutates the filesystem (real or sandboxed)
//! - [`ProgressCallback`]: Receives progress updates
//!
//! This keeps every existence check and every subprocess call replaceable,
//! so convergence logic can be tested without touching the real host.

pub mod context;
pub mod diff;
pub mod executor;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use context::{ApplyContext, CommandRunner, HostFs, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, ResourceDiff, compute_diffs, group_by_type};
pub use executor::{ConvergeError, converge, teardown};
pub use resource::{BoxedResource, Resource};
pub use types::{ApplyResult, CommandOutput, ExecuteSummary, ResourceState};
