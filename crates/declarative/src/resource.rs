//! Resource trait for declarative state management
//!
//! A Resource represents something on the host that can be in a certain
//! state, can be changed to reach a desired state, and can be removed.

use crate::context::ApplyContext;
use crate::types::{ApplyResult, ResourceState};
use anyhow::Result;
use std::fmt;

/// Core trait for declarative resources
///
/// Every resource in the system implements this trait, which provides:
/// - Identity (id, description, type)
/// - State detection (current vs desired)
/// - State convergence (apply)
/// - Teardown (remove)
///
/// # Contract
///
/// `apply` run twice with the same resource leaves identical host state and
/// never fails because something "already exists". `remove` run against an
/// absent resource returns [`ApplyResult::NoChange`], never an error.
/// Neither method may assume an earlier step of the same pass has run:
/// each re-checks its own precondition through the context.
///
/// Returning `Err` from `apply` is a hard failure that stops a
/// [`converge`](crate::converge) pass. Returning
/// [`ApplyResult::Failed`] records a failure the pass can survive.
pub trait Resource: Send + Sync + fmt::Debug {
    /// Unique identifier for this resource
    ///
    /// This should be stable and uniquely identify the resource
    /// within its type. Examples:
    /// - "/var/cache/license-manager" for a directory
    /// - "license-manager-agent.service" for a supervisor unit
    /// - "license-manager" for an OS account
    fn id(&self) -> String;

    /// Human-readable description of what this resource does
    fn description(&self) -> String;

    /// Resource type category
    ///
    /// Used for grouping and filtering. Examples:
    /// - "directory", "file", "unit_file"
    /// - "service_unit"
    /// - "python_package", "virtualenv"
    fn resource_type(&self) -> &'static str;

    /// Detect the current state of this resource
    ///
    /// This should query the host through the context to determine what
    /// state the resource is currently in.
    fn current_state(&self, ctx: &ApplyContext) -> Result<ResourceState>;

    /// Get the desired state for this resource
    ///
    /// This is typically derived from configuration.
    fn desired_state(&self) -> ResourceState;

    /// Check if the resource needs changes to reach desired state
    ///
    /// Default implementation compares current and desired states.
    fn needs_apply(&self, ctx: &ApplyContext) -> Result<bool> {
        let current = self.current_state(ctx)?;
        let desired = self.desired_state();
        Ok(current != desired)
    }

    /// Apply changes to reach the desired state
    ///
    /// This method should:
    /// 1. Check if already in desired state (return NoChange)
    /// 2. Make the necessary changes
    /// 3. Return the appropriate ApplyResult
    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult>;

    /// Remove everything this resource provisioned
    ///
    /// Absent is success: return NoChange when there is nothing to remove.
    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult>;
}

/// A boxed resource for type-erased storage
pub type BoxedResource = Box<dyn Resource>;
