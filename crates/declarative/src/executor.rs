//! Execution engine - converges resources in order, or tears them down

use crate::context::{ApplyContext, ProgressCallback};
use crate::resource::Resource;
use crate::types::{ApplyResult, ExecuteSummary};
use thiserror::Error;

/// A hard failure that stopped a [`converge`] pass
///
/// Carries the summary of everything applied before the failing resource,
/// so callers can report partial progress.
#[derive(Debug, Error)]
#[error("{resource_id}: {error:#}")]
pub struct ConvergeError {
    /// Id of the resource whose apply failed
    pub resource_id: String,
    /// The underlying error
    pub error: anyhow::Error,
    /// Results recorded before the failure
    pub summary: ExecuteSummary,
}

/// Apply resources in order, stopping at the first hard failure
///
/// Each resource sees the host as the previous ones left it. An `Err` from
/// `apply` aborts the remaining resources; an [`ApplyResult::Failed`] is
/// recorded and the pass continues.
pub fn converge<P: ProgressCallback>(
    resources: &[Box<dyn Resource>],
    ctx: &ApplyContext,
    progress: &mut P,
) -> Result<ExecuteSummary, ConvergeError> {
    let mut summary = ExecuteSummary::default();
    progress.on_batch_start(resources.len(), false);

    for resource in resources {
        let id = resource.id();
        progress.on_resource_start(&id, &resource.description());

        match resource.apply(ctx) {
            Ok(result) => {
                log_result(resource.as_ref(), &result);
                progress.on_resource_complete(&id, &result);
                summary.add_result(&id, &result);
            }
            Err(error) => {
                let result = ApplyResult::Failed {
                    error: format!("{error:#}"),
                };
                progress.on_resource_complete(&id, &result);
                progress.on_batch_complete();
                log::error!("{} failed: {error:#}", resource.description());
                return Err(ConvergeError {
                    resource_id: id,
                    error,
                    summary,
                });
            }
        }
    }

    progress.on_batch_complete();
    Ok(summary)
}

/// Remove resources in order, never stopping early
///
/// Errors are logged and recorded as failures so one missing or stuck
/// resource never blocks cleanup of the rest.
pub fn teardown<P: ProgressCallback>(
    resources: &[Box<dyn Resource>],
    ctx: &ApplyContext,
    progress: &mut P,
) -> ExecuteSummary {
    let mut summary = ExecuteSummary::default();
    progress.on_batch_start(resources.len(), true);

    for resource in resources {
        let id = resource.id();
        progress.on_resource_start(&id, &resource.description());

        let result = match resource.remove(ctx) {
            Ok(result) => result,
            Err(e) => ApplyResult::Failed {
                error: format!("{e:#}"),
            },
        };

        if let ApplyResult::Failed { error } = &result {
            log::warn!("Could not remove {}: {error}", resource.description());
        } else {
            log_result(resource.as_ref(), &result);
        }
        progress.on_resource_complete(&id, &result);
        summary.add_result(&id, &result);
    }

    progress.on_batch_complete();
    summary
}

fn log_result(resource: &dyn Resource, result: &ApplyResult) {
    match result {
        ApplyResult::NoChange => log::debug!("{}: up to date", resource.description()),
        ApplyResult::Skipped { reason } => {
            log::debug!("{}: skipped ({reason})", resource.description());
        }
        ApplyResult::Failed { error } => log::warn!("{}: {error}", resource.description()),
        changed => log::info!("{}: {changed:?}", resource.description()),
    }
}
