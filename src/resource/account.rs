//! Service account resource - OS user/group, scheduler group, Slurm accounting

use anyhow::{Context, Result, bail};
use hostkit::accounts::{Accounts, SlurmAccounting};

use super::Owner;
use declarative::{ApplyContext, ApplyResult, Resource, ResourceState};

/// Slurm accounting registration for the account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub account: String,
    pub admin_level: String,
}

/// The dedicated account the agent runs as
///
/// Every sub-step checks first, so applying against a provisioned host
/// never trips over "already exists".
#[derive(Debug, Clone)]
pub struct ServiceAccount {
    pub owner: Owner,
    /// Group the account joins so the scheduler's hooks can use it
    pub scheduler_group: String,
    pub registration: Option<Registration>,
}

impl ServiceAccount {
    pub fn new(owner: Owner, scheduler_group: impl Into<String>) -> Self {
        Self {
            owner,
            scheduler_group: scheduler_group.into(),
            registration: None,
        }
    }

    pub fn registered_as(mut self, account: &str, admin_level: &str) -> Self {
        self.registration = Some(Registration {
            account: account.to_string(),
            admin_level: admin_level.to_string(),
        });
        self
    }

    fn register(&self, ctx: &ApplyContext, registration: &Registration) -> Result<bool> {
        let sacct = SlurmAccounting::new(ctx.runner);
        let user = &self.owner.user;
        match sacct.admin_level(user)? {
            Some(level) if level.eq_ignore_ascii_case(&registration.admin_level) => Ok(false),
            Some(level) => {
                sacct.set_admin_level(user, &registration.admin_level)?;
                log::info!(
                    "Raised {user} in Slurm accounting from {level} to {}",
                    registration.admin_level
                );
                Ok(true)
            }
            None => {
                sacct.register(user, &registration.account, &registration.admin_level)?;
                log::info!(
                    "Registered {user} in Slurm accounting as {}",
                    registration.admin_level
                );
                Ok(true)
            }
        }
    }
}

impl Resource for ServiceAccount {
    fn id(&self) -> String {
        self.owner.user.clone()
    }

    fn description(&self) -> String {
        format!("Service account {}", self.owner.spec())
    }

    fn resource_type(&self) -> &'static str {
        "account"
    }

    fn current_state(&self, ctx: &ApplyContext) -> Result<ResourceState> {
        let accounts = Accounts::new(ctx.runner);
        if !accounts.user_exists(&self.owner.user)? {
            return Ok(ResourceState::Absent);
        }
        let groups = accounts.groups_of(&self.owner.user)?;
        if !groups.contains(&self.scheduler_group) {
            return Ok(ResourceState::Modified {
                from: groups.join(","),
                to: format!("member of {}", self.scheduler_group),
            });
        }
        Ok(self.desired_state())
    }

    fn desired_state(&self) -> ResourceState {
        ResourceState::present(format!("member of {}", self.scheduler_group))
    }

    fn apply(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let accounts = Accounts::new(ctx.runner);
        let user = &self.owner.user;
        let group = &self.owner.group;
        let mut created = false;
        let mut modified = false;

        if !accounts.group_exists(group)? {
            accounts.create_group(group)?;
            created = true;
        }
        if !accounts.user_exists(user)? {
            accounts.create_user(user, group)?;
            created = true;
        }
        if !accounts.groups_of(user)?.contains(&self.scheduler_group) {
            accounts.add_to_group(user, &self.scheduler_group)?;
            modified = true;
        }

        if let Some(registration) = &self.registration {
            modified |= self
                .register(ctx, registration)
                .context("Slurm accounting registration")?;
        }

        Ok(match (created, modified) {
            (true, _) => ApplyResult::Created,
            (false, true) => ApplyResult::Modified,
            (false, false) => ApplyResult::NoChange,
        })
    }

    fn remove(&self, ctx: &ApplyContext) -> Result<ApplyResult> {
        let accounts = Accounts::new(ctx.runner);
        let user = &self.owner.user;
        let group = &self.owner.group;
        let mut removed = false;
        let mut errors = Vec::new();

        if self.registration.is_some() {
            let sacct = SlurmAccounting::new(ctx.runner);
            match sacct.is_registered(user) {
                Ok(true) => match sacct.deregister(user) {
                    Ok(()) => removed = true,
                    Err(e) => {
                        log::warn!("Could not remove {user} from Slurm accounting: {e}");
                        errors.push(format!("sacctmgr: {e}"));
                    }
                },
                Ok(false) => {}
                Err(e) => log::warn!("Could not query Slurm accounting for {user}: {e}"),
            }
        }
        match accounts.user_exists(user) {
            Ok(true) => match accounts.delete_user(user) {
                Ok(()) => removed = true,
                Err(e) => errors.push(e.to_string()),
            },
            Ok(false) => {}
            Err(e) => errors.push(e.to_string()),
        }
        if group != &self.scheduler_group {
            match accounts.group_exists(group) {
                Ok(true) => match accounts.delete_group(group) {
                    Ok(()) => removed = true,
                    Err(e) => errors.push(e.to_string()),
                },
                Ok(false) => {}
                Err(e) => errors.push(e.to_string()),
            }
        }

        if !errors.is_empty() {
            bail!("{}", errors.join("; "));
        }
        Ok(if removed {
            ApplyResult::Removed
        } else {
            ApplyResult::NoChange
        })
    }
}
