//! OS users and groups, and Slurm accounting registration.

use crate::error::Result;
use crate::runner::{self, run_checked};
use declarative::CommandRunner;

/// Shell for service accounts.
pub const NOLOGIN_SHELL: &str = "/usr/sbin/nologin";

/// Local user and group management via shadow-utils.
pub struct Accounts<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Accounts<'a> {
    /// Manage accounts through `runner`.
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Whether the user exists.
    pub fn user_exists(&self, user: &str) -> Result<bool> {
        Ok(runner::run(self.runner, "id", &["-u", user])?.success)
    }

    /// Whether the group exists.
    pub fn group_exists(&self, group: &str) -> Result<bool> {
        Ok(runner::run(self.runner, "getent", &["group", group])?.success)
    }

    /// Create a system group.
    pub fn create_group(&self, group: &str) -> Result<()> {
        run_checked(self.runner, "groupadd", &["--system", group])?;
        Ok(())
    }

    /// Create a system user with `group` as primary group and no login.
    pub fn create_user(&self, user: &str, group: &str) -> Result<()> {
        run_checked(
            self.runner,
            "useradd",
            &[
                "--system",
                "--gid",
                group,
                "--no-create-home",
                "--shell",
                NOLOGIN_SHELL,
                user,
            ],
        )?;
        Ok(())
    }

    /// Names of every group the user belongs to.
    pub fn groups_of(&self, user: &str) -> Result<Vec<String>> {
        let output = runner::run(self.runner, "id", &["-nG", user])?;
        if !output.success {
            return Ok(Vec::new());
        }
        Ok(output
            .stdout_str()
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }

    /// Add the user to a supplementary group.
    pub fn add_to_group(&self, user: &str, group: &str) -> Result<()> {
        run_checked(self.runner, "usermod", &["--append", "--groups", group, user])?;
        Ok(())
    }

    /// Delete a user.
    pub fn delete_user(&self, user: &str) -> Result<()> {
        run_checked(self.runner, "userdel", &[user])?;
        Ok(())
    }

    /// Delete a group.
    pub fn delete_group(&self, group: &str) -> Result<()> {
        run_checked(self.runner, "groupdel", &[group])?;
        Ok(())
    }
}

/// Slurm accounting (`sacctmgr`) registration of a user.
pub struct SlurmAccounting<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> SlurmAccounting<'a> {
    /// Talk to sacctmgr through `runner`.
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Admin level the accounting database holds for the user.
    ///
    /// `None` when the user is not registered at all.
    pub fn admin_level(&self, user: &str) -> Result<Option<String>> {
        let filter = format!("name={user}");
        let stdout = run_checked(
            self.runner,
            "sacctmgr",
            &[
                "--noheader",
                "--parsable2",
                "show",
                "user",
                &filter,
                "format=User,AdminLevel",
            ],
        )?;
        Ok(stdout.lines().find_map(|line| {
            let (name, level) = line.trim().split_once('|').unwrap_or((line.trim(), ""));
            (name == user).then(|| level.trim().to_string())
        }))
    }

    /// Whether the user is known to the accounting database.
    pub fn is_registered(&self, user: &str) -> Result<bool> {
        Ok(self.admin_level(user)?.is_some())
    }

    /// Register the user under `account` with an admin level.
    ///
    /// `Operator` is enough to create reservations.
    pub fn register(&self, user: &str, account: &str, admin_level: &str) -> Result<()> {
        let account = format!("account={account}");
        let admin_level = format!("adminlevel={admin_level}");
        run_checked(
            self.runner,
            "sacctmgr",
            &["--immediate", "add", "user", user, &account, &admin_level],
        )?;
        Ok(())
    }

    /// Change the admin level of a registered user.
    pub fn set_admin_level(&self, user: &str, admin_level: &str) -> Result<()> {
        let filter = format!("name={user}");
        let admin_level = format!("adminlevel={admin_level}");
        run_checked(
            self.runner,
            "sacctmgr",
            &["--immediate", "modify", "user", "where", &filter, "set", &admin_level],
        )?;
        Ok(())
    }

    /// Remove the user from the accounting database.
    pub fn deregister(&self, user: &str) -> Result<()> {
        let filter = format!("name={user}");
        run_checked(
            self.runner,
            "sacctmgr",
            &["--immediate", "delete", "user", &filter],
        )?;
        Ok(())
    }
}
