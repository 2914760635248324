//! A simulated host for reconciler tests
//!
//! Files live in a real sandbox directory through `LocalFs`; everything
//! behind a command (accounts, Slurm accounting, systemd, pip) is modelled
//! here and answered the way the real tools answer.

use anyhow::anyhow;
use declarative::{CommandOutput, CommandRunner};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct HostState {
    /// user -> primary group
    users: BTreeMap<String, String>,
    groups: BTreeSet<String>,
    /// user -> supplementary groups
    memberships: BTreeMap<String, BTreeSet<String>>,
    /// user -> accounting admin level
    registered: BTreeMap<String, String>,
    enabled: BTreeSet<String>,
    active: BTreeSet<String>,
    /// distribution -> installed version
    packages: BTreeMap<String, String>,
    calls: Vec<String>,
}

#[derive(Debug)]
pub struct SimulatedHost {
    unit_dir: PathBuf,
    /// distribution -> versions on the index, last one is latest
    index: BTreeMap<String, Vec<String>>,
    failures: Mutex<Vec<(Vec<String>, CommandOutput)>>,
    state: Mutex<HostState>,
}

impl SimulatedHost {
    /// A clean Slurm controller: only the scheduler group exists
    pub fn new(unit_dir: &Path, scheduler_group: &str) -> Self {
        let mut state = HostState::default();
        state.groups.insert(scheduler_group.to_string());
        Self {
            unit_dir: unit_dir.to_path_buf(),
            index: BTreeMap::new(),
            failures: Mutex::new(Vec::new()),
            state: Mutex::new(state),
        }
    }

    /// Publish versions of a distribution; the last one is latest
    pub fn publish(mut self, distribution: &str, versions: &[&str]) -> Self {
        self.index.insert(
            distribution.to_string(),
            versions.iter().map(|v| (*v).to_string()).collect(),
        );
        self
    }

    /// Answer argvs starting with `prefix` with a failure
    pub fn fail(&self, prefix: &[&str], output: CommandOutput) {
        let prefix = prefix.iter().map(|s| (*s).to_string()).collect();
        lock(&self.failures).push((prefix, output));
    }

    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    pub fn user_exists(&self, user: &str) -> bool {
        lock(&self.state).users.contains_key(user)
    }

    pub fn group_exists(&self, group: &str) -> bool {
        lock(&self.state).groups.contains(group)
    }

    pub fn in_group(&self, user: &str, group: &str) -> bool {
        lock(&self.state)
            .memberships
            .get(user)
            .is_some_and(|groups| groups.contains(group))
    }

    pub fn is_registered(&self, user: &str) -> bool {
        lock(&self.state).registered.contains_key(user)
    }

    pub fn admin_level(&self, user: &str) -> Option<String> {
        lock(&self.state).registered.get(user).cloned()
    }

    /// Seed an accounting registration made outside the reconciler
    pub fn register(&self, user: &str, admin_level: &str) {
        lock(&self.state)
            .registered
            .insert(user.to_string(), admin_level.to_string());
    }

    pub fn is_enabled(&self, unit: &str) -> bool {
        lock(&self.state).enabled.contains(unit)
    }

    pub fn is_active(&self, unit: &str) -> bool {
        lock(&self.state).active.contains(unit)
    }

    pub fn installed(&self, distribution: &str) -> Option<String> {
        lock(&self.state).packages.get(distribution).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    fn injected_failure(&self, argv: &[&str]) -> Option<CommandOutput> {
        lock(&self.failures)
            .iter()
            .rev()
            .find(|(prefix, _)| {
                argv.len() >= prefix.len() && argv.iter().zip(prefix).all(|(a, p)| a == p)
            })
            .map(|(_, output)| output.clone())
    }

    fn unit_file_exists(&self, unit: &str) -> bool {
        self.unit_dir.join(unit).exists()
    }

    fn accounts(&self, cmd: &str, args: &[&str]) -> CommandOutput {
        let mut state = lock(&self.state);
        match (cmd, args) {
            ("id", ["-u", user]) => match state.users.contains_key(*user) {
                true => CommandOutput::ok("999\n"),
                false => CommandOutput::failed(1, format!("id: '{user}': no such user")),
            },
            ("id", ["-nG", user]) => match state.users.get(*user) {
                Some(primary) => {
                    let mut groups = vec![primary.clone()];
                    if let Some(extra) = state.memberships.get(*user) {
                        groups.extend(extra.iter().cloned());
                    }
                    CommandOutput::ok(format!("{}\n", groups.join(" ")))
                }
                None => CommandOutput::failed(1, format!("id: '{user}': no such user")),
            },
            ("getent", ["group", group]) => match state.groups.contains(*group) {
                true => CommandOutput::ok(format!("{group}:x:998:\n")),
                false => CommandOutput::failed(2, ""),
            },
            ("groupadd", ["--system", group]) => {
                if !state.groups.insert((*group).to_string()) {
                    return CommandOutput::failed(9, format!("groupadd: group '{group}' already exists"));
                }
                CommandOutput::ok("")
            }
            ("useradd", [.., "--gid", group, "--no-create-home", "--shell", _, user]) => {
                if state.users.contains_key(*user) {
                    return CommandOutput::failed(9, format!("useradd: user '{user}' already exists"));
                }
                if !state.groups.contains(*group) {
                    return CommandOutput::failed(6, format!("useradd: group '{group}' does not exist"));
                }
                state.users.insert((*user).to_string(), (*group).to_string());
                CommandOutput::ok("")
            }
            ("usermod", ["--append", "--groups", group, user]) => {
                if !state.users.contains_key(*user) {
                    return CommandOutput::failed(6, format!("usermod: user '{user}' does not exist"));
                }
                if !state.groups.contains(*group) {
                    return CommandOutput::failed(6, format!("usermod: group '{group}' does not exist"));
                }
                state
                    .memberships
                    .entry((*user).to_string())
                    .or_default()
                    .insert((*group).to_string());
                CommandOutput::ok("")
            }
            ("userdel", [user]) => {
                if state.users.remove(*user).is_none() {
                    return CommandOutput::failed(6, format!("userdel: user '{user}' does not exist"));
                }
                state.memberships.remove(*user);
                CommandOutput::ok("")
            }
            ("groupdel", [group]) => {
                if state.users.values().any(|g| g == group) {
                    return CommandOutput::failed(8, "groupdel: cannot remove the primary group");
                }
                if !state.groups.remove(*group) {
                    return CommandOutput::failed(6, format!("groupdel: group '{group}' does not exist"));
                }
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(2, format!("unexpected: {cmd} {}", args.join(" "))),
        }
    }

    fn sacctmgr(&self, args: &[&str]) -> CommandOutput {
        let mut state = lock(&self.state);
        match args {
            ["--noheader", "--parsable2", "show", "user", filter, "format=User,AdminLevel"] => {
                let user = filter.trim_start_matches("name=");
                match state.registered.get(user) {
                    Some(level) => CommandOutput::ok(format!("{user}|{level}\n")),
                    None => CommandOutput::ok(""),
                }
            }
            ["--immediate", "add", "user", user, rest @ ..] => {
                let level = rest
                    .iter()
                    .find_map(|arg| arg.strip_prefix("adminlevel="))
                    .unwrap_or("None");
                state
                    .registered
                    .insert((*user).to_string(), level.to_string());
                CommandOutput::ok(format!(" Adding User(s)\n  {user}\n"))
            }
            ["--immediate", "modify", "user", "where", filter, "set", level] => {
                let user = filter.trim_start_matches("name=");
                let level = level.trim_start_matches("adminlevel=");
                match state.registered.get_mut(user) {
                    Some(current) => {
                        *current = level.to_string();
                        CommandOutput::ok(format!(" Modified users...\n  {user}\n"))
                    }
                    None => CommandOutput::ok(" Nothing modified\n"),
                }
            }
            ["--immediate", "delete", "user", filter] => {
                let user = filter.trim_start_matches("name=");
                if state.registered.remove(user).is_some() {
                    CommandOutput::ok(format!(" Deleting users...\n  {user}\n"))
                } else {
                    CommandOutput::ok(" Nothing deleted\n")
                }
            }
            _ => CommandOutput::failed(1, "sacctmgr: unexpected arguments"),
        }
    }

    fn systemctl(&self, args: &[&str]) -> CommandOutput {
        let mut state = lock(&self.state);
        match args {
            ["daemon-reload"] => CommandOutput::ok(""),
            ["is-enabled", unit] => match state.enabled.contains(*unit) {
                true => CommandOutput::ok("enabled\n"),
                false if self.unit_file_exists(unit) => CommandOutput {
                    stdout: b"disabled\n".to_vec(),
                    ..CommandOutput::failed(1, "")
                },
                false => CommandOutput::failed(
                    1,
                    format!("Failed to get unit file state for {unit}: No such file or directory"),
                ),
            },
            ["is-active", unit] => match state.active.contains(*unit) {
                true => CommandOutput::ok("active\n"),
                false => CommandOutput {
                    stdout: b"inactive\n".to_vec(),
                    ..CommandOutput::failed(3, "")
                },
            },
            [verb @ ("enable" | "disable"), unit] => {
                if !self.unit_file_exists(unit) {
                    return CommandOutput::failed(
                        1,
                        format!("Failed to {verb} unit: Unit file {unit} does not exist."),
                    );
                }
                if *verb == "enable" {
                    state.enabled.insert((*unit).to_string());
                } else {
                    state.enabled.remove(*unit);
                }
                CommandOutput::ok("")
            }
            ["start", unit] => {
                if !self.unit_file_exists(unit) {
                    return CommandOutput::failed(
                        5,
                        format!("Failed to start {unit}: Unit {unit} not found."),
                    );
                }
                state.active.insert((*unit).to_string());
                CommandOutput::ok("")
            }
            ["stop", unit] => {
                if !state.active.remove(*unit) && !self.unit_file_exists(unit) {
                    return CommandOutput::failed(
                        5,
                        format!("Failed to stop {unit}: Unit {unit} not loaded."),
                    );
                }
                CommandOutput::ok("")
            }
            _ => CommandOutput::failed(1, "systemctl: unexpected arguments"),
        }
    }

    fn create_venv(&self, dir: &str) -> anyhow::Result<CommandOutput> {
        let python = Path::new(dir).join("bin").join("python3");
        if !python.exists() {
            lock(&self.state).packages.clear();
        }
        std::fs::create_dir_all(Path::new(dir).join("bin"))?;
        std::fs::write(&python, "#!/bin/false\n")?;
        Ok(CommandOutput::ok(""))
    }

    fn pip(&self, args: &[&str]) -> CommandOutput {
        let mut state = lock(&self.state);
        match args {
            ["show", distribution] => match state.packages.get(*distribution) {
                Some(version) => {
                    CommandOutput::ok(format!("Name: {distribution}\nVersion: {version}\n"))
                }
                None => CommandOutput::failed(
                    1,
                    format!("WARNING: Package(s) not found: {distribution}"),
                ),
            },
            ["install", rest @ ..] => {
                let mut requirement = None;
                let mut iter = rest.iter();
                while let Some(arg) = iter.next() {
                    match *arg {
                        "--upgrade" => {}
                        "--extra-index-url" => {
                            iter.next();
                        }
                        other => requirement = Some(other),
                    }
                }
                let Some(requirement) = requirement else {
                    return CommandOutput::failed(1, "ERROR: You must give at least one requirement");
                };

                let (name, pinned) = match requirement.split_once("==") {
                    Some((name, version)) => (name, Some(version)),
                    None => (requirement, None),
                };
                let distribution = name.split('[').next().unwrap_or(name);
                let available = self.index.get(distribution).cloned().unwrap_or_default();
                let version = match pinned {
                    Some(version) => available.iter().find(|v| *v == version),
                    None => available.last(),
                };
                let Some(version) = version else {
                    return CommandOutput::failed(
                        1,
                        format!("ERROR: No matching distribution found for {requirement}"),
                    );
                };

                state
                    .packages
                    .insert(distribution.to_string(), version.clone());
                CommandOutput::ok(format!("Successfully installed {distribution}-{version}\n"))
            }
            _ => CommandOutput::failed(1, "pip: unexpected arguments"),
        }
    }
}

impl CommandRunner for SimulatedHost {
    fn run(&self, cmd: &str, args: &[&str]) -> anyhow::Result<CommandOutput> {
        let argv: Vec<&str> = std::iter::once(cmd).chain(args.iter().copied()).collect();
        lock(&self.state).calls.push(argv.join(" "));

        if let Some(output) = self.injected_failure(&argv) {
            return Ok(output);
        }

        match (cmd, args) {
            ("systemctl", _) => Ok(self.systemctl(args)),
            ("sacctmgr", _) => Ok(self.sacctmgr(args)),
            ("chown", [_, path]) => match Path::new(path).exists() {
                true => Ok(CommandOutput::ok("")),
                false => Ok(CommandOutput::failed(
                    1,
                    format!("chown: cannot access '{path}': No such file or directory"),
                )),
            },
            (_, ["-m", "venv", dir]) => self.create_venv(dir),
            (python, ["-m", "pip", rest @ ..]) => {
                if !Path::new(python).exists() {
                    return Err(anyhow!("Failed to execute: {python}: No such file or directory"));
                }
                Ok(self.pip(rest))
            }
            _ => Ok(self.accounts(cmd, args)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
