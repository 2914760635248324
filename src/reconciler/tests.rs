use super::simulated::SimulatedHost;
use super::*;
use declarative::{CommandOutput, NoProgress};
use hostkit::LocalFs;
use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const AGENT: &str = "license-manager-agent";

struct Sandbox {
    tmp: TempDir,
    layout: HostLayout,
    host: SimulatedHost,
}

impl Sandbox {
    fn new() -> Self {
        Self::with_layout(|_| {})
    }

    fn with_layout(adjust: impl FnOnce(&mut HostLayout)) -> Self {
        let tmp = TempDir::new().unwrap();
        let mut layout = HostLayout::rooted_at(tmp.path());
        adjust(&mut layout);
        let host = SimulatedHost::new(&layout.unit_dir, &layout.scheduler_group)
            .publish("pip", &["23.3", "24.0"])
            .publish(AGENT, &["3.0.0", "3.2.0", "3.3.0"]);
        Self { tmp, layout, host }
    }

    fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(&self.layout, &self.host, &LocalFs)
    }

    fn install(&self) -> ReconciliationResult {
        self.reconciler()
            .install(&TargetConfiguration::default(), &mut NoProgress)
    }

    fn configure(&self) -> ReconciliationResult {
        self.reconciler()
            .configure(&TargetConfiguration::default(), &mut NoProgress)
    }

    fn upgrade(&self, version: &str) -> ReconciliationResult {
        self.reconciler()
            .upgrade(&TargetConfiguration::default(), version, &mut NoProgress)
    }

    fn remove(&self) -> ReconciliationResult {
        self.reconciler().remove(&mut NoProgress)
    }

    /// Every path under the sandbox with its content (files) and mode
    fn snapshot(&self) -> BTreeMap<PathBuf, (Option<String>, u32)> {
        let mut out = BTreeMap::new();
        walk(self.tmp.path(), &mut out);
        out
    }

    fn cache_is_empty(&self) -> bool {
        fs::read_dir(&self.layout.cache_dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false)
    }

    fn managed_paths(&self) -> Vec<PathBuf> {
        vec![
            self.layout.venv_dir.clone(),
            self.layout.cache_dir.clone(),
            self.layout.log_dir.clone(),
            self.layout.environment_file.clone(),
            self.layout.service_unit_path(),
            self.layout.timer_unit_path(),
        ]
    }
}

fn walk(dir: &Path, out: &mut BTreeMap<PathBuf, (Option<String>, u32)>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let meta = entry.metadata().unwrap();
        let mode = meta.permissions().mode() & 0o7777;
        if meta.is_dir() {
            out.insert(path.clone(), (None, mode));
            walk(&path, out);
        } else {
            out.insert(path.clone(), (fs::read_to_string(&path).ok(), mode));
        }
    }
}

// ============================================================================
// Install
// ============================================================================

#[test]
fn test_install_on_clean_host() {
    let sb = Sandbox::new();
    let result = sb.install();

    assert_eq!(result.status, Status::Applied, "{:?}", result.error);
    assert!(result.warnings.is_empty());

    assert!(sb.layout.venv_dir.join("bin/python3").exists());
    assert_eq!(sb.host.installed("pip").as_deref(), Some("24.0"));
    assert_eq!(sb.host.installed(AGENT).as_deref(), Some("3.3.0"));

    let prolog = fs::read_to_string(sb.layout.prolog_path()).unwrap();
    assert_eq!(prolog, render::PROLOG_SCRIPT);
    let mode = fs::metadata(sb.layout.epilog_path()).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);

    assert!(sb.host.user_exists("license-manager"));
    assert!(sb.host.in_group("license-manager", "slurm"));
    assert!(sb.host.is_registered("license-manager"));

    assert!(sb.cache_is_empty());
    let cache_mode = fs::metadata(&sb.layout.cache_dir).unwrap().permissions().mode();
    assert_eq!(cache_mode & 0o7777, 0o777);
    assert!(sb.layout.log_dir.is_dir());

    assert!(sb.layout.service_unit_path().exists());
    assert!(sb.layout.timer_unit_path().exists());
    assert!(sb.host.is_enabled("license-manager-agent.service"));
    assert!(sb.host.is_enabled("license-manager-agent.timer"));
    assert!(!sb.host.is_active("license-manager-agent.timer"));
}

#[test]
fn test_install_steps_run_in_order() {
    let sb = Sandbox::new();
    sb.install();

    let calls = sb.host.calls();
    let position = |needle: &str| {
        calls
            .iter()
            .position(|c| c.contains(needle))
            .unwrap_or_else(|| panic!("{needle} never ran"))
    };
    assert!(position("-m venv") < position("pip install --upgrade pip"));
    assert!(position("pip install --upgrade pip") < position(&format!("install --upgrade {AGENT}")));
    assert!(position("useradd") < position("chown"));
    assert!(position("chown") < position("systemctl enable"));
}

#[test]
fn test_install_twice_is_idempotent() {
    let sb = Sandbox::new();
    assert!(sb.install().is_success());
    let after_first = sb.snapshot();

    let second = sb.install();
    assert_eq!(second.status, Status::NoOp, "{:?}", second.summary);
    assert_eq!(sb.snapshot(), after_first);

    assert_eq!(sb.host.count("useradd"), 1);
    assert_eq!(sb.host.count("groupadd"), 1);
    assert_eq!(sb.host.count("sacctmgr --immediate add"), 1);
    assert_eq!(sb.host.count("systemctl enable"), 2);
}

#[test]
fn test_install_converges_from_partial_state() {
    let sb = Sandbox::new();
    fs::create_dir_all(sb.layout.venv_dir.join("bin")).unwrap();
    fs::write(sb.layout.venv_dir.join("bin/python3"), "").unwrap();
    fs::create_dir_all(&sb.layout.cache_dir).unwrap();
    fs::write(sb.layout.cache_dir.join("stale.json"), "{}").unwrap();

    let result = sb.install();
    assert!(result.is_success(), "{:?}", result.error);
    assert_eq!(sb.host.count("python3 -m venv"), 0);
    assert_eq!(sb.host.installed(AGENT).as_deref(), Some("3.3.0"));
    assert!(sb.cache_is_empty());
    assert!(sb.host.is_enabled("license-manager-agent.service"));
}

#[test]
fn test_install_after_partial_failure() {
    let sb = Sandbox::new();
    sb.host.fail(&["useradd"], CommandOutput::failed(1, "useradd: cannot lock /etc/passwd"));
    assert!(!sb.install().is_success());

    sb.host.clear_failures();
    let retry = sb.install();
    assert!(retry.is_success(), "{:?}", retry.error);
    assert_eq!(sb.host.count("groupadd"), 1);
    assert!(sb.host.user_exists("license-manager"));
}

#[test]
fn test_install_failure_aborts_remaining_steps() {
    let sb = Sandbox::new();
    let python = sb.layout.venv_dir.join("bin/python3").display().to_string();
    sb.host.fail(
        &[&python, "-m", "pip", "install", "--upgrade", AGENT],
        CommandOutput::failed(1, "ERROR: Could not install packages due to an OSError"),
    );

    let result = sb.install();
    assert_eq!(result.status, Status::Failed);
    assert_eq!(result.error_kind(), Some(ErrorKind::InstallationFailed));
    assert_eq!(result.error.as_ref().and_then(|e| e.resource.as_deref()), Some(AGENT));

    assert!(!sb.layout.prolog_path().exists());
    assert!(!sb.host.user_exists("license-manager"));
    assert!(!sb.layout.service_unit_path().exists());
}

#[test]
fn test_accounting_failure_aborts_install() {
    let sb = Sandbox::new();
    sb.host.fail(
        &["sacctmgr", "--immediate", "add"],
        CommandOutput::failed(1, "sacctmgr: error: Problem talking to the database"),
    );

    let result = sb.install();
    assert_eq!(result.status, Status::Failed);
    assert_eq!(
        result.error.as_ref().and_then(|e| e.resource.as_deref()),
        Some("license-manager")
    );
    assert!(!sb.host.is_registered("license-manager"));
    assert!(!sb.host.is_enabled("license-manager-agent.service"));
    assert!(!sb.layout.service_unit_path().exists());
}

#[test]
fn test_install_raises_existing_accounting_registration() {
    let sb = Sandbox::new();
    sb.host.register("license-manager", "None");

    assert!(sb.install().is_success());
    assert_eq!(sb.host.admin_level("license-manager").as_deref(), Some("Operator"));
    assert_eq!(sb.host.count("sacctmgr --immediate add"), 0);
    assert_eq!(sb.host.count("sacctmgr --immediate modify"), 1);
}

#[test]
fn test_wipe_log_on_install() {
    let sb = Sandbox::with_layout(|layout| layout.wipe_log_on_install = true);
    sb.install();
    fs::write(sb.layout.log_dir.join("agent.log"), "old").unwrap();
    sb.install();
    assert!(!sb.layout.log_dir.join("agent.log").exists());

    let keep = Sandbox::new();
    keep.install();
    fs::write(keep.layout.log_dir.join("agent.log"), "old").unwrap();
    keep.install();
    assert!(keep.layout.log_dir.join("agent.log").exists());
}

#[test]
fn test_enable_failure_is_a_warning() {
    let sb = Sandbox::new();
    sb.host.fail(&["systemctl", "enable"], CommandOutput::failed(1, "Access denied"));

    let result = sb.install();
    assert!(result.is_success());
    assert_eq!(result.summary.failed, 2);
    assert!(result.warnings.iter().any(|w| w.contains("Access denied")));
}

// ============================================================================
// Configure
// ============================================================================

#[test]
fn test_configure_writes_environment_and_clears_cache() {
    let sb = Sandbox::new();
    sb.install();
    fs::write(sb.layout.cache_dir.join("features.json"), "[]").unwrap();
    fs::create_dir(sb.layout.cache_dir.join("nested")).unwrap();

    let result = sb.configure();
    assert_eq!(result.status, Status::Applied);
    assert!(sb.cache_is_empty());

    let env = fs::read_to_string(&sb.layout.environment_file).unwrap();
    assert!(env.contains("LM2_AGENT_BACKEND_BASE_URL=http://127.0.0.1:8000\n"));
    assert!(env.contains(&format!(
        "LM2_AGENT_CACHE_DIR={}\n",
        sb.layout.cache_dir.display()
    )));
    assert!(!env.contains("PACKAGE_VERSION"));
    assert_eq!(sb.host.count("systemctl stop"), 0);
    assert_eq!(sb.host.count("systemctl start"), 0);
}

#[test]
fn test_configure_rewrites_file_in_full() {
    let sb = Sandbox::new();
    sb.install();
    fs::create_dir_all(sb.layout.environment_file.parent().unwrap()).unwrap();
    fs::write(&sb.layout.environment_file, "LM2_AGENT_LEFTOVER=1\n").unwrap();

    let target = TargetConfiguration {
        backend_base_url: "https://lm.example.com".into(),
        ..Default::default()
    };
    sb.reconciler().configure(&target, &mut NoProgress);

    let env = fs::read_to_string(&sb.layout.environment_file).unwrap();
    assert!(!env.contains("LEFTOVER"));
    assert!(env.contains("LM2_AGENT_BACKEND_BASE_URL=https://lm.example.com\n"));
}

#[test]
fn test_configure_updates_unit_intervals() {
    let sb = Sandbox::new();
    sb.install();
    sb.host.clear_calls();

    let target = TargetConfiguration {
        stat_interval: std::time::Duration::from_secs(60),
        ..Default::default()
    };
    sb.reconciler().configure(&target, &mut NoProgress);

    let timer = fs::read_to_string(sb.layout.timer_unit_path()).unwrap();
    assert!(timer.contains("OnUnitActiveSec=60\n"));
    assert_eq!(sb.host.count("systemctl daemon-reload"), 1);
}

#[test]
fn test_missing_template_key_writes_nothing() {
    let overrides = TempDir::new().unwrap();
    fs::write(
        overrides.path().join("license-manager-agent.timer.tmpl"),
        "[Timer]\nOnCalendar={calendar}\n",
    )
    .unwrap();
    let sb = Sandbox::with_layout(|layout| {
        layout.template_dir = Some(overrides.path().to_path_buf());
    });

    let result = sb.configure();
    assert_eq!(result.status, Status::Failed);
    assert_eq!(result.error_kind(), Some(ErrorKind::MissingTemplateKey));
    assert!(!sb.layout.environment_file.exists());
    assert!(!sb.layout.service_unit_path().exists());
    assert!(sb.host.calls().is_empty());
}

// ============================================================================
// Start / Stop / Restart
// ============================================================================

#[test]
fn test_start_stop_restart() {
    let sb = Sandbox::new();
    sb.install();
    let reconciler = sb.reconciler();

    assert_eq!(reconciler.start().status, Status::Applied);
    assert!(sb.host.is_active("license-manager-agent.timer"));
    assert_eq!(reconciler.start().status, Status::NoOp);

    sb.host.clear_calls();
    let restarted = reconciler.restart();
    assert_eq!(restarted.status, Status::Applied);
    assert_eq!(
        sb.host
            .calls()
            .into_iter()
            .filter(|c| !c.starts_with("systemctl is-"))
            .collect::<Vec<_>>(),
        vec![
            "systemctl stop license-manager-agent.timer",
            "systemctl stop license-manager-agent.service",
            "systemctl start license-manager-agent.timer",
        ]
    );
    assert_eq!(sb.host.count("systemctl restart"), 0);
    assert_eq!(sb.host.count("systemctl reload"), 0);

    assert_eq!(reconciler.stop().status, Status::Applied);
    assert!(!sb.host.is_active("license-manager-agent.timer"));
}

#[test]
fn test_supervisor_calls_tolerate_unregistered_units() {
    let sb = Sandbox::new();
    let reconciler = sb.reconciler();

    let stopped = reconciler.stop();
    assert!(stopped.is_success());
    assert!(stopped.warnings.is_empty());

    let started = reconciler.start();
    assert!(started.is_success());
    assert_eq!(started.warnings.len(), 1);

    assert!(reconciler.restart().is_success());
}

#[test]
fn test_direct_service_without_timer() {
    let sb = Sandbox::with_layout(|layout| layout.use_timer = false);
    sb.install();
    assert!(!sb.layout.timer_unit_path().exists());

    sb.reconciler().start();
    assert!(sb.host.is_active("license-manager-agent.service"));
    assert_eq!(sb.host.count("systemctl start license-manager-agent.timer"), 0);
}

// ============================================================================
// Upgrade
// ============================================================================

#[test]
fn test_upgrade_pins_version_and_restarts() {
    let sb = Sandbox::new();
    sb.install();
    sb.reconciler().start();
    fs::write(sb.layout.cache_dir.join("stale"), "x").unwrap();

    let result = sb.upgrade("3.2.0");
    assert_eq!(result.status, Status::Applied, "{:?}", result.error);
    assert_eq!(sb.host.installed(AGENT).as_deref(), Some("3.2.0"));
    assert!(sb.cache_is_empty());
    assert!(sb.host.is_active("license-manager-agent.timer"));

    let calls = sb.host.calls();
    let stop = calls.iter().position(|c| c == "systemctl stop license-manager-agent.timer");
    let install = calls.iter().position(|c| c.ends_with(&format!("{AGENT}==3.2.0")));
    let start = calls.iter().rposition(|c| c == "systemctl start license-manager-agent.timer");
    assert!(stop.is_some() && stop < install && install < start);
}

#[test]
fn test_upgrade_failure_leaves_service_stopped() {
    let sb = Sandbox::new();
    sb.install();
    sb.reconciler().start();
    assert!(sb.host.is_active("license-manager-agent.timer"));

    let result = sb.upgrade("9.9.9");
    assert_eq!(result.status, Status::Failed);
    assert_eq!(result.error_kind(), Some(ErrorKind::UpgradeFailed));
    let message = &result.error.as_ref().unwrap().message;
    assert!(message.contains("9.9.9"), "{message}");

    assert!(!sb.host.is_active("license-manager-agent.timer"));
    assert!(!sb.host.is_active("license-manager-agent.service"));
    assert_eq!(sb.host.installed(AGENT).as_deref(), Some("3.3.0"));
}

#[test]
fn test_upgrade_requires_version() {
    let sb = Sandbox::new();
    let result = sb.upgrade("  ");
    assert_eq!(result.error_kind(), Some(ErrorKind::UpgradeFailed));
    assert!(sb.host.calls().is_empty());
}

// ============================================================================
// Remove
// ============================================================================

#[test]
fn test_remove_after_full_install() {
    let sb = Sandbox::new();
    sb.install();
    sb.configure();
    sb.reconciler().start();

    let result = sb.remove();
    assert_eq!(result.status, Status::Applied);
    assert!(result.warnings.is_empty(), "{:?}", result.warnings);

    for path in sb.managed_paths() {
        assert!(!path.exists(), "{} survived", path.display());
    }
    assert!(!sb.host.user_exists("license-manager"));
    assert!(!sb.host.group_exists("license-manager"));
    assert!(sb.host.group_exists("slurm"));
    assert!(!sb.host.is_registered("license-manager"));
    assert!(!sb.host.is_enabled("license-manager-agent.timer"));
    assert!(!sb.host.is_active("license-manager-agent.timer"));

    let again = sb.remove();
    assert_eq!(again.status, Status::NoOp, "{:?}", again.summary);
    assert!(again.warnings.is_empty());
}

#[test]
fn test_remove_after_failed_install() {
    let sb = Sandbox::new();
    let python = sb.layout.venv_dir.join("bin/python3").display().to_string();
    sb.host.fail(&[&python, "-m", "pip", "install"], CommandOutput::failed(1, "offline"));
    assert!(!sb.install().is_success());

    let result = sb.remove();
    assert!(result.is_success());
    for path in sb.managed_paths() {
        assert!(!path.exists(), "{} survived", path.display());
    }
}

#[test]
fn test_remove_on_untouched_host() {
    let sb = Sandbox::new();
    let result = sb.remove();
    assert_eq!(result.status, Status::NoOp);
    assert!(result.warnings.is_empty());
    assert_eq!(sb.host.count("systemctl daemon-reload"), 1);
}

#[test]
fn test_remove_reloads_after_unit_files_are_gone() {
    let sb = Sandbox::new();
    sb.install();
    fs::remove_file(sb.layout.service_unit_path()).unwrap();
    fs::remove_file(sb.layout.timer_unit_path()).unwrap();
    sb.host.clear_calls();

    assert!(sb.remove().is_success());
    let calls = sb.host.calls();
    let reload = calls.iter().position(|c| c == "systemctl daemon-reload");
    let disable = calls.iter().position(|c| c.starts_with("systemctl disable"));
    assert!(reload.is_some(), "{calls:?}");
    assert!(disable < reload);
}

#[test]
fn test_remove_continues_past_failures() {
    let sb = Sandbox::new();
    sb.install();
    sb.host.fail(&["userdel"], CommandOutput::failed(8, "userdel: user lm is currently used"));

    let result = sb.remove();
    assert!(result.is_success());
    assert_eq!(result.summary.failed, 1);
    assert!(!sb.layout.venv_dir.exists());
    assert!(!sb.layout.service_unit_path().exists());
}

#[test]
fn test_remove_deletes_account_when_accounting_is_down() {
    let sb = Sandbox::new();
    sb.install();
    sb.host.fail(
        &["sacctmgr", "--immediate", "delete"],
        CommandOutput::failed(1, "Problem talking to the database"),
    );

    let result = sb.remove();
    assert!(result.is_success());
    assert_eq!(result.summary.failed, 1);
    assert!(result.warnings.iter().any(|w| w.contains("database")));
    assert!(!sb.host.user_exists("license-manager"));
    assert!(!sb.host.group_exists("license-manager"));
}

// ============================================================================
// End to end
// ============================================================================

#[test]
fn test_lifecycle_end_to_end() {
    let sb = Sandbox::new();

    let installed = sb.install();
    assert!(installed.is_success());
    assert_eq!(sb.host.installed(AGENT).as_deref(), Some("3.3.0"));
    assert!(sb.cache_is_empty());
    assert!(sb.host.is_enabled("license-manager-agent.service"));

    let upgraded = sb.upgrade("3.2.0");
    assert!(upgraded.is_success());
    assert_eq!(sb.host.installed(AGENT).as_deref(), Some("3.2.0"));
    assert!(sb.cache_is_empty());
    assert!(sb.host.is_active("license-manager-agent.timer"));

    assert!(sb.remove().is_success());
    for path in sb.managed_paths() {
        assert!(!path.exists());
    }
    assert!(!sb.host.user_exists("license-manager"));
    assert_eq!(sb.remove().status, Status::NoOp);
}
