//! Charm configuration
//!
//! One TOML file with two tables:
//!
//! ```toml
//! [target]
//! backend-base-url = "https://lm.example.com"
//! log-level = "debug"
//! stat-interval = 60
//!
//! [target.tool-paths]
//! lmutil = "/opt/flexlm/lmutil"
//!
//! [layout]
//! cache-mode = "0700"
//! wipe-log-on-install = true
//! ```
//!
//! Every field has a default, so a missing file, a missing table or a
//! partial table all load into a complete configuration.

use anyhow::{Context, Result};
use hostkit::pip::PackageSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::paths;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid file mode '{0}' (expected an octal string such as \"0755\")")]
    InvalidMode(String),
    #[error("{0} must be at least one second")]
    ZeroInterval(&'static str),
    #[error("backend-base-url must be an http(s) URL, got '{0}'")]
    InvalidUrl(String),
    #[error("setting name '{0}' may only contain letters, digits, '-' and '_'")]
    InvalidSettingName(String),
    #[error("settings '{0}' and '{1}' map to the same environment variable")]
    CollidingSettingNames(String, String),
}

// ============================================================================
// Target configuration
// ============================================================================

/// Agent log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

/// OIDC client credentials the agent uses against the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AuthConfig {
    pub domain: String,
    pub audience: String,
    pub client_id: String,
    pub client_secret: String,
}

/// Desired state for one reconciliation pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TargetConfiguration {
    /// Exact agent version; unset means latest
    pub package_version: Option<String>,
    /// Extra package index searched by pip
    pub package_index_url: Option<String>,
    pub backend_base_url: String,
    pub log_level: LogLevel,
    /// How often the agent reports license usage
    #[serde(with = "seconds")]
    pub stat_interval: Duration,
    /// How long one agent run may take
    #[serde(with = "seconds")]
    pub timeout_interval: Duration,
    pub auth: AuthConfig,
    /// License server tool name -> binary path
    pub tool_paths: BTreeMap<String, PathBuf>,
    pub feature_flags: BTreeMap<String, bool>,
}

impl Default for TargetConfiguration {
    fn default() -> Self {
        Self {
            package_version: None,
            package_index_url: None,
            backend_base_url: "http://127.0.0.1:8000".to_string(),
            log_level: LogLevel::default(),
            stat_interval: Duration::from_secs(300),
            timeout_interval: Duration::from_secs(120),
            auth: AuthConfig::default(),
            tool_paths: default_tool_paths(),
            feature_flags: BTreeMap::new(),
        }
    }
}

fn default_tool_paths() -> BTreeMap<String, PathBuf> {
    [
        ("lmutil", "/usr/local/bin/lmutil"),
        ("rlmutil", "/usr/local/bin/rlmutil"),
        ("lsdyna", "/usr/local/bin/lstc_qrun"),
        ("lmxendutil", "/usr/local/bin/lmxendutil"),
        ("olixtool", "/usr/local/bin/olixtool.lnx"),
    ]
    .into_iter()
    .map(|(tool, path)| (tool.to_string(), PathBuf::from(path)))
    .collect()
}

impl TargetConfiguration {
    /// Reject values that would render a broken unit or environment file
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stat_interval.as_secs() == 0 {
            return Err(ConfigError::ZeroInterval("stat-interval"));
        }
        if self.timeout_interval.as_secs() == 0 {
            return Err(ConfigError::ZeroInterval("timeout-interval"));
        }
        let url = self.backend_base_url.as_str();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidUrl(url.to_string()));
        }
        self.validate_setting_names()
    }

    /// Feature-flag and tool names become environment variable names
    fn validate_setting_names(&self) -> Result<(), ConfigError> {
        let names = self
            .feature_flags
            .keys()
            .cloned()
            .chain(self.tool_paths.keys().map(|tool| format!("{tool}-path")));

        let mut seen: BTreeMap<String, String> = BTreeMap::new();
        for name in names {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
            if !valid {
                return Err(ConfigError::InvalidSettingName(name));
            }
            let mangled = name.to_ascii_uppercase().replace('-', "_");
            if let Some(other) = seen.insert(mangled, name.clone()) {
                return Err(ConfigError::CollidingSettingNames(other, name));
            }
        }
        Ok(())
    }

    /// The agent package at the configured version
    pub fn package_spec(&self, layout: &HostLayout) -> PackageSpec {
        let spec = match &self.package_version {
            Some(version) if !version.trim().is_empty() => {
                PackageSpec::pinned(&layout.package_name, version.trim())
            }
            _ => PackageSpec::latest(&layout.package_name),
        };
        spec.with_index(self.package_index_url.clone())
    }

    /// Flat key -> value mapping of every agent setting
    ///
    /// Keys are kebab-case; booleans are `true`/`false`, durations whole
    /// seconds. Install-only keys (package version and index) are not
    /// agent settings and are left out.
    pub fn settings(&self, layout: &HostLayout) -> BTreeMap<String, String> {
        let mut settings = BTreeMap::new();

        for (flag, enabled) in &self.feature_flags {
            settings.insert(flag.clone(), enabled.to_string());
        }
        for (tool, path) in &self.tool_paths {
            settings.insert(format!("{tool}-path"), path.display().to_string());
        }

        let fixed = [
            ("backend-base-url", self.backend_base_url.clone()),
            ("log-level", self.log_level.to_string()),
            ("stat-interval", self.stat_interval.as_secs().to_string()),
            ("timeout-interval", self.timeout_interval.as_secs().to_string()),
            ("oidc-domain", self.auth.domain.clone()),
            ("oidc-audience", self.auth.audience.clone()),
            ("oidc-client-id", self.auth.client_id.clone()),
            ("oidc-client-secret", self.auth.client_secret.clone()),
            ("log-base-dir", layout.log_dir.display().to_string()),
            ("cache-dir", layout.cache_dir.display().to_string()),
        ];
        for (key, value) in fixed {
            if settings.insert(key.to_string(), value).is_some() {
                log::warn!("Setting '{key}' shadows a feature flag or tool path of the same name");
            }
        }

        settings
    }
}

mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

// ============================================================================
// Host layout
// ============================================================================

/// Unix permission bits, written as an octal string in the config file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileMode(pub u32);

impl TryFrom<String> for FileMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let digits = value.trim().trim_start_matches("0o");
        match u32::from_str_radix(digits, 8) {
            Ok(mode) if mode <= 0o7777 => Ok(FileMode(mode)),
            _ => Err(ConfigError::InvalidMode(value)),
        }
    }
}

impl From<FileMode> for String {
    fn from(mode: FileMode) -> Self {
        format!("{:04o}", mode.0)
    }
}

/// Slurm accounting registration of the service account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct AccountingConfig {
    pub enabled: bool,
    pub account: String,
    pub admin_level: String,
}

impl Default for AccountingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            account: "root".to_string(),
            admin_level: "Operator".to_string(),
        }
    }
}

/// Where everything lives on the host and who owns it
///
/// Fixed for the lifetime of a deployment. Tests point every path into a
/// sandbox directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostLayout {
    pub venv_dir: PathBuf,
    /// Host interpreter used to create the venv
    pub python: String,
    pub package_name: String,
    /// Console script the service unit runs, inside the venv
    pub agent_entrypoint: String,
    pub cache_dir: PathBuf,
    pub cache_mode: FileMode,
    pub log_dir: PathBuf,
    pub log_mode: FileMode,
    pub wipe_log_on_install: bool,
    pub environment_file: PathBuf,
    /// The scheduler hooks source this file as well as the service
    pub environment_mode: FileMode,
    pub env_prefix: String,
    pub unit_dir: PathBuf,
    pub service_name: String,
    pub timer_name: String,
    pub use_timer: bool,
    /// Directory with `<unit name>.tmpl` overrides
    pub template_dir: Option<PathBuf>,
    pub user: String,
    pub group: String,
    /// Scheduler group the service account joins
    pub scheduler_group: String,
    pub accounting: AccountingConfig,
    /// Where the charm keeps its own lifecycle state
    pub state_dir: PathBuf,
}

impl Default for HostLayout {
    fn default() -> Self {
        Self {
            venv_dir: PathBuf::from("/srv/license-manager-agent-venv"),
            python: "python3".to_string(),
            package_name: "license-manager-agent".to_string(),
            agent_entrypoint: "license-manager-agent".to_string(),
            cache_dir: PathBuf::from("/var/cache/license-manager"),
            cache_mode: FileMode(0o777),
            log_dir: PathBuf::from("/var/log/license-manager-agent"),
            log_mode: FileMode(0o755),
            wipe_log_on_install: false,
            environment_file: PathBuf::from("/etc/default/license-manager-agent"),
            environment_mode: FileMode(0o644),
            env_prefix: "LM2_AGENT_".to_string(),
            unit_dir: PathBuf::from("/etc/systemd/system"),
            service_name: "license-manager-agent.service".to_string(),
            timer_name: "license-manager-agent.timer".to_string(),
            use_timer: true,
            template_dir: None,
            user: "license-manager".to_string(),
            group: "license-manager".to_string(),
            scheduler_group: "slurm".to_string(),
            accounting: AccountingConfig::default(),
            state_dir: PathBuf::from("/var/lib/license-agent-charm"),
        }
    }
}

impl HostLayout {
    /// Layout with every path under `root`, for sandboxed runs
    pub fn rooted_at(root: &Path) -> Self {
        let defaults = Self::default();
        let reroot = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            venv_dir: reroot(&defaults.venv_dir),
            cache_dir: reroot(&defaults.cache_dir),
            log_dir: reroot(&defaults.log_dir),
            environment_file: reroot(&defaults.environment_file),
            unit_dir: reroot(&defaults.unit_dir),
            state_dir: reroot(&defaults.state_dir),
            ..defaults
        }
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.venv_dir.join("bin")
    }

    pub fn prolog_path(&self) -> PathBuf {
        self.bin_dir().join("slurmctld_prolog")
    }

    pub fn epilog_path(&self) -> PathBuf {
        self.bin_dir().join("slurmctld_epilog")
    }

    pub fn service_unit_path(&self) -> PathBuf {
        self.unit_dir.join(&self.service_name)
    }

    pub fn timer_unit_path(&self) -> PathBuf {
        self.unit_dir.join(&self.timer_name)
    }

    /// The unit that start/stop act on first: the timer when one is used
    pub fn primary_unit(&self) -> &str {
        if self.use_timer {
            &self.timer_name
        } else {
            &self.service_name
        }
    }

    fn expand_paths(&mut self) {
        for path in [
            &mut self.venv_dir,
            &mut self.cache_dir,
            &mut self.log_dir,
            &mut self.environment_file,
            &mut self.unit_dir,
            &mut self.state_dir,
        ] {
            *path = paths::expand(&path.to_string_lossy());
        }
        if let Some(dir) = &mut self.template_dir {
            *dir = paths::expand(&dir.to_string_lossy());
        }
    }
}

// ============================================================================
// Config file
// ============================================================================

/// Everything read from the config file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharmConfig {
    pub layout: HostLayout,
    pub target: TargetConfiguration,
}

impl CharmConfig {
    /// Load the config file, or defaults if it does not exist
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        log::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Parse and validate config text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: CharmConfig = toml::from_str(content)?;
        config.layout.expand_paths();
        for path in config.target.tool_paths.values_mut() {
            *path = paths::expand(&path.to_string_lossy());
        }
        config.target.validate()?;
        Ok(config)
    }
}
