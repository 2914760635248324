//! Rendering of every file the charm writes from configuration
//!
//! All functions here are pure apart from reading template overrides, so a
//! render failure is discovered before anything touches the host.

use anyhow::{Context, Result};
use declarative::HostFs;
use hostkit::template::{self, Context as TemplateContext};
use std::collections::BTreeMap;

use crate::config::{HostLayout, TargetConfiguration};

pub const SERVICE_TEMPLATE: &str =
    include_str!("../../templates/license-manager-agent.service.tmpl");
pub const TIMER_TEMPLATE: &str = include_str!("../../templates/license-manager-agent.timer.tmpl");
pub const PROLOG_SCRIPT: &str = include_str!("../../templates/slurmctld_prolog.sh");
pub const EPILOG_SCRIPT: &str = include_str!("../../templates/slurmctld_epilog.sh");

const ENV_HEADER: &str = "# Managed by license-agent-charm. Local edits are overwritten.\n";

/// Environment variable name for a setting key
///
/// `backend-base-url` with prefix `LM2_AGENT_` becomes
/// `LM2_AGENT_BACKEND_BASE_URL`. Keys are checked by
/// [`TargetConfiguration::validate`] before they get here.
pub fn env_key(prefix: &str, key: &str) -> String {
    format!("{prefix}{}", key.to_ascii_uppercase().replace('-', "_"))
}

/// Full content of the environment-defaults file
///
/// One `PREFIX_KEY=value` line per setting, sorted by key.
pub fn environment_file(settings: &BTreeMap<String, String>, prefix: &str) -> String {
    let mut out = String::from(ENV_HEADER);
    for (key, value) in settings {
        out.push_str(&env_key(prefix, key));
        out.push('=');
        out.push_str(&quote(value));
        out.push('\n');
    }
    out
}

/// Quote a value so both systemd and `sh` read it back unchanged
fn quote(value: &str) -> String {
    let plain = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\' | '#' | '$' | '`'));
    if plain {
        return value.to_string();
    }

    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Rendered supervisor unit files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedUnits {
    pub service: String,
    /// Present when the layout uses a timer
    pub timer: Option<String>,
}

/// Values the unit templates may reference
pub fn unit_context(layout: &HostLayout, target: &TargetConfiguration) -> TemplateContext {
    let exec_start = layout.bin_dir().join(&layout.agent_entrypoint);
    [
        ("description", "License Manager Agent".to_string()),
        ("user", layout.user.clone()),
        ("group", layout.group.clone()),
        (
            "environment-file",
            layout.environment_file.display().to_string(),
        ),
        ("exec-start", exec_start.display().to_string()),
        (
            "timeout-interval",
            target.timeout_interval.as_secs().to_string(),
        ),
        ("stat-interval", target.stat_interval.as_secs().to_string()),
        ("service-name", layout.service_name.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Render the service unit and, if used, the timer unit
pub fn render_units(
    layout: &HostLayout,
    target: &TargetConfiguration,
    fs: &dyn HostFs,
) -> Result<RenderedUnits> {
    let context = unit_context(layout, target);

    let service_template = load_template(layout, fs, &layout.service_name, SERVICE_TEMPLATE)?;
    let service = template::render(&layout.service_name, &service_template, &context)?;

    let timer = if layout.use_timer {
        let timer_template = load_template(layout, fs, &layout.timer_name, TIMER_TEMPLATE)?;
        Some(template::render(&layout.timer_name, &timer_template, &context)?)
    } else {
        None
    };

    Ok(RenderedUnits { service, timer })
}

/// `<template-dir>/<unit>.tmpl` if it exists, else the built-in template
fn load_template(
    layout: &HostLayout,
    fs: &dyn HostFs,
    unit: &str,
    builtin: &'static str,
) -> Result<String> {
    if let Some(dir) = &layout.template_dir {
        let path = dir.join(format!("{unit}.tmpl"));
        if fs.exists(&path) {
            log::debug!("Using template override {}", path.display());
            return fs
                .read_to_string(&path)
                .with_context(|| format!("Failed to read template {}", path.display()));
        }
    }
    Ok(builtin.to_string())
}
