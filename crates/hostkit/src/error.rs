//! Error types for host provisioning operations.
//!
//! Errors are categorized so callers can decide what aborts a
//! reconciliation pass and what is only worth a log line. Supervisor
//! failures in particular are usually tolerated: stopping or disabling
//! a unit that was never installed is not an error for teardown.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Categories of provisioning errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// Package or environment installation did not succeed
    InstallationFailed,
    /// Pinned-version upgrade did not succeed
    UpgradeFailed,
    /// A template referenced a key the render context does not define
    MissingTemplateKey,
    /// A template is syntactically broken (unbalanced braces)
    InvalidTemplate,
    /// systemctl reported a failure
    SupervisorCommandFailed,
    /// Some other host command failed
    CommandFailed,
    /// Filesystem error
    Io,
}

impl ErrorKind {
    /// Get a user-friendly description of this error category.
    pub fn description(&self) -> &'static str {
        match self {
            Self::InstallationFailed => "Installation failed",
            Self::UpgradeFailed => "Upgrade failed",
            Self::MissingTemplateKey => "Template references an undefined key",
            Self::InvalidTemplate => "Template is malformed",
            Self::SupervisorCommandFailed => "Service manager command failed",
            Self::CommandFailed => "Host command failed",
            Self::Io => "Filesystem error",
        }
    }
}

/// Errors that can occur while provisioning the host.
#[derive(Debug, Error)]
pub enum Error {
    /// Package install exited non-zero (or could not be run)
    #[error("installation of {package} failed: {message}")]
    InstallationFailed {
        /// Requirement that was being installed
        package: String,
        /// Details from the package manager
        message: String,
    },

    /// Pinned-version install failed during an upgrade
    #[error("upgrade to {version} failed: {message}")]
    UpgradeFailed {
        /// Version that was attempted
        version: String,
        /// Details from the package manager
        message: String,
    },

    /// Template placeholder without a value
    #[error("template {template} references undefined key '{key}'")]
    MissingTemplateKey {
        /// Template name
        template: String,
        /// The undefined placeholder
        key: String,
    },

    /// Template syntax error
    #[error("template {template} is malformed at byte {offset}: {message}")]
    InvalidTemplate {
        /// Template name
        template: String,
        /// Byte offset of the problem
        offset: usize,
        /// What is wrong
        message: String,
    },

    /// systemctl failed
    #[error("systemctl {action} {unit} failed: {stderr}")]
    SupervisorCommandFailed {
        /// systemctl verb
        action: String,
        /// Unit name (empty for daemon-reload)
        unit: String,
        /// Standard error from systemctl
        stderr: String,
    },

    /// Another host command failed
    #[error("command failed: {command}: {stderr}")]
    CommandFailed {
        /// The command line that failed
        command: String,
        /// Standard error from the command
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the error category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InstallationFailed { .. } => ErrorKind::InstallationFailed,
            Error::UpgradeFailed { .. } => ErrorKind::UpgradeFailed,
            Error::MissingTemplateKey { .. } => ErrorKind::MissingTemplateKey,
            Error::InvalidTemplate { .. } => ErrorKind::InvalidTemplate,
            Error::SupervisorCommandFailed { .. } => ErrorKind::SupervisorCommandFailed,
            Error::CommandFailed { .. } => ErrorKind::CommandFailed,
            Error::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether a supervisor error only says the unit is not there.
    ///
    /// Stopping or disabling a unit that was never installed
    /// lands here; teardown treats it as already done.
    pub fn is_absent_unit(&self) -> bool {
        match self {
            Error::SupervisorCommandFailed { stderr, .. } => {
                let stderr = stderr.to_lowercase();
                stderr.contains("not loaded")
                    || stderr.contains("does not exist")
                    || stderr.contains("not found")
                    || stderr.contains("no such file")
            }
            _ => false,
        }
    }

    /// Build a command failure from an argv.
    pub(crate) fn command(cmd: &str, args: &[&str], stderr: impl Into<String>) -> Self {
        Error::CommandFailed {
            command: command_line(cmd, args),
            stderr: stderr.into().trim().to_string(),
        }
    }
}

/// Render an argv for messages.
pub(crate) fn command_line(cmd: &str, args: &[&str]) -> String {
    std::iter::once(cmd)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Result type for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;
