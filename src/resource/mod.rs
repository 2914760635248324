//! Concrete host resources the charm manages
//!
//! Every resource implements [`declarative::Resource`] and reaches the
//! host only through the [`declarative::ApplyContext`] it is given, so the
//! same values drive a real host and a sandboxed one.

pub mod account;
pub mod directory;
pub mod managed_file;
pub mod python;
pub mod unit;

pub use account::ServiceAccount;
pub use directory::{DirPolicy, Directory};
pub use managed_file::ManagedFile;
pub use python::{PythonPackage, VirtualEnv};
pub use unit::{ServiceUnit, UnitFile, UnitIndex};

/// OS user and group that own a managed path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub user: String,
    pub group: String,
}

impl Owner {
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }

    /// `user:group`, as chown takes it
    pub fn spec(&self) -> String {
        format!("{}:{}", self.user, self.group)
    }
}
