//! # hostkit
//!
//! Typed wrappers over the host tools a service provisioner shells out to.
//!
//! This crate provides:
//! - [`systemd::Systemd`]: enable/disable/start/stop/daemon-reload
//! - [`pip`]: virtual environment creation and pip installs
//! - [`accounts`]: OS users/groups and Slurm accounting registration
//! - [`template`]: strict `{key}` rendering for unit files
//! - [`SystemRunner`] and [`LocalFs`]: the real implementations of the
//!   [`declarative::CommandRunner`] and [`declarative::HostFs`] capabilities
//! - [`testing::RecordingRunner`]: a command recorder for tests
//!
//! Every wrapper takes a `&dyn CommandRunner`, so the same code drives a
//! real host or a recorder.
//!
//! ## Example
//!
//! ```no_run
//! use hostkit::{SystemRunner, systemd::Systemd};
//!
//! let runner = SystemRunner;
//! let systemd = Systemd::new(&runner);
//! if let Err(e) = systemd.stop("license-manager-agent.service") {
//!     if !e.is_absent_unit() {
//!         eprintln!("stop failed: {e}");
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accounts;
pub mod error;
pub mod fs;
pub mod pip;
pub mod runner;
pub mod systemd;
pub mod template;
pub mod testing;

pub use error::{Error, ErrorKind, Result};
pub use fs::LocalFs;
pub use runner::SystemRunner;
